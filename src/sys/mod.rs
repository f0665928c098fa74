//! C-level boundary to the storage engine.
//!
//! Everything above this module talks to the engine only through these
//! calls. With the `sophia` feature they resolve to the system libsophia;
//! otherwise the embedded engine provides the same ABI in-process.

use libc::size_t;
use std::os::raw::{c_char, c_int, c_void};

/// Key comparison callback registered with `SPCMP`.
///
/// Returns a negative value, zero or a positive value when `a` orders
/// before, equal to or after `b`.
#[allow(non_camel_case_types)]
pub(crate) type spcmpf = unsafe extern "C" fn(
    a: *mut c_char,
    asz: size_t,
    b: *mut c_char,
    bsz: size_t,
    arg: *mut c_void,
) -> c_int;

#[cfg(feature = "sophia")]
mod native;
#[cfg(feature = "sophia")]
pub(crate) use self::native::*;

#[cfg(not(feature = "sophia"))]
mod embedded;
#[cfg(not(feature = "sophia"))]
pub(crate) use self::embedded::*;
