use libc::size_t;
use std::cmp::Ordering;
use std::ffi::CString;
use std::os::raw::{c_char, c_int, c_void};
use std::os::unix::ffi::OsStrExt;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use crate::constants::Access;
use crate::database::Database;
use crate::error::{last_error, Error, HandleKind, IntoResult, Result};
use crate::handle::Handle;
use crate::sys;

/// Boxed key comparator owned by an [`Environment`].
///
/// The engine receives the address of this slot as the callback argument,
/// so it must stay at a fixed heap location until the environment is
/// released.
struct ComparatorSlot {
    cmp: Box<dyn Fn(&[u8], &[u8]) -> Ordering>,
}

/// Trampoline the engine calls for every key comparison.
unsafe extern "C" fn compare_trampoline(
    a: *mut c_char,
    asz: size_t,
    b: *mut c_char,
    bsz: size_t,
    arg: *mut c_void,
) -> c_int {
    let slot = &*(arg as *const ComparatorSlot);
    let a = key_slice(a, asz);
    let b = key_slice(b, bsz);

    // Unwinding must not cross into the engine
    match panic::catch_unwind(AssertUnwindSafe(|| (slot.cmp)(a, b))) {
        Ok(Ordering::Less) => -1,
        Ok(Ordering::Equal) => 0,
        Ok(Ordering::Greater) => 1,
        Err(_) => {
            log::error!("key comparator panicked; treating keys as equal");
            0
        }
    }
}

unsafe fn key_slice<'a>(ptr: *mut c_char, len: size_t) -> &'a [u8] {
    if ptr.is_null() || len == 0 {
        &[]
    } else {
        std::slice::from_raw_parts(ptr as *const u8, len)
    }
}

/// Configuration for a database, applied before it is opened.
///
/// Each setter forwards one directive to the engine and returns the
/// engine's error when the directive is rejected.
pub struct Environment {
    handle: Handle,
    comparator: Option<Box<ComparatorSlot>>,
}

impl Environment {
    /// Create a new, unconfigured environment
    pub fn new() -> Result<Self> {
        let ptr = unsafe { sys::sp_env() };
        let handle = Handle::from_raw(
            ptr,
            HandleKind::Environment,
            std::ptr::null_mut(),
            "sp_env",
        )?;
        Ok(Environment {
            handle,
            comparator: None,
        })
    }

    /// Set the access mode and the directory for the database.
    pub fn set_directory<P: AsRef<Path>>(&mut self, access: Access, dir: P) -> Result<()> {
        let env = self.handle.as_ptr()?;
        let dir = dir.as_ref();
        let cdir = CString::new(dir.as_os_str().as_bytes()).map_err(|_| {
            Error::InvalidArgument(format!("directory contains a NUL byte: {}", dir.display()))
        })?;
        unsafe { sys::sp_ctl_dir(env, access.bits(), cdir.as_ptr()) }.into_result(env, "sp_ctl")
    }

    /// Set the comparator used to order keys.
    ///
    /// The comparator must be a total order and free of side effects;
    /// an inconsistent comparator silently corrupts iteration order.
    pub fn set_comparator<F>(&mut self, cmp: F) -> Result<()>
    where
        F: Fn(&[u8], &[u8]) -> Ordering + 'static,
    {
        let env = self.handle.as_ptr()?;
        let slot = Box::new(ComparatorSlot { cmp: Box::new(cmp) });
        let arg = &*slot as *const ComparatorSlot as *mut c_void;
        unsafe { sys::sp_ctl_cmp(env, compare_trampoline, arg) }.into_result(env, "sp_ctl")?;
        // The engine now refers to the new slot; the previous one can go
        self.comparator = Some(slot);
        Ok(())
    }

    /// Set the maximum key count in a single page.
    pub fn set_page_size(&mut self, count: u32) -> Result<()> {
        let env = self.handle.as_ptr()?;
        unsafe { sys::sp_ctl_page(env, count) }.into_result(env, "sp_ctl")
    }

    /// Turn the garbage collector on or off.
    pub fn set_gc_enabled(&mut self, enabled: bool) -> Result<()> {
        let env = self.handle.as_ptr()?;
        unsafe { sys::sp_ctl_gc(env, enabled as c_int) }.into_result(env, "sp_ctl")
    }

    /// Set the garbage collector factor.
    ///
    /// A factor of 0.5 means live data is copied out once half or fewer
    /// of the stored records are still live.
    pub fn set_gc_factor(&mut self, factor: f64) -> Result<()> {
        let env = self.handle.as_ptr()?;
        unsafe { sys::sp_ctl_gcf(env, factor) }.into_result(env, "sp_ctl")
    }

    /// Set the initial size and resize factor for new database files.
    pub fn set_grow(&mut self, size: u32, factor: f64) -> Result<()> {
        let env = self.handle.as_ptr()?;
        unsafe { sys::sp_ctl_grow(env, size, factor) }.into_result(env, "sp_ctl")
    }

    /// Whether to run the merger during open.
    pub fn set_merge_enabled(&mut self, enabled: bool) -> Result<()> {
        let env = self.handle.as_ptr()?;
        unsafe { sys::sp_ctl_merge(env, enabled as c_int) }.into_result(env, "sp_ctl")
    }

    /// Set the update count that triggers a merge.
    pub fn set_merge_watermark(&mut self, watermark: u32) -> Result<()> {
        let env = self.handle.as_ptr()?;
        unsafe { sys::sp_ctl_mergewm(env, watermark) }.into_result(env, "sp_ctl")
    }

    /// Open the database configured in this environment.
    ///
    /// The environment moves into the returned database and is released
    /// when the database closes. On failure it is released here.
    pub fn open(mut self) -> Result<Database> {
        let env = self.handle.as_ptr()?;
        let ptr = unsafe { sys::sp_open(env) };
        match Handle::from_raw(ptr, HandleKind::Database, env, "sp_open") {
            Ok(handle) => {
                log::debug!("database opened");
                Ok(Database::new(handle, self))
            }
            Err(err) => {
                if let Err(close_err) = self.close() {
                    log::warn!("failed to release environment after open error: {}", close_err);
                }
                Err(err)
            }
        }
    }

    /// Close the environment. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        self.handle.release()?;
        self.comparator = None;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        !self.handle.is_open()
    }

    /// Last error the engine recorded on this environment, cleared by the
    /// next successful call.
    pub fn error(&self) -> Option<Error> {
        let env = self.handle.as_ptr().ok()?;
        last_error(env).map(Error::Native)
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("failed to release environment: {}", e);
        }
    }
}

/// Open the database in `dir` with the given access mode.
///
/// Shorthand for [`Environment::new`], [`Environment::set_directory`] and
/// [`Environment::open`].
pub fn open<P: AsRef<Path>>(access: Access, dir: P) -> Result<Database> {
    let mut env = Environment::new()?;
    env.set_directory(access, dir)?;
    env.open()
}
