use libc::size_t;
use std::os::raw::{c_char, c_double, c_int, c_uint, c_void};

use super::spcmpf;
use crate::constants::{SPCMP, SPDIR, SPGC, SPGCF, SPGROW, SPMERGE, SPMERGEWM, SPPAGE};

#[link(name = "sophia")]
extern "C" {
    pub(crate) fn sp_env() -> *mut c_void;
    pub(crate) fn sp_open(env: *mut c_void) -> *mut c_void;
    fn sp_ctl(ptr: *mut c_void, opt: c_int, ...) -> c_int;
    pub(crate) fn sp_destroy(ptr: *mut c_void) -> c_int;
    pub(crate) fn sp_error(ptr: *mut c_void) -> *const c_char;

    pub(crate) fn sp_begin(db: *mut c_void) -> c_int;
    pub(crate) fn sp_commit(db: *mut c_void) -> c_int;
    pub(crate) fn sp_rollback(db: *mut c_void) -> c_int;

    pub(crate) fn sp_set(
        db: *mut c_void,
        key: *const c_void,
        ksize: size_t,
        value: *const c_void,
        vsize: size_t,
    ) -> c_int;
    pub(crate) fn sp_delete(db: *mut c_void, key: *const c_void, ksize: size_t) -> c_int;
    pub(crate) fn sp_get(
        db: *mut c_void,
        key: *const c_void,
        ksize: size_t,
        value: *mut *mut c_void,
        vsize: *mut size_t,
    ) -> c_int;

    pub(crate) fn sp_cursor(
        db: *mut c_void,
        order: c_int,
        key: *const c_void,
        ksize: size_t,
    ) -> *mut c_void;
    pub(crate) fn sp_fetch(cur: *mut c_void) -> c_int;
    pub(crate) fn sp_key(cur: *mut c_void) -> *const c_char;
    pub(crate) fn sp_keysize(cur: *mut c_void) -> size_t;
    pub(crate) fn sp_value(cur: *mut c_void) -> *const c_char;
    pub(crate) fn sp_valuesize(cur: *mut c_void) -> size_t;
}

// Typed front-ends for the variadic sp_ctl. Integer arguments go through
// as C int/uint32 and factors as double, matching the default promotions.

pub(crate) unsafe fn sp_ctl_dir(env: *mut c_void, access: u32, dir: *const c_char) -> c_int {
    sp_ctl(env, SPDIR, access as c_uint, dir)
}

pub(crate) unsafe fn sp_ctl_cmp(env: *mut c_void, cmp: spcmpf, arg: *mut c_void) -> c_int {
    sp_ctl(env, SPCMP, cmp, arg)
}

pub(crate) unsafe fn sp_ctl_page(env: *mut c_void, count: u32) -> c_int {
    sp_ctl(env, SPPAGE, count as c_uint)
}

pub(crate) unsafe fn sp_ctl_gc(env: *mut c_void, active: c_int) -> c_int {
    sp_ctl(env, SPGC, active)
}

pub(crate) unsafe fn sp_ctl_gcf(env: *mut c_void, factor: f64) -> c_int {
    sp_ctl(env, SPGCF, factor as c_double)
}

pub(crate) unsafe fn sp_ctl_grow(env: *mut c_void, newsize: u32, factor: f64) -> c_int {
    sp_ctl(env, SPGROW, newsize as c_uint, factor as c_double)
}

pub(crate) unsafe fn sp_ctl_merge(env: *mut c_void, merge: c_int) -> c_int {
    sp_ctl(env, SPMERGE, merge)
}

pub(crate) unsafe fn sp_ctl_mergewm(env: *mut c_void, watermark: u32) -> c_int {
    sp_ctl(env, SPMERGEWM, watermark as c_uint)
}

/// Frees a value returned by `sp_get`.
pub(crate) unsafe fn sp_free(ptr: *mut c_void) {
    libc::free(ptr)
}
