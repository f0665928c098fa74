use std::os::raw::c_void;
use std::ptr::NonNull;

use crate::error::{native_error, Error, HandleKind, Result};
use crate::sys;

#[derive(Debug)]
enum HandleState {
    Open(NonNull<c_void>),
    Closed,
}

/// Owner of one native handle.
///
/// Release moves the state from `Open` to `Closed` exactly once. A second
/// release is a no-op. If the engine refuses to destroy the handle the
/// state goes back to `Open` so the caller sees the error and may retry.
#[derive(Debug)]
pub(crate) struct Handle {
    state: HandleState,
    kind: HandleKind,
}

impl Handle {
    pub(crate) fn new(ptr: NonNull<c_void>, kind: HandleKind) -> Self {
        Handle {
            state: HandleState::Open(ptr),
            kind,
        }
    }

    /// Wraps a pointer returned by a constructor call, mapping null to the
    /// error reported on `parent`.
    pub(crate) fn from_raw(
        ptr: *mut c_void,
        kind: HandleKind,
        parent: *mut c_void,
        call: &'static str,
    ) -> Result<Self> {
        match NonNull::new(ptr) {
            Some(ptr) => Ok(Handle::new(ptr, kind)),
            None if parent.is_null() => Err(Error::Native(format!("{} failed", call))),
            None => Err(native_error(parent, call)),
        }
    }

    pub(crate) fn as_ptr(&self) -> Result<*mut c_void> {
        match self.state {
            HandleState::Open(ptr) => Ok(ptr.as_ptr()),
            HandleState::Closed => Err(Error::Closed(self.kind)),
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        matches!(self.state, HandleState::Open(_))
    }

    pub(crate) fn kind(&self) -> HandleKind {
        self.kind
    }

    pub(crate) fn release(&mut self) -> Result<()> {
        let ptr = match std::mem::replace(&mut self.state, HandleState::Closed) {
            HandleState::Open(ptr) => ptr,
            HandleState::Closed => return Ok(()),
        };

        if unsafe { sys::sp_destroy(ptr.as_ptr()) } != 0 {
            let err = native_error(ptr.as_ptr(), "sp_destroy");
            self.state = HandleState::Open(ptr);
            return Err(err);
        }

        log::debug!("released {} handle", self.kind);
        Ok(())
    }
}
