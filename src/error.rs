use std::ffi::CStr;
use std::fmt;
use std::os::raw::{c_int, c_void};
use std::result;

use crate::constants::{SP_ERROR, SP_OK};
use crate::sys;

/// Custom result type for lumokv operations
pub type Result<T> = result::Result<T, Error>;

/// Kind of native handle, used to report operations on released handles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    Environment,
    Database,
    Cursor,
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HandleKind::Environment => write!(f, "environment"),
            HandleKind::Database => write!(f, "database"),
            HandleKind::Cursor => write!(f, "cursor"),
        }
    }
}

/// lumokv error kinds
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// No value stored for the key
    #[error("Key not found")]
    NotFound,
    /// Begin was called while a transaction is active
    #[error("Transaction already in progress")]
    TransactionInProgress,
    /// Commit or rollback without an active transaction
    #[error("No active transaction")]
    NoActiveTransaction,
    /// Fault reported by the storage engine
    #[error("{0}")]
    Native(String),
    /// Value could not be encoded
    #[error("Serialization failed: {0}")]
    Serialization(String),
    /// Stored bytes could not be decoded
    #[error("Deserialization failed: {0}")]
    Deserialization(String),
    /// The engine returned a status outside its documented contract
    #[error("Unexpected return value from {call}: {status}")]
    UnexpectedStatus { call: &'static str, status: c_int },
    /// The handle was already released
    #[error("The {0} is closed")]
    Closed(HandleKind),
    /// Cursor key/value read while not positioned on a row
    #[error("Cursor is not positioned on a row")]
    NotPositioned,
    /// Database close attempted while cursors are still registered
    #[error("Database has {0} open cursor(s)")]
    CursorsOpen(usize),
    /// Argument that cannot be passed to the engine
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Reads the engine's last error message for a handle, if any.
pub(crate) fn last_error(handle: *mut c_void) -> Option<String> {
    unsafe {
        let msg = sys::sp_error(handle);
        if msg.is_null() {
            None
        } else {
            Some(CStr::from_ptr(msg).to_string_lossy().into_owned())
        }
    }
}

/// Error for a failed call, carrying the engine's message.
pub(crate) fn native_error(handle: *mut c_void, call: &str) -> Error {
    Error::Native(last_error(handle).unwrap_or_else(|| format!("{} failed", call)))
}

/// Helper trait for converting 0/-1 status codes to Results
pub(crate) trait IntoResult {
    fn into_result(self, handle: *mut c_void, call: &'static str) -> Result<()>;
}

impl IntoResult for c_int {
    fn into_result(self, handle: *mut c_void, call: &'static str) -> Result<()> {
        match self {
            SP_OK => Ok(()),
            SP_ERROR => Err(native_error(handle, call)),
            status => Err(Error::UnexpectedStatus { call, status }),
        }
    }
}
