use libc::size_t;
use std::os::raw::{c_char, c_void};

use crate::constants::{SP_END, SP_ERROR, SP_ROW};
use crate::database::Database;
use crate::error::{native_error, Error, HandleKind, Result};
use crate::handle::Handle;
use crate::sys;

/// Position of a cursor relative to its rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// Created, nothing fetched yet
    Unstarted,
    /// On a row; key and value are readable
    Positioned,
    /// Every row has been fetched
    Exhausted,
    /// Released; no further calls are valid
    Closed,
}

/// Database cursor
///
/// Borrows its database, so the database cannot be closed while the
/// cursor is alive. The native iterator is released on [`Cursor::close`]
/// or on drop, whichever comes first.
pub struct Cursor<'db> {
    handle: Handle,
    db: &'db Database,
    state: CursorState,
}

impl<'db> Cursor<'db> {
    pub(crate) fn new(handle: Handle, db: &'db Database) -> Self {
        Cursor {
            handle,
            db,
            state: CursorState::Unstarted,
        }
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    /// Advance to the next row.
    ///
    /// Returns `false` once no rows remain, and keeps returning `false`
    /// on later calls.
    pub fn fetch(&mut self) -> Result<bool> {
        let cur = self.handle.as_ptr()?;
        if self.state == CursorState::Exhausted {
            return Ok(false);
        }
        match unsafe { sys::sp_fetch(cur) } {
            SP_ROW => {
                self.state = CursorState::Positioned;
                Ok(true)
            }
            SP_END => {
                self.state = CursorState::Exhausted;
                Ok(false)
            }
            SP_ERROR => {
                self.state = CursorState::Exhausted;
                Err(native_error(cur, "sp_fetch"))
            }
            status => {
                self.state = CursorState::Exhausted;
                Err(Error::UnexpectedStatus {
                    call: "sp_fetch",
                    status,
                })
            }
        }
    }

    fn positioned(&self) -> Result<*mut c_void> {
        let cur = self.handle.as_ptr()?;
        match self.state {
            CursorState::Positioned => Ok(cur),
            _ => Err(Error::NotPositioned),
        }
    }

    /// Size of the current key
    pub fn key_size(&self) -> Result<usize> {
        let cur = self.positioned()?;
        Ok(unsafe { sys::sp_keysize(cur) })
    }

    /// Size of the current value
    pub fn value_size(&self) -> Result<usize> {
        let cur = self.positioned()?;
        Ok(unsafe { sys::sp_valuesize(cur) })
    }

    /// Key of the current row
    pub fn key(&self) -> Result<Vec<u8>> {
        let cur = self.positioned()?;
        Ok(unsafe { copy_bytes(sys::sp_key(cur), sys::sp_keysize(cur)) })
    }

    /// Value of the current row
    pub fn value(&self) -> Result<Vec<u8>> {
        let cur = self.positioned()?;
        Ok(unsafe { copy_bytes(sys::sp_value(cur), sys::sp_valuesize(cur)) })
    }

    /// Release the cursor. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if !self.handle.is_open() {
            return Ok(());
        }
        self.handle.release()?;
        self.state = CursorState::Closed;
        self.db.cursor_released();
        Ok(())
    }
}

impl Iterator for Cursor<'_> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.state == CursorState::Closed {
            return None;
        }
        match self.fetch() {
            Ok(true) => Some(self.key().and_then(|key| Ok((key, self.value()?)))),
            Ok(false) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

impl Drop for Cursor<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("failed to release {}: {}", self.handle.kind(), e);
        }
    }
}

unsafe fn copy_bytes(ptr: *const c_char, size: size_t) -> Vec<u8> {
    if ptr.is_null() || size == 0 {
        Vec::new()
    } else {
        std::slice::from_raw_parts(ptr as *const u8, size).to_vec()
    }
}
