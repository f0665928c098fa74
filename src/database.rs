use libc::size_t;
use std::cell::Cell;
use std::os::raw::{c_int, c_void};
use std::ptr;

use crate::constants::{Order, SP_ERROR, SP_FOUND, SP_NOT_FOUND, SP_OK, SP_TXN_STATE};
use crate::cursor::Cursor;
use crate::env::Environment;
use crate::error::{last_error, native_error, Error, HandleKind, IntoResult, Result};
use crate::handle::Handle;
use crate::sys;
use crate::transaction::Transaction;

/// Database handle
///
/// Owns the environment it was opened from. Reads observe the most
/// recent writes made through this handle, including those of its own
/// active transaction.
pub struct Database {
    handle: Handle,
    env: Environment,
    /// Cursors created and not yet released
    cursors: Cell<usize>,
}

impl Database {
    pub(crate) fn new(handle: Handle, env: Environment) -> Self {
        Database {
            handle,
            env,
            cursors: Cell::new(0),
        }
    }

    pub(crate) fn as_ptr(&self) -> Result<*mut c_void> {
        self.handle.as_ptr()
    }

    /// Get the value stored for `key`.
    ///
    /// Returns [`Error::NotFound`] when the key is absent. A stored empty
    /// value comes back as an empty vector.
    pub fn get<K: AsRef<[u8]>>(&self, key: K) -> Result<Vec<u8>> {
        let db = self.as_ptr()?;
        let key = key.as_ref();
        let mut value: *mut c_void = ptr::null_mut();
        let mut size: size_t = 0;

        let rc = unsafe {
            sys::sp_get(
                db,
                key.as_ptr() as *const c_void,
                key.len(),
                &mut value,
                &mut size,
            )
        };
        match rc {
            SP_FOUND => Ok(unsafe { take_value(value, size) }),
            SP_NOT_FOUND => Err(Error::NotFound),
            SP_ERROR => Err(native_error(db, "sp_get")),
            status => Err(Error::UnexpectedStatus {
                call: "sp_get",
                status,
            }),
        }
    }

    /// Check whether a value is stored for `key` without fetching it.
    pub fn has<K: AsRef<[u8]>>(&self, key: K) -> Result<bool> {
        let db = self.as_ptr()?;
        let key = key.as_ref();
        let rc = unsafe {
            sys::sp_get(
                db,
                key.as_ptr() as *const c_void,
                key.len(),
                ptr::null_mut(),
                ptr::null_mut(),
            )
        };
        match rc {
            SP_FOUND => Ok(true),
            SP_NOT_FOUND => Ok(false),
            SP_ERROR => Err(native_error(db, "sp_get")),
            status => Err(Error::UnexpectedStatus {
                call: "sp_get",
                status,
            }),
        }
    }

    /// Store `value` under `key`, replacing any previous value.
    pub fn set<K: AsRef<[u8]>, V: AsRef<[u8]>>(&self, key: K, value: V) -> Result<()> {
        let db = self.as_ptr()?;
        let key = key.as_ref();
        let value = value.as_ref();
        unsafe {
            sys::sp_set(
                db,
                key.as_ptr() as *const c_void,
                key.len(),
                value.as_ptr() as *const c_void,
                value.len(),
            )
        }
        .into_result(db, "sp_set")
    }

    /// Delete `key`. Deleting an absent key succeeds.
    pub fn delete<K: AsRef<[u8]>>(&self, key: K) -> Result<()> {
        let db = self.as_ptr()?;
        let key = key.as_ref();
        unsafe { sys::sp_delete(db, key.as_ptr() as *const c_void, key.len()) }
            .into_result(db, "sp_delete")
    }

    /// Create a cursor over the rows selected by `order` and `start`.
    ///
    /// Without a start key the cursor covers every row, ascending for
    /// [`Order::GT`]/[`Order::GTE`] and descending for
    /// [`Order::LT`]/[`Order::LTE`]. With a start key the order also
    /// decides whether that key itself is included.
    pub fn cursor(&self, order: Order, start: Option<&[u8]>) -> Result<Cursor<'_>> {
        let db = self.as_ptr()?;
        let (key, len) = match start {
            Some(key) => (key.as_ptr() as *const c_void, key.len()),
            None => (ptr::null(), 0),
        };
        let ptr = unsafe { sys::sp_cursor(db, order as c_int, key, len) };
        let handle = Handle::from_raw(ptr, HandleKind::Cursor, db, "sp_cursor")?;
        self.cursors.set(self.cursors.get() + 1);
        Ok(Cursor::new(handle, self))
    }

    /// Create a cursor starting at `key`.
    pub fn cursor_from<K: AsRef<[u8]>>(&self, order: Order, key: K) -> Result<Cursor<'_>> {
        self.cursor(order, Some(key.as_ref()))
    }

    /// Call `each` for every row the cursor `(order, start)` visits.
    pub fn each<F>(&self, order: Order, start: Option<&[u8]>, mut each: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]),
    {
        let mut cursor = self.cursor(order, start)?;
        while cursor.fetch()? {
            let key = cursor.key()?;
            let value = cursor.value()?;
            each(&key, &value);
        }
        cursor.close()
    }

    pub(crate) fn cursor_released(&self) {
        self.cursors.set(self.cursors.get().saturating_sub(1));
    }

    /// Start a transaction.
    ///
    /// Fails with [`Error::TransactionInProgress`] if one is already
    /// active; the active transaction is left untouched.
    pub fn begin(&self) -> Result<()> {
        let db = self.as_ptr()?;
        match unsafe { sys::sp_begin(db) } {
            SP_OK => Ok(()),
            SP_TXN_STATE => Err(Error::TransactionInProgress),
            SP_ERROR => Err(native_error(db, "sp_begin")),
            status => Err(Error::UnexpectedStatus {
                call: "sp_begin",
                status,
            }),
        }
    }

    /// Apply every write made since [`Database::begin`] atomically.
    ///
    /// If the commit fails none of the writes are applied.
    pub fn commit(&self) -> Result<()> {
        let db = self.as_ptr()?;
        txn_end(unsafe { sys::sp_commit(db) }, db, "sp_commit")
    }

    /// Discard every write made since [`Database::begin`].
    pub fn rollback(&self) -> Result<()> {
        let db = self.as_ptr()?;
        txn_end(unsafe { sys::sp_rollback(db) }, db, "sp_rollback")
    }

    /// Start a transaction that rolls back unless committed.
    pub fn transaction(&self) -> Result<Transaction<'_>> {
        self.begin()?;
        Ok(Transaction::new(self))
    }

    /// Close the database and then its environment.
    ///
    /// Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.handle.is_open() {
            let open = self.cursors.get();
            if open > 0 {
                log::warn!("refusing to close database with {} open cursor(s)", open);
                return Err(Error::CursorsOpen(open));
            }
            self.handle.release()?;
            log::debug!("database closed");
        }
        self.env.close()
    }

    pub fn is_closed(&self) -> bool {
        !self.handle.is_open()
    }

    /// Last error the engine recorded on this database.
    pub fn error(&self) -> Option<Error> {
        let db = self.as_ptr().ok()?;
        last_error(db).map(Error::Native)
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if self.handle.is_open() {
            log::warn!("database dropped without close");
        }
        if let Err(e) = self.close() {
            log::warn!("failed to release database: {}", e);
        }
    }
}

fn txn_end(rc: c_int, db: *mut c_void, call: &'static str) -> Result<()> {
    match rc {
        SP_TXN_STATE => Err(Error::NoActiveTransaction),
        rc => rc.into_result(db, call),
    }
}

/// Copies a value handed out by `sp_get` and frees the engine's buffer.
unsafe fn take_value(ptr: *mut c_void, size: size_t) -> Vec<u8> {
    if ptr.is_null() {
        return Vec::new();
    }
    let value = if size == 0 {
        Vec::new()
    } else {
        std::slice::from_raw_parts(ptr as *const u8, size).to_vec()
    };
    sys::sp_free(ptr);
    value
}
