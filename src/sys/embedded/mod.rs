//! In-process engine exposing the same C ABI as libsophia.
//!
//! Handles are boxed [`Object`]s passed around as `void *`. Every call
//! that can fail records a message on the handle, readable through
//! `sp_error` until the next call on the same handle.

mod journal;
mod store;

use libc::size_t;
use once_cell::sync::Lazy;
use std::cell::Cell;
use std::collections::HashSet;
use std::ffi::{CStr, CString, OsStr};
use std::fs;
use std::os::raw::{c_char, c_int, c_void};
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;
use std::ptr;
use std::rc::Rc;
use std::sync::Mutex;

use self::journal::{encoded_len, Journal, Record};
use self::store::{Collation, Store};
use super::spcmpf;
use crate::constants::{
    Access, Order, DEFAULT_GC_FACTOR, DEFAULT_GROW_FACTOR, DEFAULT_GROW_SIZE,
    DEFAULT_MERGE_WATERMARK, DEFAULT_PAGE_SIZE, JOURNAL_FILE, SP_END, SP_ERROR, SP_FOUND,
    SP_NOT_FOUND, SP_OK, SP_ROW, SP_TXN_STATE,
};

/// Directories currently held by an open database in this process
static LOCKED_DIRS: Lazy<Mutex<HashSet<PathBuf>>> = Lazy::new(|| Mutex::new(HashSet::new()));

type CallResult = Result<c_int, String>;

struct Object {
    error: Option<CString>,
    body: Body,
}

enum Body {
    Env(EnvConfig),
    Db(Db),
    Cursor(CursorRows),
    /// Database whose close failed; only `sp_error` and `sp_destroy` apply
    Spent,
}

impl Object {
    fn into_raw(body: Body) -> *mut c_void {
        Box::into_raw(Box::new(Object { error: None, body })) as *mut c_void
    }

    fn set_error(&mut self, message: String) {
        self.error = CString::new(message).ok();
    }

    fn finish(&mut self, result: CallResult) -> c_int {
        match result {
            Ok(status) => {
                self.error = None;
                status
            }
            Err(message) => {
                self.set_error(message);
                SP_ERROR
            }
        }
    }
}

unsafe fn object<'a>(ptr: *mut c_void) -> Option<&'a mut Object> {
    (ptr as *mut Object).as_mut()
}

unsafe fn bytes<'a>(ptr: *const c_void, len: size_t) -> &'a [u8] {
    if ptr.is_null() || len == 0 {
        &[]
    } else {
        std::slice::from_raw_parts(ptr as *const u8, len)
    }
}

fn not_env() -> String {
    "not an environment handle".to_string()
}

fn not_db() -> String {
    "not a database handle".to_string()
}

#[derive(Clone)]
struct EnvConfig {
    dir: Option<PathBuf>,
    access: Access,
    cmp: Option<(spcmpf, *mut c_void)>,
    page_size: u32,
    gc: bool,
    gc_factor: f64,
    grow_size: u32,
    grow_factor: f64,
    merge: bool,
    merge_watermark: u32,
    opened: bool,
}

impl Default for EnvConfig {
    fn default() -> Self {
        EnvConfig {
            dir: None,
            access: Access::READ_WRITE,
            cmp: None,
            page_size: DEFAULT_PAGE_SIZE,
            gc: true,
            gc_factor: DEFAULT_GC_FACTOR,
            grow_size: DEFAULT_GROW_SIZE,
            grow_factor: DEFAULT_GROW_FACTOR,
            merge: true,
            merge_watermark: DEFAULT_MERGE_WATERMARK,
            opened: false,
        }
    }
}

impl EnvConfig {
    fn configurable(&self) -> Result<(), String> {
        if self.opened {
            return Err("environment is already open".to_string());
        }
        Ok(())
    }
}

/// Process-wide claim on a database directory, dropped with the database
struct DirLock(PathBuf);

impl DirLock {
    fn acquire(dir: PathBuf) -> Result<DirLock, String> {
        let mut locked = LOCKED_DIRS
            .lock()
            .map_err(|_| "directory lock table poisoned".to_string())?;
        if !locked.insert(dir.clone()) {
            return Err(format!("directory '{}' is locked", dir.display()));
        }
        Ok(DirLock(dir))
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        if let Ok(mut locked) = LOCKED_DIRS.lock() {
            locked.remove(&self.0);
        }
    }
}

struct Db {
    store: Store,
    journal: Journal,
    config: EnvConfig,
    read_only: bool,
    updates: u32,
    cursors: Rc<Cell<usize>>,
    _lock: DirLock,
}

impl Db {
    fn open(config: &EnvConfig) -> Result<Db, String> {
        let dir = config
            .dir
            .clone()
            .ok_or_else(|| "directory is not set".to_string())?;
        let read_only = config.access.contains(Access::READ_ONLY);

        if !dir.exists() {
            if !config.access.contains(Access::CREATE) {
                return Err(format!("directory '{}' does not exist", dir.display()));
            }
            fs::create_dir_all(&dir)
                .map_err(|e| format!("failed to create '{}': {}", dir.display(), e))?;
        }
        if !dir.is_dir() {
            return Err(format!("'{}' is not a directory", dir.display()));
        }

        let dir = fs::canonicalize(&dir).map_err(|e| format!("{}: {}", dir.display(), e))?;
        let lock = DirLock::acquire(dir.clone())?;

        let (journal, batches) = Journal::open(
            &dir.join(JOURNAL_FILE),
            read_only,
            config.grow_size as usize,
            config.grow_factor,
        )
        .map_err(|e| format!("failed to open journal in '{}': {}", dir.display(), e))?;

        let mut store = Store::new(Collation::new(config.cmp));
        let replayed = batches.len();
        for record in batches.into_iter().flatten() {
            store.apply(record);
        }
        log::debug!(
            "opened '{}': {} batches replayed, {} rows, page size {}",
            dir.display(),
            replayed,
            store.len(),
            config.page_size
        );

        Ok(Db {
            store,
            journal,
            config: config.clone(),
            read_only,
            updates: 0,
            cursors: Rc::new(Cell::new(0)),
            _lock: lock,
        })
    }

    fn writable(&self) -> Result<(), String> {
        if self.read_only {
            return Err("database is opened read-only".to_string());
        }
        Ok(())
    }

    /// Journals a batch, then applies it. A batch that fails to reach
    /// the journal is not applied.
    fn write(&mut self, batch: Vec<Record>) -> Result<(), String> {
        if batch.is_empty() {
            return Ok(());
        }
        let mark = self.journal.len();
        self.journal
            .append(&batch)
            .map_err(|e| format!("journal write failed: {}", e))?;

        let updates = self.updates.saturating_add(batch.len() as u32);
        if self.config.merge && updates >= self.config.merge_watermark {
            if let Err(e) = self.journal.sync() {
                if let Err(undo) = self.journal.truncate(mark) {
                    log::warn!("failed to drop unsynced journal frame: {}", undo);
                }
                return Err(format!("journal sync failed: {}", e));
            }
            self.updates = 0;
        } else {
            self.updates = updates;
        }

        for record in batch {
            self.store.apply(record);
        }
        Ok(())
    }

    fn mutate(&mut self, record: Record) -> CallResult {
        self.writable()?;
        if let Some(record) = self.store.stage(record) {
            self.write(vec![record])?;
        }
        Ok(SP_OK)
    }

    /// Flushes the journal. The database is unusable afterwards, whether
    /// or not this succeeds.
    fn close(&mut self) -> Result<(), String> {
        if self.store.rollback() {
            log::debug!("discarding uncommitted transaction on close");
        }
        if self.read_only {
            return Ok(());
        }

        if self.config.gc {
            let live: u64 = self
                .store
                .rows()
                .map(|(key, value)| encoded_len(key, value))
                .sum();
            let size = self.journal.len();
            if size > 0 && (live as f64) <= self.config.gc_factor * size as f64 {
                log::debug!("compacting journal: {} live of {} bytes", live, size);
                // The old journal stays valid if the rewrite fails
                if let Err(e) = self.journal.rewrite(self.store.rows()) {
                    log::warn!("journal compaction failed: {}", e);
                }
            }
        }
        self.journal
            .repair()
            .and_then(|_| self.journal.sync())
            .map_err(|e| format!("journal sync on close failed: {}", e))
    }
}

struct CursorRows {
    rows: Vec<(Vec<u8>, Vec<u8>)>,
    next: usize,
    current: Option<usize>,
    cursors: Rc<Cell<usize>>,
}

impl CursorRows {
    fn current(&self) -> Option<&(Vec<u8>, Vec<u8>)> {
        self.current.and_then(|at| self.rows.get(at))
    }
}

pub(crate) unsafe fn sp_env() -> *mut c_void {
    Object::into_raw(Body::Env(EnvConfig::default()))
}

unsafe fn ctl(env: *mut c_void, f: impl FnOnce(&mut EnvConfig) -> Result<(), String>) -> c_int {
    let obj = match object(env) {
        Some(obj) => obj,
        None => return SP_ERROR,
    };
    let result = match &mut obj.body {
        Body::Env(config) => config.configurable().and_then(|_| f(config)).map(|_| SP_OK),
        _ => Err(not_env()),
    };
    obj.finish(result)
}

pub(crate) unsafe fn sp_ctl_dir(env: *mut c_void, access: u32, dir: *const c_char) -> c_int {
    let path = if dir.is_null() {
        None
    } else {
        Some(PathBuf::from(OsStr::from_bytes(CStr::from_ptr(dir).to_bytes())))
    };
    ctl(env, |config| {
        let access = Access::from_bits(access).ok_or("unknown access flags")?;
        let ro = access.contains(Access::READ_ONLY);
        let rw = access.contains(Access::READ_WRITE);
        if ro == rw {
            return Err("access must be exactly one of read-only or read-write".to_string());
        }
        if ro && access.contains(Access::CREATE) {
            return Err("create requires read-write access".to_string());
        }
        let path = path
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or("directory path is empty")?;
        config.access = access;
        config.dir = Some(path);
        Ok(())
    })
}

pub(crate) unsafe fn sp_ctl_cmp(env: *mut c_void, cmp: spcmpf, arg: *mut c_void) -> c_int {
    ctl(env, |config| {
        config.cmp = Some((cmp, arg));
        Ok(())
    })
}

pub(crate) unsafe fn sp_ctl_page(env: *mut c_void, count: u32) -> c_int {
    ctl(env, |config| {
        if count == 0 {
            return Err("page size must be positive".to_string());
        }
        config.page_size = count;
        Ok(())
    })
}

pub(crate) unsafe fn sp_ctl_gc(env: *mut c_void, active: c_int) -> c_int {
    ctl(env, |config| {
        config.gc = active != 0;
        Ok(())
    })
}

pub(crate) unsafe fn sp_ctl_gcf(env: *mut c_void, factor: f64) -> c_int {
    ctl(env, |config| {
        if !(factor > 0.0 && factor <= 1.0) {
            return Err(format!("gc factor {} is outside (0, 1]", factor));
        }
        config.gc_factor = factor;
        Ok(())
    })
}

pub(crate) unsafe fn sp_ctl_grow(env: *mut c_void, newsize: u32, factor: f64) -> c_int {
    ctl(env, |config| {
        if newsize == 0 {
            return Err("grow size must be positive".to_string());
        }
        if !(factor >= 1.0) {
            return Err(format!("grow factor {} is below 1.0", factor));
        }
        config.grow_size = newsize;
        config.grow_factor = factor;
        Ok(())
    })
}

pub(crate) unsafe fn sp_ctl_merge(env: *mut c_void, merge: c_int) -> c_int {
    ctl(env, |config| {
        config.merge = merge != 0;
        Ok(())
    })
}

pub(crate) unsafe fn sp_ctl_mergewm(env: *mut c_void, watermark: u32) -> c_int {
    ctl(env, |config| {
        if watermark == 0 {
            return Err("merge watermark must be positive".to_string());
        }
        config.merge_watermark = watermark;
        Ok(())
    })
}

pub(crate) unsafe fn sp_open(env: *mut c_void) -> *mut c_void {
    let obj = match object(env) {
        Some(obj) => obj,
        None => return ptr::null_mut(),
    };
    let result = match &mut obj.body {
        Body::Env(config) => config.configurable().and_then(|_| Db::open(config)),
        _ => Err(not_env()),
    };
    match result {
        Ok(db) => {
            if let Body::Env(config) = &mut obj.body {
                config.opened = true;
            }
            obj.error = None;
            Object::into_raw(Body::Db(db))
        }
        Err(message) => {
            obj.set_error(message);
            ptr::null_mut()
        }
    }
}

pub(crate) unsafe fn sp_destroy(handle: *mut c_void) -> c_int {
    let obj = match object(handle) {
        Some(obj) => obj,
        None => return SP_ERROR,
    };
    if let Body::Db(db) = &obj.body {
        let open = db.cursors.get();
        if open > 0 {
            obj.set_error(format!("database has {} open cursor(s)", open));
            return SP_ERROR;
        }
    }
    let closed = match &mut obj.body {
        Body::Db(db) => db.close(),
        Body::Cursor(cursor) => {
            cursor.cursors.set(cursor.cursors.get().saturating_sub(1));
            Ok(())
        }
        Body::Env(_) | Body::Spent => Ok(()),
    };
    if let Err(message) = closed {
        // Keep the handle so the caller can read the error, then destroy
        // it again
        obj.body = Body::Spent;
        obj.set_error(message);
        return SP_ERROR;
    }
    drop(Box::from_raw(handle as *mut Object));
    SP_OK
}

pub(crate) unsafe fn sp_error(handle: *mut c_void) -> *const c_char {
    match object(handle).and_then(|obj| obj.error.as_ref()) {
        Some(message) => message.as_ptr(),
        None => ptr::null(),
    }
}

unsafe fn with_db(handle: *mut c_void, f: impl FnOnce(&mut Db) -> CallResult) -> c_int {
    let obj = match object(handle) {
        Some(obj) => obj,
        None => return SP_ERROR,
    };
    let result = match &mut obj.body {
        Body::Db(db) => f(db),
        Body::Spent => Err("database is closed".to_string()),
        _ => Err(not_db()),
    };
    obj.finish(result)
}

pub(crate) unsafe fn sp_set(
    db: *mut c_void,
    key: *const c_void,
    ksize: size_t,
    value: *const c_void,
    vsize: size_t,
) -> c_int {
    let record = Record::Set(bytes(key, ksize).to_vec(), bytes(value, vsize).to_vec());
    with_db(db, |db| db.mutate(record))
}

pub(crate) unsafe fn sp_delete(db: *mut c_void, key: *const c_void, ksize: size_t) -> c_int {
    let record = Record::Delete(bytes(key, ksize).to_vec());
    with_db(db, |db| db.mutate(record))
}

pub(crate) unsafe fn sp_get(
    db: *mut c_void,
    key: *const c_void,
    ksize: size_t,
    value: *mut *mut c_void,
    vsize: *mut size_t,
) -> c_int {
    let key = bytes(key, ksize);
    let obj = match object(db) {
        Some(obj) => obj,
        None => return SP_ERROR,
    };
    let result = match &obj.body {
        Body::Db(db) => match db.store.get(key) {
            Some(found) => copy_out(found, value, vsize),
            None => Ok(SP_NOT_FOUND),
        },
        Body::Spent => Err("database is closed".to_string()),
        _ => Err(not_db()),
    };
    obj.finish(result)
}

/// Hands a found value to the caller. Null out-pointers skip the copy.
unsafe fn copy_out(found: &[u8], value: *mut *mut c_void, vsize: *mut size_t) -> CallResult {
    if !value.is_null() {
        // malloc(0) may legally return null, so always ask for a byte
        let buf = libc::malloc(found.len().max(1)) as *mut u8;
        if buf.is_null() {
            return Err("out of memory".to_string());
        }
        ptr::copy_nonoverlapping(found.as_ptr(), buf, found.len());
        *value = buf as *mut c_void;
    }
    if !vsize.is_null() {
        *vsize = found.len();
    }
    Ok(SP_FOUND)
}

/// Frees a value returned by `sp_get`.
pub(crate) unsafe fn sp_free(ptr: *mut c_void) {
    libc::free(ptr)
}

pub(crate) unsafe fn sp_cursor(
    db: *mut c_void,
    order: c_int,
    key: *const c_void,
    ksize: size_t,
) -> *mut c_void {
    let start = if key.is_null() {
        None
    } else {
        Some(bytes(key, ksize))
    };
    let obj = match object(db) {
        Some(obj) => obj,
        None => return ptr::null_mut(),
    };
    let result = match (&obj.body, Order::from_raw(order)) {
        (Body::Db(db), Some(order)) => {
            db.cursors.set(db.cursors.get() + 1);
            Ok(CursorRows {
                rows: db.store.range(order, start),
                next: 0,
                current: None,
                cursors: Rc::clone(&db.cursors),
            })
        }
        (Body::Db(_), None) => Err(format!("unknown cursor order {}", order)),
        _ => Err(not_db()),
    };
    match result {
        Ok(cursor) => {
            obj.error = None;
            Object::into_raw(Body::Cursor(cursor))
        }
        Err(message) => {
            obj.set_error(message);
            ptr::null_mut()
        }
    }
}

unsafe fn cursor<'a>(cur: *mut c_void) -> Option<&'a mut CursorRows> {
    match object(cur) {
        Some(Object {
            body: Body::Cursor(cursor),
            ..
        }) => Some(cursor),
        _ => None,
    }
}

pub(crate) unsafe fn sp_fetch(cur: *mut c_void) -> c_int {
    let cursor = match cursor(cur) {
        Some(cursor) => cursor,
        None => return SP_ERROR,
    };
    if cursor.next < cursor.rows.len() {
        cursor.current = Some(cursor.next);
        cursor.next += 1;
        SP_ROW
    } else {
        cursor.current = None;
        SP_END
    }
}

pub(crate) unsafe fn sp_key(cur: *mut c_void) -> *const c_char {
    match cursor(cur).and_then(|cursor| cursor.current()) {
        Some((key, _)) => key.as_ptr() as *const c_char,
        None => ptr::null(),
    }
}

pub(crate) unsafe fn sp_keysize(cur: *mut c_void) -> size_t {
    cursor(cur)
        .and_then(|cursor| cursor.current())
        .map_or(0, |(key, _)| key.len())
}

pub(crate) unsafe fn sp_value(cur: *mut c_void) -> *const c_char {
    match cursor(cur).and_then(|cursor| cursor.current()) {
        Some((_, value)) => value.as_ptr() as *const c_char,
        None => ptr::null(),
    }
}

pub(crate) unsafe fn sp_valuesize(cur: *mut c_void) -> size_t {
    cursor(cur)
        .and_then(|cursor| cursor.current())
        .map_or(0, |(_, value)| value.len())
}

pub(crate) unsafe fn sp_begin(db: *mut c_void) -> c_int {
    with_db(db, |db| {
        db.writable()?;
        Ok(if db.store.begin() { SP_OK } else { SP_TXN_STATE })
    })
}

pub(crate) unsafe fn sp_commit(db: *mut c_void) -> c_int {
    with_db(db, |db| match db.store.take_pending() {
        Some(batch) => db.write(batch).map(|_| SP_OK),
        None => Ok(SP_TXN_STATE),
    })
}

pub(crate) unsafe fn sp_rollback(db: *mut c_void) -> c_int {
    with_db(db, |db| Ok(if db.store.rollback() { SP_OK } else { SP_TXN_STATE }))
}
