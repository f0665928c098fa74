use libc::size_t;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::os::raw::{c_char, c_void};
use std::rc::Rc;

use super::journal::Record;
use crate::constants::Order;
use crate::sys::spcmpf;

/// Key ordering used by one database: the registered callback, or plain
/// byte order.
#[derive(Clone, Copy)]
pub(super) struct Collation {
    cmp: Option<(spcmpf, *mut c_void)>,
}

impl Collation {
    pub(super) fn new(cmp: Option<(spcmpf, *mut c_void)>) -> Self {
        Collation { cmp }
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        match self.cmp {
            None => a.cmp(b),
            Some((cmp, arg)) => {
                let rc = unsafe {
                    cmp(
                        a.as_ptr() as *mut c_char,
                        a.len() as size_t,
                        b.as_ptr() as *mut c_char,
                        b.len() as size_t,
                        arg,
                    )
                };
                rc.cmp(&0)
            }
        }
    }
}

#[derive(Clone)]
struct SortKey {
    bytes: Vec<u8>,
    collation: Rc<Collation>,
}

impl PartialEq for SortKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SortKey {}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.collation.compare(&self.bytes, &other.bytes)
    }
}

/// Ordered rows plus the staged writes of the active transaction.
pub(super) struct Store {
    collation: Rc<Collation>,
    rows: BTreeMap<SortKey, Vec<u8>>,
    /// `None` value marks a staged delete
    pending: Option<BTreeMap<SortKey, Option<Vec<u8>>>>,
    /// Reused lookup key, so point reads do not allocate
    scratch: RefCell<SortKey>,
}

impl Store {
    pub(super) fn new(collation: Collation) -> Self {
        let collation = Rc::new(collation);
        Store {
            scratch: RefCell::new(SortKey {
                bytes: Vec::new(),
                collation: Rc::clone(&collation),
            }),
            collation,
            rows: BTreeMap::new(),
            pending: None,
        }
    }

    fn sort_key(&self, key: &[u8]) -> SortKey {
        SortKey {
            bytes: key.to_vec(),
            collation: Rc::clone(&self.collation),
        }
    }

    pub(super) fn get(&self, key: &[u8]) -> Option<&[u8]> {
        let mut scratch = self.scratch.borrow_mut();
        scratch.bytes.clear();
        scratch.bytes.extend_from_slice(key);

        if let Some(pending) = &self.pending {
            if let Some(staged) = pending.get(&*scratch) {
                return staged.as_deref();
            }
        }
        self.rows.get(&*scratch).map(Vec::as_slice)
    }

    pub(super) fn apply(&mut self, record: Record) {
        match record {
            Record::Set(key, value) => {
                let key = SortKey {
                    bytes: key,
                    collation: Rc::clone(&self.collation),
                };
                self.rows.insert(key, value);
            }
            Record::Delete(key) => {
                let key = SortKey {
                    bytes: key,
                    collation: Rc::clone(&self.collation),
                };
                self.rows.remove(&key);
            }
        }
    }

    /// Records a write in the active transaction. Returns the record back
    /// when no transaction is active.
    pub(super) fn stage(&mut self, record: Record) -> Option<Record> {
        let collation = &self.collation;
        let pending = match self.pending.as_mut() {
            Some(pending) => pending,
            None => return Some(record),
        };
        let (key, value) = match record {
            Record::Set(key, value) => (key, Some(value)),
            Record::Delete(key) => (key, None),
        };
        let key = SortKey {
            bytes: key,
            collation: Rc::clone(collation),
        };
        pending.insert(key, value);
        None
    }

    pub(super) fn begin(&mut self) -> bool {
        if self.pending.is_some() {
            return false;
        }
        self.pending = Some(BTreeMap::new());
        true
    }

    /// Ends the transaction and hands back its writes in key order.
    pub(super) fn take_pending(&mut self) -> Option<Vec<Record>> {
        let pending = self.pending.take()?;
        Some(
            pending
                .into_iter()
                .map(|(key, value)| match value {
                    Some(value) => Record::Set(key.bytes, value),
                    None => Record::Delete(key.bytes),
                })
                .collect(),
        )
    }

    pub(super) fn rollback(&mut self) -> bool {
        self.pending.take().is_some()
    }

    /// Copies the rows a cursor will visit, in visiting order, with the
    /// active transaction's writes folded in.
    pub(super) fn range(&self, order: Order, start: Option<&[u8]>) -> Vec<(Vec<u8>, Vec<u8>)> {
        let bounds = match start {
            None => (Bound::Unbounded, Bound::Unbounded),
            Some(key) => {
                let key = self.sort_key(key);
                let edge = if order.is_inclusive() {
                    Bound::Included(key)
                } else {
                    Bound::Excluded(key)
                };
                if order.is_ascending() {
                    (edge, Bound::Unbounded)
                } else {
                    (Bound::Unbounded, edge)
                }
            }
        };

        let mut view: BTreeMap<SortKey, Vec<u8>> = self
            .rows
            .range(bounds.clone())
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        if let Some(pending) = &self.pending {
            for (key, staged) in pending.range(bounds) {
                match staged {
                    Some(value) => {
                        view.insert(key.clone(), value.clone());
                    }
                    None => {
                        view.remove(key);
                    }
                }
            }
        }

        let mut rows: Vec<(Vec<u8>, Vec<u8>)> =
            view.into_iter().map(|(key, value)| (key.bytes, value)).collect();
        if !order.is_ascending() {
            rows.reverse();
        }
        rows
    }

    pub(super) fn rows(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.rows
            .iter()
            .map(|(key, value)| (key.bytes.as_slice(), value.as_slice()))
    }

    pub(super) fn len(&self) -> usize {
        self.rows.len()
    }
}
