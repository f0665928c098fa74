use bitflags::bitflags;
use std::os::raw::c_int;

// Access mode for the database directory
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Access: u32 {
        const READ_ONLY = 0x01;
        const READ_WRITE = 0x02;
        const CREATE = 0x04;
    }
}

/// Direction and start-key inclusivity of a cursor.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Order {
    /// Ascending, start key excluded
    GreaterThan = 0,
    /// Ascending, start key included
    GreaterThanEqual = 1,
    /// Descending, start key excluded
    LessThan = 2,
    /// Descending, start key included
    LessThanEqual = 3,
}

impl Order {
    pub const GT: Order = Order::GreaterThan;
    pub const GTE: Order = Order::GreaterThanEqual;
    pub const LT: Order = Order::LessThan;
    pub const LTE: Order = Order::LessThanEqual;

    pub fn is_ascending(self) -> bool {
        matches!(self, Order::GreaterThan | Order::GreaterThanEqual)
    }

    pub fn is_inclusive(self) -> bool {
        matches!(self, Order::GreaterThanEqual | Order::LessThanEqual)
    }

    #[cfg(not(feature = "sophia"))]
    pub(crate) fn from_raw(raw: c_int) -> Option<Order> {
        match raw {
            0 => Some(Order::GreaterThan),
            1 => Some(Order::GreaterThanEqual),
            2 => Some(Order::LessThan),
            3 => Some(Order::LessThanEqual),
            _ => None,
        }
    }
}

// sp_ctl option tags
#[cfg(feature = "sophia")]
pub(crate) const SPDIR: c_int = 0;
#[cfg(feature = "sophia")]
pub(crate) const SPCMP: c_int = 2;
#[cfg(feature = "sophia")]
pub(crate) const SPPAGE: c_int = 3;
#[cfg(feature = "sophia")]
pub(crate) const SPGC: c_int = 4;
#[cfg(feature = "sophia")]
pub(crate) const SPGCF: c_int = 5;
#[cfg(feature = "sophia")]
pub(crate) const SPGROW: c_int = 6;
#[cfg(feature = "sophia")]
pub(crate) const SPMERGE: c_int = 7;
#[cfg(feature = "sophia")]
pub(crate) const SPMERGEWM: c_int = 8;

// Status codes shared by the C calls
pub(crate) const SP_OK: c_int = 0;
pub(crate) const SP_ERROR: c_int = -1;
pub(crate) const SP_FOUND: c_int = 1;
pub(crate) const SP_NOT_FOUND: c_int = 0;
pub(crate) const SP_ROW: c_int = 1;
pub(crate) const SP_END: c_int = 0;
/// begin: a transaction is already active; commit/rollback: none is active
pub(crate) const SP_TXN_STATE: c_int = 1;

// Embedded engine defaults
#[cfg(not(feature = "sophia"))]
pub(crate) const DEFAULT_PAGE_SIZE: u32 = 2048;
#[cfg(not(feature = "sophia"))]
pub(crate) const DEFAULT_GC_FACTOR: f64 = 0.5;
#[cfg(not(feature = "sophia"))]
pub(crate) const DEFAULT_GROW_SIZE: u32 = 16 * 1024;
#[cfg(not(feature = "sophia"))]
pub(crate) const DEFAULT_GROW_FACTOR: f64 = 2.0;
#[cfg(not(feature = "sophia"))]
pub(crate) const DEFAULT_MERGE_WATERMARK: u32 = 100_000;
/// Journal file kept inside the database directory
#[cfg(not(feature = "sophia"))]
pub(crate) const JOURNAL_FILE: &str = "lumokv.journal";
