// src/lib.rs
mod constants;
mod convenience;
mod cursor;
mod database;
mod env;
mod error;
mod handle;
mod sys;
mod transaction;

pub use constants::{Access, Order};
pub use cursor::{Cursor, CursorState};
pub use database::Database;
pub use env::{open, Environment};
pub use error::{Error, HandleKind, Result};
pub use transaction::Transaction;

// Environment -> Database -> Cursor / Transaction
