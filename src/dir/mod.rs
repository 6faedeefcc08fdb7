//! Hierarchical path-indexed storage.
//!
//! A directory maps dot-delimited paths to opaque byte values inside an
//! embedded single-writer key/value engine. Paths carry a canonical leading
//! dot; a trailing dot designates a folder, which matches by prefix and can
//! never store a value. All access happens inside exactly one read or
//! read/write transaction, scoped to a closure.

mod path;
mod store;

pub use store::{DirectoryReader, DirectoryStore, DirectoryWriter};

use std::cell::RefCell;
use std::rc::Rc;

use thiserror::Error;

/// Value transformer attached to a [`Directory::map`] view.
pub type Transform = Rc<dyn Fn(&[u8]) -> Result<Vec<u8>, DirectoryError>>;

/// The engine cell shared by the root and every view.
///
/// Closing the root empties the cell, so every view fails from then on
/// instead of quietly keeping the engine alive.
pub(crate) struct Engine {
    pub(crate) db: RefCell<Option<redb::Database>>,
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("path {0:?} is not fully qualified")]
    PathNotFullyQualified(String),
    #[error("the directory store is closed")]
    Closed,
    #[error("could not open database: {0}")]
    Database(#[from] redb::DatabaseError),
    #[error("could not begin transaction: {0}")]
    Transaction(#[from] redb::TransactionError),
    #[error("could not open table: {0}")]
    Table(#[from] redb::TableError),
    #[error("could not commit transaction: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("storage fault: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("{0}")]
    Other(String),
}

/// A lightweight window into the store: a prefix plus optional value
/// transforms.
///
/// Views compose by concatenating prefixes and never own the engine:
/// closing a view closes nothing, while closing the root
/// [`DirectoryStore`] closes everything — every outstanding view fails
/// with [`DirectoryError::Closed`] afterwards.
#[derive(Clone)]
pub struct Directory {
    pub(crate) engine: Rc<Engine>,
    pub(crate) prefix: String,
    pub(crate) read_transform: Option<Transform>,
    pub(crate) write_transform: Option<Transform>,
}
