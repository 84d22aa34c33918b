//! Document store abstraction
//!
//! Every durable read and write goes through [`DocumentStore`]. Documents are
//! JSON values grouped into named collections and addressed by a string key
//! that is unique within its collection. Implementations must make each
//! single-key operation atomic with respect to other operations on the same
//! key; callers rely on that instead of locking on their own.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Errors raised by a document store backend
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Document encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Duplicate key '{key}' in collection '{collection}'")]
    DuplicateKey { collection: String, key: String },

    #[error("Store is closed")]
    Closed,
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Selects documents within a collection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter<'a> {
    /// Every document in the collection
    All,
    /// The document stored under this key, if any
    Key(&'a str),
}

/// Narrow persistence interface shared by all components
pub trait DocumentStore: Send + Sync {
    /// Append a new document. Fails with [`StoreError::DuplicateKey`] if the
    /// key is already taken.
    fn insert(&self, collection: &str, key: &str, document: &Value) -> Result<()>;

    /// Return up to `limit` matching documents. For [`Filter::All`] these are
    /// the most recently inserted ones, returned oldest first.
    fn find(&self, collection: &str, filter: Filter<'_>, limit: usize) -> Result<Vec<Value>>;

    /// Atomically create the document or replace it wholesale.
    fn upsert(&self, collection: &str, key: &str, document: &Value) -> Result<()>;

    /// Remove the document under `key`, returning how many were removed.
    fn delete_one(&self, collection: &str, key: &str) -> Result<u64>;

    /// Health probe.
    fn ping(&self) -> Result<()>;

    /// Release the underlying resources. Later operations fail with
    /// [`StoreError::Closed`].
    fn close(&self) -> Result<()>;

    /// Short backend name for logs and health output
    fn backend_name(&self) -> &'static str;

    fn find_one(&self, collection: &str, key: &str) -> Result<Option<Value>> {
        Ok(self.find(collection, Filter::Key(key), 1)?.into_iter().next())
    }
}

#[derive(Debug, Default)]
struct MemoryCollection {
    next_seq: u64,
    /// Insertion sequence -> (key, document)
    docs: BTreeMap<u64, (String, Value)>,
    /// Key -> insertion sequence
    index: HashMap<String, u64>,
}

/// Process-local store for ephemeral runs and tests
///
/// A single write lock covers each mutation, which gives the same per-key
/// atomicity as the SQLite backend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, MemoryCollection>>,
    closed: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }
}

impl DocumentStore for MemoryStore {
    fn insert(&self, collection: &str, key: &str, document: &Value) -> Result<()> {
        self.ensure_open()?;
        let mut collections = self.collections.write();
        let coll = collections.entry(collection.to_string()).or_default();

        if coll.index.contains_key(key) {
            return Err(StoreError::DuplicateKey {
                collection: collection.to_string(),
                key: key.to_string(),
            });
        }

        let seq = coll.next_seq;
        coll.next_seq += 1;
        coll.docs.insert(seq, (key.to_string(), document.clone()));
        coll.index.insert(key.to_string(), seq);
        Ok(())
    }

    fn find(&self, collection: &str, filter: Filter<'_>, limit: usize) -> Result<Vec<Value>> {
        self.ensure_open()?;
        let collections = self.collections.read();
        let Some(coll) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        match filter {
            Filter::Key(key) => Ok(coll
                .index
                .get(key)
                .and_then(|seq| coll.docs.get(seq))
                .map(|(_, doc)| doc.clone())
                .into_iter()
                .take(limit)
                .collect()),
            Filter::All => {
                let mut newest: Vec<Value> = coll
                    .docs
                    .values()
                    .rev()
                    .take(limit)
                    .map(|(_, doc)| doc.clone())
                    .collect();
                newest.reverse();
                Ok(newest)
            }
        }
    }

    fn upsert(&self, collection: &str, key: &str, document: &Value) -> Result<()> {
        self.ensure_open()?;
        let mut collections = self.collections.write();
        let coll = collections.entry(collection.to_string()).or_default();

        if let Some(seq) = coll.index.get(key).copied() {
            coll.docs.insert(seq, (key.to_string(), document.clone()));
        } else {
            let seq = coll.next_seq;
            coll.next_seq += 1;
            coll.docs.insert(seq, (key.to_string(), document.clone()));
            coll.index.insert(key.to_string(), seq);
        }
        Ok(())
    }

    fn delete_one(&self, collection: &str, key: &str) -> Result<u64> {
        self.ensure_open()?;
        let mut collections = self.collections.write();
        let Some(coll) = collections.get_mut(collection) else {
            return Ok(0);
        };

        match coll.index.remove(key) {
            Some(seq) => {
                coll.docs.remove(&seq);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    fn ping(&self) -> Result<()> {
        self.ensure_open()
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        self.collections.write().clear();
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
