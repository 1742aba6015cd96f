//!
//! depot storage module
//! --------------------
//! Embedded key-value storage for ephemeral records (sessions). Values are
//! plain strings (callers serialize), keys are ordered so namespaced prefixes
//! such as `session:` can be scanned, and every key may carry its own TTL.

pub mod kv;

pub use kv::{KvError, KvRead, KvStore, PersistenceSettings, ReadTx, StoreSettings, WriteTx};
