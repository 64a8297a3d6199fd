//! docql-io: the collaborators evaluation talks to.
//!
//! - `storage`: the blocking, interruptible read/write contract and its wire
//!   shapes.
//! - `memory_storage`: an ordered in-memory table store implementing it.
//! - `metadata`: cluster metadata and a watchable view supporting blocking
//!   "wait until" calls.
//! - `jsonl`: line-delimited JSON loading for fixtures and the CLI.

pub mod error;
pub mod jsonl;
pub mod memory_storage;
pub mod metadata;
pub mod storage;

pub use error::{Result, StorageError};
pub use memory_storage::MemoryStore;
pub use metadata::{ClusterMetadata, MetadataView, Watchable};
pub use storage::{PointReplace, Read, ReadResponse, Storage, Write, WriteResponse};
