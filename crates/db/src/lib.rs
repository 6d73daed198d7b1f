//! Persistence for per-user library snapshots.
//!
//! A snapshot is one JSON document per user, read and rewritten whole. The
//! [`SnapshotStore`] trait is the seam; [`InMemorySnapshotStore`] is the local
//! stub, [`FileSnapshotStore`] keeps documents on disk, and
//! [`CachedSnapshotStore`] layers a TTL cache over either.

mod cached;
mod error;
mod file;
mod in_memory;
mod store;

pub use cached::CachedSnapshotStore;
pub use error::StorageError;
pub use file::FileSnapshotStore;
pub use in_memory::InMemorySnapshotStore;
pub use store::SnapshotStore;
