//! Persistent keyed store with per-key locking and a size quota.

mod backend;
mod cleanup;
mod lock;
mod quota;

pub use backend::{entry_size, KvBackend, MemoryBackend};
pub use cleanup::{CleanupPolicy, CleanupReport};
pub use lock::{KeyLockGuard, KeyLocks};
pub use quota::{QuotaKeyedStore, QuotaUsage};
