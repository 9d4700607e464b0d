pub mod locking;

pub use locking::{FileLock, LockError, RetryPolicy};
