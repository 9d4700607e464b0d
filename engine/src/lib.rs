//! Job-queue engine for parameterized experiment designs.
//!
//! An [`ExperimentData`] owns a [`Domain`] schema, an input table, an output
//! table and a job ledger, all addressed by the same dense row index. A
//! caller seeds it with input rows, supplies an evaluation operation
//! (`Fn(Design) -> Result<Design, EvaluationError>`) and drives every open
//! job to a terminal state with [`ExperimentData::run`] in one of three
//! modes: a deterministic sequential loop, a local thread pool, or cluster
//! mode where independent processes coordinate solely through a shared disk
//! location guarded by a file lock.

pub mod config;
pub mod data;
pub mod design;
pub mod domain;
pub mod executors;
pub mod experiment;
pub mod jobs;
pub mod storage;
pub mod sync;

pub use config::{ConfigError, LockConfig, RunConfig, StorageConfig};
pub use data::{ColumnKind, DataError, DataTable, Row, Value};
pub use design::{Design, EvaluationError, Sampler};
pub use domain::{Domain, DomainError, Parameter};
pub use executors::{ExecutionMode, ExecutorError};
pub use experiment::{ExperimentData, ExperimentError, ERROR_MARKER};
pub use jobs::{JobError, JobQueue, JobStatus};
pub use storage::{ExperimentStore, StorageError};
pub use sync::{FileLock, LockError, RetryPolicy};
