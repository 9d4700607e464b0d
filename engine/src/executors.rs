pub mod cluster;
pub mod local;
pub mod sequential;

use crate::{config::ConfigError, experiment::ExperimentError, storage::StorageError};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("shared storage failed")]
    Storage(#[from] StorageError),
    #[error("experiment update failed")]
    Experiment(#[from] ExperimentError),
    #[error("failed to build worker pool")]
    Pool(#[from] rayon::ThreadPoolBuildError),
    #[error("cluster mode requires an attached shared store")]
    NoSharedLocation,
}

/// Strategy selection for a run. `Parallel` takes an optional worker count
/// and defaults to the available hardware parallelism.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Sequential,
    Parallel { threads: Option<usize> },
    Cluster,
}

impl FromStr for ExecutionMode {
    type Err = ConfigError;

    fn from_str(mode: &str) -> Result<Self, Self::Err> {
        match mode.to_lowercase().as_str() {
            "sequential" => Ok(Self::Sequential),
            "parallel" => Ok(Self::Parallel { threads: None }),
            "cluster" => Ok(Self::Cluster),
            _ => Err(ConfigError::UnsupportedMode(mode.to_owned())),
        }
    }
}
