use crate::{executors::ExecutionMode, storage::ExperimentStore, sync::RetryPolicy};
use serde::{Deserialize, Serialize};
use std::{fs::File, path::{Path, PathBuf}, time::Duration};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("execution mode '{0}' is not supported")]
    UnsupportedMode(String),
    #[error("failed to read run configuration")]
    Io(#[from] std::io::Error),
    #[error("run configuration is invalid")]
    Yaml(#[from] serde_yaml::Error),
}

/// Top-level run configuration, loaded from YAML
#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    /// one of sequential, parallel, cluster
    pub mode: String,

    /// worker count for parallel mode; defaults to the hardware parallelism
    #[serde(default)]
    pub threads: Option<usize>,

    /// shared storage location; required for cluster mode
    #[serde(default)]
    pub storage: Option<StorageConfig>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// base path prefix shared by every participating process
    pub path: PathBuf,

    #[serde(default)]
    pub lock: LockConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct LockConfig {
    #[serde(default = "default_lock_attempts")]
    pub attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            attempts: default_lock_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl LockConfig {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_reader(File::open(path)?)?)
    }

    /// Resolve the configured mode, rejecting unknown names with the
    /// offending value
    pub fn execution_mode(&self) -> Result<ExecutionMode, ConfigError> {
        let mode = self.mode.parse::<ExecutionMode>()?;

        Ok(match mode {
            ExecutionMode::Parallel { .. } => ExecutionMode::Parallel {
                threads: self.threads,
            },
            other => other,
        })
    }

    /// Storage repository for the configured shared location, if any
    pub fn store(&self) -> Option<ExperimentStore> {
        self.storage
            .as_ref()
            .map(|config| ExperimentStore::new(&config.path).with_retry(config.lock.to_policy()))
    }
}

fn default_lock_attempts() -> u32 {
    120
}

fn default_base_delay_ms() -> u64 {
    50
}

fn default_max_delay_ms() -> u64 {
    2000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_parses_with_defaults() {
        let config: RunConfig = serde_yaml::from_str("mode: parallel\n").unwrap();

        assert_eq!(
            config.execution_mode().unwrap(),
            ExecutionMode::Parallel { threads: None }
        );
        assert!(config.store().is_none());
    }

    #[test]
    fn threads_override_reaches_the_mode() {
        let config: RunConfig = serde_yaml::from_str("mode: parallel\nthreads: 4\n").unwrap();

        assert_eq!(
            config.execution_mode().unwrap(),
            ExecutionMode::Parallel { threads: Some(4) }
        );
    }

    #[test]
    fn invalid_mode_is_rejected_by_name() {
        let config: RunConfig = serde_yaml::from_str("mode: slurm\n").unwrap();
        let error = config.execution_mode().unwrap_err();

        assert!(matches!(error, ConfigError::UnsupportedMode(ref mode) if mode == "slurm"));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(serde_yaml::from_str::<RunConfig>("mode: cluster\nqueue: long\n").is_err());
    }

    #[test]
    fn lock_settings_translate_to_a_policy() {
        let config: RunConfig = serde_yaml::from_str(
            "mode: cluster\nstorage:\n  path: /scratch/doe\n  lock:\n    attempts: 3\n",
        )
        .unwrap();
        let policy = config.storage.as_ref().unwrap().lock.to_policy();

        assert_eq!(policy.attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_millis(50));
    }
}
