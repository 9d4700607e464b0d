use crate::{
    data::DataTable,
    domain::Domain,
    experiment::{ExperimentData, ExperimentError},
    jobs::JobQueue,
    sync::{FileLock, LockError, RetryPolicy},
};
use serde::{de::DeserializeOwned, Serialize};
use std::{
    ffi::OsString,
    fs::{self, File},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("shared experiment state not found at {}", .0.display())]
    NotFound(PathBuf),
    #[error("failed to access shared state")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize shared state")]
    Yaml(#[from] serde_yaml::Error),
    #[error("failed to lock shared state")]
    Lock(#[from] LockError),
    #[error("shared state update failed")]
    Experiment(#[from] ExperimentError),
}

/// Repository for the persisted experiment: four co-located YAML artifacts
/// sharing a base name, plus the lock file serializing every cross-process
/// read-modify-write.
///
/// In cluster mode this location must be reachable by every participating
/// process (a shared disk in a job array, typically).
#[derive(Debug, Clone)]
pub struct ExperimentStore {
    base: PathBuf,
    retry: RetryPolicy,
}

impl ExperimentStore {
    /// `base` is the shared path prefix, e.g. `/scratch/run7/doe`
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn artifact(&self, suffix: &str) -> PathBuf {
        let mut name = OsString::from(self.base.as_os_str());
        name.push(suffix);

        PathBuf::from(name)
    }

    pub fn data_path(&self) -> PathBuf {
        self.artifact("_data.yaml")
    }

    pub fn output_path(&self) -> PathBuf {
        self.artifact("_output.yaml")
    }

    pub fn jobs_path(&self) -> PathBuf {
        self.artifact("_jobs.yaml")
    }

    pub fn domain_path(&self) -> PathBuf {
        self.artifact("_domain.yaml")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.artifact(".lock")
    }

    /// whether a shared copy has been published
    pub fn exists(&self) -> bool {
        self.data_path().is_file()
    }

    /// Persist all four artifacts. Each one is written to a sibling first and
    /// renamed into place, so readers never observe a torn artifact.
    pub fn save(&self, data: &ExperimentData) -> Result<(), StorageError> {
        publish(&self.domain_path(), data.domain())?;
        publish(&self.data_path(), data.input_data())?;
        publish(&self.output_path(), data.output_data())?;
        publish(&self.jobs_path(), data.jobs())?;

        debug!(base = ?self.base, rows = data.len(), "Stored experiment state");

        Ok(())
    }

    /// Reload the shared state. A missing output artifact is tolerated and
    /// reconstructed as pending rows over the domain's output columns; missing
    /// data, domain or ledger artifacts are fatal for this process.
    pub fn load(&self) -> Result<ExperimentData, StorageError> {
        if !self.exists() {
            return Err(StorageError::NotFound(self.data_path()));
        }

        let domain: Domain = read_artifact(&self.domain_path())?;
        let input_data: DataTable = read_artifact(&self.data_path())?;
        let jobs: JobQueue = read_artifact(&self.jobs_path())?;

        let output_data = if self.output_path().is_file() {
            read_artifact(&self.output_path())?
        } else {
            let mut output = DataTable::with_columns(domain.output_columns())
                .unwrap_or_default();
            output.add_empty_rows(input_data.len());
            output
        };

        Ok(ExperimentData::from_parts(domain, input_data, output_data, jobs).with_store(self.clone()))
    }

    /// Publish the initial dataset unless another process beat us to it
    pub fn ensure_initialized(&self, data: &ExperimentData) -> Result<(), StorageError> {
        let _lock = FileLock::acquire(&self.lock_path(), &self.retry)?;

        if !self.exists() {
            info!(base = ?self.base, rows = data.len(), "Publishing initial experiment state");
            self.save(data)?;
        }

        Ok(())
    }

    /// Scoped cross-process critical section: lock, reload the latest on-disk
    /// state, apply `operation`, persist, unlock. Everything that must be
    /// atomic across workers goes through here.
    pub fn with_lock<T>(
        &self,
        operation: impl FnOnce(&mut ExperimentData) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let _lock = FileLock::acquire(&self.lock_path(), &self.retry)?;

        let mut data = self.load()?;
        let result = operation(&mut data)?;
        self.save(&data)?;

        Ok(result)
    }
}

fn publish<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    let mut tmp = OsString::from(path.as_os_str());
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    serde_yaml::to_writer(File::create(&tmp)?, value)?;
    fs::rename(&tmp, path)?;

    Ok(())
}

fn read_artifact<T: DeserializeOwned>(path: &Path) -> Result<T, StorageError> {
    match File::open(path) {
        Ok(file) => Ok(serde_yaml::from_reader(file)?),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            Err(StorageError::NotFound(path.to_path_buf()))
        }
        Err(error) => Err(StorageError::Io(error)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset() -> ExperimentData {
        let domain = Domain::continuous(&[(-5.0, 5.0)]).unwrap();
        let mut data = ExperimentData::new(domain);
        data.add_numeric_arrays(&[vec![-5.0], vec![0.0], vec![5.0]], None)
            .unwrap();

        data
    }

    #[test]
    fn round_trip_preserves_every_table() {
        let dir = tempfile::tempdir().unwrap();
        let store = ExperimentStore::new(dir.path().join("doe"));
        let mut data = dataset();
        data.claim_design().unwrap().unwrap();
        data.set_error(0).unwrap();

        store.save(&data).unwrap();
        let reloaded = store.load().unwrap();

        assert_eq!(reloaded, data);
    }

    #[test]
    fn load_without_shared_copy_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = ExperimentStore::new(dir.path().join("doe"));

        assert!(matches!(store.load(), Err(StorageError::NotFound(_))));
    }

    #[test]
    fn missing_output_artifact_is_reconstructed() {
        let dir = tempfile::tempdir().unwrap();
        let store = ExperimentStore::new(dir.path().join("doe"));
        let data = dataset();

        store.save(&data).unwrap();
        fs::remove_file(store.output_path()).unwrap();

        let reloaded = store.load().unwrap();
        assert_eq!(reloaded.output_data().len(), 3);
        assert!(reloaded.output_data().has_column("y"));
    }

    #[test]
    fn ensure_initialized_does_not_clobber() {
        let dir = tempfile::tempdir().unwrap();
        let store = ExperimentStore::new(dir.path().join("doe"));
        let mut data = dataset();

        store.ensure_initialized(&data).unwrap();

        // progress made by another worker survives later joiners
        store
            .with_lock(|shared| {
                shared.claim_design()?;
                Ok(())
            })
            .unwrap();
        store.ensure_initialized(&data).unwrap();

        let reloaded = store.load().unwrap();
        assert_eq!(
            reloaded.jobs().status(0),
            Some(crate::jobs::JobStatus::InProgress)
        );

        // the locally held copy is untouched
        assert_eq!(data.claim_design().unwrap().unwrap().job_number, 0);
    }
}
