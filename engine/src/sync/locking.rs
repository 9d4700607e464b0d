use serde::{Deserialize, Serialize};
use std::{
    fs::{self, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    thread::sleep,
    time::Duration,
};
use thiserror::Error;
use tracing::{debug, error, trace};

#[derive(Error, Debug)]
pub enum LockError {
    #[error("lock on {} still held after {attempts} attempts", path.display())]
    Timeout { path: PathBuf, attempts: u32 },
    #[error("failed to create lock file")]
    Io(#[from] std::io::Error),
}

/// Bounded retry/backoff schedule for lock acquisition. Plain data so the
/// loop can run with zero-length delays under test.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 120,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
        }
    }
}

/// Scoped cross-process mutual exclusion over a shared filesystem location.
///
/// Acquisition atomically creates the lock file (`create_new`, O_EXCL
/// semantics on POSIX and network filesystems alike) and writes
/// `hostname:pid` into it so an operator can find a dead holder. Dropping the
/// guard removes the file.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
}

impl FileLock {
    /// Block with backoff until the lock file could be created. Exhausting the
    /// schedule is a fatal coordination failure, not a per-job one.
    pub fn acquire(path: &Path, policy: &RetryPolicy) -> Result<Self, LockError> {
        let mut delay = policy.base_delay;

        for attempt in 0..policy.attempts {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    if let Err(error) = file.write_all(Self::holder_tag().as_bytes()) {
                        // the lock itself is held, the tag is purely diagnostic
                        debug!(error = ?error, "Failed to write holder tag into lock file");
                    }
                    debug!(path = ?path, attempt = attempt, "Acquired lock");

                    return Ok(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(error) if error.kind() == ErrorKind::AlreadyExists => {
                    // no point backing off once the schedule is exhausted
                    if attempt + 1 < policy.attempts {
                        trace!(path = ?path, attempt = attempt, "Lock held elsewhere, backing off {delay:?}");
                        sleep(delay);
                        delay = (delay * 2).min(policy.max_delay);
                    }
                }
                Err(error) => return Err(LockError::Io(error)),
            }
        }

        Err(LockError::Timeout {
            path: path.to_path_buf(),
            attempts: policy.attempts,
        })
    }

    fn holder_tag() -> String {
        let hostname = nix::unistd::gethostname()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_owned());

        format!("{hostname}:{}", std::process::id())
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = ?self.path, "Released lock"),
            Err(error) => error!(error = ?error, path = ?self.path, "Failed to remove lock file"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    #[test]
    fn acquire_and_release_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doe.lock");

        let lock = FileLock::acquire(&path, &fast_policy(1)).unwrap();
        assert!(path.exists());

        drop(lock);
        assert!(!path.exists());

        // reacquirable once the previous holder dropped
        let _lock = FileLock::acquire(&path, &fast_policy(1)).unwrap();
    }

    #[test]
    fn held_lock_times_out_after_bounded_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doe.lock");

        let _holder = FileLock::acquire(&path, &fast_policy(1)).unwrap();
        let denied = FileLock::acquire(&path, &fast_policy(3));

        assert!(matches!(
            denied,
            Err(LockError::Timeout { attempts: 3, .. })
        ));
        // the loser must not have removed the winner's lock file
        assert!(path.exists());
    }

    #[test]
    fn timeout_reports_without_a_trailing_backoff() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doe.lock");
        let slow = RetryPolicy {
            attempts: 1,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(5),
        };

        let _holder = FileLock::acquire(&path, &fast_policy(1)).unwrap();
        let started = std::time::Instant::now();
        assert!(matches!(
            FileLock::acquire(&path, &slow),
            Err(LockError::Timeout { attempts: 1, .. })
        ));
        // the single attempt fails immediately, no sleep follows it
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn lock_file_names_its_holder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doe.lock");

        let _lock = FileLock::acquire(&path, &fast_policy(1)).unwrap();
        let tag = fs::read_to_string(&path).unwrap();

        assert!(tag.ends_with(&std::process::id().to_string()));
    }
}
