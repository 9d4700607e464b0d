use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("job {0} does not exist")]
    UnknownJob(usize),
}

/// Per-job lifecycle. `Finished` and `Error` are terminal and are never
/// overwritten once reached.
#[derive(Serialize_repr, Deserialize_repr, PartialEq, Eq, Debug, Clone, Copy)]
#[repr(u8)]
pub enum JobStatus {
    Open = 0,
    InProgress = 1,
    Finished = 2,
    Error = 3,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Finished | JobStatus::Error)
    }
}

/// One status per row index, driving claim/complete/fail transitions.
/// The position in the vector is the job index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobQueue {
    statuses: Vec<JobStatus>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }

    pub fn status(&self, index: usize) -> Option<JobStatus> {
        self.statuses.get(index).copied()
    }

    /// Append jobs, `Open` by default or `Finished` when their outputs were
    /// supplied at insertion time
    pub fn add(&mut self, number_of_jobs: usize, status: JobStatus) {
        self.statuses
            .extend(std::iter::repeat(status).take(number_of_jobs));
    }

    /// Claim the lowest-index open job, moving it to `InProgress`.
    /// `None` means the work is exhausted, it is not a failure.
    pub fn claim(&mut self) -> Option<usize> {
        let index = self
            .statuses
            .iter()
            .position(|status| *status == JobStatus::Open)?;
        self.statuses[index] = JobStatus::InProgress;

        Some(index)
    }

    /// Claim every currently open job, lowest index first
    pub fn claim_all(&mut self) -> Vec<usize> {
        let mut claimed = Vec::new();
        while let Some(index) = self.claim() {
            claimed.push(index);
        }

        claimed
    }

    /// Open/InProgress -> Finished. Re-completing a finished job is a no-op,
    /// an errored job stays errored.
    pub fn complete(&mut self, index: usize) -> Result<(), JobError> {
        let status = self
            .statuses
            .get_mut(index)
            .ok_or(JobError::UnknownJob(index))?;
        if !status.is_terminal() {
            *status = JobStatus::Finished;
        }

        Ok(())
    }

    /// Any non-terminal state -> Error
    pub fn fail(&mut self, index: usize) -> Result<(), JobError> {
        let status = self
            .statuses
            .get_mut(index)
            .ok_or(JobError::UnknownJob(index))?;
        if !status.is_terminal() {
            *status = JobStatus::Error;
        }

        Ok(())
    }

    pub fn has_open(&self) -> bool {
        self.statuses.contains(&JobStatus::Open)
    }

    /// true iff every job reached a terminal state
    pub fn is_all_finished(&self) -> bool {
        self.statuses.iter().all(|status| status.is_terminal())
    }

    /// Return jobs orphaned in `InProgress` (a worker crashed while holding
    /// them) to `Open`. This is an explicit operator action, never called by
    /// the executors themselves.
    pub fn reopen_in_progress(&mut self) -> usize {
        let mut reopened = 0;
        for status in self.statuses.iter_mut() {
            if *status == JobStatus::InProgress {
                *status = JobStatus::Open;
                reopened += 1;
            }
        }

        reopened
    }

    pub fn remove(&mut self, indices: &[usize]) -> Result<(), JobError> {
        for index in indices {
            if *index >= self.statuses.len() {
                return Err(JobError::UnknownJob(*index));
            }
        }

        for index in indices.iter().copied().sorted().rev().dedup() {
            self.statuses.remove(index);
        }

        Ok(())
    }

    pub fn select(&self, indices: &[usize]) -> Result<Self, JobError> {
        let statuses = indices
            .iter()
            .map(|index| {
                self.status(*index).ok_or(JobError::UnknownJob(*index))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { statuses })
    }
}
