use super::ExecutorError;
use crate::{
    design::{Design, EvaluationError},
    experiment::ExperimentData,
    storage::ExperimentStore,
};
use tracing::{debug, error, info};

/// Cluster strategy: independent OS processes coordinating purely through the
/// shared persisted experiment and its file lock.
///
/// The lock is held only around the claim and the writeback, never around the
/// evaluation itself, so workers compute concurrently but can never claim the
/// same index. A worker dying between claim and writeback leaves its job in
/// progress until an operator reopens it.
pub fn execute<F>(
    data: &mut ExperimentData,
    store: &ExperimentStore,
    operation: &F,
) -> Result<(), ExecutorError>
where
    F: Fn(Design) -> Result<Design, EvaluationError>,
{
    // first process to arrive publishes the seed dataset
    store.ensure_initialized(data)?;

    loop {
        // lock, reload the latest on-disk state, claim, persist, unlock
        let claimed = store.with_lock(|shared| Ok(shared.claim_design()?))?;
        let Some(design) = claimed else {
            debug!("No open jobs left");
            break;
        };

        let index = design.job_number;
        info!("Running design {index}");

        // the expensive step runs without the lock
        let outcome = operation(design);

        store.with_lock(|shared| {
            match outcome {
                // a result the shared tables reject fails its own row only
                Ok(evaluated) => {
                    if let Err(error) = shared.set_design(evaluated) {
                        error!(error = ?error, "Failed to store design {index}: {error}");
                        shared.set_error(index)?;
                    }
                }
                Err(error) => {
                    error!(error = ?error, "Error in design {index}: {error}");
                    shared.set_error(index)?;
                }
            }

            Ok(())
        })?;
    }

    // hand the final shared state back to the caller
    *data = store.load()?;

    Ok(())
}
