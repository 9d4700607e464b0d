use super::ExecutorError;
use crate::{
    design::{Design, EvaluationError},
    experiment::ExperimentData,
};
use tracing::{debug, error, info};

/// Reference strategy: one control thread claims, evaluates and writes back
/// one job at a time, in strictly increasing index order. A failing
/// evaluation marks its row and the loop carries on.
pub fn execute<F>(data: &mut ExperimentData, operation: &F) -> Result<(), ExecutorError>
where
    F: Fn(Design) -> Result<Design, EvaluationError>,
{
    loop {
        let Some(design) = data.claim_design()? else {
            debug!("No open jobs left");
            break;
        };

        let index = design.job_number;
        info!("Running design {index}");

        match operation(design) {
            // a writeback failure is scoped to its own row; only the error
            // stamp itself going wrong aborts the run
            Ok(evaluated) => {
                if let Err(error) = data.set_design(evaluated) {
                    error!(error = ?error, "Failed to store design {index}: {error}");
                    data.set_error(index)?;
                }
            }
            Err(error) => {
                error!(error = ?error, "Error in design {index}: {error}");
                data.set_error(index)?;
            }
        }
    }

    Ok(())
}
