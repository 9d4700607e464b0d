use super::ExecutorError;
use crate::{
    design::{Design, EvaluationError},
    experiment::ExperimentData,
};
use rayon::{prelude::*, ThreadPoolBuilder};
use tracing::{debug, error, info};

/// Local multi-process strategy: drain every open claim up front, fan the
/// designs out over a fixed-size thread pool, then write all results back
/// sequentially once the whole batch returned.
///
/// Workers are pure functions over their own `Design` copies and never touch
/// shared state; one failed task never blocks the others' writeback.
pub fn execute<F>(
    data: &mut ExperimentData,
    operation: &F,
    threads: Option<usize>,
) -> Result<(), ExecutorError>
where
    F: Fn(Design) -> Result<Design, EvaluationError> + Sync,
{
    let mut batch = Vec::new();
    while let Some(design) = data.claim_design()? {
        batch.push(design);
    }

    if batch.is_empty() {
        debug!("No open jobs left");
        return Ok(());
    }

    let thread_number = threads.unwrap_or_else(num_cpus::get);
    debug!("Starting thread pool with {thread_number} threads");

    // a scoped pool rather than the global one; a library must not poison
    // the caller's rayon configuration
    let pool = ThreadPoolBuilder::new().num_threads(thread_number).build()?;

    let results: Vec<(usize, Result<Design, EvaluationError>)> = pool.install(|| {
        batch
            .into_par_iter()
            .map(|design| {
                let index = design.job_number;
                info!("Running design {index}");

                (index, operation(design))
            })
            .collect()
    });

    // the claimed index is tracked here, never taken from the result
    for (index, result) in results {
        match result {
            // a row that cannot be written back fails alone, the rest of the
            // batch still lands
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
