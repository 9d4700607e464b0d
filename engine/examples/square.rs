//! Seed a one-dimensional continuous design and drive it to completion
//! sequentially. Run with `RUST_LOG=debug` to watch the claim/writeback loop.

use doe_engine::{Design, Domain, EvaluationError, ExecutionMode, ExperimentData};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let domain = Domain::continuous(&[(-5.0, 5.0)])?;
    let mut data = ExperimentData::new(domain);
    data.add_numeric_arrays(&[vec![-5.0], vec![-2.5], vec![0.0], vec![2.5], vec![5.0]], None)?;

    data.run(
        |mut design: Design| {
            let x0 = design
                .get_f64("x0")
                .ok_or_else(|| EvaluationError::new("x0 is unset"))?;
            design.set_output("y", x0 * x0);

            Ok(design)
        },
        ExecutionMode::Sequential,
    )?;

    let (inputs, outputs) = data.to_matrices();
    for (input, output) in inputs.iter().zip(outputs.iter()) {
        println!("x0 = {:>5.1}  ->  y = {:>5.1}", input[0], output[0]);
    }

    Ok(())
}
