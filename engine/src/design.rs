use crate::data::{Row, Value};
use thiserror::Error;

/// Failure raised by an evaluation operation for a single design. Caught per
/// job and converted into a row-level error status; never aborts a run.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct EvaluationError {
    message: String,
}

impl EvaluationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
/// One job's view: the input row, the output row and the row index.
/// Handed to an operation, handed back with outputs filled in. Does not own
/// any storage and is only valid for the duration of one evaluation.
pub struct Design {
    pub job_number: usize,
    pub input: Row,
    pub output: Row,
}

impl Design {
    pub fn new(job_number: usize, input: Row, output: Row) -> Self {
        Self {
            job_number,
            input,
            output,
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.input.get(name)
    }

    /// input cell as a float, `None` for unset or non-numeric cells
    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.input.get(name).and_then(Value::as_f64)
    }

    pub fn set_output(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.output.insert(name.into(), value.into());
    }
}

/// Initial-batch collaborator: produces input rows to seed an experiment.
/// Sampling strategies themselves live outside this crate.
pub trait Sampler {
    fn get_samples(&mut self, number_of_samples: usize) -> Vec<Row>;
}
