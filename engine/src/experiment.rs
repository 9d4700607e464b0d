use crate::{
    data::{DataError, DataTable, Row, Value},
    design::{Design, EvaluationError, Sampler},
    domain::{Domain, DomainError, Parameter},
    executors::{self, ExecutionMode, ExecutorError},
    jobs::{JobError, JobQueue, JobStatus},
    storage::ExperimentStore,
};
use itertools::Itertools;
use thiserror::Error;

/// Sentinel written into every output cell of a failed row. Together with the
/// `Error` ledger status this keeps failed rows distinguishable without ever
/// dropping them.
pub const ERROR_MARKER: &str = "ERROR";

#[derive(Error, Debug)]
pub enum ExperimentError {
    #[error("table operation failed")]
    Data(#[from] DataError),
    #[error("ledger operation failed")]
    Jobs(#[from] JobError),
    #[error("schema operation failed")]
    Domain(#[from] DomainError),
}

/// The top-level aggregate: a domain plus an input table, an output table and
/// a job ledger, all addressed by the same dense row index.
///
/// Every mutator below goes through all three tables so the alignment
/// invariant (`jobs.len() == input.len() == output.len()`) holds at all times.
#[derive(Debug, Clone)]
pub struct ExperimentData {
    pub(crate) domain: Domain,
    pub(crate) input_data: DataTable,
    pub(crate) output_data: DataTable,
    pub(crate) jobs: JobQueue,
    store: Option<ExperimentStore>,
}

// the attached store location is runtime wiring, not data
impl PartialEq for ExperimentData {
    fn eq(&self, other: &Self) -> bool {
        self.domain == other.domain
            && self.input_data == other.input_data
            && self.output_data == other.output_data
            && self.jobs == other.jobs
    }
}

impl ExperimentData {
    /// Empty dataset over the given domain
    pub fn new(domain: Domain) -> Self {
        // the domain already rejected duplicate names, so the declarations
        // cannot collide
        let input_data = DataTable::with_columns(domain.input_columns())
            .unwrap_or_default();
        let output_data = DataTable::with_columns(domain.output_columns())
            .unwrap_or_default();

        Self {
            domain,
            input_data,
            output_data,
            jobs: JobQueue::new(),
            store: None,
        }
    }

    /// Reassemble from persisted parts; the storage layer owns the artifacts
    pub(crate) fn from_parts(
        domain: Domain,
        input_data: DataTable,
        output_data: DataTable,
        jobs: JobQueue,
    ) -> Self {
        Self {
            domain,
            input_data,
            output_data,
            jobs,
            store: None,
        }
    }

    /// Seed a new dataset from a sampler
    pub fn from_sampling<S: Sampler>(
        domain: Domain,
        sampler: &mut S,
        number_of_samples: usize,
    ) -> Result<Self, ExperimentError> {
        let mut data = Self::new(domain);
        let samples = sampler.get_samples(number_of_samples);
        data.add_rows(&samples)?;

        Ok(data)
    }

    /// Attach the shared storage location required for cluster runs
    pub fn with_store(mut self, store: ExperimentStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    pub fn input_data(&self) -> &DataTable {
        &self.input_data
    }

    pub fn output_data(&self) -> &DataTable {
        &self.output_data
    }

    pub fn jobs(&self) -> &JobQueue {
        &self.jobs
    }

    pub fn len(&self) -> usize {
        self.input_data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_data.is_empty()
    }

    //                                                             Row mutation
    // =========================================================================

    /// Append input rows; their outputs are pending and the new jobs open
    pub fn add_rows(&mut self, rows: &[Row]) -> Result<(), ExperimentError> {
        self.input_data.add_rows(rows)?;
        self.output_data.add_empty_rows(rows.len());
        self.jobs.add(rows.len(), JobStatus::Open);

        Ok(())
    }

    /// Append numeric input rows and, optionally, their already-computed
    /// outputs. Rows with outputs enter the ledger as finished.
    pub fn add_numeric_arrays(
        &mut self,
        input: &[Vec<f64>],
        output: Option<&[Vec<f64>]>,
    ) -> Result<(), ExperimentError> {
        match output {
            Some(output) => {
                if output.len() != input.len() {
                    return Err(DataError::Shape {
                        expected: input.len(),
                        got: output.len(),
                    }
                    .into());
                }

                self.input_data.add_matrix(input)?;
                self.output_data.add_matrix(output)?;
                self.jobs.add(input.len(), JobStatus::Finished);
            }
            None => {
                self.input_data.add_matrix(input)?;
                self.output_data.add_empty_rows(input.len());
                self.jobs.add(input.len(), JobStatus::Open);
            }
        }

        Ok(())
    }

    /// Fill the pending output rows with a computed batch, creating the
    /// output column on demand
    pub fn fill_output(&mut self, matrix: &[Vec<f64>], label: &str) -> Result<(), ExperimentError> {
        if !self.output_data.has_column(label) {
            self.output_data.add_column(label, crate::data::ColumnKind::Float)?;
        }

        self.output_data.fill_rows(matrix)?;

        Ok(())
    }

    /// Remove rows from the end; removing zero rows is a no-op
    pub fn remove_rows_bottom(&mut self, number_of_rows: usize) -> Result<(), ExperimentError> {
        if number_of_rows == 0 {
            return Ok(());
        }

        let indices = (self.len().saturating_sub(number_of_rows)..self.len()).collect_vec();
        self.input_data.remove(&indices)?;
        self.output_data.remove(&indices)?;
        self.jobs.remove(&indices)?;

        Ok(())
    }

    /// New dataset holding only the given rows
    pub fn select(&self, indices: &[usize]) -> Result<Self, ExperimentError> {
        Ok(Self {
            domain: self.domain.clone(),
            input_data: self.input_data.select(indices)?,
            output_data: self.output_data.select(indices)?,
            jobs: self.jobs.select(indices)?,
            store: self.store.clone(),
        })
    }

    /// Drop all rows, keeping the declared schema
    pub fn reset_data(&mut self) {
        *self = Self {
            domain: self.domain.clone(),
            store: self.store.clone(),
            ..Self::new(self.domain.clone())
        };
    }

    //                                                          Schema extension
    // =========================================================================

    pub fn add_input_column(
        &mut self,
        name: &str,
        parameter: Parameter,
    ) -> Result<(), ExperimentError> {
        self.input_data.add_column(name, parameter.column_kind())?;
        self.domain.add_input(name, parameter)?;

        Ok(())
    }

    pub fn add_output_column(&mut self, name: &str) -> Result<(), ExperimentError> {
        self.output_data
            .add_column(name, crate::data::ColumnKind::Float)?;
        self.domain.add_output(name)?;

        Ok(())
    }

    //                                                                 Job flow
    // =========================================================================

    /// Claim the lowest-index open job and hand out its design view.
    /// `Ok(None)` signals work exhaustion; an error means the ledger and the
    /// tables disagree about a row, which no amount of retrying repairs.
    pub fn claim_design(&mut self) -> Result<Option<Design>, ExperimentError> {
        let Some(index) = self.jobs.claim() else {
            return Ok(None);
        };

        Ok(Some(self.get_design(index)?))
    }

    pub fn get_design(&self, index: usize) -> Result<Design, ExperimentError> {
        Ok(Design::new(
            index,
            self.input_data.row(index)?,
            self.output_data.row(index)?,
        ))
    }

    /// Write an evaluated design's outputs back and mark its job finished.
    /// Output columns the operation introduced are created on the fly.
    pub fn set_design(&mut self, design: Design) -> Result<(), ExperimentError> {
        for (column, value) in design.output {
            if !self.output_data.has_column(&column) {
                self.output_data
                    .add_column(&column, crate::data::ColumnKind::Float)?;
            }
            self.output_data.set(design.job_number, &column, value)?;
        }

        self.jobs.complete(design.job_number)?;

        Ok(())
    }

    /// Mark a job as failed and stamp the error marker into its output row
    pub fn set_error(&mut self, index: usize) -> Result<(), ExperimentError> {
        self.jobs.fail(index)?;
        self.output_data
            .set_row(index, &Value::Text(ERROR_MARKER.to_owned()))?;

        Ok(())
    }

    pub fn is_all_finished(&self) -> bool {
        self.jobs.is_all_finished()
    }

    /// Manual recovery hook for jobs orphaned by a crashed worker
    pub fn reopen_in_progress(&mut self) -> usize {
        self.jobs.reopen_in_progress()
    }

    //                                                                    Views
    // =========================================================================

    /// Numeric input and output matrices, declared column order
    pub fn to_matrices(&self) -> (Vec<Vec<f64>>, Vec<Vec<f64>>) {
        (self.input_data.to_matrix(), self.output_data.to_matrix())
    }

    /// Indices of the n rows with the smallest value in the first output
    /// column, best first. NaN and error rows sort last.
    pub fn n_best(&self, number_of_samples: usize) -> Vec<usize> {
        let outputs = self.output_data.to_matrix();

        (0..self.len())
            .sorted_by(|a, b| {
                let left = outputs[*a].first().copied().unwrap_or(f64::NAN);
                let right = outputs[*b].first().copied().unwrap_or(f64::NAN);
                left.partial_cmp(&right)
                    .unwrap_or_else(|| left.is_nan().cmp(&right.is_nan()))
            })
            .take(number_of_samples)
            .collect_vec()
    }

    //                                                            Run dispatch
    // =========================================================================

    /// Drive every open job to a terminal state with the given operation.
    /// Cluster mode requires an attached shared store.
    pub fn run<F>(&mut self, operation: F, mode: ExecutionMode) -> Result<(), ExecutorError>
    where
        F: Fn(Design) -> Result<Design, EvaluationError> + Sync,
    {
        match mode {
            ExecutionMode::Sequential => executors::sequential::execute(self, &operation),
            ExecutionMode::Parallel { threads } => {
                executors::local::execute(self, &operation, threads)
            }
            ExecutionMode::Cluster => {
                let store = self
                    .store
                    .clone()
                    .ok_or(ExecutorError::NoSharedLocation)?;

                executors::cluster::execute(self, &store, &operation)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ColumnKind;

    fn dataset() -> ExperimentData {
        let domain = Domain::continuous(&[(-5.0, 5.0)]).unwrap();
        let mut data = ExperimentData::new(domain);
        data.add_numeric_arrays(&[vec![-5.0], vec![0.0], vec![5.0]], None)
            .unwrap();

        data
    }

    #[test]
    fn tables_stay_aligned_through_mutation() {
        let mut data = dataset();
        assert_eq!(data.len(), 3);
        assert_eq!(data.jobs().len(), 3);
        assert_eq!(data.output_data().len(), 3);

        data.remove_rows_bottom(1).unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data.jobs().len(), 2);
        assert_eq!(data.output_data().len(), 2);

        data.add_rows(&[data.domain().empty_row()]).unwrap();
        assert_eq!(data.len(), 3);
        assert_eq!(data.jobs().len(), 3);
    }

    #[test]
    fn supplied_outputs_enter_finished() {
        let domain = Domain::continuous(&[(0.0, 1.0)]).unwrap();
        let mut data = ExperimentData::new(domain);
        data.add_numeric_arrays(&[vec![0.5]], Some(&[vec![0.25]]))
            .unwrap();

        assert_eq!(data.jobs().status(0), Some(JobStatus::Finished));
        assert!(data.is_all_finished());
    }

    #[test]
    fn mismatched_output_batch_is_rejected() {
        let domain = Domain::continuous(&[(0.0, 1.0)]).unwrap();
        let mut data = ExperimentData::new(domain);

        assert!(data
            .add_numeric_arrays(&[vec![0.5], vec![0.6]], Some(&[vec![0.25]]))
            .is_err());
        assert_eq!(data.len(), 0);
    }

    #[test]
    fn set_error_stamps_marker_and_status() {
        let mut data = dataset();
        let design = data.claim_design().unwrap().unwrap();

        data.set_error(design.job_number).unwrap();
        assert_eq!(data.jobs().status(0), Some(JobStatus::Error));
        assert_eq!(
            data.output_data().get(0, "y").unwrap(),
            &Value::Text(ERROR_MARKER.to_owned())
        );
    }

    #[test]
    fn schema_extension_reaches_all_tables() {
        let mut data = dataset();
        data.add_input_column(
            "x1",
            Parameter::Discrete {
                lower_bound: 0,
                upper_bound: 10,
            },
        )
        .unwrap();
        data.add_output_column("y2").unwrap();

        assert!(data.input_data().has_column("x1"));
        assert!(data.output_data().has_column("y2"));
        assert_eq!(data.domain().input_names(), vec!["x0", "x1"]);
    }

    #[test]
    fn fill_output_creates_column_on_demand() {
        let domain = Domain::continuous(&[(0.0, 1.0)]).unwrap();
        let mut data = ExperimentData::new(domain);
        data.add_numeric_arrays(&[vec![0.1], vec![0.2]], None).unwrap();

        data.fill_output(&[vec![1.0, 10.0], vec![2.0, 20.0]], "y2")
            .unwrap();
        assert_eq!(data.output_data().get(1, "y2").unwrap(), &Value::Float(20.0));
    }

    #[test]
    fn n_best_orders_by_first_output() {
        let domain = Domain::continuous(&[(0.0, 1.0)]).unwrap();
        let mut data = ExperimentData::new(domain);
        data.add_numeric_arrays(
            &[vec![0.1], vec![0.2], vec![0.3]],
            Some(&[vec![3.0], vec![1.0], vec![2.0]]),
        )
        .unwrap();

        assert_eq!(data.n_best(2), vec![1, 2]);
    }

    #[test]
    fn reset_keeps_schema() {
        let mut data = dataset();
        data.reset_data();

        assert!(data.is_empty());
        assert!(data.input_data().has_column("x0"));
        assert_eq!(data.input_data().names(), vec!["x0"]);
        assert_eq!(data.output_data().names(), vec!["y"]);
    }

    #[test]
    fn misaligned_ledger_surfaces_an_error() {
        let mut data = dataset();
        // a ledger entry without a backing row must not pass as exhaustion
        data.jobs.add(1, JobStatus::Open);

        for _ in 0..3 {
            let design = data.claim_design().unwrap().unwrap();
            data.set_design(design).unwrap();
        }
        assert!(matches!(
            data.claim_design(),
            Err(ExperimentError::Data(DataError::IndexOutOfRange(3)))
        ));
    }

    #[test]
    fn operation_may_introduce_output_columns() {
        let mut data = dataset();
        let mut design = data.claim_design().unwrap().unwrap();
        design.set_output("extra", 1.0);
        design.set_output("y", 25.0);

        data.set_design(design).unwrap();
        assert!(data.output_data().has_column("extra"));
        assert_eq!(
            data.output_data()
                .get(0, "extra")
                .unwrap(),
            &Value::Float(1.0)
        );
    }

    #[test]
    fn constant_columns_stay_out_of_matrices() {
        let mut domain = Domain::continuous(&[(0.0, 1.0)]).unwrap();
        domain
            .add_input(
                "tag",
                Parameter::Constant {
                    value: Value::Text("fixed".to_owned()),
                },
            )
            .unwrap();
        let mut data = ExperimentData::new(domain);

        let mut row = data.domain().empty_row();
        row.insert("x0".to_owned(), Value::Float(0.5));
        row.insert("tag".to_owned(), Value::Text("fixed".to_owned()));
        data.add_rows(&[row]).unwrap();

        assert_eq!(data.input_data().names(), vec!["x0", "tag"]);
        // only the continuous column survives numeric conversion
        assert_eq!(data.input_data().to_matrix(), vec![vec![0.5]]);
        assert!(!ColumnKind::Constant.is_numeric());
    }
}
