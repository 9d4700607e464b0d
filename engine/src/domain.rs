use crate::data::{ColumnKind, Row, Value};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("duplicate parameter name '{0}'")]
    DuplicateName(String),
    #[error("parameter '{name}' has an empty or inverted range")]
    InvalidRange { name: String },
    #[error("categorical parameter '{0}' needs at least one category")]
    EmptyCategories(String),
}

/// Typed input parameter definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Parameter {
    Continuous { lower_bound: f64, upper_bound: f64 },
    Discrete { lower_bound: i64, upper_bound: i64 },
    Categorical { categories: Vec<String> },
    Constant { value: Value },
}

impl Parameter {
    /// column type tag used for casting appended values
    pub fn column_kind(&self) -> ColumnKind {
        match self {
            Parameter::Continuous { .. } => ColumnKind::Float,
            Parameter::Discrete { .. } => ColumnKind::Int,
            Parameter::Categorical { .. } => ColumnKind::Category,
            Parameter::Constant { .. } => ColumnKind::Constant,
        }
    }

    fn validate(&self, name: &str) -> Result<(), DomainError> {
        match self {
            Parameter::Continuous {
                lower_bound,
                upper_bound,
            } if lower_bound >= upper_bound => Err(DomainError::InvalidRange {
                name: name.to_owned(),
            }),
            Parameter::Discrete {
                lower_bound,
                upper_bound,
            } if lower_bound >= upper_bound => Err(DomainError::InvalidRange {
                name: name.to_owned(),
            }),
            Parameter::Categorical { categories } if categories.is_empty() => {
                Err(DomainError::EmptyCategories(name.to_owned()))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedParameter {
    pub name: String,
    #[serde(flatten)]
    pub parameter: Parameter,
}

/// Parameter schema of an experiment: named, typed input columns plus the
/// declared output column names. Declaration order is the column order of
/// every derived table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    input_space: Vec<NamedParameter>,
    output_names: Vec<String>,
}

impl Domain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continuous design space over the given bounds with inputs named
    /// `x0..xN` and a single output `y`
    pub fn continuous(bounds: &[(f64, f64)]) -> Result<Self, DomainError> {
        let mut domain = Self::new();
        for (dim, (lower_bound, upper_bound)) in bounds.iter().enumerate() {
            domain.add_input(
                format!("x{dim}"),
                Parameter::Continuous {
                    lower_bound: *lower_bound,
                    upper_bound: *upper_bound,
                },
            )?;
        }
        domain.add_output("y")?;

        Ok(domain)
    }

    pub fn add_input(
        &mut self,
        name: impl Into<String>,
        parameter: Parameter,
    ) -> Result<(), DomainError> {
        let name = name.into();
        parameter.validate(&name)?;
        if self.input_space.iter().any(|existing| existing.name == name) {
            return Err(DomainError::DuplicateName(name));
        }

        self.input_space.push(NamedParameter { name, parameter });

        Ok(())
    }

    pub fn add_output(&mut self, name: impl Into<String>) -> Result<(), DomainError> {
        let name = name.into();
        if self.output_names.contains(&name) {
            return Err(DomainError::DuplicateName(name));
        }

        self.output_names.push(name);

        Ok(())
    }

    pub fn input_names(&self) -> Vec<&str> {
        self.input_space
            .iter()
            .map(|parameter| parameter.name.as_str())
            .collect_vec()
    }

    pub fn output_names(&self) -> Vec<&str> {
        self.output_names.iter().map(String::as_str).collect_vec()
    }

    /// input column declarations in schema order
    pub fn input_columns(&self) -> Vec<(String, ColumnKind)> {
        self.input_space
            .iter()
            .map(|parameter| (parameter.name.clone(), parameter.parameter.column_kind()))
            .collect_vec()
    }

    /// output column declarations; outputs are always continuous
    pub fn output_columns(&self) -> Vec<(String, ColumnKind)> {
        self.output_names
            .iter()
            .map(|name| (name.clone(), ColumnKind::Float))
            .collect_vec()
    }

    /// One row of unset cells matching the declared input columns
    pub fn empty_row(&self) -> Row {
        self.input_space
            .iter()
            .map(|parameter| (parameter.name.clone(), Value::Missing))
            .collect()
    }

    /// Lower and upper bound per continuous input, in schema order
    pub fn bounds(&self) -> Vec<(f64, f64)> {
        self.input_space
            .iter()
            .filter_map(|named| match named.parameter {
                Parameter::Continuous {
                    lower_bound,
                    upper_bound,
                } => Some((lower_bound, upper_bound)),
                _ => None,
            })
            .collect_vec()
    }
}
