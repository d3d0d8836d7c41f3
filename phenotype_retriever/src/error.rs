use thiserror::Error;

use crate::models::{ControlCriteria, Provenance, SampleGroup};
use crate::query_builder::QueryKind;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Failures that stop the current analysis step. Every variant carries the
/// query or parameter values needed to retry with corrected input.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid gene symbol {symbol:?}: {reason}")]
    InvalidSymbol { symbol: String, reason: String },

    #[error("cannot build {query}: field `{field}` is empty")]
    InvalidQueryInput { query: QueryKind, field: &'static str },

    #[error("{query}: response is missing required column(s) {missing:?} (available: {available:?})")]
    Schema {
        query: String,
        missing: Vec<String>,
        available: Vec<String>,
    },

    #[error("IMPC has no phenotype data for gene {symbol}; try another gene or check the case of the symbol")]
    NoPhenotypeData { symbol: String },

    #[error("no experimental data for parameter {parameter_stable_id} and colony {colony_id}; try a different phenotype")]
    NoExperimentalData {
        parameter_stable_id: String,
        colony_id: String,
    },

    #[error("ambiguous cohort for parameter {parameter_stable_id} and colony {colony_id}: {field} has {} distinct values {values:?}", .values.len())]
    AmbiguousCohort {
        parameter_stable_id: String,
        colony_id: String,
        field: &'static str,
        values: Vec<String>,
    },

    #[error("no control data matching {criteria}; try a different phenotype")]
    NoControlData { criteria: ControlCriteria },

    #[error("row {index} is tagged {provenance} but its biological_sample_group is {found}")]
    ProvenanceMismatch {
        index: usize,
        provenance: Provenance,
        found: SampleGroup,
    },

    #[error("{input:?} is not one of the offered phenotype terms: {}", .offered.join(", "))]
    InvalidSelection { input: String, offered: Vec<String> },

    #[error("{query} failed after {attempts} attempt(s): {message}")]
    Transport {
        query: String,
        attempts: u32,
        message: String,
    },

    #[error("{query} returned exactly {cap} rows; more data may exist than was fetched")]
    ResultTruncated { query: String, cap: usize },

    #[error("{query} was cancelled")]
    Cancelled { query: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("export failed: {0}")]
    Export(String),

    #[error("interactive input failed: {0}")]
    Input(String),
}

impl PipelineError {
    /// The gene cannot be analysed as given, but another symbol might be.
    pub fn suggests_another_gene(&self) -> bool {
        matches!(
            self,
            PipelineError::InvalidSymbol { .. } | PipelineError::NoPhenotypeData { .. }
        )
    }

    /// The chosen phenotype has no comparable cohort, but another term of the
    /// same gene might.
    pub fn suggests_another_phenotype(&self) -> bool {
        matches!(
            self,
            PipelineError::NoExperimentalData { .. }
                | PipelineError::NoControlData { .. }
                | PipelineError::AmbiguousCohort { .. }
        )
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        PipelineError::Input(e.to_string())
    }
}

/// A single row that could not be coerced into its typed form. These are
/// recovered locally: the row is dropped and counted on its result set.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("row {row}: cannot read column `{column}` from {value:?}")]
pub struct CoercionError {
    pub row: usize,
    pub column: String,
    pub value: String,
}

impl CoercionError {
    pub fn new(row: usize, column: &str, value: &str) -> Self {
        Self {
            row,
            column: column.to_string(),
            value: value.to_string(),
        }
    }
}
