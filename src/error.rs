//! Error types for the matching pipeline.

use polars::prelude::PolarsError;
use thiserror::Error;

/// Pipeline error type.
///
/// Schema and configuration problems are detected before any model is fit;
/// matching- and estimation-level errors abort the invocation with no
/// partial result. None of these are fatal to the process.
#[derive(Error, Debug)]
pub enum UpliftError {
    /// Required column missing, wrong type, or value out of its declared range.
    #[error("schema error: {0}")]
    Schema(String),

    /// Invalid pipeline configuration, including a degenerate treatment
    /// column (all one class).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The dataset contains no treated units, so matching is infeasible.
    #[error("no treated units in dataset")]
    EmptyTreatment,

    /// No control units exist, or the caliper leaves every treated unit
    /// unmatchable.
    #[error("insufficient control units: {0}")]
    InsufficientControls(String),

    /// A matched group is too small for a two-sample test.
    #[error("insufficient sample: {0}")]
    InsufficientSample(String),

    /// Numerical failure inside model fitting or the significance test.
    #[error("computation error: {0}")]
    Computation(String),

    /// Underlying dataframe error.
    #[error(transparent)]
    Polars(#[from] PolarsError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, UpliftError>;
