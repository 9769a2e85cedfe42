//! Propensity score matching pipeline for causal effect estimation.
//!
//! Estimates the average treatment effect (ATE) of a binary intervention
//! on a continuous outcome from observational data. Three stages run in
//! sequence over one dataset:
//!
//! 1. [`propensity::estimate_propensities`] fits a logistic regression of
//!    treatment on the covariates and attaches each unit's score.
//! 2. [`matching::nearest_neighbor_match`] pairs treated units with the
//!    closest control units by score distance.
//! 3. [`effect::estimate_effect`] computes the ATE over the matched
//!    population with a Welch two-sample significance test.
//!
//! Every stage consumes a value and returns a new one; nothing is mutated
//! in place and nothing outlives a single invocation. Concurrent
//! invocations on independently loaded data need no coordination. The one
//! shared resource is the bundled sample dataset behind
//! [`sample::SampleStore`], which is loaded at most once per process.

pub mod effect;
pub mod error;
pub mod export;
pub mod matching;
pub mod propensity;
pub mod sample;
pub mod schema;

pub use effect::{estimate_effect, ResultRecord};
pub use error::{Result, UpliftError};
pub use matching::{nearest_neighbor_match, MatchConfig, MatchedDataset, MatchedPair};
pub use propensity::{estimate_propensities, SCORE_COL};
pub use schema::{Dataset, TableSchema};

use tracing::info;

/// Everything a caller may want from one pipeline invocation: the scored
/// dataset (drives the score histogram), the matched population (drives
/// the CSV export), and the terminal result record.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub scored: Dataset,
    pub matched: MatchedDataset,
    pub record: ResultRecord,
}

/// Run the full pipeline: score, match, estimate.
///
/// Aborts on the first failing stage with no partial result; an ATE is
/// never produced from invalid input.
pub fn run_pipeline(data: &Dataset, config: &MatchConfig) -> Result<PipelineOutput> {
    info!(rows = data.height(), "pipeline started");
    let scored = estimate_propensities(data)?;
    let matched = nearest_neighbor_match(&scored, config)?;
    let record = estimate_effect(&matched)?;
    Ok(PipelineOutput {
        scored,
        matched,
        record,
    })
}
