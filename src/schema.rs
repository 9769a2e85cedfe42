//! Schema declaration and the ingestion boundary.
//!
//! All column-presence and type checking happens here, once, when a raw
//! dataframe is turned into a [`Dataset`]. Downstream stages never
//! re-validate: they operate on the typed value produced by this module.

use polars::prelude::{DataFrame, DataType, NamedFrom, Series};

use crate::error::{Result, UpliftError};

/// Name of the per-row identifier column attached at ingestion.
///
/// Identifiers are 1-based and follow row order, so row `i` always has
/// id `i + 1`. Downstream matching relies on this to recover row indices
/// and to break distance ties deterministically.
pub const ID_COL: &str = "unit_id";

/// Declared shape of an input table: one row per unit, a binary treatment
/// column, a bounded numeric outcome column, and a fixed set of numeric
/// covariates. Categorical covariates must be encoded to numeric upstream;
/// an unencoded column is rejected here rather than mid-pipeline.
#[derive(Debug, Clone)]
pub struct TableSchema {
    pub treatment: String,
    pub outcome: String,
    /// Inclusive valid range for the outcome column.
    pub outcome_range: (f64, f64),
    pub covariates: Vec<String>,
}

impl TableSchema {
    pub fn new(
        treatment: impl Into<String>,
        outcome: impl Into<String>,
        outcome_range: (f64, f64),
        covariates: Vec<String>,
    ) -> Self {
        Self {
            treatment: treatment.into(),
            outcome: outcome.into(),
            outcome_range,
            covariates,
        }
    }

    /// Schema of the bundled review dataset: star rating outcome on a
    /// 1-5 scale and the standard covariate set.
    pub fn reference() -> Self {
        Self::new(
            "treatment",
            "outcome",
            (1.0, 5.0),
            vec![
                "verified_purchase".to_string(),
                "product_category".to_string(),
                "total_votes".to_string(),
                "helpful_votes".to_string(),
            ],
        )
    }

    /// All declared columns in stable export order (id column excluded).
    pub fn columns(&self) -> Vec<&str> {
        let mut cols = vec![self.treatment.as_str(), self.outcome.as_str()];
        cols.extend(self.covariates.iter().map(|c| c.as_str()));
        cols
    }
}

/// A validated, immutable collection of units sharing one schema.
///
/// Constructed only at the ingestion boundary ([`Dataset::from_frame`]) or
/// by a pipeline stage deriving a new value. Stages never mutate a
/// `Dataset` in place; each takes one and returns a fresh value.
#[derive(Debug, Clone)]
pub struct Dataset {
    frame: DataFrame,
    schema: TableSchema,
}

impl Dataset {
    /// Validate a raw dataframe against `schema` and attach unit ids.
    ///
    /// Fails with [`UpliftError::Schema`] on a missing column, a
    /// non-numeric column, a non-finite value, a treatment value outside
    /// {0,1}, a null, or an outcome outside its declared range.
    ///
    /// A pre-existing [`ID_COL`] column in the input is discarded and
    /// replaced with freshly assigned row-order ids.
    pub fn from_frame(frame: DataFrame, schema: TableSchema) -> Result<Self> {
        validate(&frame, &schema)?;
        let mut frame = frame;
        let ids: Vec<i64> = (1..=frame.height() as i64).collect();
        frame.with_column(Series::new(ID_COL, ids))?;
        Ok(Self { frame, schema })
    }

    /// Wrap a frame already derived from a validated dataset.
    pub(crate) fn from_validated(frame: DataFrame, schema: TableSchema) -> Self {
        Self { frame, schema }
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn height(&self) -> usize {
        self.frame.height()
    }

    /// Treatment indicators in row order.
    pub fn treatment_vec(&self) -> Result<Vec<i64>> {
        column_i64(&self.frame, &self.schema.treatment)
    }

    /// Outcomes in row order.
    pub fn outcome_vec(&self) -> Result<Vec<f64>> {
        column_f64(&self.frame, &self.schema.outcome)
    }
}

fn validate(frame: &DataFrame, schema: &TableSchema) -> Result<()> {
    let treatment = required_column(frame, &schema.treatment)?;
    let outcome = required_column(frame, &schema.outcome)?;
    for name in &schema.covariates {
        let covariate = required_column(frame, name)?;
        if !covariate.dtype().is_numeric() {
            return Err(UpliftError::Schema(format!(
                "covariate column `{}` has type {} and must be encoded to numeric before ingestion",
                name,
                covariate.dtype()
            )));
        }
        if covariate.null_count() > 0 {
            return Err(UpliftError::Schema(format!(
                "covariate column `{}` contains nulls",
                name
            )));
        }
        let values = covariate.cast(&DataType::Float64)?;
        if values.f64()?.into_iter().flatten().any(|v| !v.is_finite()) {
            return Err(UpliftError::Schema(format!(
                "covariate column `{}` contains non-finite values",
                name
            )));
        }
    }

    if !treatment.dtype().is_numeric() {
        return Err(UpliftError::Schema(format!(
            "treatment column `{}` has type {}, expected an integer 0/1 indicator",
            schema.treatment,
            treatment.dtype()
        )));
    }
    let treatment = treatment.cast(&DataType::Int64)?;
    let treatment = treatment.i64()?;
    if treatment.null_count() > 0 {
        return Err(UpliftError::Schema(format!(
            "treatment column `{}` contains nulls",
            schema.treatment
        )));
    }
    if treatment.into_iter().flatten().any(|t| t != 0 && t != 1) {
        return Err(UpliftError::Schema(format!(
            "treatment column `{}` contains values outside {{0, 1}}",
            schema.treatment
        )));
    }

    if !outcome.dtype().is_numeric() {
        return Err(UpliftError::Schema(format!(
            "outcome column `{}` has type {}, expected numeric",
            schema.outcome,
            outcome.dtype()
        )));
    }
    let outcome = outcome.cast(&DataType::Float64)?;
    let outcome = outcome.f64()?;
    if outcome.null_count() > 0 {
        return Err(UpliftError::Schema(format!(
            "outcome column `{}` contains nulls",
            schema.outcome
        )));
    }
    let (lo, hi) = schema.outcome_range;
    // NaN compares false against both bounds, so check finiteness first.
    if outcome.into_iter().flatten().any(|y| !y.is_finite() || y < lo || y > hi) {
        return Err(UpliftError::Schema(format!(
            "outcome column `{}` contains values outside the declared range [{}, {}]",
            schema.outcome, lo, hi
        )));
    }

    Ok(())
}

fn required_column<'a>(frame: &'a DataFrame, name: &str) -> Result<&'a Series> {
    frame
        .column(name)
        .map_err(|_| UpliftError::Schema(format!("required column `{}` is missing", name)))
}

/// Materialize a column as `i64`, assuming no nulls (validated input).
pub fn column_i64(frame: &DataFrame, name: &str) -> Result<Vec<i64>> {
    let values = frame.column(name)?.cast(&DataType::Int64)?;
    Ok(values.i64()?.into_iter().flatten().collect())
}

/// Materialize a column as `f64`, assuming no nulls (validated input).
pub fn column_f64(frame: &DataFrame, name: &str) -> Result<Vec<f64>> {
    let values = frame.column(name)?.cast(&DataType::Float64)?;
    Ok(values.f64()?.into_iter().flatten().collect())
}
