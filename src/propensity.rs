//! Propensity score estimation.
//!
//! Fits one logistic regression of treatment on the covariates over the
//! full dataset and attaches the in-sample fitted probabilities as a new
//! score column. Scores are fitted values, not held-out predictions; that
//! is the standard propensity-matching setup.

use linfa::dataset::Dataset as LinfaDataset;
use linfa::traits::Fit;
use linfa_logistic::LogisticRegression;
use ndarray::{Array1, Array2};
use polars::prelude::{Float64Type, IndexOrder, NamedFrom, Series};
use tracing::{debug, info};

use crate::error::{Result, UpliftError};
use crate::schema::Dataset;

/// Name of the score column attached by [`estimate_propensities`].
pub const SCORE_COL: &str = "propensity_score";

// Pull the covariate matrix and treatment vector out of the frame as
// ndarrays ready for linfa.
fn construct(data: &Dataset) -> Result<(Array2<f64>, Array1<i64>, Vec<&str>)> {
    let schema = data.schema();
    let covariates = data
        .frame()
        .select(schema.covariates.iter().map(|c| c.as_str()))?;
    let x = covariates.to_ndarray::<Float64Type>(IndexOrder::Fortran)?;
    let d = Array1::from_vec(data.treatment_vec()?);
    let feat_names = schema.covariates.iter().map(|c| c.as_str()).collect();
    Ok((x, d, feat_names))
}

// Fit the logistic regression and return the fitted probabilities
// P(treatment = 1 | covariates) for every row. Predictors are left
// unscaled; the solver is deterministic for a fixed input.
fn estimate_logit(x: Array2<f64>, d: Array1<i64>, feat_names: Vec<&str>) -> Result<Array1<f64>> {
    let train = LinfaDataset::new(x.clone(), d).with_feature_names(feat_names);
    let model = LogisticRegression::default()
        .with_intercept(true)
        .alpha(0.0)
        .fit(&train)
        .map_err(|e| UpliftError::Computation(format!("logistic fit failed: {e}")))?;
    Ok(model.predict_probabilities(&x))
}

/// Estimate propensity scores.
///
/// Returns a new [`Dataset`] whose frame carries a [`SCORE_COL`] column
/// with one score in (0, 1) per unit. The input dataset is not modified.
///
/// Fails with [`UpliftError::Configuration`] when the treatment column
/// holds fewer than two distinct classes, before any fitting happens.
pub fn estimate_propensities(data: &Dataset) -> Result<Dataset> {
    let treatment = data.treatment_vec()?;
    let n_treated = treatment.iter().filter(|&&t| t == 1).count();
    if n_treated == 0 || n_treated == treatment.len() {
        return Err(UpliftError::Configuration(format!(
            "treatment column `{}` holds a single class; a classifier cannot be fit",
            data.schema().treatment
        )));
    }
    debug!(
        n = treatment.len(),
        n_treated,
        covariates = data.schema().covariates.len(),
        "fitting propensity model"
    );

    let (x, d, feat_names) = construct(data)?;
    let scores = estimate_logit(x, d, feat_names)?;
    info!(n = scores.len(), "propensity scores estimated");

    let mut frame = data.frame().clone();
    frame.with_column(Series::new(SCORE_COL, scores.to_vec()))?;
    Ok(Dataset::from_validated(frame, data.schema().clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TableSchema;
    use polars::df;

    fn overlapping_dataset() -> Dataset {
        // Treated and control overlap on x so the fit stays well-behaved.
        let frame = df![
            "treatment" => [1i64, 1, 1, 0, 0, 0, 1, 0],
            "outcome" => [5.0, 4.0, 4.0, 3.0, 2.0, 1.0, 3.0, 4.0],
            "x1" => [0.9, 0.7, 0.4, 0.6, 0.2, 0.1, 0.3, 0.8],
            "x2" => [1.0, 0.0, 1.0, 1.0, 0.0, 0.0, 0.0, 1.0],
        ]
        .unwrap();
        let schema = TableSchema::new(
            "treatment",
            "outcome",
            (1.0, 5.0),
            vec!["x1".to_string(), "x2".to_string()],
        );
        Dataset::from_frame(frame, schema).unwrap()
    }

    #[test]
    fn scores_are_strictly_inside_unit_interval() {
        let data = overlapping_dataset();
        let scored = estimate_propensities(&data).unwrap();
        let scores = crate::schema::column_f64(scored.frame(), SCORE_COL).unwrap();
        assert_eq!(scores.len(), data.height());
        for s in scores {
            assert!(s > 0.0 && s < 1.0, "score {s} outside (0,1)");
        }
    }

    #[test]
    fn input_dataset_is_left_untouched() {
        let data = overlapping_dataset();
        let before = data.frame().get_column_names_owned();
        let _ = estimate_propensities(&data).unwrap();
        assert_eq!(data.frame().get_column_names_owned(), before);
        assert!(data.frame().column(SCORE_COL).is_err());
    }

    #[test]
    fn single_class_treatment_is_configuration_error() {
        let frame = df![
            "treatment" => [0i64, 0, 0, 0],
            "outcome" => [4.0, 3.0, 2.0, 1.0],
            "x1" => [0.1, 0.2, 0.3, 0.4],
            "x2" => [1.0, 0.0, 1.0, 0.0],
        ]
        .unwrap();
        let schema = TableSchema::new(
            "treatment",
            "outcome",
            (1.0, 5.0),
            vec!["x1".to_string(), "x2".to_string()],
        );
        let data = Dataset::from_frame(frame, schema).unwrap();
        let err = estimate_propensities(&data).unwrap_err();
        assert!(matches!(err, UpliftError::Configuration(_)), "got {err:?}");
    }

    #[test]
    fn identical_input_yields_identical_scores() {
        let data = overlapping_dataset();
        let a = estimate_propensities(&data).unwrap();
        let b = estimate_propensities(&data).unwrap();
        let sa = crate::schema::column_f64(a.frame(), SCORE_COL).unwrap();
        let sb = crate::schema::column_f64(b.frame(), SCORE_COL).unwrap();
        assert_eq!(sa, sb);
    }
}
