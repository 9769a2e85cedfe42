//! Average treatment effect estimation over the matched population.
//!
//! The ATE is the difference of mean outcomes between the matched treated
//! and matched control rows. Significance comes from Welch's two-sample
//! t-test: the unequal-variance formulation is used deliberately, since
//! matched groups have no reason to share a variance. This choice changes
//! the numeric results relative to the pooled-variance test.

use std::fmt;

use statrs::distribution::{ContinuousCDF, StudentsT};
use tracing::info;

use crate::error::{Result, UpliftError};
use crate::matching::MatchedDataset;
use crate::schema::{column_f64, column_i64};

/// Terminal artifact of the pipeline, consumed only by presentation code.
#[derive(Debug, Clone)]
pub struct ResultRecord {
    pub ate: f64,
    pub t_statistic: f64,
    pub p_value: f64,
    /// Standard error of the mean difference.
    pub std_error: f64,
    /// Welch-Satterthwaite degrees of freedom.
    pub df: f64,
    /// Matched treated rows.
    pub n_treated: usize,
    /// Matched control rows, counting reuse.
    pub n_control: usize,
}

impl ResultRecord {
    /// Two-sided confidence interval for the ATE at the given level.
    pub fn confidence_interval(&self, level: f64) -> Result<(f64, f64)> {
        let dist = StudentsT::new(0.0, 1.0, self.df)
            .map_err(|e| UpliftError::Computation(format!("t distribution: {e}")))?;
        let crit = dist.inverse_cdf(0.5 + level / 2.0);
        Ok((
            self.ate - crit * self.std_error,
            self.ate + crit * self.std_error,
        ))
    }
}

impl fmt::Display for ResultRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let (lb, ub) = self.confidence_interval(0.95).unwrap_or((f64::NAN, f64::NAN));
        write!(
            f,
            "UPLIFT =======================================\n\n\
            # Treated: {} | # Control (matched rows): {}\n\n\
            ATE                     : {:.3}\n\
            T-statistic (Welch)     : {:.3}\n\
            P-value                 : {:.5}\n\
            95% Confidence Interval : ({:.3}, {:.3})\n",
            self.n_treated, self.n_control, self.ate, self.t_statistic, self.p_value, lb, ub
        )
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn sample_variance(values: &[f64], mean: f64) -> f64 {
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64
}

// Welch's t-statistic, Welch-Satterthwaite degrees of freedom, and the
// two-sided p-value for a difference in means.
fn welch_t(a: &[f64], b: &[f64]) -> Result<(f64, f64, f64, f64)> {
    let (na, nb) = (a.len() as f64, b.len() as f64);
    let (ma, mb) = (mean(a), mean(b));
    let (va, vb) = (sample_variance(a, ma), sample_variance(b, mb));

    let se2 = va / na + vb / nb;
    if se2 <= 0.0 {
        return Err(UpliftError::InsufficientSample(
            "both matched groups have zero outcome variance; the test is undefined".to_string(),
        ));
    }
    let t = (ma - mb) / se2.sqrt();
    let df = se2.powi(2)
        / ((va / na).powi(2) / (na - 1.0) + (vb / nb).powi(2) / (nb - 1.0));
    let dist = StudentsT::new(0.0, 1.0, df)
        .map_err(|e| UpliftError::Computation(format!("t distribution: {e}")))?;
    let p = 2.0 * (1.0 - dist.cdf(t.abs()));
    Ok((t, p, se2.sqrt(), df))
}

/// Estimate the ATE and its significance over a matched dataset.
///
/// Fails with [`UpliftError::InsufficientSample`] when either matched
/// group has fewer than two rows; no numeric record is ever produced from
/// an undefined test.
pub fn estimate_effect(matched: &MatchedDataset) -> Result<ResultRecord> {
    let schema = matched.schema();
    let treatment = column_i64(matched.frame(), &schema.treatment)?;
    let outcomes = column_f64(matched.frame(), &schema.outcome)?;

    let mut treated = Vec::new();
    let mut control = Vec::new();
    for (&t, &y) in treatment.iter().zip(&outcomes) {
        if t == 1 {
            treated.push(y);
        } else {
            control.push(y);
        }
    }
    if treated.len() < 2 || control.len() < 2 {
        return Err(UpliftError::InsufficientSample(format!(
            "matched groups need at least 2 rows each, got {} treated and {} control",
            treated.len(),
            control.len()
        )));
    }

    let ate = mean(&treated) - mean(&control);
    let (t_statistic, p_value, std_error, df) = welch_t(&treated, &control)?;
    info!(ate, t_statistic, p_value, "effect estimated");

    Ok(ResultRecord {
        ate,
        t_statistic,
        p_value,
        std_error,
        df,
        n_treated: treated.len(),
        n_control: control.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::{nearest_neighbor_match, MatchConfig};
    use crate::propensity::SCORE_COL;
    use crate::schema::{Dataset, TableSchema};
    use approx::assert_relative_eq;
    use polars::df;
    use polars::prelude::NamedFrom;
    use polars::series::Series;

    fn matched_from(treatment: &[i64], scores: &[f64], outcomes: &[f64]) -> MatchedDataset {
        let x1: Vec<f64> = (0..treatment.len()).map(|i| i as f64).collect();
        let mut frame = df![
            "treatment" => treatment,
            "outcome" => outcomes,
            "x1" => x1,
        ]
        .unwrap();
        frame.with_column(Series::new(SCORE_COL, scores)).unwrap();
        let schema = TableSchema::new(
            "treatment",
            "outcome",
            (1.0, 5.0),
            vec!["x1".to_string()],
        );
        let data = Dataset::from_frame(frame, schema).unwrap();
        nearest_neighbor_match(&data, &MatchConfig::default()).unwrap()
    }

    #[test]
    fn reproduces_the_closed_form_welch_result() {
        // Treated outcomes {5, 4} vs matched controls {4, 3}:
        // ate = 1.0, t = sqrt(2), df = 2, p = 1 - 1/sqrt(2) doubled.
        let matched = matched_from(
            &[1, 1, 0, 0, 0, 0],
            &[0.90, 0.78, 0.85, 0.75, 0.20, 0.10],
            &[5.0, 4.0, 4.0, 3.0, 2.0, 1.0],
        );
        let record = estimate_effect(&matched).unwrap();
        assert_relative_eq!(record.ate, 1.0, epsilon = 1e-12);
        assert_relative_eq!(record.t_statistic, std::f64::consts::SQRT_2, epsilon = 1e-12);
        assert_relative_eq!(record.df, 2.0, epsilon = 1e-9);
        assert_relative_eq!(record.p_value, 0.2928932188134525, epsilon = 1e-9);
        assert_eq!(record.n_treated, 2);
        assert_eq!(record.n_control, 2);
    }

    #[test]
    fn confidence_interval_brackets_the_ate() {
        let matched = matched_from(
            &[1, 1, 0, 0, 0, 0],
            &[0.90, 0.78, 0.85, 0.75, 0.20, 0.10],
            &[5.0, 4.0, 4.0, 3.0, 2.0, 1.0],
        );
        let record = estimate_effect(&matched).unwrap();
        let (lb, ub) = record.confidence_interval(0.95).unwrap();
        assert!(lb < record.ate && record.ate < ub);
        // t_crit(0.975, df=2) = 4.30265; interval is ate +/- crit * se.
        assert_relative_eq!(ub - record.ate, 4.302652729911275 * record.std_error, epsilon = 1e-6);
    }

    #[test]
    fn tiny_matched_group_is_insufficient_sample() {
        let matched = matched_from(&[1, 0], &[0.5, 0.5], &[5.0, 3.0]);
        let err = estimate_effect(&matched).unwrap_err();
        assert!(matches!(err, UpliftError::InsufficientSample(_)), "got {err:?}");
    }

    #[test]
    fn zero_variance_in_both_groups_is_insufficient_sample() {
        let matched = matched_from(
            &[1, 1, 0, 0],
            &[0.6, 0.6, 0.6, 0.6],
            &[4.0, 4.0, 3.0, 3.0],
        );
        let err = estimate_effect(&matched).unwrap_err();
        assert!(matches!(err, UpliftError::InsufficientSample(_)), "got {err:?}");
    }
}
