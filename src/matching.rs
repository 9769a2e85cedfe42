//! Nearest neighbor propensity score matching.
//!
//! For every treated unit, find the closest control unit(s) by absolute
//! propensity score difference. Controls live in a score-sorted index so
//! each query is a binary search plus a short outward scan instead of a
//! full pass over the control pool.
//!
//! Tie-break policy: when two controls sit at exactly the same distance
//! from a treated unit, the one with the lowest unit id wins. The index is
//! sorted by (score, id), which makes the choice stable and reproducible.

use std::cmp::Ordering;

use polars::prelude::{DataFrame, IdxCa, IdxSize};
use tracing::info;

use crate::error::{Result, UpliftError};
use crate::propensity::SCORE_COL;
use crate::schema::{column_f64, column_i64, Dataset, TableSchema, ID_COL};

/// Matching configuration. Every knob is explicit; the defaults mirror
/// 1:1 matching with replacement.
#[derive(Debug, Clone)]
pub struct MatchConfig {
    /// Whether a control unit may be reused across treated units.
    pub replace: bool,
    /// Number of control matches per treated unit.
    pub ratio: usize,
    /// Maximum allowed score distance. A treated unit with no control
    /// inside the caliper is dropped rather than matched badly.
    pub caliper: Option<f64>,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            replace: true,
            ratio: 1,
            caliper: None,
        }
    }
}

impl MatchConfig {
    fn validate(&self) -> Result<()> {
        if self.ratio < 1 {
            return Err(UpliftError::Configuration(
                "match ratio must be at least 1".to_string(),
            ));
        }
        if let Some(c) = self.caliper {
            if !c.is_finite() || c <= 0.0 {
                return Err(UpliftError::Configuration(format!(
                    "caliper must be a positive finite number, got {c}"
                )));
            }
        }
        Ok(())
    }
}

/// One treated unit and the control(s) it was matched to.
#[derive(Debug, Clone)]
pub struct MatchedPair {
    pub treated_id: i64,
    /// Matched control ids, nearest first.
    pub control_ids: Vec<i64>,
    /// Score distance to the nearest matched control.
    pub distance: f64,
}

/// The units participating in at least one [`MatchedPair`]: every matched
/// treated row followed by every matched control row, controls repeated
/// once per reuse under replacement. Derived from a scored [`Dataset`],
/// never mutated afterwards.
#[derive(Debug, Clone)]
pub struct MatchedDataset {
    frame: DataFrame,
    pairs: Vec<MatchedPair>,
    schema: TableSchema,
}

impl MatchedDataset {
    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn pairs(&self) -> &[MatchedPair] {
        &self.pairs
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// Number of treated units that found a match.
    pub fn n_treated(&self) -> usize {
        self.pairs.len()
    }

    /// Total matched control rows, counting reuse.
    pub fn n_control_rows(&self) -> usize {
        self.pairs.iter().map(|p| p.control_ids.len()).sum()
    }

    /// Number of distinct control units used.
    pub fn n_distinct_controls(&self) -> usize {
        let mut ids: Vec<i64> = self
            .pairs
            .iter()
            .flat_map(|p| p.control_ids.iter().copied())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids.len()
    }
}

// Score-sorted control pool. Entries are ordered by (score, id); a
// tombstone flag supports matching without replacement.
struct ControlIndex {
    scores: Vec<f64>,
    ids: Vec<i64>,
    rows: Vec<usize>,
    alive: Vec<bool>,
    n_alive: usize,
}

struct Picked {
    slot: usize,
    id: i64,
    row: usize,
    distance: f64,
}

impl ControlIndex {
    fn new(mut entries: Vec<(f64, i64, usize)>) -> Self {
        entries.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });
        let n = entries.len();
        Self {
            scores: entries.iter().map(|e| e.0).collect(),
            ids: entries.iter().map(|e| e.1).collect(),
            rows: entries.iter().map(|e| e.2).collect(),
            alive: vec![true; n],
            n_alive: n,
        }
    }

    // Remove and return the single nearest alive control for `score`,
    // honoring the caliper and the lowest-id tie-break.
    fn pick_one(&mut self, score: f64, caliper: Option<f64>) -> Option<Picked> {
        if self.n_alive == 0 {
            return None;
        }
        let ip = self.scores.partition_point(|&s| s < score);

        // First alive candidate at or above the query score. Entries with
        // an equal score are id-ascending, so this one already carries the
        // lowest id on its side.
        let mut right = ip;
        while right < self.scores.len() && !self.alive[right] {
            right += 1;
        }
        let right = (right < self.scores.len()).then_some(right);

        // First alive candidate below the query score. Within a run of
        // equal scores the scan walks id-descending, so continue to the
        // start of the run to honor the lowest-id tie-break.
        let mut left = None;
        let mut j = ip;
        while j > 0 {
            j -= 1;
            if self.alive[j] {
                left = Some(j);
                break;
            }
        }
        if let Some(l) = left {
            let run_score = self.scores[l];
            let mut j = l;
            let mut best = l;
            while j > 0 && self.scores[j - 1] == run_score {
                j -= 1;
                if self.alive[j] {
                    best = j;
                }
            }
            left = Some(best);
        }

        let chosen = match (left, right) {
            (None, None) => return None,
            (Some(l), None) => l,
            (None, Some(r)) => r,
            (Some(l), Some(r)) => {
                let dl = (score - self.scores[l]).abs();
                let dr = (self.scores[r] - score).abs();
                match dl.partial_cmp(&dr).unwrap_or(Ordering::Equal) {
                    Ordering::Less => l,
                    Ordering::Greater => r,
                    Ordering::Equal => {
                        if self.ids[l] < self.ids[r] {
                            l
                        } else {
                            r
                        }
                    }
                }
            }
        };

        let distance = (self.scores[chosen] - score).abs();
        if let Some(c) = caliper {
            if distance > c {
                return None;
            }
        }
        self.alive[chosen] = false;
        self.n_alive -= 1;
        Some(Picked {
            slot: chosen,
            id: self.ids[chosen],
            row: self.rows[chosen],
            distance,
        })
    }

    // The `ratio` nearest alive controls for `score`, distinct within the
    // query. With replacement the picks are resurrected afterwards so
    // later treated units can reuse them.
    fn nearest(&mut self, score: f64, ratio: usize, caliper: Option<f64>, replace: bool) -> Vec<Picked> {
        let mut picks = Vec::with_capacity(ratio);
        for _ in 0..ratio {
            match self.pick_one(score, caliper) {
                Some(p) => picks.push(p),
                None => break,
            }
        }
        if replace {
            for p in &picks {
                self.alive[p.slot] = true;
                self.n_alive += 1;
            }
        }
        picks
    }
}

/// Match every treated unit to its nearest control(s) by propensity score.
///
/// The result is a new [`MatchedDataset`]; the scored input is untouched.
/// A treated unit is dropped (not badly matched) when the caliper rules
/// out every control or, without replacement, when the pool is exhausted.
pub fn nearest_neighbor_match(data: &Dataset, config: &MatchConfig) -> Result<MatchedDataset> {
    config.validate()?;
    if data.frame().column(SCORE_COL).is_err() {
        return Err(UpliftError::Configuration(format!(
            "dataset has no `{SCORE_COL}` column; estimate propensities first"
        )));
    }

    let treatment = data.treatment_vec()?;
    let scores = column_f64(data.frame(), SCORE_COL)?;
    let ids = column_i64(data.frame(), ID_COL)?;

    let mut treated = Vec::new();
    let mut controls = Vec::new();
    for (row, ((&t, &s), &id)) in treatment.iter().zip(&scores).zip(&ids).enumerate() {
        if t == 1 {
            treated.push((s, id, row));
        } else {
            controls.push((s, id, row));
        }
    }
    if treated.is_empty() {
        return Err(UpliftError::EmptyTreatment);
    }
    if controls.is_empty() {
        return Err(UpliftError::InsufficientControls(
            "dataset has no control units".to_string(),
        ));
    }

    let mut index = ControlIndex::new(controls);
    let mut pairs = Vec::with_capacity(treated.len());
    let mut treated_rows = Vec::with_capacity(treated.len());
    let mut control_rows = Vec::new();
    for &(score, id, row) in &treated {
        let picks = index.nearest(score, config.ratio, config.caliper, config.replace);
        if picks.is_empty() {
            continue;
        }
        treated_rows.push(row);
        control_rows.extend(picks.iter().map(|p| p.row));
        pairs.push(MatchedPair {
            treated_id: id,
            control_ids: picks.iter().map(|p| p.id).collect(),
            distance: picks[0].distance,
        });
    }
    if pairs.is_empty() {
        return Err(UpliftError::InsufficientControls(
            "no treated unit could be matched under the current configuration".to_string(),
        ));
    }

    let indices: Vec<IdxSize> = treated_rows
        .iter()
        .chain(control_rows.iter())
        .map(|&r| r as IdxSize)
        .collect();
    let frame = data.frame().take(&IdxCa::from_vec("idx", indices))?;
    info!(
        n_treated = pairs.len(),
        n_dropped = treated.len() - pairs.len(),
        n_control_rows = control_rows.len(),
        "matching complete"
    );

    Ok(MatchedDataset {
        frame,
        pairs,
        schema: data.schema().clone(),
    })
}
