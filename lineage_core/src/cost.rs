//! Link cost model shared with the base tracker.
//!
//! ```text
//!   penalty = 1 + Σ w_f · 3 · |f₁ − f₂| / (f₁ + f₂)
//!   cost    = d² · penalty²
//! ```
//!
//! Links longer than `max_distance` or spanning more than `max_frame_gap`
//! frames are blocked.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::graph::Spot;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkingCostModel {
    /// Maximum link length (physical units, default: 15.0)
    pub max_distance: f64,

    /// Feature name -> penalty weight
    pub feature_penalties: BTreeMap<String, f64>,

    /// Multiplier on the cutoff cost for "no link" (default: 1.05)
    pub alternative_cost_factor: f64,

    /// Percentile of real costs the alternative is based on (default: 0.9)
    pub cutoff_percentile: f64,

    /// Largest frame gap a link may span (default: 2)
    pub max_frame_gap: usize,
}

impl Default for LinkingCostModel {
    fn default() -> Self {
        Self {
            max_distance: 15.0,
            feature_penalties: BTreeMap::new(),
            alternative_cost_factor: 1.05,
            cutoff_percentile: 0.9,
            max_frame_gap: 2,
        }
    }
}

impl LinkingCostModel {
    /// Cost of linking `source` to `target`, `None` if the link is blocked.
    pub fn link_cost(&self, source: &Spot, target: &Spot) -> Option<f64> {
        let gap = target.frame().checked_sub(source.frame())?;
        if gap == 0 || gap > self.max_frame_gap {
            return None;
        }
        let d2 = source.distance_squared(target);
        if d2 > self.max_distance * self.max_distance {
            return None;
        }

        let mut penalty = 1.0;
        for (feature, &weight) in &self.feature_penalties {
            let (Some(a), Some(b)) = (source.feature(feature), target.feature(feature)) else {
                continue;
            };
            let ndiff = (a - b).abs() / (a + b);
            if ndiff.is_finite() {
                penalty += weight * 3.0 * ndiff;
            }
        }
        Some(d2 * penalty * penalty)
    }

    /// Cost of leaving a row or column unassigned, given the real costs.
    pub fn alternative_cost(&self, costs: &[f64]) -> Option<f64> {
        percentile(costs, self.cutoff_percentile).map(|c| c * self.alternative_cost_factor)
    }
}

/// Nearest-rank percentile of finite values; `p = 0` is the minimum.
pub fn percentile(values: &[f64], p: f64) -> Option<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);
    let p = p.clamp(0.0, 1.0);
    let rank = (p * (sorted.len() - 1) as f64).round() as usize;
    Some(sorted[rank])
}
