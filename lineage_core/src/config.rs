//! Corrector configuration.

use lineage_env::{Calibration, WorkerPool};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::cost::LinkingCostModel;
use crate::region::RegionQuery;

/// Configuration for one correction pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectorConfig {
    /// Physical voxel size of the label volume
    pub calibration: Calibration,

    /// Detections scoring below this are dropped at ingestion (default: 0.9)
    pub probability_threshold: f64,

    /// Frame tolerance N between a split and a division event (default: 5)
    pub tolerance: usize,

    /// Re-linking window Δt in frames, at least 2 (default: 3)
    pub delta_t: usize,

    /// Candidate search radius around a mother (default: 10.0)
    pub search_radius: f64,

    /// Require daughters on opposite sides of the division axis (default: true)
    pub exclusion_principle: bool,

    /// Maximum angle between the axis and a candidate direction (default: 30°)
    pub exclusion_angle_deg: f64,

    /// Remove splits no event supports (default: true)
    pub break_links: bool,

    /// Insert missed divisions (default: true)
    pub create_links: bool,

    /// Detach dangling branches up to this many frames; 0 disables (default: 0)
    pub min_tracklet_length: usize,

    /// Scan the Z column when an event lands on background in 3-D (default: true)
    pub z_tolerant: bool,

    /// Link cost model of the base tracker
    pub cost_model: LinkingCostModel,

    /// Worker threads; 0 uses the available parallelism (default: 0)
    pub num_threads: usize,

    /// Deadline for one pool batch in seconds (default: 60)
    pub timeout_secs: u64,
}

impl Default for CorrectorConfig {
    fn default() -> Self {
        Self {
            calibration: Calibration::unit(),
            probability_threshold: 0.9,
            tolerance: 5,
            delta_t: 3,
            search_radius: 10.0,
            exclusion_principle: true,
            exclusion_angle_deg: 30.0,
            break_links: true,
            create_links: true,
            min_tracklet_length: 0,
            z_tolerant: true,
            cost_model: LinkingCostModel::default(),
            num_threads: 0,
            timeout_secs: 60,
        }
    }
}

impl CorrectorConfig {
    /// Loads a configuration from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values no correction pass can run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.delta_t < 2 {
            return Err(ConfigError::Invalid {
                field: "delta_t",
                reason: format!("window must span at least 2 frames, got {}", self.delta_t),
            });
        }
        if !(0.0..=1.0).contains(&self.probability_threshold) {
            return Err(ConfigError::Invalid {
                field: "probability_threshold",
                reason: format!("{} is outside [0, 1]", self.probability_threshold),
            });
        }
        if !(self.search_radius.is_finite() && self.search_radius > 0.0) {
            return Err(ConfigError::Invalid {
                field: "search_radius",
                reason: format!("{} is not a positive distance", self.search_radius),
            });
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Worker pool sized and timed per this configuration.
    pub fn worker_pool(&self) -> WorkerPool {
        let pool = if self.num_threads == 0 {
            WorkerPool::with_available_parallelism()
        } else {
            WorkerPool::new(self.num_threads)
        };
        pool.with_timeout(Duration::from_secs(self.timeout_secs))
    }

    /// Link acceptance gate: costs must stay below half the squared radius.
    pub fn link_gate(&self) -> f64 {
        self.search_radius * self.search_radius / 2.0
    }

    pub(crate) fn region_query(&self, axis: Option<[f64; 2]>) -> RegionQuery {
        RegionQuery {
            radius: self.search_radius,
            axis,
            angle_tolerance_deg: self.exclusion_angle_deg,
            exclusion: self.exclusion_principle,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Malformed configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CorrectorConfig::default();
        assert_eq!(config.tolerance, 5);
        assert_eq!(config.delta_t, 3);
        assert!(config.exclusion_principle);
        assert_eq!(config.link_gate(), 50.0);
        assert_eq!(config.worker_pool().timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = CorrectorConfig::from_json(r#"{ "tolerance": 2, "cost_model": { "max_distance": 8.0 } }"#).unwrap();
        assert_eq!(config.tolerance, 2);
        assert_eq!(config.cost_model.max_distance, 8.0);
        assert_eq!(config.cost_model.max_frame_gap, 2);
        assert_eq!(config.search_radius, 10.0);
    }

    #[test]
    fn test_json_round_trip() {
        let mut config = CorrectorConfig::default();
        config.num_threads = 3;
        config.cost_model.feature_penalties.insert("AREA".into(), 0.5);
        let back = CorrectorConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(back, config);
        assert_eq!(back.worker_pool().num_threads(), 3);
    }

    #[test]
    fn test_short_window_is_rejected() {
        for delta_t in [0, 1] {
            let json = format!(r#"{{ "delta_t": {} }}"#, delta_t);
            let err = CorrectorConfig::from_json(&json).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid { field: "delta_t", .. }));
        }
        assert_eq!(CorrectorConfig::from_json(r#"{ "delta_t": 2 }"#).unwrap().delta_t, 2);
    }

    #[test]
    fn test_out_of_range_values_are_rejected() {
        let threshold = CorrectorConfig { probability_threshold: 1.5, ..Default::default() };
        assert!(matches!(
            threshold.validate(),
            Err(ConfigError::Invalid { field: "probability_threshold", .. })
        ));
        let radius = CorrectorConfig { search_radius: 0.0, ..Default::default() };
        assert!(matches!(radius.validate(), Err(ConfigError::Invalid { field: "search_radius", .. })));
        assert!(matches!(CorrectorConfig::from_json("{ nope"), Err(ConfigError::Parse(_))));
    }
}
