//! Lineage Core - Event-Driven Track Correction
//!
//! Reconciles a cell tracking graph against division and apoptosis
//! detections produced by an external classifier:
//! 1. **Matching**: detections are tied to tracks through the segmentation
//!    label under each detection
//! 2. **Breaking**: splits the classifier does not corroborate are removed
//! 3. **Re-linking**: missed divisions are inserted by a local bipartite
//!    assignment constrained by the cell's division axis
//! 4. **Truncation**: tracks are terminated at verified death events
//!
//! ```text
//!   events ──▶ matcher ──▶ breaker ──▶ ellipse fit ──▶ region ──▶ assignment ──▶ reconciler
//!                ▲                                                                  │
//!          label index + topology                                        TrackModel (update)
//! ```

pub mod graph;
pub mod model;
pub mod linalg;
pub mod ellipsoid;
pub mod events;
pub mod collection;
pub mod label_index;
pub mod topology;
pub mod matcher;
pub mod breaker;
pub mod region;
pub mod cost;
pub mod assignment;
pub mod reconciler;
pub mod tracklet;
pub mod config;
pub mod corrector;

#[cfg(test)]
mod fixtures;

// Re-export key types for convenience
pub use graph::{Edge, GraphError, LineageGraph, NodeId, Spot, SpotStore, TrackId, TrackSet};
pub use model::{ModelError, ModelUpdate, TrackModel};
pub use ellipsoid::{fit_ellipse_2d, try_fit_ellipse_2d, Ellipsoid, EllipsoidError, FitError};
pub use events::{event_count, parse_events, read_events, Event, EventKind, EventSet, IngestError, IngestReport, RowError};
pub use collection::{EventCollection, EventFeature, FeatureFilter};
pub use label_index::LabelIndex;
pub use topology::{analyze, TrackTopology};
pub use matcher::{match_events, ApoptosisCorrection, DivisionCorrection, MatchOutcome};
pub use breaker::{break_unsupported_links, BreakReport};
pub use region::{candidate_region, line_deviation_deg, on_opposite_sides, side_of_axis, RegionQuery};
pub use cost::{percentile, LinkingCostModel};
pub use assignment::{solve_local, Assignment, AssignmentError, CostMatrix, LocalSubgraph};
pub use reconciler::{estimate_axis, reconcile, ReconcileReport};
pub use tracklet::prune_tracklets;
pub use config::{ConfigError, CorrectorConfig};
pub use corrector::{CorrectionError, CorrectionReport, TrackCorrector};
