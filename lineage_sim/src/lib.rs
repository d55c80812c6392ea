//! Lineage Deterministic Simulation Harness
//!
//! Generates seeded synthetic movies with known lineages, injects the
//! mistakes a frame-to-frame tracker makes, runs the event-driven corrector
//! and scores the result against the ground truth.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        ScenarioRunner                        │
//! │                                                              │
//! │  ┌──────────────┐  truth   ┌──────────┐  degraded graph      │
//! │  │ LineageOracle│─────────▶│ degrade  │──────────┐           │
//! │  │ (ChaCha8Rng) │          └──────────┘          ▼           │
//! │  └──────┬───────┘                        ┌───────────────┐   │
//! │         │ label volume + detection CSV   │ TrackCorrector│   │
//! │         └───────────────────────────────▶│ (lineage_core)│   │
//! │                                          └───────┬───────┘   │
//! │                                                  ▼           │
//! │                                   metrics vs. ground truth   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use lineage_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42).run(ScenarioId::MissedDivision);
//! assert!(result.passed);
//! ```

mod oracle;
mod runner;
mod exporter;
pub mod scenarios;

pub use oracle::{
    detections_csv, ColonyKind, Detection, LineageOracle, NeighbourPair, OracleConfig, SyntheticLineage,
    TrueDeath, TrueDivision,
};
pub use runner::{degrade, edge_errors, Degradation, ScenarioError, ScenarioMetrics, ScenarioResult, ScenarioRun, ScenarioRunner};
pub use exporter::{EdgeExport, FrameExport, SimExport, SpotPosition};
