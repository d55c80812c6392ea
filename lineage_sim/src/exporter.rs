//! JSON exporter for scenario runs.
//!
//! Exports spots per frame together with the truth, degraded and corrected
//! edge lists, so a run can be inspected or plotted offline.

use serde::Serialize;
use std::fs::File;
use std::io::Write;

use lineage_core::{CorrectionReport, LineageGraph};

use crate::runner::{Degradation, ScenarioMetrics, ScenarioRun};

/// Position of a spot.
#[derive(Debug, Clone, Serialize)]
pub struct SpotPosition {
    pub id: u32,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// All spots of one frame.
#[derive(Debug, Clone, Serialize)]
pub struct FrameExport {
    pub frame: usize,
    pub spots: Vec<SpotPosition>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct EdgeExport {
    pub source: u32,
    pub target: u32,
}

fn edge_list(graph: &LineageGraph) -> Vec<EdgeExport> {
    graph
        .edges()
        .into_iter()
        .map(|e| EdgeExport { source: e.source.0, target: e.target.0 })
        .collect()
}

/// Complete scenario export.
#[derive(Debug, Clone, Serialize)]
pub struct SimExport {
    pub scenario: String,
    pub seed: u64,
    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    pub frames: Vec<FrameExport>,
    pub truth: Vec<EdgeExport>,
    pub degraded: Vec<EdgeExport>,
    pub corrected: Vec<EdgeExport>,
    pub degradations: Vec<Degradation>,
    pub metrics: ScenarioMetrics,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<CorrectionReport>,
}

impl SimExport {
    pub fn from_run(run: &ScenarioRun) -> Self {
        let spots = &run.lineage.spots;
        let n_frames = spots.last_frame().map_or(0, |f| f + 1);
        let frames = (0..n_frames)
            .map(|frame| FrameExport {
                frame,
                spots: spots
                    .in_frame(frame)
                    .iter()
                    .filter_map(|&id| {
                        spots.get(id).map(|s| {
                            let [x, y, z] = s.position();
                            SpotPosition { id: id.0, x, y, z }
                        })
                    })
                    .collect(),
            })
            .collect();

        Self {
            scenario: run.result.scenario.name().to_string(),
            seed: run.result.seed,
            passed: run.result.passed,
            failure_reason: run.result.failure_reason.clone(),
            frames,
            truth: edge_list(&run.lineage.truth),
            degraded: edge_list(&run.degraded),
            corrected: edge_list(&run.corrected),
            degradations: run.degradations.clone(),
            metrics: run.result.metrics.clone(),
            report: run.result.report.clone(),
        }
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
