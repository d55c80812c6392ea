//! Ground truth oracle for synthetic lineages.
//!
//! The oracle lays colonies out on a grid, one per square of side
//! `spacing`, far enough apart that no colony falls inside another's
//! search radius. Each colony is one of:
//!
//! ```text
//!   Dividing   mother ──▶ elongated at frame d ──▶ two daughters drifting apart
//!   Dying      cell ──▶ dies at frame k, debris stays in place
//!   Pair       two unrelated neighbours side by side
//!   Quiet      one cell, no events
//! ```
//!
//! Everything is painted into a label volume and recorded in a ground truth
//! graph. Detections are emitted in voxel coordinates and serialized to the
//! classifier's CSV layout.

use lineage_core::{LineageGraph, NodeId, Spot, SpotStore};
use lineage_env::{Calibration, DenseLabelVolume};
use nalgebra::{Rotation2, Vector2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt::Write;
use tracing::{debug, warn};

/// Shortest movie the oracle generates.
pub const MIN_FRAMES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColonyKind {
    Dividing,
    Dying,
    Pair,
    Quiet,
}

/// Oracle configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// Movie length (default: 16, at least 8)
    pub n_frames: usize,

    /// Side of one colony square in voxels (default: 40.0)
    pub spacing: f64,

    /// Colonies per grid row (default: 4)
    pub columns: usize,

    /// Radius of a round cell in voxels (default: 2.5)
    pub cell_radius: f64,

    /// Semi-axes of a mother about to divide (default: [5.0, 2.5])
    pub mother_radii: [f64; 2],

    /// Distance of each daughter from the mother one frame after division (default: 5.0)
    pub daughter_offset: f64,

    /// Per-frame drift of the daughters away from each other (default: 0.3)
    pub daughter_spread: f64,

    /// Tilt of the daughter line against the mother's long axis (default: 15°)
    pub daughter_tilt_deg: f64,

    /// Distance between the two cells of a pair (default: 8.0)
    pub pair_gap: f64,

    pub debris_radius: f64,

    /// Standard deviation of the per-frame random walk (default: 0.15)
    pub drift_std: f64,

    /// Sub-threshold detections scattered over the movie (default: 4)
    pub noise_detections: usize,

    /// Confident division detections on background (default: 2)
    pub stray_detections: usize,

    pub calibration: Calibration,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            n_frames: 16,
            spacing: 40.0,
            columns: 4,
            cell_radius: 2.5,
            mother_radii: [5.0, 2.5],
            daughter_offset: 5.0,
            daughter_spread: 0.3,
            daughter_tilt_deg: 15.0,
            pair_gap: 8.0,
            debris_radius: 2.0,
            drift_std: 0.15,
            noise_detections: 4,
            stray_detections: 2,
            calibration: Calibration::unit(),
        }
    }
}

/// A division in the ground truth.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrueDivision {
    pub mother: NodeId,
    pub frame: usize,
    pub daughters: [NodeId; 2],

    /// Long axis of the mother (radians)
    pub angle: f64,
}

/// A death in the ground truth; `debris` is what remains one frame later.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrueDeath {
    pub cell: NodeId,
    pub frame: usize,
    pub debris: NodeId,
}

/// Two unrelated neighbours over the whole movie.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NeighbourPair {
    pub left: Vec<NodeId>,
    pub right: Vec<NodeId>,
}

/// Classifier output in voxel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Detection {
    pub frame: usize,
    pub voxel: [f64; 3],
    pub score: f64,
    pub size: f64,
    pub angle_deg: f64,
}

/// Generated movie, its ground truth and the classifier's detections.
#[derive(Debug, Clone)]
pub struct SyntheticLineage {
    pub calibration: Calibration,
    pub kinds: Vec<ColonyKind>,
    pub spots: SpotStore,
    pub truth: LineageGraph,
    pub volume: DenseLabelVolume,
    pub divisions: Vec<TrueDivision>,
    pub deaths: Vec<TrueDeath>,
    pub pairs: Vec<NeighbourPair>,
    pub division_detections: Vec<Detection>,
    pub apoptosis_detections: Vec<Detection>,
    next_label: u32,
}

impl SyntheticLineage {
    pub fn division_csv(&self) -> String {
        detections_csv(&self.division_detections)
    }

    pub fn apoptosis_csv(&self) -> String {
        detections_csv(&self.apoptosis_detections)
    }

    fn add_cell(&mut self, pixel: Vector2<f64>, frame: usize, radii: [f64; 2], angle: f64) -> NodeId {
        let cal = self.calibration.0;
        let position = [pixel.x * cal[0], pixel.y * cal[1], 0.0];
        let id = self.spots.add(Spot::new(position, frame, radii[0].max(radii[1]) * cal[0]));
        self.truth.add_node(id, frame);
        self.volume.paint_ellipse(frame, [pixel.x, pixel.y], radii, angle, self.next_label);
        self.next_label += 1;
        id
    }

    fn link(&mut self, source: NodeId, target: NodeId) {
        let (Some(a), Some(b)) = (self.spots.get(source), self.spots.get(target)) else {
            return;
        };
        let cost = a.distance_squared(b);
        if let Err(e) = self.truth.add_edge(source, target, cost) {
            warn!("oracle could not link {} -> {}: {}", source, target, e);
        }
    }

    fn link_chain(&mut self, nodes: &[NodeId]) {
        for pair in nodes.windows(2) {
            self.link(pair[0], pair[1]);
        }
    }
}

/// Serializes detections as `T,Z,Y,X,Score,Size,Confidence,Angle` rows.
pub fn detections_csv(detections: &[Detection]) -> String {
    let mut csv = String::from("T,Z,Y,X,Score,Size,Confidence,Angle\n");
    for d in detections {
        let _ = writeln!(
            csv,
            "{},{},{},{},{:.4},{:.3},1,{:.2}",
            d.frame, d.voxel[2], d.voxel[1], d.voxel[0], d.score, d.size, d.angle_deg
        );
    }
    csv
}

/// Seeded generator of synthetic lineages.
pub struct LineageOracle {
    rng: ChaCha8Rng,
    config: OracleConfig,
    drift: Option<Normal<f64>>,
}

impl LineageOracle {
    pub fn new(seed: u64, config: OracleConfig) -> Self {
        let drift = Normal::new(0.0, config.drift_std).ok();
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            config,
            drift,
        }
    }

    pub fn config(&self) -> &OracleConfig {
        &self.config
    }

    fn n_frames(&self) -> usize {
        self.config.n_frames.max(MIN_FRAMES)
    }

    /// Generates one movie with a colony per entry of `kinds`.
    pub fn generate(&mut self, kinds: &[ColonyKind]) -> SyntheticLineage {
        let columns = self.config.columns.max(1);
        let rows = kinds.len().div_ceil(columns).max(1);
        let side = |n: usize| (n as f64 * self.config.spacing).ceil() as usize;
        let n_frames = self.n_frames();

        let mut out = SyntheticLineage {
            calibration: self.config.calibration,
            kinds: kinds.to_vec(),
            spots: SpotStore::new(),
            truth: LineageGraph::new(),
            volume: DenseLabelVolume::new([side(columns), side(rows), 1], n_frames),
            divisions: Vec::new(),
            deaths: Vec::new(),
            pairs: Vec::new(),
            division_detections: Vec::new(),
            apoptosis_detections: Vec::new(),
            next_label: 1,
        };

        for (i, &kind) in kinds.iter().enumerate() {
            let center = Vector2::new(
                ((i % columns) as f64 + 0.5) * self.config.spacing,
                ((i / columns) as f64 + 0.5) * self.config.spacing,
            );
            match kind {
                ColonyKind::Dividing => self.dividing(&mut out, center),
                ColonyKind::Dying => self.dying(&mut out, center),
                ColonyKind::Pair => self.pair(&mut out, center),
                ColonyKind::Quiet => {
                    let cells = self.round_chain(&mut out, center, Vector2::zeros(), 0, n_frames);
                    out.link_chain(&cells);
                }
            }
        }
        self.noise(&mut out, columns, rows);

        debug!(
            "oracle: {} colonies, {} spots, {} true edges, {} divisions, {} deaths",
            kinds.len(),
            out.spots.len(),
            out.truth.edge_count(),
            out.divisions.len(),
            out.deaths.len()
        );
        out
    }

    /// Random walk of `len` positions starting exactly at `start`.
    fn walk(&mut self, start: Vector2<f64>, velocity: Vector2<f64>, len: usize) -> Vec<Vector2<f64>> {
        let mut path = Vec::with_capacity(len);
        let mut p = start;
        for i in 0..len {
            if i > 0 {
                p += velocity;
                if let Some(drift) = &self.drift {
                    p += Vector2::new(drift.sample(&mut self.rng), drift.sample(&mut self.rng));
                }
            }
            path.push(p);
        }
        path
    }

    fn round_chain(
        &mut self,
        out: &mut SyntheticLineage,
        start: Vector2<f64>,
        velocity: Vector2<f64>,
        first_frame: usize,
        len: usize,
    ) -> Vec<NodeId> {
        let r = self.config.cell_radius;
        self.walk(start, velocity, len)
            .into_iter()
            .enumerate()
            .map(|(i, p)| out.add_cell(p, first_frame + i, [r, r], 0.0))
            .collect()
    }

    fn dividing(&mut self, out: &mut SyntheticLineage, center: Vector2<f64>) {
        let n_frames = self.n_frames();
        let frame = self.rng.gen_range(3..=n_frames - 5);
        let angle = self.rng.gen_range(0.0..PI);

        // Round until the frame before division, elongated at it
        let path = self.walk(center, Vector2::zeros(), frame + 1);
        let r = self.config.cell_radius;
        let mut mother_line: Vec<NodeId> = path[..frame]
            .iter()
            .enumerate()
            .map(|(f, &p)| out.add_cell(p, f, [r, r], 0.0))
            .collect();
        let mother_pos = path[frame];
        let mother = out.add_cell(mother_pos, frame, self.config.mother_radii, angle);
        mother_line.push(mother);
        out.link_chain(&mother_line);

        let tilt = self.config.daughter_tilt_deg.to_radians();
        let direction = Rotation2::new(angle + tilt) * Vector2::x();
        let mut daughters = [mother; 2];
        for (slot, sign) in [1.0, -1.0].into_iter().enumerate() {
            let start = mother_pos + direction * (sign * self.config.daughter_offset);
            let velocity = direction * (sign * self.config.daughter_spread);
            let chain = self.round_chain(out, start, velocity, frame + 1, n_frames - frame - 1);
            if let Some(&first) = chain.first() {
                out.link(mother, first);
                daughters[slot] = first;
            }
            out.link_chain(&chain);
        }

        let [a, b] = self.config.mother_radii;
        out.division_detections.push(Detection {
            frame,
            voxel: [mother_pos.x, mother_pos.y, 0.0],
            score: self.rng.gen_range(0.92..1.0),
            size: PI * a * b,
            angle_deg: angle.to_degrees(),
        });
        out.divisions.push(TrueDivision { mother, frame, daughters, angle });
    }

    fn dying(&mut self, out: &mut SyntheticLineage, center: Vector2<f64>) {
        let n_frames = self.n_frames();
        let frame = self.rng.gen_range(3..=n_frames - 4);
        let path = self.walk(center, Vector2::zeros(), frame + 1);
        let r = self.config.cell_radius;
        let cells: Vec<NodeId> = path
            .iter()
            .enumerate()
            .map(|(f, &p)| out.add_cell(p, f, [r, r], 0.0))
            .collect();
        out.link_chain(&cells);

        let Some(&cell) = cells.last() else { return };
        let end = path[frame];

        let r = self.config.debris_radius;
        let debris: Vec<NodeId> = ((frame + 1)..n_frames)
            .map(|f| out.add_cell(end, f, [r, r], 0.0))
            .collect();
        out.link_chain(&debris);

        let r = self.config.cell_radius;
        out.apoptosis_detections.push(Detection {
            frame,
            voxel: [end.x, end.y, 0.0],
            score: self.rng.gen_range(0.92..1.0),
            size: PI * r * r,
            angle_deg: 0.0,
        });
        if let Some(&first) = debris.first() {
            out.deaths.push(TrueDeath { cell, frame, debris: first });
        }
    }

    fn pair(&mut self, out: &mut SyntheticLineage, center: Vector2<f64>) {
        let n_frames = self.n_frames();
        let half = Vector2::new(self.config.pair_gap / 2.0, 0.0);
        let left = self.round_chain(out, center - half, Vector2::zeros(), 0, n_frames);
        let right = self.round_chain(out, center + half, Vector2::zeros(), 0, n_frames);
        out.link_chain(&left);
        out.link_chain(&right);
        out.pairs.push(NeighbourPair { left, right });
    }

    fn noise(&mut self, out: &mut SyntheticLineage, columns: usize, rows: usize) {
        let n_frames = self.n_frames();
        let width = columns as f64 * self.config.spacing;
        let height = rows as f64 * self.config.spacing;

        for i in 0..self.config.noise_detections {
            let detection = Detection {
                frame: self.rng.gen_range(0..n_frames),
                voxel: [self.rng.gen_range(0.0..width), self.rng.gen_range(0.0..height), 0.0],
                score: self.rng.gen_range(0.1..0.8),
                size: 20.0,
                angle_deg: 0.0,
            };
            if i % 2 == 0 {
                out.division_detections.push(detection);
            } else {
                out.apoptosis_detections.push(detection);
            }
        }

        // Grid corners are always background
        for _ in 0..self.config.stray_detections {
            let corner = [
                self.rng.gen_range(0..=columns) as f64 * self.config.spacing,
                self.rng.gen_range(0..=rows) as f64 * self.config.spacing,
            ];
            out.division_detections.push(Detection {
                frame: self.rng.gen_range(1..n_frames - 1),
                voxel: [corner[0].min(width - 1.0), corner[1].min(height - 1.0), 0.0],
                score: 0.95,
                size: 20.0,
                angle_deg: 0.0,
            });
        }
    }
}
