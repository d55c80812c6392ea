//! Applies division and apoptosis corrections to the correction graph.
//!
//! For every mother of every division correction a plan is computed on the
//! worker pool against a frozen snapshot:
//!
//! 1. fit an ellipse to the mother's label mask → division axis
//! 2. collect candidate daughters in the window
//! 3. solve the local assignment problem
//!
//! Plans are then applied one by one. A proposed link is kept only if its
//! cost passes the gate and, with the exclusion principle on, the new
//! daughter sits on the opposite side of the division axis from a sibling.

use lineage_env::WorkerPool;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::assignment::{solve_local, Assignment, AssignmentError, CostMatrix, LocalSubgraph};
use crate::config::CorrectorConfig;
use crate::corrector::CorrectionError;
use crate::ellipsoid::try_fit_ellipse_2d;
use crate::graph::{LineageGraph, NodeId, SpotStore, TrackId};
use crate::label_index::LabelIndex;
use crate::matcher::{ApoptosisCorrection, DivisionCorrection};
use crate::region::{on_opposite_sides, side_of_axis};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub links_added: usize,
    pub links_removed: usize,
    pub rejected_by_gate: usize,
    pub rejected_by_exclusion: usize,
    pub mothers_planned: usize,

    /// Mothers whose plan failed or did not finish in time
    pub mothers_skipped: usize,

    /// Mothers whose mask gave no ellipse
    pub mothers_without_axis: usize,

    pub tracks_terminated: usize,
}

/// Read-only state shared by the planning tasks.
struct PlanContext {
    spots: Arc<SpotStore>,
    original: LineageGraph,
    snapshot: LineageGraph,
    index: LabelIndex,
    config: CorrectorConfig,
}

#[derive(Debug)]
struct MotherPlan {
    mother: NodeId,
    axis: Option<[f64; 2]>,
    links: Result<Vec<Assignment>, AssignmentError>,
}

/// Division axis of the cell under `position`, from its label mask.
pub fn estimate_axis(index: &LabelIndex, position: [f64; 3], frame: usize) -> Option<[f64; 2]> {
    let points = index.mask_points_xy(position, frame);
    match try_fit_ellipse_2d(&points) {
        Ok(ellipse) => {
            let axis = ellipse.division_axis();
            Some([axis[0], axis[1]])
        }
        Err(e) => {
            debug!("no division axis at {:?} (frame {}): {}", position, frame, e);
            None
        }
    }
}

fn plan_mother(ctx: &PlanContext, mother: NodeId, frame: usize) -> MotherPlan {
    let axis = ctx
        .spots
        .get(mother)
        .and_then(|spot| estimate_axis(&ctx.index, spot.position(), frame));
    let query = ctx.config.region_query(axis);
    let subgraph = LocalSubgraph::build(
        &ctx.original,
        &ctx.snapshot,
        &ctx.spots,
        mother,
        frame,
        ctx.config.delta_t,
        &query,
    );
    let matrix = CostMatrix::build(&subgraph, &ctx.spots, &ctx.config.cost_model);
    MotherPlan {
        mother,
        axis,
        links: solve_local(&matrix, &ctx.config.cost_model),
    }
}

fn xy(spots: &SpotStore, node: NodeId) -> Option<[f64; 2]> {
    spots.get(node).map(|s| {
        let p = s.position();
        [p[0], p[1]]
    })
}

/// Applies one proposed link. Returns true if the graph changed.
fn apply_link(
    graph: &mut LineageGraph,
    spots: &SpotStore,
    mother_xy: [f64; 2],
    axis: Option<[f64; 2]>,
    link: &Assignment,
    config: &CorrectorConfig,
    report: &mut ReconcileReport,
) -> bool {
    let Assignment { source, target, cost } = *link;
    if cost >= config.link_gate() {
        report.rejected_by_gate += 1;
        return false;
    }
    if graph.has_edge(source, target) {
        return false;
    }
    let Some(target_xy) = xy(spots, target) else { return false };
    let siblings: Vec<NodeId> = graph.successors(source).into_iter().filter(|&c| c != target).collect();

    let exclusion_axis = axis.filter(|_| config.exclusion_principle);
    if let Some(axis) = exclusion_axis {
        let opposite = siblings.iter().any(|&sibling| {
            xy(spots, sibling).map_or(false, |s| on_opposite_sides(mother_xy, axis, target_xy, s))
        });
        if !opposite {
            report.rejected_by_exclusion += 1;
            return false;
        }
    }

    report.links_removed += graph.remove_incoming(target).len();

    if siblings.len() >= 2 {
        let conflicting = match exclusion_axis {
            Some(axis) => {
                let target_side = side_of_axis(mother_xy, axis, target_xy);
                siblings.iter().copied().find(|&s| {
                    xy(spots, s).map_or(false, |p| side_of_axis(mother_xy, axis, p) * target_side >= 0.0)
                })
            }
            None => siblings.iter().copied().max_by(|&a, &b| {
                let wa = graph.weight(source, a).unwrap_or(0.0);
                let wb = graph.weight(source, b).unwrap_or(0.0);
                wa.total_cmp(&wb)
            }),
        };
        if let Some(child) = conflicting {
            if graph.remove_edge(source, child).is_some() {
                report.links_removed += 1;
            }
        }
    }

    match graph.add_edge(source, target, cost) {
        Ok(true) => {
            debug!("linked {} -> {} (cost {:.3})", source, target, cost);
            report.links_added += 1;
            true
        }
        Ok(false) => false,
        Err(e) => {
            warn!("cannot link {} -> {}: {}", source, target, e);
            false
        }
    }
}

/// Applies corrections to `graph` and validates the result.
///
/// `original` is the tracker's graph before this pass; `graph` is the
/// correction graph, possibly already stripped of unsupported splits.
#[allow(clippy::too_many_arguments)]
pub fn reconcile(
    original: &LineageGraph,
    mut graph: LineageGraph,
    spots: &Arc<SpotStore>,
    index: &LabelIndex,
    division: &BTreeMap<TrackId, DivisionCorrection>,
    apoptosis: &BTreeMap<TrackId, ApoptosisCorrection>,
    config: &CorrectorConfig,
    pool: &WorkerPool,
) -> Result<(LineageGraph, ReconcileReport), CorrectionError> {
    let mut report = ReconcileReport::default();

    if config.create_links && !division.is_empty() {
        let mothers: Vec<(NodeId, usize)> = division
            .values()
            .flat_map(|c| c.mothers.iter().copied())
            .collect();
        let ctx = Arc::new(PlanContext {
            spots: Arc::clone(spots),
            original: original.clone(),
            snapshot: graph.clone(),
            index: index.clone(),
            config: config.clone(),
        });

        let task_ctx = Arc::clone(&ctx);
        let (plans, outcome) = pool.map("mother-planning", mothers.clone(), move |(mother, frame)| {
            plan_mother(&task_ctx, mother, frame)
        });
        if outcome.timed_out {
            warn!("{} of {} mother plans did not finish", outcome.total - outcome.completed, outcome.total);
        }

        for ((mother, _), plan) in mothers.iter().zip(plans) {
            let Some(plan) = plan else {
                report.mothers_skipped += 1;
                continue;
            };
            let links = match plan.links {
                Ok(links) => links,
                Err(e) => {
                    warn!("skipping mother {}: {}", plan.mother, e);
                    report.mothers_skipped += 1;
                    continue;
                }
            };
            report.mothers_planned += 1;
            if plan.axis.is_none() {
                report.mothers_without_axis += 1;
            }
            let Some(mother_xy) = xy(&ctx.spots, *mother) else { continue };
            for link in &links {
                apply_link(&mut graph, &ctx.spots, mother_xy, plan.axis, link, config, &mut report);
            }
        }
    }

    for correction in apoptosis.values() {
        let removed = graph.remove_outgoing(correction.terminal).len();
        if removed > 0 {
            report.tracks_terminated += 1;
            report.links_removed += removed;
        }
    }

    graph.validate().map_err(CorrectionError::InvalidGraph)?;
    info!(
        "Reconciled: {} links added, {} removed, {} gated, {} excluded, {} tracks terminated",
        report.links_added,
        report.links_removed,
        report.rejected_by_gate,
        report.rejected_by_exclusion,
        report.tracks_terminated
    );
    Ok((graph, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::Fixture;
    use crate::graph::Spot;

    /// Mother elongated along x at frame 3; daughter A linked, daughter B
    /// on its own track starting at frame 4.
    fn missed_division(b_xy: [f64; 2], mother_radii: [f64; 2]) -> (Fixture, NodeId, NodeId, NodeId) {
        let mut fx = Fixture::new(64, 10);
        let early = fx.chain([30.0, 32.0], [0.0, 0.0], 0, 3);
        let mother = fx.add_cell([30.0, 32.0], 3, mother_radii, 0.0);
        fx.link(early[2], mother);
        let a = fx.chain([25.0, 31.0], [0.0, 0.0], 4, 4);
        fx.link(mother, a[0]);
        let b = fx.chain(b_xy, [0.0, 0.0], 4, 4);
        (fx, mother, a[0], b[0])
    }

    fn run(fx: &Fixture, mother: NodeId, config: &CorrectorConfig) -> (LineageGraph, ReconcileReport) {
        let (index, _) = fx.index();
        let tracks = fx.graph.tracks();
        let track = tracks.track_of(mother).unwrap();
        let mut division = BTreeMap::new();
        division.insert(
            track,
            DivisionCorrection { track, root: NodeId(0), mothers: vec![(mother, 3)] },
        );
        let spots = Arc::new(fx.spots.clone());
        reconcile(
            &fx.graph,
            fx.graph.clone(),
            &spots,
            &index,
            &division,
            &BTreeMap::new(),
            config,
            &WorkerPool::new(2),
        )
        .unwrap()
    }

    #[test]
    fn test_axis_from_elongated_mask() {
        let (fx, mother, _, _) = missed_division([35.0, 33.0], [5.0, 2.5]);
        let (index, _) = fx.index();
        let axis = estimate_axis(&index, fx.position(mother), 3).unwrap();
        assert!(axis[0].abs() > 0.95);
    }

    #[test]
    fn test_missed_division_is_inserted() {
        let (fx, mother, a, b) = missed_division([35.0, 33.0], [5.0, 2.5]);
        let (graph, report) = run(&fx, mother, &CorrectorConfig::default());
        assert!(graph.has_edge(mother, a));
        assert!(graph.has_edge(mother, b));
        assert_eq!(report.links_added, 1);
        assert_eq!(report.mothers_planned, 1);
        assert_eq!(report.mothers_without_axis, 0);
    }

    #[test]
    fn test_exclusion_rejects_same_side_daughter() {
        let (fx, mother, _, b) = missed_division([35.0, 30.0], [5.0, 2.5]);
        let (graph, report) = run(&fx, mother, &CorrectorConfig::default());
        assert!(!graph.has_edge(mother, b));
        assert_eq!(report.rejected_by_exclusion, 1);

        let config = CorrectorConfig { exclusion_principle: false, ..Default::default() };
        let (graph, _) = run(&fx, mother, &config);
        assert!(graph.has_edge(mother, b));
    }

    #[test]
    fn test_without_axis_links_are_accepted() {
        // Five-voxel mask: too small to fit an ellipse
        let (fx, mother, _, b) = missed_division([35.0, 30.0], [1.0, 1.0]);
        let (graph, report) = run(&fx, mother, &CorrectorConfig::default());
        assert_eq!(report.mothers_without_axis, 1);
        assert!(graph.has_edge(mother, b));
    }

    #[test]
    fn test_gate_rejects_expensive_links() {
        let (fx, mother, _, b) = missed_division([35.0, 33.0], [5.0, 2.5]);
        // Inside the radius, but cost 26 against a gate of 6² / 2
        let config = CorrectorConfig { search_radius: 6.0, ..Default::default() };
        let (graph, report) = run(&fx, mother, &config);
        assert!(!graph.has_edge(mother, b));
        assert_eq!(report.links_added, 0);
        assert!(report.rejected_by_gate >= 1);
    }

    #[test]
    fn test_third_child_replaces_same_side_sibling() {
        let mut spots = SpotStore::new();
        let mother = spots.add(Spot::new([10.0, 10.0, 0.0], 0, 2.0));
        let left = spots.add(Spot::new([6.0, 9.0, 0.0], 1, 2.0));
        let right = spots.add(Spot::new([14.0, 12.0, 0.0], 1, 2.0));
        let target = spots.add(Spot::new([14.0, 11.0, 0.0], 1, 2.0));
        let mut graph = LineageGraph::from_store(&spots);
        graph.add_edge(mother, left, 16.0).unwrap();
        graph.add_edge(mother, right, 20.0).unwrap();

        let mut report = ReconcileReport::default();
        let link = Assignment { source: mother, target, cost: 17.0 };
        let changed = apply_link(
            &mut graph,
            &spots,
            [10.0, 10.0],
            Some([1.0, 0.0]),
            &link,
            &CorrectorConfig::default(),
            &mut report,
        );
        assert!(changed);
        assert!(graph.has_edge(mother, left));
        assert!(graph.has_edge(mother, target));
        assert!(!graph.has_edge(mother, right));
        assert_eq!(report.links_removed, 1);
    }

    #[test]
    fn test_apoptosis_truncates_track() {
        let mut fx = Fixture::new(64, 10);
        let ids = fx.chain([10.0, 10.0], [1.0, 0.0], 0, 8);
        let (index, _) = fx.index();
        let mut apoptosis = BTreeMap::new();
        apoptosis.insert(
            TrackId(0),
            ApoptosisCorrection { track: TrackId(0), root: ids[0], terminal: ids[4], terminal_frame: 4 },
        );
        let (graph, report) = reconcile(
            &fx.graph,
            fx.graph.clone(),
            &Arc::new(fx.spots.clone()),
            &index,
            &BTreeMap::new(),
            &apoptosis,
            &CorrectorConfig::default(),
            &WorkerPool::new(1),
        )
        .unwrap();
        assert_eq!(graph.out_degree(ids[4]), 0);
        assert!(graph.has_edge(ids[3], ids[4]));
        assert!(graph.has_edge(ids[5], ids[6]));
        assert_eq!(report.tracks_terminated, 1);
    }
}
