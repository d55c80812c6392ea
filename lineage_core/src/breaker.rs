//! Removal of splits that no division event supports.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use crate::events::EventSet;
use crate::graph::{LineageGraph, NodeId, TrackId};
use crate::label_index::LabelIndex;
use crate::matcher::frame_in_range;
use crate::topology::TrackTopology;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BreakReport {
    /// Edges removed from the graph
    pub edges_removed: usize,

    /// Splits whose incident edges were removed
    pub broken_splits: BTreeSet<NodeId>,

    /// Tracks with at least one division event close to a split (or with
    /// no split at all)
    pub corroborated: BTreeSet<TrackId>,
}

/// Breaks splits that are not within `tolerance` frames of a division event.
///
/// A division event whose track has a split further than `tolerance` frames
/// away breaks that split immediately. Afterwards every split of every
/// track that no event corroborated is broken too.
pub fn break_unsupported_links(
    graph: &mut LineageGraph,
    division: &EventSet,
    index: &LabelIndex,
    topology: &BTreeMap<TrackId, TrackTopology>,
    tolerance: usize,
) -> BreakReport {
    let mut report = BreakReport::default();

    for (&frame, events) in division {
        if !frame_in_range(index, frame) {
            continue;
        }
        for event in events {
            let Some((_, track)) = index.resolve(event.position, frame) else {
                continue;
            };
            let Some(topo) = topology.get(&track) else { continue };
            match topo.closest_split(frame) {
                Some((split, distance)) if distance > tolerance => {
                    break_split(graph, split, &mut report);
                }
                _ => {
                    report.corroborated.insert(track);
                }
            }
        }
    }

    for (track, topo) in topology {
        if report.corroborated.contains(track) {
            continue;
        }
        for &(split, _) in &topo.splits {
            break_split(graph, split, &mut report);
        }
    }

    info!(
        "Broke {} splits ({} edges), {} tracks corroborated",
        report.broken_splits.len(),
        report.edges_removed,
        report.corroborated.len()
    );
    report
}

fn break_split(graph: &mut LineageGraph, split: NodeId, report: &mut BreakReport) {
    let removed = graph.remove_incident(split);
    if removed > 0 {
        debug!("breaking split {} ({} edges)", split, removed);
    }
    report.edges_removed += removed;
    report.broken_splits.insert(split);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use crate::fixtures::{event, event_set, Fixture};

    /// Mother frames 0..=2, split at frame 2, daughters frames 3..=14.
    fn dividing(fx: &mut Fixture) -> (Vec<NodeId>, Vec<NodeId>, Vec<NodeId>) {
        let mother = fx.chain([10.0, 32.0], [1.0, 0.0], 0, 3);
        let a = fx.chain([14.0, 24.0], [1.0, 0.0], 3, 12);
        let b = fx.chain([14.0, 40.0], [1.0, 0.0], 3, 12);
        fx.link(mother[2], a[0]);
        fx.link(mother[2], b[0]);
        (mother, a, b)
    }

    #[test]
    fn test_distant_event_breaks_split() {
        let mut fx = Fixture::new(64, 16);
        let (mother, a, _) = dividing(&mut fx);
        let (index, topology) = fx.index();

        // Split at frame 2, event at frame 14 on a daughter: 12 frames away
        let division = event_set(vec![event(EventKind::Division, 14, fx.position(a[11]))]);
        let mut graph = fx.graph.clone();
        let report = break_unsupported_links(&mut graph, &division, &index, &topology, 5);

        assert!(report.broken_splits.contains(&mother[2]));
        assert_eq!(report.edges_removed, 3);
        assert_eq!(graph.out_degree(mother[2]), 0);
        assert_eq!(graph.in_degree(mother[2]), 0);
        assert!(graph.has_edge(a[0], a[1]));
    }

    #[test]
    fn test_close_event_corroborates() {
        let mut fx = Fixture::new(64, 16);
        let (mother, _, b) = dividing(&mut fx);
        let (index, topology) = fx.index();
        let division = event_set(vec![event(EventKind::Division, 4, fx.position(b[1]))]);
        let mut graph = fx.graph.clone();
        let report = break_unsupported_links(&mut graph, &division, &index, &topology, 5);

        assert_eq!(report.edges_removed, 0);
        assert!(report.corroborated.contains(&TrackId(0)));
        assert_eq!(graph.out_degree(mother[2]), 2);
    }

    #[test]
    fn test_uncorroborated_track_loses_splits() {
        let mut fx = Fixture::new(64, 16);
        let (mother, _, _) = dividing(&mut fx);
        let (index, topology) = fx.index();
        let mut graph = fx.graph.clone();
        let report = break_unsupported_links(&mut graph, &EventSet::new(), &index, &topology, 5);

        assert!(report.corroborated.is_empty());
        assert!(report.broken_splits.contains(&mother[2]));
        assert_eq!(graph.edges_of(mother[2]).len(), 0);
    }

    #[test]
    fn test_track_without_splits_is_corroborated() {
        let mut fx = Fixture::new(64, 16);
        let ids = fx.chain([10.0, 10.0], [1.0, 0.0], 0, 6);
        let (index, topology) = fx.index();
        let division = event_set(vec![event(EventKind::Division, 3, fx.position(ids[3]))]);
        let mut graph = fx.graph.clone();
        let report = break_unsupported_links(&mut graph, &division, &index, &topology, 5);
        assert!(report.corroborated.contains(&TrackId(0)));
        assert_eq!(graph.edge_count(), 5);
    }
}
