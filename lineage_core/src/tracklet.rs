//! Detaching short dangling branches.
//!
//! A branch is the path from a split's child down to a track end. Branches
//! covering at most `min_length` frames are cut off at the split; their
//! nodes stay in the graph as isolated tracklets.

use tracing::debug;

use crate::graph::{LineageGraph, NodeId};

/// First node of the branch ending at `end`, and the split above it.
fn branch_start(graph: &LineageGraph, end: NodeId) -> Option<(NodeId, NodeId)> {
    let mut node = end;
    loop {
        let parents = graph.predecessors(node);
        let [parent] = parents.as_slice() else {
            // Root or merge
            return None;
        };
        if graph.out_degree(*parent) >= 2 {
            return Some((*parent, node));
        }
        node = *parent;
    }
}

/// Removes split → branch edges of branches spanning ≤ `min_length` frames.
///
/// All branches are measured on the graph as given before any edge is
/// removed. Returns the number of edges removed; `0` disables pruning.
pub fn prune_tracklets(graph: &mut LineageGraph, min_length: usize) -> usize {
    if min_length == 0 {
        return 0;
    }

    let ends: Vec<NodeId> = graph
        .nodes()
        .filter(|&n| graph.out_degree(n) == 0 && graph.in_degree(n) > 0)
        .collect();

    let mut cuts = Vec::new();
    for end in ends {
        let Some((split, first)) = branch_start(graph, end) else { continue };
        let (Some(start_frame), Some(end_frame)) = (graph.frame_of(first), graph.frame_of(end)) else {
            continue;
        };
        let span = end_frame - start_frame + 1;
        if span <= min_length {
            debug!("pruning {}-frame branch {} -> {}", span, split, first);
            cuts.push((split, first));
        }
    }

    cuts.into_iter()
        .filter(|&(split, first)| graph.remove_edge(split, first).is_some())
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Spot, SpotStore};

    /// Main chain over frames 0..8 splitting at frame 2 into a branch of
    /// `branch_len` nodes.
    fn split_track(branch_len: usize) -> (LineageGraph, Vec<NodeId>, Vec<NodeId>) {
        let mut spots = SpotStore::new();
        let main: Vec<NodeId> = (0..8).map(|f| spots.add(Spot::new([f as f64, 0.0, 0.0], f, 1.0))).collect();
        let branch: Vec<NodeId> = (0..branch_len)
            .map(|i| spots.add(Spot::new([i as f64, 5.0, 0.0], 3 + i, 1.0)))
            .collect();
        let mut graph = LineageGraph::from_store(&spots);
        for pair in main.windows(2) {
            graph.add_edge(pair[0], pair[1], 1.0).unwrap();
        }
        graph.add_edge(main[2], branch[0], 1.0).unwrap();
        for pair in branch.windows(2) {
            graph.add_edge(pair[0], pair[1], 1.0).unwrap();
        }
        (graph, main, branch)
    }

    #[test]
    fn test_short_branch_is_detached() {
        let (mut graph, main, branch) = split_track(2);
        assert_eq!(prune_tracklets(&mut graph, 2), 1);
        assert!(!graph.has_edge(main[2], branch[0]));
        assert!(graph.has_edge(branch[0], branch[1]));
        assert!(graph.has_edge(main[2], main[3]));
        assert_eq!(graph.node_count(), 10);
    }

    #[test]
    fn test_long_branch_is_kept() {
        let (mut graph, main, branch) = split_track(3);
        assert_eq!(prune_tracklets(&mut graph, 2), 0);
        assert!(graph.has_edge(main[2], branch[0]));
    }

    #[test]
    fn test_zero_disables_pruning() {
        let (mut graph, _, _) = split_track(1);
        let before = graph.edge_count();
        assert_eq!(prune_tracklets(&mut graph, 0), 0);
        assert_eq!(graph.edge_count(), before);
    }

    #[test]
    fn test_track_without_splits_is_untouched() {
        let mut spots = SpotStore::new();
        let a = spots.add(Spot::new([0.0; 3], 0, 1.0));
        let b = spots.add(Spot::new([1.0, 0.0, 0.0], 1, 1.0));
        let mut graph = LineageGraph::from_store(&spots);
        graph.add_edge(a, b, 1.0).unwrap();
        assert_eq!(prune_tracklets(&mut graph, 10), 0);
        assert!(graph.has_edge(a, b));
    }
}
