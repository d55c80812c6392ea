//! Per-track root and split analysis.

use std::collections::BTreeMap;

use crate::graph::{LineageGraph, NodeId, TrackId, TrackSet};

/// Root and splits of one track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackTopology {
    /// Node that is never an edge target
    pub root: NodeId,

    pub root_frame: usize,

    /// Nodes with two or more outgoing edges, sorted by frame
    pub splits: Vec<(NodeId, usize)>,
}

impl TrackTopology {
    /// Split closest in time to `frame`, with its absolute frame distance.
    ///
    /// Ties keep the earlier split.
    pub fn closest_split(&self, frame: usize) -> Option<(NodeId, usize)> {
        let mut best: Option<(NodeId, usize)> = None;
        for &(node, split_frame) in &self.splits {
            let distance = split_frame.abs_diff(frame);
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((node, distance));
            }
        }
        best
    }

    /// Whether some split lies within `tolerance` frames of `frame`.
    pub fn has_split_near(&self, frame: usize, tolerance: usize) -> bool {
        self.closest_split(frame)
            .map_or(false, |(_, distance)| distance <= tolerance)
    }
}

/// Computes root and splits for every track.
///
/// Tracks with more than one root (merges) report the root in the
/// earliest frame.
pub fn analyze(graph: &LineageGraph, tracks: &TrackSet) -> BTreeMap<TrackId, TrackTopology> {
    let mut topology = BTreeMap::new();
    for (track, nodes) in tracks.iter() {
        let frame = |n: NodeId| graph.frame_of(n).unwrap_or(usize::MAX);

        let root = nodes
            .iter()
            .copied()
            .filter(|&n| graph.in_degree(n) == 0)
            .min_by_key(|&n| (frame(n), n));
        let Some(root) = root else { continue };
        let root_frame = frame(root);

        let mut splits: Vec<(NodeId, usize)> = nodes
            .iter()
            .copied()
            .filter(|&n| graph.out_degree(n) >= 2)
            .map(|n| (n, frame(n)))
            .collect();
        splits.sort_by_key(|&(n, f)| (f, n));

        topology.insert(track, TrackTopology { root, root_frame, splits });
    }
    topology
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Spot, SpotStore};

    /// mother chain 0..=2, split at frame 2 into two daughters of length 2
    fn dividing() -> (LineageGraph, Vec<NodeId>) {
        let mut spots = SpotStore::new();
        let frames = [0, 1, 2, 3, 4, 3, 4];
        let ids: Vec<NodeId> = frames
            .iter()
            .map(|&f| spots.add(Spot::new([0.0; 3], f, 1.0)))
            .collect();
        let mut graph = LineageGraph::from_store(&spots);
        for (s, t) in [(0, 1), (1, 2), (2, 3), (3, 4), (2, 5), (5, 6)] {
            graph.add_edge(ids[s], ids[t], 1.0).unwrap();
        }
        (graph, ids)
    }

    #[test]
    fn test_root_and_split() {
        let (graph, ids) = dividing();
        let tracks = graph.tracks();
        let topology = analyze(&graph, &tracks);
        let track = &topology[&TrackId(0)];
        assert_eq!(track.root, ids[0]);
        assert_eq!(track.root_frame, 0);
        assert_eq!(track.splits, vec![(ids[2], 2)]);
        assert!(track.has_split_near(5, 3));
        assert!(!track.has_split_near(6, 3));
    }

    #[test]
    fn test_closest_split_ties_keep_earlier() {
        let topology = TrackTopology {
            root: NodeId(0),
            root_frame: 0,
            splits: vec![(NodeId(3), 4), (NodeId(9), 8)],
        };
        assert_eq!(topology.closest_split(6), Some((NodeId(3), 2)));
        assert_eq!(topology.closest_split(7), Some((NodeId(9), 1)));
        assert_eq!(topology.closest_split(0), Some((NodeId(3), 4)));

        let empty = TrackTopology { root: NodeId(0), root_frame: 0, splits: Vec::new() };
        assert_eq!(empty.closest_split(3), None);
    }
}
