//! Spot store and lineage graph.
//!
//! Nodes are integer handles into a contiguous [`SpotStore`]. The
//! [`LineageGraph`] only holds handles, frames and weighted edges; geometry
//! and features stay in the store so the graph can be copied cheaply for
//! each correction pass.
//!
//! Every edge points forward in time: `frame(source) < frame(target)`.
//! Tracks are the weakly connected components that contain at least one
//! edge.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

// ============================================================================
// HANDLES
// ============================================================================

/// Stable handle of a spot in the [`SpotStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

/// Identifier of a track within one [`TrackSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackId(pub u32);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "n{}", self.0)
    }
}

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "t{}", self.0)
    }
}

// ============================================================================
// SPOTS
// ============================================================================

/// A detected object in one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spot {
    /// Physical position [x, y, z]; z = 0 for 2-D data
    position: [f64; 3],

    /// Time frame
    frame: usize,

    /// Object radius (physical units)
    pub radius: f64,

    /// Detector quality
    pub quality: f64,

    /// Named scalar features (intensity, area, ...)
    pub features: BTreeMap<String, f64>,
}

impl Spot {
    pub fn new(position: [f64; 3], frame: usize, radius: f64) -> Self {
        Self {
            position,
            frame,
            radius,
            quality: 1.0,
            features: BTreeMap::new(),
        }
    }

    pub fn with_feature(mut self, name: impl Into<String>, value: f64) -> Self {
        self.features.insert(name.into(), value);
        self
    }

    pub fn position(&self) -> [f64; 3] {
        self.position
    }

    pub fn frame(&self) -> usize {
        self.frame
    }

    pub fn feature(&self, name: &str) -> Option<f64> {
        self.features.get(name).copied()
    }

    /// Squared Euclidean distance to another spot.
    pub fn distance_squared(&self, other: &Spot) -> f64 {
        distance_squared(self.position, other.position)
    }
}

/// Squared Euclidean distance between two positions.
pub fn distance_squared(a: [f64; 3], b: [f64; 3]) -> f64 {
    (0..3).map(|d| (a[d] - b[d]).powi(2)).sum()
}

/// Contiguous, append-only spot storage with a per-frame index.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpotStore {
    spots: Vec<Spot>,
    by_frame: BTreeMap<usize, Vec<NodeId>>,
}

impl SpotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a spot and returns its handle.
    pub fn add(&mut self, spot: Spot) -> NodeId {
        let id = NodeId(self.spots.len() as u32);
        self.by_frame.entry(spot.frame).or_default().push(id);
        self.spots.push(spot);
        id
    }

    pub fn get(&self, id: NodeId) -> Option<&Spot> {
        self.spots.get(id.0 as usize)
    }

    /// Sets a feature value. Position and frame stay immutable.
    pub fn set_feature(&mut self, id: NodeId, name: impl Into<String>, value: f64) -> bool {
        match self.spots.get_mut(id.0 as usize) {
            Some(spot) => {
                spot.features.insert(name.into(), value);
                true
            }
            None => false,
        }
    }

    /// Handles of all spots in a frame, in insertion order.
    pub fn in_frame(&self, frame: usize) -> &[NodeId] {
        self.by_frame.get(&frame).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.spots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Spot)> {
        self.spots
            .iter()
            .enumerate()
            .map(|(i, spot)| (NodeId(i as u32), spot))
    }

    /// Largest frame holding a spot.
    pub fn last_frame(&self) -> Option<usize> {
        self.by_frame.keys().next_back().copied()
    }
}

// ============================================================================
// LINEAGE GRAPH
// ============================================================================

/// A weighted, time-directed edge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: NodeId,
    pub target: NodeId,
    pub weight: f64,
}

/// Simple directed graph over spot handles, edges pointing forward in time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LineageGraph {
    frames: BTreeMap<NodeId, usize>,
    outgoing: BTreeMap<NodeId, BTreeMap<NodeId, f64>>,
    incoming: BTreeMap<NodeId, BTreeSet<NodeId>>,
}

impl LineageGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an edgeless graph containing every spot of the store.
    pub fn from_store(spots: &SpotStore) -> Self {
        let mut graph = Self::new();
        for (id, spot) in spots.iter() {
            graph.add_node(id, spot.frame());
        }
        graph
    }

    /// Adds a node. Returns false if it already existed.
    pub fn add_node(&mut self, id: NodeId, frame: usize) -> bool {
        if self.frames.contains_key(&id) {
            return false;
        }
        self.frames.insert(id, frame);
        true
    }

    pub fn contains_node(&self, id: NodeId) -> bool {
        self.frames.contains_key(&id)
    }

    pub fn frame_of(&self, id: NodeId) -> Option<usize> {
        self.frames.get(&id).copied()
    }

    pub fn node_count(&self) -> usize {
        self.frames.len()
    }

    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.frames.keys().copied()
    }

    /// Inserts an edge.
    ///
    /// Returns `Ok(false)` if the edge already exists (the weight is kept).
    pub fn add_edge(&mut self, source: NodeId, target: NodeId, weight: f64) -> Result<bool, GraphError> {
        let source_frame = self.frame_of(source).ok_or(GraphError::UnknownNode(source))?;
        let target_frame = self.frame_of(target).ok_or(GraphError::UnknownNode(target))?;
        if source == target {
            return Err(GraphError::SelfLoop(source));
        }
        if source_frame >= target_frame {
            return Err(GraphError::NonTemporal {
                source,
                target,
                source_frame,
                target_frame,
            });
        }
        if !weight.is_finite() || weight < 0.0 {
            return Err(GraphError::InvalidWeight { source, target, weight });
        }
        if self.has_edge(source, target) {
            return Ok(false);
        }
        self.outgoing.entry(source).or_default().insert(target, weight);
        self.incoming.entry(target).or_default().insert(source);
        Ok(true)
    }

    /// Removes an edge, returning its weight if it existed.
    pub fn remove_edge(&mut self, source: NodeId, target: NodeId) -> Option<f64> {
        let weight = self.outgoing.get_mut(&source)?.remove(&target)?;
        if self.outgoing.get(&source).map_or(false, BTreeMap::is_empty) {
            self.outgoing.remove(&source);
        }
        if let Some(preds) = self.incoming.get_mut(&target) {
            preds.remove(&source);
            if preds.is_empty() {
                self.incoming.remove(&target);
            }
        }
        Some(weight)
    }

    /// Removes every edge whose target is `node`. Returns the removed sources.
    pub fn remove_incoming(&mut self, node: NodeId) -> Vec<NodeId> {
        let sources = self.predecessors(node);
        for &source in &sources {
            self.remove_edge(source, node);
        }
        sources
    }

    /// Removes every edge whose source is `node`. Returns the removed targets.
    pub fn remove_outgoing(&mut self, node: NodeId) -> Vec<NodeId> {
        let targets = self.successors(node);
        for &target in &targets {
            self.remove_edge(node, target);
        }
        targets
    }

    /// Removes every edge touching `node`. Returns how many were removed.
    pub fn remove_incident(&mut self, node: NodeId) -> usize {
        self.remove_incoming(node).len() + self.remove_outgoing(node).len()
    }

    pub fn has_edge(&self, source: NodeId, target: NodeId) -> bool {
        self.outgoing
            .get(&source)
            .map_or(false, |targets| targets.contains_key(&target))
    }

    pub fn weight(&self, source: NodeId, target: NodeId) -> Option<f64> {
        self.outgoing.get(&source)?.get(&target).copied()
    }

    /// Children of a node, in handle order.
    pub fn successors(&self, node: NodeId) -> Vec<NodeId> {
        self.outgoing
            .get(&node)
            .map(|targets| targets.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Parents of a node, in handle order.
    pub fn predecessors(&self, node: NodeId) -> Vec<NodeId> {
        self.incoming
            .get(&node)
            .map(|sources| sources.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn out_degree(&self, node: NodeId) -> usize {
        self.outgoing.get(&node).map_or(0, BTreeMap::len)
    }

    pub fn in_degree(&self, node: NodeId) -> usize {
        self.incoming.get(&node).map_or(0, BTreeSet::len)
    }

    pub fn edge_count(&self) -> usize {
        self.outgoing.values().map(BTreeMap::len).sum()
    }

    /// All edges, ordered by (source, target).
    pub fn edges(&self) -> Vec<Edge> {
        self.outgoing
            .iter()
            .flat_map(|(&source, targets)| {
                targets.iter().map(move |(&target, &weight)| Edge { source, target, weight })
            })
            .collect()
    }

    /// All edges touching a node.
    pub fn edges_of(&self, node: NodeId) -> Vec<Edge> {
        let mut edges: Vec<Edge> = self
            .predecessors(node)
            .into_iter()
            .filter_map(|source| {
                self.weight(source, node).map(|weight| Edge { source, target: node, weight })
            })
            .collect();
        if let Some(targets) = self.outgoing.get(&node) {
            edges.extend(
                targets
                    .iter()
                    .map(|(&target, &weight)| Edge { source: node, target, weight }),
            );
        }
        edges
    }

    /// Checks that every edge joins known nodes forward in time.
    pub fn validate(&self) -> Result<(), GraphError> {
        for edge in self.edges() {
            let source_frame = self.frame_of(edge.source).ok_or(GraphError::UnknownNode(edge.source))?;
            let target_frame = self.frame_of(edge.target).ok_or(GraphError::UnknownNode(edge.target))?;
            if source_frame >= target_frame {
                return Err(GraphError::NonTemporal {
                    source: edge.source,
                    target: edge.target,
                    source_frame,
                    target_frame,
                });
            }
        }
        Ok(())
    }

    /// Weakly connected components with at least one edge.
    ///
    /// Track ids are assigned in ascending order of each component's
    /// smallest node handle, so they are stable for an unchanged graph.
    pub fn tracks(&self) -> TrackSet {
        let mut set = TrackSet::default();
        let mut visited: BTreeSet<NodeId> = BTreeSet::new();

        for start in self.nodes() {
            if visited.contains(&start) || (self.out_degree(start) == 0 && self.in_degree(start) == 0) {
                continue;
            }
            let id = TrackId(set.tracks.len() as u32);
            let mut members = BTreeSet::new();
            let mut queue = VecDeque::from([start]);
            visited.insert(start);

            while let Some(node) = queue.pop_front() {
                members.insert(node);
                for next in self.successors(node).into_iter().chain(self.predecessors(node)) {
                    if visited.insert(next) {
                        queue.push_back(next);
                    }
                }
            }

            for &node in &members {
                set.node_track.insert(node, id);
            }
            set.tracks.insert(id, members.into_iter().collect());
        }
        set
    }
}

// ============================================================================
// TRACKS
// ============================================================================

/// Track decomposition of a [`LineageGraph`] at one point in time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackSet {
    tracks: BTreeMap<TrackId, Vec<NodeId>>,
    node_track: BTreeMap<NodeId, TrackId>,
}

impl TrackSet {
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Track containing a node, if the node has any edge.
    pub fn track_of(&self, node: NodeId) -> Option<TrackId> {
        self.node_track.get(&node).copied()
    }

    /// Nodes of a track, in handle order.
    pub fn nodes(&self, track: TrackId) -> &[NodeId] {
        self.tracks.get(&track).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn ids(&self) -> impl Iterator<Item = TrackId> + '_ {
        self.tracks.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TrackId, &[NodeId])> {
        self.tracks.iter().map(|(&id, nodes)| (id, nodes.as_slice()))
    }
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum GraphError {
    UnknownNode(NodeId),

    SelfLoop(NodeId),

    NonTemporal {
        source: NodeId,
        target: NodeId,
        source_frame: usize,
        target_frame: usize,
    },

    InvalidWeight { source: NodeId, target: NodeId, weight: f64 },
}

// Display/Error are implemented by hand because thiserror treats any field
// named `source` as the error's cause, which `NodeId` is not.
impl std::fmt::Display for GraphError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GraphError::UnknownNode(id) => write!(f, "Unknown node: {}", id),
            GraphError::SelfLoop(id) => write!(f, "Self loop on {}", id),
            GraphError::NonTemporal {
                source,
                target,
                source_frame,
                target_frame,
            } => write!(
                f,
                "Edge {} -> {} does not go forward in time ({} -> {})",
                source, target, source_frame, target_frame
            ),
            GraphError::InvalidWeight {
                source,
                target,
                weight,
            } => write!(f, "Edge {} -> {} has invalid weight {}", source, target, weight),
        }
    }
}

impl std::error::Error for GraphError {}

// ============================================================================
// TESTS
// ============================================================================
