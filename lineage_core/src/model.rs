//! Host tracking model.
//!
//! The correction engine reads a [`TrackModel`] freely but only replaces its
//! graph inside an update bracket opened with [`TrackModel::begin_update`].
//! The bracket closes when the returned guard is dropped.

use thiserror::Error;
use tracing::debug;

use crate::graph::{GraphError, LineageGraph, NodeId, SpotStore};

/// Spots plus the lineage graph connecting them.
#[derive(Debug, Clone, Default)]
pub struct TrackModel {
    spots: SpotStore,
    graph: LineageGraph,
    update_depth: usize,
    revision: u64,
}

impl TrackModel {
    /// Creates a model, checking that the graph only references stored
    /// spots at their recorded frames.
    pub fn new(spots: SpotStore, graph: LineageGraph) -> Result<Self, ModelError> {
        check_graph(&spots, &graph)?;
        Ok(Self {
            spots,
            graph,
            update_depth: 0,
            revision: 0,
        })
    }

    pub fn spots(&self) -> &SpotStore {
        &self.spots
    }

    pub fn graph(&self) -> &LineageGraph {
        &self.graph
    }

    /// Number of committed graph replacements.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn is_updating(&self) -> bool {
        self.update_depth > 0
    }

    /// Opens an update bracket.
    pub fn begin_update(&mut self) -> ModelUpdate<'_> {
        self.update_depth += 1;
        debug!("model update opened (depth {})", self.update_depth);
        ModelUpdate { model: self }
    }
}

/// Open update bracket on a [`TrackModel`]; closes on drop.
#[derive(Debug)]
pub struct ModelUpdate<'a> {
    model: &'a mut TrackModel,
}

impl ModelUpdate<'_> {
    pub fn spots(&self) -> &SpotStore {
        &self.model.spots
    }

    pub fn graph(&self) -> &LineageGraph {
        &self.model.graph
    }

    /// Replaces the whole graph. On error the model keeps its old graph.
    pub fn set_tracks(&mut self, graph: LineageGraph) -> Result<(), ModelError> {
        check_graph(&self.model.spots, &graph)?;
        self.model.graph = graph;
        self.model.revision += 1;
        Ok(())
    }
}

impl Drop for ModelUpdate<'_> {
    fn drop(&mut self) {
        self.model.update_depth -= 1;
        debug!("model update closed (revision {})", self.model.revision);
    }
}

fn check_graph(spots: &SpotStore, graph: &LineageGraph) -> Result<(), ModelError> {
    for node in graph.nodes() {
        let spot = spots.get(node).ok_or(ModelError::UnknownNode(node))?;
        let frame = graph.frame_of(node).unwrap_or(spot.frame());
        if frame != spot.frame() {
            return Err(ModelError::FrameMismatch {
                node,
                expected: spot.frame(),
                got: frame,
            });
        }
    }
    graph.validate()?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("Graph references unknown spot {0}")]
    UnknownNode(NodeId),

    #[error("Spot {node} is in frame {expected} but the graph says {got}")]
    FrameMismatch { node: NodeId, expected: usize, got: usize },

    #[error(transparent)]
    Graph(#[from] GraphError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Spot;

    fn small_model() -> TrackModel {
        let mut spots = SpotStore::new();
        let a = spots.add(Spot::new([0.0; 3], 0, 1.0));
        let b = spots.add(Spot::new([1.0, 0.0, 0.0], 1, 1.0));
        let mut graph = LineageGraph::from_store(&spots);
        graph.add_edge(a, b, 1.0).unwrap();
        TrackModel::new(spots, graph).unwrap()
    }

    #[test]
    fn test_update_bracket_depth() {
        let mut model = small_model();
        assert!(!model.is_updating());
        {
            let mut update = model.begin_update();
            let graph = LineageGraph::from_store(update.spots());
            update.set_tracks(graph).unwrap();
        }
        assert!(!model.is_updating());
        assert_eq!(model.revision(), 1);
        assert_eq!(model.graph().edge_count(), 0);
    }

    #[test]
    fn test_rejects_unknown_node() {
        let mut model = small_model();
        let mut graph = model.graph().clone();
        graph.add_node(NodeId(42), 3);
        let result = model.begin_update().set_tracks(graph);
        assert_eq!(result, Err(ModelError::UnknownNode(NodeId(42))));
        assert_eq!(model.revision(), 0);
        assert_eq!(model.graph().edge_count(), 1);
    }

    #[test]
    fn test_rejects_frame_mismatch() {
        let mut spots = SpotStore::new();
        let a = spots.add(Spot::new([0.0; 3], 0, 1.0));
        let mut graph = LineageGraph::new();
        graph.add_node(a, 7);
        assert!(matches!(
            TrackModel::new(spots, graph),
            Err(ModelError::FrameMismatch { .. })
        ));
    }
}
