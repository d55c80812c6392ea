//! Shared test fixtures: small painted lineages.

use lineage_env::{Calibration, DenseLabelVolume, LabelVolume};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::events::{Event, EventKind, EventSet};
use crate::graph::{LineageGraph, NodeId, Spot, SpotStore, TrackId};
use crate::label_index::LabelIndex;
use crate::model::TrackModel;
use crate::topology::{analyze, TrackTopology};

/// Spots, graph and a label volume with one painted object per spot.
pub(crate) struct Fixture {
    pub spots: SpotStore,
    pub graph: LineageGraph,
    pub volume: DenseLabelVolume,
    next_label: u32,
}

impl Fixture {
    pub fn new(size: usize, n_frames: usize) -> Self {
        Self {
            spots: SpotStore::new(),
            graph: LineageGraph::new(),
            volume: DenseLabelVolume::new([size, size, 1], n_frames),
            next_label: 1,
        }
    }

    /// Adds a round cell.
    pub fn add(&mut self, xy: [f64; 2], frame: usize) -> NodeId {
        self.add_cell(xy, frame, [2.5, 2.5], 0.0)
    }

    /// Adds a cell painted as a rotated ellipse.
    pub fn add_cell(&mut self, xy: [f64; 2], frame: usize, radii: [f64; 2], angle: f64) -> NodeId {
        let id = self.spots.add(Spot::new([xy[0], xy[1], 0.0], frame, radii[0].max(radii[1])));
        self.graph.add_node(id, frame);
        self.volume.paint_ellipse(frame, xy, radii, angle, self.next_label);
        self.next_label += 1;
        id
    }

    pub fn link(&mut self, source: NodeId, target: NodeId) {
        let cost = self.spots.get(source).unwrap().distance_squared(self.spots.get(target).unwrap());
        self.graph.add_edge(source, target, cost).unwrap();
    }

    /// Linked chain of round cells moving by `step` per frame.
    pub fn chain(&mut self, start: [f64; 2], step: [f64; 2], first_frame: usize, len: usize) -> Vec<NodeId> {
        let ids: Vec<NodeId> = (0..len)
            .map(|i| {
                let xy = [start[0] + step[0] * i as f64, start[1] + step[1] * i as f64];
                self.add(xy, first_frame + i)
            })
            .collect();
        for pair in ids.windows(2) {
            self.link(pair[0], pair[1]);
        }
        ids
    }

    pub fn volume_arc(&self) -> Arc<dyn LabelVolume> {
        Arc::new(self.volume.clone())
    }

    pub fn index(&self) -> (LabelIndex, BTreeMap<TrackId, TrackTopology>) {
        let tracks = self.graph.tracks();
        let topology = analyze(&self.graph, &tracks);
        let index = LabelIndex::build(self.volume_arc(), Calibration::unit(), &self.spots, &tracks, true);
        (index, topology)
    }

    pub fn model(&self) -> TrackModel {
        TrackModel::new(self.spots.clone(), self.graph.clone()).unwrap()
    }

    pub fn position(&self, node: NodeId) -> [f64; 3] {
        self.spots.get(node).unwrap().position()
    }
}

pub(crate) fn event(kind: EventKind, frame: usize, position: [f64; 3]) -> Event {
    Event {
        kind,
        frame,
        position,
        score: 1.0,
        size: 20.0,
        confidence: 1.0,
        angle: 0.0,
    }
}

pub(crate) fn event_set(events: Vec<Event>) -> EventSet {
    let mut set = EventSet::new();
    for event in events {
        set.entry(event.frame).or_default().push(event);
    }
    set
}
