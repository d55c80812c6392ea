//! Segmentation label lookup for events and track nodes.
//!
//! Every node of every track is sampled once at `floor(position / calibration)`
//! and registered under `(label, frame)`. An event is then tied to a track
//! by sampling the label under it and looking the pair up.

use lineage_env::{Calibration, LabelVolume, Voxel};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

use crate::graph::{NodeId, SpotStore, TrackId, TrackSet};

/// `(label, frame) -> (node, track)` index over one label volume.
#[derive(Clone)]
pub struct LabelIndex {
    volume: Arc<dyn LabelVolume>,
    calibration: Calibration,
    z_tolerant: bool,
    entries: BTreeMap<(u32, usize), (NodeId, TrackId)>,
}

impl std::fmt::Debug for LabelIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LabelIndex")
            .field("shape", &self.volume.shape())
            .field("n_frames", &self.volume.n_frames())
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl LabelIndex {
    /// Samples every tracked node. When two nodes share a label in one
    /// frame, the later one (by track, then handle) wins.
    pub fn build(
        volume: Arc<dyn LabelVolume>,
        calibration: Calibration,
        spots: &SpotStore,
        tracks: &TrackSet,
        z_tolerant: bool,
    ) -> Self {
        let mut index = Self {
            volume,
            calibration,
            z_tolerant,
            entries: BTreeMap::new(),
        };
        for (track, nodes) in tracks.iter() {
            for &node in nodes {
                let Some(spot) = spots.get(node) else { continue };
                let label = index.label_at(spot.position(), spot.frame());
                if label != 0 {
                    index.entries.insert((label, spot.frame()), (node, track));
                }
            }
        }
        debug!("label index: {} entries over {} tracks", index.entries.len(), tracks.len());
        index
    }

    pub fn volume(&self) -> &dyn LabelVolume {
        self.volume.as_ref()
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Last frame of the label volume.
    pub fn last_frame(&self) -> Option<usize> {
        self.volume.last_frame()
    }

    /// Label under a physical position, 0 if none.
    ///
    /// In 3-D with Z tolerance on, a background sample falls back to the
    /// largest label found anywhere in the voxel's Z column.
    pub fn label_at(&self, position: [f64; 3], frame: usize) -> u32 {
        let voxel = self.voxel_of(position);
        let label = self.volume.label(voxel, frame);
        if label != 0 || !self.z_tolerant || self.volume.ndim() < 3 {
            return label;
        }
        self.volume
            .column_max_label(voxel[0], voxel[1], frame)
            .unwrap_or(0)
    }

    fn voxel_of(&self, position: [f64; 3]) -> Voxel {
        let mut voxel = self.calibration.to_voxel(position);
        if self.volume.ndim() < 3 {
            voxel[2] = 0;
        }
        voxel
    }

    pub fn track_node_for(&self, label: u32, frame: usize) -> Option<(NodeId, TrackId)> {
        self.entries.get(&(label, frame)).copied()
    }

    /// Node and track owning the label under a position.
    pub fn resolve(&self, position: [f64; 3], frame: usize) -> Option<(NodeId, TrackId)> {
        match self.label_at(position, frame) {
            0 => None,
            label => self.track_node_for(label, frame),
        }
    }

    /// Voxels of the label under `position`, as offsets from the rounded
    /// voxel position of `position`.
    pub fn label_mask(&self, position: [f64; 3], frame: usize) -> Vec<Voxel> {
        let label = self.label_at(position, frame);
        if label == 0 {
            return Vec::new();
        }
        let cal = self.calibration.0;
        let mut center = [0i64; 3];
        for d in 0..3 {
            center[d] = (position[d] / cal[d]).round() as i64;
        }
        if self.volume.ndim() < 3 {
            center[2] = 0;
        }
        self.volume
            .voxels_with_label(label, frame)
            .into_iter()
            .map(|v| [v[0] - center[0], v[1] - center[1], v[2] - center[2]])
            .collect()
    }

    /// XY projection of [`label_mask`](Self::label_mask), one point per column.
    pub fn mask_points_xy(&self, position: [f64; 3], frame: usize) -> Vec<[f64; 2]> {
        let columns: BTreeSet<(i64, i64)> = self
            .label_mask(position, frame)
            .into_iter()
            .map(|v| (v[0], v[1]))
            .collect();
        columns.into_iter().map(|(x, y)| [x as f64, y as f64]).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{LineageGraph, Spot};
    use lineage_env::DenseLabelVolume;

    fn two_node_track(z: f64) -> (SpotStore, TrackSet) {
        let mut spots = SpotStore::new();
        let a = spots.add(Spot::new([10.0, 10.0, z], 0, 3.0));
        let b = spots.add(Spot::new([10.5, 10.0, z], 1, 3.0));
        let mut graph = LineageGraph::from_store(&spots);
        graph.add_edge(a, b, 1.0).unwrap();
        let tracks = graph.tracks();
        (spots, tracks)
    }

    #[test]
    fn test_resolve_event_to_track() {
        let mut volume = DenseLabelVolume::new([32, 32, 1], 3);
        volume.paint_ellipse(0, [10.0, 10.0], [3.0, 3.0], 0.0, 5);
        volume.paint_ellipse(1, [10.0, 10.0], [3.0, 3.0], 0.0, 8);
        let (spots, tracks) = two_node_track(0.0);
        let index = LabelIndex::build(Arc::new(volume), Calibration::unit(), &spots, &tracks, true);

        assert_eq!(index.len(), 2);
        assert_eq!(index.label_at([11.0, 9.0, 0.0], 0), 5);
        assert_eq!(index.resolve([11.0, 9.0, 0.0], 0), Some((NodeId(0), TrackId(0))));
        assert_eq!(index.resolve([11.0, 9.0, 0.0], 1), Some((NodeId(1), TrackId(0))));
        assert_eq!(index.resolve([25.0, 25.0, 0.0], 0), None);
        assert_eq!(index.last_frame(), Some(2));
    }

    #[test]
    fn test_z_column_fallback() {
        let mut volume = DenseLabelVolume::new([16, 16, 4], 2);
        volume.set([4, 4, 2], 0, 3).unwrap();
        volume.set([4, 4, 3], 0, 6).unwrap();
        let volume: Arc<dyn LabelVolume> = Arc::new(volume);
        let (spots, tracks) = two_node_track(0.0);

        let tolerant = LabelIndex::build(Arc::clone(&volume), Calibration::unit(), &spots, &tracks, true);
        assert_eq!(tolerant.label_at([4.2, 4.7, 0.0], 0), 6);

        let strict = LabelIndex::build(volume, Calibration::unit(), &spots, &tracks, false);
        assert_eq!(strict.label_at([4.2, 4.7, 0.0], 0), 0);
        assert_eq!(strict.label_at([4.2, 4.7, 2.0], 0), 3);
    }

    #[test]
    fn test_label_mask_offsets() {
        let mut volume = DenseLabelVolume::new([32, 32, 1], 1);
        let painted = volume.paint_ellipse(0, [16.0, 16.0], [4.0, 2.0], 0.0, 1);
        let (spots, tracks) = two_node_track(0.0);
        let index = LabelIndex::build(Arc::new(volume), Calibration::unit(), &spots, &tracks, true);

        let mask = index.label_mask([16.0, 16.0, 0.0], 0);
        assert_eq!(mask.len(), painted);
        assert!(mask.contains(&[0, 0, 0]));
        assert!(mask.contains(&[4, 0, 0]));
        assert!(!mask.contains(&[0, 4, 0]));
        assert_eq!(index.mask_points_xy([16.0, 16.0, 0.0], 0).len(), painted);
        assert!(index.label_mask([2.0, 2.0, 0.0], 0).is_empty());
    }
}
