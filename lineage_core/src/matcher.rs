//! Event-to-track matching.
//!
//! Each event is tied to the track owning the segmentation label under it.
//! A division event on a track that already splits within `tolerance`
//! frames verifies that track; otherwise the matched node becomes a mother
//! candidate for re-linking. Apoptosis events pick one terminal node per
//! track.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::events::EventSet;
use crate::graph::{NodeId, TrackId};
use crate::label_index::LabelIndex;
use crate::topology::TrackTopology;

/// A track whose divisions the tracker missed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DivisionCorrection {
    pub track: TrackId,
    pub root: NodeId,

    /// Nodes that should divide, deduplicated, sorted by frame
    pub mothers: Vec<(NodeId, usize)>,
}

/// A track that should end at a death event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApoptosisCorrection {
    pub track: TrackId,
    pub root: NodeId,
    pub terminal: NodeId,
    pub terminal_frame: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MatchOutcome {
    pub division: BTreeMap<TrackId, DivisionCorrection>,
    pub apoptosis: BTreeMap<TrackId, ApoptosisCorrection>,

    /// Tracks whose own splits agree with a division event
    pub verified: BTreeSet<TrackId>,

    /// Events that landed on background or on an untracked label
    pub unmatched: usize,

    /// Events at or past the last frame
    pub out_of_range: usize,
}

/// Whether events in `frame` may be matched at all.
pub(crate) fn frame_in_range(index: &LabelIndex, frame: usize) -> bool {
    index.last_frame().map_or(false, |last| frame < last)
}

/// Matches division and apoptosis events against the tracks.
pub fn match_events(
    division: &EventSet,
    apoptosis: &EventSet,
    index: &LabelIndex,
    topology: &BTreeMap<TrackId, TrackTopology>,
    tolerance: usize,
) -> MatchOutcome {
    let mut outcome = MatchOutcome::default();

    for (&frame, events) in division {
        if !frame_in_range(index, frame) {
            outcome.out_of_range += events.len();
            continue;
        }
        for event in events {
            let Some((node, track)) = index.resolve(event.position, frame) else {
                outcome.unmatched += 1;
                continue;
            };
            let Some(topo) = topology.get(&track) else {
                outcome.unmatched += 1;
                continue;
            };
            if topo.has_split_near(frame, tolerance) {
                outcome.verified.insert(track);
                continue;
            }
            let correction = outcome.division.entry(track).or_insert_with(|| DivisionCorrection {
                track,
                root: topo.root,
                mothers: Vec::new(),
            });
            if !correction.mothers.iter().any(|&(n, _)| n == node) {
                correction.mothers.push((node, frame));
            }
        }
    }
    for correction in outcome.division.values_mut() {
        correction.mothers.sort_by_key(|&(n, f)| (f, n));
    }

    for (&frame, events) in apoptosis {
        if !frame_in_range(index, frame) {
            outcome.out_of_range += events.len();
            continue;
        }
        for event in events {
            let Some((node, track)) = index.resolve(event.position, frame) else {
                outcome.unmatched += 1;
                continue;
            };
            let Some(topo) = topology.get(&track) else {
                outcome.unmatched += 1;
                continue;
            };
            let distance = frame as i64 - topo.root_frame as i64;
            let closer = outcome
                .apoptosis
                .get(&track)
                .map_or(true, |c| distance < c.terminal_frame as i64 - topo.root_frame as i64);
            if closer {
                outcome.apoptosis.insert(
                    track,
                    ApoptosisCorrection {
                        track,
                        root: topo.root,
                        terminal: node,
                        terminal_frame: frame,
                    },
                );
            }
        }
    }

    debug!(
        "matched: {} division tracks, {} verified, {} apoptosis tracks, {} unmatched, {} out of range",
        outcome.division.len(),
        outcome.verified.len(),
        outcome.apoptosis.len(),
        outcome.unmatched,
        outcome.out_of_range
    );
    outcome
}
