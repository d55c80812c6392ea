//! Frame-partitioned event store with visibility marking.
//!
//! Visibility and feature filtering run one task per frame on a
//! [`WorkerPool`]; each task locks only its own frame. The caller waits up
//! to the pool's deadline and carries on with whatever was marked.

use lineage_env::{PoolOutcome, WorkerPool};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::events::{Event, EventSet};
use crate::graph::distance_squared;

/// Event attribute a [`FeatureFilter`] can test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventFeature {
    Score,
    Size,
    Confidence,
    Angle,
    Frame,
    PositionX,
    PositionY,
    PositionZ,
}

impl EventFeature {
    pub fn value(&self, event: &Event) -> f64 {
        match self {
            EventFeature::Score => event.score,
            EventFeature::Size => event.size,
            EventFeature::Confidence => event.confidence,
            EventFeature::Angle => event.angle,
            EventFeature::Frame => event.frame as f64,
            EventFeature::PositionX => event.position[0],
            EventFeature::PositionY => event.position[1],
            EventFeature::PositionZ => event.position[2],
        }
    }
}

/// Threshold test on one event feature.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureFilter {
    pub feature: EventFeature,
    pub threshold: f64,
    /// Keep values at or above the threshold (otherwise at or below)
    pub is_above: bool,
}

impl FeatureFilter {
    pub fn above(feature: EventFeature, threshold: f64) -> Self {
        Self { feature, threshold, is_above: true }
    }

    pub fn below(feature: EventFeature, threshold: f64) -> Self {
        Self { feature, threshold, is_above: false }
    }

    pub fn passes(&self, event: &Event) -> bool {
        let value = self.feature.value(event);
        if value.is_nan() {
            return false;
        }
        if self.is_above {
            value >= self.threshold
        } else {
            value <= self.threshold
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    event: Event,
    visible: bool,
}

type Frame = Arc<Mutex<Vec<Entry>>>;

fn lock(frame: &Frame) -> MutexGuard<'_, Vec<Entry>> {
    frame.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Events partitioned by frame, each with a visibility flag.
#[derive(Debug, Clone, Default)]
pub struct EventCollection {
    frames: BTreeMap<usize, Frame>,
}

impl EventCollection {
    /// Wraps an event set; every event starts visible.
    pub fn from_events(events: EventSet) -> Self {
        let frames = events
            .into_iter()
            .map(|(frame, list)| {
                let entries = list.into_iter().map(|event| Entry { event, visible: true }).collect();
                (frame, Arc::new(Mutex::new(entries)))
            })
            .collect();
        Self { frames }
    }

    pub fn frames(&self) -> impl Iterator<Item = usize> + '_ {
        self.frames.keys().copied()
    }

    /// Number of events, optionally only the visible ones.
    pub fn count(&self, visible_only: bool) -> usize {
        self.frames
            .values()
            .map(|frame| lock(frame).iter().filter(|e| !visible_only || e.visible).count())
            .sum()
    }

    /// Marks every event visible or hidden.
    pub fn set_visible(&self, pool: &WorkerPool, visible: bool) -> PoolOutcome {
        let tasks: Vec<_> = self
            .frames
            .values()
            .map(|frame| {
                let frame = Arc::clone(frame);
                move || {
                    for entry in lock(&frame).iter_mut() {
                        entry.visible = visible;
                    }
                }
            })
            .collect();
        pool.execute_all("event-visibility", tasks)
    }

    /// Marks events visible iff they pass every filter.
    ///
    /// An empty filter list makes everything visible.
    pub fn filter(&self, pool: &WorkerPool, filters: &[FeatureFilter]) -> PoolOutcome {
        let filters: Arc<[FeatureFilter]> = filters.into();
        let tasks: Vec<_> = self
            .frames
            .values()
            .map(|frame| {
                let frame = Arc::clone(frame);
                let filters = Arc::clone(&filters);
                move || {
                    for entry in lock(&frame).iter_mut() {
                        entry.visible = filters.iter().all(|f| f.passes(&entry.event));
                    }
                }
            })
            .collect();
        pool.execute_all("event-filter", tasks)
    }

    /// Snapshot of the visible events, grouped by frame.
    pub fn visible_events(&self) -> EventSet {
        self.frames
            .iter()
            .filter_map(|(&frame, entries)| {
                let visible: Vec<Event> = lock(entries)
                    .iter()
                    .filter(|e| e.visible)
                    .map(|e| e.event.clone())
                    .collect();
                (!visible.is_empty()).then_some((frame, visible))
            })
            .collect()
    }

    /// Closest event to a position in a frame.
    pub fn closest(&self, position: [f64; 3], frame: usize, visible_only: bool) -> Option<Event> {
        let entries = lock(self.frames.get(&frame)?);
        let closest = entries
            .iter()
            .filter(|e| !visible_only || e.visible)
            .min_by(|a, b| {
                distance_squared(a.event.position, position)
                    .total_cmp(&distance_squared(b.event.position, position))
            })
            .map(|e| e.event.clone());
        closest
    }
}
