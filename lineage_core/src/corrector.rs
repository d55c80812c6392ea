//! One correction pass over a [`TrackModel`].
//!
//! ```text
//!   tracks ─▶ topology ─▶ label index ─▶ match ─▶ break ─▶ reconcile ─▶ prune ─▶ commit
//! ```
//!
//! Everything up to the commit works on a copy of the model's graph, so a
//! failed pass leaves the model as it was.

use lineage_env::{LabelVolume, ProgressSink, WorkerPool};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::breaker::{break_unsupported_links, BreakReport};
use crate::collection::EventCollection;
use crate::config::{ConfigError, CorrectorConfig};
use crate::events::{event_count, EventSet};
use crate::graph::GraphError;
use crate::label_index::LabelIndex;
use crate::matcher::match_events;
use crate::model::{ModelError, TrackModel};
use crate::reconciler::{reconcile, ReconcileReport};
use crate::topology::analyze;
use crate::tracklet::prune_tracklets;

/// Summary of one pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CorrectionReport {
    pub division_events: usize,
    pub apoptosis_events: usize,

    /// Tracks whose splits agree with a division event
    pub verified_tracks: usize,

    /// Tracks that received mother candidates
    pub division_tracks: usize,

    pub apoptosis_tracks: usize,
    pub unmatched_events: usize,
    pub out_of_range_events: usize,

    /// `None` when link breaking is disabled
    pub breaking: Option<BreakReport>,

    pub reconcile: ReconcileReport,
    pub tracklets_pruned: usize,
    pub edges_before: usize,
    pub edges_after: usize,
}

impl CorrectionReport {
    /// Whether the pass changed the graph at all.
    pub fn changed(&self) -> bool {
        let broke = self.breaking.as_ref().map_or(false, |b| b.edges_removed > 0);
        broke || self.reconcile.links_added > 0 || self.reconcile.links_removed > 0 || self.tracklets_pruned > 0
    }
}

/// Event-driven corrector for one label volume.
pub struct TrackCorrector {
    config: CorrectorConfig,
    volume: Arc<dyn LabelVolume>,
    sink: Arc<dyn ProgressSink>,
    pool: WorkerPool,
}

impl TrackCorrector {
    pub fn new(config: CorrectorConfig, volume: Arc<dyn LabelVolume>, sink: Arc<dyn ProgressSink>) -> Self {
        let pool = config.worker_pool();
        Self { config, volume, sink, pool }
    }

    pub fn config(&self) -> &CorrectorConfig {
        &self.config
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Runs a pass with the visible events of two collections.
    pub fn process_collections(
        &self,
        model: &mut TrackModel,
        division: &EventCollection,
        apoptosis: &EventCollection,
    ) -> Result<CorrectionReport, CorrectionError> {
        self.process(model, &division.visible_events(), &apoptosis.visible_events())
    }

    /// Corrects `model` against division and apoptosis events.
    ///
    /// On error the model is left untouched.
    pub fn process(
        &self,
        model: &mut TrackModel,
        division: &EventSet,
        apoptosis: &EventSet,
    ) -> Result<CorrectionReport, CorrectionError> {
        self.config.validate()?;
        let mut report = CorrectionReport {
            division_events: event_count(division),
            apoptosis_events: event_count(apoptosis),
            edges_before: model.graph().edge_count(),
            ..Default::default()
        };

        self.sink.set_status("Indexing tracks");
        self.sink.set_progress(0.0);
        let original = model.graph();
        let tracks = original.tracks();
        let topology = analyze(original, &tracks);
        let index = LabelIndex::build(
            Arc::clone(&self.volume),
            self.config.calibration,
            model.spots(),
            &tracks,
            self.config.z_tolerant,
        );
        info!("{} tracks, {} indexed labels", tracks.len(), index.len());

        self.sink.set_status("Matching events");
        self.sink.set_progress(0.2);
        let outcome = match_events(division, apoptosis, &index, &topology, self.config.tolerance);
        report.verified_tracks = outcome.verified.len();
        report.division_tracks = outcome.division.len();
        report.apoptosis_tracks = outcome.apoptosis.len();
        report.unmatched_events = outcome.unmatched;
        report.out_of_range_events = outcome.out_of_range;

        let mut graph = original.clone();
        if self.config.break_links {
            self.sink.set_status("Breaking unsupported links");
            self.sink.set_progress(0.4);
            report.breaking = Some(break_unsupported_links(
                &mut graph,
                division,
                &index,
                &topology,
                self.config.tolerance,
            ));
        }

        self.sink.set_status("Re-linking");
        self.sink.set_progress(0.6);
        let spots = Arc::new(model.spots().clone());
        let (mut graph, reconciled) = reconcile(
            original,
            graph,
            &spots,
            &index,
            &outcome.division,
            &outcome.apoptosis,
            &self.config,
            &self.pool,
        )?;
        report.reconcile = reconciled;

        report.tracklets_pruned = prune_tracklets(&mut graph, self.config.min_tracklet_length);
        report.edges_after = graph.edge_count();

        self.sink.set_status("Committing");
        self.sink.set_progress(0.9);
        {
            let mut update = model.begin_update();
            update.set_tracks(graph)?;
        }

        self.sink.log(&format!(
            "Correction done: {} verified, {} links added, {} removed, {} tracks terminated",
            report.verified_tracks,
            report.reconcile.links_added,
            report.reconcile.links_removed,
            report.reconcile.tracks_terminated
        ));
        self.sink.set_progress(1.0);
        Ok(report)
    }
}

#[derive(Debug, Error)]
pub enum CorrectionError {
    #[error("Configuration rejected: {0}")]
    Config(#[from] ConfigError),

    #[error("Reconciled graph is invalid: {0}")]
    InvalidGraph(#[from] GraphError),

    #[error("Model rejected the corrected graph: {0}")]
    Model(#[from] ModelError),
}
