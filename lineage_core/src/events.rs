//! Division and apoptosis detections, and their ingestion from CSV files.
//!
//! Detection files start with a header line, followed by one event per row:
//!
//! ```text
//!   time, Z, Y, X, score, size, confidence, angle
//!   time, Z, Y, X                                   (score 1, size 10, confidence 1, angle 0)
//! ```
//!
//! Coordinates are in voxels and are scaled by the calibration on the way
//! in. `time` may be written as a float; it is truncated to a frame index.

use lineage_env::Calibration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

/// Default values for rows that only carry `time, Z, Y, X`.
const DEFAULT_SCORE: f64 = 1.0;
const DEFAULT_SIZE: f64 = 10.0;
const DEFAULT_CONFIDENCE: f64 = 1.0;
const DEFAULT_ANGLE: f64 = 0.0;

// ============================================================================
// EVENTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventKind {
    Division,
    Apoptosis,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Division => "division",
            EventKind::Apoptosis => "apoptosis",
        }
    }
}

/// One classifier detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,

    /// Frame index
    pub frame: usize,

    /// Physical position [x, y, z]
    pub position: [f64; 3],

    /// Classifier probability
    pub score: f64,

    /// Size estimate in voxels
    pub size: f64,

    pub confidence: f64,

    /// Estimated division-plane angle (degrees)
    pub angle: f64,
}

impl Event {
    /// Equivalent radius of the detection, in physical units.
    ///
    /// The size is a voxel count, so its physical volume depends on the
    /// calibration. 2-D events get the radius of a disk of that area.
    pub fn radius(&self, calibration: &Calibration, ndim: usize) -> f64 {
        let volume = self.size * calibration.voxel_volume();
        if ndim >= 3 {
            (3.0 * volume / (4.0 * std::f64::consts::PI)).cbrt()
        } else {
            (volume / std::f64::consts::PI).sqrt()
        }
    }
}

/// Events grouped by frame. Every frame owns its own list.
pub type EventSet = BTreeMap<usize, Vec<Event>>;

/// Total number of events in a set.
pub fn event_count(events: &EventSet) -> usize {
    events.values().map(Vec::len).sum()
}

// ============================================================================
// INGESTION
// ============================================================================

/// A row that could not be turned into an event.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RowError {
    #[error("line {line}: expected 4 or 8 fields, got {got}")]
    FieldCount { line: usize, got: usize },

    #[error("line {line}: field {field} is not a number: {value:?}")]
    NotANumber { line: usize, field: usize, value: String },

    #[error("line {line}: time {value} is not a valid frame")]
    InvalidFrame { line: usize, value: f64 },

    #[error("line {line}: score {value} is outside [0, 1]")]
    ScoreOutOfRange { line: usize, value: f64 },
}

/// Outcome of reading one detection file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestReport {
    /// Data rows seen (header excluded, blank lines excluded)
    pub rows: usize,

    /// Events kept
    pub accepted: usize,

    /// Events dropped for scoring below the threshold
    pub below_threshold: usize,

    /// Rows that could not be parsed
    pub skipped: Vec<RowError>,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Cannot read detection file {path}: {source}")]
    Unreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Reads a detection file from disk.
pub fn read_events(
    path: impl AsRef<Path>,
    kind: EventKind,
    calibration: &Calibration,
    threshold: f64,
) -> Result<(EventSet, IngestReport), IngestError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| IngestError::Unreadable {
        path: path.display().to_string(),
        source,
    })?;
    let result = parse_events(file, kind, calibration, threshold).map_err(|e| match e {
        IngestError::Unreadable { source, .. } => IngestError::Unreadable {
            path: path.display().to_string(),
            source,
        },
    })?;
    info!(
        "{}: {} {} events ({} below threshold, {} rows skipped)",
        path.display(),
        result.1.accepted,
        kind.name(),
        result.1.below_threshold,
        result.1.skipped.len()
    );
    Ok(result)
}

/// Parses detection rows from any reader.
pub fn parse_events<R: Read>(
    reader: R,
    kind: EventKind,
    calibration: &Calibration,
    threshold: f64,
) -> Result<(EventSet, IngestReport), IngestError> {
    let mut events = EventSet::new();
    let mut report = IngestReport::default();

    for (idx, line) in BufReader::new(reader).lines().enumerate() {
        let line = line.map_err(|source| IngestError::Unreadable {
            path: "<reader>".to_string(),
            source,
        })?;
        // Header
        if idx == 0 || line.trim().is_empty() {
            continue;
        }
        report.rows += 1;

        let event = match parse_row(&line, idx + 1, kind, calibration) {
            Ok(event) => event,
            Err(e) => {
                debug!("skipping row: {}", e);
                report.skipped.push(e);
                continue;
            }
        };
        if event.score < threshold {
            report.below_threshold += 1;
            continue;
        }
        report.accepted += 1;
        events.entry(event.frame).or_default().push(event);
    }

    Ok((events, report))
}

fn parse_row(line: &str, line_no: usize, kind: EventKind, calibration: &Calibration) -> Result<Event, RowError> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() != 4 && fields.len() != 8 {
        return Err(RowError::FieldCount { line: line_no, got: fields.len() });
    }

    let mut values = Vec::with_capacity(fields.len());
    for (field, raw) in fields.iter().enumerate() {
        let value: f64 = raw.parse().map_err(|_| RowError::NotANumber {
            line: line_no,
            field,
            value: raw.to_string(),
        })?;
        values.push(value);
    }

    let time = values[0];
    if !time.is_finite() || time < 0.0 {
        return Err(RowError::InvalidFrame { line: line_no, value: time });
    }
    let [cx, cy, cz] = calibration.0;
    let position = [values[3] * cx, values[2] * cy, values[1] * cz];

    let (score, size, confidence, angle) = if values.len() == 8 {
        (values[4], values[5], values[6], values[7])
    } else {
        (DEFAULT_SCORE, DEFAULT_SIZE, DEFAULT_CONFIDENCE, DEFAULT_ANGLE)
    };
    if !(0.0..=1.0).contains(&score) {
        return Err(RowError::ScoreOutOfRange { line: line_no, value: score });
    }

    Ok(Event {
        kind,
        frame: time.trunc() as usize,
        position,
        score,
        size,
        confidence,
        angle,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn parse(csv: &str, threshold: f64) -> (EventSet, IngestReport) {
        parse_events(csv.as_bytes(), EventKind::Division, &Calibration::unit(), threshold).unwrap()
    }

    #[test]
    fn test_threshold_drops_low_scores() {
        let csv = "t,z,y,x,score,size,confidence,angle\n\
                   3,0,10,20,0.95,12,0.9,30\n\
                   3,0,40,50,0.20,12,0.9,30\n\
                   4,0,11,21,0.99,12,0.9,30\n";
        let (events, report) = parse(csv, 0.9);
        assert_eq!(event_count(&events), 2);
        assert_eq!(report.rows, 3);
        assert_eq!(report.accepted, 2);
        assert_eq!(report.below_threshold, 1);
        assert!(report.skipped.is_empty());
    }

    #[test]
    fn test_frames_get_separate_lists() {
        let csv = "header\n1,0,1,1\n2,0,2,2\n1,0,3,3\n7,0,4,4\n";
        let (events, _) = parse(csv, 0.5);
        assert_eq!(events.len(), 3);
        assert_eq!(events[&1].len(), 2);
        assert_eq!(events[&2].len(), 1);
        assert_eq!(events[&7].len(), 1);
        assert!(events[&2].iter().all(|e| e.frame == 2));
    }

    #[test]
    fn test_short_rows_get_defaults() {
        let (events, _) = parse("header\n5.7,2,3,4\n", 0.0);
        let event = &events[&5][0];
        assert_eq!(event.frame, 5);
        assert_eq!(event.position, [4.0, 3.0, 2.0]);
        assert_relative_eq!(event.score, 1.0);
        assert_relative_eq!(event.size, 10.0);
        assert_relative_eq!(event.confidence, 1.0);
        assert_relative_eq!(event.angle, 0.0);
    }

    #[test]
    fn test_calibration_scales_position() {
        let cal = Calibration::new(0.5, 0.25, 2.0).unwrap();
        let (events, _) =
            parse_events("h\n0,3,4,8\n".as_bytes(), EventKind::Apoptosis, &cal, 0.0).unwrap();
        let event = &events[&0][0];
        assert_eq!(event.kind, EventKind::Apoptosis);
        assert_eq!(event.position, [4.0, 1.0, 6.0]);
    }

    #[test]
    fn test_bad_rows_are_reported() {
        let csv = "header\n1,2,3\n1,0,abc,4\n-1,0,0,0\n2,0,1,1\n";
        let (events, report) = parse(csv, 0.0);
        assert_eq!(event_count(&events), 1);
        assert_eq!(report.skipped.len(), 3);
        assert!(matches!(report.skipped[0], RowError::FieldCount { line: 2, got: 3 }));
        assert!(matches!(report.skipped[1], RowError::NotANumber { field: 2, .. }));
        assert!(matches!(report.skipped[2], RowError::InvalidFrame { .. }));
    }

    #[test]
    fn test_scores_outside_unit_interval_are_reported() {
        let csv = "header\n1,0,1,1,1.5,10,1,0\n1,0,2,2,-0.1,10,1,0\n1,0,3,3,1.0,10,1,0\n1,0,4,4,0.0,10,1,0\n";
        let (events, report) = parse(csv, 0.0);
        assert_eq!(event_count(&events), 2);
        assert_eq!(report.rows, 4);
        assert_eq!(
            report.skipped,
            vec![
                RowError::ScoreOutOfRange { line: 2, value: 1.5 },
                RowError::ScoreOutOfRange { line: 3, value: -0.1 },
            ]
        );
    }

    #[test]
    fn test_missing_file_is_unreadable() {
        let result = read_events(
            "/definitely/not/here.csv",
            EventKind::Division,
            &Calibration::unit(),
            0.5,
        );
        assert!(matches!(result, Err(IngestError::Unreadable { .. })));
    }

    #[test]
    fn test_event_radius() {
        let event = Event {
            kind: EventKind::Division,
            frame: 0,
            position: [0.0; 3],
            score: 1.0,
            size: std::f64::consts::PI * 4.0,
            confidence: 1.0,
            angle: 0.0,
        };
        assert_relative_eq!(event.radius(&Calibration::unit(), 2), 2.0, epsilon = 1e-12);
    }
}
