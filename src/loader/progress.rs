//! Progress reporting and result types for batch loads.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::ErrorKind;

/// Phase of a batch load a progress event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadPhase {
    Validation,
    Staging,
    Storing,
}

/// One progress observation. Within a phase, `current` never decreases
/// and reaches `total` exactly once on success.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub phase: LoadPhase,
    pub current: u64,
    pub total: u64,
    /// Overall load percentage: vertex work maps to 0–50, edge work to
    /// 50–100, so a UI sees one continuous progression.
    pub percentage: f64,
    pub label: Option<String>,
    pub vertex_count: Option<u64>,
    pub edge_count: Option<u64>,
    pub elapsed_ms: u64,
}

/// Caller-supplied progress observer.
pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// One error attributed to the load, flattened for reporting.
#[derive(Debug, Clone)]
pub struct LoadError {
    pub kind: ErrorKind,
    pub label: Option<String>,
    pub row_index: Option<usize>,
    pub message: String,
}

/// A non-fatal observation: dropped rows, undeclared properties.
#[derive(Debug, Clone)]
pub struct LoadWarning {
    pub label: String,
    pub row_index: Option<usize>,
    pub message: String,
}

/// Outcome of a batch load.
#[derive(Debug, Clone)]
pub struct LoadResult {
    pub success: bool,
    pub vertex_count: u64,
    pub edge_count: u64,
    /// Vertex labels that stored at least one row, in schema order.
    pub vertex_labels: Vec<String>,
    /// Edge labels that stored at least one row, in schema order.
    pub edge_labels: Vec<String>,
    pub duration: Duration,
    pub errors: Vec<LoadError>,
    pub warnings: Vec<LoadWarning>,
}

impl LoadResult {
    pub fn duration_ms(&self) -> u64 {
        self.duration.as_millis() as u64
    }
}

/// Emits progress events with the vertex/edge percentage mapping.
pub(crate) struct ProgressReporter {
    callback: Option<ProgressCallback>,
    started: Instant,
}

impl ProgressReporter {
    pub(crate) fn new(callback: Option<ProgressCallback>, started: Instant) -> Self {
        Self { callback, started }
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(callback) = &self.callback {
            callback(event);
        }
    }

    pub(crate) fn validation(&self, current: u64, total: u64, label: &str) {
        let percentage = if total == 0 {
            100.0
        } else {
            (current as f64 / total as f64) * 100.0
        };
        self.emit(ProgressEvent {
            phase: LoadPhase::Validation,
            current,
            total,
            percentage,
            label: Some(label.to_string()),
            vertex_count: None,
            edge_count: None,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
        });
    }

    pub(crate) fn vertex_progress(
        &self,
        phase: LoadPhase,
        current: u64,
        total: u64,
        label: &str,
    ) {
        self.emit(ProgressEvent {
            phase,
            current,
            total,
            percentage: vertex_percentage(current, total),
            label: Some(label.to_string()),
            vertex_count: Some(current),
            edge_count: None,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
        });
    }

    pub(crate) fn edge_progress(&self, phase: LoadPhase, current: u64, total: u64, label: &str) {
        self.emit(ProgressEvent {
            phase,
            current,
            total,
            percentage: edge_percentage(current, total),
            label: Some(label.to_string()),
            vertex_count: None,
            edge_count: Some(current),
            elapsed_ms: self.started.elapsed().as_millis() as u64,
        });
    }
}

/// Vertex work occupies the 0–50% band of the overall progression.
pub(crate) fn vertex_percentage(current: u64, total: u64) -> f64 {
    if total == 0 {
        50.0
    } else {
        (current as f64 / total as f64) * 50.0
    }
}

/// Edge work occupies the 50–100% band.
pub(crate) fn edge_percentage(current: u64, total: u64) -> f64 {
    if total == 0 {
        100.0
    } else {
        50.0 + (current as f64 / total as f64) * 50.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_percentage_bands() {
        assert_eq!(vertex_percentage(0, 10), 0.0);
        assert_eq!(vertex_percentage(5, 10), 25.0);
        assert_eq!(vertex_percentage(10, 10), 50.0);

        assert_eq!(edge_percentage(0, 10), 50.0);
        assert_eq!(edge_percentage(5, 10), 75.0);
        assert_eq!(edge_percentage(10, 10), 100.0);
    }

    #[test]
    fn test_empty_totals_complete_their_band() {
        assert_eq!(vertex_percentage(0, 0), 50.0);
        assert_eq!(edge_percentage(0, 0), 100.0);
    }

    #[test]
    fn test_reporter_emits_monotonic_events() {
        let events: Arc<Mutex<Vec<ProgressEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let callback: ProgressCallback = Arc::new(move |event| {
            sink.lock().unwrap().push(event);
        });

        let reporter = ProgressReporter::new(Some(callback), Instant::now());
        reporter.vertex_progress(LoadPhase::Storing, 10, 20, "Person");
        reporter.vertex_progress(LoadPhase::Storing, 20, 20, "Person");
        reporter.edge_progress(LoadPhase::Storing, 5, 5, "KNOWS");

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 3);
        assert!(events[0].percentage <= events[1].percentage);
        assert!(events[1].percentage <= events[2].percentage);
        assert_eq!(events[0].vertex_count, Some(10));
        assert_eq!(events[2].edge_count, Some(5));
        assert_eq!(events[2].percentage, 100.0);
    }

    #[test]
    fn test_reporter_without_callback_is_silent() {
        let reporter = ProgressReporter::new(None, Instant::now());
        reporter.validation(1, 2, "Person");
    }
}
