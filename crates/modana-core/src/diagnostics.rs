//! Diagnostic sink for failures caught at dispatch boundaries.
//!
//! Handler failures never propagate to publishers as hard errors. They are
//! converted into [`Diagnostic`] reports and handed to a [`DiagnosticSink`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

/// Where a diagnostic was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticOrigin {
    /// An event subscriber failed or a publish was refused.
    Event,
    /// A command handler failed.
    Command,
    /// A point-to-point message handler failed.
    Message,
    /// An extension lifecycle hook failed.
    Extension,
}

/// A single failure report.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub origin: DiagnosticOrigin,
    /// What failed: an event type label, a command name, an extension name.
    pub subject: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Diagnostic {
    pub fn new(
        origin: DiagnosticOrigin,
        subject: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            origin,
            subject: subject.into(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Receiver of diagnostic reports.
pub trait DiagnosticSink: Send + Sync {
    fn report(&self, diagnostic: Diagnostic);
}

/// Shared sink handle.
pub type SharedSink = Arc<dyn DiagnosticSink>;

/// Default sink: logs every report at `warn` level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn report(&self, diagnostic: Diagnostic) {
        tracing::warn!(
            origin = ?diagnostic.origin,
            subject = %diagnostic.subject,
            "{}",
            diagnostic.message
        );
    }
}

/// Sink that keeps every report in memory.
///
/// Used by tests and by shells that want to show failures to the user.
#[derive(Debug, Default)]
pub struct MemorySink {
    reports: Mutex<Vec<Diagnostic>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all reports received so far.
    pub fn reports(&self) -> Vec<Diagnostic> {
        self.reports.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.reports.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.lock().is_empty()
    }

    pub fn clear(&self) {
        self.reports.lock().clear();
    }
}

impl DiagnosticSink for MemorySink {
    fn report(&self, diagnostic: Diagnostic) {
        tracing::debug!(subject = %diagnostic.subject, "diagnostic recorded");
        self.reports.lock().push(diagnostic);
    }
}
