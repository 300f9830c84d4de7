//! Common types shared across the export pipeline.

use std::fmt::{Display, Formatter, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Aggregate verdict over all attempted submissions of one form.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportOutcome {
    /// Every attempted submission produced rows.
    AllExported,

    /// At least one submission was skipped, at least one exported.
    SomeSkipped,

    /// Not a single submission could be exported.
    AllSkipped,
}

impl ExportOutcome {
    /// Returns a human-readable label for the outcome.
    #[inline]
    pub fn label(self) -> &'static str {
        match self {
            Self::AllExported => "all submissions exported",
            Self::SomeSkipped => "some submissions skipped",
            Self::AllSkipped => "all submissions skipped",
        }
    }
}

impl Display for ExportOutcome {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        f.write_str(self.label())
    }
}

/// Signature-validation state of a submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidationStatus {
    /// No validation was attempted (unencrypted form).
    NotValidated,

    /// The recomputed signature digest matched.
    Valid,

    /// The signature was absent or did not match.
    NotValid,
}

impl ValidationStatus {
    /// Cell value for the `isValidated` column.
    #[inline]
    pub fn cell(self) -> &'static str {
        match self {
            Self::Valid => "True",
            Self::NotValidated | Self::NotValid => "False",
        }
    }
}

/// Progress and outcome notifications published during an export.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExportEvent {
    Started { form_id: String, total: usize },
    Progress { form_id: String, exported: usize, total: usize },
    Succeeded { form_id: String, exported: usize },
    PartiallySucceeded { form_id: String, exported: usize, skipped: usize },
    Failed { form_id: String, reason: String },
}

/// Receives export events.
///
/// Injected rather than global so hosts choose their own wiring and tests can
/// capture events deterministically.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: &ExportEvent);
}

/// Sink that drops every event.
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: &ExportEvent) {}
}

/// Cooperative cancellation flag checked between submissions.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests that the pipeline stop enqueuing new work.
    #[inline]
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}
