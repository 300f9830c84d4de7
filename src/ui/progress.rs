//! Progress reporting backed by an indicatif bar.

use indicatif::{ProgressBar, ProgressStyle};

use crate::types::{EventSink, ExportEvent};

const TEMPLATE: &str = "{spinner:.green} {msg} [{bar:40.cyan/blue}] {pos}/{len}";

/// Renders export events as a terminal progress bar.
pub struct ProgressSink {
    bar: ProgressBar,
}

impl ProgressSink {
    pub fn new() -> Self {
        let bar = ProgressBar::no_length();
        if let Ok(style) = ProgressStyle::with_template(TEMPLATE) {
            bar.set_style(style.progress_chars("●○ "));
        }
        Self { bar }
    }
}

impl Default for ProgressSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for ProgressSink {
    fn publish(&self, event: &ExportEvent) {
        match event {
            ExportEvent::Started { form_id, total } => {
                self.bar.set_length(*total as u64);
                self.bar.set_message(format!("Exporting {form_id}"));
            }
            ExportEvent::Progress { exported, .. } => {
                self.bar.set_position(*exported as u64);
            }
            ExportEvent::Succeeded { exported, .. } => {
                self.bar.finish_with_message(format!("Exported {exported} submissions"));
            }
            ExportEvent::PartiallySucceeded { exported, skipped, .. } => {
                self.bar.finish_with_message(format!("Exported {exported} submissions, skipped {skipped}"));
            }
            ExportEvent::Failed { reason, .. } => {
                self.bar.abandon_with_message(reason.clone());
            }
        }
    }
}
