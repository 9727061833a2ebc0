use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::failure::Counters;

/// Engine message printed when the HTML transformation failed.
const HTML_FAILURE_MARKER: &str = "Could not generate HTML output";

/// Line filter over the engine console output.
///
/// Latches once the HTML failure marker is seen and collects the summary counters.
#[derive(Debug, Default)]
pub(crate) struct OutputScanner {
    failed_to_report: AtomicBool,
    counters: Mutex<Counters>,
}

impl OutputScanner {
    pub(crate) fn inspect(&self, line: &str) {
        if line.contains(HTML_FAILURE_MARKER) {
            self.failed_to_report.store(true, Ordering::SeqCst);
        }
        let line = line.trim();
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(count) = counter_value(line, "Warnings generated:") {
            counters.bug_count = Some(count);
        } else if let Some(count) = counter_value(line, "Analysis errors:") {
            counters.error_count = Some(count);
        } else if let Some(count) = counter_value(line, "Missing classes:") {
            counters.missing_class_count = Some(count);
        }
    }

    pub(crate) fn failed_to_report(&self) -> bool {
        self.failed_to_report.load(Ordering::SeqCst)
    }

    pub(crate) fn counters(&self) -> Counters {
        *self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn counter_value(line: &str, prefix: &str) -> Option<u64> {
    line.strip_prefix(prefix)?.trim().parse().ok()
}
