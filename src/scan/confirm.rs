use std::sync::atomic::{AtomicUsize, Ordering};

use indicatif::ProgressBar;
use tracing::debug;

use crate::analysis::{Checker, OccurrenceMap, ProbeContext};
use crate::transform::{decode_once, escape_path_slashes};

/// Confirmation progress for the parameter currently under test.
pub struct ScanProgress {
    lap: AtomicUsize,
    total: AtomicUsize,
    bar: ProgressBar,
}

impl ScanProgress {
    pub fn new(bar: ProgressBar, total: usize) -> Self {
        let progress = Self {
            lap: AtomicUsize::new(0),
            total: AtomicUsize::new(0),
            bar,
        };
        progress.reset(total);
        progress
    }

    pub fn hidden(total: usize) -> Self {
        Self::new(ProgressBar::hidden(), total)
    }

    pub fn reset(&self, total: usize) {
        self.lap.store(0, Ordering::SeqCst);
        self.total.store(total, Ordering::SeqCst);
        self.bar.reset();
        self.bar.set_length(total as u64);
    }

    /// Counts one confirmation and returns the new lap number.
    pub fn advance(&self) -> usize {
        let lap = self.lap.fetch_add(1, Ordering::SeqCst) + 1;
        self.bar.inc(1);
        lap
    }

    pub fn lap(&self) -> usize {
        self.lap.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    pub fn bar(&self) -> &ProgressBar {
        &self.bar
    }
}

pub struct ConfirmRequest<'a> {
    pub target: &'a str,
    pub probe: ProbeContext<'a>,
    pub payload: &'a str,
    pub positions: &'a [usize],
    pub occurrences: &'a OccurrenceMap,
    /// Pre-score the generator gave this payload.
    pub confidence: u8,
    pub param_index: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Confirmation {
    pub best_efficiency: u8,
    pub target: String,
    /// Payload exactly as it was handed to the checker.
    pub logged_payload: String,
    pub confidence: u8,
}

/// Runs one candidate payload through the checker and keeps its best efficiency.
pub async fn confirm(
    request: ConfirmRequest<'_>,
    checker: &dyn Checker,
    progress: &ScanProgress,
) -> Confirmation {
    let base = request.probe.base;
    let mut payload = request.payload.to_string();
    if !base.method.is_get() {
        payload = decode_once(&payload);
    }
    // after decoding, so an escaped slash stays escaped
    if base.path_mode {
        payload = escape_path_slashes(&payload);
    }

    let lap = progress.advance();
    debug!(
        lap,
        total = progress.total(),
        param = request.param_index,
        reflections = request.occurrences.len(),
        "Progress"
    );

    let efficiencies = checker
        .check(request.probe, &payload, request.positions)
        .await;
    let best_efficiency = efficiencies
        .into_iter()
        .map(|e| e.min(100))
        .max()
        .unwrap_or(0);

    Confirmation {
        best_efficiency,
        target: request.target.to_string(),
        logged_payload: payload,
        confidence: request.confidence,
    }
}
