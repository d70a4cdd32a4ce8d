//! Monotonic progress bookkeeping

/// Bytes and fraction seen so far in one direction
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct ProgressTracker {
    bytes: u64,
    fraction: f64,
}

impl ProgressTracker {
    /// Record a transport report.
    ///
    /// Returns the value to hand to the observer when `done` grew, `None` when
    /// the report is stale or repeated. The inner value is `None` when the
    /// total is unknown.
    pub(crate) fn advance(&mut self, done: u64, total: Option<u64>) -> Option<Option<f64>> {
        if done <= self.bytes {
            return None;
        }
        self.bytes = done;

        let fraction = total.filter(|total| *total > 0).map(|total| {
            let raw = (done as f64 / total as f64).clamp(0.0, 1.0);
            raw.max(self.fraction)
        });
        if let Some(fraction) = fraction {
            self.fraction = fraction;
        }
        Some(fraction)
    }

    /// Mark the transfer as finished
    pub(crate) fn finish(&mut self) {
        self.fraction = 1.0;
    }

    pub(crate) fn fraction(&self) -> f64 {
        self.fraction
    }
}
