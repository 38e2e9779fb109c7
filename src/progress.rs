/// Lifecycle events emitted while a remote resource is loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadProgress {
    /// Connection is being opened
    Connecting,

    /// Body is being read; `percent` is known when the server declared a length
    Loading { percent: Option<u8> },

    /// Bytes have arrived and are being parsed
    Parsing,
}

impl LoadProgress {
    /// Percentage of `total` covered by `done`, clamped to 100
    pub fn percent_of(done: u64, total: u64) -> Option<u8> {
        if total == 0 {
            return None;
        }
        let percent = done.saturating_mul(100) / total;
        Some(percent.min(100) as u8)
    }
}

/// Trait for receiving load progress.
///
/// Implementations forward events to listeners, progress bars, or drop them.
pub trait ProgressReporter: Send + Sync {
    /// Report a progress event
    fn report(&self, event: LoadProgress);
}

/// A no-op progress reporter that silently ignores all events.
/// Useful for tests or background loads nobody watches.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn report(&self, _event: LoadProgress) {
        // Intentionally empty
    }
}

impl<F> ProgressReporter for F
where
    F: Fn(LoadProgress) + Send + Sync,
{
    fn report(&self, event: LoadProgress) {
        self(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn percent_of_handles_edges() {
        assert_eq!(LoadProgress::percent_of(0, 0), None);
        assert_eq!(LoadProgress::percent_of(50, 200), Some(25));
        assert_eq!(LoadProgress::percent_of(300, 200), Some(100));
    }

    #[test]
    fn closures_are_reporters() {
        let seen = Mutex::new(Vec::new());
        let reporter = |event: LoadProgress| seen.lock().unwrap().push(event);

        reporter.report(LoadProgress::Connecting);
        reporter.report(LoadProgress::Loading { percent: Some(10) });
        NoopReporter.report(LoadProgress::Parsing);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                LoadProgress::Connecting,
                LoadProgress::Loading { percent: Some(10) }
            ]
        );
    }
}
