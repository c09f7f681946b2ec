//! Progress reporting for indexing passes

use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Mutex;
use std::time::Duration;

/// Receives `(message, percent)` updates from indexing threads.
///
/// `percent` is `None` while the amount of remaining work is unknown (during
/// the directory walk) and `Some(0..=100)` otherwise.
pub trait ProgressSink: Send + Sync {
    fn report(&self, message: &str, percent: Option<u8>);
}

impl<F> ProgressSink for F
where
    F: Fn(&str, Option<u8>) + Send + Sync,
{
    fn report(&self, message: &str, percent: Option<u8>) {
        self(message, percent)
    }
}

/// Discards every update
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn report(&self, _message: &str, _percent: Option<u8>) {}
}

/// Collects updates in memory
#[derive(Debug, Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<(String, Option<u8>)>>,
}

impl RecordingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(String, Option<u8>)> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl ProgressSink for RecordingProgress {
    fn report(&self, message: &str, percent: Option<u8>) {
        if let Ok(mut events) = self.events.lock() {
            events.push((message.to_string(), percent));
        }
    }
}

/// Terminal progress bar; spins while the percentage is unknown.
pub struct TerminalProgress {
    bar: ProgressBar,
}

impl TerminalProgress {
    pub fn new() -> Self {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {wide_msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▓░"),
        );
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for TerminalProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for TerminalProgress {
    fn report(&self, message: &str, percent: Option<u8>) {
        if let Some(p) = percent {
            self.bar.set_position(u64::from(p.min(100)));
        }
        self.bar.set_message(message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_closure_sink() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let sink: Box<dyn ProgressSink> = Box::new(move |_: &str, _: Option<u8>| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        sink.report("Indexing src", None);
        sink.report("Finished", Some(100));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_recording_sink() {
        let sink = RecordingProgress::new();
        sink.report("Cleaning database", Some(95));
        assert_eq!(sink.events(), vec![("Cleaning database".to_string(), Some(95))]);
    }
}
