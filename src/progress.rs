//! Progress reporting as an injected sink, so the pipeline never
//! depends on a concrete reporter.

use indicatif::{ProgressBar, ProgressStyle};

pub trait ProgressSink: Send + Sync {
    fn increment(&self, n: u64);
    fn finish(&self);
}

/// Silent sink for tests and quiet mode
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn increment(&self, _n: u64) {}
    fn finish(&self) {}
}

/// Terminal progress bar over a known total of bases
pub struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    pub fn new(total: u64, message: &'static str) -> Self {
        let bar = ProgressBar::new(total);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{msg} {wide_bar} {pos}/{len} bp {elapsed_precise}")
                .unwrap(),
        );
        bar.set_message(message);
        BarProgress { bar }
    }
}

impl ProgressSink for BarProgress {
    fn increment(&self, n: u64) {
        self.bar.inc(n);
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct Counter(AtomicU64);

    impl ProgressSink for Counter {
        fn increment(&self, n: u64) {
            self.0.fetch_add(n, Ordering::Relaxed);
        }
        fn finish(&self) {}
    }

    #[test]
    fn sink_is_usable_through_dyn() {
        let counter = Counter(AtomicU64::new(0));
        let sink: &dyn ProgressSink = &counter;
        sink.increment(3);
        sink.increment(4);
        sink.finish();
        assert_eq!(counter.0.load(Ordering::Relaxed), 7);
    }
}
