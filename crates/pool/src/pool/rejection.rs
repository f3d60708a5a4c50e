//! Saturation handling
//!
//! When every worker is busy and the pool is at `max_size`, a submission is
//! rejected from the pool and run on the submitting thread instead. This
//! slows the submitter down rather than queuing without bound or dropping
//! work.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::info;

use crate::invoke::DiagnosticContext;

/// Monotonic count of caller-runs events
#[derive(Debug, Default)]
pub struct RejectionCounter {
    count: AtomicU64,
}

impl RejectionCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one rejection and return the new total
    pub fn record(&self) -> u64 {
        self.count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Total rejections so far
    pub fn get(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

/// Caller-runs policy
///
/// Runs `job` on the current thread and restores the caller's ambient
/// diagnostic context afterwards, since jobs clear it when they finish.
pub(crate) fn run_on_caller(pool: &str, counter: &RejectionCounter, job: impl FnOnce()) {
    let total = counter.record();
    info!(pool, rejected_total = total, "Pool saturated, running task on caller thread");

    let saved = DiagnosticContext::current();
    job();
    saved.set_current();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_counter_is_monotonic() {
        let counter = RejectionCounter::new();
        assert_eq!(counter.get(), 0);
        assert_eq!(counter.record(), 1);
        assert_eq!(counter.record(), 2);
        assert_eq!(counter.get(), 2);
    }

    #[test]
    fn test_counter_concurrent_increments() {
        let counter = Arc::new(RejectionCounter::new());
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..100 {
                        counter.record();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(counter.get(), 800);
    }

    #[test_log::test]
    fn test_run_on_caller_runs_inline_and_restores_context() {
        let counter = RejectionCounter::new();
        DiagnosticContext::clear();
        DiagnosticContext::put("caller", "yes");

        let caller = thread::current().id();
        let mut ran_on = None;
        run_on_caller("test", &counter, || {
            ran_on = Some(thread::current().id());
            DiagnosticContext::clear();
        });

        assert_eq!(ran_on, Some(caller));
        assert_eq!(counter.get(), 1);
        assert_eq!(DiagnosticContext::current().get("caller"), Some("yes"));
        DiagnosticContext::clear();
    }
}
