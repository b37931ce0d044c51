use std::sync::atomic::{AtomicUsize, Ordering};

// Counters for the lifetime of one orchestrator
#[derive(Debug, Default)]
pub struct SearchStats {
    pub searches_started: AtomicUsize,
    pub searches_succeeded: AtomicUsize,
    pub searches_failed: AtomicUsize,
    pub searches_discarded: AtomicUsize,
    pub served_from_cache: AtomicUsize,
    pub polls_sent: AtomicUsize,
    pub polls_too_early: AtomicUsize,
    pub polls_retried: AtomicUsize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub searches_started: usize,
    pub searches_succeeded: usize,
    pub searches_failed: usize,
    pub searches_discarded: usize,
    pub served_from_cache: usize,
    pub polls_sent: usize,
    pub polls_too_early: usize,
    pub polls_retried: usize,
    pub lock_releases: usize,
}

impl SearchStats {
    pub(crate) fn incr(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self, lock_releases: usize) -> StatsSnapshot {
        StatsSnapshot {
            searches_started: self.searches_started.load(Ordering::SeqCst),
            searches_succeeded: self.searches_succeeded.load(Ordering::SeqCst),
            searches_failed: self.searches_failed.load(Ordering::SeqCst),
            searches_discarded: self.searches_discarded.load(Ordering::SeqCst),
            served_from_cache: self.served_from_cache.load(Ordering::SeqCst),
            polls_sent: self.polls_sent.load(Ordering::SeqCst),
            polls_too_early: self.polls_too_early.load(Ordering::SeqCst),
            polls_retried: self.polls_retried.load(Ordering::SeqCst),
            lock_releases,
        }
    }
}
