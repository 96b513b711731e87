use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use super::ping;
use super::Sample;
use crate::bucket::BucketClock;

// ─── Configuration ───────────────────────────────────────────────

/// How many recent outcome flags each bucket keeps for the live view
const RECENT_OUTCOMES: usize = 10;

/// Successful latencies are clamped so they never read as "down" (0)
const MIN_LATENCY_MS: u64 = 1;

// ─── Public types ────────────────────────────────────────────────

/// Running totals for one service inside one open bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketAggregate {
    pub total: u64,
    pub successes: u64,
    /// Successful latencies in arrival order
    pub latencies: Vec<u64>,
    /// Most recent outcomes, oldest first; `true` = success
    pub recent: VecDeque<bool>,
    pub last_check_ms: i64,
}

impl BucketAggregate {
    fn new() -> Self {
        Self {
            total: 0,
            successes: 0,
            latencies: Vec::new(),
            recent: VecDeque::with_capacity(RECENT_OUTCOMES + 1),
            last_check_ms: 0,
        }
    }

    fn push(&mut self, sample: &Sample) {
        self.total += 1;
        if sample.success {
            self.successes += 1;
            let latency = sample.latency_ms.unwrap_or(MIN_LATENCY_MS).max(MIN_LATENCY_MS);
            self.latencies.push(latency);
        }
        self.recent.push_back(sample.success);
        if self.recent.len() > RECENT_OUTCOMES {
            self.recent.pop_front();
        }
        self.last_check_ms = self.last_check_ms.max(sample.at_ms);
    }

    /// Median of successful latencies, 0 when nothing succeeded.
    pub fn representative_ping(&self) -> u64 {
        ping::representative_ping(&self.latencies)
    }

    /// Representative ping with the fast-down override applied.
    pub fn live_ping(&self) -> u64 {
        ping::live_ping(&self.latencies, &self.recent)
    }
}

/// Shared, thread-safe map of (bucket start, service id) → aggregate.
/// The poller calls `record_sample()`, the scheduler calls
/// `drain_bucket()`, read handlers call `peek_bucket()`.
pub struct Accumulator {
    clock: BucketClock,
    inner: Mutex<Inner>,
}

// ─── Internal state ──────────────────────────────────────────────

#[derive(Default)]
struct Inner {
    /// bucket start → service id → aggregate
    buckets: HashMap<i64, HashMap<String, BucketAggregate>>,
}

// ─── Accumulator impl ────────────────────────────────────────────

impl Accumulator {
    pub fn new(clock: BucketClock) -> Self {
        Self {
            clock,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn clock(&self) -> BucketClock {
        self.clock
    }

    /// Fold one attempt into the bucket containing `sample.at_ms`.
    pub fn record_sample(&self, sample: Sample) {
        let bucket = self.clock.bucket_start(sample.at_ms);
        let mut inner = self.inner.lock();
        inner
            .buckets
            .entry(bucket)
            .or_default()
            .entry(sample.endpoint.clone())
            .or_insert_with(BucketAggregate::new)
            .push(&sample);
    }

    /// Remove and return every service's aggregate for exactly this
    /// bucket. A second call for the same bucket returns an empty map.
    pub fn drain_bucket(&self, bucket_start: i64) -> HashMap<String, BucketAggregate> {
        self.inner
            .lock()
            .buckets
            .remove(&bucket_start)
            .unwrap_or_default()
    }

    /// Read-only copy of one service's in-progress aggregate.
    pub fn peek_bucket(&self, endpoint: &str, bucket_start: i64) -> Option<BucketAggregate> {
        self.inner
            .lock()
            .buckets
            .get(&bucket_start)
            .and_then(|services| services.get(endpoint))
            .cloned()
    }

    /// Drop a bucket's data without returning it. Returns how many
    /// service aggregates were discarded.
    pub fn discard_bucket(&self, bucket_start: i64) -> usize {
        self.inner
            .lock()
            .buckets
            .remove(&bucket_start)
            .map(|services| services.len())
            .unwrap_or(0)
    }

    /// Bucket starts currently held in memory, ascending.
    pub fn open_buckets(&self) -> Vec<i64> {
        let mut starts: Vec<i64> = self.inner.lock().buckets.keys().copied().collect();
        starts.sort_unstable();
        starts
    }
}
