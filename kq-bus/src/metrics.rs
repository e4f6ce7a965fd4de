use crate::Topic;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-topic counters (spec.md §4.A): `published, delivered, dropped,
/// handler_failures`, plus running sums used to derive
/// `handler_latency_ms_p50/p99` from a bounded recent-samples window.
#[derive(Debug, Default)]
pub struct TopicCounters {
    pub published: AtomicU64,
    pub delivered: AtomicU64,
    pub dropped: AtomicU64,
    pub handler_failures: AtomicU64,
    latencies_ms: parking_lot::Mutex<Vec<u64>>,
}

impl TopicCounters {
    const LATENCY_WINDOW: usize = 256;

    fn record_latency(&self, latency_ms: u64) {
        let mut samples = self.latencies_ms.lock();
        samples.push(latency_ms);
        if samples.len() > Self::LATENCY_WINDOW {
            let excess = samples.len() - Self::LATENCY_WINDOW;
            samples.drain(0..excess);
        }
    }

    fn percentile(&self, pct: f64) -> u64 {
        let mut samples = self.latencies_ms.lock().clone();
        if samples.is_empty() {
            return 0;
        }
        samples.sort_unstable();
        let idx = ((samples.len() as f64 - 1.0) * pct).round() as usize;
        samples[idx.min(samples.len() - 1)]
    }

    pub fn p50(&self) -> u64 {
        self.percentile(0.50)
    }

    pub fn p99(&self) -> u64 {
        self.percentile(0.99)
    }
}

/// Bus-wide metrics registry, keyed by [`Topic`].
#[derive(Debug, Default)]
pub struct BusMetrics {
    topics: DashMap<Topic, TopicCounters>,
}

impl BusMetrics {
    pub fn new() -> Self {
        Self {
            topics: Topic::ALL.into_iter().map(|t| (t, TopicCounters::default())).collect(),
        }
    }

    fn counters(&self, topic: Topic) -> dashmap::mapref::one::Ref<'_, Topic, TopicCounters> {
        self.topics
            .entry(topic)
            .or_insert_with(TopicCounters::default)
            .downgrade()
    }

    pub fn record_published(&self, topic: Topic) {
        self.counters(topic).published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivered(&self, topic: Topic, n: u64) {
        self.counters(topic).delivered.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_dropped(&self, topic: Topic, n: u64) {
        self.counters(topic).dropped.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_handler_failure(&self, topic: Topic) {
        self.counters(topic).handler_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handler_latency_ms(&self, topic: Topic, latency_ms: u64) {
        self.counters(topic).record_latency(latency_ms);
    }

    pub fn snapshot(&self, topic: Topic) -> TopicSnapshot {
        let counters = self.counters(topic);
        TopicSnapshot {
            topic,
            published: counters.published.load(Ordering::Relaxed),
            delivered: counters.delivered.load(Ordering::Relaxed),
            dropped: counters.dropped.load(Ordering::Relaxed),
            handler_failures: counters.handler_failures.load(Ordering::Relaxed),
            handler_latency_ms_p50: counters.p50(),
            handler_latency_ms_p99: counters.p99(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopicSnapshot {
    pub topic: Topic,
    pub published: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub handler_failures: u64,
    pub handler_latency_ms_p50: u64,
    pub handler_latency_ms_p99: u64,
}
