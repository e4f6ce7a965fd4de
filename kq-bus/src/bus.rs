use crate::{
    envelope::Envelope,
    error::BusError,
    metrics::BusMetrics,
    payload::{BusMessage, Heartbeat, RiskCheckRequest, RiskCheckResponse},
    topic::Topic,
};
use dashmap::DashMap;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Outcome of a single [`Subscription::recv`] call. A lag marker is
/// surfaced instead of silently skipping messages, per spec.md §4.A: "on
/// overflow ... surfaced to the subscriber on its next delivery as a lag
/// marker".
#[derive(Debug)]
pub enum Delivery {
    Message(Envelope<BusMessage>),
    Lagged(u64),
    Closed,
}

/// A single subscriber's view of one [`Topic`]'s channel.
pub struct Subscription {
    topic: Topic,
    rx: broadcast::Receiver<Envelope<BusMessage>>,
    metrics: Arc<BusMetrics>,
}

impl Subscription {
    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Receives the next message, or a [`Delivery::Lagged`] marker if the
    /// bounded buffer overflowed and the oldest entries were dropped
    /// before this subscriber could read them.
    pub async fn recv(&mut self) -> Delivery {
        match self.rx.recv().await {
            Ok(envelope) => {
                self.metrics.record_delivered(self.topic, 1);
                Delivery::Message(envelope)
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                self.metrics.record_dropped(self.topic, skipped);
                warn!(topic = %self.topic, skipped, "subscriber_lagged");
                Delivery::Lagged(skipped)
            }
            Err(broadcast::error::RecvError::Closed) => Delivery::Closed,
        }
    }
}

/// Process-wide (and, via [`crate::payload::WireEnvelope`], cross-process)
/// typed pub/sub bus (spec.md §4.A). Each [`Topic`] is backed by an
/// independent bounded [`broadcast`] channel so that per-topic ordering is
/// preserved and a slow subscriber on one topic can never block delivery
/// on another.
pub struct EventBus {
    channels: DashMap<Topic, broadcast::Sender<Envelope<BusMessage>>>,
    buffer_size: usize,
    metrics: Arc<BusMetrics>,
    source_id: String,
    heartbeat_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
    worker_tasks: DashMap<u64, JoinHandle<()>>,
    next_worker_id: std::sync::atomic::AtomicU64,
    risk_check_requests: broadcast::Sender<RiskCheckRequest>,
    pending_risk_checks: DashMap<uuid::Uuid, oneshot::Sender<RiskCheckResponse>>,
}

/// Default timeout for a `risk_check` round trip (spec.md §4.G.1: "the
/// call MUST be bounded by a mandatory timeout").
pub const DEFAULT_RISK_CHECK_TIMEOUT: Duration = Duration::from_millis(500);

impl EventBus {
    /// Constructs a bus with `buffer_size` slots per topic
    /// (`bus_subscriber_buffer`, default 1024).
    pub fn new(source_id: impl Into<String>, buffer_size: usize) -> Arc<Self> {
        let channels = DashMap::new();
        for topic in Topic::ALL {
            channels.insert(topic, broadcast::channel(buffer_size).0);
        }
        Arc::new(Self {
            channels,
            buffer_size,
            metrics: Arc::new(BusMetrics::new()),
            source_id: source_id.into(),
            heartbeat_task: parking_lot::Mutex::new(None),
            worker_tasks: DashMap::new(),
            next_worker_id: std::sync::atomic::AtomicU64::new(0),
            risk_check_requests: broadcast::channel(buffer_size).0,
            pending_risk_checks: DashMap::new(),
        })
    }

    pub fn metrics(&self) -> &Arc<BusMetrics> {
        &self.metrics
    }

    fn sender(&self, topic: Topic) -> broadcast::Sender<Envelope<BusMessage>> {
        self.channels
            .entry(topic)
            .or_insert_with(|| broadcast::channel(self.buffer_size).0)
            .clone()
    }

    /// Non-blocking publish. Delivers to all current subscribers of
    /// `message`'s topic; ordering within that topic is preserved across
    /// sequential calls from one publisher.
    pub fn publish(self: &Arc<Self>, message: BusMessage) {
        let topic = message.topic();
        let envelope = Envelope::new(topic, self.source_id.clone(), message);
        self.metrics.record_published(topic);
        // A send error here means zero receivers are currently attached;
        // that is not itself a failure of the publish operation.
        let _ = self.sender(topic).send(envelope);
    }

    pub fn publish_envelope(self: &Arc<Self>, envelope: Envelope<BusMessage>) {
        self.metrics.record_published(envelope.topic);
        let _ = self.sender(envelope.topic).send(envelope);
    }

    /// Subscribes to `topic`, returning a handle the caller polls directly.
    pub fn subscribe(self: &Arc<Self>, topic: Topic) -> Subscription {
        Subscription {
            topic,
            rx: self.sender(topic).subscribe(),
            metrics: Arc::clone(&self.metrics),
        }
    }

    /// Subscribes to `topic` and runs `handler` on a dedicated worker task
    /// for every message delivered, distinct from the publisher's task
    /// (spec.md §5: "Subscriber handlers run on a worker pool distinct
    /// from the publisher"). A panicking handler is caught, logged with
    /// topic and counted; it never propagates to other subscribers or to
    /// the publisher.
    pub fn subscribe_with_handler<F, Fut>(self: &Arc<Self>, topic: Topic, mut handler: F) -> u64
    where
        F: FnMut(Envelope<BusMessage>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let mut subscription = self.subscribe(topic);
        let metrics = Arc::clone(&self.metrics);
        let handle = tokio::spawn(async move {
            loop {
                match subscription.recv().await {
                    Delivery::Message(envelope) => {
                        let started = std::time::Instant::now();
                        let envelope_id = envelope.correlation_id;
                        let outcome =
                            AssertUnwindSafe(handler(envelope)).catch_unwind().await;
                        metrics.record_handler_latency_ms(
                            topic,
                            started.elapsed().as_millis() as u64,
                        );
                        if outcome.is_err() {
                            metrics.record_handler_failure(topic);
                            error!(
                                topic = %topic,
                                envelope_id = ?envelope_id,
                                "bus subscriber handler panicked"
                            );
                        }
                    }
                    Delivery::Lagged(_) => continue,
                    Delivery::Closed => break,
                }
            }
        });
        let id = self.next_worker_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.worker_tasks.insert(id, handle);
        id
    }

    /// Brings up the bus's self-heartbeat, published every 30 s with this
    /// bus instance's source identity (spec.md §4.A).
    pub fn start(self: &Arc<Self>) {
        let bus = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));
            loop {
                interval.tick().await;
                bus.publish(BusMessage::Heartbeat(Heartbeat {
                    source_id: bus.source_id.clone(),
                    ts: chrono::Utc::now(),
                }));
            }
        });
        *self.heartbeat_task.lock() = Some(handle);
        debug!(source_id = %self.source_id, "event bus started");
    }

    /// Drains pending deliveries up to `grace_period` then aborts
    /// outstanding worker tasks (spec.md §4.A default 5 s).
    pub async fn stop(self: &Arc<Self>, grace_period: Duration) {
        if let Some(handle) = self.heartbeat_task.lock().take() {
            handle.abort();
        }
        tokio::time::sleep(grace_period).await;
        for entry in self.worker_tasks.iter() {
            entry.value().abort();
        }
        self.worker_tasks.clear();
    }

    /// Subscribes to inbound `risk_check` requests. The risk engine is the
    /// sole consumer of this stream; it answers each request via
    /// [`EventBus::reply_risk_check`]. This is deliberately not a
    /// [`Topic`] subscription: `risk_check` requests are addressed by
    /// `correlation_id`, not fanned out as part of the closed broadcast
    /// set (see [`crate::topic::RiskCheckTopic`]).
    pub fn subscribe_risk_check_requests(self: &Arc<Self>) -> broadcast::Receiver<RiskCheckRequest> {
        self.risk_check_requests.subscribe()
    }

    /// Issues a synchronous `risk_check` request/response round trip
    /// (spec.md §4.G.1). Bounded by `timeout`; a timeout is treated as a
    /// rejection rather than left pending, satisfying the invariant that
    /// every order placement either passes or fails a risk check (spec.md
    /// §8 invariant 6).
    pub async fn risk_check(
        self: &Arc<Self>,
        request: RiskCheckRequest,
        timeout: Duration,
    ) -> Result<RiskCheckResponse, BusError> {
        let correlation_id = request.correlation_id;
        let (tx, rx) = oneshot::channel();
        self.pending_risk_checks.insert(correlation_id, tx);

        if self.risk_check_requests.send(request).is_err() {
            self.pending_risk_checks.remove(&correlation_id);
            return Err(BusError::NoRiskCheckResponder);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => {
                self.pending_risk_checks.remove(&correlation_id);
                Err(BusError::RequestCancelled)
            }
            Err(_) => {
                self.pending_risk_checks.remove(&correlation_id);
                warn!(%correlation_id, "risk_check timed out");
                Err(BusError::RiskCheckTimeout)
            }
        }
    }

    /// Delivers a `risk_check` response to whichever caller is awaiting
    /// `response.correlation_id`. A response with no matching waiter (the
    /// request already timed out) is dropped.
    pub fn reply_risk_check(&self, response: RiskCheckResponse) {
        if let Some((_, tx)) = self.pending_risk_checks.remove(&response.correlation_id) {
            let _ = tx.send(response);
        }
    }
}
