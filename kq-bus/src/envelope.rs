use crate::Topic;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `{topic, source_id, ts, correlation_id?, payload}` (spec.md §4.A).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub topic: Topic,
    pub source_id: String,
    pub ts: DateTime<Utc>,
    pub correlation_id: Option<Uuid>,
    pub payload: T,
}

impl<T> Envelope<T> {
    pub fn new(topic: Topic, source_id: impl Into<String>, payload: T) -> Self {
        Self {
            topic,
            source_id: source_id.into(),
            ts: Utc::now(),
            correlation_id: None,
            payload,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }
}
