//! Polled adapter variant (spec.md §4.C): pulls each subscribed symbol on
//! a configured interval, jittered ±10% to avoid synchronized bursts.
//! Modelled on the teacher's `reqwest`-based REST clients, reusing the
//! token-bucket shape of `jackbot-integration::rate_limit` for per-symbol
//! pacing rather than a global cap (the streaming adapter's reconnect
//! backoff already covers connection-level retry; here each symbol's
//! poller is independent).

use crate::adapter::{AdapterError, AdapterHealth, MarketDataAdapter};
use crate::tick::{MarketTick, TickSource};
use async_trait::async_trait;
use dashmap::DashMap;
use kq_instrument::Symbol;
use parking_lot::Mutex;
use rand::Rng;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_secs(10);
const JITTER_FRACTION: f64 = 0.10;

#[derive(Debug, Deserialize)]
struct RawQuote {
    symbol: String,
    timestamp: i64,
    last: String,
    open: Option<String>,
    high: Option<String>,
    low: Option<String>,
    volume: String,
}

fn normalize_quote(raw: RawQuote) -> Result<MarketTick, AdapterError> {
    let code = raw.symbol.split('.').next().unwrap_or(&raw.symbol);
    let symbol = Symbol::new(code).map_err(|e| AdapterError::ConnectFailed(e.to_string()))?;
    let close = raw
        .last
        .parse::<Decimal>()
        .map_err(|_| AdapterError::ConnectFailed("unparseable last price".into()))?;
    let volume = raw
        .volume
        .parse::<Decimal>()
        .map_err(|_| AdapterError::ConnectFailed("unparseable volume".into()))?;
    let open = raw.open.as_deref().and_then(|s| s.parse().ok());
    let high = raw.high.as_deref().and_then(|s| s.parse().ok());
    let low = raw.low.as_deref().and_then(|s| s.parse().ok());
    let ts = chrono::DateTime::from_timestamp_millis(raw.timestamp)
        .ok_or_else(|| AdapterError::ConnectFailed("unparseable timestamp".into()))?;

    Ok(MarketTick {
        symbol,
        ts,
        open,
        high,
        low,
        close,
        volume,
        source: TickSource::KrxPolled,
    })
}

/// Jitters a base interval by ±10% (spec.md §4.C).
fn jittered(base: Duration) -> Duration {
    let spread = base.as_secs_f64() * JITTER_FRACTION;
    let offset = rand::thread_rng().gen_range(-spread..=spread);
    Duration::from_secs_f64((base.as_secs_f64() + offset).max(0.001))
}

/// Polled [`MarketDataAdapter`] over an HTTP quote endpoint. Each
/// subscribed symbol gets its own polling task so one slow symbol never
/// delays another's cadence.
pub struct KrxPolledAdapter {
    base_url: String,
    client: Client,
    interval: Duration,
    tasks: DashMap<Symbol, JoinHandle<()>>,
    ticks_tx: mpsc::Sender<MarketTick>,
    ticks_rx: Mutex<Option<mpsc::Receiver<MarketTick>>>,
    health_tx: mpsc::Sender<AdapterHealth>,
    health_rx: Mutex<Option<mpsc::Receiver<AdapterHealth>>>,
}

impl KrxPolledAdapter {
    pub fn new(base_url: impl Into<String>, interval: Duration) -> Result<Self, AdapterError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(READ_TIMEOUT)
            .build()
            .map_err(|e| AdapterError::ConnectFailed(e.to_string()))?;
        let (ticks_tx, ticks_rx) = mpsc::channel(4096);
        let (health_tx, health_rx) = mpsc::channel(64);
        Ok(Self {
            base_url: base_url.into(),
            client,
            interval,
            tasks: DashMap::new(),
            ticks_tx,
            ticks_rx: Mutex::new(Some(ticks_rx)),
            health_tx,
            health_rx: Mutex::new(Some(health_rx)),
        })
    }

    async fn poll_once(client: &Client, base_url: &str, symbol: &Symbol) -> Result<MarketTick, AdapterError> {
        let url = format!("{base_url}/quote/{}", symbol.as_str());
        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| AdapterError::ConnectFailed(e.to_string()))?;
        let raw: RawQuote = response
            .json()
            .await
            .map_err(|e| AdapterError::ConnectFailed(e.to_string()))?;
        normalize_quote(raw)
    }
}

#[async_trait]
impl MarketDataAdapter for KrxPolledAdapter {
    async fn connect(&self) -> Result<(), AdapterError> {
        let _ = self.health_tx.send(AdapterHealth::Reconnected).await;
        Ok(())
    }

    async fn subscribe(&self, symbol: Symbol) -> Result<(), AdapterError> {
        if self.tasks.contains_key(&symbol) {
            return Ok(());
        }
        let client = self.client.clone();
        let base_url = self.base_url.clone();
        let interval = self.interval;
        let ticks_tx = self.ticks_tx.clone();
        let health_tx = self.health_tx.clone();
        let task_symbol = symbol.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(jittered(interval)).await;
                match Self::poll_once(&client, &base_url, &task_symbol).await {
                    Ok(tick) => {
                        let _ = health_tx.send(AdapterHealth::Heartbeat).await;
                        if ticks_tx.send(tick).await.is_err() {
                            break;
                        }
                    }
                    Err(error) => {
                        warn!(symbol = %task_symbol, ?error, "polled adapter request failed");
                        let _ = health_tx.send(AdapterHealth::Disconnected).await;
                    }
                }
            }
        });
        self.tasks.insert(symbol, handle);
        Ok(())
    }

    async fn unsubscribe(&self, symbol: Symbol) -> Result<(), AdapterError> {
        match self.tasks.remove(&symbol) {
            Some((_, handle)) => {
                handle.abort();
                Ok(())
            }
            None => Err(AdapterError::NotSubscribed(symbol)),
        }
    }

    fn take_ticks(&self) -> Option<mpsc::Receiver<MarketTick>> {
        self.ticks_rx.lock().take()
    }

    fn take_health(&self) -> Option<mpsc::Receiver<AdapterHealth>> {
        self.health_rx.lock().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_a_well_formed_quote() {
        let raw = RawQuote {
            symbol: "005930.KS".into(),
            timestamp: 1_700_000_000_000,
            last: "75000".into(),
            open: Some("74900".into()),
            high: Some("75100".into()),
            low: Some("74800".into()),
            volume: "1200".into(),
        };
        let tick = normalize_quote(raw).unwrap();
        assert_eq!(tick.symbol.as_str(), "005930");
        assert_eq!(tick.source, TickSource::KrxPolled);
    }

    #[test]
    fn jitter_stays_within_ten_percent_of_the_base_interval() {
        let base = Duration::from_secs(60);
        for _ in 0..50 {
            let d = jittered(base);
            assert!(d.as_secs_f64() >= 54.0 && d.as_secs_f64() <= 66.0);
        }
    }

    #[tokio::test]
    async fn unsubscribing_an_unknown_symbol_is_an_error() {
        let adapter = KrxPolledAdapter::new("https://example.invalid", Duration::from_secs(30)).unwrap();
        let result = adapter.unsubscribe(Symbol::new("005930").unwrap()).await;
        assert!(result.is_err());
    }
}
