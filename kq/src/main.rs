//! Composition root: wires together the event bus, KV cache, market
//! data pipeline, technical analyzer, strategy engine, risk engine and
//! order engine into one running process (spec.md §2 "System overview").
//!
//! Real broker authentication/bindings are out of scope (spec.md §1),
//! so the order engine always runs against [`kq_execution::MockBrokerClient`].

mod config;

use config::{AdapterConfig, Config};
use kq_bus::EventBus;
use kq_cache::InMemoryCache;
use kq_data::{AdapterHealth, KrxPolledAdapter, KrxStreamAdapter, MarketDataAdapter, MarketDataPipeline};
use kq_execution::{MockBrokerClient, OrderEngine, SharedBrokerClient};
use kq_instrument::StrategyId;
use kq_risk::{EmergencyStop, RiskEngine};
use kq_strategy::{MovingAverageCrossConfig, MovingAverageCrossStrategy, StrategyEngine, SymbolScope};
use kq_ta::TechnicalAnalyzer;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum AppError {
    #[error("configuration invalid: {0}")]
    Config(#[from] config::ConfigError),
    #[error("emergency stop armed at startup, refusing to start")]
    EmergencyStopArmed,
    #[error("market data adapter failed to connect: {0}")]
    Adapter(#[from] kq_data::AdapterError),
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() {
    init_tracing();

    let config = Config::default();
    if let Err(err) = run(config).await {
        error!(%err, "fatal startup error");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<(), AppError> {
    config.validate()?;
    if config.emergency_stop_armed_at_startup {
        return Err(AppError::EmergencyStopArmed);
    }

    let bus = EventBus::new("kq", config.bus_subscriber_buffer);
    bus.start();

    let cache = Arc::new(InMemoryCache::new(config.ring_size, config.cache_memory_budget_bytes()));

    let risk = RiskEngine::new(Arc::clone(&bus), Arc::clone(&cache), config.risk.clone());
    risk.set_cash(config.starting_cash);
    let mut handles = risk.spawn();

    let broker: SharedBrokerClient = Arc::new(MockBrokerClient::new());
    let order_engine = OrderEngine::new(Arc::clone(&bus), Arc::clone(&cache), broker, config.execution.clone());
    handles.extend(order_engine.spawn());

    let analyzer = Arc::new(TechnicalAnalyzer::new(Arc::clone(&bus), Arc::clone(&cache), config.analyzer.clone()));
    analyzer.spawn();

    let strategy_engine = Arc::new(StrategyEngine::new(Arc::clone(&bus), Arc::clone(&cache)));
    strategy_engine
        .load(
            StrategyId::new("ma_1m_5m"),
            Box::new(MovingAverageCrossStrategy::new(MovingAverageCrossConfig::default())),
            SymbolScope::All,
            0,
        )
        .expect("built-in strategy id is unique at startup");
    strategy_engine.spawn();

    let pipeline = Arc::new(MarketDataPipeline::new(
        Arc::clone(&bus),
        Arc::clone(&cache),
        config.intervals.clone(),
        config.quality.clone(),
    ));

    handles.push(pipeline.spawn_stale_sweep());

    let emergency = Arc::clone(risk.emergency_stop());
    run_market_data(&config, Arc::clone(&pipeline), emergency).await?;

    info!(symbols = config.symbols.len(), "kq running, press ctrl-c to stop");
    tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    info!("shutdown signal received");

    bus.stop(Duration::from_secs(2)).await;
    for handle in handles {
        handle.abort();
    }

    Ok(())
}

/// Brings up the configured [`MarketDataAdapter`] variant, subscribes to
/// every configured symbol, and spawns the forwarding tasks that feed
/// ticks and health events into the pipeline.
async fn run_market_data(config: &Config, pipeline: Arc<MarketDataPipeline>, emergency: Arc<EmergencyStop>) -> Result<(), AppError> {
    match &config.adapter {
        AdapterConfig::Streaming { url } => {
            let url = url::Url::parse(url).expect("configured adapter url must be valid");
            let adapter = Arc::new(KrxStreamAdapter::new(url));
            adapter.connect().await?;
            for symbol in &config.symbols {
                adapter.subscribe(symbol.clone()).await?;
            }
            spawn_forwarders(adapter, pipeline, emergency);
        }
        AdapterConfig::Polled { base_url, .. } => {
            let adapter = Arc::new(KrxPolledAdapter::new(base_url.clone(), config.adapter.poll_interval())?);
            adapter.connect().await?;
            for symbol in &config.symbols {
                adapter.subscribe(symbol.clone()).await?;
            }
            spawn_forwarders(adapter, pipeline, emergency);
        }
    }
    Ok(())
}

/// Forwards one adapter's tick stream into the pipeline and its health
/// stream into logging plus the emergency stop's upstream heartbeat
/// (spec.md §4.G.2 "upstream API down" arm condition): every `Heartbeat`
/// or `Reconnected` transition is evidence the adapter's connection to
/// the broker is alive, so it refreshes `check_staleness`'s clock.
fn spawn_forwarders<A: MarketDataAdapter + 'static>(adapter: Arc<A>, pipeline: Arc<MarketDataPipeline>, emergency: Arc<EmergencyStop>) {
    if let Some(mut ticks) = adapter.take_ticks() {
        tokio::spawn(async move {
            while let Some(tick) = ticks.recv().await {
                pipeline.ingest(tick);
            }
        });
    }
    if let Some(mut health) = adapter.take_health() {
        tokio::spawn(async move {
            while let Some(event) = health.recv().await {
                if matches!(event, AdapterHealth::Heartbeat | AdapterHealth::Reconnected) {
                    emergency.note_upstream_heartbeat();
                }
                warn!(?event, "market data adapter health event");
            }
        });
    }
}
