use log::{debug, error, info, warn};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch, RwLock};
use tokio::task::JoinHandle;

use crate::api::{validate_address, DataSourceStatus, PositionSource, PositionsQuery, RestClient};
use crate::config::{Config, FeatureFlags, OperatingMode};
use crate::demo::{self, DemoFeed, DemoSimulator, DemoSource};
use crate::error::AppResult;
use crate::feed::{feed_url, ConnectionState, FeedClient, FeedHandle, PortfolioState, ServerEvent, Subscription};
use crate::model::{Position, PositionsSummary};

const DEMO_TICK: Duration = Duration::from_millis(1000);

/// Topics wanted for an address and its current positions.
pub fn desired_subscriptions(address: &str, positions: &[Position], features: &FeatureFlags) -> Vec<Subscription> {
    let mut subs = vec![Subscription::UserAlerts(address.to_string()), Subscription::SystemStatus];

    for position in positions {
        subs.push(Subscription::PositionRisk(position.id.clone()));
        subs.push(Subscription::PositionValue(position.id.clone()));
    }

    if features.market_data {
        let tokens: BTreeSet<String> = positions
            .iter()
            .flat_map(|p| [p.token0_address.to_lowercase(), p.token1_address.to_lowercase()])
            .collect();
        subs.extend(tokens.into_iter().map(Subscription::MarketData));
    }

    subs
}

enum Feed {
    Live(Arc<FeedHandle>),
    Demo(DemoFeed),
    Off,
}

/// Everything one dashboard session owns: the address, the position source, the
/// event feed and the projected state. Built once, torn down with `shutdown`.
pub struct Session {
    config: Config,
    address: String,
    source: Arc<dyn PositionSource>,
    feed: Feed,
    state: Arc<RwLock<PortfolioState>>,
    summary: Arc<RwLock<Option<PositionsSummary>>>,
    last_error: Arc<RwLock<Option<String>>>,
    connection: watch::Receiver<ConnectionState>,
    refresh_tx: mpsc::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

struct Poller {
    source: Arc<dyn PositionSource>,
    query: PositionsQuery,
    features: FeatureFlags,
    feed: Option<Arc<FeedHandle>>,
    state: Arc<RwLock<PortfolioState>>,
    summary: Arc<RwLock<Option<PositionsSummary>>>,
    last_error: Arc<RwLock<Option<String>>>,
}

impl Session {
    /// Must be called inside a tokio runtime.
    pub fn start(config: Config, address: String) -> AppResult<Session> {
        validate_address(&address)?;
        let address = address.trim().to_string();

        let source: Arc<dyn PositionSource> = match config.operating_mode {
            OperatingMode::Live => Arc::new(RestClient::new(&config)?),
            OperatingMode::Demo => Arc::new(DemoSource),
        };

        let (feed, events, connection) = match config.operating_mode {
            OperatingMode::Demo => {
                let simulator = DemoSimulator::new(demo::fixture_positions(&address), config.risk_weights.clone());
                let demo = DemoFeed::spawn(simulator, DEMO_TICK, config.feed.event_buffer);
                let events = demo.events();
                let connection = demo.state();
                (Feed::Demo(demo), Some(events), connection)
            }
            OperatingMode::Live if config.enable_websocket => {
                let url = feed_url(&config.ws_url, Some(&address))?;
                let handle = FeedClient::spawn(config.feed.clone(), url);
                let events = handle.events();
                let connection = handle.state();
                (Feed::Live(Arc::new(handle)), Some(events), connection)
            }
            OperatingMode::Live => {
                info!("📴 Live feed disabled, polling only");
                let (_tx, rx) = watch::channel(ConnectionState::Disconnected);
                (Feed::Off, None, rx)
            }
        };

        let state = Arc::new(RwLock::new(PortfolioState::new()));
        let summary = Arc::new(RwLock::new(None));
        let last_error = Arc::new(RwLock::new(None));
        let mut tasks = Vec::new();

        if let Some(events) = events {
            tasks.push(tokio::spawn(run_projector(events, state.clone())));
        }

        let poller = Poller {
            source: source.clone(),
            query: PositionsQuery::from_config(&config, &address),
            features: config.features.clone(),
            feed: match &feed {
                Feed::Live(handle) => Some(handle.clone()),
                _ => None,
            },
            state: state.clone(),
            summary: summary.clone(),
            last_error: last_error.clone(),
        };
        let (refresh_tx, refresh_rx) = mpsc::channel(4);
        tasks.push(tokio::spawn(poller.run(config.poll_interval(), refresh_rx)));

        info!(
            "🚀 Session started for {} ({:?} mode, source: {})",
            address,
            config.operating_mode,
            source.name()
        );

        Ok(Session {
            config,
            address,
            source,
            feed,
            state,
            summary,
            last_error,
            connection,
            refresh_tx,
            tasks,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn source_name(&self) -> &'static str {
        self.source.name()
    }

    pub async fn source_status(&self) -> DataSourceStatus {
        self.source.status().await
    }

    pub fn state(&self) -> Arc<RwLock<PortfolioState>> {
        self.state.clone()
    }

    pub fn connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    pub fn live_feed_enabled(&self) -> bool {
        !matches!(self.feed, Feed::Off)
    }

    pub async fn snapshot(&self) -> PortfolioState {
        self.state.read().await.clone()
    }

    pub async fn summary(&self) -> Option<PositionsSummary> {
        self.summary.read().await.clone()
    }

    pub async fn last_error(&self) -> Option<String> {
        self.last_error.read().await.clone()
    }

    /// Drops cached responses, reloads positions, and restarts the feed if it gave up.
    pub async fn refresh(&self) {
        self.source.invalidate().await;
        if self.refresh_tx.try_send(()).is_err() {
            debug!("🔄 Refresh already queued");
        }
        if let Feed::Live(handle) = &self.feed {
            if handle.current_state() == ConnectionState::Disconnected {
                if let Err(e) = handle.reconnect().await {
                    warn!("⚠️ Could not restart live feed: {}", e);
                }
            }
        }
    }

    /// Marks the newest unresolved alert as resolved and returns its id.
    pub async fn acknowledge_newest(&self) -> Option<String> {
        let mut state = self.state.write().await;
        let id = crate::alert::newest_unresolved(state.alerts())?.id.clone();
        state.acknowledge(&id);
        info!("✅ Acknowledged alert {}", id);
        Some(id)
    }

    /// Stops polling and projection, then closes the feed. Nothing outlives this call.
    pub async fn shutdown(self) {
        info!("🛑 Shutting down session for {}", self.address);

        for task in &self.tasks {
            task.abort();
        }
        for task in self.tasks {
            let _ = task.await;
        }

        match self.feed {
            Feed::Live(handle) => match Arc::try_unwrap(handle) {
                Ok(handle) => handle.shutdown().await,
                Err(_) => warn!("⚠️ Live feed still shared at shutdown, aborting it"),
            },
            Feed::Demo(demo) => demo.shutdown().await,
            Feed::Off => {}
        }
    }
}

/// The single writer of portfolio state for live events.
async fn run_projector(mut events: broadcast::Receiver<ServerEvent>, state: Arc<RwLock<PortfolioState>>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                let changed = state.write().await.apply(&event);
                if changed {
                    debug!("🧩 Applied {}", event.kind());
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("⚠️ Projector lagged, {} events skipped", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("Event stream closed, projector stopping");
                break;
            }
        }
    }
}

impl Poller {
    async fn run(self, period: Duration, mut refresh_rx: mpsc::Receiver<()>) {
        let mut interval = tokio::time::interval(period);
        let mut cycle: u64 = 0;
        info!("📡 Starting position polling loop (interval: {}ms)", period.as_millis());

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                request = refresh_rx.recv() => {
                    if request.is_none() {
                        break;
                    }
                    info!("🔄 Manual refresh");
                    interval.reset();
                }
            }

            cycle += 1;
            self.refresh(cycle).await;
        }
    }

    async fn refresh(&self, cycle: u64) {
        debug!("📊 Starting position refresh #{}", cycle);

        if self.keeps_loaded_positions().await {
            debug!("🧪 Positions already loaded, keeping simulated values");
        } else if !self.refresh_positions(cycle).await {
            return;
        }

        match self.source.fetch_summary(&self.query.address).await {
            Ok(summary) => *self.summary.write().await = Some(summary),
            Err(e) => debug!("📉 Summary unavailable: {}", e),
        }
    }

    async fn keeps_loaded_positions(&self) -> bool {
        if self.source.reloads() {
            return false;
        }
        let state = self.state.read().await;
        state.owner() == Some(self.query.address.as_str()) && !state.positions().is_empty()
    }

    /// Returns false when the fetch failed.
    async fn refresh_positions(&self, cycle: u64) -> bool {
        match self.source.fetch_positions(&self.query).await {
            Ok(response) => {
                let positions = response.positions;
                let wanted = desired_subscriptions(&self.query.address, &positions, &self.features);

                self.state
                    .write()
                    .await
                    .load_positions(&self.query.address, positions, response.last_updated);
                *self.last_error.write().await = None;

                if let Some(feed) = &self.feed {
                    if let Err(e) = feed.sync(wanted).await {
                        warn!("⚠️ Could not update subscriptions: {}", e);
                    }
                }
                true
            }
            Err(e) => {
                error!("❌ Position refresh #{} failed: {}", cycle, e);
                *self.last_error.write().await = Some(e.to_string());
                false
            }
        }
    }
}
