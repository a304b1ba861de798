//! Fixture positions and a simulated event stream for `operating_mode = "Demo"`.
//! Simulated events are fed through the same projector as the live feed.

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::alert;
use crate::api::provider::{DataSourceStatus, PositionSource};
use crate::api::{validate_address, PositionsQuery};
use crate::config::RiskWeights;
use crate::error::AppResult;
use crate::feed::codec::{PositionPatch, RiskUpdate, ServerEvent};
use crate::feed::ConnectionState;
use crate::metrics::risk::{impermanent_loss_pct, RiskLevel};
use crate::model::{
    MarketSnapshot, PortfolioStats, Position, PositionsResponse, PositionsSummary, RiskMetrics, SummaryRow,
    SystemStatusInfo,
};

const USDC: &str = "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48";
const WETH: &str = "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2";
const WBTC: &str = "0x2260fac5e5542a773aa44fbcfedf7c193bc2c599";
const DAI: &str = "0x6b175474e89094c44da98b954eedeac495271d0f";
const STETH: &str = "0xae7ab96520de3a18e5e111b5eaab095312d7fe84";

struct Fixture {
    id: &'static str,
    protocol: &'static str,
    pool: &'static str,
    token0: (&'static str, &'static str),
    token1: (&'static str, &'static str),
    amounts: (Decimal, Decimal),
    value_usd: Decimal,
    base_risk: [f64; 5],
}

fn fixtures() -> Vec<Fixture> {
    vec![
        Fixture {
            id: "demo-univ3-usdc-weth",
            protocol: "uniswap_v3",
            pool: "0x88e6a0c2ddd26feeb64f039a2c41296fcb3f5640",
            token0: (USDC, "USDC"),
            token1: (WETH, "WETH"),
            amounts: (dec!(50000), dec!(20)),
            value_usd: dec!(100000),
            base_risk: [0.30, 0.55, 0.20, 0.45, 0.05],
        },
        Fixture {
            id: "demo-univ3-wbtc-weth",
            protocol: "uniswap_v3",
            pool: "0xcbcdf9626bc03e24f779434178a73a0b4bad62ed",
            token0: (WBTC, "WBTC"),
            token1: (WETH, "WETH"),
            amounts: (dec!(0.75), dec!(12.5)),
            value_usd: dec!(82500),
            base_risk: [0.35, 0.60, 0.20, 0.40, 0.05],
        },
        Fixture {
            id: "demo-aave-usdc",
            protocol: "aave_v3",
            pool: "0x87870bca3f3fd6335c3f4ce8392d69350b4fa4e2",
            token0: (USDC, "USDC"),
            token1: (WETH, "WETH"),
            amounts: (dec!(40000), dec!(0)),
            value_usd: dec!(40000),
            base_risk: [0.15, 0.10, 0.25, 0.05, 0.05],
        },
        Fixture {
            id: "demo-curve-3pool",
            protocol: "curve",
            pool: "0xbebc44782c7db0a1a60cb6fe97d0b483032ff1c7",
            token0: (DAI, "DAI"),
            token1: (USDC, "USDC"),
            amounts: (dec!(12500), dec!(12500)),
            value_usd: dec!(25000),
            base_risk: [0.10, 0.05, 0.20, 0.10, 0.05],
        },
        Fixture {
            id: "demo-lido-steth",
            protocol: "lido",
            pool: "0xdc24316b9ae028f1497c275eb9192a3ea0f67022",
            token0: (STETH, "stETH"),
            token1: (WETH, "WETH"),
            amounts: (dec!(15), dec!(15)),
            value_usd: dec!(90000),
            base_risk: [0.20, 0.25, 0.30, 0.10, 0.10],
        },
    ]
}

pub fn fixture_positions(owner: &str) -> Vec<Position> {
    let now = Utc::now();
    fixtures()
        .into_iter()
        .map(|f| Position {
            id: f.id.to_string(),
            owner_address: owner.to_string(),
            protocol: f.protocol.to_string(),
            chain_id: 1,
            pool_address: f.pool.to_string(),
            token0_address: f.token0.0.to_string(),
            token1_address: f.token1.0.to_string(),
            token0_symbol: Some(f.token0.1.to_string()),
            token1_symbol: Some(f.token1.1.to_string()),
            token0_amount: f.amounts.0,
            token1_amount: f.amounts.1,
            current_value_usd: f.value_usd,
            pnl_usd: Some(Decimal::ZERO),
            impermanent_loss_pct: Some(Decimal::ZERO),
            fees_earned_usd: Some(Decimal::ZERO),
            updated_at: Some(now),
        })
        .collect()
}

/// Position source backed by the fixtures.
#[derive(Debug, Default)]
pub struct DemoSource;

#[async_trait]
impl PositionSource for DemoSource {
    async fn fetch_positions(&self, query: &PositionsQuery) -> AppResult<PositionsResponse> {
        validate_address(&query.address)?;

        let positions: Vec<Position> = fixture_positions(query.address.trim())
            .into_iter()
            .filter(|p| query.protocols.is_empty() || query.protocols.iter().any(|q| q.eq_ignore_ascii_case(&p.protocol)))
            .filter(|p| query.chains.is_empty() || query.chains.contains(&p.chain_id))
            .collect();

        let total_value_usd = positions.iter().map(|p| p.current_value_usd).sum();
        let protocol_count = positions
            .iter()
            .map(|p| p.protocol.as_str())
            .collect::<std::collections::HashSet<_>>()
            .len() as u32;

        debug!("🧪 Serving {} demo positions", positions.len());
        Ok(PositionsResponse {
            total_count: positions.len() as u64,
            last_updated: Utc::now(),
            portfolio_stats: Some(PortfolioStats {
                total_value_usd,
                total_pnl_usd: Some(Decimal::ZERO),
                protocol_count,
                chain_count: if positions.is_empty() { 0 } else { 1 },
            }),
            positions,
            warnings: vec!["Demo mode: positions are simulated".to_string()],
        })
    }

    async fn fetch_summary(&self, address: &str) -> AppResult<PositionsSummary> {
        validate_address(address)?;

        let mut grouped: BTreeMap<(String, u64), (u32, Decimal)> = BTreeMap::new();
        for p in fixture_positions(address.trim()) {
            let entry = grouped.entry((p.protocol.clone(), p.chain_id)).or_insert((0, Decimal::ZERO));
            entry.0 += 1;
            entry.1 += p.current_value_usd;
        }

        let rows: Vec<SummaryRow> = grouped
            .into_iter()
            .map(|((protocol, chain_id), (positions, total_value_usd))| SummaryRow {
                protocol,
                chain_id,
                positions,
                total_value_usd,
            })
            .collect();

        Ok(PositionsSummary {
            total_value_usd: rows.iter().map(|r| r.total_value_usd).sum(),
            rows,
            last_updated: Some(Utc::now()),
            warnings: vec!["Demo mode: summary is simulated".to_string()],
        })
    }

    async fn status(&self) -> DataSourceStatus {
        DataSourceStatus::Connected
    }

    fn name(&self) -> &'static str {
        "demo"
    }

    fn reloads(&self) -> bool {
        false
    }
}

/// Produces the live-feed events a backend would push for the fixture portfolio.
pub struct DemoSimulator {
    positions: Vec<Position>,
    base_risk: HashMap<String, [f64; 5]>,
    weights: RiskWeights,
    counter: u32,
    drift: HashMap<String, f64>,
    last_level: HashMap<String, RiskLevel>,
    rng: StdRng,
}

impl DemoSimulator {
    pub fn new(positions: Vec<Position>, weights: RiskWeights) -> Self {
        Self::with_rng(positions, weights, StdRng::from_entropy())
    }

    pub fn with_rng(positions: Vec<Position>, weights: RiskWeights, rng: StdRng) -> Self {
        let base_risk = fixtures().into_iter().map(|f| (f.id.to_string(), f.base_risk)).collect();
        Self {
            positions,
            base_risk,
            weights,
            counter: 0,
            drift: HashMap::new(),
            last_level: HashMap::new(),
            rng,
        }
    }

    pub fn tick(&mut self) -> Vec<ServerEvent> {
        self.counter += 1;
        let now = Utc::now();
        let mut events = Vec::new();

        if self.counter == 1 {
            events.push(ServerEvent::Connected {
                session_id: format!("demo-{}", Uuid::new_v4()),
                timestamp: Some(now),
            });
            events.push(ServerEvent::SystemStatus(SystemStatusInfo {
                status: "operational".to_string(),
                message: "Demo feed running".to_string(),
                timestamp: Some(now),
            }));
        }

        let positions = self.positions.clone();
        for (index, position) in positions.iter().enumerate() {
            let time_factor = (self.counter as f64 * 0.1 + index as f64).sin();
            let step: f64 = self.rng.gen_range(-0.004..0.004);
            let drift = {
                let d = self.drift.entry(position.id.clone()).or_insert(0.0);
                *d = (*d + step).clamp(-0.15, 0.15);
                *d
            };

            let price_ratio = (1.0 + 0.25 * time_factor + drift).max(0.05);
            let il_pct = impermanent_loss_pct(price_ratio);
            let base_value = position.current_value_usd.to_f64().unwrap_or(0.0);
            let value = base_value * (1.0 + 0.04 * time_factor + drift) * (1.0 - il_pct / 100.0);
            let value_usd = Decimal::from_f64(value).unwrap_or(position.current_value_usd).round_dp(2);

            events.push(ServerEvent::PositionUpdate(PositionPatch {
                position_id: position.id.clone(),
                current_value_usd: Some(value_usd),
                pnl_usd: Some((value_usd - position.current_value_usd).round_dp(2)),
                impermanent_loss_pct: Decimal::from_f64(il_pct).map(|d| d.round_dp(3)),
                fees_earned_usd: Decimal::from_f64(base_value * 0.00002 * self.counter as f64).map(|d| d.round_dp(2)),
                timestamp: Some(now),
                ..PositionPatch::default()
            }));

            let base = self.base_risk.get(&position.id).copied().unwrap_or([0.3; 5]);
            let swing = time_factor * 0.3 + drift;
            let mut metrics = RiskMetrics {
                liquidity_risk: (base[0] + swing * 0.5).clamp(0.0, 1.0),
                volatility_risk: (base[1] + swing).clamp(0.0, 1.0),
                protocol_risk: base[2],
                mev_risk: (base[3] + swing * 0.5).clamp(0.0, 1.0),
                cross_chain_risk: base[4],
                impermanent_loss_pct: il_pct,
                max_drawdown: (il_pct / 100.0 + drift.abs()).min(1.0),
                value_at_risk_1d: value * 0.02 * (1.0 + time_factor.abs()),
                value_at_risk_7d: value * 0.02 * (1.0 + time_factor.abs()) * 7f64.sqrt(),
                ..RiskMetrics::default()
            };
            if self.counter % 50 == 0 && index == 0 {
                metrics.volatility_risk = 1.0;
                metrics.liquidity_risk = 1.0;
                metrics.mev_risk = 1.0;
            }
            metrics.overall_risk_score = crate::metrics::risk::composite_score(&metrics, &self.weights);

            events.extend(self.alerts_on_escalation(position, &metrics));
            events.push(ServerEvent::RiskUpdate(RiskUpdate {
                position_id: position.id.clone(),
                risk_metrics: metrics,
                timestamp: Some(now),
            }));
        }

        for (token, base_price) in [(WETH, 3200.0), (WBTC, 64000.0), (USDC, 1.0)] {
            let time_factor = (self.counter as f64 * 0.07).sin();
            let volatility = if token == USDC { 0.001 } else { 0.04 + 0.02 * time_factor.abs() };
            let price = base_price * (1.0 + volatility * time_factor);
            events.push(ServerEvent::MarketUpdate(MarketSnapshot {
                token_address: token.to_string(),
                price_usd: Decimal::from_f64(price).unwrap_or_default().round_dp(4),
                price_change_24h: Decimal::from_f64(volatility * time_factor * 100.0).unwrap_or_default().round_dp(2),
                volatility: Decimal::from_f64(volatility).unwrap_or_default().round_dp(4),
                timestamp: Some(now),
            }));
        }

        events.push(ServerEvent::Heartbeat { timestamp: Some(now) });
        events
    }

    /// Alerts only when a position's risk level rises, so a steady state stays quiet.
    fn alerts_on_escalation(&mut self, position: &Position, metrics: &RiskMetrics) -> Vec<ServerEvent> {
        let level = RiskLevel::from_score(metrics.overall_risk_score);
        let previous = self.last_level.insert(position.id.clone(), level).unwrap_or(RiskLevel::Low);
        if level <= previous {
            return Vec::new();
        }

        alert::check_risk_alerts(position, metrics, &self.weights)
            .into_iter()
            .map(|a| ServerEvent::AlertNotification {
                timestamp: Some(a.created_at),
                alert: a,
            })
            .collect()
    }
}

/// Running simulator task. Presents the same surface the session uses for the live feed.
pub struct DemoFeed {
    events_tx: broadcast::Sender<ServerEvent>,
    state_rx: watch::Receiver<ConnectionState>,
    task: Option<JoinHandle<()>>,
}

impl DemoFeed {
    pub fn spawn(mut simulator: DemoSimulator, period: Duration, buffer: usize) -> Self {
        let (events_tx, _) = broadcast::channel(buffer.max(16));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connected);
        let sender = events_tx.clone();

        let task = tokio::spawn(async move {
            let _state_tx = state_tx;
            let mut interval = tokio::time::interval(period);
            info!("🧪 Starting demo event loop");

            loop {
                interval.tick().await;
                let events = simulator.tick();
                debug!("🧪 Demo tick #{} - {} events", simulator.counter, events.len());
                for event in events {
                    if sender.send(event).is_err() {
                        debug!("No demo event receivers active");
                    }
                }
            }
        });

        Self {
            events_tx,
            state_rx,
            task: Some(task),
        }
    }

    pub fn events(&self) -> broadcast::Receiver<ServerEvent> {
        self.events_tx.subscribe()
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub async fn shutdown(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
    }
}

impl Drop for DemoFeed {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::PortfolioState;

    const OWNER: &str = "0xd8da6bf26964af9d7eed9e03e53415d37aa96045";

    fn simulator() -> DemoSimulator {
        DemoSimulator::with_rng(fixture_positions(OWNER), RiskWeights::default(), StdRng::seed_from_u64(7))
    }

    #[tokio::test]
    async fn demo_source_filters_by_protocol() {
        let mut query = PositionsQuery::new(OWNER);
        let all = DemoSource.fetch_positions(&query).await.unwrap();
        assert_eq!(all.total_count, 5);
        assert!(all.positions.iter().all(|p| p.owner_address == OWNER));

        query.protocols = vec!["UNISWAP_V3".to_string()];
        let filtered = DemoSource.fetch_positions(&query).await.unwrap();
        assert_eq!(filtered.total_count, 2);
        assert_eq!(filtered.portfolio_stats.unwrap().total_value_usd, dec!(182500));

        query.chains = vec![137];
        assert_eq!(DemoSource.fetch_positions(&query).await.unwrap().total_count, 0);
    }

    #[tokio::test]
    async fn demo_source_validates_address() {
        assert!(DemoSource.fetch_positions(&PositionsQuery::new("nope")).await.is_err());
        let summary = DemoSource.fetch_summary(OWNER).await.unwrap();
        assert_eq!(summary.rows.len(), 4);
        assert_eq!(summary.total_value_usd, dec!(337500));
    }

    #[test]
    fn first_tick_announces_session() {
        let events = simulator().tick();
        assert!(matches!(events[0], ServerEvent::Connected { .. }));
        assert!(matches!(events[1], ServerEvent::SystemStatus(_)));
        assert!(events.iter().any(|e| matches!(e, ServerEvent::RiskUpdate(_))));
        assert!(matches!(events.last(), Some(ServerEvent::Heartbeat { .. })));
    }

    #[test]
    fn simulated_events_project_onto_fixture_state() {
        let mut state = PortfolioState::new();
        state.load_positions(OWNER, fixture_positions(OWNER), Utc::now());
        let mut sim = simulator();

        for _ in 0..60 {
            for event in sim.tick() {
                state.apply(&event);
            }
        }

        assert_eq!(state.positions().len(), 5);
        for p in state.positions() {
            let risk = state.risk_for(&p.id).expect("risk for every fixture");
            assert!((0.0..=1.0).contains(&risk.overall_risk_score));
            assert!(p.current_value_usd > Decimal::ZERO);
        }
        assert!(state.market(WETH).is_some());
        assert_eq!(state.system_status().unwrap().status, "operational");
        // Tick 50 forces a spike on the first position.
        assert!(!state.alerts().is_empty());
    }

    #[tokio::test]
    async fn demo_feed_streams_until_shutdown() {
        let feed = DemoFeed::spawn(simulator(), Duration::from_millis(10), 256);
        let mut events = feed.events();
        let first = tokio::time::timeout(Duration::from_secs(2), events.recv()).await.unwrap().unwrap();
        assert!(matches!(first, ServerEvent::Connected { .. }));
        assert_eq!(*feed.state().borrow(), ConnectionState::Connected);
        feed.shutdown().await;
    }
}
