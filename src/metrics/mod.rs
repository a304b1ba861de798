use crate::config::RiskWeights;
use crate::feed::PortfolioState;
use crate::model::AlertSeverity;
use rust_decimal::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};

pub mod risk;

pub use risk::RiskLevel;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionRow {
    pub position_id: String,
    pub protocol: String,
    pub chain_id: u64,
    pub pair: String,
    pub value_usd: Decimal,
    pub pnl_usd: Option<Decimal>,
    pub impermanent_loss_pct: Option<Decimal>,
    pub score: Option<f64>,
    pub level: Option<RiskLevel>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioSummary {
    pub total_value_usd: Decimal,
    pub total_pnl_usd: Decimal,
    pub position_count: usize,
    pub protocol_count: usize,
    pub chain_count: usize,
    pub weighted_risk: f64,
    pub risk_level: RiskLevel,
    pub largest_protocol_share: f64,
    pub unresolved_alerts: BTreeMap<AlertSeverity, usize>,
}

pub fn position_rows(state: &PortfolioState, weights: &RiskWeights) -> Vec<PositionRow> {
    state
        .positions()
        .iter()
        .map(|p| {
            let score = state.risk_for(&p.id).map(|m| risk::position_score(m, weights));
            PositionRow {
                position_id: p.id.clone(),
                protocol: p.protocol.clone(),
                chain_id: p.chain_id,
                pair: p.pair_label(),
                value_usd: p.current_value_usd,
                pnl_usd: p.pnl_usd,
                impermanent_loss_pct: p
                    .impermanent_loss_pct
                    .or_else(|| state.risk_for(&p.id).and_then(|m| Decimal::from_f64(m.impermanent_loss_pct))),
                score,
                level: score.map(RiskLevel::from_score),
            }
        })
        .collect()
}

pub fn summarize(state: &PortfolioState, weights: &RiskWeights) -> PortfolioSummary {
    let positions = state.positions();

    let total_value_usd = positions.iter().map(|p| p.current_value_usd).sum::<Decimal>();
    let total_pnl_usd = positions.iter().filter_map(|p| p.pnl_usd).sum::<Decimal>();
    let protocol_count = positions.iter().map(|p| p.protocol.as_str()).collect::<HashSet<_>>().len();
    let chain_count = positions.iter().map(|p| p.chain_id).collect::<HashSet<_>>().len();

    let weighted_risk = risk::portfolio_score(positions, |id| {
        state.risk_for(id).map(|m| risk::position_score(m, weights))
    });

    let concentration: HashMap<String, f64> = risk::protocol_concentration(positions);
    let largest_protocol_share = concentration.values().fold(0.0f64, |acc, &x| acc.max(x));

    let mut unresolved_alerts = BTreeMap::new();
    for alert in state.unresolved_alerts() {
        *unresolved_alerts.entry(alert.severity).or_insert(0) += 1;
    }

    PortfolioSummary {
        total_value_usd,
        total_pnl_usd,
        position_count: positions.len(),
        protocol_count,
        chain_count,
        weighted_risk,
        risk_level: RiskLevel::from_score(weighted_risk),
        largest_protocol_share,
        unresolved_alerts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::codec::{RiskUpdate, ServerEvent};
    use crate::model::{Alert, Position, RiskMetrics};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn position(id: &str, protocol: &str, chain_id: u64, value: Decimal, pnl: Decimal) -> Position {
        Position {
            id: id.to_string(),
            owner_address: "0xowner".to_string(),
            protocol: protocol.to_string(),
            chain_id,
            pool_address: String::new(),
            token0_address: "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48".to_string(),
            token1_address: "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2".to_string(),
            token0_symbol: Some("USDC".to_string()),
            token1_symbol: Some("WETH".to_string()),
            token0_amount: Decimal::ZERO,
            token1_amount: Decimal::ZERO,
            current_value_usd: value,
            pnl_usd: Some(pnl),
            impermanent_loss_pct: None,
            fees_earned_usd: None,
            updated_at: None,
        }
    }

    fn state() -> PortfolioState {
        let mut state = PortfolioState::new();
        state.load_positions(
            "0xowner",
            vec![
                position("P1", "uniswap_v3", 1, dec!(7500), dec!(250)),
                position("P2", "aave_v3", 10, dec!(2500), dec!(-50)),
            ],
            Utc::now(),
        );
        state
    }

    #[test]
    fn summary_totals_and_counts() {
        let mut state = state();
        state.apply(&ServerEvent::RiskUpdate(RiskUpdate {
            position_id: "P1".to_string(),
            risk_metrics: RiskMetrics {
                overall_risk_score: 0.9,
                ..RiskMetrics::default()
            },
            timestamp: None,
        }));
        state.apply(&ServerEvent::AlertNotification {
            alert: Alert {
                id: "A1".to_string(),
                position_id: Some("P1".to_string()),
                alert_type: "risk_threshold".to_string(),
                severity: AlertSeverity::Critical,
                title: "Risk".to_string(),
                message: "risk above 0.8".to_string(),
                is_resolved: false,
                created_at: Utc::now(),
            },
            timestamp: None,
        });

        let summary = summarize(&state, &RiskWeights::default());
        assert_eq!(summary.total_value_usd, dec!(10000));
        assert_eq!(summary.total_pnl_usd, dec!(200));
        assert_eq!(summary.position_count, 2);
        assert_eq!(summary.protocol_count, 2);
        assert_eq!(summary.chain_count, 2);
        assert!((summary.weighted_risk - 0.9).abs() < 1e-9);
        assert_eq!(summary.risk_level, RiskLevel::Critical);
        assert!((summary.largest_protocol_share - 0.75).abs() < 1e-9);
        assert_eq!(summary.unresolved_alerts.get(&AlertSeverity::Critical), Some(&1));
    }

    #[test]
    fn rows_carry_scores_only_where_known() {
        let mut state = state();
        state.apply(&ServerEvent::RiskUpdate(RiskUpdate {
            position_id: "P2".to_string(),
            risk_metrics: RiskMetrics {
                liquidity_risk: 0.45,
                volatility_risk: 0.45,
                protocol_risk: 0.45,
                mev_risk: 0.45,
                cross_chain_risk: 0.45,
                impermanent_loss_pct: 3.5,
                ..RiskMetrics::default()
            },
            timestamp: None,
        }));

        let rows = position_rows(&state, &RiskWeights::default());
        assert_eq!(rows[0].score, None);
        assert_eq!(rows[0].pair, "USDC/WETH");
        assert!((rows[1].score.unwrap() - 0.45).abs() < 1e-9);
        assert_eq!(rows[1].level, Some(RiskLevel::Medium));
        assert_eq!(rows[1].impermanent_loss_pct, Some(dec!(3.5)));
    }

    #[test]
    fn empty_portfolio() {
        let summary = summarize(&PortfolioState::new(), &RiskWeights::default());
        assert_eq!(summary.total_value_usd, Decimal::ZERO);
        assert_eq!(summary.risk_level, RiskLevel::Low);
        assert!(summary.unresolved_alerts.is_empty());
    }
}
