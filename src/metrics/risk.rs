use crate::config::RiskWeights;
use crate::model::{Position, RiskMetrics};
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s >= 0.8 => RiskLevel::Critical,
            s if s >= 0.6 => RiskLevel::High,
            s if s >= 0.4 => RiskLevel::Medium,
            _ => RiskLevel::Low,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "LOW"),
            RiskLevel::Medium => write!(f, "MEDIUM"),
            RiskLevel::High => write!(f, "HIGH"),
            RiskLevel::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Weighted blend of the five component scores, clamped to 0..=1.
pub fn composite_score(metrics: &RiskMetrics, weights: &RiskWeights) -> f64 {
    let total_weight =
        weights.liquidity + weights.volatility + weights.protocol + weights.mev + weights.cross_chain;
    if total_weight <= 0.0 {
        return 0.0;
    }

    let score = (metrics.liquidity_risk * weights.liquidity)
        + (metrics.volatility_risk * weights.volatility)
        + (metrics.protocol_risk * weights.protocol)
        + (metrics.mev_risk * weights.mev)
        + (metrics.cross_chain_risk * weights.cross_chain);

    (score / total_weight).clamp(0.0, 1.0)
}

/// The backend's overall score when it sent one, otherwise the local composite.
pub fn position_score(metrics: &RiskMetrics, weights: &RiskWeights) -> f64 {
    if metrics.overall_risk_score > 0.0 {
        metrics.overall_risk_score.clamp(0.0, 1.0)
    } else {
        composite_score(metrics, weights)
    }
}

/// Value-weighted mean score over the positions that have metrics. Zero when none do.
pub fn portfolio_score(
    positions: &[Position],
    risk: impl Fn(&str) -> Option<f64>,
) -> f64 {
    let mut weighted = 0.0;
    let mut total_value = 0.0;

    for position in positions {
        let Some(score) = risk(&position.id) else { continue };
        let value = position.current_value_usd.to_f64().unwrap_or(0.0).max(0.0);
        weighted += score * value;
        total_value += value;
    }

    if total_value == 0.0 {
        0.0
    } else {
        (weighted / total_value).clamp(0.0, 1.0)
    }
}

/// Share of portfolio value held in each protocol.
pub fn protocol_concentration(positions: &[Position]) -> HashMap<String, f64> {
    let mut values: HashMap<String, Decimal> = HashMap::new();
    for position in positions {
        *values.entry(position.protocol.clone()).or_insert(Decimal::ZERO) += position.current_value_usd.max(Decimal::ZERO);
    }

    let total = values.values().sum::<Decimal>();
    let mut shares = HashMap::new();
    if total > Decimal::ZERO {
        for (protocol, value) in values {
            shares.insert(protocol, (value / total).to_f64().unwrap_or(0.0));
        }
    }
    shares
}

/// Impermanent loss in percent for a 50/50 pool after the price ratio moved by `price_ratio`.
pub fn impermanent_loss_pct(price_ratio: f64) -> f64 {
    if price_ratio <= 0.0 || !price_ratio.is_finite() {
        return 100.0;
    }
    let value_ratio = 2.0 * price_ratio.sqrt() / (1.0 + price_ratio);
    ((1.0 - value_ratio) * 100.0).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn position(id: &str, protocol: &str, value: Decimal) -> Position {
        Position {
            id: id.to_string(),
            owner_address: "0xowner".to_string(),
            protocol: protocol.to_string(),
            chain_id: 1,
            pool_address: String::new(),
            token0_address: "0x1".to_string(),
            token1_address: "0x2".to_string(),
            token0_symbol: None,
            token1_symbol: None,
            token0_amount: Decimal::ZERO,
            token1_amount: Decimal::ZERO,
            current_value_usd: value,
            pnl_usd: None,
            impermanent_loss_pct: None,
            fees_earned_usd: None,
            updated_at: None,
        }
    }

    #[test]
    fn level_thresholds() {
        assert_eq!(RiskLevel::from_score(0.95), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_score(0.8), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_score(0.6), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(0.45), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(0.1), RiskLevel::Low);
    }

    #[test]
    fn composite_uses_weights() {
        let metrics = RiskMetrics {
            liquidity_risk: 1.0,
            ..RiskMetrics::default()
        };
        let score = composite_score(&metrics, &RiskWeights::default());
        assert!((score - 0.25).abs() < 1e-9);

        let all_high = RiskMetrics {
            liquidity_risk: 1.0,
            volatility_risk: 1.0,
            protocol_risk: 1.0,
            mev_risk: 1.0,
            cross_chain_risk: 1.0,
            ..RiskMetrics::default()
        };
        assert!((composite_score(&all_high, &RiskWeights::default()) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn backend_score_wins_when_present() {
        let metrics = RiskMetrics {
            liquidity_risk: 1.0,
            overall_risk_score: 0.7,
            ..RiskMetrics::default()
        };
        assert!((position_score(&metrics, &RiskWeights::default()) - 0.7).abs() < 1e-9);
    }

    #[test]
    fn portfolio_score_is_value_weighted() {
        let positions = vec![
            position("big", "uniswap_v3", dec!(9000)),
            position("small", "curve", dec!(1000)),
            position("unscored", "lido", dec!(50000)),
        ];
        let score = portfolio_score(&positions, |id| match id {
            "big" => Some(0.2),
            "small" => Some(1.0),
            _ => None,
        });
        assert!((score - 0.28).abs() < 1e-9);
        assert_eq!(portfolio_score(&positions, |_| None), 0.0);
    }

    #[test]
    fn concentration_by_protocol() {
        let positions = vec![
            position("a", "uniswap_v3", dec!(300)),
            position("b", "uniswap_v3", dec!(300)),
            position("c", "aave_v3", dec!(400)),
        ];
        let shares = protocol_concentration(&positions);
        assert!((shares["uniswap_v3"] - 0.6).abs() < 1e-9);
        assert!((shares["aave_v3"] - 0.4).abs() < 1e-9);
        assert!(protocol_concentration(&[]).is_empty());
    }

    #[test]
    fn impermanent_loss_curve() {
        assert!(impermanent_loss_pct(1.0).abs() < 1e-9);
        assert!((impermanent_loss_pct(4.0) - 20.0).abs() < 1e-9);
        assert!((impermanent_loss_pct(0.25) - 20.0).abs() < 1e-9);
    }
}
