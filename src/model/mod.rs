pub mod de;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    #[serde(alias = "user_address")]
    pub owner_address: String,
    pub protocol: String,
    pub chain_id: u64,
    #[serde(default)]
    pub pool_address: String,
    pub token0_address: String,
    pub token1_address: String,
    #[serde(default)]
    pub token0_symbol: Option<String>,
    #[serde(default)]
    pub token1_symbol: Option<String>,
    #[serde(default, deserialize_with = "de::decimal")]
    pub token0_amount: Decimal,
    #[serde(default, deserialize_with = "de::decimal")]
    pub token1_amount: Decimal,
    #[serde(default, alias = "value_usd", deserialize_with = "de::decimal")]
    pub current_value_usd: Decimal,
    #[serde(default, deserialize_with = "de::option_decimal")]
    pub pnl_usd: Option<Decimal>,
    #[serde(default, deserialize_with = "de::option_decimal")]
    pub impermanent_loss_pct: Option<Decimal>,
    #[serde(default, deserialize_with = "de::option_decimal")]
    pub fees_earned_usd: Option<Decimal>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Position {
    pub fn pair_label(&self) -> String {
        let t0 = self.token0_symbol.clone().unwrap_or_else(|| short_address(&self.token0_address));
        let t1 = self.token1_symbol.clone().unwrap_or_else(|| short_address(&self.token1_address));
        format!("{}/{}", t0, t1)
    }
}

pub fn short_address(address: &str) -> String {
    if address.is_ascii() && address.len() > 10 {
        format!("{}…{}", &address[..6], &address[address.len() - 4..])
    } else {
        address.to_string()
    }
}

/// Per-position risk scores on a 0..=1 scale, plus derived figures.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskMetrics {
    #[serde(alias = "liquidity_score", deserialize_with = "de::lenient_f64")]
    pub liquidity_risk: f64,
    #[serde(alias = "volatility_score", deserialize_with = "de::lenient_f64")]
    pub volatility_risk: f64,
    #[serde(alias = "protocol_risk_score", deserialize_with = "de::lenient_f64")]
    pub protocol_risk: f64,
    #[serde(alias = "mev_risk_score", deserialize_with = "de::lenient_f64")]
    pub mev_risk: f64,
    #[serde(alias = "cross_chain_risk_score", deserialize_with = "de::lenient_f64")]
    pub cross_chain_risk: f64,
    #[serde(deserialize_with = "de::lenient_f64")]
    pub overall_risk_score: f64,
    #[serde(alias = "impermanent_loss", deserialize_with = "de::lenient_f64")]
    pub impermanent_loss_pct: f64,
    #[serde(deserialize_with = "de::lenient_f64")]
    pub max_drawdown: f64,
    #[serde(deserialize_with = "de::lenient_f64")]
    pub sharpe_ratio: f64,
    #[serde(deserialize_with = "de::lenient_f64")]
    pub value_at_risk_1d: f64,
    #[serde(deserialize_with = "de::lenient_f64")]
    pub value_at_risk_7d: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AlertSeverity {
    #[serde(alias = "low", alias = "LOW")]
    Low,
    #[serde(alias = "medium", alias = "MEDIUM")]
    Medium,
    #[serde(alias = "high", alias = "HIGH")]
    High,
    #[serde(alias = "critical", alias = "CRITICAL")]
    Critical,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AlertSeverity::Low => "LOW",
            AlertSeverity::Medium => "MEDIUM",
            AlertSeverity::High => "HIGH",
            AlertSeverity::Critical => "CRITICAL",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    #[serde(default)]
    pub position_id: Option<String>,
    #[serde(default)]
    pub alert_type: String,
    pub severity: AlertSeverity,
    #[serde(default)]
    pub title: String,
    pub message: String,
    #[serde(default, alias = "resolved")]
    pub is_resolved: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub token_address: String,
    #[serde(deserialize_with = "de::decimal")]
    pub price_usd: Decimal,
    #[serde(default, deserialize_with = "de::decimal")]
    pub price_change_24h: Decimal,
    #[serde(default, deserialize_with = "de::decimal")]
    pub volatility: Decimal,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatusInfo {
    pub status: String,
    #[serde(default)]
    pub message: String,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortfolioStats {
    #[serde(default, deserialize_with = "de::decimal")]
    pub total_value_usd: Decimal,
    #[serde(default, deserialize_with = "de::option_decimal")]
    pub total_pnl_usd: Option<Decimal>,
    #[serde(default)]
    pub protocol_count: u32,
    #[serde(default)]
    pub chain_count: u32,
}

/// Body of `GET /api/v1/positions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionsResponse {
    pub total_count: u64,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub positions: Vec<Position>,
    #[serde(default)]
    pub portfolio_stats: Option<PortfolioStats>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub protocol: String,
    pub chain_id: u64,
    pub positions: u32,
    #[serde(deserialize_with = "de::decimal")]
    pub total_value_usd: Decimal,
}

/// Body of `GET /api/v1/positions/summary`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionsSummary {
    #[serde(default)]
    pub rows: Vec<SummaryRow>,
    #[serde(default, deserialize_with = "de::decimal")]
    pub total_value_usd: Decimal,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub warnings: Vec<String>,
}
