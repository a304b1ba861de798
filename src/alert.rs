use crate::config::RiskWeights;
use crate::metrics::risk;
use crate::model::{Alert, AlertSeverity, Position, RiskMetrics};
use chrono::Utc;
use log::{error, warn};
use uuid::Uuid;

/// Threshold alerts for one position, raised locally from its risk metrics.
pub fn check_risk_alerts(position: &Position, metrics: &RiskMetrics, weights: &RiskWeights) -> Vec<Alert> {
    let mut alerts = Vec::new();
    let score = risk::position_score(metrics, weights);
    let pair = position.pair_label();

    if score >= 0.8 {
        alerts.push(create_alert(
            position,
            AlertSeverity::Critical,
            "risk_threshold",
            "Critical Risk".to_string(),
            format!("{} risk score at {:.2}", pair, score),
        ));
    } else if score >= 0.6 {
        alerts.push(create_alert(
            position,
            AlertSeverity::High,
            "risk_threshold",
            "High Risk".to_string(),
            format!("{} risk score at {:.2}", pair, score),
        ));
    }

    if metrics.impermanent_loss_pct > 10.0 {
        alerts.push(create_alert(
            position,
            AlertSeverity::High,
            "impermanent_loss",
            "Impermanent Loss".to_string(),
            format!("{} impermanent loss at {:.1}%", pair, metrics.impermanent_loss_pct),
        ));
    } else if metrics.impermanent_loss_pct > 5.0 {
        alerts.push(create_alert(
            position,
            AlertSeverity::Medium,
            "impermanent_loss",
            "Impermanent Loss".to_string(),
            format!("{} impermanent loss at {:.1}%", pair, metrics.impermanent_loss_pct),
        ));
    }

    if metrics.liquidity_risk > 0.7 {
        alerts.push(create_alert(
            position,
            AlertSeverity::Medium,
            "liquidity_risk",
            "Thin Liquidity".to_string(),
            format!("{} pool liquidity risk at {:.2}", pair, metrics.liquidity_risk),
        ));
    }

    if metrics.mev_risk > 0.7 {
        alerts.push(create_alert(
            position,
            AlertSeverity::Low,
            "mev_risk",
            "MEV Exposure".to_string(),
            format!("{} MEV risk at {:.2}", pair, metrics.mev_risk),
        ));
    }

    alerts
}

fn create_alert(
    position: &Position,
    severity: AlertSeverity,
    alert_type: &str,
    title: String,
    message: String,
) -> Alert {
    Alert {
        id: Uuid::new_v4().to_string(),
        position_id: Some(position.id.clone()),
        alert_type: alert_type.to_string(),
        severity,
        title,
        message,
        is_resolved: false,
        created_at: Utc::now(),
    }
}

/// Target of the "acknowledge" key. Alerts are held most recent first.
pub fn newest_unresolved(alerts: &[Alert]) -> Option<&Alert> {
    alerts.iter().find(|a| !a.is_resolved)
}

/// Logs newly arrived unresolved critical alerts. `last_count` carries the count between calls.
pub fn check_critical_alerts(alerts: &[Alert], last_count: &mut usize) -> usize {
    let critical: Vec<&Alert> = alerts
        .iter()
        .filter(|a| a.severity == AlertSeverity::Critical && !a.is_resolved)
        .collect();

    let current = critical.len();
    let fresh = current.saturating_sub(*last_count);

    if fresh > 0 {
        warn!("🔴 {} new critical alert(s) detected!", fresh);
        for alert in critical.iter().take(fresh) {
            error!("CRITICAL: {} - {}", alert.title, alert.message);
        }
    }

    *last_count = current;
    fresh
}
