use chrono::{DateTime, Utc};
use log::debug;
use std::collections::HashMap;

use crate::feed::codec::{PositionPatch, RiskUpdate, ServerEvent};
use crate::model::{Alert, MarketSnapshot, Position, RiskMetrics, SystemStatusInfo};

/// In-memory view state fed by REST loads and live events.
///
/// Every event application is a pure replace or merge, so applying the same
/// event twice leaves the state as applying it once.
#[derive(Debug, Clone, Default)]
pub struct PortfolioState {
    owner: Option<String>,
    positions: Vec<Position>,
    risk: HashMap<String, RiskMetrics>,
    alerts: Vec<Alert>,
    markets: HashMap<String, MarketSnapshot>,
    system_status: Option<SystemStatusInfo>,
    session_id: Option<String>,
    last_event_at: Option<DateTime<Utc>>,
    last_loaded_at: Option<DateTime<Utc>>,
}

impl PortfolioState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the position set. A different owner also drops everything tied to the old one.
    pub fn load_positions(&mut self, owner: &str, positions: Vec<Position>, loaded_at: DateTime<Utc>) {
        if self.owner.as_deref() != Some(owner) {
            debug!("👛 Owner changed to {}, clearing portfolio state", owner);
            self.risk.clear();
            self.alerts.clear();
            self.markets.clear();
            self.owner = Some(owner.to_string());
        }

        self.risk.retain(|id, _| positions.iter().any(|p| &p.id == id));
        self.positions = positions;
        self.last_loaded_at = Some(loaded_at);
    }

    pub fn apply(&mut self, event: &ServerEvent) -> bool {
        match event {
            ServerEvent::Connected { session_id, timestamp } => {
                self.touch(*timestamp);
                if self.session_id.as_deref() == Some(session_id.as_str()) {
                    return false;
                }
                self.session_id = Some(session_id.clone());
                true
            }
            ServerEvent::Heartbeat { timestamp } => {
                self.touch(*timestamp);
                false
            }
            ServerEvent::RiskUpdate(update) => self.apply_risk(update),
            ServerEvent::AlertNotification { alert, .. } => self.apply_alert(alert),
            ServerEvent::PositionUpdate(patch) => self.apply_patch(patch),
            ServerEvent::MarketUpdate(snapshot) => {
                let key = snapshot.token_address.to_lowercase();
                if self.markets.get(&key) == Some(snapshot) {
                    return false;
                }
                self.markets.insert(key, snapshot.clone());
                true
            }
            ServerEvent::SystemStatus(status) => {
                if self.system_status.as_ref() == Some(status) {
                    return false;
                }
                self.system_status = Some(status.clone());
                true
            }
        }
    }

    fn touch(&mut self, timestamp: Option<DateTime<Utc>>) {
        let ts = timestamp.unwrap_or_else(Utc::now);
        if self.last_event_at.map_or(true, |last| ts > last) {
            self.last_event_at = Some(ts);
        }
    }

    fn apply_risk(&mut self, update: &RiskUpdate) -> bool {
        if !self.positions.iter().any(|p| p.id == update.position_id) {
            debug!("❓ Risk update for unknown position {}, ignoring", update.position_id);
            return false;
        }
        if self.risk.get(&update.position_id) == Some(&update.risk_metrics) {
            return false;
        }
        self.risk.insert(update.position_id.clone(), update.risk_metrics.clone());
        true
    }

    fn apply_alert(&mut self, alert: &Alert) -> bool {
        if let Some(existing) = self.alerts.iter_mut().find(|a| a.id == alert.id) {
            // Keep a local acknowledgement even if the server resends the alert unresolved.
            let mut incoming = alert.clone();
            incoming.is_resolved |= existing.is_resolved;
            if *existing == incoming {
                return false;
            }
            *existing = incoming;
            return true;
        }
        self.alerts.insert(0, alert.clone());
        true
    }

    fn apply_patch(&mut self, patch: &PositionPatch) -> bool {
        let Some(position) = self.positions.iter_mut().find(|p| p.id == patch.position_id) else {
            debug!("❓ Value update for unknown position {}, ignoring", patch.position_id);
            return false;
        };

        let before = position.clone();
        if let Some(v) = patch.current_value_usd {
            position.current_value_usd = v;
        }
        if let Some(v) = patch.pnl_usd {
            position.pnl_usd = Some(v);
        }
        if let Some(v) = patch.impermanent_loss_pct {
            position.impermanent_loss_pct = Some(v);
        }
        if let Some(v) = patch.fees_earned_usd {
            position.fees_earned_usd = Some(v);
        }
        if let Some(v) = patch.token0_amount {
            position.token0_amount = v;
        }
        if let Some(v) = patch.token1_amount {
            position.token1_amount = v;
        }
        if let Some(ts) = patch.timestamp {
            position.updated_at = Some(ts);
        }
        *position != before
    }

    /// Local "acknowledge" action. Returns false if the alert is unknown or already resolved.
    pub fn acknowledge(&mut self, alert_id: &str) -> bool {
        match self.alerts.iter_mut().find(|a| a.id == alert_id) {
            Some(alert) if !alert.is_resolved => {
                alert.is_resolved = true;
                true
            }
            _ => false,
        }
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    pub fn position(&self, id: &str) -> Option<&Position> {
        self.positions.iter().find(|p| p.id == id)
    }

    pub fn risk_for(&self, position_id: &str) -> Option<&RiskMetrics> {
        self.risk.get(position_id)
    }

    /// Most recent first.
    pub fn alerts(&self) -> &[Alert] {
        &self.alerts
    }

    pub fn unresolved_alerts(&self) -> impl Iterator<Item = &Alert> {
        self.alerts.iter().filter(|a| !a.is_resolved)
    }

    pub fn market(&self, token_address: &str) -> Option<&MarketSnapshot> {
        self.markets.get(&token_address.to_lowercase())
    }

    pub fn markets(&self) -> impl Iterator<Item = &MarketSnapshot> {
        self.markets.values()
    }

    pub fn system_status(&self) -> Option<&SystemStatusInfo> {
        self.system_status.as_ref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn last_event_at(&self) -> Option<DateTime<Utc>> {
        self.last_event_at
    }

    pub fn last_loaded_at(&self) -> Option<DateTime<Utc>> {
        self.last_loaded_at
    }
}
