//! Wire codec for the live update feed.
//!
//! Server frames are envelopes of the form `{"type": ..., "data": {...}, "timestamp": ...}`.
//! Client frames are `{"action": "subscribe" | "unsubscribe" | "heartbeat", "subscription_type": ...}`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, AppResult};
use crate::feed::subscription::Subscription;
use crate::model::{de, Alert, MarketSnapshot, RiskMetrics, SystemStatusInfo};

#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Connected {
        session_id: String,
        timestamp: Option<DateTime<Utc>>,
    },
    Heartbeat {
        timestamp: Option<DateTime<Utc>>,
    },
    RiskUpdate(RiskUpdate),
    AlertNotification {
        alert: Alert,
        timestamp: Option<DateTime<Utc>>,
    },
    PositionUpdate(PositionPatch),
    MarketUpdate(MarketSnapshot),
    SystemStatus(SystemStatusInfo),
}

impl ServerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::Connected { .. } => "Connected",
            ServerEvent::Heartbeat { .. } => "Heartbeat",
            ServerEvent::RiskUpdate(_) => "RiskUpdate",
            ServerEvent::AlertNotification { .. } => "AlertNotification",
            ServerEvent::PositionUpdate(_) => "PositionUpdate",
            ServerEvent::MarketUpdate(_) => "MarketUpdate",
            ServerEvent::SystemStatus(_) => "SystemStatus",
        }
    }

    pub fn is_heartbeat(&self) -> bool {
        matches!(self, ServerEvent::Heartbeat { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskUpdate {
    pub position_id: String,
    pub risk_metrics: RiskMetrics,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Changed fields of a position. Absent fields are left untouched by the projector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionPatch {
    pub position_id: String,
    #[serde(default, deserialize_with = "de::option_decimal")]
    pub current_value_usd: Option<Decimal>,
    #[serde(default, deserialize_with = "de::option_decimal")]
    pub pnl_usd: Option<Decimal>,
    #[serde(default, deserialize_with = "de::option_decimal")]
    pub impermanent_loss_pct: Option<Decimal>,
    #[serde(default, deserialize_with = "de::option_decimal")]
    pub fees_earned_usd: Option<Decimal>,
    #[serde(default, deserialize_with = "de::option_decimal")]
    pub token0_amount: Option<Decimal>,
    #[serde(default, deserialize_with = "de::option_decimal")]
    pub token1_amount: Option<Decimal>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Result of decoding one text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Event(ServerEvent),
    /// Well-formed envelope with a `type` this client does not know.
    Unknown(String),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct ConnectedData {
    session_id: String,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct HeartbeatData {
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct AlertData {
    alert: Alert,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

fn payload<T: for<'de> Deserialize<'de>>(kind: &str, data: Value) -> AppResult<T> {
    let data = if data.is_null() { Value::Object(Default::default()) } else { data };
    serde_json::from_value(data)
        .map_err(|e| AppError::Decode(format!("invalid {} payload: {}", kind, e)))
}

pub fn decode(text: &str) -> AppResult<Decoded> {
    let envelope: Envelope = serde_json::from_str(text)
        .map_err(|e| AppError::Decode(format!("malformed frame: {}", e)))?;
    let outer = envelope.timestamp;
    let kind = envelope.kind.as_str();

    let event = match kind {
        "Connected" => {
            let d: ConnectedData = payload(kind, envelope.data)?;
            ServerEvent::Connected {
                session_id: d.session_id,
                timestamp: outer.or(d.timestamp),
            }
        }
        "Heartbeat" => {
            let d: HeartbeatData = payload(kind, envelope.data)?;
            ServerEvent::Heartbeat {
                timestamp: outer.or(d.timestamp),
            }
        }
        "RiskUpdate" => {
            let mut d: RiskUpdate = payload(kind, envelope.data)?;
            d.timestamp = outer.or(d.timestamp);
            ServerEvent::RiskUpdate(d)
        }
        "AlertNotification" => {
            let d: AlertData = payload(kind, envelope.data)?;
            ServerEvent::AlertNotification {
                alert: d.alert,
                timestamp: outer.or(d.timestamp),
            }
        }
        "PositionUpdate" => {
            let mut d: PositionPatch = payload(kind, envelope.data)?;
            d.timestamp = outer.or(d.timestamp);
            ServerEvent::PositionUpdate(d)
        }
        "MarketUpdate" => {
            let mut d: MarketSnapshot = payload(kind, envelope.data)?;
            d.timestamp = outer.or(d.timestamp);
            ServerEvent::MarketUpdate(d)
        }
        "SystemStatus" => {
            let mut d: SystemStatusInfo = payload(kind, envelope.data)?;
            d.timestamp = outer.or(d.timestamp);
            ServerEvent::SystemStatus(d)
        }
        other => return Ok(Decoded::Unknown(other.to_string())),
    };

    Ok(Decoded::Event(event))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientAction {
    Subscribe,
    Unsubscribe,
    Heartbeat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMessage {
    pub action: ClientAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_type: Option<Subscription>,
}

impl ClientMessage {
    pub fn subscribe(subscription: Subscription) -> Self {
        Self {
            action: ClientAction::Subscribe,
            subscription_type: Some(subscription),
        }
    }

    pub fn unsubscribe(subscription: Subscription) -> Self {
        Self {
            action: ClientAction::Unsubscribe,
            subscription_type: Some(subscription),
        }
    }

    pub fn heartbeat() -> Self {
        Self {
            action: ClientAction::Heartbeat,
            subscription_type: None,
        }
    }
}

pub fn encode(message: &ClientMessage) -> AppResult<String> {
    Ok(serde_json::to_string(message)?)
}

/// The frame the client must answer with, if any. Only server heartbeats get a reply.
pub fn reply_for(event: &ServerEvent) -> Option<ClientMessage> {
    if event.is_heartbeat() {
        Some(ClientMessage::heartbeat())
    } else {
        None
    }
}
