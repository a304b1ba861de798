use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

use crate::feed::codec::{ClientAction, ClientMessage};

/// Topic the client wants pushed to it. Serialised as the externally tagged
/// enum the backend expects, e.g. `{"PositionRisk":"P1"}` or `"SystemStatus"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Subscription {
    PositionRisk(String),
    UserAlerts(String),
    PositionValue(String),
    MarketData(String),
    SystemStatus,
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subscription::PositionRisk(id) => write!(f, "position-risk:{}", id),
            Subscription::UserAlerts(address) => write!(f, "user-alerts:{}", address),
            Subscription::PositionValue(id) => write!(f, "position-value:{}", id),
            Subscription::MarketData(token) => write!(f, "market:{}", token),
            Subscription::SystemStatus => write!(f, "system-status"),
        }
    }
}

/// Client-side set of wanted topics plus the outbound messages still owed to the server.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: Vec<Subscription>,
    pending: VecDeque<ClientMessage>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false, and queues nothing, if the topic is already registered.
    pub fn add(&mut self, subscription: Subscription) -> bool {
        if self.entries.contains(&subscription) {
            return false;
        }

        let cancelled = self.cancel_pending(&subscription, ClientAction::Unsubscribe);
        self.entries.push(subscription.clone());
        if !cancelled {
            self.pending.push_back(ClientMessage::subscribe(subscription));
        }
        true
    }

    /// Returns false, and queues nothing, if the topic is not registered.
    pub fn remove(&mut self, subscription: &Subscription) -> bool {
        let Some(index) = self.entries.iter().position(|s| s == subscription) else {
            return false;
        };

        self.entries.remove(index);
        if !self.cancel_pending(subscription, ClientAction::Subscribe) {
            self.pending.push_back(ClientMessage::unsubscribe(subscription.clone()));
        }
        true
    }

    /// Drops a queued message that the opposite request makes moot.
    fn cancel_pending(&mut self, subscription: &Subscription, action: ClientAction) -> bool {
        let found = self.pending.iter().position(|m| {
            m.action == action && m.subscription_type.as_ref() == Some(subscription)
        });
        match found {
            Some(index) => {
                self.pending.remove(index);
                true
            }
            None => false,
        }
    }

    /// Makes the registered set equal to `desired`, queueing the difference.
    pub fn sync_to(&mut self, desired: &[Subscription]) -> (usize, usize) {
        let stale: Vec<Subscription> = self
            .entries
            .iter()
            .filter(|s| !desired.contains(s))
            .cloned()
            .collect();

        let removed = stale.iter().filter(|s| self.remove(s)).count();
        let added = desired.iter().filter(|s| self.add((*s).clone())).count();
        (added, removed)
    }

    pub fn list(&self) -> &[Subscription] {
        &self.entries
    }

    pub fn contains(&self, subscription: &Subscription) -> bool {
        self.entries.contains(subscription)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn drain_pending(&mut self) -> Vec<ClientMessage> {
        self.pending.drain(..).collect()
    }

    /// Messages for a fresh transport: one subscribe per registered topic.
    /// Anything still queued is dropped, since the new server session starts empty.
    pub fn replay(&mut self) -> Vec<ClientMessage> {
        self.pending.clear();
        self.entries
            .iter()
            .cloned()
            .map(ClientMessage::subscribe)
            .collect()
    }
}
