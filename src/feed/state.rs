use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::config::FeedSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    ConnectRequested,
    TransportOpened,
    /// Dial failed, or the open transport errored.
    TransportFailed,
    /// Close frame, end of stream, or idle timeout.
    TransportClosed,
    BackoffElapsed,
    RetriesExhausted,
    DisconnectRequested,
}

impl ConnectionState {
    /// Next state for `event`, or `None` if the transition is not allowed.
    pub fn on(self, event: ConnectionEvent) -> Option<ConnectionState> {
        use ConnectionEvent::*;
        use ConnectionState::*;

        match (self, event) {
            (_, DisconnectRequested) => Some(Disconnected),
            (Disconnected, ConnectRequested) => Some(Connecting),
            (Connecting, TransportOpened) => Some(Connected),
            (Connecting, TransportFailed) | (Connecting, TransportClosed) => Some(Reconnecting),
            (Connected, TransportFailed) | (Connected, TransportClosed) => Some(Reconnecting),
            (Reconnecting, BackoffElapsed) => Some(Connecting),
            (Reconnecting, RetriesExhausted) => Some(Disconnected),
            _ => None,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_transitioning(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Reconnecting)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Reconnecting => write!(f, "Reconnecting"),
        }
    }
}

/// Capped exponential backoff with a little random jitter on top.
#[derive(Debug, Clone)]
pub struct Backoff {
    settings: FeedSettings,
    attempt: u32,
    jitter: bool,
}

impl Backoff {
    pub fn new(settings: FeedSettings) -> Self {
        Self {
            settings,
            attempt: 0,
            jitter: true,
        }
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Delay before the next attempt, or `None` once the attempt limit is reached.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.settings.should_reconnect(self.attempt) {
            return None;
        }

        let base = self.settings.reconnect_delay(self.attempt);
        self.attempt += 1;

        if !self.jitter || base.is_zero() {
            return Some(base);
        }

        let max_jitter = base.as_millis() as u64 / 10;
        let extra = if max_jitter > 0 {
            rand::thread_rng().gen_range(0..=max_jitter)
        } else {
            0
        };
        Some(base + Duration::from_millis(extra))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionEvent::*;
    use ConnectionState::*;

    #[test]
    fn happy_path_transitions() {
        let s = Disconnected.on(ConnectRequested).unwrap();
        assert_eq!(s, Connecting);
        let s = s.on(TransportOpened).unwrap();
        assert_eq!(s, Connected);
        let s = s.on(TransportClosed).unwrap();
        assert_eq!(s, Reconnecting);
        let s = s.on(BackoffElapsed).unwrap();
        assert_eq!(s, Connecting);
        assert_eq!(Connected.on(TransportFailed), Some(Reconnecting));
    }

    #[test]
    fn disconnect_from_any_state() {
        for s in [Disconnected, Connecting, Connected, Reconnecting] {
            assert_eq!(s.on(DisconnectRequested), Some(Disconnected));
        }
    }

    #[test]
    fn rejects_invalid_transitions() {
        assert_eq!(Disconnected.on(TransportOpened), None);
        assert_eq!(Connected.on(ConnectRequested), None);
        assert_eq!(Connected.on(BackoffElapsed), None);
        assert_eq!(Reconnecting.on(TransportOpened), None);
        assert_eq!(Disconnected.on(BackoffElapsed), None);
    }

    #[test]
    fn exhausted_retries_end_disconnected() {
        assert_eq!(Reconnecting.on(RetriesExhausted), Some(Disconnected));
        assert_eq!(Connected.on(RetriesExhausted), None);
    }

    #[test]
    fn state_helpers() {
        assert!(Connected.is_connected());
        assert!(Reconnecting.is_transitioning());
        assert!(!Disconnected.is_transitioning());
        assert_eq!(Reconnecting.to_string(), "Reconnecting");
    }

    #[test]
    fn backoff_grows_and_resets() {
        let mut backoff = Backoff::new(FeedSettings::default()).without_jitter();
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(3)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(6)));
        assert_eq!(backoff.attempt(), 2);
        backoff.reset();
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn backoff_jitter_stays_within_ten_percent() {
        let mut backoff = Backoff::new(FeedSettings::default());
        let delay = backoff.next_delay().unwrap();
        assert!(delay >= Duration::from_secs(3));
        assert!(delay <= Duration::from_millis(3300));
    }

    #[test]
    fn backoff_honours_attempt_limit() {
        let settings = FeedSettings {
            max_reconnect_attempts: 2,
            ..FeedSettings::default()
        };
        let mut backoff = Backoff::new(settings);
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_none());
    }
}
