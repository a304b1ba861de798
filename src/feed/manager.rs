use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::config::FeedSettings;
use crate::error::{AppError, AppResult};
use crate::feed::codec::{self, ClientMessage, Decoded, ServerEvent};
use crate::feed::state::{Backoff, ConnectionEvent, ConnectionState};
use crate::feed::subscription::{Subscription, SubscriptionRegistry};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

#[derive(Debug)]
enum Command {
    Subscribe(Subscription),
    Unsubscribe(Subscription),
    Sync(Vec<Subscription>),
    Reconnect,
    Disconnect,
}

/// Adds the owner address as a `user_address` query parameter, which the
/// backend uses to route alert notifications.
pub fn feed_url(base: &str, user_address: Option<&str>) -> AppResult<String> {
    let mut url = url::Url::parse(base)
        .map_err(|e| AppError::Validation(format!("invalid feed url {}: {}", base, e)))?;
    if let Some(address) = user_address {
        url.query_pairs_mut().append_pair("user_address", address);
    }
    Ok(url.to_string())
}

pub struct FeedClient {
    url: String,
    settings: FeedSettings,
    registry: SubscriptionRegistry,
    backoff: Backoff,
    state: ConnectionState,
    cmd_rx: mpsc::Receiver<Command>,
    state_tx: watch::Sender<ConnectionState>,
    events_tx: broadcast::Sender<ServerEvent>,
}

/// Owner's side of a running feed. Dropping it aborts the connection task.
pub struct FeedHandle {
    cmd_tx: mpsc::Sender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    events_tx: broadcast::Sender<ServerEvent>,
    task: Option<JoinHandle<()>>,
}

enum Dial {
    Opened(WsStream),
    Failed,
    Shutdown,
}

enum SessionEnd {
    Lost(ConnectionEvent),
    Shutdown,
}

impl FeedClient {
    pub fn spawn(settings: FeedSettings, url: String) -> FeedHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (events_tx, _) = broadcast::channel(settings.event_buffer.max(16));

        let client = FeedClient {
            url,
            backoff: Backoff::new(settings.clone()),
            settings,
            registry: SubscriptionRegistry::new(),
            state: ConnectionState::Disconnected,
            cmd_rx,
            state_tx,
            events_tx: events_tx.clone(),
        };

        let task = tokio::spawn(client.run());

        FeedHandle {
            cmd_tx,
            state_rx,
            events_tx,
            task: Some(task),
        }
    }

    fn transition(&mut self, event: ConnectionEvent) {
        match self.state.on(event) {
            Some(next) => {
                if next != self.state {
                    debug!("🔀 Feed {} -> {} ({:?})", self.state, next, event);
                }
                self.state = next;
                self.state_tx.send_replace(next);
            }
            None => warn!("⚠️ Ignoring {:?} while {}", event, self.state),
        }
    }

    async fn run(mut self) {
        self.transition(ConnectionEvent::ConnectRequested);

        loop {
            match self.state {
                ConnectionState::Connecting => match self.dial().await {
                    Dial::Opened(ws) => {
                        info!("✅ Live feed connected: {}", self.url);
                        self.transition(ConnectionEvent::TransportOpened);
                        self.backoff.reset();
                        match self.drive(ws).await {
                            SessionEnd::Lost(event) => self.transition(event),
                            SessionEnd::Shutdown => break,
                        }
                    }
                    Dial::Failed => self.transition(ConnectionEvent::TransportFailed),
                    Dial::Shutdown => break,
                },
                ConnectionState::Reconnecting => match self.backoff.next_delay() {
                    Some(delay) => {
                        info!(
                            "🔄 Reconnecting in {:.1}s (attempt {})",
                            delay.as_secs_f64(),
                            self.backoff.attempt()
                        );
                        if !self.wait(delay).await {
                            break;
                        }
                        self.transition(ConnectionEvent::BackoffElapsed);
                    }
                    None => {
                        error!("❌ Giving up on live feed after {} attempts", self.backoff.attempt());
                        self.transition(ConnectionEvent::RetriesExhausted);
                    }
                },
                ConnectionState::Disconnected => {
                    // Only reached once retries are exhausted; park until told otherwise.
                    let command = self.cmd_rx.recv().await;
                    match command {
                        Some(Command::Reconnect) => {
                            self.backoff.reset();
                            self.transition(ConnectionEvent::ConnectRequested);
                        }
                        other => {
                            if !self.handle_offline(other) {
                                break;
                            }
                        }
                    }
                }
                ConnectionState::Connected => {
                    self.transition(ConnectionEvent::TransportClosed);
                }
            }
        }

        self.transition(ConnectionEvent::DisconnectRequested);
        info!("🔌 Live feed stopped");
    }

    /// Applies a command while no transport is open. Returns false when the feed should stop.
    fn handle_offline(&mut self, command: Option<Command>) -> bool {
        match command {
            Some(Command::Subscribe(sub)) => {
                self.registry.add(sub);
            }
            Some(Command::Unsubscribe(sub)) => {
                self.registry.remove(&sub);
            }
            Some(Command::Sync(subs)) => {
                self.registry.sync_to(&subs);
            }
            Some(Command::Reconnect) => {}
            Some(Command::Disconnect) | None => return false,
        }
        true
    }

    async fn dial(&mut self) -> Dial {
        let connect = timeout(self.settings.connect_timeout(), connect_async(self.url.clone()));
        tokio::pin!(connect);

        loop {
            tokio::select! {
                result = &mut connect => {
                    return match result {
                        Ok(Ok((ws, _))) => Dial::Opened(ws),
                        Ok(Err(e)) => {
                            warn!("⚠️ Live feed connect failed: {}", e);
                            Dial::Failed
                        }
                        Err(_) => {
                            warn!("⏰ Live feed connect timed out after {}ms", self.settings.connect_timeout_ms);
                            Dial::Failed
                        }
                    };
                }
                command = self.cmd_rx.recv() => {
                    if !self.handle_offline(command) {
                        return Dial::Shutdown;
                    }
                }
            }
        }
    }

    /// Sleeps out a backoff delay while still taking commands. False means shut down.
    async fn wait(&mut self, delay: std::time::Duration) -> bool {
        let timer = sleep(delay);
        tokio::pin!(timer);

        loop {
            tokio::select! {
                _ = &mut timer => return true,
                command = self.cmd_rx.recv() => {
                    if !self.handle_offline(command) {
                        return false;
                    }
                }
            }
        }
    }

    async fn drive(&mut self, ws: WsStream) -> SessionEnd {
        let (mut sink, mut stream) = ws.split();

        let replay = self.registry.replay();
        debug!("📡 Replaying {} subscriptions", replay.len());
        for message in &replay {
            if let Err(e) = send(&mut sink, message).await {
                warn!("⚠️ Failed to send subscription: {}", e);
                return SessionEnd::Lost(ConnectionEvent::TransportFailed);
            }
        }

        let period = self.settings.heartbeat_interval();
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let idle_timeout = self.settings.idle_timeout();
        let idle = sleep(idle_timeout);
        tokio::pin!(idle);

        loop {
            tokio::select! {
                command = self.cmd_rx.recv() => {
                    match command {
                        Some(Command::Subscribe(sub)) => {
                            self.registry.add(sub);
                        }
                        Some(Command::Unsubscribe(sub)) => {
                            self.registry.remove(&sub);
                        }
                        Some(Command::Sync(subs)) => {
                            let (added, removed) = self.registry.sync_to(&subs);
                            if added + removed > 0 {
                                debug!("📡 Subscriptions synced: +{} -{}", added, removed);
                            }
                        }
                        Some(Command::Reconnect) => {}
                        Some(Command::Disconnect) | None => {
                            let _ = sink.close().await;
                            return SessionEnd::Shutdown;
                        }
                    }

                    for message in self.registry.drain_pending() {
                        if let Err(e) = send(&mut sink, &message).await {
                            warn!("⚠️ Failed to send {:?}: {}", message.action, e);
                            return SessionEnd::Lost(ConnectionEvent::TransportFailed);
                        }
                    }
                }

                _ = heartbeat.tick() => {
                    if let Err(e) = send(&mut sink, &ClientMessage::heartbeat()).await {
                        warn!("⚠️ Failed to send heartbeat: {}", e);
                        return SessionEnd::Lost(ConnectionEvent::TransportFailed);
                    }
                }

                _ = &mut idle => {
                    warn!("⏰ No frames for {}s, dropping connection", idle_timeout.as_secs());
                    let _ = sink.close().await;
                    return SessionEnd::Lost(ConnectionEvent::TransportClosed);
                }

                frame = stream.next() => {
                    idle.as_mut().reset(Instant::now() + idle_timeout);

                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            if let Err(e) = self.on_text(&text, &mut sink).await {
                                warn!("⚠️ Failed to answer heartbeat: {}", e);
                                return SessionEnd::Lost(ConnectionEvent::TransportFailed);
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = sink.send(Message::Pong(data)).await {
                                warn!("⚠️ Failed to send pong: {}", e);
                                return SessionEnd::Lost(ConnectionEvent::TransportFailed);
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            info!("🔌 Live feed closed by server: {:?}", frame);
                            return SessionEnd::Lost(ConnectionEvent::TransportClosed);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("⚠️ Live feed transport error: {}", e);
                            return SessionEnd::Lost(ConnectionEvent::TransportFailed);
                        }
                        None => {
                            info!("🔌 Live feed stream ended");
                            return SessionEnd::Lost(ConnectionEvent::TransportClosed);
                        }
                    }
                }
            }
        }
    }

    /// Decodes one text frame, answers it if needed, then publishes it.
    /// Only a failed reply is returned as an error; bad frames are logged and skipped.
    async fn on_text(&mut self, text: &str, sink: &mut WsSink) -> AppResult<()> {
        let event = match codec::decode(text) {
            Ok(Decoded::Event(event)) => event,
            Ok(Decoded::Unknown(kind)) => {
                debug!("📨 Unhandled feed message type: {}", kind);
                return Ok(());
            }
            Err(e) => {
                warn!("⚠️ {}", e);
                return Ok(());
            }
        };

        if let Some(reply) = codec::reply_for(&event) {
            send(sink, &reply).await?;
        }

        if self.events_tx.send(event).is_err() {
            debug!("No feed event receivers active");
        }
        Ok(())
    }
}

async fn send(sink: &mut WsSink, message: &ClientMessage) -> AppResult<()> {
    let text = codec::encode(message)?;
    sink.send(Message::Text(text)).await?;
    Ok(())
}

impl FeedHandle {
    async fn command(&self, command: Command) -> AppResult<()> {
        self.cmd_tx
            .send(command)
            .await
            .map_err(|_| AppError::Network("live feed task has stopped".to_string()))
    }

    pub async fn subscribe(&self, subscription: Subscription) -> AppResult<()> {
        self.command(Command::Subscribe(subscription)).await
    }

    pub async fn unsubscribe(&self, subscription: Subscription) -> AppResult<()> {
        self.command(Command::Unsubscribe(subscription)).await
    }

    /// Replaces the whole subscription set, sending only the difference.
    pub async fn sync(&self, subscriptions: Vec<Subscription>) -> AppResult<()> {
        self.command(Command::Sync(subscriptions)).await
    }

    /// Restarts dialing after the attempt limit was hit. No effect otherwise.
    pub async fn reconnect(&self) -> AppResult<()> {
        self.command(Command::Reconnect).await
    }

    pub fn events(&self) -> broadcast::Receiver<ServerEvent> {
        self.events_tx.subscribe()
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn current_state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Closes the socket, cancels any pending reconnect, and waits for the task to finish.
    pub async fn shutdown(mut self) {
        if self.cmd_tx.send(Command::Disconnect).await.is_err() {
            debug!("Live feed task already stopped");
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    error!("❌ Live feed task panicked: {}", e);
                }
            }
        }
    }
}

// Also runs on abort and on panic unwind, so observers never see a stale Connected.
impl Drop for FeedClient {
    fn drop(&mut self) {
        self.state_tx.send_replace(ConnectionState::Disconnected);
    }
}

impl Drop for FeedHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn unreachable_settings() -> FeedSettings {
        FeedSettings {
            connect_timeout_ms: 200,
            reconnect_delay_ms: 60_000,
            max_reconnect_delay_ms: 60_000,
            ..FeedSettings::default()
        }
    }

    async fn wait_for(rx: &mut watch::Receiver<ConnectionState>, wanted: ConnectionState) {
        timeout(Duration::from_secs(5), async {
            while *rx.borrow_and_update() != wanted {
                rx.changed().await.unwrap();
            }
        })
        .await
        .expect("state not reached");
    }

    #[test]
    fn feed_url_appends_address() {
        let url = feed_url("ws://localhost:8080/ws/stream", Some("0xabc")).unwrap();
        assert_eq!(url, "ws://localhost:8080/ws/stream?user_address=0xabc");

        let url = feed_url("ws://localhost:8080/ws/stream", None).unwrap();
        assert_eq!(url, "ws://localhost:8080/ws/stream");

        assert!(matches!(feed_url("not a url", None), Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn dead_task_leaves_state_disconnected() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let _ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            sleep(Duration::from_secs(10)).await;
        });

        // A zero heartbeat period panics the task right after it reports Connected.
        let settings = FeedSettings {
            heartbeat_interval_ms: 0,
            ..FeedSettings::default()
        };
        let handle = FeedClient::spawn(settings, url);

        timeout(Duration::from_secs(5), async {
            while handle.subscribe(Subscription::SystemStatus).await.is_ok() {
                sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("feed task never stopped");

        assert_eq!(handle.current_state(), ConnectionState::Disconnected);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn failed_dial_moves_to_reconnecting() {
        let handle = FeedClient::spawn(unreachable_settings(), "ws://127.0.0.1:1/ws".to_string());
        let mut state = handle.state();
        wait_for(&mut state, ConnectionState::Reconnecting).await;
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_cancels_pending_reconnect() {
        let handle = FeedClient::spawn(unreachable_settings(), "ws://127.0.0.1:1/ws".to_string());
        let mut state = handle.state();
        wait_for(&mut state, ConnectionState::Reconnecting).await;

        handle
            .subscribe(Subscription::SystemStatus)
            .await
            .unwrap();

        // The backoff is a full minute; shutdown must not wait for it.
        timeout(Duration::from_secs(2), handle.shutdown())
            .await
            .expect("shutdown blocked on backoff timer");
        assert_eq!(*state.borrow(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn attempt_limit_parks_in_disconnected() {
        let settings = FeedSettings {
            connect_timeout_ms: 200,
            reconnect_delay_ms: 10,
            max_reconnect_delay_ms: 10,
            max_reconnect_attempts: 1,
            ..FeedSettings::default()
        };
        let handle = FeedClient::spawn(settings, "ws://127.0.0.1:1/ws".to_string());
        let mut state = handle.state();
        sleep(Duration::from_millis(800)).await;
        assert_eq!(*state.borrow_and_update(), ConnectionState::Disconnected);

        handle.reconnect().await.unwrap();
        timeout(Duration::from_secs(2), state.changed())
            .await
            .expect("reconnect did not restart dialing")
            .unwrap();
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn dropping_handle_stops_task() {
        let handle = FeedClient::spawn(unreachable_settings(), "ws://127.0.0.1:1/ws".to_string());
        let mut events = handle.events();
        drop(handle);

        let result = timeout(Duration::from_secs(2), events.recv()).await.unwrap();
        assert!(matches!(result, Err(broadcast::error::RecvError::Closed)));
    }
}
