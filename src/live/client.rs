//! Live Update Client
//!
//! A single task owns the [`StreamMachine`] and the one active transport
//! (open attempt, stream, retry timer or poll timer). The [`LiveClient`]
//! handle talks to it over a command channel and observes it through a
//! `watch` channel.

use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::{BoxFuture, FutureExt};
use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Interval, MissedTickBehavior, Sleep};
use tracing::{debug, info, warn};

use crate::cache::SharedCache;
use crate::clock::duration_ms;
use crate::config::LiveConfig;
use crate::coordinator::Params;
use crate::error::{Result, SyncError};
use crate::live::frame::{apply_delta, metrics_from_value, parse_frame, LiveFrame, Metrics};
use crate::live::machine::{ConnectionState, FailureOutcome, ReconnectPolicy, StreamMachine};
use crate::live::LiveSnapshot;
use crate::transport::{DomainFetcher, FrameStream, StreamConnector, TokenSource};

/// Cache key of the last-known live metrics.
pub const LIVE_CACHE_KEY: &str = "live:stats";

const COMMAND_BUFFER: usize = 16;

/// Lower bound for the poll period; a zero period would spin.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

enum Command {
    Connect(oneshot::Sender<Result<()>>),
    Reconnect(oneshot::Sender<Result<()>>),
    Refresh(oneshot::Sender<Result<Metrics>>),
    Disconnect(oneshot::Sender<()>),
    Shutdown,
}

/// The single active transport. Replacing it drops the previous one, which
/// closes a stream or cancels a timer.
enum Transport {
    Idle,
    Opening(BoxFuture<'static, Result<FrameStream>>),
    Streaming(FrameStream),
    Waiting(Pin<Box<Sleep>>),
    Polling(Interval),
}

impl Transport {
    fn name(&self) -> &'static str {
        match self {
            Transport::Idle => "idle",
            Transport::Opening(_) => "opening",
            Transport::Streaming(_) => "streaming",
            Transport::Waiting(_) => "waiting",
            Transport::Polling(_) => "polling",
        }
    }
}

enum TransportEvent {
    Opened(Result<FrameStream>),
    Frame(Option<Result<String>>),
    RetryDue,
    PollDue,
}

/// Waits for the next event of the active transport. Cancel-safe.
async fn next_event(transport: &mut Transport) -> TransportEvent {
    match transport {
        Transport::Idle => pending().await,
        Transport::Opening(open) => TransportEvent::Opened(open.await),
        Transport::Streaming(stream) => TransportEvent::Frame(stream.next().await),
        Transport::Waiting(timer) => {
            timer.as_mut().await;
            TransportEvent::RetryDue
        }
        Transport::Polling(timer) => {
            timer.tick().await;
            TransportEvent::PollDue
        }
    }
}

// == Live Worker ==
struct LiveWorker {
    machine: StreamMachine,
    transport: Transport,
    commands: mpsc::Receiver<Command>,
    state: watch::Sender<LiveSnapshot>,
    connector: Arc<dyn StreamConnector>,
    poller: Arc<dyn DomainFetcher>,
    tokens: Arc<dyn TokenSource>,
    cache: SharedCache<Value>,
    config: LiveConfig,
}

enum Step {
    Command(Option<Command>),
    Transport(TransportEvent),
}

impl LiveWorker {
    async fn run(mut self) {
        loop {
            let step = tokio::select! {
                command = self.commands.recv() => Step::Command(command),
                event = next_event(&mut self.transport) => Step::Transport(event),
            };

            match step {
                Step::Command(Some(Command::Shutdown)) | Step::Command(None) => break,
                Step::Command(Some(command)) => self.handle_command(command).await,
                Step::Transport(event) => self.handle_event(event).await,
            }
        }

        self.set_transport(Transport::Idle);
        self.machine.disconnect();
        debug!("live worker stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect(reply) => {
                let result = self.connect();
                let _ = reply.send(result);
            }
            Command::Reconnect(reply) => {
                let result = self.reconnect();
                let _ = reply.send(result);
            }
            Command::Refresh(reply) => {
                let result = self.pull().await;
                let _ = reply.send(result);
            }
            Command::Disconnect(reply) => {
                self.set_transport(Transport::Idle);
                self.machine.disconnect();
                self.publish(|s| s.degraded = false);
                info!("live client disconnected");
                let _ = reply.send(());
            }
            Command::Shutdown => {}
        }
    }

    async fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened(Ok(stream)) => {
                self.machine.opened();
                self.set_transport(Transport::Streaming(stream));
                self.publish(|s| {
                    s.degraded = false;
                    s.error = None;
                });
                info!("live stream connected");
            }
            TransportEvent::Opened(Err(err)) => self.stream_failed(err),
            TransportEvent::Frame(Some(Ok(line))) => self.handle_line(&line).await,
            TransportEvent::Frame(Some(Err(SyncError::MalformedPayload(reason)))) => {
                warn!(reason = %reason, "dropping unreadable live frame")
            }
            TransportEvent::Frame(Some(Err(err))) => self.stream_failed(err),
            TransportEvent::Frame(None) => {
                self.stream_failed(SyncError::Network("live stream closed".to_string()))
            }
            TransportEvent::RetryDue => {
                self.set_transport(Transport::Idle);
                if self.machine.retry_due() {
                    match self.tokens.token() {
                        Some(token) => self.start_open(token),
                        None => self.credential_lost(),
                    }
                }
            }
            TransportEvent::PollDue => match self.pull().await {
                Ok(_) => {}
                Err(SyncError::NotAuthorized) => self.poll_rejected(),
                Err(err) => warn!(error = %err, "live poll failed"),
            },
        }
    }

    fn connect(&mut self) -> Result<()> {
        let token = self.tokens.token();
        match self.machine.connect(token.is_some()) {
            Ok(true) => {
                if let Some(token) = token {
                    self.start_open(token);
                }
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(err) => {
                warn!("live connect refused: no credential");
                self.publish(|s| s.error = Some(err.clone()));
                Err(err)
            }
        }
    }

    fn reconnect(&mut self) -> Result<()> {
        self.set_transport(Transport::Idle);
        let token = self.tokens.token();
        match self.machine.reconnect(token.is_some()) {
            Ok(()) => {
                info!("manual live reconnect");
                if let Some(token) = token {
                    self.start_open(token);
                }
                Ok(())
            }
            Err(err) => {
                self.publish(|s| {
                    s.degraded = false;
                    s.error = Some(err.clone());
                });
                Err(err)
            }
        }
    }

    fn start_open(&mut self, token: String) {
        let connector = Arc::clone(&self.connector);
        let open = async move { connector.open(&token).await }.boxed();
        self.set_transport(Transport::Opening(open));
        self.publish(|_| {});
    }

    fn stream_failed(&mut self, err: SyncError) {
        self.set_transport(Transport::Idle);

        if err == SyncError::NotAuthorized {
            warn!("live stream rejected credential, not retrying");
            self.machine.disconnect();
            self.publish(|s| s.error = Some(err.clone()));
            return;
        }

        match self.machine.stream_failed() {
            Some(FailureOutcome::Retry { attempt, delay }) => {
                warn!(error = %err, attempt, delay_ms = duration_ms(delay), "live stream failed, scheduling reconnect");
                self.set_transport(Transport::Waiting(Box::pin(sleep(delay))));
                self.publish(|s| s.error = Some(err.clone()));
            }
            Some(FailureOutcome::Degrade) => {
                warn!(error = %err, "live stream reconnect budget exhausted, falling back to polling");
                let mut timer = interval(self.config.poll_interval.max(MIN_POLL_INTERVAL));
                timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
                self.set_transport(Transport::Polling(timer));
                self.publish(|s| {
                    s.degraded = true;
                    s.error = None;
                });
            }
            None => debug!(error = %err, "stream failure outside an active stream ignored"),
        }
    }

    /// The pull endpoint refused the credential: stop polling for good.
    fn poll_rejected(&mut self) {
        warn!("live poll rejected credential, not retrying");
        self.set_transport(Transport::Idle);
        self.machine.disconnect();
        self.publish(|s| {
            s.degraded = false;
            s.error = Some(SyncError::NotAuthorized);
        });
    }

    fn credential_lost(&mut self) {
        self.set_transport(Transport::Idle);
        self.machine.disconnect();
        self.publish(|s| s.error = Some(SyncError::NotAuthorized));
        warn!("credential gone before reconnect attempt");
    }

    async fn handle_line(&mut self, line: &str) {
        match parse_frame(line) {
            Ok(LiveFrame::Stats(delta)) => {
                let mut metrics = self.state.borrow().stats.clone().unwrap_or_default();
                apply_delta(&mut metrics, delta);
                self.store(metrics).await;
            }
            Ok(LiveFrame::Ignored(kind)) => debug!(kind, "ignoring live frame"),
            Err(err) => warn!(error = %err, "dropping malformed live frame"),
        }
    }

    /// One-shot pull through the request path; replaces the metrics.
    async fn pull(&mut self) -> Result<Metrics> {
        let result = self
            .poller
            .fetch(&Params::new())
            .await
            .and_then(metrics_from_value);

        match result {
            Ok(metrics) => {
                self.store(metrics.clone()).await;
                Ok(metrics)
            }
            Err(err) => {
                self.publish(|s| s.error = Some(err.clone()));
                Err(err)
            }
        }
    }

    async fn store(&mut self, metrics: Metrics) {
        self.cache
            .set(LIVE_CACHE_KEY, Value::Object(metrics.clone()), self.config.cache_ttl)
            .await;
        let now = Utc::now();
        self.publish(|s| {
            s.stats = Some(metrics);
            s.last_updated = Some(now);
            if s.error.as_ref().is_some_and(SyncError::is_recoverable) {
                s.error = None;
            }
        });
    }

    fn set_transport(&mut self, next: Transport) {
        let previous = std::mem::replace(&mut self.transport, next);
        if !matches!(previous, Transport::Idle) {
            debug!(from = previous.name(), to = self.transport.name(), "live transport replaced");
        }
    }

    /// Publishes machine state plus whatever `update` changes.
    fn publish(&self, update: impl FnOnce(&mut LiveSnapshot)) {
        let state = self.machine.state();
        let attempts = self.machine.reconnect_attempts();
        let polling = matches!(self.transport, Transport::Polling(_));
        self.state.send_modify(|s| {
            s.state = state;
            s.reconnect_attempts = attempts;
            s.polling = polling;
            update(s);
        });
    }
}

// == Live Client ==
/// Handle to the live update task. Dropping it stops the task.
pub struct LiveClient {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<LiveSnapshot>,
    task: Option<JoinHandle<()>>,
}

impl LiveClient {
    /// Starts the live task in the Disconnected state, seeded with any
    /// last-known metrics still in `cache`.
    pub async fn spawn(
        config: LiveConfig,
        connector: Arc<dyn StreamConnector>,
        poller: Arc<dyn DomainFetcher>,
        tokens: Arc<dyn TokenSource>,
        cache: SharedCache<Value>,
    ) -> Self {
        let seeded = match cache.get(LIVE_CACHE_KEY).await {
            Some(value) => metrics_from_value(value).ok(),
            None => None,
        };
        if seeded.is_some() {
            debug!("live client seeded from cache");
        }

        let (state_tx, state_rx) = watch::channel(LiveSnapshot {
            stats: seeded,
            ..LiveSnapshot::default()
        });
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);

        let worker = LiveWorker {
            machine: StreamMachine::new(ReconnectPolicy::from_config(&config)),
            transport: Transport::Idle,
            commands: commands_rx,
            state: state_tx,
            connector,
            poller,
            tokens,
            cache,
            config,
        };
        let task = tokio::spawn(worker.run());

        Self {
            commands: commands_tx,
            state: state_rx,
            task: Some(task),
        }
    }

    /// Opens the stream. Fails with `NotAuthorized` when no credential is
    /// available; a no-op when a transport is already active.
    pub async fn connect(&self) -> Result<()> {
        self.request(Command::Connect).await?
    }

    /// Tears down the current transport and opens the stream from scratch
    /// with a fresh attempt budget.
    pub async fn reconnect(&self) -> Result<()> {
        self.request(Command::Reconnect).await?
    }

    /// One-shot pull of the metrics, bypassing stream and poll timer.
    pub async fn refresh(&self) -> Result<Metrics> {
        self.request(Command::Refresh).await?
    }

    /// Closes any stream and clears any timer. Idempotent.
    pub async fn disconnect(&self) {
        if self.request(Command::Disconnect).await.is_err() {
            debug!("live task already stopped");
        }
    }

    /// Disconnects and waits for the task to finish.
    pub async fn shutdown(mut self) {
        self.disconnect().await;
        if self.commands.send(Command::Shutdown).await.is_err() {
            debug!("live task already stopped");
        }
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(error = %err, "live task ended abnormally");
            }
        }
    }

    pub fn snapshot(&self) -> LiveSnapshot {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<LiveSnapshot> {
        self.state.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state.borrow().is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().state
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| SyncError::Internal("live task stopped".to_string()))?;
        rx.await
            .map_err(|_| SyncError::Internal("live task dropped request".to_string()))
    }
}

impl Drop for LiveClient {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::testing::{MockConnector, MockFetcher, OpenScript};
    use crate::transport::StaticToken;
    use serde_json::json;

    struct Harness {
        client: LiveClient,
        connector: Arc<MockConnector>,
        poller: Arc<MockFetcher>,
        cache: SharedCache<Value>,
    }

    fn live_config() -> LiveConfig {
        LiveConfig {
            max_reconnect_attempts: 5,
            reconnect_delay: Duration::from_secs(3),
            reconnect_jitter: Duration::ZERO,
            poll_interval: Duration::from_secs(10),
            cache_ttl: Duration::from_secs(10),
        }
    }

    async fn harness_with(token: Option<&str>, cache: SharedCache<Value>) -> Harness {
        let connector = MockConnector::new();
        let poller = MockFetcher::new();
        let client = LiveClient::spawn(
            live_config(),
            connector.clone(),
            poller.clone(),
            Arc::new(StaticToken::new(token.map(str::to_string))),
            cache.clone(),
        )
        .await;
        Harness {
            client,
            connector,
            poller,
            cache,
        }
    }

    async fn harness() -> Harness {
        harness_with(Some("secret"), SharedCache::new(Arc::new(ManualClock::new(0)))).await
    }

    async fn wait_for_state(client: &LiveClient, state: ConnectionState) {
        let mut rx = client.subscribe();
        rx.wait_for(|s| s.state == state).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_without_credential_is_refused() {
        let h = harness_with(None, SharedCache::new(Arc::new(ManualClock::new(0)))).await;

        assert_eq!(h.client.connect().await, Err(SyncError::NotAuthorized));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.client.state(), ConnectionState::Disconnected);
        assert_eq!(h.connector.opens(), 0);
        assert_eq!(h.client.snapshot().error, Some(SyncError::NotAuthorized));
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_update_state_and_cache() {
        let h = harness().await;
        let frames = h.connector.push_stream();

        h.client.connect().await.unwrap();
        wait_for_state(&h.client, ConnectionState::Connected).await;
        assert!(h.client.is_connected());

        frames
            .send(Ok(r#"{"type":"stats_update","data":{"active_users":3,"rpm":10}}"#.to_string()))
            .unwrap();
        frames.send(Ok("garbage".to_string())).unwrap();
        frames.send(Ok(r#"{"type":"heartbeat"}"#.to_string())).unwrap();
        frames
            .send(Ok(r#"{"type":"stats_update","data":{"rpm":25}}"#.to_string()))
            .unwrap();

        let mut rx = h.client.subscribe();
        let snapshot = rx
            .wait_for(|s| s.stats.as_ref().and_then(|m| m.get("rpm")) == Some(&json!(25)))
            .await
            .unwrap()
            .clone();

        assert_eq!(snapshot.state, ConnectionState::Connected);
        assert_eq!(snapshot.stats.unwrap()["active_users"], json!(3));
        assert_eq!(
            h.cache.get(LIVE_CACHE_KEY).await,
            Some(json!({"active_users": 3, "rpm": 25}))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreadable_frame_keeps_stream_open() {
        let h = harness().await;
        let frames = h.connector.push_stream();

        h.client.connect().await.unwrap();
        wait_for_state(&h.client, ConnectionState::Connected).await;

        frames
            .send(Err(SyncError::MalformedPayload("line too long".to_string())))
            .unwrap();
        frames
            .send(Ok(r#"{"type":"stats_update","data":{"rpm":4}}"#.to_string()))
            .unwrap();

        let mut rx = h.client.subscribe();
        rx.wait_for(|s| s.stats.is_some()).await.unwrap();
        assert_eq!(h.client.state(), ConnectionState::Connected);
        assert_eq!(h.connector.opens(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_degrades_to_polling_after_five_failures() {
        let h = harness().await;

        h.client.connect().await.unwrap();
        wait_for_state(&h.client, ConnectionState::Polling).await;

        let snapshot = h.client.snapshot();
        assert!(snapshot.degraded);
        assert!(snapshot.polling);
        assert!(snapshot.error.is_none());
        assert_eq!(h.connector.opens(), 5);

        // The poll timer keeps the data fresh, the stream is left alone
        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(h.connector.opens(), 5);
        assert!(h.poller.calls() >= 3);
        assert!(h.client.snapshot().stats.is_some());
        assert_eq!(h.client.state(), ConnectionState::Polling);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_after_degrade_clears_poll_timer() {
        let h = harness().await;

        h.client.connect().await.unwrap();
        wait_for_state(&h.client, ConnectionState::Polling).await;

        let _frames = h.connector.push_stream();
        h.client.reconnect().await.unwrap();
        wait_for_state(&h.client, ConnectionState::Connected).await;

        let snapshot = h.client.snapshot();
        assert!(!snapshot.polling);
        assert!(!snapshot.degraded);
        assert_eq!(snapshot.reconnect_attempts, 0);

        let polls = h.poller.calls();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.poller.calls(), polls, "poll timer must be gone once streaming");
        assert_eq!(h.connector.opens(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_error_reconnects_after_delay() {
        let h = harness().await;
        let first = h.connector.push_stream();
        let _second = h.connector.push_stream();

        h.client.connect().await.unwrap();
        wait_for_state(&h.client, ConnectionState::Connected).await;

        first.send(Err(SyncError::Network("reset".to_string()))).unwrap();
        wait_for_state(&h.client, ConnectionState::Reconnecting).await;
        assert_eq!(h.client.snapshot().reconnect_attempts, 1);
        assert_eq!(h.connector.opens(), 1);

        wait_for_state(&h.client, ConnectionState::Connected).await;
        assert_eq!(h.connector.opens(), 2);
        assert_eq!(h.client.snapshot().reconnect_attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_credential_is_terminal() {
        let h = harness().await;
        h.connector.push(OpenScript::Fail(SyncError::NotAuthorized));

        h.client.connect().await.unwrap();
        let mut rx = h.client.subscribe();
        rx.wait_for(|s| s.error == Some(SyncError::NotAuthorized))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.client.state(), ConnectionState::Disconnected);
        assert_eq!(h.connector.opens(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_poll_stops_polling() {
        let h = harness().await;

        h.client.connect().await.unwrap();
        wait_for_state(&h.client, ConnectionState::Polling).await;
        h.poller.set_rejecting(true);

        let mut rx = h.client.subscribe();
        rx.wait_for(|s| s.state == ConnectionState::Disconnected)
            .await
            .unwrap();
        let polls = h.poller.calls();

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(h.poller.calls(), polls);
        assert_eq!(h.connector.opens(), 5);

        let snapshot = h.client.snapshot();
        assert_eq!(snapshot.state, ConnectionState::Disconnected);
        assert_eq!(snapshot.error, Some(SyncError::NotAuthorized));
        assert!(!snapshot.degraded);
        assert!(!snapshot.polling);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_is_idempotent_and_stops_transports() {
        let h = harness().await;

        h.client.connect().await.unwrap();
        wait_for_state(&h.client, ConnectionState::Polling).await;

        h.client.disconnect().await;
        h.client.disconnect().await;

        let polls = h.poller.calls();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.client.state(), ConnectionState::Disconnected);
        assert_eq!(h.poller.calls(), polls);
        assert!(!h.client.snapshot().polling);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_pulls_once() {
        let h = harness().await;

        let metrics = h.client.refresh().await.unwrap();

        assert_eq!(h.poller.calls(), 1);
        assert_eq!(metrics["call"], json!(1));
        assert_eq!(h.connector.opens(), 0);
        assert_eq!(h.client.state(), ConnectionState::Disconnected);
        assert!(h.client.snapshot().stats.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_failure_keeps_last_known_stats() {
        let h = harness().await;
        h.client.refresh().await.unwrap();

        h.poller.set_failing(true);
        assert!(h.client.refresh().await.is_err());

        let snapshot = h.client.snapshot();
        assert!(snapshot.stats.is_some());
        assert!(snapshot.error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_seeded_from_cache_on_spawn() {
        let cache = SharedCache::new(Arc::new(ManualClock::new(0)));
        cache
            .set(LIVE_CACHE_KEY, json!({"active_users": 9}), Duration::from_secs(10))
            .await;

        let h = harness_with(Some("secret"), cache).await;

        let stats = h.client.snapshot().stats.unwrap();
        assert_eq!(stats["active_users"], json!(9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_task() {
        let h = harness().await;
        let _frames = h.connector.push_stream();
        h.client.connect().await.unwrap();
        wait_for_state(&h.client, ConnectionState::Connected).await;

        h.client.shutdown().await;
    }
}
