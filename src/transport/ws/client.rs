//! WebSocket link client: the impure I/O half of the transport
//!
//! A background task exclusively owns the socket and every piece of session
//! state; the public [`WsClient`] handle talks to it over a command channel.
//! All mutation happens inside the task's select loop, so ordering between
//! transport events, timers and API calls is well defined, and an explicit
//! `disconnect()` synchronously invalidates every outstanding timer.

use super::connection::{build_endpoint, ConnectionState, ReconnectDecision, ReconnectPolicy};
use super::correlator::CommandCorrelator;
use super::events::{EventBus, LinkEvent};
use super::health::{should_attempt_reconnection, HealthTracker};
use super::queue::OutboundQueue;
use super::subscriptions::{Subscription, SubscriptionSet};
use crate::config::LinkSection;
use crate::error::{LinkError, LinkResult};
use crate::protocol::{CommandPayload, CommandResponsePayload, Envelope, MessageType};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Duration, Instant};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Grace period before liveness timers start once the transport opens, so
/// the first heartbeat does not race the controller's own session setup.
const SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Upper bound on a single transport dial.
const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Stand-in deadline for timers that are currently unarmed.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365);

/// Capacity of the handle-to-task command channel.
const COMMAND_CHANNEL_CAPACITY: usize = 256;

/// Commands sent from the public handle to the link task
enum Command {
    Connect {
        peer_id: Option<String>,
        client_id: Option<String>,
        respond_to: oneshot::Sender<LinkResult<()>>,
    },
    Disconnect {
        respond_to: oneshot::Sender<()>,
    },
    SendCommand {
        action: String,
        parameters: Value,
        peer_id: Option<String>,
        respond_to: oneshot::Sender<LinkResult<Value>>,
    },
    Subscribe {
        topics: Vec<String>,
        peer_id: Option<String>,
        respond_to: oneshot::Sender<LinkResult<()>>,
    },
    Unsubscribe {
        topics: Vec<String>,
        peer_id: Option<String>,
        respond_to: oneshot::Sender<LinkResult<()>>,
    },
    Shutdown,
}

/// Handle to a device-control link session
///
/// Cheap to use from many call sites; all methods forward to the background
/// task that owns the socket. Dropping the handle shuts the task down.
pub struct WsClient {
    cmd_tx: mpsc::Sender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    events: EventBus,
    task: Option<JoinHandle<()>>,
}

impl WsClient {
    /// Create a client for the given link configuration.
    ///
    /// Validates the configuration and endpoint up front and spawns the
    /// link task; no connection is attempted until [`connect`](Self::connect).
    pub async fn new(config: LinkSection) -> LinkResult<Self> {
        config.validate()?;
        build_endpoint(&config.url, None, None).map_err(LinkError::InvalidUrl)?;

        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let events = EventBus::new();

        let task = LinkTask {
            policy: ReconnectPolicy::from_config(&config),
            config,
            cmd_rx,
            state_tx,
            events: events.clone(),
            correlator: CommandCorrelator::new(),
            subscriptions: SubscriptionSet::new(),
            queue: OutboundQueue::new(),
            health: HealthTracker::new(),
            peer_id: None,
            client_id: None,
        };

        let handle = tokio::spawn(task.run());

        Ok(Self {
            cmd_tx,
            state_rx,
            events,
            task: Some(handle),
        })
    }

    /// Open the session. Resolves once the transport is open.
    ///
    /// Idempotent: while already connecting, connected or reconnecting this
    /// resolves immediately without side effects.
    pub async fn connect(&self) -> LinkResult<()> {
        self.connect_as(None, None).await
    }

    /// Open the session, identifying this client and/or targeting a specific
    /// device in the connection request.
    pub async fn connect_as(
        &self,
        peer_id: Option<&str>,
        client_id: Option<&str>,
    ) -> LinkResult<()> {
        let (respond_to, response) = oneshot::channel();
        self.cmd_tx
            .send(Command::Connect {
                peer_id: peer_id.map(str::to_string),
                client_id: client_id.map(str::to_string),
                respond_to,
            })
            .await
            .map_err(|_| LinkError::ChannelClosed)?;
        response.await.map_err(|_| LinkError::ChannelClosed)?
    }

    /// Close the session. Idempotent; cancels all timers including a pending
    /// reconnection backoff, and rejects outstanding commands.
    pub async fn disconnect(&self) -> LinkResult<()> {
        let (respond_to, response) = oneshot::channel();
        self.cmd_tx
            .send(Command::Disconnect { respond_to })
            .await
            .map_err(|_| LinkError::ChannelClosed)?;
        response.await.map_err(|_| LinkError::ChannelClosed)
    }

    /// Send a command and await its correlated response.
    ///
    /// Resolves with the controller's result payload, or rejects with
    /// [`LinkError::CommandFailed`], [`LinkError::CommandTimeout`] after
    /// `command_timeout_ms`, or [`LinkError::ConnectionClosed`] on teardown.
    pub async fn send_command(
        &self,
        action: &str,
        parameters: Value,
        peer_id: Option<&str>,
    ) -> LinkResult<Value> {
        let (respond_to, response) = oneshot::channel();
        self.cmd_tx
            .send(Command::SendCommand {
                action: action.to_string(),
                parameters,
                peer_id: peer_id.map(str::to_string),
                respond_to,
            })
            .await
            .map_err(|_| LinkError::ChannelClosed)?;
        response.await.map_err(|_| LinkError::ChannelClosed)?
    }

    /// Request status updates for a set of topics.
    ///
    /// The subscription is durable intent: it is replayed automatically
    /// after every successful reconnection.
    pub async fn subscribe(&self, topics: Vec<String>, peer_id: Option<&str>) -> LinkResult<()> {
        let (respond_to, response) = oneshot::channel();
        self.cmd_tx
            .send(Command::Subscribe {
                topics,
                peer_id: peer_id.map(str::to_string),
                respond_to,
            })
            .await
            .map_err(|_| LinkError::ChannelClosed)?;
        response.await.map_err(|_| LinkError::ChannelClosed)?
    }

    /// Withdraw a previous subscription.
    pub async fn unsubscribe(&self, topics: Vec<String>, peer_id: Option<&str>) -> LinkResult<()> {
        let (respond_to, response) = oneshot::channel();
        self.cmd_tx
            .send(Command::Unsubscribe {
                topics,
                peer_id: peer_id.map(str::to_string),
                respond_to,
            })
            .await
            .map_err(|_| LinkError::ChannelClosed)?;
        response.await.map_err(|_| LinkError::ChannelClosed)?
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    /// Watch channel for connection state changes.
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Subscribe to session events.
    pub fn events(&self) -> tokio::sync::broadcast::Receiver<LinkEvent> {
        self.events.subscribe()
    }

    /// Whether the transport is currently open.
    pub fn is_connected(&self) -> bool {
        matches!(*self.state_rx.borrow(), ConnectionState::Connected)
    }
}

impl Drop for WsClient {
    fn drop(&mut self) {
        let _ = self.cmd_tx.try_send(Command::Shutdown);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// What the link task does next after a phase ends
enum Next {
    /// Wait for commands; state is `Disconnected` or `Error`
    Idle,
    /// Run the connected loop over an open transport
    Session {
        ws: Box<WsStream>,
        reconnected: bool,
    },
    /// Run the backoff/redial cycle
    Reconnect,
    /// Stop the task
    Shutdown,
}

/// Outcome of a cancellable backoff wait
enum BackoffOutcome {
    Elapsed,
    Cancelled,
    Shutdown,
}

/// The background task owning the socket and all session state
struct LinkTask {
    config: LinkSection,
    policy: ReconnectPolicy,
    cmd_rx: mpsc::Receiver<Command>,
    state_tx: watch::Sender<ConnectionState>,
    events: EventBus,
    correlator: CommandCorrelator,
    subscriptions: SubscriptionSet,
    queue: OutboundQueue,
    health: HealthTracker,
    peer_id: Option<String>,
    client_id: Option<String>,
}

impl LinkTask {
    async fn run(mut self) {
        let mut next = Next::Idle;
        loop {
            next = match next {
                Next::Idle => self.idle_phase().await,
                Next::Session { ws, reconnected } => self.session_phase(*ws, reconnected).await,
                Next::Reconnect => self.reconnect_phase().await,
                Next::Shutdown => break,
            };
        }
        self.correlator.reject_all();
        self.queue.clear();
        debug!("link task stopped");
    }

    /// No transport and no automatic recovery in progress: wait for commands.
    async fn idle_phase(&mut self) -> Next {
        match self.cmd_rx.recv().await {
            None | Some(Command::Shutdown) => Next::Shutdown,
            Some(Command::Connect {
                peer_id,
                client_id,
                respond_to,
            }) => {
                self.peer_id = peer_id;
                self.client_id = client_id;
                self.set_state(ConnectionState::Connecting);
                match self.dial().await {
                    Ok(ws) => {
                        self.set_state(ConnectionState::Connected);
                        let _ = respond_to.send(Ok(()));
                        Next::Session {
                            ws: Box::new(ws),
                            reconnected: false,
                        }
                    }
                    Err(e) => {
                        self.set_state(ConnectionState::Error(e.to_string()));
                        let _ = respond_to.send(Err(e));
                        // Automatic recovery still engages after a failed
                        // initial dial, unless the caller disconnects
                        Next::Reconnect
                    }
                }
            }
            Some(Command::Disconnect { respond_to }) => {
                self.set_state(ConnectionState::Disconnected);
                let _ = respond_to.send(());
                Next::Idle
            }
            Some(Command::SendCommand { respond_to, .. }) => {
                let _ = respond_to.send(Err(LinkError::NotConnected {
                    state: self.current_state(),
                }));
                Next::Idle
            }
            Some(Command::Subscribe { respond_to, .. })
            | Some(Command::Unsubscribe { respond_to, .. }) => {
                let _ = respond_to.send(Err(LinkError::NotConnected {
                    state: self.current_state(),
                }));
                Next::Idle
            }
        }
    }

    /// Connected loop: multiplex commands, inbound frames, and the
    /// heartbeat, health-check and command-expiry timers.
    async fn session_phase(&mut self, mut ws: WsStream, reconnected: bool) -> Next {
        self.set_state(ConnectionState::Connected);
        self.health.reset(Instant::now());

        if reconnected {
            self.events.emit(LinkEvent::Reconnected);
            if let Err(reason) = self.replay_subscriptions(&mut ws).await {
                return self.begin_reconnect(&reason, ws).await;
            }
        }

        // Drain envelopes buffered during the outage, strictly FIFO and
        // ahead of any command submitted from here on
        while let Some(envelope) = self.queue.pop() {
            if let Err(e) = send_envelope(&mut ws, &envelope).await {
                self.queue.push_front(envelope);
                return self.begin_reconnect(&format!("queue drain failed: {e}"), ws).await;
            }
        }

        let heartbeat_interval = Duration::from_millis(self.config.heartbeat_interval_ms);
        let health_interval = Duration::from_millis(self.config.health_check_interval_ms);
        let message_timeout = Duration::from_millis(self.config.message_timeout_ms);
        let mut heartbeat_deadline = Instant::now() + SETTLE_DELAY + heartbeat_interval;
        let mut health_deadline = Instant::now() + SETTLE_DELAY + health_interval;

        loop {
            let command_deadline = self
                .correlator
                .next_deadline()
                .unwrap_or_else(|| Instant::now() + FAR_FUTURE);

            tokio::select! {
                biased;

                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        None | Some(Command::Shutdown) => {
                            let _ = ws.close(None).await;
                            self.teardown(ConnectionState::Disconnected);
                            return Next::Shutdown;
                        }
                        Some(Command::Disconnect { respond_to }) => {
                            // Normal closure requested by the caller
                            let _ = ws.close(None).await;
                            self.teardown(ConnectionState::Disconnected);
                            let _ = respond_to.send(());
                            return Next::Idle;
                        }
                        Some(Command::Connect { respond_to, .. }) => {
                            // Already connected: idempotent no-op
                            let _ = respond_to.send(Ok(()));
                        }
                        Some(cmd) => {
                            if let Err(reason) = self.handle_session_command(cmd, &mut ws).await {
                                return self.begin_reconnect(&reason, ws).await;
                            }
                        }
                    }
                }

                frame = ws.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => self.handle_inbound_text(&text),
                        Some(Ok(Message::Ping(payload))) => {
                            self.health.record_message(Instant::now());
                            if let Err(e) = ws.send(Message::Pong(payload)).await {
                                return self
                                    .begin_reconnect(&format!("pong write failed: {e}"), ws)
                                    .await;
                            }
                        }
                        Some(Ok(Message::Pong(_))) => {
                            self.health.record_message(Instant::now());
                        }
                        Some(Ok(Message::Binary(_))) => {
                            debug!("ignoring binary frame from controller");
                        }
                        Some(Ok(Message::Close(frame))) => {
                            info!(?frame, "controller closed the connection");
                            return self
                                .begin_reconnect("connection closed by controller", ws)
                                .await;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("transport read error: {e}");
                            return self
                                .begin_reconnect(&format!("transport error: {e}"), ws)
                                .await;
                        }
                        None => {
                            return self.begin_reconnect("transport stream ended", ws).await;
                        }
                    }
                }

                _ = sleep_until(command_deadline) => {
                    for action in self.correlator.expire_due(Instant::now()) {
                        warn!(action = %action, "command timed out without a response");
                    }
                }

                _ = sleep_until(heartbeat_deadline) => {
                    heartbeat_deadline = Instant::now() + heartbeat_interval;
                    let envelope = Envelope::heartbeat();
                    if let Err(e) = send_envelope(&mut ws, &envelope).await {
                        // A failed write is the zombie-connection signal: the
                        // socket claims to be open but cannot carry traffic
                        warn!("heartbeat write failed: {e}");
                        return self
                            .begin_reconnect(&format!("heartbeat write failed: {e}"), ws)
                            .await;
                    }
                }

                _ = sleep_until(health_deadline) => {
                    health_deadline = Instant::now() + health_interval;
                    let now = Instant::now();
                    if self.health.is_stale(now, message_timeout) {
                        let silence = self.health.silence(now).unwrap_or_default();
                        let reason = format!(
                            "no inbound message for {}ms (limit {}ms)",
                            silence.as_millis(),
                            message_timeout.as_millis()
                        );
                        warn!("health check failed: {reason}");
                        self.events.emit(LinkEvent::HealthCheckFailed {
                            reason: reason.clone(),
                        });
                        return self.begin_reconnect(&reason, ws).await;
                    }
                }
            }
        }
    }

    /// Backoff/redial cycle after an unexpected transport loss.
    async fn reconnect_phase(&mut self) -> Next {
        let mut attempts: u32 = 0;
        loop {
            match should_attempt_reconnection(attempts, &self.policy) {
                ReconnectDecision::AbortMaxAttemptsExceeded => {
                    error!(attempts, "reconnection attempts exhausted");
                    self.teardown(ConnectionState::Error(format!(
                        "reconnection failed after {attempts} attempts"
                    )));
                    self.events.emit(LinkEvent::ReconnectFailed { attempts });
                    return Next::Idle;
                }
                ReconnectDecision::Proceed { attempt, delay_ms } => {
                    self.set_state(ConnectionState::Reconnecting(attempt));
                    info!(
                        attempt,
                        max = self.policy.max_attempts,
                        delay_ms,
                        "scheduling reconnection attempt"
                    );

                    match self.backoff_wait(Duration::from_millis(delay_ms)).await {
                        BackoffOutcome::Elapsed => {}
                        BackoffOutcome::Cancelled => return Next::Idle,
                        BackoffOutcome::Shutdown => return Next::Shutdown,
                    }

                    match self.dial().await {
                        Ok(ws) => {
                            info!(attempt, "reconnection succeeded");
                            return Next::Session {
                                ws: Box::new(ws),
                                reconnected: true,
                            };
                        }
                        Err(e) => {
                            warn!(attempt, "reconnection attempt failed: {e}");
                            attempts = attempt;
                        }
                    }
                }
            }
        }
    }

    /// Sleep out a backoff delay while staying responsive to commands.
    ///
    /// `disconnect()` lands here while the timer is pending and must cancel
    /// it; reconnecting after an explicit disconnect is forbidden.
    async fn backoff_wait(&mut self, delay: Duration) -> BackoffOutcome {
        let backoff_deadline = Instant::now() + delay;
        loop {
            let command_deadline = self
                .correlator
                .next_deadline()
                .unwrap_or_else(|| Instant::now() + FAR_FUTURE);

            tokio::select! {
                biased;

                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        None | Some(Command::Shutdown) => {
                            self.teardown(ConnectionState::Disconnected);
                            return BackoffOutcome::Shutdown;
                        }
                        Some(Command::Disconnect { respond_to }) => {
                            self.teardown(ConnectionState::Disconnected);
                            let _ = respond_to.send(());
                            return BackoffOutcome::Cancelled;
                        }
                        Some(Command::Connect { respond_to, .. }) => {
                            // Re-establishment is already in progress
                            let _ = respond_to.send(Ok(()));
                        }
                        Some(Command::SendCommand { action, parameters, peer_id, respond_to }) => {
                            self.queue_command(action, parameters, peer_id, respond_to);
                        }
                        Some(Command::Subscribe { topics, peer_id, respond_to }) => {
                            // Intent only; the post-reconnect replay transmits it
                            self.subscriptions.insert(Subscription::new(&topics, peer_id));
                            let _ = respond_to.send(Ok(()));
                        }
                        Some(Command::Unsubscribe { topics, peer_id, respond_to }) => {
                            self.subscriptions.remove(&Subscription::new(&topics, peer_id));
                            let _ = respond_to.send(Ok(()));
                        }
                    }
                }

                _ = sleep_until(command_deadline) => {
                    for action in self.correlator.expire_due(Instant::now()) {
                        warn!(action = %action, "command timed out during reconnection");
                    }
                }

                _ = sleep_until(backoff_deadline) => return BackoffOutcome::Elapsed,
            }
        }
    }

    /// Handle a send-path command while the transport is open.
    ///
    /// Returns `Err(reason)` when a write failure reveals a dead transport.
    async fn handle_session_command(
        &mut self,
        cmd: Command,
        ws: &mut WsStream,
    ) -> Result<(), String> {
        match cmd {
            Command::SendCommand {
                action,
                parameters,
                peer_id,
                respond_to,
            } => {
                let payload = CommandPayload {
                    action: action.clone(),
                    parameters,
                    response_expected: true,
                };
                let envelope = match Envelope::command(&payload, peer_id) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        let _ = respond_to.send(Err(e.into()));
                        return Ok(());
                    }
                };
                self.register_pending(envelope.id, action, respond_to);
                if let Err(e) = send_envelope(ws, &envelope).await {
                    // The pending entry survives; it settles through its own
                    // timeout or a response after reconnection
                    return Err(format!("command write failed: {e}"));
                }
                Ok(())
            }
            Command::Subscribe {
                topics,
                peer_id,
                respond_to,
            } => {
                let subscription = Subscription::new(&topics, peer_id);
                if !self.subscriptions.insert(subscription.clone()) {
                    // Subscribing twice to the same key has no further effect
                    let _ = respond_to.send(Ok(()));
                    return Ok(());
                }
                let envelope = match subscription.to_subscribe_envelope() {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        let _ = respond_to.send(Err(e.into()));
                        return Ok(());
                    }
                };
                let _ = respond_to.send(Ok(()));
                if let Err(e) = send_envelope(ws, &envelope).await {
                    return Err(format!("subscribe write failed: {e}"));
                }
                Ok(())
            }
            Command::Unsubscribe {
                topics,
                peer_id,
                respond_to,
            } => {
                let subscription = Subscription::new(&topics, peer_id);
                let was_tracked = self.subscriptions.remove(&subscription);
                let _ = respond_to.send(Ok(()));
                if was_tracked {
                    let envelope = match Envelope::unsubscribe(
                        &subscription.topics,
                        subscription.peer_id,
                    ) {
                        Ok(envelope) => envelope,
                        Err(e) => {
                            warn!("failed to encode unsubscribe envelope: {e}");
                            return Ok(());
                        }
                    };
                    if let Err(e) = send_envelope(ws, &envelope).await {
                        return Err(format!("unsubscribe write failed: {e}"));
                    }
                }
                Ok(())
            }
            // Lifecycle commands are handled by the phase loops
            Command::Connect { .. } | Command::Disconnect { .. } | Command::Shutdown => Ok(()),
        }
    }

    /// Register a pending command and buffer its envelope for the drain.
    fn queue_command(
        &mut self,
        action: String,
        parameters: Value,
        peer_id: Option<String>,
        respond_to: oneshot::Sender<LinkResult<Value>>,
    ) {
        let payload = CommandPayload {
            action: action.clone(),
            parameters,
            response_expected: true,
        };
        let envelope = match Envelope::command(&payload, peer_id) {
            Ok(envelope) => envelope,
            Err(e) => {
                let _ = respond_to.send(Err(e.into()));
                return;
            }
        };
        self.register_pending(envelope.id, action, respond_to);
        self.queue.push(envelope);
    }

    /// Register a pending command with its timeout deadline.
    ///
    /// The deadline starts now even if the envelope is still queued.
    fn register_pending(
        &mut self,
        id: Uuid,
        action: String,
        respond_to: oneshot::Sender<LinkResult<Value>>,
    ) {
        let deadline = Instant::now() + Duration::from_millis(self.config.command_timeout_ms);
        self.correlator.register(id, action, respond_to, deadline);
    }

    /// Re-send every tracked subscription in insertion order.
    async fn replay_subscriptions(&mut self, ws: &mut WsStream) -> Result<(), String> {
        let envelopes: Vec<Envelope> = self
            .subscriptions
            .iter()
            .filter_map(|subscription| subscription.to_subscribe_envelope().ok())
            .collect();
        if envelopes.is_empty() {
            return Ok(());
        }
        info!(count = envelopes.len(), "replaying subscriptions after reconnect");
        for envelope in envelopes {
            if let Err(e) = send_envelope(ws, &envelope).await {
                return Err(format!("subscription replay failed: {e}"));
            }
        }
        Ok(())
    }

    /// Dispatch an inbound text frame.
    fn handle_inbound_text(&mut self, text: &str) {
        let envelope = match Envelope::from_json(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                // Malformed input never affects connection state
                warn!("dropping malformed inbound message: {e}");
                return;
            }
        };

        let now = Instant::now();
        match envelope.message_type {
            MessageType::Heartbeat => {
                // Never echoed back: replying in kind would set up a
                // ping-pong amplification loop between the peers
                self.health.record_heartbeat(now);
            }
            MessageType::CommandResponse => {
                self.health.record_message(now);
                match serde_json::from_value::<CommandResponsePayload>(envelope.payload.clone()) {
                    Ok(payload) => {
                        self.correlator.resolve(payload);
                    }
                    Err(e) => warn!("malformed command_response payload: {e}"),
                }
            }
            _ => {
                self.health.record_message(now);
            }
        }

        self.events.emit(LinkEvent::Message(envelope));
    }

    /// Close a dead transport and hand control to the reconnect cycle.
    async fn begin_reconnect(&mut self, reason: &str, mut ws: WsStream) -> Next {
        debug!(reason, "tearing down transport for reconnection");
        let _ = ws.close(None).await;
        self.health.clear();
        Next::Reconnect
    }

    /// Full session teardown: used by explicit disconnect, shutdown, and
    /// terminal reconnection failure. No timer survives this call.
    fn teardown(&mut self, state: ConnectionState) {
        let rejected = self.correlator.reject_all();
        if rejected > 0 {
            debug!(rejected, "rejected pending commands on teardown");
        }
        let dropped = self.queue.clear();
        if dropped > 0 {
            debug!(dropped, "dropped queued envelopes on teardown");
        }
        self.subscriptions.clear();
        self.health.clear();
        self.set_state(state);
    }

    /// Dial the controller endpoint.
    async fn dial(&self) -> LinkResult<WsStream> {
        let endpoint = build_endpoint(
            &self.config.url,
            self.peer_id.as_deref(),
            self.client_id.as_deref(),
        )
        .map_err(LinkError::InvalidUrl)?;

        debug!(endpoint = %endpoint, "dialing controller");
        match tokio::time::timeout(DIAL_TIMEOUT, connect_async(endpoint.as_str())).await {
            Ok(Ok((ws, _response))) => Ok(ws),
            Ok(Err(e)) => Err(LinkError::transport(format!("dial failed: {e}"))),
            Err(_) => Err(LinkError::transport(format!(
                "dial timed out after {DIAL_TIMEOUT:?}"
            ))),
        }
    }

    fn current_state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    /// Publish a state transition to the watch channel and the event bus.
    fn set_state(&mut self, state: ConnectionState) {
        let previous = self.current_state();
        if previous == state {
            return;
        }

        match (&previous, &state) {
            (ConnectionState::Connecting, ConnectionState::Connected) => {
                info!("link established");
            }
            (ConnectionState::Reconnecting(attempt), ConnectionState::Connected) => {
                info!(attempt, "link re-established");
            }
            (ConnectionState::Connected, ConnectionState::Reconnecting(_)) => {
                warn!("link lost, re-establishing");
            }
            (_, ConnectionState::Error(reason)) => {
                error!(reason = %reason, "link entered terminal error state");
            }
            _ => {
                debug!(?previous, current = ?state, "connection state changed");
            }
        }

        self.state_tx.send_replace(state.clone());
        self.events.emit(LinkEvent::StateChanged {
            previous,
            current: state,
        });
    }
}

/// Serialize and transmit an envelope as a text frame.
async fn send_envelope(ws: &mut WsStream, envelope: &Envelope) -> LinkResult<()> {
    let text = envelope.to_json()?;
    ws.send(Message::Text(text))
        .await
        .map_err(|e| LinkError::transport(format!("write failed: {e}")))
}
