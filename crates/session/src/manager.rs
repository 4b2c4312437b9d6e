//! Session manager — the connection state machine, heartbeat, and
//! outbound delivery path.
//!
//! One Tokio task owns every piece of mutable state (status, reconnect
//! counter, outbound queue, the socket sink) and drains an ordered
//! mailbox of typed events. The control handle, the spawned connect
//! attempt, the socket reader, both timers, executor completions, and
//! flush continuations all post into the same mailbox, so each event is
//! handled to completion and no state needs a lock.
//!
//! Each connect attempt carries an epoch; events stamped with a stale
//! epoch belong to a superseded attempt and are discarded.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{FutureExt, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use tether_protocol::{CallOutcome, Frame};

use crate::error::SessionError;
use crate::executor::CallExecutor;
use crate::queue::OutboundQueue;
use crate::reconnect::ReconnectPolicy;
use crate::router::{self, Routed};
use crate::store::{ConnectionStatus, StatusStore};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Sent to the peer, best-effort, when the transport reports an error.
const CONNECTION_FAILURE: &str = "websocket connection failure";

/// A fully-configured session manager, ready to start.
///
/// Create via [`SessionBuilder`](crate::builder::SessionBuilder).
pub struct SessionManager {
    pub(crate) url: Option<String>,
    pub(crate) heartbeat_interval: Duration,
    pub(crate) reconnect: ReconnectPolicy,
    pub(crate) queue_capacity: usize,
    pub(crate) max_frame_bytes: usize,
    pub(crate) max_concurrent_calls: usize,
    pub(crate) executor: Arc<dyn CallExecutor>,
    pub(crate) store: Arc<dyn StatusStore>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("url", &self.url)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("reconnect", &self.reconnect)
            .field("queue_capacity", &self.queue_capacity)
            .field("max_frame_bytes", &self.max_frame_bytes)
            .field("max_concurrent_calls", &self.max_concurrent_calls)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Start a new builder.
    pub fn builder() -> crate::builder::SessionBuilder {
        crate::builder::SessionBuilder::new()
    }

    /// Load persisted status, spawn the manager task, and return the
    /// control handle.
    ///
    /// A load failure falls back to the defaults (disconnected, no
    /// connect intent, default URL) — it is logged, never fatal. When
    /// the loaded status says `should_connect`, connection is initiated
    /// immediately.
    pub async fn start(self) -> SessionHandle {
        let mut status = match self.store.load().await {
            Ok(Some(status)) => status,
            Ok(None) => ConnectionStatus::disconnected(),
            Err(err) => {
                tracing::error!(error = %err, "failed to load persisted status, using defaults");
                ConnectionStatus::disconnected()
            }
        };
        // The stored mirror may claim a connection from a previous run.
        status.is_connected = false;
        if let Some(url) = &self.url {
            status.url = url.clone();
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(status.clone());
        let connected = Arc::new(AtomicBool::new(false));

        let auto_connect = status.should_connect;
        let actor = Actor {
            events_tx: events_tx.clone(),
            status_tx,
            connected_flag: connected.clone(),
            status,
            queue: OutboundQueue::new(self.queue_capacity),
            reconnect: self.reconnect,
            attempts: 0,
            sink: None,
            epoch: 0,
            conn_token: CancellationToken::new(),
            connecting: false,
            reconnect_seq: 0,
            reconnect_pending: None,
            reconnect_token: CancellationToken::new(),
            heartbeat_interval: self.heartbeat_interval,
            heartbeat_token: None,
            max_frame_bytes: self.max_frame_bytes,
            call_permits: Arc::new(Semaphore::new(self.max_concurrent_calls)),
            executor: self.executor,
            store: self.store,
        };
        tokio::spawn(actor.run(events_rx));

        let handle = SessionHandle {
            events: events_tx,
            status: status_rx,
            connected,
        };
        if auto_connect {
            let _ = handle.connect(None);
        }
        handle
    }
}

/// Cloneable control surface for a running [`SessionManager`].
#[derive(Clone)]
pub struct SessionHandle {
    events: mpsc::UnboundedSender<Event>,
    status: watch::Receiver<ConnectionStatus>,
    connected: Arc<AtomicBool>,
}

impl SessionHandle {
    /// Begin connecting, optionally to a new endpoint. Records the
    /// intent to stay connected. No-op when already connected.
    pub fn connect(&self, url: Option<String>) -> Result<(), SessionError> {
        self.post(Event::Connect { url })
    }

    /// Drop the connection and clear the intent to stay connected. No
    /// automatic reconnection happens until the next [`connect`](Self::connect).
    pub fn disconnect(&self) -> Result<(), SessionError> {
        self.post(Event::Disconnect)
    }

    /// Send one frame. Transmitted immediately when connected, queued
    /// otherwise; transmit failures are absorbed into the queue and
    /// never surface here.
    pub fn send(&self, frame: Frame) -> Result<(), SessionError> {
        self.post(Event::Send(frame))
    }

    /// Update the connect intent without touching the state machine.
    pub fn set_should_connect(&self, should_connect: bool) -> Result<(), SessionError> {
        self.post(Event::SetShouldConnect(should_connect))
    }

    /// True iff a live transport handle exists right now. Derived from
    /// the socket, never from persisted status.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Defensive copy of the current status.
    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    /// Stop the manager: cancels timers and in-flight work, closes the
    /// transport, ends the task.
    pub fn shutdown(&self) -> Result<(), SessionError> {
        self.post(Event::Shutdown)
    }

    fn post(&self, event: Event) -> Result<(), SessionError> {
        self.events.send(event).map_err(|_| SessionError::Shutdown)
    }
}

/// Everything the manager task reacts to, in arrival order.
enum Event {
    // Control surface.
    Connect { url: Option<String> },
    Disconnect,
    Send(Frame),
    SetShouldConnect(bool),
    Shutdown,

    // Transport lifecycle, epoch-stamped.
    Opened { epoch: u64, socket: Box<WsStream> },
    OpenFailed { epoch: u64, error: anyhow::Error },
    Inbound { epoch: u64, text: String },
    TransportError { epoch: u64, error: anyhow::Error },
    Closed { epoch: u64 },

    // Timers.
    ReconnectDue { seq: u64 },
    HeartbeatTick,

    // Continuations.
    Reply(Frame),
    FlushNext,
}

struct Actor {
    events_tx: mpsc::UnboundedSender<Event>,
    status_tx: watch::Sender<ConnectionStatus>,
    connected_flag: Arc<AtomicBool>,

    status: ConnectionStatus,
    queue: OutboundQueue,
    reconnect: ReconnectPolicy,
    attempts: u32,

    sink: Option<WsSink>,
    epoch: u64,
    conn_token: CancellationToken,
    connecting: bool,

    reconnect_seq: u64,
    reconnect_pending: Option<u64>,
    reconnect_token: CancellationToken,

    heartbeat_interval: Duration,
    heartbeat_token: Option<CancellationToken>,

    max_frame_bytes: usize,
    call_permits: Arc<Semaphore>,
    executor: Arc<dyn CallExecutor>,
    store: Arc<dyn StatusStore>,
}

impl Actor {
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<Event>) {
        while let Some(event) = events.recv().await {
            if !self.handle_event(event).await {
                break;
            }
        }
        self.teardown().await;
        tracing::debug!("session manager task stopped");
    }

    /// Returns `false` when the manager should stop.
    async fn handle_event(&mut self, event: Event) -> bool {
        match event {
            Event::Connect { url } => {
                self.set_should_connect(true).await;
                self.start_connect(url);
            }
            Event::Disconnect => self.handle_disconnect().await,
            Event::Send(frame) | Event::Reply(frame) => self.deliver(frame).await,
            Event::SetShouldConnect(should_connect) => {
                self.set_should_connect(should_connect).await;
            }
            Event::Shutdown => return false,
            Event::Opened { epoch, socket } => self.on_opened(epoch, *socket).await,
            Event::OpenFailed { epoch, error } => self.on_open_failed(epoch, error).await,
            Event::Inbound { epoch, text } => {
                if epoch == self.epoch {
                    self.on_inbound(text).await;
                }
            }
            Event::TransportError { epoch, error } => {
                if epoch == self.epoch {
                    self.on_transport_error(error).await;
                }
            }
            Event::Closed { epoch } => self.on_closed(epoch).await,
            Event::ReconnectDue { seq } => self.on_reconnect_due(seq).await,
            Event::HeartbeatTick => self.on_heartbeat_tick().await,
            Event::FlushNext => self.flush_next().await,
        }
        true
    }

    // ── Connection lifecycle ─────────────────────────────────────────

    fn start_connect(&mut self, url: Option<String>) {
        if self.sink.is_some() {
            tracing::debug!("connect requested while already connected, ignoring");
            return;
        }
        self.cancel_reconnect_timer();

        if let Some(url) = url {
            self.status.url = url;
        }
        if self.connecting {
            tracing::debug!("superseding in-flight connect attempt");
        }
        self.abandon_attempt();
        self.connecting = true;

        let url = self.status.url.clone();
        let epoch = self.epoch;
        let events = self.events_tx.clone();
        let token = self.conn_token.clone();
        tracing::info!(url = %url, "connecting to controller");
        tokio::spawn(async move {
            let result = tokio::select! {
                result = tokio_tungstenite::connect_async(url.as_str()) => result,
                _ = token.cancelled() => return,
            };
            let event = match result {
                Ok((socket, _response)) => Event::Opened {
                    epoch,
                    socket: Box::new(socket),
                },
                Err(err) => Event::OpenFailed {
                    epoch,
                    error: err.into(),
                },
            };
            let _ = events.send(event);
        });
    }

    /// Invalidate the current attempt: bump the epoch and cancel any
    /// in-flight connect or reader bound to it.
    fn abandon_attempt(&mut self) {
        self.conn_token.cancel();
        self.conn_token = CancellationToken::new();
        self.epoch += 1;
        self.connecting = false;
    }

    async fn on_opened(&mut self, epoch: u64, socket: WsStream) {
        if epoch != self.epoch {
            tracing::debug!(epoch, "discarding socket from superseded connect attempt");
            tokio::spawn(async move {
                let mut socket = socket;
                let _ = socket.close(None).await;
            });
            return;
        }
        self.connecting = false;
        let (sink, stream) = socket.split();
        self.sink = Some(sink);
        self.connected_flag.store(true, Ordering::SeqCst);
        self.spawn_reader(stream);

        self.status.is_connected = true;
        self.persist_status().await;
        self.attempts = 0;

        tracing::info!(url = %self.status.url, "connected to controller");

        if !self.queue.is_empty() {
            tracing::debug!(queued = self.queue.len(), "flushing outbound queue");
            self.post(Event::FlushNext);
        }
        self.start_heartbeat();
    }

    async fn on_open_failed(&mut self, epoch: u64, error: anyhow::Error) {
        if epoch != self.epoch {
            return;
        }
        tracing::warn!(error = %error, url = %self.status.url, "connect attempt failed");
        self.connecting = false;
        self.status.is_connected = false;
        self.persist_status().await;
        self.schedule_reconnect();
    }

    async fn on_closed(&mut self, epoch: u64) {
        if epoch != self.epoch {
            return;
        }
        self.sink = None;
        self.connected_flag.store(false, Ordering::SeqCst);
        self.connecting = false;
        self.status.is_connected = false;
        self.persist_status().await;
        tracing::info!("connection closed");
        self.schedule_reconnect();
    }

    async fn on_transport_error(&mut self, error: anyhow::Error) {
        tracing::error!(error = %error, "transport error");
        // Best-effort notification; ends up queued once the socket dies.
        self.deliver(router::error_frame(None, CONNECTION_FAILURE)).await;
    }

    async fn handle_disconnect(&mut self) {
        tracing::info!("disconnect requested");
        self.set_should_connect(false).await;
        self.cancel_reconnect_timer();
        self.stop_heartbeat();
        if self.connecting {
            // An aborted attempt produces no close event; leave the
            // machine disconnected right here.
            self.abandon_attempt();
        }
        if let Some(mut sink) = self.sink.take() {
            self.connected_flag.store(false, Ordering::SeqCst);
            // Graceful close runs in the background; the reader observes
            // it and posts the Closed transition.
            tokio::spawn(async move {
                let _ = sink.close().await;
            });
        }
    }

    fn spawn_reader(&self, mut stream: SplitStream<WsStream>) {
        let epoch = self.epoch;
        let events = self.events_tx.clone();
        let token = self.conn_token.clone();
        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    next = stream.next() => next,
                    _ = token.cancelled() => break,
                };
                match next {
                    Some(Ok(Message::Text(text))) => {
                        if events.send(Event::Inbound { epoch, text }).is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        tracing::warn!(bytes = bytes.len(), "ignoring binary frame on text protocol");
                    }
                    Some(Ok(Message::Close(_))) => {
                        tracing::info!("controller closed the connection");
                        break;
                    }
                    Some(Ok(_)) => {} // ws-level ping/pong control traffic
                    Some(Err(err)) => {
                        let _ = events.send(Event::TransportError {
                            epoch,
                            error: err.into(),
                        });
                        break;
                    }
                    None => break,
                }
            }
            let _ = events.send(Event::Closed { epoch });
        });
    }

    async fn teardown(&mut self) {
        self.cancel_reconnect_timer();
        self.stop_heartbeat();
        self.abandon_attempt();
        self.connected_flag.store(false, Ordering::SeqCst);
        if let Some(mut sink) = self.sink.take() {
            let _ = sink.close().await;
        }
        self.status.is_connected = false;
        self.persist_status().await;
    }

    // ── Reconnect scheduling ─────────────────────────────────────────

    fn schedule_reconnect(&mut self) {
        if !self.status.should_connect || self.sink.is_some() {
            return;
        }
        self.cancel_reconnect_timer();
        self.attempts += 1;
        if self.reconnect.is_exhausted(self.attempts) {
            tracing::warn!(
                max_attempts = self.reconnect.max_attempts,
                "reconnect attempts exhausted, waiting for an explicit connect"
            );
            return;
        }
        let delay = self.reconnect.delay_for_attempt(self.attempts);
        tracing::info!(
            delay_ms = delay.as_millis() as u64,
            attempt = self.attempts,
            max_attempts = self.reconnect.max_attempts,
            "scheduling reconnect"
        );
        self.reconnect_seq += 1;
        let seq = self.reconnect_seq;
        self.reconnect_pending = Some(seq);
        let events = self.events_tx.clone();
        let token = self.reconnect_token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    let _ = events.send(Event::ReconnectDue { seq });
                }
                _ = token.cancelled() => {}
            }
        });
    }

    fn cancel_reconnect_timer(&mut self) {
        if self.reconnect_pending.take().is_some() {
            self.reconnect_token.cancel();
            self.reconnect_token = CancellationToken::new();
        }
    }

    async fn on_reconnect_due(&mut self, seq: u64) {
        if self.reconnect_pending != Some(seq) {
            return; // raced with cancellation
        }
        self.reconnect_pending = None;
        self.start_connect(None);
    }

    // ── Heartbeat ────────────────────────────────────────────────────

    fn start_heartbeat(&mut self) {
        self.stop_heartbeat();
        let token = CancellationToken::new();
        self.heartbeat_token = Some(token.clone());
        let events = self.events_tx.clone();
        let period = self.heartbeat_interval;
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticks = tokio::time::interval_at(start, period);
            loop {
                tokio::select! {
                    _ = ticks.tick() => {
                        if events.send(Event::HeartbeatTick).is_err() {
                            break;
                        }
                    }
                    _ = token.cancelled() => break,
                }
            }
        });
    }

    fn stop_heartbeat(&mut self) {
        if let Some(token) = self.heartbeat_token.take() {
            token.cancel();
        }
    }

    async fn on_heartbeat_tick(&mut self) {
        if self.status.should_connect && self.sink.is_none() {
            // Self-healing: even a missed close event gets repaired on
            // the next tick.
            self.start_connect(None);
        } else if self.sink.is_some() {
            self.deliver(Frame::Ping { request_id: None }).await;
        } else {
            tracing::debug!("heartbeat no longer needed, stopping");
            self.stop_heartbeat();
        }
    }

    // ── Outbound path ────────────────────────────────────────────────

    /// Transmit immediately when connected; queue otherwise. Transmit
    /// failure falls back to the queue tail — the close event that
    /// follows drives the state transition.
    async fn deliver(&mut self, frame: Frame) {
        let json = match serde_json::to_string(&frame) {
            Ok(json) => json,
            Err(err) => {
                tracing::error!(error = %err, "failed to serialize outbound frame");
                return;
            }
        };
        if let Some(sink) = self.sink.as_mut() {
            match sink.send(Message::Text(json)).await {
                Ok(()) => return,
                Err(err) => {
                    tracing::warn!(error = %err, "send failed, queueing frame");
                }
            }
        }
        self.enqueue(frame);
    }

    fn enqueue(&mut self, frame: Frame) {
        if let Some(evicted) = self.queue.enqueue(frame) {
            tracing::warn!(
                kind = evicted.kind(),
                "outbound queue full, dropping oldest frame"
            );
        }
    }

    /// One flush step: head frame out, then yield. The continuation is
    /// posted as an event so inbound traffic interleaves between items.
    async fn flush_next(&mut self) {
        let Some(frame) = self.queue.pop() else { return };
        let json = match serde_json::to_string(&frame) {
            Ok(json) => json,
            Err(err) => {
                tracing::error!(error = %err, "failed to serialize queued frame, dropping it");
                self.post(Event::FlushNext);
                return;
            }
        };
        let result = match self.sink.as_mut() {
            Some(sink) => sink.send(Message::Text(json)).await,
            None => {
                self.queue.requeue(frame);
                return;
            }
        };
        match result {
            Ok(()) => {
                if !self.queue.is_empty() {
                    self.post(Event::FlushNext);
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "flush transmit failed, requeueing at head");
                self.queue.requeue(frame);
            }
        }
    }

    // ── Inbound path ─────────────────────────────────────────────────

    async fn on_inbound(&mut self, text: String) {
        match router::route(&text, self.max_frame_bytes) {
            Routed::Reply(frame) => self.deliver(frame).await,
            Routed::Call {
                request_id,
                payload,
            } => self.dispatch_call(request_id, payload),
            Routed::Acknowledged | Routed::Rejected => {}
        }
    }

    /// Run one `call` off the event loop; the completion posts back as a
    /// Reply so responses composed while the socket is down get queued.
    fn dispatch_call(&self, request_id: Option<String>, payload: serde_json::Value) {
        tracing::debug!(
            request_id = request_id.as_deref().unwrap_or(""),
            "dispatching call"
        );
        let executor = self.executor.clone();
        let events = self.events_tx.clone();
        let permits = self.call_permits.clone();
        tokio::spawn(async move {
            let _permit = permits.acquire_owned().await;
            // A panicking executor still produces a correlated response.
            let outcome = match AssertUnwindSafe(executor.execute(payload))
                .catch_unwind()
                .await
            {
                Ok(Ok(data)) => CallOutcome::Success { data },
                Ok(Err(err)) => CallOutcome::Error {
                    error: err.to_string(),
                },
                Err(_panic) => {
                    tracing::error!("call executor panicked");
                    CallOutcome::Error {
                        error: "call executor panicked".to_string(),
                    }
                }
            };
            let _ = events.send(Event::Reply(Frame::CallResponse {
                response_to_request_id: request_id,
                payload: outcome,
            }));
        });
    }

    // ── Status bookkeeping ───────────────────────────────────────────

    async fn set_should_connect(&mut self, should_connect: bool) {
        self.status.should_connect = should_connect;
        self.persist_status().await;
    }

    /// Stamp, publish, and mirror the status. Store failures are logged
    /// and execution continues on the in-memory copy.
    async fn persist_status(&mut self) {
        self.status.last_updated = Utc::now();
        self.status_tx.send_replace(self.status.clone());
        if let Err(err) = self.store.save(&self.status).await {
            tracing::error!(error = %err, "failed to persist connection status");
        }
    }

    fn post(&self, event: Event) {
        let _ = self.events_tx.send(event);
    }
}
