//! Control channel: the persistent presence/moderation hub connection.
//!
//! A [`ControlChannel`] owns one logical hub connection, reconnects with
//! increasing backoff, re-subscribes its room after every reconnect (so the
//! server pushes a fresh roster snapshot), and forwards decoded
//! [`ControlEvent`]s to a single subscriber.
//!
//! Every connection task captures the channel's generation when it is
//! spawned. [`ControlChannel::stop`] bumps the generation, so frames that
//! race with a stop are dropped instead of reaching a torn-down controller.

pub mod protocol;
pub mod ws;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;

use crate::config::ClientConfig;
use crate::errors::ClassroomError;
use crate::events::{ChannelKind, ConnectionState};

pub use protocol::{ControlEvent, Invocation};
pub use ws::WsHubTransport;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ControlError {
    #[error("hub is not connected")]
    NotConnected,
    #[error("hub connection failed: {0}")]
    Connect(String),
    #[error("invalid hub frame: {0}")]
    Decode(String),
    #[error("failed to encode invocation: {0}")]
    Encode(String),
}

/// Where and how to reach a hub.
#[derive(Clone)]
pub struct HubEndpoint {
    pub url: Url,
    pub access_token: Option<String>,
}

impl std::fmt::Debug for HubEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubEndpoint")
            .field("url", &self.url.as_str())
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// An established hub connection, as a pair of text-frame queues.
/// The connection is considered lost when `inbound` yields `None`.
pub struct HubConnection {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
pub trait HubTransport: Send + Sync {
    async fn connect(&self, endpoint: &HubEndpoint) -> Result<HubConnection, ControlError>;
}

/// What a [`ControlChannel`] hands to its subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    State(ConnectionState),
    Event(ControlEvent),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Fraction of the delay randomly added or removed, 0.0..=1.0.
    pub jitter: f64,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.2,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based), without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32) as i32;
        let millis = self.initial_delay.as_millis() as f64 * self.multiplier.max(1.0).powi(exp);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || base.is_zero() {
            return base;
        }
        let factor = rand::thread_rng().gen_range((1.0 - jitter)..=(1.0 + jitter));
        base.mul_f64(factor).min(self.max_delay)
    }

    fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempt > max)
    }
}

/// Outbound side of the current connection plus the room to re-join.
/// Kept under one lock so a room subscription is sent exactly once per
/// connection.
#[derive(Default)]
struct Link {
    outbound: Option<mpsc::UnboundedSender<String>>,
    room: Option<i64>,
}

struct Shared {
    kind: ChannelKind,
    generation: AtomicU64,
    state: Mutex<ConnectionState>,
    link: Mutex<Link>,
    subscriber: Mutex<Option<mpsc::UnboundedSender<ChannelEvent>>>,
}

impl Shared {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn publish(&self, generation: u64, event: ChannelEvent) {
        if !self.is_current(generation) {
            tracing::debug!("{:?} hub: dropping event from stale connection", self.kind);
            return;
        }
        let subscriber = lock(&self.subscriber);
        if let Some(tx) = subscriber.as_ref() {
            let _ = tx.send(event);
        }
    }

    fn set_state(&self, generation: u64, state: ConnectionState) {
        if !self.is_current(generation) {
            return;
        }
        *lock(&self.state) = state.clone();
        self.publish(generation, ChannelEvent::State(state));
    }

    fn attach(&self, outbound: mpsc::UnboundedSender<String>) {
        let mut link = lock(&self.link);
        if let Some(session_id) = link.room {
            send_frame(&outbound, &Invocation::JoinRoom { session_id });
        }
        link.outbound = Some(outbound);
    }

    fn detach(&self) {
        lock(&self.link).outbound = None;
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn send_frame(outbound: &mpsc::UnboundedSender<String>, invocation: &Invocation) -> bool {
    match protocol::encode_invocation(invocation) {
        Ok(text) => outbound.send(text).is_ok(),
        Err(e) => {
            tracing::error!("{e}");
            false
        }
    }
}

/// One persistent, auto-reconnecting hub connection.
pub struct ControlChannel {
    transport: Arc<dyn HubTransport>,
    endpoint: HubEndpoint,
    policy: ReconnectPolicy,
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ControlChannel {
    pub fn new(
        kind: ChannelKind,
        transport: Arc<dyn HubTransport>,
        endpoint: HubEndpoint,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            transport,
            endpoint,
            policy,
            shared: Arc::new(Shared {
                kind,
                generation: AtomicU64::new(0),
                state: Mutex::new(ConnectionState::Disconnected),
                link: Mutex::new(Link::default()),
                subscriber: Mutex::new(None),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn kind(&self) -> ChannelKind {
        self.shared.kind
    }

    pub fn connection_state(&self) -> ConnectionState {
        lock(&self.shared.state).clone()
    }

    /// Register the (single) consumer of this channel's events, replacing
    /// any previous one.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ChannelEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        *lock(&self.shared.subscriber) = Some(tx);
        rx
    }

    /// Open the connection. No-op while connected or (re)connecting.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        {
            let mut state = lock(&self.shared.state);
            if state.is_active() {
                tracing::debug!("{:?} hub already {:?}, start ignored", self.shared.kind, *state);
                return;
            }
            *state = ConnectionState::Connecting;
        }
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared
            .publish(generation, ChannelEvent::State(ConnectionState::Connecting));
        tracing::info!("{:?} hub starting: {}", self.shared.kind, self.endpoint.url);

        let handle = tokio::spawn(Self::run(
            self.transport.clone(),
            self.endpoint.clone(),
            self.policy.clone(),
            self.shared.clone(),
            generation,
        ));
        if let Some(previous) = lock(&self.task).replace(handle) {
            previous.abort();
        }
    }

    /// Tear down without raising further events.
    pub fn stop(&self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(handle) = lock(&self.task).take() {
            handle.abort();
        }
        *lock(&self.shared.link) = Link::default();
        let mut state = lock(&self.shared.state);
        if *state != ConnectionState::Disconnected {
            tracing::info!("{:?} hub stopped", self.shared.kind);
        }
        *state = ConnectionState::Disconnected;
    }

    /// Subscribe to a room. Sent now if connected, and again after every
    /// reconnect.
    pub fn join_room(&self, session_id: i64) {
        let mut link = lock(&self.shared.link);
        link.room = Some(session_id);
        if let Some(outbound) = link.outbound.as_ref() {
            send_frame(outbound, &Invocation::JoinRoom { session_id });
        }
    }

    /// Send an invocation on the current connection.
    pub fn invoke(&self, invocation: &Invocation) -> Result<(), ControlError> {
        let text = protocol::encode_invocation(invocation)?;
        let link = lock(&self.shared.link);
        let outbound = link.outbound.as_ref().ok_or(ControlError::NotConnected)?;
        outbound.send(text).map_err(|_| ControlError::NotConnected)?;
        tracing::debug!("{:?} hub invoke {}", self.shared.kind, invocation.name());
        Ok(())
    }

    async fn run(
        transport: Arc<dyn HubTransport>,
        endpoint: HubEndpoint,
        policy: ReconnectPolicy,
        shared: Arc<Shared>,
        generation: u64,
    ) {
        let kind = shared.kind;
        let mut attempt: u32 = 0;

        loop {
            match transport.connect(&endpoint).await {
                Ok(HubConnection { outbound, mut inbound }) => {
                    if !shared.is_current(generation) {
                        return;
                    }
                    attempt = 0;
                    shared.attach(outbound);
                    shared.set_state(generation, ConnectionState::Connected);
                    tracing::info!("{kind:?} hub connected");

                    while let Some(frame) = inbound.recv().await {
                        if !shared.is_current(generation) {
                            return;
                        }
                        match protocol::decode_event(&frame) {
                            Ok(event) => shared.publish(generation, ChannelEvent::Event(event)),
                            Err(e) => tracing::warn!("{kind:?} hub: {e}"),
                        }
                    }

                    if !shared.is_current(generation) {
                        return;
                    }
                    shared.detach();
                    tracing::warn!("{kind:?} hub connection lost");
                }
                Err(e) => {
                    if !shared.is_current(generation) {
                        return;
                    }
                    tracing::warn!("{kind:?} hub connect failed: {e}");
                }
            }

            attempt += 1;
            if policy.exhausted(attempt) {
                tracing::error!("{kind:?} hub giving up after {} attempts", attempt - 1);
                shared.set_state(generation, ConnectionState::Disconnected);
                return;
            }
            shared.set_state(generation, ConnectionState::Reconnecting { attempt });
            let delay = policy.delay_for(attempt);
            tracing::debug!("{kind:?} hub reconnect attempt {attempt} in {delay:?}");
            tokio::time::sleep(delay).await;
        }
    }
}

impl Drop for ControlChannel {
    fn drop(&mut self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(handle) = lock(&self.task).take() {
            handle.abort();
        }
    }
}

/// The hub connections of one app session: account notifications and the
/// live room. Dropping it stops both.
pub struct HubConnections {
    notifications: Arc<ControlChannel>,
    live_room: Arc<ControlChannel>,
}

impl HubConnections {
    pub fn new(
        transport: Arc<dyn HubTransport>,
        config: &ClientConfig,
        access_token: Option<String>,
    ) -> Result<Self, ClassroomError> {
        let policy = config.reconnect_policy();
        let notifications = ControlChannel::new(
            ChannelKind::Notifications,
            transport.clone(),
            HubEndpoint {
                url: config.notifications_hub()?,
                access_token: access_token.clone(),
            },
            policy.clone(),
        );
        let live_room = ControlChannel::new(
            ChannelKind::LiveRoom,
            transport,
            HubEndpoint {
                url: config.live_room_hub()?,
                access_token,
            },
            policy,
        );
        Ok(Self {
            notifications: Arc::new(notifications),
            live_room: Arc::new(live_room),
        })
    }

    pub fn notifications(&self) -> Arc<ControlChannel> {
        self.notifications.clone()
    }

    pub fn live_room(&self) -> Arc<ControlChannel> {
        self.live_room.clone()
    }

    pub fn stop_all(&self) {
        self.notifications.stop();
        self.live_room.stop();
    }
}

impl Drop for HubConnections {
    fn drop(&mut self) {
        self.stop_all();
    }
}
