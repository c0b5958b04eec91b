//! UniFFI bindings for classroom-core.
//!
//! Provides a ClassroomClient object that wraps the SessionController, the
//! Room API client and the hub connections into a single FFI-safe interface.
//! The platform audio/video engine is supplied by the host as a
//! `NativeMediaEngine` callback interface.

use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use classroom_core::{
    control::ChannelEvent,
    events::{
        ChannelKind as CoreChannelKind, ChatMessage as CoreChatMessage,
        ClassroomEvent as CoreClassroomEvent, ConnectionState as CoreConnectionState,
        EndReason as CoreEndReason,
    },
    media::{MediaEngine, MediaError as CoreMediaError, MediaEvent as CoreMediaEvent, MediaEventSink},
    models::{
        ApprovalStatus as CoreApprovalStatus, CreateSessionRequest,
        MediaCredential as CoreMediaCredential, Participant as CoreParticipant, Role as CoreRole,
        Session as CoreSession,
    },
    state::{LifecycleState as CoreLifecycleState, RoomSnapshot as CoreRoomSnapshot},
    ClassroomError as CoreError, ClientConfig, ConfigStore, HttpRoomApi, HubConnections,
    LocalIdentity, MediaChannel, RoomApi, SessionController, WsHubTransport,
};

uniffi::include_scaffolding!("classroom");

/// Code reported when a native media callback fails unexpectedly.
const CALLBACK_FAILURE: i32 = -100;

fn lock<T>(m: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ── Namespace functions ──────────────────────────────────────────────

/// Initialize tracing/logging. Call once from the host before creating a
/// ClassroomClient.
fn init_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("classroom_core=debug,classroom_ffi=debug"));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .init();
    });
}

// ── FFI-safe type conversions ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Host,
    Staff,
    Attendee,
}

impl From<CoreRole> for Role {
    fn from(r: CoreRole) -> Self {
        match r {
            CoreRole::Host => Self::Host,
            CoreRole::Staff => Self::Staff,
            CoreRole::Attendee => Self::Attendee,
        }
    }
}

impl From<Role> for CoreRole {
    fn from(r: Role) -> Self {
        match r {
            Role::Host => Self::Host,
            Role::Staff => Self::Staff,
            Role::Attendee => Self::Attendee,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl From<CoreApprovalStatus> for ApprovalStatus {
    fn from(a: CoreApprovalStatus) -> Self {
        match a {
            CoreApprovalStatus::Pending => Self::Pending,
            CoreApprovalStatus::Approved => Self::Approved,
            CoreApprovalStatus::Rejected => Self::Rejected,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Loading,
    JoinRequested,
    PendingApproval,
    Joined,
    Denied,
    PaymentRequired,
    Closed,
    MediaConnecting,
    MediaConnected,
    Ended,
}

impl From<CoreLifecycleState> for LifecycleState {
    fn from(s: CoreLifecycleState) -> Self {
        match s {
            CoreLifecycleState::Idle => Self::Idle,
            CoreLifecycleState::Loading => Self::Loading,
            CoreLifecycleState::JoinRequested => Self::JoinRequested,
            CoreLifecycleState::PendingApproval => Self::PendingApproval,
            CoreLifecycleState::Joined => Self::Joined,
            CoreLifecycleState::Denied => Self::Denied,
            CoreLifecycleState::PaymentRequired => Self::PaymentRequired,
            CoreLifecycleState::Closed => Self::Closed,
            CoreLifecycleState::MediaConnecting => Self::MediaConnecting,
            CoreLifecycleState::MediaConnected => Self::MediaConnected,
            CoreLifecycleState::Ended => Self::Ended,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Notifications,
    LiveRoom,
    Media,
}

impl From<CoreChannelKind> for ChannelKind {
    fn from(k: CoreChannelKind) -> Self {
        match k {
            CoreChannelKind::Notifications => Self::Notifications,
            CoreChannelKind::LiveRoom => Self::LiveRoom,
            CoreChannelKind::Media => Self::Media,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    SessionEnded,
    Removed,
    Left,
}

impl From<CoreEndReason> for EndReason {
    fn from(r: CoreEndReason) -> Self {
        match r {
            CoreEndReason::SessionEnded => Self::SessionEnded,
            CoreEndReason::Removed => Self::Removed,
            CoreEndReason::Left => Self::Left,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
}

impl From<CoreConnectionState> for ConnectionState {
    fn from(s: CoreConnectionState) -> Self {
        match s {
            CoreConnectionState::Disconnected => Self::Disconnected,
            CoreConnectionState::Connecting => Self::Connecting,
            CoreConnectionState::Connected => Self::Connected,
            CoreConnectionState::Reconnecting { attempt } => Self::Reconnecting { attempt },
        }
    }
}

#[derive(Debug, Clone)]
pub struct LocalUser {
    pub identity: String,
    pub display_name: String,
    pub role: Role,
}

impl From<LocalUser> for LocalIdentity {
    fn from(u: LocalUser) -> Self {
        LocalIdentity::new(u.identity, u.display_name, u.role.into())
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: i64,
    pub name: String,
    pub channel_id: String,
    pub host_id: String,
    pub is_active: bool,
    pub started_at_ms: Option<i64>,
    pub ended_at_ms: Option<i64>,
}

impl From<CoreSession> for Session {
    fn from(s: CoreSession) -> Self {
        Self {
            id: s.id,
            name: s.name,
            channel_id: s.channel_id,
            host_id: s.host_id,
            is_active: s.is_active,
            started_at_ms: s.started_at.map(|t| t.timestamp_millis()),
            ended_at_ms: s.ended_at.map(|t| t.timestamp_millis()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Participant {
    pub identity: String,
    pub display_name: String,
    pub role: Role,
    pub approval: ApprovalStatus,
    pub is_muted: bool,
    pub is_video_off: bool,
    pub is_hand_raised: bool,
}

impl From<CoreParticipant> for Participant {
    fn from(p: CoreParticipant) -> Self {
        Self {
            identity: p.identity,
            display_name: p.display_name,
            role: p.role.into(),
            approval: p.approval.into(),
            is_muted: p.is_muted,
            is_video_off: p.is_video_off,
            is_hand_raised: p.is_hand_raised,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub id: String,
    pub sender_identity: String,
    pub sender_name: String,
    pub text: String,
    pub timestamp_ms: u64,
}

impl From<CoreChatMessage> for ChatMessage {
    fn from(m: CoreChatMessage) -> Self {
        Self {
            id: m.id,
            sender_identity: m.sender_identity,
            sender_name: m.sender_name,
            text: m.text,
            timestamp_ms: m.timestamp_ms,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RoomSnapshot {
    pub lifecycle: LifecycleState,
    pub joined: bool,
    pub session: Option<Session>,
    pub participants: Vec<Participant>,
    pub raised_hands: Vec<String>,
    pub remote_peers: Vec<u32>,
    pub local_muted: bool,
    pub local_video_off: bool,
    pub chat_messages: Vec<ChatMessage>,
    pub control_state: ConnectionState,
    pub media_state: ConnectionState,
}

impl From<CoreRoomSnapshot> for RoomSnapshot {
    fn from(s: CoreRoomSnapshot) -> Self {
        Self {
            lifecycle: s.lifecycle.into(),
            joined: s.joined,
            session: s.session.map(Session::from),
            participants: s.participants.into_iter().map(Participant::from).collect(),
            raised_hands: s.raised_hands,
            remote_peers: s.remote_peers,
            local_muted: s.local_muted,
            local_video_off: s.local_video_off,
            chat_messages: s.chat_messages.into_iter().map(ChatMessage::from).collect(),
            control_state: s.control_state.into(),
            media_state: s.media_state.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub api_base_url: String,
    pub live_room_hub_url: String,
    pub notifications_hub_url: String,
    pub mic_muted_on_join: bool,
    pub camera_off_on_join: bool,
}

impl From<ClientConfig> for ClientSettings {
    fn from(c: ClientConfig) -> Self {
        Self {
            api_base_url: c.api_base_url,
            live_room_hub_url: c.live_room_hub_url,
            notifications_hub_url: c.notifications_hub_url,
            mic_muted_on_join: c.mic_muted_on_join,
            camera_off_on_join: c.camera_off_on_join,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MediaCredential {
    pub app_id: String,
    pub token: String,
    pub channel_id: String,
    pub uid: u32,
}

impl From<CoreMediaCredential> for MediaCredential {
    fn from(c: CoreMediaCredential) -> Self {
        Self {
            app_id: c.app_id,
            token: c.token,
            channel_id: c.channel_id,
            uid: c.uid,
        }
    }
}

#[derive(Debug, Clone)]
pub enum MediaEvent {
    Joined { uid: u32 },
    PeerJoined { uid: u32 },
    PeerLeft { uid: u32 },
    Error { code: i32, message: String },
}

impl From<MediaEvent> for CoreMediaEvent {
    fn from(e: MediaEvent) -> Self {
        match e {
            MediaEvent::Joined { uid } => Self::Joined { uid },
            MediaEvent::PeerJoined { uid } => Self::PeerJoined(uid),
            MediaEvent::PeerLeft { uid } => Self::PeerLeft(uid),
            MediaEvent::Error { code, message } => Self::Error { code, message },
        }
    }
}

#[derive(Debug, Clone)]
pub enum ClassroomEvent {
    LifecycleChanged { state: LifecycleState },
    ConnectionStateChanged { channel: ChannelKind, state: ConnectionState },
    RosterReplaced { participants: Vec<Participant> },
    ParticipantJoined { participant: Participant },
    ParticipantUpdated { participant: Participant },
    ParticipantLeft { identity: String },
    RemotePeerJoined { uid: u32 },
    RemotePeerLeft { uid: u32 },
    ChatMessageReceived { message: ChatMessage },
    MediaError { code: i32, message: String },
    SessionTerminated { reason: EndReason },
}

impl From<CoreClassroomEvent> for ClassroomEvent {
    fn from(e: CoreClassroomEvent) -> Self {
        match e {
            CoreClassroomEvent::LifecycleChanged(s) => Self::LifecycleChanged { state: s.into() },
            CoreClassroomEvent::ConnectionStateChanged { channel, state } => {
                Self::ConnectionStateChanged {
                    channel: channel.into(),
                    state: state.into(),
                }
            }
            CoreClassroomEvent::RosterReplaced(list) => Self::RosterReplaced {
                participants: list.into_iter().map(Participant::from).collect(),
            },
            CoreClassroomEvent::ParticipantJoined(p) => Self::ParticipantJoined { participant: p.into() },
            CoreClassroomEvent::ParticipantUpdated(p) => Self::ParticipantUpdated { participant: p.into() },
            CoreClassroomEvent::ParticipantLeft(identity) => Self::ParticipantLeft { identity },
            CoreClassroomEvent::RemotePeerJoined(uid) => Self::RemotePeerJoined { uid },
            CoreClassroomEvent::RemotePeerLeft(uid) => Self::RemotePeerLeft { uid },
            CoreClassroomEvent::ChatMessageReceived(m) => Self::ChatMessageReceived { message: m.into() },
            CoreClassroomEvent::MediaError { code, message } => Self::MediaError { code, message },
            CoreClassroomEvent::SessionTerminated(r) => Self::SessionTerminated { reason: r.into() },
        }
    }
}

// ── Error conversion ──────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ClassroomFfiError {
    #[error("Room load error: {msg}")]
    RoomLoad { msg: String },
    #[error("Join error: {msg}")]
    Join { msg: String },
    #[error("Moderation error: {msg}")]
    Moderation { msg: String },
    #[error("End session error: {msg}")]
    EndSession { msg: String },
    #[error("API error: {msg}")]
    Api { msg: String },
    #[error("Control channel error: {msg}")]
    Control { msg: String },
    #[error("Media error: {msg}")]
    Media { msg: String },
    #[error("Invalid state: {msg}")]
    InvalidState { msg: String },
    #[error("Not permitted: {msg}")]
    NotPermitted { msg: String },
    #[error("Invalid input: {msg}")]
    InvalidInput { msg: String },
    #[error("Cancelled: {msg}")]
    Cancelled { msg: String },
    #[error("Config error: {msg}")]
    Config { msg: String },
}

impl From<CoreError> for ClassroomFfiError {
    fn from(e: CoreError) -> Self {
        tracing::error!("ClassroomError: {e}");
        let msg = e.to_string();
        match e {
            CoreError::RoomLoad(_) => Self::RoomLoad { msg },
            CoreError::Join(_) => Self::Join { msg },
            CoreError::Moderation { .. } => Self::Moderation { msg },
            CoreError::EndSession(_) => Self::EndSession { msg },
            CoreError::Api(_) => Self::Api { msg },
            CoreError::Control(_) => Self::Control { msg },
            CoreError::Media(_) => Self::Media { msg },
            CoreError::InvalidState(_) | CoreError::NoSession => Self::InvalidState { msg },
            CoreError::NotPermitted(_) => Self::NotPermitted { msg },
            CoreError::EmptyMessage => Self::InvalidInput { msg },
            CoreError::Cancelled => Self::Cancelled { msg },
            CoreError::Config(_) => Self::Config { msg },
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MediaFfiError {
    #[error("permission denied")]
    PermissionDenied,
    #[error("engine error {code}: {message}")]
    Engine { code: i32, message: String },
    #[error("unexpected: {message}")]
    Unexpected { message: String },
}

impl From<uniffi::UnexpectedUniFFICallbackError> for MediaFfiError {
    fn from(e: uniffi::UnexpectedUniFFICallbackError) -> Self {
        Self::Unexpected { message: e.reason }
    }
}

impl From<MediaFfiError> for CoreMediaError {
    fn from(e: MediaFfiError) -> Self {
        match e {
            MediaFfiError::PermissionDenied => Self::PermissionDenied,
            MediaFfiError::Engine { code, message } => Self::Engine { code, message },
            MediaFfiError::Unexpected { message } => Self::Engine {
                code: CALLBACK_FAILURE,
                message,
            },
        }
    }
}

// ── Callback interfaces ───────────────────────────────────────────────

pub trait ClassroomEventListener: Send + Sync {
    fn on_event(&self, event: ClassroomEvent);
}

/// Platform audio/video engine. Calls may block; they run on the blocking
/// pool.
pub trait NativeMediaEngine: Send + Sync {
    fn initialize(&self, credential: MediaCredential) -> Result<(), MediaFfiError>;
    fn join_as_host(&self, token: String, channel_id: String, uid: u32) -> Result<(), MediaFfiError>;
    fn join_as_audience(&self, token: String, channel_id: String, uid: u32) -> Result<(), MediaFfiError>;
    fn leave(&self) -> Result<(), MediaFfiError>;
    fn dispose(&self) -> Result<(), MediaFfiError>;
    fn mute_mic(&self, muted: bool);
    fn mute_camera(&self, off: bool);
}

// ── Bridges: FFI callbacks ↔ core traits ──────────────────────────────

struct BridgeListener {
    ffi_listener: Arc<dyn ClassroomEventListener>,
}

impl classroom_core::ClassroomEventListener for BridgeListener {
    fn on_event(&self, event: CoreClassroomEvent) {
        self.ffi_listener.on_event(event.into());
    }
}

type MediaSinkSlot = Arc<StdMutex<Option<MediaEventSink>>>;

struct BridgeMediaEngine {
    native: Arc<dyn NativeMediaEngine>,
    /// Handed over at initialize; `ClassroomClient::on_media_event` feeds it.
    sink: MediaSinkSlot,
}

async fn run_blocking<F>(call: F) -> Result<(), CoreMediaError>
where
    F: FnOnce() -> Result<(), MediaFfiError> + Send + 'static,
{
    match tokio::task::spawn_blocking(call).await {
        Ok(result) => result.map_err(CoreMediaError::from),
        Err(e) => Err(CoreMediaError::Engine {
            code: CALLBACK_FAILURE,
            message: format!("native media call failed: {e}"),
        }),
    }
}

#[async_trait]
impl MediaEngine for BridgeMediaEngine {
    async fn initialize(&self, credential: &CoreMediaCredential, sink: MediaEventSink) -> Result<(), CoreMediaError> {
        *lock(&self.sink) = Some(sink);
        let native = self.native.clone();
        let credential = MediaCredential::from(credential.clone());
        run_blocking(move || native.initialize(credential)).await
    }

    async fn join_as_host(&self, token: &str, channel_id: &str, uid: u32) -> Result<(), CoreMediaError> {
        let native = self.native.clone();
        let (token, channel_id) = (token.to_string(), channel_id.to_string());
        run_blocking(move || native.join_as_host(token, channel_id, uid)).await
    }

    async fn join_as_audience(&self, token: &str, channel_id: &str, uid: u32) -> Result<(), CoreMediaError> {
        let native = self.native.clone();
        let (token, channel_id) = (token.to_string(), channel_id.to_string());
        run_blocking(move || native.join_as_audience(token, channel_id, uid)).await
    }

    async fn leave(&self) -> Result<(), CoreMediaError> {
        let native = self.native.clone();
        run_blocking(move || native.leave()).await
    }

    async fn dispose(&self) -> Result<(), CoreMediaError> {
        let native = self.native.clone();
        let result = run_blocking(move || native.dispose()).await;
        *lock(&self.sink) = None;
        result
    }

    fn mute_mic(&self, muted: bool) {
        self.native.mute_mic(muted);
    }

    fn mute_camera(&self, off: bool) {
        self.native.mute_camera(off);
    }
}

type Listeners = Arc<StdMutex<Vec<Arc<dyn ClassroomEventListener>>>>;

/// Forward the notifications hub's connection state to FFI listeners.
async fn forward_notifications(
    mut rx: tokio::sync::mpsc::UnboundedReceiver<ChannelEvent>,
    listeners: Listeners,
) {
    while let Some(event) = rx.recv().await {
        match event {
            ChannelEvent::State(state) => {
                let event = ClassroomEvent::ConnectionStateChanged {
                    channel: ChannelKind::Notifications,
                    state: state.into(),
                };
                for listener in lock(&listeners).iter() {
                    listener.on_event(event.clone());
                }
            }
            ChannelEvent::Event(event) => {
                tracing::debug!("notification hub event: {event:?}");
            }
        }
    }
}

// ── ClassroomClient: main FFI object ──────────────────────────────────

pub struct ClassroomClient {
    controller: SessionController,
    api: Arc<dyn RoomApi>,
    hubs: HubConnections,
    config: ConfigStore,
    media_sink: MediaSinkSlot,
    listeners: Listeners,
    rt: tokio::runtime::Runtime,
}

impl ClassroomClient {
    /// Endpoints are read from the stored settings once, here; URL changes
    /// take effect with the next client.
    pub fn new(
        data_dir: String,
        local: LocalUser,
        access_token: Option<String>,
        engine: Box<dyn NativeMediaEngine>,
    ) -> Result<Self, ClassroomFfiError> {
        tracing::info!("ClassroomClient::new() for {}", local.identity);
        let rt = tokio::runtime::Runtime::new().map_err(|e| ClassroomFfiError::Config {
            msg: format!("failed to create tokio runtime: {e}"),
        })?;
        let config = ConfigStore::new(&data_dir);
        let settings = config.get();

        let api: Arc<dyn RoomApi> = Arc::new(
            HttpRoomApi::new(settings.api_base()?, access_token.clone(), settings.request_timeout())
                .map_err(CoreError::from)?,
        );
        let hubs = HubConnections::new(Arc::new(WsHubTransport::new()), &settings, access_token)?;

        let media_sink: MediaSinkSlot = Arc::new(StdMutex::new(None));
        let media = Arc::new(MediaChannel::new(Arc::new(BridgeMediaEngine {
            native: Arc::from(engine),
            sink: media_sink.clone(),
        })));

        let listeners: Listeners = Arc::new(StdMutex::new(Vec::new()));
        let controller = {
            let _guard = rt.enter();
            rt.spawn(forward_notifications(hubs.notifications().subscribe(), listeners.clone()));
            SessionController::new(local.into(), api.clone(), hubs.live_room(), media)
        };
        rt.block_on(async {
            controller.set_microphone_muted(settings.mic_muted_on_join).await;
            controller.set_camera_off(settings.camera_off_on_join).await;
        });

        Ok(Self {
            controller,
            api,
            hubs,
            config,
            media_sink,
            listeners,
            rt,
        })
    }

    /// Run a connect-path call, keeping panics from crossing the FFI
    /// boundary.
    fn guarded<T>(
        &self,
        what: &str,
        fut: impl std::future::Future<Output = Result<T, CoreError>>,
    ) -> Result<T, ClassroomFfiError> {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| self.rt.block_on(fut)));
        match result {
            Ok(res) => res.map_err(ClassroomFfiError::from),
            Err(panic_info) => {
                let msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic_info.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "unknown panic".to_string()
                };
                tracing::error!("{what}() panicked: {msg}");
                Err(ClassroomFfiError::Control {
                    msg: format!("panic in {what}: {msg}"),
                })
            }
        }
    }

    pub fn add_listener(&self, listener: Box<dyn ClassroomEventListener>) {
        let listener: Arc<dyn ClassroomEventListener> = Arc::from(listener);
        lock(&self.listeners).push(listener.clone());
        self.controller.add_listener(Arc::new(BridgeListener {
            ffi_listener: listener,
        }));
    }

    /// Entry point for native media engine callbacks.
    pub fn on_media_event(&self, event: MediaEvent) {
        match lock(&self.media_sink).as_ref() {
            Some(sink) => sink.emit(event.into()),
            None => tracing::debug!("media event before initialize dropped: {event:?}"),
        }
    }

    pub fn get_settings(&self) -> ClientSettings {
        self.config.get().into()
    }

    pub fn set_api_base_url(&self, url: String) {
        self.config.set_api_base_url(url);
    }

    pub fn set_mic_muted_on_join(&self, muted: bool) {
        self.config.set_mic_muted_on_join(muted);
    }

    pub fn set_camera_off_on_join(&self, off: bool) {
        self.config.set_camera_off_on_join(off);
    }

    pub fn start_notifications(&self) {
        let _guard = self.rt.enter();
        self.hubs.notifications().start();
    }

    pub fn stop_notifications(&self) {
        self.hubs.notifications().stop();
    }

    pub fn notifications_state(&self) -> ConnectionState {
        self.hubs.notifications().connection_state().into()
    }

    pub fn create_session(
        &self,
        name: String,
        course_id: Option<i64>,
        requires_approval: bool,
    ) -> Result<Session, ClassroomFfiError> {
        let request = CreateSessionRequest {
            name,
            course_id,
            requires_approval,
        };
        self.rt
            .block_on(self.api.create_session(&request))
            .map(Session::from)
            .map_err(|e| CoreError::from(e).into())
    }

    pub fn active_sessions(&self) -> Result<Vec<Session>, ClassroomFfiError> {
        self.rt
            .block_on(self.api.get_active_sessions())
            .map(|list| list.into_iter().map(Session::from).collect())
            .map_err(|e| CoreError::from(e).into())
    }

    pub fn load_room(&self, room_id: i64) -> Result<(), ClassroomFfiError> {
        self.guarded("load_room", self.controller.load_room(room_id))
    }

    pub fn join(&self) -> Result<(), ClassroomFfiError> {
        self.guarded("join", self.controller.join())
    }

    pub fn leave(&self) -> Result<(), ClassroomFfiError> {
        self.rt.block_on(self.controller.leave()).map_err(ClassroomFfiError::from)
    }

    pub fn end_session(&self) -> Result<(), ClassroomFfiError> {
        self.rt
            .block_on(self.controller.end_session())
            .map_err(ClassroomFfiError::from)
    }

    pub fn approve_participant(&self, identity: String) -> Result<(), ClassroomFfiError> {
        self.rt
            .block_on(self.controller.approve_participant(&identity))
            .map_err(ClassroomFfiError::from)
    }

    pub fn remove_participant(&self, identity: String) -> Result<(), ClassroomFfiError> {
        self.rt
            .block_on(self.controller.remove_participant(&identity))
            .map_err(ClassroomFfiError::from)
    }

    pub fn mute_participant(&self, identity: String, muted: bool) -> Result<(), ClassroomFfiError> {
        self.rt
            .block_on(self.controller.mute_participant(&identity, muted))
            .map_err(ClassroomFfiError::from)
    }

    pub fn set_microphone_muted(&self, muted: bool) {
        self.rt.block_on(self.controller.set_microphone_muted(muted));
    }

    pub fn set_camera_off(&self, off: bool) {
        self.rt.block_on(self.controller.set_camera_off(off));
    }

    pub fn raise_hand(&self) -> Result<(), ClassroomFfiError> {
        self.rt.block_on(self.controller.raise_hand()).map_err(ClassroomFfiError::from)
    }

    pub fn lower_hand(&self) -> Result<(), ClassroomFfiError> {
        self.rt.block_on(self.controller.lower_hand()).map_err(ClassroomFfiError::from)
    }

    pub fn send_chat_message(&self, text: String) -> Result<ChatMessage, ClassroomFfiError> {
        self.rt
            .block_on(self.controller.send_chat_message(&text))
            .map(ChatMessage::from)
            .map_err(ClassroomFfiError::from)
    }

    pub fn refresh_participants(&self) -> Result<(), ClassroomFfiError> {
        self.rt
            .block_on(self.controller.refresh_participants())
            .map_err(ClassroomFfiError::from)
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        self.rt.block_on(self.controller.snapshot()).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use classroom_core::api::ApiError;

    #[derive(Default)]
    struct RecordingEngine {
        calls: StdMutex<Vec<String>>,
        deny_publish: bool,
    }

    impl NativeMediaEngine for RecordingEngine {
        fn initialize(&self, credential: MediaCredential) -> Result<(), MediaFfiError> {
            self.calls.lock().unwrap().push(format!("initialize:{}", credential.uid));
            Ok(())
        }
        fn join_as_host(&self, _token: String, channel_id: String, _uid: u32) -> Result<(), MediaFfiError> {
            self.calls.lock().unwrap().push(format!("host:{channel_id}"));
            if self.deny_publish {
                return Err(MediaFfiError::PermissionDenied);
            }
            Ok(())
        }
        fn join_as_audience(&self, _token: String, channel_id: String, _uid: u32) -> Result<(), MediaFfiError> {
            self.calls.lock().unwrap().push(format!("audience:{channel_id}"));
            Ok(())
        }
        fn leave(&self) -> Result<(), MediaFfiError> {
            Err(MediaFfiError::Unexpected {
                message: "gone".to_string(),
            })
        }
        fn dispose(&self) -> Result<(), MediaFfiError> {
            self.calls.lock().unwrap().push("dispose".to_string());
            Ok(())
        }
        fn mute_mic(&self, muted: bool) {
            self.calls.lock().unwrap().push(format!("mic:{muted}"));
        }
        fn mute_camera(&self, off: bool) {
            self.calls.lock().unwrap().push(format!("camera:{off}"));
        }
    }

    fn credential() -> CoreMediaCredential {
        CoreMediaCredential {
            app_id: "app".to_string(),
            token: "tok".to_string(),
            channel_id: "room-1".to_string(),
            uid: 3,
            expires_at: None,
        }
    }

    #[test]
    fn core_errors_map_to_ffi_variants() {
        let e: ClassroomFfiError = CoreError::RoomLoad(ApiError::Timeout).into();
        assert!(matches!(e, ClassroomFfiError::RoomLoad { .. }));

        let e: ClassroomFfiError = CoreError::NoSession.into();
        assert!(matches!(e, ClassroomFfiError::InvalidState { .. }));

        let e: ClassroomFfiError = CoreError::NotPermitted("end the session").into();
        match e {
            ClassroomFfiError::NotPermitted { msg } => assert!(msg.contains("end the session")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn media_errors_map_to_core() {
        assert_eq!(
            CoreMediaError::from(MediaFfiError::PermissionDenied),
            CoreMediaError::PermissionDenied
        );
        assert_eq!(
            CoreMediaError::from(MediaFfiError::Unexpected {
                message: "x".to_string()
            }),
            CoreMediaError::Engine {
                code: CALLBACK_FAILURE,
                message: "x".to_string()
            }
        );
    }

    #[test]
    fn events_convert_to_ffi_records() {
        let ev: ClassroomEvent = CoreClassroomEvent::ConnectionStateChanged {
            channel: CoreChannelKind::LiveRoom,
            state: CoreConnectionState::Reconnecting { attempt: 2 },
        }
        .into();
        match ev {
            ClassroomEvent::ConnectionStateChanged { channel, state } => {
                assert_eq!(channel, ChannelKind::LiveRoom);
                assert_eq!(state, ConnectionState::Reconnecting { attempt: 2 });
            }
            other => panic!("unexpected {other:?}"),
        }

        let p = CoreParticipant::new("s1", "Sam", CoreRole::Attendee)
            .with_approval(CoreApprovalStatus::Pending);
        let p = Participant::from(p);
        assert_eq!(p.role, Role::Attendee);
        assert_eq!(p.approval, ApprovalStatus::Pending);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn bridge_engine_runs_native_calls_and_maps_errors() {
        let native = Arc::new(RecordingEngine {
            deny_publish: true,
            ..RecordingEngine::default()
        });
        let channel = MediaChannel::new(Arc::new(BridgeMediaEngine {
            native: native.clone(),
            sink: Arc::new(StdMutex::new(None)),
        }));

        channel.initialize(credential()).await.unwrap();
        assert_eq!(
            channel.join(CoreRole::Host).await,
            Err(CoreMediaError::PermissionDenied)
        );
        channel.join(CoreRole::Attendee).await.unwrap();
        // leave fails natively; teardown still disposes
        channel.teardown().await;

        let calls = native.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                "initialize:3",
                "host:room-1",
                "audience:room-1",
                "mic:false",
                "camera:false",
                "dispose",
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn media_events_flow_through_stored_sink() {
        let slot: MediaSinkSlot = Arc::new(StdMutex::new(None));
        let channel = MediaChannel::new(Arc::new(BridgeMediaEngine {
            native: Arc::new(RecordingEngine::default()),
            sink: slot.clone(),
        }));
        let mut events = channel.take_events().unwrap();
        channel.initialize(credential()).await.unwrap();

        let sink = slot.lock().unwrap().clone().expect("sink stored at initialize");
        sink.emit(MediaEvent::PeerJoined { uid: 8 }.into());
        assert_eq!(events.recv().await, Some(CoreMediaEvent::PeerJoined(8)));

        channel.teardown().await;
        assert!(slot.lock().unwrap().is_none());
    }
}
