//! In-memory fakes for the hub, Room API and media engine.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::api::{ApiError, RoomApi};
use crate::control::{ControlError, ControlEvent, HubConnection, HubEndpoint, HubTransport, Invocation};
use crate::media::{MediaEngine, MediaError, MediaEvent, MediaEventSink};
use crate::models::{
    CreateSessionRequest, JoinOutcome, JoinStatus, LocalIdentity, MediaCredential, Participant,
    Role, Session,
};

const WAIT: Duration = Duration::from_secs(2);

pub async fn recv_within<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> Option<T> {
    tokio::time::timeout(WAIT, rx.recv()).await.ok().flatten()
}

async fn sleep_for(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

pub fn credential(uid: u32) -> MediaCredential {
    MediaCredential {
        app_id: "app".to_string(),
        token: "media-token".to_string(),
        channel_id: "room-42".to_string(),
        uid,
        expires_at: None,
    }
}

pub fn session(id: i64, host_id: &str) -> Session {
    Session {
        id,
        name: "Algebra".to_string(),
        channel_id: format!("room-{id}"),
        host_id: host_id.to_string(),
        is_active: true,
        started_at: None,
        ended_at: None,
    }
}

// ── Hub ─────────────────────────────────────────────────────────────

/// Server end of one fake hub connection.
pub struct FakeConnection {
    to_client: mpsc::UnboundedSender<String>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl FakeConnection {
    pub fn push(&self, event: &ControlEvent) {
        self.push_raw(&serde_json::to_string(event).unwrap());
    }

    pub fn push_raw(&self, frame: &str) {
        let _ = self.to_client.send(frame.to_string());
    }

    pub async fn next_invocation(&mut self) -> Invocation {
        let text = recv_within(&mut self.from_client)
            .await
            .expect("no invocation from client");
        serde_json::from_str(&text).unwrap()
    }

    /// Everything the client has sent so far.
    pub fn drain_invocations(&mut self) -> Vec<Invocation> {
        let mut out = Vec::new();
        while let Ok(text) = self.from_client.try_recv() {
            out.push(serde_json::from_str(&text).unwrap());
        }
        out
    }

    /// Drop the connection from the server side.
    pub fn close(self) {}
}

pub struct FakeHub {
    connects: AtomicUsize,
    failures: Mutex<usize>,
    accepted_tx: mpsc::UnboundedSender<FakeConnection>,
    accepted_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<FakeConnection>>,
}

impl FakeHub {
    pub fn new() -> Arc<Self> {
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            connects: AtomicUsize::new(0),
            failures: Mutex::new(0),
            accepted_tx,
            accepted_rx: tokio::sync::Mutex::new(accepted_rx),
        })
    }

    /// Refuse the next `n` connection attempts.
    pub fn fail_next(&self, n: usize) {
        *lock(&self.failures) = n;
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub async fn accept(&self) -> FakeConnection {
        let mut rx = self.accepted_rx.lock().await;
        recv_within(&mut rx).await.expect("client never connected")
    }
}

#[async_trait]
impl HubTransport for FakeHub {
    async fn connect(&self, _endpoint: &HubEndpoint) -> Result<HubConnection, ControlError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        {
            let mut failures = lock(&self.failures);
            if *failures > 0 {
                *failures -= 1;
                return Err(ControlError::Connect("connection refused".to_string()));
            }
        }
        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();
        let _ = self.accepted_tx.send(FakeConnection { to_client, from_client });
        Ok(HubConnection { outbound, inbound })
    }
}

// ── Room API ────────────────────────────────────────────────────────

pub struct FakeRoomApi {
    calls: Mutex<Vec<String>>,
    session: Mutex<Result<Session, ApiError>>,
    joins: Mutex<VecDeque<Result<JoinOutcome, ApiError>>>,
    join_delay: Mutex<Duration>,
    participants: Mutex<Vec<Participant>>,
    credential: Mutex<Result<MediaCredential, ApiError>>,
    moderation_error: Mutex<Option<ApiError>>,
    moderation_delay: Mutex<Duration>,
    end_error: Mutex<Option<ApiError>>,
    end_delay: Mutex<Duration>,
}

impl FakeRoomApi {
    pub fn new(session: Session) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            session: Mutex::new(Ok(session)),
            joins: Mutex::new(VecDeque::new()),
            join_delay: Mutex::new(Duration::ZERO),
            participants: Mutex::new(Vec::new()),
            credential: Mutex::new(Ok(credential(7))),
            moderation_error: Mutex::new(None),
            moderation_delay: Mutex::new(Duration::ZERO),
            end_error: Mutex::new(None),
            end_delay: Mutex::new(Duration::ZERO),
        })
    }

    pub fn set_session(&self, result: Result<Session, ApiError>) {
        *lock(&self.session) = result;
    }

    /// Queue join responses; once drained every join is approved.
    pub fn push_join(&self, status: JoinStatus) {
        lock(&self.joins).push_back(Ok(JoinOutcome {
            status,
            participant: None,
        }));
    }

    /// Queue a join response that carries the caller's participant record.
    pub fn push_join_with(&self, status: JoinStatus, participant: Participant) {
        lock(&self.joins).push_back(Ok(JoinOutcome {
            status,
            participant: Some(participant),
        }));
    }

    pub fn push_join_error(&self, error: ApiError) {
        lock(&self.joins).push_back(Err(error));
    }

    pub fn set_join_delay(&self, delay: Duration) {
        *lock(&self.join_delay) = delay;
    }

    pub fn set_participants(&self, participants: Vec<Participant>) {
        *lock(&self.participants) = participants;
    }

    pub fn set_credential(&self, result: Result<MediaCredential, ApiError>) {
        *lock(&self.credential) = result;
    }

    pub fn fail_moderation(&self, error: ApiError) {
        *lock(&self.moderation_error) = Some(error);
    }

    pub fn set_moderation_delay(&self, delay: Duration) {
        *lock(&self.moderation_delay) = delay;
    }

    pub fn set_end_delay(&self, delay: Duration) {
        *lock(&self.end_delay) = delay;
    }

    pub fn fail_end(&self, error: Option<ApiError>) {
        *lock(&self.end_error) = error;
    }

    pub fn call_count(&self, name: &str) -> usize {
        lock(&self.calls).iter().filter(|c| c.as_str() == name).count()
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    fn record(&self, name: &str) {
        lock(&self.calls).push(name.to_string());
    }

    async fn next_join(&self) -> Result<JoinOutcome, ApiError> {
        let delay = *lock(&self.join_delay);
        sleep_for(delay).await;
        lock(&self.joins).pop_front().unwrap_or(Ok(JoinOutcome {
            status: JoinStatus::Approved,
            participant: None,
        }))
    }

    async fn moderation(&self) -> Result<(), ApiError> {
        let delay = *lock(&self.moderation_delay);
        sleep_for(delay).await;
        match lock(&self.moderation_error).clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RoomApi for FakeRoomApi {
    async fn create_session(&self, request: &CreateSessionRequest) -> Result<Session, ApiError> {
        self.record("create_session");
        let mut s = session(99, "host");
        s.name = request.name.clone();
        Ok(s)
    }

    async fn join_as_attendee(&self, _session_id: i64, _local: &LocalIdentity) -> Result<JoinOutcome, ApiError> {
        self.record("join_as_attendee");
        self.next_join().await
    }

    async fn join_as_staff(&self, _session_id: i64, _local: &LocalIdentity) -> Result<JoinOutcome, ApiError> {
        self.record("join_as_staff");
        self.next_join().await
    }

    async fn get_active_sessions(&self) -> Result<Vec<Session>, ApiError> {
        self.record("get_active_sessions");
        Ok(lock(&self.session).clone().into_iter().collect())
    }

    async fn get_session(&self, _session_id: i64) -> Result<Session, ApiError> {
        self.record("get_session");
        lock(&self.session).clone()
    }

    async fn get_participants(&self, _session_id: i64) -> Result<Vec<Participant>, ApiError> {
        self.record("get_participants");
        Ok(lock(&self.participants).clone())
    }

    async fn get_media_credential(&self, _channel_id: &str, _identity: &str, _role: Role) -> Result<MediaCredential, ApiError> {
        self.record("get_media_credential");
        lock(&self.credential).clone()
    }

    async fn approve_participant(&self, _session_id: i64, _identity: &str) -> Result<(), ApiError> {
        self.record("approve_participant");
        self.moderation().await
    }

    async fn remove_participant(&self, _session_id: i64, _identity: &str) -> Result<(), ApiError> {
        self.record("remove_participant");
        self.moderation().await
    }

    async fn mute_participant(&self, _session_id: i64, _identity: &str, _muted: bool) -> Result<(), ApiError> {
        self.record("mute_participant");
        self.moderation().await
    }

    async fn end_session(&self, _session_id: i64) -> Result<(), ApiError> {
        self.record("end_session");
        let delay = *lock(&self.end_delay);
        sleep_for(delay).await;
        match lock(&self.end_error).clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

// ── Media engine ────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeMediaEngine {
    calls: Mutex<Vec<String>>,
    init_error: Mutex<Option<MediaError>>,
    join_error: Mutex<Option<MediaError>>,
    leave_error: Mutex<Option<MediaError>>,
    join_delay: Mutex<Duration>,
    sink: Mutex<Option<MediaEventSink>>,
    mic_muted: Mutex<Option<bool>>,
    camera_off: Mutex<Option<bool>>,
}

impl FakeMediaEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_init(&self, error: MediaError) {
        *lock(&self.init_error) = Some(error);
    }

    pub fn fail_join(&self, error: MediaError) {
        *lock(&self.join_error) = Some(error);
    }

    pub fn fail_leave(&self, error: MediaError) {
        *lock(&self.leave_error) = Some(error);
    }

    pub fn clear_failures(&self) {
        *lock(&self.init_error) = None;
        *lock(&self.join_error) = None;
        *lock(&self.leave_error) = None;
    }

    pub fn set_join_delay(&self, delay: Duration) {
        *lock(&self.join_delay) = delay;
    }

    /// Deliver a callback through the sink handed over at initialize.
    pub fn emit(&self, event: MediaEvent) {
        if let Some(sink) = lock(&self.sink).as_ref() {
            sink.emit(event);
        }
    }

    pub fn call_count(&self, name: &str) -> usize {
        lock(&self.calls).iter().filter(|c| c.as_str() == name).count()
    }

    pub fn mic_muted(&self) -> Option<bool> {
        *lock(&self.mic_muted)
    }

    pub fn camera_off(&self) -> Option<bool> {
        *lock(&self.camera_off)
    }

    fn record(&self, name: &str) {
        lock(&self.calls).push(name.to_string());
    }

    async fn join(&self, name: &str, uid: u32) -> Result<(), MediaError> {
        self.record(name);
        let delay = *lock(&self.join_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(e) = lock(&self.join_error).clone() {
            return Err(e);
        }
        self.emit(MediaEvent::Joined { uid });
        Ok(())
    }
}

#[async_trait]
impl MediaEngine for FakeMediaEngine {
    async fn initialize(&self, _credential: &MediaCredential, sink: MediaEventSink) -> Result<(), MediaError> {
        self.record("initialize");
        if let Some(e) = lock(&self.init_error).clone() {
            return Err(e);
        }
        *lock(&self.sink) = Some(sink);
        Ok(())
    }

    async fn join_as_host(&self, _token: &str, _channel_id: &str, uid: u32) -> Result<(), MediaError> {
        self.join("join_as_host", uid).await
    }

    async fn join_as_audience(&self, _token: &str, _channel_id: &str, uid: u32) -> Result<(), MediaError> {
        self.join("join_as_audience", uid).await
    }

    async fn leave(&self) -> Result<(), MediaError> {
        self.record("leave");
        match lock(&self.leave_error).clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn dispose(&self) -> Result<(), MediaError> {
        self.record("dispose");
        Ok(())
    }

    fn mute_mic(&self, muted: bool) {
        self.record("mute_mic");
        *lock(&self.mic_muted) = Some(muted);
    }

    fn mute_camera(&self, off: bool) {
        self.record("mute_camera");
        *lock(&self.camera_off) = Some(off);
    }
}
