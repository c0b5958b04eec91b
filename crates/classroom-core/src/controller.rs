//! Session lifecycle controller.
//!
//! Owns the [`RoomState`] of one room and reconciles it from three inputs:
//! Room API responses, control-channel pushes and media-engine callbacks.
//! Pushes and callbacks are funnelled into a single event-loop task;
//! intents run on the caller's task. Both go through the same state lock.
//!
//! Every intent captures the controller epoch before awaiting and drops its
//! result if a teardown or reload bumped the epoch in the meantime.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::api::RoomApi;
use crate::chat::ChatLog;
use crate::control::{ChannelEvent, ControlChannel, ControlEvent, Invocation};
use crate::errors::ClassroomError;
use crate::events::{
    ChannelKind, ChatMessage, ClassroomEvent, ClassroomEventListener, ConnectionState, EndReason,
    EventEmitter,
};
use crate::media::{MediaChannel, MediaEvent};
use crate::models::{ApprovalStatus, JoinStatus, LocalIdentity, Participant, Role};
use crate::state::{LifecycleState, RoomSnapshot, RoomState};

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn lock<T>(m: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// What `join()` does once the state lock is released.
enum JoinNext {
    Complete(u64),
    AwaitApproval(i64),
    Rejected,
}

struct Inner {
    local: LocalIdentity,
    api: Arc<dyn RoomApi>,
    control: Arc<ControlChannel>,
    media: Arc<MediaChannel>,
    state: Mutex<RoomState>,
    epoch: AtomicU64,
    emitter: EventEmitter,
    /// Events queued under the state lock, dispatched after it is released
    /// so listeners may call back into the controller.
    outbox: std::sync::Mutex<VecDeque<ClassroomEvent>>,
    dispatching: AtomicBool,
}

/// Drives one local user through a room: load, join, media, moderation,
/// teardown.
pub struct SessionController {
    inner: Arc<Inner>,
    event_loop: JoinHandle<()>,
}

impl SessionController {
    /// Takes over the channel's subscription and the media event stream.
    /// Must be called from within a Tokio runtime.
    pub fn new(
        local: LocalIdentity,
        api: Arc<dyn RoomApi>,
        control: Arc<ControlChannel>,
        media: Arc<MediaChannel>,
    ) -> Self {
        let control_rx = control.subscribe();
        let media_rx = media.take_events();
        let inner = Arc::new(Inner {
            local,
            api,
            control,
            media,
            state: Mutex::new(RoomState::new()),
            epoch: AtomicU64::new(0),
            emitter: EventEmitter::new(),
            outbox: std::sync::Mutex::new(VecDeque::new()),
            dispatching: AtomicBool::new(false),
        });
        let event_loop = tokio::spawn(inner.clone().run_events(control_rx, media_rx));
        Self { inner, event_loop }
    }

    pub fn local(&self) -> &LocalIdentity {
        &self.inner.local
    }

    pub fn add_listener(&self, listener: Arc<dyn ClassroomEventListener>) {
        self.inner.emitter.add_listener(listener);
    }

    pub async fn snapshot(&self) -> RoomSnapshot {
        self.inner.state.lock().await.snapshot()
    }

    pub async fn lifecycle(&self) -> LifecycleState {
        self.inner.state.lock().await.lifecycle
    }

    /// Fetch the session and prepare to join it. The session host skips the
    /// join request and is admitted straight away.
    pub async fn load_room(&self, room_id: i64) -> Result<(), ClassroomError> {
        let inner = &self.inner;
        let epoch = {
            let mut st = inner.state.lock().await;
            if !matches!(st.lifecycle, LifecycleState::Idle | LifecycleState::Ended) {
                return Err(ClassroomError::InvalidState(st.lifecycle));
            }
            st.reset_membership();
            st.session = None;
            inner.set_lifecycle(&mut st, LifecycleState::Loading);
            inner.epoch.fetch_add(1, Ordering::SeqCst) + 1
        };
        inner.flush();
        tracing::info!("loading room {room_id}");

        let result = inner.api.get_session(room_id).await;

        let admitted = {
            let mut st = inner.state.lock().await;
            inner.ensure_current(epoch)?;
            match result {
                Err(e) => {
                    tracing::warn!("room {room_id} failed to load: {e}");
                    inner.set_lifecycle(&mut st, LifecycleState::Idle);
                    drop(st);
                    inner.flush();
                    return Err(ClassroomError::RoomLoad(e));
                }
                Ok(session) => {
                    let is_host = session.host_id == inner.local.identity;
                    st.session = Some(session);
                    if is_host {
                        Some(inner.admit_local(&mut st, None))
                    } else {
                        inner.set_lifecycle(&mut st, LifecycleState::JoinRequested);
                        None
                    }
                }
            }
        };
        inner.flush();

        if let Some(epoch) = admitted {
            inner.complete_join(epoch).await;
        }
        Ok(())
    }

    /// Request admission. A no-op once admitted; from a rejected state it is
    /// the explicit retry.
    pub async fn join(&self) -> Result<(), ClassroomError> {
        let inner = &self.inner;
        let (session_id, epoch) = {
            let mut st = inner.state.lock().await;
            if st.lifecycle.is_member() {
                tracing::debug!("join ignored, already {:?}", st.lifecycle);
                return Ok(());
            }
            if st.join_in_flight {
                return Err(ClassroomError::InvalidState(st.lifecycle));
            }
            match st.lifecycle {
                LifecycleState::JoinRequested | LifecycleState::PendingApproval => {}
                s if s.is_rejected() => {}
                other => return Err(ClassroomError::InvalidState(other)),
            }
            let session_id = st.session_id().ok_or(ClassroomError::NoSession)?;
            st.join_in_flight = true;
            inner.set_lifecycle(&mut st, LifecycleState::JoinRequested);
            (session_id, inner.current_epoch())
        };
        inner.flush();

        let result = match inner.local.role {
            Role::Attendee => inner.api.join_as_attendee(session_id, &inner.local).await,
            Role::Host | Role::Staff => inner.api.join_as_staff(session_id, &inner.local).await,
        };

        let next = {
            let mut st = inner.state.lock().await;
            inner.ensure_current(epoch)?;
            st.join_in_flight = false;
            let outcome = result.map_err(ClassroomError::Join)?;
            tracing::info!("join status for session {session_id}: {:?}", outcome.status);
            match outcome.status {
                JoinStatus::Approved | JoinStatus::AlreadyJoined => {
                    JoinNext::Complete(inner.admit_local(&mut st, outcome.participant))
                }
                JoinStatus::PendingApproval if st.approved_early => {
                    JoinNext::Complete(inner.admit_local(&mut st, outcome.participant))
                }
                JoinStatus::PendingApproval => {
                    inner.upsert_local(&mut st, outcome.participant, ApprovalStatus::Pending);
                    inner.set_lifecycle(&mut st, LifecycleState::PendingApproval);
                    JoinNext::AwaitApproval(session_id)
                }
                JoinStatus::PaymentRequired => {
                    inner.reject_join(&mut st, LifecycleState::PaymentRequired);
                    JoinNext::Rejected
                }
                JoinStatus::Denied => {
                    inner.reject_join(&mut st, LifecycleState::Denied);
                    JoinNext::Rejected
                }
                JoinStatus::SessionClosed => {
                    inner.reject_join(&mut st, LifecycleState::Closed);
                    JoinNext::Rejected
                }
            }
        };
        inner.flush();

        match next {
            JoinNext::Complete(epoch) => inner.complete_join(epoch).await,
            JoinNext::AwaitApproval(session_id) => {
                // the approval push arrives on the live-room hub
                inner.control.join_room(session_id);
                inner.control.start();
            }
            JoinNext::Rejected => inner.control.stop(),
        }
        Ok(())
    }

    /// Leave the room. No-op when not in one.
    pub async fn leave(&self) -> Result<(), ClassroomError> {
        let inner = &self.inner;
        let session_id = {
            let st = inner.state.lock().await;
            if !st.lifecycle.in_room() {
                return Ok(());
            }
            st.session_id()
        };
        if let Some(session_id) = session_id {
            if let Err(e) = inner.control.invoke(&Invocation::LeaveRoom { session_id }) {
                tracing::debug!("leaveRoom not sent: {e}");
            }
        }
        inner.terminate(EndReason::Left).await;
        Ok(())
    }

    /// End the session for everyone. Host only.
    pub async fn end_session(&self) -> Result<(), ClassroomError> {
        let inner = &self.inner;
        let (session_id, epoch) = {
            let mut st = inner.state.lock().await;
            if st.lifecycle == LifecycleState::Ended {
                return Ok(());
            }
            if inner.local.role != Role::Host {
                return Err(ClassroomError::NotPermitted("end the session"));
            }
            if !st.lifecycle.in_room() {
                return Err(ClassroomError::InvalidState(st.lifecycle));
            }
            if st.end_in_flight {
                tracing::debug!("end_session already in flight");
                return Ok(());
            }
            let session_id = st.session_id().ok_or(ClassroomError::NoSession)?;
            st.end_in_flight = true;
            (session_id, inner.current_epoch())
        };

        if let Err(e) = inner.api.end_session(session_id).await {
            let mut st = inner.state.lock().await;
            if inner.is_current(epoch) {
                st.end_in_flight = false;
            }
            return Err(ClassroomError::EndSession(e));
        }
        if !inner.is_current(epoch) {
            // a sessionEnded push got here first
            return Ok(());
        }
        inner.publish(&Invocation::EndSession { session_id });
        inner.terminate(EndReason::SessionEnded).await;
        Ok(())
    }

    pub async fn approve_participant(&self, identity: &str) -> Result<(), ClassroomError> {
        let inner = &self.inner;
        let (session_id, epoch) = inner.moderation_target("approve participants").await?;
        inner
            .api
            .approve_participant(session_id, identity)
            .await
            .map_err(|source| ClassroomError::Moderation {
                action: "approve",
                source,
            })?;
        if !inner.is_current(epoch) {
            // committed upstream; the room this would update is gone
            return Ok(());
        }
        inner.publish(&Invocation::Approve {
            session_id,
            identity: identity.to_string(),
        });
        {
            let mut st = inner.state.lock().await;
            if let Some(p) = st.participants.set_approval(identity, ApprovalStatus::Approved) {
                inner.queue(ClassroomEvent::ParticipantUpdated(p.clone()));
            }
        }
        inner.flush();
        Ok(())
    }

    pub async fn remove_participant(&self, identity: &str) -> Result<(), ClassroomError> {
        let inner = &self.inner;
        let (session_id, epoch) = inner.moderation_target("remove participants").await?;
        inner
            .api
            .remove_participant(session_id, identity)
            .await
            .map_err(|source| ClassroomError::Moderation {
                action: "remove",
                source,
            })?;
        if !inner.is_current(epoch) {
            return Ok(());
        }
        inner.publish(&Invocation::Remove {
            session_id,
            identity: identity.to_string(),
        });
        {
            let mut st = inner.state.lock().await;
            if st.participants.remove_participant(identity).is_some() {
                inner.queue(ClassroomEvent::ParticipantLeft(identity.to_string()));
            }
        }
        inner.flush();
        Ok(())
    }

    pub async fn mute_participant(&self, identity: &str, muted: bool) -> Result<(), ClassroomError> {
        let inner = &self.inner;
        let (session_id, epoch) = inner.moderation_target("mute participants").await?;
        inner
            .api
            .mute_participant(session_id, identity, muted)
            .await
            .map_err(|source| ClassroomError::Moderation {
                action: "mute",
                source,
            })?;
        if !inner.is_current(epoch) {
            return Ok(());
        }
        inner.publish(&Invocation::ToggleMute {
            session_id,
            identity: identity.to_string(),
            muted,
        });
        {
            let mut st = inner.state.lock().await;
            if let Some(p) = st.participants.set_muted(identity, muted) {
                inner.queue(ClassroomEvent::ParticipantUpdated(p.clone()));
            }
        }
        inner.flush();
        Ok(())
    }

    /// Mute or unmute the local microphone. Outside a room this only records
    /// the preference applied at the next join.
    pub async fn set_microphone_muted(&self, muted: bool) {
        let inner = &self.inner;
        let session_id = {
            let mut st = inner.state.lock().await;
            st.local_muted = muted;
            inner.media.mute_mic(muted);
            if let Some(p) = st.participants.set_muted(&inner.local.identity, muted) {
                inner.queue(ClassroomEvent::ParticipantUpdated(p.clone()));
            }
            if st.joined() { st.session_id() } else { None }
        };
        if let Some(session_id) = session_id {
            inner.publish(&Invocation::ToggleMute {
                session_id,
                identity: inner.local.identity.clone(),
                muted,
            });
        }
        inner.flush();
    }

    pub async fn set_camera_off(&self, off: bool) {
        let inner = &self.inner;
        let session_id = {
            let mut st = inner.state.lock().await;
            st.local_video_off = off;
            inner.media.mute_camera(off);
            if let Some(p) = st.participants.set_video_off(&inner.local.identity, off) {
                inner.queue(ClassroomEvent::ParticipantUpdated(p.clone()));
            }
            if st.joined() { st.session_id() } else { None }
        };
        if let Some(session_id) = session_id {
            inner.publish(&Invocation::ToggleVideo {
                session_id,
                identity: inner.local.identity.clone(),
                video_off: off,
            });
        }
        inner.flush();
    }

    pub async fn raise_hand(&self) -> Result<(), ClassroomError> {
        self.set_hand(true).await
    }

    pub async fn lower_hand(&self) -> Result<(), ClassroomError> {
        self.set_hand(false).await
    }

    async fn set_hand(&self, raised: bool) -> Result<(), ClassroomError> {
        let inner = &self.inner;
        {
            let mut st = inner.state.lock().await;
            if !st.joined() {
                return Err(ClassroomError::InvalidState(st.lifecycle));
            }
            let session_id = st.session_id().ok_or(ClassroomError::NoSession)?;
            let invocation = if raised {
                Invocation::RaiseHand { session_id }
            } else {
                Invocation::LowerHand { session_id }
            };
            inner.control.invoke(&invocation)?;
            if let Some(p) = st
                .participants
                .set_hand_raised(&inner.local.identity, raised, now_ms())
            {
                inner.queue(ClassroomEvent::ParticipantUpdated(p.clone()));
            }
        }
        inner.flush();
        Ok(())
    }

    /// Send a chat message to the room. Returns the message as appended to
    /// the local log.
    pub async fn send_chat_message(&self, text: &str) -> Result<ChatMessage, ClassroomError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ClassroomError::EmptyMessage);
        }
        let inner = &self.inner;
        let message = {
            let mut st = inner.state.lock().await;
            if !st.joined() {
                return Err(ClassroomError::InvalidState(st.lifecycle));
            }
            let session_id = st.session_id().ok_or(ClassroomError::NoSession)?;
            let message = ChatLog::compose(&inner.local, text);
            inner.control.invoke(&Invocation::SendMessage {
                session_id,
                message: message.clone(),
            })?;
            st.chat.push(message.clone());
            inner.queue(ClassroomEvent::ChatMessageReceived(message.clone()));
            message
        };
        inner.flush();
        Ok(message)
    }

    /// Replace the roster with the Room API's view.
    pub async fn refresh_participants(&self) -> Result<(), ClassroomError> {
        let inner = &self.inner;
        let (session_id, epoch) = {
            let st = inner.state.lock().await;
            if !st.lifecycle.in_room() {
                return Err(ClassroomError::InvalidState(st.lifecycle));
            }
            (
                st.session_id().ok_or(ClassroomError::NoSession)?,
                inner.current_epoch(),
            )
        };
        let roster = inner.api.get_participants(session_id).await?;
        {
            let mut st = inner.state.lock().await;
            inner.ensure_current(epoch)?;
            st.participants.replace_all(roster);
            let roster = st.participants.participants().to_vec();
            inner.queue(ClassroomEvent::RosterReplaced(roster));
        }
        inner.flush();
        Ok(())
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.event_loop.abort();
    }
}

impl Inner {
    fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.current_epoch() == epoch
    }

    fn ensure_current(&self, epoch: u64) -> Result<(), ClassroomError> {
        if self.is_current(epoch) {
            Ok(())
        } else {
            Err(ClassroomError::Cancelled)
        }
    }

    fn queue(&self, event: ClassroomEvent) {
        lock(&self.outbox).push_back(event);
    }

    fn flush(&self) {
        loop {
            if self.dispatching.swap(true, Ordering::SeqCst) {
                // another caller is draining and will pick ours up
                return;
            }
            loop {
                let next = lock(&self.outbox).pop_front();
                match next {
                    Some(event) => self.emitter.emit(event),
                    None => break,
                }
            }
            self.dispatching.store(false, Ordering::SeqCst);
            if lock(&self.outbox).is_empty() {
                return;
            }
        }
    }

    fn set_lifecycle(&self, st: &mut RoomState, next: LifecycleState) {
        if st.lifecycle == next {
            return;
        }
        tracing::info!("lifecycle {:?} -> {:?}", st.lifecycle, next);
        st.lifecycle = next;
        self.queue(ClassroomEvent::LifecycleChanged(next));
    }

    fn set_media_state(&self, st: &mut RoomState, state: ConnectionState) {
        if st.media_state == state {
            return;
        }
        st.media_state = state.clone();
        self.queue(ClassroomEvent::ConnectionStateChanged {
            channel: ChannelKind::Media,
            state,
        });
    }

    fn publish(&self, invocation: &Invocation) {
        if let Err(e) = self.control.invoke(invocation) {
            tracing::warn!("{} not published: {e}", invocation.name());
        }
    }

    async fn moderation_target(&self, action: &'static str) -> Result<(i64, u64), ClassroomError> {
        if !self.local.role.can_moderate() {
            return Err(ClassroomError::NotPermitted(action));
        }
        let st = self.state.lock().await;
        if !st.joined() {
            return Err(ClassroomError::InvalidState(st.lifecycle));
        }
        Ok((
            st.session_id().ok_or(ClassroomError::NoSession)?,
            self.current_epoch(),
        ))
    }

    /// Mark the local user admitted. The caller runs [`Self::complete_join`]
    /// with the returned epoch once the lock is released.
    fn enter_joined(&self, st: &mut RoomState) -> u64 {
        st.approved_early = false;
        st.join_in_flight = false;
        self.set_lifecycle(st, LifecycleState::Joined);
        self.current_epoch()
    }

    /// Put the local user on the roster: the record from the join response
    /// when there is one, else one built from the local identity.
    fn upsert_local(&self, st: &mut RoomState, reported: Option<Participant>, approval: ApprovalStatus) {
        let mut participant = reported
            .filter(|p| p.identity == self.local.identity)
            .unwrap_or_else(|| self.local.as_participant(approval))
            .with_approval(approval);
        participant.is_muted = st.local_muted;
        participant.is_video_off = st.local_video_off;
        let added = st.participants.upsert(participant);
        if let Some(p) = st.participants.participant(&self.local.identity) {
            self.queue(if added {
                ClassroomEvent::ParticipantJoined(p.clone())
            } else {
                ClassroomEvent::ParticipantUpdated(p.clone())
            });
        }
    }

    /// Roster entry plus `Joined`. Returns the epoch for [`Self::complete_join`].
    fn admit_local(&self, st: &mut RoomState, reported: Option<Participant>) -> u64 {
        self.upsert_local(st, reported, ApprovalStatus::Approved);
        self.enter_joined(st)
    }

    fn reject_join(&self, st: &mut RoomState, state: LifecycleState) {
        st.approved_early = false;
        if st.participants.remove_participant(&self.local.identity).is_some() {
            self.queue(ClassroomEvent::ParticipantLeft(self.local.identity.clone()));
        }
        self.set_lifecycle(st, state);
    }

    /// Open the live-room hub and bring up media. Media runs at most once
    /// per membership; a control failure never blocks it.
    async fn complete_join(&self, epoch: u64) {
        let plan = {
            let mut st = self.state.lock().await;
            if !self.is_current(epoch) || !st.joined() {
                return;
            }
            let Some(session) = st.session.clone() else {
                return;
            };
            let start_media = !st.media_started;
            if start_media {
                st.media_started = true;
                self.set_lifecycle(&mut st, LifecycleState::MediaConnecting);
                self.set_media_state(&mut st, ConnectionState::Connecting);
            }
            (session, start_media)
        };
        self.flush();

        let (session, start_media) = plan;
        self.control.join_room(session.id);
        self.control.start();
        if start_media {
            self.connect_media(epoch, &session.channel_id).await;
        }
    }

    async fn connect_media(&self, epoch: u64, channel_id: &str) {
        let result = self.bring_up_media(epoch, channel_id).await;
        {
            let mut st = self.state.lock().await;
            if !self.is_current(epoch) {
                return;
            }
            match &result {
                Ok(()) => {
                    if st.lifecycle == LifecycleState::MediaConnecting {
                        self.set_lifecycle(&mut st, LifecycleState::MediaConnected);
                    }
                    self.set_media_state(&mut st, ConnectionState::Connected);
                }
                Err(e) => {
                    tracing::warn!("media failed, staying joined without media: {e}");
                    st.remote_peers.clear();
                    if st.lifecycle == LifecycleState::MediaConnecting {
                        self.set_lifecycle(&mut st, LifecycleState::Joined);
                    }
                    self.set_media_state(&mut st, ConnectionState::Disconnected);
                    let (code, message) = match e {
                        ClassroomError::Media(m) => (m.code(), m.to_string()),
                        other => (0, other.to_string()),
                    };
                    self.queue(ClassroomEvent::MediaError { code, message });
                }
            }
        }
        if result.is_err() {
            self.media.teardown().await;
        }
        self.flush();
    }

    async fn bring_up_media(&self, epoch: u64, channel_id: &str) -> Result<(), ClassroomError> {
        let credential = self
            .api
            .get_media_credential(channel_id, &self.local.identity, self.local.role)
            .await?;
        self.ensure_current(epoch)?;
        self.media.initialize(credential).await?;
        self.ensure_current(epoch)?;
        self.media.join(self.local.role).await?;
        Ok(())
    }

    /// Converge on `Ended`: bump the epoch, drop membership state, stop both
    /// channels. Returns `false` if there was nothing to end.
    async fn terminate(&self, reason: EndReason) -> bool {
        {
            let mut st = self.state.lock().await;
            if !st.lifecycle.in_room() {
                return false;
            }
            self.epoch.fetch_add(1, Ordering::SeqCst);
            if reason == EndReason::SessionEnded {
                if let Some(session) = st.session.as_mut() {
                    session.mark_ended(chrono::Utc::now());
                }
            }
            st.reset_membership();
            self.set_lifecycle(&mut st, LifecycleState::Ended);
            tracing::info!("session terminated: {reason:?}");
            self.queue(ClassroomEvent::SessionTerminated(reason));
        }
        self.control.stop();
        self.media.teardown().await;
        self.flush();
        true
    }

    async fn run_events(
        self: Arc<Self>,
        mut control_rx: mpsc::UnboundedReceiver<ChannelEvent>,
        media_rx: Option<mpsc::UnboundedReceiver<MediaEvent>>,
    ) {
        let mut media_rx = match media_rx {
            Some(rx) => rx,
            None => {
                tracing::warn!("media events already taken by another consumer");
                mpsc::unbounded_channel().1
            }
        };
        loop {
            tokio::select! {
                Some(event) = control_rx.recv() => self.on_control(event).await,
                Some(event) = media_rx.recv() => self.on_media(event).await,
                else => break,
            }
        }
        tracing::debug!("controller event loop ended");
    }

    async fn on_control(self: &Arc<Self>, event: ChannelEvent) {
        match event {
            ChannelEvent::State(state) => {
                let mut st = self.state.lock().await;
                st.control_state = state.clone();
                self.queue(ClassroomEvent::ConnectionStateChanged {
                    channel: self.control.kind(),
                    state,
                });
            }
            ChannelEvent::Event(event) => self.on_control_event(event).await,
        }
        self.flush();
    }

    async fn on_control_event(self: &Arc<Self>, event: ControlEvent) {
        let mut st = self.state.lock().await;
        if !st.lifecycle.in_room() {
            tracing::debug!("control event outside a room dropped: {event:?}");
            return;
        }
        let local = self.local.identity.as_str();

        match event {
            ControlEvent::RosterSnapshot { participants } => {
                st.participants.replace_all(participants);
                let roster = st.participants.participants().to_vec();
                tracing::debug!("roster snapshot: {} participants", roster.len());
                self.queue(ClassroomEvent::RosterReplaced(roster));
            }
            ControlEvent::ParticipantJoined { participant } => {
                let identity = participant.identity.clone();
                let added = st.participants.upsert(participant);
                if let Some(p) = st.participants.participant(&identity) {
                    self.queue(if added {
                        ClassroomEvent::ParticipantJoined(p.clone())
                    } else {
                        ClassroomEvent::ParticipantUpdated(p.clone())
                    });
                }
            }
            ControlEvent::ParticipantLeft { identity } => {
                if st.participants.remove_participant(&identity).is_some() {
                    self.queue(ClassroomEvent::ParticipantLeft(identity));
                }
            }
            ControlEvent::ParticipantApproved { identity } => {
                if let Some(p) = st.participants.set_approval(&identity, ApprovalStatus::Approved) {
                    self.queue(ClassroomEvent::ParticipantUpdated(p.clone()));
                }
                if identity != local {
                    return;
                }
                if st.join_in_flight {
                    tracing::info!("approved while the join request is in flight");
                    st.approved_early = true;
                } else if st.lifecycle == LifecycleState::PendingApproval {
                    let epoch = self.enter_joined(&mut st);
                    drop(st);
                    let inner = self.clone();
                    tokio::spawn(async move { inner.complete_join(epoch).await });
                }
            }
            ControlEvent::ParticipantRemoved { identity } => {
                if identity == local {
                    drop(st);
                    self.terminate(EndReason::Removed).await;
                } else if st.participants.remove_participant(&identity).is_some() {
                    self.queue(ClassroomEvent::ParticipantLeft(identity));
                }
            }
            ControlEvent::SessionEnded { session_id } => {
                if session_id.is_some() && session_id != st.session_id() {
                    tracing::debug!("sessionEnded for another session ignored: {session_id:?}");
                    return;
                }
                drop(st);
                self.terminate(EndReason::SessionEnded).await;
            }
            ControlEvent::HandRaised { identity, raised_at } => {
                let at = raised_at.unwrap_or_else(now_ms);
                if let Some(p) = st.participants.set_hand_raised(&identity, true, at) {
                    self.queue(ClassroomEvent::ParticipantUpdated(p.clone()));
                }
            }
            ControlEvent::HandLowered { identity } => {
                if let Some(p) = st.participants.set_hand_raised(&identity, false, 0) {
                    self.queue(ClassroomEvent::ParticipantUpdated(p.clone()));
                }
            }
            ControlEvent::MuteToggled { identity, muted } => {
                if identity == local && st.local_muted != muted {
                    // a moderator muted us
                    st.local_muted = muted;
                    self.media.mute_mic(muted);
                }
                if let Some(p) = st.participants.set_muted(&identity, muted) {
                    self.queue(ClassroomEvent::ParticipantUpdated(p.clone()));
                }
            }
            ControlEvent::VideoToggled { identity, video_off } => {
                if let Some(p) = st.participants.set_video_off(&identity, video_off) {
                    self.queue(ClassroomEvent::ParticipantUpdated(p.clone()));
                }
            }
            ControlEvent::ChatMessage { message } => {
                if st.chat.push(message.clone()) {
                    self.queue(ClassroomEvent::ChatMessageReceived(message));
                }
            }
        }
    }

    async fn on_media(&self, event: MediaEvent) {
        {
            let mut st = self.state.lock().await;
            if !st.joined() {
                tracing::debug!("media event outside a membership dropped: {event:?}");
                return;
            }
            match event {
                MediaEvent::Joined { uid } => {
                    tracing::info!("media joined as uid {uid}");
                    self.set_media_state(&mut st, ConnectionState::Connected);
                }
                MediaEvent::PeerJoined(uid) => {
                    if st.remote_peers.insert(uid) {
                        self.queue(ClassroomEvent::RemotePeerJoined(uid));
                    }
                }
                MediaEvent::PeerLeft(uid) => {
                    if st.remote_peers.remove(&uid) {
                        self.queue(ClassroomEvent::RemotePeerLeft(uid));
                    }
                }
                MediaEvent::Error { code, message } => {
                    tracing::warn!("media engine error {code}: {message}");
                    self.queue(ClassroomEvent::MediaError { code, message });
                }
            }
        }
        self.flush();
    }
}
