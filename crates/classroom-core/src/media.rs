use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::models::{MediaCredential, Role};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MediaError {
    #[error("media engine is not initialized")]
    NotInitialized,
    #[error("media channel already joined")]
    AlreadyJoined,
    #[error("camera or microphone permission denied")]
    PermissionDenied,
    #[error("media channel torn down during join")]
    Cancelled,
    #[error("media engine error {code}: {message}")]
    Engine { code: i32, message: String },
}

impl MediaError {
    /// Numeric code reported to listeners. Engine codes pass through;
    /// channel-level failures use small negative values.
    pub fn code(&self) -> i32 {
        match self {
            MediaError::NotInitialized => -1,
            MediaError::AlreadyJoined => -2,
            MediaError::PermissionDenied => -3,
            MediaError::Cancelled => -4,
            MediaError::Engine { code, .. } => *code,
        }
    }
}

/// Callbacks from the media engine.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    Joined { uid: u32 },
    PeerJoined(u32),
    PeerLeft(u32),
    Error { code: i32, message: String },
}

/// Handle the engine uses to report callbacks.
///
/// Bound to the channel generation current at initialization; events
/// emitted after teardown are dropped.
#[derive(Clone)]
pub struct MediaEventSink {
    tx: mpsc::UnboundedSender<MediaEvent>,
    generation: Arc<AtomicU64>,
    captured: u64,
}

impl MediaEventSink {
    pub fn emit(&self, event: MediaEvent) {
        if !self.is_live() {
            tracing::debug!("media event after teardown dropped: {event:?}");
            return;
        }
        let _ = self.tx.send(event);
    }

    pub fn is_live(&self) -> bool {
        self.generation.load(Ordering::SeqCst) == self.captured
    }
}

/// The audio/video engine the channel drives. Implemented natively on each
/// platform.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    async fn initialize(&self, credential: &MediaCredential, sink: MediaEventSink) -> Result<(), MediaError>;
    /// Join and publish local microphone and camera.
    async fn join_as_host(&self, token: &str, channel_id: &str, uid: u32) -> Result<(), MediaError>;
    /// Join receive-only.
    async fn join_as_audience(&self, token: &str, channel_id: &str, uid: u32) -> Result<(), MediaError>;
    async fn leave(&self) -> Result<(), MediaError>;
    async fn dispose(&self) -> Result<(), MediaError>;
    fn mute_mic(&self, muted: bool);
    fn mute_camera(&self, off: bool);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Initialized,
    Joining,
    Joined,
}

/// Lifecycle guard around a [`MediaEngine`]: initialize before join, one
/// join at a time, and a teardown that never fails.
pub struct MediaChannel {
    engine: Arc<dyn MediaEngine>,
    phase: Mutex<Phase>,
    credential: Mutex<Option<MediaCredential>>,
    generation: Arc<AtomicU64>,
    events_tx: mpsc::UnboundedSender<MediaEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<MediaEvent>>>,
    mic_muted: AtomicBool,
    camera_off: AtomicBool,
}

impl MediaChannel {
    pub fn new(engine: Arc<dyn MediaEngine>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            engine,
            phase: Mutex::new(Phase::Idle),
            credential: Mutex::new(None),
            generation: Arc::new(AtomicU64::new(0)),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            mic_muted: AtomicBool::new(false),
            camera_off: AtomicBool::new(false),
        }
    }

    /// Take the engine callback stream. Only the first call gets it.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<MediaEvent>> {
        lock(&self.events_rx).take()
    }

    pub fn is_joined(&self) -> bool {
        *lock(&self.phase) == Phase::Joined
    }

    pub fn is_mic_muted(&self) -> bool {
        self.mic_muted.load(Ordering::SeqCst)
    }

    pub fn is_camera_off(&self) -> bool {
        self.camera_off.load(Ordering::SeqCst)
    }

    pub async fn initialize(&self, credential: MediaCredential) -> Result<(), MediaError> {
        if *lock(&self.phase) != Phase::Idle {
            tracing::debug!("media engine already initialized");
            return Ok(());
        }
        let generation = self.generation.load(Ordering::SeqCst);
        let sink = MediaEventSink {
            tx: self.events_tx.clone(),
            generation: self.generation.clone(),
            captured: generation,
        };
        self.engine.initialize(&credential, sink).await?;
        if self.generation.load(Ordering::SeqCst) != generation {
            if let Err(e) = self.engine.dispose().await {
                tracing::warn!("media dispose after cancelled init failed: {e}");
            }
            return Err(MediaError::Cancelled);
        }
        *lock(&self.credential) = Some(credential);
        *lock(&self.phase) = Phase::Initialized;
        tracing::info!("media engine initialized");
        Ok(())
    }

    /// Join with the stored credential. Publishers go through `join_as_host`.
    pub async fn join(&self, role: Role) -> Result<(), MediaError> {
        let credential = {
            let mut phase = lock(&self.phase);
            match *phase {
                Phase::Idle => return Err(MediaError::NotInitialized),
                Phase::Joining | Phase::Joined => return Err(MediaError::AlreadyJoined),
                Phase::Initialized => {}
            }
            let credential = lock(&self.credential)
                .clone()
                .ok_or(MediaError::NotInitialized)?;
            *phase = Phase::Joining;
            credential
        };
        let generation = self.generation.load(Ordering::SeqCst);

        let result = if role.publishes_media() {
            self.engine
                .join_as_host(&credential.token, &credential.channel_id, credential.uid)
                .await
        } else {
            self.engine
                .join_as_audience(&credential.token, &credential.channel_id, credential.uid)
                .await
        };

        if self.generation.load(Ordering::SeqCst) != generation {
            // torn down while joining; undo whatever the engine did
            if result.is_ok() {
                self.quiet_teardown_engine().await;
            }
            return Err(MediaError::Cancelled);
        }

        match result {
            Ok(()) => {
                *lock(&self.phase) = Phase::Joined;
                // apply mute choices made before the join completed
                self.engine.mute_mic(self.is_mic_muted());
                self.engine.mute_camera(self.is_camera_off());
                tracing::info!(
                    "media joined channel {} as {}",
                    credential.channel_id,
                    role.as_str()
                );
                Ok(())
            }
            Err(e) => {
                *lock(&self.phase) = Phase::Initialized;
                Err(e)
            }
        }
    }

    /// Local-only mute. Applied immediately when joined, otherwise on join.
    pub fn mute_mic(&self, muted: bool) {
        self.mic_muted.store(muted, Ordering::SeqCst);
        if self.is_joined() {
            self.engine.mute_mic(muted);
        }
    }

    pub fn mute_camera(&self, off: bool) {
        self.camera_off.store(off, Ordering::SeqCst);
        if self.is_joined() {
            self.engine.mute_camera(off);
        }
    }

    /// `leave()` + `dispose()`. Safe in any phase and safe to repeat;
    /// engine failures are logged.
    pub async fn teardown(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let previous = std::mem::replace(&mut *lock(&self.phase), Phase::Idle);
        *lock(&self.credential) = None;

        if matches!(previous, Phase::Joining | Phase::Joined) {
            if let Err(e) = self.engine.leave().await {
                tracing::warn!("media leave failed: {e}");
            }
        }
        if previous != Phase::Idle {
            if let Err(e) = self.engine.dispose().await {
                tracing::warn!("media dispose failed: {e}");
            }
            tracing::info!("media channel torn down");
        }
    }

    async fn quiet_teardown_engine(&self) {
        if let Err(e) = self.engine.leave().await {
            tracing::warn!("media leave after cancelled join failed: {e}");
        }
        if let Err(e) = self.engine.dispose().await {
            tracing::warn!("media dispose after cancelled join failed: {e}");
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeMediaEngine, credential, recv_within};
    use std::time::Duration;

    #[tokio::test]
    async fn join_before_initialize_is_rejected() {
        let engine = FakeMediaEngine::new();
        let channel = MediaChannel::new(engine.clone());
        assert_eq!(channel.join(Role::Attendee).await, Err(MediaError::NotInitialized));
        assert_eq!(engine.call_count("join_as_audience"), 0);
    }

    #[tokio::test]
    async fn role_selects_join_variant() {
        let engine = FakeMediaEngine::new();
        let channel = MediaChannel::new(engine.clone());
        channel.initialize(credential(11)).await.unwrap();
        channel.join(Role::Host).await.unwrap();
        assert!(channel.is_joined());
        assert_eq!(engine.call_count("join_as_host"), 1);

        let engine = FakeMediaEngine::new();
        let channel = MediaChannel::new(engine.clone());
        channel.initialize(credential(12)).await.unwrap();
        channel.join(Role::Attendee).await.unwrap();
        assert_eq!(engine.call_count("join_as_audience"), 1);
        assert_eq!(engine.call_count("join_as_host"), 0);
    }

    #[tokio::test]
    async fn joining_twice_is_a_usage_error() {
        let engine = FakeMediaEngine::new();
        let channel = MediaChannel::new(engine.clone());
        channel.initialize(credential(1)).await.unwrap();
        channel.join(Role::Staff).await.unwrap();
        assert_eq!(channel.join(Role::Staff).await, Err(MediaError::AlreadyJoined));
        assert_eq!(engine.call_count("join_as_host"), 1);
    }

    #[tokio::test]
    async fn failed_join_can_be_retried() {
        let engine = FakeMediaEngine::new();
        engine.fail_join(MediaError::PermissionDenied);
        let channel = MediaChannel::new(engine.clone());
        channel.initialize(credential(1)).await.unwrap();
        assert_eq!(channel.join(Role::Host).await, Err(MediaError::PermissionDenied));
        assert!(!channel.is_joined());

        engine.clear_failures();
        channel.join(Role::Host).await.unwrap();
        assert!(channel.is_joined());
    }

    #[tokio::test]
    async fn teardown_without_join_is_safe_and_idempotent() {
        let engine = FakeMediaEngine::new();
        let channel = MediaChannel::new(engine.clone());
        channel.teardown().await;
        assert_eq!(engine.call_count("dispose"), 0);

        channel.initialize(credential(1)).await.unwrap();
        channel.teardown().await;
        channel.teardown().await;
        assert_eq!(engine.call_count("leave"), 0);
        assert_eq!(engine.call_count("dispose"), 1);
    }

    #[tokio::test]
    async fn teardown_swallows_engine_failures() {
        let engine = FakeMediaEngine::new();
        let channel = MediaChannel::new(engine.clone());
        channel.initialize(credential(1)).await.unwrap();
        channel.join(Role::Host).await.unwrap();
        engine.fail_leave(MediaError::Engine {
            code: -7,
            message: "boom".to_string(),
        });
        channel.teardown().await;
        assert_eq!(engine.call_count("leave"), 1);
        assert_eq!(engine.call_count("dispose"), 1);
        assert!(!channel.is_joined());
    }

    #[tokio::test]
    async fn mute_before_join_is_applied_on_join() {
        let engine = FakeMediaEngine::new();
        let channel = MediaChannel::new(engine.clone());
        channel.initialize(credential(1)).await.unwrap();
        channel.mute_mic(true);
        assert_eq!(engine.call_count("mute_mic"), 0);
        channel.join(Role::Host).await.unwrap();
        assert_eq!(engine.mic_muted(), Some(true));

        channel.mute_camera(true);
        assert_eq!(engine.camera_off(), Some(true));
    }

    #[tokio::test]
    async fn events_after_teardown_are_dropped() {
        let engine = FakeMediaEngine::new();
        let channel = MediaChannel::new(engine.clone());
        let mut events = channel.take_events().unwrap();
        assert!(channel.take_events().is_none());

        channel.initialize(credential(1)).await.unwrap();
        engine.emit(MediaEvent::PeerJoined(5));
        assert_eq!(recv_within(&mut events).await, Some(MediaEvent::PeerJoined(5)));

        channel.teardown().await;
        engine.emit(MediaEvent::PeerJoined(6));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn teardown_during_join_cancels_it() {
        let engine = FakeMediaEngine::new();
        engine.set_join_delay(Duration::from_millis(100));
        let channel = Arc::new(MediaChannel::new(engine.clone()));
        channel.initialize(credential(1)).await.unwrap();

        let joining = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.join(Role::Host).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        channel.teardown().await;

        assert_eq!(joining.await.unwrap(), Err(MediaError::Cancelled));
        assert!(!channel.is_joined());
        // the late join was undone
        assert_eq!(engine.call_count("leave"), 2);
    }
}
