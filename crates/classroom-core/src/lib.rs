//! Classroom live-session core.
//!
//! Pure Rust crate with no platform dependencies. Consumed by native UI
//! shells via UniFFI bindings (see `classroom-ffi`).
//!
//! - [`api`]: Room API client (REST).
//! - [`control`]: persistent hub connections for presence and moderation.
//! - [`media`]: lifecycle guard around the platform audio/video engine.
//! - [`controller`]: the session lifecycle state machine tying them together.

pub mod api;
pub mod chat;
pub mod config;
pub mod control;
pub mod controller;
pub mod errors;
pub mod events;
pub mod media;
pub mod models;
pub mod participants;
pub mod state;

#[cfg(test)]
mod testing;

pub use api::{ApiError, HttpRoomApi, RoomApi};
pub use config::{ClientConfig, ConfigStore};
pub use control::{
    ControlChannel, ControlError, HubConnections, HubTransport, ReconnectPolicy, WsHubTransport,
};
pub use controller::SessionController;
pub use errors::ClassroomError;
pub use events::{ClassroomEvent, ClassroomEventListener};
pub use media::{MediaChannel, MediaEngine, MediaError, MediaEvent, MediaEventSink};
pub use models::{LocalIdentity, Participant, Role, Session};
pub use state::{LifecycleState, RoomSnapshot};
