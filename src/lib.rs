//! Real-time call core for the consultation portal.
//!
//! A [`SignalingChannel`] relays call-control messages, the [`peer`] module
//! negotiates media with the `webrtc` crate, and the [`CallController`] ties
//! both to the portal's call registry.

pub mod config;
pub mod controller;
pub mod error;
pub mod logger;
pub mod peer;
pub mod registry;
pub mod session;
pub mod signaling;
pub mod subscription;
pub mod utils;

#[cfg(test)]
mod testing;

pub use config::{CallConfig, ConfigError};
pub use controller::{
    CallController, CallEvent, CallHandle, CallState, ControllerConfig, EndReason,
};
pub use error::{CallError, CallErrorKind};
pub use peer::{MediaPermission, PeerConnectionManager, RtcBackend};
pub use registry::{CallRegistry, HttpRegistry};
pub use session::{CallSession, Party, PartyId, Role};
pub use signaling::{SignalingChannel, SignalingError, SignalingMessage};
