pub mod channel;
pub mod message;

use thiserror::Error;

pub use channel::{ChannelSender, ChannelState, CloseReason, SignalingChannel};
pub use message::{CallStatusValue, RejectReason, SignalingMessage};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignalingError {
    #[error("signaling credential missing or rejected")]
    Auth,
    #[error("signaling channel is not open")]
    ChannelNotReady,
    #[error("invalid signaling endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("signaling connect failed: {0}")]
    Connect(String),
    #[error("failed to encode signaling message: {0}")]
    Encode(String),
}

/// Outbound half of a signaling channel as the call controller sees it.
pub trait SignalSender: Send + Sync {
    /// Queues `message` for delivery. Fails with
    /// [`SignalingError::ChannelNotReady`] instead of dropping it silently.
    fn send(&self, message: &SignalingMessage) -> Result<(), SignalingError>;
}
