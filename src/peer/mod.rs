pub mod connection;
pub mod ice;
pub mod manager;
pub mod media;
pub mod state;
pub mod types;

use thiserror::Error;

pub use connection::{MediaPermission, RtcBackend, TrackWriter};
pub use manager::{NegotiationHandle, PeerConnectionManager};
pub use media::{
    DeviceLedger, LocalMediaStream, LocalTrack, MediaBackend, MediaError, Negotiator, PeerEvent,
    PeerEventSink, RemoteMediaStream, RemoteTrack,
};
pub use state::{NegotiationState, DEFAULT_GATHERING_TIMEOUT};
pub use types::{
    IceServerKind, MediaConstraints, SdpKind, ServerConfig, SessionDescription, TrackKind,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PeerError {
    #[error("media access denied")]
    MediaAccessDenied,
    #[error("media error: {0}")]
    Media(MediaError),
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("negotiation failed: {0}")]
    Negotiation(String),
    #[error("negotiation already terminated")]
    Terminated,
}

impl From<MediaError> for PeerError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::PermissionDenied => PeerError::MediaAccessDenied,
            other => PeerError::Media(other),
        }
    }
}

impl From<webrtc::Error> for PeerError {
    fn from(err: webrtc::Error) -> Self {
        PeerError::Negotiation(err.to_string())
    }
}
