use crate::peer::PeerError;
use crate::registry::RegistryError;
use crate::signaling::SignalingError;
use serde::Serialize;
use thiserror::Error;

/// Errors surfaced by the call controller to its callers and the UI.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CallError {
    #[error("signaling credential missing or rejected")]
    Auth,
    #[error("camera/microphone access denied")]
    MediaAccessDenied,
    #[error("signaling channel unavailable")]
    SignalingUnavailable,
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("a call is already in progress")]
    Busy,
    #[error("no incoming call to answer")]
    NoIncomingCall,
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Peer(PeerError),
    #[error("call controller stopped")]
    ControllerStopped,
}

/// Coarse classification for UI display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallErrorKind {
    Auth,
    MediaAccessDenied,
    SignalingUnavailable,
    ProtocolViolation,
    Busy,
    NoIncomingCall,
    Registry,
    Peer,
    ControllerStopped,
}

impl CallError {
    pub fn kind(&self) -> CallErrorKind {
        match self {
            CallError::Auth => CallErrorKind::Auth,
            CallError::MediaAccessDenied => CallErrorKind::MediaAccessDenied,
            CallError::SignalingUnavailable => CallErrorKind::SignalingUnavailable,
            CallError::ProtocolViolation(_) => CallErrorKind::ProtocolViolation,
            CallError::Busy => CallErrorKind::Busy,
            CallError::NoIncomingCall => CallErrorKind::NoIncomingCall,
            CallError::Registry(_) => CallErrorKind::Registry,
            CallError::Peer(_) => CallErrorKind::Peer,
            CallError::ControllerStopped => CallErrorKind::ControllerStopped,
        }
    }
}

impl From<PeerError> for CallError {
    fn from(err: PeerError) -> Self {
        match err {
            PeerError::MediaAccessDenied => CallError::MediaAccessDenied,
            PeerError::ProtocolViolation(msg) => CallError::ProtocolViolation(msg),
            other => CallError::Peer(other),
        }
    }
}

impl From<SignalingError> for CallError {
    fn from(err: SignalingError) -> Self {
        match err {
            SignalingError::Auth => CallError::Auth,
            _ => CallError::SignalingUnavailable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_errors_map_to_call_errors() {
        assert_eq!(
            CallError::from(PeerError::MediaAccessDenied),
            CallError::MediaAccessDenied
        );
        assert_eq!(
            CallError::from(PeerError::Terminated).kind(),
            CallErrorKind::Peer
        );
    }

    #[test]
    fn not_ready_is_signaling_unavailable() {
        assert_eq!(
            CallError::from(SignalingError::ChannelNotReady),
            CallError::SignalingUnavailable
        );
        assert_eq!(CallError::from(SignalingError::Auth), CallError::Auth);
    }
}
