use super::CallState;
use crate::error::{CallError, CallErrorKind};
use crate::peer::{PeerEvent, TrackKind};
use crate::session::{Party, PartyId};
use crate::signaling::{CloseReason, RejectReason, SignalingMessage};
use serde::Serialize;
use tokio::sync::oneshot;

pub type Reply<T> = oneshot::Sender<Result<T, CallError>>;

/// Why a call left the non-idle states.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "kind", content = "detail")]
pub enum EndReason {
    LocalHangUp,
    RemoteHangUp,
    Rejected(RejectReason),
    /// The registry reported the session as no longer connected.
    Disconnected,
    SignalingLost,
    Failed(String),
}

/// Notifications for the UI.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "kebab-case", tag = "event")]
pub enum CallEvent {
    StateChanged {
        from: CallState,
        to: CallState,
    },
    IncomingCall {
        session_id: String,
        from: PartyId,
    },
    RemoteStreamReady {
        session_id: String,
        kinds: Vec<TrackKind>,
    },
    CallFailed {
        kind: CallErrorKind,
        message: String,
    },
    CallEnded {
        session_id: String,
        reason: EndReason,
    },
    SignalingLost {
        reason: String,
    },
}

impl CallEvent {
    pub fn failed(err: &CallError) -> Self {
        CallEvent::CallFailed {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// User intents, each with a reply channel.
#[derive(Debug)]
pub enum CallCommand {
    PlaceCall { callee: Party, reply: Reply<String> },
    Accept { reply: Reply<()> },
    Reject { reply: Reply<()> },
    HangUp { reply: Reply<()> },
    ToggleTrack { kind: TrackKind, reply: Reply<bool> },
    State { reply: oneshot::Sender<CallState> },
    Shutdown,
}

/// Everything the controller's single inbox carries.
#[derive(Debug)]
pub enum ControllerEvent {
    Command(CallCommand),
    Signal(SignalingMessage),
    ChannelClosed(CloseReason),
    Peer { session_id: String, event: PeerEvent },
}
