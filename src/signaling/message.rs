use crate::peer::SessionDescription;
use crate::session::PartyId;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RejectReason {
    #[default]
    Declined,
    Busy,
    Unavailable,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RejectReason::Declined => "declined",
            RejectReason::Busy => "busy",
            RejectReason::Unavailable => "unavailable",
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CallStatusValue {
    Active,
    Ended,
}

/// Call-control message relayed between two parties.
///
/// Every variant carries the call session id; a message for any other session
/// than the current one is discarded by the receiver.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum SignalingMessage {
    #[serde(rename = "call-offer", rename_all = "camelCase")]
    CallOffer {
        call_session_id: String,
        from_party: PartyId,
        to_party: PartyId,
        payload: SessionDescription,
    },
    #[serde(rename = "call-answer", rename_all = "camelCase")]
    CallAnswer {
        call_session_id: String,
        from_party: PartyId,
        to_party: PartyId,
        payload: SessionDescription,
    },
    #[serde(rename = "call-rejected", rename_all = "camelCase")]
    CallRejected {
        call_session_id: String,
        from_party: PartyId,
        to_party: PartyId,
        #[serde(default)]
        payload: RejectReason,
    },
    #[serde(rename = "call-status", rename_all = "camelCase")]
    CallStatus {
        call_session_id: String,
        from_party: PartyId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to_party: Option<PartyId>,
        payload: CallStatusValue,
    },
}

impl SignalingMessage {
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn session_id(&self) -> &str {
        match self {
            SignalingMessage::CallOffer {
                call_session_id, ..
            }
            | SignalingMessage::CallAnswer {
                call_session_id, ..
            }
            | SignalingMessage::CallRejected {
                call_session_id, ..
            }
            | SignalingMessage::CallStatus {
                call_session_id, ..
            } => call_session_id,
        }
    }

    pub fn from(&self) -> &PartyId {
        match self {
            SignalingMessage::CallOffer { from_party, .. }
            | SignalingMessage::CallAnswer { from_party, .. }
            | SignalingMessage::CallRejected { from_party, .. }
            | SignalingMessage::CallStatus { from_party, .. } => from_party,
        }
    }

    /// Addressee, absent only on status broadcasts.
    pub fn to(&self) -> Option<&PartyId> {
        match self {
            SignalingMessage::CallOffer { to_party, .. }
            | SignalingMessage::CallAnswer { to_party, .. }
            | SignalingMessage::CallRejected { to_party, .. } => Some(to_party),
            SignalingMessage::CallStatus { to_party, .. } => to_party.as_ref(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SignalingMessage::CallOffer { .. } => "call-offer",
            SignalingMessage::CallAnswer { .. } => "call-answer",
            SignalingMessage::CallRejected { .. } => "call-rejected",
            SignalingMessage::CallStatus { .. } => "call-status",
        }
    }
}
