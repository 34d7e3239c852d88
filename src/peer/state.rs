use serde::Serialize;
use std::fmt;

/// Lifecycle of one media negotiation.
///
/// `Closed` and `Failed` are terminal: a manager that reached either is never
/// reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NegotiationState {
    Idle,
    AwaitingLocalMedia,
    OfferSent,
    OfferReceived,
    AnswerSent,
    Connected,
    Closed,
    Failed,
}

impl NegotiationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, NegotiationState::Closed | NegotiationState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NegotiationState::Idle => "idle",
            NegotiationState::AwaitingLocalMedia => "awaiting-local-media",
            NegotiationState::OfferSent => "offer-sent",
            NegotiationState::OfferReceived => "offer-received",
            NegotiationState::AnswerSent => "answer-sent",
            NegotiationState::Connected => "connected",
            NegotiationState::Closed => "closed",
            NegotiationState::Failed => "failed",
        }
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Period to wait for ICE gathering before sending whatever was collected.
pub const DEFAULT_GATHERING_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);
