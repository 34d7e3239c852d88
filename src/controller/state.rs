use serde::Serialize;
use std::fmt;

/// Where the local party is in the life of a call.
///
/// Outbound: `Idle → Originating → RingingOut → Connecting → Active`.
/// Inbound: `Idle → RingingIn → Connecting → Active`. Any non-idle state
/// can pass through `Ending` back to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallState {
    Idle,
    Originating,
    RingingOut,
    RingingIn,
    Connecting,
    Active,
    Ending,
}

impl CallState {
    pub fn is_idle(self) -> bool {
        self == CallState::Idle
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CallState::Idle => "idle",
            CallState::Originating => "originating",
            CallState::RingingOut => "ringing-out",
            CallState::RingingIn => "ringing-in",
            CallState::Connecting => "connecting",
            CallState::Active => "active",
            CallState::Ending => "ending",
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
