use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Directory identifier of a party. The portal uses numeric ids; they travel
/// as strings on the signaling wire, but numbers are accepted on input.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct PartyId(String);

impl<'de> Deserialize<'de> for PartyId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(i64),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(s) => PartyId(s),
            Raw::Number(n) => PartyId(n.to_string()),
        })
    }
}

impl PartyId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PartyId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for PartyId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for PartyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Patient,
    Doctor,
    Manager,
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "patient" => Ok(Role::Patient),
            "doctor" => Ok(Role::Doctor),
            "manager" => Ok(Role::Manager),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

/// A participant as known to the directory. Immutable for the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    pub id: PartyId,
    pub role: Role,
    pub display_name: String,
}

impl Party {
    pub fn new(id: impl Into<PartyId>, role: Role, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role,
            display_name: display_name.into(),
        }
    }
}

/// Registry view of a call's connectivity, refreshed by reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionConnection {
    Pending,
    Connected,
    Disconnected,
}

/// The call record shared by both parties. `id` correlates every signaling
/// message that belongs to this call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSession {
    pub id: String,
    pub caller: PartyId,
    pub callee: PartyId,
    pub created_at: DateTime<Utc>,
    pub connection_state: SessionConnection,
}

impl CallSession {
    pub fn new(id: impl Into<String>, caller: PartyId, callee: PartyId) -> Self {
        Self {
            id: id.into(),
            caller,
            callee,
            created_at: Utc::now(),
            connection_state: SessionConnection::Pending,
        }
    }
}
