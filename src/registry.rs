//! Client of the server-side call record and user directory.

use crate::session::{CallSession, Party, PartyId, Role};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("registry request failed: {0}")]
    Http(String),
    #[error("registry returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unexpected registry response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for RegistryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            RegistryError::Decode(err.to_string())
        } else {
            RegistryError::Http(err.to_string())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct CallStatus {
    #[serde(rename = "isConnected", default)]
    pub is_connected: bool,
}

#[async_trait]
pub trait CallRegistry: Send + Sync {
    async fn create_call_session(
        &self,
        caller: &Party,
        callee: &Party,
    ) -> Result<CallSession, RegistryError>;

    /// Best effort; callers log failures and move on.
    async fn end_call_session(&self, session_id: &str) -> Result<(), RegistryError>;

    async fn check_call_status(&self, session_id: &str) -> Result<CallStatus, RegistryError>;

    async fn list_available_parties(&self) -> Result<Vec<Party>, RegistryError>;
}

/// The portal's REST backend.
pub struct HttpRegistry {
    client: reqwest::Client,
    base: Url,
    token: String,
}

impl HttpRegistry {
    pub fn new(api_url: &str, token: impl Into<String>) -> Result<Self, RegistryError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        let base = Url::parse(api_url)
            .map_err(|e| RegistryError::Http(format!("invalid api url '{api_url}': {e}")))?;
        if base.cannot_be_a_base() {
            return Err(RegistryError::Http(format!("invalid api url '{api_url}'")));
        }
        Ok(Self {
            client,
            base,
            token: token.into(),
        })
    }

    /// `{base}/{segments...}/`. Each segment is percent-encoded, so an id
    /// taken from a peer's message cannot reach another endpoint.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments).push("");
        }
        url
    }

    async fn checked(response: reqwest::Response) -> Result<reqwest::Response, RegistryError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(RegistryError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

/// Django ids are integers; send them as numbers when they look like one.
fn id_value(id: &PartyId) -> Value {
    id.as_str()
        .parse::<i64>()
        .map(Value::from)
        .unwrap_or_else(|_| Value::from(id.as_str()))
}

/// `{doctor_id, patient_id}` for a call between `caller` and `callee`.
fn start_body(caller: &Party, callee: &Party) -> Value {
    let doctor = if caller.role == Role::Doctor {
        caller
    } else {
        callee
    };
    let patient = if caller.role == Role::Patient {
        caller
    } else {
        callee
    };
    json!({
        "doctor_id": id_value(&doctor.id),
        "patient_id": id_value(&patient.id),
    })
}

#[derive(Deserialize)]
struct StartResponse {
    id: Value,
}

#[derive(Deserialize)]
struct UserRecord {
    id: PartyId,
    #[serde(default)]
    username: String,
    #[serde(default)]
    first_name: String,
    #[serde(default)]
    last_name: String,
    #[serde(default)]
    role: Option<String>,
}

impl UserRecord {
    fn into_party(self) -> Option<Party> {
        let role = match self.role.as_deref().map(str::parse::<Role>) {
            Some(Ok(role)) => role,
            _ => {
                debug!(id = %self.id, role = ?self.role, "skipping user without a call role");
                return None;
            }
        };
        let full = format!("{} {}", self.first_name.trim(), self.last_name.trim());
        let name = match full.trim() {
            "" => self.username,
            name => name.to_string(),
        };
        Some(Party::new(self.id, role, name))
    }
}

#[async_trait]
impl CallRegistry for HttpRegistry {
    async fn create_call_session(
        &self,
        caller: &Party,
        callee: &Party,
    ) -> Result<CallSession, RegistryError> {
        let response = self
            .client
            .post(self.url(&["call", "start"]))
            .bearer_auth(&self.token)
            .json(&start_body(caller, callee))
            .send()
            .await?;
        let created: StartResponse = Self::checked(response).await?.json().await?;
        let id = match created.id {
            Value::String(s) if !s.is_empty() => s,
            Value::Number(n) => n.to_string(),
            other => return Err(RegistryError::Decode(format!("bad session id {other}"))),
        };
        debug!(session = %id, "call session created");
        Ok(CallSession::new(id, caller.id.clone(), callee.id.clone()))
    }

    async fn end_call_session(&self, session_id: &str) -> Result<(), RegistryError> {
        let response = self
            .client
            .post(self.url(&["call", "end"]))
            .bearer_auth(&self.token)
            .json(&json!({ "session_id": id_value(&PartyId::from(session_id)) }))
            .send()
            .await?;
        Self::checked(response).await?;
        Ok(())
    }

    async fn check_call_status(&self, session_id: &str) -> Result<CallStatus, RegistryError> {
        let response = self
            .client
            .get(self.url(&["call", session_id, "status"]))
            .bearer_auth(&self.token)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(CallStatus {
                is_connected: false,
            });
        }
        Ok(Self::checked(response).await?.json().await?)
    }

    async fn list_available_parties(&self) -> Result<Vec<Party>, RegistryError> {
        let response = self
            .client
            .get(self.url(&["available-users"]))
            .bearer_auth(&self.token)
            .send()
            .await?;
        let users: Vec<UserRecord> = Self::checked(response).await?.json().await?;
        let total = users.len();
        let parties: Vec<Party> = users.into_iter().filter_map(UserRecord::into_party).collect();
        if parties.len() < total {
            warn!(skipped = total - parties.len(), "directory entries without a role");
        }
        Ok(parties)
    }
}
