//! Runtime configuration.
//!
//! Every field has a default so a partial JSON document or a handful of
//! `TELECALL_*` variables is enough. Debug builds log at debug level, release
//! builds only warnings (see [`LogLevel::build_default`]).

use crate::logger::{LogConfig, LogLevel};
use crate::peer::ice::{default_ice_servers, validate_ice_servers, IceConfigError};
use crate::peer::{MediaPermission, ServerConfig, DEFAULT_GATHERING_TIMEOUT};
use crate::session::{Party, Role};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_SIGNALING_URL: &str = "ws://127.0.0.1:8000/ws/video/";
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8000/api";
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
    #[error(transparent)]
    Ice(#[from] IceConfigError),
}

fn invalid(key: &'static str, reason: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: reason.to_string(),
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    /// Relay endpoint without the token query.
    pub signaling_url: String,
    /// REST base, e.g. `http://host/api`.
    pub api_url: String,
    pub token: String,
    pub party: Option<Party>,
    pub ice_servers: Vec<ServerConfig>,
    pub reconcile_interval_ms: u64,
    pub reconcile_miss_threshold: u32,
    pub gathering_timeout_ms: u64,
    pub media_permission: MediaPermission,
    pub auto_answer: bool,
    pub log: LogConfig,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            signaling_url: DEFAULT_SIGNALING_URL.into(),
            api_url: DEFAULT_API_URL.into(),
            token: String::new(),
            party: None,
            ice_servers: default_ice_servers(),
            reconcile_interval_ms: DEFAULT_RECONCILE_INTERVAL.as_millis() as u64,
            reconcile_miss_threshold: 1,
            gathering_timeout_ms: DEFAULT_GATHERING_TIMEOUT.as_millis() as u64,
            media_permission: MediaPermission::Granted,
            auto_answer: false,
            log: LogConfig::default(),
        }
    }
}

impl CallConfig {
    /// Loads `.env` if present, then reads `TELECALL_*` variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut cfg = CallConfig::default();

        if let Some(v) = get("TELECALL_SIGNALING_URL") {
            cfg.signaling_url = v;
        }
        if let Some(v) = get("TELECALL_API_URL") {
            cfg.api_url = v;
        }
        if let Some(v) = get("TELECALL_TOKEN") {
            cfg.token = v;
        }

        if let Some(id) = get("TELECALL_PARTY_ID") {
            let role = get("TELECALL_PARTY_ROLE")
                .ok_or(ConfigError::Missing("TELECALL_PARTY_ROLE"))?
                .parse::<Role>()
                .map_err(|e| invalid("TELECALL_PARTY_ROLE", e))?;
            let name = get("TELECALL_PARTY_NAME").unwrap_or_else(|| id.clone());
            cfg.party = Some(Party::new(id, role, name));
        }

        if let Some(raw) = get("TELECALL_ICE_SERVERS") {
            cfg.ice_servers =
                serde_json::from_str(&raw).map_err(|e| invalid("TELECALL_ICE_SERVERS", e))?;
        }
        if let Some(raw) = get("TELECALL_RECONCILE_MS") {
            cfg.reconcile_interval_ms = raw
                .trim()
                .parse()
                .map_err(|e| invalid("TELECALL_RECONCILE_MS", e))?;
        }
        if let Some(raw) = get("TELECALL_MEDIA_PERMISSION") {
            cfg.media_permission = match raw.trim().to_ascii_lowercase().as_str() {
                "granted" => MediaPermission::Granted,
                "denied" => MediaPermission::Denied,
                other => return Err(invalid("TELECALL_MEDIA_PERMISSION", other)),
            };
        }
        if let Some(raw) = get("TELECALL_AUTO_ANSWER") {
            cfg.auto_answer = matches!(raw.trim(), "1" | "true" | "yes");
        }
        if let Some(raw) = get("TELECALL_LOG_LEVEL") {
            cfg.log.level = raw
                .parse::<LogLevel>()
                .map_err(|e| invalid("TELECALL_LOG_LEVEL", e))?;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let ws = Url::parse(&self.signaling_url).map_err(|e| invalid("signaling_url", e))?;
        if !matches!(ws.scheme(), "ws" | "wss") {
            return Err(invalid("signaling_url", "scheme must be ws or wss"));
        }
        let api = Url::parse(&self.api_url).map_err(|e| invalid("api_url", e))?;
        if !matches!(api.scheme(), "http" | "https") {
            return Err(invalid("api_url", "scheme must be http or https"));
        }
        if self.party.is_none() {
            return Err(ConfigError::Missing("party"));
        }
        if self.reconcile_interval_ms == 0 {
            return Err(invalid("reconcile_interval_ms", "must be positive"));
        }
        if self.reconcile_miss_threshold == 0 {
            return Err(invalid("reconcile_miss_threshold", "must be at least 1"));
        }
        validate_ice_servers(&self.ice_servers)?;
        Ok(())
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile_interval_ms)
    }

    pub fn gathering_timeout(&self) -> Duration {
        Duration::from_millis(self.gathering_timeout_ms)
    }

    pub fn local_party(&self) -> Result<&Party, ConfigError> {
        self.party.as_ref().ok_or(ConfigError::Missing("party"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::IceServerKind;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn minimal_environment_gets_defaults() {
        let cfg = CallConfig::from_lookup(lookup(&[
            ("TELECALL_PARTY_ID", "7"),
            ("TELECALL_PARTY_ROLE", "doctor"),
        ]))
        .unwrap();
        let party = cfg.local_party().unwrap();
        assert_eq!(party.role, Role::Doctor);
        assert_eq!(party.display_name, "7");
        assert_eq!(cfg.reconcile_interval(), Duration::from_secs(2));
        assert_eq!(cfg.reconcile_miss_threshold, 1);
        assert_eq!(cfg.gathering_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.ice_servers.len(), 2);
    }

    #[test]
    fn party_is_required() {
        let err = CallConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("party")));
    }

    #[test]
    fn ice_servers_come_from_json() {
        let cfg = CallConfig::from_lookup(lookup(&[
            ("TELECALL_PARTY_ID", "7"),
            ("TELECALL_PARTY_ROLE", "patient"),
            (
                "TELECALL_ICE_SERVERS",
                r#"[{"id":"s","type":"stun","url":"stun.example.org:3478"}]"#,
            ),
        ]))
        .unwrap();
        assert_eq!(cfg.ice_servers.len(), 1);
        assert_eq!(cfg.ice_servers[0].kind, IceServerKind::Stun);
    }

    #[test]
    fn turn_without_credentials_is_rejected() {
        let err = CallConfig::from_lookup(lookup(&[
            ("TELECALL_PARTY_ID", "7"),
            ("TELECALL_PARTY_ROLE", "patient"),
            (
                "TELECALL_ICE_SERVERS",
                r#"[{"id":"t","type":"turn","url":"relay.example.org"}]"#,
            ),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Ice(_)));
    }

    #[test]
    fn signaling_url_must_be_websocket() {
        let err = CallConfig::from_lookup(lookup(&[
            ("TELECALL_PARTY_ID", "7"),
            ("TELECALL_PARTY_ROLE", "patient"),
            ("TELECALL_SIGNALING_URL", "http://127.0.0.1:8000/ws/video/"),
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "signaling_url",
                ..
            }
        ));
    }

    #[test]
    fn partial_json_document_uses_defaults() {
        let cfg: CallConfig = serde_json::from_str(
            r#"{"token":"abc","party":{"id":"3","role":"manager","display_name":"Ops"},"log":{"level":"info"}}"#,
        )
        .unwrap();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.log.level, LogLevel::Info);
        assert_eq!(cfg.signaling_url, DEFAULT_SIGNALING_URL);
    }
}
