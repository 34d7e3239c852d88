use crate::peer::types::{IceServerKind, ServerConfig};
use crate::utils::add_ice_url_scheme;
use thiserror::Error;
use tracing::{debug, warn};
use webrtc::ice_transport::ice_server::RTCIceServer;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IceConfigError {
    #[error("ICE server '{0}' has an empty URL")]
    EmptyUrl(String),
    #[error("TURN server '{0}' requires username and credential")]
    TurnWithoutCredentials(String),
}

/// Public STUN pair used when nothing is configured.
pub fn default_ice_servers() -> Vec<ServerConfig> {
    vec![
        ServerConfig {
            id: "default-stun".into(),
            kind: IceServerKind::Stun,
            url: "stun:stun.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
        ServerConfig {
            id: "default-stun-1".into(),
            kind: IceServerKind::Stun,
            url: "stun:stun1.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
    ]
}

pub fn validate_ice_servers(servers: &[ServerConfig]) -> Result<(), IceConfigError> {
    for server in servers {
        if server.url.trim().is_empty() {
            return Err(IceConfigError::EmptyUrl(server.id.clone()));
        }
        if server.kind == IceServerKind::Turn
            && (server.username.is_none() || server.credential.is_none())
        {
            return Err(IceConfigError::TurnWithoutCredentials(server.id.clone()));
        }
    }
    Ok(())
}

pub fn to_rtc_ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
            ..Default::default()
        })
        .collect()
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CandidateSummary {
    pub host: usize,
    pub srflx: usize,
    pub relay: usize,
}

/// Counts candidate types embedded in a complete (non-trickle) description.
pub fn analyze_candidates(sdp: &str) -> CandidateSummary {
    let mut summary = CandidateSummary::default();
    for line in sdp.lines().filter(|l| l.starts_with("a=candidate:")) {
        if line.contains("typ host") {
            summary.host += 1;
        } else if line.contains("typ srflx") {
            summary.srflx += 1;
        } else if line.contains("typ relay") {
            summary.relay += 1;
        }
    }

    debug!(
        host = summary.host,
        srflx = summary.srflx,
        relay = summary.relay,
        "candidate analysis"
    );
    if summary.srflx == 0 && summary.relay == 0 {
        warn!("no reflexive or relay candidates gathered, calls across NAT may fail");
    }
    summary
}
