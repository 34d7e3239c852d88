use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::EnvFilter;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::stats::StatsReportType;

/// Overrides the computed filter with a full `EnvFilter` directive string.
pub const FILTER_ENV: &str = "TELECALL_LOG_FILTER";

/// Crates that are chatty at debug level. Held at `warn` unless tracing.
const NOISY_TARGETS: &[&str] = &[
    "webrtc",
    "webrtc_ice",
    "webrtc_dtls",
    "webrtc_srtp",
    "webrtc_sctp",
    "webrtc_mdns",
    "interceptor",
    "rustls",
    "hyper",
    "reqwest",
    "tungstenite",
    "tokio_tungstenite",
];

static INSTALLED: OnceLock<()> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Debug builds log at debug, release builds only warnings.
    pub fn build_default() -> Self {
        if cfg!(debug_assertions) {
            LogLevel::Debug
        } else {
            LogLevel::Warn
        }
    }

    fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_directive())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(LogLevel::Off),
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: LogLevel,
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::build_default(),
            ansi: true,
        }
    }
}

impl LogConfig {
    /// Filter directives for this config: our own level plus dependency
    /// throttling.
    pub fn directives(&self) -> String {
        let mut directives = vec![self.level.as_directive().to_string()];
        if self.level < LogLevel::Trace {
            let cap = self.level.min(LogLevel::Warn);
            directives.extend(
                NOISY_TARGETS
                    .iter()
                    .map(|target| format!("{target}={}", cap.as_directive())),
            );
        }
        directives.join(",")
    }
}

#[derive(Debug, Error)]
pub enum InitError {
    #[error("invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),
    #[error("failed to install subscriber: {0}")]
    Install(String),
}

/// Millisecond local timestamps.
struct LocalTime;

impl FormatTime for LocalTime {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
    }
}

/// Installs the global subscriber. Later calls are no-ops, so tests and the
/// binary can both call it.
pub fn init(config: &LogConfig) -> Result<(), InitError> {
    if INSTALLED.get().is_some() {
        return Ok(());
    }

    let filter = match std::env::var(FILTER_ENV) {
        Ok(raw) if !raw.trim().is_empty() => EnvFilter::try_new(raw)?,
        _ => EnvFilter::try_new(config.directives())?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(LocalTime)
        .with_ansi(config.ansi)
        .with_target(true)
        .try_init()
        .map_err(|e| InitError::Install(e.to_string()))?;

    let _ = INSTALLED.set(());
    info!(level = %config.level, "logging initialised");
    Ok(())
}

/// Logs the nominated candidate pair. Called right before a failure is
/// reported so the log shows which path broke.
pub async fn dump_selected_pair(pc: &RTCPeerConnection, moment: &str) {
    let stats = pc.get_stats().await;
    for (_, report) in stats.reports {
        if let StatsReportType::CandidatePair(pair) = report {
            if pair.nominated {
                info!(
                    moment,
                    local = %pair.local_candidate_id,
                    remote = %pair.remote_candidate_id,
                    bytes_sent = pair.bytes_sent,
                    bytes_received = pair.bytes_received,
                    state = ?pair.state,
                    "selected candidate pair"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependencies_are_capped_at_warn() {
        let cfg = LogConfig {
            level: LogLevel::Debug,
            ansi: false,
        };
        let d = cfg.directives();
        assert!(d.starts_with("debug,"));
        assert!(d.contains("webrtc_ice=warn"));
    }

    #[test]
    fn quiet_levels_stay_quiet_for_dependencies() {
        let cfg = LogConfig {
            level: LogLevel::Error,
            ansi: false,
        };
        assert!(cfg.directives().contains("webrtc=error"));
    }

    #[test]
    fn trace_lets_everything_through() {
        let cfg = LogConfig {
            level: LogLevel::Trace,
            ansi: false,
        };
        assert_eq!(cfg.directives(), "trace");
    }

    #[test]
    fn levels_parse_loosely() {
        assert_eq!("WARNING".parse::<LogLevel>(), Ok(LogLevel::Warn));
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn init_twice_is_fine() {
        let cfg = LogConfig {
            level: LogLevel::Off,
            ansi: false,
        };
        // another test binary thread may have installed first; both are Ok
        let _ = init(&cfg);
        assert!(init(&cfg).is_ok());
    }
}
