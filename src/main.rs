use std::error::Error;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use telecall::logger;
use telecall::{
    CallConfig, CallController, CallEvent, CallHandle, CallRegistry, ControllerConfig,
    HttpRegistry, RtcBackend, SignalingChannel, SignalingError,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Notify;
use tracing::{error, info, warn};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> ExitCode {
    let config = match CallConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("telecall: {err}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(err) = logger::init(&config.log) {
        eprintln!("telecall: {err}");
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "telecall stopped");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: CallConfig) -> Result<(), Box<dyn Error>> {
    let registry: Arc<dyn CallRegistry> =
        Arc::new(HttpRegistry::new(&config.api_url, config.token.clone())?);
    let backend = Arc::new(RtcBackend::new(
        config.ice_servers.clone(),
        config.gathering_timeout(),
        config.media_permission,
    ));
    let channel = SignalingChannel::new(&config.signaling_url)?;

    let controller = CallController::new(
        ControllerConfig::from_call_config(&config)?,
        registry,
        backend,
        Arc::new(channel.sender()),
    );
    let handle = controller.handle();
    let _routes = handle.attach(&channel);

    let lost = Arc::new(Notify::new());
    let _lost_watch = channel.on_close({
        let lost = lost.clone();
        move |reason| {
            if !reason.is_local() {
                lost.notify_one();
            }
        }
    });

    channel.connect(&config.token).await?;
    let events = tokio::spawn(watch_events(handle.clone(), config.auto_answer));
    let controller = tokio::spawn(controller.run());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, shutting down");
                break;
            }
            _ = lost.notified() => reconnect(&channel, &config.token).await?,
        }
    }

    handle.shutdown();
    let _ = controller.await;
    channel.close();
    events.abort();
    Ok(())
}

/// Reconnects with a freshly read credential until the relay accepts it or
/// rejects it outright.
async fn reconnect(channel: &SignalingChannel, fallback: &str) -> Result<(), SignalingError> {
    loop {
        tokio::time::sleep(RECONNECT_DELAY).await;
        let token = CallConfig::from_env()
            .map(|config| config.token)
            .unwrap_or_else(|_| fallback.to_string());
        match channel.connect(&token).await {
            Ok(()) => {
                info!("signaling reconnected");
                return Ok(());
            }
            Err(SignalingError::Auth) => return Err(SignalingError::Auth),
            Err(err) => warn!(error = %err, "reconnect failed, retrying"),
        }
    }
}

async fn watch_events(handle: CallHandle, auto_answer: bool) {
    let mut events = handle.subscribe();
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(missed)) => {
                warn!(missed, "call events dropped");
                continue;
            }
            Err(RecvError::Closed) => return,
        };
        match &event {
            CallEvent::IncomingCall { session_id, from } => {
                info!(session = %session_id, from = %from, "incoming call");
                if auto_answer {
                    let handle = handle.clone();
                    tokio::spawn(async move {
                        if let Err(err) = handle.accept().await {
                            warn!(error = %err, "auto-answer failed");
                        }
                    });
                }
            }
            CallEvent::CallFailed { kind, message } => warn!(?kind, %message, "call failed"),
            other => info!(event = ?other, "call event"),
        }
    }
}
