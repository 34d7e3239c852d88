//! WebSocket connection to the signaling relay.
//!
//! The channel only moves [`SignalingMessage`]s; it holds no call logic and
//! never reconnects by itself. Whoever owns it calls [`SignalingChannel::connect`]
//! again, with a fresh credential, after a close.

use super::{SignalSender, SignalingError, SignalingMessage};
use crate::subscription::{Subscribers, Subscription};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The owner called [`SignalingChannel::close`].
    Local,
    /// The relay sent a close frame.
    Remote { code: u16, reason: String },
    /// The socket broke or ended without a close frame.
    Transport(String),
}

impl CloseReason {
    pub fn is_local(&self) -> bool {
        matches!(self, CloseReason::Local)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Local => f.write_str("closed locally"),
            CloseReason::Remote { code, reason } => write!(f, "closed by relay ({code}) {reason}"),
            CloseReason::Transport(err) => write!(f, "transport lost: {err}"),
        }
    }
}

struct Shared {
    state: Mutex<ChannelState>,
    generation: AtomicU64,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    open_subs: Subscribers<()>,
    message_subs: Subscribers<SignalingMessage>,
    close_subs: Subscribers<CloseReason>,
    error_subs: Subscribers<String>,
}

impl Shared {
    /// Moves the connection of `generation` to `Closed` and reports it once.
    fn finish(&self, generation: u64, reason: CloseReason) {
        {
            let mut state = self.state.lock();
            if self.generation.load(Ordering::SeqCst) != generation
                || *state != ChannelState::Open
            {
                return;
            }
            *state = ChannelState::Closed;
        }
        self.outbound.lock().take();
        info!(%reason, "signaling channel closed");
        self.close_subs.emit(&reason);
    }

    fn send(&self, message: &SignalingMessage) -> Result<(), SignalingError> {
        if *self.state.lock() != ChannelState::Open {
            return Err(SignalingError::ChannelNotReady);
        }
        let text = message
            .encode()
            .map_err(|e| SignalingError::Encode(e.to_string()))?;
        let outbound = self.outbound.lock();
        let tx = outbound.as_ref().ok_or(SignalingError::ChannelNotReady)?;
        tx.send(Message::Text(text))
            .map_err(|_| SignalingError::ChannelNotReady)?;
        debug!(kind = message.kind(), session = message.session_id(), "signaling sent");
        Ok(())
    }
}

pub struct SignalingChannel {
    endpoint: Url,
    shared: Arc<Shared>,
}

impl SignalingChannel {
    /// `endpoint` is the relay URL without credentials, e.g.
    /// `ws://host/ws/video/`.
    pub fn new(endpoint: &str) -> Result<Self, SignalingError> {
        let endpoint =
            Url::parse(endpoint).map_err(|e| SignalingError::InvalidEndpoint(e.to_string()))?;
        if !matches!(endpoint.scheme(), "ws" | "wss") {
            return Err(SignalingError::InvalidEndpoint(format!(
                "unsupported scheme '{}'",
                endpoint.scheme()
            )));
        }
        Ok(Self {
            endpoint,
            shared: Arc::new(Shared {
                state: Mutex::new(ChannelState::Disconnected),
                generation: AtomicU64::new(0),
                outbound: Mutex::new(None),
                tasks: Mutex::new(Vec::new()),
                open_subs: Subscribers::new(),
                message_subs: Subscribers::new(),
                close_subs: Subscribers::new(),
                error_subs: Subscribers::new(),
            }),
        })
    }

    pub fn state(&self) -> ChannelState {
        *self.shared.state.lock()
    }

    /// Sending half for the call controller.
    pub fn sender(&self) -> ChannelSender {
        ChannelSender {
            shared: self.shared.clone(),
        }
    }

    pub fn on_open<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&()) + Send + Sync + 'static,
    {
        self.shared.open_subs.subscribe(handler)
    }

    pub fn on_message<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&SignalingMessage) + Send + Sync + 'static,
    {
        self.shared.message_subs.subscribe(handler)
    }

    pub fn on_close<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&CloseReason) + Send + Sync + 'static,
    {
        self.shared.close_subs.subscribe(handler)
    }

    pub fn on_error<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&String) + Send + Sync + 'static,
    {
        self.shared.error_subs.subscribe(handler)
    }

    /// Opens the socket, authenticating with `credential`. An absent or
    /// rejected credential is [`SignalingError::Auth`]; nothing is retried.
    pub async fn connect(&self, credential: &str) -> Result<(), SignalingError> {
        if credential.trim().is_empty() {
            return Err(SignalingError::Auth);
        }
        {
            let mut state = self.shared.state.lock();
            if matches!(*state, ChannelState::Connecting | ChannelState::Open) {
                return Err(SignalingError::Connect("channel already in use".into()));
            }
            *state = ChannelState::Connecting;
        }

        let mut url = self.endpoint.clone();
        url.query_pairs_mut().clear().append_pair("token", credential);

        let ws = match connect_async(url.as_str()).await {
            Ok((ws, _response)) => ws,
            Err(err) => {
                *self.shared.state.lock() = ChannelState::Disconnected;
                let err = map_connect_error(err);
                warn!(error = %err, "signaling connect failed");
                self.shared.error_subs.emit(&err.to_string());
                return Err(err);
            }
        };

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (mut ws_write, mut ws_read) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        *self.shared.outbound.lock() = Some(tx);

        let writer = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if ws_write.send(message).await.is_err() || closing {
                    break;
                }
            }
            let _ = ws_write.close().await;
        });

        // open before the reader runs, so an immediate close is still reported
        *self.shared.state.lock() = ChannelState::Open;
        info!(endpoint = %self.endpoint, "signaling channel open");
        self.shared.open_subs.emit(&());

        let shared = self.shared.clone();
        let reader = tokio::spawn(async move {
            let reason = loop {
                match ws_read.next().await {
                    Some(Ok(Message::Text(text))) => match SignalingMessage::decode(&text) {
                        Ok(message) => {
                            debug!(
                                kind = message.kind(),
                                session = message.session_id(),
                                "signaling received"
                            );
                            shared.message_subs.emit(&message);
                        }
                        Err(err) => warn!(error = %err, "dropping malformed signaling frame"),
                    },
                    Some(Ok(Message::Binary(data))) => {
                        warn!(len = data.len(), "dropping binary signaling frame");
                    }
                    Some(Ok(Message::Close(frame))) => break remote_reason(frame),
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        shared.error_subs.emit(&err.to_string());
                        break CloseReason::Transport(err.to_string());
                    }
                    None => break CloseReason::Transport("stream ended".into()),
                }
            };
            shared.finish(generation, reason);
        });

        {
            let mut tasks = self.shared.tasks.lock();
            tasks.retain(|t| !t.is_finished());
            tasks.push(writer);
            tasks.push(reader);
        }
        Ok(())
    }

    pub fn send(&self, message: &SignalingMessage) -> Result<(), SignalingError> {
        self.shared.send(message)
    }

    /// Sends a close frame and reports [`CloseReason::Local`]. No-op unless
    /// open.
    pub fn close(&self) {
        let generation = self.shared.generation.load(Ordering::SeqCst);
        if let Some(tx) = self.shared.outbound.lock().as_ref() {
            let _ = tx.send(Message::Close(None));
        }
        self.shared.finish(generation, CloseReason::Local);
    }
}

impl Drop for SignalingChannel {
    fn drop(&mut self) {
        for task in self.shared.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

/// Cloneable sending half of a [`SignalingChannel`].
#[derive(Clone)]
pub struct ChannelSender {
    shared: Arc<Shared>,
}

impl SignalSender for ChannelSender {
    fn send(&self, message: &SignalingMessage) -> Result<(), SignalingError> {
        self.shared.send(message)
    }
}

fn map_connect_error(err: WsError) -> SignalingError {
    match err {
        WsError::Http(response)
            if matches!(
                response.status(),
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
            ) =>
        {
            SignalingError::Auth
        }
        WsError::Url(e) => SignalingError::InvalidEndpoint(e.to_string()),
        other => SignalingError::Connect(other.to_string()),
    }
}

fn remote_reason(frame: Option<CloseFrame<'_>>) -> CloseReason {
    match frame {
        Some(frame) => CloseReason::Remote {
            code: u16::from(frame.code),
            reason: frame.reason.to_string(),
        },
        None => CloseReason::Remote {
            code: 1005,
            reason: String::new(),
        },
    }
}
