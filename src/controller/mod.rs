//! Call lifecycle state machine.
//!
//! [`CallController`] is an actor: [`CallController::run`] drains a single
//! inbox of user commands, signaling messages, channel closes and peer events,
//! one at a time, plus a reconciliation ticker that polls the registry while a
//! call is open. Media acquisition is awaited inline, so anything arriving in
//! the meantime queues behind it.

mod events;
mod handle;
mod state;


pub use events::{CallCommand, CallEvent, ControllerEvent, EndReason};
pub use handle::CallHandle;
pub use state::CallState;

use crate::config::{CallConfig, ConfigError};
use crate::error::CallError;
use crate::peer::{
    MediaBackend, MediaConstraints, PeerConnectionManager, PeerError, PeerEvent, PeerEventSink,
    RemoteMediaStream, SdpKind, SessionDescription, TrackKind,
};
use crate::registry::CallRegistry;
use crate::session::{CallSession, Party, PartyId, SessionConnection};
use crate::signaling::{CallStatusValue, RejectReason, SignalSender, SignalingMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub local: Party,
    pub constraints: MediaConstraints,
    pub reconcile_interval: Duration,
    pub reconcile_miss_threshold: u32,
}

impl ControllerConfig {
    pub fn new(local: Party) -> Self {
        Self {
            local,
            constraints: MediaConstraints::default(),
            reconcile_interval: crate::config::DEFAULT_RECONCILE_INTERVAL,
            reconcile_miss_threshold: 1,
        }
    }

    pub fn from_call_config(config: &CallConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            local: config.local_party()?.clone(),
            constraints: MediaConstraints::default(),
            reconcile_interval: config.reconcile_interval(),
            reconcile_miss_threshold: config.reconcile_miss_threshold.max(1),
        })
    }
}

/// The call currently owning the controller, from ringing to teardown.
struct CurrentCall {
    session: CallSession,
    remote: PartyId,
    /// Offer waiting for the user while ringing in.
    pending_offer: Option<SessionDescription>,
    pcm: Option<PeerConnectionManager>,
    /// Whether this side ends the registry session on teardown.
    owns_session: bool,
}

pub struct CallController {
    local: Party,
    constraints: MediaConstraints,
    reconcile_interval: Duration,
    miss_threshold: u32,
    registry: Arc<dyn CallRegistry>,
    backend: Arc<dyn MediaBackend>,
    signals: Arc<dyn SignalSender>,
    state: CallState,
    call: Option<CurrentCall>,
    misses: u32,
    events: broadcast::Sender<CallEvent>,
    inbox_tx: mpsc::UnboundedSender<ControllerEvent>,
    inbox: mpsc::UnboundedReceiver<ControllerEvent>,
}

impl CallController {
    pub fn new(
        config: ControllerConfig,
        registry: Arc<dyn CallRegistry>,
        backend: Arc<dyn MediaBackend>,
        signals: Arc<dyn SignalSender>,
    ) -> Self {
        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            local: config.local,
            constraints: config.constraints,
            reconcile_interval: config.reconcile_interval,
            miss_threshold: config.reconcile_miss_threshold.max(1),
            registry,
            backend,
            signals,
            state: CallState::Idle,
            call: None,
            misses: 0,
            events,
            inbox_tx,
            inbox,
        }
    }

    pub fn handle(&self) -> CallHandle {
        CallHandle::new(
            self.inbox_tx.clone(),
            self.events.clone(),
            self.registry.clone(),
        )
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    /// Runs until [`CallHandle::shutdown`]. Any call in progress is ended on
    /// the way out.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.reconcile_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(party = %self.local.id, role = ?self.local.role, "call controller running");

        loop {
            tokio::select! {
                event = self.inbox.recv() => match event {
                    Some(ControllerEvent::Command(CallCommand::Shutdown)) | None => break,
                    Some(event) => self.handle_event(event).await,
                },
                _ = ticker.tick() => self.reconcile().await,
            }
        }

        self.terminate(EndReason::LocalHangUp, true).await;
        info!("call controller stopped");
    }

    async fn handle_event(&mut self, event: ControllerEvent) {
        match event {
            ControllerEvent::Command(command) => self.handle_command(command).await,
            ControllerEvent::Signal(message) => self.handle_signal(message).await,
            ControllerEvent::ChannelClosed(reason) => {
                warn!(%reason, state = %self.state, "signaling lost");
                self.emit(CallEvent::SignalingLost {
                    reason: reason.to_string(),
                });
                self.terminate(EndReason::SignalingLost, false).await;
            }
            ControllerEvent::Peer { session_id, event } => {
                self.handle_peer_event(session_id, event).await
            }
        }
    }

    async fn handle_command(&mut self, command: CallCommand) {
        match command {
            CallCommand::PlaceCall { callee, reply } => {
                let _ = reply.send(self.place_call(callee).await);
            }
            CallCommand::Accept { reply } => {
                let _ = reply.send(self.accept().await);
            }
            CallCommand::Reject { reply } => {
                let _ = reply.send(self.reject());
            }
            CallCommand::HangUp { reply } => {
                self.terminate(EndReason::LocalHangUp, true).await;
                let _ = reply.send(Ok(()));
            }
            CallCommand::ToggleTrack { kind, reply } => {
                let _ = reply.send(self.toggle_track(kind));
            }
            CallCommand::State { reply } => {
                let _ = reply.send(self.state);
            }
            // handled by `run`
            CallCommand::Shutdown => {}
        }
    }

    async fn place_call(&mut self, callee: Party) -> Result<String, CallError> {
        if !self.state.is_idle() {
            return Err(CallError::Busy);
        }
        if callee.id == self.local.id {
            return Err(CallError::ProtocolViolation("cannot call yourself".into()));
        }

        self.transition(CallState::Originating);
        let session = match self
            .registry
            .create_call_session(&self.local, &callee)
            .await
        {
            Ok(session) => session,
            Err(err) => {
                warn!(error = %err, "could not create call session");
                return Err(self.abort_origination(None, err.into()));
            }
        };
        let session_id = session.id.clone();
        info!(session = %session_id, callee = %callee.id, "call session created");

        let mut pcm = PeerConnectionManager::new(
            session_id.clone(),
            self.backend.clone(),
            self.constraints,
            self.peer_sink(&session_id),
        );
        let offer = match pcm.originate(&self.local, &callee).await {
            Ok(handle) => handle.description,
            Err(err) => {
                pcm.terminate().await;
                return Err(self.abort_origination(Some(session_id), err.into()));
            }
        };

        let sent = self.signals.send(&SignalingMessage::CallOffer {
            call_session_id: session_id.clone(),
            from_party: self.local.id.clone(),
            to_party: callee.id.clone(),
            payload: offer,
        });
        if let Err(err) = sent {
            warn!(session = %session_id, error = %err, "offer not sent, releasing media");
            pcm.terminate().await;
            return Err(self.abort_origination(Some(session_id), CallError::SignalingUnavailable));
        }

        self.call = Some(CurrentCall {
            session,
            remote: callee.id,
            pending_offer: None,
            pcm: Some(pcm),
            owns_session: true,
        });
        self.misses = 0;
        self.transition(CallState::RingingOut);
        Ok(session_id)
    }

    /// Returns to idle from `Originating`, ending the registry session if one
    /// was created.
    fn abort_origination(&mut self, session_id: Option<String>, err: CallError) -> CallError {
        if let Some(id) = session_id {
            self.end_registry_session(id);
        }
        self.transition(CallState::Idle);
        self.emit(CallEvent::failed(&err));
        err
    }

    async fn accept(&mut self) -> Result<(), CallError> {
        if self.state != CallState::RingingIn {
            return Err(CallError::NoIncomingCall);
        }
        let Some(call) = self.call.as_mut() else {
            return Err(CallError::NoIncomingCall);
        };
        let Some(offer) = call.pending_offer.take() else {
            return Err(CallError::NoIncomingCall);
        };
        let session_id = call.session.id.clone();
        let remote = call.remote.clone();

        self.transition(CallState::Connecting);
        let mut pcm = PeerConnectionManager::new(
            session_id.clone(),
            self.backend.clone(),
            self.constraints,
            self.peer_sink(&session_id),
        );

        let answer = match pcm.accept_offer(&offer, &remote).await {
            Ok(handle) => handle.description,
            Err(err) => {
                pcm.terminate().await;
                let reason = match err {
                    PeerError::MediaAccessDenied => "media access denied",
                    _ => "negotiation failed",
                };
                warn!(session = %session_id, error = %err, "cannot accept call, {reason}");
                self.send_best_effort(SignalingMessage::CallRejected {
                    call_session_id: session_id.clone(),
                    from_party: self.local.id.clone(),
                    to_party: remote,
                    payload: RejectReason::Unavailable,
                });
                let err = CallError::from(err);
                self.finish(&session_id, EndReason::Failed(err.to_string()));
                self.emit(CallEvent::failed(&err));
                return Err(err);
            }
        };

        let sent = self.signals.send(&SignalingMessage::CallAnswer {
            call_session_id: session_id.clone(),
            from_party: self.local.id.clone(),
            to_party: remote,
            payload: answer,
        });
        if let Err(err) = sent {
            warn!(session = %session_id, error = %err, "answer not sent, releasing media");
            pcm.terminate().await;
            let err = CallError::SignalingUnavailable;
            self.finish(&session_id, EndReason::Failed(err.to_string()));
            self.emit(CallEvent::failed(&err));
            return Err(err);
        }

        if let Some(call) = self.call.as_mut() {
            call.pcm = Some(pcm);
            call.owns_session = true;
        }
        Ok(())
    }

    fn reject(&mut self) -> Result<(), CallError> {
        if self.state != CallState::RingingIn {
            return Err(CallError::NoIncomingCall);
        }
        let Some(call) = self.call.take() else {
            return Err(CallError::NoIncomingCall);
        };
        info!(session = %call.session.id, from = %call.remote, "declining call");
        self.send_best_effort(SignalingMessage::CallRejected {
            call_session_id: call.session.id.clone(),
            from_party: self.local.id.clone(),
            to_party: call.remote,
            payload: RejectReason::Declined,
        });
        self.finish(&call.session.id, EndReason::Rejected(RejectReason::Declined));
        Ok(())
    }

    fn toggle_track(&mut self, kind: TrackKind) -> Result<bool, CallError> {
        let pcm = self
            .call
            .as_mut()
            .and_then(|call| call.pcm.as_mut())
            .ok_or_else(|| CallError::ProtocolViolation("no call media to toggle".into()))?;
        Ok(pcm.toggle_local_track(kind)?)
    }

    async fn handle_signal(&mut self, message: SignalingMessage) {
        if let Some(to) = message.to() {
            if to != &self.local.id {
                debug!(kind = message.kind(), to = %to, "message for another party");
                return;
            }
        }
        if message.from() == &self.local.id {
            return;
        }

        if let SignalingMessage::CallOffer {
            call_session_id,
            from_party,
            payload,
            ..
        } = message
        {
            self.handle_offer(call_session_id, from_party, payload).await;
            return;
        }

        if self.current_session_id() != Some(message.session_id()) {
            debug!(
                kind = message.kind(),
                session = message.session_id(),
                "discarding message for unknown or stale session"
            );
            return;
        }

        match message {
            SignalingMessage::CallAnswer { payload, .. } => self.handle_answer(payload).await,
            SignalingMessage::CallRejected { payload, .. } => {
                let reason = if self.state == CallState::Active {
                    EndReason::RemoteHangUp
                } else {
                    EndReason::Rejected(payload)
                };
                info!(%payload, state = %self.state, "call rejected by peer");
                self.terminate(reason, false).await;
            }
            SignalingMessage::CallStatus {
                payload: CallStatusValue::Ended,
                ..
            } => {
                info!("peer ended the call");
                self.terminate(EndReason::RemoteHangUp, false).await;
            }
            SignalingMessage::CallStatus {
                payload: CallStatusValue::Active,
                ..
            } => {
                debug!("peer reports call active");
                if let Some(call) = self.call.as_mut() {
                    call.session.connection_state = SessionConnection::Connected;
                }
            }
            SignalingMessage::CallOffer { .. } => {}
        }
    }

    async fn handle_offer(&mut self, session_id: String, from: PartyId, offer: SessionDescription) {
        if self.current_session_id() == Some(session_id.as_str()) {
            debug!(session = %session_id, "duplicate offer ignored");
            return;
        }
        if !self.state.is_idle() {
            info!(session = %session_id, from = %from, state = %self.state, "busy, rejecting offer");
            self.send_best_effort(SignalingMessage::CallRejected {
                call_session_id: session_id,
                from_party: self.local.id.clone(),
                to_party: from,
                payload: RejectReason::Busy,
            });
            return;
        }
        if offer.kind != SdpKind::Offer {
            warn!(session = %session_id, "call-offer without an offer description");
            return;
        }

        match self.registry.check_call_status(&session_id).await {
            Ok(status) if !status.is_connected => {
                info!(session = %session_id, "ignoring offer for a stale session");
                return;
            }
            Ok(_) => {}
            Err(err) => {
                warn!(session = %session_id, error = %err, "registry unreachable, ringing anyway")
            }
        }

        info!(session = %session_id, from = %from, "incoming call");
        let mut session = CallSession::new(session_id.clone(), from.clone(), self.local.id.clone());
        session.connection_state = SessionConnection::Connected;
        self.call = Some(CurrentCall {
            session,
            remote: from.clone(),
            pending_offer: Some(offer),
            pcm: None,
            owns_session: false,
        });
        self.misses = 0;
        self.transition(CallState::RingingIn);
        self.emit(CallEvent::IncomingCall { session_id, from });
    }

    async fn handle_answer(&mut self, answer: SessionDescription) {
        if self.state != CallState::RingingOut {
            warn!(state = %self.state, "unexpected answer discarded");
            return;
        }
        let result = match self.call.as_mut().and_then(|call| call.pcm.as_mut()) {
            Some(pcm) => pcm.apply_remote_answer(&answer).await,
            None => Err(PeerError::Terminated),
        };
        match result {
            Ok(()) => self.transition(CallState::Connecting),
            Err(PeerError::ProtocolViolation(reason)) => {
                warn!(%reason, "answer discarded");
            }
            Err(err) => {
                let err = CallError::from(err);
                self.emit(CallEvent::failed(&err));
                self.terminate(EndReason::Failed(err.to_string()), true).await;
            }
        }
    }

    async fn handle_peer_event(&mut self, session_id: String, event: PeerEvent) {
        if self.current_session_id() != Some(session_id.as_str()) {
            debug!(session = %session_id, "peer event for a finished call");
            return;
        }
        match event {
            PeerEvent::RemoteStream(stream) => self.remote_stream(session_id, stream),
            PeerEvent::Failed(reason) => {
                let err = CallError::Peer(PeerError::Negotiation(reason.clone()));
                if let Some(pcm) = self.call.as_mut().and_then(|call| call.pcm.as_mut()) {
                    pcm.mark_failed(&reason).await;
                }
                self.emit(CallEvent::failed(&err));
                self.terminate(EndReason::Failed(reason), true).await;
            }
        }
    }

    fn remote_stream(&mut self, session_id: String, stream: RemoteMediaStream) {
        if self.state != CallState::Connecting {
            debug!(state = %self.state, "remote stream outside connecting ignored");
            return;
        }
        let kinds = stream.kinds();
        let connected = self
            .call
            .as_mut()
            .and_then(|call| call.pcm.as_mut())
            .is_some_and(|pcm| pcm.remote_stream_arrived(stream));
        if !connected {
            return;
        }
        if let Some(call) = self.call.as_mut() {
            call.session.connection_state = SessionConnection::Connected;
            let remote = call.remote.clone();
            self.send_best_effort(SignalingMessage::CallStatus {
                call_session_id: session_id.clone(),
                from_party: self.local.id.clone(),
                to_party: Some(remote),
                payload: CallStatusValue::Active,
            });
        }
        self.transition(CallState::Active);
        self.emit(CallEvent::RemoteStreamReady { session_id, kinds });
    }

    /// Polls the registry for the open session. Enough consecutive "not
    /// connected" answers end the call in any state, ringing included, since
    /// the portal marks a session connected from creation. Poll errors do not
    /// count.
    async fn reconcile(&mut self) {
        let Some(session_id) = self.current_session_id().map(str::to_owned) else {
            return;
        };
        let status = match self.registry.check_call_status(&session_id).await {
            Ok(status) => status,
            Err(err) => {
                warn!(session = %session_id, error = %err, "call status poll failed");
                return;
            }
        };
        if self.current_session_id() != Some(session_id.as_str()) {
            return;
        }
        if let Some(call) = self.call.as_mut() {
            call.session.connection_state = if status.is_connected {
                SessionConnection::Connected
            } else {
                SessionConnection::Disconnected
            };
        }
        if status.is_connected {
            self.misses = 0;
            return;
        }
        self.misses += 1;
        debug!(
            session = %session_id,
            state = %self.state,
            misses = self.misses,
            "session reported disconnected"
        );
        if self.misses >= self.miss_threshold {
            info!(session = %session_id, "registry lost the session, ending call");
            self.terminate(EndReason::Disconnected, false).await;
        }
    }

    /// Tears down whatever call is in progress and returns to `Idle`.
    /// Idempotent; `notify_peer` sends a best-effort end notice.
    async fn terminate(&mut self, reason: EndReason, notify_peer: bool) {
        let Some(mut call) = self.call.take() else {
            if !self.state.is_idle() {
                self.transition(CallState::Idle);
            }
            return;
        };
        let was = self.state;
        self.transition(CallState::Ending);

        if notify_peer {
            let message = if was == CallState::RingingIn {
                SignalingMessage::CallRejected {
                    call_session_id: call.session.id.clone(),
                    from_party: self.local.id.clone(),
                    to_party: call.remote.clone(),
                    payload: RejectReason::Declined,
                }
            } else {
                SignalingMessage::CallStatus {
                    call_session_id: call.session.id.clone(),
                    from_party: self.local.id.clone(),
                    to_party: None,
                    payload: CallStatusValue::Ended,
                }
            };
            self.send_best_effort(message);
        }

        if let Some(pcm) = call.pcm.as_mut() {
            pcm.terminate().await;
        }
        if call.owns_session && reason != EndReason::Disconnected {
            self.end_registry_session(call.session.id.clone());
        }
        self.finish(&call.session.id, reason);
    }

    /// Final step of every teardown: report and go idle.
    fn finish(&mut self, session_id: &str, reason: EndReason) {
        self.transition(CallState::Ending);
        self.call = None;
        self.misses = 0;
        info!(session = %session_id, ?reason, "call ended");
        self.emit(CallEvent::CallEnded {
            session_id: session_id.to_string(),
            reason,
        });
        self.transition(CallState::Idle);
    }

    fn end_registry_session(&self, session_id: String) {
        let registry = self.registry.clone();
        tokio::spawn(async move {
            if let Err(err) = registry.end_call_session(&session_id).await {
                warn!(session = %session_id, error = %err, "failed to end call session");
            }
        });
    }

    fn peer_sink(&self, session_id: &str) -> PeerEventSink {
        let inbox = self.inbox_tx.clone();
        let session_id = session_id.to_string();
        Arc::new(move |event| {
            let _ = inbox.send(ControllerEvent::Peer {
                session_id: session_id.clone(),
                event,
            });
        })
    }

    fn send_best_effort(&self, message: SignalingMessage) {
        if let Err(err) = self.signals.send(&message) {
            warn!(kind = message.kind(), session = message.session_id(), error = %err, "signaling send failed");
        }
    }

    fn current_session_id(&self) -> Option<&str> {
        self.call.as_ref().map(|call| call.session.id.as_str())
    }

    fn transition(&mut self, next: CallState) {
        if self.state == next {
            return;
        }
        let from = self.state;
        self.state = next;
        debug!(%from, to = %next, "call state");
        self.emit(CallEvent::StateChanged { from, to: next });
    }

    fn emit(&self, event: CallEvent) {
        let _ = self.events.send(event);
    }
}
