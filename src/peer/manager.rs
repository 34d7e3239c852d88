//! Owner of exactly one media negotiation.
//!
//! A manager walks `idle → awaiting-local-media → offer-sent → connected` when
//! it originates, or `idle → offer-received → awaiting-local-media →
//! answer-sent → connected` when it answers. It ends in `closed` or `failed`
//! exactly once and is then dropped; a new call builds a new manager.

use crate::peer::media::{
    LocalMediaStream, MediaBackend, Negotiator, PeerEventSink, RemoteMediaStream,
};
use crate::peer::state::NegotiationState;
use crate::peer::types::{MediaConstraints, SdpKind, SessionDescription, TrackKind};
use crate::peer::PeerError;
use crate::session::{Party, PartyId};
use crate::subscription::{Subscribers, Subscription};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of originating or accepting: the description to hand to signaling.
#[derive(Debug, Clone)]
pub struct NegotiationHandle {
    pub session_id: String,
    pub remote_party: PartyId,
    pub description: SessionDescription,
}

pub struct PeerConnectionManager {
    session_id: String,
    backend: Arc<dyn MediaBackend>,
    events: PeerEventSink,
    constraints: MediaConstraints,
    state: NegotiationState,
    local: Option<LocalMediaStream>,
    remote: Option<RemoteMediaStream>,
    negotiator: Option<Box<dyn Negotiator>>,
    answer_applied: bool,
    remote_stream_subs: Subscribers<RemoteMediaStream>,
}

impl PeerConnectionManager {
    pub fn new(
        session_id: impl Into<String>,
        backend: Arc<dyn MediaBackend>,
        constraints: MediaConstraints,
        events: PeerEventSink,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            backend,
            events,
            constraints,
            state: NegotiationState::Idle,
            local: None,
            remote: None,
            negotiator: None,
            answer_applied: false,
            remote_stream_subs: Subscribers::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn local_stream(&self) -> Option<&LocalMediaStream> {
        self.local.as_ref()
    }

    pub fn remote_stream(&self) -> Option<&RemoteMediaStream> {
        self.remote.as_ref()
    }

    /// Live local tracks still holding a device.
    pub fn held_tracks(&self) -> usize {
        self.local.as_ref().map_or(0, LocalMediaStream::live_tracks)
    }

    /// Acquires camera and microphone and produces the offer.
    pub async fn originate(
        &mut self,
        local: &Party,
        remote: &Party,
    ) -> Result<NegotiationHandle, PeerError> {
        self.expect_state(NegotiationState::Idle, "originate")?;
        info!(session = %self.session_id, from = %local.id, to = %remote.id, "originating call");

        self.acquire_local_media().await?;
        let mut negotiator = self.open_negotiator().await?;

        let offer = match self.local.as_ref() {
            Some(stream) => negotiator.create_offer(stream).await,
            None => Err(PeerError::Terminated),
        };
        self.negotiator = Some(negotiator);
        let offer = match offer {
            Ok(offer) => offer,
            Err(err) => return Err(self.fail(err).await),
        };

        self.transition(NegotiationState::OfferSent);
        Ok(NegotiationHandle {
            session_id: self.session_id.clone(),
            remote_party: remote.id.clone(),
            description: offer,
        })
    }

    /// Answers a received offer, acquiring local media first.
    pub async fn accept_offer(
        &mut self,
        offer: &SessionDescription,
        from: &PartyId,
    ) -> Result<NegotiationHandle, PeerError> {
        self.expect_state(NegotiationState::Idle, "accept an offer")?;
        if offer.kind != SdpKind::Offer {
            return Err(PeerError::ProtocolViolation(
                "accept_offer needs an offer description".into(),
            ));
        }
        info!(session = %self.session_id, from = %from, "accepting offer");
        self.transition(NegotiationState::OfferReceived);

        self.acquire_local_media().await?;
        let mut negotiator = self.open_negotiator().await?;

        let answer = match self.local.as_ref() {
            Some(stream) => negotiator.create_answer(offer, stream).await,
            None => Err(PeerError::Terminated),
        };
        self.negotiator = Some(negotiator);
        let answer = match answer {
            Ok(answer) => answer,
            Err(err) => return Err(self.fail(err).await),
        };

        self.transition(NegotiationState::AnswerSent);
        Ok(NegotiationHandle {
            session_id: self.session_id.clone(),
            remote_party: from.clone(),
            description: answer,
        })
    }

    /// Feeds the remote answer into the outstanding offer.
    pub async fn apply_remote_answer(
        &mut self,
        answer: &SessionDescription,
    ) -> Result<(), PeerError> {
        if self.state != NegotiationState::OfferSent || self.answer_applied {
            return Err(PeerError::ProtocolViolation(format!(
                "answer received with no outstanding offer (state {})",
                self.state
            )));
        }
        if answer.kind != SdpKind::Answer {
            return Err(PeerError::ProtocolViolation(
                "expected an answer description".into(),
            ));
        }

        let result = match self.negotiator.as_mut() {
            Some(negotiator) => negotiator.apply_answer(answer).await,
            None => Err(PeerError::Terminated),
        };
        if let Err(err) = result {
            return Err(self.fail(err).await);
        }
        self.answer_applied = true;
        debug!(session = %self.session_id, "remote answer applied");
        Ok(())
    }

    pub fn on_remote_stream<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&RemoteMediaStream) + Send + Sync + 'static,
    {
        self.remote_stream_subs.subscribe(handler)
    }

    /// Records the remote track set. Returns `true` when this moved the
    /// negotiation to `connected`.
    pub fn remote_stream_arrived(&mut self, stream: RemoteMediaStream) -> bool {
        let ready = match self.state {
            NegotiationState::OfferSent => self.answer_applied,
            NegotiationState::AnswerSent => true,
            _ => false,
        };
        if !ready {
            debug!(session = %self.session_id, state = %self.state, "ignoring remote stream");
            return false;
        }

        info!(session = %self.session_id, kinds = ?stream.kinds(), "remote stream ready");
        self.transition(NegotiationState::Connected);
        self.remote_stream_subs.emit(&stream);
        self.remote = Some(stream);
        true
    }

    /// Mutes or unmutes a local track without renegotiating. Returns the new
    /// enabled flag.
    pub fn toggle_local_track(&mut self, kind: TrackKind) -> Result<bool, PeerError> {
        if self.state.is_terminal() {
            return Err(PeerError::Terminated);
        }
        let stream = self
            .local
            .as_mut()
            .ok_or_else(|| PeerError::ProtocolViolation("no local media to toggle".into()))?;
        let enabled = stream
            .toggle(kind)
            .ok_or_else(|| PeerError::ProtocolViolation(format!("no local {kind} track")))?;
        debug!(session = %self.session_id, %kind, enabled, "local track toggled");
        Ok(enabled)
    }

    /// Releases all media and tears the negotiation down. Calling it again is a
    /// no-op.
    pub async fn terminate(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        self.release().await;
        self.transition(NegotiationState::Closed);
        info!(session = %self.session_id, "negotiation closed");
    }

    /// Marks the negotiation failed after a transport failure reported by the
    /// negotiator.
    pub async fn mark_failed(&mut self, reason: &str) {
        if self.state.is_terminal() {
            return;
        }
        warn!(session = %self.session_id, %reason, "negotiation failed");
        self.release().await;
        self.transition(NegotiationState::Failed);
    }

    async fn acquire_local_media(&mut self) -> Result<(), PeerError> {
        self.transition(NegotiationState::AwaitingLocalMedia);
        match self.backend.acquire(self.constraints).await {
            Ok(stream) => {
                debug!(
                    session = %self.session_id,
                    tracks = stream.live_tracks(),
                    "local media acquired"
                );
                self.local = Some(stream);
                Ok(())
            }
            Err(err) => Err(self.fail(err.into()).await),
        }
    }

    async fn open_negotiator(&mut self) -> Result<Box<dyn Negotiator>, PeerError> {
        match self.backend.negotiator(self.events.clone()).await {
            Ok(negotiator) => Ok(negotiator),
            Err(err) => Err(self.fail(err).await),
        }
    }

    async fn fail(&mut self, err: PeerError) -> PeerError {
        if !self.state.is_terminal() {
            warn!(session = %self.session_id, error = %err, "negotiation failed");
            self.release().await;
            self.transition(NegotiationState::Failed);
        }
        err
    }

    async fn release(&mut self) {
        if let Some(mut local) = self.local.take() {
            local.stop_all();
        }
        self.remote.take();
        if let Some(mut negotiator) = self.negotiator.take() {
            negotiator.close().await;
        }
    }

    fn expect_state(&self, expected: NegotiationState, action: &str) -> Result<(), PeerError> {
        if self.state.is_terminal() {
            return Err(PeerError::Terminated);
        }
        if self.state != expected {
            return Err(PeerError::ProtocolViolation(format!(
                "cannot {action} in state {}",
                self.state
            )));
        }
        Ok(())
    }

    fn transition(&mut self, next: NegotiationState) {
        debug!(session = %self.session_id, from = %self.state, to = %next, "negotiation state");
        self.state = next;
    }
}
