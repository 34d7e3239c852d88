//! In-memory stand-ins for the media platform, the registry and the signaling
//! socket.

use crate::peer::{
    DeviceLedger, LocalMediaStream, LocalTrack, MediaBackend, MediaConstraints, MediaError,
    Negotiator, PeerError, PeerEventSink, SessionDescription,
};
use crate::registry::{CallRegistry, CallStatus, RegistryError};
use crate::session::{CallSession, Party};
use crate::signaling::{SignalSender, SignalingError, SignalingMessage};
use crate::utils::random_id;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

const FAKE_SDP: &str = "v=0\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\n";

#[derive(Default)]
pub struct FakeBackend {
    ledger: DeviceLedger,
    deny: AtomicBool,
    acquisitions: AtomicUsize,
    opened: AtomicUsize,
    closed: Arc<AtomicUsize>,
    offers: Arc<AtomicUsize>,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deny_media(&self, deny: bool) {
        self.deny.store(deny, Ordering::SeqCst);
    }

    /// Attempts to acquire media, successful or not.
    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }

    pub fn negotiators_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn negotiators_closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn offers_created(&self) -> usize {
        self.offers.load(Ordering::SeqCst)
    }

    /// Makes the next `acquire` wait until the returned gate is notified.
    pub fn hold_acquisition(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock() = Some(gate.clone());
        gate
    }
}

#[async_trait]
impl MediaBackend for FakeBackend {
    async fn acquire(&self, constraints: MediaConstraints) -> Result<LocalMediaStream, MediaError> {
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.deny.load(Ordering::SeqCst) {
            return Err(MediaError::PermissionDenied);
        }
        let tracks = constraints
            .kinds()
            .into_iter()
            .map(|kind| LocalTrack::new(format!("{kind}-fake"), kind, self.ledger.lease()))
            .collect();
        Ok(LocalMediaStream::new(random_id(), tracks))
    }

    async fn negotiator(&self, _events: PeerEventSink) -> Result<Box<dyn Negotiator>, PeerError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeNegotiator {
            closed: self.closed.clone(),
            offers: self.offers.clone(),
        }))
    }

    fn held_tracks(&self) -> usize {
        self.ledger.held()
    }
}

struct FakeNegotiator {
    closed: Arc<AtomicUsize>,
    offers: Arc<AtomicUsize>,
}

#[async_trait]
impl Negotiator for FakeNegotiator {
    async fn create_offer(
        &mut self,
        _local: &LocalMediaStream,
    ) -> Result<SessionDescription, PeerError> {
        self.offers.fetch_add(1, Ordering::SeqCst);
        Ok(SessionDescription::offer(FAKE_SDP))
    }

    async fn create_answer(
        &mut self,
        _offer: &SessionDescription,
        _local: &LocalMediaStream,
    ) -> Result<SessionDescription, PeerError> {
        Ok(SessionDescription::answer(FAKE_SDP))
    }

    async fn apply_answer(&mut self, _answer: &SessionDescription) -> Result<(), PeerError> {
        Ok(())
    }

    async fn close(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Registry whose sessions live in a map. Unknown sessions read as not
/// connected, the way the portal answers 404.
#[derive(Default)]
pub struct FakeRegistry {
    next_ids: Mutex<VecDeque<String>>,
    connected: Mutex<HashMap<String, bool>>,
    unreachable: AtomicBool,
    ended: Mutex<Vec<String>>,
    parties: Mutex<Vec<Party>>,
}

impl FakeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id handed out by the next `create_call_session`.
    pub fn queue_session_id(&self, id: &str) {
        self.next_ids.lock().push_back(id.to_string());
    }

    /// Makes a session created elsewhere known and connected.
    pub fn register_session(&self, id: &str) {
        self.connected.lock().insert(id.to_string(), true);
    }

    pub fn set_connected(&self, id: &str, connected: bool) {
        self.connected.lock().insert(id.to_string(), connected);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn set_parties(&self, parties: Vec<Party>) {
        *self.parties.lock() = parties;
    }

    pub fn ended(&self) -> Vec<String> {
        self.ended.lock().clone()
    }

    fn check_reachable(&self) -> Result<(), RegistryError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(RegistryError::Http("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl CallRegistry for FakeRegistry {
    async fn create_call_session(
        &self,
        caller: &Party,
        callee: &Party,
    ) -> Result<CallSession, RegistryError> {
        self.check_reachable()?;
        let id = self.next_ids.lock().pop_front().unwrap_or_else(random_id);
        self.connected.lock().insert(id.clone(), true);
        Ok(CallSession::new(id, caller.id.clone(), callee.id.clone()))
    }

    async fn end_call_session(&self, session_id: &str) -> Result<(), RegistryError> {
        self.check_reachable()?;
        self.connected.lock().insert(session_id.to_string(), false);
        self.ended.lock().push(session_id.to_string());
        Ok(())
    }

    async fn check_call_status(&self, session_id: &str) -> Result<CallStatus, RegistryError> {
        self.check_reachable()?;
        let is_connected = self
            .connected
            .lock()
            .get(session_id)
            .copied()
            .unwrap_or(false);
        Ok(CallStatus { is_connected })
    }

    async fn list_available_parties(&self) -> Result<Vec<Party>, RegistryError> {
        self.check_reachable()?;
        Ok(self.parties.lock().clone())
    }
}

/// Signaling sink that records everything sent through it.
pub struct RecordingSender {
    sent: Mutex<Vec<SignalingMessage>>,
    ready: AtomicBool,
}

impl Default for RecordingSender {
    fn default() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            ready: AtomicBool::new(true),
        }
    }
}

impl RecordingSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SignalingMessage> {
        self.sent.lock().clone()
    }

    pub fn last(&self) -> Option<SignalingMessage> {
        self.sent.lock().last().cloned()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }
}

impl SignalSender for RecordingSender {
    fn send(&self, message: &SignalingMessage) -> Result<(), SignalingError> {
        if !self.ready.load(Ordering::SeqCst) {
            return Err(SignalingError::ChannelNotReady);
        }
        self.sent.lock().push(message.clone());
        Ok(())
    }
}
