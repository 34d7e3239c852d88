//! Local and remote media streams plus the seams to the platform.
//!
//! Every local track holds a [`DeviceLease`] while it is live. Stopping the
//! track (or dropping it) gives the lease back, so the number of outstanding
//! leases is the number of devices this process still holds open.

use crate::peer::types::{MediaConstraints, SessionDescription, TrackKind};
use crate::peer::PeerError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use webrtc::track::track_remote::TrackRemote;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("permission to use camera/microphone was denied")]
    PermissionDenied,
    #[error("media device unavailable: {0}")]
    DeviceUnavailable(String),
}

/// Counts devices held open by live tracks.
#[derive(Debug, Clone, Default)]
pub struct DeviceLedger {
    held: Arc<AtomicUsize>,
}

impl DeviceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lease(&self) -> DeviceLease {
        self.held.fetch_add(1, Ordering::SeqCst);
        DeviceLease {
            held: self.held.clone(),
        }
    }

    pub fn held(&self) -> usize {
        self.held.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct DeviceLease {
    held: Arc<AtomicUsize>,
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        self.held.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct LocalTrack {
    id: String,
    kind: TrackKind,
    enabled: Arc<AtomicBool>,
    lease: Option<DeviceLease>,
}

impl LocalTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind, lease: DeviceLease) -> Self {
        Self {
            id: id.into(),
            kind,
            enabled: Arc::new(AtomicBool::new(true)),
            lease: Some(lease),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Flag shared with whatever writes samples for this track.
    pub fn enabled_flag(&self) -> Arc<AtomicBool> {
        self.enabled.clone()
    }

    pub fn is_live(&self) -> bool {
        self.lease.is_some()
    }

    pub fn stop(&mut self) {
        self.enabled.store(false, Ordering::SeqCst);
        self.lease.take();
    }
}

#[derive(Debug, Default)]
pub struct LocalMediaStream {
    id: String,
    tracks: Vec<LocalTrack>,
}

impl LocalMediaStream {
    pub fn new(id: impl Into<String>, tracks: Vec<LocalTrack>) -> Self {
        Self {
            id: id.into(),
            tracks,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }

    pub fn track(&self, kind: TrackKind) -> Option<&LocalTrack> {
        self.tracks.iter().find(|t| t.kind == kind)
    }

    /// Flips the enabled flag of the first live track of `kind` and returns the
    /// new value.
    pub fn toggle(&mut self, kind: TrackKind) -> Option<bool> {
        let track = self.tracks.iter().find(|t| t.kind == kind && t.is_live())?;
        let enabled = !track.enabled.load(Ordering::SeqCst);
        track.enabled.store(enabled, Ordering::SeqCst);
        Some(enabled)
    }

    pub fn live_tracks(&self) -> usize {
        self.tracks.iter().filter(|t| t.is_live()).count()
    }

    pub fn stop_all(&mut self) {
        for track in &mut self.tracks {
            track.stop();
        }
    }
}

#[derive(Clone)]
pub struct RemoteTrack {
    pub id: String,
    pub kind: TrackKind,
    pub rtc: Option<Arc<TrackRemote>>,
}

impl std::fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RemoteMediaStream {
    pub tracks: Vec<RemoteTrack>,
}

impl RemoteMediaStream {
    pub fn kinds(&self) -> Vec<TrackKind> {
        self.tracks.iter().map(|t| t.kind).collect()
    }
}

/// Events the negotiation primitive raises after setup.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// The remote track set is complete.
    RemoteStream(RemoteMediaStream),
    /// The transport failed and will not recover.
    Failed(String),
}

pub type PeerEventSink = Arc<dyn Fn(PeerEvent) + Send + Sync>;

/// One offer/answer negotiation. Implementations exchange complete
/// descriptions only; no incremental candidates leave the negotiator.
#[async_trait]
pub trait Negotiator: Send + Sync {
    async fn create_offer(
        &mut self,
        local: &LocalMediaStream,
    ) -> Result<SessionDescription, PeerError>;

    async fn create_answer(
        &mut self,
        offer: &SessionDescription,
        local: &LocalMediaStream,
    ) -> Result<SessionDescription, PeerError>;

    async fn apply_answer(&mut self, answer: &SessionDescription) -> Result<(), PeerError>;

    async fn close(&mut self);
}

/// Platform access: devices and negotiation primitives.
#[async_trait]
pub trait MediaBackend: Send + Sync {
    async fn acquire(&self, constraints: MediaConstraints) -> Result<LocalMediaStream, MediaError>;

    async fn negotiator(&self, events: PeerEventSink) -> Result<Box<dyn Negotiator>, PeerError>;

    /// Devices currently held open by tracks this backend handed out.
    fn held_tracks(&self) -> usize;
}
