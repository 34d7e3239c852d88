//! Production media backend on top of the `webrtc` crate.

use crate::logger::dump_selected_pair;
use crate::peer::ice::{analyze_candidates, to_rtc_ice_servers};
use crate::peer::media::{
    DeviceLedger, LocalMediaStream, LocalTrack, MediaBackend, MediaError, Negotiator, PeerEvent,
    PeerEventSink, RemoteMediaStream, RemoteTrack,
};
use crate::peer::types::{
    media_section_count, MediaConstraints, ServerConfig, SessionDescription, TrackKind,
};
use crate::peer::PeerError;
use crate::subscription::{Subscribers, Subscription};
use crate::utils::random_id;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Opus TOC byte plus padding for one 20 ms frame of silence.
const SILENCE_OPUS_FRAME: &[u8] = &[0xf8, 0xff, 0xfe];
const SILENCE_OPUS_PERIOD: Duration = Duration::from_millis(20);

/// 16x16 VP8 key frame header with an empty first partition. Decoders drop it;
/// it only keeps RTP flowing on an idle video track.
const PLACEHOLDER_VP8_FRAME: &[u8] = &[
    0x10, 0x02, 0x00, 0x9d, 0x01, 0x2a, 0x10, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];
const PLACEHOLDER_VP8_PERIOD: Duration = Duration::from_millis(100);

/// Outcome of the device permission prompt. A native process has no browser
/// prompt, so the answer is policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaPermission {
    #[default]
    Granted,
    Denied,
}

/// Handle a capture pipeline uses to feed a local track. Samples written while
/// the track is muted are discarded, so muting never renegotiates.
#[derive(Clone)]
pub struct TrackWriter {
    kind: TrackKind,
    track: Arc<TrackLocalStaticSample>,
    enabled: Arc<AtomicBool>,
}

impl TrackWriter {
    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    /// Returns `false` when the sample was dropped because the track is muted.
    pub async fn write_sample(&self, data: Bytes, duration: Duration) -> Result<bool, PeerError> {
        if !self.enabled.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.track
            .write_sample(&Sample {
                data,
                duration,
                ..Default::default()
            })
            .await?;
        Ok(true)
    }
}

pub struct RtcBackend {
    ice_servers: Vec<ServerConfig>,
    gathering_timeout: Duration,
    permission: MediaPermission,
    ledger: DeviceLedger,
    local_tracks: Subscribers<Vec<TrackWriter>>,
}

impl RtcBackend {
    pub fn new(
        ice_servers: Vec<ServerConfig>,
        gathering_timeout: Duration,
        permission: MediaPermission,
    ) -> Self {
        Self {
            ice_servers,
            gathering_timeout,
            permission,
            ledger: DeviceLedger::new(),
            local_tracks: Subscribers::new(),
        }
    }

    /// Called with the writers of every negotiation's local tracks once they
    /// are bound to the peer connection. Without any handler registered the
    /// backend feeds each track silence (audio) or placeholder frames (video)
    /// itself, so the remote side still receives every track.
    pub fn on_local_tracks<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&Vec<TrackWriter>) + Send + Sync + 'static,
    {
        self.local_tracks.subscribe(handler)
    }
}

#[async_trait]
impl MediaBackend for RtcBackend {
    async fn acquire(&self, constraints: MediaConstraints) -> Result<LocalMediaStream, MediaError> {
        if self.permission == MediaPermission::Denied {
            return Err(MediaError::PermissionDenied);
        }
        let kinds = constraints.kinds();
        if kinds.is_empty() {
            return Err(MediaError::DeviceUnavailable(
                "no audio or video requested".into(),
            ));
        }

        let tracks = kinds
            .into_iter()
            .map(|kind| LocalTrack::new(format!("{kind}-{}", random_id()), kind, self.ledger.lease()))
            .collect();
        Ok(LocalMediaStream::new(random_id(), tracks))
    }

    async fn negotiator(&self, events: PeerEventSink) -> Result<Box<dyn Negotiator>, PeerError> {
        let pc = new_peer(&self.ice_servers, events).await?;
        Ok(Box::new(RtcNegotiator {
            pc,
            gathering_timeout: self.gathering_timeout,
            local_tracks: self.local_tracks.clone(),
            writers: Vec::new(),
            fillers: Vec::new(),
        }))
    }

    fn held_tracks(&self) -> usize {
        self.ledger.held()
    }
}

/// Builds a peer connection and wires its callbacks to `events`.
async fn new_peer(
    ice_servers: &[ServerConfig],
    events: PeerEventSink,
) -> Result<Arc<RTCPeerConnection>, PeerError> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs()?;
    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();
    let pc = Arc::new(api.new_peer_connection(rtc_config(ice_servers)).await?);

    let collected: Arc<Mutex<Vec<RemoteTrack>>> = Arc::new(Mutex::new(Vec::new()));
    let fired = Arc::new(AtomicBool::new(false));
    let weak: Weak<RTCPeerConnection> = Arc::downgrade(&pc);
    let track_events = events.clone();
    pc.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
        let collected = collected.clone();
        let fired = fired.clone();
        let weak = weak.clone();
        let events = track_events.clone();
        Box::pin(async move {
            let kind = match track.kind() {
                RTPCodecType::Audio => TrackKind::Audio,
                RTPCodecType::Video => TrackKind::Video,
                _ => return,
            };
            let Some(pc) = weak.upgrade() else {
                return;
            };
            let expected = pc
                .remote_description()
                .await
                .map(|desc| media_section_count(&desc.sdp))
                .unwrap_or(1)
                .max(1);
            debug!(id = %track.id(), %kind, expected, "remote track");

            let complete = {
                let mut tracks = collected.lock();
                tracks.push(RemoteTrack {
                    id: track.id(),
                    kind,
                    rtc: Some(track.clone()),
                });
                if tracks.len() >= expected && !fired.swap(true, Ordering::SeqCst) {
                    Some(RemoteMediaStream {
                        tracks: tracks.clone(),
                    })
                } else {
                    None
                }
            };
            if let Some(stream) = complete {
                events(PeerEvent::RemoteStream(stream));
            }
        })
    }));

    pc.on_ice_gathering_state_change(Box::new(move |state| {
        debug!(?state, "ICE gathering state");
        Box::pin(async {})
    }));

    let weak: Weak<RTCPeerConnection> = Arc::downgrade(&pc);
    pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
        info!(state = ?st, "peer connection state");
        let weak = weak.clone();
        let events = events.clone();
        Box::pin(async move {
            if st != RTCPeerConnectionState::Failed {
                return;
            }
            if let Some(pc) = weak.upgrade() {
                dump_selected_pair(&pc, "BEFORE-FAIL").await;
            }
            events(PeerEvent::Failed("ICE connectivity failed".into()));
        })
    }));

    Ok(pc)
}

fn rtc_config(ice_servers: &[ServerConfig]) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: to_rtc_ice_servers(ice_servers),
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

fn codec_for(kind: TrackKind) -> RTCRtpCodecCapability {
    match kind {
        TrackKind::Audio => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            clock_rate: 48000,
            channels: 2,
            ..Default::default()
        },
        TrackKind::Video => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_owned(),
            clock_rate: 90000,
            ..Default::default()
        },
    }
}

/// Writes filler samples to `track` until aborted. Mute is not consulted:
/// the filler already carries no captured media.
fn spawn_filler(kind: TrackKind, track: Arc<TrackLocalStaticSample>) -> JoinHandle<()> {
    let (frame, period) = match kind {
        TrackKind::Audio => (SILENCE_OPUS_FRAME, SILENCE_OPUS_PERIOD),
        TrackKind::Video => (PLACEHOLDER_VP8_FRAME, PLACEHOLDER_VP8_PERIOD),
    };
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let sample = Sample {
                data: Bytes::from_static(frame),
                duration: period,
                ..Default::default()
            };
            if let Err(err) = track.write_sample(&sample).await {
                debug!(%kind, error = %err, "filler source stopped");
                return;
            }
        }
    })
}

pub struct RtcNegotiator {
    pc: Arc<RTCPeerConnection>,
    gathering_timeout: Duration,
    local_tracks: Subscribers<Vec<TrackWriter>>,
    writers: Vec<TrackWriter>,
    fillers: Vec<JoinHandle<()>>,
}

impl RtcNegotiator {
    async fn attach_local(&mut self, local: &LocalMediaStream) -> Result<(), PeerError> {
        for track in local.tracks().iter().filter(|t| t.is_live()) {
            let rtc = Arc::new(TrackLocalStaticSample::new(
                codec_for(track.kind()),
                track.id().to_owned(),
                local.id().to_owned(),
            ));
            self.pc
                .add_track(Arc::clone(&rtc) as Arc<dyn TrackLocal + Send + Sync>)
                .await?;
            self.writers.push(TrackWriter {
                kind: track.kind(),
                track: rtc,
                enabled: track.enabled_flag(),
            });
        }
        if self.local_tracks.is_empty() {
            debug!(tracks = self.writers.len(), "no capture pipeline, feeding filler samples");
            self.fillers = self
                .writers
                .iter()
                .map(|w| spawn_filler(w.kind, w.track.clone()))
                .collect();
        } else {
            self.local_tracks.emit(&self.writers);
        }
        Ok(())
    }

    fn stop_fillers(&mut self) {
        for filler in self.fillers.drain(..) {
            filler.abort();
        }
    }

    /// Sets the local description and waits for ICE gathering so the returned
    /// SDP already embeds every candidate.
    async fn settle_local(&self, desc: RTCSessionDescription) -> Result<String, PeerError> {
        let mut gathered: mpsc::Receiver<()> = self.pc.gathering_complete_promise().await;
        self.pc.set_local_description(desc).await?;
        if tokio::time::timeout(self.gathering_timeout, gathered.recv())
            .await
            .is_err()
        {
            warn!(
                timeout_secs = self.gathering_timeout.as_secs(),
                "ICE gathering timed out, sending collected candidates"
            );
        }

        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| PeerError::Negotiation("no local description".into()))?;
        analyze_candidates(&local.sdp);
        Ok(local.sdp)
    }
}

#[async_trait]
impl Negotiator for RtcNegotiator {
    async fn create_offer(
        &mut self,
        local: &LocalMediaStream,
    ) -> Result<SessionDescription, PeerError> {
        self.attach_local(local).await?;
        let offer = self.pc.create_offer(None).await?;
        let sdp = self.settle_local(offer).await?;
        Ok(SessionDescription::offer(sdp))
    }

    async fn create_answer(
        &mut self,
        offer: &SessionDescription,
        local: &LocalMediaStream,
    ) -> Result<SessionDescription, PeerError> {
        self.attach_local(local).await?;
        self.pc
            .set_remote_description(RTCSessionDescription::offer(offer.sdp.clone())?)
            .await?;
        let answer = self.pc.create_answer(None).await?;
        let sdp = self.settle_local(answer).await?;
        Ok(SessionDescription::answer(sdp))
    }

    async fn apply_answer(&mut self, answer: &SessionDescription) -> Result<(), PeerError> {
        self.pc
            .set_remote_description(RTCSessionDescription::answer(answer.sdp.clone())?)
            .await?;
        Ok(())
    }

    async fn close(&mut self) {
        self.stop_fillers();
        self.writers.clear();
        if let Err(err) = self.pc.close().await {
            warn!(error = %err, "closing peer connection");
        }
    }
}

impl Drop for RtcNegotiator {
    fn drop(&mut self) {
        self.stop_fillers();
    }
}
