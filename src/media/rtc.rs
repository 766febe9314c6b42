//! WebRTC Media Adapter
//!
//! Implementiert [`MediaSessionAdapter`] mit `webrtc-rs`:
//! - Peer Connections mit Standard-Codecs und Interceptors
//! - Lokale Tracks (Opus Audio, VP8 Video)
//! - Trickle ICE über [`MediaEvent::LocalIceCandidate`]
//!
//! Hinweis: Die Tracks werden nur ausgehandelt. Eine Capture-Pipeline, die
//! Samples in die Tracks schreibt, gibt es noch nicht. Deshalb ändert
//! `set_track_enabled` nur ein Flag und nicht, was tatsächlich gesendet wird.

use super::adapter::*;
use super::devices;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

const STREAM_ID: &str = "peer-call";

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebRtcConfig {
    pub ice_servers: Vec<String>,
    /// Ohne Eingabegerät schlägt `acquire_local_media` fehl
    pub require_microphone: bool,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            // Google STUN Server (kostenlos, für ~90% der Verbindungen)
            ice_servers: vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun1.l.google.com:19302".to_string(),
                "stun:stun2.l.google.com:19302".to_string(),
            ],
            require_microphone: true,
        }
    }
}

impl WebRtcConfig {
    /// Nur Host-Candidates, kein Mikrofon nötig (Demo, Tests)
    pub fn local() -> Self {
        Self {
            ice_servers: Vec::new(),
            require_microphone: false,
        }
    }

    fn rtc_ice_servers(&self) -> Vec<RTCIceServer> {
        if self.ice_servers.is_empty() {
            return Vec::new();
        }
        vec![RTCIceServer {
            urls: self.ice_servers.clone(),
            ..Default::default()
        }]
    }
}

// ============================================================================
// LOCAL MEDIA
// ============================================================================

struct LocalStream {
    audio: Arc<TrackLocalStaticSample>,
    video: Option<Arc<TrackLocalStaticSample>>,
    audio_enabled: bool,
    video_enabled: bool,
    session: Option<SessionHandle>,
}

fn audio_track() -> Arc<TrackLocalStaticSample> {
    Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_string(),
            clock_rate: 48000,
            channels: 2,
            ..Default::default()
        },
        "audio".to_string(),
        STREAM_ID.to_string(),
    ))
}

fn video_track(facing: CameraFacing) -> Arc<TrackLocalStaticSample> {
    let id = match facing {
        CameraFacing::User => "video-user",
        CameraFacing::Environment => "video-environment",
    };
    Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_string(),
            clock_rate: 90000,
            ..Default::default()
        },
        id.to_string(),
        STREAM_ID.to_string(),
    ))
}

fn negotiation(e: webrtc::Error) -> MediaError {
    MediaError::Negotiation(e.to_string())
}

// ============================================================================
// ADAPTER
// ============================================================================

pub struct WebRtcMediaAdapter {
    config: WebRtcConfig,
    next_id: AtomicU64,
    sessions: Mutex<HashMap<SessionHandle, Arc<RTCPeerConnection>>>,
    streams: Mutex<HashMap<MediaHandle, LocalStream>>,
    cameras: Mutex<HashMap<TrackHandle, Arc<TrackLocalStaticSample>>>,
}

impl WebRtcMediaAdapter {
    pub fn new(config: WebRtcConfig) -> Self {
        Self {
            config,
            next_id: AtomicU64::new(1),
            sessions: Mutex::new(HashMap::new()),
            streams: Mutex::new(HashMap::new()),
            cameras: Mutex::new(HashMap::new()),
        }
    }

    /// Anzahl offener Peer Connections
    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Angeforderte, aber noch nicht eingesetzte Kameras
    pub fn pending_camera_count(&self) -> usize {
        self.cameras.lock().len()
    }

    /// Ob ein Track senden darf. Die Flags werden nur hier geführt, eine
    /// Capture-Pipeline muss sie selbst beachten.
    pub fn is_track_enabled(&self, media: MediaHandle, kind: TrackKind) -> Option<bool> {
        let streams = self.streams.lock();
        let stream = streams.get(&media)?;
        match kind {
            TrackKind::Audio => Some(stream.audio_enabled),
            TrackKind::Video => stream.video.as_ref().map(|_| stream.video_enabled),
        }
    }

    /// Lokaler Track, in den eine Capture-Pipeline Samples schreiben kann
    pub fn local_track(
        &self,
        media: MediaHandle,
        kind: TrackKind,
    ) -> Option<Arc<TrackLocalStaticSample>> {
        let streams = self.streams.lock();
        let stream = streams.get(&media)?;
        match kind {
            TrackKind::Audio => Some(Arc::clone(&stream.audio)),
            TrackKind::Video => stream.video.clone(),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn connection(&self, session: SessionHandle) -> Result<Arc<RTCPeerConnection>, MediaError> {
        self.sessions
            .lock()
            .get(&session)
            .cloned()
            .ok_or(MediaError::UnknownSession(session))
    }

    /// Registriert Event Handler für die Peer Connection
    fn setup_handlers(
        pc: &RTCPeerConnection,
        session: SessionHandle,
        events: mpsc::UnboundedSender<MediaEvent>,
    ) {
        // Connection State Handler
        let state_tx = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            tracing::info!("{} connection state: {}", session, s);
            let _ = state_tx.send(MediaEvent::ConnectionState {
                session,
                state: s.to_string(),
            });
            Box::pin(async {})
        }));

        // ICE Candidate Handler
        let ice_tx = events.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            if let Some(c) = candidate {
                match c.to_json() {
                    Ok(init) => {
                        let _ = ice_tx.send(MediaEvent::LocalIceCandidate {
                            session,
                            candidate: from_rtc_candidate(init),
                        });
                    }
                    Err(e) => tracing::warn!("Failed to serialize ICE candidate: {}", e),
                }
            }
            Box::pin(async {})
        }));

        // Track Handler
        let track_tx = events;
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let kind = match track.kind() {
                    RTPCodecType::Video => TrackKind::Video,
                    _ => TrackKind::Audio,
                };
                tracing::info!("{} received {:?} track", session, kind);
                let _ = track_tx.send(MediaEvent::RemoteTrack {
                    session,
                    stream_id: track.stream_id(),
                    kind,
                });
                Box::pin(async {})
            },
        ));
    }
}

impl Default for WebRtcMediaAdapter {
    fn default() -> Self {
        Self::new(WebRtcConfig::default())
    }
}

impl std::fmt::Debug for WebRtcMediaAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebRtcMediaAdapter")
            .field("sessions", &self.sessions.lock().len())
            .field("streams", &self.streams.lock().len())
            .finish()
    }
}

#[async_trait]
impl MediaSessionAdapter for WebRtcMediaAdapter {
    async fn acquire_local_media(
        &self,
        constraints: MediaConstraints,
    ) -> Result<MediaHandle, MediaError> {
        if constraints.audio && self.config.require_microphone {
            let mic = devices::default_microphone()?;
            tracing::debug!("Using microphone {}", mic.name);
        }

        let stream = LocalStream {
            audio: audio_track(),
            video: constraints.video.then(|| video_track(constraints.facing)),
            audio_enabled: constraints.audio,
            video_enabled: constraints.video,
            session: None,
        };

        let handle = MediaHandle::new(self.next_id());
        self.streams.lock().insert(handle, stream);
        Ok(handle)
    }

    async fn acquire_camera(&self, facing: CameraFacing) -> Result<TrackHandle, MediaError> {
        let handle = TrackHandle::new(self.next_id());
        self.cameras.lock().insert(handle, video_track(facing));
        Ok(handle)
    }

    async fn create_session(
        &self,
        events: mpsc::UnboundedSender<MediaEvent>,
    ) -> Result<SessionHandle, MediaError> {
        // Media Engine mit Standard-Codecs
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(negotiation)?;

        // Interceptors für RTCP, NACK etc.
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(negotiation)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: self.config.rtc_ice_servers(),
            ..Default::default()
        };

        let pc = Arc::new(api.new_peer_connection(config).await.map_err(negotiation)?);
        let handle = SessionHandle::new(self.next_id());
        Self::setup_handlers(&pc, handle, events);

        self.sessions.lock().insert(handle, pc);
        tracing::debug!("Created {}", handle);
        Ok(handle)
    }

    async fn attach_local_media(
        &self,
        session: SessionHandle,
        media: MediaHandle,
    ) -> Result<(), MediaError> {
        let pc = self.connection(session)?;

        let tracks: Vec<Arc<TrackLocalStaticSample>> = {
            let mut streams = self.streams.lock();
            let stream = streams
                .get_mut(&media)
                .ok_or(MediaError::UnknownMedia(media))?;
            stream.session = Some(session);
            std::iter::once(Arc::clone(&stream.audio))
                .chain(stream.video.clone())
                .collect()
        };

        for track in tracks {
            pc.add_track(track as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(negotiation)?;
        }
        Ok(())
    }

    async fn create_offer(&self, session: SessionHandle) -> Result<SessionDescription, MediaError> {
        let pc = self.connection(session)?;
        let offer = pc.create_offer(None).await.map_err(negotiation)?;
        pc.set_local_description(offer.clone())
            .await
            .map_err(negotiation)?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(
        &self,
        session: SessionHandle,
    ) -> Result<SessionDescription, MediaError> {
        let pc = self.connection(session)?;
        let answer = pc.create_answer(None).await.map_err(negotiation)?;
        pc.set_local_description(answer.clone())
            .await
            .map_err(negotiation)?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn apply_remote_description(
        &self,
        session: SessionHandle,
        description: SessionDescription,
    ) -> Result<(), MediaError> {
        let pc = self.connection(session)?;
        let remote = match description.kind {
            SdpKind::Offer => RTCSessionDescription::offer(description.sdp),
            SdpKind::Answer => RTCSessionDescription::answer(description.sdp),
        }
        .map_err(|e| MediaError::InvalidSdp(e.to_string()))?;

        pc.set_remote_description(remote).await.map_err(negotiation)
    }

    async fn apply_ice_candidate(
        &self,
        session: SessionHandle,
        candidate: IceCandidate,
    ) -> Result<(), MediaError> {
        let pc = self.connection(session)?;
        pc.add_ice_candidate(to_rtc_candidate(candidate))
            .await
            .map_err(negotiation)
    }

    /// Die Kamera wird in jedem Fall aus dem Vorrat genommen: bei Erfolg
    /// wandert sie in den Stream, bei einem Fehler wird sie verworfen.
    async fn replace_video_track(
        &self,
        session: SessionHandle,
        media: MediaHandle,
        track: TrackHandle,
    ) -> Result<(), MediaError> {
        let camera = self
            .cameras
            .lock()
            .remove(&track)
            .ok_or_else(|| MediaError::Device(format!("unknown camera {track}")))?;
        let pc = self.connection(session)?;

        let mut replaced = false;
        for sender in pc.get_senders().await {
            let is_video = sender
                .track()
                .await
                .map(|t| t.kind() == RTPCodecType::Video)
                .unwrap_or(false);
            if is_video {
                sender
                    .replace_track(Some(Arc::clone(&camera) as Arc<dyn TrackLocal + Send + Sync>))
                    .await
                    .map_err(negotiation)?;
                replaced = true;
            }
        }

        if !replaced {
            return Err(MediaError::Negotiation(
                "session has no video sender".to_string(),
            ));
        }

        if let Some(stream) = self.streams.lock().get_mut(&media) {
            stream.video = Some(camera);
        }
        Ok(())
    }

    /// Setzt nur das Flag des Streams. Ohne Capture-Pipeline gehen ohnehin
    /// keine Samples über die Tracks; eine Pipeline muss das Flag vor dem
    /// Schreiben prüfen (siehe [`WebRtcMediaAdapter::is_track_enabled`]).
    fn set_track_enabled(
        &self,
        media: MediaHandle,
        kind: TrackKind,
        enabled: bool,
    ) -> Result<(), MediaError> {
        let mut streams = self.streams.lock();
        let stream = streams
            .get_mut(&media)
            .ok_or(MediaError::UnknownMedia(media))?;
        match kind {
            TrackKind::Audio => stream.audio_enabled = enabled,
            TrackKind::Video => stream.video_enabled = enabled,
        }
        Ok(())
    }

    async fn release(&self, session: SessionHandle) {
        let pc = self.sessions.lock().remove(&session);
        self.streams
            .lock()
            .retain(|_, stream| stream.session != Some(session));

        if let Some(pc) = pc {
            if let Err(e) = pc.close().await {
                tracing::warn!("Failed to close {}: {}", session, e);
            }
            tracing::debug!("Released {}", session);
        }
    }

    async fn release_media(&self, media: MediaHandle) {
        if self.streams.lock().remove(&media).is_some() {
            tracing::debug!("Released {}", media);
        }
    }

    async fn release_camera(&self, track: TrackHandle) {
        if self.cameras.lock().remove(&track).is_some() {
            tracing::debug!("Released {}", track);
        }
    }
}

// ============================================================================
// CONVERSIONS
// ============================================================================

fn to_rtc_candidate(candidate: IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_mline_index: candidate.sdp_mline_index,
        username_fragment: candidate.username_fragment,
    }
}

fn from_rtc_candidate(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

// ============================================================================
// TESTS
// ============================================================================
