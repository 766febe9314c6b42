//! Call State Machine
//!
//! Ein Task pro Client. Lokale Befehle, eingehende Signaling-Nachrichten,
//! Media-Events und Timer-Abläufe werden nacheinander abgearbeitet. Nur
//! dieser Task besitzt Session, Ausgangskanal und Media-Handles.

use super::engine::CallEvent;
use super::error::CallError;
use super::log::CallLogEmitter;
use super::session::{
    CallDirection, CallPhase, CallSession, CallSnapshot, CallState, MissedCallTimer,
};
use crate::config::CallConfig;
use crate::database::ProfileDirectory;
use crate::media::{
    CameraFacing, MediaConstraints, MediaEvent, MediaSessionAdapter, RemoteStream, TrackKind,
};
use crate::signaling::{
    AnswerPayload, CallId, CallStatus, CallType, ChannelManager, EndCallPayload,
    IceCandidatePayload, OfferPayload, SignalingMessage,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};

type Reply<T> = oneshot::Sender<Result<T, CallError>>;

/// Befehle von der [`CallEngine`](super::CallEngine) an die Zustandsmaschine
pub(crate) enum Command {
    StartCall {
        peer_id: String,
        call_type: Option<CallType>,
        reply: Reply<CallId>,
    },
    AcceptCall {
        reply: Reply<()>,
    },
    RejectCall {
        reply: Reply<()>,
    },
    EndCall {
        reply: Reply<()>,
    },
    ToggleAudio {
        reply: Reply<bool>,
    },
    ToggleVideo {
        reply: Reply<bool>,
    },
    SwitchCamera {
        reply: Reply<CameraFacing>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Wie der Peer vom Ende erfährt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Notify {
    Silent,
    Outbound,
    OneOff,
    /// Ausgangskanal falls offen, sonst Einmal-Kanal
    OutboundOrOneOff,
}

struct Termination {
    /// `None`: kein END_CALL und kein Protokolleintrag
    status: Option<CallStatus>,
    notify: Notify,
    reason: Option<CallError>,
}

impl Termination {
    fn new(status: CallStatus, notify: Notify) -> Self {
        Self {
            status: Some(status),
            notify,
            reason: None,
        }
    }

    /// Abbruch vor dem Offer, hinterlässt nichts
    fn abort(reason: CallError) -> Self {
        Self {
            status: None,
            notify: Notify::Silent,
            reason: Some(reason),
        }
    }

    fn because(mut self, reason: CallError) -> Self {
        self.reason = Some(reason);
        self
    }
}

pub(crate) struct MachineInputs {
    pub commands: mpsc::Receiver<Command>,
    pub signals: mpsc::UnboundedReceiver<SignalingMessage>,
    pub media: mpsc::UnboundedReceiver<MediaEvent>,
    pub timers: mpsc::UnboundedReceiver<CallId>,
}

pub(crate) struct CallMachine {
    self_id: String,
    config: CallConfig,
    channels: ChannelManager,
    media: Arc<dyn MediaSessionAdapter>,
    profiles: Arc<dyn ProfileDirectory>,
    log: CallLogEmitter,
    session: Option<CallSession>,
    snapshot: Arc<Mutex<CallSnapshot>>,
    events: broadcast::Sender<CallEvent>,
    media_tx: mpsc::UnboundedSender<MediaEvent>,
    timer_tx: mpsc::UnboundedSender<CallId>,
}

impl CallMachine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        self_id: String,
        config: CallConfig,
        channels: ChannelManager,
        media: Arc<dyn MediaSessionAdapter>,
        profiles: Arc<dyn ProfileDirectory>,
        log: CallLogEmitter,
        snapshot: Arc<Mutex<CallSnapshot>>,
        events: broadcast::Sender<CallEvent>,
        media_tx: mpsc::UnboundedSender<MediaEvent>,
        timer_tx: mpsc::UnboundedSender<CallId>,
    ) -> Self {
        Self {
            self_id,
            config,
            channels,
            media,
            profiles,
            log,
            session: None,
            snapshot,
            events,
            media_tx,
            timer_tx,
        }
    }

    /// Event-Loop bis Shutdown oder bis alle Engine-Handles weg sind
    pub async fn run(mut self, mut inputs: MachineInputs) {
        tracing::info!("Call state machine for {} started", self.self_id);

        loop {
            tokio::select! {
                command = inputs.commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.shutdown().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
                Some(message) = inputs.signals.recv() => self.handle_signal(message).await,
                Some(event) = inputs.media.recv() => self.handle_media_event(event).await,
                Some(call_id) = inputs.timers.recv() => self.handle_missed_timer(call_id).await,
            }
        }

        tracing::info!("Call state machine for {} stopped", self.self_id);
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::StartCall {
                peer_id,
                call_type,
                reply,
            } => {
                let result = self.start_call(peer_id, call_type).await;
                let _ = reply.send(result);
            }
            Command::AcceptCall { reply } => {
                let result = self.accept_call().await;
                let _ = reply.send(result);
            }
            Command::RejectCall { reply } => {
                let result = self.reject_call().await;
                let _ = reply.send(result);
            }
            Command::EndCall { reply } => {
                self.end_call().await;
                let _ = reply.send(Ok(()));
            }
            Command::ToggleAudio { reply } => {
                let _ = reply.send(self.toggle(TrackKind::Audio));
            }
            Command::ToggleVideo { reply } => {
                let _ = reply.send(self.toggle(TrackKind::Video));
            }
            Command::SwitchCamera { reply } => {
                let result = self.switch_camera().await;
                let _ = reply.send(result);
            }
            // Wird in `run` behandelt
            Command::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    // ========================================================================
    // LOCAL COMMANDS
    // ========================================================================

    async fn start_call(
        &mut self,
        peer_id: String,
        call_type: Option<CallType>,
    ) -> Result<CallId, CallError> {
        if self.session.is_some() {
            return Err(CallError::AlreadyInCall);
        }
        let peer_id = peer_id.trim().to_string();
        if peer_id.is_empty() || peer_id == self.self_id {
            return Err(CallError::InvalidPeer(peer_id));
        }

        let call_id = CallId::new();
        let call_type = call_type.unwrap_or(self.config.call_type);
        let mut session = CallSession::outgoing(call_id, peer_id.clone(), call_type);
        session.missed_timer = Some(self.arm_timer(call_id));
        self.session = Some(session);
        self.publish();
        tracing::info!("Calling {} ({}, call {})", peer_id, call_type, call_id);

        // Erst der Kanal, dann die Geräte
        match self.channels.open_outbound(&peer_id).await {
            Ok(outbound) => {
                if let Some(session) = self.session.as_mut() {
                    session.outbound = Some(outbound);
                }
            }
            Err(e) => {
                let err = CallError::from(e);
                tracing::error!("Call to {} aborted: {}", peer_id, err);
                self.terminate(Termination::abort(err.clone())).await;
                return Err(err);
            }
        }

        if let Err(err) = self.negotiate_offer().await {
            tracing::error!("Call to {} failed: {}", peer_id, err);
            self.terminate(Termination::new(CallStatus::Missed, Notify::Silent).because(err.clone()))
                .await;
            return Err(err);
        }

        Ok(call_id)
    }

    async fn negotiate_offer(&mut self) -> Result<(), CallError> {
        let (call_type, facing) = {
            let session = self.session.as_ref().ok_or(CallError::NoActiveCall)?;
            (session.call_type, session.camera_facing)
        };

        let media = self
            .media
            .acquire_local_media(MediaConstraints {
                facing,
                ..MediaConstraints::for_call(call_type)
            })
            .await?;
        self.session_mut()?.local_media = Some(media);

        let handle = self.media.create_session(self.media_tx.clone()).await?;
        self.session_mut()?.media_session = Some(handle);

        self.media.attach_local_media(handle, media).await?;
        let offer = self.media.create_offer(handle).await?;

        let session = self.session.as_ref().ok_or(CallError::NoActiveCall)?;
        let outbound = session
            .outbound
            .clone()
            .ok_or_else(|| CallError::SignalingChannel("outbound channel missing".to_string()))?;
        let message = SignalingMessage::offer(
            &self.self_id,
            &session.peer_id,
            session.call_id,
            offer,
            session.call_type,
        );
        self.channels.send(&outbound, &message).await?;
        Ok(())
    }

    async fn accept_call(&mut self) -> Result<(), CallError> {
        let peer_id = match &mut self.session {
            Some(session) if matches!(session.phase, CallPhase::Incoming { .. }) => {
                session.disarm_timer();
                session.peer_id.clone()
            }
            _ => return Err(CallError::NoIncomingCall),
        };
        tracing::info!("Accepting call from {}", peer_id);

        match self.channels.open_outbound(&peer_id).await {
            Ok(outbound) => {
                if let Some(session) = self.session.as_mut() {
                    session.outbound = Some(outbound);
                }
            }
            Err(e) => {
                let err = CallError::from(e);
                tracing::error!("Accepting call from {} failed: {}", peer_id, err);
                self.terminate(Termination::new(CallStatus::Missed, Notify::OneOff).because(err.clone()))
                    .await;
                return Err(err);
            }
        }

        if let Err(err) = self.negotiate_answer().await {
            tracing::error!("Answering {} failed: {}", peer_id, err);
            self.terminate(Termination::new(CallStatus::Missed, Notify::Outbound).because(err.clone()))
                .await;
            return Err(err);
        }

        Ok(())
    }

    async fn negotiate_answer(&mut self) -> Result<(), CallError> {
        let (call_type, facing, audio_enabled, video_enabled, offer) = {
            let session = self.session.as_ref().ok_or(CallError::NoIncomingCall)?;
            let CallPhase::Incoming { offer } = &session.phase else {
                return Err(CallError::NoIncomingCall);
            };
            (
                session.call_type,
                session.camera_facing,
                session.audio_enabled,
                session.video_enabled,
                offer.clone(),
            )
        };

        let constraints = MediaConstraints {
            facing,
            ..MediaConstraints::for_call(call_type)
        };
        let media = self.media.acquire_local_media(constraints).await?;
        self.session_mut()?.local_media = Some(media);

        // Während des Klingelns umgeschaltete Tracks übernehmen
        if !audio_enabled {
            self.media.set_track_enabled(media, TrackKind::Audio, false)?;
        }
        if constraints.video && !video_enabled {
            self.media.set_track_enabled(media, TrackKind::Video, false)?;
        }

        let handle = self.media.create_session(self.media_tx.clone()).await?;
        self.session_mut()?.media_session = Some(handle);
        self.media.attach_local_media(handle, media).await?;

        self.media.apply_remote_description(handle, offer).await?;
        self.session_mut()?.remote_description_applied = true;
        self.flush_pending_candidates().await;

        let answer = self.media.create_answer(handle).await?;

        let session = self.session.as_ref().ok_or(CallError::NoIncomingCall)?;
        let outbound = session
            .outbound
            .clone()
            .ok_or_else(|| CallError::SignalingChannel("outbound channel missing".to_string()))?;
        let message = SignalingMessage::answer(
            &self.self_id,
            &session.peer_id,
            session.wire_call_id,
            answer,
        );
        self.channels.send(&outbound, &message).await?;

        self.session_mut()?.phase = CallPhase::Active;
        self.publish();
        tracing::info!("Call with {} active", message.to());
        Ok(())
    }

    async fn reject_call(&mut self) -> Result<(), CallError> {
        match self.session.as_ref().map(CallSession::state) {
            Some(CallState::Incoming) => {
                self.terminate(Termination::new(
                    CallStatus::Rejected,
                    Notify::OutboundOrOneOff,
                ))
                .await;
                Ok(())
            }
            _ => Err(CallError::NoIncomingCall),
        }
    }

    /// Idempotent: ohne Anruf passiert nichts
    async fn end_call(&mut self) {
        let termination = match self.session.as_ref().map(CallSession::state) {
            None | Some(CallState::Idle) => return,
            Some(CallState::Active) => Termination::new(CallStatus::Completed, Notify::Outbound),
            // Aufgelegt, bevor der Peer angenommen hat
            Some(CallState::Calling) => Termination::new(CallStatus::Missed, Notify::Outbound),
            Some(CallState::Incoming) => {
                Termination::new(CallStatus::Rejected, Notify::OutboundOrOneOff)
            }
        };
        self.terminate(termination).await;
    }

    fn toggle(&mut self, kind: TrackKind) -> Result<bool, CallError> {
        let session = self.session.as_mut().ok_or(CallError::NoActiveCall)?;
        let enabled = match kind {
            TrackKind::Audio => {
                session.audio_enabled = !session.audio_enabled;
                session.audio_enabled
            }
            TrackKind::Video => {
                session.video_enabled = !session.video_enabled;
                session.video_enabled
            }
        };

        if let Some(media) = session.local_media {
            if let Err(e) = self.media.set_track_enabled(media, kind, enabled) {
                tracing::warn!("Failed to toggle {:?} track: {}", kind, e);
            }
        }

        let (audio_enabled, video_enabled) = (session.audio_enabled, session.video_enabled);
        self.publish();
        let _ = self.events.send(CallEvent::MediaToggled {
            audio_enabled,
            video_enabled,
        });
        Ok(enabled)
    }

    async fn switch_camera(&mut self) -> Result<CameraFacing, CallError> {
        let session = self.session.as_ref().ok_or(CallError::NoActiveCall)?;
        if session.call_type == CallType::Audio {
            return Err(CallError::NoVideo);
        }
        let next = session.camera_facing.flipped();

        if let (Some(handle), Some(media)) = (session.media_session, session.local_media) {
            let track = self.media.acquire_camera(next).await?;
            if let Err(e) = self.media.replace_video_track(handle, media, track).await {
                self.media.release_camera(track).await;
                tracing::warn!("Camera switch to {:?} failed: {}", next, e);
                return Err(e.into());
            }
        }

        self.session_mut()?.camera_facing = next;
        self.publish();
        tracing::debug!("Camera switched to {:?}", next);
        Ok(next)
    }

    async fn shutdown(&mut self) {
        self.end_call().await;
        self.channels.close_all();
    }

    // ========================================================================
    // INBOUND SIGNALING
    // ========================================================================

    async fn handle_signal(&mut self, message: SignalingMessage) {
        match message {
            SignalingMessage::Offer(payload) => self.on_offer(payload),
            SignalingMessage::Answer(payload) => self.on_answer(payload).await,
            SignalingMessage::IceCandidate(payload) => self.on_ice_candidate(payload).await,
            SignalingMessage::EndCall(payload) => self.on_end_call(payload).await,
        }
    }

    fn on_offer(&mut self, payload: OfferPayload) {
        let from = payload.from.clone();

        if let Some(session) = &self.session {
            // Zustellung ist at-least-once
            if session.peer_id == from
                && session.direction == CallDirection::Callee
                && payload.call_id == session.wire_call_id
            {
                tracing::debug!("Ignoring repeated offer from {}", from);
                return;
            }

            tracing::warn!(
                "Busy ({:?} with {}), rejecting offer from {}",
                session.state(),
                session.peer_id,
                from
            );
            let busy = SignalingMessage::end_call(&self.self_id, &from, payload.call_id, CallStatus::Busy);
            drop(self.channels.send_one_off(&from, busy));
            return;
        }

        if from == self.self_id {
            tracing::warn!("Ignoring offer from ourselves");
            return;
        }

        let call_type = payload.call_type.unwrap_or_default();
        let mut session = CallSession::incoming(payload.call_id, from.clone(), call_type, payload.offer);
        session.peer_profile = match self.profiles.lookup_profile(&from) {
            Ok(profile) => Some(profile),
            Err(e) => {
                tracing::warn!("Profile lookup for {} failed: {}", from, e);
                None
            }
        };
        session.missed_timer = Some(self.arm_timer(session.call_id));

        let event = CallEvent::IncomingCall {
            call_id: session.call_id,
            peer_id: from.clone(),
            call_type,
            profile: session.peer_profile.clone(),
        };
        self.session = Some(session);
        self.publish();
        let _ = self.events.send(event);
        tracing::info!("Incoming {} call from {}", call_type, from);
    }

    async fn on_answer(&mut self, payload: AnswerPayload) {
        let handle = match &mut self.session {
            Some(session) if session.matches(&payload.from, payload.call_id) => {
                if !matches!(session.phase, CallPhase::Calling) {
                    tracing::debug!("Ignoring answer from {} outside CALLING", payload.from);
                    return;
                }
                let Some(handle) = session.media_session else {
                    tracing::warn!("Answer from {} before offer was sent", payload.from);
                    return;
                };
                session.disarm_timer();
                handle
            }
            _ => {
                tracing::warn!("Ignoring stray answer from {}", payload.from);
                return;
            }
        };

        if let Err(e) = self.media.apply_remote_description(handle, payload.answer).await {
            let err = CallError::from(e);
            tracing::error!("Applying answer from {} failed: {}", payload.from, err);
            self.terminate(Termination::new(CallStatus::Missed, Notify::Outbound).because(err))
                .await;
            return;
        }

        if let Some(session) = self.session.as_mut() {
            session.remote_description_applied = true;
            session.phase = CallPhase::Active;
        }
        self.flush_pending_candidates().await;
        self.publish();
        tracing::info!("Call with {} active", payload.from);
    }

    async fn on_ice_candidate(&mut self, payload: IceCandidatePayload) {
        let Some(session) = self.session.as_mut() else {
            tracing::debug!("Ignoring ICE candidate from {} while idle", payload.from);
            return;
        };
        if !session.matches(&payload.from, payload.call_id) {
            tracing::warn!("Ignoring ICE candidate from {}", payload.from);
            return;
        }

        match session.media_session {
            Some(handle) if session.remote_description_applied => {
                if let Err(e) = self.media.apply_ice_candidate(handle, payload.candidate).await {
                    tracing::warn!("Dropping ICE candidate from {}: {}", payload.from, e);
                }
            }
            _ => session.pending_candidates.push(payload.candidate),
        }
    }

    async fn on_end_call(&mut self, payload: EndCallPayload) {
        let Some(session) = &self.session else {
            tracing::debug!("Ignoring end-call from {} while idle", payload.from);
            return;
        };
        if !session.matches(&payload.from, payload.call_id) {
            tracing::warn!("Ignoring stale end-call from {}", payload.from);
            return;
        }

        let peer = payload.from;
        let termination = match session.phase {
            CallPhase::Calling => {
                let (status, reason) = match payload.status {
                    Some(CallStatus::Busy) => (CallStatus::Busy, CallError::PeerBusy(peer)),
                    Some(CallStatus::Missed) => (CallStatus::Missed, CallError::RemoteHangup(peer)),
                    _ => (CallStatus::Rejected, CallError::RemoteHangup(peer)),
                };
                Termination::new(status, Notify::Silent).because(reason)
            }
            // Anrufer hat aufgegeben
            CallPhase::Incoming { .. } => Termination::new(
                payload.status.unwrap_or(CallStatus::Missed),
                Notify::Silent,
            )
            .because(CallError::RemoteHangup(peer)),
            CallPhase::Active => Termination::new(CallStatus::Completed, Notify::Silent)
                .because(CallError::RemoteHangup(peer)),
        };
        self.terminate(termination).await;
    }

    // ========================================================================
    // MEDIA EVENTS & TIMERS
    // ========================================================================

    async fn handle_media_event(&mut self, event: MediaEvent) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.media_session != Some(event.session()) {
            tracing::debug!("Ignoring event of released {}", event.session());
            return;
        }

        match event {
            MediaEvent::LocalIceCandidate { candidate, .. } => {
                let Some(outbound) = session.outbound.clone() else {
                    tracing::debug!("No outbound channel for local ICE candidate");
                    return;
                };
                let message = SignalingMessage::ice_candidate(
                    &self.self_id,
                    &session.peer_id,
                    session.wire_call_id,
                    candidate,
                );
                if let Err(e) = self.channels.send(&outbound, &message).await {
                    tracing::warn!("Failed to send ICE candidate: {}", e);
                }
            }
            MediaEvent::RemoteTrack {
                stream_id, kind, ..
            } => {
                let stream = session.remote_stream.get_or_insert_with(|| RemoteStream {
                    stream_id,
                    tracks: Vec::new(),
                });
                if !stream.tracks.contains(&kind) {
                    stream.tracks.push(kind);
                }
                let stream = stream.clone();
                self.publish();
                let _ = self.events.send(CallEvent::RemoteStream(stream));
            }
            MediaEvent::ConnectionState { session, state } => {
                tracing::debug!("{} is {}", session, state);
            }
        }
    }

    async fn handle_missed_timer(&mut self, call_id: CallId) {
        let termination = match &self.session {
            Some(session) if session.call_id == call_id => match session.phase {
                CallPhase::Calling => Termination::new(CallStatus::Missed, Notify::Outbound),
                CallPhase::Incoming { .. } => Termination::new(CallStatus::Missed, Notify::OneOff),
                CallPhase::Active => return,
            },
            _ => {
                tracing::debug!("Ignoring late timer for call {}", call_id);
                return;
            }
        };
        tracing::info!("Call {} missed", call_id);
        self.terminate(termination).await;
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    fn session_mut(&mut self) -> Result<&mut CallSession, CallError> {
        self.session.as_mut().ok_or(CallError::NoActiveCall)
    }

    fn arm_timer(&self, call_id: CallId) -> MissedCallTimer {
        MissedCallTimer::arm(self.config.missed_call_timeout, self.timer_tx.clone(), call_id)
    }

    async fn flush_pending_candidates(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let Some(handle) = session.media_session else {
            return;
        };
        let pending = std::mem::take(&mut session.pending_candidates);
        for candidate in pending {
            if let Err(e) = self.media.apply_ice_candidate(handle, candidate).await {
                tracing::warn!("Dropping buffered ICE candidate: {}", e);
            }
        }
    }

    /// Beendet die Session: Peer benachrichtigen, protokollieren, Medien
    /// freigeben, Ausgangskanal schließen. Ohne Session ein No-op.
    async fn terminate(&mut self, termination: Termination) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        session.disarm_timer();

        if let Some(status) = termination.status {
            self.notify_peer(&session, status, termination.notify).await;
            self.log.emit(&session, status);
        }

        if let Some(handle) = session.media_session.take() {
            self.media.release(handle).await;
        }
        if let Some(media) = session.local_media.take() {
            self.media.release_media(media).await;
        }
        session.outbound = None;
        self.channels.close_outbound();

        self.publish();
        tracing::info!(
            "Call {} with {} ended ({})",
            session.call_id,
            session.peer_id,
            termination
                .status
                .map(|s| s.as_str())
                .unwrap_or("aborted")
        );
        let _ = self.events.send(CallEvent::CallEnded {
            call_id: session.call_id,
            peer_id: session.peer_id,
            status: termination.status,
            reason: termination.reason,
        });
    }

    async fn notify_peer(&self, session: &CallSession, status: CallStatus, notify: Notify) {
        if notify == Notify::Silent {
            return;
        }
        let message =
            SignalingMessage::end_call(&self.self_id, &session.peer_id, session.wire_call_id, status);

        match (notify, &session.outbound) {
            (Notify::Outbound | Notify::OutboundOrOneOff, Some(outbound)) => {
                if let Err(e) = self.channels.send(outbound, &message).await {
                    tracing::warn!("Failed to send end-call to {}: {}", session.peer_id, e);
                }
            }
            (Notify::OneOff | Notify::OutboundOrOneOff, _) => {
                drop(self.channels.send_one_off(&session.peer_id, message));
            }
            _ => tracing::warn!("No channel to notify {} of {}", session.peer_id, status),
        }
    }

    fn publish(&self) {
        let snapshot = self
            .session
            .as_ref()
            .map(CallSnapshot::from_session)
            .unwrap_or_else(CallSnapshot::idle);

        {
            let mut current = self.snapshot.lock();
            if *current == snapshot {
                return;
            }
            *current = snapshot.clone();
        }
        let _ = self.events.send(CallEvent::StateChanged(snapshot));
    }
}
