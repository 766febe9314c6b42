//! Call Engine
//!
//! Öffentliches Handle auf die Zustandsmaschine eines Clients. Alle
//! Methoden schicken einen Befehl an den Maschinen-Task und warten auf
//! dessen Antwort. Zustandsänderungen kommen als [`CallEvent`].

use super::error::CallError;
use super::log::CallLogEmitter;
use super::machine::{CallMachine, Command, MachineInputs};
use super::session::{CallSnapshot, CallState};
use crate::config::CallConfig;
use crate::database::{CallLogStore, Profile, ProfileDirectory};
use crate::media::{CameraFacing, MediaSessionAdapter, RemoteStream};
use crate::signaling::{CallId, CallStatus, CallType, ChannelManager, SignalingTransport};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};

/// Events die von der CallEngine ausgelöst werden
#[derive(Debug, Clone)]
pub enum CallEvent {
    StateChanged(CallSnapshot),
    IncomingCall {
        call_id: CallId,
        peer_id: String,
        call_type: CallType,
        profile: Option<Profile>,
    },
    RemoteStream(RemoteStream),
    MediaToggled {
        audio_enabled: bool,
        video_enabled: bool,
    },
    /// `status` fehlt, wenn der Anruf vor dem Offer abgebrochen wurde
    CallEnded {
        call_id: CallId,
        peer_id: String,
        status: Option<CallStatus>,
        reason: Option<CallError>,
    },
}

/// Externe Dienste, mit denen die Engine arbeitet
#[derive(Clone)]
pub struct Collaborators {
    pub transport: Arc<dyn SignalingTransport>,
    pub media: Arc<dyn MediaSessionAdapter>,
    pub call_log: Arc<dyn CallLogStore>,
    pub profiles: Arc<dyn ProfileDirectory>,
}

// ============================================================================
// CALL ENGINE
// ============================================================================

#[derive(Clone)]
pub struct CallEngine {
    self_id: String,
    commands: mpsc::Sender<Command>,
    snapshot: Arc<Mutex<CallSnapshot>>,
    event_tx: broadcast::Sender<CallEvent>,
}

impl CallEngine {
    /// Öffnet den Eingangskanal von `self_id` und startet die Zustandsmaschine
    pub async fn start(
        self_id: impl Into<String>,
        config: CallConfig,
        collaborators: Collaborators,
    ) -> Result<Self, CallError> {
        let self_id = self_id.into();
        if self_id.trim().is_empty() {
            return Err(CallError::InvalidPeer(self_id));
        }

        let (command_tx, command_rx) = mpsc::channel(32);
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (media_tx, media_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(100);
        let snapshot = Arc::new(Mutex::new(CallSnapshot::idle()));

        let mut channels = ChannelManager::new(collaborators.transport, &config, signal_tx);
        channels.open_inbound(&self_id).await?;

        let machine = CallMachine::new(
            self_id.clone(),
            config,
            channels,
            collaborators.media,
            collaborators.profiles,
            CallLogEmitter::new(self_id.clone(), collaborators.call_log),
            Arc::clone(&snapshot),
            event_tx.clone(),
            media_tx,
            timer_tx,
        );
        tokio::spawn(machine.run(MachineInputs {
            commands: command_rx,
            signals: signal_rx,
            media: media_rx,
            timers: timer_rx,
        }));

        Ok(Self {
            self_id,
            commands: command_tx,
            snapshot,
            event_tx,
        })
    }

    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    /// Gibt einen Event-Receiver zurück
    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.event_tx.subscribe()
    }

    /// Gibt den aktuellen Call-Status zurück
    pub fn state(&self) -> CallState {
        self.snapshot.lock().state
    }

    pub fn snapshot(&self) -> CallSnapshot {
        self.snapshot.lock().clone()
    }

    /// Startet einen ausgehenden Anruf. Kehrt zurück, sobald das Offer
    /// gesendet ist.
    pub async fn start_call(
        &self,
        peer_id: impl Into<String>,
        call_type: Option<CallType>,
    ) -> Result<CallId, CallError> {
        let peer_id = peer_id.into();
        self.request(|reply| Command::StartCall {
            peer_id,
            call_type,
            reply,
        })
        .await
    }

    /// Nimmt den klingelnden Anruf an
    pub async fn accept_call(&self) -> Result<(), CallError> {
        self.request(|reply| Command::AcceptCall { reply }).await
    }

    /// Lehnt den klingelnden Anruf ab
    pub async fn reject_call(&self) -> Result<(), CallError> {
        self.request(|reply| Command::RejectCall { reply }).await
    }

    /// Beendet den aktuellen Anruf. Ohne Anruf ein No-op.
    pub async fn end_call(&self) -> Result<(), CallError> {
        self.request(|reply| Command::EndCall { reply }).await
    }

    /// Gibt den neuen Zustand des Mikrofons zurück
    pub async fn toggle_audio(&self) -> Result<bool, CallError> {
        self.request(|reply| Command::ToggleAudio { reply }).await
    }

    pub async fn toggle_video(&self) -> Result<bool, CallError> {
        self.request(|reply| Command::ToggleVideo { reply }).await
    }

    pub async fn switch_camera(&self) -> Result<CameraFacing, CallError> {
        self.request(|reply| Command::SwitchCamera { reply }).await
    }

    /// Beendet einen laufenden Anruf, schließt den Eingangskanal und stoppt
    /// die Zustandsmaschine
    pub async fn shutdown(&self) {
        let (reply, done) = oneshot::channel();
        if self.commands.send(Command::Shutdown { reply }).await.is_ok() {
            let _ = done.await;
        }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, CallError>>) -> Command,
    ) -> Result<T, CallError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| CallError::EngineStopped)?;
        response.await.map_err(|_| CallError::EngineStopped)?
    }
}

impl std::fmt::Debug for CallEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallEngine")
            .field("self_id", &self.self_id)
            .field("state", &self.state())
            .finish()
    }
}
