//! Signaling Channel Manager
//!
//! Verwaltet die Topic-Abos eines Clients:
//! - Eingangskanal `calls:<self>` für die ganze Sitzung
//! - Ausgangskanal `calls:<peer>` für die Dauer eines Anrufs
//! - Einmal-Kanäle für einzelne Nachrichten (BUSY, Ablehnen ohne Anruf-Kanal)

use super::messages::{user_topic, SignalingMessage};
use super::transport::{ChannelLink, SignalingError, SignalingTransport, TopicChannel};
use crate::config::CallConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

// ============================================================================
// CHANNEL GUARD
// ============================================================================

/// Besitzt ein Topic-Abo und meldet es beim Drop ab
pub struct ChannelGuard {
    topic: String,
    link: Arc<dyn ChannelLink>,
    closed: AtomicBool,
}

impl ChannelGuard {
    fn new(topic: String, link: Arc<dyn ChannelLink>) -> Self {
        Self {
            topic,
            link,
            closed: AtomicBool::new(false),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn broadcast(&self, frame: String) -> Result<(), SignalingError> {
        if self.is_closed() {
            return Err(SignalingError::Closed);
        }
        self.link.broadcast(frame).await
    }

    /// Meldet das Abo ab (idempotent)
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!("Releasing channel {}", self.topic);
        self.link.unsubscribe();
    }
}

impl Drop for ChannelGuard {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ChannelGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelGuard")
            .field("topic", &self.topic)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Bestätigter Ausgangskanal zum Eingangs-Topic eines Peers
#[derive(Debug, Clone)]
pub struct OutboundChannel {
    pub peer_id: String,
    guard: Arc<ChannelGuard>,
}

impl OutboundChannel {
    pub fn topic(&self) -> &str {
        self.guard.topic()
    }

    pub fn is_closed(&self) -> bool {
        self.guard.is_closed()
    }
}

struct InboundChannel {
    self_id: String,
    guard: ChannelGuard,
    pump: JoinHandle<()>,
}

// ============================================================================
// CHANNEL MANAGER
// ============================================================================

pub struct ChannelManager {
    transport: Arc<dyn SignalingTransport>,
    topic_prefix: String,
    subscribe_timeout: Duration,
    one_off_grace: Duration,
    handler: mpsc::UnboundedSender<SignalingMessage>,
    inbound: Option<InboundChannel>,
    outbound: Option<Arc<ChannelGuard>>,
}

impl ChannelManager {
    /// Eingehende Nachrichten werden an `handler` weitergereicht
    pub fn new(
        transport: Arc<dyn SignalingTransport>,
        config: &CallConfig,
        handler: mpsc::UnboundedSender<SignalingMessage>,
    ) -> Self {
        Self {
            transport,
            topic_prefix: config.topic_prefix.clone(),
            subscribe_timeout: config.subscribe_timeout,
            one_off_grace: config.one_off_grace,
            handler,
            inbound: None,
            outbound: None,
        }
    }

    /// Abonniert `calls:<self_id>`. Ein zweiter Aufruf mit derselben ID
    /// ist ein No-op, eine andere ID ersetzt den alten Kanal.
    pub async fn open_inbound(&mut self, self_id: &str) -> Result<(), SignalingError> {
        if let Some(inbound) = &self.inbound {
            if inbound.self_id == self_id && !inbound.guard.is_closed() {
                return Ok(());
            }
        }
        self.close_inbound();

        let topic = user_topic(&self.topic_prefix, self_id);
        let mut channel = self.transport.join(&topic);
        let guard = ChannelGuard::new(topic.clone(), Arc::clone(&channel.link));
        channel.subscribed(self.subscribe_timeout).await?;

        let TopicChannel { frames, .. } = channel;
        let pump = tokio::spawn(pump_frames(
            self_id.to_string(),
            frames,
            self.handler.clone(),
        ));

        tracing::info!("Listening for calls on {}", topic);
        self.inbound = Some(InboundChannel {
            self_id: self_id.to_string(),
            guard,
            pump,
        });
        Ok(())
    }

    pub fn close_inbound(&mut self) {
        if let Some(inbound) = self.inbound.take() {
            inbound.pump.abort();
            inbound.guard.close();
        }
    }

    pub fn is_inbound_open(&self) -> bool {
        self.inbound
            .as_ref()
            .map(|inbound| !inbound.guard.is_closed())
            .unwrap_or(false)
    }

    /// Abonniert `calls:<peer_id>` und wartet auf die Bestätigung.
    /// Schlägt das fehl, ist das Abo bereits wieder abgemeldet.
    pub async fn open_outbound(&mut self, peer_id: &str) -> Result<OutboundChannel, SignalingError> {
        self.close_outbound();

        let topic = user_topic(&self.topic_prefix, peer_id);
        let mut channel = self.transport.join(&topic);
        let guard = ChannelGuard::new(topic.clone(), Arc::clone(&channel.link));

        if let Err(e) = channel.subscribed(self.subscribe_timeout).await {
            tracing::warn!("Outbound channel {} failed: {}", topic, e);
            return Err(e);
        }

        let guard = Arc::new(guard);
        self.outbound = Some(Arc::clone(&guard));
        tracing::debug!("Outbound channel {} ready", topic);

        Ok(OutboundChannel {
            peer_id: peer_id.to_string(),
            guard,
        })
    }

    /// Sendet über einen bestätigten Ausgangskanal
    pub async fn send(
        &self,
        channel: &OutboundChannel,
        message: &SignalingMessage,
    ) -> Result<(), SignalingError> {
        let frame = message
            .to_json()
            .map_err(|e| SignalingError::Encode(e.to_string()))?;
        tracing::debug!("-> {} {}", channel.topic(), message.event());
        channel.guard.broadcast(frame).await
    }

    /// Öffnet einen kurzlebigen Kanal, sendet eine Nachricht und gibt den
    /// Kanal nach einer kurzen Wartezeit wieder frei. Läuft im Hintergrund.
    pub fn send_one_off(
        &self,
        peer_id: &str,
        message: SignalingMessage,
    ) -> JoinHandle<Result<(), SignalingError>> {
        let transport = Arc::clone(&self.transport);
        let topic = user_topic(&self.topic_prefix, peer_id);
        let subscribe_timeout = self.subscribe_timeout;
        let grace = self.one_off_grace;

        tokio::spawn(async move {
            let frame = message
                .to_json()
                .map_err(|e| SignalingError::Encode(e.to_string()))?;

            let mut channel = transport.join(&topic);
            let guard = ChannelGuard::new(topic.clone(), Arc::clone(&channel.link));

            let result = match channel.subscribed(subscribe_timeout).await {
                Ok(()) => {
                    tracing::debug!("-> {} {} (one-off)", topic, message.event());
                    guard.broadcast(frame).await
                }
                Err(e) => Err(e),
            };

            if let Err(e) = &result {
                tracing::warn!("One-off {} to {} failed: {}", message.event(), topic, e);
            } else {
                tokio::time::sleep(grace).await;
            }
            drop(guard);
            result
        })
    }

    /// Meldet den aktuellen Ausgangskanal ab (idempotent)
    pub fn close_outbound(&mut self) {
        if let Some(guard) = self.outbound.take() {
            guard.close();
        }
    }

    pub fn has_outbound(&self) -> bool {
        self.outbound.is_some()
    }

    /// Schließt alle Kanäle
    pub fn close_all(&mut self) {
        self.close_outbound();
        self.close_inbound();
    }
}

impl Drop for ChannelManager {
    fn drop(&mut self) {
        self.close_all();
    }
}

impl std::fmt::Debug for ChannelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelManager")
            .field("topic_prefix", &self.topic_prefix)
            .field("inbound", &self.inbound.as_ref().map(|i| i.guard.topic()))
            .field("outbound", &self.outbound.as_ref().map(|g| g.topic()))
            .finish()
    }
}

/// Dekodiert eingehende Frames und reicht passende Nachrichten weiter
async fn pump_frames(
    self_id: String,
    mut frames: mpsc::UnboundedReceiver<String>,
    handler: mpsc::UnboundedSender<SignalingMessage>,
) {
    while let Some(frame) = frames.recv().await {
        let message = match SignalingMessage::from_json(&frame) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Dropping undecodable frame: {}", e);
                continue;
            }
        };

        if message.to() != self_id {
            tracing::warn!(
                "Dropping {} addressed to {} (listening as {})",
                message.event(),
                message.to(),
                self_id
            );
            continue;
        }

        tracing::debug!("<- {} from {}", message.event(), message.from());
        if handler.send(message).is_err() {
            break;
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
