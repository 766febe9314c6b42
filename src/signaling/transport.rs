//! Transport-Vertrag für den Signaling-Bus
//!
//! Der eigentliche Pub/Sub-Transport ist extern. Eine Implementierung muss:
//! - Topics abonnieren und den Abo-Status melden (`Joining` → `Subscribed`)
//! - Text-Frames an alle *anderen* Abonnenten eines Topics verteilen
//! - Abmelden idempotent unterstützen

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignalingError {
    #[error("Signaling timeout: {topic} not confirmed within {after:?}")]
    Timeout { topic: String, after: Duration },

    #[error("Signaling channel error: {0}")]
    ChannelError(String),

    #[error("Signaling channel closed")]
    Closed,

    #[error("Failed to encode message: {0}")]
    Encode(String),
}

// ============================================================================
// CHANNEL STATUS
// ============================================================================

/// Abo-Status eines Topic-Kanals
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    Joining,
    Subscribed,
    ChannelError(String),
    TimedOut,
    Closed,
}

// ============================================================================
// TRANSPORT TRAITS
// ============================================================================

/// Sende- und Abmelde-Seite eines abonnierten Topics
#[async_trait]
pub trait ChannelLink: Send + Sync {
    /// Verteilt einen Frame an alle anderen Abonnenten des Topics
    async fn broadcast(&self, frame: String) -> Result<(), SignalingError>;

    /// Meldet das Abo ab. Mehrfacher Aufruf ist erlaubt.
    fn unsubscribe(&self);
}

/// Topic-basierter Broadcast-Bus
pub trait SignalingTransport: Send + Sync + 'static {
    /// Beginnt ein Topic zu abonnieren. Die Bestätigung kommt asynchron über
    /// [`TopicChannel::subscribed`].
    fn join(&self, topic: &str) -> TopicChannel;
}

/// Ein (noch nicht unbedingt bestätigtes) Abo auf ein Topic
pub struct TopicChannel {
    pub topic: String,
    pub link: Arc<dyn ChannelLink>,
    pub status: watch::Receiver<ChannelStatus>,
    pub frames: mpsc::UnboundedReceiver<String>,
}

impl TopicChannel {
    /// Wartet auf die Abo-Bestätigung, höchstens `timeout` lang
    pub async fn subscribed(&mut self, timeout: Duration) -> Result<(), SignalingError> {
        let outcome =
            tokio::time::timeout(timeout, self.status.wait_for(|s| *s != ChannelStatus::Joining))
                .await;

        let status = match outcome {
            Err(_) => {
                return Err(SignalingError::Timeout {
                    topic: self.topic.clone(),
                    after: timeout,
                })
            }
            Ok(Err(_)) => return Err(SignalingError::Closed),
            Ok(Ok(status)) => (*status).clone(),
        };

        match status {
            ChannelStatus::Subscribed => Ok(()),
            ChannelStatus::ChannelError(reason) => Err(SignalingError::ChannelError(reason)),
            ChannelStatus::TimedOut => Err(SignalingError::Timeout {
                topic: self.topic.clone(),
                after: timeout,
            }),
            ChannelStatus::Closed | ChannelStatus::Joining => Err(SignalingError::Closed),
        }
    }
}

impl std::fmt::Debug for TopicChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicChannel")
            .field("topic", &self.topic)
            .field("status", &*self.status.borrow())
            .finish()
    }
}
