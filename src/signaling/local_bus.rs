//! In-Process Signaling-Bus
//!
//! Topic-basierter Broadcast-Bus im Speicher. Erfüllt den
//! [`SignalingTransport`]-Vertrag für Clients im selben Prozess (Demo, Tests).
//! Abo-Fehler lassen sich pro Topic simulieren.

use super::messages::SignalingMessage;
use super::transport::{ChannelLink, ChannelStatus, SignalingError, SignalingTransport, TopicChannel};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, watch};

/// Simulierter Fehler beim Abonnieren eines Topics
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinFault {
    /// Die Bestätigung kommt nie an
    NeverConfirm,
    /// Der Transport meldet einen Kanal-Fehler
    Reject(String),
}

/// Ein über den Bus verteilter Frame (für Inspektion)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedFrame {
    pub topic: String,
    pub frame: String,
}

struct Subscriber {
    id: u64,
    frames: mpsc::UnboundedSender<String>,
}

/// Wie viele Frames [`LocalBus::new`] zur Inspektion aufhebt
pub const DEFAULT_HISTORY_LIMIT: usize = 1024;

struct BusInner {
    next_id: u64,
    topics: HashMap<String, Vec<Subscriber>>,
    faults: HashMap<String, JoinFault>,
    // Die ältesten Frames fallen zuerst heraus
    published: VecDeque<PublishedFrame>,
    history_limit: usize,
}

/// In-Memory Broadcast-Bus
#[derive(Clone)]
pub struct LocalBus {
    inner: Arc<Mutex<BusInner>>,
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hebt höchstens `limit` gesendete Frames auf, `0` schaltet die
    /// Aufzeichnung ab
    pub fn with_history_limit(limit: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BusInner {
                next_id: 0,
                topics: HashMap::new(),
                faults: HashMap::new(),
                published: VecDeque::new(),
                history_limit: limit,
            })),
        }
    }

    /// Alle künftigen Abos auf `topic` schlagen wie angegeben fehl
    pub fn inject_join_fault(&self, topic: impl Into<String>, fault: JoinFault) {
        self.inner.lock().faults.insert(topic.into(), fault);
    }

    pub fn clear_join_fault(&self, topic: &str) {
        self.inner.lock().faults.remove(topic);
    }

    /// Anzahl aktiver Abos auf einem Topic
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .lock()
            .topics
            .get(topic)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }

    /// Die aufgehobenen, auf `topic` gesendeten Frames (älteste zuerst)
    pub fn published(&self, topic: &str) -> Vec<String> {
        self.inner
            .lock()
            .published
            .iter()
            .filter(|p| p.topic == topic)
            .map(|p| p.frame.clone())
            .collect()
    }

    /// Wie [`published`](Self::published), aber dekodiert
    pub fn published_messages(&self, topic: &str) -> Vec<SignalingMessage> {
        self.published(topic)
            .iter()
            .filter_map(|frame| SignalingMessage::from_json(frame).ok())
            .collect()
    }
}

impl SignalingTransport for LocalBus {
    fn join(&self, topic: &str) -> TopicChannel {
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ChannelStatus::Joining);

        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = inner.next_id;

        let registered = match inner.faults.get(topic).cloned() {
            Some(JoinFault::NeverConfirm) => {
                tracing::debug!("LocalBus: join on {} will never be confirmed", topic);
                false
            }
            Some(JoinFault::Reject(reason)) => {
                status_tx.send_replace(ChannelStatus::ChannelError(reason));
                false
            }
            None => {
                inner
                    .topics
                    .entry(topic.to_string())
                    .or_default()
                    .push(Subscriber {
                        id,
                        frames: frames_tx,
                    });
                status_tx.send_replace(ChannelStatus::Subscribed);
                true
            }
        };

        let link = LocalLink {
            bus: Arc::downgrade(&self.inner),
            topic: topic.to_string(),
            id,
            status: status_tx,
            active: AtomicBool::new(registered),
        };

        TopicChannel {
            topic: topic.to_string(),
            link: Arc::new(link),
            status: status_rx,
            frames: frames_rx,
        }
    }
}

impl std::fmt::Debug for LocalBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("LocalBus")
            .field("topics", &inner.topics.len())
            .field("published", &inner.published.len())
            .finish()
    }
}

// ============================================================================
// LINK
// ============================================================================

struct LocalLink {
    bus: Weak<Mutex<BusInner>>,
    topic: String,
    id: u64,
    // Hält den Status-Kanal offen, auch wenn das Abo nie bestätigt wird
    status: watch::Sender<ChannelStatus>,
    active: AtomicBool,
}

#[async_trait]
impl ChannelLink for LocalLink {
    async fn broadcast(&self, frame: String) -> Result<(), SignalingError> {
        if !self.active.load(Ordering::SeqCst) {
            return Err(SignalingError::Closed);
        }
        let bus = self.bus.upgrade().ok_or(SignalingError::Closed)?;
        let mut inner = bus.lock();

        if let Some(subscribers) = inner.topics.get(&self.topic) {
            for subscriber in subscribers.iter().filter(|s| s.id != self.id) {
                // Empfänger ohne Leser verwerfen den Frame still
                let _ = subscriber.frames.send(frame.clone());
            }
        }

        if inner.history_limit > 0 {
            if inner.published.len() >= inner.history_limit {
                inner.published.pop_front();
            }
            inner.published.push_back(PublishedFrame {
                topic: self.topic.clone(),
                frame,
            });
        }
        Ok(())
    }

    fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(bus) = self.bus.upgrade() {
            let mut inner = bus.lock();
            if let Some(subscribers) = inner.topics.get_mut(&self.topic) {
                subscribers.retain(|s| s.id != self.id);
                if subscribers.is_empty() {
                    inner.topics.remove(&self.topic);
                }
            }
        }
        self.status.send_replace(ChannelStatus::Closed);
    }
}

// ============================================================================
// TESTS
// ============================================================================
