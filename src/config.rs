//! Laufzeit-Konfiguration
//!
//! Standardwerte plus Überschreibung über Umgebungsvariablen:
//!
//! | Variable                      | Bedeutung                         | Standard |
//! |-------------------------------|-----------------------------------|----------|
//! | `CALL_MISSED_TIMEOUT_SECS`    | Klingeldauer bis MISSED           | 45       |
//! | `CALL_SUBSCRIBE_TIMEOUT_SECS` | Wartezeit auf Abo-Bestätigung     | 6        |
//! | `CALL_ONE_OFF_GRACE_MS`       | Haltezeit eines Einmal-Kanals     | 1000     |
//! | `CALL_TYPE`                   | `VIDEO` oder `AUDIO`              | VIDEO    |
//! | `CALL_TOPIC_PREFIX`           | Präfix der Benutzer-Topics        | calls    |

use crate::signaling::CallType;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_MISSED_CALL_TIMEOUT: Duration = Duration::from_secs(45);
pub const DEFAULT_SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(6);
pub const DEFAULT_ONE_OFF_GRACE: Duration = Duration::from_millis(1000);
pub const DEFAULT_TOPIC_PREFIX: &str = "calls";

#[derive(Debug, Clone, PartialEq)]
pub struct CallConfig {
    /// Nach dieser Zeit gilt ein unbeantworteter Anruf als verpasst
    pub missed_call_timeout: Duration,
    pub subscribe_timeout: Duration,
    pub one_off_grace: Duration,
    /// Art neuer ausgehender Anrufe
    pub call_type: CallType,
    pub topic_prefix: String,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            missed_call_timeout: DEFAULT_MISSED_CALL_TIMEOUT,
            subscribe_timeout: DEFAULT_SUBSCRIBE_TIMEOUT,
            one_off_grace: DEFAULT_ONE_OFF_GRACE,
            call_type: CallType::default(),
            topic_prefix: DEFAULT_TOPIC_PREFIX.to_string(),
        }
    }
}

impl CallConfig {
    /// Liest die Konfiguration aus der Umgebung
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Ungültige Werte werden mit einer Warnung ignoriert
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(secs) = parse_var::<u64, _>(&lookup, "CALL_MISSED_TIMEOUT_SECS") {
            config.missed_call_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "CALL_SUBSCRIBE_TIMEOUT_SECS") {
            config.subscribe_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "CALL_ONE_OFF_GRACE_MS") {
            config.one_off_grace = Duration::from_millis(ms);
        }
        if let Some(call_type) = parse_var::<CallType, _>(&lookup, "CALL_TYPE") {
            config.call_type = call_type;
        }
        if let Some(prefix) = lookup("CALL_TOPIC_PREFIX").filter(|p| !p.trim().is_empty()) {
            config.topic_prefix = prefix.trim().to_string();
        }

        config
    }

    pub fn with_call_type(mut self, call_type: CallType) -> Self {
        self.call_type = call_type;
        self
    }

    pub fn with_missed_call_timeout(mut self, timeout: Duration) -> Self {
        self.missed_call_timeout = timeout;
        self
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("Ignoring invalid {}={:?}: {}", key, raw, e);
            None
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
