//! Audio-Geräte
//!
//! Verwendet cpal, um Ein-/Ausgabegeräte aufzulisten und vor einem Anruf zu
//! prüfen, ob ein Mikrofon vorhanden ist.

use super::adapter::MediaError;
use cpal::traits::{DeviceTrait, HostTrait};
use cpal::SampleFormat;
use serde::Serialize;

/// Bevorzugte Sample Rate (48kHz wie Opus)
pub const PREFERRED_SAMPLE_RATE: u32 = 48000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AudioDevice {
    pub name: String,
    pub is_default: bool,
}

/// Das Standard-Mikrofon und seine gewählte Konfiguration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Microphone {
    pub name: String,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Listet Eingabe- und Ausgabegeräte des Standard-Hosts
pub fn list_audio_devices() -> Result<(Vec<AudioDevice>, Vec<AudioDevice>), MediaError> {
    let host = cpal::default_host();

    let default_input = host.default_input_device().and_then(|d| d.name().ok());
    let default_output = host.default_output_device().and_then(|d| d.name().ok());

    let inputs: Vec<String> = host
        .input_devices()
        .map_err(|e| MediaError::Device(e.to_string()))?
        .filter_map(|d| d.name().ok())
        .collect();
    let outputs: Vec<String> = host
        .output_devices()
        .map_err(|e| MediaError::Device(e.to_string()))?
        .filter_map(|d| d.name().ok())
        .collect();

    Ok((
        mark_default(inputs, default_input.as_deref()),
        mark_default(outputs, default_output.as_deref()),
    ))
}

/// Fehlt ein Eingabegerät, gilt das als verweigerter Zugriff
pub fn default_microphone() -> Result<Microphone, MediaError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| MediaError::AccessDenied("no audio input device found".to_string()))?;

    let name = device
        .name()
        .map_err(|e| MediaError::Device(e.to_string()))?;

    let ranges: Vec<RateRange> = device
        .supported_input_configs()
        .map_err(|e| MediaError::Device(e.to_string()))?
        .map(|c| RateRange {
            min: c.min_sample_rate().0,
            max: c.max_sample_rate().0,
            channels: c.channels(),
            float: c.sample_format() == SampleFormat::F32,
        })
        .collect();

    let (sample_rate, channels) = pick_input_config(&ranges).ok_or_else(|| {
        MediaError::Device(format!("{name}: no suitable audio configuration found"))
    })?;

    Ok(Microphone {
        name,
        sample_rate,
        channels,
    })
}

fn mark_default(names: Vec<String>, default: Option<&str>) -> Vec<AudioDevice> {
    names
        .into_iter()
        .map(|name| AudioDevice {
            is_default: Some(name.as_str()) == default,
            name,
        })
        .collect()
}

#[derive(Debug, Clone, Copy)]
struct RateRange {
    min: u32,
    max: u32,
    channels: u16,
    float: bool,
}

impl RateRange {
    fn contains(&self, rate: u32) -> bool {
        self.min <= rate && rate <= self.max
    }
}

/// Priorität: 48kHz F32 > F32 > erste verfügbare Konfiguration
fn pick_input_config(ranges: &[RateRange]) -> Option<(u32, u16)> {
    if let Some(r) = ranges
        .iter()
        .find(|r| r.float && r.contains(PREFERRED_SAMPLE_RATE))
    {
        return Some((PREFERRED_SAMPLE_RATE, r.channels));
    }
    if let Some(r) = ranges.iter().find(|r| r.float) {
        return Some((r.max, r.channels));
    }
    ranges.first().map(|r| {
        let rate = if r.contains(PREFERRED_SAMPLE_RATE) {
            PREFERRED_SAMPLE_RATE
        } else {
            r.max
        };
        (rate, r.channels)
    })
}

// ============================================================================
// TESTS
// ============================================================================
