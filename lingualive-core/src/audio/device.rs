//! Audio device enumeration and preference resolution.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Input,
    Output,
}

/// Metadata about one audio endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Name reported by the OS. Also the key used for preferences.
    pub name: String,
    pub kind: DeviceKind,
    pub is_default: bool,
    /// Best guess at the endpoint a speaker should use.
    pub is_recommended: bool,
}

/// Input names that usually capture system output rather than a voice.
const LOOPBACK_KEYWORDS: &[&str] = &[
    "stereo mix",
    "what u hear",
    "what you hear",
    "loopback",
    "monitor of",
    "wave out",
];

const MIC_KEYWORDS: &[&str] = &["microphone", "mic", "headset", "array", "usb", "webcam"];

pub fn is_loopback_like_name(name: &str) -> bool {
    let lowered = name.trim().to_ascii_lowercase();
    LOOPBACK_KEYWORDS.iter().any(|k| lowered.contains(k))
}

/// Higher is better. Loopback inputs sink to the bottom.
pub fn mic_preference_score(name: &str) -> i32 {
    let lowered = name.trim().to_ascii_lowercase();
    let mut score = if is_loopback_like_name(&lowered) { -16 } else { 8 };
    if MIC_KEYWORDS.iter().any(|k| lowered.contains(k)) {
        score += 6;
    }
    score
}

/// Choose among `names` the way the backends open devices: the preferred name
/// when present, else the default, else the first entry.
pub fn resolve_preferred<'a>(
    names: &'a [String],
    preferred: Option<&str>,
    default: Option<&str>,
) -> Option<&'a str> {
    if let Some(wanted) = preferred {
        if let Some(found) = names.iter().find(|n| n.as_str() == wanted) {
            return Some(found);
        }
        tracing::warn!(device = wanted, "preferred audio device not found, falling back");
    }
    if let Some(default) = default {
        if let Some(found) = names.iter().find(|n| n.as_str() == default) {
            return Some(found);
        }
    }
    names.first().map(String::as_str)
}

/// Mark the recommendation and order inputs best-first.
#[cfg_attr(not(feature = "audio-cpal"), allow(dead_code))]
fn rank_inputs(list: &mut [DeviceInfo]) {
    if let Some(best) = list
        .iter_mut()
        .max_by_key(|d| mic_preference_score(&d.name) + if d.is_default { 2 } else { 0 })
    {
        best.is_recommended = true;
    }
    list.sort_by_key(|d| (!d.is_recommended, !d.is_default, d.name.to_ascii_lowercase()));
}

#[cfg(feature = "audio-cpal")]
mod host {
    use cpal::traits::{DeviceTrait, HostTrait};

    use super::{rank_inputs, resolve_preferred, DeviceInfo, DeviceKind};
    use crate::error::{LiveError, Result};

    fn names<I: Iterator<Item = cpal::Device>>(devices: I) -> Vec<String> {
        devices
            .enumerate()
            .map(|(idx, d)| d.name().unwrap_or_else(|_| format!("Device {}", idx + 1)))
            .collect()
    }

    pub fn list_input_devices() -> Vec<DeviceInfo> {
        let host = cpal::default_host();
        let default = host.default_input_device().and_then(|d| d.name().ok());
        let found = match host.input_devices() {
            Ok(devices) => names(devices),
            Err(e) => {
                tracing::warn!("failed to enumerate input devices: {e}");
                default.iter().cloned().collect()
            }
        };
        let mut list: Vec<DeviceInfo> = found
            .into_iter()
            .map(|name| DeviceInfo {
                is_default: default.as_deref() == Some(name.as_str()),
                name,
                kind: DeviceKind::Input,
                is_recommended: false,
            })
            .collect();
        rank_inputs(&mut list);
        list
    }

    pub fn list_output_devices() -> Vec<DeviceInfo> {
        let host = cpal::default_host();
        let default = host.default_output_device().and_then(|d| d.name().ok());
        let found = match host.output_devices() {
            Ok(devices) => names(devices),
            Err(e) => {
                tracing::warn!("failed to enumerate output devices: {e}");
                default.iter().cloned().collect()
            }
        };
        found
            .into_iter()
            .map(|name| {
                let is_default = default.as_deref() == Some(name.as_str());
                DeviceInfo {
                    name,
                    kind: DeviceKind::Output,
                    is_default,
                    is_recommended: is_default,
                }
            })
            .collect()
    }

    fn pick(
        devices: Vec<cpal::Device>,
        default: Option<cpal::Device>,
        preferred: Option<&str>,
    ) -> Option<cpal::Device> {
        let default_name = default.as_ref().and_then(|d| d.name().ok());
        let listed: Vec<String> = devices
            .iter()
            .map(|d| d.name().unwrap_or_default())
            .collect();
        match resolve_preferred(&listed, preferred, default_name.as_deref()) {
            Some(chosen) => {
                let idx = listed.iter().position(|n| n == chosen)?;
                devices.into_iter().nth(idx)
            }
            None => default,
        }
    }

    /// Preferred name, then the default input, then the first input.
    pub fn open_input_device(preferred: Option<&str>) -> Result<cpal::Device> {
        let host = cpal::default_host();
        let devices: Vec<cpal::Device> = host
            .input_devices()
            .map(|d| d.collect())
            .unwrap_or_default();
        pick(devices, host.default_input_device(), preferred)
            .ok_or_else(|| LiveError::DeviceUnavailable("no input device available".into()))
    }

    /// Preferred name, then the default output, then the first output.
    pub fn open_output_device(preferred: Option<&str>) -> Result<cpal::Device> {
        let host = cpal::default_host();
        let devices: Vec<cpal::Device> = host
            .output_devices()
            .map(|d| d.collect())
            .unwrap_or_default();
        pick(devices, host.default_output_device(), preferred)
            .ok_or_else(|| LiveError::DeviceUnavailable("no output device available".into()))
    }
}

#[cfg(feature = "audio-cpal")]
pub use host::{list_input_devices, list_output_devices, open_input_device, open_output_device};

#[cfg(not(feature = "audio-cpal"))]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    vec![]
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_output_devices() -> Vec<DeviceInfo> {
    vec![]
}
