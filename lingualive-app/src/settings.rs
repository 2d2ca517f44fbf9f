//! Persistent host settings (JSON file in the app data directory).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lingualive_core::{
    language::{find_language, LanguageCodes},
    EngineConfig, LanguagePair,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub api_key: Option<String>,
    pub languages: LanguageCodes,
    pub voice_name: String,
    pub model: String,
    pub endpoint: String,
    pub preferred_input_device: Option<String>,
    pub preferred_output_device: Option<String>,
    pub volume_gain: f32,
    pub idle_debounce_ms: u64,
    /// Credential taken from the environment. Never written to the file.
    #[serde(skip)]
    pub env_api_key: Option<String>,
}

impl Default for AppSettings {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            api_key: None,
            languages: engine.language_pair.into(),
            voice_name: engine.voice_name,
            model: engine.model,
            endpoint: engine.endpoint,
            preferred_input_device: None,
            preferred_output_device: None,
            volume_gain: engine.volume_gain,
            idle_debounce_ms: engine.idle_debounce.as_millis() as u64,
            env_api_key: None,
        }
    }
}

fn trimmed(value: &Option<String>) -> Option<String> {
    value
        .as_ref()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn or_default(value: &str, fallback: String) -> String {
    let value = value.trim();
    if value.is_empty() {
        fallback
    } else {
        value.to_string()
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        let defaults = Self::default();
        self.api_key = trimmed(&self.api_key);
        self.preferred_input_device = trimmed(&self.preferred_input_device);
        self.preferred_output_device = trimmed(&self.preferred_output_device);
        self.voice_name = or_default(&self.voice_name, defaults.voice_name);
        self.model = or_default(&self.model, defaults.model);
        self.endpoint = or_default(&self.endpoint, defaults.endpoint);

        let source = find_language(&self.languages.source);
        let target = find_language(&self.languages.target);
        self.languages = match (source, target) {
            (Some(s), Some(t)) if s.code != t.code => LanguagePair::new(s, t).into(),
            _ => defaults.languages,
        };

        if !self.volume_gain.is_finite() {
            self.volume_gain = defaults.volume_gain;
        }
        self.volume_gain = self.volume_gain.clamp(0.5, 20.0);
        self.idle_debounce_ms = self.idle_debounce_ms.min(10_000);
    }

    /// Normalized settings always carry a resolvable pair.
    pub fn language_pair(&self) -> LanguagePair {
        LanguagePair::from_codes(&self.languages.source, &self.languages.target)
            .unwrap_or_default()
    }

    /// Environment credential first, then the one from the file.
    pub fn effective_api_key(&self) -> Option<String> {
        self.env_api_key.clone().or_else(|| self.api_key.clone())
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            api_key: self.effective_api_key(),
            language_pair: self.language_pair(),
            voice_name: self.voice_name.clone(),
            model: self.model.clone(),
            endpoint: self.endpoint.clone(),
            volume_gain: self.volume_gain,
            idle_debounce: Duration::from_millis(self.idle_debounce_ms),
            preferred_input_device: self.preferred_input_device.clone(),
            preferred_output_device: self.preferred_output_device.clone(),
            ..EngineConfig::default()
        }
    }

    /// Credential from `GEMINI_API_KEY`, then `API_KEY`. Kept in
    /// `env_api_key`, so saving the settings never writes it out.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        self.env_api_key = ["GEMINI_API_KEY", "API_KEY"]
            .into_iter()
            .find_map(|name| trimmed(&lookup(name)));
    }
}

/// `LINGUALIVE_SETTINGS`, else the platform data directory.
pub fn default_settings_path() -> PathBuf {
    if let Some(path) = std::env::var_os("LINGUALIVE_SETTINGS").filter(|p| !p.is_empty()) {
        return PathBuf::from(path);
    }
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("LinguaLive")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("lingualive")
            .join("settings.json")
    }
}

/// Missing or corrupt files fall back to defaults, which are written back.
pub fn load_settings(path: &Path) -> AppSettings {
    let parsed = match fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str::<AppSettings>(&raw) {
            Ok(settings) => Some(settings),
            Err(e) => {
                warn!(path = ?path, "settings file is corrupt, using defaults: {e}");
                None
            }
        },
        Err(_) => None,
    };

    let rewrite = parsed.is_none();
    let mut settings = parsed.unwrap_or_default();
    settings.normalize();
    if rewrite {
        if let Err(e) = save_settings(path, &settings) {
            warn!(path = ?path, "failed to write default settings: {e}");
        }
    }
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("lingualive-settings-{}-{name}", std::process::id()))
            .join("settings.json")
    }

    #[test]
    fn normalize_cleans_values() {
        let mut s = AppSettings {
            api_key: Some("  ".into()),
            preferred_input_device: Some(" USB Mic ".into()),
            languages: LanguageCodes {
                source: "EN".into(),
                target: "xx".into(),
            },
            voice_name: String::new(),
            volume_gain: f32::NAN,
            ..AppSettings::default()
        };
        s.normalize();
        assert_eq!(s.api_key, None);
        assert_eq!(s.preferred_input_device.as_deref(), Some("USB Mic"));
        assert_eq!(s.languages, AppSettings::default().languages);
        assert_eq!(s.voice_name, "Puck");
        assert_eq!(s.volume_gain, 5.0);
    }

    #[test]
    fn same_language_twice_falls_back() {
        let mut s = AppSettings {
            languages: LanguageCodes {
                source: "de".into(),
                target: "DE".into(),
            },
            ..AppSettings::default()
        };
        s.normalize();
        assert_eq!(s.languages.source, "tr");
        assert_eq!(s.languages.target, "en");
    }

    #[test]
    fn env_key_wins_in_order() {
        let mut s = AppSettings {
            api_key: Some("from-file".into()),
            ..AppSettings::default()
        };
        s.apply_env_overrides(|name| match name {
            "GEMINI_API_KEY" => Some(" ".into()),
            "API_KEY" => Some("from-env".into()),
            _ => None,
        });
        assert_eq!(s.effective_api_key().as_deref(), Some("from-env"));
        assert_eq!(s.engine_config().api_key.as_deref(), Some("from-env"));
        assert_eq!(s.api_key.as_deref(), Some("from-file"));

        s.apply_env_overrides(|_| None);
        assert_eq!(s.effective_api_key().as_deref(), Some("from-file"));
    }

    #[test]
    fn engine_config_carries_settings() {
        let mut s = AppSettings {
            api_key: Some("k".into()),
            languages: LanguageCodes {
                source: "ja".into(),
                target: "fr".into(),
            },
            idle_debounce_ms: 250,
            ..AppSettings::default()
        };
        s.normalize();
        let config = s.engine_config();
        assert_eq!(config.language_pair.source.code, "ja");
        assert_eq!(config.idle_debounce, Duration::from_millis(250));
        assert_eq!(config.block_size, 4096);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn corrupt_file_is_replaced_with_defaults() {
        let path = scratch("corrupt");
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("dir");
        }
        fs::write(&path, "{ not json").expect("write");

        let loaded = load_settings(&path);
        assert_eq!(loaded, AppSettings::default());
        let rewritten: AppSettings =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("valid json");
        assert_eq!(rewritten, loaded);
        let _ = fs::remove_dir_all(path.parent().expect("parent"));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let path = scratch("partial");
        save_settings(&path, &AppSettings::default()).expect("save");
        fs::write(&path, r#"{"voiceName":"Kore","languages":{"source":"es","target":"en"}}"#)
            .expect("write");

        let loaded = load_settings(&path);
        assert_eq!(loaded.voice_name, "Kore");
        assert_eq!(loaded.languages.source, "es");
        assert_eq!(loaded.model, AppSettings::default().model);
        let _ = fs::remove_dir_all(path.parent().expect("parent"));
    }

    #[test]
    fn env_key_is_never_saved() {
        let path = scratch("env-key");
        let mut s = AppSettings::default();
        s.apply_env_overrides(|name| (name == "GEMINI_API_KEY").then(|| "env-only-secret".into()));
        save_settings(&path, &s).expect("save");

        let raw = fs::read_to_string(&path).expect("read");
        assert!(!raw.contains("env-only-secret"));
        assert_eq!(load_settings(&path).effective_api_key(), None);
        let _ = fs::remove_dir_all(path.parent().expect("parent"));
    }
}
