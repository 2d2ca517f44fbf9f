//! Supported languages and the translator instruction built from a pair.

use serde::{Deserialize, Serialize};

use crate::error::{LiveError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Language {
    /// BCP-47 style code, e.g. `"tr"`.
    pub code: &'static str,
    /// English name, used in the system instruction.
    pub name: &'static str,
    pub native_name: &'static str,
    pub flag: &'static str,
}

const fn lang(
    code: &'static str,
    name: &'static str,
    native_name: &'static str,
    flag: &'static str,
) -> Language {
    Language {
        code,
        name,
        native_name,
        flag,
    }
}

/// Turkish and English first: they form the default pair.
pub const SUPPORTED_LANGUAGES: &[Language] = &[
    lang("tr", "Turkish", "Türkçe", "🇹🇷"),
    lang("en", "English", "English", "🇺🇸"),
    lang("es", "Spanish", "Español", "🇪🇸"),
    lang("fr", "French", "Français", "🇫🇷"),
    lang("de", "German", "Deutsch", "🇩🇪"),
    lang("it", "Italian", "Italiano", "🇮🇹"),
    lang("pt", "Portuguese", "Português", "🇵🇹"),
    lang("ru", "Russian", "Русский", "🇷🇺"),
    lang("ar", "Arabic", "العربية", "🇸🇦"),
    lang("hi", "Hindi", "हिन्दी", "🇮🇳"),
    lang("ja", "Japanese", "日本語", "🇯🇵"),
    lang("ko", "Korean", "한국어", "🇰🇷"),
    lang("zh", "Chinese", "中文", "🇨🇳"),
    lang("nl", "Dutch", "Nederlands", "🇳🇱"),
    lang("pl", "Polish", "Polski", "🇵🇱"),
];

/// Case-insensitive lookup by code.
pub fn find_language(code: &str) -> Option<Language> {
    let code = code.trim();
    SUPPORTED_LANGUAGES
        .iter()
        .find(|l| l.code.eq_ignore_ascii_case(code))
        .copied()
}

/// Source and target of a bidirectional translation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguagePair {
    pub source: Language,
    pub target: Language,
}

impl LanguagePair {
    pub fn new(source: Language, target: Language) -> Self {
        Self { source, target }
    }

    /// Resolve a pair from codes.
    ///
    /// # Errors
    /// `LiveError::Configuration` for an unknown code.
    pub fn from_codes(source: &str, target: &str) -> Result<Self> {
        let lookup = |code: &str| {
            find_language(code)
                .ok_or_else(|| LiveError::Configuration(format!("unsupported language '{code}'")))
        };
        Ok(Self::new(lookup(source)?, lookup(target)?))
    }

    /// Instruction that makes the remote model translate both ways and speak only the translation.
    pub fn system_instruction(&self) -> String {
        let (src, dst) = (self.source.name, self.target.name);
        format!(
            "You are a translator. Translate {src} to {dst} and {dst} to {src}. Just speak the translation."
        )
    }

    pub fn swapped(self) -> Self {
        Self::new(self.target, self.source)
    }

    /// `Türkçe ↔ English` style label.
    pub fn label(&self) -> String {
        format!("{} ↔ {}", self.source.native_name, self.target.native_name)
    }
}

impl Default for LanguagePair {
    fn default() -> Self {
        Self::new(SUPPORTED_LANGUAGES[0], SUPPORTED_LANGUAGES[1])
    }
}

/// Serialized form used in settings files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageCodes {
    pub source: String,
    pub target: String,
}

impl From<LanguagePair> for LanguageCodes {
    fn from(pair: LanguagePair) -> Self {
        Self {
            source: pair.source.code.to_string(),
            target: pair.target.code.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pair_is_turkish_to_english() {
        let pair = LanguagePair::default();
        assert_eq!(pair.source.code, "tr");
        assert_eq!(pair.target.code, "en");
    }

    #[test]
    fn instruction_names_both_directions() {
        assert_eq!(
            LanguagePair::default().system_instruction(),
            "You are a translator. Translate Turkish to English and English to Turkish. Just speak the translation."
        );
    }

    #[test]
    fn lookup_ignores_case_and_rejects_unknown() {
        assert_eq!(find_language(" DE ").map(|l| l.name), Some("German"));
        let err = LanguagePair::from_codes("en", "xx").unwrap_err();
        assert!(matches!(err, LiveError::Configuration(_)));
    }

    #[test]
    fn codes_round_trip_through_settings_form() {
        let pair = LanguagePair::from_codes("ja", "fr").expect("pair");
        let codes = LanguageCodes::from(pair.swapped());
        assert_eq!(codes.source, "fr");
        assert_eq!(
            LanguagePair::from_codes(&codes.source, &codes.target).expect("pair"),
            pair.swapped()
        );
    }

    #[test]
    fn codes_are_unique() {
        for (i, a) in SUPPORTED_LANGUAGES.iter().enumerate() {
            for b in &SUPPORTED_LANGUAGES[i + 1..] {
                assert_ne!(a.code, b.code);
            }
        }
    }
}
