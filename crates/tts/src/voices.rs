//! Voice selection
//!
//! When every listener of a language agrees on a voice, that voice wins.
//! Otherwise a deterministic default is chosen from the language table, so
//! the same deployment always speaks a language with the same voice.

use once_cell::sync::Lazy;
use std::collections::HashMap;

use speech_relay_core::LanguageTag;

static DEFAULT_VOICES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("en", "en-US-JennyNeural"),
        ("es", "es-ES-ElviraNeural"),
        ("fr", "fr-FR-DeniseNeural"),
        ("de", "de-DE-KatjaNeural"),
        ("it", "it-IT-ElsaNeural"),
        ("pt", "pt-BR-FranciscaNeural"),
        ("zh", "zh-CN-XiaoxiaoNeural"),
        ("ja", "ja-JP-NanamiNeural"),
        ("ko", "ko-KR-SunHiNeural"),
        ("ar", "ar-SA-ZariyahNeural"),
        ("hi", "hi-IN-SwaraNeural"),
        ("ru", "ru-RU-SvetlanaNeural"),
        ("nl", "nl-NL-ColetteNeural"),
        ("pl", "pl-PL-ZofiaNeural"),
        ("tr", "tr-TR-EmelNeural"),
    ])
});

const FALLBACK_VOICE: &str = "en-US-JennyNeural";

/// Deterministic default voice for a language.
pub fn default_voice(language: &LanguageTag) -> &'static str {
    DEFAULT_VOICES
        .get(language.primary())
        .copied()
        .unwrap_or(FALLBACK_VOICE)
}

/// Unanimous listener preference, else the language default.
pub fn select_voice<'a, I>(preferences: I, language: &LanguageTag) -> String
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    let mut unanimous: Option<&str> = None;
    for preference in preferences {
        match (preference, unanimous) {
            (Some(voice), None) => unanimous = Some(voice),
            (Some(voice), Some(seen)) if voice == seen => {}
            _ => return default_voice(language).to_string(),
        }
    }
    unanimous
        .map(str::to_string)
        .unwrap_or_else(|| default_voice(language).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lang(tag: &str) -> LanguageTag {
        LanguageTag::new(tag).unwrap()
    }

    #[test]
    fn test_default_by_primary_subtag() {
        assert_eq!(default_voice(&lang("es")), "es-ES-ElviraNeural");
        assert_eq!(default_voice(&lang("zh-hans")), "zh-CN-XiaoxiaoNeural");
        assert_eq!(default_voice(&lang("xx")), FALLBACK_VOICE);
    }

    #[test]
    fn test_unanimous_preference_wins() {
        let voice = select_voice([Some("es-MX-DaliaNeural"), Some("es-MX-DaliaNeural")], &lang("es"));
        assert_eq!(voice, "es-MX-DaliaNeural");
    }

    #[test]
    fn test_disagreement_falls_back_to_default() {
        let voice = select_voice([Some("es-MX-DaliaNeural"), Some("es-ES-AlvaroNeural")], &lang("es"));
        assert_eq!(voice, "es-ES-ElviraNeural");
    }

    #[test]
    fn test_missing_preference_falls_back_to_default() {
        let voice = select_voice([Some("es-MX-DaliaNeural"), None], &lang("es"));
        assert_eq!(voice, "es-ES-ElviraNeural");
        let voice = select_voice(std::iter::empty(), &lang("fr"));
        assert_eq!(voice, "fr-FR-DeniseNeural");
    }
}
