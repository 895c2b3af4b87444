//! Script-based language guess and the table of supported language tags.
//! The guess is a cheap pre-filter: it only answers for scripts that pin down
//! a language, and leaves Latin-script text to the provider's detector.

use std::sync::LazyLock;

use regex::Regex;

/// Sentinel tag meaning "let the provider decide".
pub const AUTO: &str = "auto";

/// Checked in order; the first script present in the text wins.
/// Kana comes before Han so mixed kanji/kana text resolves to Japanese.
static SCRIPT_RULES: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        ("ja", r"[\x{3040}-\x{309F}\x{30A0}-\x{30FF}]"),
        ("zh", r"[\x{4E00}-\x{9FFF}\x{3400}-\x{4DBF}]"),
        ("ko", r"[\x{AC00}-\x{D7AF}\x{1100}-\x{11FF}]"),
        ("ar", r"[\x{0600}-\x{06FF}]"),
        ("ru", r"[\x{0400}-\x{04FF}]"),
        ("hi", r"[\x{0900}-\x{097F}]"),
        ("th", r"[\x{0E00}-\x{0E7F}]"),
        ("el", r"[\x{0370}-\x{03FF}]"),
        ("he", r"[\x{0590}-\x{05FF}]"),
    ]
    .into_iter()
    .filter_map(|(tag, pattern)| Regex::new(pattern).ok().map(|re| (tag, re)))
    .collect()
});

/// Best-guess language tag for `text`, or [`AUTO`] when no diagnostic script is present.
pub fn guess_language(text: &str) -> &'static str {
    if text.trim().is_empty() {
        return AUTO;
    }
    SCRIPT_RULES
        .iter()
        .find(|(_, re)| re.is_match(text))
        .map(|(tag, _)| *tag)
        .unwrap_or(AUTO)
}

/// `(tag, English name)` for every language the providers accept.
pub const LANGUAGES: &[(&str, &str)] = &[
    ("auto", "Auto-detect"),
    ("af", "Afrikaans"),
    ("sq", "Albanian"),
    ("am", "Amharic"),
    ("ar", "Arabic"),
    ("hy", "Armenian"),
    ("az", "Azerbaijani"),
    ("eu", "Basque"),
    ("be", "Belarusian"),
    ("bn", "Bengali"),
    ("bs", "Bosnian"),
    ("bg", "Bulgarian"),
    ("ca", "Catalan"),
    ("ceb", "Cebuano"),
    ("ny", "Chichewa"),
    ("zh", "Chinese (Simplified)"),
    ("zh-TW", "Chinese (Traditional)"),
    ("co", "Corsican"),
    ("hr", "Croatian"),
    ("cs", "Czech"),
    ("da", "Danish"),
    ("nl", "Dutch"),
    ("en", "English"),
    ("eo", "Esperanto"),
    ("et", "Estonian"),
    ("tl", "Filipino"),
    ("fi", "Finnish"),
    ("fr", "French"),
    ("fy", "Frisian"),
    ("gl", "Galician"),
    ("ka", "Georgian"),
    ("de", "German"),
    ("el", "Greek"),
    ("gu", "Gujarati"),
    ("ht", "Haitian Creole"),
    ("ha", "Hausa"),
    ("haw", "Hawaiian"),
    ("iw", "Hebrew"),
    ("he", "Hebrew"),
    ("hi", "Hindi"),
    ("hmn", "Hmong"),
    ("hu", "Hungarian"),
    ("is", "Icelandic"),
    ("ig", "Igbo"),
    ("id", "Indonesian"),
    ("ga", "Irish"),
    ("it", "Italian"),
    ("ja", "Japanese"),
    ("jw", "Javanese"),
    ("kn", "Kannada"),
    ("kk", "Kazakh"),
    ("km", "Khmer"),
    ("ko", "Korean"),
    ("ku", "Kurdish (Kurmanji)"),
    ("ky", "Kyrgyz"),
    ("lo", "Lao"),
    ("la", "Latin"),
    ("lv", "Latvian"),
    ("lt", "Lithuanian"),
    ("lb", "Luxembourgish"),
    ("mk", "Macedonian"),
    ("mg", "Malagasy"),
    ("ms", "Malay"),
    ("ml", "Malayalam"),
    ("mt", "Maltese"),
    ("mi", "Maori"),
    ("mr", "Marathi"),
    ("mn", "Mongolian"),
    ("my", "Myanmar (Burmese)"),
    ("ne", "Nepali"),
    ("no", "Norwegian"),
    ("or", "Odia"),
    ("ps", "Pashto"),
    ("fa", "Persian"),
    ("pl", "Polish"),
    ("pt", "Portuguese"),
    ("pa", "Punjabi"),
    ("ro", "Romanian"),
    ("ru", "Russian"),
    ("sm", "Samoan"),
    ("gd", "Scots Gaelic"),
    ("sr", "Serbian"),
    ("st", "Sesotho"),
    ("sn", "Shona"),
    ("sd", "Sindhi"),
    ("si", "Sinhala"),
    ("sk", "Slovak"),
    ("sl", "Slovenian"),
    ("so", "Somali"),
    ("es", "Spanish"),
    ("su", "Sundanese"),
    ("sw", "Swahili"),
    ("sv", "Swedish"),
    ("tg", "Tajik"),
    ("ta", "Tamil"),
    ("te", "Telugu"),
    ("th", "Thai"),
    ("tr", "Turkish"),
    ("uk", "Ukrainian"),
    ("ur", "Urdu"),
    ("ug", "Uyghur"),
    ("uz", "Uzbek"),
    ("vi", "Vietnamese"),
    ("cy", "Welsh"),
    ("xh", "Xhosa"),
    ("yi", "Yiddish"),
    ("yo", "Yoruba"),
    ("zu", "Zulu"),
];

pub fn is_valid_language(tag: &str) -> bool {
    LANGUAGES.iter().any(|(code, _)| *code == tag)
}

/// Display name for a tag; unknown tags are echoed back.
pub fn language_name(tag: &str) -> &str {
    LANGUAGES
        .iter()
        .find(|(code, _)| *code == tag)
        .map(|(_, name)| *name)
        .unwrap_or(tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latin_text_is_left_to_provider() {
        assert_eq!(guess_language("Bonjour tout le monde"), AUTO);
        assert_eq!(guess_language("Hello"), AUTO);
        assert_eq!(guess_language("   "), AUTO);
    }

    #[test]
    fn diagnostic_scripts() {
        assert_eq!(guess_language("你好世界"), "zh");
        assert_eq!(guess_language("こんにちは"), "ja");
        assert_eq!(guess_language("안녕하세요"), "ko");
        assert_eq!(guess_language("مرحبا"), "ar");
        assert_eq!(guess_language("Привет"), "ru");
        assert_eq!(guess_language("नमस्ते"), "hi");
        assert_eq!(guess_language("สวัสดี"), "th");
        assert_eq!(guess_language("Καλημέρα"), "el");
        assert_eq!(guess_language("שלום"), "he");
    }

    #[test]
    fn kana_beats_han() {
        assert_eq!(guess_language("日本語を勉強します"), "ja");
    }

    #[test]
    fn mixed_latin_and_cyrillic_matches_cyrillic() {
        assert_eq!(guess_language("version 2 - версия"), "ru");
    }

    #[test]
    fn table_lookups() {
        assert!(is_valid_language("auto"));
        assert!(is_valid_language("zh-TW"));
        assert!(!is_valid_language("klingon"));
        assert_eq!(language_name("fr"), "French");
        assert_eq!(language_name("xx"), "xx");
    }
}
