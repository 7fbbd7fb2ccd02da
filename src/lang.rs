use whatlang::{detect, Lang};

/// Dominant writing system of a query, decided by counting characters per
/// script range. Deliberately not a full i18n pass; it only has to steer
/// locale parameters and tokenization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    Latin,
    Japanese,
    Korean,
    Chinese,
    Arabic,
    Cyrillic,
    Thai,
    Other,
}

impl Script {
    pub fn is_cjk(self) -> bool {
        matches!(self, Script::Japanese | Script::Korean | Script::Chinese)
    }

    pub fn is_latin(self) -> bool {
        matches!(self, Script::Latin)
    }
}

pub fn dominant_script(text: &str) -> Script {
    let mut latin = 0usize;
    let mut kana = 0usize;
    let mut han = 0usize;
    let mut hangul = 0usize;
    let mut arabic = 0usize;
    let mut cyrillic = 0usize;
    let mut thai = 0usize;

    for c in text.chars() {
        match c as u32 {
            0x0041..=0x005A | 0x0061..=0x007A | 0x00C0..=0x024F => latin += 1,
            0x3040..=0x30FF => kana += 1,
            0x4E00..=0x9FFF | 0x3400..=0x4DBF => han += 1,
            0xAC00..=0xD7AF | 0x1100..=0x11FF => hangul += 1,
            0x0600..=0x06FF | 0x0750..=0x077F => arabic += 1,
            0x0400..=0x04FF => cyrillic += 1,
            0x0E00..=0x0E7F => thai += 1,
            _ => {}
        }
    }

    // Any kana at all marks Japanese even when kanji dominates the count.
    if kana > 0 {
        return Script::Japanese;
    }
    let scored = [
        (Script::Chinese, han),
        (Script::Korean, hangul),
        (Script::Arabic, arabic),
        (Script::Cyrillic, cyrillic),
        (Script::Thai, thai),
        (Script::Latin, latin),
    ];
    let (best, count) = scored
        .iter()
        .max_by_key(|(_, n)| *n)
        .copied()
        .unwrap_or((Script::Other, 0));
    if count == 0 {
        return Script::Other;
    }
    best
}

/// (country, search_lang) parameters for the primary backend, inferred from
/// the query's script with a keyword fallback for Latin-script queries that
/// name a market. Returns None when nothing can be inferred.
pub fn locale_params(query: &str) -> Option<(&'static str, &'static str)> {
    match dominant_script(query) {
        Script::Japanese => return Some(("JP", "ja")),
        Script::Korean => return Some(("KR", "ko")),
        Script::Chinese => return Some(("CN", "zh-hans")),
        Script::Arabic => return Some(("SA", "ar")),
        Script::Cyrillic => return Some(("RU", "ru")),
        Script::Thai => return Some(("TH", "th")),
        _ => {}
    }

    let lower = query.to_lowercase();
    for (keyword, country, lang) in [
        ("japan", "JP", "ja"),
        ("tokyo", "JP", "ja"),
        ("germany", "DE", "de"),
        ("france", "FR", "fr"),
        ("korea", "KR", "ko"),
        ("china", "CN", "zh-hans"),
    ] {
        if lower.contains(keyword) {
            return Some((country, lang));
        }
    }

    // Character counting saw nothing decisive; let whatlang take a guess on
    // longer inputs before giving up.
    if query.chars().count() >= 12 {
        if let Some(info) = detect(query) {
            if info.is_reliable() {
                return match info.lang() {
                    Lang::Jpn => Some(("JP", "ja")),
                    Lang::Kor => Some(("KR", "ko")),
                    Lang::Cmn => Some(("CN", "zh-hans")),
                    Lang::Deu => Some(("DE", "de")),
                    Lang::Fra => Some(("FR", "fr")),
                    Lang::Rus => Some(("RU", "ru")),
                    _ => None,
                };
            }
        }
    }
    None
}

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "have", "in", "is",
    "it", "its", "of", "on", "or", "that", "the", "to", "was", "were", "will", "with", "what",
    "when", "how", "why", "this", "these", "those",
];

pub fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.contains(&token)
}

/// Language-aware tokenization for lexical scoring. Latin text becomes
/// lowercased alphanumeric words (2..=30 chars); CJK text becomes character
/// bigrams, which outperform naive whitespace splitting there.
pub fn tokenize(text: &str) -> Vec<String> {
    if dominant_script(text).is_cjk() {
        return cjk_bigrams(text);
    }
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 2 && t.len() <= 30)
        .map(|t| t.to_string())
        .collect()
}

/// Tokenize and drop stop words; used for overlap signals.
pub fn content_tokens(text: &str) -> Vec<String> {
    tokenize(text)
        .into_iter()
        .filter(|t| !is_stop_word(t))
        .collect()
}

fn cjk_bigrams(text: &str) -> Vec<String> {
    let chars: Vec<char> = text
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_ascii_punctuation())
        .collect();
    if chars.len() < 2 {
        return chars.iter().map(|c| c.to_string()).collect();
    }
    chars
        .windows(2)
        .map(|w| w.iter().collect::<String>())
        .collect()
}
