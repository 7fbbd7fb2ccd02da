use crate::lang::{self, Script};
use crate::AppState;
use chrono::Datelike;
use std::sync::Arc;
use tracing::{debug, info};

const REWRITE_SYSTEM_PROMPT: &str = "You rewrite web search queries. Return exactly one \
rewritten query of at most 18 words. Preserve entities, ticker symbols, and the query's \
language. Do not answer the query, add quotes, or number the output.";

const RECENCY_TERMS: &[&str] = &["latest", "recent", "today", "current", "2024", "2025", "2026"];

const FINANCE_TERMS: &[&str] = &[
    "stock", "stocks", "earnings", "revenue", "dividend", "shares", "market", "valuation",
    "forecast", "ipo",
];

const ANALYSIS_TERMS: &[&str] = &["analysis", "outlook", "review", "breakdown", "report"];

/// Conversational suffixes and particles stripped from non-Latin queries
/// before they go to a keyword-oriented search backend.
const POLITE_SUFFIXES: &[&str] = &[
    "について教えてください",
    "を教えてください",
    "を教えて",
    "とは何ですか",
    "ですか",
    "ください",
    "について",
    "알려주세요",
    "알려줘",
    "입니까",
    "是什么意思",
    "是什么",
    "怎么样",
    "吗",
];

/// Rewrite the raw query for retrieval. LLM rewrite with sanitization, rule
/// based fallback, rewrite cache in front. Never fails.
pub async fn enhance(state: &Arc<AppState>, query: &str, include_recent: bool) -> String {
    let query = query.trim();
    if query.is_empty() {
        return String::new();
    }

    let cache_key = format!("{}|recent={}", query, include_recent);
    if let Some(cached) = state.rewrite_cache.get(&cache_key).await {
        debug!("query rewrite cache hit");
        return cached;
    }

    let enhanced = match llm_rewrite(state, query, include_recent).await {
        Some(rewritten) => rewritten,
        None => rule_based(query, include_recent),
    };

    info!("enhanced query: {} -> {}", query, enhanced);
    state.rewrite_cache.insert(cache_key, enhanced.clone()).await;
    enhanced
}

async fn llm_rewrite(state: &Arc<AppState>, query: &str, include_recent: bool) -> Option<String> {
    if !state.llm.is_available() {
        return None;
    }
    let user = if include_recent {
        format!("Rewrite for web search, favoring recent results: {}", query)
    } else {
        format!("Rewrite for web search: {}", query)
    };
    let raw = state
        .llm
        .chat(REWRITE_SYSTEM_PROMPT, &user, 0.3, 60)
        .await
        .ok()?;
    sanitize_rewrite(query, &raw)
}

/// Take the first usable line of the model output; reject echoes and noise.
fn sanitize_rewrite(original: &str, raw: &str) -> Option<String> {
    let line = raw.lines().map(str::trim).find(|l| !l.is_empty())?;
    let mut cleaned = line
        .trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == ')' || c == '-')
        .trim()
        .trim_matches('"')
        .trim_matches('\'')
        .to_string();
    for prefix in ["query:", "rewritten:", "search:"] {
        // Compare on the prefix's own byte range; `get` refuses to slice
        // mid-character, so multibyte text after the prefix stays safe.
        let has_prefix = cleaned
            .get(..prefix.len())
            .map(|head| head.eq_ignore_ascii_case(prefix))
            .unwrap_or(false);
        if has_prefix {
            cleaned = cleaned[prefix.len()..].trim().to_string();
        }
    }
    if cleaned.is_empty() || cleaned.eq_ignore_ascii_case(original.trim()) {
        return None;
    }
    let words: Vec<&str> = cleaned.split_whitespace().collect();
    if words.len() > 18 {
        cleaned = words[..18].join(" ");
    }
    Some(cleaned)
}

/// Deterministic enhancement used when the LLM is unavailable or its output
/// was rejected.
pub fn rule_based(query: &str, include_recent: bool) -> String {
    let year = chrono::Utc::now().year();
    let script = lang::dominant_script(query);

    if !script.is_latin() && script != Script::Other {
        let mut q = query.trim().to_string();
        loop {
            let before = q.clone();
            for suffix in POLITE_SUFFIXES {
                if let Some(stripped) = q.strip_suffix(suffix) {
                    q = stripped.trim().to_string();
                }
            }
            if q == before || q.is_empty() {
                break;
            }
        }
        if q.is_empty() {
            q = query.trim().to_string();
        }
        let mut q = q.split_whitespace().collect::<Vec<_>>().join(" ");
        if include_recent {
            let year_token = match script {
                Script::Korean => format!("{}년", year),
                Script::Japanese | Script::Chinese => format!("{}年", year),
                _ => year.to_string(),
            };
            if !q.contains(&year.to_string()) {
                q = format!("{} {}", q, year_token);
            }
        }
        return q;
    }

    let mut q = query.split_whitespace().collect::<Vec<_>>().join(" ");
    let lower = q.to_lowercase();
    if include_recent && !RECENCY_TERMS.iter().any(|t| lower.contains(t)) {
        q = format!("{} latest {}", q, year);
    }
    let lower = q.to_lowercase();
    if FINANCE_TERMS.iter().any(|t| lower.split_whitespace().any(|w| w == *t))
        && !ANALYSIS_TERMS.iter().any(|t| lower.contains(t))
    {
        q = format!("{} analysis", q);
    }
    q
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_takes_first_line_and_strips_noise() {
        assert_eq!(
            sanitize_rewrite("tesla news", "1. \"Tesla Q3 2025 earnings news\"\nsecond line"),
            Some("Tesla Q3 2025 earnings news".to_string())
        );
        assert_eq!(
            sanitize_rewrite("tesla news", "Query: tesla stock latest developments"),
            Some("tesla stock latest developments".to_string())
        );
    }

    #[test]
    fn test_sanitize_strips_prefix_before_multibyte_char() {
        // U+212A lowercases to a shorter byte sequence; prefix stripping must
        // not mix byte offsets across the cased variants.
        assert_eq!(
            sanitize_rewrite("q", "Query:\u{212A}elvin temperature scale history"),
            Some("\u{212A}elvin temperature scale history".to_string())
        );
    }

    #[test]
    fn test_sanitize_rejects_echo_and_empty() {
        assert_eq!(sanitize_rewrite("tesla news", "Tesla News"), None);
        assert_eq!(sanitize_rewrite("tesla news", "\n\n  \n"), None);
    }

    #[test]
    fn test_sanitize_caps_word_count() {
        let long = (0..30).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ");
        let out = sanitize_rewrite("q", &long).unwrap();
        assert_eq!(out.split_whitespace().count(), 18);
    }

    #[test]
    fn test_rule_based_latin_recency_and_analysis() {
        let year = chrono::Utc::now().year().to_string();
        let out = rule_based("tesla earnings", true);
        assert!(out.contains("latest"));
        assert!(out.contains(&year));
        assert!(out.ends_with("analysis"));

        // A query that already carries a recency term is left alone.
        let out = rule_based("tesla earnings latest report", true);
        assert!(!out.contains(&format!("latest {}", year)));
    }

    #[test]
    fn test_rule_based_non_latin_strips_polite_suffix() {
        let out = rule_based("トヨタの決算について教えてください", false);
        assert_eq!(out, "トヨタの決算");

        let out = rule_based("삼성전자 실적 알려줘", false);
        assert_eq!(out, "삼성전자 실적");
    }

    #[test]
    fn test_rule_based_non_latin_localized_year() {
        let year = chrono::Utc::now().year();
        let out = rule_based("トヨタ 決算", true);
        assert!(out.ends_with(&format!("{}年", year)));

        let out = rule_based("삼성전자 실적", true);
        assert!(out.ends_with(&format!("{}년", year)));
    }

    #[test]
    fn test_rule_based_plain_query_unchanged() {
        assert_eq!(rule_based("rust async runtime", false), "rust async runtime");
    }
}
