use crate::rank::domain_prior;
use crate::types::*;
use crate::urlnorm;
use crate::AppState;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

pub const NO_RESULTS_ANSWER: &str =
    "I could not find any web results for this query. Try rephrasing it or broadening the topic.";

/// Per-source excerpt length in the synthesis context.
const CONTEXT_EXCERPT_CHARS: usize = 1200;

const SYNTHESIS_SYSTEM_PROMPT: &str = "You are a research assistant that writes grounded, \
cited answers from provided web sources.\n\
Rules:\n\
- Every factual claim must carry an inline citation like [1] or [2,3] referring to the \
numbered sources.\n\
- Synthesize across sources; do not summarize them one by one.\n\
- If sources conflict, say so explicitly and cite both sides.\n\
- Use Markdown structure (short sections, lists) for complex answers; plain paragraphs \
otherwise.\n\
- Never invent sources or cite numbers that were not provided.";

/// Synthesize a cited answer from the ranked sources. Returns the answer, the
/// citation map built from the same ranked list, and a heuristic confidence
/// score. Never fails: a missing or failing LLM degrades to an extractive
/// summary that still satisfies the citation invariant.
pub async fn synthesize(
    state: &Arc<AppState>,
    query: &str,
    results: &[SearchResult],
) -> (String, BTreeMap<String, Citation>, f64) {
    if results.is_empty() {
        return (NO_RESULTS_ANSWER.to_string(), BTreeMap::new(), 0.0);
    }

    let citations = build_citation_map(results);
    let ids: Vec<usize> = results.iter().map(|r| r.citation_id).collect();

    let raw_answer = match llm_answer(state, query, results).await {
        Some(text) => text,
        None => extractive_answer(results),
    };

    let answer = ensure_citations(&collapse_adjacent_markers(&raw_answer), &ids);
    let confidence = confidence_score(results, &answer);
    info!(
        "synthesized answer: {} chars, confidence {:.2}",
        answer.len(),
        confidence
    );
    (answer, citations, confidence)
}

async fn llm_answer(
    state: &Arc<AppState>,
    query: &str,
    results: &[SearchResult],
) -> Option<String> {
    if !state.llm.is_available() {
        return None;
    }
    let context = build_context(results);
    let user = format!("Question: {}\n\nSources:\n{}\n\nAnswer:", query, context);
    match state.llm.chat(SYNTHESIS_SYSTEM_PROMPT, &user, 0.4, 900).await {
        Ok(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Ok(_) => None,
        Err(e) => {
            warn!("synthesis LLM call failed: {}", e);
            None
        }
    }
}

/// `[id] title` followed by the best available excerpt, truncated.
pub fn build_context(results: &[SearchResult]) -> String {
    results
        .iter()
        .map(|r| {
            let body = if r.content.is_empty() { &r.snippet } else { &r.content };
            let excerpt: String = body.chars().take(CONTEXT_EXCERPT_CHARS).collect();
            format!("[{}] {}\n{}", r.citation_id, r.title, excerpt.trim())
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Deterministic fallback when no LLM is configured: one cited line per
/// source, so downstream invariants hold without synthesis.
fn extractive_answer(results: &[SearchResult]) -> String {
    let mut lines = vec![format!(
        "Here is what the top {} sources report:",
        results.len()
    )];
    for r in results {
        let body = if r.snippet.is_empty() { &r.content } else { &r.snippet };
        let excerpt: String = body.chars().take(220).collect();
        lines.push(format!("- {} — {} [{}]", r.title, excerpt.trim(), r.citation_id));
    }
    lines.join("\n\n")
}

/// Collapse runs of adjacent citation markers: `[1][2] [3]` becomes `[1,2,3]`.
pub fn collapse_adjacent_markers(answer: &str) -> String {
    let re = Regex::new(r"\[([0-9][0-9, ]*)\]\s*\[([0-9][0-9, ]*)\]").expect("static regex");
    let mut out = answer.to_string();
    loop {
        let next = re.replace_all(&out, "[$1,$2]").into_owned();
        if next == out {
            break;
        }
        out = next;
    }
    // Normalize spacing inside merged markers.
    let re_space = Regex::new(r"\[([0-9, ]+)\]").expect("static regex");
    re_space
        .replace_all(&out, |caps: &regex::Captures| {
            let ids = caps[1]
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(",");
            format!("[{}]", ids)
        })
        .into_owned()
}

/// Correctness backstop: every non-empty, non-heading paragraph must carry at
/// least one citation marker. Missing ones are appended round-robin over the
/// available ids.
pub fn ensure_citations(answer: &str, ids: &[usize]) -> String {
    if ids.is_empty() {
        return answer.to_string();
    }
    let marker_re = Regex::new(r"\[[0-9][0-9,]*\]").expect("static regex");
    let mut next = 0usize;
    answer
        .split("\n\n")
        .map(|para| {
            let trimmed = para.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                return para.to_string();
            }
            if marker_re.is_match(para) {
                return para.to_string();
            }
            let id = ids[next % ids.len()];
            next += 1;
            format!("{} [{}]", para.trim_end(), id)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn build_citation_map(results: &[SearchResult]) -> BTreeMap<String, Citation> {
    results
        .iter()
        .map(|r| {
            let domain = urlnorm::domain_of(&r.url);
            (
                r.citation_id.to_string(),
                Citation {
                    title: r.title.clone(),
                    domain: domain.clone(),
                    url: r.url.clone(),
                    source: r.source.clone(),
                    display: format!("[{}] {}", r.citation_id, domain),
                    quality: quality_tier(&domain, &r.source),
                    nli_status: r.nli_status,
                    nli_confidence: r.nli_confidence,
                    nli_reason: r.nli_reason.clone(),
                },
            )
        })
        .collect()
}

/// Tier derived from the backend and the domain prior.
fn quality_tier(domain: &str, source: &str) -> String {
    let prior = domain_prior(domain);
    if prior >= 1.2 {
        "premium".to_string()
    } else if prior > 1.0 {
        "good".to_string()
    } else if prior < 1.0 {
        "low".to_string()
    } else if source == crate::brave::SOURCE_NAME {
        "standard".to_string()
    } else {
        "fallback".to_string()
    }
}

/// Heuristic confidence in [0,1]: source count saturating at 5, fraction of
/// sources with extracted content, and a citation-density + length proxy for
/// answer quality.
pub fn confidence_score(results: &[SearchResult], answer: &str) -> f64 {
    if results.is_empty() {
        return 0.0;
    }
    let source_factor = (results.len() as f64 / 5.0).min(1.0);
    let content_factor =
        results.iter().filter(|r| !r.content.is_empty()).count() as f64 / results.len() as f64;

    let marker_re = Regex::new(r"\[[0-9][0-9,]*\]").expect("static regex");
    let paragraphs = answer.split("\n\n").filter(|p| !p.trim().is_empty()).count();
    let markers = marker_re.find_iter(answer).count();
    let density = if paragraphs == 0 {
        0.0
    } else {
        (markers as f64 / paragraphs as f64).min(1.0)
    };
    let length_factor = (answer.chars().count() as f64 / 800.0).min(1.0);
    let answer_quality = 0.6 * density + 0.4 * length_factor;

    (0.4 * source_factor + 0.3 * content_factor + 0.3 * answer_quality).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranked(n: usize) -> Vec<SearchResult> {
        (1..=n)
            .map(|i| {
                let mut r = SearchResult::new(
                    &format!("https://bloomberg.com/{}", i),
                    &format!("Source {}", i),
                    "Tesla earnings grew in the third quarter",
                    "brave",
                );
                r.citation_id = i;
                r
            })
            .collect()
    }

    #[test]
    fn test_collapse_adjacent_markers() {
        assert_eq!(collapse_adjacent_markers("claim [1][2][3]."), "claim [1,2,3].");
        assert_eq!(collapse_adjacent_markers("claim [1] [2]."), "claim [1,2].");
        assert_eq!(collapse_adjacent_markers("a [1] and b [2]"), "a [1] and b [2]");
        assert_eq!(collapse_adjacent_markers("no markers"), "no markers");
    }

    #[test]
    fn test_ensure_citations_injects_round_robin() {
        let answer = "First claim without citation.\n\nSecond claim [2] already cited.\n\nThird claim missing.";
        let out = ensure_citations(answer, &[1, 2, 3]);
        let paras: Vec<&str> = out.split("\n\n").collect();
        assert!(paras[0].ends_with("[1]"));
        assert!(paras[1].contains("[2]"));
        assert!(!paras[1].ends_with("[1]"));
        assert!(paras[2].ends_with("[2]"));
    }

    #[test]
    fn test_ensure_citations_skips_headings_and_blank() {
        let out = ensure_citations("# Heading\n\nBody text here.", &[1]);
        assert!(out.contains("# Heading\n"));
        assert!(!out.contains("# Heading ["));
        assert!(out.ends_with("Body text here. [1]"));
    }

    #[test]
    fn test_citation_density_invariant_after_postprocessing() {
        let ids = vec![1, 2];
        let raw = "Claim one.\n\nClaim two.\n\nClaim three [1][2].";
        let out = ensure_citations(&collapse_adjacent_markers(raw), &ids);
        let marker_re = Regex::new(r"\[[0-9][0-9,]*\]").unwrap();
        for para in out.split("\n\n").filter(|p| !p.trim().is_empty()) {
            assert!(marker_re.is_match(para), "paragraph lacks citation: {}", para);
        }
    }

    #[test]
    fn test_build_citation_map_tiers_and_display() {
        let map = build_citation_map(&ranked(2));
        let c = map.get("1").unwrap();
        assert_eq!(c.domain, "bloomberg.com");
        assert_eq!(c.quality, "premium");
        assert_eq!(c.display, "[1] bloomberg.com");
        assert!(map.contains_key("2"));
    }

    #[tokio::test]
    async fn test_synthesize_empty_results_fixed_answer() {
        let state = Arc::new(crate::AppState::for_tests());
        let (answer, citations, confidence) = synthesize(&state, "anything", &[]).await;
        assert_eq!(answer, NO_RESULTS_ANSWER);
        assert!(citations.is_empty());
        assert_eq!(confidence, 0.0);
    }

    #[tokio::test]
    async fn test_synthesize_without_llm_is_cited() {
        let state = Arc::new(crate::AppState::for_tests());
        let results = ranked(3);
        let (answer, citations, confidence) = synthesize(&state, "tesla earnings", &results).await;
        assert_eq!(citations.len(), 3);
        assert!(confidence > 0.0 && confidence <= 1.0);
        let marker_re = Regex::new(r"\[[0-9][0-9,]*\]").unwrap();
        for para in answer.split("\n\n").skip(1).filter(|p| !p.trim().is_empty()) {
            assert!(marker_re.is_match(para), "uncited paragraph: {}", para);
        }
    }

    #[test]
    fn test_confidence_scales_with_sources() {
        let many = ranked(5);
        let few = ranked(1);
        let answer = "Cited claim [1].";
        assert!(confidence_score(&many, answer) > confidence_score(&few, answer));
        assert_eq!(confidence_score(&[], answer), 0.0);
    }
}
