use crate::lang;
use crate::types::*;
use crate::AppState;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Cap on LLM evaluations per answer; verification is best-effort and bounded.
const MAX_CLAIM_CHECKS: usize = 8;
const MAX_EVIDENCE_CHARS: usize = 600;
/// Inconclusive verdicts below this confidence are worth a reader-facing note.
const LOW_CONFIDENCE: f64 = 0.4;

const NLI_SYSTEM_PROMPT: &str = "You check whether an evidence excerpt supports a claim. \
Respond with ONLY a JSON object, no prose:\n\
{\"verdict\": \"SUPPORTED\"|\"CONTRADICTED\"|\"INSUFFICIENT\", \"confidence\": 0.0-1.0, \
\"reason\": \"one sentence\", \"quote\": \"the decisive evidence span or empty\"}";

#[derive(Debug, Deserialize)]
struct NliVerdict {
    #[serde(default)]
    verdict: String,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    #[allow(dead_code)]
    quote: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Claim {
    pub citation_id: usize,
    pub text: String,
}

/// Verify cited claims against their source excerpts. Updates per-result
/// verification fields in place and returns reader-facing notes plus the
/// answer, with a notes section appended only when something is wrong.
/// Every per-claim failure is swallowed; verification never blocks an answer.
pub async fn verify(
    state: &Arc<AppState>,
    answer: &str,
    results: &mut [SearchResult],
) -> (String, Vec<String>) {
    if !state.llm.is_available() || results.is_empty() {
        return (answer.to_string(), Vec::new());
    }

    let claims = extract_claims(answer, results);
    info!("verifying {} cited claims", claims.len());

    for claim in &claims {
        let Some(idx) = results.iter().position(|r| r.citation_id == claim.citation_id) else {
            continue;
        };
        let evidence = select_evidence(&claim.text, &results[idx]);
        if evidence.is_empty() {
            continue;
        }

        match check_claim(state, &claim.text, &evidence).await {
            Some((status, confidence, reason)) => {
                apply_verdict(&mut results[idx], claim, status, confidence, &reason);
            }
            None => debug!("claim check inconclusive, skipping"),
        }
    }

    let notes = build_notes(results);
    let answer = if notes.is_empty() {
        answer.to_string()
    } else {
        format!(
            "{}\n\n**Verification notes**\n{}",
            answer,
            notes
                .iter()
                .map(|n| format!("- {}", n))
                .collect::<Vec<_>>()
                .join("\n")
        )
    };
    (answer, notes)
}

/// Pull `[n]`-bearing sentences out of the answer, strip the markers to get
/// bare claims, and dedup (citation, claim) pairs up to the evaluation cap.
pub fn extract_claims(answer: &str, results: &[SearchResult]) -> Vec<Claim> {
    let marker_re = Regex::new(r"\[([0-9][0-9,]*)\]").expect("static regex");
    let valid_ids: HashSet<usize> = results.iter().map(|r| r.citation_id).collect();

    let mut seen = HashSet::new();
    let mut claims = Vec::new();
    for sentence in split_sentences(answer) {
        let ids: Vec<usize> = marker_re
            .captures_iter(&sentence)
            .flat_map(|c| {
                c[1].split(',')
                    .filter_map(|s| s.trim().parse::<usize>().ok())
                    .collect::<Vec<_>>()
            })
            .filter(|id| valid_ids.contains(id))
            .collect();
        if ids.is_empty() {
            continue;
        }
        let bare = marker_re.replace_all(&sentence, "").trim().to_string();
        if bare.split_whitespace().count() < 4 {
            continue;
        }
        for id in ids {
            if claims.len() >= MAX_CLAIM_CHECKS {
                return claims;
            }
            if seen.insert((id, bare.clone())) {
                claims.push(Claim {
                    citation_id: id,
                    text: bare.clone(),
                });
            }
        }
    }
    claims
}

fn split_sentences(text: &str) -> Vec<String> {
    text.split_inclusive(['.', '!', '?', '\n'])
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// The most keyword-overlapping sentences from the source's content (snippet
/// fallback), capped in length.
pub fn select_evidence(claim: &str, result: &SearchResult) -> String {
    let body = if result.content.is_empty() {
        &result.snippet
    } else {
        &result.content
    };
    if body.trim().is_empty() {
        return String::new();
    }

    let claim_tokens: HashSet<String> = lang::content_tokens(claim).into_iter().collect();
    let mut scored: Vec<(usize, String)> = split_sentences(body)
        .into_iter()
        .map(|s| {
            let tokens: HashSet<String> = lang::content_tokens(&s).into_iter().collect();
            (claim_tokens.intersection(&tokens).count(), s)
        })
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0));

    let mut evidence = String::new();
    for (overlap, sentence) in scored.into_iter().take(2) {
        if overlap == 0 && !evidence.is_empty() {
            break;
        }
        if !evidence.is_empty() {
            evidence.push(' ');
        }
        evidence.push_str(&sentence);
    }
    evidence.chars().take(MAX_EVIDENCE_CHARS).collect()
}

async fn check_claim(
    state: &Arc<AppState>,
    claim: &str,
    evidence: &str,
) -> Option<(NliStatus, f64, String)> {
    let user = format!("Claim: {}\n\nEvidence: {}", claim, evidence);
    let raw = match state.llm.chat(NLI_SYSTEM_PROMPT, &user, 0.0, 200).await {
        Ok(r) => r,
        Err(e) => {
            warn!("NLI call failed: {}", e);
            return None;
        }
    };
    parse_verdict(&raw)
}

/// Direct JSON parse, then a regex grab of the first `{...}` block for models
/// that wrap the object in prose.
pub fn parse_verdict(raw: &str) -> Option<(NliStatus, f64, String)> {
    let verdict: NliVerdict = match serde_json::from_str(raw.trim()) {
        Ok(v) => v,
        Err(_) => {
            let re = Regex::new(r"\{[^{}]*\}").expect("static regex");
            let block = re.find(raw)?;
            serde_json::from_str(block.as_str()).ok()?
        }
    };
    let status = match verdict.verdict.to_uppercase().as_str() {
        "SUPPORTED" => NliStatus::Supported,
        "CONTRADICTED" => NliStatus::Contradicted,
        "INSUFFICIENT" => NliStatus::Unsupported,
        _ => return None,
    };
    Some((status, verdict.confidence.clamp(0.0, 1.0), verdict.reason))
}

/// Severity-priority merge: contradictions beat everything, supported is the
/// weakest; equal severity resolves toward the more confident verdict.
pub fn apply_verdict(
    result: &mut SearchResult,
    claim: &Claim,
    status: NliStatus,
    confidence: f64,
    reason: &str,
) {
    let replace = status.severity() > result.nli_status.severity()
        || (status.severity() == result.nli_status.severity()
            && confidence > result.nli_confidence);
    if replace {
        result.nli_status = status;
        result.nli_confidence = confidence;
        result.nli_reason = reason.to_string();
        result.nli_last_claim = claim.text.clone();
    }
}

fn build_notes(results: &[SearchResult]) -> Vec<String> {
    let mut notes = Vec::new();
    for r in results {
        match r.nli_status {
            NliStatus::Contradicted => notes.push(format!(
                "Source [{}] ({}) appears to contradict the claim \"{}\": {}",
                r.citation_id,
                crate::urlnorm::domain_of(&r.url),
                r.nli_last_claim,
                r.nli_reason
            )),
            NliStatus::Unsupported if r.nli_confidence < LOW_CONFIDENCE => notes.push(format!(
                "Source [{}] could not be confirmed to support \"{}\" (low confidence)",
                r.citation_id, r.nli_last_claim
            )),
            _ => {}
        }
    }
    notes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_with_id(id: usize, content: &str) -> SearchResult {
        let mut r = SearchResult::new(
            &format!("https://example.com/{}", id),
            "title",
            "snippet text",
            "brave",
        );
        r.citation_id = id;
        r.content = content.to_string();
        r
    }

    #[test]
    fn test_extract_claims_dedup_and_cap() {
        let results: Vec<SearchResult> =
            (1..=3).map(|i| result_with_id(i, "")).collect();
        let answer = "Revenue increased twenty percent this quarter [1,2]. \
                      Revenue increased twenty percent this quarter [1,2]. \
                      Margins were flat compared to last year [3]. Short [1].";
        let claims = extract_claims(answer, &results);
        // Duplicate sentence collapses, sub-4-word sentence dropped.
        assert_eq!(claims.len(), 3);
        assert_eq!(claims[0].citation_id, 1);
        assert_eq!(claims[1].citation_id, 2);
        assert!(claims[0].text.starts_with("Revenue increased"));
        assert!(!claims[0].text.contains('['));
    }

    #[test]
    fn test_extract_claims_ignores_invalid_ids() {
        let results = vec![result_with_id(1, "")];
        let answer = "A claim citing a ghost source with details [9].";
        assert!(extract_claims(answer, &results).is_empty());
    }

    #[test]
    fn test_select_evidence_prefers_overlapping_sentence() {
        let r = result_with_id(
            1,
            "The weather was mild. Revenue increased by 20% year over year. Shares fell after hours.",
        );
        let evidence = select_evidence("revenue increased 20%", &r);
        assert!(evidence.contains("Revenue increased by 20%"));
    }

    #[test]
    fn test_select_evidence_snippet_fallback() {
        let mut r = result_with_id(1, "");
        r.snippet = "Quarterly revenue grew strongly.".to_string();
        let evidence = select_evidence("revenue grew", &r);
        assert_eq!(evidence, "Quarterly revenue grew strongly.");
    }

    #[test]
    fn test_parse_verdict_direct_and_embedded() {
        let (status, conf, _) = parse_verdict(
            r#"{"verdict":"SUPPORTED","confidence":0.9,"reason":"matches","quote":"q"}"#,
        )
        .unwrap();
        assert_eq!(status, NliStatus::Supported);
        assert!(conf >= 0.7);

        let (status, _, _) = parse_verdict(
            "Here is my assessment:\n{\"verdict\": \"contradicted\", \"confidence\": 0.8, \"reason\": \"r\", \"quote\": \"\"}\nDone.",
        )
        .unwrap();
        assert_eq!(status, NliStatus::Contradicted);

        assert!(parse_verdict("not json at all").is_none());
        assert!(parse_verdict(r#"{"verdict":"MAYBE","confidence":0.5}"#).is_none());
    }

    #[test]
    fn test_apply_verdict_severity_priority() {
        let mut r = result_with_id(1, "");
        let claim = Claim {
            citation_id: 1,
            text: "some claim".to_string(),
        };
        apply_verdict(&mut r, &claim, NliStatus::Supported, 0.9, "ok");
        assert_eq!(r.nli_status, NliStatus::Supported);

        // A contradiction replaces a supported verdict even at lower confidence.
        apply_verdict(&mut r, &claim, NliStatus::Contradicted, 0.5, "conflict");
        assert_eq!(r.nli_status, NliStatus::Contradicted);
        assert_eq!(r.nli_confidence, 0.5);

        // A weaker supported verdict never downgrades it back.
        apply_verdict(&mut r, &claim, NliStatus::Supported, 0.99, "ok");
        assert_eq!(r.nli_status, NliStatus::Contradicted);

        // Same severity, higher confidence wins.
        apply_verdict(&mut r, &claim, NliStatus::Contradicted, 0.8, "stronger");
        assert_eq!(r.nli_confidence, 0.8);
        assert_eq!(r.nli_reason, "stronger");
    }

    #[tokio::test]
    async fn test_verify_without_llm_is_noop() {
        let state = Arc::new(crate::AppState::for_tests());
        let mut results = vec![result_with_id(1, "evidence text")];
        let (answer, notes) = verify(&state, "A cited claim here [1].", &mut results).await;
        assert_eq!(answer, "A cited claim here [1].");
        assert!(notes.is_empty());
        assert_eq!(results[0].nli_status, NliStatus::Unknown);
    }

    #[test]
    fn test_notes_only_for_problems() {
        let mut supported = result_with_id(1, "");
        supported.nli_status = NliStatus::Supported;
        supported.nli_confidence = 0.9;
        let mut contradicted = result_with_id(2, "");
        contradicted.nli_status = NliStatus::Contradicted;
        contradicted.nli_last_claim = "revenue fell".to_string();
        contradicted.nli_reason = "source says revenue rose".to_string();

        let notes = build_notes(&[supported.clone(), contradicted]);
        assert_eq!(notes.len(), 1);
        assert!(notes[0].contains("[2]"));

        assert!(build_notes(&[supported]).is_empty());
    }
}
