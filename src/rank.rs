use crate::lang;
use crate::llm::cosine_similarity;
use crate::types::SearchResult;
use crate::urlnorm;
use crate::AppState;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Only this many top candidates get the expensive embedding pass; the rest
/// inherit a neutral semantic score.
pub const RERANK_WINDOW: usize = 15;

const BM25_K1: f64 = 1.5;
const BM25_B: f64 = 0.75;
/// Content is truncated before lexical scoring so one long page cannot
/// dominate term frequencies.
const BM25_CONTENT_CHARS: usize = 1500;
const EMBED_DOC_CHARS: usize = 512;
const NEUTRAL_SEMANTIC: f64 = 0.5;

const HIGH_QUALITY_DOMAINS: &[(&str, f64)] = &[
    ("wikipedia.org", 1.2),
    ("reuters.com", 1.25),
    ("bloomberg.com", 1.25),
    ("ft.com", 1.25),
    ("wsj.com", 1.25),
    ("economist.com", 1.2),
    ("sec.gov", 1.3),
    ("federalreserve.gov", 1.3),
    ("imf.org", 1.25),
    ("nature.com", 1.25),
    ("arxiv.org", 1.2),
];

const FINANCIAL_DOMAINS: &[(&str, f64)] = &[
    ("cnbc.com", 1.15),
    ("marketwatch.com", 1.15),
    ("investopedia.com", 1.1),
    ("morningstar.com", 1.15),
    ("barrons.com", 1.15),
    ("nikkei.com", 1.15),
];

const TECHNICAL_DOMAINS: &[(&str, f64)] = &[
    ("github.com", 1.1),
    ("stackoverflow.com", 1.1),
    ("developer.mozilla.org", 1.1),
    ("docs.rs", 1.1),
];

const NEWS_DOMAINS: &[(&str, f64)] = &[
    ("nytimes.com", 1.1),
    ("bbc.com", 1.1),
    ("apnews.com", 1.15),
    ("theguardian.com", 1.1),
];

const LOW_QUALITY_DOMAINS: &[(&str, f64)] = &[
    ("pinterest.com", 0.7),
    ("quora.com", 0.85),
    ("answers.com", 0.8),
    ("ehow.com", 0.8),
    ("buzzfeed.com", 0.75),
];

/// Hybrid ranking pass: BM25 + semantic + signal blend, then re-sort, dedup,
/// and citation-id reassignment so citations line up with displayed order.
pub async fn rank(
    state: &Arc<AppState>,
    query: &str,
    results: Vec<SearchResult>,
) -> Vec<SearchResult> {
    if results.is_empty() {
        return results;
    }

    let mut results = results;
    let bm25 = bm25_normalized(query, &results);
    let semantic = semantic_scores(state, query, &results, &bm25).await;

    for (i, r) in results.iter_mut().enumerate() {
        r.bm25_score = bm25[i];
        r.semantic_score = semantic[i];

        let domain = urlnorm::domain_of(&r.url);
        r.domain_boost = domain_prior(&domain);
        r.recency_boost = recency_boost(&r.timestamp);
        r.snippet_title_boost = overlap_boost(query, r);

        let signal = signal_score(r.domain_boost, r.recency_boost, r.snippet_title_boost);
        let content_quality = content_quality_score(r.word_count);

        let combined = 0.4 * r.bm25_score
            + 0.4 * r.semantic_score
            + 0.1 * content_quality
            + 0.1 * signal;
        // The raw domain prior multiplies once more for extra separation
        // between otherwise close results.
        r.combined_score = (combined * r.domain_boost).clamp(0.0, 1.0);
    }

    results.sort_by(|a, b| {
        b.combined_score
            .partial_cmp(&a.combined_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut seen = HashSet::new();
    results.retain(|r| seen.insert(urlnorm::dedup_key(r)));
    crate::search::assign_citation_ids(&mut results);

    info!("ranked {} results", results.len());
    results
}

fn doc_text(r: &SearchResult) -> String {
    let content: String = r.content.chars().take(BM25_CONTENT_CHARS).collect();
    // Title tokens count double.
    format!("{} {} {} {}", r.title, r.title, r.snippet, content)
}

/// Batch BM25, min-max normalized to [0,1]. A degenerate batch where every
/// document scores the same maps uniformly to 0.5.
pub fn bm25_normalized(query: &str, results: &[SearchResult]) -> Vec<f64> {
    let query_tokens = lang::tokenize(query);
    if query_tokens.is_empty() {
        return vec![0.5; results.len()];
    }

    let docs: Vec<Vec<String>> = results.iter().map(|r| lang::tokenize(&doc_text(r))).collect();
    let n = docs.len() as f64;
    let avg_len = docs.iter().map(|d| d.len() as f64).sum::<f64>() / n.max(1.0);
    let avg_len = avg_len.max(1.0);

    let mut doc_freq: HashMap<&str, usize> = HashMap::new();
    for doc in &docs {
        let unique: HashSet<&str> = doc.iter().map(String::as_str).collect();
        for t in unique {
            *doc_freq.entry(t).or_insert(0) += 1;
        }
    }

    let raw: Vec<f64> = docs
        .iter()
        .map(|doc| {
            let len = doc.len() as f64;
            let mut tf: HashMap<&str, usize> = HashMap::new();
            for t in doc {
                *tf.entry(t.as_str()).or_insert(0) += 1;
            }
            query_tokens
                .iter()
                .map(|qt| {
                    let f = *tf.get(qt.as_str()).unwrap_or(&0) as f64;
                    if f == 0.0 {
                        return 0.0;
                    }
                    let df = *doc_freq.get(qt.as_str()).unwrap_or(&0) as f64;
                    let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
                    idf * (f * (BM25_K1 + 1.0))
                        / (f + BM25_K1 * (1.0 - BM25_B + BM25_B * len / avg_len))
                })
                .sum()
        })
        .collect();

    min_max_normalize(&raw)
}

pub fn min_max_normalize(raw: &[f64]) -> Vec<f64> {
    let min = raw.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = raw.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if raw.is_empty() || (max - min).abs() < f64::EPSILON {
        return vec![0.5; raw.len()];
    }
    raw.iter().map(|v| (v - min) / (max - min)).collect()
}

/// Embedding cosine scores for the rerank window. Embeddings are cached per
/// exact document text; documents outside the window get a neutral score.
/// When embeddings are entirely unavailable the normalized BM25 score stands
/// in, keeping combined-score scales comparable in degraded runs.
async fn semantic_scores(
    state: &Arc<AppState>,
    query: &str,
    results: &[SearchResult],
    bm25: &[f64],
) -> Vec<f64> {
    if !state.llm.is_available() {
        debug!("embeddings unavailable, reusing lexical scores");
        return bm25.to_vec();
    }

    let query_vec = match embed_cached(state, query).await {
        Some(v) => v,
        None => {
            warn!("query embedding failed, reusing lexical scores");
            return bm25.to_vec();
        }
    };

    // Window membership follows lexical strength, not arrival order.
    let mut order: Vec<usize> = (0..results.len()).collect();
    order.sort_by(|&a, &b| bm25[b].partial_cmp(&bm25[a]).unwrap_or(std::cmp::Ordering::Equal));
    let window: HashSet<usize> = order.into_iter().take(RERANK_WINDOW).collect();

    let mut scores = vec![NEUTRAL_SEMANTIC; results.len()];
    let mut any_ok = false;
    let mut to_embed: Vec<(usize, String)> = Vec::new();

    for &i in &window {
        let text: String = doc_text(&results[i]).chars().take(EMBED_DOC_CHARS).collect();
        if let Some(vec) = state.embedding_cache.get(&text).await {
            scores[i] = cosine_similarity(&query_vec, &vec);
            any_ok = true;
        } else {
            to_embed.push((i, text));
        }
    }

    if !to_embed.is_empty() {
        let texts: Vec<String> = to_embed.iter().map(|(_, t)| t.clone()).collect();
        match state.llm.embed(&texts).await {
            Ok(vectors) => {
                for ((i, text), vec) in to_embed.into_iter().zip(vectors) {
                    scores[i] = cosine_similarity(&query_vec, &vec);
                    state.embedding_cache.insert(text, vec).await;
                    any_ok = true;
                }
            }
            Err(e) => warn!("document embedding failed: {}", e),
        }
    }

    if !any_ok {
        return bm25.to_vec();
    }
    scores
}

async fn embed_cached(state: &Arc<AppState>, text: &str) -> Option<Vec<f32>> {
    if let Some(v) = state.embedding_cache.get(text).await {
        return Some(v);
    }
    let vectors = state.llm.embed(&[text.to_string()]).await.ok()?;
    let vec = vectors.into_iter().next()?;
    state.embedding_cache.insert(text.to_string(), vec.clone()).await;
    Some(vec)
}

/// Static per-domain trust multiplier with subdomain matching.
pub fn domain_prior(domain: &str) -> f64 {
    for table in [
        HIGH_QUALITY_DOMAINS,
        FINANCIAL_DOMAINS,
        TECHNICAL_DOMAINS,
        NEWS_DOMAINS,
        LOW_QUALITY_DOMAINS,
    ] {
        for (d, boost) in table {
            if domain == *d || domain.ends_with(&format!(".{}", d)) {
                return *boost;
            }
        }
    }
    1.0
}

/// Coarse year-substring freshness check on the result timestamp.
fn recency_boost(timestamp: &str) -> f64 {
    let year = chrono::Utc::now().format("%Y").to_string();
    let last_year = (year.parse::<i32>().unwrap_or(2000) - 1).to_string();
    if timestamp.contains(&year) {
        1.2
    } else if timestamp.contains(&last_year) {
        1.1
    } else {
        1.0
    }
}

/// Token overlap between the query and title+snippet, stop words removed.
fn overlap_boost(query: &str, r: &SearchResult) -> f64 {
    let query_tokens: HashSet<String> = lang::content_tokens(query).into_iter().collect();
    if query_tokens.is_empty() {
        return 1.0;
    }
    let doc_tokens: HashSet<String> =
        lang::content_tokens(&format!("{} {}", r.title, r.snippet))
            .into_iter()
            .collect();
    let overlap = query_tokens.intersection(&doc_tokens).count() as f64;
    let ratio = overlap / query_tokens.len() as f64;
    if ratio >= 0.6 {
        1.2
    } else if ratio >= 0.3 {
        1.1
    } else if ratio > 0.0 {
        1.05
    } else {
        1.0
    }
}

/// Multiply the three signal multipliers, then rescale (product-1)/2 into
/// [0,1] so the blend weight stays meaningful.
fn signal_score(domain: f64, recency: f64, overlap: f64) -> f64 {
    ((domain * recency * overlap - 1.0) / 2.0).clamp(0.0, 1.0)
}

/// Rewards extracts in the ~100-400 word band; very short or very long
/// content is a weaker synthesis source.
fn content_quality_score(word_count: usize) -> f64 {
    match word_count {
        0 => 0.2,
        1..=39 => 0.3,
        40..=99 => 0.7,
        100..=400 => 1.0,
        401..=800 => 0.7,
        _ => 0.5,
    }
}
