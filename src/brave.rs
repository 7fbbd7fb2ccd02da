use crate::config::Config;
use crate::lang::{self, Script};
use crate::types::*;
use crate::urlnorm;
use anyhow::Result;
use rand::Rng;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const SOURCE_NAME: &str = "brave";

/// Minimum spacing between requests to the backend.
const MIN_REQUEST_INTERVAL: std::time::Duration = std::time::Duration::from_millis(1000);
const MAX_COUNT: usize = 20;

const VALID_FRESHNESS: &[&str] = &["pd", "pw", "pm", "py"];
const VALID_COUNTRIES: &[&str] = &[
    "US", "GB", "DE", "FR", "JP", "KR", "CN", "IN", "CA", "AU", "BR", "RU", "SA", "TH", "ES",
    "IT", "NL",
];
const VALID_LANGS: &[&str] = &[
    "en", "de", "fr", "ja", "ko", "zh-hans", "ar", "ru", "th", "es", "it", "nl", "pt",
];

/// Premium sources: financial/government/academic. Highest tier bonus and a
/// verified-source multiplier on top.
const PREMIUM_DOMAINS: &[&str] = &[
    "bloomberg.com", "reuters.com", "wsj.com", "ft.com", "sec.gov", "federalreserve.gov",
    "imf.org", "worldbank.org", "nature.com", "arxiv.org", "nikkei.com", "boj.or.jp",
];

const GOOD_DOMAINS: &[&str] = &[
    "cnbc.com", "marketwatch.com", "forbes.com", "economist.com", "barrons.com",
    "investopedia.com", "morningstar.com", "fool.com", "yahoo.com", "bbc.com", "apnews.com",
];

/// Social/clickbait/content-farm domains dropped unless the result looks like
/// an official account.
const DENYLIST_DOMAINS: &[&str] = &[
    "pinterest.com", "facebook.com", "instagram.com", "tiktok.com", "twitter.com", "x.com",
    "buzzfeed.com", "quora.com", "answers.com", "ehow.com", "wikihow.com", "taboola.com",
    "outbrain.com",
];

const QUALITY_KEYWORDS: &[&str] = &[
    "earnings", "revenue", "quarterly", "guidance", "forecast", "analysis", "balance sheet",
    "filing", "dividend", "valuation", "決算", "業績", "実績", "실적", "财报", "营收",
];

const SPAM_KEYWORDS: &[&str] = &[
    "you won't believe", "click here", "top 10 secrets", "this one trick", "shocking",
    "giveaway", "limited offer",
];

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("authentication failed with status {0}")]
    Auth(u16),
    #[error("rate limited")]
    RateLimited,
    #[error("unprocessable request parameters")]
    Unprocessable,
    #[error("server error with status {0}")]
    Server(u16),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unexpected status {0}")]
    Unexpected(u16),
    #[error("response parse error: {0}")]
    Parse(String),
}

/// Rate-limited client for the Brave web search API with status-driven retry
/// and post-retrieval quality filtering.
#[derive(Debug)]
pub struct BraveClient {
    http: reqwest::Client,
    api_key: Option<String>,
    endpoint: String,
    last_request: Mutex<Option<Instant>>,
}

impl BraveClient {
    pub fn new(config: &Config, http: reqwest::Client) -> Self {
        Self {
            http,
            api_key: config.brave_api_key.clone(),
            endpoint: config.brave_endpoint.clone(),
            last_request: Mutex::new(None),
        }
    }

    pub fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    /// Search the backend. Transient failures are retried per-status; anything
    /// unrecoverable other than a credential problem degrades to an empty list.
    pub async fn search(
        &self,
        query: &str,
        count: usize,
        freshness: Option<&str>,
    ) -> Result<Vec<SearchResult>> {
        if self.api_key.is_none() {
            debug!("brave client unavailable, no API key");
            return Ok(Vec::new());
        }

        let params = self.build_params(query, count, freshness, false);
        let mut results = match self.request_with_policy(&params).await {
            Ok(r) => r,
            Err(BackendError::Unprocessable) => {
                // Some locale/freshness combinations are rejected outright;
                // retry once with the minimal parameter set.
                info!("brave returned 422, retrying with minimal parameters");
                let minimal = self.build_params(query, count, None, true);
                self.request_with_policy(&minimal).await.unwrap_or_default()
            }
            Err(BackendError::Auth(status)) => {
                return Err(anyhow::anyhow!("brave credential rejected ({})", status));
            }
            Err(e) => {
                warn!("brave search failed: {}", e);
                Vec::new()
            }
        };

        if results.is_empty() {
            // A 200 with zero parsed results usually means over-constrained
            // locale hints; retry once without them after a short backoff.
            tokio::time::sleep(std::time::Duration::from_millis(400)).await;
            let minimal = self.build_params(query, count, None, true);
            results = self.request_with_policy(&minimal).await.unwrap_or_default();
        }

        let filtered = filter_and_score(query, results);
        info!("brave search returned {} results after filtering", filtered.len());
        Ok(filtered)
    }

    fn build_params(
        &self,
        query: &str,
        count: usize,
        freshness: Option<&str>,
        minimal: bool,
    ) -> HashMap<String, String> {
        let mut params: HashMap<String, String> = HashMap::new();
        params.insert("q".into(), query.to_string());
        params.insert("count".into(), count.clamp(1, MAX_COUNT).to_string());
        if minimal {
            return params;
        }

        // Unknown codes are dropped silently rather than sent.
        if let Some(f) = freshness {
            if VALID_FRESHNESS.contains(&f) {
                params.insert("freshness".into(), f.to_string());
            }
        }
        if let Some((country, lang)) = lang::locale_params(query) {
            if VALID_COUNTRIES.contains(&country) {
                params.insert("country".into(), country.to_string());
            }
            if VALID_LANGS.contains(&lang) {
                params.insert("search_lang".into(), lang.to_string());
            }
        }
        params
    }

    /// One request under the retry policy: 429 gets a single backoff retry,
    /// 5xx/transport up to two with exponential backoff and jitter, anything
    /// unexpected becomes an empty result set.
    async fn request_with_policy(
        &self,
        params: &HashMap<String, String>,
    ) -> Result<Vec<SearchResult>, BackendError> {
        let mut server_retries = 0u32;
        let mut rate_retried = false;
        loop {
            self.wait_for_slot().await;
            match self.execute(params).await {
                Ok(results) => return Ok(results),
                Err(BackendError::RateLimited) if !rate_retried => {
                    rate_retried = true;
                    let pause = 1200 + jitter_ms(400);
                    debug!("brave rate limited, backing off {}ms", pause);
                    tokio::time::sleep(std::time::Duration::from_millis(pause)).await;
                }
                Err(BackendError::Server(status)) if server_retries < 2 => {
                    server_retries += 1;
                    let pause = 500u64 * (1 << server_retries) + jitter_ms(250);
                    debug!("brave server error {}, retry {} in {}ms", status, server_retries, pause);
                    tokio::time::sleep(std::time::Duration::from_millis(pause)).await;
                }
                Err(BackendError::Transport(msg)) if server_retries < 2 => {
                    server_retries += 1;
                    let pause = 500u64 * (1 << server_retries) + jitter_ms(250);
                    debug!("brave transport error ({}), retry in {}ms", msg, pause);
                    tokio::time::sleep(std::time::Duration::from_millis(pause)).await;
                }
                Err(BackendError::Unexpected(status)) => {
                    warn!("brave unexpected status {}, treating as no data", status);
                    return Ok(Vec::new());
                }
                Err(BackendError::Parse(msg)) => {
                    warn!("brave parse failure ({}), treating as no data", msg);
                    return Ok(Vec::new());
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn execute(
        &self,
        params: &HashMap<String, String>,
    ) -> Result<Vec<SearchResult>, BackendError> {
        let key = self.api_key.as_deref().unwrap_or_default();
        let resp = self
            .http
            .get(&self.endpoint)
            .query(params)
            .header("Accept", "application/json")
            .header("X-Subscription-Token", key)
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        let status = resp.status().as_u16();
        match status {
            200 => {}
            401 | 403 => return Err(BackendError::Auth(status)),
            422 => return Err(BackendError::Unprocessable),
            429 => return Err(BackendError::RateLimited),
            s if (500..600).contains(&s) => return Err(BackendError::Server(s)),
            s => return Err(BackendError::Unexpected(s)),
        }

        let parsed: BraveSearchResponse = resp
            .json()
            .await
            .map_err(|e| BackendError::Parse(e.to_string()))?;

        let results = parsed
            .web
            .map(|w| w.results)
            .unwrap_or_default()
            .into_iter()
            .filter(|r| !r.url.trim().is_empty())
            .map(|r| {
                let mut sr = SearchResult::new(&r.url, &r.title, &r.description, SOURCE_NAME);
                sr.url = urlnorm::canonicalize(&r.url);
                sr
            })
            .collect();
        Ok(results)
    }

    /// Reserve the next request slot. The mutex is held only long enough to
    /// compute the reservation; the sleep happens outside it.
    async fn wait_for_slot(&self) {
        let wake = {
            let mut last = self.last_request.lock().await;
            let now = Instant::now();
            let earliest = match *last {
                Some(t) => t + MIN_REQUEST_INTERVAL,
                None => now,
            };
            let scheduled = if earliest > now { earliest } else { now };
            *last = Some(scheduled);
            scheduled
        };
        tokio::time::sleep_until(wake).await;
    }
}

fn jitter_ms(max: u64) -> u64 {
    rand::thread_rng().gen_range(0..=max)
}

/// Domain quality tier multiplier applied when re-ranking the backend's list.
pub fn domain_tier_multiplier(domain: &str) -> f64 {
    if matches_domain(domain, PREMIUM_DOMAINS) {
        1.3
    } else if matches_domain(domain, GOOD_DOMAINS) {
        1.15
    } else if matches_domain(domain, DENYLIST_DOMAINS) {
        0.7
    } else {
        1.0
    }
}

fn matches_domain(domain: &str, table: &[&str]) -> bool {
    table
        .iter()
        .any(|d| domain == *d || domain.ends_with(&format!(".{}", d)))
}

/// Post-retrieval quality gate and scoring, then a self re-rank by
/// score x tier multiplier.
pub fn filter_and_score(query: &str, results: Vec<SearchResult>) -> Vec<SearchResult> {
    let script = lang::dominant_script(query);
    let query_tokens = lang::content_tokens(query);
    let min_relevance = if script.is_latin() { 0.25 } else { 0.15 };

    let mut scored: Vec<SearchResult> = results
        .into_iter()
        .filter_map(|mut r| {
            let domain = urlnorm::domain_of(&r.url);
            if matches_domain(&domain, DENYLIST_DOMAINS) && !looks_official(&r) {
                debug!("dropping denylisted domain {}", domain);
                return None;
            }

            // Naive tokenization underperforms on CJK, so the hard overlap
            // rejection only applies to Latin-script queries.
            let overlap = token_overlap(&query_tokens, &r);
            if script.is_latin() && !query_tokens.is_empty() && overlap == 0 {
                return None;
            }

            let score = quality_score(query, script, &query_tokens, overlap, &domain, &r);
            if score < min_relevance {
                return None;
            }
            r.quality_score = score;
            Some(r)
        })
        .collect();

    scored.sort_by(|a, b| {
        let ka = a.quality_score * domain_tier_multiplier(&urlnorm::domain_of(&a.url));
        let kb = b.quality_score * domain_tier_multiplier(&urlnorm::domain_of(&b.url));
        kb.partial_cmp(&ka).unwrap_or(std::cmp::Ordering::Equal)
    });
    scored
}

fn token_overlap(query_tokens: &[String], r: &SearchResult) -> usize {
    let haystack = format!("{} {}", r.title, r.snippet).to_lowercase();
    query_tokens
        .iter()
        .filter(|t| haystack.contains(t.as_str()))
        .count()
}

fn looks_official(r: &SearchResult) -> bool {
    let text = format!("{} {}", r.title, r.snippet).to_lowercase();
    text.contains("official") || text.contains("investor relations") || text.contains("corporate")
}

fn quality_score(
    _query: &str,
    script: Script,
    query_tokens: &[String],
    overlap: usize,
    domain: &str,
    r: &SearchResult,
) -> f64 {
    let mut score = 0.35f64;

    if matches_domain(domain, PREMIUM_DOMAINS) {
        score += 0.3;
    } else if matches_domain(domain, GOOD_DOMAINS) {
        score += 0.15;
    }

    if !query_tokens.is_empty() {
        score += 0.2 * (overlap as f64 / query_tokens.len() as f64).min(1.0);
    }

    let text = format!("{} {}", r.title, r.snippet).to_lowercase();
    if QUALITY_KEYWORDS.iter().any(|k| text.contains(k)) {
        score += 0.1;
    }
    if SPAM_KEYWORDS.iter().any(|k| text.contains(k)) {
        score -= 0.2;
    }
    if r.snippet.chars().count() > 80 {
        score += 0.05;
    }
    if script.is_cjk() && lang::dominant_script(&r.snippet).is_cjk() {
        score += 0.1;
    }

    // Verified high-quality sources get a final multiplicative lift.
    if matches_domain(domain, PREMIUM_DOMAINS) {
        score *= 1.1;
    }
    score.clamp(0.0, 1.0)
}
