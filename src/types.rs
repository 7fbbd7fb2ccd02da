use serde::{Deserialize, Serialize};

/// Verdict of the per-claim citation check.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum NliStatus {
    #[default]
    Unknown,
    Supported,
    Contradicted,
    Unsupported,
}

impl NliStatus {
    /// Severity rank used when merging verdicts for the same source.
    /// Contradictions always win; an explicit "supported" is the weakest claim.
    pub fn severity(self) -> u8 {
        match self {
            NliStatus::Contradicted => 3,
            NliStatus::Unsupported => 2,
            NliStatus::Unknown => 1,
            NliStatus::Supported => 0,
        }
    }
}

/// One retrieved candidate document, enriched as it moves through the pipeline.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub url: String,
    pub title: String,
    pub snippet: String,
    /// Extracted body text; empty until extraction succeeds.
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub word_count: usize,

    #[serde(default)]
    pub bm25_score: f64,
    #[serde(default)]
    pub semantic_score: f64,
    #[serde(default)]
    pub combined_score: f64,
    #[serde(default = "default_boost")]
    pub domain_boost: f64,
    #[serde(default = "default_boost")]
    pub recency_boost: f64,
    #[serde(default = "default_boost")]
    pub snippet_title_boost: f64,

    /// Backend that produced this result.
    pub source: String,
    pub timestamp: String,
    /// 1-based, dense, reassigned after every re-rank pass.
    #[serde(default)]
    pub citation_id: usize,
    /// Backend-assigned quality score in [0,1], used for the merge sort.
    #[serde(default)]
    pub quality_score: f64,

    #[serde(default)]
    pub nli_status: NliStatus,
    #[serde(default)]
    pub nli_confidence: f64,
    #[serde(default)]
    pub nli_reason: String,
    #[serde(default)]
    pub nli_last_claim: String,
}

fn default_boost() -> f64 {
    1.0
}

impl SearchResult {
    pub fn new(url: &str, title: &str, snippet: &str, source: &str) -> Self {
        Self {
            url: url.to_string(),
            title: title.to_string(),
            snippet: snippet.to_string(),
            source: source.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            domain_boost: 1.0,
            recency_boost: 1.0,
            snippet_title_boost: 1.0,
            ..Default::default()
        }
    }
}

/// Citation metadata keyed by citation id in the response.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    pub title: String,
    pub domain: String,
    pub url: String,
    pub source: String,
    pub display: String,
    pub quality: String,
    pub nli_status: NliStatus,
    pub nli_confidence: f64,
    pub nli_reason: String,
}

/// Caller-facing options for one research request.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ResearchOptions {
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_true")]
    pub synthesize_answer: bool,
    #[serde(default)]
    pub include_recent: bool,
    #[serde(default)]
    pub time_limit: Option<String>,
}

fn default_max_results() -> usize {
    8
}

fn default_true() -> bool {
    true
}

impl Default for ResearchOptions {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            synthesize_answer: true,
            include_recent: false,
            time_limit: None,
        }
    }
}

/// Aggregate response for one research request.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResearchResponse {
    pub query: String,
    pub synthesized_query: String,
    pub answer: String,
    pub sources: Vec<SearchResult>,
    pub citations: std::collections::BTreeMap<String, Citation>,
    pub confidence_score: f64,
    pub search_time_seconds: f64,
    pub synthesis_time_seconds: f64,
    pub total_time_seconds: f64,
    pub verification_notes: Vec<String>,
}

/// Slim form stored in the orchestrator cache. Content is cached separately by
/// URL, and citation ids are re-stamped on read rather than trusted.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CachedResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub quality_score: f64,
    pub timestamp: String,
    pub source: String,
}

impl From<&SearchResult> for CachedResult {
    fn from(r: &SearchResult) -> Self {
        Self {
            title: r.title.clone(),
            url: r.url.clone(),
            snippet: r.snippet.clone(),
            quality_score: r.quality_score,
            timestamp: r.timestamp.clone(),
            source: r.source.clone(),
        }
    }
}

impl From<CachedResult> for SearchResult {
    fn from(c: CachedResult) -> Self {
        SearchResult {
            url: c.url,
            title: c.title,
            snippet: c.snippet,
            quality_score: c.quality_score,
            timestamp: c.timestamp,
            source: c.source,
            domain_boost: 1.0,
            recency_boost: 1.0,
            snippet_title_boost: 1.0,
            ..Default::default()
        }
    }
}

// Brave Search API types. Field presence is defensive: the API omits keys
// freely and we never propagate untyped maps past this boundary.
#[derive(Debug, Deserialize)]
pub struct BraveSearchResponse {
    #[serde(default)]
    pub web: Option<BraveWebResults>,
}

#[derive(Debug, Deserialize)]
pub struct BraveWebResults {
    #[serde(default)]
    pub results: Vec<BraveWebResult>,
}

#[derive(Debug, Deserialize)]
pub struct BraveWebResult {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub age: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub family_friendly: Option<bool>,
    #[serde(default)]
    pub extra_snippets: Option<Vec<String>>,
}

// OpenAI-compatible chat/embeddings wire types.
#[derive(Debug, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub max_tokens: u32,
}

#[derive(Debug, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    #[serde(default)]
    pub message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize, Default)]
pub struct ChatChoiceMessage {
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct EmbeddingsRequest {
    pub model: String,
    pub input: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct EmbeddingsResponse {
    #[serde(default)]
    pub data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
pub struct EmbeddingItem {
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub embedding: Vec<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nli_severity_ordering() {
        assert!(NliStatus::Contradicted.severity() > NliStatus::Unsupported.severity());
        assert!(NliStatus::Unsupported.severity() > NliStatus::Unknown.severity());
        assert!(NliStatus::Unknown.severity() > NliStatus::Supported.severity());
    }

    #[test]
    fn test_cached_result_round_trip() {
        let mut r = SearchResult::new("https://example.com/a", "Example", "A snippet", "brave");
        r.quality_score = 0.75;
        r.citation_id = 4;

        let slim = CachedResult::from(&r);
        let json = serde_json::to_string(&slim).unwrap();
        let back: CachedResult = serde_json::from_str(&json).unwrap();
        let restored = SearchResult::from(back);

        assert_eq!(restored.title, r.title);
        assert_eq!(restored.url, r.url);
        assert_eq!(restored.snippet, r.snippet);
        assert_eq!(restored.quality_score, r.quality_score);
        assert_eq!(restored.source, r.source);
        // Citation ids are re-stamped on read, never carried through the cache.
        assert_eq!(restored.citation_id, 0);
    }

    #[test]
    fn test_brave_response_tolerates_missing_fields() {
        let parsed: BraveSearchResponse =
            serde_json::from_str(r#"{"web":{"results":[{"url":"https://a.com"}]}}"#).unwrap();
        let web = parsed.web.unwrap();
        assert_eq!(web.results.len(), 1);
        assert!(web.results[0].title.is_empty());
    }
}
