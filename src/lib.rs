pub mod brave;
pub mod config;
pub mod duckduckgo;
pub mod enhance;
pub mod extract;
pub mod lang;
pub mod llm;
pub mod pipeline;
pub mod rank;
pub mod search;
pub mod synthesize;
pub mod types;
pub mod urlnorm;
pub mod verify;

pub use types::*;

use moka::future::Cache;

/// Process-wide state, constructed once at startup and passed down. Each
/// cache is an independent concern with its own capacity and TTL.
#[derive(Debug)]
pub struct AppState {
    pub config: config::Config,
    pub http_client: reqwest::Client,
    pub brave: brave::BraveClient,
    pub duckduckgo: duckduckgo::DuckDuckGoClient,
    pub llm: llm::LlmClient,
    /// key: composite query key -> (enhanced query, slim result set)
    pub search_cache: Cache<String, (String, Vec<CachedResult>)>,
    /// key: canonical URL -> extracted text
    pub content_cache: Cache<String, String>,
    /// key: exact embedded text -> vector
    pub embedding_cache: Cache<String, Vec<f32>>,
    /// key: query + recency flag -> rewritten query
    pub rewrite_cache: Cache<String, String>,
}

impl AppState {
    pub fn new(config: config::Config) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .connect_timeout(std::time::Duration::from_secs(3))
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        Ok(Self::with_client(config, http_client))
    }

    pub fn with_client(config: config::Config, http_client: reqwest::Client) -> Self {
        Self {
            brave: brave::BraveClient::new(&config, http_client.clone()),
            duckduckgo: duckduckgo::DuckDuckGoClient::new(http_client.clone()),
            llm: llm::LlmClient::new(&config, http_client.clone()),
            http_client,
            config,
            search_cache: Cache::builder()
                .max_capacity(1_000)
                .time_to_live(std::time::Duration::from_secs(60 * 30))
                .build(),
            content_cache: Cache::builder()
                .max_capacity(5_000)
                .time_to_live(std::time::Duration::from_secs(60 * 120))
                .build(),
            embedding_cache: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(std::time::Duration::from_secs(60 * 60))
                .build(),
            rewrite_cache: Cache::builder()
                .max_capacity(2_000)
                .time_to_live(std::time::Duration::from_secs(60 * 30))
                .build(),
        }
    }

    /// State with no credentials and a near-zero network timeout, so tests
    /// exercise the degraded paths deterministically.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(20))
            .connect_timeout(std::time::Duration::from_millis(20))
            .build()
            .expect("test HTTP client");
        Self::with_client(config::Config::default(), http_client)
    }
}
