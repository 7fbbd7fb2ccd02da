use std::env;

/// Process configuration, read once at startup. Missing credentials degrade the
/// corresponding feature instead of failing: no Brave key means the fallback
/// backend carries every search, no LLM key disables rewrite/synthesis/NLI.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub brave_api_key: Option<String>,
    pub brave_endpoint: String,
    pub llm_api_key: Option<String>,
    pub llm_base_url: String,
    pub llm_model: String,
    pub embed_model: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:5000".to_string()),
            brave_api_key: non_empty(env::var("BRAVE_API_KEY").ok()),
            brave_endpoint: env::var("BRAVE_ENDPOINT")
                .unwrap_or_else(|_| "https://api.search.brave.com/res/v1/web/search".to_string()),
            llm_api_key: non_empty(env::var("LLM_API_KEY").ok()),
            llm_base_url: env::var("LLM_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            llm_model: env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            embed_model: env::var("EMBED_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-small".to_string()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5000".to_string(),
            brave_api_key: None,
            brave_endpoint: "https://api.search.brave.com/res/v1/web/search".to_string(),
            llm_api_key: None,
            llm_base_url: "https://api.openai.com/v1".to_string(),
            llm_model: "gpt-4o-mini".to_string(),
            embed_model: "text-embedding-3-small".to_string(),
        }
    }
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_has_no_credentials() {
        let cfg = Config::default();
        assert!(cfg.brave_api_key.is_none());
        assert!(cfg.llm_api_key.is_none());
        assert!(!cfg.llm_base_url.is_empty());
    }

    #[test]
    fn test_non_empty_filters_blank() {
        assert_eq!(non_empty(Some("  ".to_string())), None);
        assert_eq!(non_empty(Some("k".to_string())), Some("k".to_string()));
        assert_eq!(non_empty(None), None);
    }
}
