use crate::config::Config;
use crate::types::*;
use anyhow::{anyhow, Result};
use backoff::future::retry;
use backoff::ExponentialBackoffBuilder;
use tracing::debug;

/// Items accepted per embeddings call; larger inputs are chunked by callers.
pub const EMBED_MAX_BATCH: usize = 16;

/// OpenAI-compatible completion + embeddings client. A missing API key makes
/// the client report itself unavailable; callers then take their rule-based or
/// lexical fallbacks.
#[derive(Debug, Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    chat_model: String,
    embed_model: String,
}

impl LlmClient {
    pub fn new(config: &Config, http: reqwest::Client) -> Self {
        Self {
            http,
            api_key: config.llm_api_key.clone(),
            base_url: config.llm_base_url.trim_end_matches('/').to_string(),
            chat_model: config.llm_model.clone(),
            embed_model: config.embed_model.clone(),
        }
    }

    pub fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    fn key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| anyhow!("LLM API key not configured"))
    }

    /// One chat completion. 429/5xx and transport errors are retried briefly;
    /// credential errors are permanent.
    pub async fn chat(
        &self,
        system: &str,
        user: &str,
        temperature: f64,
        max_tokens: u32,
    ) -> Result<String> {
        let key = self.key()?.to_string();
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatCompletionRequest {
            model: self.chat_model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
            temperature,
            max_tokens,
        };

        let client = self.http.clone();
        let parsed: ChatCompletionResponse = retry(
            ExponentialBackoffBuilder::new()
                .with_initial_interval(std::time::Duration::from_millis(300))
                .with_max_interval(std::time::Duration::from_secs(2))
                .with_max_elapsed_time(Some(std::time::Duration::from_secs(8)))
                .build(),
            || async {
                let resp = client
                    .post(&url)
                    .bearer_auth(&key)
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| backoff::Error::transient(anyhow!("chat request failed: {}", e)))?;
                classify_status(resp.status())?;
                resp.json::<ChatCompletionResponse>()
                    .await
                    .map_err(|e| backoff::Error::permanent(anyhow!("chat parse failed: {}", e)))
            },
        )
        .await?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(anyhow!("chat completion returned empty content"));
        }
        Ok(text)
    }

    /// Embed a batch of texts, preserving input order. The per-call item limit
    /// is enforced here by chunking.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let key = self.key()?.to_string();
        let url = format!("{}/embeddings", self.base_url);
        let mut out: Vec<Vec<f32>> = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(EMBED_MAX_BATCH) {
            let body = EmbeddingsRequest {
                model: self.embed_model.clone(),
                input: chunk.to_vec(),
            };
            let client = self.http.clone();
            let parsed: EmbeddingsResponse = retry(
                ExponentialBackoffBuilder::new()
                    .with_initial_interval(std::time::Duration::from_millis(300))
                    .with_max_interval(std::time::Duration::from_secs(2))
                    .with_max_elapsed_time(Some(std::time::Duration::from_secs(8)))
                    .build(),
                || async {
                    let resp = client
                        .post(&url)
                        .bearer_auth(&key)
                        .json(&body)
                        .send()
                        .await
                        .map_err(|e| {
                            backoff::Error::transient(anyhow!("embeddings request failed: {}", e))
                        })?;
                    classify_status(resp.status())?;
                    resp.json::<EmbeddingsResponse>().await.map_err(|e| {
                        backoff::Error::permanent(anyhow!("embeddings parse failed: {}", e))
                    })
                },
            )
            .await?;

            if parsed.data.len() != chunk.len() {
                return Err(anyhow!(
                    "embeddings count mismatch: sent {}, got {}",
                    chunk.len(),
                    parsed.data.len()
                ));
            }
            let mut items = parsed.data;
            items.sort_by_key(|i| i.index);
            debug!("embedded batch of {}", items.len());
            out.extend(items.into_iter().map(|i| i.embedding));
        }
        Ok(out)
    }
}

fn classify_status(status: reqwest::StatusCode) -> std::result::Result<(), backoff::Error<anyhow::Error>> {
    if status.is_success() {
        return Ok(());
    }
    let err = anyhow!("LLM endpoint returned status {}", status);
    if status.as_u16() == 429 || status.is_server_error() {
        Err(backoff::Error::transient(err))
    } else {
        Err(backoff::Error::permanent(err))
    }
}

/// Cosine similarity clamped to [0,1]; zero vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut na = 0.0f64;
    let mut nb = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += (*x as f64) * (*y as f64);
        na += (*x as f64) * (*x as f64);
        nb += (*y as f64) * (*y as f64);
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    (dot / (na.sqrt() * nb.sqrt())).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_unavailable_without_key() {
        let client = LlmClient::new(&Config::default(), reqwest::Client::new());
        assert!(!client.is_available());
    }

    #[tokio::test]
    async fn test_chat_errors_without_key() {
        let client = LlmClient::new(&Config::default(), reqwest::Client::new());
        assert!(client.chat("sys", "user", 0.2, 64).await.is_err());
        assert!(client.embed(&["a".to_string()]).await.is_err());
    }

    #[test]
    fn test_cosine_similarity_bounds() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]), 1.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        let mid = cosine_similarity(&[1.0, 0.0], &[1.0, 1.0]);
        assert!(mid > 0.0 && mid < 1.0);
    }
}
