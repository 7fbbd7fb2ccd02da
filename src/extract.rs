use crate::types::SearchResult;
use crate::AppState;
use anyhow::{anyhow, Result};
use scraper::{Html, Selector};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

/// Upper bound on stored extracted text.
pub const MAX_CONTENT_CHARS: usize = 8000;
/// Extractions below this many words are discarded; ranking then falls back
/// to snippet-only scoring for that result.
const MIN_CONTENT_WORDS: usize = 40;
const FETCH_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(8);
const MAX_CONCURRENT_FETCHES: usize = 8;

/// Sources kept for synthesis; bounds downstream LLM context size.
pub const SYNTHESIS_SOURCE_CAP: usize = 8;

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Candidate content containers, tried before falling back to the largest
/// text block and finally `<body>`.
const CONTENT_SELECTORS: &[(&str, f64)] = &[
    ("main", 3.0),
    ("article", 3.0),
    ("[role=\"main\"]", 2.5),
    ("#content", 2.0),
    (".content", 1.5),
    (".article-body", 2.0),
    (".post-content", 2.0),
];

const STRIP_TAGS: &[&str] = &[
    "script", "style", "nav", "footer", "header", "aside", "form", "iframe", "noscript", "svg",
];

const STRIP_CLASS_HINTS: &[&str] =
    &["ad", "ads", "advertisement", "social", "share", "comment", "comments", "sidebar"];

/// Populate `content` for a batch of results: cache-first, semaphore-bounded
/// concurrent fetches, boilerplate-stripped extraction. Failures leave content
/// empty. Returns the top sources by a blended usefulness score.
pub async fn enhance_results(
    state: &Arc<AppState>,
    results: Vec<SearchResult>,
) -> Vec<SearchResult> {
    if results.is_empty() {
        return results;
    }
    let permits = MAX_CONCURRENT_FETCHES.min(results.len());
    let semaphore = Arc::new(tokio::sync::Semaphore::new(permits));

    let tasks = results.into_iter().map(|r| {
        let state = Arc::clone(state);
        let semaphore = Arc::clone(&semaphore);
        async move {
            if !r.content.is_empty() {
                return r;
            }
            let _permit = semaphore.acquire().await.expect("semaphore closed");
            enhance_one(&state, r).await
        }
    });
    let enhanced = futures::future::join_all(tasks).await;

    let with_content = enhanced.iter().filter(|r| !r.content.is_empty()).count();
    info!(
        "content extraction: {}/{} results have content",
        with_content,
        enhanced.len()
    );
    select_top(enhanced)
}

async fn enhance_one(state: &Arc<AppState>, mut result: SearchResult) -> SearchResult {
    if let Some(cached) = state.content_cache.get(&result.url).await {
        debug!("content cache hit for {}", result.url);
        result.word_count = cached.split_whitespace().count();
        result.content = cached;
        return result;
    }

    match fetch_and_extract(state, &result.url).await {
        Ok(text) => {
            result.word_count = text.split_whitespace().count();
            state
                .content_cache
                .insert(result.url.clone(), text.clone())
                .await;
            result.content = text;
        }
        Err(e) => {
            debug!("extraction failed for {}: {}", result.url, e);
        }
    }
    result
}

async fn fetch_and_extract(state: &Arc<AppState>, url: &str) -> Result<String> {
    let parsed = Url::parse(url).map_err(|e| anyhow!("invalid URL: {}", e))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(anyhow!("unsupported scheme"));
    }

    let resp = state
        .http_client
        .get(url)
        .timeout(FETCH_TIMEOUT)
        .header("User-Agent", USER_AGENT)
        .header("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8")
        .send()
        .await
        .map_err(|e| anyhow!("fetch failed: {}", e))?;
    if !resp.status().is_success() {
        return Err(anyhow!("status {}", resp.status()));
    }
    // reqwest resolves the header charset and substitutes replacement
    // characters, so this always yields some string.
    let html = resp.text().await.map_err(|e| anyhow!("body read failed: {}", e))?;

    let text = extract_text(&html, &parsed);
    let words = text.split_whitespace().count();
    if words < MIN_CONTENT_WORDS {
        return Err(anyhow!("extraction too short ({} words)", words));
    }
    Ok(truncate_chars(&text, MAX_CONTENT_CHARS))
}

/// Readability first, then scored selector blocks, then the largest block,
/// then `<body>`.
pub fn extract_text(html: &str, base_url: &Url) -> String {
    match readability::extractor::extract(&mut html.as_bytes(), base_url) {
        Ok(product) if !product.content.trim().is_empty() => {
            let text = html2text::from_read(product.content.as_bytes(), 100);
            let normalized = normalize_text(&text);
            if normalized.split_whitespace().count() >= MIN_CONTENT_WORDS {
                return normalized;
            }
            block_extraction(html)
        }
        Ok(_) => block_extraction(html),
        Err(e) => {
            warn!("readability failed ({}), using block extraction", e);
            block_extraction(html)
        }
    }
}

fn block_extraction(html: &str) -> String {
    let document = Html::parse_document(html);

    let mut best: Option<(f64, String)> = None;
    for (selector_str, specificity) in CONTENT_SELECTORS {
        let Ok(selector) = Selector::parse(selector_str) else {
            continue;
        };
        for element in document.select(&selector) {
            let text = element_text(&element);
            let score = specificity * 1000.0 + text.len() as f64;
            if best.as_ref().map(|(s, _)| score > *s).unwrap_or(true) && !text.trim().is_empty() {
                best = Some((score, text));
            }
        }
    }
    if let Some((_, text)) = best {
        return normalize_text(&text);
    }

    // Largest paragraph-bearing block.
    if let Ok(selector) = Selector::parse("div, section") {
        let largest = document
            .select(&selector)
            .map(|e| element_text(&e))
            .max_by_key(|t| t.len());
        if let Some(text) = largest {
            if !text.trim().is_empty() {
                return normalize_text(&text);
            }
        }
    }

    if let Ok(selector) = Selector::parse("body") {
        if let Some(body) = document.select(&selector).next() {
            return normalize_text(&element_text(&body));
        }
    }
    String::new()
}

/// Plain text of an element with boilerplate children skipped, paragraph
/// breaks preserved, and table cells joined with separators.
fn element_text(element: &scraper::ElementRef) -> String {
    let mut out = String::new();
    collect_text(element, &mut out);
    out
}

fn is_boilerplate(element: &scraper::ElementRef) -> bool {
    if STRIP_TAGS.contains(&element.value().name()) {
        return true;
    }
    let hints = format!(
        "{} {}",
        element.value().attr("class").unwrap_or(""),
        element.value().attr("id").unwrap_or("")
    )
    .to_lowercase();
    !hints.is_empty()
        && hints
            .split(|c: char| !c.is_alphanumeric())
            .any(|w| STRIP_CLASS_HINTS.contains(&w))
}

fn collect_text(element: &scraper::ElementRef, out: &mut String) {
    for child in element.children() {
        if let Some(child_el) = scraper::ElementRef::wrap(child) {
            if is_boilerplate(&child_el) {
                continue;
            }
            let tag = child_el.value().name();
            collect_text(&child_el, out);
            match tag {
                "p" | "div" | "br" | "li" | "tr" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                    out.push('\n');
                }
                "td" | "th" => out.push_str(" | "),
                _ => {}
            }
        } else if let Some(text) = child.value().as_text() {
            out.push_str(&text.text);
        }
    }
}

/// Normalize smart punctuation and whitespace without destroying paragraph
/// structure.
pub fn normalize_text(text: &str) -> String {
    let replaced: String = text
        .chars()
        .map(|c| match c {
            '\u{2018}' | '\u{2019}' => '\'',
            '\u{201C}' | '\u{201D}' => '"',
            '\u{2013}' | '\u{2014}' => '-',
            '\u{00A0}' => ' ',
            other => other,
        })
        .collect();

    let mut out = String::with_capacity(replaced.len());
    let mut blank_run = 0usize;
    for line in replaced.lines() {
        let line = line.trim_end();
        let squeezed = squeeze_spaces(line.trim_start());
        if squeezed.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
            out.push('\n');
        } else {
            blank_run = 0;
            out.push_str(&squeezed);
            out.push('\n');
        }
    }
    out.trim().to_string()
}

fn squeeze_spaces(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut prev_space = false;
    for c in line.chars() {
        if c == ' ' || c == '\t' {
            if !prev_space {
                out.push(' ');
            }
            prev_space = true;
        } else {
            prev_space = false;
            out.push(c);
        }
    }
    out
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    text.chars().take(max).collect()
}

/// Keep the most useful sources for synthesis: blended relevance, normalized
/// content length, and a has-content bonus.
fn select_top(mut results: Vec<SearchResult>) -> Vec<SearchResult> {
    results.sort_by(|a, b| {
        blended_score(b)
            .partial_cmp(&blended_score(a))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    results.truncate(SYNTHESIS_SOURCE_CAP);
    results
}

fn blended_score(r: &SearchResult) -> f64 {
    let length_norm = (r.content.chars().count() as f64 / 4000.0).min(1.0);
    let has_content = if r.content.is_empty() { 0.0 } else { 1.0 };
    0.5 * r.quality_score + 0.3 * length_norm + 0.2 * has_content
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_text_smart_punctuation() {
        let input = "\u{201C}Hello\u{201D} \u{2014} it\u{2019}s\u{00A0}here";
        assert_eq!(normalize_text(input), "\"Hello\" - it's here");
    }

    #[test]
    fn test_normalize_text_collapses_blank_lines() {
        let input = "para one\n\n\n\n\npara two   with   spaces";
        assert_eq!(normalize_text(input), "para one\n\npara two with spaces");
    }

    #[test]
    fn test_block_extraction_prefers_article() {
        let html = r#"
            <html><body>
              <nav>Home News About Contact and a lot of navigation text here</nav>
              <article><p>The actual story text lives here with enough words to matter.</p></article>
              <footer>copyright footer text</footer>
            </body></html>"#;
        let text = block_extraction(html);
        assert!(text.contains("actual story text"));
        assert!(!text.contains("navigation"));
        assert!(!text.contains("copyright"));
    }

    #[test]
    fn test_block_extraction_strips_script_and_style() {
        let html = r#"
            <html><body>
              <div class="content"><p>visible words</p><script>var hidden = 1;</script>
              <style>.x{color:red}</style></div>
            </body></html>"#;
        let text = block_extraction(html);
        assert!(text.contains("visible words"));
        assert!(!text.contains("hidden"));
        assert!(!text.contains("color:red"));
    }

    #[test]
    fn test_block_extraction_preserves_table_cells() {
        let html = r#"
            <html><body><main><table>
              <tr><td>Q3 revenue</td><td>25.1B</td></tr>
            </table></main></body></html>"#;
        let text = block_extraction(html);
        assert!(text.contains("Q3 revenue | 25.1B |"));
    }

    #[test]
    fn test_truncate_chars_char_boundary_safe() {
        let text = "日本語のテキスト";
        let out = truncate_chars(text, 4);
        assert_eq!(out, "日本語の");
    }

    #[test]
    fn test_select_top_caps_and_prefers_content() {
        let mut results = Vec::new();
        for i in 0..12 {
            let mut r = SearchResult::new(
                &format!("https://example.com/{}", i),
                "t",
                "s",
                "brave",
            );
            r.quality_score = 0.5;
            if i % 2 == 0 {
                r.content = "word ".repeat(500);
            }
            results.push(r);
        }
        let out = select_top(results);
        assert_eq!(out.len(), SYNTHESIS_SOURCE_CAP);
        // Everything with content outranks everything without.
        assert!(out.iter().take(6).all(|r| !r.content.is_empty()));
    }

    #[tokio::test]
    async fn test_enhance_results_empty_batch() {
        let state = Arc::new(crate::AppState::for_tests());
        let out = enhance_results(&state, Vec::new()).await;
        assert!(out.is_empty());
    }
}
