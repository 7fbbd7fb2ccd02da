use crate::types::SearchResult;
use url::Url;

/// Query parameters that only track the click, never change the page.
const TRACKING_PARAMS: &[&str] = &[
    "gclid", "fbclid", "igshid", "mc_cid", "mc_eid", "mkt_tok", "ref", "ref_src", "ref_url",
    "yclid", "msclkid",
];

/// Canonicalize a URL into the stable form used as a dedup key: https scheme,
/// lowercase host, default port stripped, tracking params and fragment removed,
/// duplicate path separators collapsed, trailing slash trimmed.
///
/// Unparseable input is returned trimmed and lowercased so deduplication still
/// has something deterministic to key on.
pub fn canonicalize(raw: &str) -> String {
    let trimmed = raw.trim();
    let mut url = match Url::parse(trimmed) {
        Ok(u) => u,
        Err(_) => return trimmed.to_lowercase(),
    };

    if url.scheme() == "http" {
        // Ports are scheme-relative; drop an explicit :80 before switching.
        if url.port() == Some(80) {
            let _ = url.set_port(None);
        }
        let _ = url.set_scheme("https");
    }
    if url.port() == Some(443) {
        let _ = url.set_port(None);
    }
    url.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        // Re-serialize through the form encoder so decoded separators inside
        // values do not split pairs on the next parse.
        url.query_pairs_mut()
            .clear()
            .extend_pairs(kept.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    }

    let path = url.path().to_string();
    let collapsed = collapse_path(&path);
    if collapsed != path {
        url.set_path(&collapsed);
    }

    let mut out = url.to_string();
    if out.ends_with('/') && url.path() == "/" && url.query().is_none() {
        out.pop();
    } else if url.path().len() > 1 && url.path().ends_with('/') && url.query().is_none() {
        out.pop();
    }
    out
}

fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key)
}

fn collapse_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut prev_slash = false;
    for c in path.chars() {
        if c == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        out.push(c);
    }
    out
}

/// Dedup key for one result: canonical URL, or the lowercased title when the
/// backend gave us no URL at all.
pub fn dedup_key(result: &SearchResult) -> String {
    if result.url.trim().is_empty() {
        result.title.trim().to_lowercase()
    } else {
        canonicalize(&result.url)
    }
}

/// Registrable host of a URL, lowercased, `www.` stripped.
pub fn domain_of(raw: &str) -> String {
    Url::parse(raw)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
        .map(|h| h.trim_start_matches("www.").to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonicalize_is_idempotent() {
        let cases = [
            "HTTP://Example.COM:80/news//story/?utm_source=x&id=7#top",
            "https://example.com/path/",
            "https://example.com",
            "not a url at all",
        ];
        for raw in cases {
            let once = canonicalize(raw);
            let twice = canonicalize(&once);
            assert_eq!(once, twice, "not idempotent for {}", raw);
        }
    }

    #[test]
    fn test_tracking_params_removed() {
        let out = canonicalize(
            "https://example.com/a?utm_source=tw&utm_medium=social&gclid=123&q=tesla&ref=home",
        );
        assert!(!out.contains("utm_"));
        assert!(!out.contains("gclid"));
        assert!(!out.contains("ref="));
        assert!(out.contains("q=tesla"));
    }

    #[test]
    fn test_query_values_keep_encoded_separators() {
        let out =
            canonicalize("https://example.com/a?next=%2Fx%3Fy%3D1%26z%3D2&utm_source=t");
        assert!(out.contains("next=%2Fx%3Fy%3D1%26z%3D2"));
        assert!(!out.contains("utm_"));
        assert_eq!(canonicalize(&out), out);
    }

    #[test]
    fn test_scheme_port_and_slash_normalization() {
        assert_eq!(
            canonicalize("http://Example.com:80/News/"),
            "https://example.com/News"
        );
        assert_eq!(canonicalize("https://example.com:443/"), "https://example.com");
        assert_eq!(
            canonicalize("https://example.com//a///b"),
            "https://example.com/a/b"
        );
    }

    #[test]
    fn test_dedup_key_same_for_casing_and_tracking_variants() {
        let a = SearchResult::new("HTTP://Bloomberg.com/story?utm_campaign=x", "t", "s", "brave");
        let b = SearchResult::new("https://bloomberg.com/story", "t", "s", "duckduckgo");
        assert_eq!(dedup_key(&a), dedup_key(&b));
    }

    #[test]
    fn test_dedup_key_falls_back_to_title() {
        let r = SearchResult::new("", "  Tesla Q3 Earnings  ", "s", "brave");
        assert_eq!(dedup_key(&r), "tesla q3 earnings");
    }

    #[test]
    fn test_domain_of() {
        assert_eq!(domain_of("https://www.Bloomberg.com/news/x"), "bloomberg.com");
        assert_eq!(domain_of("nonsense"), "");
    }
}
