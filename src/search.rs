use crate::types::*;
use crate::urlnorm;
use crate::{brave, enhance, AppState};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long the primary backend runs alone before the fallback is launched
/// alongside it.
const PRIMARY_GRACE: std::time::Duration = std::time::Duration::from_millis(650);

/// Below this many primary results the fallback backend is always consulted.
const MIN_PRIMARY_RESULTS: usize = 3;

fn source_priority(source: &str) -> u8 {
    if source == brave::SOURCE_NAME {
        2
    } else {
        1
    }
}

/// Orchestrated dual-backend search: cache check, query enhancement, a grace
/// period race between backends, merge/dedup, quality sort, citation-id
/// assignment. Degrades to an empty list, never errors.
pub async fn enhanced_search(
    state: &Arc<AppState>,
    query: &str,
    max_results: usize,
    include_recent: bool,
    time_limit: Option<&str>,
) -> (Vec<SearchResult>, String) {
    let cache_key = format!(
        "q={}|n={}|recent={}|time={}",
        query,
        max_results,
        include_recent,
        time_limit.unwrap_or("")
    );
    if let Some((enhanced, cached)) = state.search_cache.get(&cache_key).await {
        debug!("search cache hit for query");
        let mut results: Vec<SearchResult> =
            cached.into_iter().map(SearchResult::from).collect();
        assign_citation_ids(&mut results);
        return (results, enhanced);
    }

    let enhanced = enhance::enhance(state, query, include_recent).await;
    let search_query = if enhanced.is_empty() {
        query.to_string()
    } else {
        enhanced.clone()
    };

    let freshness = time_limit.map(str::to_string).or_else(|| {
        if include_recent {
            Some("pw".to_string())
        } else {
            None
        }
    });

    let primary_handle = spawn_primary(state, &search_query, max_results, freshness);
    let secondary_state = Arc::clone(state);
    let secondary_query = search_query.clone();
    let merged = race_backends(
        primary_handle,
        move || {
            let state = Arc::clone(&secondary_state);
            let query = secondary_query.clone();
            tokio::spawn(async move { state.duckduckgo.search(&query, max_results).await })
        },
        max_results,
    )
    .await;
    let mut results = dedup_and_sort(merged);

    if results.is_empty() {
        // Absolute floor before giving up: one more direct fallback attempt.
        warn!("both backends empty, final fallback attempt");
        results = dedup_and_sort(state.duckduckgo.search(&search_query, max_results).await);
    }

    results.truncate(max_results);
    assign_citation_ids(&mut results);

    // Empty sets are never cached: a transient outage must not pin a query
    // to zero sources for the cache TTL.
    if !results.is_empty() {
        let slim: Vec<CachedResult> = results.iter().map(CachedResult::from).collect();
        state
            .search_cache
            .insert(cache_key, (search_query.clone(), slim))
            .await;
    }

    info!("orchestrated search produced {} results", results.len());
    (results, search_query)
}

/// Race the primary task against a short grace period; if it is still running,
/// launch the fallback concurrently so total latency stays bounded. The
/// primary's results still count when it finishes after the grace period. The
/// fallback is awaited only when the primary came back short, and aborted
/// otherwise. Returns the primary-first concatenation.
async fn race_backends(
    mut primary_handle: JoinHandle<anyhow::Result<Vec<SearchResult>>>,
    spawn_secondary: impl Fn() -> JoinHandle<Vec<SearchResult>>,
    max_results: usize,
) -> Vec<SearchResult> {
    let mut secondary_handle: Option<JoinHandle<Vec<SearchResult>>> = None;

    let primary = match tokio::time::timeout(PRIMARY_GRACE, &mut primary_handle).await {
        Ok(join_result) => flatten_primary(join_result),
        Err(_) => {
            debug!("primary backend exceeded grace period, launching fallback");
            secondary_handle = Some(spawn_secondary());
            flatten_primary(primary_handle.await)
        }
    };

    let need_secondary =
        primary.len() < MIN_PRIMARY_RESULTS || primary.len() < max_results;
    let secondary = if need_secondary {
        match secondary_handle.take() {
            Some(handle) => handle.await.unwrap_or_default(),
            None => spawn_secondary().await.unwrap_or_default(),
        }
    } else {
        // In-flight fallback no longer needed; cancel and swallow the error.
        if let Some(handle) = secondary_handle.take() {
            handle.abort();
        }
        Vec::new()
    };

    // Primary results lead: they passed the stricter quality gate.
    let mut merged = primary;
    merged.extend(secondary);
    merged
}

fn spawn_primary(
    state: &Arc<AppState>,
    query: &str,
    max_results: usize,
    freshness: Option<String>,
) -> JoinHandle<anyhow::Result<Vec<SearchResult>>> {
    let state = Arc::clone(state);
    let query = query.to_string();
    tokio::spawn(async move {
        state
            .brave
            .search(&query, max_results, freshness.as_deref())
            .await
    })
}

fn flatten_primary(
    join_result: Result<anyhow::Result<Vec<SearchResult>>, tokio::task::JoinError>,
) -> Vec<SearchResult> {
    match join_result {
        Ok(Ok(results)) => results,
        Ok(Err(e)) => {
            warn!("primary backend failed: {}", e);
            Vec::new()
        }
        Err(e) => {
            warn!("primary backend task join failed: {}", e);
            Vec::new()
        }
    }
}

/// Deduplicate by canonical URL (stable, first occurrence wins) and stable
/// sort by source priority then backend quality score, both descending.
pub fn dedup_and_sort(results: Vec<SearchResult>) -> Vec<SearchResult> {
    let mut seen = HashSet::new();
    let mut deduped: Vec<SearchResult> = results
        .into_iter()
        .filter(|r| seen.insert(urlnorm::dedup_key(r)))
        .collect();
    deduped.sort_by(|a, b| {
        source_priority(&b.source)
            .cmp(&source_priority(&a.source))
            .then(
                b.quality_score
                    .partial_cmp(&a.quality_score)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
    });
    deduped
}

/// Stamp dense 1-based citation ids matching the current order.
pub fn assign_citation_ids(results: &mut [SearchResult]) {
    for (i, r) in results.iter_mut().enumerate() {
        r.citation_id = i + 1;
    }
}
