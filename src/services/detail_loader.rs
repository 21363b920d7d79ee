//! Concurrent change-detail loading.
//!
//! Fetches every requested change at once and waits for the whole batch.
//! A failed fetch is reported for that change only; it never fails the
//! batch and is not retried here.

use crate::error::AppError;
use crate::models::ChangeDetail;
use crate::services::review_service::ReviewService;
use futures::future::join_all;
use std::collections::BTreeSet;

/// Result of fetching one change.
#[derive(Debug)]
pub struct LoadResult {
    pub id: String,
    pub outcome: Result<ChangeDetail, AppError>,
}

/// Fetch details for all `ids` concurrently.
///
/// Results come back in the iteration order of `ids`, one per id, once
/// every fetch has finished.
pub async fn load_all<S>(service: &S, ids: &BTreeSet<String>) -> Vec<LoadResult>
where
    S: ReviewService + ?Sized,
{
    let fetches = ids.iter().map(|id| async move {
        let outcome = match service.fetch_detail(id).await {
            Ok(detail) if detail.id != *id => Err(AppError::decode(format!(
                "Requested change {} but server returned {}",
                id, detail.id
            ))),
            other => other,
        };
        LoadResult {
            id: id.clone(),
            outcome,
        }
    });

    join_all(fetches).await
}

/// Split a batch into loaded details and per-change failures.
///
/// Failures are logged here so every one of them leaves a trace.
pub fn partition(results: Vec<LoadResult>) -> (Vec<ChangeDetail>, Vec<(String, AppError)>) {
    let mut loaded = Vec::with_capacity(results.len());
    let mut failed = Vec::new();

    for result in results {
        match result.outcome {
            Ok(detail) => loaded.push(detail),
            Err(e) => {
                log::warn!("[poll] Failed to fetch change {}: {}", result.id, e);
                failed.push((result.id, e));
            }
        }
    }

    (loaded, failed)
}
