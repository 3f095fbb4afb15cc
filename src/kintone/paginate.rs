use serde_json::Value;
use tracing::debug;

use super::client::{KintoneApi, KintoneApp};
use super::query::RecordQuery;
use crate::error::{AppError, AppResult};

/// Fetches every page of `query` and returns `(records, total)`.
///
/// Starts at offset 0 with the given page size and keeps going while
/// `page * limit + limit < total`, or until a page comes back empty. The first
/// failing page aborts the whole fetch. An empty result set is not an error.
pub async fn fetch_all(
    api: &dyn KintoneApi,
    app: KintoneApp,
    query: &RecordQuery,
    limit: usize,
) -> AppResult<(Vec<Value>, usize)> {
    if limit == 0 {
        return Err(AppError::InvalidInput("page limit must be positive".to_string()));
    }

    let first = api.get_records(app, &query.clone().page(limit, 0)).await?;
    let total = first.total_count;
    // totalCount comes from the remote, so it only bounds the loop
    let mut records = first.records;

    let mut page = 0;
    while page * limit + limit < total {
        page += 1;
        let next = api
            .get_records(app, &query.clone().page(limit, page * limit))
            .await?;
        if next.records.is_empty() {
            break;
        }
        records.extend(next.records);
    }

    debug!(app = %app, total, fetched = records.len(), pages = page + 1, "fetched all pages");
    Ok((records, total))
}
