// Shared list-response shape for every paginated endpoint in spec §6:
// `{data, pagination: {total, limit, offset, hasMore}, filters}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 500;

#[derive(Debug, Deserialize)]
pub struct PageParams {
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

impl PageParams {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

#[derive(Debug, Serialize)]
pub struct Pagination {
    pub total: usize,
    pub limit: i64,
    pub offset: i64,
    #[serde(rename = "hasMore")]
    pub has_more: bool,
}

#[derive(Debug, Serialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub pagination: Pagination,
    pub filters: Value,
}

/// Slices `items` (already filtered and ordered by the caller) to the
/// requested page and wraps it with the pagination envelope.
pub fn paginate<T: Clone>(items: &[T], params: &PageParams, filters: Value) -> Paginated<T> {
    let total = items.len();
    let offset = params.offset() as usize;
    let limit = params.limit() as usize;
    let page: Vec<T> = items.iter().skip(offset).take(limit).cloned().collect();
    let has_more = offset + page.len() < total;
    Paginated {
        data: page,
        pagination: Pagination {
            total,
            limit: params.limit(),
            offset: params.offset(),
            has_more,
        },
        filters,
    }
}
