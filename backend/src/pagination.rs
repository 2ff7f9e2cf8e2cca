//! Bounded list queries for execution history and the activity feed.

use serde::{Deserialize, Serialize};

/// Default page size if not specified
pub const DEFAULT_PAGE_SIZE: i64 = 25;
/// Maximum allowed page size
pub const MAX_PAGE_SIZE: i64 = 100;

/// `?limit=` query parameter
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LimitParams {
    pub limit: Option<i64>,
}

impl LimitParams {
    pub fn limit(&self) -> i64 {
        clamp_limit(self.limit)
    }
}

/// Missing limit falls back to the default; anything else is clamped to 1..=MAX_PAGE_SIZE.
pub fn clamp_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
}

/// List envelope returned by history endpoints
#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub data: Vec<T>,
    pub limit: i64,
    pub count: usize,
}

impl<T> ListResponse<T> {
    pub fn new(data: Vec<T>, limit: i64) -> Self {
        Self {
            count: data.len(),
            data,
            limit,
        }
    }
}
