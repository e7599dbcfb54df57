use serde::Serialize;

use crate::core::config::Settings;

#[derive(Debug, Serialize)]
pub(crate) struct PaginatedResponse<T> {
    pub(crate) items: Vec<T>,
    pub(crate) total_count: i64,
    pub(crate) skip: i64,
    pub(crate) limit: i64,
}

/// Normalised `(skip, limit)` for a list request.
pub(crate) fn window(settings: &Settings, skip: i64, limit: Option<i64>) -> (i64, i64) {
    (skip.max(0), settings.pagination().clamp_limit(limit))
}
