//! Pagination types

use serde::{Deserialize, Serialize};

/// Maximum items per page when paging by page number
const MAX_PER_PAGE: u64 = 100;

/// Offset/limit window requested from a paginated query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Rows to skip
    #[serde(default)]
    pub offset: u64,
    /// Rows to return
    #[serde(alias = "count")]
    pub limit: u64,
}

impl Pagination {
    pub fn new(offset: u64, limit: u64) -> Self {
        Self { offset, limit }
    }

    /// Build a window from a 1-indexed page number.
    ///
    /// - Page is clamped to minimum of 1
    /// - Per page is clamped to 1..=100
    pub fn from_page(page: u64, per_page: u64) -> Self {
        let page = page.max(1);
        let per_page = per_page.clamp(1, MAX_PER_PAGE);
        Self {
            offset: (page - 1) * per_page,
            limit: per_page,
        }
    }
}

/// Page of rows plus the total matching the query's filters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paginated<T> {
    /// Total count across all pages
    pub total: i64,
    /// Items for the requested window
    pub items: Vec<T>,
}

impl<T> Paginated<T> {
    /// Check if rows exist past the given window.
    pub fn has_more(&self, window: &Pagination) -> bool {
        (window.offset + self.items.len() as u64) < self.total.max(0) as u64
    }
}
