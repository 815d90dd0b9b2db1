//! Filters and pagination for the storage contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::JobType;

/// Default page size when a filter leaves it unset.
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Tombstone filter for job listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeletedFilter {
    /// Live and tombstoned rows alike.
    #[default]
    All,
    /// Live rows only.
    Live,
    /// Tombstoned rows only.
    DeletedOnly,
}

/// Filter for `find_jobs`.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub name: Option<String>,
    pub job_type: Option<JobType>,
    pub enabled: Option<bool>,
    pub deleted: DeletedFilter,
    /// 1-based page, clamped to `[1, last_page]`.
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

/// Terminal status of a job run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Failed,
    Running,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Running => "running",
        };
        write!(f, "{s}")
    }
}

/// Filter for `find_job_runs`. Time bounds are strict inequalities.
#[derive(Debug, Clone, Default)]
pub struct JobRunFilter {
    pub job_id: Option<String>,
    pub started_after: Option<DateTime<Utc>>,
    pub started_before: Option<DateTime<Utc>>,
    pub status: Option<RunStatus>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

/// One page of results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub page: u32,
    pub page_size: u32,
    pub total: u64,
    pub last_page: u32,
}

/// Resolve the requested page size against the default, floored at 1.
pub fn effective_page_size(page_size: Option<u32>) -> u32 {
    page_size.unwrap_or(DEFAULT_PAGE_SIZE).max(1)
}

/// Clamp a 1-based page request into `[1, last_page]` for `total` items.
/// An empty result set still reports one page.
pub fn clamp_page(page: Option<u32>, total: u64, page_size: u32) -> (u32, u32) {
    let last_page = ((total.max(1) + page_size as u64 - 1) / page_size as u64) as u32;
    (page.unwrap_or(1).clamp(1, last_page), last_page)
}

impl<T> PaginatedResponse<T> {
    /// Slice a fully materialised result set into the requested page.
    ///
    /// `page` is 1-based and clamped to `[1, last_page]`; an empty set still
    /// reports `last_page = 1`.
    pub fn paginate(items: Vec<T>, page: Option<u32>, page_size: Option<u32>) -> Self {
        let page_size = effective_page_size(page_size);
        let total = items.len() as u64;
        let (page, last_page) = clamp_page(page, total, page_size);

        let start = (page as usize - 1) * page_size as usize;
        let data: Vec<T> = items
            .into_iter()
            .skip(start)
            .take(page_size as usize)
            .collect();

        Self {
            data,
            page,
            page_size,
            total,
            last_page,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paginate_clamps_page_into_range() {
        let items: Vec<u32> = (0..25).collect();
        let page = PaginatedResponse::paginate(items.clone(), Some(99), Some(10));
        assert_eq!(page.page, 3);
        assert_eq!(page.data, vec![20, 21, 22, 23, 24]);
        assert_eq!(page.total, 25);
        assert_eq!(page.last_page, 3);

        let page = PaginatedResponse::paginate(items, Some(0), Some(10));
        assert_eq!(page.page, 1);
        assert_eq!(page.data.len(), 10);
    }

    #[test]
    fn paginate_empty_set_reports_one_page() {
        let page = PaginatedResponse::paginate(Vec::<u32>::new(), None, None);
        assert_eq!(page.page, 1);
        assert_eq!(page.last_page, 1);
        assert_eq!(page.total, 0);
        assert!(page.data.is_empty());
    }
}
