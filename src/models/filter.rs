use serde::Deserialize;

use crate::queries::builder::{Select, SortOrder};

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_LIMIT: u32 = 20;
pub const MAX_LIMIT: u32 = 250;

/// Pagination and time-range criteria for list and count queries.
///
/// Timestamps are unix seconds and compared strictly. `page` and `limit`
/// are normalised on read, so a filter deserialized from user input never
/// produces a zero or unbounded page.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct QueryFilter {
    pub page: u32,
    pub limit: u32,
    pub created_after: Option<i64>,
    pub created_before: Option<i64>,
    pub updated_after: Option<i64>,
    pub updated_before: Option<i64>,
    pub sort: SortOrder,
}

impl Default for QueryFilter {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            limit: DEFAULT_LIMIT,
            created_after: None,
            created_before: None,
            updated_after: None,
            updated_before: None,
            sort: SortOrder::Asc,
        }
    }
}

impl QueryFilter {
    pub fn page(&self) -> u32 {
        self.page.max(1)
    }

    pub fn limit(&self) -> u32 {
        self.limit.clamp(1, MAX_LIMIT)
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page() - 1) * u64::from(self.limit())
    }

    /// Adds the time-range conditions for `table` to a select.
    pub fn apply_conditions(&self, mut builder: Select, table: &str) -> Select {
        if let Some(after) = self.created_after {
            builder = builder.where_gt(&format!("{}.created_on", table), after);
        }
        if let Some(before) = self.created_before {
            builder = builder.where_lt(&format!("{}.created_on", table), before);
        }
        if let Some(after) = self.updated_after {
            builder = builder.where_gt(&format!("{}.updated_on", table), after);
        }
        if let Some(before) = self.updated_before {
            builder = builder.where_lt(&format!("{}.updated_on", table), before);
        }
        builder
    }

    /// Adds the time-range conditions plus ordering and paging.
    pub fn apply_to_select(&self, builder: Select, table: &str) -> Select {
        let builder = self.apply_conditions(builder, table);
        let builder = builder.order_by(&format!("{}.id", table), self.sort);

        let offset = self.offset();
        let builder = builder.limit(u64::from(self.limit()));
        if offset > 0 {
            builder.offset(offset)
        } else {
            builder
        }
    }
}
