//! Query filters
//!
//! `Filter<T>` distinguishes "not filtering" from a legitimate zero value.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{AssetType, RequestStatus, RequestType};

/// A filter field that is either set or not set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter<T> {
    Present(T),
    Absent,
}

impl<T> Default for Filter<T> {
    fn default() -> Self {
        Filter::Absent
    }
}

impl<T> Filter<T> {
    /// True when absent, otherwise the predicate result.
    pub fn accepts(&self, predicate: impl FnOnce(&T) -> bool) -> bool {
        match self {
            Filter::Present(v) => predicate(v),
            Filter::Absent => true,
        }
    }
}

impl<T> From<Option<T>> for Filter<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Filter::Present(v),
            None => Filter::Absent,
        }
    }
}

/// Admin listing filter for requests.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestFilter {
    pub symbol_id: Filter<i64>,
    pub investor_id: Filter<i64>,
    pub account_no: Filter<String>,
    pub status: Filter<RequestStatus>,
    pub request_type: Filter<RequestType>,
    pub asset_type: Filter<AssetType>,
    pub loan_rate_from: Filter<Decimal>,
    pub loan_rate_to: Filter<Decimal>,
    pub created_from: Filter<DateTime<Utc>>,
    pub created_to: Filter<DateTime<Utc>>,
}

/// Offset pagination, newest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

impl Page {
    pub const MAX_LIMIT: i64 = 500;

    pub fn new(limit: i64, offset: i64) -> Self {
        Self {
            limit: limit.clamp(1, Self::MAX_LIMIT),
            offset: offset.max(0),
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(50, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_zero_is_a_real_filter_value() {
        let filter: Filter<Decimal> = Some(Decimal::ZERO).into();
        assert_eq!(filter, Filter::Present(Decimal::ZERO));
        assert!(filter.accepts(|v| *v == dec!(0)));
        assert!(!filter.accepts(|v| *v == dec!(0.1)));
    }

    #[test]
    fn test_absent_accepts_everything() {
        let filter: Filter<i64> = None.into();
        assert_eq!(filter, Filter::Absent);
        assert!(filter.accepts(|_| false));
    }

    #[test]
    fn test_page_clamps() {
        let page = Page::new(10_000, -5);
        assert_eq!(page.limit, Page::MAX_LIMIT);
        assert_eq!(page.offset, 0);
        assert_eq!(Page::new(0, 3).limit, 1);
    }
}
