use serde::{Deserialize, Serialize};

use crate::InvalidArgument;

/// Page/limit cursor for list operations.
///
/// An absent field means "server default". When present, `page` starts at 1
/// and `limit` is strictly positive; anything else is rejected at
/// construction so an invalid cursor never reaches the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit: Option<u32>,
}

impl PaginationOptions {
    pub fn new(page: Option<i64>, limit: Option<i64>) -> Result<Self, InvalidArgument> {
        Self::default().page_opt(page)?.limit_opt(limit)
    }

    /// Set the page number to start at (1-based).
    pub fn page(self, page: i64) -> Result<Self, InvalidArgument> {
        self.page_opt(Some(page))
    }

    /// Set the number of results to return per page.
    pub fn limit(self, limit: i64) -> Result<Self, InvalidArgument> {
        self.limit_opt(Some(limit))
    }

    pub fn page_number(&self) -> Option<u32> {
        self.page
    }

    pub fn page_size(&self) -> Option<u32> {
        self.limit
    }

    /// True when neither field is set and the server chooses both.
    pub fn is_server_default(&self) -> bool {
        self.page.is_none() && self.limit.is_none()
    }

    fn page_opt(mut self, page: Option<i64>) -> Result<Self, InvalidArgument> {
        self.page = match page {
            None => None,
            Some(p) if p >= 1 => Some(narrow("page", p)?),
            Some(p) => {
                return Err(InvalidArgument::new(
                    "page",
                    format!("must be >= 1, got {p}"),
                ))
            }
        };
        Ok(self)
    }

    fn limit_opt(mut self, limit: Option<i64>) -> Result<Self, InvalidArgument> {
        self.limit = match limit {
            None => None,
            Some(l) if l > 0 => Some(narrow("limit", l)?),
            Some(l) => {
                return Err(InvalidArgument::new(
                    "limit",
                    format!("must be > 0, got {l}"),
                ))
            }
        };
        Ok(self)
    }
}

fn narrow(name: &str, value: i64) -> Result<u32, InvalidArgument> {
    u32::try_from(value).map_err(|_| InvalidArgument::new(name, format!("{value} is out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_cursor() {
        let cursor = PaginationOptions::new(Some(2), Some(25)).unwrap();
        assert_eq!(cursor.page_number(), Some(2));
        assert_eq!(cursor.page_size(), Some(25));
        assert!(!cursor.is_server_default());
    }

    #[test]
    fn test_page_zero_rejected() {
        let err = PaginationOptions::new(Some(0), Some(10)).unwrap_err();
        assert_eq!(err.name, "page");
    }

    #[test]
    fn test_negative_limit_rejected() {
        let err = PaginationOptions::new(Some(1), Some(-5)).unwrap_err();
        assert_eq!(err.name, "limit");
    }

    #[test]
    fn test_zero_limit_rejected() {
        assert!(PaginationOptions::default().limit(0).is_err());
    }

    #[test]
    fn test_out_of_range_rejected() {
        assert!(PaginationOptions::default().page(i64::from(u32::MAX) + 1).is_err());
    }

    #[test]
    fn test_absent_fields_mean_server_default() {
        let cursor = PaginationOptions::new(None, None).unwrap();
        assert!(cursor.is_server_default());
        assert_eq!(serde_json::to_value(cursor).unwrap(), serde_json::json!({}));
    }

    #[test]
    fn test_chained_setters() {
        let cursor = PaginationOptions::default().page(3).unwrap().limit(50).unwrap();
        assert_eq!(
            serde_json::to_value(cursor).unwrap(),
            serde_json::json!({ "page": 3, "limit": 50 })
        );
    }
}
