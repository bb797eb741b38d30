/// Cursor-based pagination.
///
/// Cursors are opaque to callers: a URL-safe base64 encoding of a small
/// JSON document carrying the last-seen position, the page size, a creation
/// stamp and a format version. They expire after `max_cursor_age` and are
/// rejected on any tampering (decode fails, callers surface a typed error —
/// never a silent restart from page one).
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Current cursor wire-format version.
pub const CURSOR_VERSION: i32 = 1;

/// Position token for keyset pagination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cursor {
    /// Last item ID from the previous page.
    #[serde(rename = "id")]
    pub last_id: String,
    /// Last item timestamp, for the keyset predicate.
    #[serde(rename = "timestamp")]
    pub last_timestamp: DateTime<Utc>,
    /// Last item sort value, for custom orderings.
    #[serde(rename = "sort")]
    pub last_sort: String,
    pub page_size: i32,
    pub created_at: DateTime<Utc>,
    pub version: i32,
}

/// Validated pagination parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CursorParams {
    pub page_size: i32,
    /// Encoded cursor; empty for the first page.
    pub cursor: String,
}

/// One page of results plus navigation cursors.
#[derive(Debug, Clone)]
pub struct CursorResult<T> {
    pub items: Vec<T>,
    /// Empty when there are no more pages.
    pub next_cursor: String,
    /// Empty on the first page.
    pub prev_cursor: String,
    pub has_more: bool,
    /// -1 when unknown (any page but the first).
    pub total_count: i64,
}

impl<T> Default for CursorResult<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            next_cursor: String::new(),
            prev_cursor: String::new(),
            has_more: false,
            total_count: -1,
        }
    }
}

/// Cursor pagination limits.
#[derive(Debug, Clone, PartialEq)]
pub struct PaginationConfig {
    pub default_page_size: i32,
    pub max_page_size: i32,
    pub min_page_size: i32,
    /// How long cursors remain valid.
    pub max_cursor_age: Duration,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_page_size: 20,
            max_page_size: 100,
            min_page_size: 1,
            max_cursor_age: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Encodes, decodes and validates cursors.
#[derive(Debug, Clone, Default)]
pub struct Paginator {
    config: PaginationConfig,
}

impl Paginator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: PaginationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PaginationConfig {
        &self.config
    }

    /// Clamp the requested page size into the configured bounds;
    /// zero or negative falls back to the default.
    pub fn parse_params(&self, page_size: i32, cursor: impl Into<String>) -> CursorParams {
        let mut size = page_size;
        if size <= 0 {
            size = self.config.default_page_size;
        }
        size = size.clamp(self.config.min_page_size, self.config.max_page_size);

        CursorParams {
            page_size: size,
            cursor: cursor.into(),
        }
    }

    /// Decode a cursor string. Empty input means "first page" and decodes
    /// to `None`; anything malformed, of an unknown version, or older than
    /// `max_cursor_age` is an error.
    pub fn decode(&self, cursor: &str) -> StoreResult<Option<Cursor>> {
        if cursor.is_empty() {
            return Ok(None);
        }

        let raw = URL_SAFE.decode(cursor).map_err(|_| {
            StoreError::validation_field("cursor", "invalid cursor format")
        })?;
        let decoded: Cursor = serde_json::from_slice(&raw).map_err(|_| {
            StoreError::validation_field("cursor", "invalid cursor content")
        })?;

        if decoded.version != CURSOR_VERSION {
            return Err(StoreError::validation_field(
                "cursor",
                format!("unsupported cursor version: {}", decoded.version),
            ));
        }

        let age = Utc::now().signed_duration_since(decoded.created_at);
        let max_age = chrono::Duration::from_std(self.config.max_cursor_age)
            .unwrap_or_else(|_| chrono::Duration::max_value());
        if age > max_age {
            return Err(StoreError::validation_field(
                "cursor",
                format!("cursor expired (age: {age}, max: {max_age})"),
            ));
        }

        Ok(Some(decoded))
    }

    /// Encode a cursor, stamping version and creation time.
    pub fn encode(&self, cursor: &Cursor) -> StoreResult<String> {
        let mut cursor = cursor.clone();
        cursor.version = CURSOR_VERSION;
        if cursor.created_at.timestamp() == 0 {
            cursor.created_at = Utc::now();
        }

        let json = serde_json::to_vec(&cursor)
            .map_err(|e| StoreError::Internal(format!("failed to encode cursor: {e}")))?;
        Ok(URL_SAFE.encode(json))
    }

    /// Build a cursor pointing at the given item position.
    pub fn create_cursor(
        &self,
        id: impl Into<String>,
        timestamp: DateTime<Utc>,
        page_size: i32,
    ) -> Cursor {
        Cursor {
            last_id: id.into(),
            last_timestamp: timestamp,
            last_sort: timestamp.to_rfc3339(),
            page_size,
            created_at: Utc::now(),
            version: CURSOR_VERSION,
        }
    }

    /// Assemble a `CursorResult` from a fetched page.
    ///
    /// `extract` yields `(id, created_at)` for an item; `had_cursor` is
    /// whether the request carried an incoming cursor (first page ⇒ no
    /// previous cursor).
    pub fn build_result<T>(
        &self,
        items: Vec<T>,
        params: &CursorParams,
        had_cursor: bool,
        total_count: i64,
        extract: impl Fn(&T) -> (String, DateTime<Utc>),
    ) -> StoreResult<CursorResult<T>> {
        let has_more = items.len() as i32 == params.page_size;

        let mut result = CursorResult {
            items,
            has_more,
            total_count,
            ..CursorResult::default()
        };

        if has_more {
            if let Some(last) = result.items.last() {
                let (id, ts) = extract(last);
                let cursor = self.create_cursor(id, ts, params.page_size);
                result.next_cursor = self.encode(&cursor)?;
            }
        }
        if had_cursor {
            if let Some(first) = result.items.first() {
                let (id, ts) = extract(first);
                let cursor = self.create_cursor(id, ts, params.page_size);
                result.prev_cursor = self.encode(&cursor)?;
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_cursor() -> Cursor {
        Cursor {
            last_id: "item-42".to_string(),
            last_timestamp: Utc::now(),
            last_sort: String::new(),
            page_size: 20,
            created_at: Utc::now(),
            version: CURSOR_VERSION,
        }
    }

    #[test]
    fn cursor_round_trip() {
        let p = Paginator::new();
        let cursor = sample_cursor();
        let encoded = p.encode(&cursor).unwrap();
        let decoded = p.decode(&encoded).unwrap().unwrap();
        assert_eq!(decoded.last_id, cursor.last_id);
        assert_eq!(decoded.page_size, cursor.page_size);
        assert_eq!(decoded.last_timestamp, cursor.last_timestamp);
    }

    #[test]
    fn empty_cursor_is_first_page() {
        let p = Paginator::new();
        assert!(p.decode("").unwrap().is_none());
    }

    #[test]
    fn tampered_cursor_is_rejected() {
        let p = Paginator::new();
        let mut encoded = p.encode(&sample_cursor()).unwrap();
        // Flip a byte in the middle of the token.
        let mid = encoded.len() / 2;
        let replacement = if encoded.as_bytes()[mid] == b'A' { 'B' } else { 'A' };
        encoded.replace_range(mid..mid + 1, &replacement.to_string());

        let err = p.decode(&encoded).unwrap_err();
        assert!(err.is_validation_error());
    }

    #[test]
    fn expired_cursor_is_rejected() {
        let p = Paginator::with_config(PaginationConfig {
            max_cursor_age: Duration::from_secs(60),
            ..PaginationConfig::default()
        });
        let mut cursor = sample_cursor();
        cursor.created_at = Utc::now() - chrono::Duration::seconds(61);
        let encoded = p.encode(&cursor).unwrap();

        let err = p.decode(&encoded).unwrap_err();
        assert!(err.is_validation_error());
        assert!(err.to_string().contains("expired"));
    }

    #[test]
    fn unknown_version_is_rejected() {
        let p = Paginator::new();
        let mut cursor = sample_cursor();
        cursor.version = 2;
        // Encode by hand: `encode` would stamp the supported version.
        let json = serde_json::to_vec(&cursor).unwrap();
        let encoded = URL_SAFE.encode(json);

        let err = p.decode(&encoded).unwrap_err();
        assert!(err.to_string().contains("unsupported cursor version"));
    }

    #[test]
    fn page_size_is_clamped() {
        let p = Paginator::new();
        assert_eq!(p.parse_params(0, "").page_size, 20);
        assert_eq!(p.parse_params(-5, "").page_size, 20);
        assert_eq!(p.parse_params(1000, "").page_size, 100);
        assert_eq!(p.parse_params(7, "").page_size, 7);
    }

    #[test]
    fn build_result_emits_cursors() {
        let p = Paginator::new();
        let params = p.parse_params(2, "anything");
        let items = vec![("a", Utc::now()), ("b", Utc::now())];
        let result = p
            .build_result(items, &params, true, -1, |(id, ts)| (id.to_string(), *ts))
            .unwrap();

        assert!(result.has_more);
        assert!(!result.next_cursor.is_empty());
        assert!(!result.prev_cursor.is_empty());

        let next = p.decode(&result.next_cursor).unwrap().unwrap();
        assert_eq!(next.last_id, "b");
        let prev = p.decode(&result.prev_cursor).unwrap().unwrap();
        assert_eq!(prev.last_id, "a");
    }

    #[test]
    fn short_page_has_no_next_cursor() {
        let p = Paginator::new();
        let params = p.parse_params(5, "");
        let items = vec![("only", Utc::now())];
        let result = p
            .build_result(items, &params, false, 1, |(id, ts)| (id.to_string(), *ts))
            .unwrap();

        assert!(!result.has_more);
        assert!(result.next_cursor.is_empty());
        assert!(result.prev_cursor.is_empty());
        assert_eq!(result.total_count, 1);
    }
}
