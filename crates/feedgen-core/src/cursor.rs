//! Pagination cursor: the opaque keyset token handed to feed readers.
//!
//! A cursor marks the last `(indexed_at, uri)` pair of a page. The next page
//! continues strictly after it under the `(indexed_at DESC, uri DESC)` order.
//! Wire format: `"{indexed_at_unix_millis}::{uri}"`.

use std::fmt;

use crate::error::FeedError;
use crate::types::MatchedPost;

const SEPARATOR: &str = "::";

/// Keyset pagination boundary.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct PageCursor {
    /// `indexed_at` of the last returned post, unix milliseconds.
    pub indexed_at_millis: i64,
    /// URI of the last returned post (tie-breaker).
    pub uri: String,
}

impl PageCursor {
    pub fn new(indexed_at_millis: i64, uri: impl Into<String>) -> Self {
        Self {
            indexed_at_millis,
            uri: uri.into(),
        }
    }

    /// The cursor pointing just past `post`.
    pub fn after(post: &MatchedPost) -> Self {
        Self::new(post.indexed_at_millis(), post.uri.clone())
    }

    /// Encode into the opaque wire form.
    pub fn encode(&self) -> String {
        format!("{}{SEPARATOR}{}", self.indexed_at_millis, self.uri)
    }

    /// Decode the wire form. An empty string is not a cursor; callers treat it
    /// as "start from the newest post" before getting here.
    pub fn decode(raw: &str) -> Result<Self, FeedError> {
        let invalid = |reason: &str| FeedError::InvalidCursor {
            cursor: raw.to_string(),
            reason: reason.to_string(),
        };

        let (millis, uri) = raw
            .split_once(SEPARATOR)
            .ok_or_else(|| invalid("expected '<millis>::<uri>'"))?;
        let indexed_at_millis = millis
            .parse::<i64>()
            .map_err(|e| invalid(&format!("bad timestamp: {e}")))?;
        if uri.is_empty() {
            return Err(invalid("empty uri"));
        }
        Ok(Self::new(indexed_at_millis, uri))
    }

    /// Decode an optional cursor from a request (`""` or absent = first page).
    pub fn parse_optional(raw: Option<&str>) -> Result<Option<Self>, FeedError> {
        match raw {
            None | Some("") => Ok(None),
            Some(s) => Self::decode(s).map(Some),
        }
    }

    /// Returns `true` if `post` sorts strictly after this cursor under
    /// `(indexed_at DESC, uri DESC)`, i.e. belongs on a later page.
    pub fn precedes(&self, post: &MatchedPost) -> bool {
        (post.indexed_at_millis(), post.uri.as_str()) < (self.indexed_at_millis, self.uri.as_str())
    }
}

impl fmt::Display for PageCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}
