//! Shared types for the ingestion and read paths.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// NSID of the Bluesky post collection.
pub const POST_COLLECTION: &str = "app.bsky.feed.post";

/// Build the AT-URI of a record: `at://{did}/{collection}/{rkey}`.
pub fn record_uri(did: &str, collection: &str, rkey: &str) -> String {
    format!("at://{did}/{collection}/{rkey}")
}

// ─── MatchedPost ─────────────────────────────────────────────────────────────

/// A post retained because it matched at least one feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedPost {
    /// AT-URI of the post record (primary key).
    pub uri: String,
    /// Content identifier of the record version.
    pub cid: String,
    /// When the post was retained, at millisecond precision.
    pub indexed_at: DateTime<Utc>,
}

impl MatchedPost {
    /// Create a post retained at `indexed_at`.
    ///
    /// The timestamp is truncated to whole milliseconds, the precision the
    /// pagination cursor carries.
    pub fn new(uri: impl Into<String>, cid: impl Into<String>, indexed_at: DateTime<Utc>) -> Self {
        Self {
            uri: uri.into(),
            cid: cid.into(),
            indexed_at: truncate_millis(indexed_at),
        }
    }

    /// Create a post retained now.
    pub fn now(uri: impl Into<String>, cid: impl Into<String>) -> Self {
        Self::new(uri, cid, Utc::now())
    }

    /// `indexed_at` as unix milliseconds.
    pub fn indexed_at_millis(&self) -> i64 {
        self.indexed_at.timestamp_millis()
    }
}

/// Convert unix milliseconds back into a UTC timestamp.
pub fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

fn truncate_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    from_millis(ts.timestamp_millis())
}

// ─── IncomingPost ────────────────────────────────────────────────────────────

/// A newly created post from the event stream, carrying what matching needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncomingPost {
    /// AT-URI of the post.
    pub uri: String,
    /// Content identifier of the record.
    pub cid: String,
    /// DID of the author.
    pub author_did: String,
    /// Post body.
    pub text: String,
    /// Language tags set by the author's client.
    pub langs: Vec<String>,
}

impl IncomingPost {
    /// Convert into the stored form, retained now.
    pub fn into_matched(self) -> MatchedPost {
        MatchedPost::now(self.uri, self.cid)
    }
}

// ─── FeedPage ────────────────────────────────────────────────────────────────

/// One page of a feed as handed to the read API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FeedPage {
    /// Post URIs, newest first.
    pub entries: Vec<String>,
    /// Cursor for the next page; `None` at end of data.
    pub next_cursor: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_uri_format() {
        assert_eq!(
            record_uri("did:plc:abc", POST_COLLECTION, "3l3qo2vuowo2b"),
            "at://did:plc:abc/app.bsky.feed.post/3l3qo2vuowo2b"
        );
    }

    #[test]
    fn matched_post_truncates_to_millis() {
        let ts = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        let post = MatchedPost::new("at://a", "cid", ts);
        assert_eq!(post.indexed_at_millis(), 1_700_000_000_123);
        assert_eq!(post.indexed_at, from_millis(1_700_000_000_123));
    }
}
