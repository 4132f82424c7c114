//! Jetstream wire format.
//!
//! Frames are JSON objects:
//!
//! ```json
//! {"did":"did:plc:…","time_us":1725911162329308,"kind":"commit",
//!  "commit":{"rev":"…","operation":"create","collection":"app.bsky.feed.post",
//!            "rkey":"3l3qo2vutsw2b","record":{"$type":"app.bsky.feed.post","text":"…"},
//!            "cid":"bafyrei…"}}
//! ```
//!
//! Decoding settles the commit operation into a [`CommitOp`] once, so the
//! subscriber never re-inspects raw fields.

use serde::Deserialize;

use feedgen_core::error::FeedError;
use feedgen_core::types::{record_uri, IncomingPost, POST_COLLECTION};

// ─── Raw frame ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawFrame {
    did: String,
    time_us: u64,
    kind: String,
    #[serde(default)]
    commit: Option<RawCommit>,
}

#[derive(Debug, Deserialize)]
struct RawCommit {
    #[serde(default)]
    rev: String,
    operation: String,
    collection: String,
    rkey: String,
    #[serde(default)]
    record: Option<serde_json::Value>,
    #[serde(default)]
    cid: Option<String>,
}

/// Reply reference on a post record.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReplyRef {
    pub root: StrongRef,
    pub parent: StrongRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StrongRef {
    pub uri: String,
    pub cid: String,
}

/// An `app.bsky.feed.post` record.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PostRecord {
    #[serde(rename = "$type", default)]
    pub record_type: String,
    pub text: String,
    #[serde(rename = "createdAt", default)]
    pub created_at: String,
    #[serde(default)]
    pub langs: Vec<String>,
    #[serde(default)]
    pub reply: Option<ReplyRef>,
    #[serde(default)]
    pub tags: Vec<String>,
}

// ─── Decoded event ───────────────────────────────────────────────────────────

/// What a commit did to its record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOp {
    /// A record was created. `record` is decoded only for post collections.
    Create {
        cid: String,
        record: Option<PostRecord>,
    },
    Delete,
    /// Any other operation (`update`, or a create with no payload).
    Other(String),
}

/// A repository commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub rev: String,
    pub collection: String,
    pub rkey: String,
    pub op: CommitOp,
}

/// Event category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Commit(Commit),
    /// `identity`, `account`, or anything newer; carried only for its position.
    Other(String),
}

/// One decoded Jetstream frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEvent {
    /// Author / repository DID.
    pub did: String,
    /// Stream position (microseconds since the epoch).
    pub time_us: u64,
    pub kind: EventKind,
}

impl StreamEvent {
    /// Decode one text frame.
    pub fn decode(text: &str) -> Result<Self, FeedError> {
        let raw: RawFrame =
            serde_json::from_str(text).map_err(|e| FeedError::Decode(e.to_string()))?;

        let kind = match (raw.kind.as_str(), raw.commit) {
            ("commit", Some(commit)) => EventKind::Commit(Commit::from_raw(commit)?),
            ("commit", None) => {
                return Err(FeedError::Decode("commit event without commit body".into()))
            }
            (other, _) => EventKind::Other(other.to_string()),
        };

        Ok(Self {
            did: raw.did,
            time_us: raw.time_us,
            kind,
        })
    }

    /// AT-URI of the commit's record, if this is a commit.
    pub fn record_uri(&self) -> Option<String> {
        match &self.kind {
            EventKind::Commit(c) => Some(record_uri(&self.did, &c.collection, &c.rkey)),
            EventKind::Other(_) => None,
        }
    }

    /// The commit, if it touches exactly the post collection.
    pub fn post_commit(&self) -> Option<&Commit> {
        match &self.kind {
            EventKind::Commit(c) if c.collection == POST_COLLECTION => Some(c),
            _ => None,
        }
    }

    /// Build the matching input for a newly created post.
    pub fn incoming_post(&self) -> Option<IncomingPost> {
        let commit = self.post_commit()?;
        match &commit.op {
            CommitOp::Create {
                cid,
                record: Some(record),
            } => Some(IncomingPost {
                uri: record_uri(&self.did, &commit.collection, &commit.rkey),
                cid: cid.clone(),
                author_did: self.did.clone(),
                text: record.text.clone(),
                langs: record.langs.clone(),
            }),
            _ => None,
        }
    }
}

impl Commit {
    fn from_raw(raw: RawCommit) -> Result<Self, FeedError> {
        let op = match (raw.operation.as_str(), raw.record) {
            ("create", Some(record)) => {
                let record = if raw.collection.starts_with(POST_COLLECTION) {
                    let post: PostRecord = serde_json::from_value(record)
                        .map_err(|e| FeedError::Decode(format!("post record: {e}")))?;
                    Some(post)
                } else {
                    None
                };
                CommitOp::Create {
                    cid: raw.cid.unwrap_or_default(),
                    record,
                }
            }
            ("delete", _) => CommitOp::Delete,
            (other, _) => CommitOp::Other(other.to_string()),
        };

        Ok(Self {
            rev: raw.rev,
            collection: raw.collection,
            rkey: raw.rkey,
            op,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CREATE: &str = r#"{
        "did": "did:plc:eygmaihciaxprqvxpfvl6flk",
        "time_us": 1725911162329308,
        "kind": "commit",
        "commit": {
            "rev": "3l3qo2vutsw2b",
            "operation": "create",
            "collection": "app.bsky.feed.post",
            "rkey": "3l3qo2vuowo2b",
            "record": {
                "$type": "app.bsky.feed.post",
                "createdAt": "2024-09-09T19:46:02.102Z",
                "langs": ["en"],
                "text": "Shipping an AI agent today",
                "reply": {
                    "parent": {"cid": "bafyreia", "uri": "at://did:plc:x/app.bsky.feed.post/1"},
                    "root":   {"cid": "bafyreib", "uri": "at://did:plc:x/app.bsky.feed.post/0"}
                }
            },
            "cid": "bafyreidwaivazkwu67xztlmuobx35hs2lnfh3kolmgfmucldvhd3sgzcqi"
        }
    }"#;

    #[test]
    fn decodes_post_create() {
        let ev = StreamEvent::decode(CREATE).unwrap();
        assert_eq!(ev.time_us, 1_725_911_162_329_308);

        let post = ev.incoming_post().unwrap();
        assert_eq!(
            post.uri,
            "at://did:plc:eygmaihciaxprqvxpfvl6flk/app.bsky.feed.post/3l3qo2vuowo2b"
        );
        assert_eq!(post.text, "Shipping an AI agent today");
        assert_eq!(post.langs, vec!["en"]);
        assert!(post.cid.starts_with("bafyreidw"));

        let EventKind::Commit(commit) = &ev.kind else {
            panic!("expected commit");
        };
        let CommitOp::Create { record: Some(r), .. } = &commit.op else {
            panic!("expected create with record");
        };
        assert!(r.reply.is_some());
    }

    #[test]
    fn decodes_delete() {
        let text = r#"{"did":"did:plc:a","time_us":7,"kind":"commit",
            "commit":{"rev":"r","operation":"delete","collection":"app.bsky.feed.post","rkey":"k"}}"#;
        let ev = StreamEvent::decode(text).unwrap();
        assert_eq!(ev.post_commit().unwrap().op, CommitOp::Delete);
        assert_eq!(
            ev.record_uri().as_deref(),
            Some("at://did:plc:a/app.bsky.feed.post/k")
        );
        assert!(ev.incoming_post().is_none());
    }

    #[test]
    fn create_without_record_is_other() {
        let text = r#"{"did":"did:plc:a","time_us":7,"kind":"commit",
            "commit":{"rev":"r","operation":"create","collection":"app.bsky.feed.post","rkey":"k","cid":"c"}}"#;
        let ev = StreamEvent::decode(text).unwrap();
        assert_eq!(ev.post_commit().unwrap().op, CommitOp::Other("create".into()));
    }

    #[test]
    fn other_collections_skip_record_decoding() {
        // A like record would not decode as a post; it must not be tried.
        let text = r#"{"did":"did:plc:a","time_us":9,"kind":"commit",
            "commit":{"rev":"r","operation":"create","collection":"app.bsky.feed.like","rkey":"k",
                      "record":{"subject":{"uri":"at://x","cid":"y"}},"cid":"c"}}"#;
        let ev = StreamEvent::decode(text).unwrap();
        assert!(ev.post_commit().is_none());
        let EventKind::Commit(c) = ev.kind else {
            panic!("expected commit");
        };
        assert_eq!(
            c.op,
            CommitOp::Create {
                cid: "c".into(),
                record: None
            }
        );
    }

    #[test]
    fn non_commit_kinds_keep_position() {
        let text = r#"{"did":"did:plc:a","time_us":11,"kind":"identity",
            "identity":{"did":"did:plc:a","handle":"a.bsky.social","seq":1,"time":"2024-09-09T19:46:02Z"}}"#;
        let ev = StreamEvent::decode(text).unwrap();
        assert_eq!(ev.kind, EventKind::Other("identity".into()));
        assert_eq!(ev.time_us, 11);
        assert!(ev.record_uri().is_none());
    }

    #[test]
    fn malformed_frames_are_decode_errors() {
        for text in [
            "not json",
            r#"{"did":"did:plc:a","kind":"commit"}"#,
            r#"{"did":"did:plc:a","time_us":1,"kind":"commit"}"#,
            // Post record without text.
            r#"{"did":"did:plc:a","time_us":1,"kind":"commit",
                "commit":{"rev":"r","operation":"create","collection":"app.bsky.feed.post","rkey":"k",
                          "record":{"$type":"app.bsky.feed.post"},"cid":"c"}}"#,
        ] {
            let err = StreamEvent::decode(text).unwrap_err();
            assert!(matches!(err, FeedError::Decode(_)), "{text}: {err}");
        }
    }
}
