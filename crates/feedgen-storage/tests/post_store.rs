//! Behavioural tests shared by every post store backend, plus the feed
//! read service on top of them.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use feedgen_core::types::from_millis;
use feedgen_core::{
    FeedConfig, FeedError, FeedRegistry, FeedService, MatchedPost, PostStore, RetentionPolicy,
};
use feedgen_storage::{InMemoryStorage, SqliteStorage};

async fn backends() -> Vec<(&'static str, Arc<dyn PostStore>)> {
    vec![
        ("memory", Arc::new(InMemoryStorage::new())),
        ("sqlite", Arc::new(SqliteStorage::in_memory().await.unwrap())),
    ]
}

fn post(uri: &str, millis: i64) -> MatchedPost {
    MatchedPost::new(uri, "bafyreigh2akiscaildc", from_millis(millis))
}

async fn collect_all(store: &dyn PostStore, limit: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut cursor = String::new();
    loop {
        let page = store.page(limit, &cursor).await.unwrap();
        out.extend(page.posts.into_iter().map(|p| p.uri));
        match page.next_cursor {
            Some(next) => cursor = next.encode(),
            None => break,
        }
    }
    out
}

#[tokio::test]
async fn five_posts_in_pages_of_two() {
    for (name, store) in backends().await {
        for (i, uri) in ["p1", "p2", "p3", "p4", "p5"].iter().enumerate() {
            store.create(&post(uri, 1_000 + i as i64)).await.unwrap();
        }

        let first = store.page(2, "").await.unwrap();
        let uris: Vec<_> = first.posts.iter().map(|p| p.uri.as_str()).collect();
        assert_eq!(uris, vec!["p5", "p4"], "{name}");
        let cursor = first.next_cursor.expect("full page has a cursor").encode();

        let second = store.page(2, &cursor).await.unwrap();
        let uris: Vec<_> = second.posts.iter().map(|p| p.uri.as_str()).collect();
        assert_eq!(uris, vec!["p3", "p2"], "{name}");
        let cursor = second.next_cursor.expect("full page has a cursor").encode();

        let third = store.page(2, &cursor).await.unwrap();
        let uris: Vec<_> = third.posts.iter().map(|p| p.uri.as_str()).collect();
        assert_eq!(uris, vec!["p1"], "{name}");
        assert!(third.next_cursor.is_none(), "{name}");
    }
}

#[tokio::test]
async fn pagination_reconstructs_full_order_with_ties() {
    for (name, store) in backends().await {
        // Bursts share a timestamp; ties must break on uri.
        let mut expected = Vec::new();
        for i in 0..23 {
            let uri = format!("at://did:plc:x/app.bsky.feed.post/{i:03}");
            store.create(&post(&uri, 5_000 + (i / 4) as i64)).await.unwrap();
            expected.push(((5_000 + (i / 4)) as i64, uri));
        }
        expected.sort_by(|a, b| b.cmp(a));
        let expected: Vec<String> = expected.into_iter().map(|(_, u)| u).collect();

        for limit in [1, 2, 3, 7, 23] {
            assert_eq!(collect_all(store.as_ref(), limit).await, expected, "{name} limit={limit}");
        }
    }
}

#[tokio::test]
async fn pages_are_stable_under_newer_inserts() {
    for (name, store) in backends().await {
        for i in 0..6 {
            store.create(&post(&format!("at://p/{i}"), 100 + i)).await.unwrap();
        }
        let first = store.page(3, "").await.unwrap();
        let cursor = first.next_cursor.unwrap().encode();

        // A newer post lands ahead of the cursor between requests.
        store.create(&post("at://p/new", 1_000)).await.unwrap();

        let second = store.page(3, &cursor).await.unwrap();
        let uris: Vec<_> = second.posts.iter().map(|p| p.uri.as_str()).collect();
        assert_eq!(uris, vec!["at://p/2", "at://p/1", "at://p/0"], "{name}");
    }
}

#[tokio::test]
async fn create_twice_is_observably_once() {
    for (name, store) in backends().await {
        let p = post("at://dup", 42);
        assert!(store.create(&p).await.unwrap(), "{name}");
        let before = store.page(10, "").await.unwrap();

        assert!(!store.create(&p).await.unwrap(), "{name}");
        let after = store.page(10, "").await.unwrap();
        assert_eq!(before, after, "{name}");
        assert_eq!(store.count().await.unwrap(), 1, "{name}");
    }
}

#[tokio::test]
async fn invalid_cursor_is_a_request_error() {
    for (name, store) in backends().await {
        let err = store.page(10, "not-a-cursor").await.unwrap_err();
        assert!(matches!(err, FeedError::InvalidCursor { .. }), "{name}: {err}");
        assert!(err.is_client_error());
    }
}

#[tokio::test]
async fn evict_caps_six_hundred_fresh_rows_at_five_hundred() {
    for (name, store) in backends().await {
        let now = Utc::now().timestamp_millis();
        for i in 0..600 {
            store
                .create(&post(&format!("at://cap/{i:04}"), now - 600 + i))
                .await
                .unwrap();
        }

        let deleted = store.evict(&RetentionPolicy::default()).await.unwrap();
        assert_eq!(deleted, 100, "{name}");
        assert_eq!(store.count().await.unwrap(), 500, "{name}");

        // The survivors are the 500 newest.
        let all = collect_all(store.as_ref(), 100).await;
        assert_eq!(all.first().map(String::as_str), Some("at://cap/0599"), "{name}");
        assert_eq!(all.last().map(String::as_str), Some("at://cap/0100"), "{name}");
    }
}

#[tokio::test]
async fn evict_removes_exactly_the_expired_rows() {
    for (name, store) in backends().await {
        let now = Utc::now().timestamp_millis();
        let eight_days = 8 * 24 * 60 * 60 * 1_000;
        for i in 0..4 {
            store.create(&post(&format!("at://old/{i}"), now - eight_days - i)).await.unwrap();
        }
        for i in 0..3 {
            store.create(&post(&format!("at://fresh/{i}"), now - i)).await.unwrap();
        }

        let deleted = store.evict(&RetentionPolicy::default()).await.unwrap();
        assert_eq!(deleted, 4, "{name}");
        let left = collect_all(store.as_ref(), 10).await;
        assert_eq!(left, vec!["at://fresh/0", "at://fresh/1", "at://fresh/2"], "{name}");

        // Nothing left to do.
        assert_eq!(store.evict(&RetentionPolicy::default()).await.unwrap(), 0, "{name}");
    }
}

#[tokio::test]
async fn evict_counts_both_passes() {
    for (name, store) in backends().await {
        let now = Utc::now().timestamp_millis();
        store.create(&post("at://stale", now - 120_000)).await.unwrap();
        for i in 0..4 {
            store.create(&post(&format!("at://f/{i}"), now - i)).await.unwrap();
        }
        let policy = RetentionPolicy {
            max_age: Duration::from_secs(60),
            max_rows: 2,
        };
        assert_eq!(store.evict(&policy).await.unwrap(), 3, "{name}");
        assert_eq!(collect_all(store.as_ref(), 10).await, vec!["at://f/0", "at://f/1"], "{name}");
    }
}

// ─── FeedService ─────────────────────────────────────────────────────────────

const FEED: &str = "at://did:plc:publisher/app.bsky.feed.generator/agentic";

fn service(store: Arc<dyn PostStore>) -> FeedService {
    let registry = FeedRegistry::new(&[FeedConfig::new(FEED).keyword("agent")]).unwrap();
    FeedService::new(Arc::new(registry), store)
}

#[tokio::test]
async fn feed_service_serves_pages() {
    for (name, store) in backends().await {
        for i in 0..3 {
            store.create(&post(&format!("at://s/{i}"), 10 + i)).await.unwrap();
        }
        let svc = service(store);
        assert_eq!(svc.list_feeds(), vec![FEED.to_string()]);

        let page = svc.get_page(FEED, 2, None).await.unwrap();
        assert_eq!(page.entries, vec!["at://s/2", "at://s/1"], "{name}");
        let next = page.next_cursor.unwrap();

        let page = svc.get_page(FEED, 2, Some(&next)).await.unwrap();
        assert_eq!(page.entries, vec!["at://s/0"], "{name}");
        assert!(page.next_cursor.is_none(), "{name}");

        // Empty cursor behaves like no cursor.
        let page = svc.get_page(FEED, 100, Some("")).await.unwrap();
        assert_eq!(page.entries.len(), 3, "{name}");
    }
}

#[tokio::test]
async fn feed_service_rejects_bad_requests() {
    for (name, store) in backends().await {
        let svc = service(store);

        let err = svc.get_page("at://nope", 10, None).await.unwrap_err();
        assert!(matches!(err, FeedError::UnknownFeed(_)), "{name}");

        for limit in [0, 101] {
            let err = svc.get_page(FEED, limit, None).await.unwrap_err();
            assert!(matches!(err, FeedError::InvalidLimit { .. }), "{name}");
        }

        let err = svc.get_page(FEED, 10, Some("1700000000000")).await.unwrap_err();
        assert!(matches!(err, FeedError::InvalidCursor { .. }), "{name}");
    }
}
