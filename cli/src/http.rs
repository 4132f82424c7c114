//! Feed generator XRPC endpoints.
//!
//! - `GET /.well-known/did.json`: did:web document
//! - `GET /xrpc/app.bsky.feed.describeFeedGenerator`: served feeds
//! - `GET /xrpc/app.bsky.feed.getFeedSkeleton`: one page of a feed
//! - `GET /health`: liveness probe

use axum::extract::{Query, State};
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::{info, warn, Level};

use feedgen_core::error::FeedError;
use feedgen_core::feed::{FeedService, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    pub feeds: FeedService,
    /// `did:web:{hostname}`
    pub service_did: String,
    pub hostname: String,
}

/// Build the router with request tracing.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/.well-known/did.json", get(did_document))
        .route(
            "/xrpc/app.bsky.feed.describeFeedGenerator",
            get(describe_feed_generator),
        )
        .route("/xrpc/app.bsky.feed.getFeedSkeleton", get(get_feed_skeleton))
        .route("/health", get(health))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
                tracing::span!(
                    Level::INFO,
                    "http_request",
                    method = %request.method(),
                    path = %request.uri().path(),
                    query = request.uri().query().unwrap_or("")
                )
            }),
        )
}

// ─── Errors ──────────────────────────────────────────────────────────────────

/// XRPC error, rendered as `{"error": kind, "message": …}`.
#[derive(Debug)]
pub enum ApiError {
    InvalidRequest(String),
    UnknownFeed(String),
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl From<FeedError> for ApiError {
    fn from(e: FeedError) -> Self {
        match e {
            FeedError::UnknownFeed(feed) => Self::UnknownFeed(format!("unknown feed: {feed}")),
            e if e.is_client_error() => Self::InvalidRequest(e.to_string()),
            e => Self::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, message) = match self {
            Self::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, "InvalidRequest", msg),
            Self::UnknownFeed(msg) => (StatusCode::BAD_REQUEST, "UnknownFeed", msg),
            Self::Internal(detail) => {
                tracing::error!(error = %detail, "failed to get feed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "InternalError",
                    "failed to get feed".to_string(),
                )
            }
        };
        (status, Json(ErrorBody { error, message })).into_response()
    }
}

// ─── Handlers ────────────────────────────────────────────────────────────────

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn did_document(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "@context": ["https://www.w3.org/ns/did/v1"],
        "id": state.service_did,
        "service": [{
            "id": "#bsky_fg",
            "type": "BskyFeedGenerator",
            "serviceEndpoint": format!("https://{}", state.hostname),
        }],
    }))
}

async fn describe_feed_generator(State(state): State<AppState>) -> Json<Value> {
    let feeds: Vec<Value> = state
        .feeds
        .list_feeds()
        .into_iter()
        .map(|uri| json!({ "uri": uri }))
        .collect();
    Json(json!({ "did": state.service_did, "feeds": feeds }))
}

#[derive(Debug, Deserialize)]
struct SkeletonParams {
    feed: Option<String>,
    limit: Option<String>,
    cursor: Option<String>,
}

#[derive(Debug, Serialize)]
struct SkeletonItem {
    post: String,
}

#[derive(Debug, Serialize)]
struct SkeletonResponse {
    feed: Vec<SkeletonItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cursor: Option<String>,
}

async fn get_feed_skeleton(
    State(state): State<AppState>,
    Query(params): Query<SkeletonParams>,
) -> Result<Json<SkeletonResponse>, ApiError> {
    let Some(feed) = params.feed.filter(|f| !f.is_empty()) else {
        warn!("getFeedSkeleton called without feed parameter");
        return Err(ApiError::InvalidRequest("feed parameter is required".into()));
    };

    let limit = match params.limit.as_deref().filter(|l| !l.is_empty()) {
        None => DEFAULT_PAGE_LIMIT,
        Some(raw) => match raw.parse::<usize>() {
            Ok(n) if (1..=MAX_PAGE_LIMIT).contains(&n) => n,
            _ => {
                warn!(limit = raw, "invalid limit parameter");
                return Err(ApiError::InvalidRequest(format!(
                    "limit must be between 1 and {MAX_PAGE_LIMIT}"
                )));
            }
        },
    };

    let page = state
        .feeds
        .get_page(&feed, limit, params.cursor.as_deref())
        .await?;

    info!(
        feed = %feed,
        limit,
        returned = page.entries.len(),
        next_cursor = page.next_cursor.as_deref().unwrap_or(""),
        "getFeedSkeleton served"
    );

    Ok(Json(SkeletonResponse {
        feed: page
            .entries
            .into_iter()
            .map(|post| SkeletonItem { post })
            .collect(),
        cursor: page.next_cursor,
    }))
}
