//! Process configuration loaded from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};

use feedgen_core::rules::{agentic_feed, FeedConfig};
use feedgen_core::store::RetentionPolicy;

const DEFAULT_DATABASE_URL: &str = "sqlite:./feedgen.db";
const DEFAULT_FIREHOSE_URL: &str = "wss://jetstream1.us-east.bsky.network/subscribe";

/// Where posts and checkpoints live, chosen by `DATABASE_URL`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    /// `postgres://…` or `postgresql://…`
    Postgres(String),
    /// A SQLite URL or file path.
    Sqlite(String),
    /// `memory`: nothing survives a restart.
    Memory,
}

impl Backend {
    pub fn from_url(url: &str) -> Self {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Self::Postgres(url.to_string())
        } else if url == "memory" {
            Self::Memory
        } else {
            Self::Sqlite(url.to_string())
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Postgres(_) => "postgres",
            Self::Sqlite(_) => "sqlite",
            Self::Memory => "memory",
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP port (`PORT`, default 3000).
    pub port: u16,
    /// Public hostname, used for the did:web identity (`FEEDGEN_HOSTNAME`).
    pub hostname: String,
    /// DID that published the feed generator records (`FEEDGEN_PUBLISHER_DID`).
    /// Only `serve` requires it.
    pub publisher_did: Option<String>,
    pub backend: Backend,
    pub firehose_url: String,
    /// Name of the built-in feed (`FEEDGEN_FEED_NAME`, default `agentic`).
    pub feed_name: String,
    /// JSON array of feed definitions replacing the built-in feed.
    pub feeds_path: Option<PathBuf>,
    pub retention: RetentionPolicy,
    pub retention_interval: Duration,
    pub reconnect_delay: Duration,
    pub checkpoint_interval: Duration,
    pub log_json: bool,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let max_age_hours: u64 = parse_or(&var, "FEEDGEN_RETENTION_MAX_AGE_HOURS", 168)?;
        let max_age_secs = max_age_hours
            .checked_mul(60 * 60)
            .ok_or_else(|| anyhow!("FEEDGEN_RETENTION_MAX_AGE_HOURS '{max_age_hours}' is too large"))?;
        let max_rows: usize = parse_or(&var, "FEEDGEN_RETENTION_MAX_ROWS", 500)?;
        let retention_secs: u64 = parse_or(&var, "FEEDGEN_RETENTION_INTERVAL_SECS", 60)?;
        if retention_secs == 0 {
            bail!("FEEDGEN_RETENTION_INTERVAL_SECS must be greater than zero");
        }

        let config = Self {
            port: parse_or(&var, "PORT", 3000)?,
            hostname: var("FEEDGEN_HOSTNAME").unwrap_or_else(|| "localhost".to_string()),
            publisher_did: var("FEEDGEN_PUBLISHER_DID"),
            backend: Backend::from_url(
                &var("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            ),
            firehose_url: var("FEEDGEN_FIREHOSE_URL")
                .unwrap_or_else(|| DEFAULT_FIREHOSE_URL.to_string()),
            feed_name: var("FEEDGEN_FEED_NAME").unwrap_or_else(|| "agentic".to_string()),
            feeds_path: var("FEEDGEN_FEEDS_PATH").map(PathBuf::from),
            retention: RetentionPolicy {
                max_age: Duration::from_secs(max_age_secs),
                max_rows,
            },
            retention_interval: Duration::from_secs(retention_secs),
            reconnect_delay: Duration::from_secs(parse_or(
                &var,
                "FEEDGEN_RECONNECT_DELAY_SECS",
                5,
            )?),
            checkpoint_interval: Duration::from_secs(parse_or(
                &var,
                "FEEDGEN_CHECKPOINT_INTERVAL_SECS",
                5,
            )?),
            log_json: parse_or(&var, "FEEDGEN_LOG_JSON", false)?,
        };

        Ok(config)
    }

    /// The publisher DID, or an error naming the missing variable.
    pub fn require_publisher_did(&self) -> anyhow::Result<&str> {
        self.publisher_did
            .as_deref()
            .ok_or_else(|| anyhow!("FEEDGEN_PUBLISHER_DID is required"))
    }

    /// `did:web:{hostname}`, the identity of this service.
    pub fn service_did(&self) -> String {
        format!("did:web:{}", self.hostname)
    }

    /// Feed definitions: the file at `feeds_path` if set, otherwise the
    /// built-in feed.
    pub fn feeds(&self) -> anyhow::Result<Vec<FeedConfig>> {
        match &self.feeds_path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading feeds file {}", path.display()))?;
                let feeds: Vec<FeedConfig> = serde_json::from_str(&raw)
                    .with_context(|| format!("parsing feeds file {}", path.display()))?;
                if feeds.is_empty() {
                    bail!("feeds file {} defines no feeds", path.display());
                }
                Ok(feeds)
            }
            None => Ok(vec![agentic_feed(
                self.require_publisher_did()?,
                &self.feed_name,
            )]),
        }
    }
}

fn parse_or<T>(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("invalid {key} '{raw}': {e}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults() {
        let c = load(&[]).unwrap();
        assert_eq!(c.port, 3000);
        assert_eq!(c.hostname, "localhost");
        assert_eq!(c.service_did(), "did:web:localhost");
        assert_eq!(c.backend, Backend::Sqlite("sqlite:./feedgen.db".into()));
        assert_eq!(c.firehose_url, DEFAULT_FIREHOSE_URL);
        assert_eq!(c.retention, RetentionPolicy::default());
        assert_eq!(c.retention_interval, Duration::from_secs(60));
        assert_eq!(c.reconnect_delay, Duration::from_secs(5));
        assert_eq!(c.checkpoint_interval, Duration::from_secs(5));
        assert!(!c.log_json);
        assert!(c.publisher_did.is_none());
        assert!(c.require_publisher_did().is_err());
    }

    #[test]
    fn overrides() {
        let c = load(&[
            ("PORT", "8080"),
            ("FEEDGEN_HOSTNAME", "feeds.example.com"),
            ("FEEDGEN_PUBLISHER_DID", "did:plc:abc"),
            ("DATABASE_URL", "postgres://u:p@db:5432/feeds"),
            ("FEEDGEN_RETENTION_MAX_AGE_HOURS", "24"),
            ("FEEDGEN_RETENTION_MAX_ROWS", "1000"),
            ("FEEDGEN_LOG_JSON", "true"),
        ])
        .unwrap();
        assert_eq!(c.port, 8080);
        assert_eq!(c.service_did(), "did:web:feeds.example.com");
        assert_eq!(c.backend.name(), "postgres");
        assert_eq!(c.retention.max_age, Duration::from_secs(24 * 3600));
        assert_eq!(c.retention.max_rows, 1000);
        assert!(c.log_json);

        let feeds = c.feeds().unwrap();
        assert_eq!(feeds.len(), 1);
        assert_eq!(
            feeds[0].uri,
            "at://did:plc:abc/app.bsky.feed.generator/agentic"
        );
    }

    #[test]
    fn invalid_numbers_are_errors() {
        for (key, value) in [
            ("PORT", "http"),
            ("PORT", "70000"),
            ("FEEDGEN_RETENTION_MAX_ROWS", "-1"),
            ("FEEDGEN_RECONNECT_DELAY_SECS", "5s"),
            ("FEEDGEN_RETENTION_INTERVAL_SECS", "0"),
            ("FEEDGEN_LOG_JSON", "yes"),
            ("FEEDGEN_RETENTION_MAX_AGE_HOURS", "18446744073709551615"),
        ] {
            let err = load(&[(key, value)]).unwrap_err();
            assert!(err.to_string().contains(key), "{key}={value}: {err}");
        }
    }

    #[test]
    fn backend_selection() {
        assert_eq!(
            Backend::from_url("postgresql://localhost/feeds").name(),
            "postgres"
        );
        assert_eq!(Backend::from_url("./data/feeds.db").name(), "sqlite");
        assert_eq!(Backend::from_url("memory"), Backend::Memory);
    }

    #[test]
    fn feeds_file_replaces_builtin() {
        let path = std::env::temp_dir().join(format!("feedgen-feeds-{}.json", std::process::id()));
        std::fs::write(
            &path,
            r#"[{"uri":"at://did:plc:x/app.bsky.feed.generator/rust","keywords":["rustlang","cargo"]}]"#,
        )
        .unwrap();

        let c = load(&[("FEEDGEN_FEEDS_PATH", path.to_str().unwrap())]).unwrap();
        let feeds = c.feeds().unwrap();
        assert_eq!(feeds[0].keywords, vec!["rustlang", "cargo"]);
        assert!(feeds[0].langs.is_empty());

        std::fs::remove_file(&path).unwrap();
    }
}
