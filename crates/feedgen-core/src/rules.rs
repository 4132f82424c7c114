//! Feed rules and the matching engine.
//!
//! Each feed is configured with a keyword list and an optional language
//! allow-list. At startup every [`FeedConfig`] is compiled into an immutable
//! [`RuleSet`]; the full set lives in a [`FeedRegistry`] that is shared by the
//! subscriber (matching) and the read service (feed lookup).

use std::collections::{BTreeMap, HashSet};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::FeedError;
use crate::types::IncomingPost;

/// Static configuration for a single feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedConfig {
    /// AT-URI of the feed generator record.
    pub uri: String,
    /// Literal terms matched as whole words, case-insensitively.
    pub keywords: Vec<String>,
    /// Accepted language tags. Empty means no language filter.
    #[serde(default)]
    pub langs: Vec<String>,
}

impl FeedConfig {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            keywords: vec![],
            langs: vec![],
        }
    }

    /// Add a keyword.
    pub fn keyword(mut self, keyword: impl Into<String>) -> Self {
        self.keywords.push(keyword.into());
        self
    }

    /// Add an accepted language tag.
    pub fn lang(mut self, lang: impl Into<String>) -> Self {
        self.langs.push(lang.into());
        self
    }
}

/// AT-URI of a feed generator record published by `publisher_did`.
pub fn feed_uri(publisher_did: &str, feed_name: &str) -> String {
    format!("at://{publisher_did}/app.bsky.feed.generator/{feed_name}")
}

/// The built-in "agentic" feed: AI agent and LLM tooling chatter in English.
pub fn agentic_feed(publisher_did: &str, feed_name: &str) -> FeedConfig {
    const KEYWORDS: &[&str] = &[
        "agentic",
        "agentic engineering",
        "agentic ai",
        "llm agents",
        "multi-agent",
        "llm benchmarks",
        "ai workflows",
        "llm orchestration",
        "context window",
        "claude",
        "claude opus",
        "claude sonnet",
        "claude haiku",
        "gpt-",
        "codex",
        "composer-1",
        "gemini",
        "hugging face",
        "opencode",
        "meta llama",
    ];
    FeedConfig {
        uri: feed_uri(publisher_did, feed_name),
        keywords: KEYWORDS.iter().map(|k| k.to_string()).collect(),
        langs: vec!["en".into()],
    }
}

// ─── RuleSet ─────────────────────────────────────────────────────────────────

/// Compiled, immutable matching predicate for one feed.
#[derive(Debug, Clone)]
pub struct RuleSet {
    feed_id: String,
    pattern: Regex,
    /// `None` means any language (including none) is accepted.
    langs: Option<HashSet<String>>,
}

impl RuleSet {
    /// Compile a feed's keywords into one escaped, case-insensitive,
    /// word-bounded alternation.
    ///
    /// Word boundaries are ASCII: any non-ASCII character next to a keyword
    /// counts as a separator, so "Claudeを使って" matches `claude`.
    pub fn compile(config: &FeedConfig) -> Result<Self, FeedError> {
        if config.keywords.is_empty() {
            return Err(FeedError::EmptyKeywords {
                feed: config.uri.clone(),
            });
        }

        let alternation = config
            .keywords
            .iter()
            .map(|k| regex::escape(k))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = Regex::new(&format!(r"(?i)(?-u:\b)(?:{alternation})(?-u:\b)")).map_err(|e| {
            FeedError::InvalidPattern {
                feed: config.uri.clone(),
                reason: e.to_string(),
            }
        })?;

        let langs = if config.langs.is_empty() {
            None
        } else {
            Some(config.langs.iter().cloned().collect())
        };

        Ok(Self {
            feed_id: config.uri.clone(),
            pattern,
            langs,
        })
    }

    /// The feed this rule belongs to.
    pub fn feed_id(&self) -> &str {
        &self.feed_id
    }

    /// Returns `true` if the post passes the language filter and its text
    /// contains any keyword as a whole word.
    pub fn matches(&self, post: &IncomingPost) -> bool {
        // Language check first: a set lookup is cheaper than the text scan.
        if let Some(allowed) = &self.langs {
            if !post.langs.iter().any(|l| allowed.contains(l)) {
                return false;
            }
        }
        self.pattern.is_match(&post.text)
    }
}

// ─── FeedRegistry ────────────────────────────────────────────────────────────

/// All configured feeds, keyed by feed URI. Built once, never mutated.
#[derive(Debug, Clone, Default)]
pub struct FeedRegistry {
    rules: BTreeMap<String, RuleSet>,
}

impl FeedRegistry {
    /// Compile every feed config. Fails on the first invalid or duplicate feed.
    pub fn new(configs: &[FeedConfig]) -> Result<Self, FeedError> {
        let mut rules = BTreeMap::new();
        for config in configs {
            let rule = RuleSet::compile(config)?;
            if rules.insert(config.uri.clone(), rule).is_some() {
                return Err(FeedError::Config(format!("duplicate feed '{}'", config.uri)));
            }
        }
        Ok(Self { rules })
    }

    /// Returns `true` if at least one feed accepts the post.
    pub fn matches_any(&self, post: &IncomingPost) -> bool {
        self.rules.values().any(|rule| rule.matches(post))
    }

    /// Feed URIs of every feed that accepts the post.
    pub fn matching_feeds<'a>(&'a self, post: &'a IncomingPost) -> impl Iterator<Item = &'a str> {
        self.rules
            .values()
            .filter(move |rule| rule.matches(post))
            .map(RuleSet::feed_id)
    }

    pub fn contains(&self, feed_id: &str) -> bool {
        self.rules.contains_key(feed_id)
    }

    /// All feed URIs, sorted.
    pub fn feed_ids(&self) -> Vec<String> {
        self.rules.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
