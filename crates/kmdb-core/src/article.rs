use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::dedup::OutletId;

/// Position of an article in the pipeline.
///
/// Forward order is `New -> Downloaded -> Classified -> Resolved -> Ready`.
/// `Skipped` and `Failed` are terminal divergences reachable from any
/// claimable stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    New,
    Downloaded,
    Classified,
    Resolved,
    Ready,
    Skipped,
    Failed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::New => "new",
            Stage::Downloaded => "downloaded",
            Stage::Classified => "classified",
            Stage::Resolved => "resolved",
            Stage::Ready => "ready",
            Stage::Skipped => "skipped",
            Stage::Failed => "failed",
        }
    }

    /// The forward successor of a claimable stage.
    pub fn next(&self) -> Option<Stage> {
        match self {
            Stage::New => Some(Stage::Downloaded),
            Stage::Downloaded => Some(Stage::Classified),
            Stage::Classified => Some(Stage::Resolved),
            Stage::Resolved => Some(Stage::Ready),
            Stage::Ready | Stage::Skipped | Stage::Failed => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Ready | Stage::Skipped | Stage::Failed)
    }

    /// Stages a worker can claim articles from.
    pub fn is_claimable(&self) -> bool {
        !self.is_terminal()
    }

    /// Only forward moves to the direct successor, or a single divergence
    /// into `Skipped`/`Failed`, are allowed.
    pub fn can_transition_to(&self, to: Stage) -> bool {
        if self.is_terminal() {
            return false;
        }
        matches!(to, Stage::Skipped | Stage::Failed) || self.next() == Some(to)
    }

    pub const CLAIMABLE: [Stage; 4] = [
        Stage::New,
        Stage::Downloaded,
        Stage::Classified,
        Stage::Resolved,
    ];

    pub const ALL: [Stage; 7] = [
        Stage::New,
        Stage::Downloaded,
        Stage::Classified,
        Stage::Resolved,
        Stage::Ready,
        Stage::Skipped,
        Stage::Failed,
    ];
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "new" => Ok(Stage::New),
            "downloaded" => Ok(Stage::Downloaded),
            "classified" => Ok(Stage::Classified),
            "resolved" => Ok(Stage::Resolved),
            "ready" => Ok(Stage::Ready),
            "skipped" => Ok(Stage::Skipped),
            "failed" => Ok(Stage::Failed),
            _ => Err(format!("Unknown stage: {}", s)),
        }
    }
}

/// Why an article left the pipeline early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Republishes another outlet's story.
    SameNews,
    /// Page could not be fetched or parsed.
    DownloadError,
    /// Extracted title was empty.
    EmptyTitle,
    /// Unexpected, non-transient failure in a processing stage.
    ProcessingError,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::SameNews => "same_news",
            SkipReason::DownloadError => "download_error",
            SkipReason::EmptyTitle => "empty_title",
            SkipReason::ProcessingError => "processing_error",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SkipReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "same_news" => Ok(SkipReason::SameNews),
            "download_error" => Ok(SkipReason::DownloadError),
            "empty_title" => Ok(SkipReason::EmptyTitle),
            "processing_error" => Ok(SkipReason::ProcessingError),
            _ => Err(format!("Unknown skip reason: {}", s)),
        }
    }
}

/// How the article entered the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArticleSource {
    /// Picked up from an outlet feed.
    Rss,
    /// Submitted by an editor. Trusted as relevant and never deduplicated.
    Manual,
}

impl ArticleSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArticleSource::Rss => "rss",
            ArticleSource::Manual => "manual",
        }
    }
}

impl FromStr for ArticleSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rss" => Ok(ArticleSource::Rss),
            "manual" => Ok(ArticleSource::Manual),
            _ => Err(format!("Unknown article source: {}", s)),
        }
    }
}

/// Coverage category predicted by the category classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Local,
    Eu,
    World,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Local => "local",
            Category::Eu => "eu",
            Category::World => "world",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" | "hungarian-news" => Ok(Category::Local),
            "eu" | "eu-news" => Ok(Category::Eu),
            "world" | "world-news" => Ok(Category::World),
            _ => Err(format!("Unknown category: {}", s)),
        }
    }
}

/// An article row as seen by the stage workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: i64,
    pub source_url: String,
    pub clean_url: String,
    pub newspaper_id: Option<OutletId>,
    pub source: ArticleSource,
    pub stage: Stage,
    pub skip_reason: Option<SkipReason>,
    pub title: String,
    pub description: String,
    pub text: String,
    pub authors: String,
    pub pub_date: Option<DateTime<Utc>>,
    pub is_paywalled: bool,
    pub retry_count: u32,
    pub classification_score: Option<f64>,
    pub classification_label: Option<bool>,
    pub category: Option<Category>,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub download_requeued: bool,
    /// Near-duplicate group, keyed by the id of the article that founded it.
    pub group_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Article {
    pub fn is_manual(&self) -> bool {
        self.source == ArticleSource::Manual
    }

    pub fn calculate_next_retry(&self, config: &RetryConfig) -> DateTime<Utc> {
        let delay = config.delay_for_attempt(self.retry_count + 1);
        Utc::now() + delay
    }
}

/// Request to ingest a new article.
#[derive(Debug, Clone)]
pub struct NewArticle {
    pub source_url: String,
    pub newspaper_id: Option<OutletId>,
    pub source: ArticleSource,
}

impl NewArticle {
    pub fn new(source_url: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            newspaper_id: None,
            source: ArticleSource::Rss,
        }
    }

    pub fn with_newspaper(mut self, id: OutletId) -> Self {
        self.newspaper_id = Some(id);
        self
    }

    pub fn manual(mut self) -> Self {
        self.source = ArticleSource::Manual;
        self
    }
}

/// Retry configuration with backoff for transient failures.
///
/// Delay schedule: 1min, 5min, 30min, 60min (capped).
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub max_delay: TimeDelta,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_delay: TimeDelta::minutes(60),
        }
    }
}

impl RetryConfig {
    /// Calculate delay for a given attempt number (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> TimeDelta {
        let delay = match attempt {
            0 | 1 => TimeDelta::minutes(1),
            2 => TimeDelta::minutes(5),
            3 => TimeDelta::minutes(30),
            _ => TimeDelta::minutes(60),
        };
        std::cmp::min(delay, self.max_delay)
    }
}
