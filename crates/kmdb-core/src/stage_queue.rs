use std::future::Future;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::article::{Article, Category, NewArticle, SkipReason, Stage};
use crate::dedup::OutletId;
use crate::entity::{EntityLink, NewEntityLink};
use crate::error::AppError;
use crate::similarity::MinHash;

/// Cleaned download result stored on the article row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadedArticle {
    pub title: String,
    pub description: String,
    pub text: String,
    /// Comma-separated full names.
    pub authors: String,
    pub pub_date: Option<DateTime<Utc>>,
    pub is_paywalled: bool,
}

/// Where a stored download goes next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// `new -> downloaded`
    Downloaded,
    /// `new -> skipped/same_news`; the text is kept for audit.
    Duplicate(OutletId),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub score: f64,
    pub label: bool,
    pub category: Option<Category>,
    /// Set for relevant articles with usable text.
    pub grouping: Option<Grouping>,
}

/// Near-duplicate signature of a relevant article, and the earlier article
/// from another outlet whose group it joins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grouping {
    pub signature: MinHash,
    pub similar_to: Option<i64>,
}

/// Result of recording a transient failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Back in its stage, eligible again after the backoff.
    Requeued,
    /// Retry ceiling exceeded; terminal.
    Failed,
}

/// Persistent stage queue over the article store.
///
/// Every mutation is a compare-and-swap on `(id, stage, claimed_by)`, so a
/// worker whose lease expired cannot overwrite the row another worker now
/// owns. Implementations must claim atomically (`FOR UPDATE SKIP LOCKED` or
/// equivalent): concurrent `claim_next` calls never return the same row.
pub trait StageQueue: Send + Sync + Clone {
    /// Insert a new article at `new`. Returns `None` if its clean URL is
    /// already known.
    fn create_article(
        &self,
        request: NewArticle,
    ) -> impl Future<Output = Result<Option<Article>, AppError>> + Send;

    /// Atomically claim the next eligible article in `stage`.
    ///
    /// Unclaimed rows and rows whose claim is older than `lease` are eligible,
    /// unless their retry backoff has not elapsed yet.
    fn claim_next(
        &self,
        stage: Stage,
        worker_id: &str,
        lease: TimeDelta,
    ) -> impl Future<Output = Result<Option<Article>, AppError>> + Send;

    /// Move a claimed article forward and release the claim.
    fn advance(
        &self,
        article_id: i64,
        worker_id: &str,
        from: Stage,
        to: Stage,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn skip(
        &self,
        article_id: i64,
        worker_id: &str,
        from: Stage,
        reason: SkipReason,
        detail: &str,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Record a transient failure: bump `retry_count` and requeue with
    /// `next_attempt_at`, or move to `failed` past `max_retries`.
    fn fail(
        &self,
        article_id: i64,
        worker_id: &str,
        from: Stage,
        error: &str,
        next_attempt_at: DateTime<Utc>,
        max_retries: u32,
    ) -> impl Future<Output = Result<FailOutcome, AppError>> + Send;

    fn save_download(
        &self,
        article_id: i64,
        worker_id: &str,
        download: &DownloadedArticle,
        outcome: DownloadOutcome,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Store the classification and move `downloaded -> classified`.
    ///
    /// With a `similar_to` article, the article joins that article's group;
    /// a similar article without a group founds one keyed by its own id.
    fn save_classification(
        &self,
        article_id: i64,
        worker_id: &str,
        classification: &Classification,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Replace the article's entity links and move `classified -> resolved`,
    /// all-or-nothing. Links are upserted by character offset so a replay
    /// converges to the same set.
    fn save_resolution(
        &self,
        article_id: i64,
        worker_id: &str,
        links: &[NewEntityLink],
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn get_article(
        &self,
        article_id: i64,
    ) -> impl Future<Output = Result<Option<Article>, AppError>> + Send;

    fn list_links(
        &self,
        article_id: i64,
    ) -> impl Future<Output = Result<Vec<EntityLink>, AppError>> + Send;

    fn count_by_stage(&self, stage: Stage) -> impl Future<Output = Result<i64, AppError>> + Send;

    /// Release all claims held by a worker (for graceful shutdown).
    fn release_worker_claims(
        &self,
        worker_id: &str,
    ) -> impl Future<Output = Result<u64, AppError>> + Send;

    /// Put `skipped/download_error` articles younger than `max_age` back to
    /// `new`, once per article.
    fn requeue_download_errors(
        &self,
        max_age: TimeDelta,
    ) -> impl Future<Output = Result<u64, AppError>> + Send;
}

/// Shared transition guard for queue implementations.
pub fn check_transition(from: Stage, to: Stage) -> Result<(), AppError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(AppError::InvalidTransition { from, to })
    }
}
