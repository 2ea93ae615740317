//! Test utilities: mock implementations of all core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeDelta, Utc};

use crate::article::{Article, ArticleSource, Category, NewArticle, SkipReason, Stage};
use crate::entity::{CanonicalKeyword, EntityKind, EntityLink, NerSpan, NewEntityLink};
use crate::error::AppError;
use crate::similarity::{IndexedArticle, MinHash};
use crate::stage_queue::{
    Classification, DownloadOutcome, DownloadedArticle, FailOutcome, StageQueue, check_transition,
};
use crate::traits::{
    ArticleExtractor, CategoryClassifier, Cookies, ExtractedArticle, KeywordSource, Lemmatizer,
    NerTagger, PageFetcher, RelevanceClassifier, RelevancePrediction, SessionProvider,
    SimilarityIndex,
};
use crate::util::{clean_url, registrable_domain};
use crate::worker::{WorkerEvent, WorkerReporter};

/// An article at `stage` with empty content fields.
pub fn sample_article(stage: Stage) -> Article {
    let url = "https://telex.hu/belfold/2024/01/01/cikk";
    let now = Utc::now();
    Article {
        id: 1,
        source_url: url.to_string(),
        clean_url: url.to_string(),
        newspaper_id: None,
        source: ArticleSource::Rss,
        stage,
        skip_reason: None,
        title: String::new(),
        description: String::new(),
        text: String::new(),
        authors: String::new(),
        pub_date: None,
        is_paywalled: false,
        retry_count: 0,
        classification_score: None,
        classification_label: None,
        category: None,
        claimed_by: None,
        claimed_at: None,
        next_attempt_at: None,
        last_error: None,
        download_requeued: false,
        group_id: None,
        created_at: now,
        updated_at: now,
    }
}

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// Mock fetcher that returns a configurable response.
#[derive(Clone)]
pub struct MockFetcher {
    /// Queue of responses. Each call pops the first element.
    /// If empty, returns a default HTML string.
    responses: Arc<Mutex<Vec<Result<String, AppError>>>>,
    pub calls: Arc<Mutex<Vec<(String, Option<Cookies>)>>>,
}

impl MockFetcher {
    pub fn new(html: &str) -> Self {
        Self::with_responses(vec![Ok(html.to_string())])
    }

    pub fn with_error(error: AppError) -> Self {
        Self::with_responses(vec![Err(error)])
    }

    pub fn with_responses(responses: Vec<Result<String, AppError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl PageFetcher for MockFetcher {
    async fn fetch(&self, url: &str, cookies: Option<&Cookies>) -> Result<String, AppError> {
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), cookies.cloned()));
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok("<html><body>default</body></html>".to_string())
        } else {
            responses.remove(0)
        }
    }
}

// ---------------------------------------------------------------------------
// MockArticleExtractor
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct MockArticleExtractor {
    article: ExtractedArticle,
    error: Arc<Mutex<Option<AppError>>>,
}

impl MockArticleExtractor {
    pub fn new(article: ExtractedArticle) -> Self {
        Self {
            article,
            error: Arc::new(Mutex::new(None)),
        }
    }

    /// Fails the first call, then returns an empty article.
    pub fn with_error(error: AppError) -> Self {
        Self {
            article: ExtractedArticle::default(),
            error: Arc::new(Mutex::new(Some(error))),
        }
    }
}

impl ArticleExtractor for MockArticleExtractor {
    fn extract(&self, _url: &str, _html: &str) -> Result<ExtractedArticle, AppError> {
        if let Some(e) = self.error.lock().unwrap().take() {
            return Err(e);
        }
        Ok(self.article.clone())
    }
}

// ---------------------------------------------------------------------------
// MockSessionProvider
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct MockSessionProvider {
    sessions: HashMap<String, Cookies>,
    pub calls: Arc<Mutex<u32>>,
}

impl MockSessionProvider {
    pub fn new(sessions: HashMap<String, Cookies>) -> Self {
        Self {
            sessions,
            calls: Arc::new(Mutex::new(0)),
        }
    }
}

impl SessionProvider for MockSessionProvider {
    async fn load_sessions(&self) -> Result<HashMap<String, Cookies>, AppError> {
        *self.calls.lock().unwrap() += 1;
        Ok(self.sessions.clone())
    }
}

// ---------------------------------------------------------------------------
// MockNer
// ---------------------------------------------------------------------------

/// Tagger returning the same spans for every text.
#[derive(Clone)]
pub struct MockNer {
    spans: Vec<NerSpan>,
    pub calls: Arc<Mutex<u32>>,
}

impl MockNer {
    pub fn new(spans: Vec<NerSpan>) -> Self {
        Self {
            spans,
            calls: Arc::new(Mutex::new(0)),
        }
    }
}

impl NerTagger for MockNer {
    async fn tag(&self, _text: &str) -> Result<Vec<NerSpan>, AppError> {
        *self.calls.lock().unwrap() += 1;
        Ok(self.spans.clone())
    }
}

// ---------------------------------------------------------------------------
// MockRelevance / MockCategory
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct MockRelevance {
    probability: f64,
    error: Arc<Mutex<Option<AppError>>>,
    /// Texts the classifier was asked about.
    pub inputs: Arc<Mutex<Vec<String>>>,
}

impl MockRelevance {
    pub fn new(probability: f64) -> Self {
        Self {
            probability,
            error: Arc::new(Mutex::new(None)),
            inputs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Fails the first call.
    pub fn with_error(error: AppError) -> Self {
        let mock = Self::new(0.0);
        *mock.error.lock().unwrap() = Some(error);
        mock
    }
}

impl RelevanceClassifier for MockRelevance {
    async fn predict(&self, text: &str) -> Result<RelevancePrediction, AppError> {
        self.inputs.lock().unwrap().push(text.to_string());
        if let Some(e) = self.error.lock().unwrap().take() {
            return Err(e);
        }
        Ok(RelevancePrediction {
            probability: self.probability,
            embedding: vec![0.25, -0.5, 1.0],
        })
    }
}

#[derive(Clone)]
pub struct MockCategory {
    category: Category,
    pub calls: Arc<Mutex<u32>>,
}

impl MockCategory {
    pub fn new(category: Category) -> Self {
        Self {
            category,
            calls: Arc::new(Mutex::new(0)),
        }
    }
}

impl CategoryClassifier for MockCategory {
    async fn categorize(&self, _embedding: &[f32]) -> Result<Category, AppError> {
        *self.calls.lock().unwrap() += 1;
        Ok(self.category)
    }
}

// ---------------------------------------------------------------------------
// MockLemmatizer
// ---------------------------------------------------------------------------

/// Lemmatizer backed by a lookup table; unknown words are their own lemma.
#[derive(Clone)]
pub struct MockLemmatizer {
    lemmas: HashMap<String, String>,
    pub calls: Arc<Mutex<Vec<String>>>,
}

impl MockLemmatizer {
    pub fn identity() -> Self {
        Self::with_lemmas(&[])
    }

    pub fn with_lemmas(pairs: &[(&str, &str)]) -> Self {
        Self {
            lemmas: pairs
                .iter()
                .map(|(surface, lemma)| (surface.to_string(), lemma.to_string()))
                .collect(),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl Lemmatizer for MockLemmatizer {
    async fn lemmatize(&self, text: &str) -> Result<String, AppError> {
        self.calls.lock().unwrap().push(text.to_string());
        Ok(self
            .lemmas
            .get(text)
            .cloned()
            .unwrap_or_else(|| text.to_string()))
    }
}

// ---------------------------------------------------------------------------
// MockKeywordSource
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct MockKeywordSource {
    keywords: Vec<CanonicalKeyword>,
    /// Number of `load_keywords` calls.
    pub loads: Arc<Mutex<u32>>,
}

impl MockKeywordSource {
    pub fn new(keywords: Vec<CanonicalKeyword>) -> Self {
        Self {
            keywords,
            loads: Arc::new(Mutex::new(0)),
        }
    }
}

impl KeywordSource for MockKeywordSource {
    async fn load_keywords(&self, kind: EntityKind) -> Result<Vec<CanonicalKeyword>, AppError> {
        *self.loads.lock().unwrap() += 1;
        Ok(self
            .keywords
            .iter()
            .filter(|k| k.kind == kind)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Records worker events as short strings.
#[derive(Clone, Default)]
pub struct MockReporter {
    events: Arc<Mutex<Vec<String>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl WorkerReporter for MockReporter {
    fn report(&self, event: WorkerEvent<'_>) {
        let line = match event {
            WorkerEvent::Started { .. } => "started".to_string(),
            WorkerEvent::Polling { .. } => "polling".to_string(),
            WorkerEvent::ArticleClaimed { article } => format!("claimed:{}", article.id),
            WorkerEvent::ArticleAdvanced { from, to, .. } => format!("advanced:{from}->{to}"),
            WorkerEvent::ArticleSkipped { reason, .. } => format!("skipped:{reason}"),
            WorkerEvent::ArticleFailed { will_retry, .. } => format!("failed:retry={will_retry}"),
            WorkerEvent::ShuttingDown {
                claims_released, ..
            } => format!("shutting_down:{claims_released}"),
            WorkerEvent::Stopped { .. } => "stopped".to_string(),
        };
        self.events.lock().unwrap().push(line);
    }
}

// ---------------------------------------------------------------------------
// MockStageQueue
// ---------------------------------------------------------------------------

#[derive(Default)]
struct QueueState {
    articles: Vec<Article>,
    links: Vec<EntityLink>,
    next_link_id: i64,
    claim_error: Option<AppError>,
    release_error: Option<AppError>,
    /// Article id to signature and the time it was stored.
    signatures: HashMap<i64, (MinHash, DateTime<Utc>)>,
}

/// In-memory stage queue with the same compare-and-swap rules as the
/// database implementation. One mutex guards all state, so claims are atomic.
#[derive(Clone, Default)]
pub struct MockStageQueue {
    state: Arc<Mutex<QueueState>>,
    /// Worker ids passed to `release_worker_claims`.
    pub released: Arc<Mutex<Vec<String>>>,
}

impl MockStageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move an article to `stage` without any checks.
    pub fn force_stage(&self, article_id: i64, stage: Stage) {
        let mut state = self.state.lock().unwrap();
        if let Some(a) = state.articles.iter_mut().find(|a| a.id == article_id) {
            a.stage = stage;
        }
    }

    pub fn set_retry_count(&self, article_id: i64, retry_count: u32) {
        let mut state = self.state.lock().unwrap();
        if let Some(a) = state.articles.iter_mut().find(|a| a.id == article_id) {
            a.retry_count = retry_count;
        }
    }

    pub fn set_created_at(&self, article_id: i64, created_at: DateTime<Utc>) {
        let mut state = self.state.lock().unwrap();
        if let Some(a) = state.articles.iter_mut().find(|a| a.id == article_id) {
            a.created_at = created_at;
        }
    }

    /// Make the next `claim_next` call fail with `error`.
    pub fn fail_next_claim(&self, error: AppError) {
        self.state.lock().unwrap().claim_error = Some(error);
    }

    /// Store a signature as if the article had been classified at `at`.
    pub fn insert_signature(&self, article_id: i64, signature: MinHash, at: DateTime<Utc>) {
        self.state
            .lock()
            .unwrap()
            .signatures
            .insert(article_id, (signature, at));
    }

    /// Make the next `release_worker_claims` call fail with `error`.
    pub fn fail_next_release(&self, error: AppError) {
        self.state.lock().unwrap().release_error = Some(error);
    }

    /// Run `f` on the article if `worker_id` still holds its claim in `from`.
    fn with_claimed<T>(
        &self,
        article_id: i64,
        worker_id: &str,
        from: Stage,
        f: impl FnOnce(&mut Article, &mut Vec<EntityLink>, &mut i64) -> T,
    ) -> Result<T, AppError> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        let article = state
            .articles
            .iter_mut()
            .find(|a| a.id == article_id && a.stage == from && a.claimed_by.as_deref() == Some(worker_id))
            .ok_or(AppError::ClaimLost {
                article_id,
                stage: from,
            })?;
        let out = f(article, &mut state.links, &mut state.next_link_id);
        article.updated_at = Utc::now();
        Ok(out)
    }
}

impl SimilarityIndex for MockStageQueue {
    async fn recent_signatures(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<IndexedArticle>, AppError> {
        let state = self.state.lock().unwrap();
        let mut recent: Vec<IndexedArticle> = state
            .signatures
            .iter()
            .filter(|(_, (_, at))| *at >= since)
            .filter_map(|(&id, (signature, _))| {
                let article = state.articles.iter().find(|a| a.id == id)?;
                Some(IndexedArticle {
                    article_id: id,
                    domain: registrable_domain(&article.clean_url).unwrap_or_default(),
                    signature: signature.clone(),
                })
            })
            .collect();
        recent.sort_by_key(|a| a.article_id);
        Ok(recent)
    }
}

fn release(article: &mut Article) {
    article.claimed_by = None;
    article.claimed_at = None;
}

impl StageQueue for MockStageQueue {
    async fn create_article(&self, request: NewArticle) -> Result<Option<Article>, AppError> {
        let mut state = self.state.lock().unwrap();
        let clean = clean_url(&request.source_url);
        if state.articles.iter().any(|a| a.clean_url == clean) {
            return Ok(None);
        }
        let mut article = sample_article(Stage::New);
        article.id = state.articles.len() as i64 + 1;
        article.source_url = request.source_url;
        article.clean_url = clean;
        article.newspaper_id = request.newspaper_id;
        article.source = request.source;
        state.articles.push(article.clone());
        Ok(Some(article))
    }

    async fn claim_next(
        &self,
        stage: Stage,
        worker_id: &str,
        lease: TimeDelta,
    ) -> Result<Option<Article>, AppError> {
        let mut state = self.state.lock().unwrap();
        if let Some(e) = state.claim_error.take() {
            return Err(e);
        }
        let now = Utc::now();
        let stale = now - lease;
        let next = state
            .articles
            .iter_mut()
            .filter(|a| a.stage == stage)
            .filter(|a| a.claimed_at.is_none_or(|at| at < stale))
            .filter(|a| a.next_attempt_at.is_none_or(|at| at <= now))
            .min_by_key(|a| a.id);
        Ok(next.map(|a| {
            a.claimed_by = Some(worker_id.to_string());
            a.claimed_at = Some(now);
            a.clone()
        }))
    }

    async fn advance(
        &self,
        article_id: i64,
        worker_id: &str,
        from: Stage,
        to: Stage,
    ) -> Result<(), AppError> {
        check_transition(from, to)?;
        self.with_claimed(article_id, worker_id, from, |a, _, _| {
            a.stage = to;
            release(a);
        })
    }

    async fn skip(
        &self,
        article_id: i64,
        worker_id: &str,
        from: Stage,
        reason: SkipReason,
        detail: &str,
    ) -> Result<(), AppError> {
        check_transition(from, Stage::Skipped)?;
        self.with_claimed(article_id, worker_id, from, |a, _, _| {
            a.stage = Stage::Skipped;
            a.skip_reason = Some(reason);
            a.last_error = Some(detail.to_string());
            release(a);
        })
    }

    async fn fail(
        &self,
        article_id: i64,
        worker_id: &str,
        from: Stage,
        error: &str,
        next_attempt_at: DateTime<Utc>,
        max_retries: u32,
    ) -> Result<FailOutcome, AppError> {
        self.with_claimed(article_id, worker_id, from, |a, _, _| {
            a.retry_count += 1;
            a.last_error = Some(error.to_string());
            release(a);
            if a.retry_count > max_retries {
                a.stage = Stage::Failed;
                a.next_attempt_at = None;
                FailOutcome::Failed
            } else {
                a.next_attempt_at = Some(next_attempt_at);
                FailOutcome::Requeued
            }
        })
    }

    async fn save_download(
        &self,
        article_id: i64,
        worker_id: &str,
        download: &DownloadedArticle,
        outcome: DownloadOutcome,
    ) -> Result<(), AppError> {
        self.with_claimed(article_id, worker_id, Stage::New, |a, _, _| {
            a.title = download.title.clone();
            a.description = download.description.clone();
            a.text = download.text.clone();
            a.authors = download.authors.clone();
            a.pub_date = download.pub_date;
            a.is_paywalled = download.is_paywalled;
            match outcome {
                DownloadOutcome::Downloaded => a.stage = Stage::Downloaded,
                DownloadOutcome::Duplicate(outlet) => {
                    a.stage = Stage::Skipped;
                    a.skip_reason = Some(SkipReason::SameNews);
                    a.last_error = Some(format!("attributed to outlet {outlet}"));
                }
            }
            a.next_attempt_at = None;
            release(a);
        })
    }

    async fn save_classification(
        &self,
        article_id: i64,
        worker_id: &str,
        classification: &Classification,
    ) -> Result<(), AppError> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        let similar_to = classification.grouping.as_ref().and_then(|g| g.similar_to);
        let group_id = similar_to.map(|other| {
            state
                .articles
                .iter()
                .find(|a| a.id == other)
                .and_then(|a| a.group_id)
                .unwrap_or(other)
        });

        let article = state
            .articles
            .iter_mut()
            .find(|a| {
                a.id == article_id
                    && a.stage == Stage::Downloaded
                    && a.claimed_by.as_deref() == Some(worker_id)
            })
            .ok_or(AppError::ClaimLost {
                article_id,
                stage: Stage::Downloaded,
            })?;
        article.classification_score = Some(classification.score);
        article.classification_label = Some(classification.label);
        article.category = classification.category;
        article.group_id = group_id;
        article.stage = Stage::Classified;
        article.next_attempt_at = None;
        article.updated_at = Utc::now();
        release(article);

        if let Some(grouping) = &classification.grouping {
            state
                .signatures
                .insert(article_id, (grouping.signature.clone(), Utc::now()));
        }
        if let Some(other) = similar_to
            && let Some(founder) = state.articles.iter_mut().find(|a| a.id == other)
        {
            founder.group_id.get_or_insert(other);
        }
        Ok(())
    }

    async fn save_resolution(
        &self,
        article_id: i64,
        worker_id: &str,
        links: &[NewEntityLink],
    ) -> Result<(), AppError> {
        self.with_claimed(article_id, worker_id, Stage::Classified, |a, stored, next_id| {
            stored.retain(|l| {
                l.article_id != article_id || links.iter().any(|n| n.char_offset == l.char_offset)
            });
            for link in links {
                let position = stored
                    .iter()
                    .position(|l| l.article_id == article_id && l.char_offset == link.char_offset);
                let id = match position {
                    Some(i) => stored.remove(i).id,
                    None => {
                        *next_id += 1;
                        *next_id
                    }
                };
                stored.push(EntityLink {
                    id,
                    article_id,
                    kind: link.kind,
                    keyword_id: link.keyword_id,
                    raw_surface: link.raw_surface.clone(),
                    normalized_surface: link.normalized_surface.clone(),
                    char_offset: link.char_offset,
                    score: link.score,
                    label: link.label,
                });
            }
            a.stage = Stage::Resolved;
            a.next_attempt_at = None;
            release(a);
        })
    }

    async fn get_article(&self, article_id: i64) -> Result<Option<Article>, AppError> {
        let state = self.state.lock().unwrap();
        Ok(state.articles.iter().find(|a| a.id == article_id).cloned())
    }

    async fn list_links(&self, article_id: i64) -> Result<Vec<EntityLink>, AppError> {
        let state = self.state.lock().unwrap();
        let mut links: Vec<EntityLink> = state
            .links
            .iter()
            .filter(|l| l.article_id == article_id)
            .cloned()
            .collect();
        links.sort_by_key(|l| l.char_offset);
        Ok(links)
    }

    async fn count_by_stage(&self, stage: Stage) -> Result<i64, AppError> {
        let state = self.state.lock().unwrap();
        Ok(state.articles.iter().filter(|a| a.stage == stage).count() as i64)
    }

    async fn release_worker_claims(&self, worker_id: &str) -> Result<u64, AppError> {
        self.released.lock().unwrap().push(worker_id.to_string());
        let mut state = self.state.lock().unwrap();
        if let Some(e) = state.release_error.take() {
            return Err(e);
        }
        let mut count = 0;
        for a in state
            .articles
            .iter_mut()
            .filter(|a| a.claimed_by.as_deref() == Some(worker_id))
        {
            release(a);
            count += 1;
        }
        Ok(count)
    }

    async fn requeue_download_errors(&self, max_age: TimeDelta) -> Result<u64, AppError> {
        let mut state = self.state.lock().unwrap();
        let cutoff = Utc::now() - max_age;
        let mut count = 0;
        for a in state.articles.iter_mut().filter(|a| {
            a.stage == Stage::Skipped
                && a.skip_reason == Some(SkipReason::DownloadError)
                && !a.download_requeued
                && a.created_at > cutoff
        }) {
            a.stage = Stage::New;
            a.skip_reason = None;
            a.download_requeued = true;
            release(a);
            count += 1;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    const LEASE: TimeDelta = TimeDelta::minutes(30);

    async fn seeded(n: usize) -> MockStageQueue {
        let queue = MockStageQueue::new();
        for i in 0..n {
            queue
                .create_article(NewArticle::new(format!("https://index.hu/cikk/{i}")))
                .await
                .unwrap();
        }
        queue
    }

    #[tokio::test]
    async fn concurrent_claims_are_disjoint() {
        let queue = seeded(20).await;

        let mut handles = Vec::new();
        for w in 0..8 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                let worker = format!("download-{w}");
                let mut claimed = Vec::new();
                while let Some(a) = queue.claim_next(Stage::New, &worker, LEASE).await.unwrap() {
                    claimed.push(a.id);
                }
                claimed
            }));
        }

        let mut all = Vec::new();
        for h in handles {
            all.extend(h.await.unwrap());
        }
        let unique: HashSet<_> = all.iter().copied().collect();
        assert_eq!(all.len(), 20);
        assert_eq!(unique.len(), 20);
    }

    #[tokio::test]
    async fn duplicate_clean_url_is_rejected() {
        let queue = MockStageQueue::new();
        assert!(queue
            .create_article(NewArticle::new("https://telex.hu/a?utm_source=fb"))
            .await
            .unwrap()
            .is_some());
        assert!(queue
            .create_article(NewArticle::new("https://telex.hu/a"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn expired_lease_can_be_reclaimed_and_old_owner_loses() {
        let queue = seeded(1).await;
        queue.claim_next(Stage::New, "w1", LEASE).await.unwrap().unwrap();
        let stolen = queue
            .claim_next(Stage::New, "w2", TimeDelta::zero() - TimeDelta::seconds(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stolen.claimed_by.as_deref(), Some("w2"));

        let err = queue
            .advance(stolen.id, "w1", Stage::New, Stage::Downloaded)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ClaimLost { .. }));
    }

    #[tokio::test]
    async fn illegal_transition_is_rejected() {
        let queue = seeded(1).await;
        let a = queue.claim_next(Stage::New, "w1", LEASE).await.unwrap().unwrap();
        let err = queue
            .advance(a.id, "w1", Stage::New, Stage::Ready)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn download_errors_requeue_once() {
        let queue = seeded(2).await;
        for _ in 0..2 {
            let a = queue.claim_next(Stage::New, "w", LEASE).await.unwrap().unwrap();
            queue
                .skip(a.id, "w", Stage::New, SkipReason::DownloadError, "HTTP 503")
                .await
                .unwrap();
        }
        queue.set_created_at(2, Utc::now() - TimeDelta::days(10));

        assert_eq!(queue.requeue_download_errors(TimeDelta::days(3)).await.unwrap(), 1);
        assert_eq!(queue.get_article(1).await.unwrap().unwrap().stage, Stage::New);

        let a = queue.claim_next(Stage::New, "w", LEASE).await.unwrap().unwrap();
        queue
            .skip(a.id, "w", Stage::New, SkipReason::DownloadError, "HTTP 503")
            .await
            .unwrap();
        assert_eq!(queue.requeue_download_errors(TimeDelta::days(3)).await.unwrap(), 0);
    }
}
