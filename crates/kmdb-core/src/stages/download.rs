use std::time::Duration;

use tokio::sync::RwLock;

use crate::article::{Article, SkipReason, Stage};
use crate::dedup;
use crate::error::AppError;
use crate::session::SessionStore;
use crate::stage_queue::DownloadedArticle;
use crate::text::{self, Boilerplate};
use crate::traits::{ArticleExtractor, OutletRegistry, PageFetcher, SessionProvider};
use crate::worker::{StageOutcome, StageProcessor};

/// Articles shorter than this (title, description and text together) are
/// probably extraction failures.
const SHORT_ARTICLE_CHARS: usize = 100;

/// `new -> downloaded`, or `skipped` for duplicates and failed downloads.
pub struct DownloadProcessor<F, E, P>
where
    F: PageFetcher,
    E: ArticleExtractor,
    P: SessionProvider,
{
    fetcher: F,
    extractor: E,
    registry: OutletRegistry,
    provider: P,
    sessions: RwLock<SessionStore>,
    session_refresh: Duration,
    boilerplate: Boilerplate,
}

impl<F, E, P> DownloadProcessor<F, E, P>
where
    F: PageFetcher,
    E: ArticleExtractor,
    P: SessionProvider,
{
    pub fn new(
        fetcher: F,
        extractor: E,
        registry: OutletRegistry,
        provider: P,
        session_refresh: Duration,
    ) -> Self {
        Self {
            fetcher,
            extractor,
            registry,
            provider,
            sessions: RwLock::new(SessionStore::new()),
            session_refresh,
            boilerplate: Boilerplate::default(),
        }
    }

    pub fn with_boilerplate(mut self, boilerplate: Boilerplate) -> Self {
        self.boilerplate = boilerplate;
        self
    }

    /// Refresh sessions if stale. A failed refresh keeps the old cookies.
    async fn ensure_sessions(&self) {
        if !self.sessions.read().await.needs_refresh(self.session_refresh) {
            return;
        }
        let mut sessions = self.sessions.write().await;
        if !sessions.needs_refresh(self.session_refresh) {
            return;
        }
        if let Err(e) = sessions.refresh(&self.provider).await {
            tracing::warn!(error = %e, "Session refresh failed, keeping previous cookies");
        }
    }

    async fn download(&self, article: &Article) -> Result<DownloadedArticle, AppError> {
        let url = article.source_url.as_str();
        let html = {
            let sessions = self.sessions.read().await;
            self.fetcher.fetch(url, sessions.cookies_for(url)).await?
        };

        let mut extracted = self.extractor.extract(url, &html)?;
        if let Some(adapter) = self.registry.apply(url, &html, &mut extracted) {
            tracing::debug!(article_id = %article.id, %adapter, "Applied outlet adapter");
        }

        let title = text::clean(&text::trim_title(&extracted.title));
        let body = text::clean(&self.boilerplate.strip_lines(&extracted.text));
        let mut description = self.boilerplate.strip_description(&extracted.description);
        if description.is_empty() {
            description = text::fallback_description(&body).unwrap_or_default();
        }

        let download = DownloadedArticle {
            title,
            description,
            authors: text::join_authors(&extracted.authors),
            pub_date: extracted.pub_date,
            is_paywalled: text::is_paywalled(url, &html),
            text: body,
        };
        Ok(download)
    }
}

impl<F, E, P> StageProcessor for DownloadProcessor<F, E, P>
where
    F: PageFetcher,
    E: ArticleExtractor,
    P: SessionProvider,
{
    fn stage(&self) -> Stage {
        Stage::New
    }

    async fn load(&self) -> Result<(), AppError> {
        self.ensure_sessions().await;
        Ok(())
    }

    async fn process(&self, article: &Article) -> Result<StageOutcome, AppError> {
        self.ensure_sessions().await;

        let download = match self.download(article).await {
            Ok(download) => download,
            Err(e) => {
                return Ok(StageOutcome::Skipped(
                    SkipReason::DownloadError,
                    e.to_string(),
                ));
            }
        };

        if download.title.is_empty() {
            return Ok(StageOutcome::Skipped(
                SkipReason::EmptyTitle,
                "extracted title is empty".into(),
            ));
        }

        let length = download.title.chars().count()
            + download.description.chars().count()
            + download.text.chars().count();
        if length < SHORT_ARTICLE_CHARS {
            tracing::warn!(article_id = %article.id, %length, url = %article.source_url, "Very short article");
        }

        let attribution = dedup::attribute(&download.title, &download.description, &download.text);
        match attribution {
            Some(a) if Some(a.outlet) != article.newspaper_id && !article.is_manual() => {
                tracing::info!(article_id = %article.id, outlet = %a.outlet, matched = %a.matched, rule = ?a.rule, "Story attributed to another outlet");
                Ok(StageOutcome::Duplicate(download, a.outlet))
            }
            _ => Ok(StageOutcome::Downloaded(download)),
        }
    }
}
