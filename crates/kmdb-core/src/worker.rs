use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::article::{Article, SkipReason, Stage};
use crate::config::WorkerConfig;
use crate::dedup::OutletId;
use crate::entity::NewEntityLink;
use crate::error::AppError;
use crate::stage_queue::{
    Classification, DownloadOutcome, DownloadedArticle, FailOutcome, StageQueue,
};

/// What a processor decided for one article.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    Downloaded(DownloadedArticle),
    /// Stored for audit, then skipped as `same_news`.
    Duplicate(DownloadedArticle, OutletId),
    Classified(Classification),
    Resolved(Vec<NewEntityLink>),
    /// Move to the next stage without storing anything.
    Advanced,
    Skipped(SkipReason, String),
}

/// Work done on articles of one stage.
///
/// `load` runs once before the first claim and `unload` once after the
/// last; model handles and sessions live in between.
pub trait StageProcessor: Send + Sync {
    /// The stage this processor claims articles from.
    fn stage(&self) -> Stage;

    fn load(&self) -> impl Future<Output = Result<(), AppError>> + Send {
        async { Ok(()) }
    }

    fn process(
        &self,
        article: &Article,
    ) -> impl Future<Output = Result<StageOutcome, AppError>> + Send;

    fn unload(&self) -> impl Future<Output = ()> + Send {
        async {}
    }
}

/// Events emitted by the worker for monitoring/logging.
#[derive(Debug, Clone)]
pub enum WorkerEvent<'a> {
    Started {
        worker_id: &'a str,
        stage: Stage,
    },
    Polling {
        stage: Stage,
    },
    ArticleClaimed {
        article: &'a Article,
    },
    ArticleAdvanced {
        article_id: i64,
        from: Stage,
        to: Stage,
    },
    ArticleSkipped {
        article_id: i64,
        reason: SkipReason,
        detail: &'a str,
    },
    ArticleFailed {
        article_id: i64,
        error: &'a str,
        will_retry: bool,
    },
    ShuttingDown {
        worker_id: &'a str,
        claims_released: u64,
    },
    Stopped {
        worker_id: &'a str,
    },
}

/// Trait for receiving worker events (decoupled logging).
pub trait WorkerReporter: Send + Sync {
    fn report(&self, event: WorkerEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingWorkerReporter;

impl WorkerReporter for TracingWorkerReporter {
    fn report(&self, event: WorkerEvent<'_>) {
        match event {
            WorkerEvent::Started { worker_id, stage } => {
                tracing::info!(%worker_id, %stage, "Worker started");
            }
            WorkerEvent::Polling { stage } => {
                tracing::debug!(%stage, "Polling for articles");
            }
            WorkerEvent::ArticleClaimed { article } => {
                tracing::info!(article_id = %article.id, url = %article.source_url, stage = %article.stage, "Article claimed");
            }
            WorkerEvent::ArticleAdvanced {
                article_id,
                from,
                to,
            } => {
                tracing::info!(%article_id, %from, %to, "Article advanced");
            }
            WorkerEvent::ArticleSkipped {
                article_id,
                reason,
                detail,
            } => {
                tracing::info!(%article_id, %reason, %detail, "Article skipped");
            }
            WorkerEvent::ArticleFailed {
                article_id,
                error,
                will_retry,
            } => {
                tracing::warn!(%article_id, %error, %will_retry, "Article failed");
            }
            WorkerEvent::ShuttingDown {
                worker_id,
                claims_released,
            } => {
                tracing::info!(%worker_id, %claims_released, "Worker shutting down");
            }
            WorkerEvent::Stopped { worker_id } => {
                tracing::info!(%worker_id, "Worker stopped");
            }
        }
    }
}

/// Claims articles of one stage and commits the processor's outcome.
pub struct StageWorker<Q, P>
where
    Q: StageQueue,
    P: StageProcessor,
{
    queue: Q,
    processor: P,
    config: WorkerConfig,
}

impl<Q, P> StageWorker<Q, P>
where
    Q: StageQueue,
    P: StageProcessor,
{
    pub fn new(queue: Q, processor: P, config: WorkerConfig) -> Self {
        Self {
            queue,
            processor,
            config,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.config.worker_id
    }

    pub fn processor(&self) -> &P {
        &self.processor
    }

    /// Run the worker loop until cancellation.
    ///
    /// Queue errors never end the loop; the worker backs off and tries again.
    pub async fn run<WR: WorkerReporter>(
        &self,
        cancel_token: CancellationToken,
        reporter: &WR,
    ) -> Result<(), AppError> {
        let stage = self.processor.stage();
        self.processor.load().await?;

        reporter.report(WorkerEvent::Started {
            worker_id: &self.config.worker_id,
            stage,
        });

        loop {
            if cancel_token.is_cancelled() {
                break;
            }

            reporter.report(WorkerEvent::Polling { stage });

            match self.run_once(reporter).await {
                Ok(true) => {}
                Ok(false) => {
                    tokio::select! {
                        () = tokio::time::sleep(self.config.poll_interval) => {}
                        () = cancel_token.cancelled() => break,
                    }
                }
                Err(e) => {
                    tracing::error!(%stage, error = %e, "Stage queue error, backing off");
                    tokio::select! {
                        () = tokio::time::sleep(self.config.error_backoff) => {}
                        () = cancel_token.cancelled() => break,
                    }
                }
            }
        }

        // Graceful shutdown: release anything still claimed
        let released = match self
            .queue
            .release_worker_claims(&self.config.worker_id)
            .await
        {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(worker_id = %self.config.worker_id, error = %e, "Failed to release claims on shutdown");
                0
            }
        };
        self.processor.unload().await;

        reporter.report(WorkerEvent::ShuttingDown {
            worker_id: &self.config.worker_id,
            claims_released: released,
        });
        reporter.report(WorkerEvent::Stopped {
            worker_id: &self.config.worker_id,
        });

        Ok(())
    }

    /// Claim and process at most one article.
    ///
    /// Returns `Ok(false)` when the stage queue is empty. Errors are queue
    /// errors (claim or commit); processing errors are recorded on the
    /// article instead.
    pub async fn run_once<WR: WorkerReporter>(&self, reporter: &WR) -> Result<bool, AppError> {
        let stage = self.processor.stage();
        let Some(article) = self
            .queue
            .claim_next(stage, &self.config.worker_id, self.config.claim_lease)
            .await?
        else {
            return Ok(false);
        };
        reporter.report(WorkerEvent::ArticleClaimed { article: &article });

        let committed = match self.processor.process(&article).await {
            Ok(outcome) => self.commit(&article, outcome, reporter).await,
            Err(e) => self.record_error(&article, e, reporter).await,
        };

        match committed {
            Ok(()) => Ok(true),
            Err(AppError::ClaimLost { article_id, stage }) => {
                tracing::warn!(%article_id, %stage, worker_id = %self.config.worker_id, "Claim lost before commit, dropping result");
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }

    async fn commit<WR: WorkerReporter>(
        &self,
        article: &Article,
        outcome: StageOutcome,
        reporter: &WR,
    ) -> Result<(), AppError> {
        let id = article.id;
        let worker_id = self.config.worker_id.as_str();
        let from = article.stage;
        let advanced = |to: Stage| WorkerEvent::ArticleAdvanced {
            article_id: id,
            from,
            to,
        };

        match outcome {
            StageOutcome::Downloaded(download) => {
                self.queue
                    .save_download(id, worker_id, &download, DownloadOutcome::Downloaded)
                    .await?;
                reporter.report(advanced(Stage::Downloaded));
            }
            StageOutcome::Duplicate(download, outlet) => {
                self.queue
                    .save_download(id, worker_id, &download, DownloadOutcome::Duplicate(outlet))
                    .await?;
                let detail = format!("attributed to outlet {outlet}");
                reporter.report(WorkerEvent::ArticleSkipped {
                    article_id: id,
                    reason: SkipReason::SameNews,
                    detail: &detail,
                });
            }
            StageOutcome::Classified(classification) => {
                self.queue
                    .save_classification(id, worker_id, &classification)
                    .await?;
                reporter.report(advanced(Stage::Classified));
            }
            StageOutcome::Resolved(links) => {
                self.queue.save_resolution(id, worker_id, &links).await?;
                reporter.report(advanced(Stage::Resolved));
            }
            StageOutcome::Advanced => {
                let to = from.next().ok_or(AppError::InvalidTransition {
                    from,
                    to: Stage::Ready,
                })?;
                self.queue.advance(id, worker_id, from, to).await?;
                reporter.report(advanced(to));
            }
            StageOutcome::Skipped(reason, detail) => {
                self.queue.skip(id, worker_id, from, reason, &detail).await?;
                reporter.report(WorkerEvent::ArticleSkipped {
                    article_id: id,
                    reason,
                    detail: &detail,
                });
            }
        }
        Ok(())
    }

    /// Transient errors go back to the queue with backoff; anything else
    /// skips the article as a processing error.
    async fn record_error<WR: WorkerReporter>(
        &self,
        article: &Article,
        error: AppError,
        reporter: &WR,
    ) -> Result<(), AppError> {
        let message = error.to_string();
        let worker_id = self.config.worker_id.as_str();

        if error.is_retryable() {
            let next_attempt = article.calculate_next_retry(&self.config.retry_config);
            let outcome = self
                .queue
                .fail(
                    article.id,
                    worker_id,
                    article.stage,
                    &message,
                    next_attempt,
                    self.config.retry_config.max_retries,
                )
                .await?;
            reporter.report(WorkerEvent::ArticleFailed {
                article_id: article.id,
                error: &message,
                will_retry: outcome == FailOutcome::Requeued,
            });
        } else {
            self.queue
                .skip(
                    article.id,
                    worker_id,
                    article.stage,
                    SkipReason::ProcessingError,
                    &message,
                )
                .await?;
            reporter.report(WorkerEvent::ArticleSkipped {
                article_id: article.id,
                reason: SkipReason::ProcessingError,
                detail: &message,
            });
        }
        Ok(())
    }
}
