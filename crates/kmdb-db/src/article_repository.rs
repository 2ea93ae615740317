use chrono::{DateTime, TimeDelta, Utc};
use sqlx::{PgPool, Pool, Postgres};

use kmdb_core::article::{Article, NewArticle, SkipReason, Stage};
use kmdb_core::dedup::OutletId;
use kmdb_core::entity::{EntityLink, NewEntityLink};
use kmdb_core::error::AppError;
use kmdb_core::resolver::check_unique_offsets;
use kmdb_core::similarity::{IndexedArticle, MinHash};
use kmdb_core::stage_queue::{
    Classification, DownloadOutcome, DownloadedArticle, FailOutcome, StageQueue, check_transition,
};
use kmdb_core::traits::SimilarityIndex;
use kmdb_core::util::{clean_url, registrable_domain};

/// PostgreSQL-backed stage queue using `SELECT FOR UPDATE SKIP LOCKED`.
///
/// Every commit is a compare-and-swap on `(id, stage, claimed_by)`; zero
/// affected rows means the claim was lost.
#[derive(Clone)]
pub struct ArticleRepository {
    pool: Pool<Postgres>,
}

impl ArticleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Most recent articles in a stage, newest first.
    pub async fn list_by_stage(&self, stage: Stage, limit: usize) -> Result<Vec<Article>, AppError> {
        let rows = sqlx::query_as::<_, ArticleRow>(
            r#"
            SELECT * FROM articles
            WHERE stage = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(stage.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.into_iter().map(Article::try_from).collect()
    }
}

fn db_error(e: sqlx::Error) -> AppError {
    AppError::DatabaseError(e.to_string())
}

/// Lease as fractional seconds, for `$n * INTERVAL '1 second'`.
fn seconds(delta: TimeDelta) -> f64 {
    delta.num_milliseconds() as f64 / 1000.0
}

fn claim_lost(article_id: i64, stage: Stage) -> AppError {
    AppError::ClaimLost { article_id, stage }
}

fn offset_column(offset: usize) -> Result<i32, AppError> {
    i32::try_from(offset)
        .map_err(|_| AppError::InvariantViolation(format!("char offset {offset} out of range")))
}

// -- Internal row types for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct ArticleRow {
    id: i64,
    source_url: String,
    clean_url: String,
    newspaper_id: Option<i32>,
    source: String,
    stage: String,
    skip_reason: Option<String>,
    title: String,
    description: String,
    text: String,
    authors: String,
    pub_date: Option<DateTime<Utc>>,
    is_paywalled: bool,
    retry_count: i32,
    classification_score: Option<f64>,
    classification_label: Option<bool>,
    category: Option<String>,
    claimed_by: Option<String>,
    claimed_at: Option<DateTime<Utc>>,
    next_attempt_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    download_requeued: bool,
    group_id: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn column<T: std::str::FromStr<Err = String>>(raw: &str) -> Result<T, AppError> {
    raw.parse().map_err(AppError::DatabaseError)
}

impl TryFrom<ArticleRow> for Article {
    type Error = AppError;

    fn try_from(row: ArticleRow) -> Result<Self, Self::Error> {
        Ok(Article {
            id: row.id,
            source_url: row.source_url,
            clean_url: row.clean_url,
            newspaper_id: row.newspaper_id.map(OutletId),
            source: column(&row.source)?,
            stage: column(&row.stage)?,
            skip_reason: row.skip_reason.as_deref().map(column).transpose()?,
            title: row.title,
            description: row.description,
            text: row.text,
            authors: row.authors,
            pub_date: row.pub_date,
            is_paywalled: row.is_paywalled,
            retry_count: row.retry_count.max(0) as u32,
            classification_score: row.classification_score,
            classification_label: row.classification_label,
            category: row.category.as_deref().map(column).transpose()?,
            claimed_by: row.claimed_by,
            claimed_at: row.claimed_at,
            next_attempt_at: row.next_attempt_at,
            last_error: row.last_error,
            download_requeued: row.download_requeued,
            group_id: row.group_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct EntityLinkRow {
    id: i64,
    article_id: i64,
    kind: String,
    keyword_id: Option<i64>,
    raw_surface: String,
    normalized_surface: String,
    char_offset: i32,
    score: f64,
    label: String,
}

impl TryFrom<EntityLinkRow> for EntityLink {
    type Error = AppError;

    fn try_from(row: EntityLinkRow) -> Result<Self, Self::Error> {
        Ok(EntityLink {
            id: row.id,
            article_id: row.article_id,
            kind: column(&row.kind)?,
            keyword_id: row.keyword_id,
            raw_surface: row.raw_surface,
            normalized_surface: row.normalized_surface,
            char_offset: row.char_offset.max(0) as usize,
            score: row.score,
            label: column(&row.label)?,
        })
    }
}

impl StageQueue for ArticleRepository {
    async fn create_article(&self, request: NewArticle) -> Result<Option<Article>, AppError> {
        let row = sqlx::query_as::<_, ArticleRow>(
            r#"
            INSERT INTO articles (source_url, clean_url, newspaper_id, source)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (clean_url) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(&request.source_url)
        .bind(clean_url(&request.source_url))
        .bind(request.newspaper_id.map(|id| id.0))
        .bind(request.source.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.map(Article::try_from).transpose()
    }

    async fn claim_next(
        &self,
        stage: Stage,
        worker_id: &str,
        lease: TimeDelta,
    ) -> Result<Option<Article>, AppError> {
        let row = sqlx::query_as::<_, ArticleRow>(
            r#"
            UPDATE articles
            SET claimed_by = $2, claimed_at = NOW(), updated_at = NOW()
            WHERE id = (
                SELECT id FROM articles
                WHERE stage = $1
                  AND (claimed_at IS NULL OR claimed_at < NOW() - $3 * INTERVAL '1 second')
                  AND (next_attempt_at IS NULL OR next_attempt_at <= NOW())
                ORDER BY next_attempt_at NULLS FIRST, id ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(stage.as_str())
        .bind(worker_id)
        .bind(seconds(lease))
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.map(Article::try_from).transpose()
    }

    async fn advance(
        &self,
        article_id: i64,
        worker_id: &str,
        from: Stage,
        to: Stage,
    ) -> Result<(), AppError> {
        check_transition(from, to)?;
        let result = sqlx::query(
            r#"
            UPDATE articles
            SET stage = $4, claimed_by = NULL, claimed_at = NULL,
                next_attempt_at = NULL, updated_at = NOW()
            WHERE id = $1 AND stage = $2 AND claimed_by = $3
            "#,
        )
        .bind(article_id)
        .bind(from.as_str())
        .bind(worker_id)
        .bind(to.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(claim_lost(article_id, from));
        }
        Ok(())
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
        let result = sqlx::query(
            r#"
            UPDATE articles
            SET stage = 'skipped', skip_reason = $4, last_error = $5,
                claimed_by = NULL, claimed_at = NULL, next_attempt_at = NULL, updated_at = NOW()
            WHERE id = $1 AND stage = $2 AND claimed_by = $3
            "#,
        )
        .bind(article_id)
        .bind(from.as_str())
        .bind(worker_id)
        .bind(reason.as_str())
        .bind(detail)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(claim_lost(article_id, from));
        }
        Ok(())
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
        // SET expressions see the old retry_count; RETURNING sees the new stage.
        let row: Option<(String,)> = sqlx::query_as(
            r#"
            UPDATE articles
            SET
                retry_count = retry_count + 1,
                stage = CASE WHEN retry_count + 1 > $6 THEN 'failed' ELSE stage END,
                next_attempt_at = CASE WHEN retry_count + 1 > $6 THEN NULL ELSE $5 END,
                last_error = $4,
                claimed_by = NULL,
                claimed_at = NULL,
                updated_at = NOW()
            WHERE id = $1 AND stage = $2 AND claimed_by = $3
            RETURNING stage
            "#,
        )
        .bind(article_id)
        .bind(from.as_str())
        .bind(worker_id)
        .bind(error)
        .bind(next_attempt_at)
        .bind(max_retries as i32)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        match row {
            None => Err(claim_lost(article_id, from)),
            Some((stage,)) if stage == Stage::Failed.as_str() => Ok(FailOutcome::Failed),
            Some(_) => Ok(FailOutcome::Requeued),
        }
    }

    async fn save_download(
        &self,
        article_id: i64,
        worker_id: &str,
        download: &DownloadedArticle,
        outcome: DownloadOutcome,
    ) -> Result<(), AppError> {
        let (to, skip_reason, note) = match outcome {
            DownloadOutcome::Downloaded => (Stage::Downloaded, None, None),
            DownloadOutcome::Duplicate(outlet) => (
                Stage::Skipped,
                Some(SkipReason::SameNews.as_str()),
                Some(format!("attributed to outlet {outlet}")),
            ),
        };
        check_transition(Stage::New, to)?;

        let result = sqlx::query(
            r#"
            UPDATE articles
            SET title = $3, description = $4, text = $5, authors = $6, pub_date = $7,
                is_paywalled = $8, stage = $9, skip_reason = $10, last_error = $11,
                claimed_by = NULL, claimed_at = NULL, next_attempt_at = NULL, updated_at = NOW()
            WHERE id = $1 AND stage = 'new' AND claimed_by = $2
            "#,
        )
        .bind(article_id)
        .bind(worker_id)
        .bind(&download.title)
        .bind(&download.description)
        .bind(&download.text)
        .bind(&download.authors)
        .bind(download.pub_date)
        .bind(download.is_paywalled)
        .bind(to.as_str())
        .bind(skip_reason)
        .bind(note)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(claim_lost(article_id, Stage::New));
        }
        Ok(())
    }

    async fn save_classification(
        &self,
        article_id: i64,
        worker_id: &str,
        classification: &Classification,
    ) -> Result<(), AppError> {
        let signature = classification.grouping.as_ref().map(|g| g.signature.to_db());
        let similar_to = classification.grouping.as_ref().and_then(|g| g.similar_to);

        let mut tx = self.pool.begin().await.map_err(db_error)?;

        // The new article takes the similar article's group, or founds one
        // keyed by the similar article's id.
        let result = sqlx::query(
            r#"
            UPDATE articles
            SET classification_score = $3, classification_label = $4, category = $5,
                minhash = $6,
                classified_at = NOW(),
                group_id = CASE WHEN $7::BIGINT IS NULL THEN NULL
                    ELSE COALESCE((SELECT s.group_id FROM articles s WHERE s.id = $7), $7)
                END,
                stage = 'classified', claimed_by = NULL, claimed_at = NULL,
                next_attempt_at = NULL, updated_at = NOW()
            WHERE id = $1 AND stage = 'downloaded' AND claimed_by = $2
            "#,
        )
        .bind(article_id)
        .bind(worker_id)
        .bind(classification.score)
        .bind(classification.label)
        .bind(classification.category.map(|c| c.as_str()))
        .bind(signature)
        .bind(similar_to)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(claim_lost(article_id, Stage::Downloaded));
        }

        if let Some(founder) = similar_to {
            sqlx::query(
                r#"
                UPDATE articles SET group_id = id, updated_at = NOW()
                WHERE id = $1 AND group_id IS NULL
                "#,
            )
            .bind(founder)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        }

        tx.commit().await.map_err(db_error)?;
        Ok(())
    }

    async fn save_resolution(
        &self,
        article_id: i64,
        worker_id: &str,
        links: &[NewEntityLink],
    ) -> Result<(), AppError> {
        check_unique_offsets(links)?;
        let offsets = links
            .iter()
            .map(|l| offset_column(l.char_offset))
            .collect::<Result<Vec<i32>, _>>()?;

        let mut tx = self.pool.begin().await.map_err(db_error)?;

        // Lock the row first so a lost claim rolls back before touching links.
        let owned: Option<(i64,)> = sqlx::query_as(
            r#"
            SELECT id FROM articles
            WHERE id = $1 AND stage = 'classified' AND claimed_by = $2
            FOR UPDATE
            "#,
        )
        .bind(article_id)
        .bind(worker_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?;
        if owned.is_none() {
            return Err(claim_lost(article_id, Stage::Classified));
        }

        sqlx::query(
            r#"DELETE FROM entity_links WHERE article_id = $1 AND NOT (char_offset = ANY($2))"#,
        )
        .bind(article_id)
        .bind(&offsets)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        for (link, offset) in links.iter().zip(&offsets) {
            sqlx::query(
                r#"
                INSERT INTO entity_links
                    (article_id, kind, keyword_id, raw_surface, normalized_surface, char_offset, score, label)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (article_id, char_offset) DO UPDATE
                SET kind = EXCLUDED.kind,
                    keyword_id = EXCLUDED.keyword_id,
                    raw_surface = EXCLUDED.raw_surface,
                    normalized_surface = EXCLUDED.normalized_surface,
                    score = EXCLUDED.score,
                    label = EXCLUDED.label,
                    updated_at = NOW()
                "#,
            )
            .bind(article_id)
            .bind(link.kind.as_str())
            .bind(link.keyword_id)
            .bind(&link.raw_surface)
            .bind(&link.normalized_surface)
            .bind(*offset)
            .bind(link.score)
            .bind(link.label.as_str())
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        }

        sqlx::query(
            r#"
            UPDATE articles
            SET stage = 'resolved', claimed_by = NULL, claimed_at = NULL,
                next_attempt_at = NULL, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(article_id)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        tracing::debug!(%article_id, links = links.len(), "Entity links stored");
        Ok(())
    }

    async fn get_article(&self, article_id: i64) -> Result<Option<Article>, AppError> {
        let row = sqlx::query_as::<_, ArticleRow>(r#"SELECT * FROM articles WHERE id = $1"#)
            .bind(article_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        row.map(Article::try_from).transpose()
    }

    async fn list_links(&self, article_id: i64) -> Result<Vec<EntityLink>, AppError> {
        let rows = sqlx::query_as::<_, EntityLinkRow>(
            r#"
            SELECT id, article_id, kind, keyword_id, raw_surface, normalized_surface,
                   char_offset, score, label
            FROM entity_links
            WHERE article_id = $1
            ORDER BY char_offset ASC
            "#,
        )
        .bind(article_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.into_iter().map(EntityLink::try_from).collect()
    }

    async fn count_by_stage(&self, stage: Stage) -> Result<i64, AppError> {
        let (count,): (i64,) = sqlx::query_as(r#"SELECT COUNT(*) FROM articles WHERE stage = $1"#)
            .bind(stage.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(count)
    }

    async fn release_worker_claims(&self, worker_id: &str) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE articles
            SET claimed_by = NULL, claimed_at = NULL, updated_at = NOW()
            WHERE claimed_by = $1
            "#,
        )
        .bind(worker_id)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected())
    }

    async fn requeue_download_errors(&self, max_age: TimeDelta) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE articles
            SET stage = 'new', skip_reason = NULL, download_requeued = TRUE,
                claimed_by = NULL, claimed_at = NULL, updated_at = NOW()
            WHERE stage = 'skipped'
              AND skip_reason = 'download_error'
              AND NOT download_requeued
              AND created_at > NOW() - $1 * INTERVAL '1 second'
            "#,
        )
        .bind(seconds(max_age))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        let requeued = result.rows_affected();
        if requeued > 0 {
            tracing::info!(%requeued, "Re-queued articles with download errors");
        }
        Ok(requeued)
    }
}

impl SimilarityIndex for ArticleRepository {
    async fn recent_signatures(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<IndexedArticle>, AppError> {
        let rows: Vec<(i64, String, Vec<i64>)> = sqlx::query_as(
            r#"
            SELECT id, clean_url, minhash FROM articles
            WHERE minhash IS NOT NULL AND classified_at >= $1
            ORDER BY id
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.into_iter()
            .map(|(article_id, url, minhash)| {
                Ok(IndexedArticle {
                    article_id,
                    domain: registrable_domain(&url).unwrap_or_default(),
                    signature: MinHash::from_db(minhash)?,
                })
            })
            .collect()
    }
}
