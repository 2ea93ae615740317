use sqlx::{PgPool, Pool, Postgres};

use kmdb_core::entity::{CanonicalKeyword, EntityKind};
use kmdb_core::error::AppError;
use kmdb_core::traits::KeywordSource;

/// Canonical keywords in PostgreSQL.
#[derive(Clone)]
pub struct KeywordRepository {
    pool: Pool<Postgres>,
}

impl KeywordRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a keyword, or update the frequency of an existing one.
    pub async fn upsert_keyword(
        &self,
        kind: EntityKind,
        name: &str,
        usage_frequency: i64,
    ) -> Result<CanonicalKeyword, AppError> {
        let row = sqlx::query_as::<_, KeywordRow>(
            r#"
            INSERT INTO canonical_keywords (kind, name, usage_frequency)
            VALUES ($1, $2, $3)
            ON CONFLICT (kind, name) DO UPDATE SET usage_frequency = EXCLUDED.usage_frequency
            RETURNING id, kind, name, usage_frequency
            "#,
        )
        .bind(kind.as_str())
        .bind(name)
        .bind(usage_frequency)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        row.try_into()
    }

    pub async fn count_by_kind(&self, kind: EntityKind) -> Result<i64, AppError> {
        let (count,): (i64,) =
            sqlx::query_as(r#"SELECT COUNT(*) FROM canonical_keywords WHERE kind = $1"#)
                .bind(kind.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(count)
    }
}

#[derive(sqlx::FromRow)]
struct KeywordRow {
    id: i64,
    kind: String,
    name: String,
    usage_frequency: i64,
}

impl TryFrom<KeywordRow> for CanonicalKeyword {
    type Error = AppError;

    fn try_from(row: KeywordRow) -> Result<Self, Self::Error> {
        Ok(CanonicalKeyword {
            id: row.id,
            kind: row.kind.parse().map_err(AppError::DatabaseError)?,
            name: row.name,
            usage_frequency: row.usage_frequency,
        })
    }
}

impl KeywordSource for KeywordRepository {
    async fn load_keywords(&self, kind: EntityKind) -> Result<Vec<CanonicalKeyword>, AppError> {
        let rows = sqlx::query_as::<_, KeywordRow>(
            r#"
            SELECT id, kind, name, usage_frequency
            FROM canonical_keywords
            WHERE kind = $1
            ORDER BY usage_frequency DESC, name ASC
            "#,
        )
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        rows.into_iter().map(CanonicalKeyword::try_from).collect()
    }
}
