use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use moka::future::Cache;

use crate::entity::{CanonicalKeyword, EntityKind};
use crate::error::AppError;
use crate::synonyms::{self, SynonymEntry};
use crate::traits::KeywordSource;

/// All canonical keywords of one kind plus its synonym aliases.
///
/// Keywords are held in frequency-descending, name-ascending order, so the
/// first match of any scan is also the preferred one.
#[derive(Debug)]
pub struct KeywordUniverse {
    kind: EntityKind,
    keywords: Vec<CanonicalKeyword>,
    lower_names: Vec<String>,
    by_name: HashMap<String, usize>,
    by_alias: HashMap<String, usize>,
}

impl KeywordUniverse {
    pub fn build(
        kind: EntityKind,
        mut keywords: Vec<CanonicalKeyword>,
        synonyms: &[SynonymEntry],
    ) -> Result<Self, AppError> {
        keywords.retain(|k| k.kind == kind);
        keywords.sort_by(|a, b| {
            b.usage_frequency
                .cmp(&a.usage_frequency)
                .then_with(|| a.name.cmp(&b.name))
        });

        let mut by_name = HashMap::with_capacity(keywords.len());
        let mut kept = Vec::with_capacity(keywords.len());
        for keyword in keywords {
            let lower = keyword.name.trim().to_lowercase();
            if lower.is_empty() || by_name.contains_key(&lower) {
                tracing::debug!(%kind, name = %keyword.name, "Ignoring duplicate or empty keyword");
                continue;
            }
            by_name.insert(lower, kept.len());
            kept.push(keyword);
        }
        let lower_names = kept.iter().map(|k| k.name.trim().to_lowercase()).collect();

        let by_id: HashMap<i64, usize> = kept.iter().enumerate().map(|(i, k)| (k.id, i)).collect();
        let mut by_alias: HashMap<String, usize> = HashMap::new();
        for entry in synonyms {
            let Some(&idx) = by_id.get(&entry.keyword_id) else {
                tracing::warn!(%kind, keyword_id = entry.keyword_id, "Synonym row refers to unknown keyword");
                continue;
            };
            for alias in &entry.aliases {
                let alias = alias.trim().to_lowercase();
                match by_alias.get(&alias) {
                    Some(&existing) if existing != idx => {
                        return Err(AppError::ConfigError(format!(
                            "{kind} alias '{alias}' maps to both '{}' and '{}'",
                            kept[existing].name, kept[idx].name
                        )));
                    }
                    Some(_) => {}
                    None => {
                        by_alias.insert(alias, idx);
                    }
                }
            }
        }

        Ok(Self {
            kind,
            keywords: kept,
            lower_names,
            by_name,
            by_alias,
        })
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn keywords(&self) -> &[CanonicalKeyword] {
        &self.keywords
    }

    pub fn get(&self, idx: usize) -> Option<&CanonicalKeyword> {
        self.keywords.get(idx)
    }

    /// `(index, lowercased name)` pairs in preference order.
    pub fn lowercase_names(&self) -> impl Iterator<Item = (usize, &str)> {
        self.lower_names.iter().map(String::as_str).enumerate()
    }

    pub fn identical(&self, lower: &str) -> Option<usize> {
        self.by_name.get(lower).copied()
    }

    pub fn synonym(&self, lower: &str) -> Option<usize> {
        self.by_alias.get(lower).copied()
    }

    pub fn alias_count(&self) -> usize {
        self.by_alias.len()
    }

    pub fn len(&self) -> usize {
        self.keywords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }
}

/// Keyword universes per kind, built on first use.
///
/// Entries never expire. A restart or [`KeywordCache::refresh`] reloads
/// keywords from the source and synonyms from disk.
#[derive(Clone)]
pub struct KeywordCache<S: KeywordSource> {
    source: S,
    synonyms_dir: PathBuf,
    synonyms: Arc<Mutex<HashMap<EntityKind, Arc<Vec<SynonymEntry>>>>>,
    universes: Cache<EntityKind, Arc<KeywordUniverse>>,
}

impl<S: KeywordSource> KeywordCache<S> {
    pub fn new(source: S, synonyms_dir: impl Into<PathBuf>) -> Self {
        Self {
            source,
            synonyms_dir: synonyms_dir.into(),
            synonyms: Arc::new(Mutex::new(HashMap::new())),
            universes: Cache::builder()
                .max_capacity(EntityKind::ALL.len() as u64)
                .build(),
        }
    }

    /// Read the synonym tables of every kind from disk.
    pub fn load_synonyms(&self) -> Result<(), AppError> {
        let mut loaded = HashMap::new();
        for kind in EntityKind::ALL {
            let entries = synonyms::load_for_kind(&self.synonyms_dir, kind)?;
            loaded.insert(kind, Arc::new(entries));
        }
        let mut guard = self
            .synonyms
            .lock()
            .map_err(|e| AppError::Generic(format!("synonym table lock poisoned: {e}")))?;
        *guard = loaded;
        Ok(())
    }

    fn synonyms_for(&self, kind: EntityKind) -> Result<Arc<Vec<SynonymEntry>>, AppError> {
        let guard = self
            .synonyms
            .lock()
            .map_err(|e| AppError::Generic(format!("synonym table lock poisoned: {e}")))?;
        Ok(guard.get(&kind).cloned().unwrap_or_default())
    }

    /// The universe of `kind`, built once. Concurrent callers share one build.
    pub async fn get(&self, kind: EntityKind) -> Result<Arc<KeywordUniverse>, AppError> {
        self.universes
            .try_get_with(kind, self.build(kind))
            .await
            .map_err(unshare)
    }

    async fn build(&self, kind: EntityKind) -> Result<Arc<KeywordUniverse>, AppError> {
        let keywords = self.source.load_keywords(kind).await?;
        let synonyms = self.synonyms_for(kind)?;
        let universe = KeywordUniverse::build(kind, keywords, &synonyms)?;
        tracing::info!(
            %kind,
            keywords = universe.len(),
            aliases = universe.alias_count(),
            "Keyword universe loaded"
        );
        Ok(Arc::new(universe))
    }

    /// Read the synonym tables and build every universe, so a broken table
    /// fails here instead of on the first article.
    pub async fn warm(&self) -> Result<(), AppError> {
        self.load_synonyms()?;
        for kind in EntityKind::ALL {
            self.get(kind).await?;
        }
        Ok(())
    }

    /// Drop every cached universe and re-read the synonym tables.
    pub async fn refresh(&self) -> Result<(), AppError> {
        self.load_synonyms()?;
        self.universes.invalidate_all();
        self.universes.run_pending_tasks().await;
        Ok(())
    }
}

/// Errors from a shared cache build arrive behind an `Arc`.
fn unshare(e: Arc<AppError>) -> AppError {
    Arc::try_unwrap(e).unwrap_or_else(|shared| match shared.as_ref() {
        AppError::ConfigError(m) => AppError::ConfigError(m.clone()),
        AppError::DatabaseError(m) => AppError::DatabaseError(m.clone()),
        other => AppError::Generic(other.to_string()),
    })
}
