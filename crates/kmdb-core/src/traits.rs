use std::collections::HashMap;
use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::article::Category;
use crate::entity::{CanonicalKeyword, EntityKind, NerSpan};
use crate::error::AppError;
use crate::similarity::IndexedArticle;

/// Cookie name to value, sent with every request to one outlet.
pub type Cookies = HashMap<String, String>;

/// Fetches raw HTML for an article URL.
pub trait PageFetcher: Send + Sync + Clone {
    fn fetch(
        &self,
        url: &str,
        cookies: Option<&Cookies>,
    ) -> impl Future<Output = Result<String, AppError>> + Send;
}

/// Generic, outlet-agnostic article fields pulled from a page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedArticle {
    pub title: String,
    pub description: String,
    pub text: String,
    pub authors: Vec<String>,
    pub pub_date: Option<DateTime<Utc>>,
}

/// Extracts title, description and body from HTML.
pub trait ArticleExtractor: Send + Sync + Clone {
    fn extract(&self, url: &str, html: &str) -> Result<ExtractedArticle, AppError>;
}

/// Per-outlet override for fields the generic extractor gets wrong.
///
/// Every hook returns `None` to keep the generic result.
pub trait OutletAdapter: Send + Sync {
    fn name(&self) -> &str;

    fn matches(&self, url: &str) -> bool;

    fn title(&self, _html: &str) -> Option<String> {
        None
    }

    fn description(&self, _html: &str) -> Option<String> {
        None
    }

    fn text(&self, _html: &str) -> Option<String> {
        None
    }
}

/// Ordered adapter list. The first adapter whose predicate matches wins.
#[derive(Default)]
pub struct OutletRegistry {
    adapters: Vec<Box<dyn OutletAdapter>>,
}

impl OutletRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, adapter: impl OutletAdapter + 'static) -> Self {
        self.adapters.push(Box::new(adapter));
        self
    }

    pub fn find(&self, url: &str) -> Option<&dyn OutletAdapter> {
        self.adapters
            .iter()
            .find(|a| a.matches(url))
            .map(|a| a.as_ref())
    }

    /// Overwrite the fields the matching adapter provides, if any.
    pub fn apply(&self, url: &str, html: &str, article: &mut ExtractedArticle) -> Option<&str> {
        let adapter = self.find(url)?;
        if let Some(title) = adapter.title(html) {
            article.title = title;
        }
        if let Some(description) = adapter.description(html) {
            article.description = description;
        }
        if let Some(text) = adapter.text(html) {
            article.text = text;
        }
        Some(adapter.name())
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

/// Supplies the login cookies of every outlet, keyed by domain.
pub trait SessionProvider: Send + Sync {
    fn load_sessions(
        &self,
    ) -> impl Future<Output = Result<HashMap<String, Cookies>, AppError>> + Send;
}

/// Named-entity tagger.
pub trait NerTagger: Send + Sync + Clone {
    fn tag(&self, text: &str) -> impl Future<Output = Result<Vec<NerSpan>, AppError>> + Send;
}

/// Relevance probability plus the sentence embedding it was computed from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelevancePrediction {
    pub probability: f64,
    pub embedding: Vec<f32>,
}

pub trait RelevanceClassifier: Send + Sync + Clone {
    fn predict(
        &self,
        text: &str,
    ) -> impl Future<Output = Result<RelevancePrediction, AppError>> + Send;
}

/// Classifies a relevance embedding into a coverage category.
pub trait CategoryClassifier: Send + Sync + Clone {
    fn categorize(
        &self,
        embedding: &[f32],
    ) -> impl Future<Output = Result<Category, AppError>> + Send;
}

pub trait Lemmatizer: Send + Sync + Clone {
    fn lemmatize(&self, text: &str) -> impl Future<Output = Result<String, AppError>> + Send;
}

/// Signatures of relevant articles classified since a cutoff.
pub trait SimilarityIndex: Send + Sync + Clone {
    fn recent_signatures(
        &self,
        since: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<IndexedArticle>, AppError>> + Send;
}

/// Canonical keywords of one kind, with usage frequencies.
pub trait KeywordSource: Send + Sync + Clone {
    fn load_keywords(
        &self,
        kind: EntityKind,
    ) -> impl Future<Output = Result<Vec<CanonicalKeyword>, AppError>> + Send;
}
