use chrono::Utc;

use crate::article::{Article, Stage};
use crate::error::AppError;
use crate::similarity::{self, MinHash, SIMILARITY_WINDOW};
use crate::stage_queue::{Classification, Grouping};
use crate::traits::{CategoryClassifier, RelevanceClassifier, SimilarityIndex};
use crate::util::registrable_domain;
use crate::worker::{StageOutcome, StageProcessor};

/// `downloaded -> classified`: relevance score, label and category.
/// Relevant articles also get a near-duplicate signature and group.
pub struct ClassifyProcessor<R, C, S>
where
    R: RelevanceClassifier,
    C: CategoryClassifier,
    S: SimilarityIndex,
{
    relevance: R,
    category: C,
    index: S,
    threshold: f64,
}

impl<R, C, S> ClassifyProcessor<R, C, S>
where
    R: RelevanceClassifier,
    C: CategoryClassifier,
    S: SimilarityIndex,
{
    pub fn new(relevance: R, category: C, index: S, threshold: f64) -> Self {
        Self {
            relevance,
            category,
            index,
            threshold,
        }
    }

    async fn group(&self, article: &Article) -> Result<Option<Grouping>, AppError> {
        let full_text = format!("{}\n{}\n{}", article.title, article.description, article.text);
        let Some(signature) = MinHash::from_text(&full_text) else {
            return Ok(None);
        };

        let domain = registrable_domain(&article.clean_url).unwrap_or_default();
        let candidates = self
            .index
            .recent_signatures(Utc::now() - SIMILARITY_WINDOW)
            .await?;
        let similar = similarity::best_match(&signature, &domain, article.id, &candidates);
        if let Some(s) = similar {
            tracing::info!(article_id = %article.id, similar_to = %s.article_id, similarity = %s.similarity, "Found similar article");
        }

        Ok(Some(Grouping {
            signature,
            similar_to: similar.map(|s| s.article_id),
        }))
    }
}

/// Model input: title, description and the outlet's domain on separate lines.
pub fn classification_input(article: &Article) -> String {
    let domain = registrable_domain(&article.clean_url).unwrap_or_default();
    format!("{}\n{}\n({})", article.title, article.description, domain)
}

impl<R, C, S> StageProcessor for ClassifyProcessor<R, C, S>
where
    R: RelevanceClassifier,
    C: CategoryClassifier,
    S: SimilarityIndex,
{
    fn stage(&self) -> Stage {
        Stage::Downloaded
    }

    async fn process(&self, article: &Article) -> Result<StageOutcome, AppError> {
        // Editor-submitted articles are relevant by definition.
        if article.is_manual() {
            return Ok(StageOutcome::Classified(Classification {
                score: 1.0,
                label: true,
                category: None,
                grouping: self.group(article).await?,
            }));
        }

        let prediction = self.relevance.predict(&classification_input(article)).await?;
        let p = prediction.probability;
        if !(0.0..=1.0).contains(&p) {
            return Err(AppError::InvalidCollaboratorOutput(format!(
                "relevance probability {p} outside [0, 1]"
            )));
        }
        let category = self.category.categorize(&prediction.embedding).await?;
        let label = p > self.threshold;
        let grouping = if label { self.group(article).await? } else { None };

        Ok(StageOutcome::Classified(Classification {
            score: p,
            label,
            category: Some(category),
            grouping,
        }))
    }
}
