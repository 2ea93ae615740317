use crate::article::{Article, Stage};
use crate::error::AppError;
use crate::ner;
use crate::resolver::EntityResolver;
use crate::traits::{KeywordSource, Lemmatizer, NerTagger};
use crate::worker::{StageOutcome, StageProcessor};

/// `classified -> resolved`: tag the body and link entities to keywords.
pub struct ResolveProcessor<N, L, S>
where
    N: NerTagger,
    L: Lemmatizer,
    S: KeywordSource,
{
    tagger: N,
    resolver: EntityResolver<L, S>,
}

impl<N, L, S> ResolveProcessor<N, L, S>
where
    N: NerTagger,
    L: Lemmatizer,
    S: KeywordSource,
{
    pub fn new(tagger: N, resolver: EntityResolver<L, S>) -> Self {
        Self { tagger, resolver }
    }
}

impl<N, L, S> StageProcessor for ResolveProcessor<N, L, S>
where
    N: NerTagger,
    L: Lemmatizer,
    S: KeywordSource,
{
    fn stage(&self) -> Stage {
        Stage::Classified
    }

    async fn load(&self) -> Result<(), AppError> {
        self.resolver.keywords().warm().await
    }

    async fn process(&self, article: &Article) -> Result<StageOutcome, AppError> {
        if article.text.trim().is_empty() {
            return Ok(StageOutcome::Resolved(Vec::new()));
        }
        let spans = self.tagger.tag(&article.text).await?;
        let entities = ner::postprocess(spans)?;
        tracing::debug!(article_id = %article.id, entities = entities.len(), "Entities detected");
        let links = self.resolver.resolve(entities).await?;
        Ok(StageOutcome::Resolved(links))
    }
}
