use crate::article::{Article, Stage};
use crate::error::AppError;
use crate::worker::{StageOutcome, StageProcessor};

/// `resolved -> ready`. Curators only see `ready` articles.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordProcessor;

impl StageProcessor for KeywordProcessor {
    fn stage(&self) -> Stage {
        Stage::Resolved
    }

    async fn process(&self, _article: &Article) -> Result<StageOutcome, AppError> {
        Ok(StageOutcome::Advanced)
    }
}
