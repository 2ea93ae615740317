pub mod article;
pub mod config;
pub mod dedup;
pub mod entity;
pub mod error;
pub mod keywords;
pub mod ner;
pub mod resolver;
pub mod session;
pub mod similarity;
pub mod stage_queue;
pub mod stages;
pub mod synonyms;
pub mod text;
pub mod traits;
pub mod util;
pub mod worker;

#[cfg(test)]
pub mod testutil;

pub use article::{Article, ArticleSource, Category, NewArticle, RetryConfig, SkipReason, Stage};
pub use config::{PipelineConfig, WorkerConfig};
pub use dedup::OutletId;
pub use entity::{CanonicalKeyword, DetectedEntity, EntityKind, EntityLink, NewEntityLink};
pub use error::AppError;
pub use keywords::KeywordCache;
pub use resolver::EntityResolver;
pub use stage_queue::StageQueue;
pub use traits::{
    ArticleExtractor, CategoryClassifier, KeywordSource, Lemmatizer, NerTagger, PageFetcher,
    RelevanceClassifier, SessionProvider, SimilarityIndex,
};
pub use worker::{StageWorker, TracingWorkerReporter, WorkerReporter};
