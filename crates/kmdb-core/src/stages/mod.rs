//! One [`StageProcessor`](crate::worker::StageProcessor) per pipeline stage.

pub mod classify;
pub mod download;
pub mod keyword;
pub mod resolve;

pub use classify::ClassifyProcessor;
pub use download::DownloadProcessor;
pub use keyword::KeywordProcessor;
pub use resolve::ResolveProcessor;
