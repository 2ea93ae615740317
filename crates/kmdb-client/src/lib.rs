pub mod adapters;
pub mod extractor;
pub mod fetcher;
pub mod inference;
pub mod session;

pub use adapters::{HvgAdapter, SelectorAdapter, default_registry};
pub use extractor::HtmlArticleExtractor;
pub use fetcher::ReqwestFetcher;
pub use inference::InferenceClient;
pub use session::FileSessionProvider;
