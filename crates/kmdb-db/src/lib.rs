pub mod article_repository;
pub mod config;
pub mod database;
pub mod keyword_repository;

pub use article_repository::ArticleRepository;
pub use config::DatabaseConfig;
pub use database::Database;
pub use keyword_repository::KeywordRepository;
