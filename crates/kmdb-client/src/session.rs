use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;

use kmdb_core::error::AppError;
use kmdb_core::traits::{Cookies, SessionProvider};

/// Reads outlet cookies from a JSON file of `{domain: {cookie: value}}`.
///
/// The file is re-read on every refresh, so an operator can paste in fresh
/// cookies without restarting the download worker. A missing file means no
/// outlet has a session.
#[derive(Debug, Clone)]
pub struct FileSessionProvider {
    path: PathBuf,
}

impl FileSessionProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SessionProvider for FileSessionProvider {
    async fn load_sessions(&self) -> Result<HashMap<String, Cookies>, AppError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::warn!(path = %self.path.display(), "Cookie file not found, fetching without sessions");
                return Ok(HashMap::new());
            }
            Err(e) => {
                return Err(AppError::ConfigError(format!(
                    "Failed to read cookie file {}: {e}",
                    self.path.display()
                )));
            }
        };

        let sessions: HashMap<String, Cookies> = serde_json::from_str(&raw)?;
        Ok(sessions
            .into_iter()
            .map(|(domain, cookies)| (domain.trim().to_lowercase(), cookies))
            .collect())
    }
}
