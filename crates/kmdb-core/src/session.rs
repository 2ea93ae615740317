use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::error::AppError;
use crate::traits::{Cookies, SessionProvider};
use crate::util::host_of;

/// Login cookies per outlet domain, owned by the download stage.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: HashMap<String, Cookies>,
    refreshed_at: Option<Instant>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sessions(sessions: HashMap<String, Cookies>) -> Self {
        let mut store = Self::default();
        store.replace(sessions);
        store
    }

    fn replace(&mut self, sessions: HashMap<String, Cookies>) {
        self.sessions = sessions
            .into_iter()
            .map(|(domain, cookies)| (domain.trim().to_lowercase(), cookies))
            .collect();
        self.refreshed_at = Some(Instant::now());
    }

    /// True before the first refresh and once `interval` has elapsed since
    /// the last one.
    pub fn needs_refresh(&self, interval: Duration) -> bool {
        self.refreshed_at
            .is_none_or(|at| at.elapsed() >= interval)
    }

    /// Replace every session with a fresh set from `provider`.
    ///
    /// On error the previous sessions are kept.
    pub async fn refresh<P: SessionProvider>(&mut self, provider: &P) -> Result<usize, AppError> {
        let sessions = provider.load_sessions().await?;
        self.replace(sessions);
        tracing::info!(domains = self.sessions.len(), "Outlet sessions refreshed");
        Ok(self.sessions.len())
    }

    /// Cookies for a URL: exact host first, then each parent domain.
    pub fn cookies_for(&self, url: &str) -> Option<&Cookies> {
        let host = host_of(url)?;
        let mut candidate = host.as_str();
        loop {
            if let Some(cookies) = self.sessions.get(candidate) {
                return Some(cookies);
            }
            match candidate.split_once('.') {
                Some((_, parent)) if parent.contains('.') => candidate = parent,
                _ => return None,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
