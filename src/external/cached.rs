//! Caching wrapper around any matcher
//!
//! Every answer, positive or negative, lands in the persistent [`UserCache`];
//! a cached negative is replayed as NoMatch without touching the network.
//! Errors other than NoMatch are never cached.

use std::path::Path;

use super::cache::UserCache;
use super::{MatchError, Matcher};

/// Dump the cache to disk every this many fetched usernames.
const SAVE_EVERY: usize = 20;

/// A [`Matcher`] with a persistent cache for queried emails.
pub struct CachedMatcher {
    inner: Box<dyn Matcher>,
    cache: UserCache,
}

impl CachedMatcher {
    /// Wrap `inner` with the cache at `cache_path`. An existing file is
    /// loaded; otherwise an empty cache is dumped immediately so an
    /// unwritable path fails the run before any remote call.
    pub fn new(inner: Box<dyn Matcher>, cache_path: &Path) -> crate::error::Result<CachedMatcher> {
        tracing::info!(path = %cache_path.display(), "caching the external identities");
        let cache = UserCache::new(cache_path);
        if cache_path.exists() {
            cache.load_from_disk()?;
        } else {
            cache.dump_on_disk()?;
        }
        Ok(CachedMatcher { inner, cache })
    }

    /// Flush the cache to disk.
    pub fn dump_cache(&self) -> crate::error::Result<()> {
        self.cache.dump_on_disk()
    }

    fn resolve<F>(&self, email: &str, fetch: F) -> Result<String, MatchError>
    where
        F: FnOnce() -> Result<String, MatchError>,
    {
        if let Some(hit) = self.cache.get(email) {
            if hit.matched {
                return Ok(hit.user);
            }
            return Err(MatchError::NoMatch);
        }
        match fetch() {
            Ok(user) => {
                self.store(email, &user, true)?;
                Ok(user)
            }
            Err(MatchError::NoMatch) => {
                self.store(email, "", false)?;
                Err(MatchError::NoMatch)
            }
            Err(other) => Err(other),
        }
    }

    fn store(&self, email: &str, user: &str, matched: bool) -> Result<(), MatchError> {
        let len = self.cache.insert(email, user, matched);
        if len % SAVE_EVERY == 0 {
            self.cache
                .dump_on_disk()
                .map_err(|e| MatchError::Cache(e.to_string()))?;
        }
        Ok(())
    }
}

impl Matcher for CachedMatcher {
    fn match_by_email(&self, email: &str) -> Result<String, MatchError> {
        self.resolve(email, || self.inner.match_by_email(email))
    }

    fn supports_matching_by_commit(&self) -> bool {
        self.inner.supports_matching_by_commit()
    }

    fn match_by_commit(&self, email: &str, repo: &str, commit: &str) -> Result<String, MatchError> {
        self.resolve(email, || self.inner.match_by_commit(email, repo, commit))
    }
}
