//! External identity services
//!
//! An oracle maps a commit email (or a sample commit) to the username of the
//! matching account on GitHub, GitLab or Bitbucket. All drivers speak plain
//! HTTP through a shared retry/backoff helper and can be wrapped in a
//! persistent on-disk cache shared between runs.

mod backoff;
mod bitbucket;
mod cache;
mod cached;
mod github;
mod gitlab;

pub use bitbucket::BitbucketMatcher;
pub use cache::{CachedUser, UserCache};
pub use cached::CachedMatcher;
pub use github::GitHubMatcher;
pub use gitlab::GitLabMatcher;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

/// Outcome of an external lookup that did not produce a username.
///
/// `NoMatch` and `Api` are expected signals the pipeline swallows; the other
/// variants abort the run.
#[derive(Error, Debug)]
pub enum MatchError {
    #[error("no matches found")]
    NoMatch,

    #[error("external API error: {0}")]
    Api(String),

    #[error("{0}")]
    RetriesExhausted(String),

    #[error("cancelled")]
    Cancelled,

    #[error("external cache error: {0}")]
    Cache(String),
}

/// The external matching service API.
pub trait Matcher: Send + Sync {
    /// Resolve the username owning the given email.
    fn match_by_email(&self, email: &str) -> Result<String, MatchError>;

    /// Whether this service can resolve identities from commit metadata.
    fn supports_matching_by_commit(&self) -> bool {
        false
    }

    /// Resolve the username that authored the given commit.
    fn match_by_commit(&self, _email: &str, _repo: &str, _commit: &str) -> Result<String, MatchError> {
        Err(MatchError::Api(
            "matching by commit is not supported".to_string(),
        ))
    }
}

/// Shorthands of the registered external matchers.
pub const PROVIDERS: &[&str] = &["bitbucket", "github", "gitlab"];

/// Construct the matcher registered under the given shorthand. An empty
/// `api_url` selects the public endpoint of the service.
pub fn create_matcher(
    provider: &str,
    api_url: &str,
    token: &str,
    cancel: CancelToken,
) -> Result<Box<dyn Matcher>, MatchError> {
    match provider {
        "github" => Ok(Box::new(GitHubMatcher::new(api_url, token, cancel)?)),
        "gitlab" => Ok(Box::new(GitLabMatcher::new(api_url, token, cancel)?)),
        "bitbucket" => Ok(Box::new(BitbucketMatcher::new(api_url, token, cancel)?)),
        other => Err(MatchError::Api(format!(
            "unsupported external matching service: {}",
            other
        ))),
    }
}

/// Cooperative cancellation flag shared between the signal handler and every
/// sleeping or retrying external call.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
