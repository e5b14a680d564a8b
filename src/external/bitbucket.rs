//! Bitbucket email matching

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::Deserialize;

use super::backoff::Backoff;
use super::{CancelToken, MatchError, Matcher};

/// Public Bitbucket REST endpoint.
pub const DEFAULT_API_URL: &str = "https://api.bitbucket.org/2.0";

/// Matches emails and Bitbucket users.
///
/// Tokens come from <https://id.atlassian.com/manage/api-tokens>.
pub struct BitbucketMatcher {
    client: reqwest::blocking::Client,
    api_url: String,
    cancel: CancelToken,
}

#[derive(Deserialize)]
struct User {
    account_id: String,
}

impl BitbucketMatcher {
    pub fn new(
        api_url: &str,
        token: &str,
        cancel: CancelToken,
    ) -> Result<BitbucketMatcher, MatchError> {
        let api_url = if api_url.is_empty() {
            DEFAULT_API_URL
        } else {
            api_url
        };
        let mut headers = HeaderMap::new();
        if !token.is_empty() {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| MatchError::Api("invalid API token".to_string()))?;
            headers.insert(AUTHORIZATION, value);
        }
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("idcanon/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()
            .map_err(|e| MatchError::Api(e.to_string()))?;
        Ok(BitbucketMatcher {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            cancel,
        })
    }
}

impl Matcher for BitbucketMatcher {
    /// Returns the Bitbucket account owning the given email. The users API is
    /// not rate-limited; a 404 is an authoritative no-match.
    fn match_by_email(&self, email: &str) -> Result<String, MatchError> {
        let url = format!("{}/users/{}", self.api_url, email);
        let response = Backoff::new(&self.cancel).execute(|| self.client.get(&url).send())?;
        let user: User = response
            .json()
            .map_err(|e| MatchError::Api(format!("bad user response: {}", e)))?;
        Ok(user.account_id)
    }
}
