//! GitLab email matching

use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;

use super::backoff::Backoff;
use super::{CancelToken, MatchError, Matcher};

/// Public GitLab REST endpoint.
pub const DEFAULT_API_URL: &str = "https://gitlab.com/api/v4";

/// Matches emails and GitLab users.
///
/// Tokens come from <https://gitlab.com/-/profile/personal_access_tokens>.
pub struct GitLabMatcher {
    client: reqwest::blocking::Client,
    api_url: String,
    cancel: CancelToken,
}

#[derive(Deserialize)]
struct User {
    username: String,
}

impl GitLabMatcher {
    pub fn new(api_url: &str, token: &str, cancel: CancelToken) -> Result<GitLabMatcher, MatchError> {
        let api_url = if api_url.is_empty() {
            DEFAULT_API_URL
        } else {
            api_url
        };
        let mut headers = HeaderMap::new();
        if !token.is_empty() {
            let value = HeaderValue::from_str(token)
                .map_err(|_| MatchError::Api("invalid API token".to_string()))?;
            headers.insert("PRIVATE-TOKEN", value);
        }
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("idcanon/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()
            .map_err(|e| MatchError::Api(e.to_string()))?;
        Ok(GitLabMatcher {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            cancel,
        })
    }
}

impl Matcher for GitLabMatcher {
    /// Returns the first GitLab user matching the given email.
    fn match_by_email(&self, email: &str) -> Result<String, MatchError> {
        let url = format!("{}/users", self.api_url);
        let response = Backoff::new(&self.cancel)
            .execute(|| self.client.get(&url).query(&[("search", email)]).send())?;
        let users: Vec<User> = response
            .json()
            .map_err(|e| MatchError::Api(format!("bad users response: {}", e)))?;
        users
            .into_iter()
            .next()
            .map(|u| u.username)
            .ok_or(MatchError::NoMatch)
    }
}
