//! GitHub email and commit matching

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use serde::Deserialize;

use super::backoff::Backoff;
use super::{CancelToken, MatchError, Matcher};

/// Public GitHub REST endpoint.
pub const DEFAULT_API_URL: &str = "https://api.github.com";

const NOREPLY_SUFFIX: &str = "@users.noreply.github.com";

static GITHUB_REPO_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"github\.com/([^/]+)/([^/]+?)(?:\.git)?$").expect("invalid github repo regex")
});

/// Matches emails and GitHub users.
///
/// Tokens come from <https://github.com/settings/tokens>.
pub struct GitHubMatcher {
    client: reqwest::blocking::Client,
    api_url: String,
    cancel: CancelToken,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchUser>,
}

#[derive(Deserialize)]
struct SearchUser {
    login: String,
}

#[derive(Deserialize)]
struct CommitResponse {
    author: Option<UserRef>,
    committer: Option<UserRef>,
}

#[derive(Deserialize)]
struct UserRef {
    login: Option<String>,
}

impl GitHubMatcher {
    pub fn new(api_url: &str, token: &str, cancel: CancelToken) -> Result<GitHubMatcher, MatchError> {
        let api_url = if api_url.is_empty() {
            DEFAULT_API_URL
        } else {
            api_url
        };
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github.v3+json"));
        if !token.is_empty() {
            let value = HeaderValue::from_str(&format!("token {}", token))
                .map_err(|_| MatchError::Api("invalid API token".to_string()))?;
            headers.insert(AUTHORIZATION, value);
        }
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("idcanon/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()
            .map_err(|e| MatchError::Api(e.to_string()))?;
        Ok(GitHubMatcher {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            cancel,
        })
    }

    /// One page of the user search, most recently joined first.
    fn search_users(&self, query: &str) -> Result<Vec<String>, MatchError> {
        let url = format!("{}/search/users", self.api_url);
        let response = Backoff::new(&self.cancel).execute(|| {
            self.client
                .get(&url)
                .query(&[("q", query), ("sort", "joined"), ("per_page", "1")])
                .send()
        })?;
        let parsed: SearchResponse = response
            .json()
            .map_err(|e| MatchError::Api(format!("bad search response: {}", e)))?;
        Ok(parsed.items.into_iter().map(|u| u.login).collect())
    }
}

impl Matcher for GitHubMatcher {
    /// Returns the most recently joined GitHub user with the given email.
    fn match_by_email(&self, email: &str) -> Result<String, MatchError> {
        // The noreply form encodes the login; no API call needed.
        if email.ends_with(NOREPLY_SUFFIX) {
            return Ok(user_from_noreply_email(email));
        }

        let logins = self.search_users(&format!("{} in:email", email))?;
        if let Some(login) = logins.into_iter().next() {
            return Ok(login);
        }

        // Some emails are only findable when the parts are searched as
        // separate terms; retry once with the "@" blanked out.
        let logins = self.search_users(&email.replacen('@', " ", 1))?;
        logins.into_iter().next().ok_or(MatchError::NoMatch)
    }

    fn supports_matching_by_commit(&self) -> bool {
        true
    }

    /// Resolves the author (or committer) login of the given commit when the
    /// repository lives on github.com.
    fn match_by_commit(&self, email: &str, repo: &str, commit: &str) -> Result<String, MatchError> {
        let (owner, name) = match parse_github_repo(repo) {
            Some(parts) => parts,
            None => {
                tracing::debug!(repo, email, "not a github repository, skipping commit scan");
                return Err(MatchError::NoMatch);
            }
        };
        let url = format!("{}/repos/{}/{}/commits/{}", self.api_url, owner, name, commit);
        let response = Backoff::new(&self.cancel).execute(|| self.client.get(&url).send())?;
        let parsed: CommitResponse = response
            .json()
            .map_err(|e| MatchError::Api(format!("bad commit response: {}", e)))?;
        parsed
            .author
            .and_then(|u| u.login)
            .or_else(|| parsed.committer.and_then(|u| u.login))
            .ok_or(MatchError::NoMatch)
    }
}

/// Extract the login from `<id>+<login>@users.noreply.github.com` (the id
/// prefix is absent on older accounts).
fn user_from_noreply_email(email: &str) -> String {
    let user = email.split('@').next().unwrap_or_default();
    match user.split_once('+') {
        Some((_, login)) => login.to_string(),
        None => user.to_string(),
    }
}

fn parse_github_repo(repo: &str) -> Option<(String, String)> {
    GITHUB_REPO_RE
        .captures(repo)
        .map(|c| (c[1].to_string(), c[2].to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noreply_email_short_circuits() {
        assert_eq!(
            user_from_noreply_email("12345+octocat@users.noreply.github.com"),
            "octocat"
        );
        assert_eq!(
            user_from_noreply_email("octocat@users.noreply.github.com"),
            "octocat"
        );
    }

    #[test]
    fn github_repo_parsing() {
        assert_eq!(
            parse_github_repo("git://github.com/src-d/go-git.git"),
            Some(("src-d".to_string(), "go-git".to_string()))
        );
        assert_eq!(
            parse_github_repo("https://github.com/src-d/go-git"),
            Some(("src-d".to_string(), "go-git".to_string()))
        );
        assert_eq!(
            parse_github_repo("github.com/src-d/go-git"),
            Some(("src-d".to_string(), "go-git".to_string()))
        );
        assert_eq!(parse_github_repo("wtf.com/src-d/go-git"), None);
    }
}
