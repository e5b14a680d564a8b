//! CLI argument definitions
//!
//! One command: read the commit signatures, resolve the identities, write the
//! aliases/identities parquet pair.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::source::{self, DatabaseOptions};

/// Reconstructs a canonical directory of contributors from commit signatures
#[derive(Parser, Debug)]
#[command(name = "idcanon")]
#[command(about = "Clusters noisy commit signatures into canonical contributor identities")]
#[command(version)]
#[command(author)]
pub struct Cli {
    /// Path prefix of the two output parquet files
    #[arg(short, long)]
    pub output: String,

    /// Database host
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// Database port
    #[arg(long, default_value_t = 3306)]
    pub port: u16,

    /// Database user, normally the default value is fine
    #[arg(long, default_value = "root")]
    pub user: String,

    /// Database password
    #[arg(long, default_value = "")]
    pub password: String,

    /// External identity service for matching by email; omit to disable
    #[arg(long, value_enum)]
    pub external: Option<Provider>,

    /// API URL of the external service; the blank value means the public site
    #[arg(long, default_value = "")]
    pub api_url: String,

    /// API token for the external service
    #[arg(long, default_value = "")]
    pub token: String,

    /// Path of the raw signatures cache; the default embeds the query hash
    #[arg(long)]
    pub cache_path: Option<PathBuf>,

    /// Path of the external lookup cache; `{provider}` is substituted
    #[arg(long, default_value = "cached-{provider}-users.csv")]
    pub external_cache_path: String,

    /// Maximum distinct emails plus names a name-based merge may accumulate
    /// in one person
    #[arg(long, default_value_t = 20)]
    pub max_identities: usize,

    /// Recency window in months behind "now" for the primary selection
    #[arg(long, default_value_t = 12)]
    pub months: u32,

    /// Minimum recent occurrences required to pick primaries by recency
    #[arg(long, default_value_t = 5)]
    pub min_recent_count: u64,
}

/// Supported external identity services
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Provider {
    Github,
    Gitlab,
    Bitbucket,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Github => "github",
            Provider::Gitlab => "gitlab",
            Provider::Bitbucket => "bitbucket",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Cli {
    pub fn database_options(&self) -> DatabaseOptions {
        DatabaseOptions {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            password: self.password.clone(),
        }
    }

    pub fn signature_cache_path(&self) -> PathBuf {
        self.cache_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(source::default_cache_path()))
    }

    pub fn external_cache_path_for(&self, provider: Provider) -> PathBuf {
        PathBuf::from(
            self.external_cache_path
                .replace("{provider}", provider.as_str()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).expect("parse")
    }

    #[test]
    fn defaults() {
        let cli = parse(&["idcanon", "--output", "out.parquet"]);
        assert_eq!(cli.host, "0.0.0.0");
        assert_eq!(cli.port, 3306);
        assert_eq!(cli.user, "root");
        assert_eq!(cli.max_identities, 20);
        assert_eq!(cli.months, 12);
        assert_eq!(cli.min_recent_count, 5);
        assert_eq!(cli.external, None);
    }

    #[test]
    fn output_is_required() {
        assert!(Cli::try_parse_from(["idcanon"]).is_err());
    }

    #[test]
    fn provider_substitution() {
        let cli = parse(&["idcanon", "--output", "o", "--external", "gitlab"]);
        assert_eq!(
            cli.external_cache_path_for(Provider::Gitlab),
            PathBuf::from("cached-gitlab-users.csv")
        );
    }

    #[test]
    fn cache_path_default_embeds_query_hash() {
        let cli = parse(&["idcanon", "--output", "o"]);
        let path = cli.signature_cache_path();
        assert!(path
            .to_string_lossy()
            .starts_with("cached-commit-signatures-"));
    }
}
