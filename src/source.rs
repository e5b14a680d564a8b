//! Raw commit-signature source
//!
//! Signatures come either from a local CSV cache or, when the cache file does
//! not exist yet, from the commits table of a MySQL database; the query result
//! is then written to the cache so subsequent runs never touch the database.

use std::fs::File;
use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};
use mysql::prelude::Queryable;

use crate::error::{IdcanonError, Result};
use crate::normalize::normalize;

/// The fixed query sourcing one row per distinct signature triple, with a
/// sample commit hash and a commit timestamp attached.
pub const FIND_SIGNATURES_SQL: &str = "\
SELECT DISTINCT repository_id, commit_author_name, commit_author_email,
       MAX(commit_hash), commit_time
FROM commits
GROUP BY 1, 2, 3;";

/// Database schema the commits table lives in.
pub const DATABASE_NAME: &str = "gitbase";

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Stable FNV-1a hash, deterministic across runs and platforms. Used to key
/// the signature cache to the exact SQL text that produced it.
pub fn fnv1a_hash(data: &str) -> u64 {
    let mut hash = FNV_OFFSET;
    for byte in data.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Default cache file name; embeds the query hash so a query change never
/// reuses a stale cache.
pub fn default_cache_path() -> String {
    format!(
        "cached-commit-signatures-{:016x}.csv",
        fnv1a_hash(FIND_SIGNATURES_SQL)
    )
}

/// One commit signature as harvested from version control metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub repo: String,
    pub name: String,
    pub email: String,
    pub time: Option<DateTime<Utc>>,
    pub commit: Option<String>,
}

/// Connection coordinates of the commits database.
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

impl DatabaseOptions {
    fn url(&self) -> String {
        format!(
            "mysql://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, DATABASE_NAME
        )
    }
}

/// Return all signatures from the cache file if it exists, otherwise from the
/// database (writing the cache on the way out).
pub fn find_signatures(db: &DatabaseOptions, cache_path: &Path) -> Result<Vec<Signature>> {
    if cache_path.exists() {
        tracing::info!(path = %cache_path.display(), "reading cached signatures");
        return read_signatures_from_disk(cache_path);
    }

    tracing::info!(
        path = %cache_path.display(),
        "not cached, loading signatures from the database"
    );
    let signatures = read_signatures_from_database(db)?;
    store_signatures_on_disk(cache_path, &signatures)?;
    Ok(signatures)
}

/// Parse the signature cache CSV. The header must contain `repo`, `name` and
/// `email`; `time` and `commit` columns are optional. Rows with an empty
/// mandatory field are skipped silently. Every field is normalized on load.
pub fn read_signatures_from_disk(path: &Path) -> Result<Vec<Signature>> {
    let file = File::open(path)?;
    let mut reader = csv::Reader::from_reader(file);

    let headers = reader.headers()?.clone();
    let column = |name: &str| headers.iter().position(|h| h == name);
    let repo_col = column("repo").ok_or_else(|| missing_column("repo"))?;
    let name_col = column("name").ok_or_else(|| missing_column("name"))?;
    let email_col = column("email").ok_or_else(|| missing_column("email"))?;
    let time_col = column("time");
    let commit_col = column("commit");

    let mut signatures = Vec::new();
    for record in reader.records() {
        let record = record?;
        let field = |i: usize| record.get(i).map(normalize).unwrap_or_default();
        let repo = field(repo_col);
        let name = field(name_col);
        let email = field(email_col);
        if repo.is_empty() || name.is_empty() || email.is_empty() {
            continue;
        }
        let time = time_col
            .and_then(|i| record.get(i))
            .and_then(parse_timestamp);
        let commit = commit_col
            .and_then(|i| record.get(i))
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string);
        signatures.push(Signature {
            repo,
            name,
            email,
            time,
            commit,
        });
    }
    Ok(signatures)
}

/// Write signatures to the cache CSV, optional columns included.
pub fn store_signatures_on_disk(path: &Path, signatures: &[Signature]) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = csv::Writer::from_writer(file);
    writer.write_record(["repo", "name", "email", "time", "commit"])?;
    for sig in signatures {
        writer.write_record([
            sig.repo.as_str(),
            sig.name.as_str(),
            sig.email.as_str(),
            &sig.time.map(|t| t.to_rfc3339()).unwrap_or_default(),
            sig.commit.as_deref().unwrap_or_default(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn read_signatures_from_database(db: &DatabaseOptions) -> Result<Vec<Signature>> {
    let pool = mysql::Pool::new(db.url().as_str())?;
    let mut conn = pool.get_conn()?;

    let mut signatures = Vec::new();
    let rows: Vec<(String, String, String, Option<String>, Option<String>)> =
        conn.query(FIND_SIGNATURES_SQL)?;
    for (repo, name, email, commit, time) in rows {
        signatures.push(Signature {
            repo: normalize(&repo),
            name: normalize(&name),
            email: normalize(&email),
            time: time.as_deref().and_then(parse_timestamp),
            commit,
        });
    }
    Ok(signatures)
}

/// Accept unix seconds, RFC 3339, or the `YYYY-MM-DD HH:MM:SS` form MySQL
/// emits in the text protocol.
fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(epoch) = s.parse::<i64>() {
        return DateTime::from_timestamp(epoch, 0);
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|t| t.and_utc())
}

fn missing_column(name: &str) -> IdcanonError {
    IdcanonError::InputFormat {
        message: format!("signature cache is missing the {:?} column", name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn sig(repo: &str, name: &str, email: &str) -> Signature {
        Signature {
            repo: repo.to_string(),
            name: name.to_string(),
            email: email.to_string(),
            time: None,
            commit: None,
        }
    }

    #[test]
    fn store_and_read_round_trip() {
        let file = NamedTempFile::new().expect("temp file");
        let signatures = vec![
            Signature {
                time: Some(DateTime::from_timestamp(1_562_752_805, 0).unwrap()),
                commit: Some("8d20cc59".to_string()),
                ..sig("repo1", "bob", "bob@google.com")
            },
            sig("repo2", "alice", "alice@google.com"),
        ];
        store_signatures_on_disk(file.path(), &signatures).expect("store");
        let read = read_signatures_from_disk(file.path()).expect("read");
        assert_eq!(signatures, read);
    }

    #[test]
    fn read_normalizes_fields() {
        let mut file = NamedTempFile::new().expect("temp file");
        writeln!(file, "repo,name,email").unwrap();
        writeln!(file, "Repo1,Bob  Smith,Bob@Google.com").unwrap();
        file.flush().unwrap();
        let read = read_signatures_from_disk(file.path()).expect("read");
        assert_eq!(read, vec![sig("repo1", "bob smith", "bob@google.com")]);
    }

    #[test]
    fn read_skips_incomplete_rows() {
        let mut file = NamedTempFile::new().expect("temp file");
        writeln!(file, "repo,name,email").unwrap();
        writeln!(file, "repo1,,bob@google.com").unwrap();
        writeln!(file, ",bob,bob@google.com").unwrap();
        writeln!(file, "repo1,bob,").unwrap();
        writeln!(file, "repo1,bob,bob@google.com").unwrap();
        file.flush().unwrap();
        let read = read_signatures_from_disk(file.path()).expect("read");
        assert_eq!(read, vec![sig("repo1", "bob", "bob@google.com")]);
    }

    #[test]
    fn read_requires_header() {
        let mut file = NamedTempFile::new().expect("temp file");
        writeln!(file, "a,b,c").unwrap();
        writeln!(file, "repo1,bob,bob@google.com").unwrap();
        file.flush().unwrap();
        assert!(read_signatures_from_disk(file.path()).is_err());
    }

    #[test]
    fn timestamp_forms() {
        assert_eq!(
            parse_timestamp("1562752805"),
            DateTime::from_timestamp(1_562_752_805, 0)
        );
        assert_eq!(
            parse_timestamp("2019-07-10T10:00:05+00:00"),
            DateTime::from_timestamp(1_562_752_805, 0)
        );
        assert_eq!(
            parse_timestamp("2019-07-10 10:00:05"),
            DateTime::from_timestamp(1_562_752_805, 0)
        );
        assert_eq!(parse_timestamp(""), None);
        assert_eq!(parse_timestamp("not-a-time"), None);
    }

    #[test]
    fn cache_name_tracks_query() {
        let path = default_cache_path();
        assert!(path.starts_with("cached-commit-signatures-"));
        assert!(path.ends_with(".csv"));
        assert_ne!(fnv1a_hash("a"), fnv1a_hash("b"));
    }
}
