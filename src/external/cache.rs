//! Thread-safe email → username table backed by a CSV file
//!
//! The file layout is `email,user,match` where `match` is `1` or `0`. A `0`
//! row is an authoritative negative answer, distinct from "never asked".
//! Dumping is append-only: the current file contents are re-read under the
//! lock and only records that differ from what is already stored get written.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use crate::error::{IdcanonError, Result};

const CSV_TRUE: &str = "1";
const CSV_FALSE: &str = "0";

/// One cached answer of the external identity service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedUser {
    pub user: String,
    /// False when the service answered "no such user".
    pub matched: bool,
}

/// Shared email → username cache with a readers-writer discipline.
#[derive(Debug)]
pub struct UserCache {
    entries: RwLock<HashMap<String, CachedUser>>,
    path: PathBuf,
}

impl UserCache {
    pub fn new(path: impl Into<PathBuf>) -> UserCache {
        UserCache {
            entries: RwLock::new(HashMap::new()),
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Shared-lock read.
    pub fn get(&self, email: &str) -> Option<CachedUser> {
        self.entries.read().get(email).cloned()
    }

    /// Exclusive-lock insert; returns the new number of entries.
    pub fn insert(&self, email: &str, user: &str, matched: bool) -> usize {
        let mut entries = self.entries.write();
        entries.insert(
            email.to_string(),
            CachedUser {
                user: user.to_string(),
                matched,
            },
        );
        entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Replace the in-memory table with the file contents. Later rows
    /// override earlier ones.
    pub fn load_from_disk(&self) -> Result<()> {
        let mut entries = self.entries.write();
        *entries = read_cache_file(&self.path)?;
        Ok(())
    }

    /// Append every record that differs from what the file already stores.
    /// The header is written only when the file held no records.
    pub fn dump_on_disk(&self) -> Result<()> {
        let entries = self.entries.write();
        tracing::info!(path = %self.path.display(), "writing the external identities cache");

        let existing = if self.path.exists() {
            read_cache_file(&self.path)?
        } else {
            HashMap::new()
        };

        // a file with records grows by appending; anything else is rewritten
        let file = if existing.is_empty() {
            OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&self.path)?
        } else {
            OpenOptions::new().append(true).open(&self.path)?
        };
        let mut writer = csv::WriterBuilder::new().from_writer(file);
        if existing.is_empty() {
            writer.write_record(["email", "user", "match"])?;
        }

        let mut emails: Vec<&String> = entries.keys().collect();
        emails.sort_unstable();
        let mut written = 0usize;
        for email in emails {
            let record = &entries[email];
            if existing.get(email) == Some(record) {
                continue;
            }
            let matched = if record.matched { CSV_TRUE } else { CSV_FALSE };
            writer.write_record([email.as_str(), record.user.as_str(), matched])?;
            written += 1;
        }
        writer.flush()?;
        tracing::info!("written {} new records", written);
        Ok(())
    }
}

fn read_cache_file(path: &Path) -> Result<HashMap<String, CachedUser>> {
    let file = File::open(path)?;
    let mut reader = csv::Reader::from_reader(file);

    let headers = reader.headers()?.clone();
    let column = |name: &str| headers.iter().position(|h| h == name);
    let (email_col, user_col, match_col) = match (column("email"), column("user"), column("match"))
    {
        (Some(e), Some(u), Some(m)) => (e, u, m),
        // an empty file has no header and holds no records
        _ if headers.iter().all(|h| h.is_empty()) => return Ok(HashMap::new()),
        _ => {
            return Err(IdcanonError::InputFormat {
                message: format!(
                    "external cache {} must have email,user,match columns",
                    path.display()
                ),
            })
        }
    };

    let mut entries = HashMap::new();
    for record in reader.records() {
        let record = record?;
        let field = |i: usize| record.get(i).unwrap_or_default().to_string();
        entries.insert(
            field(email_col),
            CachedUser {
                user: field(user_col),
                matched: record.get(match_col) == Some(CSV_TRUE),
            },
        );
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use tempfile::NamedTempFile;

    fn write_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("temp file");
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    fn read_file(file: &NamedTempFile) -> String {
        let mut content = String::new();
        File::open(file.path())
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        content
    }

    #[test]
    fn load_later_rows_override() {
        let file = write_file(
            "email,user,match\n\
             a@x.com,alice,1\n\
             b@x.com,,0\n\
             a@x.com,bob,1\n",
        );
        let cache = UserCache::new(file.path());
        cache.load_from_disk().expect("load");
        assert_eq!(
            cache.get("a@x.com"),
            Some(CachedUser {
                user: "bob".to_string(),
                matched: true
            })
        );
        assert_eq!(
            cache.get("b@x.com"),
            Some(CachedUser {
                user: String::new(),
                matched: false
            })
        );
        assert_eq!(cache.get("c@x.com"), None);
    }

    #[test]
    fn dump_appends_only_new_records() {
        let file = write_file(
            "email,user,match\n\
             mcuadros@gmail.com,mcuadros,1\n\
             mcuadros-clone@gmail.com,,0\n",
        );
        let cache = UserCache::new(file.path());
        cache.insert("mcuadros@gmail.com", "mcuadros", true);
        cache.insert("mcuadros-clone@gmail.com", "mcuadros", true);
        cache.insert("vadim@sourced.tech", "vmarkovtsev", true);
        cache.dump_on_disk().expect("dump");
        assert_eq!(
            read_file(&file),
            "email,user,match\n\
             mcuadros@gmail.com,mcuadros,1\n\
             mcuadros-clone@gmail.com,,0\n\
             mcuadros-clone@gmail.com,mcuadros,1\n\
             vadim@sourced.tech,vmarkovtsev,1\n"
        );
    }

    #[test]
    fn dump_to_missing_file_writes_header() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("cache.csv");
        let cache = UserCache::new(&path);
        cache.insert("a@x.com", "alice", true);
        cache.dump_on_disk().expect("dump");
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "email,user,match\na@x.com,alice,1\n");
    }

    #[test]
    fn dump_is_idempotent() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("cache.csv");
        let cache = UserCache::new(&path);
        cache.insert("a@x.com", "alice", true);
        cache.dump_on_disk().expect("dump");
        cache.dump_on_disk().expect("second dump");
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "email,user,match\na@x.com,alice,1\n");
    }

    #[test]
    fn malformed_header_is_rejected() {
        let file = write_file("a,b,c\nx,y,z\n");
        let cache = UserCache::new(file.path());
        assert!(cache.load_from_disk().is_err());
    }
}
