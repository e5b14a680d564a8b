//! Ignore/popularity lookup sets for identity filtering
//!
//! Six line-per-entry lists are gzipped and embedded into the binary at
//! compile time. Ignored entries drop a signature entirely; popular entries
//! are kept but carry no weight as merge evidence.

use std::collections::HashSet;
use std::io::{BufRead, BufReader};

use flate2::read::GzDecoder;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::Result;
use crate::normalize::normalize;

static DOMAINS_GZ: &[u8] = include_bytes!("../blacklists/domains.csv.gz");
static TOP_LEVEL_DOMAINS_GZ: &[u8] = include_bytes!("../blacklists/top_level_domains.csv.gz");
static NAMES_GZ: &[u8] = include_bytes!("../blacklists/names.csv.gz");
static EMAILS_GZ: &[u8] = include_bytes!("../blacklists/emails.csv.gz");
static POPULAR_EMAILS_GZ: &[u8] = include_bytes!("../blacklists/popular_emails.csv.gz");
static POPULAR_NAMES_GZ: &[u8] = include_bytes!("../blacklists/popular_names.csv.gz");

/// All the data required to filter identities or identity connections.
///
/// Every entry is stored normalized (lowercase, diacritic-stripped,
/// space-collapsed). `Default` yields an empty blacklist, useful in tests.
#[derive(Debug, Clone, Default)]
pub struct Blacklist {
    pub domains: HashSet<String>,
    pub top_level_domains: HashSet<String>,
    pub names: HashSet<String>,
    pub emails: HashSet<String>,
    pub popular_emails: HashSet<String>,
    pub popular_names: HashSet<String>,
}

impl Blacklist {
    /// Load the blacklist from the lists embedded into the binary.
    pub fn load() -> Result<Blacklist> {
        Ok(Blacklist {
            domains: read_lines_set(DOMAINS_GZ)?,
            top_level_domains: read_lines_set(TOP_LEVEL_DOMAINS_GZ)?,
            names: read_lines_set(NAMES_GZ)?,
            emails: read_lines_set(EMAILS_GZ)?,
            popular_emails: read_lines_set(POPULAR_EMAILS_GZ)?,
            popular_names: read_lines_set(POPULAR_NAMES_GZ)?,
        })
    }

    /// True when the email must not contribute a fragment at all: not exactly
    /// one `@`, explicitly blacklisted, ignored domain or top-level domain,
    /// single-label domain, or an IP-literal domain.
    pub fn is_ignored_email(&self, email: &str) -> bool {
        if !email.contains('@') || is_multiple_email(email) || self.is_blacklisted_email(email) {
            return true;
        }
        let domain = match email.split('@').nth(1) {
            Some(d) => d,
            None => return true,
        };
        self.is_ignored_domain(domain)
            || self.is_ignored_top_level_domain(domain)
            || is_single_label_domain(domain)
            || is_ip_domain(domain)
    }

    pub fn is_popular_email(&self, email: &str) -> bool {
        self.popular_emails.contains(email)
    }

    pub fn is_popular_name(&self, name: &str) -> bool {
        self.popular_names.contains(name)
    }

    pub fn is_blacklisted_email(&self, email: &str) -> bool {
        self.emails.contains(email)
    }

    /// Accepts a full email or a bare domain.
    pub fn is_ignored_domain(&self, s: &str) -> bool {
        let domain = s.rsplit('@').next().unwrap_or(s);
        self.domains.contains(domain)
    }

    /// Accepts a full email or a bare domain; checks the last dot-label.
    pub fn is_ignored_top_level_domain(&self, s: &str) -> bool {
        let domain = s.rsplit('@').next().unwrap_or(s);
        let top_level = domain.rsplit('.').next().unwrap_or(domain);
        self.top_level_domains.contains(top_level)
    }

    pub fn is_ignored_name(&self, name: &str) -> bool {
        self.names.contains(&name.to_lowercase())
    }
}

fn read_lines_set(compressed: &[u8]) -> Result<HashSet<String>> {
    let reader = BufReader::new(GzDecoder::new(compressed));
    let mut lines = HashSet::new();
    for line in reader.lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        lines.insert(normalize(&line));
    }
    Ok(lines)
}

fn is_multiple_email(s: &str) -> bool {
    s.matches('@').count() > 1
}

fn is_single_label_domain(s: &str) -> bool {
    !s.contains('.')
}

static IP4_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+\.\d+\.\d+\.\d+$").expect("invalid IPv4 regex"));

static IP6_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(([0-9a-fA-F]{1,4}:){7,7}[0-9a-fA-F]{1,4}|([0-9a-fA-F]{1,4}:){1,7}:|([0-9a-fA-F]{1,4}:){1,6}:[0-9a-fA-F]{1,4}|([0-9a-fA-F]{1,4}:){1,5}(:[0-9a-fA-F]{1,4}){1,2}|([0-9a-fA-F]{1,4}:){1,4}(:[0-9a-fA-F]{1,4}){1,3}|([0-9a-fA-F]{1,4}:){1,3}(:[0-9a-fA-F]{1,4}){1,4}|([0-9a-fA-F]{1,4}:){1,2}(:[0-9a-fA-F]{1,4}){1,5}|[0-9a-fA-F]{1,4}:((:[0-9a-fA-F]{1,4}){1,6})|:((:[0-9a-fA-F]{1,4}){1,7}|:)|fe80:(:[0-9a-fA-F]{0,4}){0,4}%[0-9a-zA-Z]{1,}|::(ffff(:0{1,4}){0,1}:){0,1}((25[0-5]|(2[0-4]|1{0,1}[0-9]){0,1}[0-9])\.){3,3}(25[0-5]|(2[0-4]|1{0,1}[0-9]){0,1}[0-9])|([0-9a-fA-F]{1,4}:){1,4}:((25[0-5]|(2[0-4]|1{0,1}[0-9]){0,1}[0-9])\.){3,3}(25[0-5]|(2[0-4]|1{0,1}[0-9]){0,1}[0-9]))",
    )
    .expect("invalid IPv6 regex")
});

fn is_ip_domain(s: &str) -> bool {
    IP4_RE.is_match(s) || IP6_RE.is_match(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_blacklist() -> Blacklist {
        let set = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Blacklist {
            domains: set(&["localhost.localdomain", "example.com"]),
            top_level_domains: set(&["local"]),
            names: set(&["unknown"]),
            emails: set(&["nobody@android.com"]),
            popular_emails: set(&["popular@google.com"]),
            popular_names: set(&["popular", "admin"]),
        }
    }

    #[test]
    fn multiple_email() {
        assert!(is_multiple_email("first@mail.com second@mail.com"));
        assert!(is_multiple_email("first@mail.com;second@mail.com"));
        assert!(!is_multiple_email("first@mail.com"));
    }

    #[test]
    fn blacklisted_email() {
        let b = test_blacklist();
        assert!(b.is_blacklisted_email("nobody@android.com"));
        assert!(!b.is_blacklisted_email("somebody@android.com"));
    }

    #[test]
    fn ignored_domain() {
        let b = test_blacklist();
        assert!(b.is_ignored_domain("1@localhost.localdomain"));
        assert!(b.is_ignored_domain("admin@example.com"));
        assert!(!b.is_ignored_domain("somebody@android.com"));
        assert!(b.is_ignored_domain("localhost.localdomain"));
        assert!(b.is_ignored_domain("example.com"));
        assert!(!b.is_ignored_domain("android.com"));
    }

    #[test]
    fn ignored_top_level_domain() {
        let b = test_blacklist();
        assert!(b.is_ignored_top_level_domain("pi@raspberry.local"));
        assert!(b.is_ignored_top_level_domain("raspberry.local"));
        assert!(!b.is_ignored_top_level_domain("google.com"));
    }

    #[test]
    fn ip_domain() {
        assert!(is_ip_domain("0.0.0.0"));
        assert!(is_ip_domain("192.168.0.1"));
        assert!(is_ip_domain("88.35.10.128"));
        assert!(is_ip_domain("2001:db8:85a3::8a2e:370:7334"));
        assert!(is_ip_domain("2001:db8:85a3:0:0:8a2e:370:7334"));
        assert!(is_ip_domain("0:0:0:0:0:0:0:1"));
        assert!(!is_ip_domain("notip.com"));
        assert!(!is_ip_domain("notip"));
    }

    #[test]
    fn single_label_domain() {
        assert!(is_single_label_domain("singlelabel"));
        assert!(is_single_label_domain(""));
        assert!(!is_single_label_domain("not.singlelabel"));
        assert!(!is_single_label_domain("."));
    }

    #[test]
    fn ignored_name() {
        let b = test_blacklist();
        assert!(b.is_ignored_name("unknown"));
        assert!(!b.is_ignored_name("known"));
    }

    #[test]
    fn ignored_email() {
        let b = test_blacklist();
        assert!(b.is_ignored_email("bad@email"));
        assert!(b.is_ignored_email("root@0.0.0.0"));
        assert!(b.is_ignored_email("admin@2001:db8:85a3::8a2e:370:7334"));
        assert!(b.is_ignored_email("no-domain-mail@"));
        assert!(b.is_ignored_email("admin1@google.com admin2@google.com"));
        assert!(b.is_ignored_email("bad-domain@example.com"));

        assert!(!b.is_ignored_email("good-email@google.com"));
        assert!(!b.is_ignored_email("dot.in.name@is.ok.com"));
        assert!(!b.is_ignored_email("dash-in-name@is.ok.com"));
        assert!(!b.is_ignored_email("also+ok-mail@inbox.org"));
    }

    #[test]
    fn embedded_lists_load() {
        let b = Blacklist::load().expect("embedded blacklist must load");
        assert!(!b.domains.is_empty());
        assert!(!b.top_level_domains.is_empty());
        assert!(!b.names.is_empty());
        assert!(!b.emails.is_empty());
        assert!(!b.popular_emails.is_empty());
        assert!(!b.popular_names.is_empty());
    }
}
