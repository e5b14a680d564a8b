//! Identity fragments, their container, and the merge/primary operations
//!
//! One [`Person`] starts as a single commit signature and grows as the
//! clustering engine proves that several fragments belong to the same human.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::blacklist::Blacklist;
use crate::error::{IdcanonError, Result};
use crate::normalize::normalize;
use crate::report;
use crate::source::Signature;

/// A normalized name, optionally scoped to the repository it came from.
///
/// The repo qualifier is non-empty if and only if the name is in the
/// popular-names set; it keeps generic names like "admin" from bridging
/// unrelated repositories.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NameWithRepo {
    pub name: String,
    pub repo: String,
}

impl NameWithRepo {
    pub fn new(name: impl Into<String>) -> Self {
        NameWithRepo {
            name: name.into(),
            repo: String::new(),
        }
    }

    pub fn with_repo(name: impl Into<String>, repo: impl Into<String>) -> Self {
        NameWithRepo {
            name: name.into(),
            repo: repo.into(),
        }
    }
}

impl fmt::Display for NameWithRepo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.repo.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "({}, {})", self.name, self.repo)
        }
    }
}

/// One commit hash together with the repository it was seen in. Kept per
/// fragment so oracle drivers that understand commits can resolve the author
/// without an email search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub hash: String,
    pub repo: String,
}

/// A single individual; may carry multiple names and emails.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub id: i64,
    pub names_with_repos: Vec<NameWithRepo>,
    pub emails: Vec<String>,
    /// Username assigned by the external identity service; empty = unset.
    /// Once non-empty it never changes to a different non-empty value.
    pub external_id: String,
    pub primary_name: Option<String>,
    pub primary_email: Option<String>,
    pub sample_commit: Option<Commit>,
}

impl fmt::Display for Person {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.names_with_repos.iter().map(|n| n.to_string()).collect();
        write!(f, "{}|{}", names.join("|"), self.emails.join("|"))
    }
}

/// Occurrence counters for one normalized name or email.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Frequency {
    /// Occurrences with a commit timestamp inside the recency window.
    pub recent: u64,
    /// All occurrences.
    pub total: u64,
}

/// Global frequency tables produced by the builder and consumed read-only by
/// the primary picker.
#[derive(Debug, Default)]
pub struct FrequencyTables {
    pub names: HashMap<String, Frequency>,
    pub emails: HashMap<String, Frequency>,
}

/// All known persons indexed by id. Iteration is always ascending by id.
#[derive(Debug, Default, PartialEq)]
pub struct People {
    persons: BTreeMap<i64, Person>,
}

impl People {
    pub fn new() -> People {
        People::default()
    }

    /// Build fragments from raw signatures, one per surviving signature, and
    /// accumulate the two frequency tables along the way. Identical triples
    /// yield distinct fragments; the clustering stage merges them.
    ///
    /// `now` anchors the recency window of `window_months` months.
    pub fn build(
        signatures: &[Signature],
        blacklist: &Blacklist,
        now: DateTime<Utc>,
        window_months: u32,
    ) -> Result<(People, FrequencyTables)> {
        // Close enough for a trailing window; the cutoff only gates counters.
        let cutoff = now - Duration::days(30 * i64::from(window_months));
        let mut people = People::new();
        let mut freqs = FrequencyTables::default();
        let mut id: i64 = 0;

        for sig in signatures {
            let name = normalize(&sig.name);
            let email = normalize(&sig.email);
            if name.is_empty() || email.is_empty() {
                report::increment("signatures_skipped");
                continue;
            }
            if blacklist.is_ignored_name(&name) || blacklist.is_ignored_email(&email) {
                report::increment("signatures_skipped");
                continue;
            }

            let name_with_repo = if blacklist.is_popular_name(&name) {
                NameWithRepo::with_repo(name.clone(), sig.repo.clone())
            } else {
                NameWithRepo::new(name.clone())
            };

            let recent = sig.time.map(|t| t >= cutoff).unwrap_or(false);
            bump(&mut freqs.names, name, recent);
            bump(&mut freqs.emails, email.clone(), recent);

            id += 1;
            people.persons.insert(
                id,
                Person {
                    id,
                    names_with_repos: vec![name_with_repo],
                    emails: vec![email],
                    sample_commit: sig.commit.as_ref().map(|hash| Commit {
                        hash: hash.clone(),
                        repo: sig.repo.clone(),
                    }),
                    ..Person::default()
                },
            );
        }

        Ok((people, freqs))
    }

    pub fn len(&self) -> usize {
        self.persons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.persons.is_empty()
    }

    pub fn get(&self, id: i64) -> Option<&Person> {
        self.persons.get(&id)
    }

    pub fn get_mut(&mut self, id: i64) -> Option<&mut Person> {
        self.persons.get_mut(&id)
    }

    pub fn insert(&mut self, person: Person) {
        self.persons.insert(person.id, person);
    }

    /// Ascending-id iterator over all persons.
    pub fn iter(&self) -> impl Iterator<Item = (&i64, &Person)> {
        self.persons.iter()
    }

    /// All ids in ascending order.
    pub fn ids(&self) -> Vec<i64> {
        self.persons.keys().copied().collect()
    }

    /// Merge several persons into the one with the smallest id; returns the
    /// surviving id. Name and email lists are concatenated, deduplicated and
    /// sorted. Two differing non-empty external ids abort the merge; a single
    /// non-empty external id wins.
    pub fn merge(&mut self, ids: &[i64]) -> Result<i64> {
        let mut ids = ids.to_vec();
        ids.sort_unstable();
        let keep = ids[0];

        for &id in &ids[1..] {
            let absorbed = self.persons.remove(&id).ok_or_else(|| {
                IdcanonError::InvariantViolation(format!("merge of unknown person {}", id))
            })?;
            let survivor = self.persons.get_mut(&keep).ok_or_else(|| {
                IdcanonError::InvariantViolation(format!("merge into unknown person {}", keep))
            })?;

            if !absorbed.external_id.is_empty() {
                if survivor.external_id.is_empty() {
                    survivor.external_id = absorbed.external_id.clone();
                } else if survivor.external_id != absorbed.external_id {
                    return Err(IdcanonError::ConflictingExternalId {
                        first_id: survivor.id,
                        first_username: survivor.external_id.clone(),
                        second_id: absorbed.id,
                        second_username: absorbed.external_id.clone(),
                    });
                }
            }
            survivor.emails.extend(absorbed.emails);
            survivor.names_with_repos.extend(absorbed.names_with_repos);
        }

        let survivor = self
            .persons
            .get_mut(&keep)
            .expect("survivor still present after merge");
        survivor.emails.sort_unstable();
        survivor.emails.dedup();
        survivor.names_with_repos.sort_unstable();
        survivor.names_with_repos.dedup();
        Ok(keep)
    }

    /// Select the primary name and primary email of every person from the
    /// global frequency tables.
    pub fn set_primary_values(
        &mut self,
        freqs: &FrequencyTables,
        min_recent_count: u64,
    ) -> Result<()> {
        set_primary_value(
            self,
            &freqs.names,
            |p| p.names_with_repos.iter().map(|n| n.name.clone()).collect(),
            |p, v| p.primary_name = Some(v),
            min_recent_count,
        )?;
        set_primary_value(
            self,
            &freqs.emails,
            |p| p.emails.clone(),
            |p, v| p.primary_email = Some(v),
            min_recent_count,
        )
    }
}

impl<const N: usize> From<[Person; N]> for People {
    fn from(persons: [Person; N]) -> Self {
        let mut people = People::new();
        for person in persons {
            people.insert(person);
        }
        people
    }
}

fn bump(table: &mut HashMap<String, Frequency>, key: String, recent: bool) {
    let freq = table.entry(key).or_default();
    freq.total += 1;
    if recent {
        freq.recent += 1;
    }
}

/// Pick one primary value per person: the recent-count argmax when the
/// person's values were seen at least `min_recent_count` times recently, the
/// all-time argmax otherwise. Ties break to the first value in list order.
fn set_primary_value<G, S>(
    people: &mut People,
    freqs: &HashMap<String, Frequency>,
    get: G,
    set: S,
    min_recent_count: u64,
) -> Result<()>
where
    G: Fn(&Person) -> Vec<String>,
    S: Fn(&mut Person, String),
{
    let ids = people.ids();
    for id in ids {
        let person = people.get(id).expect("id listed but person missing");
        let values = get(person);
        if values.is_empty() {
            continue;
        }

        let mut sum_recent = 0u64;
        let mut recent_winner: Option<(&str, u64)> = None;
        let mut total_winner: Option<(&str, u64)> = None;
        for value in &values {
            let freq = freqs.get(value).ok_or_else(|| {
                IdcanonError::InvariantViolation(format!(
                    "value {:?} of person {} missing from the frequency table",
                    value, id
                ))
            })?;
            sum_recent += freq.recent;
            if recent_winner.map(|(_, best)| freq.recent > best).unwrap_or(true) {
                recent_winner = Some((value.as_str(), freq.recent));
            }
            if total_winner.map(|(_, best)| freq.total > best).unwrap_or(true) {
                total_winner = Some((value.as_str(), freq.total));
            }
        }

        let winner = if sum_recent >= min_recent_count {
            recent_winner
        } else {
            total_winner
        };
        let winner = winner.map(|(v, _)| v.to_string());
        if let Some(value) = winner {
            let person = people.get_mut(id).expect("id listed but person missing");
            set(person, value);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blacklist::Blacklist;
    use crate::source::Signature;

    fn sig(repo: &str, name: &str, email: &str) -> Signature {
        Signature {
            repo: repo.to_string(),
            name: name.to_string(),
            email: email.to_string(),
            time: None,
            commit: None,
        }
    }

    fn test_blacklist() -> Blacklist {
        let set = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Blacklist {
            domains: set(&["domen"]),
            names: set(&["unknown"]),
            popular_names: set(&["admin", "popular"]),
            popular_emails: set(&["popular@google.com"]),
            ..Blacklist::default()
        }
    }

    fn raw_signatures() -> Vec<Signature> {
        vec![
            sig("repo1", "Bob", "Bob@google.com"),
            sig("repo2", "Bob", "Bob@google.com"),
            sig("repo1", "Alice", "alice@google.com"),
            sig("repo1", "Bob", "Bob@google.com"),
            sig("repo1", "Bob", "bad-email@domen"),
            sig("repo1", "unknown", "someone@google.com"),
        ]
    }

    fn build(signatures: &[Signature]) -> People {
        let (people, _) =
            People::build(signatures, &test_blacklist(), Utc::now(), 12).expect("build");
        people
    }

    fn person(id: i64, names: &[&str], emails: &[&str]) -> Person {
        Person {
            id,
            names_with_repos: names.iter().map(|n| NameWithRepo::new(*n)).collect(),
            emails: emails.iter().map(|e| e.to_string()).collect(),
            ..Person::default()
        }
    }

    #[test]
    fn build_filters_and_numbers_densely() {
        let people = build(&raw_signatures());
        let expected = People::from([
            person(1, &["bob"], &["bob@google.com"]),
            person(2, &["bob"], &["bob@google.com"]),
            person(3, &["alice"], &["alice@google.com"]),
            person(4, &["bob"], &["bob@google.com"]),
        ]);
        assert_eq!(expected, people);
    }

    #[test]
    fn build_qualifies_popular_names() {
        let people = build(&[
            sig("repo1", "admin", "a@x.com"),
            sig("repo2", "admin", "b@y.com"),
        ]);
        let expected = People::from([
            Person {
                id: 1,
                names_with_repos: vec![NameWithRepo::with_repo("admin", "repo1")],
                emails: vec!["a@x.com".to_string()],
                ..Person::default()
            },
            Person {
                id: 2,
                names_with_repos: vec![NameWithRepo::with_repo("admin", "repo2")],
                emails: vec!["b@y.com".to_string()],
                ..Person::default()
            },
        ]);
        assert_eq!(expected, people);
    }

    #[test]
    fn build_counts_frequencies() {
        let (_, freqs) =
            People::build(&raw_signatures(), &test_blacklist(), Utc::now(), 12).expect("build");
        assert_eq!(freqs.names.get("bob").copied().unwrap().total, 3);
        assert_eq!(freqs.names.get("alice").copied().unwrap().total, 1);
        assert_eq!(freqs.emails.get("bob@google.com").copied().unwrap().total, 3);
        // ignored signatures never reach the tables
        assert!(freqs.emails.get("bad-email@domen").is_none());
        assert!(freqs.names.get("unknown").is_none());
    }

    #[test]
    fn build_recency_window() {
        let now = Utc::now();
        let mut old = sig("r", "Bob", "bob@google.com");
        old.time = Some(now - Duration::days(400));
        let mut fresh = sig("r", "Bob", "bob@google.com");
        fresh.time = Some(now - Duration::days(10));
        let (_, freqs) =
            People::build(&[old, fresh], &test_blacklist(), now, 12).expect("build");
        let freq = freqs.emails.get("bob@google.com").copied().unwrap();
        assert_eq!(freq.total, 2);
        assert_eq!(freq.recent, 1);
    }

    #[test]
    fn two_people_merge() {
        let mut people = build(&raw_signatures());
        assert_eq!(people.merge(&[1, 2]).expect("merge"), 1);
        let expected = People::from([
            person(1, &["bob"], &["bob@google.com"]),
            person(3, &["alice"], &["alice@google.com"]),
            person(4, &["bob"], &["bob@google.com"]),
        ]);
        assert_eq!(expected, people);

        assert_eq!(people.merge(&[3, 4]).expect("merge"), 3);
        assert_eq!(people.merge(&[1, 3]).expect("merge"), 1);
        let expected = People::from([person(
            1,
            &["alice", "bob"],
            &["alice@google.com", "bob@google.com"],
        )]);
        assert_eq!(expected, people);
    }

    #[test]
    fn four_people_merge() {
        let mut people = build(&raw_signatures());
        assert_eq!(people.merge(&[1, 2, 3, 4]).expect("merge"), 1);
        let expected = People::from([person(
            1,
            &["alice", "bob"],
            &["alice@google.com", "bob@google.com"],
        )]);
        assert_eq!(expected, people);
    }

    #[test]
    fn merge_conflicting_external_ids() {
        let mut people = build(&raw_signatures());
        people.get_mut(1).unwrap().external_id = "id1".to_string();
        people.get_mut(2).unwrap().external_id = "id2".to_string();
        assert!(matches!(
            people.merge(&[1, 2]),
            Err(IdcanonError::ConflictingExternalId { .. })
        ));
    }

    #[test]
    fn merge_keeps_single_external_id() {
        let mut people = build(&raw_signatures());
        people.get_mut(2).unwrap().external_id = "id2".to_string();
        people.merge(&[1, 2]).expect("merge");
        assert_eq!(people.get(1).unwrap().external_id, "id2");
    }

    #[test]
    fn iteration_order_is_ascending() {
        let people = build(&raw_signatures());
        let keys: Vec<i64> = people.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec![1, 2, 3, 4]);
    }

    fn frequency_fixture() -> FrequencyTables {
        let mut freqs = FrequencyTables::default();
        for (name, recent, total) in [
            ("bob", 5, 10),
            ("bob 1", 1, 3),
            ("bob 2", 1, 1),
            ("popular", 4, 20),
            ("alice", 3, 4),
            ("alice 1", 1, 5),
        ] {
            freqs.names.insert(name.to_string(), Frequency { recent, total });
        }
        for (email, recent, total) in [
            ("bob@google.com", 5, 8),
            ("bobby@google.com", 2, 4),
            ("12345@gmail.com", 1, 1),
            ("email@google.com", 2, 4),
            ("alice@google.com", 1, 5),
            ("al@google.com", 3, 3),
        ] {
            freqs
                .emails
                .insert(email.to_string(), Frequency { recent, total });
        }
        freqs
    }

    fn primary_fixture() -> People {
        People::from([
            person(
                1,
                &["bob", "bob 1", "bob 2", "popular"],
                &["bob@google.com", "bobby@google.com", "12345@gmail.com"],
            ),
            person(3, &["alice", "alice 1"], &["alice@google.com", "al@google.com"]),
            person(6, &["popular"], &["email@google.com"]),
        ])
    }

    #[test]
    fn primary_prefers_recent_over_threshold() {
        let mut people = primary_fixture();
        people
            .set_primary_values(&frequency_fixture(), 2)
            .expect("primaries");
        assert_eq!(
            people.get(1).unwrap().primary_email.as_deref(),
            Some("bob@google.com")
        );
        // sum_recent = 4 >= 2, recent argmax is al@google.com
        assert_eq!(
            people.get(3).unwrap().primary_email.as_deref(),
            Some("al@google.com")
        );
        assert_eq!(
            people.get(6).unwrap().primary_email.as_deref(),
            Some("email@google.com")
        );
    }

    #[test]
    fn primary_falls_back_to_total() {
        let mut people = primary_fixture();
        people
            .set_primary_values(&frequency_fixture(), 5)
            .expect("primaries");
        let p1 = people.get(1).unwrap();
        assert_eq!(p1.primary_name.as_deref(), Some("bob"));
        assert_eq!(p1.primary_email.as_deref(), Some("bob@google.com"));
        let p3 = people.get(3).unwrap();
        // sum_recent = 4 < 5 for both lists: all-time winners
        assert_eq!(p3.primary_name.as_deref(), Some("alice 1"));
        assert_eq!(p3.primary_email.as_deref(), Some("alice@google.com"));
        let p6 = people.get(6).unwrap();
        assert_eq!(p6.primary_name.as_deref(), Some("popular"));
        assert_eq!(p6.primary_email.as_deref(), Some("email@google.com"));
    }

    #[test]
    fn primary_missing_frequency_is_fatal() {
        let mut people = People::from([person(1, &["ghost"], &["ghost@x.com"])]);
        assert!(matches!(
            people.set_primary_values(&FrequencyTables::default(), 5),
            Err(IdcanonError::InvariantViolation(_))
        ));
    }
}
