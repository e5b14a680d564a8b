//! idcanon: canonical contributor identities from noisy commit signatures
//!
//! The same human shows up in commit metadata under many (repo, name, email)
//! triples: typos, aliases, work and personal addresses, and generic names
//! like "admin". This crate clusters those triples into persons and picks a
//! primary display name and email for each one.
//!
//! The pipeline is a deterministic batch job:
//!
//! 1. read raw signatures from a CSV cache or the commits database,
//! 2. normalize and filter them against the embedded blacklists into
//!    identity fragments plus name/email frequency tables,
//! 3. cluster the fragments over a graph, optionally consulting an external
//!    identity service (GitHub, GitLab or Bitbucket) behind a persistent
//!    on-disk cache,
//! 4. merge every connected component into one person and select its
//!    primaries,
//! 5. write the aliases/identities parquet pair.
//!
//! # Example
//!
//! ```ignore
//! use idcanon::{cluster, Blacklist, People};
//! use chrono::Utc;
//!
//! let blacklist = Blacklist::load()?;
//! let (mut people, freqs) = People::build(&signatures, &blacklist, Utc::now(), 12)?;
//! cluster::reduce_people(&mut people, None, &blacklist, 20)?;
//! people.set_primary_values(&freqs, 5)?;
//! ```

pub mod blacklist;
pub mod cli;
pub mod cluster;
pub mod error;
pub mod external;
pub mod normalize;
pub mod output;
pub mod people;
pub mod report;
pub mod source;

// Re-export commonly used types
pub use blacklist::Blacklist;
pub use cli::{Cli, Provider};
pub use error::{IdcanonError, Result};
pub use external::{CachedMatcher, CancelToken, MatchError, Matcher};
pub use people::{Frequency, FrequencyTables, NameWithRepo, People, Person};
pub use source::{DatabaseOptions, Signature};
