//! Graph-based identity clustering
//!
//! Fragments are vertices; edges are should-merge claims. Three rule phases
//! add edges and never remove any:
//!
//! 1. the external oracle pins fragments to service usernames,
//! 2. a shared unpopular email connects fragments directly,
//! 3. a shared unpopular name connects fragments whose external ids agree,
//!    capped by the per-component identity budget, followed by the
//!    "merge unnamed twin" sweep.
//!
//! Phase order and the ascending-id iteration inside each phase are part of
//! the contract: the outcome depends on them.

use std::collections::{BTreeMap, HashMap, HashSet};

use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::unionfind::UnionFind;
use petgraph::visit::Dfs;

use crate::blacklist::Blacklist;
use crate::error::{IdcanonError, Result};
use crate::external::{MatchError, Matcher};
use crate::people::{NameWithRepo, People};
use crate::report;

/// Merge the identities that belong to the same human, in place.
///
/// Runs the external matching first when an oracle is available, then the
/// email and name heuristics, and finally collapses every connected component
/// into its smallest-id fragment.
pub fn reduce_people(
    people: &mut People,
    matcher: Option<&dyn Matcher>,
    blacklist: &Blacklist,
    max_identities: usize,
) -> Result<()> {
    let mut graph = PeopleGraph::new(people);

    let matched_emails = match matcher {
        Some(matcher) => graph.add_external_edges(people, matcher)?,
        None => HashSet::new(),
    };
    tracing::info!(people = people.len(), "grouped people by the external service");

    graph.add_email_edges(people, blacklist, &matched_emails)?;
    tracing::info!(people = people.len(), "grouped people by email");

    graph.add_name_edges(people, blacklist, max_identities)?;
    tracing::info!(people = people.len(), "grouped people by name");

    let components = graph.components();
    report::commit("components", components.len() as i64);
    for ids in components {
        if ids.len() > 1 {
            people.merge(&ids)?;
        }
    }
    Ok(())
}

/// Undirected graph over fragment ids with a union-find alongside for cheap
/// connectivity answers and per-component identity counts.
struct PeopleGraph {
    graph: UnGraph<i64, ()>,
    nodes: HashMap<i64, NodeIndex>,
    union: UnionFind<usize>,
    /// Distinct emails per component, keyed by union root.
    emails: HashMap<usize, HashSet<String>>,
    /// Distinct names-with-repos per component, keyed by union root.
    names: HashMap<usize, HashSet<NameWithRepo>>,
}

impl PeopleGraph {
    fn new(people: &People) -> PeopleGraph {
        let mut graph = UnGraph::new_undirected();
        let mut nodes = HashMap::with_capacity(people.len());
        let mut emails = HashMap::with_capacity(people.len());
        let mut names = HashMap::with_capacity(people.len());
        for (&id, person) in people.iter() {
            let node = graph.add_node(id);
            nodes.insert(id, node);
            emails.insert(
                node.index(),
                person.emails.iter().cloned().collect::<HashSet<_>>(),
            );
            names.insert(
                node.index(),
                person
                    .names_with_repos
                    .iter()
                    .cloned()
                    .collect::<HashSet<_>>(),
            );
        }
        let union = UnionFind::new(graph.node_count());
        PeopleGraph {
            graph,
            nodes,
            union,
            emails,
            names,
        }
    }

    /// Phase A: pin fragments to external usernames and connect fragments
    /// resolved to the same username. Returns the emails the oracle resolved.
    fn add_external_edges(
        &mut self,
        people: &mut People,
        matcher: &dyn Matcher,
    ) -> Result<HashSet<String>> {
        let mut user_to_id: HashMap<String, i64> = HashMap::new();
        let mut matched_emails = HashSet::new();
        let mut unmatched = 0i64;
        let by_commit = matcher.supports_matching_by_commit();

        for id in people.ids() {
            let person = people.get(id).expect("id listed but person missing");
            let emails = person.emails.clone();
            let sample_commit = person.sample_commit.clone();
            for email in emails {
                let lookup = match &sample_commit {
                    Some(commit) if by_commit => {
                        matcher.match_by_commit(&email, &commit.repo, &commit.hash)
                    }
                    _ => matcher.match_by_email(&email),
                };
                let username = match lookup {
                    Ok(username) if !username.is_empty() => username,
                    Ok(_) | Err(MatchError::NoMatch) => {
                        unmatched += 1;
                        continue;
                    }
                    Err(MatchError::Api(message)) => {
                        tracing::warn!(email, %message, "external lookup failed");
                        unmatched += 1;
                        continue;
                    }
                    Err(fatal) => return Err(fatal.into()),
                };
                matched_emails.insert(email.clone());

                let person = people.get_mut(id).expect("id listed but person missing");
                if person.external_id.is_empty() {
                    person.external_id = username.clone();
                } else if person.external_id != username {
                    return Err(IdcanonError::ConflictingExternalId {
                        first_id: id,
                        first_username: person.external_id.clone(),
                        second_id: id,
                        second_username: username,
                    });
                }

                match user_to_id.get(&username).copied() {
                    Some(representative) if representative != id => {
                        if !self.same_component(representative, id) {
                            self.set_edge(people, representative, id)?;
                        }
                    }
                    Some(_) => {}
                    None => {
                        user_to_id.insert(username, id);
                    }
                }
            }
        }
        report::commit("unmatched_emails", unmatched);
        Ok(matched_emails)
    }

    /// Phase B: connect fragments that share an unpopular email the oracle
    /// did not already resolve.
    fn add_email_edges(
        &mut self,
        people: &mut People,
        blacklist: &Blacklist,
        matched_emails: &HashSet<String>,
    ) -> Result<()> {
        let mut email_to_id: HashMap<String, i64> = HashMap::new();
        for id in people.ids() {
            let emails = people
                .get(id)
                .expect("id listed but person missing")
                .emails
                .clone();
            for email in emails {
                if matched_emails.contains(&email) || blacklist.is_popular_email(&email) {
                    continue;
                }
                match email_to_id.get(&email).copied() {
                    Some(representative) if representative != id => {
                        if !self.same_component(representative, id) {
                            self.set_edge(people, representative, id)?;
                        }
                    }
                    Some(_) => {}
                    None => {
                        email_to_id.insert(email, id);
                    }
                }
            }
        }
        Ok(())
    }

    /// Phase C: connect fragments that share an unpopular name and carry the
    /// same external id, while both components stay under the identity
    /// budget. Afterwards, attach each still-unattributed fragment to the
    /// sole attributed fragment of the same name ("merge unnamed twin").
    fn add_name_edges(
        &mut self,
        people: &mut People,
        blacklist: &Blacklist,
        max_identities: usize,
    ) -> Result<()> {
        let mut name_to_id: BTreeMap<String, BTreeMap<String, i64>> = BTreeMap::new();
        for id in people.ids() {
            let names = people
                .get(id)
                .expect("id listed but person missing")
                .names_with_repos
                .clone();
            for name in names {
                if blacklist.is_popular_name(&name.name) {
                    continue;
                }
                // propagation during this loop may have updated the external id
                let external_id = people
                    .get(id)
                    .expect("id listed but person missing")
                    .external_id
                    .clone();
                let slot = name_to_id.entry(name.name.clone()).or_default();
                match slot.get(&external_id).copied() {
                    Some(representative) if representative != id => {
                        if !self.same_component(representative, id)
                            && self.identities(representative) < max_identities
                            && self.identities(id) < max_identities
                        {
                            self.set_edge(people, representative, id)?;
                        }
                    }
                    Some(_) => {}
                    None => {
                        slot.insert(external_id, id);
                    }
                }
            }
        }

        // Merge unnamed twin: a name seen with exactly one external id plus
        // one unattributed fragment links the two.
        for slots in name_to_id.values() {
            if slots.len() != 2 || !slots.contains_key("") {
                continue;
            }
            let ids: Vec<i64> = slots.values().copied().collect();
            let (first, second) = (ids[0], ids[1]);
            if self.same_component(first, second) {
                continue;
            }
            if self.identities(first) < max_identities && self.identities(second) < max_identities {
                self.set_edge(people, first, second)?;
            }
        }
        Ok(())
    }

    /// Insert the should-merge edge between two fragments.
    ///
    /// When exactly one endpoint carries an external id it is propagated over
    /// the whole component of the other endpoint before the edge lands; a
    /// different non-empty id found mid-walk means the component invariant is
    /// already broken and the run must die.
    fn set_edge(&mut self, people: &mut People, a: i64, b: i64) -> Result<()> {
        let external_a = external_id_of(people, a)?;
        let external_b = external_id_of(people, b)?;

        if !external_a.is_empty() && !external_b.is_empty() && external_a != external_b {
            return Err(IdcanonError::ConflictingExternalId {
                first_id: a,
                first_username: external_a,
                second_id: b,
                second_username: external_b,
            });
        }
        if external_a.is_empty() != external_b.is_empty() {
            let (value, bare_side) = if external_a.is_empty() {
                (external_b, a)
            } else {
                (external_a, b)
            };
            self.propagate_external_id(people, bare_side, &value)?;
        }

        let node_a = self.nodes[&a];
        let node_b = self.nodes[&b];
        self.graph.add_edge(node_a, node_b, ());

        let root_a = self.union.find_mut(node_a.index());
        let root_b = self.union.find_mut(node_b.index());
        if root_a != root_b {
            self.union.union(node_a.index(), node_b.index());
            let merged_root = self.union.find_mut(node_a.index());
            let absorbed_root = if merged_root == root_a { root_b } else { root_a };
            let absorbed_emails = self.emails.remove(&absorbed_root).unwrap_or_default();
            self.emails
                .entry(merged_root)
                .or_default()
                .extend(absorbed_emails);
            let absorbed_names = self.names.remove(&absorbed_root).unwrap_or_default();
            self.names
                .entry(merged_root)
                .or_default()
                .extend(absorbed_names);
        }
        Ok(())
    }

    /// Depth-first external-id propagation over the component of `start`.
    fn propagate_external_id(
        &mut self,
        people: &mut People,
        start: i64,
        value: &str,
    ) -> Result<()> {
        let mut dfs = Dfs::new(&self.graph, self.nodes[&start]);
        while let Some(node) = dfs.next(&self.graph) {
            let id = self.graph[node];
            let person = people.get_mut(id).ok_or_else(|| {
                IdcanonError::InvariantViolation(format!("graph refers to unknown person {}", id))
            })?;
            if person.external_id.is_empty() {
                person.external_id = value.to_string();
            } else if person.external_id != value {
                return Err(IdcanonError::InvariantViolation(format!(
                    "propagating external id {:?} found person {} already pinned to {:?}",
                    value, id, person.external_id
                )));
            }
        }
        Ok(())
    }

    fn same_component(&mut self, a: i64, b: i64) -> bool {
        let node_a = self.nodes[&a].index();
        let node_b = self.nodes[&b].index();
        self.union.find_mut(node_a) == self.union.find_mut(node_b)
    }

    /// Distinct emails plus distinct names-with-repos across the component of
    /// the given fragment: the quantity the identity budget caps.
    fn identities(&mut self, id: i64) -> usize {
        let root = self.union.find_mut(self.nodes[&id].index());
        let emails = self.emails.get(&root).map(HashSet::len).unwrap_or(0);
        let names = self.names.get(&root).map(HashSet::len).unwrap_or(0);
        emails + names
    }

    /// Connected components as ascending-id lists, ordered by smallest id.
    fn components(&mut self) -> Vec<Vec<i64>> {
        let mut components: BTreeMap<usize, Vec<i64>> = BTreeMap::new();
        for node in self.graph.node_indices() {
            let root = self.union.find_mut(node.index());
            components.entry(root).or_default().push(self.graph[node]);
        }
        let mut components: Vec<Vec<i64>> = components.into_values().collect();
        for ids in &mut components {
            ids.sort_unstable();
        }
        components.sort_unstable_by_key(|ids| ids[0]);
        components
    }
}

fn external_id_of(people: &People, id: i64) -> Result<String> {
    Ok(people
        .get(id)
        .ok_or_else(|| {
            IdcanonError::InvariantViolation(format!("edge refers to unknown person {}", id))
        })?
        .external_id
        .clone())
}
