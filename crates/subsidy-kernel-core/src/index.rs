//! The relationship index: a symmetric node↔term map over the subsidy
//! vocabulary fields of published subsidy nodes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{NodeId, SubsidyField, TermId};

/// One scan row: a term referenced by one subsidy field of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermAssignment {
    pub field: SubsidyField,
    pub nid: NodeId,
    pub tid: TermId,
    pub label: String,
}

/// Term labels per vocabulary field, plus both directions of the
/// node↔term relation. `nodes_to_terms` and `terms_to_nodes` always
/// mirror each other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RelationshipIndex {
    pub vocab: BTreeMap<SubsidyField, BTreeMap<TermId, String>>,
    pub nodes_to_terms: BTreeMap<NodeId, Vec<TermId>>,
    pub terms_to_nodes: BTreeMap<TermId, Vec<NodeId>>,
}

impl RelationshipIndex {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes_to_terms.is_empty()
    }

    /// Labels of one vocabulary field, keyed by term id.
    #[must_use]
    pub fn vocab_labels(&self, field: SubsidyField) -> Option<&BTreeMap<TermId, String>> {
        self.vocab.get(&field)
    }

    /// Term ids set on a node; empty when the node is not indexed.
    #[must_use]
    pub fn node_terms(&self, nid: NodeId) -> &[TermId] {
        self.nodes_to_terms.get(&nid).map_or(&[], Vec::as_slice)
    }

    /// The label of a term, searched across all vocabulary fields.
    #[must_use]
    pub fn label(&self, tid: TermId) -> Option<&str> {
        self.vocab
            .values()
            .find_map(|labels| labels.get(&tid))
            .map(String::as_str)
    }

    /// Nodes carrying at least one of the given terms, first-occurrence
    /// order, deduplicated (the inclusive profile search).
    #[must_use]
    pub fn nodes_with_any_term(&self, terms: &[TermId]) -> Vec<NodeId> {
        let mut out: Vec<NodeId> = Vec::new();
        for tid in terms {
            if let Some(nids) = self.terms_to_nodes.get(tid) {
                for nid in nids {
                    if !out.contains(nid) {
                        out.push(*nid);
                    }
                }
            }
        }
        out
    }

    /// Nodes whose term set contains every given term (the exclusive
    /// profile search).
    #[must_use]
    pub fn nodes_with_all_terms(&self, terms: &[TermId]) -> Vec<NodeId> {
        self.nodes_to_terms
            .iter()
            .filter(|(_, tids)| terms.iter().all(|tid| tids.contains(tid)))
            .map(|(nid, _)| *nid)
            .collect()
    }

    /// The node's terms restricted to one vocabulary field.
    #[must_use]
    pub fn node_terms_in(&self, nid: NodeId, field: SubsidyField) -> Vec<TermId> {
        let Some(labels) = self.vocab.get(&field) else {
            return Vec::new();
        };
        self.node_terms(nid)
            .iter()
            .filter(|tid| labels.contains_key(tid))
            .copied()
            .collect()
    }
}

/// Builds the index from scan rows. Rows are canonicalized to
/// (field, tid, nid) order first, so the result does not depend on the
/// order the store delivered them in. Noise terms are dropped even when
/// a scan failed to exclude them.
#[must_use]
pub fn build_index(assignments: &[TermAssignment], noise_terms: &[TermId]) -> RelationshipIndex {
    let mut rows: Vec<&TermAssignment> = assignments
        .iter()
        .filter(|row| !noise_terms.contains(&row.tid))
        .collect();
    rows.sort_by(|a, b| {
        a.field
            .cmp(&b.field)
            .then_with(|| a.tid.cmp(&b.tid))
            .then_with(|| a.nid.cmp(&b.nid))
    });
    rows.dedup_by(|a, b| a.field == b.field && a.tid == b.tid && a.nid == b.nid);

    let mut index = RelationshipIndex::default();
    for row in rows {
        index
            .vocab
            .entry(row.field)
            .or_default()
            .entry(row.tid)
            .or_insert_with(|| row.label.clone());
        index.nodes_to_terms.entry(row.nid).or_default().push(row.tid);
        index.terms_to_nodes.entry(row.tid).or_default().push(row.nid);
    }
    index
}
