//! Projection of the relationship index into the structure the search
//! widget consumes: provider terms removed, nationwide region back-filled,
//! vocabularies collator-sorted and frozen as ordered `{id, label}` arrays.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::collate::Collator;
use crate::config::SiteConfig;
use crate::index::RelationshipIndex;
use crate::types::{NodeId, SubsidyField, TermId};

/// Label transform applied to category facet labels before they are
/// frozen. Pattern-based syllable analysis lives outside this crate; the
/// impls here pass text through or look it up in a prepared table.
pub trait Hyphenator {
    fn hyphenate(&self, text: &str) -> String;
}

/// Leaves every label untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHyphenation;

impl Hyphenator for NoHyphenation {
    fn hyphenate(&self, text: &str) -> String {
        text.to_string()
    }
}

/// Table-driven hyphenation: labels with a prepared soft-hyphen variant
/// are replaced, everything else passes through.
#[derive(Debug, Clone, Default)]
pub struct SoftHyphenMap {
    entries: BTreeMap<String, String>,
}

impl SoftHyphenMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, label: impl Into<String>, hyphenated: impl Into<String>) {
        self.entries.insert(label.into(), hyphenated.into());
    }
}

impl Hyphenator for SoftHyphenMap {
    fn hyphenate(&self, text: &str) -> String {
        self.entries.get(text).cloned().unwrap_or_else(|| text.to_string())
    }
}

/// One facet option as the UI receives it. Ids travel as strings so the
/// client never has to care about numeric key coercion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacetEntry {
    pub id: String,
    pub label: String,
}

impl FacetEntry {
    fn new(tid: TermId, label: &str) -> Self {
        Self { id: tid.to_string(), label: label.to_string() }
    }
}

/// The four filterable vocabularies, each an ordered option list. The
/// provider vocabulary has no slot here on purpose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FacetVocabularies {
    pub subsidy_type: Vec<FacetEntry>,
    pub subsidy_region: Vec<FacetEntry>,
    pub subsidy_purpose: Vec<FacetEntry>,
    pub content_categories: Vec<FacetEntry>,
}

impl FacetVocabularies {
    fn slot_mut(&mut self, field: SubsidyField) -> Option<&mut Vec<FacetEntry>> {
        match field {
            SubsidyField::SubsidyType => Some(&mut self.subsidy_type),
            SubsidyField::SubsidyRegion => Some(&mut self.subsidy_region),
            SubsidyField::SubsidyPurpose => Some(&mut self.subsidy_purpose),
            SubsidyField::ContentCategories => Some(&mut self.content_categories),
            SubsidyField::SubsidyProvider => None,
        }
    }
}

/// UI-facing derivative of the relationship index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FacetsMap {
    pub vocab: FacetVocabularies,
    pub nodes_to_terms: BTreeMap<NodeId, Vec<String>>,
}

impl FacetsMap {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes_to_terms.is_empty()
            && self.vocab.subsidy_type.is_empty()
            && self.vocab.subsidy_region.is_empty()
            && self.vocab.subsidy_purpose.is_empty()
            && self.vocab.content_categories.is_empty()
    }
}

/// Projects the index into a [`FacetsMap`]:
///
/// 1. provider terms leave every node's term set, nodes emptied by that
///    subtraction leave the map;
/// 2. the term→node direction is not carried over;
/// 3. nodes tagged with the nationwide region term receive every region
///    term id, appended in region-vocabulary order;
/// 4. each vocabulary is sorted by label through the collator;
/// 5. the nationwide entry is pinned to the front of the region list;
/// 6. category labels run through the hyphenator, then every vocabulary
///    freezes as an ordered `{id, label}` array.
///
/// An empty index projects to an empty map. The input is never mutated.
#[must_use]
pub fn project_facets(
    index: &RelationshipIndex,
    collator: &dyn Collator,
    hyphenator: &dyn Hyphenator,
    config: &SiteConfig,
) -> FacetsMap {
    if index.is_empty() {
        return FacetsMap::default();
    }

    let provider_terms: Vec<TermId> = index
        .vocab_labels(SubsidyField::SubsidyProvider)
        .map(|labels| labels.keys().copied().collect())
        .unwrap_or_default();
    let region_ids: Vec<TermId> = index
        .vocab_labels(SubsidyField::SubsidyRegion)
        .map(|labels| labels.keys().copied().collect())
        .unwrap_or_default();

    let mut nodes_to_terms: BTreeMap<NodeId, Vec<String>> = BTreeMap::new();
    for (nid, tids) in &index.nodes_to_terms {
        let kept: Vec<TermId> =
            tids.iter().copied().filter(|tid| !provider_terms.contains(tid)).collect();
        if kept.is_empty() {
            continue;
        }

        let mut terms: Vec<String> = kept.iter().map(TermId::to_string).collect();
        if kept.contains(&config.nationwide_term) {
            for region in &region_ids {
                let id = region.to_string();
                if !terms.contains(&id) {
                    terms.push(id);
                }
            }
        }
        nodes_to_terms.insert(*nid, terms);
    }

    let mut vocab = FacetVocabularies::default();
    for field in SubsidyField::ALL {
        let Some(slot) = vocab.slot_mut(field) else {
            continue;
        };
        let Some(labels) = index.vocab_labels(field) else {
            continue;
        };

        let mut entries: Vec<FacetEntry> =
            labels.iter().map(|(tid, label)| FacetEntry::new(*tid, label)).collect();
        entries.sort_by(|a, b| collator.compare(&a.label, &b.label));

        if field == SubsidyField::SubsidyRegion {
            let nationwide = config.nationwide_term.to_string();
            if let Some(at) = entries.iter().position(|entry| entry.id == nationwide) {
                let pinned = entries.remove(at);
                entries.insert(0, pinned);
            }
        }
        if field == SubsidyField::ContentCategories {
            for entry in &mut entries {
                entry.label = hyphenator.hyphenate(&entry.label);
            }
        }
        *slot = entries;
    }

    FacetsMap { vocab, nodes_to_terms }
}
