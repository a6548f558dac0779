//! Related-content selection: subsidy candidates filtered by term
//! coverage, article and guide candidates weighted by term count, and
//! checklist matching over purpose terms.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::SiteConfig;
use crate::index::RelationshipIndex;
use crate::types::{Checklist, NodeId, NodeTermSelection, RelatedItem, SubsidyProfile, TermId};

/// The current node's place in the term graph, as related-content
/// selection sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedSelection {
    pub current: NodeId,
    pub is_subsidy: bool,
    pub terms: NodeTermSelection,
}

impl RelatedSelection {
    /// The terms subsidy candidates are matched against: the first
    /// category keeps the candidate set broad; a subsidy current adds
    /// its purpose terms to narrow it down.
    #[must_use]
    pub fn subsidy_match_terms(&self) -> Vec<TermId> {
        let mut terms: Vec<TermId> = self.terms.categories.first().copied().into_iter().collect();
        if self.is_subsidy {
            terms.extend(self.terms.purposes.iter().copied());
        }
        terms
    }
}

/// Everything related to one node, bucketed by bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RelatedContent {
    pub subsidies: Vec<SubsidyProfile>,
    pub articles: Vec<RelatedItem>,
    pub guides: Vec<RelatedItem>,
}

/// Filters ranked profile candidates for one node: the node itself and
/// unavailable programmes drop out; for a subsidy current only
/// candidates covering all its region terms, or tagged nationwide,
/// survive. Ranking order is preserved.
#[must_use]
pub fn select_related_subsidies(
    selection: &RelatedSelection,
    profiles: &[SubsidyProfile],
    index: &RelationshipIndex,
    config: &SiteConfig,
) -> Vec<SubsidyProfile> {
    profiles
        .iter()
        .filter(|profile| profile.id != selection.current && !profile.unavailable)
        .filter(|profile| {
            if !selection.is_subsidy {
                return true;
            }
            let candidate_terms = index.node_terms(profile.id);
            candidate_terms.contains(&config.nationwide_term)
                || selection.terms.regions.iter().all(|region| candidate_terms.contains(region))
        })
        .cloned()
        .collect()
}

/// Weighs article and guide candidates by their term count and sorts
/// heaviest first. The sort is stable, so the alphabetical order the
/// candidates arrive in breaks ties.
#[must_use]
pub fn weigh_content_candidates(
    mut candidates: Vec<RelatedItem>,
    term_counts: &BTreeMap<NodeId, i64>,
) -> Vec<RelatedItem> {
    for candidate in &mut candidates {
        candidate.weight = term_counts.get(&candidate.nid).copied().unwrap_or(0);
    }
    candidates.sort_by_key(|candidate| std::cmp::Reverse(candidate.weight));
    candidates
}

/// Checklists sharing at least one purpose term with the node, first
/// occurrence per file kept.
#[must_use]
pub fn select_checklists(purposes: &[TermId], checklists: &[Checklist]) -> Vec<Checklist> {
    let mut seen = Vec::new();
    let mut selected = Vec::new();
    for checklist in checklists {
        if seen.contains(&checklist.fid) {
            continue;
        }
        if checklist.purposes.iter().any(|purpose| purposes.contains(purpose)) {
            seen.push(checklist.fid);
            selected.push(checklist.clone());
        }
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{build_index, TermAssignment};
    use crate::types::{ContentKind, FileId, SubsidyField};

    fn row(field: SubsidyField, nid: u32, tid: u32, label: &str) -> TermAssignment {
        TermAssignment {
            field,
            nid: NodeId(nid),
            tid: TermId(tid),
            label: label.to_string(),
        }
    }

    fn fixture_index() -> RelationshipIndex {
        build_index(
            &[
                // 100: nationwide Kredit for Altersgerecht Umbauen
                row(SubsidyField::SubsidyType, 100, 367, "Kredit"),
                row(SubsidyField::SubsidyRegion, 100, 371, "Bundesweit"),
                row(SubsidyField::ContentCategories, 100, 801, "Altersgerecht Umbauen"),
                // 101: Berlin Zuschuss, same category
                row(SubsidyField::SubsidyType, 101, 368, "Zuschuss"),
                row(SubsidyField::SubsidyRegion, 101, 372, "Berlin"),
                row(SubsidyField::ContentCategories, 101, 801, "Altersgerecht Umbauen"),
                // 102: Bayern only
                row(SubsidyField::SubsidyRegion, 102, 374, "Bayern"),
                row(SubsidyField::ContentCategories, 102, 801, "Altersgerecht Umbauen"),
            ],
            &[],
        )
    }

    fn selection(current: u32, is_subsidy: bool, regions: &[u32]) -> RelatedSelection {
        RelatedSelection {
            current: NodeId(current),
            is_subsidy,
            terms: NodeTermSelection {
                categories: vec![TermId(801), TermId(802)],
                purposes: vec![TermId(1279)],
                regions: regions.iter().map(|tid| TermId(*tid)).collect(),
            },
        }
    }

    fn profile(id: u32, unavailable: bool) -> SubsidyProfile {
        SubsidyProfile {
            id: NodeId(id),
            url: format!("/foerdermittel/{id}"),
            title: format!("Programm {id}"),
            subsidy_type: None,
            subsidy_provider: None,
            subsidy_region: None,
            date: None,
            subsidy_name: None,
            amount: None,
            coverage: None,
            scope: None,
            unavailable,
        }
    }

    fn item(nid: u32, title: &str) -> RelatedItem {
        RelatedItem {
            nid: NodeId(nid),
            title: title.to_string(),
            kind: ContentKind::Article,
            url: format!("/ratgeber/{nid}"),
            weight: 0,
        }
    }

    fn checklist(fid: u32, title: &str, purposes: &[u32]) -> Checklist {
        Checklist {
            fid: FileId(fid),
            title: title.to_string(),
            url: format!("/files/{fid}.pdf"),
            purposes: purposes.iter().map(|tid| TermId(*tid)).collect(),
        }
    }

    #[test]
    fn match_terms_use_the_first_category_only() {
        let selection = selection(500, false, &[]);
        assert_eq!(selection.subsidy_match_terms(), vec![TermId(801)]);
    }

    #[test]
    fn subsidy_currents_add_their_purposes() {
        let selection = selection(500, true, &[]);
        assert_eq!(selection.subsidy_match_terms(), vec![TermId(801), TermId(1279)]);
    }

    #[test]
    fn no_categories_means_no_match_terms() {
        let mut selection = selection(500, true, &[]);
        selection.terms.categories.clear();
        assert_eq!(selection.subsidy_match_terms(), vec![TermId(1279)]);
        selection.is_subsidy = false;
        assert!(selection.subsidy_match_terms().is_empty());
    }

    #[test]
    fn current_node_and_unavailable_programmes_drop_out() {
        let profiles = vec![profile(100, false), profile(101, true), profile(102, false)];
        let kept = select_related_subsidies(
            &selection(100, false, &[]),
            &profiles,
            &fixture_index(),
            &SiteConfig::default(),
        );
        let ids: Vec<u32> = kept.iter().map(|profile| profile.id.0).collect();
        assert_eq!(ids, vec![102]);
    }

    #[test]
    fn subsidy_current_requires_region_coverage_or_nationwide() {
        let profiles = vec![profile(100, false), profile(101, false), profile(102, false)];
        let kept = select_related_subsidies(
            &selection(999, true, &[372]),
            &profiles,
            &fixture_index(),
            &SiteConfig::default(),
        );
        let ids: Vec<u32> = kept.iter().map(|profile| profile.id.0).collect();
        // 100 is nationwide, 101 covers Berlin, 102 is Bayern only.
        assert_eq!(ids, vec![100, 101]);
    }

    #[test]
    fn non_subsidy_current_skips_the_region_filter() {
        let profiles = vec![profile(101, false), profile(102, false)];
        let kept = select_related_subsidies(
            &selection(999, false, &[372]),
            &profiles,
            &fixture_index(),
            &SiteConfig::default(),
        );
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn subsidy_current_without_regions_keeps_everything_else() {
        let profiles = vec![profile(101, false), profile(102, false)];
        let kept = select_related_subsidies(
            &selection(999, true, &[]),
            &profiles,
            &fixture_index(),
            &SiteConfig::default(),
        );
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn weighting_sorts_heaviest_first_with_stable_ties() {
        let mut counts = BTreeMap::new();
        counts.insert(NodeId(1), 3_i64);
        counts.insert(NodeId(2), 1);
        counts.insert(NodeId(3), 3);
        let weighted = weigh_content_candidates(
            vec![item(1, "Anbau"), item(2, "Badumbau"), item(3, "Carport")],
            &counts,
        );
        let order: Vec<(u32, i64)> =
            weighted.iter().map(|item| (item.nid.0, item.weight)).collect();
        assert_eq!(order, vec![(1, 3), (3, 3), (2, 1)]);
    }

    #[test]
    fn unknown_candidates_weigh_nothing() {
        let weighted = weigh_content_candidates(vec![item(7, "Dach")], &BTreeMap::new());
        assert_eq!(weighted[0].weight, 0);
    }

    #[test]
    fn checklists_match_on_shared_purposes() {
        let checklists = vec![
            checklist(431, "Checkliste Sanierung", &[1281, 1283]),
            checklist(479, "Checkliste Neubau", &[1279]),
            checklist(435, "Checkliste Komplett", &[1279, 1281, 1283]),
        ];
        let selected = select_checklists(&[TermId(1279)], &checklists);
        let fids: Vec<u32> = selected.iter().map(|checklist| checklist.fid.0).collect();
        assert_eq!(fids, vec![479, 435]);
    }

    #[test]
    fn duplicate_files_are_kept_once() {
        let checklists = vec![
            checklist(431, "Checkliste Sanierung", &[1281]),
            checklist(431, "Checkliste Sanierung", &[1281, 1283]),
        ];
        let selected = select_checklists(&[TermId(1281), TermId(1283)], &checklists);
        assert_eq!(selected.len(), 1);
    }

    #[test]
    fn no_purpose_overlap_selects_nothing() {
        let checklists = vec![checklist(431, "Checkliste Sanierung", &[1281])];
        assert!(select_checklists(&[TermId(1279)], &checklists).is_empty());
        assert!(select_checklists(&[], &checklists).is_empty());
    }
}
