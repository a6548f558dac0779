//! Flattening subsidy nodes into comparable profiles and the ranking
//! order the result lists ship in.

use std::cmp::Reverse;

use crate::index::RelationshipIndex;
use crate::types::{ContentItem, NodeId, SubsidyField, SubsidyProfile, TermId};

const NATIONWIDE_LABEL: &str = "bundesweit";

/// Whether a provider label names the KfW bank. Matches anywhere in the
/// label so variants like "KfW Bankengruppe" count.
#[must_use]
pub fn is_kfw_label(label: &str) -> bool {
    label.to_lowercase().contains("kfw")
}

fn last_label(index: &RelationshipIndex, nid: NodeId, field: SubsidyField) -> Option<String> {
    let tid = index.node_terms_in(nid, field).last().copied()?;
    index
        .vocab_labels(field)
        .and_then(|labels| labels.get(&tid))
        .cloned()
}

/// Projects one subsidy node to its profile. Type, provider and region
/// labels come from the relationship index; when a node carries several
/// terms of one field the last one wins.
#[must_use]
pub fn build_profile(item: &ContentItem, index: &RelationshipIndex) -> SubsidyProfile {
    let fields = item.subsidy.clone().unwrap_or_default();
    SubsidyProfile {
        id: item.nid,
        url: item.url.clone(),
        title: item.title.clone(),
        subsidy_type: last_label(index, item.nid, SubsidyField::SubsidyType),
        subsidy_provider: last_label(index, item.nid, SubsidyField::SubsidyProvider),
        subsidy_region: last_label(index, item.nid, SubsidyField::SubsidyRegion),
        date: item.date,
        subsidy_name: fields.subsidy_name,
        amount: fields.amount,
        coverage: fields.coverage,
        scope: fields.scope,
        unavailable: fields.unavailable,
    }
}

fn is_nationwide(profile: &SubsidyProfile) -> bool {
    profile
        .subsidy_region
        .as_deref()
        .is_some_and(|region| region.to_lowercase() == NATIONWIDE_LABEL)
}

fn has_kfw_provider(profile: &SubsidyProfile) -> bool {
    profile.subsidy_provider.as_deref().is_some_and(is_kfw_label)
}

/// Ranks profiles for display: amount descending (missing counts as 0),
/// then the nationwide bucket ahead of everything regional, and inside
/// the nationwide bucket KfW-funded programmes first. Every pass is
/// stable, so ranking an already-ranked list is a no-op.
#[must_use]
pub fn rank_profiles(mut profiles: Vec<SubsidyProfile>) -> Vec<SubsidyProfile> {
    profiles.sort_by_key(|profile| Reverse(profile.amount.unwrap_or(0)));

    let mut nationwide = Vec::new();
    let mut other = Vec::new();
    for profile in profiles {
        if is_nationwide(&profile) {
            nationwide.push(profile);
        } else {
            other.push(profile);
        }
    }
    nationwide.sort_by_key(|profile| !has_kfw_provider(profile));

    nationwide.extend(other);
    nationwide
}

/// Node ids matching a term selection: inclusive mode unions the nodes
/// of any given term (in term order, first occurrence kept), exclusive
/// mode keeps only nodes tagged with every given term.
#[must_use]
pub fn nodes_for_terms(
    index: &RelationshipIndex,
    terms: &[TermId],
    exclusive: bool,
) -> Vec<NodeId> {
    if exclusive {
        index.nodes_with_all_terms(terms)
    } else {
        index.nodes_with_any_term(terms)
    }
}
