//! The two table-of-contents trees: a two-level main tree with the
//! subsidy sub-tree spliced in, and a flat meta tree.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::collate::Collator;
use crate::config::SiteConfig;
use crate::types::{
    ContentItem, ContentKind, NodeId, SubsidyField, Term, TermId, TocNode, Vocabulary,
};

/// One subsidy term reference on a hub page, as the store scans it.
/// Rows are ordered by node, then field scan order, then term id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubAssignment {
    pub nid: NodeId,
    pub field: SubsidyField,
    pub tid: TermId,
    pub label: String,
}

/// Everything the tree build reads: the `toc` vocabulary terms, the
/// published content nodes, the node→toc-term map, and the subsidy term
/// references of the hub pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TocInputs {
    pub terms: Vec<Term>,
    pub nodes: Vec<ContentItem>,
    pub node_toc_map: BTreeMap<NodeId, TermId>,
    pub hub_assignments: Vec<HubAssignment>,
}

/// Both navigation trees, built together so they snapshot the same
/// content state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TocTrees {
    pub main: Vec<TocNode>,
    pub meta: Vec<TocNode>,
}

/// Depth-first search for a term id, first match wins.
#[must_use]
pub fn find_term(tree: &[TocNode], tid: TermId) -> Option<&TocNode> {
    for entry in tree {
        if entry.term.tid == tid {
            return Some(entry);
        }
        if let Some(found) = find_term(&entry.children, tid) {
            return Some(found);
        }
    }
    None
}

fn find_term_mut(tree: &mut [TocNode], tid: TermId) -> Option<&mut TocNode> {
    for entry in tree {
        if entry.term.tid == tid {
            return Some(entry);
        }
        if let Some(found) = find_term_mut(&mut entry.children, tid) {
            return Some(found);
        }
    }
    None
}

/// Builds main and meta tree from one input snapshot.
///
/// Main tree: terms parented to the main root, two levels; roots sorted
/// by weight, children per root by collated name, a child appearing
/// under every root its parent set names. Published section hubs and the
/// configured standalone articles attach via the node→term map, then the
/// subsidy sub-tree is spliced onto the search and hubs terms.
///
/// Meta tree: one level under the meta root, weight-sorted, restricted
/// to published `main_section_hub` and `page` nodes.
#[must_use]
pub fn build_trees(inputs: &TocInputs, config: &SiteConfig, collator: &dyn Collator) -> TocTrees {
    let mut main = branch(&inputs.terms, config.main_menu_term, true, collator);
    let mut meta = branch(&inputs.terms, config.meta_menu_term, false, collator);

    attach_nodes(&mut main, inputs, |node| {
        matches!(node.kind, ContentKind::MainSectionHub | ContentKind::SubSectionHub)
            || config.standalone_article_nodes.contains(&node.nid)
    });
    attach_nodes(&mut meta, inputs, |node| {
        matches!(node.kind, ContentKind::MainSectionHub | ContentKind::Page)
    });

    splice_subsidy_branch(&mut main, inputs, config, collator);

    TocTrees { main, meta }
}

fn branch(
    terms: &[Term],
    root_tid: TermId,
    with_children: bool,
    collator: &dyn Collator,
) -> Vec<TocNode> {
    let mut roots: Vec<TocNode> = terms
        .iter()
        .filter(|term| term.parents.contains(&root_tid))
        .map(|term| TocNode::leaf(term.clone(), 0))
        .collect();
    roots.sort_by_key(|entry| entry.term.weight);

    if with_children {
        let root_tids: Vec<TermId> = roots.iter().map(|entry| entry.term.tid).collect();
        for term in terms {
            for parent in &term.parents {
                if root_tids.contains(parent) {
                    if let Some(root) = roots.iter_mut().find(|entry| entry.term.tid == *parent) {
                        root.children.push(TocNode::leaf(term.clone(), 1));
                    }
                }
            }
        }
        for root in &mut roots {
            root.children
                .sort_by(|a, b| collator.compare(&a.term.name, &b.term.name));
        }
    }
    roots
}

fn attach_nodes(tree: &mut [TocNode], inputs: &TocInputs, eligible: impl Fn(&ContentItem) -> bool) {
    let mut by_term: BTreeMap<TermId, &ContentItem> = BTreeMap::new();
    for node in &inputs.nodes {
        if !node.published || !eligible(node) {
            continue;
        }
        let Some(tid) = inputs.node_toc_map.get(&node.nid) else {
            continue;
        };
        by_term.entry(*tid).or_insert(node);
    }
    attach_from_map(tree, &by_term);
}

fn attach_from_map(tree: &mut [TocNode], by_term: &BTreeMap<TermId, &ContentItem>) {
    for entry in tree {
        if entry.node.is_none() {
            if let Some(node) = by_term.get(&entry.term.tid) {
                entry.node = Some((*node).clone());
            }
        }
        attach_from_map(&mut entry.children, by_term);
    }
}

/// Splices the subsidy sub-tree into the main tree: the search node
/// attaches to the search term, and every other published hub page
/// becomes a synthetic child of the hubs term, named after the last
/// subsidy term reference on the hub. Synthetic children group by
/// vocabulary and each group is collator-sorted before appending.
fn splice_subsidy_branch(
    main: &mut [TocNode],
    inputs: &TocInputs,
    config: &SiteConfig,
    collator: &dyn Collator,
) {
    let Some(search_node) = inputs
        .nodes
        .iter()
        .find(|node| node.nid == config.subsidy_search_node && node.published)
    else {
        error!(
            node = config.subsidy_search_node.0,
            "subsidy search node missing, skipping subsidy branch"
        );
        return;
    };

    match find_term_mut(main, config.subsidy_search_term) {
        Some(search) => search.node = Some(search_node.clone()),
        None => {
            warn!(term = config.subsidy_search_term.0, "subsidy search term not in main tree");
        }
    }

    let mut rows: Vec<&HubAssignment> = inputs
        .hub_assignments
        .iter()
        .filter(|row| row.field.anchors_hub_pages())
        .collect();
    rows.sort_by_key(|row| (row.nid, row.field, row.tid));

    // Later rows overwrite, leaving the last field's last term per hub.
    let mut anchor_per_hub: BTreeMap<NodeId, &HubAssignment> = BTreeMap::new();
    for row in rows {
        anchor_per_hub.insert(row.nid, row);
    }

    let mut groups: BTreeMap<Vocabulary, Vec<TocNode>> = BTreeMap::new();
    for (nid, row) in anchor_per_hub {
        if nid == config.subsidy_search_node {
            continue;
        }
        let Some(node) = inputs
            .nodes
            .iter()
            .find(|node| node.nid == nid && node.published && node.kind == ContentKind::SubsidyHub)
        else {
            warn!(node = nid.0, "hub assignment without a published hub node");
            continue;
        };
        let vocabulary = row.field.vocabulary();
        let term = Term {
            tid: row.tid,
            vocabulary,
            name: row.label.clone(),
            weight: 0,
            parents: vec![config.subsidy_hubs_term],
            path_title: None,
        };
        let mut entry = TocNode::leaf(term, 2);
        entry.node = Some(node.clone());
        groups.entry(vocabulary).or_default().push(entry);
    }

    let Some(hubs) = find_term_mut(main, config.subsidy_hubs_term) else {
        if !groups.is_empty() {
            warn!(term = config.subsidy_hubs_term.0, "subsidy hubs term not in main tree");
        }
        return;
    };
    for (_, mut group) in groups {
        group.sort_by(|a, b| collator.compare(&a.term.name, &b.term.name));
        hubs.children.append(&mut group);
    }
}
