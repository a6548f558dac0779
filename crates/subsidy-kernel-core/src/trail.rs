//! Root-first ancestor trails for content nodes, and the node-parent
//! lookup the host uses for canonical link targets.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{error, warn};

use crate::config::SiteConfig;
use crate::toc::{find_term, TocTrees};
use crate::types::{ContentItem, ContentKind, NodeId, Term, TermId, TocNode};

/// Resolves the ancestor trail of a node, root term first.
///
/// The departure term is the subsidy search term for subsidy nodes and
/// the node's mapped toc term otherwise; the search page itself departs
/// from the subsidy main term. The main tree is consulted before the
/// meta tree, and every parent is resolved within the tree the
/// departure term was found in. Nodes without a resolvable departure
/// term get an empty trail and a warning.
#[must_use]
pub fn term_trail(
    trees: &TocTrees,
    node: &ContentItem,
    node_toc_map: &BTreeMap<NodeId, TermId>,
    config: &SiteConfig,
) -> Vec<Term> {
    let departure = if node.nid == config.subsidy_search_node {
        Some(config.subsidy_main_term)
    } else if node.kind == ContentKind::Subsidy {
        Some(config.subsidy_search_term)
    } else {
        node_toc_map.get(&node.nid).copied()
    };
    let Some(departure) = departure else {
        warn!(node = node.nid.0, "node has no toc term, trail is empty");
        return Vec::new();
    };

    let (tree, base) = if let Some(base) = find_term(&trees.main, departure) {
        (&trees.main, base)
    } else if let Some(base) = find_term(&trees.meta, departure) {
        (&trees.meta, base)
    } else {
        warn!(node = node.nid.0, term = departure.0, "departure term in neither tree");
        return Vec::new();
    };

    let mut trail: Vec<&TocNode> = vec![base];
    let mut visited: BTreeSet<TermId> = BTreeSet::new();
    visited.insert(base.term.tid);
    let mut at = 0;
    while at < trail.len() {
        for parent in &trail[at].term.parents {
            if visited.contains(parent) {
                error!(term = parent.0, "parent cycle in toc terms");
                continue;
            }
            if let Some(entry) = find_term(tree, *parent) {
                visited.insert(*parent);
                trail.push(entry);
            }
        }
        at += 1;
    }

    trail.reverse();
    trail.into_iter().map(|entry| entry.term.clone()).collect()
}

/// The content node of the main-tree root owning this node's toc term.
/// Top-level bundles have no parent by definition.
#[must_use]
pub fn content_parent<'a>(
    main: &'a [TocNode],
    node: &ContentItem,
    node_toc_map: &BTreeMap<NodeId, TermId>,
) -> Option<&'a ContentItem> {
    if matches!(node.kind, ContentKind::MainSectionHub | ContentKind::SubsidyHub) {
        return None;
    }
    let tid = node_toc_map.get(&node.nid)?;
    for root in main {
        if root.children.iter().any(|child| child.term.tid == *tid) {
            return root.node.as_ref();
        }
    }
    None
}
