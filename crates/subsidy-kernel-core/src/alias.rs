//! URL alias generation from term trails.

use tracing::warn;

use crate::slug::slug_path;
use crate::types::{ContentItem, ContentKind, Term};

/// Builds the canonical url alias for a node from its root-first trail:
/// one segment per trail term (`path_title` override first, term name
/// otherwise), plus the node title for everything that is not a section
/// hub. `page` bundles alias under their bare title. Nodes without a
/// trail keep their existing path.
#[must_use]
pub fn build_alias(trail: &[Term], node: &ContentItem) -> Option<String> {
    if trail.is_empty() {
        warn!(node = node.nid.0, "empty term trail, no alias generated");
        return None;
    }

    let mut segments: Vec<String> = if node.kind == ContentKind::Page {
        Vec::new()
    } else {
        trail
            .iter()
            .map(|term| term.path_title.clone().unwrap_or_else(|| term.name.clone()))
            .collect()
    };
    let include_title = !matches!(
        node.kind,
        ContentKind::MainSectionHub | ContentKind::SubSectionHub
    );
    if include_title {
        segments.push(node.title.clone());
    }
    Some(slug_path(&segments))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NodeId, TermId, Vocabulary};

    fn term(tid: u32, name: &str, path_title: Option<&str>) -> Term {
        Term {
            tid: TermId(tid),
            vocabulary: Vocabulary::Toc,
            name: name.to_string(),
            weight: 0,
            parents: Vec::new(),
            path_title: path_title.map(str::to_string),
        }
    }

    fn node(kind: ContentKind, title: &str) -> ContentItem {
        ContentItem {
            nid: NodeId(700),
            kind,
            title: title.to_string(),
            url: String::new(),
            published: true,
            toc_term: None,
            date: None,
            subsidy: None,
        }
    }

    #[test]
    fn articles_alias_under_their_full_trail() {
        let trail = vec![term(1410, "Modernisieren", None), term(1420, "Altersgerecht Umbauen", None)];
        let alias = build_alias(&trail, &node(ContentKind::Article, "Badumbau planen"));
        assert_eq!(
            alias.as_deref(),
            Some("/modernisieren/altersgerecht-umbauen/badumbau-planen")
        );
    }

    #[test]
    fn path_titles_override_term_names() {
        let trail = vec![term(1416, "Fördermittel", Some("Förderung"))];
        let alias = build_alias(&trail, &node(ContentKind::Subsidy, "KfW 455-B"));
        assert_eq!(alias.as_deref(), Some("/foerderung/kfw-455-b"));
    }

    #[test]
    fn section_hubs_alias_without_their_title() {
        let trail = vec![term(1410, "Modernisieren", None), term(1420, "Altersgerecht Umbauen", None)];
        let alias = build_alias(&trail, &node(ContentKind::SubSectionHub, "Altersgerecht Umbauen"));
        assert_eq!(alias.as_deref(), Some("/modernisieren/altersgerecht-umbauen"));

        let root_trail = vec![term(1410, "Modernisieren", None)];
        let alias = build_alias(&root_trail, &node(ContentKind::MainSectionHub, "Modernisieren"));
        assert_eq!(alias.as_deref(), Some("/modernisieren"));
    }

    #[test]
    fn pages_alias_under_their_bare_title() {
        let trail = vec![term(1430, "Impressum", None)];
        let alias = build_alias(&trail, &node(ContentKind::Page, "Impressum & Kontakt"));
        assert_eq!(alias.as_deref(), Some("/impressum-kontakt"));
    }

    #[test]
    fn empty_trail_generates_no_alias() {
        assert!(build_alias(&[], &node(ContentKind::Article, "Verwaist")).is_none());
        assert!(build_alias(&[], &node(ContentKind::Page, "Verwaist")).is_none());
    }
}
