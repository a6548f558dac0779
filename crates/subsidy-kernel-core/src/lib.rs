//! Deterministic navigation core for a subsidy content site: the
//! relationship index over subsidy taxonomy terms, its facets projection,
//! table-of-contents trees, term trails, menus, breadcrumbs, profile
//! ranking, and related-content selection.
//!
//! Everything in this crate is pure: inputs are snapshots of published
//! content handed in by a store, outputs are owned values. Missing data
//! degrades to empty results with a log line; only malformed input and
//! broken configuration surface as [`KernelError`].

use thiserror::Error;

pub mod alias;
pub mod collate;
pub mod config;
pub mod facets;
pub mod index;
pub mod menu;
pub mod profile;
pub mod related;
pub mod slug;
pub mod toc;
pub mod trail;
pub mod types;

pub use alias::build_alias;
pub use collate::{Collator, GermanCollator};
pub use config::SiteConfig;
pub use facets::{
    project_facets, FacetEntry, FacetVocabularies, FacetsMap, Hyphenator, NoHyphenation,
    SoftHyphenMap,
};
pub use index::{build_index, RelationshipIndex, TermAssignment};
pub use menu::{
    breadcrumbs, build_main_menu, build_meta_menu, build_subsidy_menu, build_toc_menu, mark_active,
};
pub use profile::{build_profile, is_kfw_label, nodes_for_terms, rank_profiles};
pub use related::{
    select_checklists, select_related_subsidies, weigh_content_candidates, RelatedContent,
    RelatedSelection,
};
pub use slug::{slug_path, slugify};
pub use toc::{build_trees, find_term, HubAssignment, TocInputs, TocTrees};
pub use trail::{content_parent, term_trail};
pub use types::{
    Breadcrumb, Checklist, ContentItem, ContentKind, FileId, MenuEntry, NavItem, NodeId,
    NodeTermSelection, RelatedItem, RelatedKind, SubsidyField, SubsidyFields, SubsidyProfile,
    Term, TermId, TocNode, Vocabulary,
};

/// Errors surfaced by the navigation core.
#[derive(Debug, Error)]
pub enum KernelError {
    /// Input failed structural validation.
    #[error("validation error: {0}")]
    Validation(String),
    /// A lookup or selection was asked something unanswerable.
    #[error("query error: {0}")]
    Query(String),
    /// Site configuration is unusable.
    #[error("config error: {0}")]
    Config(String),
}
