use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use subsidy_kernel_core::{
    build_alias, build_index, build_main_menu, build_meta_menu, build_profile, build_subsidy_menu,
    build_toc_menu, build_trees, breadcrumbs, content_parent, is_kfw_label, mark_active,
    nodes_for_terms, project_facets, rank_profiles, select_checklists, select_related_subsidies,
    term_trail, weigh_content_candidates, Breadcrumb, Checklist, ContentItem, ContentKind,
    FacetsMap, GermanCollator, NavItem, NoHyphenation, NodeId, NodeTermSelection, RelatedContent,
    RelatedItem, RelatedKind, RelatedSelection, RelationshipIndex, SiteConfig, SubsidyField,
    SubsidyProfile, Term, TermId, TocInputs, TocTrees,
};
use subsidy_kernel_store_sqlite::{
    CacheStore, ExportManifest, ImportSummary, IntegrityReport, SchemaStatus, SqliteStore,
};
use tracing::warn;

pub const API_CONTRACT_VERSION: &str = "api.v1";

pub const CACHE_KEY_SUBSIDIES_MAP: &str = "subsidies.map";
pub const CACHE_KEY_FACETS_MAP: &str = "subsidies.facets_map";
pub const CACHE_KEY_TOC: &str = "toc";
pub const CACHE_KEY_MENU_MAIN: &str = "menu.main";
pub const CACHE_KEY_MENU_META: &str = "menu.meta";
pub const CACHE_KEY_MENU_SUBSIDY: &str = "menu.subsidy";
pub const CACHE_KEY_RELATED_TERMS_COUNT: &str = "related.terms_count";
pub const CACHE_KEY_CHECKLISTS: &str = "checklists";

/// Cache key of one hub page's subsidy teaser.
#[must_use]
pub fn hub_teaser_cache_key(nid: NodeId) -> String {
    format!("subsidies.hub.{}", nid.0)
}

/// Content bundles that can carry toc terms or hang below the trees.
const TOC_NODE_KINDS: [ContentKind; 5] = [
    ContentKind::SubsidyHub,
    ContentKind::MainSectionHub,
    ContentKind::SubSectionHub,
    ContentKind::Article,
    ContentKind::Page,
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrateResult {
    pub dry_run: bool,
    pub current_version: i64,
    pub target_version: i64,
    pub would_apply_versions: Vec<i64>,
    pub inferred_from_legacy: bool,
    pub after_version: Option<i64>,
    pub up_to_date: Option<bool>,
}

/// The request-scoped navigation inputs: the node being rendered (if
/// the path maps to one) and the request path itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub node: Option<NodeId>,
    pub path: String,
}

impl RequestContext {
    #[must_use]
    pub fn for_path(path: impl Into<String>) -> Self {
        Self {
            node: None,
            path: path.into(),
        }
    }

    #[must_use]
    pub fn for_node(node: NodeId, path: impl Into<String>) -> Self {
        Self {
            node: Some(node),
            path: path.into(),
        }
    }
}

/// Stable facade over the kernel: every operation opens the store,
/// migrates it when needed, and runs against a fresh [`NavSession`].
#[derive(Debug, Clone)]
pub struct SubsidyKernelApi {
    db_path: PathBuf,
    config: SiteConfig,
}

impl SubsidyKernelApi {
    #[must_use]
    pub fn new(db_path: PathBuf) -> Self {
        Self {
            db_path,
            config: SiteConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(db_path: PathBuf, config: SiteConfig) -> Self {
        Self { db_path, config }
    }

    #[must_use]
    pub fn config(&self) -> &SiteConfig {
        &self.config
    }

    fn open_store(&self) -> Result<SqliteStore> {
        SqliteStore::open(&self.db_path)
    }

    fn open_migrated(&self) -> Result<SqliteStore> {
        let mut store = self.open_store()?;
        store.migrate()?;
        Ok(store)
    }

    /// Runs one operation against a fresh session. The cache connection
    /// is separate from the data connection so cached derivatives can be
    /// written back while scans are still borrowed.
    fn with_session<T>(&self, op: impl FnOnce(&mut NavSession<'_>) -> Result<T>) -> Result<T> {
        let store = self.open_migrated()?;
        let mut cache = self.open_store()?;
        let mut session = NavSession::new(&store, &self.config, &mut cache);
        op(&mut session)
    }

    /// Inspect schema status without mutating data.
    ///
    /// # Errors
    /// Returns an error when the `SQLite` database cannot be opened or queried.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        let store = self.open_store()?;
        store.schema_status()
    }

    /// Apply pending schema migrations, or report them with `dry_run`.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or a migration fails.
    pub fn migrate(&self, dry_run: bool) -> Result<MigrateResult> {
        let mut store = self.open_store()?;
        let before = store.schema_status()?;
        if dry_run {
            return Ok(MigrateResult {
                dry_run: true,
                current_version: before.current_version,
                target_version: before.target_version,
                would_apply_versions: before.pending_versions,
                inferred_from_legacy: before.inferred_from_legacy,
                after_version: None,
                up_to_date: None,
            });
        }

        let planned_versions = before.pending_versions;
        store.migrate()?;
        let after = store.schema_status()?;
        Ok(MigrateResult {
            dry_run: false,
            current_version: before.current_version,
            target_version: before.target_version,
            would_apply_versions: planned_versions,
            inferred_from_legacy: before.inferred_from_legacy,
            after_version: Some(after.current_version),
            up_to_date: Some(after.pending_versions.is_empty()),
        })
    }

    /// Export every content table as a digest-carrying snapshot directory.
    ///
    /// # Errors
    /// Returns an error when the database or the output directory fails.
    pub fn export_content(&self, out_dir: &Path) -> Result<ExportManifest> {
        let store = self.open_migrated()?;
        store.export_snapshot(out_dir)
    }

    /// Import a snapshot directory produced by [`Self::export_content`].
    ///
    /// # Errors
    /// Returns an error on digest mismatches, or on an existing record
    /// when `skip_existing` is false.
    pub fn import_content(&self, in_dir: &Path, skip_existing: bool) -> Result<ImportSummary> {
        let mut store = self.open_store()?;
        store.import_snapshot(in_dir, skip_existing)
    }

    /// Copy the live database into a single backup file.
    ///
    /// # Errors
    /// Returns an error when either side of the copy fails.
    pub fn backup_database(&self, out_file: &Path) -> Result<()> {
        let store = self.open_migrated()?;
        store.backup_database(out_file)
    }

    /// Replace the live database with a backup file, then migrate it.
    ///
    /// # Errors
    /// Returns an error when the copy or the follow-up migration fails.
    pub fn restore_database(&self, in_file: &Path) -> Result<()> {
        let mut store = self.open_store()?;
        store.restore_database(in_file)
    }

    /// Run `SQLite` self checks plus the schema status report.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or queried.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let store = self.open_migrated()?;
        store.integrity_check()
    }

    /// The symmetric node↔term relationship index over published subsidies.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or scanned.
    pub fn relationship_index(&self) -> Result<RelationshipIndex> {
        self.with_session(|session| {
            session.ensure_index()?;
            Ok(session.index()?.clone())
        })
    }

    /// The UI-facing facets projection of the relationship index.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or scanned.
    pub fn facets_map(&self) -> Result<FacetsMap> {
        self.with_session(|session| {
            session.ensure_facets()?;
            Ok(session.facets()?.clone())
        })
    }

    /// Ranked subsidy profiles for a term selection. `exclusive`
    /// requires every term; otherwise any term qualifies a node.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or scanned.
    pub fn subsidy_profiles(
        &self,
        terms: &[TermId],
        exclusive: bool,
    ) -> Result<Vec<SubsidyProfile>> {
        self.with_session(|session| session.profiles_for_terms(terms, exclusive))
    }

    /// Ranked teaser profiles for one hub page: its anchor terms plus
    /// the nationwide region. The search page node teases everything.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or scanned.
    pub fn subsidy_hub_teaser(&self, nid: NodeId) -> Result<Vec<SubsidyProfile>> {
        self.with_session(|session| session.hub_teaser(nid))
    }

    /// Whether a subsidy node is provided by the KfW bank group.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or scanned.
    pub fn is_kfw(&self, nid: NodeId) -> Result<bool> {
        self.with_session(|session| session.is_kfw(nid))
    }

    /// The main menu with the subsidy section grafted in, active-marked
    /// for the request.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or scanned.
    pub fn main_menu(&self, ctx: &RequestContext) -> Result<Vec<NavItem>> {
        self.with_session(|session| session.marked_main_menu(ctx))
    }

    /// The meta menu, active-marked for the request.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or scanned.
    pub fn meta_menu(&self, ctx: &RequestContext) -> Result<Vec<NavItem>> {
        self.with_session(|session| session.marked_meta_menu(ctx))
    }

    /// The flat subsidy menu, active-marked for the request.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or scanned.
    pub fn subsidy_menu(&self, ctx: &RequestContext) -> Result<Vec<NavItem>> {
        self.with_session(|session| session.marked_subsidy_menu(ctx))
    }

    /// On-page anchor items for the given toc terms, in input order.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or scanned.
    pub fn toc_menu(&self, tids: &[TermId]) -> Result<Vec<NavItem>> {
        self.with_session(|session| session.toc_menu(tids))
    }

    /// Breadcrumbs for the request, derived from the active menu path.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or scanned.
    pub fn breadcrumbs(&self, ctx: &RequestContext) -> Result<Vec<Breadcrumb>> {
        self.with_session(|session| session.breadcrumb_trail(ctx))
    }

    /// The root-first term trail of the request's node.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or scanned.
    pub fn term_trail(&self, ctx: &RequestContext) -> Result<Vec<Term>> {
        self.with_session(|session| session.trail(ctx))
    }

    /// The content node owning the request's node in the main tree.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or scanned.
    pub fn node_parent(&self, ctx: &RequestContext) -> Result<Option<ContentItem>> {
        self.with_session(|session| session.parent(ctx))
    }

    /// Related content of one bundle for the request's node.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or scanned.
    pub fn related_by_type(&self, ctx: &RequestContext, kind: RelatedKind) -> Result<RelatedContent> {
        self.with_session(|session| session.related(ctx, kind))
    }

    /// Checklists sharing a purpose term with the request's node.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or scanned.
    pub fn related_checklists(&self, ctx: &RequestContext) -> Result<Vec<Checklist>> {
        self.with_session(|session| session.checklists_for(ctx))
    }

    /// The newest news nodes, up to the configured teaser limit.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or queried.
    pub fn recent_news(&self) -> Result<Vec<ContentItem>> {
        let store = self.open_migrated()?;
        store.recent_news(self.config.news_teaser_limit)
    }

    /// Every published news node, newest first, undated ones last.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or queried.
    pub fn all_news(&self) -> Result<Vec<ContentItem>> {
        let store = self.open_migrated()?;
        store.all_news()
    }

    /// The URL alias a node's trail and title generate, if any.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or scanned.
    pub fn alias_for(&self, nid: NodeId) -> Result<Option<String>> {
        self.with_session(|session| session.alias(nid))
    }
}

/// One request's working set. Derivatives memoize in two levels: the
/// session field first, then the advisory cache table, then a rebuild
/// from the content tables. Cache entries are never expired here;
/// content imports reset them.
struct NavSession<'a> {
    store: &'a SqliteStore,
    config: &'a SiteConfig,
    cache: &'a mut dyn CacheStore,
    index: Option<RelationshipIndex>,
    facets: Option<FacetsMap>,
    trees: Option<TocTrees>,
    node_toc_map: Option<BTreeMap<NodeId, TermId>>,
    main_menu: Option<Vec<NavItem>>,
    meta_menu: Option<Vec<NavItem>>,
    subsidy_menu: Option<Vec<NavItem>>,
    term_counts: Option<BTreeMap<NodeId, i64>>,
    checklists: Option<Vec<Checklist>>,
}

impl<'a> NavSession<'a> {
    fn new(store: &'a SqliteStore, config: &'a SiteConfig, cache: &'a mut dyn CacheStore) -> Self {
        Self {
            store,
            config,
            cache,
            index: None,
            facets: None,
            trees: None,
            node_toc_map: None,
            main_menu: None,
            meta_menu: None,
            subsidy_menu: None,
            term_counts: None,
            checklists: None,
        }
    }

    fn ensure_index(&mut self) -> Result<()> {
        if self.index.is_some() {
            return Ok(());
        }
        if let Some(cached) = cache_get_json(&*self.cache, CACHE_KEY_SUBSIDIES_MAP) {
            self.index = Some(cached);
            return Ok(());
        }
        let assignments = self.store.scan_term_assignments(self.config)?;
        let index = build_index(&assignments, &self.config.noise_terms);
        cache_set_json(self.cache, CACHE_KEY_SUBSIDIES_MAP, &index);
        self.index = Some(index);
        Ok(())
    }

    fn index(&self) -> Result<&RelationshipIndex> {
        self.index
            .as_ref()
            .ok_or_else(|| anyhow!("relationship index not memoized"))
    }

    fn ensure_facets(&mut self) -> Result<()> {
        if self.facets.is_some() {
            return Ok(());
        }
        if let Some(cached) = cache_get_json(&*self.cache, CACHE_KEY_FACETS_MAP) {
            self.facets = Some(cached);
            return Ok(());
        }
        self.ensure_index()?;
        let index = self.index()?;
        let facets = project_facets(index, &GermanCollator, &NoHyphenation, self.config);
        cache_set_json(self.cache, CACHE_KEY_FACETS_MAP, &facets);
        self.facets = Some(facets);
        Ok(())
    }

    fn facets(&self) -> Result<&FacetsMap> {
        self.facets
            .as_ref()
            .ok_or_else(|| anyhow!("facets map not memoized"))
    }

    fn ensure_node_toc_map(&mut self) -> Result<()> {
        if self.node_toc_map.is_some() {
            return Ok(());
        }
        self.node_toc_map = Some(self.store.node_toc_map()?);
        Ok(())
    }

    fn ensure_trees(&mut self) -> Result<()> {
        if self.trees.is_some() {
            return Ok(());
        }
        if let Some(cached) = cache_get_json(&*self.cache, CACHE_KEY_TOC) {
            self.trees = Some(cached);
            return Ok(());
        }
        self.ensure_node_toc_map()?;
        let node_toc_map = self
            .node_toc_map
            .clone()
            .ok_or_else(|| anyhow!("node toc map not memoized"))?;
        let inputs = TocInputs {
            terms: self.store.scan_toc_terms()?,
            nodes: self.store.scan_nodes(&TOC_NODE_KINDS)?,
            node_toc_map,
            hub_assignments: self.store.scan_hub_assignments()?,
        };
        let trees = build_trees(&inputs, self.config, &GermanCollator);
        cache_set_json(self.cache, CACHE_KEY_TOC, &trees);
        self.trees = Some(trees);
        Ok(())
    }

    fn trees(&self) -> Result<&TocTrees> {
        self.trees
            .as_ref()
            .ok_or_else(|| anyhow!("navigation trees not memoized"))
    }

    fn ensure_main_menu(&mut self) -> Result<()> {
        if self.main_menu.is_some() {
            return Ok(());
        }
        if let Some(cached) = cache_get_json(&*self.cache, CACHE_KEY_MENU_MAIN) {
            self.main_menu = Some(cached);
            return Ok(());
        }
        self.ensure_trees()?;
        let trees = self.trees()?;
        let menu = build_main_menu(&trees.main, self.config);
        cache_set_json(self.cache, CACHE_KEY_MENU_MAIN, &menu);
        self.main_menu = Some(menu);
        Ok(())
    }

    fn ensure_meta_menu(&mut self) -> Result<()> {
        if self.meta_menu.is_some() {
            return Ok(());
        }
        if let Some(cached) = cache_get_json(&*self.cache, CACHE_KEY_MENU_META) {
            self.meta_menu = Some(cached);
            return Ok(());
        }
        self.ensure_trees()?;
        let trees = self.trees()?;
        let menu = build_meta_menu(&trees.meta);
        cache_set_json(self.cache, CACHE_KEY_MENU_META, &menu);
        self.meta_menu = Some(menu);
        Ok(())
    }

    fn ensure_subsidy_menu(&mut self) -> Result<()> {
        if self.subsidy_menu.is_some() {
            return Ok(());
        }
        if let Some(cached) = cache_get_json(&*self.cache, CACHE_KEY_MENU_SUBSIDY) {
            self.subsidy_menu = Some(cached);
            return Ok(());
        }
        self.ensure_trees()?;
        let trees = self.trees()?;
        let menu = build_subsidy_menu(&trees.main, self.config);
        cache_set_json(self.cache, CACHE_KEY_MENU_SUBSIDY, &menu);
        self.subsidy_menu = Some(menu);
        Ok(())
    }

    fn ensure_term_counts(&mut self) -> Result<()> {
        if self.term_counts.is_some() {
            return Ok(());
        }
        if let Some(cached) = cache_get_json(&*self.cache, CACHE_KEY_RELATED_TERMS_COUNT) {
            self.term_counts = Some(cached);
            return Ok(());
        }
        let counts = self
            .store
            .count_terms_per_node(&[ContentKind::Article, ContentKind::Guide])?;
        cache_set_json(self.cache, CACHE_KEY_RELATED_TERMS_COUNT, &counts);
        self.term_counts = Some(counts);
        Ok(())
    }

    fn ensure_checklists(&mut self) -> Result<()> {
        if self.checklists.is_some() {
            return Ok(());
        }
        if let Some(cached) = cache_get_json(&*self.cache, CACHE_KEY_CHECKLISTS) {
            self.checklists = Some(cached);
            return Ok(());
        }
        let checklists = self.store.all_checklists()?;
        cache_set_json(self.cache, CACHE_KEY_CHECKLISTS, &checklists);
        self.checklists = Some(checklists);
        Ok(())
    }

    fn trail(&mut self, ctx: &RequestContext) -> Result<Vec<Term>> {
        let Some(nid) = ctx.node else {
            return Ok(Vec::new());
        };
        let Some(node) = self.store.load_node(nid)? else {
            warn!(nid = nid.0, "trail requested for unknown node");
            return Ok(Vec::new());
        };
        self.node_trail(&node)
    }

    fn node_trail(&mut self, node: &ContentItem) -> Result<Vec<Term>> {
        self.ensure_trees()?;
        self.ensure_node_toc_map()?;
        let (Some(trees), Some(node_toc_map)) = (&self.trees, &self.node_toc_map) else {
            return Err(anyhow!("navigation trees not memoized"));
        };
        Ok(term_trail(trees, node, node_toc_map, self.config))
    }

    fn marked_main_menu(&mut self, ctx: &RequestContext) -> Result<Vec<NavItem>> {
        let trail: Vec<TermId> = self.trail(ctx)?.iter().map(|term| term.tid).collect();
        self.ensure_main_menu()?;
        let mut menu = self
            .main_menu
            .clone()
            .ok_or_else(|| anyhow!("main menu not memoized"))?;
        mark_active(&mut menu, &ctx.path, &trail);
        Ok(menu)
    }

    fn marked_meta_menu(&mut self, ctx: &RequestContext) -> Result<Vec<NavItem>> {
        let trail: Vec<TermId> = self.trail(ctx)?.iter().map(|term| term.tid).collect();
        self.ensure_meta_menu()?;
        let mut menu = self
            .meta_menu
            .clone()
            .ok_or_else(|| anyhow!("meta menu not memoized"))?;
        mark_active(&mut menu, &ctx.path, &trail);
        Ok(menu)
    }

    fn marked_subsidy_menu(&mut self, ctx: &RequestContext) -> Result<Vec<NavItem>> {
        let trail: Vec<TermId> = self.trail(ctx)?.iter().map(|term| term.tid).collect();
        self.ensure_subsidy_menu()?;
        let mut menu = self
            .subsidy_menu
            .clone()
            .ok_or_else(|| anyhow!("subsidy menu not memoized"))?;
        mark_active(&mut menu, &ctx.path, &trail);
        Ok(menu)
    }

    fn toc_menu(&mut self, tids: &[TermId]) -> Result<Vec<NavItem>> {
        self.ensure_trees()?;
        let trees = self.trees()?;
        Ok(build_toc_menu(trees, tids))
    }

    fn breadcrumb_trail(&mut self, ctx: &RequestContext) -> Result<Vec<Breadcrumb>> {
        let current_title = match ctx.node {
            Some(nid) => match self.store.load_node(nid)? {
                Some(node) => node.title,
                None => String::new(),
            },
            None => String::new(),
        };
        let main = self.marked_main_menu(ctx)?;
        let meta = self.marked_meta_menu(ctx)?;
        let subsidy = self.marked_subsidy_menu(ctx)?;
        Ok(breadcrumbs(&main, &meta, &subsidy, &ctx.path, &current_title))
    }

    fn parent(&mut self, ctx: &RequestContext) -> Result<Option<ContentItem>> {
        let Some(nid) = ctx.node else {
            return Ok(None);
        };
        let Some(node) = self.store.load_node(nid)? else {
            warn!(nid = nid.0, "parent requested for unknown node");
            return Ok(None);
        };
        self.ensure_trees()?;
        self.ensure_node_toc_map()?;
        let (Some(trees), Some(node_toc_map)) = (&self.trees, &self.node_toc_map) else {
            return Err(anyhow!("navigation trees not memoized"));
        };
        Ok(content_parent(&trees.main, &node, node_toc_map).cloned())
    }

    /// An empty selection matches nothing here; the unfiltered index
    /// would match every node instead.
    fn profiles_for_terms(
        &mut self,
        terms: &[TermId],
        exclusive: bool,
    ) -> Result<Vec<SubsidyProfile>> {
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        self.ensure_index()?;
        let index = self.index()?;
        let mut profiles = Vec::new();
        for nid in nodes_for_terms(index, terms, exclusive) {
            let Some(node) = self.store.load_node(nid)? else {
                warn!(nid = nid.0, "indexed subsidy node missing from store");
                continue;
            };
            profiles.push(build_profile(&node, index));
        }
        Ok(rank_profiles(profiles))
    }

    fn hub_teaser(&mut self, nid: NodeId) -> Result<Vec<SubsidyProfile>> {
        let key = hub_teaser_cache_key(nid);
        if let Some(cached) = cache_get_json(&*self.cache, &key) {
            return Ok(cached);
        }
        self.ensure_index()?;
        let terms: Vec<TermId> = if nid == self.config.subsidy_search_node {
            self.index()?.terms_to_nodes.keys().copied().collect()
        } else {
            let anchor_rows: Vec<_> = self
                .store
                .node_assignments(nid)?
                .into_iter()
                .filter(|row| row.field.anchors_hub_pages())
                .collect();
            match anchor_rows.iter().map(|row| row.field).max() {
                Some(anchor_field) => {
                    let mut terms = vec![self.config.nationwide_term];
                    terms.extend(
                        anchor_rows
                            .iter()
                            .filter(|row| row.field == anchor_field)
                            .map(|row| row.tid),
                    );
                    terms
                }
                None => Vec::new(),
            }
        };
        let profiles = self.profiles_for_terms(&terms, false)?;
        cache_set_json(self.cache, &key, &profiles);
        Ok(profiles)
    }

    fn is_kfw(&mut self, nid: NodeId) -> Result<bool> {
        self.ensure_index()?;
        let index = self.index()?;
        Ok(index
            .node_terms_in(nid, SubsidyField::SubsidyProvider)
            .iter()
            .filter_map(|tid| index.label(*tid))
            .any(is_kfw_label))
    }

    /// Where the node sits in the term graph: indexed subsidies read
    /// from the index, everything else from its raw assignment rows.
    fn node_selection(&mut self, node: &ContentItem) -> Result<RelatedSelection> {
        self.ensure_index()?;
        let index = self.index()?;
        let terms = if index.nodes_to_terms.contains_key(&node.nid) {
            NodeTermSelection {
                categories: index.node_terms_in(node.nid, SubsidyField::ContentCategories),
                purposes: index.node_terms_in(node.nid, SubsidyField::SubsidyPurpose),
                regions: index.node_terms_in(node.nid, SubsidyField::SubsidyRegion),
            }
        } else {
            let rows: Vec<_> = self
                .store
                .node_assignments(node.nid)?
                .into_iter()
                .filter(|row| !self.config.is_noise_term(row.tid))
                .collect();
            let terms_in = |field: SubsidyField| -> Vec<TermId> {
                rows.iter()
                    .filter(|row| row.field == field)
                    .map(|row| row.tid)
                    .collect()
            };
            NodeTermSelection {
                categories: terms_in(SubsidyField::ContentCategories),
                purposes: terms_in(SubsidyField::SubsidyPurpose),
                regions: terms_in(SubsidyField::SubsidyRegion),
            }
        };
        Ok(RelatedSelection {
            current: node.nid,
            is_subsidy: node.kind == ContentKind::Subsidy,
            terms,
        })
    }

    fn related(&mut self, ctx: &RequestContext, kind: RelatedKind) -> Result<RelatedContent> {
        let Some(nid) = ctx.node else {
            return Ok(RelatedContent::default());
        };
        let Some(node) = self.store.load_node(nid)? else {
            warn!(nid = nid.0, "related content requested for unknown node");
            return Ok(RelatedContent::default());
        };
        let selection = self.node_selection(&node)?;
        let mut related = RelatedContent::default();
        match kind {
            RelatedKind::Subsidy => {
                let match_terms = selection.subsidy_match_terms();
                if match_terms.is_empty() {
                    return Ok(related);
                }
                let candidates = self.profiles_for_terms(&match_terms, true)?;
                let index = self.index()?;
                related.subsidies =
                    select_related_subsidies(&selection, &candidates, index, self.config);
            }
            RelatedKind::Article => {
                related.articles =
                    self.weighted_candidates(&selection, &[ContentKind::Article])?;
            }
            RelatedKind::Guide => {
                related.guides = self.weighted_candidates(&selection, &[ContentKind::Guide])?;
            }
        }
        Ok(related)
    }

    fn weighted_candidates(
        &mut self,
        selection: &RelatedSelection,
        kinds: &[ContentKind],
    ) -> Result<Vec<RelatedItem>> {
        if selection.terms.categories.is_empty() {
            return Ok(Vec::new());
        }
        let candidates =
            self.store
                .related_candidates(selection.current, &selection.terms.categories, kinds)?;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        self.ensure_term_counts()?;
        let counts = self
            .term_counts
            .as_ref()
            .ok_or_else(|| anyhow!("term counts not memoized"))?;
        Ok(weigh_content_candidates(candidates, counts))
    }

    fn checklists_for(&mut self, ctx: &RequestContext) -> Result<Vec<Checklist>> {
        let Some(nid) = ctx.node else {
            return Ok(Vec::new());
        };
        let Some(node) = self.store.load_node(nid)? else {
            warn!(nid = nid.0, "checklists requested for unknown node");
            return Ok(Vec::new());
        };
        let selection = self.node_selection(&node)?;
        self.ensure_checklists()?;
        let checklists = self
            .checklists
            .as_ref()
            .ok_or_else(|| anyhow!("checklists not memoized"))?;
        Ok(select_checklists(&selection.terms.purposes, checklists))
    }

    fn alias(&mut self, nid: NodeId) -> Result<Option<String>> {
        let Some(node) = self.store.load_node(nid)? else {
            warn!(nid = nid.0, "alias requested for unknown node");
            return Ok(None);
        };
        let trail = self.node_trail(&node)?;
        Ok(build_alias(&trail, &node))
    }
}

/// Reads one cached derivative. Decode failures degrade to a rebuild,
/// matching the advisory cache contract.
fn cache_get_json<T: DeserializeOwned>(cache: &dyn CacheStore, key: &str) -> Option<T> {
    let raw = cache.get(key)?;
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(error) => {
            warn!(key, error = %error, "cached entry failed to decode, rebuilding");
            None
        }
    }
}

fn cache_set_json<T: Serialize>(cache: &mut dyn CacheStore, key: &str, value: &T) {
    match serde_json::to_string(value) {
        Ok(raw) => cache.set(key, &raw),
        Err(error) => warn!(key, error = %error, "cache entry failed to encode, skipping write"),
    }
}
