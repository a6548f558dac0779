//! Site configuration: the structural term and node ids the navigation
//! components are anchored on, loadable from YAML.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::types::{NodeId, TermId};
use crate::KernelError;

/// Structural anchors of the site. `Default` carries the production
/// values; deployments override them with a YAML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Content language, drives collation and slugs.
    pub language: String,
    /// The region term meaning "bundesweit" (nationwide).
    pub nationwide_term: TermId,
    /// Terms excluded from the relationship index entirely.
    pub noise_terms: Vec<TermId>,
    /// Root of the main navigation branch in the `toc` vocabulary.
    pub main_menu_term: TermId,
    /// Root of the meta navigation branch in the `toc` vocabulary.
    pub meta_menu_term: TermId,
    /// The toc term carrying the subsidy search page.
    pub subsidy_search_term: TermId,
    /// The toc term the subsidy hub pages hang below.
    pub subsidy_hubs_term: TermId,
    /// The toc term of the subsidy main section.
    pub subsidy_main_term: TermId,
    /// The subsidy search page node.
    pub subsidy_search_node: NodeId,
    /// Articles promoted into the main tree next to the section hubs.
    pub standalone_article_nodes: Vec<NodeId>,
    /// Category terms surface in the main menu only when their name
    /// starts with one of these prefixes (case-insensitive).
    pub menu_category_prefixes: Vec<String>,
    /// How many news nodes a teaser query returns.
    pub news_teaser_limit: u32,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            language: "de".to_string(),
            nationwide_term: TermId(371),
            noise_terms: vec![TermId(448), TermId(627)],
            main_menu_term: TermId(1407),
            meta_menu_term: TermId(1409),
            subsidy_search_term: TermId(1387),
            subsidy_hubs_term: TermId(1373),
            subsidy_main_term: TermId(1416),
            subsidy_search_node: NodeId(554),
            standalone_article_nodes: vec![NodeId(658)],
            menu_category_prefixes: vec![
                "alters".to_string(),
                "barriere".to_string(),
                "einbruch".to_string(),
                "erneuerbare".to_string(),
            ],
            news_teaser_limit: 4,
        }
    }
}

impl SiteConfig {
    /// # Errors
    /// Returns [`KernelError::Config`] when the file cannot be read, is
    /// not valid YAML, or fails [`SiteConfig::validate`].
    pub fn from_yaml_file(path: &Path) -> Result<Self, KernelError> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            KernelError::Config(format!("cannot read {}: {err}", path.display()))
        })?;
        Self::from_yaml_str(&raw)
    }

    /// # Errors
    /// Returns [`KernelError::Config`] on parse or validation failure.
    pub fn from_yaml_str(raw: &str) -> Result<Self, KernelError> {
        let config: SiteConfig = serde_yaml::from_str(raw)
            .map_err(|err| KernelError::Config(format!("invalid site config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// Returns [`KernelError::Config`] for zero ids or an empty category
    /// prefix list.
    pub fn validate(&self) -> Result<(), KernelError> {
        let tids = [
            ("nationwide_term", self.nationwide_term),
            ("main_menu_term", self.main_menu_term),
            ("meta_menu_term", self.meta_menu_term),
            ("subsidy_search_term", self.subsidy_search_term),
            ("subsidy_hubs_term", self.subsidy_hubs_term),
            ("subsidy_main_term", self.subsidy_main_term),
        ];
        for (name, tid) in tids {
            if tid.0 == 0 {
                return Err(KernelError::Config(format!("{name} must not be zero")));
            }
        }
        if self.subsidy_search_node.0 == 0 {
            return Err(KernelError::Config("subsidy_search_node must not be zero".to_string()));
        }
        if self.menu_category_prefixes.is_empty() {
            return Err(KernelError::Config(
                "menu_category_prefixes must not be empty".to_string(),
            ));
        }
        if self.language.trim().is_empty() {
            return Err(KernelError::Config("language must not be empty".to_string()));
        }
        Ok(())
    }

    /// Whether a category term name passes the main-menu prefix filter.
    #[must_use]
    pub fn category_prefix_match(&self, name: &str) -> bool {
        let lowered = name.to_lowercase();
        self.menu_category_prefixes
            .iter()
            .any(|prefix| lowered.starts_with(&prefix.to_lowercase()))
    }

    /// Whether a term is excluded from the relationship index.
    #[must_use]
    pub fn is_noise_term(&self, tid: TermId) -> bool {
        self.noise_terms.contains(&tid)
    }
}
