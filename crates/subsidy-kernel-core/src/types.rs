//! Shared data model: ids, taxonomy enums, content items, menu entries,
//! profiles, and the small value types the components exchange.

use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::KernelError;

/// CMS-assigned node id.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for NodeId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// CMS-assigned taxonomy term id.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct TermId(pub u32);

impl fmt::Display for TermId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for TermId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// CMS-assigned managed-file id (checklist PDFs).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct FileId(pub u32);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Taxonomy vocabularies the kernel reads, by CMS machine name.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Vocabulary {
    Region,
    Categories,
    SubsidyPurpose,
    SubsidyTypes,
    Provider,
    Toc,
}

impl Vocabulary {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Vocabulary::Region => "region",
            Vocabulary::Categories => "categories",
            Vocabulary::SubsidyPurpose => "subsidy_purpose",
            Vocabulary::SubsidyTypes => "subsidy_types",
            Vocabulary::Provider => "provider",
            Vocabulary::Toc => "toc",
        }
    }

    /// # Errors
    /// Returns [`KernelError::Validation`] for unknown machine names.
    pub fn parse(value: &str) -> Result<Self, KernelError> {
        match value {
            "region" => Ok(Vocabulary::Region),
            "categories" => Ok(Vocabulary::Categories),
            "subsidy_purpose" => Ok(Vocabulary::SubsidyPurpose),
            "subsidy_types" => Ok(Vocabulary::SubsidyTypes),
            "provider" => Ok(Vocabulary::Provider),
            "toc" => Ok(Vocabulary::Toc),
            other => Err(KernelError::Validation(format!("unknown vocabulary: {other}"))),
        }
    }
}

/// The five term-reference fields on subsidy nodes that feed the
/// relationship index. Declaration order is the field scan order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SubsidyField {
    SubsidyType,
    SubsidyRegion,
    SubsidyPurpose,
    ContentCategories,
    SubsidyProvider,
}

impl SubsidyField {
    pub const ALL: [SubsidyField; 5] = [
        SubsidyField::SubsidyType,
        SubsidyField::SubsidyRegion,
        SubsidyField::SubsidyPurpose,
        SubsidyField::ContentCategories,
        SubsidyField::SubsidyProvider,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SubsidyField::SubsidyType => "subsidy_type",
            SubsidyField::SubsidyRegion => "subsidy_region",
            SubsidyField::SubsidyPurpose => "subsidy_purpose",
            SubsidyField::ContentCategories => "content_categories",
            SubsidyField::SubsidyProvider => "subsidy_provider",
        }
    }

    /// # Errors
    /// Returns [`KernelError::Validation`] for unknown field names.
    pub fn parse(value: &str) -> Result<Self, KernelError> {
        match value {
            "subsidy_type" => Ok(SubsidyField::SubsidyType),
            "subsidy_region" => Ok(SubsidyField::SubsidyRegion),
            "subsidy_purpose" => Ok(SubsidyField::SubsidyPurpose),
            "content_categories" => Ok(SubsidyField::ContentCategories),
            "subsidy_provider" => Ok(SubsidyField::SubsidyProvider),
            other => Err(KernelError::Validation(format!("unknown subsidy field: {other}"))),
        }
    }

    /// The vocabulary a field's referenced terms belong to.
    #[must_use]
    pub fn vocabulary(&self) -> Vocabulary {
        match self {
            SubsidyField::SubsidyType => Vocabulary::SubsidyTypes,
            SubsidyField::SubsidyRegion => Vocabulary::Region,
            SubsidyField::SubsidyPurpose => Vocabulary::SubsidyPurpose,
            SubsidyField::ContentCategories => Vocabulary::Categories,
            SubsidyField::SubsidyProvider => Vocabulary::Provider,
        }
    }

    /// Whether hub pages may be anchored on this field (every field but
    /// the provider).
    #[must_use]
    pub fn anchors_hub_pages(&self) -> bool {
        !matches!(self, SubsidyField::SubsidyProvider)
    }
}

/// Content bundles the kernel distinguishes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Subsidy,
    SubsidyHub,
    MainSectionHub,
    SubSectionHub,
    Article,
    Guide,
    News,
    Page,
}

impl ContentKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Subsidy => "subsidy",
            ContentKind::SubsidyHub => "subsidy_hub",
            ContentKind::MainSectionHub => "main_section_hub",
            ContentKind::SubSectionHub => "sub_section_hub",
            ContentKind::Article => "article",
            ContentKind::Guide => "guide",
            ContentKind::News => "news",
            ContentKind::Page => "page",
        }
    }

    /// # Errors
    /// Returns [`KernelError::Validation`] for unknown bundle names.
    pub fn parse(value: &str) -> Result<Self, KernelError> {
        match value {
            "subsidy" => Ok(ContentKind::Subsidy),
            "subsidy_hub" => Ok(ContentKind::SubsidyHub),
            "main_section_hub" => Ok(ContentKind::MainSectionHub),
            "sub_section_hub" => Ok(ContentKind::SubSectionHub),
            "article" => Ok(ContentKind::Article),
            "guide" => Ok(ContentKind::Guide),
            "news" => Ok(ContentKind::News),
            "page" => Ok(ContentKind::Page),
            other => Err(KernelError::Validation(format!("unknown content kind: {other}"))),
        }
    }
}

/// Result buckets for related-content selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelatedKind {
    Subsidy,
    Article,
    Guide,
}

impl RelatedKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RelatedKind::Subsidy => "subsidy",
            RelatedKind::Article => "article",
            RelatedKind::Guide => "guide",
        }
    }

    /// # Errors
    /// Returns [`KernelError::Validation`] for unknown kinds.
    pub fn parse(value: &str) -> Result<Self, KernelError> {
        match value.to_lowercase().as_str() {
            "subsidy" => Ok(RelatedKind::Subsidy),
            "article" => Ok(RelatedKind::Article),
            "guide" => Ok(RelatedKind::Guide),
            other => Err(KernelError::Validation(format!("unknown related kind: {other}"))),
        }
    }
}

/// A taxonomy term as the store scans deliver it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Term {
    pub tid: TermId,
    pub vocabulary: Vocabulary,
    pub name: String,
    #[serde(default)]
    pub weight: i32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parents: Vec<TermId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_title: Option<String>,
}

/// Subsidy-specific fields carried by `subsidy` nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SubsidyFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subsidy_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default)]
    pub unavailable: bool,
}

/// A content node snapshot row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub nid: NodeId,
    pub kind: ContentKind,
    pub title: String,
    pub url: String,
    pub published: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toc_term: Option<TermId>,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub date: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subsidy: Option<SubsidyFields>,
}

impl ContentItem {
    /// Structural validation applied before a node enters the kernel.
    ///
    /// # Errors
    /// Returns [`KernelError::Validation`] when the title is empty, a
    /// published node has no url, or a subsidy node is missing its
    /// subsidy field block.
    pub fn validate(&self) -> Result<(), KernelError> {
        if self.title.trim().is_empty() {
            return Err(KernelError::Validation(format!(
                "node {} has an empty title",
                self.nid
            )));
        }
        if self.published && self.url.trim().is_empty() {
            return Err(KernelError::Validation(format!(
                "published node {} has an empty url",
                self.nid
            )));
        }
        if self.kind == ContentKind::Subsidy && self.subsidy.is_none() {
            return Err(KernelError::Validation(format!(
                "subsidy node {} is missing its subsidy fields",
                self.nid
            )));
        }
        Ok(())
    }

    /// Whether a subsidy node is flagged as currently unavailable.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        self.subsidy.as_ref().is_some_and(|fields| fields.unavailable)
    }
}

/// One node of a table-of-contents tree: a term, its depth below the
/// tree root, the content node attached to it (if any), and children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TocNode {
    pub term: Term,
    pub depth: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<ContentItem>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TocNode>,
}

impl TocNode {
    #[must_use]
    pub fn leaf(term: Term, depth: u8) -> Self {
        Self { term, depth, node: None, children: Vec::new() }
    }
}

/// A menu is a list of nav items with the occasional group separator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MenuEntry {
    NavItem(NavItem),
    Separator,
}

impl MenuEntry {
    #[must_use]
    pub fn as_nav(&self) -> Option<&NavItem> {
        match self {
            MenuEntry::NavItem(item) => Some(item),
            MenuEntry::Separator => None,
        }
    }

    pub fn as_nav_mut(&mut self) -> Option<&mut NavItem> {
        match self {
            MenuEntry::NavItem(item) => Some(item),
            MenuEntry::Separator => None,
        }
    }
}

/// A single navigation entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavItem {
    pub name: String,
    pub tid: TermId,
    pub url: Option<String>,
    pub fragment: Option<String>,
    pub vocab: Option<Vocabulary>,
    pub class: Option<String>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main: Option<Box<NavItem>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<MenuEntry>,
}

impl NavItem {
    /// A plain link entry; everything else starts out unset.
    #[must_use]
    pub fn link(name: impl Into<String>, tid: TermId, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tid,
            url: Some(url.into()),
            fragment: None,
            vocab: None,
            class: None,
            is_active: false,
            main: None,
            children: Vec::new(),
        }
    }

    /// An anchor-only entry (on-page table of contents).
    #[must_use]
    pub fn anchor(name: impl Into<String>, tid: TermId, fragment: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tid,
            url: None,
            fragment: Some(fragment.into()),
            vocab: None,
            class: None,
            is_active: false,
            main: None,
            children: Vec::new(),
        }
    }
}

/// One breadcrumb step. The last step of a trail drops its url.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breadcrumb {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// The ranked projection of one subsidy node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubsidyProfile {
    pub id: NodeId,
    pub url: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subsidy_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subsidy_provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subsidy_region: Option<String>,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub date: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subsidy_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default)]
    pub unavailable: bool,
}

/// A checklist document tagged with the purposes it serves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checklist {
    pub fid: FileId,
    pub title: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub purposes: Vec<TermId>,
}

/// A related article or guide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedItem {
    pub nid: NodeId,
    pub title: String,
    pub kind: ContentKind,
    pub url: String,
    #[serde(default)]
    pub weight: i64,
}

/// The category/purpose/region term ids set on one node, split by field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct NodeTermSelection {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<TermId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub purposes: Vec<TermId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub regions: Vec<TermId>,
}
