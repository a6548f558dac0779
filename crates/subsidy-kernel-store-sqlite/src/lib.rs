use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, DatabaseName, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subsidy_kernel_core::{
    Checklist, ContentItem, ContentKind, FileId, HubAssignment, NodeId, RelatedItem, SiteConfig,
    SubsidyField, SubsidyFields, Term, TermAssignment, TermId, Vocabulary,
};
use time::OffsetDateTime;
use tracing::warn;
use ulid::Ulid;

const LATEST_SCHEMA_VERSION: i64 = 2;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS content_nodes (
  nid INTEGER PRIMARY KEY,
  kind TEXT NOT NULL CHECK (kind IN ('subsidy','subsidy_hub','main_section_hub','sub_section_hub','article','guide','news','page')),
  title TEXT NOT NULL,
  url TEXT NOT NULL,
  published INTEGER NOT NULL CHECK (published IN (0,1)),
  toc_term INTEGER,
  date TEXT,
  subsidy_name TEXT,
  amount INTEGER,
  coverage TEXT,
  scope TEXT,
  unavailable TEXT
);

CREATE TABLE IF NOT EXISTS taxonomy_terms (
  tid INTEGER PRIMARY KEY,
  vocabulary TEXT NOT NULL CHECK (vocabulary IN ('region','categories','subsidy_purpose','subsidy_types','provider','toc')),
  name TEXT NOT NULL,
  weight INTEGER NOT NULL DEFAULT 0,
  path_title TEXT
);

CREATE TABLE IF NOT EXISTS term_parents (
  tid INTEGER NOT NULL,
  parent_tid INTEGER NOT NULL,
  PRIMARY KEY (tid, parent_tid),
  FOREIGN KEY (tid) REFERENCES taxonomy_terms(tid)
);

CREATE TABLE IF NOT EXISTS term_assignments (
  nid INTEGER NOT NULL,
  field TEXT NOT NULL CHECK (field IN ('subsidy_type','subsidy_region','subsidy_purpose','content_categories','subsidy_provider')),
  tid INTEGER NOT NULL,
  PRIMARY KEY (nid, field, tid),
  FOREIGN KEY (nid) REFERENCES content_nodes(nid),
  FOREIGN KEY (tid) REFERENCES taxonomy_terms(tid)
);

CREATE TABLE IF NOT EXISTS checklists (
  fid INTEGER PRIMARY KEY,
  title TEXT NOT NULL,
  url TEXT NOT NULL,
  purposes_json TEXT NOT NULL DEFAULT '[]'
);

CREATE TABLE IF NOT EXISTS cache_entries (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL,
  updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_content_nodes_kind ON content_nodes(kind);
CREATE INDEX IF NOT EXISTS idx_term_assignments_tid ON term_assignments(tid);
CREATE INDEX IF NOT EXISTS idx_taxonomy_terms_vocabulary ON taxonomy_terms(vocabulary);
";

const MIGRATION_002_CREATE_V2_TABLES_SQL: &str = r"
CREATE TABLE IF NOT EXISTS content_nodes_v2 (
  nid INTEGER PRIMARY KEY,
  kind TEXT NOT NULL CHECK (kind IN ('subsidy','subsidy_hub','main_section_hub','sub_section_hub','article','guide','news','page')),
  title TEXT NOT NULL,
  url TEXT NOT NULL,
  published INTEGER NOT NULL CHECK (published IN (0,1)),
  toc_term INTEGER,
  date TEXT,
  subsidy_name TEXT,
  amount INTEGER,
  coverage TEXT,
  scope TEXT,
  unavailable INTEGER NOT NULL DEFAULT 0 CHECK (unavailable IN (0,1))
);

CREATE TABLE IF NOT EXISTS term_assignments_v2 (
  nid INTEGER NOT NULL,
  field TEXT NOT NULL CHECK (field IN ('subsidy_type','subsidy_region','subsidy_purpose','content_categories','subsidy_provider')),
  tid INTEGER NOT NULL,
  PRIMARY KEY (nid, field, tid),
  FOREIGN KEY (nid) REFERENCES content_nodes_v2(nid),
  FOREIGN KEY (tid) REFERENCES taxonomy_terms(tid)
);

CREATE TABLE IF NOT EXISTS checklists_v2 (
  fid INTEGER PRIMARY KEY,
  title TEXT NOT NULL,
  url TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS checklist_purposes (
  fid INTEGER NOT NULL,
  tid INTEGER NOT NULL,
  PRIMARY KEY (fid, tid),
  FOREIGN KEY (fid) REFERENCES checklists_v2(fid),
  FOREIGN KEY (tid) REFERENCES taxonomy_terms(tid)
);
";

const MIGRATION_002_REPLACE_TABLES_SQL: &str = r"
DROP TABLE term_assignments;
DROP TABLE content_nodes;
DROP TABLE checklists;

ALTER TABLE content_nodes_v2 RENAME TO content_nodes;
ALTER TABLE term_assignments_v2 RENAME TO term_assignments;
ALTER TABLE checklists_v2 RENAME TO checklists;
";

const MIGRATION_002_FINAL_INDEXES_SQL: &str = r"
CREATE INDEX IF NOT EXISTS idx_content_nodes_kind ON content_nodes(kind);
CREATE INDEX IF NOT EXISTS idx_content_nodes_date ON content_nodes(date);
CREATE INDEX IF NOT EXISTS idx_term_assignments_tid ON term_assignments(tid);
CREATE INDEX IF NOT EXISTS idx_taxonomy_terms_vocabulary ON taxonomy_terms(vocabulary);
CREATE INDEX IF NOT EXISTS idx_checklist_purposes_tid ON checklist_purposes(tid);
";

pub struct SqliteStore {
    conn: Connection,
}

/// One raw `(nid, field, tid)` row of the `term_assignments` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentRow {
    pub nid: NodeId,
    pub field: SubsidyField,
    pub tid: TermId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
    pub inferred_from_legacy: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportFileDigest {
    pub path: String,
    pub sha256: String,
    pub records: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportManifest {
    pub schema_version: i64,
    pub export_id: String,
    pub created_at: String,
    pub files: Vec<ExportFileDigest>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported_terms: usize,
    pub skipped_existing_terms: usize,
    pub imported_nodes: usize,
    pub skipped_existing_nodes: usize,
    pub imported_assignments: usize,
    pub skipped_existing_assignments: usize,
    pub imported_checklists: usize,
    pub skipped_existing_checklists: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForeignKeyViolation {
    pub table: String,
    pub rowid: i64,
    pub parent: String,
    pub fk_index: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub quick_check_ok: bool,
    pub quick_check_message: String,
    pub foreign_key_violations: Vec<ForeignKeyViolation>,
    pub schema_status: SchemaStatus,
}

/// Advisory cache port. Read and write failures degrade to misses;
/// callers rebuild from the snapshot tables.
pub trait CacheStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str);
}

/// In-memory cache for tests and one-shot runs.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: BTreeMap<String, String>,
}

impl CacheStore for MemoryCache {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) {
        self.entries.insert(key.to_string(), value.to_string());
    }
}

impl CacheStore for SqliteStore {
    fn get(&self, key: &str) -> Option<String> {
        let result = self
            .conn
            .query_row(
                "SELECT value FROM cache_entries WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional();

        match result {
            Ok(value) => value,
            Err(error) => {
                warn!(key, error = %error, "cache read failed, treating as miss");
                None
            }
        }
    }

    fn set(&mut self, key: &str, value: &str) {
        let updated_at = match now_rfc3339() {
            Ok(stamp) => stamp,
            Err(error) => {
                warn!(key, error = %error, "cache write skipped");
                return;
            }
        };

        let result = self.conn.execute(
            "INSERT INTO cache_entries(key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, updated_at],
        );
        if let Err(error) = result {
            warn!(key, error = %error, "cache write failed");
        }
    }
}

impl SqliteStore {
    /// Open a SQLite-backed content snapshot and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let (current_version, inferred_from_legacy) = detect_effective_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
            inferred_from_legacy,
        })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when migration bootstrapping or any migration step fails.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let mut version = current_schema_version(&self.conn)?;

        if version == 0 {
            version = self.bootstrap_schema_version()?;
        }

        if version < 2 {
            self.apply_migration_2()?;
            version = current_schema_version(&self.conn)?;
        }

        if version != LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        Ok(())
    }

    fn bootstrap_schema_version(&self) -> Result<i64> {
        let has_content_nodes = table_exists(&self.conn, "content_nodes")?;

        if !has_content_nodes {
            apply_migration_1(&self.conn)?;
            return Ok(1);
        }

        if table_exists(&self.conn, "checklist_purposes")? {
            // Snapshot already in v2 shape but missing migration records.
            record_schema_version(&self.conn, 1)?;
            record_schema_version(&self.conn, 2)?;
            return Ok(2);
        }

        if table_has_column(&self.conn, "checklists", "purposes_json")? {
            // Legacy v1 snapshot; mark version 1 and run the standard v2 upgrade.
            record_schema_version(&self.conn, 1)?;
            return Ok(1);
        }

        Err(anyhow!(
            "database schema is invalid: content_nodes exists without a recognizable checklist layout"
        ))
    }

    fn apply_migration_2(&mut self) -> Result<()> {
        if table_exists(&self.conn, "checklist_purposes")? {
            record_schema_version(&self.conn, 2)?;
            return Ok(());
        }

        if !table_has_column(&self.conn, "checklists", "purposes_json")? {
            return Err(anyhow!(
                "cannot apply migration v2: legacy checklists.purposes_json column is missing"
            ));
        }

        let tx = self.conn.transaction().context("failed to start migration v2 transaction")?;

        tx.execute_batch(MIGRATION_002_CREATE_V2_TABLES_SQL)
            .context("failed to create v2 staging tables")?;

        copy_nodes_to_v2(&tx)?;
        copy_assignments_to_v2(&tx)?;
        copy_checklists_to_v2(&tx)?;

        tx.execute_batch(MIGRATION_002_REPLACE_TABLES_SQL)
            .context("failed to replace legacy tables with v2 tables")?;
        tx.execute_batch(MIGRATION_002_FINAL_INDEXES_SQL).context("failed to create v2 indexes")?;

        let now = now_rfc3339()?;
        tx.execute(
            "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
            params![2_i64, now],
        )
        .context("failed to record migration version 2")?;

        tx.commit().context("failed to commit migration v2")?;
        Ok(())
    }

    /// Persist one taxonomy term with its parent links.
    ///
    /// # Errors
    /// Returns an error when any write in the transaction fails.
    pub fn write_term(&mut self, term: &Term) -> Result<()> {
        let tx = self.conn.transaction().context("failed to start transaction")?;

        tx.execute(
            "INSERT INTO taxonomy_terms(tid, vocabulary, name, weight, path_title)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                term.tid.0,
                term.vocabulary.as_str(),
                term.name,
                term.weight,
                term.path_title,
            ],
        )
        .context("failed to insert taxonomy term")?;

        for parent in &term.parents {
            tx.execute(
                "INSERT INTO term_parents(tid, parent_tid) VALUES (?1, ?2)",
                params![term.tid.0, parent.0],
            )
            .context("failed to insert term parent")?;
        }

        tx.commit().context("failed to commit term transaction")?;
        Ok(())
    }

    /// Persist one validated content node.
    ///
    /// # Errors
    /// Returns an error when validation fails or the insert fails.
    pub fn write_node(&self, node: &ContentItem) -> Result<()> {
        node.validate().map_err(|err| anyhow!("node validation failed: {err}"))?;

        let subsidy = node.subsidy.clone().unwrap_or_default();
        let date = match node.date {
            Some(value) => Some(rfc3339(value)?),
            None => None,
        };

        self.conn
            .execute(
                "INSERT INTO content_nodes(
                    nid, kind, title, url, published, toc_term, date,
                    subsidy_name, amount, coverage, scope, unavailable
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    node.nid.0,
                    node.kind.as_str(),
                    node.title,
                    node.url,
                    node.published,
                    node.toc_term.map(|tid| tid.0),
                    date,
                    subsidy.subsidy_name,
                    subsidy.amount,
                    subsidy.coverage,
                    subsidy.scope,
                    subsidy.unavailable,
                ],
            )
            .context("failed to insert content node")?;
        Ok(())
    }

    /// Persist one term-reference row of a node field.
    ///
    /// # Errors
    /// Returns an error when the insert fails, including foreign key failures
    /// for unknown nodes or terms.
    pub fn write_assignment(&self, assignment: &AssignmentRow) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO term_assignments(nid, field, tid) VALUES (?1, ?2, ?3)",
                params![assignment.nid.0, assignment.field.as_str(), assignment.tid.0],
            )
            .context("failed to insert term assignment")?;
        Ok(())
    }

    /// Persist one checklist with its purpose terms.
    ///
    /// # Errors
    /// Returns an error when any write in the transaction fails.
    pub fn write_checklist(&mut self, checklist: &Checklist) -> Result<()> {
        let tx = self.conn.transaction().context("failed to start transaction")?;

        tx.execute(
            "INSERT INTO checklists(fid, title, url) VALUES (?1, ?2, ?3)",
            params![checklist.fid.0, checklist.title, checklist.url],
        )
        .context("failed to insert checklist")?;

        for purpose in &checklist.purposes {
            tx.execute(
                "INSERT INTO checklist_purposes(fid, tid) VALUES (?1, ?2)",
                params![checklist.fid.0, purpose.0],
            )
            .context("failed to insert checklist purpose")?;
        }

        tx.commit().context("failed to commit checklist transaction")?;
        Ok(())
    }

    /// The relationship-index input: term references of published subsidy
    /// nodes joined with term labels, noise terms excluded, in canonical
    /// `(field, tid, nid)` order.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn scan_term_assignments(&self, config: &SiteConfig) -> Result<Vec<TermAssignment>> {
        let mut stmt = self.conn.prepare(
            "SELECT a.field, a.nid, a.tid, t.name
             FROM term_assignments a
             JOIN content_nodes n ON n.nid = a.nid
             JOIN taxonomy_terms t ON t.tid = a.tid
             WHERE n.kind = 'subsidy' AND n.published = 1
             ORDER BY a.nid ASC, a.field ASC, a.tid ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, u32>(1)?,
                row.get::<_, u32>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut assignments = Vec::new();
        for row in rows {
            let (field_raw, nid, tid, label) = row?;
            let tid = TermId(tid);
            if config.is_noise_term(tid) {
                continue;
            }
            assignments.push(TermAssignment {
                field: SubsidyField::parse(&field_raw)?,
                nid: NodeId(nid),
                tid,
                label,
            });
        }

        assignments.sort_by(|a, b| (a.field, a.tid, a.nid).cmp(&(b.field, b.tid, b.nid)));
        Ok(assignments)
    }

    /// The `toc` vocabulary with parents and path titles, weight-ordered.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn scan_toc_terms(&self) -> Result<Vec<Term>> {
        self.query_terms(
            "SELECT tid, vocabulary, name, weight, path_title
             FROM taxonomy_terms
             WHERE vocabulary = 'toc'
             ORDER BY weight ASC, tid ASC",
        )
    }

    /// Published nodes of the given bundles, nid-ordered.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn scan_nodes(&self, kinds: &[ContentKind]) -> Result<Vec<ContentItem>> {
        if kinds.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT nid, kind, title, url, published, toc_term, date,
                    subsidy_name, amount, coverage, scope, unavailable
             FROM content_nodes
             WHERE published = 1 AND kind IN ({})
             ORDER BY nid ASC",
            sql_placeholders(kinds.len())
        );
        let values = kinds
            .iter()
            .map(|kind| Value::from(kind.as_str().to_string()))
            .collect::<Vec<_>>();
        self.query_nodes(&sql, params_from_iter(values))
    }

    /// One node by id, published or not.
    ///
    /// # Errors
    /// Returns an error when the row cannot be read or decoded.
    pub fn load_node(&self, nid: NodeId) -> Result<Option<ContentItem>> {
        let nodes = self.query_nodes(
            "SELECT nid, kind, title, url, published, toc_term, date,
                    subsidy_name, amount, coverage, scope, unavailable
             FROM content_nodes
             WHERE nid = ?1",
            params![nid.0],
        )?;
        Ok(nodes.into_iter().next())
    }

    /// The node→toc-term map over published nodes.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read.
    pub fn node_toc_map(&self) -> Result<BTreeMap<NodeId, TermId>> {
        let mut stmt = self.conn.prepare(
            "SELECT nid, toc_term FROM content_nodes
             WHERE published = 1 AND toc_term IS NOT NULL
             ORDER BY nid ASC",
        )?;
        let rows =
            stmt.query_map([], |row| Ok((row.get::<_, u32>(0)?, row.get::<_, u32>(1)?)))?;

        let mut map = BTreeMap::new();
        for row in rows {
            let (nid, tid) = row?;
            map.insert(NodeId(nid), TermId(tid));
        }
        Ok(map)
    }

    /// The raw `(field, tid)` rows of one node, in field scan order.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn node_assignments(&self, nid: NodeId) -> Result<Vec<AssignmentRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT field, tid FROM term_assignments WHERE nid = ?1 ORDER BY field ASC, tid ASC",
        )?;
        let rows = stmt.query_map(params![nid.0], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?))
        })?;

        let mut assignments = Vec::new();
        for row in rows {
            let (field_raw, tid) = row?;
            assignments.push(AssignmentRow {
                nid,
                field: SubsidyField::parse(&field_raw)?,
                tid: TermId(tid),
            });
        }
        assignments.sort_by(|a, b| (a.field, a.tid).cmp(&(b.field, b.tid)));
        Ok(assignments)
    }

    /// Assignment rows of published subsidy hub nodes joined with term
    /// labels, in `(nid, field, tid)` order.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn scan_hub_assignments(&self) -> Result<Vec<HubAssignment>> {
        let mut stmt = self.conn.prepare(
            "SELECT a.nid, a.field, a.tid, t.name
             FROM term_assignments a
             JOIN content_nodes n ON n.nid = a.nid
             JOIN taxonomy_terms t ON t.tid = a.tid
             WHERE n.kind = 'subsidy_hub' AND n.published = 1
             ORDER BY a.nid ASC, a.field ASC, a.tid ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, u32>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, u32>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut assignments = Vec::new();
        for row in rows {
            let (nid, field_raw, tid, label) = row?;
            assignments.push(HubAssignment {
                nid: NodeId(nid),
                field: SubsidyField::parse(&field_raw)?,
                tid: TermId(tid),
                label,
            });
        }
        assignments.sort_by(|a, b| (a.nid, a.field, a.tid).cmp(&(b.nid, b.field, b.tid)));
        Ok(assignments)
    }

    /// Term counts per published node of the given bundles, used to weigh
    /// related-content candidates.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read.
    pub fn count_terms_per_node(&self, kinds: &[ContentKind]) -> Result<BTreeMap<NodeId, i64>> {
        if kinds.is_empty() {
            return Ok(BTreeMap::new());
        }

        let sql = format!(
            "SELECT a.nid, COUNT(*)
             FROM term_assignments a
             JOIN content_nodes n ON n.nid = a.nid
             WHERE n.published = 1 AND n.kind IN ({})
             GROUP BY a.nid",
            sql_placeholders(kinds.len())
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params_from_iter(kinds.iter().map(|kind| kind.as_str())),
            |row| Ok((row.get::<_, u32>(0)?, row.get::<_, i64>(1)?)),
        )?;

        let mut counts = BTreeMap::new();
        for row in rows {
            let (nid, count) = row?;
            counts.insert(NodeId(nid), count);
        }
        Ok(counts)
    }

    /// Published nodes of the given bundles carrying any of the given
    /// category terms, current node excluded, deduplicated, title-ordered.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn related_candidates(
        &self,
        current: NodeId,
        category_tids: &[TermId],
        kinds: &[ContentKind],
    ) -> Result<Vec<RelatedItem>> {
        if category_tids.is_empty() || kinds.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT DISTINCT n.nid, n.title, n.kind, n.url
             FROM content_nodes n
             JOIN term_assignments a ON a.nid = n.nid
             WHERE n.published = 1 AND n.nid <> ?
               AND n.kind IN ({})
               AND a.tid IN ({})
             ORDER BY n.title ASC, n.nid ASC",
            sql_placeholders(kinds.len()),
            sql_placeholders(category_tids.len())
        );

        let mut values: Vec<Value> = Vec::with_capacity(1 + kinds.len() + category_tids.len());
        values.push(Value::from(i64::from(current.0)));
        for kind in kinds {
            values.push(Value::from(kind.as_str().to_string()));
        }
        for tid in category_tids {
            values.push(Value::from(i64::from(tid.0)));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), |row| {
            Ok((
                row.get::<_, u32>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut items = Vec::new();
        for row in rows {
            let (nid, title, kind_raw, url) = row?;
            items.push(RelatedItem {
                nid: NodeId(nid),
                title,
                kind: ContentKind::parse(&kind_raw)?,
                url,
                weight: 0,
            });
        }
        Ok(items)
    }

    /// The newest published news nodes, dated entries first.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn recent_news(&self, limit: u32) -> Result<Vec<ContentItem>> {
        self.query_nodes(
            "SELECT nid, kind, title, url, published, toc_term, date,
                    subsidy_name, amount, coverage, scope, unavailable
             FROM content_nodes
             WHERE published = 1 AND kind = 'news'
             ORDER BY date IS NULL ASC, date DESC, nid DESC
             LIMIT ?1",
            params![limit],
        )
    }

    /// All published news nodes, dated entries first.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn all_news(&self) -> Result<Vec<ContentItem>> {
        self.query_nodes(
            "SELECT nid, kind, title, url, published, toc_term, date,
                    subsidy_name, amount, coverage, scope, unavailable
             FROM content_nodes
             WHERE published = 1 AND kind = 'news'
             ORDER BY date IS NULL ASC, date DESC, nid DESC",
            [],
        )
    }

    /// Every checklist with its purpose terms, fid-ordered.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read.
    pub fn all_checklists(&self) -> Result<Vec<Checklist>> {
        let purposes = self.load_checklist_purposes()?;
        let mut stmt =
            self.conn.prepare("SELECT fid, title, url FROM checklists ORDER BY fid ASC")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, u32>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
        })?;

        let mut checklists = Vec::new();
        for row in rows {
            let (fid, title, url) = row?;
            checklists.push(Checklist {
                fid: FileId(fid),
                title,
                url,
                purposes: purposes.get(&FileId(fid)).cloned().unwrap_or_default(),
            });
        }
        Ok(checklists)
    }

    /// Export the snapshot as deterministic NDJSON plus manifest.
    ///
    /// # Errors
    /// Returns an error when export files cannot be created, written, or serialized.
    pub fn export_snapshot(&self, out_dir: &Path) -> Result<ExportManifest> {
        fs::create_dir_all(out_dir)
            .with_context(|| format!("failed to create export directory {}", out_dir.display()))?;

        let terms = self.list_terms()?;
        let nodes = self.list_nodes()?;
        let assignments = self.list_assignments()?;
        let checklists = self.all_checklists()?;

        let terms_digest = write_ndjson_file(&out_dir.join("terms.ndjson"), &terms)?;
        let nodes_digest = write_ndjson_file(&out_dir.join("nodes.ndjson"), &nodes)?;
        let assignments_digest =
            write_ndjson_file(&out_dir.join("assignments.ndjson"), &assignments)?;
        let checklists_digest =
            write_ndjson_file(&out_dir.join("checklists.ndjson"), &checklists)?;

        let manifest = ExportManifest {
            schema_version: LATEST_SCHEMA_VERSION,
            export_id: Ulid::new().to_string(),
            created_at: now_rfc3339()?,
            files: vec![
                ExportFileDigest {
                    path: "terms.ndjson".to_string(),
                    sha256: terms_digest.0,
                    records: terms_digest.1,
                },
                ExportFileDigest {
                    path: "nodes.ndjson".to_string(),
                    sha256: nodes_digest.0,
                    records: nodes_digest.1,
                },
                ExportFileDigest {
                    path: "assignments.ndjson".to_string(),
                    sha256: assignments_digest.0,
                    records: assignments_digest.1,
                },
                ExportFileDigest {
                    path: "checklists.ndjson".to_string(),
                    sha256: checklists_digest.0,
                    records: checklists_digest.1,
                },
            ],
        };

        let manifest_path = out_dir.join("manifest.json");
        let manifest_json =
            serde_json::to_vec_pretty(&manifest).context("failed to serialize export manifest")?;
        fs::write(&manifest_path, manifest_json).with_context(|| {
            format!("failed to write export manifest {}", manifest_path.display())
        })?;

        Ok(manifest)
    }

    /// Import an exported snapshot directory into this database.
    ///
    /// # Errors
    /// Returns an error when migration, manifest validation, duplicate
    /// handling, or writes fail.
    pub fn import_snapshot(&mut self, in_dir: &Path, skip_existing: bool) -> Result<ImportSummary> {
        self.migrate()?;
        let manifest_path = in_dir.join("manifest.json");
        let manifest = read_export_manifest(&manifest_path)?;
        validate_import_manifest(in_dir, &manifest)?;

        let mut summary = ImportSummary::default();

        for term in read_ndjson_file::<Term>(&in_dir.join("terms.ndjson"))? {
            if self.term_exists(term.tid)? {
                if skip_existing {
                    summary.skipped_existing_terms += 1;
                    continue;
                }
                return Err(anyhow!("term already exists: {}", term.tid));
            }
            self.write_term(&term)?;
            summary.imported_terms += 1;
        }

        for node in read_ndjson_file::<ContentItem>(&in_dir.join("nodes.ndjson"))? {
            if self.node_exists(node.nid)? {
                if skip_existing {
                    summary.skipped_existing_nodes += 1;
                    continue;
                }
                return Err(anyhow!("node already exists: {}", node.nid));
            }
            self.write_node(&node)?;
            summary.imported_nodes += 1;
        }

        for assignment in read_ndjson_file::<AssignmentRow>(&in_dir.join("assignments.ndjson"))? {
            if self.assignment_exists(&assignment)? {
                if skip_existing {
                    summary.skipped_existing_assignments += 1;
                    continue;
                }
                return Err(anyhow!(
                    "assignment already exists: node {} field {} term {}",
                    assignment.nid,
                    assignment.field.as_str(),
                    assignment.tid
                ));
            }
            self.write_assignment(&assignment)?;
            summary.imported_assignments += 1;
        }

        for checklist in read_ndjson_file::<Checklist>(&in_dir.join("checklists.ndjson"))? {
            if self.checklist_exists(checklist.fid)? {
                if skip_existing {
                    summary.skipped_existing_checklists += 1;
                    continue;
                }
                return Err(anyhow!("checklist already exists: {}", checklist.fid));
            }
            self.write_checklist(&checklist)?;
            summary.imported_checklists += 1;
        }

        Ok(summary)
    }

    /// Create a `SQLite` backup file of the current main database.
    ///
    /// # Errors
    /// Returns an error when backup directories cannot be created or backup fails.
    pub fn backup_database(&self, out_file: &Path) -> Result<()> {
        if let Some(parent) = out_file.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create parent directory for backup file {}", out_file.display())
            })?;
        }

        self.conn
            .backup(DatabaseName::Main, out_file, None)
            .with_context(|| format!("failed to create sqlite backup at {}", out_file.display()))
    }

    /// Restore this database from a `SQLite` backup file, then migrate to latest.
    ///
    /// # Errors
    /// Returns an error when the backup file is missing, restore fails, or migrations fail.
    pub fn restore_database(&mut self, in_file: &Path) -> Result<()> {
        if !in_file.exists() {
            return Err(anyhow!("backup file does not exist: {}", in_file.display()));
        }

        self.conn
            .restore(DatabaseName::Main, in_file, None::<fn(rusqlite::backup::Progress)>)
            .with_context(|| {
                format!("failed to restore sqlite backup from {}", in_file.display())
            })?;

        self.migrate()?;
        Ok(())
    }

    /// Run quick-check, foreign-key-check, and schema status health probes.
    ///
    /// # Errors
    /// Returns an error when any integrity probe query fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let quick_check_message: String = self
            .conn
            .query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0))
            .context("failed to run PRAGMA quick_check")?;

        let mut stmt = self
            .conn
            .prepare("PRAGMA foreign_key_check")
            .context("failed to prepare PRAGMA foreign_key_check")?;
        let rows = stmt.query_map([], |row| {
            Ok(ForeignKeyViolation {
                table: row.get(0)?,
                rowid: row.get(1)?,
                parent: row.get(2)?,
                fk_index: row.get(3)?,
            })
        })?;

        let mut foreign_key_violations = Vec::new();
        for row in rows {
            foreign_key_violations.push(row?);
        }

        let schema_status = self.schema_status()?;
        Ok(IntegrityReport {
            quick_check_ok: quick_check_message == "ok",
            quick_check_message,
            foreign_key_violations,
            schema_status,
        })
    }

    fn query_terms(&self, sql: &str) -> Result<Vec<Term>> {
        let parents = self.load_term_parents()?;
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, u32>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i32>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })?;

        let mut terms = Vec::new();
        for row in rows {
            let (tid, vocabulary_raw, name, weight, path_title) = row?;
            terms.push(Term {
                tid: TermId(tid),
                vocabulary: Vocabulary::parse(&vocabulary_raw)?,
                name,
                weight,
                parents: parents.get(&TermId(tid)).cloned().unwrap_or_default(),
                path_title,
            });
        }
        Ok(terms)
    }

    fn query_nodes<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<ContentItem>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, |row| {
            Ok(RawNodeRow {
                nid: row.get(0)?,
                kind: row.get(1)?,
                title: row.get(2)?,
                url: row.get(3)?,
                published: row.get(4)?,
                toc_term: row.get(5)?,
                date: row.get(6)?,
                subsidy_name: row.get(7)?,
                amount: row.get(8)?,
                coverage: row.get(9)?,
                scope: row.get(10)?,
                unavailable: row.get(11)?,
            })
        })?;

        let mut nodes = Vec::new();
        for row in rows {
            nodes.push(node_from_row(row?)?);
        }
        Ok(nodes)
    }

    fn load_term_parents(&self) -> Result<BTreeMap<TermId, Vec<TermId>>> {
        let mut stmt = self
            .conn
            .prepare("SELECT tid, parent_tid FROM term_parents ORDER BY tid ASC, parent_tid ASC")?;
        let rows =
            stmt.query_map([], |row| Ok((row.get::<_, u32>(0)?, row.get::<_, u32>(1)?)))?;

        let mut parents: BTreeMap<TermId, Vec<TermId>> = BTreeMap::new();
        for row in rows {
            let (tid, parent_tid) = row?;
            parents.entry(TermId(tid)).or_default().push(TermId(parent_tid));
        }
        Ok(parents)
    }

    fn load_checklist_purposes(&self) -> Result<BTreeMap<FileId, Vec<TermId>>> {
        let mut stmt = self
            .conn
            .prepare("SELECT fid, tid FROM checklist_purposes ORDER BY fid ASC, tid ASC")?;
        let rows =
            stmt.query_map([], |row| Ok((row.get::<_, u32>(0)?, row.get::<_, u32>(1)?)))?;

        let mut purposes: BTreeMap<FileId, Vec<TermId>> = BTreeMap::new();
        for row in rows {
            let (fid, tid) = row?;
            purposes.entry(FileId(fid)).or_default().push(TermId(tid));
        }
        Ok(purposes)
    }

    fn list_terms(&self) -> Result<Vec<Term>> {
        self.query_terms(
            "SELECT tid, vocabulary, name, weight, path_title
             FROM taxonomy_terms
             ORDER BY tid ASC",
        )
    }

    fn list_nodes(&self) -> Result<Vec<ContentItem>> {
        self.query_nodes(
            "SELECT nid, kind, title, url, published, toc_term, date,
                    subsidy_name, amount, coverage, scope, unavailable
             FROM content_nodes
             ORDER BY nid ASC",
            [],
        )
    }

    fn list_assignments(&self) -> Result<Vec<AssignmentRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT nid, field, tid FROM term_assignments ORDER BY nid ASC, field ASC, tid ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, u32>(0)?, row.get::<_, String>(1)?, row.get::<_, u32>(2)?))
        })?;

        let mut assignments = Vec::new();
        for row in rows {
            let (nid, field_raw, tid) = row?;
            assignments.push(AssignmentRow {
                nid: NodeId(nid),
                field: SubsidyField::parse(&field_raw)?,
                tid: TermId(tid),
            });
        }
        Ok(assignments)
    }

    fn term_exists(&self, tid: TermId) -> Result<bool> {
        let exists = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM taxonomy_terms WHERE tid = ?1)",
            params![tid.0],
            |row| row.get::<_, i64>(0),
        )?;
        Ok(exists == 1)
    }

    fn node_exists(&self, nid: NodeId) -> Result<bool> {
        let exists = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM content_nodes WHERE nid = ?1)",
            params![nid.0],
            |row| row.get::<_, i64>(0),
        )?;
        Ok(exists == 1)
    }

    fn assignment_exists(&self, assignment: &AssignmentRow) -> Result<bool> {
        let exists = self.conn.query_row(
            "SELECT EXISTS(
                SELECT 1 FROM term_assignments WHERE nid = ?1 AND field = ?2 AND tid = ?3
             )",
            params![assignment.nid.0, assignment.field.as_str(), assignment.tid.0],
            |row| row.get::<_, i64>(0),
        )?;
        Ok(exists == 1)
    }

    fn checklist_exists(&self, fid: FileId) -> Result<bool> {
        let exists = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM checklists WHERE fid = ?1)",
            params![fid.0],
            |row| row.get::<_, i64>(0),
        )?;
        Ok(exists == 1)
    }
}

#[derive(Debug)]
struct RawNodeRow {
    nid: u32,
    kind: String,
    title: String,
    url: String,
    published: bool,
    toc_term: Option<u32>,
    date: Option<String>,
    subsidy_name: Option<String>,
    amount: Option<i64>,
    coverage: Option<String>,
    scope: Option<String>,
    unavailable: bool,
}

#[derive(Debug)]
struct LegacyNodeRow {
    nid: i64,
    kind: String,
    title: String,
    url: String,
    published: i64,
    toc_term: Option<i64>,
    date: Option<String>,
    subsidy_name: Option<String>,
    amount: Option<i64>,
    coverage: Option<String>,
    scope: Option<String>,
    unavailable: Option<String>,
}

fn node_from_row(row: RawNodeRow) -> Result<ContentItem> {
    let kind = ContentKind::parse(&row.kind)?;
    let date = match row.date {
        Some(raw) => Some(parse_rfc3339(&raw)?),
        None => None,
    };
    let subsidy = if kind == ContentKind::Subsidy {
        Some(SubsidyFields {
            subsidy_name: row.subsidy_name,
            amount: row.amount,
            coverage: row.coverage,
            scope: row.scope,
            unavailable: row.unavailable,
        })
    } else {
        None
    };

    Ok(ContentItem {
        nid: NodeId(row.nid),
        kind,
        title: row.title,
        url: row.url,
        published: row.published,
        toc_term: row.toc_term.map(TermId),
        date,
        subsidy,
    })
}

fn apply_migration_1(conn: &Connection) -> Result<()> {
    conn.execute_batch(MIGRATION_001_SQL).context("failed to apply migration v1")?;
    record_schema_version(conn, 1)?;
    Ok(())
}

fn copy_nodes_to_v2(tx: &rusqlite::Transaction<'_>) -> Result<()> {
    let mut stmt = tx.prepare(
        "SELECT nid, kind, title, url, published, toc_term, date,
                subsidy_name, amount, coverage, scope, unavailable
         FROM content_nodes
         ORDER BY nid ASC",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(LegacyNodeRow {
            nid: row.get(0)?,
            kind: row.get(1)?,
            title: row.get(2)?,
            url: row.get(3)?,
            published: row.get(4)?,
            toc_term: row.get(5)?,
            date: row.get(6)?,
            subsidy_name: row.get(7)?,
            amount: row.get(8)?,
            coverage: row.get(9)?,
            scope: row.get(10)?,
            unavailable: row.get(11)?,
        })
    })?;

    for row in rows {
        let row = row?;
        tx.execute(
            "INSERT INTO content_nodes_v2(
                nid, kind, title, url, published, toc_term, date,
                subsidy_name, amount, coverage, scope, unavailable
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                row.nid,
                row.kind,
                row.title,
                row.url,
                row.published,
                row.toc_term,
                row.date,
                row.subsidy_name,
                row.amount,
                row.coverage,
                row.scope,
                i64::from(legacy_truthy(row.unavailable.as_deref())),
            ],
        )
        .context("failed to copy content node into v2")?;
    }

    Ok(())
}

fn copy_assignments_to_v2(tx: &rusqlite::Transaction<'_>) -> Result<()> {
    let mut stmt = tx.prepare(
        "SELECT nid, field, tid FROM term_assignments ORDER BY nid ASC, field ASC, tid ASC",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, i64>(2)?))
    })?;

    for row in rows {
        let (nid, field, tid) = row?;
        tx.execute(
            "INSERT INTO term_assignments_v2(nid, field, tid) VALUES (?1, ?2, ?3)",
            params![nid, field, tid],
        )
        .context("failed to copy term assignment into v2")?;
    }

    Ok(())
}

fn copy_checklists_to_v2(tx: &rusqlite::Transaction<'_>) -> Result<()> {
    let mut stmt =
        tx.prepare("SELECT fid, title, url, purposes_json FROM checklists ORDER BY fid ASC")?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
        ))
    })?;

    for row in rows {
        let (fid, title, url, purposes_json) = row?;
        tx.execute(
            "INSERT INTO checklists_v2(fid, title, url) VALUES (?1, ?2, ?3)",
            params![fid, title, url],
        )
        .context("failed to copy checklist into v2")?;

        let purposes: Vec<u32> = serde_json::from_str(&purposes_json)
            .with_context(|| format!("failed to parse purposes for checklist {fid}"))?;
        for tid in purposes {
            tx.execute(
                "INSERT INTO checklist_purposes(fid, tid) VALUES (?1, ?2)",
                params![fid, tid],
            )
            .context("failed to copy checklist purpose into v2")?;
        }
    }

    Ok(())
}

fn legacy_truthy(value: Option<&str>) -> bool {
    value.is_some_and(|raw| matches!(raw.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
}

fn sql_placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn table_exists(conn: &Connection, table_name: &str) -> Result<bool> {
    let exists = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            params![table_name],
            |row| row.get::<_, i64>(0),
        )
        .with_context(|| format!("failed to check if table exists: {table_name}"))?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    if !table_exists(conn, table)? {
        return Ok(false);
    }

    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .with_context(|| format!("failed to inspect table_info for {table}"))?;
    let mut rows = stmt.query([])?;

    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }

    Ok(false)
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn detect_effective_schema_version(conn: &Connection) -> Result<(i64, bool)> {
    let recorded = current_schema_version(conn)?;
    if recorded > 0 {
        return Ok((recorded, false));
    }

    if !table_exists(conn, "content_nodes")? {
        return Ok((0, false));
    }

    if table_exists(conn, "checklist_purposes")? {
        return Ok((2, true));
    }

    if table_has_column(conn, "checklists", "purposes_json")? {
        return Ok((1, true));
    }

    Err(anyhow!(
        "database schema is invalid: content_nodes exists without a recognizable checklist layout"
    ))
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = now_rfc3339()?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn now_rfc3339() -> Result<String> {
    rfc3339(OffsetDateTime::now_utc())
}

fn rfc3339(value: OffsetDateTime) -> Result<String> {
    value
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}

fn parse_rfc3339(value: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .with_context(|| format!("invalid RFC3339 timestamp: {value}"))
}

fn write_ndjson_file<T: Serialize>(path: &Path, values: &[T]) -> Result<(String, usize)> {
    let file = File::create(path)
        .with_context(|| format!("failed to create export file {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    let mut hasher = Sha256::new();

    for value in values {
        let line = serde_json::to_string(value).context("failed to serialize NDJSON row")?;
        writer
            .write_all(line.as_bytes())
            .with_context(|| format!("failed to write export file {}", path.display()))?;
        writer
            .write_all(b"\n")
            .with_context(|| format!("failed to write export file {}", path.display()))?;
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }

    writer.flush().with_context(|| format!("failed to flush export file {}", path.display()))?;

    Ok((format!("{:x}", hasher.finalize()), values.len()))
}

fn read_ndjson_file<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path)
        .with_context(|| format!("failed to open NDJSON file {}", path.display()))?;
    let reader = BufReader::new(file);
    let mut values = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line = line.with_context(|| {
            format!("failed to read line {} from {}", index + 1, path.display())
        })?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let value = serde_json::from_str(trimmed).with_context(|| {
            format!("failed to parse NDJSON row {} from {}", index + 1, path.display())
        })?;
        values.push(value);
    }

    Ok(values)
}

fn read_export_manifest(path: &Path) -> Result<ExportManifest> {
    let bytes = fs::read(path)
        .with_context(|| format!("failed to read manifest file {}", path.display()))?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("failed to parse manifest JSON {}", path.display()))
}

fn ndjson_digest_and_records(path: &Path) -> Result<(String, usize)> {
    let file = File::open(path)
        .with_context(|| format!("failed to open NDJSON file {}", path.display()))?;
    let reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut records = 0_usize;

    for (index, line) in reader.lines().enumerate() {
        let line = line.with_context(|| {
            format!("failed to read line {} from {}", index + 1, path.display())
        })?;
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
        if !line.trim().is_empty() {
            records += 1;
        }
    }

    Ok((format!("{:x}", hasher.finalize()), records))
}

fn validate_import_manifest(in_dir: &Path, manifest: &ExportManifest) -> Result<()> {
    if manifest.schema_version <= 0 || manifest.schema_version > LATEST_SCHEMA_VERSION {
        return Err(anyhow!(
            "unsupported export schema version {}; supported range is 1..={}",
            manifest.schema_version,
            LATEST_SCHEMA_VERSION
        ));
    }

    let mut by_path: BTreeMap<&str, &ExportFileDigest> = BTreeMap::new();
    for file in &manifest.files {
        if by_path.insert(file.path.as_str(), file).is_some() {
            return Err(anyhow!("manifest contains duplicate file entry: {}", file.path));
        }
    }

    for required in ["terms.ndjson", "nodes.ndjson", "assignments.ndjson", "checklists.ndjson"] {
        let Some(expected) = by_path.get(required) else {
            return Err(anyhow!("manifest is missing required file entry: {required}"));
        };
        let file_path = in_dir.join(required);
        if !file_path.exists() {
            return Err(anyhow!("manifest references missing file {}", file_path.display()));
        }

        let (actual_sha256, actual_records) = ndjson_digest_and_records(&file_path)?;
        if actual_sha256 != expected.sha256 {
            return Err(anyhow!(
                "manifest digest mismatch for {required}: expected {}, got {}",
                expected.sha256,
                actual_sha256
            ));
        }
        if actual_records != expected.records {
            return Err(anyhow!(
                "manifest record count mismatch for {required}: expected {}, got {}",
                expected.records,
                actual_records
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    fn mk_term(tid: u32, vocabulary: Vocabulary, name: &str, weight: i32, parents: &[u32]) -> Term {
        Term {
            tid: TermId(tid),
            vocabulary,
            name: name.to_string(),
            weight,
            parents: parents.iter().copied().map(TermId).collect(),
            path_title: None,
        }
    }

    fn mk_subsidy(nid: u32, title: &str, amount: Option<i64>) -> ContentItem {
        ContentItem {
            nid: NodeId(nid),
            kind: ContentKind::Subsidy,
            title: title.to_string(),
            url: format!("/foerdermittel/{nid}"),
            published: true,
            toc_term: None,
            date: None,
            subsidy: Some(SubsidyFields {
                subsidy_name: None,
                amount,
                coverage: None,
                scope: None,
                unavailable: false,
            }),
        }
    }

    fn mk_node(nid: u32, kind: ContentKind, title: &str, toc_term: Option<u32>) -> ContentItem {
        ContentItem {
            nid: NodeId(nid),
            kind,
            title: title.to_string(),
            url: format!("/inhalt/{nid}"),
            published: true,
            toc_term: toc_term.map(TermId),
            date: None,
            subsidy: None,
        }
    }

    fn mk_news(nid: u32, title: &str, date: Option<&str>) -> Result<ContentItem> {
        let date = match date {
            Some(raw) => Some(parse_rfc3339(raw)?),
            None => None,
        };
        Ok(ContentItem {
            nid: NodeId(nid),
            kind: ContentKind::News,
            title: title.to_string(),
            url: format!("/aktuelles/{nid}"),
            published: true,
            toc_term: None,
            date,
            subsidy: None,
        })
    }

    fn seeded_store() -> Result<SqliteStore> {
        let mut store = SqliteStore::open(Path::new(":memory:"))?;
        store.migrate()?;

        store.write_term(&mk_term(367, Vocabulary::SubsidyTypes, "Kredit", 0, &[]))?;
        store.write_term(&mk_term(371, Vocabulary::Region, "Bundesweit", 0, &[]))?;
        store.write_term(&mk_term(372, Vocabulary::Region, "Bayern", 0, &[]))?;
        store.write_term(&mk_term(448, Vocabulary::Categories, "Intern", 0, &[]))?;
        store.write_term(&mk_term(801, Vocabulary::Categories, "Altersgerecht Umbauen", 0, &[]))?;
        store.write_term(&mk_term(805, Vocabulary::Categories, "Heizung", 0, &[]))?;
        store.write_term(&mk_term(1279, Vocabulary::SubsidyPurpose, "Neubau", 0, &[]))?;

        Ok(store)
    }

    #[test]
    fn migrate_fresh_database_reaches_latest_version() -> Result<()> {
        let mut store = SqliteStore::open(Path::new(":memory:"))?;
        store.migrate()?;

        let status = store.schema_status()?;
        assert_eq!(status.current_version, LATEST_SCHEMA_VERSION);
        assert_eq!(status.target_version, LATEST_SCHEMA_VERSION);
        assert!(status.pending_versions.is_empty());
        assert!(!status.inferred_from_legacy);

        Ok(())
    }

    #[test]
    fn sqlite_constraints_enforce_checks_and_foreign_keys() -> Result<()> {
        let mut store = SqliteStore::open(Path::new(":memory:"))?;
        store.migrate()?;

        let check_result = store.conn.execute(
            "INSERT INTO content_nodes(nid, kind, title, url, published)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![1, "not_a_bundle", "Titel", "/titel", 1],
        );
        assert!(check_result.is_err());

        let fk_result = store.conn.execute(
            "INSERT INTO term_assignments(nid, field, tid) VALUES (?1, ?2, ?3)",
            params![999, "subsidy_type", 999],
        );
        assert!(fk_result.is_err());

        Ok(())
    }

    #[test]
    fn subsidy_scan_joins_labels_and_skips_noise() -> Result<()> {
        let store = seeded_store()?;

        store.write_node(&mk_subsidy(100, "Kredit Bayern", Some(50_000)))?;
        let mut unpublished = mk_subsidy(101, "Entwurf", None);
        unpublished.published = false;
        unpublished.url = String::new();
        store.write_node(&unpublished)?;
        store.write_node(&mk_node(200, ContentKind::Article, "Ratgeber", None))?;

        for (nid, field, tid) in [
            (100, SubsidyField::SubsidyType, 367),
            (100, SubsidyField::SubsidyRegion, 372),
            (100, SubsidyField::ContentCategories, 448),
            (101, SubsidyField::SubsidyType, 367),
            (200, SubsidyField::ContentCategories, 801),
        ] {
            store.write_assignment(&AssignmentRow {
                nid: NodeId(nid),
                field,
                tid: TermId(tid),
            })?;
        }

        let assignments = store.scan_term_assignments(&SiteConfig::default())?;
        let rows = assignments
            .iter()
            .map(|a| (a.field, a.tid.0, a.label.as_str()))
            .collect::<Vec<_>>();
        assert_eq!(
            rows,
            vec![
                (SubsidyField::SubsidyType, 367, "Kredit"),
                (SubsidyField::SubsidyRegion, 372, "Bayern"),
            ]
        );

        Ok(())
    }

    #[test]
    fn toc_scan_carries_parents_and_path_titles() -> Result<()> {
        let mut store = SqliteStore::open(Path::new(":memory:"))?;
        store.migrate()?;

        store.write_term(&mk_term(1407, Vocabulary::Toc, "Inhalt", 0, &[]))?;
        let mut section = mk_term(1410, Vocabulary::Toc, "Ratgeber", 2, &[1407]);
        section.path_title = Some("ratgeber".to_string());
        store.write_term(&section)?;
        store.write_term(&mk_term(1420, Vocabulary::Toc, "Bauen", 1, &[1407]))?;
        store.write_term(&mk_term(371, Vocabulary::Region, "Bundesweit", 0, &[]))?;

        let terms = store.scan_toc_terms()?;
        let summary = terms
            .iter()
            .map(|t| (t.tid.0, t.name.as_str(), t.weight))
            .collect::<Vec<_>>();
        assert_eq!(
            summary,
            vec![(1407, "Inhalt", 0), (1420, "Bauen", 1), (1410, "Ratgeber", 2)]
        );

        let Some(loaded) = terms.iter().find(|t| t.tid == TermId(1410)) else {
            return Err(anyhow!("toc term 1410 not found"));
        };
        assert_eq!(loaded.parents, vec![TermId(1407)]);
        assert_eq!(loaded.path_title.as_deref(), Some("ratgeber"));

        Ok(())
    }

    #[test]
    fn node_scans_filter_published_and_kinds() -> Result<()> {
        let mut store = SqliteStore::open(Path::new(":memory:"))?;
        store.migrate()?;

        store.write_node(&mk_node(200, ContentKind::Article, "Einbruchschutz", Some(1410)))?;
        let mut draft = mk_node(201, ContentKind::Article, "Entwurf", Some(1410));
        draft.published = false;
        draft.url = String::new();
        store.write_node(&draft)?;
        store.write_node(&mk_node(202, ContentKind::Guide, "Heizung", None))?;
        store.write_node(&mk_node(203, ContentKind::Page, "Impressum", Some(1411)))?;

        let articles = store.scan_nodes(&[ContentKind::Article])?;
        assert_eq!(articles.iter().map(|n| n.nid.0).collect::<Vec<_>>(), vec![200]);

        let mixed = store.scan_nodes(&[ContentKind::Article, ContentKind::Guide])?;
        assert_eq!(mixed.iter().map(|n| n.nid.0).collect::<Vec<_>>(), vec![200, 202]);

        let map = store.node_toc_map()?;
        assert_eq!(map.get(&NodeId(200)), Some(&TermId(1410)));
        assert_eq!(map.get(&NodeId(203)), Some(&TermId(1411)));
        assert_eq!(map.get(&NodeId(201)), None);

        let Some(loaded_draft) = store.load_node(NodeId(201))? else {
            return Err(anyhow!("unpublished node 201 not loadable"));
        };
        assert!(!loaded_draft.published);

        Ok(())
    }

    #[test]
    fn news_ordering_puts_dated_first_then_undated() -> Result<()> {
        let mut store = SqliteStore::open(Path::new(":memory:"))?;
        store.migrate()?;

        store.write_node(&mk_news(301, "März", Some("2026-03-01T00:00:00Z"))?)?;
        store.write_node(&mk_news(302, "Mai", Some("2026-05-01T00:00:00Z"))?)?;
        store.write_node(&mk_news(303, "Undatiert", None)?)?;
        store.write_node(&mk_news(304, "Mai auch", Some("2026-05-01T00:00:00Z"))?)?;

        let all = store.all_news()?;
        assert_eq!(all.iter().map(|n| n.nid.0).collect::<Vec<_>>(), vec![304, 302, 301, 303]);

        let recent = store.recent_news(2)?;
        assert_eq!(recent.iter().map(|n| n.nid.0).collect::<Vec<_>>(), vec![304, 302]);

        Ok(())
    }

    #[test]
    fn related_candidates_dedupe_and_skip_current() -> Result<()> {
        let store = seeded_store()?;

        store.write_node(&mk_node(200, ContentKind::Article, "Badezimmer umbauen", None))?;
        store.write_node(&mk_node(201, ContentKind::Article, "Aktueller Artikel", None))?;
        store.write_node(&mk_node(210, ContentKind::Guide, "Zuschuss beantragen", None))?;
        store.write_node(&mk_subsidy(100, "Kredit", None))?;

        for (nid, tid) in [(200, 801), (200, 805), (201, 801), (210, 805), (100, 801)] {
            store.write_assignment(&AssignmentRow {
                nid: NodeId(nid),
                field: SubsidyField::ContentCategories,
                tid: TermId(tid),
            })?;
        }

        let candidates = store.related_candidates(
            NodeId(201),
            &[TermId(801), TermId(805)],
            &[ContentKind::Article, ContentKind::Guide],
        )?;
        assert_eq!(
            candidates.iter().map(|item| item.nid.0).collect::<Vec<_>>(),
            vec![200, 210]
        );
        assert!(candidates.iter().all(|item| item.weight == 0));

        Ok(())
    }

    #[test]
    fn term_counts_cover_selected_bundles() -> Result<()> {
        let store = seeded_store()?;

        store.write_node(&mk_node(200, ContentKind::Article, "Zwei Begriffe", None))?;
        store.write_node(&mk_node(210, ContentKind::Guide, "Ein Begriff", None))?;
        store.write_node(&mk_subsidy(100, "Kredit", None))?;

        for (nid, tid) in [(200, 801), (200, 805), (210, 805), (100, 801)] {
            store.write_assignment(&AssignmentRow {
                nid: NodeId(nid),
                field: SubsidyField::ContentCategories,
                tid: TermId(tid),
            })?;
        }

        let counts =
            store.count_terms_per_node(&[ContentKind::Article, ContentKind::Guide])?;
        assert_eq!(counts.get(&NodeId(200)), Some(&2));
        assert_eq!(counts.get(&NodeId(210)), Some(&1));
        assert_eq!(counts.get(&NodeId(100)), None);

        Ok(())
    }

    #[test]
    fn hub_and_node_assignment_scans_join_metadata() -> Result<()> {
        let store = seeded_store()?;

        let hub = mk_node(300, ContentKind::SubsidyHub, "Kredite", None);
        store.write_node(&hub)?;
        store.write_assignment(&AssignmentRow {
            nid: NodeId(300),
            field: SubsidyField::SubsidyType,
            tid: TermId(367),
        })?;
        store.write_assignment(&AssignmentRow {
            nid: NodeId(300),
            field: SubsidyField::SubsidyPurpose,
            tid: TermId(1279),
        })?;

        let hub_rows = store.scan_hub_assignments()?;
        let summary = hub_rows
            .iter()
            .map(|row| (row.nid.0, row.field, row.tid.0, row.label.as_str()))
            .collect::<Vec<_>>();
        assert_eq!(
            summary,
            vec![
                (300, SubsidyField::SubsidyType, 367, "Kredit"),
                (300, SubsidyField::SubsidyPurpose, 1279, "Neubau"),
            ]
        );

        let node_rows = store.node_assignments(NodeId(300))?;
        assert_eq!(
            node_rows.iter().map(|row| (row.field, row.tid.0)).collect::<Vec<_>>(),
            vec![
                (SubsidyField::SubsidyType, 367),
                (SubsidyField::SubsidyPurpose, 1279),
            ]
        );

        Ok(())
    }

    #[test]
    fn checklists_round_trip_with_purposes() -> Result<()> {
        let mut store = seeded_store()?;

        store.write_checklist(&Checklist {
            fid: FileId(431),
            title: "Checkliste Neubau".to_string(),
            url: "/files/checkliste-neubau.pdf".to_string(),
            purposes: vec![TermId(1279)],
        })?;
        store.write_checklist(&Checklist {
            fid: FileId(479),
            title: "Checkliste Heizung".to_string(),
            url: "/files/checkliste-heizung.pdf".to_string(),
            purposes: vec![],
        })?;

        let checklists = store.all_checklists()?;
        assert_eq!(checklists.len(), 2);
        assert_eq!(checklists[0].fid, FileId(431));
        assert_eq!(checklists[0].purposes, vec![TermId(1279)]);
        assert!(checklists[1].purposes.is_empty());

        Ok(())
    }

    #[test]
    fn cache_round_trip_and_overwrite() -> Result<()> {
        let mut store = SqliteStore::open(Path::new(":memory:"))?;
        store.migrate()?;

        assert_eq!(store.get("toc"), None);
        store.set("toc", "{\"main\":[]}");
        assert_eq!(store.get("toc").as_deref(), Some("{\"main\":[]}"));
        store.set("toc", "{\"main\":[1]}");
        assert_eq!(store.get("toc").as_deref(), Some("{\"main\":[1]}"));

        let mut memory = MemoryCache::default();
        assert_eq!(memory.get("toc"), None);
        memory.set("toc", "cached");
        assert_eq!(memory.get("toc").as_deref(), Some("cached"));

        Ok(())
    }

    #[test]
    fn migrate_legacy_v1_database_to_v2() -> Result<()> {
        let mut store = SqliteStore::open(Path::new(":memory:"))?;
        store.conn.execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)?;
        store.conn.execute_batch(MIGRATION_001_SQL)?;

        store.conn.execute(
            "INSERT INTO taxonomy_terms(tid, vocabulary, name, weight) VALUES (1279, 'subsidy_purpose', 'Neubau', 0)",
            [],
        )?;
        store.conn.execute(
            "INSERT INTO content_nodes(nid, kind, title, url, published, unavailable)
             VALUES (100, 'subsidy', 'Kredit', '/foerdermittel/100', 1, 'true')",
            [],
        )?;
        store.conn.execute(
            "INSERT INTO content_nodes(nid, kind, title, url, published, unavailable)
             VALUES (101, 'subsidy', 'Zuschuss', '/foerdermittel/101', 1, NULL)",
            [],
        )?;
        store.conn.execute(
            "INSERT INTO term_assignments(nid, field, tid) VALUES (100, 'subsidy_purpose', 1279)",
            [],
        )?;
        store.conn.execute(
            "INSERT INTO checklists(fid, title, url, purposes_json)
             VALUES (431, 'Checkliste', '/files/checkliste.pdf', '[1279]')",
            [],
        )?;

        store.migrate()?;
        assert_eq!(current_schema_version(&store.conn)?, 2);

        let Some(unavailable_node) = store.load_node(NodeId(100))? else {
            return Err(anyhow!("migrated node 100 not found"));
        };
        assert!(unavailable_node.is_unavailable());

        let Some(available_node) = store.load_node(NodeId(101))? else {
            return Err(anyhow!("migrated node 101 not found"));
        };
        assert!(!available_node.is_unavailable());

        let checklists = store.all_checklists()?;
        assert_eq!(checklists.len(), 1);
        assert_eq!(checklists[0].purposes, vec![TermId(1279)]);

        Ok(())
    }

    #[test]
    fn migrate_rejects_unrecognizable_legacy_schema() -> Result<()> {
        let mut store = SqliteStore::open(Path::new(":memory:"))?;
        store.conn.execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)?;
        store.conn.execute_batch(
            "CREATE TABLE content_nodes(
                nid INTEGER PRIMARY KEY,
                title TEXT NOT NULL
            );
            CREATE TABLE checklists(
                fid INTEGER PRIMARY KEY
            );",
        )?;

        let err = match store.migrate() {
            Ok(()) => return Err(anyhow!("expected migration to fail on invalid legacy schema")),
            Err(err) => err,
        };
        assert!(err.to_string().contains("recognizable checklist layout"));

        Ok(())
    }

    #[test]
    fn schema_status_reports_pending_migration_for_legacy_v1() -> Result<()> {
        let store = SqliteStore::open(Path::new(":memory:"))?;
        store.conn.execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)?;
        store.conn.execute_batch(MIGRATION_001_SQL)?;

        let status = store.schema_status()?;
        assert_eq!(status.current_version, 1);
        assert_eq!(status.target_version, 2);
        assert_eq!(status.pending_versions, vec![2]);
        assert!(status.inferred_from_legacy);

        Ok(())
    }

    #[test]
    fn export_and_import_snapshot_round_trip() -> Result<()> {
        let mut source = seeded_store()?;

        source.write_node(&mk_subsidy(100, "Kredit Bayern", Some(50_000)))?;
        source.write_node(&mk_node(200, ContentKind::Article, "Ratgeber", None))?;
        source.write_assignment(&AssignmentRow {
            nid: NodeId(100),
            field: SubsidyField::SubsidyRegion,
            tid: TermId(372),
        })?;
        source.write_checklist(&Checklist {
            fid: FileId(431),
            title: "Checkliste".to_string(),
            url: "/files/checkliste.pdf".to_string(),
            purposes: vec![TermId(1279)],
        })?;

        let export_dir =
            std::env::temp_dir().join(format!("subsidykernel-export-{}", Ulid::new()));
        let manifest = source.export_snapshot(&export_dir)?;
        assert_eq!(manifest.files.len(), 4);
        assert_eq!(manifest.schema_version, LATEST_SCHEMA_VERSION);
        for name in ["terms.ndjson", "nodes.ndjson", "assignments.ndjson", "checklists.ndjson"] {
            assert!(export_dir.join(name).exists());
        }
        assert!(export_dir.join("manifest.json").exists());

        let mut target = SqliteStore::open(Path::new(":memory:"))?;
        let summary = target.import_snapshot(&export_dir, true)?;
        assert_eq!(summary.imported_terms, 7);
        assert_eq!(summary.imported_nodes, 2);
        assert_eq!(summary.imported_assignments, 1);
        assert_eq!(summary.imported_checklists, 1);
        assert_eq!(summary.skipped_existing_nodes, 0);

        let again = target.import_snapshot(&export_dir, true)?;
        assert_eq!(again.imported_nodes, 0);
        assert_eq!(again.skipped_existing_terms, 7);
        assert_eq!(again.skipped_existing_nodes, 2);

        let source_scan = source.scan_term_assignments(&SiteConfig::default())?;
        let target_scan = target.scan_term_assignments(&SiteConfig::default())?;
        assert_eq!(source_scan, target_scan);

        fs::remove_dir_all(&export_dir).with_context(|| {
            format!("failed to cleanup temp export dir {}", export_dir.display())
        })?;

        Ok(())
    }

    #[test]
    fn import_rejects_manifest_digest_mismatch() -> Result<()> {
        let source = seeded_store()?;
        let export_dir =
            std::env::temp_dir().join(format!("subsidykernel-export-{}", Ulid::new()));
        source.export_snapshot(&export_dir)?;

        let nodes_path = export_dir.join("nodes.ndjson");
        let mut tampered = std::fs::OpenOptions::new().append(true).open(&nodes_path)?;
        writeln!(tampered, "{{\"tampered\":true}}")?;

        let mut target = SqliteStore::open(Path::new(":memory:"))?;
        let Err(err) = target.import_snapshot(&export_dir, true) else {
            return Err(anyhow!("expected import failure for mismatched manifest digest"));
        };
        assert!(err.to_string().contains("manifest digest mismatch for nodes.ndjson"));

        fs::remove_dir_all(&export_dir).with_context(|| {
            format!("failed to cleanup temp export dir {}", export_dir.display())
        })?;

        Ok(())
    }

    #[test]
    fn backup_and_restore_database_round_trip() -> Result<()> {
        let source = seeded_store()?;
        source.write_node(&mk_node(200, ContentKind::Article, "Gesichert", None))?;

        let backup_file =
            std::env::temp_dir().join(format!("subsidykernel-backup-{}.sqlite3", Ulid::new()));
        source.backup_database(&backup_file)?;

        let mut target = SqliteStore::open(Path::new(":memory:"))?;
        target.restore_database(&backup_file)?;
        let Some(restored) = target.load_node(NodeId(200))? else {
            return Err(anyhow!("restored node 200 not found"));
        };
        assert_eq!(restored.title, "Gesichert");

        fs::remove_file(&backup_file).with_context(|| {
            format!("failed to cleanup temp backup file {}", backup_file.display())
        })?;

        Ok(())
    }

    #[test]
    fn integrity_check_reports_clean_database() -> Result<()> {
        let mut store = SqliteStore::open(Path::new(":memory:"))?;
        store.migrate()?;

        let report = store.integrity_check()?;
        assert!(report.quick_check_ok);
        assert!(report.foreign_key_violations.is_empty());
        assert_eq!(report.schema_status.current_version, LATEST_SCHEMA_VERSION);

        Ok(())
    }

    #[test]
    fn concurrent_writes_and_reads_preserve_integrity() -> Result<()> {
        let db_path = std::env::temp_dir()
            .join(format!("subsidykernel-concurrency-{}.sqlite3", Ulid::new()));
        {
            let mut init = SqliteStore::open(&db_path)?;
            init.migrate()?;
        }

        let writer_threads = 4_u32;
        let writes_per_thread = 20_u32;
        let reader_threads = 2;
        let read_iterations = 30;

        let mut handles = Vec::new();

        for thread_index in 0..writer_threads {
            let writer_path = db_path.clone();
            handles.push(thread::spawn(move || -> Result<()> {
                let mut store = SqliteStore::open(&writer_path)?;
                store.migrate()?;
                for write_index in 0..writes_per_thread {
                    let nid = 1_000 + thread_index * 100 + write_index;
                    store.write_node(&mk_node(
                        nid,
                        ContentKind::Article,
                        &format!("Artikel {nid}"),
                        None,
                    ))?;
                }
                Ok(())
            }));
        }

        for _ in 0..reader_threads {
            let reader_path = db_path.clone();
            handles.push(thread::spawn(move || -> Result<()> {
                let store = SqliteStore::open(&reader_path)?;
                for _ in 0..read_iterations {
                    let _ = store.scan_nodes(&[ContentKind::Article])?;
                }
                Ok(())
            }));
        }

        for handle in handles {
            let Ok(thread_result) = handle.join() else {
                return Err(anyhow!("concurrency thread panicked"));
            };
            thread_result?;
        }

        let store = SqliteStore::open(&db_path)?;
        let articles = store.scan_nodes(&[ContentKind::Article])?;
        assert_eq!(articles.len(), (writer_threads * writes_per_thread) as usize);

        let report = store.integrity_check()?;
        assert!(report.quick_check_ok);
        assert!(report.foreign_key_violations.is_empty());

        for suffix in ["", "-wal", "-shm"] {
            let path = if suffix.is_empty() {
                db_path.clone()
            } else {
                std::path::PathBuf::from(format!("{}{}", db_path.display(), suffix))
            };
            if path.exists() {
                fs::remove_file(&path)
                    .with_context(|| format!("failed to cleanup sqlite file {}", path.display()))?;
            }
        }

        Ok(())
    }
}
