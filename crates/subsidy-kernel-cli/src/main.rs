use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::Value;
use subsidy_kernel_api::{RequestContext, SubsidyKernelApi};
use subsidy_kernel_core::{NodeId, RelatedKind, SiteConfig, TermId};

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "sk")]
#[command(about = "Subsidy Kernel CLI")]
struct Cli {
    #[arg(long, default_value = "./subsidy_kernel.sqlite3")]
    db: PathBuf,

    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: Box<DbCommand>,
    },
    Content {
        #[command(subcommand)]
        command: Box<ContentCommand>,
    },
    Subsidies {
        #[command(subcommand)]
        command: Box<SubsidiesCommand>,
    },
    Nav {
        #[command(subcommand)]
        command: Box<NavCommand>,
    },
    Related {
        #[command(subcommand)]
        command: Box<RelatedCommand>,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate(DbMigrateArgs),
    Export(DbExportArgs),
    Import(DbImportArgs),
    Backup(DbBackupArgs),
    Restore(DbRestoreArgs),
    IntegrityCheck,
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct DbExportArgs {
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Args)]
struct DbImportArgs {
    #[arg(long = "in")]
    input: PathBuf,
    #[arg(long, default_value_t = true)]
    skip_existing: bool,
}

#[derive(Debug, Args)]
struct DbBackupArgs {
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Args)]
struct DbRestoreArgs {
    #[arg(long = "in")]
    input: PathBuf,
}

#[derive(Debug, Subcommand)]
enum ContentCommand {
    ImportFixtures(DbImportArgs),
    News(NewsArgs),
}

#[derive(Debug, Args)]
struct NewsArgs {
    #[arg(long, default_value_t = false)]
    all: bool,
}

#[derive(Debug, Subcommand)]
enum SubsidiesCommand {
    Index,
    Facets,
    Profiles(ProfilesArgs),
    HubTeaser(NodeArgs),
    IsKfw(NodeArgs),
}

#[derive(Debug, Args)]
struct ProfilesArgs {
    #[arg(long)]
    terms: String,
    #[arg(long, default_value_t = false)]
    exclusive: bool,
}

#[derive(Debug, Args)]
struct NodeArgs {
    #[arg(long)]
    node: u32,
}

#[derive(Debug, Subcommand)]
enum NavCommand {
    Menu(MenuArgs),
    Breadcrumbs(BreadcrumbsArgs),
    Trail(PageArgs),
    Parent(PageArgs),
    Alias(NodeArgs),
}

#[derive(Debug, Args)]
struct MenuArgs {
    #[arg(value_enum)]
    menu: MenuArg,
    #[arg(long)]
    node: Option<u32>,
    #[arg(long, default_value = "")]
    path: String,
}

#[derive(Debug, Args)]
struct BreadcrumbsArgs {
    #[arg(long)]
    node: u32,
    #[arg(long)]
    path: String,
}

#[derive(Debug, Args)]
struct PageArgs {
    #[arg(long)]
    node: u32,
    #[arg(long, default_value = "")]
    path: String,
}

#[derive(Debug, Subcommand)]
enum RelatedCommand {
    ByType(ByTypeArgs),
    Checklists(PageArgs),
}

#[derive(Debug, Args)]
struct ByTypeArgs {
    #[arg(long, value_enum)]
    kind: KindArg,
    #[arg(long)]
    node: u32,
    #[arg(long, default_value = "")]
    path: String,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MenuArg {
    Main,
    Meta,
    Subsidy,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KindArg {
    Subsidy,
    Article,
    Guide,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn parse_terms(raw: &str) -> Result<Vec<TermId>> {
    let mut terms = Vec::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let tid: u32 = part.parse().with_context(|| format!("invalid term id: {part}"))?;
        terms.push(TermId(tid));
    }
    Ok(terms)
}

fn context_for(node: Option<u32>, path: &str) -> RequestContext {
    RequestContext { node: node.map(NodeId), path: path.to_string() }
}

fn main() -> Result<()> {
    let Cli { db, config, command } = Cli::parse();
    let api = match config {
        Some(path) => SubsidyKernelApi::with_config(db, SiteConfig::from_yaml_file(&path)?),
        None => SubsidyKernelApi::new(db),
    };
    match command {
        Command::Db { command } => run_db(*command, &api),
        Command::Content { command } => run_content(*command, &api),
        Command::Subsidies { command } => run_subsidies(*command, &api),
        Command::Nav { command } => run_nav(*command, &api),
        Command::Related { command } => run_related(*command, &api),
    }
}

fn run_db(command: DbCommand, api: &SubsidyKernelApi) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => run_db_schema_version(api),
        DbCommand::Migrate(args) => run_db_migrate(&args, api),
        DbCommand::Export(args) => run_db_export(&args, api),
        DbCommand::Import(args) => run_db_import(&args, api),
        DbCommand::Backup(args) => run_db_backup(&args, api),
        DbCommand::Restore(args) => run_db_restore(&args, api),
        DbCommand::IntegrityCheck => run_db_integrity_check(api),
    }
}

fn run_db_schema_version(api: &SubsidyKernelApi) -> Result<()> {
    let status = api.schema_status()?;
    emit_json(serde_json::json!({
        "current_version": status.current_version,
        "target_version": status.target_version,
        "pending_versions": status.pending_versions,
        "up_to_date": status.pending_versions.is_empty(),
        "inferred_from_legacy": status.inferred_from_legacy
    }))
}

fn run_db_migrate(args: &DbMigrateArgs, api: &SubsidyKernelApi) -> Result<()> {
    let result = api.migrate(args.dry_run)?;
    emit_json(serde_json::to_value(&result).context("failed to serialize migration result")?)
}

fn run_db_export(args: &DbExportArgs, api: &SubsidyKernelApi) -> Result<()> {
    let manifest = api.export_content(&args.out)?;
    emit_json(serde_json::json!({
        "out_dir": args.out,
        "manifest": manifest
    }))
}

fn run_db_import(args: &DbImportArgs, api: &SubsidyKernelApi) -> Result<()> {
    let summary = api.import_content(&args.input, args.skip_existing)?;
    emit_json(serde_json::json!({
        "in_dir": args.input,
        "skip_existing": args.skip_existing,
        "summary": summary
    }))
}

fn run_db_backup(args: &DbBackupArgs, api: &SubsidyKernelApi) -> Result<()> {
    api.backup_database(&args.out)?;
    emit_json(serde_json::json!({
        "backup_path": args.out,
        "status": "ok"
    }))
}

fn run_db_restore(args: &DbRestoreArgs, api: &SubsidyKernelApi) -> Result<()> {
    api.restore_database(&args.input)?;
    let status = api.schema_status()?;
    emit_json(serde_json::json!({
        "restored_from": args.input,
        "current_version": status.current_version,
        "target_version": status.target_version,
        "pending_versions": status.pending_versions
    }))
}

fn run_db_integrity_check(api: &SubsidyKernelApi) -> Result<()> {
    let report = api.integrity_check()?;
    emit_json(serde_json::to_value(&report).context("failed to serialize integrity report")?)
}

fn run_content(command: ContentCommand, api: &SubsidyKernelApi) -> Result<()> {
    match command {
        ContentCommand::ImportFixtures(args) => run_db_import(&args, api),
        ContentCommand::News(args) => {
            let news = if args.all { api.all_news()? } else { api.recent_news()? };
            emit_json(serde_json::json!({
                "all": args.all,
                "news": news
            }))
        }
    }
}

fn run_subsidies(command: SubsidiesCommand, api: &SubsidyKernelApi) -> Result<()> {
    match command {
        SubsidiesCommand::Index => {
            let index = api.relationship_index()?;
            emit_json(
                serde_json::to_value(&index).context("failed to serialize relationship index")?,
            )
        }
        SubsidiesCommand::Facets => {
            let facets = api.facets_map()?;
            emit_json(serde_json::to_value(&facets).context("failed to serialize facets map")?)
        }
        SubsidiesCommand::Profiles(args) => {
            let terms = parse_terms(&args.terms)?;
            let profiles = api.subsidy_profiles(&terms, args.exclusive)?;
            emit_json(serde_json::json!({
                "terms": terms,
                "exclusive": args.exclusive,
                "profiles": profiles
            }))
        }
        SubsidiesCommand::HubTeaser(args) => {
            let profiles = api.subsidy_hub_teaser(NodeId(args.node))?;
            emit_json(serde_json::json!({
                "node": args.node,
                "profiles": profiles
            }))
        }
        SubsidiesCommand::IsKfw(args) => {
            let is_kfw = api.is_kfw(NodeId(args.node))?;
            emit_json(serde_json::json!({
                "node": args.node,
                "is_kfw": is_kfw
            }))
        }
    }
}

fn run_nav(command: NavCommand, api: &SubsidyKernelApi) -> Result<()> {
    match command {
        NavCommand::Menu(args) => {
            let ctx = context_for(args.node, &args.path);
            let (menu, items) = match args.menu {
                MenuArg::Main => ("main", api.main_menu(&ctx)?),
                MenuArg::Meta => ("meta", api.meta_menu(&ctx)?),
                MenuArg::Subsidy => ("subsidy", api.subsidy_menu(&ctx)?),
            };
            emit_json(serde_json::json!({
                "menu": menu,
                "items": items
            }))
        }
        NavCommand::Breadcrumbs(args) => {
            let ctx = context_for(Some(args.node), &args.path);
            let breadcrumbs = api.breadcrumbs(&ctx)?;
            emit_json(serde_json::json!({ "breadcrumbs": breadcrumbs }))
        }
        NavCommand::Trail(args) => {
            let ctx = context_for(Some(args.node), &args.path);
            let trail = api.term_trail(&ctx)?;
            emit_json(serde_json::json!({ "trail": trail }))
        }
        NavCommand::Parent(args) => {
            let ctx = context_for(Some(args.node), &args.path);
            let parent = api.node_parent(&ctx)?;
            emit_json(serde_json::json!({
                "node": args.node,
                "parent": parent
            }))
        }
        NavCommand::Alias(args) => {
            let alias = api.alias_for(NodeId(args.node))?;
            emit_json(serde_json::json!({
                "node": args.node,
                "alias": alias
            }))
        }
    }
}

fn run_related(command: RelatedCommand, api: &SubsidyKernelApi) -> Result<()> {
    match command {
        RelatedCommand::ByType(args) => {
            let ctx = context_for(Some(args.node), &args.path);
            let kind = args.kind.into_related_kind();
            let related = api.related_by_type(&ctx, kind)?;
            emit_json(serde_json::json!({
                "kind": kind.as_str(),
                "related": related
            }))
        }
        RelatedCommand::Checklists(args) => {
            let ctx = context_for(Some(args.node), &args.path);
            let checklists = api.related_checklists(&ctx)?;
            emit_json(serde_json::json!({ "checklists": checklists }))
        }
    }
}

impl KindArg {
    fn into_related_kind(self) -> RelatedKind {
        match self {
            Self::Subsidy => RelatedKind::Subsidy,
            Self::Article => RelatedKind::Article,
            Self::Guide => RelatedKind::Guide,
        }
    }
}
