use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use serde::{Deserialize, Serialize};
use subsidy_kernel_api::{RequestContext, SubsidyKernelApi, API_CONTRACT_VERSION};
use subsidy_kernel_core::{NodeId, RelatedKind, SiteConfig, TermId};
use tracing::info;

const SERVICE_CONTRACT_VERSION: &str = "service.v1";
const OPENAPI_YAML: &str = include_str!("../../../openapi/openapi.yaml");

#[derive(Debug, Clone)]
struct ServiceState {
    api: SubsidyKernelApi,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    service_contract_version: &'static str,
    api_contract_version: &'static str,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    service_contract_version: &'static str,
    error: String,
}

#[derive(Debug, Clone, Deserialize)]
struct MigrateRequest {
    dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// The node and path of the page being rendered, as every navigation
/// route receives them.
#[derive(Debug, Clone, Deserialize)]
struct NavQuery {
    node: Option<u32>,
    path: Option<String>,
}

impl NavQuery {
    fn context(&self) -> RequestContext {
        RequestContext {
            node: self.node.map(NodeId),
            path: self.path.clone().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ProfilesQuery {
    terms: Option<String>,
    #[serde(default)]
    exclusive: bool,
}

#[derive(Debug, Parser)]
#[command(name = "subsidy-kernel-service")]
#[command(about = "Local HTTP service for Subsidy Kernel")]
struct Args {
    #[arg(long, default_value = "./subsidy_kernel.sqlite3")]
    db: PathBuf,
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, default_value = "127.0.0.1:4020")]
    bind: SocketAddr,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = StatusCode::BAD_REQUEST;
        (status, Json(self)).into_response()
    }
}

impl ServiceState {
    fn error(message: impl Into<String>) -> ServiceError {
        ServiceError { service_contract_version: SERVICE_CONTRACT_VERSION, error: message.into() }
    }
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope {
        service_contract_version: SERVICE_CONTRACT_VERSION,
        api_contract_version: API_CONTRACT_VERSION,
        data,
    }
}

/// Comma-separated term ids, as the profiles route takes them.
fn parse_terms(raw: Option<&str>) -> Result<Vec<TermId>, ServiceError> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    let mut terms = Vec::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let tid: u32 =
            part.parse().map_err(|_| ServiceState::error(format!("invalid term id: {part}")))?;
        terms.push(TermId(tid));
    }
    Ok(terms)
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/openapi", get(openapi))
        .route("/v1/db/schema-version", get(db_schema_version))
        .route("/v1/db/migrate", post(db_migrate))
        .route("/v1/subsidies/index", get(subsidies_index))
        .route("/v1/subsidies/facets", get(subsidies_facets))
        .route("/v1/subsidies/profiles", get(subsidies_profiles))
        .route("/v1/subsidies/hub-teaser/:nid", get(subsidies_hub_teaser))
        .route("/v1/nav/menu/main", get(nav_menu_main))
        .route("/v1/nav/menu/meta", get(nav_menu_meta))
        .route("/v1/nav/menu/subsidy", get(nav_menu_subsidy))
        .route("/v1/nav/breadcrumbs", get(nav_breadcrumbs))
        .route("/v1/nav/trail", get(nav_trail))
        .route("/v1/nav/parent", get(nav_parent))
        .route("/v1/related/checklists", get(related_checklists))
        .route("/v1/related/:kind", get(related_by_kind))
        .route("/v1/news/recent", get(news_recent))
        .route("/v1/alias/:nid", get(node_alias))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let api = match args.config {
        Some(path) => SubsidyKernelApi::with_config(args.db, SiteConfig::from_yaml_file(&path)?),
        None => SubsidyKernelApi::new(args.db),
    };
    let state = ServiceState { api };
    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    info!(bind = %args.bind, "subsidy kernel service listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health() -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse { status: "ok" }))
}

async fn openapi() -> impl IntoResponse {
    (StatusCode::OK, [("content-type", "application/yaml; charset=utf-8")], OPENAPI_YAML)
}

async fn db_schema_version(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<subsidy_kernel_store_sqlite::SchemaStatus>>, ServiceError> {
    let status = state.api.schema_status().map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(status)))
}

async fn db_migrate(
    State(state): State<ServiceState>,
    Json(request): Json<MigrateRequest>,
) -> Result<Json<ServiceEnvelope<subsidy_kernel_api::MigrateResult>>, ServiceError> {
    let result =
        state.api.migrate(request.dry_run).map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(result)))
}

async fn subsidies_index(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<subsidy_kernel_core::RelationshipIndex>>, ServiceError> {
    let index =
        state.api.relationship_index().map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(index)))
}

async fn subsidies_facets(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<subsidy_kernel_core::FacetsMap>>, ServiceError> {
    let facets = state.api.facets_map().map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(facets)))
}

async fn subsidies_profiles(
    State(state): State<ServiceState>,
    Query(query): Query<ProfilesQuery>,
) -> Result<Json<ServiceEnvelope<Vec<subsidy_kernel_core::SubsidyProfile>>>, ServiceError> {
    let terms = parse_terms(query.terms.as_deref())?;
    let profiles = state
        .api
        .subsidy_profiles(&terms, query.exclusive)
        .map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(profiles)))
}

async fn subsidies_hub_teaser(
    State(state): State<ServiceState>,
    Path(nid): Path<u32>,
) -> Result<Json<ServiceEnvelope<Vec<subsidy_kernel_core::SubsidyProfile>>>, ServiceError> {
    let profiles = state
        .api
        .subsidy_hub_teaser(NodeId(nid))
        .map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(profiles)))
}

async fn nav_menu_main(
    State(state): State<ServiceState>,
    Query(query): Query<NavQuery>,
) -> Result<Json<ServiceEnvelope<Vec<subsidy_kernel_core::NavItem>>>, ServiceError> {
    let menu = state
        .api
        .main_menu(&query.context())
        .map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(menu)))
}

async fn nav_menu_meta(
    State(state): State<ServiceState>,
    Query(query): Query<NavQuery>,
) -> Result<Json<ServiceEnvelope<Vec<subsidy_kernel_core::NavItem>>>, ServiceError> {
    let menu = state
        .api
        .meta_menu(&query.context())
        .map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(menu)))
}

async fn nav_menu_subsidy(
    State(state): State<ServiceState>,
    Query(query): Query<NavQuery>,
) -> Result<Json<ServiceEnvelope<Vec<subsidy_kernel_core::NavItem>>>, ServiceError> {
    let menu = state
        .api
        .subsidy_menu(&query.context())
        .map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(menu)))
}

async fn nav_breadcrumbs(
    State(state): State<ServiceState>,
    Query(query): Query<NavQuery>,
) -> Result<Json<ServiceEnvelope<Vec<subsidy_kernel_core::Breadcrumb>>>, ServiceError> {
    let crumbs = state
        .api
        .breadcrumbs(&query.context())
        .map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(crumbs)))
}

async fn nav_trail(
    State(state): State<ServiceState>,
    Query(query): Query<NavQuery>,
) -> Result<Json<ServiceEnvelope<Vec<subsidy_kernel_core::Term>>>, ServiceError> {
    let trail = state
        .api
        .term_trail(&query.context())
        .map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(trail)))
}

async fn nav_parent(
    State(state): State<ServiceState>,
    Query(query): Query<NavQuery>,
) -> Result<Json<ServiceEnvelope<Option<subsidy_kernel_core::ContentItem>>>, ServiceError> {
    let parent = state
        .api
        .node_parent(&query.context())
        .map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(parent)))
}

async fn related_by_kind(
    State(state): State<ServiceState>,
    Path(kind): Path<String>,
    Query(query): Query<NavQuery>,
) -> Result<Json<ServiceEnvelope<subsidy_kernel_core::RelatedContent>>, ServiceError> {
    let kind = RelatedKind::parse(&kind).map_err(|err| ServiceState::error(err.to_string()))?;
    let related = state
        .api
        .related_by_type(&query.context(), kind)
        .map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(related)))
}

async fn related_checklists(
    State(state): State<ServiceState>,
    Query(query): Query<NavQuery>,
) -> Result<Json<ServiceEnvelope<Vec<subsidy_kernel_core::Checklist>>>, ServiceError> {
    let checklists = state
        .api
        .related_checklists(&query.context())
        .map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(checklists)))
}

async fn news_recent(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<Vec<subsidy_kernel_core::ContentItem>>>, ServiceError> {
    let news = state.api.recent_news().map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(news)))
}

async fn node_alias(
    State(state): State<ServiceState>,
    Path(nid): Path<u32>,
) -> Result<Json<ServiceEnvelope<Option<String>>>, ServiceError> {
    let alias =
        state.api.alias_for(NodeId(nid)).map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(alias)))
}
