/**
 * API REST CLUSTERWATCH - Serveur HTTP du kernel
 *
 * RÔLE :
 * Expose la matrice de statut (domaine -> instance -> check function),
 * l'édition des documents de configuration du cluster et la génération des règles.
 *
 * FONCTIONNEMENT :
 * - Serveur Axum, état partagé AppState (store, pipeline, rules, config)
 * - Routes : /health, /system, /matrix, /expand, /device-models, /config, /rules
 * - Lecture de la matrice = copie du dernier snapshot publié, jamais de requête backend
 * - Erreurs : code HTTP + corps JSON { "ok": false, "error": "..." }
 */

use crate::cluster::{parse_document, parse_sections, ClusterDocument, ParsedDocument, Sections};
use crate::config::KernelConfig;
use crate::expand::expand_instances;
use crate::checks::extract_check_functions;
use crate::health::{HealthTracker, KernelHealth};
use crate::loaders::{ClusterFiles, LoadError};
use crate::matrix::DeviceModelLoader;
use crate::models::{DeviceModelDescriptor, MatrixData};
use crate::prometheus::PrometheusClient;
use crate::refresh::{refresh_once, MatrixStore, Pipeline};
use crate::rules::{GenerateRequest, RulesError, RulesGenerator, RulesReport, RulesStatus};
use crate::state::Shared;
use crate::view::{filter_domains, find_domain, summarize, DomainSummary, MatrixFilter};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use time::OffsetDateTime;

pub type KernelPipeline = Pipeline<ClusterFiles, PrometheusClient>;

type ApiError = (StatusCode, Json<serde_json::Value>);
type ApiResult<T> = Result<Json<T>, ApiError>;

fn api_error(code: StatusCode, error: impl ToString) -> ApiError {
    (code, Json(json!({ "ok": false, "error": error.to_string() })))
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<MatrixStore>,
    pub pipeline: Arc<KernelPipeline>,
    pub rules: Arc<RulesGenerator>,
    pub health_tracker: HealthTracker,
    pub cfg: Shared<KernelConfig>,
}

/// Matrice publiée + état du refresh, tel que servi au frontend
#[derive(Debug, Serialize)]
pub struct MatrixView {
    #[serde(with = "time::serde::rfc3339::option")]
    pub generated_at: Option<OffsetDateTime>,
    pub domains: Vec<MatrixData>,
    pub loading: bool,
    pub last_error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExpandParams {
    instances: String,
}

#[derive(Debug, Serialize)]
struct DeviceModelView {
    name: String,
    descriptor: DeviceModelDescriptor,
    check_functions: Vec<String>,
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/system/config", get(get_system_config))
        .route("/matrix", get(get_matrix))
        .route("/matrix/domains", get(list_domains))
        .route("/matrix/summary", get(get_summary))
        .route("/matrix/refresh", post(refresh_matrix))
        .route("/matrix/{domain}", get(get_domain))
        .route("/expand", get(expand))
        .route("/device-models/{name}", get(get_device_model))
        .route("/config/cluster", get(get_cluster_config).put(put_cluster_config))
        .route("/config/legacy", get(get_legacy_config).put(put_legacy_config))
        .route("/rules/status", get(get_rules_status))
        .route("/rules/generate", post(generate_rules))
        .with_state(app_state)
}

fn matrix_view(store: &MatrixStore, filter: &MatrixFilter) -> MatrixView {
    let status = store.status();
    let snapshot = store.snapshot();
    MatrixView {
        generated_at: snapshot.as_ref().map(|s| s.generated_at),
        domains: snapshot.map(|s| filter_domains(&s.domains, filter)).unwrap_or_default(),
        loading: status.loading,
        last_error: status.last_error,
    }
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Json<KernelHealth> {
    Json(app.health_tracker.get_health(&app.store))
}

// GET /system/config (config effective)
async fn get_system_config(State(app): State<AppState>) -> Json<KernelConfig> {
    Json(app.cfg.lock().clone())
}

// GET /matrix?domain=&instance=&check_function=
async fn get_matrix(State(app): State<AppState>, Query(filter): Query<MatrixFilter>) -> Json<MatrixView> {
    Json(matrix_view(&app.store, &filter))
}

// GET /matrix/domains
async fn list_domains(State(app): State<AppState>) -> Json<Vec<String>> {
    let names = app
        .store
        .snapshot()
        .map(|s| s.domains.iter().map(|d| d.domain.clone()).collect())
        .unwrap_or_default();
    Json(names)
}

// GET /matrix/summary
async fn get_summary(State(app): State<AppState>) -> Json<Vec<DomainSummary>> {
    Json(app.store.snapshot().map(|s| summarize(&s.domains)).unwrap_or_default())
}

// GET /matrix/{domain}
async fn get_domain(State(app): State<AppState>, Path(domain): Path<String>) -> ApiResult<MatrixData> {
    let snapshot = app.store.snapshot();
    snapshot
        .as_ref()
        .and_then(|s| find_domain(&s.domains, &domain))
        .map(|d| Json(d.clone()))
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("unknown domain: {domain}")))
}

// POST /matrix/refresh (refresh forcé, cache de métriques ignoré)
async fn refresh_matrix(State(app): State<AppState>) -> ApiResult<MatrixView> {
    refresh_once(&app.pipeline, &app.store, true)
        .await
        .map_err(|e| api_error(StatusCode::BAD_GATEWAY, e))?;
    Ok(Json(matrix_view(&app.store, &MatrixFilter::default())))
}

// GET /expand?instances=su1-gpu[1-4]
async fn expand(Query(params): Query<ExpandParams>) -> Json<Vec<String>> {
    Json(expand_instances(&params.instances))
}

// GET /device-models/{name}
async fn get_device_model(State(app): State<AppState>, Path(name): Path<String>) -> ApiResult<DeviceModelView> {
    match app.pipeline.cluster().load_device_model(&name).await {
        Ok(descriptor) => Ok(Json(DeviceModelView {
            check_functions: extract_check_functions(&descriptor),
            name,
            descriptor,
        })),
        Err(e @ LoadError::NotFound { .. }) => Err(api_error(StatusCode::NOT_FOUND, e)),
        Err(e @ LoadError::InvalidName(_)) => Err(api_error(StatusCode::BAD_REQUEST, e)),
        Err(e) => Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e)),
    }
}

// fichier absent = document vide
fn missing_as_empty(result: Result<String, LoadError>) -> Result<String, ApiError> {
    match result {
        Ok(text) => Ok(text),
        Err(LoadError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e)),
    }
}

// GET /config/cluster
async fn get_cluster_config(State(app): State<AppState>) -> ApiResult<ParsedDocument> {
    let text = missing_as_empty(app.pipeline.cluster().read_cluster_yaml().await)?;
    Ok(Json(parse_document(&text)))
}

// PUT /config/cluster
async fn put_cluster_config(
    State(app): State<AppState>,
    Json(document): Json<ClusterDocument>,
) -> ApiResult<serde_json::Value> {
    let yaml = document
        .to_yaml()
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e))?;
    app.pipeline
        .cluster()
        .write_cluster_yaml(&yaml)
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e))?;
    Ok(Json(json!({ "ok": true, "devices": document.devices.len() })))
}

// GET /config/legacy
async fn get_legacy_config(State(app): State<AppState>) -> ApiResult<Sections> {
    let text = missing_as_empty(app.pipeline.cluster().read_legacy_text().await)?;
    Ok(Json(parse_sections(&text)))
}

// PUT /config/legacy
async fn put_legacy_config(
    State(app): State<AppState>,
    Json(sections): Json<Sections>,
) -> ApiResult<serde_json::Value> {
    app.pipeline
        .cluster()
        .write_legacy_text(&sections.to_text())
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e))?;
    Ok(Json(json!({ "ok": true, "device_groups": sections.device_groups.len() })))
}

// GET /rules/status
async fn get_rules_status(State(app): State<AppState>) -> Json<RulesStatus> {
    Json(app.rules.status().await)
}

// POST /rules/generate (corps optionnel : cluster_dir, output_dir)
async fn generate_rules(
    State(app): State<AppState>,
    body: Option<Json<GenerateRequest>>,
) -> ApiResult<RulesReport> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    app.rules.generate(request).await.map(Json).map_err(|e| {
        let code = match e {
            RulesError::MissingClusterDir(_) | RulesError::InvalidCommand(_) => StatusCode::BAD_REQUEST,
            RulesError::CommandNotFound(_) => StatusCode::NOT_FOUND,
            RulesError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            RulesError::Failed { .. } | RulesError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        api_error(code, e)
    })
}
