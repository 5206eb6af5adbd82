/**
 * CLUSTERWATCH KERNEL - Point d'entrée du serveur de supervision cluster
 *
 * RÔLE : Orchestration des modules : config, pipeline de matrice, refresh périodique,
 * génération des règles et API HTTP.
 *
 * ARCHITECTURE : cluster.yml + device models + Prometheus (CHECK / CHECK_INPUT)
 * -> matrice domaine/instance/check function publiée en mémoire -> API REST.
 */

mod cache;
mod checks;
mod cluster;
mod config;
mod expand;
mod health;
mod http;
mod index;
mod loaders;
mod matrix;
mod models;
mod prometheus;
mod refresh;
mod rules;
mod state;
mod view;

use crate::cache::{Clock, SystemClock};
use crate::config::load_config;
use crate::health::HealthTracker;
use crate::http::AppState;
use crate::loaders::ClusterFiles;
use crate::prometheus::PrometheusClient;
use crate::refresh::{spawn_refresher, MatrixStore, Pipeline};
use crate::rules::RulesGenerator;
use crate::state::new_state;

use anyhow::Context;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("clusterwatch_kernel=info")),
        )
        .init();

    let cfg_loaded = load_config().await;
    tracing::info!(
        "cluster dir {}, prometheus {}",
        cfg_loaded.cluster.dir.display(),
        cfg_loaded.prometheus.base_url
    );

    // pipeline : fichiers du cluster + backend de métriques + cache TTL
    let files = ClusterFiles::from_config(&cfg_loaded.cluster);
    let prometheus = PrometheusClient::new(&cfg_loaded.prometheus).context("failed to build prometheus client")?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let cache_ttl = time::Duration::seconds(i64::try_from(cfg_loaded.refresh.metrics_cache_ttl_secs).unwrap_or(i64::MAX));
    let pipeline = Arc::new(Pipeline::new(files, prometheus, clock, cache_ttl));

    let rules = RulesGenerator::new(&cfg_loaded.rules, &cfg_loaded.cluster.dir).context("invalid rules.command")?;

    // refresh périodique (premier run immédiat)
    let store = Arc::new(MatrixStore::new());
    spawn_refresher(pipeline.clone(), store.clone(), cfg_loaded.refresh.interval_secs);

    let addr = cfg_loaded.listen;
    let app_state = AppState {
        store,
        pipeline,
        rules: Arc::new(rules),
        health_tracker: HealthTracker::new(),
        cfg: new_state(cfg_loaded),
    };
    let app = http::build_router(app_state);

    tracing::info!("listening on http://{addr}");
    let listener = TcpListener::bind(addr).await.with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app).await.context("http server stopped")?;
    Ok(())
}
