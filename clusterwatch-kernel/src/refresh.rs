/**
 * RAFRAÎCHISSEMENT DE LA MATRICE - pipeline complet + publication atomique
 *
 * RÔLE :
 * Exécute le pipeline (cluster.yml -> device models -> requêtes bulk -> matrice)
 * et publie le résultat dans le MatrixStore lu par l'API.
 *
 * FONCTIONNEMENT :
 * - Refresh périodique (refresh.interval_secs) + refresh manuel (POST /matrix/refresh)
 * - Les deux requêtes CHECK / CHECK_INPUT partent en parallèle, chacune peut échouer seule
 * - Snapshot de métriques mis en cache (TTL) ; refresh forcé = invalidation
 * - Échec fatal (cluster.yml illisible) : l'ancienne matrice reste publiée
 * - Runs concurrents autorisés : le dernier terminé gagne, `loading` reste vrai
 *   tant qu'au moins un run est en cours
 */

use crate::cache::{Clock, TtlCache};
use crate::index::{IndexStats, MetricSnapshot};
use crate::loaders::{ClusterSource, LoadError};
use crate::matrix::{assemble, AssembleError, DeviceModelLoader};
use crate::models::MatrixData;
use crate::prometheus::MetricsSource;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use time::OffsetDateTime;

/// Erreurs fatales pour un cycle de refresh
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("cluster document unavailable: {0}")]
    ClusterDocument(#[from] LoadError),
    #[error(transparent)]
    Assemble(#[from] AssembleError),
}

/// Résultat publié d'un cycle complet
#[derive(Debug, Clone, Serialize)]
pub struct MatrixSnapshot {
    #[serde(with = "time::serde::rfc3339")]
    pub generated_at: OffsetDateTime,
    pub domains: Vec<MatrixData>,
    pub status_stats: IndexStats,
    pub input_stats: IndexStats,
    pub metrics_from_cache: bool,
    /// Âge du snapshot de métriques réutilisé (0 s'il vient d'être requêté)
    pub metrics_age_secs: i64,
}

pub struct Pipeline<C, M> {
    cluster: C,
    metrics: M,
    cache: TtlCache<MetricSnapshot>,
    clock: Arc<dyn Clock>,
}

impl<C, M> Pipeline<C, M>
where
    C: ClusterSource + DeviceModelLoader + Sync,
    M: MetricsSource + Sync,
{
    pub fn new(cluster: C, metrics: M, clock: Arc<dyn Clock>, cache_ttl: time::Duration) -> Self {
        Self { cluster, metrics, cache: TtlCache::new(clock.clone(), cache_ttl), clock }
    }

    pub fn cluster(&self) -> &C {
        &self.cluster
    }

    /// Un cycle complet. `force` ignore le snapshot de métriques en cache.
    pub async fn run(&self, force: bool) -> Result<MatrixSnapshot, PipelineError> {
        let document = self.cluster.load_cluster_document().await?;

        if force {
            self.cache.invalidate();
        }
        let (metrics, metrics_from_cache) = match self.cache.get() {
            Some(cached) => (cached, true),
            None => (self.fetch_metrics().await, false),
        };
        let metrics_age_secs = match metrics_from_cache {
            true => self.cache.age().map_or(0, |age| age.whole_seconds()),
            false => 0,
        };

        let domains = assemble(&document.devices, &self.cluster, &metrics.status, &metrics.input).await?;

        Ok(MatrixSnapshot {
            generated_at: self.clock.now(),
            domains,
            status_stats: metrics.status_stats,
            input_stats: metrics.input_stats,
            metrics_from_cache,
            metrics_age_secs,
        })
    }

    async fn fetch_metrics(&self) -> MetricSnapshot {
        let (status, input) = tokio::join!(self.metrics.status_samples(), self.metrics.input_samples());
        let complete = status.is_ok() && input.is_ok();

        let status = status.unwrap_or_else(|e| {
            tracing::warn!("status query failed, all statuses unknown: {e}");
            Vec::new()
        });
        let input = input.unwrap_or_else(|e| {
            tracing::warn!("input query failed, input values empty: {e}");
            Vec::new()
        });

        let snapshot = MetricSnapshot::from_samples(&status, &input);
        tracing::debug!(
            "metrics indexed: status {:?}, input {:?}",
            snapshot.status_stats,
            snapshot.input_stats
        );
        // un snapshot partiel n'est pas mis en cache : le prochain cycle réessaie
        if complete {
            self.cache.put(snapshot.clone());
        }
        snapshot
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    snapshot: Option<Arc<MatrixSnapshot>>,
    last_error: Option<String>,
    last_attempt: Option<OffsetDateTime>,
    successes: u64,
    failures: u64,
}

/// État vu par l'API, copié sous verrou
#[derive(Debug, Clone, Serialize)]
pub struct StoreStatus {
    pub loading: bool,
    pub last_error: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_attempt: Option<OffsetDateTime>,
    pub successes: u64,
    pub failures: u64,
}

/// Dernière matrice publiée + état des refresh
#[derive(Debug, Default)]
pub struct MatrixStore {
    inner: Mutex<StoreInner>,
    in_flight: AtomicUsize,
}

/// Marque un run en cours ; décrémente au drop, même en cas de panique
pub struct RunGuard<'a> {
    store: &'a MatrixStore,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.store.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MatrixStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) -> RunGuard<'_> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        RunGuard { store: self }
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
    }

    pub fn publish(&self, snapshot: MatrixSnapshot) -> Arc<MatrixSnapshot> {
        let snapshot = Arc::new(snapshot);
        let mut inner = self.inner.lock();
        inner.last_attempt = Some(snapshot.generated_at);
        inner.snapshot = Some(snapshot.clone());
        inner.last_error = None;
        inner.successes += 1;
        snapshot
    }

    pub fn record_failure(&self, error: &PipelineError, at: OffsetDateTime) {
        let mut inner = self.inner.lock();
        inner.last_error = Some(error.to_string());
        inner.last_attempt = Some(at);
        inner.failures += 1;
    }

    pub fn snapshot(&self) -> Option<Arc<MatrixSnapshot>> {
        self.inner.lock().snapshot.clone()
    }

    pub fn status(&self) -> StoreStatus {
        let inner = self.inner.lock();
        StoreStatus {
            loading: self.is_loading(),
            last_error: inner.last_error.clone(),
            last_attempt: inner.last_attempt,
            successes: inner.successes,
            failures: inner.failures,
        }
    }
}

/// Un refresh complet, publié dans le store
pub async fn refresh_once<C, M>(
    pipeline: &Pipeline<C, M>,
    store: &MatrixStore,
    force: bool,
) -> Result<Arc<MatrixSnapshot>, PipelineError>
where
    C: ClusterSource + DeviceModelLoader + Sync,
    M: MetricsSource + Sync,
{
    let _guard = store.begin();
    match pipeline.run(force).await {
        Ok(snapshot) => {
            tracing::info!(
                "matrix refreshed: {} domains, {} status / {} input samples",
                snapshot.domains.len(),
                snapshot.status_stats.accepted,
                snapshot.input_stats.accepted
            );
            Ok(store.publish(snapshot))
        }
        Err(e) => {
            tracing::error!("matrix refresh failed, keeping previous matrix: {e}");
            store.record_failure(&e, pipeline.clock.now());
            Err(e)
        }
    }
}

/// Démarre le refresh périodique (premier run immédiat)
pub fn spawn_refresher<C, M>(pipeline: Arc<Pipeline<C, M>>, store: Arc<MatrixStore>, interval_secs: u64)
where
    C: ClusterSource + DeviceModelLoader + Send + Sync + 'static,
    M: MetricsSource + Send + Sync + 'static,
{
    let period = std::time::Duration::from_secs(interval_secs.max(1));
    tracing::info!("starting matrix refresher (every {}s)", period.as_secs());

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            // erreur déjà journalisée et enregistrée dans le store
            let _ = refresh_once(&pipeline, &store, false).await;
        }
    });
}
