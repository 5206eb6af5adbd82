//! Client HTTP pour l'API de requêtes Prometheus.
//!
//! Deux requêtes bulk par cycle : le statut (`CHECK`) et les valeurs
//! d'entrée (`CHECK_INPUT`), sans filtre de labels. La validation des
//! échantillons est faite par l'index, pas ici.

use crate::config::PrometheusConf;
use crate::models::RawMetricSample;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

/// Erreurs possibles lors d'une requête au backend de métriques
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("HTTP request failed: {0}")]
    Http(String),
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("backend returned HTTP {0}")]
    Status(u16),
    #[error("failed to parse response: {0}")]
    Parse(String),
    #[error("query failed: {0}")]
    Backend(String),
}

impl From<reqwest::Error> for QueryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            QueryError::Timeout
        } else if err.is_connect() {
            QueryError::Connection(err.to_string())
        } else {
            QueryError::Http(err.to_string())
        }
    }
}

/// Source des deux jeux d'échantillons bulk
pub trait MetricsSource {
    fn status_samples(&self) -> impl Future<Output = Result<Vec<RawMetricSample>, QueryError>> + Send;
    fn input_samples(&self) -> impl Future<Output = Result<Vec<RawMetricSample>, QueryError>> + Send;
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    #[serde(rename = "resultType", default)]
    result_type: String,
    #[serde(default)]
    result: Vec<VectorRow>,
}

#[derive(Debug, Deserialize)]
struct VectorRow {
    #[serde(default)]
    metric: HashMap<String, String>,
    // [timestamp, "valeur"] ; absent pour un résultat de type matrix
    #[serde(default)]
    value: Option<(serde_json::Value, String)>,
}

#[derive(Debug, Clone)]
pub struct PrometheusClient {
    client: Client,
    base_url: String,
    status_metric: String,
    input_metric: String,
}

impl PrometheusClient {
    pub fn new(conf: &PrometheusConf) -> Result<Self, QueryError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(conf.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: conf.base_url.trim_end_matches('/').to_string(),
            status_metric: conf.status_metric.clone(),
            input_metric: conf.input_metric.clone(),
        })
    }

    /// Requête instantanée `GET /api/v1/query?query=<promql>`
    pub async fn query(&self, promql: &str) -> Result<Vec<RawMetricSample>, QueryError> {
        let url = format!("{}/api/v1/query", self.base_url);
        let response = self.client.get(&url).query(&[("query", promql)]).send().await?;

        // Prometheus renvoie 400/422 avec un corps JSON d'erreur : on le lit si possible
        let status = response.status();
        let body = response.text().await?;
        match serde_json::from_str::<QueryResponse>(&body) {
            Ok(parsed) => samples_from_response(parsed),
            Err(_) if !status.is_success() => Err(QueryError::Status(status.as_u16())),
            Err(e) => Err(QueryError::Parse(e.to_string())),
        }
    }
}

fn samples_from_response(response: QueryResponse) -> Result<Vec<RawMetricSample>, QueryError> {
    if response.status != "success" {
        return Err(QueryError::Backend(response.error.unwrap_or(response.status)));
    }
    let Some(data) = response.data else {
        return Ok(Vec::new());
    };
    if data.result_type != "vector" && !data.result.is_empty() {
        tracing::debug!("unexpected resultType {}, keeping rows with a value", data.result_type);
    }

    Ok(data
        .result
        .into_iter()
        .filter_map(|mut row| {
            let (_, value) = row.value?;
            Some(RawMetricSample {
                domain: row.metric.remove("domain"),
                hostname: row.metric.remove("hostname"),
                cf: row.metric.remove("cf"),
                value,
            })
        })
        .collect())
}

impl MetricsSource for PrometheusClient {
    async fn status_samples(&self) -> Result<Vec<RawMetricSample>, QueryError> {
        self.query(&self.status_metric).await
    }

    async fn input_samples(&self) -> Result<Vec<RawMetricSample>, QueryError> {
        self.query(&self.input_metric).await
    }
}
