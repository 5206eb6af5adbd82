use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::fs;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct KernelConfig {
    pub listen: SocketAddr,
    pub prometheus: PrometheusConf,
    pub cluster: ClusterConf,
    pub refresh: RefreshConf,
    pub rules: RulesConf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct PrometheusConf {
    pub base_url: String,
    pub timeout_secs: u64,
    pub status_metric: String, // CHECK{domain, hostname, cf}
    pub input_metric: String,  // CHECK_INPUT{domain, hostname, cf}
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ClusterConf {
    pub dir: PathBuf,
    pub document: String,
    pub legacy_file: String,
    pub device_models_dir: String, // relatif à `dir`
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RefreshConf {
    pub interval_secs: u64,
    pub metrics_cache_ttl_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RulesConf {
    pub command: String, // ex: "superalarm" ou "python3 /opt/superalarm/main.py"
    pub output_dir: PathBuf,
    pub timeout_secs: u64,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
            prometheus: PrometheusConf::default(),
            cluster: ClusterConf::default(),
            refresh: RefreshConf::default(),
            rules: RulesConf::default(),
        }
    }
}

impl Default for PrometheusConf {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9090".into(),
            timeout_secs: 10,
            status_metric: "CHECK".into(),
            input_metric: "CHECK_INPUT".into(),
        }
    }
}

impl Default for ClusterConf {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./cluster"),
            document: "cluster.yml".into(),
            legacy_file: "cluster_all.txt".into(),
            device_models_dir: "device_models".into(),
        }
    }
}

impl Default for RefreshConf {
    fn default() -> Self {
        Self { interval_secs: 60, metrics_cache_ttl_secs: 30 }
    }
}

impl Default for RulesConf {
    fn default() -> Self {
        Self {
            command: "superalarm".into(),
            output_dir: PathBuf::from("./prometheus_rules"),
            timeout_secs: 300,
        }
    }
}

/// Charge la config depuis CLUSTERWATCH_KERNEL_CONFIG (défaut kernel.yaml).
/// Fichier absent ou invalide : config par défaut, jamais d'échec.
pub async fn load_config() -> KernelConfig {
    let path = std::env::var("CLUSTERWATCH_KERNEL_CONFIG").unwrap_or_else(|_| "kernel.yaml".into());
    let mut cfg = load_config_from(Path::new(&path)).await;

    if let Ok(url) = std::env::var("CLUSTERWATCH_PROMETHEUS_URL") {
        if !url.trim().is_empty() {
            cfg.prometheus.base_url = url;
        }
    }
    cfg
}

pub async fn load_config_from(path: &Path) -> KernelConfig {
    if !path.exists() {
        tracing::warn!("no {}, using default config", path.display());
        return KernelConfig::default();
    }
    let txt = fs::read_to_string(path).await.unwrap_or_default();
    parse_config(&txt).unwrap_or_else(|e| {
        tracing::warn!("invalid config {}: {e}", path.display());
        KernelConfig::default()
    })
}

pub fn parse_config(txt: &str) -> Result<KernelConfig, serde_yaml::Error> {
    if txt.trim().is_empty() {
        return Ok(KernelConfig::default());
    }
    serde_yaml::from_str(txt)
}
