use crate::cluster::ClusterDocument;
use crate::config::ClusterConf;
use crate::matrix::DeviceModelLoader;
use crate::models::DeviceModelDescriptor;
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Erreurs de chargement des documents du cluster
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("YAML error in {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("{name} not found (tried {})", .tried.join(", "))]
    NotFound { name: String, tried: Vec<String> },
    #[error("invalid device model name: {0}")]
    InvalidName(String),
}

/// Source du document cluster.yml consommé par le pipeline
pub trait ClusterSource {
    fn load_cluster_document(&self) -> impl Future<Output = Result<ClusterDocument, LoadError>> + Send;
}

/// Accès fichiers au répertoire du cluster :
/// cluster.yml, cluster_all.txt et device_models/<model>.yml|.yaml
#[derive(Debug, Clone)]
pub struct ClusterFiles {
    document: PathBuf,
    legacy_file: PathBuf,
    models_dir: PathBuf,
}

impl ClusterFiles {
    #[cfg(test)]
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self::from_config(&ClusterConf { dir: dir.as_ref().to_path_buf(), ..ClusterConf::default() })
    }

    pub fn from_config(conf: &ClusterConf) -> Self {
        Self {
            document: conf.dir.join(&conf.document),
            legacy_file: conf.dir.join(&conf.legacy_file),
            models_dir: conf.dir.join(&conf.device_models_dir),
        }
    }

    pub async fn read_cluster_yaml(&self) -> Result<String, LoadError> {
        read_text(&self.document).await
    }

    pub async fn write_cluster_yaml(&self, content: &str) -> Result<(), LoadError> {
        write_text(&self.document, content).await
    }

    pub async fn read_legacy_text(&self) -> Result<String, LoadError> {
        read_text(&self.legacy_file).await
    }

    pub async fn write_legacy_text(&self, content: &str) -> Result<(), LoadError> {
        write_text(&self.legacy_file, content).await
    }

    /// Essaie <model>.yml puis <model>.yaml
    fn model_candidates(&self, device_model: &str) -> Result<[PathBuf; 2], LoadError> {
        let valid = !device_model.is_empty()
            && !device_model.contains(['/', '\\'])
            && device_model != "."
            && device_model != "..";
        if !valid {
            return Err(LoadError::InvalidName(device_model.to_string()));
        }
        Ok([
            self.models_dir.join(format!("{device_model}.yml")),
            self.models_dir.join(format!("{device_model}.yaml")),
        ])
    }
}

impl ClusterSource for ClusterFiles {
    async fn load_cluster_document(&self) -> Result<ClusterDocument, LoadError> {
        let text = read_text(&self.document).await?;
        ClusterDocument::from_yaml_strict(&text).map_err(|source| LoadError::Yaml {
            path: self.document.display().to_string(),
            source,
        })
    }
}

impl DeviceModelLoader for ClusterFiles {
    async fn load_device_model(&self, device_model: &str) -> Result<DeviceModelDescriptor, LoadError> {
        let candidates = self.model_candidates(device_model)?;

        for path in &candidates {
            let text = match fs::read_to_string(path).await {
                Ok(text) => text,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(source) => return Err(LoadError::Io { path: path.display().to_string(), source }),
            };
            if text.trim().is_empty() {
                return Ok(DeviceModelDescriptor::default());
            }
            return serde_yaml::from_str(&text).map_err(|source| LoadError::Yaml {
                path: path.display().to_string(),
                source,
            });
        }

        Err(LoadError::NotFound {
            name: device_model.to_string(),
            tried: candidates.iter().map(|p| p.display().to_string()).collect(),
        })
    }
}

async fn read_text(path: &Path) -> Result<String, LoadError> {
    fs::read_to_string(path).await.map_err(|source| LoadError::Io {
        path: path.display().to_string(),
        source,
    })
}

async fn write_text(path: &Path, content: &str) -> Result<(), LoadError> {
    let io_err = |source| LoadError::Io { path: path.display().to_string(), source };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(io_err)?;
    }
    fs::write(path, content).await.map_err(io_err)?;
    tracing::info!("wrote {} ({} bytes)", path.display(), content.len());
    Ok(())
}
