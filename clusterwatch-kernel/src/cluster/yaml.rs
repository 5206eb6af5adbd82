use crate::models::DeviceDescriptor;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Descripteur YAML du cluster (cluster.yml).
/// Champs connus typés ; le reste passe par `extra` sans être perdu.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterDocument {
    #[serde(default, deserialize_with = "null_as_default")]
    pub devices: Vec<DeviceDescriptor>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub networks: Vec<NetworkEntry>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tenants: Vec<TenantEntry>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub system: SystemEntry,
    #[serde(default, deserialize_with = "null_as_default")]
    pub request_labels: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub set_labels: BTreeMap<String, String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkEntry {
    #[serde(default)]
    pub network: String,
    #[serde(default)]
    pub nodes: String,
    #[serde(default)]
    pub links: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TenantEntry {
    #[serde(default)]
    pub tenant: String,
    #[serde(default)]
    pub instances: String,
}

/// Section `system:` ; `epilogue` = commandes de post-traitement
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemEntry {
    #[serde(default, deserialize_with = "null_as_default")]
    pub epilogue: Vec<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// Résultat d'un parsing tolérant : document (éventuellement par défaut) + erreur récupérée
#[derive(Debug, Clone, Serialize)]
pub struct ParsedDocument {
    pub document: ClusterDocument,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// `devices:` sans valeur -> null en YAML
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Parsing tolérant pour l'éditeur : une erreur donne le document par défaut
pub fn parse_document(text: &str) -> ParsedDocument {
    match ClusterDocument::from_yaml_strict(text) {
        Ok(document) => ParsedDocument { document, error: None },
        Err(e) => {
            tracing::warn!("cluster YAML invalid, falling back to empty document: {e}");
            ParsedDocument { document: ClusterDocument::default(), error: Some(e.to_string()) }
        }
    }
}

impl ClusterDocument {
    /// Parsing strict, utilisé par le pipeline (échec = refresh abandonné)
    pub fn from_yaml_strict(text: &str) -> Result<Self, serde_yaml::Error> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text)
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}
