use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Codes de statut publiés par les check functions
pub const STATUS_HEALTHY: u8 = 0;
pub const STATUS_FAILED: u8 = 1;
pub const STATUS_UNKNOWN: u8 = 2;

/// Une ligne `devices:` du cluster.yml : un modèle + un champ de plages d'instances
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct DeviceDescriptor {
    #[serde(default)]
    pub device_model: String,
    #[serde(default)]
    pub instances: String,
}

/// Document `device_models/<model>.yml`
/// Chaque tableau contient des lignes "<check_function> <args...>"
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct DeviceModelDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_model: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performance_model: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_model: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_test_suite: Option<Vec<String>>,
    /// Champs inconnus conservés tels quels
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl DeviceModelDescriptor {
    /// Tableaux connus, dans l'ordre d'extraction : hardware, performance, service, active test
    pub fn check_lines(&self) -> [&[String]; 4] {
        [
            self.hardware_model.as_deref().unwrap_or_default(),
            self.performance_model.as_deref().unwrap_or_default(),
            self.service_model.as_deref().unwrap_or_default(),
            self.active_test_suite.as_deref().unwrap_or_default(),
        ]
    }
}

/// Échantillon brut issu d'une requête bulk (CHECK ou CHECK_INPUT).
/// Les labels peuvent manquer : la validation est faite par l'index.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct RawMetricSample {
    pub domain: Option<String>,
    pub hostname: Option<String>,
    pub cf: Option<String>,
    pub value: String,
}

/// Cellule de la matrice
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct StatusCell {
    pub value: u8,
    #[serde(rename = "inputValue", default)]
    pub input_value: String,
}

impl StatusCell {
    pub fn unknown() -> Self {
        Self { value: STATUS_UNKNOWN, input_value: String::new() }
    }
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::unknown()
    }
}

pub type InstanceRow = BTreeMap<String, StatusCell>;

/// Matrice d'un domaine (= un device_model) : instance -> check function -> cellule
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct MatrixData {
    pub domain: String,
    pub instances: BTreeMap<String, InstanceRow>,
}

impl MatrixData {
    /// Check functions présentes dans au moins une ligne, triées
    pub fn check_functions(&self) -> Vec<String> {
        let mut cfs: Vec<String> = self
            .instances
            .values()
            .flat_map(|row| row.keys().cloned())
            .collect();
        cfs.sort();
        cfs.dedup();
        cfs
    }
}
