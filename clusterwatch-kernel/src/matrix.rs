/**
 * ASSEMBLAGE DE LA MATRICE - domaine -> instance -> check function
 *
 * RÔLE :
 * Croise la config cluster (devices), les plages d'instances développées,
 * les check functions de chaque device model et les deux index de métriques.
 *
 * FONCTIONNEMENT :
 * 1. Pour chaque device : expand(instances) x extract(device model)
 * 2. Chaque paire est initialisée à { value: 2, inputValue: "" }
 * 3. Overlay CHECK puis CHECK_INPUT, uniquement sur les paires déclarées
 *
 * Les échantillons hors produit cartésien sont ignorés. Un device model
 * illisible dégrade son domaine (lignes sans check function) sans bloquer
 * les autres ; seul l'échec de TOUS les modèles est remonté.
 */

use crate::checks::extract_check_functions;
use crate::expand::expand_instances;
use crate::index::{InputIndex, StatusIndex};
use crate::loaders::LoadError;
use crate::models::{DeviceDescriptor, DeviceModelDescriptor, InstanceRow, MatrixData, StatusCell};
use std::collections::BTreeMap;
use std::future::Future;

/// Source des descripteurs de device model (fichiers, mémoire...)
pub trait DeviceModelLoader {
    fn load_device_model(
        &self,
        device_model: &str,
    ) -> impl Future<Output = Result<DeviceModelDescriptor, LoadError>> + Send;
}

#[derive(Debug, thiserror::Error)]
pub enum AssembleError {
    #[error("no device model could be loaded ({failed} failed)")]
    NoDeviceModels { failed: usize },
}

/// Construit une matrice par device, dans l'ordre d'entrée
pub async fn assemble<L: DeviceModelLoader>(
    devices: &[DeviceDescriptor],
    loader: &L,
    status: &StatusIndex,
    input: &InputIndex,
) -> Result<Vec<MatrixData>, AssembleError> {
    let mut out = Vec::with_capacity(devices.len());
    let mut failed = 0usize;

    for device in devices {
        let check_functions = match loader.load_device_model(&device.device_model).await {
            Ok(model) => extract_check_functions(&model),
            Err(e) => {
                tracing::warn!("device model {} unavailable, domain degraded: {e}", device.device_model);
                failed += 1;
                Vec::new()
            }
        };
        let instances = expand_instances(&device.instances);
        out.push(assemble_domain(&device.device_model, &instances, &check_functions, status, input));
    }

    if !devices.is_empty() && failed == devices.len() {
        return Err(AssembleError::NoDeviceModels { failed });
    }
    Ok(out)
}

/// Matrice d'un domaine à partir de ses instances et check functions déjà résolues
pub fn assemble_domain(
    domain: &str,
    instances: &[String],
    check_functions: &[String],
    status: &StatusIndex,
    input: &InputIndex,
) -> MatrixData {
    let mut rows: BTreeMap<String, InstanceRow> = instances
        .iter()
        .map(|instance| {
            let row = check_functions
                .iter()
                .map(|cf| (cf.clone(), StatusCell::unknown()))
                .collect();
            (instance.clone(), row)
        })
        .collect();

    if let Some(hosts) = status.get(domain) {
        overlay(&mut rows, hosts, |cell, value| cell.value = *value);
    }
    if let Some(hosts) = input.get(domain) {
        overlay(&mut rows, hosts, |cell, value: &String| cell.input_value = value.clone());
    }

    MatrixData { domain: domain.to_string(), instances: rows }
}

// n'écrit que dans les cellules existantes
fn overlay<V>(
    rows: &mut BTreeMap<String, InstanceRow>,
    hosts: &BTreeMap<String, BTreeMap<String, V>>,
    apply: impl Fn(&mut StatusCell, &V),
) {
    for (hostname, cfs) in hosts {
        let Some(row) = rows.get_mut(hostname) else { continue };
        for (cf, value) in cfs {
            if let Some(cell) = row.get_mut(cf) {
                apply(cell, value);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::index::MetricSnapshot;
    use crate::models::RawMetricSample;
    use std::collections::HashMap;

    /// Loader en mémoire ; un modèle absent renvoie NotFound
    #[derive(Default)]
    pub(crate) struct MemoryModels(pub HashMap<String, DeviceModelDescriptor>);

    impl MemoryModels {
        pub(crate) fn with(mut self, name: &str, hardware: &[&str]) -> Self {
            let model = DeviceModelDescriptor {
                hardware_model: Some(hardware.iter().map(|s| s.to_string()).collect()),
                ..Default::default()
            };
            self.0.insert(name.to_string(), model);
            self
        }
    }

    impl DeviceModelLoader for MemoryModels {
        async fn load_device_model(&self, device_model: &str) -> Result<DeviceModelDescriptor, LoadError> {
            self.0.get(device_model).cloned().ok_or_else(|| LoadError::NotFound {
                name: device_model.to_string(),
                tried: vec![format!("memory:{device_model}")],
            })
        }
    }

    pub(crate) fn sample(domain: &str, hostname: &str, cf: &str, value: &str) -> RawMetricSample {
        RawMetricSample {
            domain: Some(domain.into()),
            hostname: Some(hostname.into()),
            cf: Some(cf.into()),
            value: value.into(),
        }
    }

    fn device(model: &str, instances: &str) -> DeviceDescriptor {
        DeviceDescriptor { device_model: model.into(), instances: instances.into() }
    }

    #[tokio::test]
    async fn test_status_sample_overlays_declared_cell() {
        let models = MemoryModels::default().with("D", &["C", "other_check 3"]);
        let metrics = MetricSnapshot::from_samples(&[sample("D", "H", "C", "1")], &[]);

        let out = assemble(&[device("D", "H,H2")], &models, &metrics.status, &metrics.input)
            .await
            .unwrap();

        assert_eq!(out.len(), 1);
        let d = &out[0];
        assert_eq!(d.domain, "D");
        assert_eq!(d.instances["H"]["C"], StatusCell { value: 1, input_value: String::new() });
        assert_eq!(d.instances["H"]["other_check"], StatusCell::unknown());
        assert_eq!(d.instances["H2"]["C"], StatusCell::unknown());
        assert_eq!(d.instances["H2"]["other_check"], StatusCell::unknown());
    }

    #[tokio::test]
    async fn test_undeclared_samples_are_invisible() {
        let models = MemoryModels::default().with("D", &["C"]);
        let metrics = MetricSnapshot::from_samples(
            &[sample("D", "ghost", "C", "1"), sample("D", "H", "ghost_check", "1"), sample("E", "H", "C", "1")],
            &[sample("D", "ghost", "C", "\"x\"")],
        );

        let out = assemble(&[device("D", "H")], &models, &metrics.status, &metrics.input)
            .await
            .unwrap();

        assert_eq!(out[0].instances.len(), 1);
        assert_eq!(out[0].instances["H"].len(), 1);
        assert_eq!(out[0].instances["H"]["C"], StatusCell::unknown());
    }

    #[tokio::test]
    async fn test_input_overlay_independent_of_status() {
        let models = MemoryModels::default().with("D", &["C"]);
        let metrics = MetricSnapshot::from_samples(&[], &[sample("D", "H", "C", "[\"a\",\"b\"]")]);

        let out = assemble(&[device("D", "H")], &models, &metrics.status, &metrics.input)
            .await
            .unwrap();

        assert_eq!(out[0].instances["H"]["C"], StatusCell { value: 2, input_value: "a, b".into() });
    }

    #[tokio::test]
    async fn test_missing_model_degrades_only_its_domain() {
        let models = MemoryModels::default().with("good", &["C"]);
        let metrics = MetricSnapshot::from_samples(&[sample("good", "g1", "C", "0")], &[]);
        let devices = [device("missing", "m[1-2]"), device("good", "g[1-2]")];

        let out = assemble(&devices, &models, &metrics.status, &metrics.input).await.unwrap();

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].domain, "missing");
        assert_eq!(out[0].instances.len(), 2);
        assert!(out[0].instances.values().all(|row| row.is_empty()));
        assert_eq!(out[1].instances["g1"]["C"].value, 0);
        assert_eq!(out[1].instances["g2"]["C"].value, 2);
    }

    #[tokio::test]
    async fn test_all_models_missing_is_an_error() {
        let models = MemoryModels::default();
        let metrics = MetricSnapshot::default();
        let err = assemble(&[device("a", "x"), device("b", "y")], &models, &metrics.status, &metrics.input)
            .await
            .unwrap_err();
        assert!(matches!(err, AssembleError::NoDeviceModels { failed: 2 }));
    }

    #[tokio::test]
    async fn test_no_devices_gives_empty_matrix() {
        let metrics = MetricSnapshot::default();
        let out = assemble(&[], &MemoryModels::default(), &metrics.status, &metrics.input)
            .await
            .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_assemble_domain_is_deterministic() {
        let metrics = MetricSnapshot::from_samples(
            &[sample("D", "n1", "a", "0"), sample("D", "n2", "b", "1")],
            &[sample("D", "n1", "b", "7")],
        );
        let instances = expand_instances("n[1-3]");
        let cfs = vec!["a".to_string(), "b".to_string()];
        let first = assemble_domain("D", &instances, &cfs, &metrics.status, &metrics.input);
        let second = assemble_domain("D", &instances, &cfs, &metrics.status, &metrics.input);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
        assert_eq!(first.instances["n1"]["b"].input_value, "7");
    }
}
