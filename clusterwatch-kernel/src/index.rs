/**
 * INDEX DES MÉTRIQUES - Résultats bulk Prometheus -> lookup imbriqué
 *
 * RÔLE :
 * Convertit les deux listes plates (CHECK, CHECK_INPUT) en index
 * domain -> hostname -> cf -> valeur, consommés par l'assemblage de la matrice.
 *
 * RÈGLES :
 * - Échantillon sans domain/hostname/cf, ou statut non numérique : ignoré
 * - Doublon (domain, hostname, cf) : le dernier gagne
 * - CHECK_INPUT : JSON tableau -> "a, b", JSON scalaire -> texte, sinon brut
 */

use crate::models::{RawMetricSample, STATUS_UNKNOWN};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

pub type MetricIndex<V> = BTreeMap<String, BTreeMap<String, BTreeMap<String, V>>>;
pub type StatusIndex = MetricIndex<u8>;
pub type InputIndex = MetricIndex<String>;

/// Compteurs de construction d'un index
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub accepted: usize,
    pub skipped: usize,
}

/// Les deux index issus d'un même cycle de requêtes
#[derive(Debug, Clone, Default)]
pub struct MetricSnapshot {
    pub status: StatusIndex,
    pub input: InputIndex,
    pub status_stats: IndexStats,
    pub input_stats: IndexStats,
}

impl MetricSnapshot {
    pub fn from_samples(status: &[RawMetricSample], input: &[RawMetricSample]) -> Self {
        let (status, status_stats) = build_status_index(status);
        let (input, input_stats) = build_input_index(input);
        Self { status, input, status_stats, input_stats }
    }
}

pub fn build_status_index(samples: &[RawMetricSample]) -> (StatusIndex, IndexStats) {
    build_index(samples, |raw| parse_status(raw))
}

pub fn build_input_index(samples: &[RawMetricSample]) -> (InputIndex, IndexStats) {
    build_index(samples, |raw| Some(render_input_value(raw)))
}

fn build_index<V>(
    samples: &[RawMetricSample],
    convert: impl Fn(&str) -> Option<V>,
) -> (MetricIndex<V>, IndexStats) {
    let mut index: MetricIndex<V> = BTreeMap::new();
    let mut stats = IndexStats::default();

    for sample in samples {
        let (Some(domain), Some(hostname), Some(cf)) = (
            non_empty(&sample.domain),
            non_empty(&sample.hostname),
            non_empty(&sample.cf),
        ) else {
            stats.skipped += 1;
            continue;
        };
        let Some(value) = convert(&sample.value) else {
            tracing::debug!("dropping sample {domain}/{hostname}/{cf}: bad value {:?}", sample.value);
            stats.skipped += 1;
            continue;
        };

        index
            .entry(domain.to_string())
            .or_default()
            .entry(hostname.to_string())
            .or_default()
            .insert(cf.to_string(), value);
        stats.accepted += 1;
    }

    (index, stats)
}

fn non_empty(label: &Option<String>) -> Option<&str> {
    label.as_deref().filter(|s| !s.is_empty())
}

/// "1", "1.0", " 2 " -> code de statut. Hors 0..=2 ou non numérique -> None
pub fn parse_status(raw: &str) -> Option<u8> {
    let number: f64 = raw.trim().parse().ok()?;
    if !number.is_finite() {
        return None;
    }
    let code = number.trunc();
    if (0.0..=f64::from(STATUS_UNKNOWN)).contains(&code) {
        Some(code as u8)
    } else {
        None
    }
}

/// Texte d'affichage d'une valeur CHECK_INPUT. Ne panique jamais.
pub fn render_input_value(raw: &str) -> String {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(items)) => items.iter().map(display_element).collect::<Vec<_>>().join(", "),
        Ok(other) => display_scalar(&other),
        Err(_) => raw.to_string(),
    }
}

fn display_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items.iter().map(display_element).collect::<Vec<_>>().join(","),
        Value::Object(_) => value.to_string(),
    }
}

// un null dans un tableau s'affiche vide
fn display_element(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        other => display_scalar(other),
    }
}
