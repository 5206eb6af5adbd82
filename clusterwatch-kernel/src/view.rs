use crate::models::{InstanceRow, MatrixData, STATUS_FAILED, STATUS_HEALTHY};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Filtres de lecture de la matrice (query string de GET /matrix)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MatrixFilter {
    pub domain: Option<String>,
    pub instance: Option<String>,
    pub check_function: Option<String>,
}

/// Compteurs par domaine pour la vue d'ensemble
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainSummary {
    pub domain: String,
    pub instances: usize,
    pub check_functions: usize,
    pub healthy: usize,
    pub failed: usize,
    pub unknown: usize,
}

impl DomainSummary {
    pub fn of(data: &MatrixData) -> Self {
        let mut summary = Self {
            domain: data.domain.clone(),
            instances: data.instances.len(),
            check_functions: data.check_functions().len(),
            healthy: 0,
            failed: 0,
            unknown: 0,
        };
        for cell in data.instances.values().flat_map(|row| row.values()) {
            match cell.value {
                STATUS_HEALTHY => summary.healthy += 1,
                STATUS_FAILED => summary.failed += 1,
                _ => summary.unknown += 1,
            }
        }
        summary
    }
}

pub fn summarize(domains: &[MatrixData]) -> Vec<DomainSummary> {
    domains.iter().map(DomainSummary::of).collect()
}

pub fn find_domain<'a>(domains: &'a [MatrixData], domain: &str) -> Option<&'a MatrixData> {
    domains.iter().find(|d| d.domain == domain)
}

/// Applique les filtres : retire lignes et colonnes, n'ajoute jamais de cellule.
/// Un domaine vidé par un filtre instance / check_function disparaît.
pub fn filter_domains(domains: &[MatrixData], filter: &MatrixFilter) -> Vec<MatrixData> {
    let instance = filter.instance.as_deref().map(str::to_lowercase);
    let check_function = filter.check_function.as_deref().map(str::to_lowercase);

    domains
        .iter()
        .filter(|d| filter.domain.as_deref().map_or(true, |wanted| d.domain == wanted))
        .filter_map(|d| {
            let instances: BTreeMap<String, InstanceRow> = d
                .instances
                .iter()
                .filter(|(name, _)| matches_substring(name, instance.as_deref()))
                .map(|(name, row)| {
                    let row: InstanceRow = row
                        .iter()
                        .filter(|(cf, _)| matches_substring(cf, check_function.as_deref()))
                        .map(|(cf, cell)| (cf.clone(), cell.clone()))
                        .collect();
                    (name.clone(), row)
                })
                .collect();

            let emptied_by_instance = instance.is_some() && instances.is_empty();
            let emptied_by_cf = check_function.is_some()
                && instances.values().all(|row| row.is_empty());
            if emptied_by_instance || emptied_by_cf {
                return None;
            }
            Some(MatrixData { domain: d.domain.clone(), instances })
        })
        .collect()
}

fn matches_substring(value: &str, needle_lower: Option<&str>) -> bool {
    needle_lower.map_or(true, |needle| value.to_lowercase().contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::MetricSnapshot;
    use crate::matrix::assemble_domain;
    use crate::matrix::tests::sample;

    fn domains() -> Vec<MatrixData> {
        let metrics = MetricSnapshot::from_samples(
            &[
                sample("gpu", "su1-gpu1", "gpu_temp_check", "0"),
                sample("gpu", "su1-gpu2", "gpu_temp_check", "1"),
                sample("gpu", "su1-gpu1", "ib_link_check", "0"),
            ],
            &[],
        );
        let cfs = vec!["gpu_temp_check".to_string(), "ib_link_check".to_string()];
        vec![
            assemble_domain(
                "gpu",
                &["su1-gpu1".into(), "su1-gpu2".into()],
                &cfs,
                &metrics.status,
                &metrics.input,
            ),
            assemble_domain("storage", &["storage01-a".into()], &["disk_check".into()], &metrics.status, &metrics.input),
        ]
    }

    #[test]
    fn test_summary_counts_cells() {
        let summaries = summarize(&domains());
        assert_eq!(
            summaries[0],
            DomainSummary {
                domain: "gpu".into(),
                instances: 2,
                check_functions: 2,
                healthy: 2,
                failed: 1,
                unknown: 1,
            }
        );
        assert_eq!(summaries[1].unknown, 1);
    }

    #[test]
    fn test_no_filter_keeps_everything() {
        let all = domains();
        assert_eq!(filter_domains(&all, &MatrixFilter::default()), all);
    }

    #[test]
    fn test_domain_filter_is_exact() {
        let filter = MatrixFilter { domain: Some("gp".into()), ..Default::default() };
        assert!(filter_domains(&domains(), &filter).is_empty());

        let filter = MatrixFilter { domain: Some("gpu".into()), ..Default::default() };
        let out = filter_domains(&domains(), &filter);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].domain, "gpu");
    }

    #[test]
    fn test_instance_and_check_filters_are_case_insensitive_substrings() {
        let filter = MatrixFilter {
            instance: Some("GPU2".into()),
            check_function: Some("TEMP".into()),
            ..Default::default()
        };
        let out = filter_domains(&domains(), &filter);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].instances.len(), 1);
        let row = &out[0].instances["su1-gpu2"];
        assert_eq!(row.len(), 1);
        assert_eq!(row["gpu_temp_check"].value, 1);
    }

    #[test]
    fn test_find_domain() {
        let all = domains();
        assert_eq!(find_domain(&all, "storage").map(|d| d.instances.len()), Some(1));
        assert!(find_domain(&all, "nope").is_none());
    }
}
