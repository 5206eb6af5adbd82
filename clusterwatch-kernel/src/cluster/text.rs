//! Parser du format texte historique `cluster_all.txt`.
//!
//! Exemple :
//! ```text
//! monitor_mode = alertmanager
//! device_group "R6500" "su1-gpu[1-32]" {
//!     hardware_model {
//!         cpu_count_check 2
//!     }
//!     available_exporters {
//!         node_exporter
//!     }
//! }
//! network "ib0" "guid.map" "links.txt" {
//!     links_check
//!     nccl_test 180
//! }
//! system {
//!     prometheus_status_check
//! }
//! ```
//!
//! Le parsing est un fold sur les lignes d'un état explicite (`Parser`) :
//! aucune ligne ne provoque d'erreur, les lignes hors bloc sont ignorées.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const AVAILABLE_HEADER: &str = "Available check functions:";
const EXPORTER_ALLOW_LIST: [&str; 2] = ["node_exporter", "dcgm_exporter"];

/// Valeur d'un champ : texte (nombres normalisés) ou drapeau pour une ligne sans valeur
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Flag(bool),
    Text(String),
}

pub type Fields = BTreeMap<String, FieldValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelSection {
    Hardware,
    Performance,
    Service,
    ActiveTest,
    AvailableExporters,
}

impl ModelSection {
    pub const ALL: [ModelSection; 5] = [
        ModelSection::Hardware,
        ModelSection::Performance,
        ModelSection::Service,
        ModelSection::ActiveTest,
        ModelSection::AvailableExporters,
    ];

    pub fn keyword(self) -> &'static str {
        match self {
            ModelSection::Hardware => "hardware_model",
            ModelSection::Performance => "performance_model",
            ModelSection::Service => "service_model",
            ModelSection::ActiveTest => "active_test",
            ModelSection::AvailableExporters => "available_exporters",
        }
    }

    fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            // "harward_model" : faute de frappe présente dans des fichiers existants
            "hardware_model" | "harward_model" => Some(ModelSection::Hardware),
            "performance_model" => Some(ModelSection::Performance),
            "service_model" => Some(ModelSection::Service),
            "active_test" => Some(ModelSection::ActiveTest),
            "available_exporters" => Some(ModelSection::AvailableExporters),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DeviceGroup {
    pub name: String,
    pub devices: String,
    #[serde(default)]
    pub hardware_model: Fields,
    #[serde(default)]
    pub performance_model: Fields,
    #[serde(default)]
    pub service_model: Fields,
    #[serde(default)]
    pub active_test: Fields,
    #[serde(default)]
    pub available_exporters: Fields,
}

impl DeviceGroup {
    pub fn new(name: &str, devices: &str) -> Self {
        Self { name: name.to_string(), devices: devices.to_string(), ..Default::default() }
    }

    pub fn section(&self, section: ModelSection) -> &Fields {
        match section {
            ModelSection::Hardware => &self.hardware_model,
            ModelSection::Performance => &self.performance_model,
            ModelSection::Service => &self.service_model,
            ModelSection::ActiveTest => &self.active_test,
            ModelSection::AvailableExporters => &self.available_exporters,
        }
    }

    fn section_mut(&mut self, section: ModelSection) -> &mut Fields {
        match section {
            ModelSection::Hardware => &mut self.hardware_model,
            ModelSection::Performance => &mut self.performance_model,
            ModelSection::Service => &mut self.service_model,
            ModelSection::ActiveTest => &mut self.active_test,
            ModelSection::AvailableExporters => &mut self.available_exporters,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Network {
    pub name: String,
    pub guid_mapping: String,
    pub link: String,
    #[serde(default)]
    pub links_check: bool,
    #[serde(default)]
    pub checks: Fields,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Tenant {
    pub name: String,
    pub devices: String,
    #[serde(default)]
    pub checks: Fields,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SystemSection {
    #[serde(default)]
    pub checks: BTreeMap<String, bool>,
}

/// Forme structurée de cluster_all.txt, telle qu'éditée par le dashboard
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Sections {
    #[serde(default)]
    pub settings: String,
    #[serde(default)]
    pub device_groups: BTreeMap<String, DeviceGroup>,
    #[serde(default)]
    pub networks: BTreeMap<String, Network>,
    #[serde(default)]
    pub tenants: BTreeMap<String, Tenant>,
    #[serde(default)]
    pub system: SystemSection,
    #[serde(default)]
    pub available_checks: String,
}

/// Bloc courant de la machine à états
#[derive(Debug, Clone, PartialEq, Default)]
enum Block {
    #[default]
    Idle,
    AvailableChecks,
    Group {
        name: String,
        model: Option<ModelSection>,
        // accolades ouvertes depuis le marqueur de section (0 = marqueur sans accolade)
        model_depth: usize,
    },
    Network(String),
    Tenant(String),
    System,
}

#[derive(Debug, Default)]
struct Parser {
    sections: Sections,
    block: Block,
}

/// Parse le format texte. Fonction totale : ne renvoie jamais d'erreur.
pub fn parse_sections(content: &str) -> Sections {
    content.lines().fold(Parser::default(), Parser::step).finish()
}

impl Parser {
    fn step(mut self, raw: &str) -> Self {
        let line = raw.trim();

        if line.starts_with(AVAILABLE_HEADER) {
            self.block = Block::AvailableChecks;
            push_line(&mut self.sections.available_checks, line);
            return self;
        }
        if line.starts_with("monitor_mode") {
            if self.block == Block::AvailableChecks {
                self.block = Block::Idle;
            }
            push_line(&mut self.sections.settings, line);
            return self;
        }
        if self.block == Block::AvailableChecks {
            if !line.is_empty() {
                push_line(&mut self.sections.available_checks, line);
            }
            return self;
        }
        if line.is_empty() || line.starts_with('#') {
            return self;
        }
        if line == "}" {
            self.close_block();
            return self;
        }

        let keyword = leading_keyword(line);
        match keyword {
            "device_group" => {
                if let Some([name, devices]) = required_args(line) {
                    self.sections.device_groups.insert(name.to_string(), DeviceGroup::new(name, devices));
                    self.block = Block::Group { name: name.to_string(), model: None, model_depth: 0 };
                }
                return self;
            }
            "network" => {
                if let Some([name, guid_mapping, link]) = required_args(line) {
                    let network = Network {
                        name: name.to_string(),
                        guid_mapping: guid_mapping.to_string(),
                        link: link.to_string(),
                        ..Default::default()
                    };
                    self.sections.networks.insert(name.to_string(), network);
                    self.block = Block::Network(name.to_string());
                }
                return self;
            }
            "tenant" => {
                if let Some([name, devices]) = required_args(line) {
                    let tenant = Tenant { name: name.to_string(), devices: devices.to_string(), ..Default::default() };
                    self.sections.tenants.insert(name.to_string(), tenant);
                    self.block = Block::Tenant(name.to_string());
                }
                return self;
            }
            "system" => {
                self.block = Block::System;
                return self;
            }
            _ => {}
        }

        if let Block::Group { model, model_depth, .. } = &mut self.block {
            if let Some(section) = ModelSection::from_keyword(keyword) {
                *model = Some(section);
                *model_depth = usize::from(line.ends_with('{'));
                return self;
            }
            if model.is_some() && *model_depth > 0 && line.ends_with('{') {
                *model_depth += 1;
            }
        }

        self.record(line);
        self
    }

    fn close_block(&mut self) {
        if let Block::Group { model, model_depth, .. } = &mut self.block {
            if model.is_some() && *model_depth > 0 {
                *model_depth -= 1;
                if *model_depth == 0 {
                    *model = None;
                }
                return;
            }
        }
        self.block = Block::Idle;
    }

    fn record(&mut self, line: &str) {
        match &self.block {
            Block::System => {
                self.sections.system.checks.insert(line.to_string(), true);
            }
            Block::Group { name, model: Some(section), .. } => {
                let Some(group) = self.sections.device_groups.get_mut(name) else { return };
                let (key, value) = parse_field(line);
                if *section == ModelSection::AvailableExporters {
                    if EXPORTER_ALLOW_LIST.contains(&key.as_str()) {
                        group.section_mut(*section).insert(key, FieldValue::Flag(true));
                    }
                } else {
                    group.section_mut(*section).insert(key, value);
                }
            }
            Block::Network(name) => {
                let Some(network) = self.sections.networks.get_mut(name) else { return };
                if line.contains("links_check") {
                    network.links_check = true;
                } else {
                    let (key, value) = parse_field(line);
                    network.checks.insert(key, value);
                }
            }
            Block::Tenant(name) => {
                let Some(tenant) = self.sections.tenants.get_mut(name) else { return };
                let (key, value) = parse_field(line);
                tenant.checks.insert(key, value);
            }
            Block::Group { model: None, .. } | Block::Idle | Block::AvailableChecks => {}
        }
    }

    fn finish(mut self) -> Sections {
        if self.sections.available_checks.is_empty() {
            self.sections.available_checks = DEFAULT_AVAILABLE_CHECKS.to_string();
        }
        self.sections
    }
}

fn push_line(buf: &mut String, line: &str) {
    buf.push_str(line);
    buf.push('\n');
}

/// Premier mot de la ligne, sans '{' ni ':' collés
fn leading_keyword(line: &str) -> &str {
    line.split_whitespace()
        .next()
        .unwrap_or_default()
        .trim_end_matches(['{', ':'])
}

/// `device_group "G" "devs" {` -> ["G", "devs"] ; les chaînes vides gardent leur position
fn quoted_args(line: &str) -> Vec<&str> {
    line.split('"').skip(1).step_by(2).collect()
}

/// Les N premiers arguments entre guillemets, tous non vides, sinon l'en-tête est rejeté
fn required_args<const N: usize>(line: &str) -> Option<[&str; N]> {
    let args = quoted_args(line);
    let head: [&str; N] = args.get(..N)?.try_into().ok()?;
    head.iter().all(|arg| !arg.is_empty()).then_some(head)
}

/// "cpu_count 4" -> ("cpu_count", "4") ; "dmesg_check" -> ("dmesg_check", true)
fn parse_field(line: &str) -> (String, FieldValue) {
    let mut parts = line.split_whitespace();
    let key = parts.next().unwrap_or_default().to_string();
    let rest: Vec<&str> = parts.collect();
    if rest.is_empty() {
        (key, FieldValue::Flag(true))
    } else {
        (key, FieldValue::Text(normalize_number(&rest.join(" "))))
    }
}

/// "04" -> "4", "1e3" -> "1000", "0.80" -> "0.8" ; le reste est inchangé
fn normalize_number(value: &str) -> String {
    match value.parse::<f64>() {
        Ok(n) if n.is_finite() => {
            if n.fract() == 0.0 && n.abs() < 1e15 {
                format!("{}", n as i64)
            } else {
                format!("{n}")
            }
        }
        _ => value.to_string(),
    }
}

impl Sections {
    /// Ré-écrit le format texte. Pas d'aller-retour au byte près :
    /// commentaires et lignes hors blocs sont perdus.
    pub fn to_text(&self) -> String {
        let mut out = String::new();

        for line in self.settings.lines() {
            push_line(&mut out, line);
        }
        if !self.settings.is_empty() {
            out.push('\n');
        }

        for group in self.device_groups.values() {
            push_line(&mut out, &format!("device_group \"{}\" \"{}\" {{", group.name, group.devices));
            for section in ModelSection::ALL {
                let fields = group.section(section);
                if fields.is_empty() {
                    continue;
                }
                push_line(&mut out, &format!("    {} {{", section.keyword()));
                write_fields(&mut out, fields, "        ");
                push_line(&mut out, "    }");
            }
            push_line(&mut out, "}");
            out.push('\n');
        }

        for network in self.networks.values() {
            push_line(
                &mut out,
                &format!("network \"{}\" \"{}\" \"{}\" {{", network.name, network.guid_mapping, network.link),
            );
            if network.links_check {
                push_line(&mut out, "    links_check");
            }
            write_fields(&mut out, &network.checks, "    ");
            push_line(&mut out, "}");
            out.push('\n');
        }

        for tenant in self.tenants.values() {
            push_line(&mut out, &format!("tenant \"{}\" \"{}\" {{", tenant.name, tenant.devices));
            write_fields(&mut out, &tenant.checks, "    ");
            push_line(&mut out, "}");
            out.push('\n');
        }

        let enabled: Vec<&String> = self.system.checks.iter().filter(|(_, on)| **on).map(|(k, _)| k).collect();
        if !enabled.is_empty() {
            push_line(&mut out, "system {");
            for check in enabled {
                push_line(&mut out, &format!("    {check}"));
            }
            push_line(&mut out, "}");
            out.push('\n');
        }

        // en dernier : le bloc de référence capture tout jusqu'au prochain monitor_mode ;
        // la référence par défaut n'est jamais écrite, la relecture la restitue
        if self.available_checks != DEFAULT_AVAILABLE_CHECKS {
            out.push_str(&self.available_checks);
        }
        out
    }
}

fn write_fields(out: &mut String, fields: &Fields, indent: &str) {
    for (key, value) in fields {
        match value {
            FieldValue::Flag(true) => push_line(out, &format!("{indent}{key}")),
            FieldValue::Flag(false) => {}
            FieldValue::Text(text) => push_line(out, &format!("{indent}{key} {text}")),
        }
    }
}

/// Référence affichée quand le fichier ne contient pas de bloc "Available check functions:"
pub const DEFAULT_AVAILABLE_CHECKS: &str = "# Available Check Functions Reference

## Hardware Model Checks
cpu_count_check <expected_count>
gpu_count_check <expected_count>
memory_stick_count_check <expected_count>
memory_speed_check <expected_speed_mhz>
nvme_count_check <expected_count>
nvme_disk_total_size_check <expected_size_gb>
ssd_count_check <expected_count>
ssd_disk_total_size_check <expected_size_gb>
infiniband_count_check <speed> <expected_count>
ethernet_count_check <expected_count>
psu_count_check <expected_count>
fan_count_check <expected_count>
temp_sensor_count_check <expected_count>

## Performance Model Checks
cpu_util_check <max_utilization_ratio>
gpu_ecc_check <max_ecc_errors>
gpu_temp_check <max_temperature_c>
link_flapping_check <max_flaps>
memory_usage_check <max_usage_ratio>
swap_usage_check <max_usage_ratio>
fs_usage_check <max_usage_ratio>
fs_free_volume_check <volume_pattern> <min_free_gb>
pcie_downgrade_check <device_file>

## Service Model Checks
fs_mount_check <mount_point>
dmesg_check

## Active Test Checks
gpu_stress_test
cpu_stress_test
memory_stress_test
network_stress_test

## Network Checks
links_check
nccl_test <bandwidth_gbps>

## Tenant Checks
ping_server_check <comma_separated_ips>

## System Checks
all_exporters_status_check
alertmanager_status_check
prometheus_status_check
opensm_status_check
database_status_check

## Available Exporters
node_exporter
dcgm_exporter
";

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
monitor_mode = alertmanager

device_group "R6500" "su1-gpu[1-32]" {
    hardware_model {
        cpu_count_check 2
        gpu_count_check 08
        # commentaire ignoré
    }
    performance_model {
        gpu_temp_check 85.0
        fs_free_volume_check /data 100
    }
    service_model {
        dmesg_check
    }
    available_exporters {
        node_exporter {
            textfile
        }
        dcgm_exporter
        custom_exporter
    }
}

network "ib0" "guid.map" "links.txt" {
    links_check
    nccl_test 180
}

tenant "teamA" "su1-gpu[1-8]" {
    ping_server_check 10.0.0.1,10.0.0.2
}

system {
    prometheus_status_check
    # pas un check
    database_status_check
}

Available check functions:
cpu_count_check <expected_count>

dmesg_check
"#;

    #[test]
    fn test_marker_line_then_field() {
        let sections = parse_sections("device_group \"G\" \"devs\"\nhardware_model\ncpu_count 4\n");
        let group = &sections.device_groups["G"];
        assert_eq!(group.devices, "devs");
        assert_eq!(group.hardware_model["cpu_count"], FieldValue::Text("4".into()));
    }

    #[test]
    fn test_full_document() {
        let s = parse_sections(SAMPLE);

        assert_eq!(s.settings, "monitor_mode = alertmanager\n");

        let g = &s.device_groups["R6500"];
        assert_eq!(g.devices, "su1-gpu[1-32]");
        assert_eq!(g.hardware_model.len(), 2);
        assert_eq!(g.hardware_model["gpu_count_check"], FieldValue::Text("8".into()));
        assert_eq!(g.performance_model["gpu_temp_check"], FieldValue::Text("85".into()));
        assert_eq!(g.performance_model["fs_free_volume_check"], FieldValue::Text("/data 100".into()));
        assert_eq!(g.service_model["dmesg_check"], FieldValue::Flag(true));
        assert!(g.active_test.is_empty());

        let exporters: Vec<&String> = g.available_exporters.keys().collect();
        assert_eq!(exporters, vec!["dcgm_exporter", "node_exporter"]);

        let n = &s.networks["ib0"];
        assert_eq!(n.guid_mapping, "guid.map");
        assert_eq!(n.link, "links.txt");
        assert!(n.links_check);
        assert_eq!(n.checks["nccl_test"], FieldValue::Text("180".into()));
        assert!(!n.checks.contains_key("links_check"));

        let t = &s.tenants["teamA"];
        assert_eq!(t.checks["ping_server_check"], FieldValue::Text("10.0.0.1,10.0.0.2".into()));

        let system: Vec<&String> = s.system.checks.keys().collect();
        assert_eq!(system, vec!["database_status_check", "prometheus_status_check"]);

        assert_eq!(s.available_checks, "Available check functions:\ncpu_count_check <expected_count>\ndmesg_check\n");
    }

    #[test]
    fn test_closing_brace_resets_pointers() {
        let s = parse_sections("tenant \"T\" \"x\" {\n}\norphan_check 3\n");
        assert!(s.tenants["T"].checks.is_empty());

        // marqueur sans accolade : le `}` ferme le groupe entier
        let s = parse_sections("device_group \"G\" \"d\" {\nservice_model\n}\nlate_check 1\n");
        assert!(s.device_groups["G"].service_model.is_empty());
    }

    #[test]
    fn test_never_fails_on_garbage() {
        let s = parse_sections("}}}\n\"\"\"\ndevice_group\nnetwork \"only-one\"\n\u{0}\n");
        assert!(s.device_groups.is_empty());
        assert!(s.networks.is_empty());
        assert_eq!(s.available_checks, DEFAULT_AVAILABLE_CHECKS);
    }

    #[test]
    fn test_empty_quoted_argument_rejects_header() {
        let s = parse_sections(
            "network \"n\" \"\" \"links.txt\" \"x\" {\nping_check 1\n}\n\
             device_group \"\" \"d[1-2]\" {\n}\n\
             tenant \"T\" \"\" {\n}\n\
             network \"ok\" \"guids.txt\" \"links.txt\" {\n}\n",
        );
        assert!(!s.networks.contains_key("n"));
        assert!(s.device_groups.is_empty());
        assert!(s.tenants.is_empty());
        assert_eq!(s.networks["ok"].guid_mapping, "guids.txt");
        assert_eq!(s.networks["ok"].link, "links.txt");
    }

    #[test]
    fn test_data_lines_starting_with_keywords_are_fields() {
        let s = parse_sections("device_group \"G\" \"d\" {\nperformance_model {\nnetwork_usage_check 0.9\nsystem_load_check 4\n}\n}\n");
        let perf = &s.device_groups["G"].performance_model;
        assert_eq!(perf["network_usage_check"], FieldValue::Text("0.9".into()));
        assert_eq!(perf["system_load_check"], FieldValue::Text("4".into()));
    }

    #[test]
    fn test_monitor_mode_ends_available_checks() {
        let s = parse_sections("Available check functions:\na_check\nmonitor_mode = pull\ndevice_group \"G\" \"d\"\n");
        assert_eq!(s.available_checks, "Available check functions:\na_check\n");
        assert_eq!(s.settings, "monitor_mode = pull\n");
        assert!(s.device_groups.contains_key("G"));
    }

    #[test]
    fn test_normalize_number() {
        assert_eq!(normalize_number("4"), "4");
        assert_eq!(normalize_number("04"), "4");
        assert_eq!(normalize_number("0.80"), "0.8");
        assert_eq!(normalize_number("1e3"), "1000");
        assert_eq!(normalize_number("inf"), "inf");
        assert_eq!(normalize_number("4GB"), "4GB");
    }

    #[test]
    fn test_to_text_reparses_to_same_sections() {
        let first = parse_sections(SAMPLE);
        let second = parse_sections(&first.to_text());
        assert_eq!(first, second);
    }

    #[test]
    fn test_default_available_checks_not_written_back() {
        let s = parse_sections("device_group \"G\" \"d\" {\n}\n");
        assert_eq!(s.available_checks, DEFAULT_AVAILABLE_CHECKS);

        let text = s.to_text();
        assert!(!text.contains("Available Check Functions Reference"));
        assert_eq!(parse_sections(&text), s);
    }
}
