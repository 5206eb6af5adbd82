/**
 * DOCUMENTS DE CONFIGURATION DU CLUSTER
 *
 * RÔLE :
 * Modèles structurés des deux fichiers édités par le dashboard :
 * - cluster_all.txt : format texte historique (device_group / network / tenant / system)
 * - cluster.yml     : descripteur YAML (devices / networks / tenants / epilogue / labels)
 *
 * FONCTIONNEMENT :
 * - text::parse_sections : machine à états sur les lignes, n'échoue jamais
 * - yaml::parse_document  : serde_yaml, erreur récupérée -> document par défaut
 * - Sections::to_text / ClusterDocument::to_yaml : ré-écriture (pas au byte près)
 */

pub mod text;
pub mod yaml;

pub use text::{parse_sections, Sections};
pub use yaml::{parse_document, ClusterDocument, ParsedDocument};
