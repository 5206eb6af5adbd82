/**
 * GÉNÉRATION DES RÈGLES PROMETHEUS - pilotage de l'outil externe
 *
 * RÔLE :
 * Lance `<command> generate-configs --cluster-model <dir> --output <dir>`
 * pour produire les règles d'alerting à partir du répertoire du cluster.
 *
 * FONCTIONNEMENT :
 * - Commande configurable (rules.command), découpée façon shell
 * - Timeout dur : le processus est tué si le délai expire
 * - Rapport : sortie standard + fichiers de règles trouvés dans le répertoire de sortie
 * - status() : sonde `<command> --version` pour l'écran de configuration
 */

use crate::config::RulesConf;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use walkdir::WalkDir;

const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Erreurs possibles lors de la génération des règles
#[derive(Debug, thiserror::Error)]
pub enum RulesError {
    #[error("rules command not found: {0}")]
    CommandNotFound(String),
    #[error("invalid rules command: {0}")]
    InvalidCommand(String),
    #[error("cluster directory does not exist: {0}")]
    MissingClusterDir(String),
    #[error("rules command timed out after {0}s")]
    Timeout(u64),
    #[error("rules command failed (exit code {code:?}): {stderr}")]
    Failed { code: Option<i32>, stderr: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Paramètres optionnels d'une génération (POST /rules/generate)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateRequest {
    pub cluster_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RulesReport {
    pub command: String,
    pub output_dir: PathBuf,
    pub stdout: String,
    pub generated_files: usize,
    pub rule_files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RulesStatus {
    pub available: bool,
    pub command: String,
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RulesGenerator {
    program: String,
    args: Vec<String>,
    cluster_dir: PathBuf,
    output_dir: PathBuf,
    timeout: Duration,
}

impl RulesGenerator {
    pub fn new(conf: &RulesConf, cluster_dir: &Path) -> Result<Self, RulesError> {
        let mut words = shell_words::split(&conf.command)
            .map_err(|e| RulesError::InvalidCommand(format!("{}: {e}", conf.command)))?
            .into_iter();
        let program = words
            .next()
            .ok_or_else(|| RulesError::InvalidCommand("empty command".into()))?;

        Ok(Self {
            program,
            args: words.collect(),
            cluster_dir: cluster_dir.to_path_buf(),
            output_dir: conf.output_dir.clone(),
            timeout: Duration::from_secs(conf.timeout_secs.max(1)),
        })
    }

    pub fn command_line(&self) -> String {
        std::iter::once(&self.program)
            .chain(&self.args)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub async fn status(&self) -> RulesStatus {
        let command = self.command_line();
        match self.run(&["--version".to_string()], VERSION_CHECK_TIMEOUT).await {
            Ok(output) => {
                let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
                RulesStatus {
                    available: true,
                    command,
                    version: Some(if output.status.success() && !version.is_empty() {
                        version
                    } else {
                        "unknown".to_string()
                    }),
                    error: None,
                }
            }
            // la commande existe mais la sonde a échoué : disponible, version inconnue
            Err(e @ RulesError::Timeout(_)) => RulesStatus {
                available: true,
                command,
                version: Some("unknown".to_string()),
                error: Some(e.to_string()),
            },
            Err(e) => RulesStatus { available: false, command, version: None, error: Some(e.to_string()) },
        }
    }

    pub async fn generate(&self, request: GenerateRequest) -> Result<RulesReport, RulesError> {
        let cluster_dir = request.cluster_dir.unwrap_or_else(|| self.cluster_dir.clone());
        let output_dir = request.output_dir.unwrap_or_else(|| self.output_dir.clone());

        if !tokio::fs::try_exists(&cluster_dir).await.unwrap_or(false) {
            return Err(RulesError::MissingClusterDir(cluster_dir.display().to_string()));
        }
        tokio::fs::create_dir_all(&output_dir).await?;

        let args = [
            "generate-configs".to_string(),
            "--cluster-model".to_string(),
            cluster_dir.display().to_string(),
            "--output".to_string(),
            output_dir.display().to_string(),
        ];
        let command = format!("{} {}", self.command_line(), args.join(" "));
        tracing::info!("generating prometheus rules: {command}");

        let output = self.run(&args, self.timeout).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            tracing::error!("rules command failed ({:?}): {stderr}", output.status.code());
            return Err(RulesError::Failed { code: output.status.code(), stderr });
        }

        let scan_dir = output_dir.clone();
        let files = tokio::task::spawn_blocking(move || collect_files(&scan_dir))
            .await
            .map_err(|e| RulesError::Io(std::io::Error::other(e)))??;
        let rule_files = rule_like(&files);
        tracing::info!("rules generated: {} files, {} rule files", files.len(), rule_files.len());

        Ok(RulesReport {
            command,
            output_dir,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            generated_files: files.len(),
            rule_files,
        })
    }

    async fn run(&self, extra: &[String], timeout: Duration) -> Result<Output, RulesError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .args(extra)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match tokio::time::timeout(timeout, cmd.output()).await {
            Err(_) => Err(RulesError::Timeout(timeout.as_secs())),
            Ok(Err(e)) if e.kind() == ErrorKind::NotFound => Err(RulesError::CommandNotFound(self.program.clone())),
            Ok(Err(e)) => Err(RulesError::Io(e)),
            Ok(Ok(output)) => Ok(output),
        }
    }
}

// parcours récursif, fichiers uniquement ; les liens symboliques ne sont pas suivis
fn collect_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir) {
        let entry = entry.map_err(std::io::Error::from)?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn rule_like(files: &[PathBuf]) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = files
        .iter()
        .filter(|path| {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            name.ends_with(".yml") || name.ends_with(".yaml") || name.contains("rules") || name.contains("prometheus")
        })
        .cloned()
        .collect();
    out.sort();
    out.dedup();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn generator(command: &str, cluster_dir: &Path, output_dir: &Path, timeout_secs: u64) -> RulesGenerator {
        let conf = RulesConf {
            command: command.to_string(),
            output_dir: output_dir.to_path_buf(),
            timeout_secs,
        };
        RulesGenerator::new(&conf, cluster_dir).unwrap()
    }

    #[test]
    fn test_command_is_shell_split() {
        let dir = TempDir::new().unwrap();
        let g = generator("python3 '/opt/super alarm/main.py'", dir.path(), dir.path(), 5);
        assert_eq!(g.program, "python3");
        assert_eq!(g.args, vec!["/opt/super alarm/main.py"]);

        let conf = RulesConf { command: "  ".into(), ..RulesConf::default() };
        assert!(matches!(RulesGenerator::new(&conf, dir.path()), Err(RulesError::InvalidCommand(_))));
        let conf = RulesConf { command: "bad 'quote".into(), ..RulesConf::default() };
        assert!(matches!(RulesGenerator::new(&conf, dir.path()), Err(RulesError::InvalidCommand(_))));
    }

    #[test]
    fn test_rule_like_filter() {
        let files = vec![
            PathBuf::from("out/b.yaml"),
            PathBuf::from("out/a.yml"),
            PathBuf::from("out/recording_rules.txt"),
            PathBuf::from("out/prometheus.conf"),
            PathBuf::from("out/README.md"),
        ];
        assert_eq!(
            rule_like(&files),
            vec![
                PathBuf::from("out/a.yml"),
                PathBuf::from("out/b.yaml"),
                PathBuf::from("out/prometheus.conf"),
                PathBuf::from("out/recording_rules.txt"),
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_loop_is_not_followed() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("alerts.yml"), "groups: []\n").unwrap();
        std::os::unix::fs::symlink(".", dir.path().join("loop")).unwrap();

        let files = collect_files(dir.path()).unwrap();
        assert_eq!(files, vec![dir.path().join("alerts.yml")]);
        assert_eq!(rule_like(&files).len(), 1);
    }

    #[tokio::test]
    async fn test_missing_command() {
        let dir = TempDir::new().unwrap();
        let g = generator("clusterwatch-no-such-binary", dir.path(), &dir.path().join("out"), 5);
        let status = g.status().await;
        assert!(!status.available);
        assert!(status.version.is_none());

        let err = g.generate(GenerateRequest::default()).await.unwrap_err();
        assert!(matches!(err, RulesError::CommandNotFound(_)));
    }

    #[tokio::test]
    async fn test_missing_cluster_dir() {
        let dir = TempDir::new().unwrap();
        let g = generator("true", &dir.path().join("absent"), dir.path(), 5);
        let err = g.generate(GenerateRequest::default()).await.unwrap_err();
        assert!(matches!(err, RulesError::MissingClusterDir(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_generate_reports_rule_files() {
        let dir = TempDir::new().unwrap();
        let cluster = dir.path().join("cluster");
        std::fs::create_dir(&cluster).unwrap();
        let out = dir.path().join("rules_out");

        // $0 = generate-configs, $4 = répertoire de sortie
        let script = r#"sh -c 'mkdir -p "$4/sub" && echo g: > "$4/gpu.yml" && echo x > "$4/sub/alert_rules.txt" && echo n > "$4/notes.md" && echo done' "#;
        let g = generator(script, &cluster, &out, 10);
        let report = g.generate(GenerateRequest::default()).await.unwrap();

        assert_eq!(report.stdout.trim(), "done");
        assert_eq!(report.generated_files, 3);
        assert_eq!(report.rule_files, vec![out.join("gpu.yml"), out.join("sub").join("alert_rules.txt")]);
        assert!(report.command.contains("--cluster-model"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_command_carries_stderr() {
        let dir = TempDir::new().unwrap();
        let g = generator("sh -c 'echo boom >&2; exit 3'", dir.path(), &dir.path().join("out"), 10);
        let err = g.generate(GenerateRequest::default()).await.unwrap_err();
        match err {
            RulesError::Failed { code, stderr } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_command() {
        let dir = TempDir::new().unwrap();
        let g = generator("sh -c 'sleep 5'", dir.path(), &dir.path().join("out"), 1);
        let err = g.generate(GenerateRequest::default()).await.unwrap_err();
        assert!(matches!(err, RulesError::Timeout(1)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_status_reads_version() {
        let dir = TempDir::new().unwrap();
        let g = generator("sh -c 'echo superalarm 2.1.0'", dir.path(), dir.path(), 5);
        let status = g.status().await;
        assert!(status.available);
        assert_eq!(status.version.as_deref(), Some("superalarm 2.1.0"));
    }
}
