//! Environment materialization and script execution.
//!
//! [`ExecutionService`] is the seam; [`ToolchainService`] drives the real
//! ecosystem tools (`uv`, `Rscript`) as subprocesses.
use crate::environment::Ecosystem;
use crate::error::{IoContext, ScriptError};
use crate::util::truncate_bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const TARGET_PLACEHOLDER: &str = "{target}";
const TRACEBACK_LIMIT: usize = 16 * 1024;

/// Captured failure of a script subprocess.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionFailure {
    pub exit_code: Option<i32>,
    /// Last non-empty stderr line, usually the raised exception.
    pub error: String,
    pub traceback: String,
}

impl fmt::Display for ExecutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.exit_code {
            Some(code) => write!(f, "exit code {code}: {}", self.error),
            None => write!(f, "terminated by signal: {}", self.error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProcessOutcome {
    Succeeded { stdout: String },
    Failed(ExecutionFailure),
}

impl ProcessOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ProcessOutcome::Succeeded { .. })
    }

    pub fn failure(&self) -> Option<&ExecutionFailure> {
        match self {
            ProcessOutcome::Failed(failure) => Some(failure),
            ProcessOutcome::Succeeded { .. } => None,
        }
    }
}

pub trait ExecutionService {
    /// Prepare `workspace` as a project of `ecosystem`.
    fn init(&self, ecosystem: Ecosystem, workspace: &Path) -> Result<(), ScriptError>;

    /// Materialize the dependencies declared by the workspace manifest.
    fn sync(&self, workspace: &Path) -> Result<(), ScriptError>;

    /// Execute `target` inside `workspace`. A failing script is an `Ok`
    /// carrying [`ProcessOutcome::Failed`].
    fn run(
        &self,
        workspace: &Path,
        target: &str,
        ecosystem: Ecosystem,
    ) -> Result<ProcessOutcome, ScriptError>;
}

/// Command lines for one ecosystem; split with shell quoting rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolchainCommands {
    pub init: String,
    pub sync: String,
    /// `{target}` is replaced by the script filename.
    pub run: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    pub python: ToolchainCommands,
    pub r: ToolchainCommands,
    pub manifest_attempts: u32,
    pub manifest_backoff_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            python: ToolchainCommands {
                init: "uv init --bare --no-workspace".to_string(),
                sync: "uv sync".to_string(),
                run: "uv run python {target}".to_string(),
            },
            r: ToolchainCommands {
                init: "Rscript -e \"renv::init(bare = TRUE)\"".to_string(),
                sync: "Rscript -e \"renv::restore()\"".to_string(),
                run: "Rscript {target}".to_string(),
            },
            manifest_attempts: 3,
            manifest_backoff_ms: 50,
        }
    }
}

impl ServiceConfig {
    pub fn commands(&self, ecosystem: Ecosystem) -> &ToolchainCommands {
        match ecosystem {
            Ecosystem::Python => &self.python,
            Ecosystem::R => &self.r,
        }
    }
}

/// Subprocess-backed [`ExecutionService`].
pub struct ToolchainService {
    config: ServiceConfig,
}

struct Captured {
    code: Option<i32>,
    success: bool,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl ToolchainService {
    pub fn new(config: ServiceConfig) -> Self {
        Self { config }
    }

    fn argv(&self, step: &'static str, line: &str, target: Option<&str>) -> Result<Vec<String>, ScriptError> {
        let mut argv = shell_words::split(line).map_err(|err| ScriptError::Service {
            step,
            message: format!("parse command {line:?}: {err}"),
        })?;
        if argv.is_empty() {
            return Err(ScriptError::Service {
                step,
                message: "command is empty".to_string(),
            });
        }
        if let Some(target) = target {
            for arg in &mut argv {
                *arg = arg.replace(TARGET_PLACEHOLDER, target);
            }
        }
        Ok(argv)
    }

    fn execute(&self, step: &'static str, argv: &[String], cwd: &Path) -> Result<Captured, ScriptError> {
        let program: PathBuf = which::which(&argv[0]).map_err(|err| ScriptError::Service {
            step,
            message: format!("{} not found: {err}", argv[0]),
        })?;
        let start = Instant::now();
        let output = Command::new(&program)
            .args(&argv[1..])
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .io_context(|| format!("spawn {}", program.display()))?;
        let elapsed_ms = start.elapsed().as_millis();
        tracing::info!(
            step,
            elapsed_ms,
            stdout_bytes = output.stdout.len(),
            stderr_bytes = output.stderr.len(),
            status = %output.status,
            "toolchain command complete"
        );
        Ok(Captured {
            code: output.status.code(),
            success: output.status.success(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    fn checked(&self, step: &'static str, argv: &[String], cwd: &Path) -> Result<(), ScriptError> {
        let captured = self.execute(step, argv, cwd)?;
        if !captured.success {
            let stderr = truncate_bytes(&captured.stderr, TRACEBACK_LIMIT);
            return Err(ScriptError::Service {
                step,
                message: format!(
                    "{} exited with {:?}: {}",
                    argv.join(" "),
                    captured.code,
                    last_line(&stderr)
                ),
            });
        }
        Ok(())
    }

    /// Wait until a manifest exists in `workspace`; up to
    /// `manifest_attempts` checks with doubling backoff.
    fn wait_for_manifest(&self, workspace: &Path) -> Result<Ecosystem, ScriptError> {
        let mut delay = Duration::from_millis(self.config.manifest_backoff_ms);
        let attempts = self.config.manifest_attempts.max(1);
        let mut attempt = 1;
        loop {
            match manifest_ecosystem(workspace, attempt) {
                Ok(ecosystem) => return Ok(ecosystem),
                Err(err) if err.is_transient() && attempt < attempts => {
                    tracing::debug!(attempt, delay_ms = delay.as_millis(), "manifest not ready, retrying");
                    thread::sleep(delay);
                    delay *= 2;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn manifest_ecosystem(workspace: &Path, attempts: u32) -> Result<Ecosystem, ScriptError> {
    Ecosystem::detect(workspace).ok_or_else(|| ScriptError::ManifestNotReady {
        path: workspace.to_path_buf(),
        attempts,
    })
}

fn last_line(text: &str) -> String {
    text.lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default()
        .to_string()
}

impl ExecutionService for ToolchainService {
    fn init(&self, ecosystem: Ecosystem, workspace: &Path) -> Result<(), ScriptError> {
        let argv = self.argv("init", &self.config.commands(ecosystem).init, None)?;
        self.checked("init", &argv, workspace)
    }

    fn sync(&self, workspace: &Path) -> Result<(), ScriptError> {
        let ecosystem = self.wait_for_manifest(workspace)?;
        let argv = self.argv("sync", &self.config.commands(ecosystem).sync, None)?;
        self.checked("sync", &argv, workspace)
    }

    fn run(
        &self,
        workspace: &Path,
        target: &str,
        ecosystem: Ecosystem,
    ) -> Result<ProcessOutcome, ScriptError> {
        let argv = self.argv("run", &self.config.commands(ecosystem).run, Some(target))?;
        let captured = self.execute("run", &argv, workspace)?;
        if captured.success {
            return Ok(ProcessOutcome::Succeeded {
                stdout: String::from_utf8_lossy(&captured.stdout).into_owned(),
            });
        }
        let traceback = truncate_bytes(&captured.stderr, TRACEBACK_LIMIT);
        Ok(ProcessOutcome::Failed(ExecutionFailure {
            exit_code: captured.code,
            error: last_line(&traceback),
            traceback,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_cover_both_ecosystems() {
        let config = ServiceConfig::default();
        assert_eq!(config.commands(Ecosystem::Python).run, "uv run python {target}");
        assert_eq!(config.commands(Ecosystem::R).run, "Rscript {target}");
        assert_eq!(config.manifest_attempts, 3);
    }

    #[test]
    fn argv_splits_quotes_and_fills_target() {
        let service = ToolchainService::new(ServiceConfig::default());
        let argv = service
            .argv("run", "uv run python {target}", Some("main.py"))
            .expect("argv");
        assert_eq!(argv, ["uv", "run", "python", "main.py"]);
        let argv = service
            .argv("sync", &ServiceConfig::default().r.sync, None)
            .expect("argv");
        assert_eq!(argv, ["Rscript", "-e", "renv::restore()"]);
        assert!(service.argv("run", "   ", None).is_err());
    }

    #[test]
    fn missing_manifest_is_transient_until_attempts_run_out() {
        let dir = TempDir::new().expect("tempdir");
        let service = ToolchainService::new(ServiceConfig {
            manifest_attempts: 2,
            manifest_backoff_ms: 1,
            ..ServiceConfig::default()
        });
        let err = service.wait_for_manifest(dir.path()).expect_err("no manifest");
        assert!(err.is_transient());
        assert!(matches!(err, ScriptError::ManifestNotReady { attempts: 2, .. }));

        std::fs::write(dir.path().join("pyproject.toml"), "[project]\n").expect("write");
        assert_eq!(
            service.wait_for_manifest(dir.path()).expect("manifest"),
            Ecosystem::Python
        );
    }

    #[test]
    fn failure_reports_last_stderr_line() {
        let text = "Traceback (most recent call last):\n  File \"main.py\"\nValueError: boom\n\n";
        assert_eq!(last_line(text), "ValueError: boom");
        let failure = ExecutionFailure {
            exit_code: Some(1),
            error: "ValueError: boom".to_string(),
            traceback: text.to_string(),
        };
        assert_eq!(failure.to_string(), "exit code 1: ValueError: boom");
    }

    #[test]
    fn partial_service_config_keeps_defaults() {
        let config: ServiceConfig = serde_json::from_str(r#"{"manifest_attempts": 5}"#).expect("parse");
        assert_eq!(config.manifest_attempts, 5);
        assert_eq!(config.python, ServiceConfig::default().python);
    }
}
