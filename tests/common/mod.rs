//! Shared test infrastructure for integration tests.

use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

/// Test fixture metadata loaded from fixture.json.
#[allow(dead_code)]
#[derive(Debug, Deserialize)]
pub struct FixtureConfig {
    pub script: String,
    /// Extra `sseal analyze` arguments.
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub expected_dependencies: Option<Vec<String>>,
    #[serde(default)]
    pub expected_datasets: Option<Vec<String>>,
    #[serde(default)]
    pub expected_outputs: Option<Vec<String>>,
    /// Exit status when analysis is expected to fail.
    #[serde(default)]
    pub expected_exit: Option<i32>,
}

/// A fixture directory under tests/fixtures/{name}/.
#[allow(dead_code)]
pub struct TestFixture {
    pub fixture_dir: PathBuf,
    pub config: FixtureConfig,
}

/// Captured `sseal` invocation.
#[derive(Debug)]
pub struct SsealOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl SsealOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn json(&self) -> Value {
        serde_json::from_str(&self.stdout).unwrap_or_else(|err| {
            panic!("stdout is not JSON ({err}):\n{}\nstderr:\n{}", self.stdout, self.stderr)
        })
    }
}

#[allow(dead_code)]
pub fn manifest_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}

#[allow(dead_code)]
pub fn fixtures_dir() -> PathBuf {
    manifest_dir().join("tests/fixtures")
}

/// Run the built `sseal` binary with logging kept quiet.
pub fn sseal<I, S>(args: I, cwd: &Path) -> SsealOutput
where
    I: IntoIterator<Item = S>,
    S: AsRef<std::ffi::OsStr>,
{
    let output = Command::new(env!("CARGO_BIN_EXE_sseal"))
        .args(args)
        .current_dir(cwd)
        .env_remove("SSEAL_CONFIG")
        .env("SSEAL_LOG", "error")
        .output()
        .expect("spawn sseal");
    SsealOutput {
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    }
}

/// Write a config whose toolchain is `sh` running the given fixture
/// scripts instead of `uv`.
#[allow(dead_code)]
pub fn shell_toolchain_config(dir: &TempDir, run_script: &str) -> PathBuf {
    let toolchain = fixtures_dir().join("toolchain");
    let run = format!(
        "sh {} {{target}}",
        shell_words::quote(&toolchain.join(run_script).display().to_string())
    );
    let config = serde_json::json!({
        "service": {
            "python": { "init": "true", "sync": "true", "run": run },
            "r": { "init": "true", "sync": "true", "run": run },
            "manifest_backoff_ms": 1
        }
    });
    let path = dir.path().join("sseal.json");
    std::fs::write(&path, config.to_string()).expect("write config");
    path
}

/// True when a POSIX shell is available for the toolchain stand-ins.
#[allow(dead_code)]
pub fn skip_without_shell() -> bool {
    let missing = which::which("sh").is_err() || which::which("true").is_err();
    if missing {
        eprintln!("Skipping: sh not available");
    }
    missing
}

#[allow(dead_code)]
impl TestFixture {
    /// Load a fixture by name from tests/fixtures/{name}/.
    pub fn load(name: &str) -> anyhow::Result<Self> {
        let fixture_dir = fixtures_dir().join(name);
        let config_path = fixture_dir.join("fixture.json");
        let config: FixtureConfig =
            serde_json::from_str(&std::fs::read_to_string(&config_path).map_err(|e| {
                anyhow::anyhow!("Failed to read {}: {}", config_path.display(), e)
            })?)?;
        Ok(Self {
            fixture_dir,
            config,
        })
    }

    pub fn script_path(&self) -> PathBuf {
        self.fixture_dir.join(&self.config.script)
    }

    /// `sseal analyze` on the fixture script.
    pub fn analyze(&self) -> SsealOutput {
        let mut args = vec!["analyze".to_string(), self.script_path().display().to_string()];
        args.extend(self.config.args.clone());
        sseal(&args, &self.fixture_dir)
    }

    /// Copy the fixture script into `dir` and return its new path.
    pub fn copy_script_to(&self, dir: &Path) -> PathBuf {
        let dest = dir.join(&self.config.script);
        std::fs::copy(self.script_path(), &dest).expect("copy fixture script");
        dest
    }
}
