//! Scoped execution workspaces.
//!
//! A temporary workspace is removed when dropped unless ownership is taken
//! with [`Workspace::keep`]; a caller-supplied directory is never removed.
use crate::environment::Ecosystem;
use crate::error::{IoContext, ScriptError};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tempfile::TempDir;

#[derive(Debug)]
pub enum Workspace {
    Temporary(TempDir),
    Directory(PathBuf),
}

impl Workspace {
    /// Allocate a fresh temporary directory.
    pub fn fresh(prefix: &str) -> Result<Self, ScriptError> {
        let dir = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir()
            .io_context(|| "create temporary workspace")?;
        tracing::debug!(path = %dir.path().display(), "temporary workspace created");
        Ok(Workspace::Temporary(dir))
    }

    /// Use `target`, creating it when missing. A directory that already
    /// holds an environment manifest is rejected.
    pub fn at(target: &Path) -> Result<Self, ScriptError> {
        fs::create_dir_all(target).io_context(|| format!("create {}", target.display()))?;
        if Ecosystem::detect(target).is_some() {
            return Err(ScriptError::WorkspaceOccupied {
                path: target.to_path_buf(),
            });
        }
        Ok(Workspace::Directory(target.to_path_buf()))
    }

    /// `target` when given, a fresh temporary directory otherwise.
    pub fn for_target(target: Option<&Path>, prefix: &str) -> Result<Self, ScriptError> {
        match target {
            Some(target) => Self::at(target),
            None => Self::fresh(prefix),
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Workspace::Temporary(dir) => dir.path(),
            Workspace::Directory(path) => path,
        }
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self, Workspace::Temporary(_))
    }

    /// Detach from cleanup; the directory outlives this value.
    pub fn keep(self) -> PathBuf {
        match self {
            Workspace::Temporary(dir) => dir.keep(),
            Workspace::Directory(path) => path,
        }
    }

    pub fn write_bytes(&self, rel_path: &Path, bytes: &[u8]) -> Result<PathBuf, ScriptError> {
        let path = self.path().join(rel_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).io_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&path, bytes).io_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }

    pub fn write_text(&self, rel_path: &Path, text: &str) -> Result<PathBuf, ScriptError> {
        self.write_bytes(rel_path, text.as_bytes())
    }

    pub fn files(&self) -> Result<Vec<PathBuf>, ScriptError> {
        collect_files_recursive(self.path())
    }
}

/// Regular files under `root`, sorted. Hidden directories (`.venv`, `.git`)
/// are not descended into.
pub fn collect_files_recursive(root: &Path) -> Result<Vec<PathBuf>, ScriptError> {
    let mut files = Vec::new();
    if !root.exists() {
        return Ok(files);
    }
    for entry in fs::read_dir(root).io_context(|| format!("read {}", root.display()))? {
        let path = entry.io_context(|| format!("read {}", root.display()))?.path();
        if path.is_dir() {
            if is_hidden(&path) {
                continue;
            }
            files.extend(collect_files_recursive(&path)?);
        } else if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with('.'))
}

/// `relative` joined under `root`. Empty, absolute and `..` paths are
/// rejected so a product always lives inside the directory it came from.
pub fn contained_path(root: &Path, relative: &str, product: &str) -> Result<PathBuf, ScriptError> {
    let path = Path::new(relative);
    let contained = !relative.is_empty()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir));
    if !contained {
        return Err(ScriptError::ProductOutsideWorkspace {
            product: product.to_string(),
            filename: relative.to_string(),
        });
    }
    Ok(root.join(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temporary_workspace_is_removed_on_drop() {
        let workspace = Workspace::fresh("sseal-test-").expect("workspace");
        let path = workspace.path().to_path_buf();
        workspace
            .write_text(Path::new("nested/file.txt"), "x")
            .expect("write");
        assert!(path.join("nested").join("file.txt").is_file());
        drop(workspace);
        assert!(!path.exists());
    }

    #[test]
    fn kept_workspace_survives() {
        let workspace = Workspace::fresh("sseal-test-").expect("workspace");
        let path = workspace.keep();
        assert!(path.is_dir());
        fs::remove_dir_all(&path).expect("cleanup");
    }

    #[test]
    fn occupied_directory_is_rejected() {
        let dir = TempDir::new().expect("tempdir");
        fs::write(dir.path().join("renv.lock"), "{}").expect("write");
        assert!(matches!(
            Workspace::at(dir.path()),
            Err(ScriptError::WorkspaceOccupied { .. })
        ));
        let target = dir.path().join("fresh");
        let workspace = Workspace::at(&target).expect("create target");
        assert!(!workspace.is_temporary());
        drop(workspace);
        assert!(target.is_dir());
    }

    #[test]
    fn files_are_collected_sorted() {
        let workspace = Workspace::fresh("sseal-test-").expect("workspace");
        workspace.write_text(Path::new("b.csv"), "").expect("write");
        workspace.write_text(Path::new("a/c.csv"), "").expect("write");
        workspace
            .write_text(Path::new(".venv/lib/b.csv"), "")
            .expect("write");
        let names: Vec<String> = workspace
            .files()
            .expect("files")
            .iter()
            .map(|path| {
                path.strip_prefix(workspace.path())
                    .expect("relative")
                    .display()
                    .to_string()
            })
            .collect();
        assert_eq!(names, ["a/c.csv", "b.csv"]);
    }

    #[test]
    fn contained_paths_stay_under_root() {
        let root = Path::new("/work");
        assert_eq!(
            contained_path(root, "out/output.csv", "R1C1").expect("relative"),
            root.join("out/output.csv")
        );
        for escaping in ["/tmp/host.csv", "../output.csv", "out/../../x.csv", ""] {
            assert!(
                matches!(
                    contained_path(root, escaping, "R1C1"),
                    Err(ScriptError::ProductOutsideWorkspace { .. })
                ),
                "{escaping:?} accepted"
            );
        }
    }
}
