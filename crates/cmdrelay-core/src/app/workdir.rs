//! WorkdirResolver - project 名から実行ディレクトリを決める

use std::path::{Path, PathBuf};

pub const DEFAULT_PROJECTS_ROOT: &str = "/projects";

/// Maps an optional project identifier to a working directory.
///
/// No existence check is made: a bad directory shows up later as a spawn
/// failure in the executor.
#[derive(Debug, Clone)]
pub struct WorkdirResolver {
    projects_root: PathBuf,
}

impl WorkdirResolver {
    pub fn new(projects_root: impl Into<PathBuf>) -> Self {
        Self {
            projects_root: projects_root.into(),
        }
    }

    pub fn projects_root(&self) -> &Path {
        &self.projects_root
    }

    /// - `None` (or empty) → `None`, the process default directory is used
    /// - absolute path → returned unchanged
    /// - anything else → joined under the projects root
    pub fn resolve(&self, project_name: Option<&str>) -> Option<PathBuf> {
        let name = project_name.filter(|n| !n.is_empty())?;
        let path = Path::new(name);
        if path.is_absolute() {
            Some(path.to_path_buf())
        } else {
            Some(self.projects_root.join(path))
        }
    }
}

impl Default for WorkdirResolver {
    fn default() -> Self {
        Self::new(DEFAULT_PROJECTS_ROOT)
    }
}
