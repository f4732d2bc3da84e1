use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::{debug, warn};

/// Files that only live for one run. Everything registered is deleted when
/// the guard is dropped, whether the run succeeded or not.
#[derive(Debug, Default)]
pub struct TempArtifacts {
    paths: Vec<PathBuf>,
}

impl TempArtifacts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `path` for cleanup and hands it back. Register before
    /// creating the file so partially written files are removed too.
    pub fn register(&mut self, path: PathBuf) -> PathBuf {
        self.paths.push(path.clone());
        path
    }

    /// Releases `path` from cleanup once it has become a result worth keeping.
    pub fn keep(&mut self, path: &Path) {
        self.paths.retain(|p| p != path);
    }
}

impl Drop for TempArtifacts {
    fn drop(&mut self) {
        let mut removed = 0;
        for path in &self.paths {
            if !path.exists() {
                continue;
            }
            match std::fs::remove_file(path) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Error removing temp file {}: {}", path.display(), e),
            }
        }
        debug!("Cleaned up {} temporary files", removed);
    }
}

/// Unique-per-run file name prefix, e.g. `AmItheAsshole_20261016_142501_3f9a1c2e`.
pub fn run_prefix(label: &str) -> String {
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}_{}", label, stamp, &suffix[..8])
}

pub fn run_file(dir: &Path, prefix: &str, name: &str) -> PathBuf {
    dir.join(format!("{prefix}_{name}"))
}
