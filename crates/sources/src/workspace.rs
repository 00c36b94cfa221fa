#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use metrics::histogram;
use tracing::{debug, info};
use walkdir::{DirEntry, WalkDir};

use kuberef_core::{resources_from_text, BuildTool, Origin, Resource};

const SKIP_DIRS: &[&str] = &["node_modules", "target"];

fn skipped(entry: &DirEntry) -> bool {
    if entry.depth() == 0 || !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || SKIP_DIRS.contains(&name.as_ref())
}

/// `*.yaml` / `*.yml`, plus extension-less build markers such as `Kustomization`.
pub fn is_manifest(path: &Path) -> bool {
    matches!(path.extension().and_then(|e| e.to_str()), Some("yaml" | "yml")) || BuildTool::for_marker(path).is_some()
}

/// All manifest files under `root`, sorted, skipping hidden and
/// vendored directories.
pub fn manifest_paths(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        bail!("workspace root is not a directory: {}", root.display());
    }
    let mut out = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name().into_iter().filter_entry(|e| !skipped(e)) {
        let entry = entry.with_context(|| format!("walking {}", root.display()))?;
        if entry.file_type().is_file() && is_manifest(entry.path()) {
            out.push(entry.into_path());
        }
    }
    Ok(out)
}

/// Parse every manifest under `root` into workspace-origin resources.
/// Unreadable files are skipped.
pub fn load_workspace(root: &Path) -> Result<Vec<Resource>> {
    let t0 = Instant::now();
    let paths = manifest_paths(root)?;
    let mut out = Vec::new();
    for path in &paths {
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "skipping unreadable manifest");
                continue;
            }
        };
        let origin = Origin::Workspace { path: path.to_string_lossy().into_owned() };
        out.extend(resources_from_text(&text, &origin));
    }
    let ms = t0.elapsed().as_secs_f64() * 1000.0;
    histogram!("source_load_ms", ms, "source" => "workspace");
    info!(root = %root.display(), files = paths.len(), resources = out.len(), took_ms = %format!("{:.1}", ms), "workspace loaded");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_extensions() {
        assert!(is_manifest(Path::new("/w/a.yaml")));
        assert!(is_manifest(Path::new("b.yml")));
        assert!(!is_manifest(Path::new("c.json")));
        assert!(!is_manifest(Path::new("yaml")));
    }

    #[test]
    fn missing_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(manifest_paths(&dir.path().join("nope")).is_err());
    }
}
