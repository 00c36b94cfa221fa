//! Kustomize and Helm builds.
//!
//! A build root is a directory holding one of the marker files listed in
//! [`kuberef_core::build::MARKERS`] (`kustomization.yaml`, `Chart.yaml`, ...).
//! Builds run the external tool as a blocking subprocess on the tokio blocking
//! pool; failures come back as a [`BuildOutcome`] rather than an error.

#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;

use anyhow::Result;
use metrics::{counter, histogram};
use tracing::{debug, info, warn};

use kuberef_core::build::MARKERS;
use kuberef_core::{resources_from_text, BuildOutcome, BuildTool, Origin, Resource};

use crate::workspace::manifest_paths;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRoot {
    pub tool: BuildTool,
    pub dir: PathBuf,
    /// The marker file; build output is attributed to it.
    pub marker: PathBuf,
}

impl BuildRoot {
    /// Root in `dir` using the tool's preferred marker name.
    pub fn new(tool: BuildTool, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let name = MARKERS.iter().find(|(_, t)| *t == tool).map_or("", |(m, _)| *m);
        let marker = dir.join(name);
        Self { tool, dir, marker }
    }

    /// Root owning the marker file at `path`, if it is one.
    pub fn from_marker(path: &Path) -> Option<Self> {
        let tool = BuildTool::for_marker(path)?;
        let dir = path.parent()?.to_path_buf();
        Some(Self { tool, dir, marker: path.to_path_buf() })
    }

    pub fn marker_path(&self) -> &Path {
        &self.marker
    }

    pub fn origin(&self) -> Origin {
        let path = self.marker.to_string_lossy().into_owned();
        match self.tool {
            BuildTool::Kustomize => Origin::Kustomize { path },
            BuildTool::Helm => Origin::Helm { path },
        }
    }

    /// Source id used for coalescing rebuilds.
    pub fn source_id(&self) -> String {
        format!("{}:{}", self.tool.label(), self.dir.display())
    }

    pub fn command(&self) -> BuildCommand {
        BuildCommand {
            program: self.tool.program(),
            args: vec![self.tool.subcommand().to_string(), self.dir.to_string_lossy().into_owned()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildCommand {
    pub program: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct BuildRun {
    pub root: BuildRoot,
    pub outcome: BuildOutcome,
    /// Empty unless the build succeeded.
    pub resources: Vec<Resource>,
}

/// Build roots of one tool under `root`. A directory holding more than one
/// marker spelling yields a single root, for the highest-priority marker.
pub fn find_build_roots(root: &Path, tool: BuildTool) -> Result<Vec<BuildRoot>> {
    let mut out: Vec<BuildRoot> = Vec::new();
    for p in manifest_paths(root)? {
        let Some(found) = BuildRoot::from_marker(&p).filter(|r| r.tool == tool) else { continue };
        match out.iter_mut().find(|r| r.dir == found.dir) {
            Some(existing) => {
                debug!(dir = %found.dir.display(), kept = %existing.marker.display(), "extra marker file ignored");
                if marker_rank(&found.marker) < marker_rank(&existing.marker) {
                    *existing = found;
                }
            }
            None => out.push(found),
        }
    }
    Ok(out)
}

fn marker_rank(path: &Path) -> usize {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    MARKERS.iter().position(|(m, _)| *m == name).unwrap_or(usize::MAX)
}

/// Run one build synchronously.
pub fn run_build(root: &BuildRoot, cmd: &BuildCommand) -> BuildRun {
    let t0 = Instant::now();
    let outcome = match Command::new(&cmd.program).args(&cmd.args).output() {
        Ok(out) if out.status.success() => {
            BuildOutcome { success: true, output: String::from_utf8_lossy(&out.stdout).into_owned() }
        }
        Ok(out) => {
            let stderr = String::from_utf8_lossy(&out.stderr);
            BuildOutcome { success: false, output: stderr.trim().to_string() }
        }
        Err(e) => BuildOutcome { success: false, output: format!("failed to execute '{}': {}", cmd.program, e) },
    };
    histogram!("source_load_ms", t0.elapsed().as_secs_f64() * 1000.0, "source" => root.tool.label());
    let resources = if outcome.success {
        resources_from_text(&outcome.output, &root.origin())
    } else {
        counter!("build_failures_total", 1u64, "tool" => root.tool.label());
        warn!(dir = %root.dir.display(), tool = root.tool.label(), output = %outcome.output, "build failed");
        Vec::new()
    };
    info!(dir = %root.dir.display(), tool = root.tool.label(), success = outcome.success, resources = resources.len(), "build finished");
    BuildRun { root: root.clone(), outcome, resources }
}

/// Run every build on the blocking pool; results keep input order.
pub async fn run_builds(roots: Vec<BuildRoot>) -> Vec<BuildRun> {
    let tasks = roots.into_iter().map(|root| {
        tokio::task::spawn_blocking(move || {
            let cmd = root.command();
            run_build(&root, &cmd)
        })
    });
    futures::future::join_all(tasks)
        .await
        .into_iter()
        .filter_map(|r| match r {
            Ok(run) => Some(run),
            Err(e) => {
                warn!(error = %e, "build task panicked");
                None
            }
        })
        .collect()
}
