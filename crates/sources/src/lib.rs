//! kuberef sources: collaborators that turn files and build tools into
//! resource batches for the index rebuild loop.

#![forbid(unsafe_code)]

use std::path::Path;

use anyhow::Result;

use kuberef_store::SourceBatch;

pub mod build;
pub mod workspace;

pub use build::{find_build_roots, run_build, run_builds, BuildCommand, BuildRoot, BuildRun};
pub use kuberef_core::BuildTool;
pub use workspace::{load_workspace, manifest_paths};

pub const WORKSPACE_SOURCE: &str = "workspace";

/// One workspace walk as a rebuild batch.
pub fn workspace_batch(root: &Path) -> Result<SourceBatch> {
    Ok(SourceBatch { source: WORKSPACE_SOURCE.to_string(), resources: load_workspace(root)? })
}

impl From<BuildRun> for SourceBatch {
    fn from(run: BuildRun) -> Self {
        SourceBatch { source: run.root.source_id(), resources: run.resources }
    }
}
