//! Kustomize and Helm build roots, recognised by their marker file names.

#![forbid(unsafe_code)]

use std::path::Path;

/// Marker file names and the tool each one belongs to, in lookup priority.
pub const MARKERS: &[(&str, BuildTool)] = &[
    ("kustomization.yaml", BuildTool::Kustomize),
    ("kustomization.yml", BuildTool::Kustomize),
    ("Kustomization", BuildTool::Kustomize),
    ("Chart.yaml", BuildTool::Helm),
    ("Chart.yml", BuildTool::Helm),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildTool {
    Kustomize,
    Helm,
}

impl BuildTool {
    /// Tool owning the marker file at `path`, if it is one.
    pub fn for_marker(path: &Path) -> Option<BuildTool> {
        let file = path.file_name()?.to_str()?;
        MARKERS.iter().find(|(m, _)| *m == file).map(|(_, t)| *t)
    }

    pub fn label(self) -> &'static str {
        match self {
            BuildTool::Kustomize => "kustomize",
            BuildTool::Helm => "helm",
        }
    }

    /// Name of the build step as shown to users.
    pub fn step(self) -> &'static str {
        match self {
            BuildTool::Kustomize => "Kustomize build",
            BuildTool::Helm => "Helm template",
        }
    }

    pub fn subcommand(self) -> &'static str {
        match self {
            BuildTool::Kustomize => "build",
            BuildTool::Helm => "template",
        }
    }

    /// Executable, overridable with `KUBEREF_KUSTOMIZE_BIN` / `KUBEREF_HELM_BIN`.
    pub fn program(self) -> String {
        let (var, default) = match self {
            BuildTool::Kustomize => ("KUBEREF_KUSTOMIZE_BIN", "kustomize"),
            BuildTool::Helm => ("KUBEREF_HELM_BIN", "helm"),
        };
        std::env::var(var).ok().filter(|s| !s.is_empty()).unwrap_or_else(|| default.to_string())
    }
}
