//! kuberef core types: origins, resources, highlights and scan inputs.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use smallvec::SmallVec;

pub mod build;
pub mod documents;
pub mod kinds;
pub mod message;

pub use build::BuildTool;
pub use documents::{resources_from_text, split_documents, SubDocument};
pub use message::{compose, DisplayBase, ItemType, Message, MessageTag};

/// Kubernetes labels as key/value pairs, in document order.
pub type Labels = SmallVec<[(String, String); 8]>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("parsing YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("converting YAML to JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("YAML document too large (>{limit} bytes)")]
    TooLarge { limit: usize },
    #[error("cannot compose an empty message group")]
    EmptyGroup,
    #[error("message group mixes {expected} with {found}")]
    MixedMessages { expected: MessageTag, found: MessageTag },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Where a resource definition (or a build artifact) came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "place", rename_all = "lowercase")]
pub enum Origin {
    Workspace { path: String },
    Kustomize { path: String },
    Helm { path: String },
    Cluster { context: String },
}

impl Origin {
    pub fn place(&self) -> &'static str {
        match self {
            Origin::Workspace { .. } => "workspace",
            Origin::Kustomize { .. } => "kustomize",
            Origin::Helm { .. } => "helm",
            Origin::Cluster { .. } => "cluster",
        }
    }

    /// File path for file-backed origins, `None` for the cluster.
    pub fn path(&self) -> Option<&str> {
        match self {
            Origin::Workspace { path } | Origin::Kustomize { path } | Origin::Helm { path } => Some(path),
            Origin::Cluster { .. } => None,
        }
    }

    /// Stable key used to group definitions by origin (reverse lookups).
    pub fn key(&self) -> String {
        match self {
            Origin::Cluster { context } => format!("cluster:{}", context),
            other => other.path().unwrap_or_default().to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub name: String,
    pub namespace: Option<String>,
    pub labels: Labels,
}

/// One Kubernetes object projected from a YAML sub-document or an API list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub metadata: Metadata,
    pub spec: Option<Json>,
    /// Union of `data`, `stringData` and `binaryData` (Secret / ConfigMap).
    pub data: Option<Json>,
    pub origin: Origin,
}

fn max_yaml_bytes() -> usize {
    std::env::var("KUBEREF_MAX_YAML_BYTES")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(1_000_000) // 1 MiB default
}

/// Render a YAML scalar as a string; maps and sequences yield `None`.
pub fn scalar_string(v: &Json) -> Option<String> {
    match v {
        Json::String(s) => Some(s.clone()),
        Json::Number(n) => Some(n.to_string()),
        Json::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Collect a `{key: scalar}` mapping into label pairs, skipping non-scalars.
pub fn labels_from(v: Option<&Json>) -> Labels {
    let mut out = Labels::new();
    if let Some(map) = v.and_then(|x| x.as_object()) {
        for (k, val) in map {
            if let Some(s) = scalar_string(val) {
                out.push((k.clone(), s));
            }
        }
    }
    out
}

impl Resource {
    /// Parse one YAML sub-document. `Ok(None)` means the document is valid but is
    /// not a named Kubernetes object.
    pub fn from_yaml(text: &str, origin: Origin) -> Result<Option<Self>> {
        let limit = max_yaml_bytes();
        if text.len() > limit {
            tracing::debug!(bytes = text.len(), limit, origin = %origin.key(), "sub-document over size limit");
            return Err(Error::TooLarge { limit });
        }
        let val: serde_yaml::Value = serde_yaml::from_str(text)?;
        let json = serde_json::to_value(val)?;
        Ok(Self::from_value(&json, origin))
    }

    /// Project a generic JSON object into a resource. Objects without a
    /// `metadata.name` are not addressable and yield `None`.
    pub fn from_value(v: &Json, origin: Origin) -> Option<Self> {
        let meta = v.get("metadata")?;
        let name = meta.get("name").and_then(scalar_string)?;
        if name.is_empty() {
            return None;
        }
        let namespace = meta.get("namespace").and_then(scalar_string).filter(|s| !s.is_empty());
        let labels = labels_from(meta.get("labels"));
        let api_version = v.get("apiVersion").and_then(|x| x.as_str()).unwrap_or_default().to_string();
        let kind = v.get("kind").and_then(|x| x.as_str()).unwrap_or_default().to_string();

        let mut data = serde_json::Map::new();
        for field in ["data", "stringData", "binaryData"] {
            if let Some(obj) = v.get(field).and_then(|x| x.as_object()) {
                for (k, val) in obj {
                    data.insert(k.clone(), val.clone());
                }
            }
        }
        let data = if data.is_empty() { None } else { Some(Json::Object(data)) };

        Some(Resource {
            api_version,
            kind,
            metadata: Metadata { name, namespace, labels },
            spec: v.get("spec").cloned(),
            data,
            origin,
        })
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn namespace(&self) -> Option<&str> {
        self.metadata.namespace.as_deref()
    }

    /// Keys declared in the object's data maps, in document order.
    pub fn data_keys(&self) -> Vec<&str> {
        self.data
            .as_ref()
            .and_then(|d| d.as_object())
            .map(|m| m.keys().map(|k| k.as_str()).collect())
            .unwrap_or_default()
    }
}

/// Styling tag handed to the host; it maps this to its own severity/icons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HighlightKind {
    Reference,
    Hint,
    Success,
    Error,
    Dirty,
}

/// A located reference occurrence. Offsets are byte offsets into the text the
/// producer was handed (sub-document for finders, whole document after a scan).
#[derive(Debug, Clone, Serialize)]
pub struct Highlight {
    pub start: usize,
    pub end: usize,
    pub kind: HighlightKind,
    #[serde(skip)]
    pub target: Option<std::sync::Arc<Resource>>,
    pub message: Message,
}

impl Highlight {
    pub fn new(start: usize, end: usize, kind: HighlightKind, target: Option<std::sync::Arc<Resource>>, message: Message) -> Self {
        Self { start, end, kind, target, message }
    }

    pub fn shifted(mut self, by: usize) -> Self {
        self.start += by;
        self.end += by;
        self
    }
}

/// Result of a collaborator's `kustomize build` / `helm template` run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOutcome {
    pub success: bool,
    pub output: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScanOptions {
    pub enable_correction_hints: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self { enable_correction_hints: true }
    }
}

impl ScanOptions {
    /// `KUBEREF_HINTS=0|false|off` disables correction hints.
    pub fn from_env() -> Self {
        let enable_correction_hints = std::env::var("KUBEREF_HINTS")
            .map(|v| !(v == "0" || v.eq_ignore_ascii_case("false") || v.eq_ignore_ascii_case("off")))
            .unwrap_or(true);
        Self { enable_correction_hints }
    }
}

/// Everything a finder may know about the document being scanned.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanContext<'a> {
    pub text: &'a str,
    pub path: Option<&'a str>,
    pub workspace_root: Option<&'a str>,
    /// The host has unsaved edits for this document.
    pub dirty: bool,
    pub build: Option<&'a BuildOutcome>,
}

impl<'a> ScanContext<'a> {
    pub fn new(text: &'a str) -> Self {
        Self { text, ..Default::default() }
    }

    pub fn with_path(mut self, path: &'a str) -> Self {
        self.path = Some(path);
        self
    }

    pub fn with_workspace_root(mut self, root: &'a str) -> Self {
        self.workspace_root = Some(root);
        self
    }

    /// Same context over a different slice of text (one sub-document).
    pub fn with_text<'b>(&self, text: &'b str) -> ScanContext<'b>
    where
        'a: 'b,
    {
        ScanContext { text, path: self.path, workspace_root: self.workspace_root, dirty: self.dirty, build: self.build }
    }

    /// Directory of the current document; empty when the path is unknown.
    pub fn pwd(&self) -> String {
        self.path
            .and_then(|p| std::path::Path::new(p).parent())
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn display_base(&self) -> DisplayBase {
        DisplayBase { pwd: self.pwd(), root: self.workspace_root.map(|s| s.to_string()) }
    }
}

pub mod prelude {
    pub use super::{
        BuildOutcome, BuildTool, DisplayBase, Highlight, HighlightKind, ItemType, Labels, Message, MessageTag, Metadata, Origin,
        Resource, ScanContext, ScanOptions,
    };
}
