//! Reference messages and the composer that renders a group of them.
//!
//! A group always holds a single message variant; the scan orchestrator groups
//! highlights by line and variant before calling [`compose`].

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Origin, Result};

/// Directory the referencing document lives in, plus the workspace root, used
/// to render short relative links.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayBase {
    pub pwd: String,
    pub root: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Key,
    Port,
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemType::Key => f.write_str("key"),
            ItemType::Port => f.write_str("port"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    ReferenceFound {
        kind: String,
        name: String,
        origin: Origin,
        base: DisplayBase,
    },
    ReferenceNotFound {
        kind: String,
        name: String,
        suggestion: String,
        origin: Origin,
        base: DisplayBase,
    },
    SubItemFound {
        parent_kind: String,
        parent_name: String,
        item_type: ItemType,
        item: String,
        origin: Origin,
        base: DisplayBase,
    },
    SubItemNotFound {
        parent_kind: String,
        parent_name: String,
        item_type: ItemType,
        item: String,
        suggestion: String,
        origin: Origin,
        base: DisplayBase,
    },
    SelectorFound {
        kind: String,
        name: String,
        origin: Origin,
        base: DisplayBase,
    },
    PlainText {
        text: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MessageTag {
    ReferenceFound,
    ReferenceNotFound,
    SubItemFound,
    SubItemNotFound,
    SelectorFound,
    PlainText,
}

impl fmt::Display for MessageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl Message {
    pub fn tag(&self) -> MessageTag {
        match self {
            Message::ReferenceFound { .. } => MessageTag::ReferenceFound,
            Message::ReferenceNotFound { .. } => MessageTag::ReferenceNotFound,
            Message::SubItemFound { .. } => MessageTag::SubItemFound,
            Message::SubItemNotFound { .. } => MessageTag::SubItemNotFound,
            Message::SelectorFound { .. } => MessageTag::SelectorFound,
            Message::PlainText { .. } => MessageTag::PlainText,
        }
    }

    pub fn origin(&self) -> Option<&Origin> {
        match self {
            Message::ReferenceFound { origin, .. }
            | Message::ReferenceNotFound { origin, .. }
            | Message::SubItemFound { origin, .. }
            | Message::SubItemNotFound { origin, .. }
            | Message::SelectorFound { origin, .. } => Some(origin),
            Message::PlainText { .. } => None,
        }
    }
}

/// Shorter of the root-relative and pwd-relative forms of `target`.
pub fn relative_path(target: &str, base: &DisplayBase) -> String {
    let target_path = Path::new(target);
    let mut best: Option<String> = None;
    let mut consider = |candidate: String| {
        if candidate.is_empty() {
            return;
        }
        if best.as_ref().map(|b| candidate.len() < b.len()).unwrap_or(true) {
            best = Some(candidate);
        }
    };
    if !base.pwd.is_empty() {
        if let Some(rel) = pathdiff::diff_paths(target_path, Path::new(&base.pwd)) {
            consider(rel.to_string_lossy().into_owned());
        }
    }
    if let Some(root) = base.root.as_deref() {
        if let Ok(rel) = target_path.strip_prefix(root) {
            consider(rel.to_string_lossy().into_owned());
        }
    }
    best.unwrap_or_else(|| target.to_string())
}

/// Where a match lives, e.g. "workspace at [svc.yaml](/w/svc.yaml)" or
/// "cluster `kind-dev`".
pub fn origin_phrase(origin: &Origin, base: &DisplayBase) -> String {
    match origin {
        Origin::Workspace { path } => format!("workspace at {}", link(path, base)),
        Origin::Kustomize { path } => format!("Kustomize build of {}", link(path, base)),
        Origin::Helm { path } => format!("Helm build of {}", link(path, base)),
        Origin::Cluster { context } => format!("cluster `{}`", context),
    }
}

fn link(path: &str, base: &DisplayBase) -> String {
    format!("[{}]({})", relative_path(path, base), path)
}

fn capitalize(s: &str) -> String {
    let mut c = s.chars();
    match c.next() {
        Some(f) => f.to_uppercase().chain(c).collect(),
        None => String::new(),
    }
}

/// Render a group of same-variant messages into one string.
///
/// One element renders inline; more render a header plus one bullet per
/// element in input order.
pub fn compose(messages: &[Message]) -> Result<String> {
    let first = messages.first().ok_or(Error::EmptyGroup)?;
    let expected = first.tag();
    if let Some(other) = messages.iter().find(|m| m.tag() != expected) {
        return Err(Error::MixedMessages { expected, found: other.tag() });
    }
    let out = match expected {
        MessageTag::ReferenceFound => reference_found(messages),
        MessageTag::ReferenceNotFound => reference_not_found(messages),
        MessageTag::SubItemFound => sub_item_found(messages),
        MessageTag::SubItemNotFound => sub_item_not_found(messages),
        MessageTag::SelectorFound => selector_found(messages),
        MessageTag::PlainText => plain_text(messages),
    };
    Ok(out)
}

fn bullets(header: String, items: impl Iterator<Item = String>) -> String {
    let mut out = header;
    for item in items {
        out.push_str("\n- ");
        out.push_str(&item);
    }
    out
}

fn same<T: PartialEq>(values: &[T]) -> bool {
    values.windows(2).all(|w| w[0] == w[1])
}

fn reference_found(messages: &[Message]) -> String {
    let rows: Vec<(&str, &str, String)> = messages
        .iter()
        .filter_map(|m| match m {
            Message::ReferenceFound { kind, name, origin, base } => Some((kind.as_str(), name.as_str(), origin_phrase(origin, base))),
            _ => None,
        })
        .collect();
    match rows.as_slice() {
        [(kind, name, at)] => format!("Found {} `{}` in {}", kind, name, at),
        _ if same(&rows.iter().map(|r| (r.0, r.1)).collect::<Vec<_>>()) => {
            let (kind, name, _) = &rows[0];
            bullets(format!("Found {} `{}` in:", kind, name), rows.iter().map(|r| r.2.clone()))
        }
        _ => bullets("Found:".to_string(), rows.iter().map(|(k, n, at)| format!("{} `{}` in {}", k, n, at))),
    }
}

fn reference_not_found(messages: &[Message]) -> String {
    let rows: Vec<(&str, &str, &str, String)> = messages
        .iter()
        .filter_map(|m| match m {
            Message::ReferenceNotFound { kind, name, suggestion, origin, base } => {
                Some((kind.as_str(), name.as_str(), suggestion.as_str(), origin_phrase(origin, base)))
            }
            _ => None,
        })
        .collect();
    match rows.as_slice() {
        [(kind, name, suggestion, at)] => {
            format!("{} `{}` not found. Did you mean `{}` from {}?", kind, name, suggestion, at)
        }
        _ if same(&rows.iter().map(|r| (r.0, r.1)).collect::<Vec<_>>()) => {
            let (kind, name, _, _) = &rows[0];
            bullets(
                format!("{} `{}` not found. Did you mean:", kind, name),
                rows.iter().map(|(_, _, s, at)| format!("`{}` from {}", s, at)),
            )
        }
        _ => bullets(
            "Not found. Did you mean:".to_string(),
            rows.iter().map(|(k, n, s, at)| format!("`{}` instead of {} `{}` from {}", s, k, n, at)),
        ),
    }
}

fn sub_item_found(messages: &[Message]) -> String {
    let rows: Vec<(ItemType, &str, String)> = messages
        .iter()
        .filter_map(|m| match m {
            Message::SubItemFound { parent_kind, parent_name, item_type, item, origin, base } => Some((
                *item_type,
                item.as_str(),
                format!("{} `{}` from {}", parent_kind, parent_name, origin_phrase(origin, base)),
            )),
            _ => None,
        })
        .collect();
    match rows.as_slice() {
        [(ty, item, parent)] => format!("Found {} `{}` in {}", ty, item, parent),
        _ if same(&rows.iter().map(|r| (r.0, r.1)).collect::<Vec<_>>()) => {
            let (ty, item, _) = &rows[0];
            bullets(format!("Found {} `{}` in:", ty, item), rows.iter().map(|r| r.2.clone()))
        }
        _ => bullets("Found:".to_string(), rows.iter().map(|(ty, item, parent)| format!("{} `{}` in {}", ty, item, parent))),
    }
}

fn sub_item_not_found(messages: &[Message]) -> String {
    let rows: Vec<(ItemType, &str, String)> = messages
        .iter()
        .filter_map(|m| match m {
            Message::SubItemNotFound { parent_kind, parent_name, item_type, item, suggestion, origin, base } => Some((
                *item_type,
                item.as_str(),
                format!(
                    "{} `{}` from {}. Did you mean `{}`?",
                    parent_kind,
                    parent_name,
                    origin_phrase(origin, base),
                    suggestion
                ),
            )),
            _ => None,
        })
        .collect();
    match rows.as_slice() {
        [(ty, item, parent)] => format!("{} `{}` not found in {}", capitalize(&ty.to_string()), item, parent),
        _ if same(&rows.iter().map(|r| (r.0, r.1)).collect::<Vec<_>>()) => {
            let (ty, item, _) = &rows[0];
            bullets(format!("{} `{}` not found in:", capitalize(&ty.to_string()), item), rows.iter().map(|r| r.2.clone()))
        }
        _ => bullets(
            "Not found:".to_string(),
            rows.iter().map(|(ty, item, parent)| format!("{} `{}` in {}", ty, item, parent)),
        ),
    }
}

fn selector_found(messages: &[Message]) -> String {
    let rows: Vec<String> = messages
        .iter()
        .filter_map(|m| match m {
            Message::SelectorFound { kind, name, origin, base } => {
                Some(format!("{} `{}` in {}", kind, name, origin_phrase(origin, base)))
            }
            _ => None,
        })
        .collect();
    match rows.as_slice() {
        [one] => format!("Selector points to {}", one),
        _ => bullets("Selector points to:".to_string(), rows.into_iter()),
    }
}

fn plain_text(messages: &[Message]) -> String {
    messages
        .iter()
        .filter_map(|m| match m {
            Message::PlainText { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}
