//! kuberef refs: reference finders over raw manifest text.
//!
//! Every finder scans one YAML sub-document, locates reference tokens with
//! regexes, and resolves them against an [`Index`] snapshot. Offsets in the
//! returned highlights are relative to `ctx.text`.

#![forbid(unsafe_code)]

use std::sync::Arc;

use kuberef_core::{DisplayBase, Highlight, HighlightKind, ItemType, Message, Resource, ScanContext, ScanOptions};
use kuberef_search::best_above;
use kuberef_store::Index;
use tracing::trace;

pub mod ingress;
pub mod keyref;
pub mod selector;
pub mod service;

pub use ingress::IngressFinder;
pub use keyref::KeyRefFinder;
pub use selector::SelectorFinder;
pub use service::ServiceFinder;

/// One kind of reference. Implementations are pure functions of their inputs.
pub trait Finder: Send + Sync {
    fn name(&self) -> &'static str;
    fn find(&self, index: &Index, current: &Resource, ctx: &ScanContext<'_>, opts: &ScanOptions) -> Vec<Highlight>;
}

pub fn default_finders() -> Vec<Box<dyn Finder>> {
    vec![Box::new(ServiceFinder), Box::new(KeyRefFinder), Box::new(IngressFinder), Box::new(SelectorFinder)]
}

/// Run every finder in order and concatenate their highlights.
pub fn find_all(
    finders: &[Box<dyn Finder>],
    index: &Index,
    current: &Resource,
    ctx: &ScanContext<'_>,
    opts: &ScanOptions,
) -> Vec<Highlight> {
    let mut out = Vec::new();
    for f in finders {
        let found = f.find(index, current, ctx, opts);
        trace!(finder = f.name(), kind = %current.kind, name = %current.name(), highlights = found.len(), "finder ran");
        out.extend(found);
    }
    out
}

/// A token located in the text handed to a finder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Token<'t> {
    pub text: &'t str,
    pub start: usize,
}

impl<'t> Token<'t> {
    pub fn new(text: &'t str, start: usize) -> Self {
        Self { text, start }
    }

    pub fn end(&self) -> usize {
        self.start + self.text.len()
    }
}

impl<'t> From<regex::Match<'t>> for Token<'t> {
    fn from(m: regex::Match<'t>) -> Self {
        Self { text: m.as_str(), start: m.start() }
    }
}

/// A name as written, with an optional explicit namespace that overrides the
/// referencing resource's namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Target<'w> {
    pub name: &'w str,
    pub namespace: Option<&'w str>,
}

impl<'w> Target<'w> {
    pub fn literal(name: &'w str) -> Self {
        Self { name, namespace: None }
    }

    /// `<name>.<namespace>` with exactly one dot.
    pub fn dotted(written: &'w str) -> Option<Self> {
        let (name, ns) = written.split_once('.')?;
        if name.is_empty() || ns.is_empty() || ns.contains('.') {
            return None;
        }
        Some(Self { name, namespace: Some(ns) })
    }

    /// The literal name first, then the dotted split when there is one.
    pub fn literal_then_dotted(written: &'w str) -> Vec<Self> {
        let mut out = vec![Self::literal(written)];
        out.extend(Self::dotted(written));
        out
    }
}

pub(crate) enum Resolution<'a> {
    Found(Vec<&'a Arc<Resource>>),
    Suggested(Vec<&'a Arc<Resource>>),
    Missing,
}

fn candidates<'a>(index: &'a Index, kind: &str, current_ns: Option<&str>, target: &Target<'_>) -> Vec<&'a Arc<Resource>> {
    match target.namespace {
        Some(ns) => index.lookup(kind, Some(ns), None),
        None => index.scoped(kind, current_ns),
    }
}

/// Resolve one occurrence. Targets are tried in order for an exact match;
/// when none matches and `hint_threshold` is set, the most specific target
/// with a non-empty candidate set is ranked for suggestions.
pub(crate) fn resolve<'a>(
    index: &'a Index,
    kind: &str,
    current_ns: Option<&str>,
    targets: &[Target<'_>],
    hint_threshold: Option<f64>,
) -> Resolution<'a> {
    let sets: Vec<(&Target<'_>, Vec<&'a Arc<Resource>>)> =
        targets.iter().map(|t| (t, candidates(index, kind, current_ns, t))).collect();
    for (t, cands) in &sets {
        let exact: Vec<&'a Arc<Resource>> = cands.iter().copied().filter(|r| r.name() == t.name).collect();
        if !exact.is_empty() {
            return Resolution::Found(exact);
        }
    }
    let Some(threshold) = hint_threshold else {
        return Resolution::Missing;
    };
    let Some((t, cands)) = sets.iter().rev().find(|(_, c)| !c.is_empty()) else {
        return Resolution::Missing;
    };
    let names: Vec<&str> = cands.iter().map(|r| r.name()).collect();
    let picked: Vec<&'a Arc<Resource>> = best_above(&names, t.name, threshold).into_iter().map(|r| cands[r.index]).collect();
    if picked.is_empty() {
        Resolution::Missing
    } else {
        Resolution::Suggested(picked)
    }
}

pub(crate) fn found(token: Token<'_>, target: &Arc<Resource>, base: &DisplayBase) -> Highlight {
    Highlight::new(
        token.start,
        token.end(),
        HighlightKind::Reference,
        Some(Arc::clone(target)),
        Message::ReferenceFound {
            kind: target.kind.clone(),
            name: target.name().to_string(),
            origin: target.origin.clone(),
            base: base.clone(),
        },
    )
}

pub(crate) fn suggested(token: Token<'_>, target: &Arc<Resource>, base: &DisplayBase) -> Highlight {
    Highlight::new(
        token.start,
        token.end(),
        HighlightKind::Hint,
        Some(Arc::clone(target)),
        Message::ReferenceNotFound {
            kind: target.kind.clone(),
            name: token.text.to_string(),
            suggestion: target.name().to_string(),
            origin: target.origin.clone(),
            base: base.clone(),
        },
    )
}

/// Highlights for a resolution that has no sub-item to check.
pub(crate) fn name_highlights(res: &Resolution<'_>, token: Token<'_>, base: &DisplayBase) -> Vec<Highlight> {
    match res {
        Resolution::Found(targets) => targets.iter().map(|t| found(token, t, base)).collect(),
        Resolution::Suggested(targets) => targets.iter().map(|t| suggested(token, t, base)).collect(),
        Resolution::Missing => Vec::new(),
    }
}

/// Check a second-level reference (key, port) on one resolved parent, falling
/// back to suggestions drawn from that parent's own items.
pub(crate) fn sub_item(
    token: Token<'_>,
    parent: &Arc<Resource>,
    item_type: ItemType,
    available: &[String],
    threshold: f64,
    opts: &ScanOptions,
    base: &DisplayBase,
) -> Vec<Highlight> {
    if available.iter().any(|a| a == token.text) {
        return vec![Highlight::new(
            token.start,
            token.end(),
            HighlightKind::Success,
            Some(Arc::clone(parent)),
            Message::SubItemFound {
                parent_kind: parent.kind.clone(),
                parent_name: parent.name().to_string(),
                item_type,
                item: token.text.to_string(),
                origin: parent.origin.clone(),
                base: base.clone(),
            },
        )];
    }
    if !opts.enable_correction_hints {
        return Vec::new();
    }
    best_above(available, token.text, threshold)
        .into_iter()
        .map(|r| {
            Highlight::new(
                token.start,
                token.end(),
                HighlightKind::Hint,
                Some(Arc::clone(parent)),
                Message::SubItemNotFound {
                    parent_kind: parent.kind.clone(),
                    parent_name: parent.name().to_string(),
                    item_type,
                    item: token.text.to_string(),
                    suggestion: r.candidate,
                    origin: parent.origin.clone(),
                    base: base.clone(),
                },
            )
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod testutil {
    use kuberef_core::{Origin, Resource};

    pub fn ws(path: &str) -> Origin {
        Origin::Workspace { path: path.to_string() }
    }

    pub fn yaml(text: &str, origin: Origin) -> Resource {
        Resource::from_yaml(text, origin).unwrap().unwrap()
    }

    pub fn service(name: &str, ns: &str, ports: &[u16], origin: Origin) -> Resource {
        let ports: Vec<serde_json::Value> = ports.iter().map(|p| serde_json::json!({ "port": p })).collect();
        let v = serde_json::json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": { "name": name, "namespace": ns },
            "spec": { "ports": ports },
        });
        Resource::from_value(&v, origin).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::*;
    use super::*;

    #[test]
    fn dotted_targets() {
        assert_eq!(Target::dotted("payments.billing"), Some(Target { name: "payments", namespace: Some("billing") }));
        assert_eq!(Target::dotted("payments"), None);
        assert_eq!(Target::dotted("a.b.c"), None);
        assert_eq!(Target::dotted(".b"), None);
        assert_eq!(Target::literal_then_dotted("db.creds").len(), 2);
    }

    #[test]
    fn resolve_prefers_literal_name_then_dotted() {
        let idx = Index::build(vec![
            service("db.main", "app", &[], ws("/w/1.yaml")),
            service("db", "main", &[], ws("/w/2.yaml")),
        ]);
        match resolve(&idx, "Service", Some("app"), &Target::literal_then_dotted("db.main"), None) {
            Resolution::Found(v) => assert_eq!(v[0].namespace(), Some("app")),
            _ => panic!("expected literal match"),
        }
        let idx = Index::build(vec![service("db", "main", &[], ws("/w/2.yaml"))]);
        match resolve(&idx, "Service", Some("app"), &Target::literal_then_dotted("db.main"), None) {
            Resolution::Found(v) => assert_eq!(v[0].namespace(), Some("main")),
            _ => panic!("expected dotted match"),
        }
    }

    #[test]
    fn resolve_suggests_only_with_threshold() {
        let idx = Index::build(vec![service("payments-svc", "default", &[], ws("/w/1.yaml"))]);
        let t = [Target::literal("payment-svc")];
        assert!(matches!(resolve(&idx, "Service", Some("default"), &t, None), Resolution::Missing));
        match resolve(&idx, "Service", Some("default"), &t, Some(0.8)) {
            Resolution::Suggested(v) => assert_eq!(v[0].name(), "payments-svc"),
            _ => panic!("expected suggestion"),
        }
    }
}
