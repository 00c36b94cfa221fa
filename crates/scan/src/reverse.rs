//! Reverse lookups: which documents reference the definitions in a file.
//!
//! Built as a post-pass over forward scan results; never consulted during
//! forward resolution.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use kuberef_core::message::origin_phrase;
use kuberef_core::{DisplayBase, Message, MessageTag, Resource};

use crate::ScanReport;

/// `reference` (the referencing object) points at `definition`.
#[derive(Debug, Clone, Serialize)]
pub struct ReferenceEdge {
    pub reference: Arc<Resource>,
    pub definition: Arc<Resource>,
    pub message: Message,
    /// Byte range of the occurrence in the referencing document.
    pub range: (usize, usize),
}

/// Edges keyed by the definition's origin key (file path or `cluster:<ctx>`).
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReverseIndex {
    edges: BTreeMap<String, Vec<ReferenceEdge>>,
}

impl ReverseIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invert the resolved references of one scan report.
    pub fn add_report(&mut self, report: &ScanReport) {
        for located in &report.highlights {
            let h = &located.highlight;
            if !matches!(h.message.tag(), MessageTag::ReferenceFound | MessageTag::SelectorFound) {
                continue;
            }
            let (Some(reference), Some(definition)) = (&located.source, &h.target) else { continue };
            self.edges.entry(definition.origin.key()).or_default().push(ReferenceEdge {
                reference: Arc::clone(reference),
                definition: Arc::clone(definition),
                message: h.message.clone(),
                range: (h.start, h.end),
            });
        }
    }

    pub fn from_reports<'a>(reports: impl IntoIterator<Item = &'a ScanReport>) -> Self {
        let mut out = Self::new();
        for r in reports {
            out.add_report(r);
        }
        out
    }

    pub fn referrers(&self, origin_key: &str) -> &[ReferenceEdge] {
        self.edges.get(origin_key).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.edges.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Referrers of one definition file grouped by definition `(kind, name)`,
    /// in first-seen order.
    pub fn by_definition(&self, origin_key: &str) -> Vec<(&Arc<Resource>, Vec<&ReferenceEdge>)> {
        let mut out: Vec<(&Arc<Resource>, Vec<&ReferenceEdge>)> = Vec::new();
        for e in self.referrers(origin_key) {
            let same = |d: &Arc<Resource>| {
                d.kind == e.definition.kind && d.name() == e.definition.name() && d.namespace() == e.definition.namespace()
            };
            match out.iter_mut().find(|(d, _)| same(d)) {
                Some((_, v)) => v.push(e),
                None => out.push((&e.definition, vec![e])),
            }
        }
        out
    }
}

/// "Referenced by Deployment `web` in workspace at [web.yaml](/w/web.yaml)",
/// or a bulleted list for several referrers.
pub fn describe_referrers(edges: &[&ReferenceEdge], base: &DisplayBase) -> Option<String> {
    let line = |e: &ReferenceEdge| {
        format!("{} `{}` in {}", e.reference.kind, e.reference.name(), origin_phrase(&e.reference.origin, base))
    };
    match edges {
        [] => None,
        [one] => Some(format!("Referenced by {}", line(one))),
        many => {
            let mut out = String::from("Referenced by:");
            for e in many {
                out.push_str("\n- ");
                out.push_str(&line(e));
            }
            Some(out)
        }
    }
}
