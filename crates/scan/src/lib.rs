//! kuberef scan: drive one document through every finder and turn the
//! resulting highlights into rendered decorations.
//!
//! Offsets handed out by this crate are byte offsets into the whole document.
//! Lines and columns are zero-based, columns counted in bytes.

#![forbid(unsafe_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use rustc_hash::FxHashMap;
use serde::Serialize;
use tracing::{debug, info};

use kuberef_core::{compose, split_documents, BuildTool, Highlight, HighlightKind, Message, MessageTag, Origin, Resource, Result, ScanContext, ScanOptions};
use kuberef_refs::{default_finders, find_all, Finder};
use kuberef_store::Index;

pub mod publish;
pub mod reverse;

pub use publish::{Published, ScanPublisher, Ticket};
pub use reverse::{describe_referrers, ReferenceEdge, ReverseIndex};

/// A composed hover: one per `(line, message variant)` group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decoration {
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub column: usize,
    pub kind: HighlightKind,
    pub message: String,
}

/// A highlight plus the sub-document resource that produced it. Build status
/// highlights have no source.
#[derive(Debug, Clone)]
pub struct Located {
    pub source: Option<Arc<Resource>>,
    pub highlight: Highlight,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub decorations: Vec<Decoration>,
    #[serde(skip)]
    pub highlights: Vec<Located>,
}

struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(text: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(text.match_indices('\n').map(|(i, _)| i + 1));
        Self { starts }
    }

    /// (line, line start) for a byte offset.
    fn locate(&self, offset: usize) -> (usize, usize) {
        let line = self.starts.partition_point(|&s| s <= offset).saturating_sub(1);
        (line, self.starts[line])
    }
}

/// Group highlights by `(line, message variant)` in first-appearance order and
/// compose each group. The span runs from the first highlight's start to the
/// furthest end in the group.
pub fn decorate(text: &str, highlights: &[Highlight]) -> Result<Vec<Decoration>> {
    let lines = LineIndex::new(text);
    let mut slots: FxHashMap<(usize, MessageTag), usize> = FxHashMap::default();
    let mut groups: Vec<Vec<&Highlight>> = Vec::new();
    for h in highlights {
        let (line, _) = lines.locate(h.start);
        let slot = *slots.entry((line, h.message.tag())).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push(h);
    }

    let mut out = Vec::with_capacity(groups.len());
    for group in groups {
        let Some(first) = group.first() else { continue };
        let messages: Vec<Message> = group.iter().map(|h| h.message.clone()).collect();
        let (line, line_start) = lines.locate(first.start);
        out.push(Decoration {
            start: first.start,
            end: group.iter().map(|h| h.end).max().unwrap_or(first.end),
            line,
            column: first.start - line_start,
            kind: first.kind,
            message: compose(&messages)?,
        });
    }
    Ok(out)
}

/// Status highlight at the top of a kustomization or chart document.
fn build_status(ctx: &ScanContext<'_>) -> Option<Highlight> {
    let tool = BuildTool::for_marker(Path::new(ctx.path?))?.step();
    let end = ctx.text.find('\n').unwrap_or(ctx.text.len());
    let end = ctx.text[..end].trim_end_matches('\r').len();
    let (kind, text) = if ctx.dirty {
        (HighlightKind::Dirty, format!("Unsaved changes; the last {} result may be stale", tool))
    } else {
        let build = ctx.build?;
        if build.success {
            (HighlightKind::Success, format!("{} succeeded", tool))
        } else {
            (HighlightKind::Error, format!("{} failed:\n{}", tool, build.output.trim_end()))
        }
    };
    Some(Highlight::new(0, end, kind, None, Message::PlainText { text }))
}

/// Runs the finder set over documents against one index snapshot.
pub struct Scanner {
    finders: Vec<Box<dyn Finder>>,
    opts: ScanOptions,
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new(ScanOptions::default())
    }
}

impl Scanner {
    pub fn new(opts: ScanOptions) -> Self {
        Self { finders: default_finders(), opts }
    }

    pub fn with_finders(opts: ScanOptions, finders: Vec<Box<dyn Finder>>) -> Self {
        Self { finders, opts }
    }

    pub fn options(&self) -> &ScanOptions {
        &self.opts
    }

    pub fn scan(&self, index: &Index, ctx: &ScanContext<'_>) -> Result<ScanReport> {
        let t0 = Instant::now();
        let origin = Origin::Workspace { path: ctx.path.unwrap_or_default().to_string() };
        let mut located: Vec<Located> = Vec::new();
        if let Some(h) = build_status(ctx) {
            located.push(Located { source: None, highlight: h });
        }

        for doc in split_documents(ctx.text) {
            let current = match Resource::from_yaml(doc.text, origin.clone()) {
                Ok(Some(r)) => Arc::new(r),
                Ok(None) => continue,
                Err(e) => {
                    debug!(path = ?ctx.path, offset = doc.offset, error = %e, "skipping sub-document");
                    continue;
                }
            };
            let sub = ctx.with_text(doc.text);
            for h in find_all(&self.finders, index, &current, &sub, &self.opts) {
                located.push(Located { source: Some(Arc::clone(&current)), highlight: h.shifted(doc.offset) });
            }
        }

        let highlights: Vec<Highlight> = located.iter().map(|l| l.highlight.clone()).collect();
        let decorations = decorate(ctx.text, &highlights)?;
        let ms = t0.elapsed().as_secs_f64() * 1000.0;
        counter!("scan_highlights_total", highlights.len() as u64);
        histogram!("scan_eval_ms", ms);
        info!(
            path = ?ctx.path,
            epoch = index.epoch,
            highlights = highlights.len(),
            decorations = decorations.len(),
            took_ms = %format!("{:.3}", ms),
            "scan"
        );
        Ok(ScanReport { decorations, highlights: located })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kuberef_core::BuildOutcome;

    #[test]
    fn line_index_locates_offsets() {
        let li = LineIndex::new("ab\ncd\n\nef");
        assert_eq!(li.locate(0), (0, 0));
        assert_eq!(li.locate(4), (1, 3));
        assert_eq!(li.locate(6), (2, 6));
        assert_eq!(li.locate(8), (3, 7));
    }

    #[test]
    fn decorate_groups_by_line_and_variant() {
        let text = "one two\nthree\n";
        let plain = |s: &str| Message::PlainText { text: s.to_string() };
        let hs = vec![
            Highlight::new(0, 3, HighlightKind::Hint, None, plain("x")),
            Highlight::new(4, 7, HighlightKind::Hint, None, plain("y")),
            Highlight::new(8, 13, HighlightKind::Hint, None, plain("z")),
        ];
        let ds = decorate(text, &hs).unwrap();
        assert_eq!(ds.len(), 2);
        assert_eq!((ds[0].start, ds[0].end, ds[0].line, ds[0].column), (0, 7, 0, 0));
        assert_eq!(ds[0].message, "x\ny");
        assert_eq!((ds[1].line, ds[1].column), (1, 0));
    }

    #[test]
    fn build_status_only_for_build_roots() {
        let failed = BuildOutcome { success: false, output: "Error: missing resource\n".into() };
        let ctx = ScanContext { build: Some(&failed), ..ScanContext::new("resources:\n  - a.yaml\n").with_path("/w/app/kustomization.yaml") };
        let h = build_status(&ctx).unwrap();
        assert_eq!(h.kind, HighlightKind::Error);
        assert_eq!((h.start, h.end), (0, 10));

        let dirty = ScanContext { dirty: true, ..ctx };
        assert_eq!(build_status(&dirty).unwrap().kind, HighlightKind::Dirty);

        let chart = ScanContext { build: Some(&failed), ..ScanContext::new("name: api\n").with_path("/w/charts/api/Chart.yml") };
        match build_status(&chart).unwrap().message {
            Message::PlainText { text } => assert!(text.starts_with("Helm template failed:"), "{}", text),
            other => panic!("unexpected {other:?}"),
        }
        let bare = ScanContext { build: Some(&failed), ..ScanContext::new("resources: []\n").with_path("/w/app/Kustomization") };
        assert_eq!(build_status(&bare).unwrap().kind, HighlightKind::Error);

        let other = ScanContext { build: Some(&failed), ..ScanContext::new("a: 1\n").with_path("/w/app/deploy.yaml") };
        assert!(build_status(&other).is_none());
    }
}
