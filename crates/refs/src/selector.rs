//! Service selectors pointed at the workloads whose pod labels they match.

#![forbid(unsafe_code)]

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use kuberef_core::kinds::{self, pod_labels, selector_matches, service_selector, POD_LABEL_KINDS};
use kuberef_core::{Highlight, HighlightKind, Message, Resource, ScanContext, ScanOptions};
use kuberef_store::Index;

use crate::{Finder, Token};

// Only places the highlight; label values come from the parsed resource.
static SELECTOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^[ \t]*(?P<key>selector):").unwrap());

/// Points a Service's `spec.selector` at the workloads it exactly selects.
/// Selector matching is not namespace-scoped.
pub struct SelectorFinder;

impl Finder for SelectorFinder {
    fn name(&self) -> &'static str {
        "selector"
    }

    fn find(&self, index: &Index, current: &Resource, ctx: &ScanContext<'_>, _opts: &ScanOptions) -> Vec<Highlight> {
        if current.kind != kinds::SERVICE {
            return Vec::new();
        }
        let selector = service_selector(current);
        if selector.is_empty() {
            return Vec::new();
        }
        let Some(key) = SELECTOR.captures(ctx.text).and_then(|c| c.name("key")) else {
            return Vec::new();
        };
        let tok = Token::from(key);
        let base = ctx.display_base();
        POD_LABEL_KINDS
            .iter()
            .flat_map(|kind| index.lookup(kind, None, None))
            .filter(|r| pod_labels(r).is_some_and(|labels| selector_matches(&selector, &labels)))
            .map(|r| {
                Highlight::new(
                    tok.start,
                    tok.end(),
                    HighlightKind::Reference,
                    Some(Arc::clone(r)),
                    Message::SelectorFound {
                        kind: r.kind.clone(),
                        name: r.name().to_string(),
                        origin: r.origin.clone(),
                        base: base.clone(),
                    },
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;

    const SVC: &str = "apiVersion: v1\nkind: Service\nmetadata:\n  name: web\n  namespace: shop\nspec:\n  selector:\n    app: web\n  ports:\n    - port: 80\n";

    fn deployment(name: &str, ns: &str, labels: &str) -> Resource {
        let text = format!(
            "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: {name}\n  namespace: {ns}\nspec:\n  selector:\n    matchLabels:\n{labels}"
        );
        yaml(&text, ws("/w/deploy.yaml"))
    }

    #[test]
    fn exact_label_set_matches_across_namespaces() {
        let idx = Index::build(vec![
            deployment("web", "shop", "      app: web\n"),
            deployment("web-canary", "shop", "      app: web\n      track: canary\n"),
            deployment("web-other", "elsewhere", "      app: web\n"),
            deployment("api", "shop", "      app: api\n"),
        ]);
        let current = yaml(SVC, ws("/w/svc.yaml"));
        let hs = SelectorFinder.find(&idx, &current, &ScanContext::new(SVC), &ScanOptions::default());
        let names: Vec<&str> = hs.iter().map(|h| h.target.as_ref().unwrap().name()).collect();
        assert_eq!(names, vec!["web", "web-other"]);
        assert_eq!(&SVC[hs[0].start..hs[0].end], "selector");
        assert!(matches!(hs[0].message, Message::SelectorFound { .. }));
    }

    #[test]
    fn no_matching_workload_emits_nothing() {
        let idx = Index::build(vec![deployment("api", "shop", "      app: api\n")]);
        let current = yaml(SVC, ws("/w/svc.yaml"));
        assert!(SelectorFinder.find(&idx, &current, &ScanContext::new(SVC), &ScanOptions::default()).is_empty());
    }

    #[test]
    fn service_without_selector_is_skipped() {
        let text = "apiVersion: v1\nkind: Service\nmetadata:\n  name: ext\nspec:\n  type: ExternalName\n";
        let idx = Index::build(vec![deployment("web", "shop", "      app: web\n")]);
        let current = yaml(text, ws("/w/ext.yaml"));
        assert!(SelectorFinder.find(&idx, &current, &ScanContext::new(text), &ScanOptions::default()).is_empty());
    }
}
