//! `valueFrom.secretKeyRef` / `valueFrom.configMapKeyRef` references.

#![forbid(unsafe_code)]

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use kuberef_core::kinds::{self, is_pod_template_kind};
use kuberef_core::{Highlight, ItemType, Resource, ScanContext, ScanOptions};
use kuberef_search::thresholds;
use kuberef_store::Index;

use crate::{name_highlights, resolve, sub_item, Finder, Resolution, Target, Token};

// valueFrom:
//   secretKeyRef:
//     name: db
//     optional: true
//     key: password
static NAME_THEN_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"valueFrom:[ \t]*(?:#[^\r\n]*)?\r?\n[ \t]*(?P<ref>secretKeyRef|configMapKeyRef):[ \t]*(?:#[^\r\n]*)?\r?\n",
        r#"[ \t]*name:[ \t]*["']?(?P<name>[^\s"'#]+)["']?[ \t]*(?:#[^\r\n]*)?\r?\n"#,
        r"(?:[ \t]*optional:[^\r\n]*\r?\n)?",
        r#"[ \t]*key:[ \t]*["']?(?P<key>[^\s"'#]+)"#,
    ))
    .unwrap()
});

// valueFrom:
//   configMapKeyRef:
//     key: LOG_LEVEL
//     name: settings
static KEY_THEN_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"valueFrom:[ \t]*(?:#[^\r\n]*)?\r?\n[ \t]*(?P<ref>secretKeyRef|configMapKeyRef):[ \t]*(?:#[^\r\n]*)?\r?\n",
        r#"[ \t]*key:[ \t]*["']?(?P<key>[^\s"'#]+)["']?[ \t]*(?:#[^\r\n]*)?\r?\n"#,
        r"(?:[ \t]*optional:[^\r\n]*\r?\n)?",
        r#"[ \t]*name:[ \t]*["']?(?P<name>[^\s"'#]+)"#,
    ))
    .unwrap()
});

pub struct KeyRefFinder;

impl KeyRefFinder {
    fn occurrence(
        &self,
        cap: &Captures<'_>,
        index: &Index,
        current: &Resource,
        ctx: &ScanContext<'_>,
        opts: &ScanOptions,
    ) -> Vec<Highlight> {
        let (Some(r), Some(name), Some(key)) = (cap.name("ref"), cap.name("name"), cap.name("key")) else {
            return Vec::new();
        };
        let kind = if r.as_str() == "secretKeyRef" { kinds::SECRET } else { kinds::CONFIG_MAP };
        let base = ctx.display_base();
        let name_tok = Token::from(name);
        let hint = opts.enable_correction_hints.then_some(thresholds::NAME);
        let res = resolve(index, kind, current.namespace(), &Target::literal_then_dotted(name.as_str()), hint);
        let mut out = name_highlights(&res, name_tok, &base);
        if let Resolution::Found(parents) = &res {
            let key_tok = Token::from(key);
            for parent in parents {
                let keys: Vec<String> = parent.data_keys().into_iter().map(str::to_string).collect();
                out.extend(sub_item(key_tok, parent, ItemType::Key, &keys, thresholds::KEY, opts, &base));
            }
        }
        out
    }
}

impl Finder for KeyRefFinder {
    fn name(&self) -> &'static str {
        "keyref"
    }

    fn find(&self, index: &Index, current: &Resource, ctx: &ScanContext<'_>, opts: &ScanOptions) -> Vec<Highlight> {
        if !is_pod_template_kind(&current.kind) {
            return Vec::new();
        }
        let mut out = Vec::new();
        for re in [&*NAME_THEN_KEY, &*KEY_THEN_NAME] {
            for cap in re.captures_iter(ctx.text) {
                out.extend(self.occurrence(&cap, index, current, ctx, opts));
            }
        }
        out.sort_by_key(|h| h.start);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;
    use kuberef_core::{HighlightKind, Message};

    const SECRET: &str = "apiVersion: v1\nkind: Secret\nmetadata:\n  name: db\n  namespace: shop\ndata:\n  password: aHVudGVyMg==\n  user: YWRtaW4=\n";
    const CONFIG: &str = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: settings\n  namespace: shop\ndata:\n  LOG_LEVEL: debug\n";

    fn pod(env: &str) -> (Resource, String) {
        let text = format!(
            "apiVersion: v1\nkind: Pod\nmetadata:\n  name: web\n  namespace: shop\nspec:\n  containers:\n    - name: web\n      env:\n{env}"
        );
        (yaml(&text, ws("/w/pod.yaml")), text)
    }

    fn index() -> Index {
        Index::build(vec![yaml(SECRET, ws("/w/secret.yaml")), yaml(CONFIG, ws("/w/cm.yaml"))])
    }

    fn run(env: &str, opts: ScanOptions) -> (Vec<Highlight>, String) {
        let (current, text) = pod(env);
        let hs = KeyRefFinder.find(&index(), &current, &ScanContext::new(&text), &opts);
        (hs, text)
    }

    #[test]
    fn name_then_key_resolves_name_and_key() {
        let env = "        - name: PASS\n          valueFrom:\n            secretKeyRef:\n              name: db\n              key: password\n";
        let (hs, text) = run(env, ScanOptions::default());
        assert_eq!(hs.len(), 2);
        assert_eq!(&text[hs[0].start..hs[0].end], "db");
        assert_eq!(hs[0].kind, HighlightKind::Reference);
        assert_eq!(&text[hs[1].start..hs[1].end], "password");
        assert_eq!(hs[1].kind, HighlightKind::Success);
    }

    #[test]
    fn key_then_name_and_optional_line() {
        let env = "        - name: LEVEL\n          valueFrom:\n            configMapKeyRef:\n              key: LOG_LEVEL\n              optional: true\n              name: settings\n";
        let (hs, text) = run(env, ScanOptions::default());
        let spans: Vec<&str> = hs.iter().map(|h| &text[h.start..h.end]).collect();
        assert_eq!(spans, vec!["LOG_LEVEL", "settings"]);
        assert!(matches!(hs[0].message, Message::SubItemFound { .. }));
    }

    #[test]
    fn trailing_comments_do_not_break_the_block() {
        let env = "        - name: PASS\n          valueFrom: # injected\n            secretKeyRef:\n              name: db  # from vault\n              key: password\n";
        let (hs, text) = run(env, ScanOptions::default());
        let spans: Vec<&str> = hs.iter().map(|h| &text[h.start..h.end]).collect();
        assert_eq!(spans, vec!["db", "password"]);
    }

    #[test]
    fn missing_key_suggests_from_that_secret() {
        let env = "        - name: PASS\n          valueFrom:\n            secretKeyRef:\n              name: db\n              key: pasword\n";
        let (hs, _) = run(env, ScanOptions::default());
        match &hs[1].message {
            Message::SubItemNotFound { suggestion, item_type, .. } => {
                assert_eq!(suggestion, "password");
                assert_eq!(*item_type, ItemType::Key);
            }
            other => panic!("unexpected {other:?}"),
        }
        let (off, _) = run(env, ScanOptions { enable_correction_hints: false });
        assert_eq!(off.len(), 1, "only the resolved name remains");
    }

    #[test]
    fn wrong_kind_is_a_no_op() {
        let current = yaml(CONFIG, ws("/w/cm.yaml"));
        let text = "valueFrom:\n  secretKeyRef:\n    name: db\n    key: password\n";
        assert!(KeyRefFinder.find(&index(), &current, &ScanContext::new(text), &ScanOptions::default()).is_empty());
    }
}
