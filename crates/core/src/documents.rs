//! Multi-document YAML text: `---` splitting and resource extraction.

#![forbid(unsafe_code)]

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::{Origin, Resource};

static SEPARATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^---[ \t]*(?:#[^\r\n]*)?\r?$").unwrap());

/// One `---` delimited slice of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubDocument<'t> {
    pub offset: usize,
    pub text: &'t str,
}

pub fn split_documents(text: &str) -> Vec<SubDocument<'_>> {
    let mut out = Vec::new();
    let mut start = 0;
    for m in SEPARATOR.find_iter(text) {
        out.push(SubDocument { offset: start, text: &text[start..m.start()] });
        start = m.end();
    }
    out.push(SubDocument { offset: start, text: &text[start..] });
    out
}

/// Parse every sub-document, skipping ones that are not named objects or fail
/// to parse.
pub fn resources_from_text(text: &str, origin: &Origin) -> Vec<Resource> {
    split_documents(text)
        .into_iter()
        .filter_map(|doc| match Resource::from_yaml(doc.text, origin.clone()) {
            Ok(r) => r,
            Err(e) => {
                debug!(origin = %origin.key(), offset = doc.offset, error = %e, "skipping sub-document");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_tracks_offsets() {
        let text = "a: 1\n---\nb: 2\n--- # second\nc: 3\n";
        let docs = split_documents(text);
        assert_eq!(docs.len(), 3);
        assert_eq!(docs[1].text, "\nb: 2\n");
        assert_eq!(&text[docs[2].offset..], "\nc: 3\n");
        assert_eq!(split_documents("x: 1").len(), 1);
    }

    #[test]
    fn separator_must_start_a_line() {
        let text = "a: \"---\"\nb: x---\n";
        assert_eq!(split_documents(text).len(), 1);
    }

    #[test]
    fn resources_from_text_skips_broken_and_unnamed() {
        let text = "kind: Service\nmetadata:\n  name: a\n---\nkind: [broken\n---\nkind: ConfigMap\nmetadata: {}\n---\nkind: Secret\nmetadata:\n  name: b\n";
        let rs = resources_from_text(text, &Origin::Workspace { path: "/w/x.yaml".into() });
        let names: Vec<&str> = rs.iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
