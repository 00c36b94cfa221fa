//! Service names written inside quoted strings (env values, URLs, args).
//!
//! Accepted host forms: `name`, `name.ns`, `name[.ns].svc`, `.svc.cluster`,
//! `.svc.cluster.local`, each optionally followed by `:<port>`. A port is
//! checked against the resolved Service's declared ports.

#![forbid(unsafe_code)]

use once_cell::sync::Lazy;
use regex::Regex;

use kuberef_core::kinds::{self, service_ports};
use kuberef_core::{Highlight, ItemType, Resource, ScanContext, ScanOptions};
use kuberef_search::thresholds;
use kuberef_store::Index;

use crate::{name_highlights, resolve, sub_item, Finder, Resolution, Target, Token};

static QUOTED: Lazy<Regex> = Lazy::new(|| Regex::new(r#""([^"\n]*)"|'([^'\n]*)'"#).unwrap());
static HOST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?P<host>[a-z0-9](?:[a-z0-9.-]*[a-z0-9])?)(?::(?P<port>[0-9]{1,5}))?").unwrap());

const SVC_SUFFIXES: &[&str] = &[".svc.cluster.local", ".svc.cluster", ".svc"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Host<'t> {
    target: Target<'t>,
    /// A `.svc` suffix or a port makes the token look like an in-cluster address.
    dns_evidence: bool,
}

fn parse_host(host: &str, has_port: bool) -> Option<Host<'_>> {
    for suffix in SVC_SUFFIXES {
        if let Some(rest) = host.strip_suffix(suffix) {
            let target = Target::dotted(rest).or_else(|| (!rest.contains('.')).then(|| Target::literal(rest)))?;
            return Some(Host { target, dns_evidence: true });
        }
    }
    let target = if host.contains('.') { Target::dotted(host)? } else { Target::literal(host) };
    Some(Host { target, dns_evidence: has_port })
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'-'
}

/// The match `[start, end)` stands alone in `s`: it is not part of a longer
/// identifier, not a path segment after a single `/`, and a port is not the
/// head of a version like `:1.4`.
fn standalone(s: &str, start: usize, end: usize, has_port: bool) -> bool {
    let b = s.as_bytes();
    if start > 0 {
        let prev = b[start - 1];
        if is_word_byte(prev) {
            return false;
        }
        if prev == b'/' && (start < 2 || b[start - 2] != b'/') {
            return false;
        }
    }
    match b.get(end) {
        Some(&next) if is_word_byte(next) => false,
        Some(&b'.') if has_port => false,
        _ => true,
    }
}

pub struct ServiceFinder;

impl Finder for ServiceFinder {
    fn name(&self) -> &'static str {
        "service"
    }

    fn find(&self, index: &Index, current: &Resource, ctx: &ScanContext<'_>, opts: &ScanOptions) -> Vec<Highlight> {
        if current.kind == kinds::INGRESS || current.kind == kinds::SERVICE {
            return Vec::new();
        }
        let base = ctx.display_base();
        let mut out = Vec::new();
        for q in QUOTED.captures_iter(ctx.text) {
            let Some(inner) = q.get(1).or_else(|| q.get(2)) else { continue };
            for cap in HOST.captures_iter(inner.as_str()) {
                let Some(h) = cap.name("host") else { continue };
                let port = cap.name("port");
                let end = port.map_or(h.end(), |p| p.end());
                if !standalone(inner.as_str(), h.start(), end, port.is_some()) {
                    continue;
                }
                let Some(host) = parse_host(h.as_str(), port.is_some()) else { continue };
                let name_tok = Token::new(host.target.name, inner.start() + h.start());
                let hint = (opts.enable_correction_hints && host.dns_evidence).then_some(thresholds::NAME);
                let res = resolve(index, kinds::SERVICE, current.namespace(), &[host.target], hint);
                out.extend(name_highlights(&res, name_tok, &base));

                let (Resolution::Found(services), Some(p)) = (&res, port) else { continue };
                let port_tok = Token::new(p.as_str(), inner.start() + p.start());
                for svc in services {
                    let declared: Vec<String> = service_ports(svc).into_iter().filter_map(|sp| sp.port).collect();
                    out.extend(sub_item(port_tok, svc, ItemType::Port, &declared, thresholds::NUMERIC_PORT, opts, &base));
                }
            }
        }
        out
    }
}
