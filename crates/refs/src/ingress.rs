//! Ingress backends: `service: {name, port: {number|name}}` in either order.

#![forbid(unsafe_code)]

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use kuberef_core::kinds::{self, service_ports};
use kuberef_core::{Highlight, ItemType, Resource, ScanContext, ScanOptions};
use kuberef_search::thresholds;
use kuberef_store::Index;

use crate::{name_highlights, resolve, sub_item, Finder, Resolution, Target, Token};

static NAME_THEN_PORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"service:[ \t]*(?:#[^\r\n]*)?\r?\n",
        r#"[ \t]*name:[ \t]*["']?(?P<name>[^\s"'#]+)["']?[ \t]*(?:#[^\r\n]*)?\r?\n"#,
        r"[ \t]*port:[ \t]*(?:#[^\r\n]*)?\r?\n",
        r#"[ \t]*(?P<field>number|name):[ \t]*["']?(?P<port>[^\s"'#]+)"#,
    ))
    .unwrap()
});

static PORT_THEN_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"service:[ \t]*(?:#[^\r\n]*)?\r?\n",
        r"[ \t]*port:[ \t]*(?:#[^\r\n]*)?\r?\n",
        r#"[ \t]*(?P<field>number|name):[ \t]*["']?(?P<port>[^\s"'#]+)["']?[ \t]*(?:#[^\r\n]*)?\r?\n"#,
        r#"[ \t]*name:[ \t]*["']?(?P<name>[^\s"'#]+)"#,
    ))
    .unwrap()
});

pub struct IngressFinder;

fn backend(cap: &Captures<'_>, index: &Index, current: &Resource, ctx: &ScanContext<'_>, opts: &ScanOptions) -> Vec<Highlight> {
    let (Some(name), Some(field), Some(port)) = (cap.name("name"), cap.name("field"), cap.name("port")) else {
        return Vec::new();
    };
    let base = ctx.display_base();
    let hint = opts.enable_correction_hints.then_some(thresholds::NAME);
    let res = resolve(index, kinds::SERVICE, current.namespace(), &Target::literal_then_dotted(name.as_str()), hint);
    let mut out = name_highlights(&res, Token::from(name), &base);
    let Resolution::Found(services) = &res else {
        return out;
    };
    let numeric = field.as_str() == "number";
    let threshold = if numeric { thresholds::NUMERIC_PORT } else { thresholds::NAMED_PORT };
    for svc in services {
        let declared: Vec<String> = service_ports(svc)
            .into_iter()
            .filter_map(|p| if numeric { p.port } else { p.name })
            .collect();
        out.extend(sub_item(Token::from(port), svc, ItemType::Port, &declared, threshold, opts, &base));
    }
    out
}

impl Finder for IngressFinder {
    fn name(&self) -> &'static str {
        "ingress"
    }

    fn find(&self, index: &Index, current: &Resource, ctx: &ScanContext<'_>, opts: &ScanOptions) -> Vec<Highlight> {
        if current.kind != kinds::INGRESS {
            return Vec::new();
        }
        let mut out: Vec<Highlight> = NAME_THEN_PORT
            .captures_iter(ctx.text)
            .chain(PORT_THEN_NAME.captures_iter(ctx.text))
            .flat_map(|cap| backend(&cap, index, current, ctx, opts))
            .collect();
        out.sort_by_key(|h| h.start);
        out
    }
}
