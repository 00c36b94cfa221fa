//! Built-in kind tables and typed accessors over `Resource` specs.
//!
//! This module provides:
//! - Kind name constants used by the finders
//! - Which kinds carry a pod template (and therefore `valueFrom` references)
//! - Pod-label extraction for selector matching
//! - Service port and selector projections

#![forbid(unsafe_code)]

use crate::{labels_from, scalar_string, Labels, Resource};

pub const SERVICE: &str = "Service";
pub const INGRESS: &str = "Ingress";
pub const SECRET: &str = "Secret";
pub const CONFIG_MAP: &str = "ConfigMap";
pub const POD: &str = "Pod";
pub const DEPLOYMENT: &str = "Deployment";
pub const STATEFUL_SET: &str = "StatefulSet";
pub const DAEMON_SET: &str = "DaemonSet";
pub const REPLICA_SET: &str = "ReplicaSet";
pub const JOB: &str = "Job";
pub const CRON_JOB: &str = "CronJob";
pub const REPLICATION_CONTROLLER: &str = "ReplicationController";

/// Kinds whose manifests embed a pod template (or are a pod).
pub const POD_TEMPLATE_KINDS: &[&str] = &[
    DEPLOYMENT,
    POD,
    STATEFUL_SET,
    DAEMON_SET,
    REPLICA_SET,
    JOB,
    CRON_JOB,
    REPLICATION_CONTROLLER,
];

/// Kinds that contribute pod labels to selector matching.
pub const POD_LABEL_KINDS: &[&str] = &[POD, DEPLOYMENT, STATEFUL_SET, DAEMON_SET, REPLICA_SET];

pub fn is_pod_template_kind(kind: &str) -> bool {
    POD_TEMPLATE_KINDS.contains(&kind)
}

/// Labels a Service selector is compared against.
///
/// `Pod` uses `metadata.labels`; the workload controllers use
/// `spec.selector.matchLabels`; every other kind contributes nothing.
pub fn pod_labels(r: &Resource) -> Option<Labels> {
    match r.kind.as_str() {
        POD => Some(r.metadata.labels.clone()),
        DEPLOYMENT | STATEFUL_SET | DAEMON_SET | REPLICA_SET => {
            let sel = r.spec.as_ref().and_then(|s| s.pointer("/selector/matchLabels"))?;
            Some(labels_from(Some(sel)))
        }
        _ => None,
    }
}

/// `spec.selector` of a Service as label pairs.
pub fn service_selector(r: &Resource) -> Labels {
    labels_from(r.spec.as_ref().and_then(|s| s.get("selector")))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePort {
    pub port: Option<String>,
    pub name: Option<String>,
}

/// `spec.ports[]` of a Service; the port number is kept in its rendered form
/// so it can be compared and ranked as text.
pub fn service_ports(r: &Resource) -> Vec<ServicePort> {
    let Some(ports) = r.spec.as_ref().and_then(|s| s.get("ports")).and_then(|p| p.as_array()) else {
        return Vec::new();
    };
    ports
        .iter()
        .map(|p| ServicePort {
            port: p.get("port").and_then(scalar_string),
            name: p.get("name").and_then(|x| x.as_str()).map(|s| s.to_string()),
        })
        .collect()
}

/// Exact selector rule: equal cardinality and identical values for every key.
/// Extra labels on the candidate disqualify it.
pub fn selector_matches(selector: &Labels, labels: &Labels) -> bool {
    if selector.is_empty() || selector.len() != labels.len() {
        return false;
    }
    selector
        .iter()
        .all(|(k, v)| labels.iter().any(|(lk, lv)| lk == k && lv == v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Origin;

    fn res(kind: &str, body: serde_json::Value) -> Resource {
        let mut v = body;
        v["kind"] = serde_json::Value::String(kind.to_string());
        Resource::from_value(&v, Origin::Workspace { path: "/w/x.yaml".into() }).unwrap()
    }

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect()
    }

    #[test]
    fn pod_labels_by_kind() {
        let pod = res("Pod", serde_json::json!({"metadata": {"name": "p", "labels": {"app": "web"}}}));
        assert_eq!(pod_labels(&pod), Some(labels(&[("app", "web")])));

        let dep = res(
            "Deployment",
            serde_json::json!({
                "metadata": {"name": "d", "labels": {"team": "x"}},
                "spec": {"selector": {"matchLabels": {"app": "api"}}}
            }),
        );
        assert_eq!(pod_labels(&dep), Some(labels(&[("app", "api")])));

        let job = res("Job", serde_json::json!({"metadata": {"name": "j", "labels": {"app": "api"}}}));
        assert_eq!(pod_labels(&job), None);
    }

    #[test]
    fn selector_requires_exact_key_set() {
        let sel = labels(&[("app", "x")]);
        assert!(selector_matches(&sel, &labels(&[("app", "x")])));
        assert!(!selector_matches(&sel, &labels(&[("app", "x"), ("tier", "y")])));
        assert!(!selector_matches(&sel, &labels(&[("app", "z")])));
        assert!(!selector_matches(&Labels::new(), &Labels::new()));
    }

    #[test]
    fn selector_ignores_insertion_order() {
        let sel = labels(&[("app", "x"), ("tier", "y")]);
        assert!(selector_matches(&sel, &labels(&[("tier", "y"), ("app", "x")])));
    }

    #[test]
    fn service_ports_render_numbers_as_text() {
        let svc = res(
            "Service",
            serde_json::json!({
                "metadata": {"name": "s"},
                "spec": {"ports": [{"port": 8080, "name": "http"}, {"port": 9090}]}
            }),
        );
        let ports = service_ports(&svc);
        assert_eq!(ports.len(), 2);
        assert_eq!(ports[0].port.as_deref(), Some("8080"));
        assert_eq!(ports[0].name.as_deref(), Some("http"));
        assert_eq!(ports[1].name, None);
    }
}
