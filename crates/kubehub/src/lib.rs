//! kuberef kubehub: list reference targets from the current kube context.

#![forbid(unsafe_code)]

use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use metrics::{counter, histogram};
use serde_json::Value as Json;
use tracing::{debug, info, warn};

use kube::{
    api::{Api, ListParams},
    config::Kubeconfig,
    core::{ApiResource, DynamicObject, GroupVersionKind},
    Client,
};
use kuberef_core::{kinds, Origin, Resource};
use kuberef_store::SourceBatch;

/// Kinds the finders can point at, as `v1/Kind` or `group/v1/Kind`.
pub const DEFAULT_KINDS: &[&str] = &[
    "v1/Service",
    "v1/Secret",
    "v1/ConfigMap",
    "v1/Pod",
    "apps/v1/Deployment",
    "apps/v1/StatefulSet",
    "apps/v1/DaemonSet",
    "apps/v1/ReplicaSet",
];

pub fn parse_gvk_key(key: &str) -> Result<GroupVersionKind> {
    let parts: Vec<_> = key.split('/').collect();
    match parts.as_slice() {
        [version, kind] => Ok(GroupVersionKind::gvk("", version, kind)),
        [group, version, kind] => Ok(GroupVersionKind::gvk(group, version, kind)),
        _ => Err(anyhow!("invalid gvk key: {} (expect v1/Kind or group/v1/Kind)", key)),
    }
}

/// Name of the kubeconfig's current context, or `in-cluster` when no
/// kubeconfig is readable.
pub fn current_context() -> String {
    match Kubeconfig::read() {
        Ok(cfg) => cfg.current_context.unwrap_or_else(|| "default".to_string()),
        Err(e) => {
            debug!(error = %e, "no kubeconfig; assuming in-cluster");
            "in-cluster".to_string()
        }
    }
}

fn strip_managed_fields(v: &mut Json) {
    if let Some(meta) = v.get_mut("metadata").and_then(|m| m.as_object_mut()) {
        meta.remove("managedFields");
    }
}

/// Secret values never leave the cluster source; only keys are needed.
fn redact_secret_values(v: &mut Json) {
    for field in ["data", "stringData"] {
        if let Some(map) = v.get_mut(field).and_then(|d| d.as_object_mut()) {
            for val in map.values_mut() {
                *val = Json::String(String::new());
            }
        }
    }
}

/// Project a listed object into a cluster-origin resource. List items often
/// omit `apiVersion`/`kind`, so they are filled from the requested GVK.
pub fn resource_from(obj: &DynamicObject, gvk: &GroupVersionKind, context: &str) -> Result<Option<Resource>> {
    let mut raw = serde_json::to_value(obj).context("serializing DynamicObject")?;
    strip_managed_fields(&mut raw);
    if let Some(map) = raw.as_object_mut() {
        let api_version = if gvk.group.is_empty() { gvk.version.clone() } else { format!("{}/{}", gvk.group, gvk.version) };
        map.entry("apiVersion").or_insert(Json::String(api_version));
        map.entry("kind").or_insert(Json::String(gvk.kind.clone()));
    }
    if gvk.kind == kinds::SECRET {
        redact_secret_values(&mut raw);
    }
    Ok(Resource::from_value(&raw, Origin::Cluster { context: context.to_string() }))
}

async fn list_kind(client: Client, gvk: &GroupVersionKind, namespace: Option<&str>, context: &str) -> Result<Vec<Resource>> {
    let ar = ApiResource::from_gvk(gvk);
    let api: Api<DynamicObject> = match namespace {
        Some(ns) => Api::namespaced_with(client, ns, &ar),
        None => Api::all_with(client, &ar),
    };
    let list = api.list(&ListParams::default()).await.with_context(|| format!("listing {}", gvk.kind))?;
    let mut out = Vec::with_capacity(list.items.len());
    for obj in &list.items {
        if let Some(r) = resource_from(obj, gvk, context)? {
            out.push(r);
        }
    }
    Ok(out)
}

/// List every kind in `kind_keys` concurrently. A kind that fails to list is
/// logged and contributes nothing; a missing client is an error.
pub async fn load_cluster(namespace: Option<&str>, kind_keys: &[&str]) -> Result<SourceBatch> {
    let t0 = Instant::now();
    let gvks = kind_keys.iter().map(|k| parse_gvk_key(k)).collect::<Result<Vec<_>>>()?;
    let client = Client::try_default().await.context("creating kube client")?;
    let context = current_context();

    let lists = futures::future::join_all(gvks.iter().map(|gvk| list_kind(client.clone(), gvk, namespace, &context))).await;
    let mut resources = Vec::new();
    for (gvk, res) in gvks.iter().zip(lists) {
        match res {
            Ok(mut rs) => {
                debug!(kind = %gvk.kind, count = rs.len(), "listed");
                resources.append(&mut rs);
            }
            Err(e) => {
                counter!("cluster_list_errors_total", 1u64);
                warn!(kind = %gvk.kind, error = %e, "cluster list failed");
            }
        }
    }
    let ms = t0.elapsed().as_secs_f64() * 1000.0;
    histogram!("source_load_ms", ms, "source" => "cluster");
    info!(context = %context, ns = ?namespace, resources = resources.len(), took_ms = %format!("{:.1}", ms), "cluster loaded");
    Ok(SourceBatch { source: format!("cluster:{}", context), resources })
}
