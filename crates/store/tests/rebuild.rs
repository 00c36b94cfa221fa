#![forbid(unsafe_code)]

use kuberef_core::{Origin, Resource};
use kuberef_store::{spawn_rebuild, SourceBatch};

fn svc(name: &str, origin: Origin) -> Resource {
    let v = serde_json::json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": { "name": name, "namespace": "default" },
    });
    Resource::from_value(&v, origin).unwrap()
}

fn ws(path: &str) -> Origin {
    Origin::Workspace { path: path.to_string() }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rebuild_merges_sources_and_keeps_latest_batch() {
    let (tx, handle) = spawn_rebuild(16);
    tx.send(SourceBatch { source: "workspace".into(), resources: vec![svc("a", ws("/w/a.yaml"))] })
        .await
        .unwrap();
    tx.send(SourceBatch {
        source: "cluster:dev".into(),
        resources: vec![svc("a", Origin::Cluster { context: "dev".into() })],
    })
    .await
    .unwrap();
    // a second workspace walk supersedes the first
    tx.send(SourceBatch {
        source: "workspace".into(),
        resources: vec![svc("a", ws("/w/a.yaml")), svc("b", ws("/w/b.yaml"))],
    })
    .await
    .unwrap();
    drop(tx);

    let snap = handle.finish().await;
    assert!(snap.epoch >= 1);
    assert_eq!(snap.len(), 3);
    let a = snap.lookup("Service", Some("default"), Some("a"));
    assert_eq!(a.len(), 2, "same object from two origins is kept twice");
    assert_eq!(snap.lookup("Service", Some("default"), Some("b")).len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn snapshot_taken_before_rebuild_is_unchanged() {
    let (tx, handle) = spawn_rebuild(16);
    tx.send(SourceBatch { source: "workspace".into(), resources: vec![svc("a", ws("/w/a.yaml"))] })
        .await
        .unwrap();
    let mut epochs = handle.subscribe_epoch();
    epochs.changed().await.unwrap();
    let before = handle.current();
    assert_eq!(before.len(), 1);

    tx.send(SourceBatch { source: "workspace".into(), resources: vec![] }).await.unwrap();
    drop(tx);
    let after = handle.finish().await;

    assert_eq!(before.len(), 1, "held snapshot never observes a rebuild");
    assert!(after.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn burst_larger_than_queue_keeps_every_source() {
    let (tx, handle) = spawn_rebuild(2);
    for i in 0..6 {
        let path = format!("/w/o{}", i);
        tx.send(SourceBatch {
            source: format!("kustomize:{}", path),
            resources: vec![svc(&format!("s{}", i), Origin::Kustomize { path: format!("{}/kustomization.yaml", path) })],
        })
        .await
        .unwrap();
    }
    drop(tx);

    let snap = handle.finish().await;
    assert_eq!(snap.len(), 6);
    for i in 0..6 {
        assert_eq!(snap.lookup("Service", Some("default"), Some(&format!("s{}", i))).len(), 1, "source {} reached the index", i);
    }
}
