#![forbid(unsafe_code)]

use std::fs;

use kuberef_core::Origin;
use kuberef_sources::{find_build_roots, load_workspace, manifest_paths, run_builds, workspace_batch, BuildTool};

fn write(root: &std::path::Path, rel: &str, body: &str) {
    let p = root.join(rel);
    fs::create_dir_all(p.parent().unwrap()).unwrap();
    fs::write(p, body).unwrap();
}

fn workspace() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(root, "apps/web.yaml", "kind: Deployment\nmetadata:\n  name: web\n---\nkind: Service\nmetadata:\n  name: web\n");
    write(root, "apps/db.yml", "kind: Secret\nmetadata:\n  name: db\n");
    write(root, "apps/notes.txt", "kind: Secret\nmetadata:\n  name: ignored\n");
    write(root, ".git/config.yaml", "kind: Secret\nmetadata:\n  name: hidden\n");
    write(root, "node_modules/pkg/x.yaml", "kind: Secret\nmetadata:\n  name: vendored\n");
    write(root, "overlay/kustomization.yaml", "resources:\n  - ../apps\n");
    write(root, "broken.yaml", "kind: [oops\n");
    write(root, "legacy/Kustomization", "resources:\n  - ../apps\n");
    write(root, "charts/api/Chart.yml", "apiVersion: v2\nname: api\n");
    dir
}

#[test]
fn walk_skips_hidden_and_vendored_dirs() {
    let dir = workspace();
    let paths = manifest_paths(dir.path()).unwrap();
    let rel: Vec<String> =
        paths.iter().map(|p| p.strip_prefix(dir.path()).unwrap().to_string_lossy().into_owned()).collect();
    assert_eq!(
        rel,
        vec![
            "apps/db.yml",
            "apps/web.yaml",
            "broken.yaml",
            "charts/api/Chart.yml",
            "legacy/Kustomization",
            "overlay/kustomization.yaml",
        ]
    );
}

#[test]
fn load_tags_every_resource_with_its_file() {
    let dir = workspace();
    let rs = load_workspace(dir.path()).unwrap();
    let names: Vec<(&str, &str)> = rs.iter().map(|r| (r.kind.as_str(), r.name())).collect();
    assert_eq!(names, vec![("Secret", "db"), ("Deployment", "web"), ("Service", "web")]);
    let web = dir.path().join("apps/web.yaml").to_string_lossy().into_owned();
    assert_eq!(rs[1].origin, Origin::Workspace { path: web });

    let batch = workspace_batch(dir.path()).unwrap();
    assert_eq!(batch.source, "workspace");
    assert_eq!(batch.resources.len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn build_roots_are_found_and_failures_reported() {
    let dir = workspace();
    let roots = find_build_roots(dir.path(), BuildTool::Kustomize).unwrap();
    let dirs: Vec<_> = roots.iter().map(|r| r.dir.clone()).collect();
    assert_eq!(dirs, vec![dir.path().join("legacy"), dir.path().join("overlay")]);
    assert_eq!(roots[0].marker_path(), dir.path().join("legacy/Kustomization").as_path());
    let charts = find_build_roots(dir.path(), BuildTool::Helm).unwrap();
    assert_eq!(charts.len(), 1);
    assert_eq!(charts[0].marker_path(), dir.path().join("charts/api/Chart.yml").as_path());

    std::env::set_var("KUBEREF_KUSTOMIZE_BIN", "/nonexistent/kustomize-for-tests");
    let runs = run_builds(roots).await;
    assert_eq!(runs.len(), 2);
    assert!(runs.iter().all(|r| !r.outcome.success && r.resources.is_empty()));
}
