use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use tokio::signal;
use tracing::{error, info, warn};

use kuberef_core::{BuildOutcome, ScanContext, ScanOptions};
use kuberef_scan::{describe_referrers, Published, ReverseIndex, ScanPublisher, ScanReport, Scanner};
use kuberef_sources::{find_build_roots, manifest_paths, run_builds, workspace_batch, BuildRun, BuildTool};
use kuberef_store::{spawn_rebuild, Index, SourceBatch};

#[derive(Parser, Debug)]
#[command(name = "kuberefctl", version, about = "Cross-reference Kubernetes manifests against known resources")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    #[command(flatten)]
    sources: SourceArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct SourceArgs {
    /// Workspace root to index
    #[arg(long = "workspace", global = true, env = "KUBEREF_WORKSPACE", default_value = ".")]
    workspace: PathBuf,

    /// Also index `kustomize build` output of every kustomization under the workspace
    #[arg(long = "kustomize", global = true, action = ArgAction::SetTrue)]
    kustomize: bool,

    /// Also index `helm template` output of every chart under the workspace
    #[arg(long = "helm", global = true, action = ArgAction::SetTrue)]
    helm: bool,

    /// Also index objects from the current kube context
    #[arg(long = "cluster", global = true, action = ArgAction::SetTrue)]
    cluster: bool,

    /// Restrict the cluster listing to one namespace
    #[arg(long = "ns", global = true)]
    namespace: Option<String>,

    /// Disable correction hints (also KUBEREF_HINTS=0)
    #[arg(long = "no-hints", global = true, action = ArgAction::SetTrue)]
    no_hints: bool,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Resolve every reference in a manifest and print the decorations
    Scan {
        file: PathBuf,
        /// Treat the file as having unsaved edits
        #[arg(long = "dirty", action = ArgAction::SetTrue)]
        dirty: bool,
        /// Re-scan whenever the file changes, until Ctrl-C
        #[arg(long = "watch", action = ArgAction::SetTrue)]
        watch: bool,
    },
    /// Show which workspace documents reference the definitions in a file
    Refs { file: PathBuf },
    /// Dump the merged index
    Index {
        /// Only this kind
        #[arg(long = "kind")]
        kind: Option<String>,
    },
}

fn init_tracing() {
    let env = std::env::var("KUBEREF_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KUBEREF_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid KUBEREF_METRICS_ADDR; expected host:port");
        }
    }
}

fn queue_cap() -> usize {
    std::env::var("KUBEREF_QUEUE_CAP").ok().and_then(|s| s.parse::<usize>().ok()).unwrap_or(64)
}

/// One merged index snapshot plus the build results that fed it.
struct Loaded {
    root: PathBuf,
    index: Arc<Index>,
    builds: Vec<BuildRun>,
}

impl Loaded {
    /// Build outcome for a kustomization/chart file, if it was built.
    fn outcome_for(&self, file: &Path) -> Option<&BuildOutcome> {
        self.builds.iter().find(|b| b.root.marker_path() == file).map(|b| &b.outcome)
    }
}

async fn load(args: &SourceArgs) -> Result<Loaded> {
    let root = std::fs::canonicalize(&args.workspace)
        .with_context(|| format!("resolving workspace {}", args.workspace.display()))?;
    let (tx, handle) = spawn_rebuild(queue_cap());

    let ws_root = root.clone();
    let batch = tokio::task::spawn_blocking(move || workspace_batch(&ws_root)).await??;
    send(&tx, batch).await;

    let mut tools = Vec::new();
    if args.kustomize {
        tools.push(BuildTool::Kustomize);
    }
    if args.helm {
        tools.push(BuildTool::Helm);
    }
    let mut roots = Vec::new();
    for tool in tools {
        roots.extend(find_build_roots(&root, tool)?);
    }
    let builds = run_builds(roots).await;
    for run in &builds {
        send(&tx, SourceBatch { source: run.root.source_id(), resources: run.resources.clone() }).await;
    }

    if args.cluster {
        match kuberef_kubehub::load_cluster(args.namespace.as_deref(), kuberef_kubehub::DEFAULT_KINDS).await {
            Ok(batch) => send(&tx, batch).await,
            Err(e) => warn!(error = %e, "cluster source unavailable; continuing without it"),
        }
    }

    drop(tx);
    let index = handle.finish().await;
    info!(epoch = index.epoch, resources = index.len(), builds = builds.len(), "index ready");
    Ok(Loaded { root, index, builds })
}

async fn send(tx: &tokio::sync::mpsc::Sender<SourceBatch>, batch: SourceBatch) {
    let source = batch.source.clone();
    if tx.send(batch).await.is_err() {
        error!(source = %source, "rebuild loop closed");
    }
}

fn scan_options(args: &SourceArgs) -> ScanOptions {
    let mut opts = ScanOptions::from_env();
    if args.no_hints {
        opts.enable_correction_hints = false;
    }
    opts
}

fn scan_file(loaded: &Loaded, scanner: &Scanner, file: &Path, dirty: bool) -> Result<ScanReport> {
    let text = std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let path = file.to_string_lossy();
    let root = loaded.root.to_string_lossy();
    let ctx = ScanContext { dirty, build: loaded.outcome_for(file), ..ScanContext::new(&text).with_path(&path).with_workspace_root(&root) };
    Ok(scanner.scan(&loaded.index, &ctx)?)
}

fn print_report(output: Output, file: &Path, report: &ScanReport) -> Result<()> {
    match output {
        Output::Human => {
            if report.decorations.is_empty() {
                println!("{}: no references", file.display());
            }
            for d in &report.decorations {
                let mut lines = d.message.lines();
                println!(
                    "{}:{}:{} [{}] {}",
                    file.display(),
                    d.line + 1,
                    d.column + 1,
                    serde_json::to_value(d.kind)?.as_str().unwrap_or_default(),
                    lines.next().unwrap_or_default()
                );
                for rest in lines {
                    println!("    {}", rest);
                }
            }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(report)?),
    }
    Ok(())
}

fn modified(file: &Path) -> Option<SystemTime> {
    std::fs::metadata(file).and_then(|m| m.modified()).ok()
}

/// Re-scan on every change. Each cycle takes a ticket before rebuilding, so a
/// slow cycle never overwrites a newer one.
async fn watch(cli: &Cli, file: PathBuf, dirty: bool) -> Result<()> {
    let publisher: Arc<ScanPublisher> = Arc::new(ScanPublisher::new());
    let mut rx = publisher.subscribe();
    let output = cli.output;
    let printer_file = file.clone();
    let printer = tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let latest: Option<Published<ScanReport>> = rx.borrow().clone();
            if let Some(p) = latest {
                if let Err(e) = print_report(output, &printer_file, &p.value) {
                    error!(error = %e, "print failed");
                }
            }
        }
    });

    let mut ticker = tokio::time::interval(Duration::from_millis(500));
    let mut last_seen = None;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = modified(&file);
                if now == last_seen { continue; }
                last_seen = now;
                let ticket = publisher.begin();
                let (args, file, publisher) = (cli.sources.clone(), file.clone(), Arc::clone(&publisher));
                tokio::spawn(async move {
                    let result = async {
                        let loaded = load(&args).await?;
                        let scanner = Scanner::new(scan_options(&args));
                        scan_file(&loaded, &scanner, &file, dirty)
                    }
                    .await;
                    match result {
                        Ok(report) => { publisher.publish(ticket, report); }
                        Err(e) => error!(error = %e, "scan failed"),
                    }
                });
            }
            _ = signal::ctrl_c() => {
                info!("Ctrl-C received; stopping watch");
                break;
            }
        }
    }
    printer.abort();
    Ok(())
}

fn refs(output: Output, loaded: &Loaded, scanner: &Scanner, file: &Path) -> Result<()> {
    let mut reports = Vec::new();
    for path in manifest_paths(&loaded.root)? {
        match scan_file(loaded, scanner, &path, false) {
            Ok(r) => reports.push(r),
            Err(e) => warn!(path = %path.display(), error = %e, "skipping document"),
        }
    }
    let reverse = ReverseIndex::from_reports(&reports);
    let key = file.to_string_lossy();
    let groups = reverse.by_definition(&key);
    match output {
        Output::Human => {
            if groups.is_empty() {
                println!("{}: no referrers", file.display());
            }
            let root = loaded.root.to_string_lossy();
            let ctx = ScanContext::new("").with_path(&key).with_workspace_root(&root);
            for (def, edges) in &groups {
                let ns = def.namespace().unwrap_or("-");
                println!("{} {}/{}", def.kind, ns, def.name());
                if let Some(text) = describe_referrers(edges, &ctx.display_base()) {
                    for line in text.lines() {
                        println!("    {}", line);
                    }
                }
            }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(reverse.referrers(&key))?),
    }
    Ok(())
}

fn dump_index(output: Output, index: &Index, kind: Option<&str>) -> Result<()> {
    let items: Vec<_> = index.iter().filter(|r| kind.map(|k| r.kind == k).unwrap_or(true)).collect();
    match output {
        Output::Human => {
            println!("{:<12} {:<40} ORIGIN", "KIND", "NAMESPACE/NAME");
            for r in items {
                let ns = r.namespace().unwrap_or("-");
                println!("{:<12} {:<40} {}:{}", r.kind, format!("{}/{}", ns, r.name()), r.origin.place(), r.origin.key());
            }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(&items)?),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let scanner = Scanner::new(scan_options(&cli.sources));

    match &cli.command {
        Commands::Scan { file, dirty, watch: true } => {
            let file = std::fs::canonicalize(file).with_context(|| format!("resolving {}", file.display()))?;
            watch(&cli, file, *dirty).await?;
        }
        Commands::Scan { file, dirty, watch: false } => {
            let file = std::fs::canonicalize(file).with_context(|| format!("resolving {}", file.display()))?;
            info!(file = %file.display(), "scan invoked");
            let loaded = load(&cli.sources).await?;
            let report = scan_file(&loaded, &scanner, &file, *dirty)?;
            print_report(cli.output, &file, &report)?;
        }
        Commands::Refs { file } => {
            let file = std::fs::canonicalize(file).with_context(|| format!("resolving {}", file.display()))?;
            info!(file = %file.display(), "refs invoked");
            let loaded = load(&cli.sources).await?;
            refs(cli.output, &loaded, &scanner, &file)?;
        }
        Commands::Index { kind } => {
            let loaded = load(&cli.sources).await?;
            dump_index(cli.output, &loaded.index, kind.as_deref())?;
        }
    }

    Ok(())
}
