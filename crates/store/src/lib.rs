//! kuberef store: the resource index, its snapshot handle and the coalescing
//! rebuild loop fed by source collaborators.

#![forbid(unsafe_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use arc_swap::ArcSwap;
use kuberef_core::Resource;
use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

type NsKey = (String, Option<String>);
type NameKey = (String, Option<String>, String);

/// Immutable, origin-tagged collection of resources from every source.
///
/// Entries with the same `(kind, namespace, name)` from different origins are
/// kept side by side; lookups return all of them in insertion order.
#[derive(Default)]
pub struct Index {
    pub epoch: u64,
    items: Vec<Arc<Resource>>,
    by_kind: FxHashMap<String, Vec<usize>>,
    by_kind_ns: FxHashMap<NsKey, Vec<usize>>,
    by_key: FxHashMap<NameKey, Vec<usize>>,
}

impl Index {
    pub fn build(resources: impl IntoIterator<Item = Resource>) -> Self {
        Self::from_shared(resources.into_iter().map(Arc::new))
    }

    pub fn from_shared(resources: impl IntoIterator<Item = Arc<Resource>>) -> Self {
        let mut idx = Index::default();
        for r in resources {
            let i = idx.items.len();
            let kind = r.kind.clone();
            let ns = r.metadata.namespace.clone();
            idx.by_kind.entry(kind.clone()).or_default().push(i);
            idx.by_kind_ns.entry((kind.clone(), ns.clone())).or_default().push(i);
            idx.by_key.entry((kind, ns, r.metadata.name.clone())).or_default().push(i);
            idx.items.push(r);
        }
        metrics::gauge!("index_resources", idx.items.len() as f64);
        idx
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Resource>> {
        self.items.iter()
    }

    fn pick(&self, ids: Option<&Vec<usize>>) -> Vec<&Arc<Resource>> {
        ids.map(|v| v.iter().map(|i| &self.items[*i]).collect()).unwrap_or_default()
    }

    /// `kind` alone spans all namespaces; `namespace` narrows to exactly that
    /// namespace; `name` narrows to exact-name matches.
    pub fn lookup(&self, kind: &str, namespace: Option<&str>, name: Option<&str>) -> Vec<&Arc<Resource>> {
        match (namespace, name) {
            (None, None) => self.pick(self.by_kind.get(kind)),
            (Some(ns), None) => self.pick(self.by_kind_ns.get(&(kind.to_string(), Some(ns.to_string())))),
            (Some(ns), Some(name)) => {
                self.pick(self.by_key.get(&(kind.to_string(), Some(ns.to_string()), name.to_string())))
            }
            (None, Some(name)) => self
                .pick(self.by_kind.get(kind))
                .into_iter()
                .filter(|r| r.metadata.name == name)
                .collect(),
        }
    }

    /// Candidates a resource in `namespace` may reference: same namespace, or
    /// either side without a namespace. Insertion order is preserved.
    pub fn scoped(&self, kind: &str, namespace: Option<&str>) -> Vec<&Arc<Resource>> {
        let Some(ns) = namespace else {
            return self.lookup(kind, None, None);
        };
        let same = self.by_kind_ns.get(&(kind.to_string(), Some(ns.to_string())));
        let bare = self.by_kind_ns.get(&(kind.to_string(), None));
        let mut ids: Vec<usize> = same.into_iter().chain(bare).flatten().copied().collect();
        ids.sort_unstable();
        ids.into_iter().map(|i| &self.items[i]).collect()
    }
}

/// One source's full resource list, e.g. a workspace walk or one Kustomize build.
#[derive(Debug, Clone)]
pub struct SourceBatch {
    pub source: String,
    pub resources: Vec<Resource>,
}

/// Coalescing queue keyed by source id with FIFO order and fixed capacity.
/// A newer batch from the same source replaces the queued one. When a new
/// source arrives at capacity, the oldest queued batch is handed back to the
/// caller instead of being discarded: every source must reach the index.
pub struct Coalescer {
    map: FxHashMap<String, SourceBatch>,
    order: VecDeque<String>,
    cap: usize,
    spilled: u64,
}

impl Coalescer {
    pub fn with_capacity(cap: usize) -> Self {
        Self { map: FxHashMap::default(), order: VecDeque::new(), cap: cap.max(1), spilled: 0 }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Batches handed back by `push` so far.
    pub fn spilled(&self) -> u64 {
        self.spilled
    }

    /// Queue `b`; returns the oldest queued batch when the queue was full.
    #[must_use = "a spilled batch must still be applied"]
    pub fn push(&mut self, b: SourceBatch) -> Option<SourceBatch> {
        let key = b.source.clone();
        let mut spill = None;
        if !self.map.contains_key(&key) {
            if self.order.len() >= self.cap {
                if let Some(old) = self.order.pop_front() {
                    spill = self.map.remove(&old);
                    self.spilled += 1;
                }
            }
            self.order.push_back(key.clone());
        }
        self.map.insert(key, b);
        spill
    }

    pub fn drain_ready(&mut self) -> Vec<SourceBatch> {
        let mut out = Vec::with_capacity(self.order.len());
        while let Some(key) = self.order.pop_front() {
            if let Some(b) = self.map.remove(&key) {
                out.push(b);
            }
        }
        out
    }
}

/// Keeps the latest batch of every source and freezes them into indexes.
#[derive(Default)]
pub struct IndexBuilder {
    epoch: u64,
    sources: Vec<(String, Vec<Arc<Resource>>)>,
}

impl IndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace each source's resources; sources keep their first-seen order.
    pub fn apply(&mut self, batch: Vec<SourceBatch>) {
        for b in batch {
            let shared: Vec<Arc<Resource>> = b.resources.into_iter().map(Arc::new).collect();
            debug!(source = %b.source, resources = shared.len(), "source batch applied");
            match self.sources.iter_mut().find(|(k, _)| *k == b.source) {
                Some((_, slot)) => *slot = shared,
                None => self.sources.push((b.source, shared)),
            }
        }
        self.epoch = self.epoch.saturating_add(1);
    }

    pub fn freeze(&self) -> Arc<Index> {
        let mut idx = Index::from_shared(self.sources.iter().flat_map(|(_, v)| v.iter().cloned()));
        idx.epoch = self.epoch;
        Arc::new(idx)
    }
}

/// Handle for readers: every `current()` call yields one complete snapshot,
/// never a partially rebuilt index.
pub struct IndexHandle {
    snap: Arc<ArcSwap<Index>>,
    epoch_rx: watch::Receiver<u64>,
    task: Option<JoinHandle<()>>,
}

impl IndexHandle {
    pub fn current(&self) -> Arc<Index> {
        self.snap.load_full()
    }

    pub fn subscribe_epoch(&self) -> watch::Receiver<u64> {
        self.epoch_rx.clone()
    }

    /// Wait for the rebuild loop to flush and stop (all senders dropped), then
    /// return the final snapshot.
    pub async fn finish(mut self) -> Arc<Index> {
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        self.current()
    }
}

/// Spawn a rebuild loop consuming source batches and swapping index snapshots.
/// Returns a sender for batches and a handle for reads.
pub fn spawn_rebuild(cap: usize) -> (mpsc::Sender<SourceBatch>, IndexHandle) {
    let (tx, mut rx) = mpsc::channel::<SourceBatch>(cap.max(1));
    let snap = Arc::new(ArcSwap::from_pointee(Index::default()));
    let (epoch_tx, epoch_rx) = watch::channel(0u64);
    let snap_clone = Arc::clone(&snap);

    let task = tokio::spawn(async move {
        let mut coalescer = Coalescer::with_capacity(cap.max(1));
        let mut builder = IndexBuilder::new();
        let mut ticker = tokio::time::interval(std::time::Duration::from_millis(8));
        let publish = |coalescer: &mut Coalescer, builder: &mut IndexBuilder| {
            let batch = coalescer.drain_ready();
            if !batch.is_empty() {
                builder.apply(batch);
                let next = builder.freeze();
                let epoch = next.epoch;
                snap_clone.store(next);
                let _ = epoch_tx.send(epoch);
            }
        };
        loop {
            tokio::select! {
                maybe = rx.recv() => {
                    match maybe {
                        Some(b) => {
                            if let Some(spill) = coalescer.push(b) {
                                debug!(source = %spill.source, "queue full; applying oldest batch early");
                                builder.apply(vec![spill]);
                            }
                        }
                        None => {
                            debug!("source channel closed; draining and exiting rebuild loop");
                            publish(&mut coalescer, &mut builder);
                            break;
                        }
                    }
                }
                _ = ticker.tick() => publish(&mut coalescer, &mut builder),
            }
        }
        if coalescer.spilled() > 0 {
            metrics::counter!("index_batches_spilled_total", coalescer.spilled());
        }
        info!("rebuild loop stopped");
    });

    (tx, IndexHandle { snap, epoch_rx, task: Some(task) })
}
