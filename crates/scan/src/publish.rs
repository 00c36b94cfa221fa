//! Last-write-wins publication of scan results.
//!
//! Every scan takes a [`Ticket`] before it starts. Only the holder of the most
//! recently issued ticket may publish; results from superseded scans are
//! dropped at the boundary.

#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use metrics::counter;
use tokio::sync::watch;
use tracing::debug;

use crate::ScanReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Ticket(u64);

impl Ticket {
    pub fn generation(&self) -> u64 {
        self.0
    }
}

#[derive(Debug)]
pub struct Published<T> {
    pub generation: u64,
    pub value: Arc<T>,
}

impl<T> Clone for Published<T> {
    fn clone(&self) -> Self {
        Self { generation: self.generation, value: Arc::clone(&self.value) }
    }
}

pub struct ScanPublisher<T = ScanReport> {
    issued: AtomicU64,
    tx: watch::Sender<Option<Published<T>>>,
}

impl<T> Default for ScanPublisher<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ScanPublisher<T> {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { issued: AtomicU64::new(0), tx }
    }

    pub fn begin(&self) -> Ticket {
        Ticket(self.issued.fetch_add(1, Ordering::AcqRel) + 1)
    }

    /// Publish `value` unless a newer ticket has been issued. Returns whether
    /// the value became current.
    pub fn publish(&self, ticket: Ticket, value: T) -> bool {
        let mut value = Some(value);
        let accepted = self.tx.send_if_modified(|cur| {
            if ticket.0 != self.issued.load(Ordering::Acquire) {
                return false;
            }
            if let Some(v) = value.take() {
                *cur = Some(Published { generation: ticket.0, value: Arc::new(v) });
            }
            true
        });
        if !accepted {
            counter!("scan_superseded_total", 1u64);
            debug!(generation = ticket.0, latest = self.issued.load(Ordering::Acquire), "dropping superseded scan");
        }
        accepted
    }

    pub fn latest(&self) -> Option<Published<T>> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Published<T>>> {
        self.tx.subscribe()
    }
}
