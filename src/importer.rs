//! Background schema import
//!
//! One worker thread owns all runtime registration. Requests land in a
//! pending map; on each wake the worker takes the whole map, registers every
//! file in it, and publishes the outcomes under a single lock. Callers learn
//! the results by draining the status map.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::mem;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{PbError, Result};
use crate::registry::RegistryInner;

/// Outcome of one import, as reported by a status drain
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ImportStatus {
    Ok,
    Err(String),
}

impl ImportStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, ImportStatus::Ok)
    }

    fn from_result(result: Result<()>) -> Self {
        match result {
            Ok(()) => ImportStatus::Ok,
            Err(PbError::SchemaLoad(diagnostics)) => ImportStatus::Err(
                diagnostics
                    .iter()
                    .map(|d| d.to_string())
                    .collect::<Vec<_>>()
                    .join("\n"),
            ),
            Err(e) => ImportStatus::Err(e.to_string()),
        }
    }
}

impl fmt::Display for ImportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportStatus::Ok => write!(f, "OK"),
            ImportStatus::Err(reason) => write!(f, "ERR {}", reason),
        }
    }
}

#[derive(Default)]
struct QueueState {
    pending: HashMap<String, String>,
    status: BTreeMap<String, ImportStatus>,
    stop: bool,
}

/// Pending tasks and published results behind one mutex + condvar
#[derive(Default)]
pub(crate) struct ImportQueue {
    state: Mutex<QueueState>,
    wake: Condvar,
}

impl ImportQueue {
    fn submit(&self, filename: String, text: String) {
        self.state.lock().pending.insert(filename, text);
        self.wake.notify_one();
    }

    /// Block until there is work or a stop request. Returns `None` only once
    /// stopped with nothing left pending.
    fn next_batch(&self) -> Option<HashMap<String, String>> {
        let mut state = self.state.lock();
        while state.pending.is_empty() && !state.stop {
            self.wake.wait(&mut state);
        }

        if state.pending.is_empty() {
            return None;
        }
        Some(mem::take(&mut state.pending))
    }

    fn publish(&self, results: BTreeMap<String, ImportStatus>) {
        self.state.lock().status.extend(results);
    }

    fn drain(&self) -> BTreeMap<String, ImportStatus> {
        mem::take(&mut self.state.lock().status)
    }

    fn stop(&self) {
        self.state.lock().stop = true;
        self.wake.notify_all();
    }
}

/// Handle to the worker thread. Dropping it stops and joins the worker after
/// the in-flight batch finishes.
pub(crate) struct Importer {
    queue: Arc<ImportQueue>,
    handle: Option<JoinHandle<()>>,
}

impl Importer {
    pub(crate) fn spawn(name: &str, registry: Arc<RegistryInner>) -> Result<Self> {
        let queue = Arc::new(ImportQueue::default());
        let worker_queue = Arc::clone(&queue);

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                debug!("import worker started");
                while run_once(&worker_queue, &registry) {}
                debug!("import worker stopped");
            })?;

        Ok(Self {
            queue,
            handle: Some(handle),
        })
    }

    pub(crate) fn submit(&self, filename: &str, text: &str) {
        self.queue.submit(filename.to_string(), text.to_string());
    }

    pub(crate) fn drain(&self) -> BTreeMap<String, ImportStatus> {
        self.queue.drain()
    }
}

impl Drop for Importer {
    fn drop(&mut self) {
        self.queue.stop();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("import worker panicked");
            }
        }
    }
}

/// One wake cycle: take every pending task, register them in filename
/// order, publish all outcomes together. Returns false when stopped.
pub(crate) fn run_once(queue: &ImportQueue, registry: &RegistryInner) -> bool {
    let Some(batch) = queue.next_batch() else {
        return false;
    };

    let batch: BTreeMap<String, String> = batch.into_iter().collect();
    let mut results = BTreeMap::new();

    for (filename, text) in batch {
        let status = ImportStatus::from_result(registry.import_file(&filename, &text));
        match &status {
            ImportStatus::Ok => info!(file = %filename, "schema imported"),
            ImportStatus::Err(reason) => {
                warn!(file = %filename, reason = %reason, "schema import failed")
            }
        }
        results.insert(filename, status);
    }

    queue.publish(results);
    true
}
