//! Fixed worker pool fed by a bounded queue.

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::state::{Counters, PipelineState};
use super::work_unit::WorkUnit;

pub(crate) struct WorkerPool {
    sender: Sender<WorkUnit>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `workers` threads sharing a queue of `queue_depth` pending units.
    pub(crate) fn spawn(
        workers: usize,
        queue_depth: usize,
        state: &Arc<PipelineState>,
    ) -> Result<Self> {
        let (sender, receiver) = bounded::<WorkUnit>(queue_depth);
        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let receiver = receiver.clone();
            let state = Arc::clone(state);
            let handle = thread::Builder::new()
                .name(format!("displacement-worker-{}", id))
                .spawn(move || worker_loop(receiver, state))
                .with_context(|| format!("failed to spawn worker {}", id))?;
            handles.push(handle);
        }
        log::debug!("worker pool: {} workers, queue depth {}", workers, queue_depth);
        Ok(Self {
            sender,
            workers: handles,
        })
    }

    /// Queue a unit, blocking while the queue is full.
    pub(crate) fn dispatch(&self, unit: WorkUnit) -> Result<()> {
        self.sender
            .send(unit)
            .map_err(|_| anyhow::anyhow!("worker pool has shut down"))
    }

    /// Close the queue and wait for every queued and running unit.
    pub(crate) fn drain(self) {
        drop(self.sender);
        for handle in self.workers {
            if handle.join().is_err() {
                log::error!("worker thread exited abnormally");
            }
        }
    }
}

fn worker_loop(receiver: Receiver<WorkUnit>, state: Arc<PipelineState>) {
    // Ends when the driver drops the sender and the queue is empty.
    for unit in receiver.iter() {
        let sequence = unit.sequence();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| unit.run(&state)));
        if outcome.is_err() {
            Counters::bump(&state.counters.worker_panics);
            log::error!("work unit for sequence {} panicked", sequence);
        }
    }
}
