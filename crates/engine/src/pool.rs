//! A fixed-size pool of long-lived workers draining one shared queue.
//!
//! The queue holds at most one pending unit, so `submit` waits until a worker
//! is ready to take more work. Results go back on the per-stage channel each
//! unit carries.

use std::sync::{Arc, Mutex as StdMutex, RwLock};

use fanfetch_types::Env;
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::{
    action::Action,
    error::{PoolError, TaskError},
};

pub const DEFAULT_POOL_SIZE: usize = 2;

/// One (environment, action) pairing of a stage.
pub struct WorkUnit {
    /// Position of the pairing in the stage's cross product.
    pub slot: usize,
    pub action: Arc<Action>,
    pub env: Env,
    pub results: mpsc::UnboundedSender<UnitResult>,
}

/// Outcome of a work unit: the forked environments, or why there are none.
#[derive(Debug)]
pub struct UnitResult {
    pub slot: usize,
    pub outcome: Result<Vec<Env>, TaskError>,
}

impl UnitResult {
    pub fn failed(slot: usize, error: TaskError) -> Self {
        Self {
            slot,
            outcome: Err(error),
        }
    }
}

pub struct WorkerPool {
    sender: RwLock<Option<mpsc::Sender<WorkUnit>>>,
    workers: StdMutex<Vec<JoinHandle<()>>>,
    size: usize,
}

impl WorkerPool {
    /// Spawns `size` workers on the current runtime; `0` means
    /// [`DEFAULT_POOL_SIZE`].
    pub fn start(size: usize) -> Arc<Self> {
        let size = if size == 0 { DEFAULT_POOL_SIZE } else { size };
        let (sender, receiver) = mpsc::channel::<WorkUnit>(1);
        let receiver = Arc::new(Mutex::new(receiver));
        let workers = (0..size)
            .map(|worker| tokio::spawn(run_worker(worker, receiver.clone())))
            .collect();
        debug!(size, "worker pool started");
        Arc::new(Self {
            sender: RwLock::new(Some(sender)),
            workers: StdMutex::new(workers),
            size,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Hands `unit` to the queue, waiting while it is full.
    pub async fn submit(&self, unit: WorkUnit) -> Result<(), PoolError> {
        let sender = self
            .sender
            .read()
            .map_err(|_| PoolError::ShutDown)?
            .clone()
            .ok_or(PoolError::ShutDown)?;
        sender.send(unit).await.map_err(|_| PoolError::ShutDown)
    }

    /// Closes the queue and waits for every worker to drain it and exit.
    pub async fn shutdown(&self) {
        if let Ok(mut sender) = self.sender.write() {
            sender.take();
        }
        let workers = match self.workers.lock() {
            Ok(mut workers) => std::mem::take(&mut *workers),
            Err(_) => Vec::new(),
        };
        for worker in workers {
            if let Err(error) = worker.await {
                warn!(error = %error, "worker exited abnormally");
            }
        }
        debug!("worker pool stopped");
    }
}

async fn run_worker(worker: usize, queue: Arc<Mutex<mpsc::Receiver<WorkUnit>>>) {
    loop {
        let next = { queue.lock().await.recv().await };
        let Some(unit) = next else {
            break;
        };
        let outcome = unit
            .action
            .perform(&unit.env)
            .await
            .map(|updates| unit.env.fork(&updates))
            .map_err(|source| TaskError::Action {
                tag: unit.action.tag_source().to_string(),
                source,
            });
        debug!(worker, slot = unit.slot, ok = outcome.is_ok(), "work unit finished");
        if unit.results.send(UnitResult { slot: unit.slot, outcome }).is_err() {
            warn!(worker, slot = unit.slot, "stage stopped listening before the unit finished");
        }
    }
}
