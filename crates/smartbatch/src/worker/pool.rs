use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, error, info};

use crate::error::WorkerError;
use crate::worker::work::{WorkContext, WorkItem, WorkOutcome};

/// Fixed set of threads executing the work items of one job.
pub struct WorkerPool {
    item_sender: Option<Sender<WorkItem>>,
    outcome_receiver: Receiver<WorkOutcome>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    pub fn new(work: Arc<WorkContext>, worker_count: usize) -> Result<Self, WorkerError> {
        let worker_count = worker_count.max(1);
        let (item_sender, item_receiver) = bounded::<WorkItem>(worker_count * 2);
        let (outcome_sender, outcome_receiver) = bounded::<WorkOutcome>(worker_count * 2);
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let item_rx = item_receiver.clone();
            let outcome_tx = outcome_sender.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let worker_work = Arc::clone(&work);

            let handle = thread::Builder::new()
                .name(format!("smartbatch-worker-{}", worker_id))
                .spawn(move || {
                    run_worker(worker_id, item_rx, outcome_tx, shutdown_flag, worker_work);
                })
                .map_err(|e| {
                    shutdown.store(true, Ordering::Relaxed);
                    WorkerError::SpawnFailed(e.to_string())
                })?;

            workers.push(handle);
        }

        info!(
            "Started {} workers for generation {}",
            worker_count,
            work.generation_id.short()
        );

        Ok(Self {
            item_sender: Some(item_sender),
            outcome_receiver,
            workers,
            shutdown,
        })
    }

    pub fn submit(&self, item: WorkItem) -> Result<(), WorkerError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(WorkerError::ChannelClosed);
        }

        match &self.item_sender {
            Some(sender) => sender.send(item).map_err(|_| WorkerError::ChannelClosed),
            None => Err(WorkerError::ChannelClosed),
        }
    }

    /// Blocks until a worker reports an outcome.
    pub fn recv_outcome(&self) -> Result<WorkOutcome, WorkerError> {
        self.outcome_receiver
            .recv()
            .map_err(|_| WorkerError::ChannelClosed)
    }

    pub fn shutdown(&self) {
        debug!("Shutting down worker pool");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn wait(mut self) {
        self.shutdown();
        self.item_sender.take();

        for (i, worker) in std::mem::take(&mut self.workers).into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        debug!("All workers have stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

fn run_worker(
    worker_id: usize,
    item_receiver: Receiver<WorkItem>,
    outcome_sender: Sender<WorkOutcome>,
    shutdown: Arc<AtomicBool>,
    work: Arc<WorkContext>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        match item_receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(item) => {
                debug!(
                    "Worker {} generating document {} (attempt {})",
                    worker_id, item.index, item.attempt
                );

                let outcome = work.execute(item);

                if let Err(e) = outcome_sender.send(outcome) {
                    error!("Worker {} failed to send outcome: {}", worker_id, e);
                    break;
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                continue;
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                debug!("Worker {} item channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}
