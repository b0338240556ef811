//! Hand-off queues between the ingestor and the worker pool.
//!
//! There is one queue for single jobs and one for batches. Each holds at
//! most one item, so the ingestor is never more than one item ahead of the
//! slowest point of the pool. Workers wait on both queues at once.

use async_channel::{Receiver, Sender};

use crate::types::{Job, JobBatch};

/// Capacity of each queue. `async_channel` cannot create a zero-capacity
/// channel, so one slot is the closest to a direct hand-off.
const QUEUE_CAPACITY: usize = 1;

/// Producer side, owned by the ingestor. Dropping it closes both queues.
#[derive(Debug)]
pub struct Dispatcher {
    single_sender: Sender<Job>,
    batch_sender: Sender<JobBatch>,
}

/// Consumer side, cloned into every worker.
#[derive(Debug, Clone)]
pub struct WorkQueues {
    pub single_receiver: Receiver<Job>,
    pub batch_receiver: Receiver<JobBatch>,
}

pub fn create_dispatcher() -> (Dispatcher, WorkQueues) {
    let (single_sender, single_receiver) = async_channel::bounded(QUEUE_CAPACITY);
    let (batch_sender, batch_receiver) = async_channel::bounded(QUEUE_CAPACITY);

    (
        Dispatcher {
            single_sender,
            batch_sender,
        },
        WorkQueues {
            single_receiver,
            batch_receiver,
        },
    )
}

impl Dispatcher {
    /// Wait for a free slot and enqueue one job. Returns `false` once the
    /// queue has been closed.
    pub async fn dispatch_job(&self, job: Job) -> bool {
        self.single_sender.send(job).await.is_ok()
    }

    pub async fn dispatch_batch(&self, batch: JobBatch) -> bool {
        self.batch_sender.send(batch).await.is_ok()
    }

    pub fn close(&self) {
        self.single_sender.close();
        self.batch_sender.close();
    }
}

impl WorkQueues {
    /// True once both queues are closed and drained.
    pub fn is_finished(&self) -> bool {
        self.single_receiver.is_closed()
            && self.single_receiver.is_empty()
            && self.batch_receiver.is_closed()
            && self.batch_receiver.is_empty()
    }

    pub fn close(&self) {
        self.single_receiver.close();
        self.batch_receiver.close();
    }
}
