//! Dispatch-ready job queue.
//!
//! One FIFO lane per device. The device is chosen when the job is pushed, so
//! round-robin assignment is deterministic and each worker drains only its own
//! lane, in enqueue order.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

use super::job::Job;
use crate::telemetry;

#[derive(Debug)]
enum QueueItem {
    Job(Job),
    Shutdown,
}

/// Result of a blocking dequeue.
#[derive(Debug)]
pub enum Dequeued<'a> {
    /// A job plus its acknowledgement. Drop the guard once the job is terminal.
    Job(Job, AckGuard<'a>),
    /// The worker for this lane should exit.
    Shutdown,
}

#[derive(Debug)]
struct Lane {
    items: Mutex<VecDeque<QueueItem>>,
    notify: Notify,
}

#[derive(Debug)]
pub struct JobQueue {
    lanes: Vec<Lane>,
    depth: AtomicUsize,
    unfinished: AtomicUsize,
    idle: Notify,
}

impl JobQueue {
    pub fn new(lanes: usize) -> Self {
        let lanes = (0..lanes.max(1))
            .map(|_| Lane { items: Mutex::new(VecDeque::new()), notify: Notify::new() })
            .collect();
        Self {
            lanes,
            depth: AtomicUsize::new(0),
            unfinished: AtomicUsize::new(0),
            idle: Notify::new(),
        }
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    fn lane(&self, index: usize) -> &Lane {
        &self.lanes[index % self.lanes.len()]
    }

    pub fn push(&self, lane: usize, job: Job) {
        self.unfinished.fetch_add(1, Ordering::AcqRel);
        let depth = self.depth.fetch_add(1, Ordering::AcqRel) + 1;
        let lane = self.lane(lane);
        lane.items.lock().push_back(QueueItem::Job(job));
        lane.notify.notify_one();
        telemetry::record_job_queue_depth(depth);
    }

    /// Queue the exit sentinel behind everything already in `lane`.
    pub fn push_shutdown(&self, lane: usize) {
        let lane = self.lane(lane);
        lane.items.lock().push_back(QueueItem::Shutdown);
        lane.notify.notify_one();
    }

    /// Wait for the next item in `lane`. One consumer per lane.
    pub async fn next(&self, lane: usize) -> Dequeued<'_> {
        let lane = self.lane(lane);
        loop {
            let item = lane.items.lock().pop_front();
            match item {
                Some(QueueItem::Job(job)) => {
                    let depth = self.depth.fetch_sub(1, Ordering::AcqRel) - 1;
                    telemetry::record_job_queue_depth(depth);
                    return Dequeued::Job(job, AckGuard { queue: self });
                }
                Some(QueueItem::Shutdown) => return Dequeued::Shutdown,
                None => lane.notify.notified().await,
            }
        }
    }

    /// Jobs waiting for a worker.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    pub fn lane_depth(&self, lane: usize) -> usize {
        self.lane(lane)
            .items
            .lock()
            .iter()
            .filter(|item| matches!(item, QueueItem::Job(_)))
            .count()
    }

    /// Jobs pushed but not yet acknowledged (queued or running).
    pub fn unfinished(&self) -> usize {
        self.unfinished.load(Ordering::Acquire)
    }

    /// Wait until every pushed job has been acknowledged.
    pub async fn join(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.unfinished() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Remove every queued job. Dropped jobs report failure to their sinks.
    pub fn drain(&self) -> usize {
        let mut drained = Vec::new();
        for lane in &self.lanes {
            drained.extend(lane.items.lock().drain(..));
        }
        let jobs = drained.iter().filter(|item| matches!(item, QueueItem::Job(_))).count();
        self.depth.fetch_sub(jobs, Ordering::AcqRel);
        self.unfinished.fetch_sub(jobs, Ordering::AcqRel);
        drop(drained);
        if self.unfinished() == 0 {
            self.idle.notify_waiters();
        }
        jobs
    }
}

/// Acknowledges one dequeued job on drop.
#[derive(Debug)]
pub struct AckGuard<'a> {
    queue: &'a JobQueue,
}

impl Drop for AckGuard<'_> {
    fn drop(&mut self) {
        if self.queue.unfinished.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.queue.idle.notify_waiters();
        }
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
