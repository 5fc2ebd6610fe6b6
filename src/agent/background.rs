use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{StorageWriter, Synchronizer};
use crate::config::settings::{BackgroundConfig, OverflowPolicy};
use crate::models::metadata::MetadataSnapshot;
use crate::models::profile::Profile;

/// Fire-and-forget work submitted by the request path.
#[derive(Debug, Clone)]
pub enum BackgroundJob {
    Persist(Arc<MetadataSnapshot>),
    Synchronize(Arc<Profile>),
}

impl BackgroundJob {
    fn kind(&self) -> &'static str {
        match self {
            BackgroundJob::Persist(_) => "persist",
            BackgroundJob::Synchronize(_) => "synchronize",
        }
    }
}

/// Runs jobs against the storage and synchronization collaborators.
#[derive(Clone)]
pub struct JobExecutor {
    storage: Arc<dyn StorageWriter>,
    synchronizer: Arc<dyn Synchronizer>,
}

impl JobExecutor {
    pub fn new(storage: Arc<dyn StorageWriter>, synchronizer: Arc<dyn Synchronizer>) -> Self {
        Self {
            storage,
            synchronizer,
        }
    }

    /// Failures are logged and never retried.
    async fn run(&self, job: BackgroundJob) {
        let kind = job.kind();
        let result = match job {
            BackgroundJob::Persist(snapshot) => self.storage.persist(&snapshot).await,
            BackgroundJob::Synchronize(profile) => self.synchronizer.synchronize(&profile).await,
        };
        if let Err(e) = result {
            error!(job = kind, error = %e, "background job failed");
        }
    }
}

struct QueueState {
    jobs: Mutex<VecDeque<BackgroundJob>>,
    capacity: usize,
    policy: OverflowPolicy,
    ready: Notify,
    space: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
    completed: AtomicU64,
}

enum Offer {
    Accepted,
    Full(BackgroundJob),
    Closed,
}

impl QueueState {
    fn offer(&self, job: BackgroundJob) -> Offer {
        if self.closed.load(Ordering::Acquire) {
            return Offer::Closed;
        }
        let mut jobs = self.jobs.lock();
        if jobs.len() < self.capacity {
            jobs.push_back(job);
            drop(jobs);
            self.ready.notify_one();
            return Offer::Accepted;
        }
        if self.policy == OverflowPolicy::DropOldest {
            let evicted = jobs.pop_front();
            jobs.push_back(job);
            drop(jobs);
            self.ready.notify_one();
            if let Some(evicted) = evicted {
                self.record_drop(evicted.kind(), "dropped oldest queued job");
            }
            return Offer::Accepted;
        }
        Offer::Full(job)
    }

    fn record_drop(&self, kind: &'static str, message: &'static str) {
        let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(job = kind, dropped_total = total, capacity = self.capacity, "{}", message);
    }
}

/// Bounded queue of background jobs drained by a fixed set of tokio workers.
///
/// When full, [`OverflowPolicy`] decides between dropping the new job,
/// dropping the oldest queued job, or waiting for space.
pub struct BackgroundQueue {
    state: Arc<QueueState>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl BackgroundQueue {
    /// Spawn the workers. Must be called from within a tokio runtime.
    pub fn start(config: &BackgroundConfig, executor: JobExecutor) -> Self {
        let state = Arc::new(QueueState {
            jobs: Mutex::new(VecDeque::with_capacity(config.capacity)),
            capacity: config.capacity.max(1),
            policy: config.overflow,
            ready: Notify::new(),
            space: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
            completed: AtomicU64::new(0),
        });

        let worker_count = config.workers.max(1);
        let workers = (0..worker_count)
            .map(|id| tokio::spawn(worker_loop(id, state.clone(), executor.clone())))
            .collect();

        info!(
            workers = worker_count,
            capacity = state.capacity,
            policy = ?state.policy,
            "background queue started"
        );

        Self {
            state,
            workers: Mutex::new(workers),
        }
    }

    /// Enqueue a job. Returns `false` if the job was dropped.
    pub async fn submit(&self, job: BackgroundJob) -> bool {
        let mut job = job;
        loop {
            let space = self.state.space.notified();
            tokio::pin!(space);
            space.as_mut().enable();

            match self.state.offer(job) {
                Offer::Accepted => return true,
                Offer::Closed => {
                    self.state.record_drop("closed", "background queue closed, job rejected");
                    return false;
                }
                Offer::Full(rejected) => {
                    if self.state.policy != OverflowPolicy::Block {
                        self.state
                            .record_drop(rejected.kind(), "background queue full, dropped new job");
                        return false;
                    }
                    job = rejected;
                }
            }

            space.await;
        }
    }

    pub fn len(&self) -> usize {
        self.state.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped(&self) -> u64 {
        self.state.dropped.load(Ordering::Relaxed)
    }

    pub fn completed(&self) -> u64 {
        self.state.completed.load(Ordering::Relaxed)
    }

    /// Stop accepting jobs, let the workers drain the queue, and join them.
    pub async fn shutdown(&self) {
        self.state.closed.store(true, Ordering::Release);
        self.state.ready.notify_waiters();
        self.state.space.notify_waiters();

        let workers = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            if let Err(e) = handle.await {
                error!(error = %e, "background worker panicked");
            }
        }
        info!(
            completed = self.completed(),
            dropped = self.dropped(),
            "background queue stopped"
        );
    }
}

async fn worker_loop(id: usize, state: Arc<QueueState>, executor: JobExecutor) {
    debug!(worker = id, "background worker started");
    loop {
        let ready = state.ready.notified();
        tokio::pin!(ready);
        ready.as_mut().enable();

        let next = state.jobs.lock().pop_front();
        match next {
            Some(job) => {
                state.space.notify_one();
                executor.run(job).await;
                state.completed.fetch_add(1, Ordering::Relaxed);
            }
            None if state.closed.load(Ordering::Acquire) => break,
            None => ready.await,
        }
    }
    debug!(worker = id, "background worker stopped");
}
