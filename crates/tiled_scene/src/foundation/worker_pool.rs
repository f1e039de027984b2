//! Fixed-size worker pool
//!
//! Jobs are served from a single FIFO queue. [`WorkerPool::wait`] is the join
//! barrier: it returns once the queue is drained and no worker is busy. The
//! scene uses it to record secondary command buffers in parallel and then
//! assemble the primary buffer on the calling thread.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct QueueState {
    jobs: VecDeque<Job>,
    busy: usize,
    panicked: usize,
    shutting_down: bool,
}

struct Shared {
    state: Mutex<QueueState>,
    job_available: Condvar,
    all_idle: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // Jobs run outside the lock, so a poisoned queue is still consistent
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Thread pool with a FIFO job queue and a join barrier
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `num_threads` workers (at least one)
    pub fn new(num_threads: usize) -> Self {
        let num_threads = num_threads.max(1);
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState::default()),
            job_available: Condvar::new(),
            all_idle: Condvar::new(),
        });

        let workers = (0..num_threads)
            .map(|index| {
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("scene-worker-{index}"))
                    .spawn(move || worker_loop(&shared, index))
                    .unwrap_or_else(|e| panic!("failed to spawn scene worker {index}: {e}"))
            })
            .collect();

        log::debug!("Worker pool started with {} threads", num_threads);
        Self { shared, workers }
    }

    /// Number of worker threads
    pub fn num_threads(&self) -> usize {
        self.workers.len()
    }

    /// Queue a job; it runs on the first idle worker
    pub fn execute<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.shared.lock();
        state.jobs.push_back(Box::new(job));
        drop(state);
        self.shared.job_available.notify_one();
    }

    /// Block until every queued job has finished
    pub fn wait(&self) {
        let mut state = self.shared.lock();
        while !state.jobs.is_empty() || state.busy > 0 {
            state = self
                .shared
                .all_idle
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Number of jobs that panicked since the last call; resets the counter
    pub fn take_panicked(&self) -> usize {
        std::mem::take(&mut self.shared.lock().panicked)
    }
}

fn worker_loop(shared: &Shared, index: usize) {
    loop {
        let job = {
            let mut state = shared.lock();
            loop {
                if let Some(job) = state.jobs.pop_front() {
                    state.busy += 1;
                    break job;
                }
                if state.shutting_down {
                    return;
                }
                state = shared
                    .job_available
                    .wait(state)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
            }
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(job));

        let mut state = shared.lock();
        state.busy -= 1;
        if outcome.is_err() {
            state.panicked += 1;
            log::error!("Job on scene worker {} panicked", index);
        }
        if state.jobs.is_empty() && state.busy == 0 {
            shared.all_idle.notify_all();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shared.lock().shutting_down = true;
        self.shared.job_available.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}
