//! Background task execution.

use crossbeam_channel::{unbounded, Sender};
use std::thread::{self, JoinHandle};
use tracing::info;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A fixed pool of background worker threads draining a shared job
/// queue. Submitted jobs eventually run; ordering across workers is not
/// guaranteed.
///
/// Dropping the pool closes the queue and joins the workers after they
/// drain it.
pub struct TaskPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl TaskPool {
    /// Starts a pool of `workers` threads named after `name`.
    #[must_use]
    pub fn new(name: &str, workers: usize) -> Self {
        let workers = workers.max(1);
        let (sender, receiver) = unbounded::<Job>();
        let mut handles = Vec::with_capacity(workers);
        for i in 0..workers {
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("{name}-{i}"))
                .spawn(move || {
                    while let Ok(job) = receiver.recv() {
                        job();
                    }
                })
                .expect("failed to spawn worker thread");
            handles.push(handle);
        }
        info!("Started task pool \"{name}\" with {workers} workers");
        Self {
            sender: Some(sender),
            workers: handles,
        }
    }

    /// Submits a job to the pool.
    pub fn execute(&self, job: impl FnOnce() + Send + 'static) {
        if let Some(sender) = &self.sender {
            // send only fails once the queue is closed during shutdown
            let _ = sender.send(Box::new(job));
        }
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        self.sender.take();
        let current = thread::current().id();
        for handle in self.workers.drain(..) {
            // a job owning the last handle to the pool would join itself
            if handle.thread().id() == current {
                continue;
            }
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_jobs_run() {
        let pool = TaskPool::new("test", 2);
        let counter = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = crossbeam_channel::bounded(16);
        for _ in 0..16 {
            let counter = Arc::clone(&counter);
            let tx = tx.clone();
            pool.execute(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = tx.send(());
            });
        }
        for _ in 0..16 {
            rx.recv_timeout(std::time::Duration::from_secs(5))
                .expect("job did not run");
        }
        assert_eq!(counter.load(Ordering::SeqCst), 16);
    }

    #[test]
    fn test_drop_drains_queue() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let pool = TaskPool::new("drain", 1);
            for _ in 0..8 {
                let counter = Arc::clone(&counter);
                pool.execute(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                });
            }
        }
        // drop joined the worker, so every queued job has run
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }
}
