//! Fixed-size pool of background threads for blocking work.

use std::{
    any::Any,
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use log::{error, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

pub(crate) fn panic_payload_to_string(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "non-string panic payload".to_string()
}

fn run_job(name: &str, job: Job) {
    let run_result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(job));
    if let Err(payload) = run_result {
        error!(
            "Job on {} panicked: {}",
            name,
            panic_payload_to_string(payload.as_ref())
        );
    }
}

/// Jobs run in submission order; with one thread they also complete in that order.
pub struct WorkerPool {
    name: String,
    sender: Option<mpsc::Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(name: &str, size: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));

        let mut workers = Vec::with_capacity(size);
        for index in 0..size.max(1) {
            let receiver = Arc::clone(&receiver);
            let thread_name = format!("{name}-{index}");
            let worker_name = thread_name.clone();
            let spawned = thread::Builder::new().name(thread_name).spawn(move || loop {
                let next_job = match receiver.lock() {
                    Ok(receiver) => receiver.recv(),
                    Err(_) => break,
                };
                match next_job {
                    Ok(job) => run_job(&worker_name, job),
                    Err(_) => break,
                }
            });
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(err) => warn!("Failed to spawn {} worker {}: {}", name, index, err),
            }
        }

        Self {
            name: name.to_string(),
            sender: Some(sender),
            workers,
        }
    }

    /// Queues `job`. Runs it inline if the pool has no live worker.
    pub fn execute<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let job: Job = Box::new(job);
        if self.workers.is_empty() {
            warn!("{} has no workers, running job inline", self.name);
            run_job(&self.name, job);
            return;
        }
        if let Some(sender) = &self.sender {
            if let Err(mpsc::SendError(job)) = sender.send(job) {
                warn!("{} stopped accepting jobs, running job inline", self.name);
                run_job(&self.name, job);
            }
        }
    }

    /// Stops accepting jobs and blocks until every queued job has run.
    ///
    /// Later `execute` calls run inline.
    pub fn drain(&mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("{} worker exited abnormally", self.name);
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.drain();
    }
}
