use std::any::Any;
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use ahash::AHashMap;
use crossbeam_channel::{Receiver, Sender, bounded, select, unbounded};
use tracing::{debug, error};

use super::{ContextBroker, SharedContext};
use crate::engine::{CacheEngine, CacheStrategy, Memoized};
use crate::error::{CacheError, CacheResult};

type Job = Box<dyn FnOnce(&WorkerContext) + Send>;

/// Per-thread view handed to every job: the worker's own engine handles.
pub struct WorkerContext {
    index: usize,
    engines: RefCell<AHashMap<u64, Box<dyn Any>>>,
}

impl WorkerContext {
    fn new(index: usize) -> Self {
        Self {
            index,
            engines: RefCell::new(AHashMap::new()),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// This worker's handle on `parent`, forked on first use.
    pub fn engine<S: CacheStrategy>(&self, parent: &CacheEngine<S>) -> CacheEngine<S> {
        let family = parent.family();
        let mut engines = self.engines.borrow_mut();
        if let Some(engine) = engines
            .get(&family)
            .and_then(|engine| engine.downcast_ref::<CacheEngine<S>>())
        {
            return engine.clone();
        }
        let engine = parent.fork();
        engines.insert(family, Box::new(engine.clone()));
        engine
    }

    /// `memoized` rebound to this worker's handle on its engine.
    pub fn bind<A, R, S>(&self, memoized: &Memoized<A, R, S>) -> Memoized<A, R, S>
    where
        S: CacheStrategy,
    {
        match memoized.engine() {
            Some(parent) => memoized.bind(&self.engine(parent)),
            None => memoized.clone(),
        }
    }
}

struct Worker {
    control: Sender<Job>,
    handle: Option<thread::JoinHandle<()>>,
}

/// Fixed set of threads, each acting as a separate cache "process".
///
/// Jobs go to whichever worker is free. Context broadcasts go to every
/// worker through a private control channel.
pub struct WorkerPool {
    jobs: Option<Sender<Job>>,
    workers: Vec<Worker>,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let (jobs_tx, jobs_rx) = unbounded::<Job>();
        let workers = (0..size)
            .map(|index| {
                let (control_tx, control_rx) = unbounded();
                let jobs = jobs_rx.clone();
                let handle = thread::Builder::new()
                    .name(format!("funcache-worker-{index}"))
                    .spawn(move || worker_loop(index, jobs, control_rx))
                    .expect("failed to spawn cache worker");
                Worker {
                    control: control_tx,
                    handle: Some(handle),
                }
            })
            .collect();
        debug!(size, "worker pool started");
        Self {
            jobs: Some(jobs_tx),
            workers,
        }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub fn execute<F>(&self, job: F) -> CacheResult<()>
    where
        F: FnOnce(&WorkerContext) + Send + 'static,
    {
        self.jobs
            .as_ref()
            .ok_or_else(|| CacheError::Broker("worker pool is shut down".into()))?
            .send(Box::new(job))
            .map_err(|_| CacheError::Broker("worker pool is shut down".into()))
    }

    /// Runs `f` over `inputs` on the workers and returns the results in input order.
    pub fn map<I, T, F>(&self, inputs: I, f: F) -> CacheResult<Vec<T>>
    where
        I: IntoIterator,
        I::Item: Send + 'static,
        T: Send + 'static,
        F: Fn(&WorkerContext, I::Item) -> T + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let (tx, rx) = unbounded();
        let mut count = 0;
        for (index, input) in inputs.into_iter().enumerate() {
            let f = Arc::clone(&f);
            let tx = tx.clone();
            self.execute(move |ctx| {
                let _ = tx.send((index, f(ctx, input)));
            })?;
            count += 1;
        }
        drop(tx);

        let mut results: Vec<Option<T>> = (0..count).map(|_| None).collect();
        for (index, value) in rx {
            results[index] = Some(value);
        }
        results
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| CacheError::Broker("a mapped job panicked".into()))
    }

    /// Stops accepting jobs, lets queued ones finish and joins every worker.
    pub fn shutdown(&mut self) {
        self.jobs.take();
        for worker in &mut self.workers {
            if let Some(handle) = worker.handle.take() {
                if handle.join().is_err() {
                    error!("cache worker exited abnormally");
                }
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<S: CacheStrategy> ContextBroker<S> for WorkerPool {
    fn broadcast(
        &self,
        engine: &CacheEngine<S>,
        context: SharedContext<S>,
        workers: usize,
    ) -> CacheResult<()> {
        if workers > self.workers.len() {
            return Err(CacheError::Broker(format!(
                "asked for {workers} workers but the pool has {}",
                self.workers.len()
            )));
        }

        let (ack_tx, ack_rx) = bounded(workers);
        for worker in &self.workers[..workers] {
            let parent = engine.clone();
            let context = context.clone();
            let ack = ack_tx.clone();
            let adopt: Job = Box::new(move |ctx: &WorkerContext| {
                ctx.engine(&parent).receive_context(context);
                let _ = ack.send(ctx.index());
            });
            worker
                .control
                .send(adopt)
                .map_err(|_| CacheError::Broker("worker has shut down".into()))?;
        }
        drop(ack_tx);

        for _ in 0..workers {
            let index = ack_rx.recv().map_err(|_| {
                CacheError::Broker("worker failed to adopt the cache context".into())
            })?;
            debug!(worker = index, "worker adopted cache context");
        }
        Ok(())
    }
}

// Exits once the job queue is drained and its sender dropped.
fn worker_loop(index: usize, jobs: Receiver<Job>, control: Receiver<Job>) {
    let ctx = WorkerContext::new(index);
    loop {
        select! {
            recv(control) -> job => match job {
                Ok(job) => run_job(&ctx, job),
                Err(_) => break,
            },
            recv(jobs) -> job => match job {
                Ok(job) => run_job(&ctx, job),
                Err(_) => break,
            },
        }
    }
    debug!(worker = index, "cache worker stopped");
}

fn run_job(ctx: &WorkerContext, job: Job) {
    if panic::catch_unwind(AssertUnwindSafe(|| job(ctx))).is_err() {
        error!(worker = ctx.index(), "cache worker job panicked");
    }
}
