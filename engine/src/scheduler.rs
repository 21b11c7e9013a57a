//! The task scheduler: one dispatcher thread plus a resizable pool of
//! compute threads.
//!
//! Tasks move through five containers:
//!
//! - `wait`: parents incomplete
//! - `prio`: parents complete, awaiting memory commitment
//! - `alloced`: memory committed, fill I/O possibly pending
//! - `compute` queue: fully resident, awaiting a compute thread
//! - `complete` queue: kernel finished, awaiting retirement
//!
//! The dispatcher drives all transitions; compute threads only pop the
//! compute queue, run kernels, and push completions. Admission is bounded
//! by `max_in_mem_factor * n_compute_threads` in-memory tasks so that
//! I/O for upcoming tasks overlaps with compute of current ones.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use tracing::{debug, info};

use block_cache::{Cache, CacheStats};
use io_executor::IoExecutor;

use crate::config::{Config, SchedulerOptions};
use crate::error::EngineError;
use crate::prioritizer::Prioritizer;
use crate::task::{Task, TaskStatus};

/// Tracks which task ids have completed. Owned by the dispatcher thread;
/// no synchronization needed.
struct CompletionRecord {
    complete: Vec<bool>,
}

impl CompletionRecord {
    fn new(start_size: usize) -> Self {
        Self {
            complete: vec![false; start_size],
        }
    }

    fn is_complete(&mut self, id: u64) -> bool {
        if self.complete.len() as u64 <= id {
            self.grow(id);
            return false;
        }
        self.complete[id as usize]
    }

    fn mark_complete(&mut self, id: u64) {
        if self.complete.len() as u64 <= id {
            self.grow(id);
        }
        self.complete[id as usize] = true;
    }

    fn grow(&mut self, id: u64) {
        let target = (self.complete.len() * 2).max(id as usize + 1);
        self.complete.resize(target, false);
    }
}

struct Inner {
    cache: Arc<Cache>,
    io: Arc<IoExecutor>,

    wait: Mutex<Vec<Arc<Task>>>,
    prio: Mutex<Prioritizer>,
    alloced: Mutex<Vec<Arc<Task>>>,
    compute_tx: Sender<Arc<Task>>,
    compute_rx: Receiver<Arc<Task>>,
    complete_tx: Sender<Arc<Task>>,
    complete_rx: Receiver<Arc<Task>>,

    shutdown: AtomicBool,
    /// Compute thread target. Threads whose id is at or above this park
    /// until shutdown.
    n_compute: AtomicU64,

    max_in_mem_factor: usize,
    min_sleep: Duration,
    max_sleep: Duration,
    update_every: u64,
}

impl Inner {
    /// True once shutdown is requested and no task remains anywhere in
    /// the pipeline.
    fn drained(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
            && self.wait.lock().is_empty()
            && self.prio.lock().is_empty()
            && self.alloced.lock().is_empty()
            && self.compute_rx.is_empty()
            && self.complete_rx.is_empty()
    }
}

/// The scheduler. Dropping it shuts down cooperatively: the dispatcher
/// runs until every container drains, the cache is flushed, and all
/// threads are joined.
pub struct Scheduler {
    inner: Arc<Inner>,
    dispatcher: Option<JoinHandle<()>>,
    compute_threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    /// Build the full stack: I/O executor, cache, dispatcher, and the
    /// initial compute threads.
    pub fn new(config: &Config) -> Result<Self, EngineError> {
        let io = Arc::new(IoExecutor::new(config.io_threads));
        io.set_overlap_check(config.options.enable_overlap_check);
        let cache = Arc::new(Cache::new(Arc::clone(&io), config.memory_budget));
        cache.set_single_use_discard(config.options.single_use_discard);

        let (compute_tx, compute_rx) = unbounded();
        let (complete_tx, complete_rx) = unbounded();
        let inner = Arc::new(Inner {
            cache,
            io,
            wait: Mutex::new(Vec::new()),
            prio: Mutex::new(Prioritizer::new(config.options.enable_prioritizer)),
            alloced: Mutex::new(Vec::new()),
            compute_tx,
            compute_rx,
            complete_tx,
            complete_rx,
            shutdown: AtomicBool::new(false),
            n_compute: AtomicU64::new(0),
            max_in_mem_factor: config.scheduler.max_in_mem_factor,
            min_sleep: Duration::from_millis(config.scheduler.min_sleep_ms),
            max_sleep: Duration::from_millis(config.scheduler.max_sleep_ms),
            update_every: config.scheduler.prioritizer_update_every.max(1),
        });

        let dispatcher_inner = Arc::clone(&inner);
        let dispatcher = thread::Builder::new()
            .name("dispatcher".to_string())
            .spawn(move || dispatcher_loop(&dispatcher_inner))
            .expect("failed to spawn dispatcher thread");

        let scheduler = Self {
            inner,
            dispatcher: Some(dispatcher),
            compute_threads: Mutex::new(Vec::new()),
        };
        scheduler.set_num_compute_threads(config.compute_threads.max(1));
        Ok(scheduler)
    }

    /// Submit a task. Its parents may complete before or after
    /// submission.
    pub fn add_task(&self, task: Arc<Task>) {
        debug!("adding task {} to wait", task.id());
        task.set_status(TaskStatus::Wait);
        self.inner.wait.lock().push(task);
    }

    /// Flush all write-back buffers to their backing files. Callers that
    /// need durability must call this before handing results to their
    /// users.
    pub fn flush_cache(&self) {
        self.inner.cache.flush();
    }

    /// Snapshot the cache's occupancy and counters.
    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    /// Adjust the behavioral switches at runtime.
    pub fn set_options(&self, options: &SchedulerOptions) {
        self.inner.io.set_overlap_check(options.enable_overlap_check);
        self.inner
            .cache
            .set_single_use_discard(options.single_use_discard);
        let mut prio = self.inner.prio.lock();
        let was_enabled = prio.enabled();
        prio.set_enabled(options.enable_prioritizer);
        if options.enable_prioritizer && !was_enabled {
            prio.update(&self.inner.cache);
        }
    }

    /// Grow or shrink the compute pool. Growth spawns threads; shrink is
    /// cooperative, with surplus threads parking until shutdown.
    pub fn set_num_compute_threads(&self, n: usize) {
        let current = self.inner.n_compute.load(Ordering::Acquire);
        let n = n as u64;
        if n == current {
            return;
        }
        if n < current {
            self.inner.n_compute.store(n, Ordering::Release);
            return;
        }
        let mut threads = self.compute_threads.lock();
        self.inner.n_compute.store(n, Ordering::Release);
        for id in current..n {
            let inner = Arc::clone(&self.inner);
            let handle = thread::Builder::new()
                .name(format!("compute-{id}"))
                .spawn(move || compute_loop(&inner, id))
                .expect("failed to spawn compute thread");
            threads.push(handle);
        }
    }

    /// Current compute thread target.
    pub fn num_compute_threads(&self) -> usize {
        self.inner.n_compute.load(Ordering::Acquire) as usize
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        debug!("destroying scheduler");
        self.inner.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.dispatcher.take() {
            handle.join().expect("dispatcher panicked");
        }
        for handle in self.compute_threads.lock().drain(..) {
            handle.join().expect("compute thread panicked");
        }
        debug!("flushing cache");
        self.inner.cache.flush();
        debug!("all scheduler threads down");
    }
}

fn dispatcher_loop(inner: &Inner) {
    debug!("dispatcher up");
    let mut record = CompletionRecord::new(1024);
    let mut tasks_in_mem: usize = 0;
    let mut update_in = inner.update_every;

    loop {
        let started = Instant::now();

        // 1. Retire completions: release buffers, record the id, admit
        //    continuations.
        while let Ok(task) = inner.complete_rx.try_recv() {
            record.mark_complete(task.id());
            inner.cache.release(&task.read_keys(), &task.write_keys());
            task.clear_pins();
            task.set_status(TaskStatus::Complete);
            metrics::TASKS_COMPLETE.increment();
            tasks_in_mem -= 1;
            if let Some(next) = task.take_next() {
                debug_assert!(next.status() < TaskStatus::AllocReady);
                next.set_status(TaskStatus::Wait);
                inner.wait.lock().push(next);
            }
        }

        // 2. Promote tasks whose parents have all completed.
        let ready: Vec<Arc<Task>> = {
            let mut wait = inner.wait.lock();
            let mut still = Vec::with_capacity(wait.len());
            let mut ready = Vec::new();
            for task in wait.drain(..) {
                let pending = {
                    let mut parents = task.parents_mut();
                    parents.retain(|&p| !record.is_complete(p));
                    parents.len()
                };
                if pending == 0 {
                    ready.push(task);
                } else {
                    still.push(task);
                }
            }
            *wait = still;
            ready
        };
        if !ready.is_empty() {
            for task in &ready {
                task.set_status(TaskStatus::AllocReady);
                debug!("task {} ready", task.id());
            }
            let mut prio = inner.prio.lock();
            prio.insert(ready);
            update_in -= 1;
            if update_in == 0 {
                prio.update(&inner.cache);
                update_in = inner.update_every;
            }
        }

        // 3. Admission: commit memory for the cheapest ready tasks until
        //    the pipeline is full or the cache pushes back.
        let threads = inner.n_compute.load(Ordering::Acquire).max(1) as usize;
        let max_in_mem = inner.max_in_mem_factor * threads;
        {
            let mut prio = inner.prio.lock();
            while tasks_in_mem < max_in_mem {
                let Some(info) = prio.pop() else { break };
                match inner
                    .cache
                    .allocate(&info.task.read_keys(), &info.task.write_keys())
                {
                    Some(pins) => {
                        for (key, buf) in pins {
                            info.task.pin(key, buf);
                        }
                        info.task.set_status(TaskStatus::Alloc);
                        inner.alloced.lock().push(Arc::clone(&info.task));
                        tasks_in_mem += 1;
                    }
                    None => {
                        // Memory pressure; keep priority order and retry
                        // next iteration once something releases.
                        metrics::TASKS_ADMISSION_STALL.increment();
                        prio.push_front(info);
                        break;
                    }
                }
            }
        }

        // 4. Promote fully resident tasks to the compute queue.
        {
            let mut alloced = inner.alloced.lock();
            let mut still = Vec::with_capacity(alloced.len());
            for task in alloced.drain(..) {
                if pins_resident(&inner.cache, &task) {
                    task.set_status(TaskStatus::ComputeReady);
                    inner
                        .compute_tx
                        .send(task)
                        .expect("compute threads outlive the dispatcher");
                } else {
                    still.push(task);
                }
            }
            *alloced = still;
        }

        // 5. Reap I/O completions and feed the allocation backlog.
        inner.cache.service_backlog();

        if inner.drained() && tasks_in_mem == 0 {
            break;
        }

        // Busy iterations sleep less so the pipeline keeps moving.
        let elapsed = started.elapsed();
        let sleep = inner.max_sleep.saturating_sub(elapsed).max(inner.min_sleep);
        thread::sleep(sleep);
    }
    debug!("dispatcher down");
}

/// Pin every still-missing buffer that became resident; true when the
/// task holds all of its declared buffers.
fn pins_resident(cache: &Cache, task: &Task) -> bool {
    let mut ready = true;
    for key in task.read_keys() {
        if task.has_pin(&key) {
            continue;
        }
        match cache.get_buf(&key, false) {
            Some(buf) => task.pin(key, buf),
            None => ready = false,
        }
    }
    for key in task.write_keys() {
        if task.has_pin(&key) {
            continue;
        }
        match cache.get_buf(&key, true) {
            Some(buf) => task.pin(key, buf),
            None => ready = false,
        }
    }
    ready
}

fn compute_loop(inner: &Inner, id: u64) {
    info!("compute thread #{id} up");
    loop {
        if id >= inner.n_compute.load(Ordering::Acquire) {
            // Downsized below this thread's id: park until shutdown.
            if inner.drained() {
                break;
            }
            thread::sleep(Duration::from_millis(100));
            continue;
        }
        match inner.compute_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(task) => {
                debug!("executing task {}", task.id());
                task.set_status(TaskStatus::Compute);
                task.run();
                inner
                    .complete_tx
                    .send(task)
                    .expect("dispatcher outlives compute threads");
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                if inner.drained() {
                    break;
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        }
    }
    info!("compute thread #{id} down");
}
