//! # Proactor pool - one proactor per runner thread
//!
//! Each runner thread creates and exclusively drives its own `Proactor`.
//! Work reaches a runner as a task (`FnOnce(&mut Proactor)`) pushed onto
//! that runner's lock-free queue; `submit` picks runners round-robin.
//!
//! ```text
//!  caller ── submit ──► SegQueue[i] ──► runner i: task(&mut proactor)
//!                                              │
//!                                              ▼
//!                                       process_io / wait_io
//!                                              │
//!                                              ▼
//!                                   callback resolves Promise
//! ```
//!
//! Runner loop: run up to `task_batch` tasks, drive the ring once, and
//! when nothing happened for `idle_spins` passes block: in the ring if
//! operations are in flight, otherwise in `park_timeout`.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle, Thread};
use std::time::Duration;

use crossbeam_queue::SegQueue;
use ringio_core::{Cause, IoResult, SystemError};
use ringio_uring::{FixedBufferArena, IoBuffer};
use tracing::{debug, info, warn};

use crate::config::ProactorConfig;
use crate::proactor::Proactor;
use crate::promise::Promise;

/// Work for a runner.
pub type Task = Box<dyn FnOnce(&mut Proactor) + Send>;

struct RunnerShared {
    tasks: SegQueue<Task>,
    running: AtomicBool,
    is_parked: AtomicBool,
}

struct Runner {
    shared: Arc<RunnerShared>,
    thread: Thread,
}

impl Runner {
    fn push(&self, task: Task) {
        self.shared.tasks.push(task);
        if self.shared.is_parked.load(Ordering::Acquire) {
            self.thread.unpark();
        }
    }

    fn stop(&self) {
        self.shared.running.store(false, Ordering::Release);
        self.thread.unpark();
    }
}

/// Fixed set of runner threads, each owning one proactor.
pub struct ProactorPool {
    runners: Vec<Runner>,
    next: AtomicUsize,
    /// True while tasks are accepted. Submitters hold the read side while
    /// pushing, so no task lands after shutdown closes the gate.
    gate: RwLock<bool>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    arena: Mutex<Option<FixedBufferArena>>,
    stopped: Promise<()>,
}

static GLOBAL: Mutex<Option<Arc<ProactorPool>>> = Mutex::new(None);

impl ProactorPool {
    /// Start `config.effective_runners()` runners. Fails if any runner
    /// cannot create its ring.
    pub fn new(config: ProactorConfig) -> IoResult<Arc<Self>> {
        let count = config.effective_runners();
        let arena = if config.fixed_arena_size > 0 {
            Some(FixedBufferArena::new(config.fixed_arena_size)?)
        } else {
            None
        };

        let (ready_tx, ready_rx) = mpsc::channel::<IoResult<()>>();
        let mut runners = Vec::with_capacity(count);
        let mut threads = Vec::with_capacity(count);
        let mut failure = None;

        for index in 0..count {
            let shared = Arc::new(RunnerShared {
                tasks: SegQueue::new(),
                running: AtomicBool::new(true),
                is_parked: AtomicBool::new(false),
            });
            let spawned = thread::Builder::new().name(format!("ringio-runner-{index}")).spawn({
                let shared = Arc::clone(&shared);
                let config = config.clone();
                let arena = arena.clone();
                let ready = ready_tx.clone();
                move || runner_main(index, shared, config, arena, ready)
            });
            match spawned {
                Ok(handle) => {
                    runners.push(Runner {
                        shared,
                        thread: handle.thread().clone(),
                    });
                    threads.push(handle);
                }
                Err(e) => {
                    failure = Some(Cause::from(e));
                    break;
                }
            }
        }
        drop(ready_tx);

        for _ in 0..threads.len() {
            match ready_rx.recv() {
                Ok(Ok(())) => {}
                Ok(Err(cause)) => failure = failure.or(Some(cause)),
                Err(_) => failure = failure.or(Some(Cause::Shutdown)),
            }
        }

        let pool = Arc::new(Self {
            runners,
            next: AtomicUsize::new(0),
            gate: RwLock::new(failure.is_none()),
            threads: Mutex::new(threads),
            arena: Mutex::new(arena),
            stopped: Promise::new(),
        });

        if let Some(cause) = failure {
            warn!(error = %cause, "proactor pool failed to start");
            pool.stop_runners();
            pool.join_runners();
            return Err(cause);
        }

        info!(
            runners = count,
            queue_size = config.queue_size,
            fixed_arena = config.fixed_arena_size,
            "proactor pool started"
        );
        Ok(pool)
    }

    /// The process-wide pool, started from `ProactorConfig::from_env()`
    /// on first use.
    pub fn global() -> IoResult<Arc<ProactorPool>> {
        let mut global = GLOBAL.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pool) = global.as_ref() {
            return Ok(Arc::clone(pool));
        }
        let pool = ProactorPool::new(ProactorConfig::from_env())?;
        *global = Some(Arc::clone(&pool));
        Ok(pool)
    }

    /// Shut the process-wide pool down. The next `global()` starts a
    /// fresh one.
    pub fn shutdown_global() -> Promise<()> {
        let pool = GLOBAL.lock().unwrap_or_else(PoisonError::into_inner).take();
        match pool {
            Some(pool) => pool.shutdown(),
            None => Promise::ok(()),
        }
    }

    #[inline]
    pub fn runner_count(&self) -> usize {
        self.runners.len()
    }

    /// Queue `task` on the next runner. `Cause::Shutdown` once the pool
    /// is shutting down.
    pub fn submit<F>(&self, task: F) -> IoResult<()>
    where
        F: FnOnce(&mut Proactor) + Send + 'static,
    {
        let open = self.gate.read().unwrap_or_else(PoisonError::into_inner);
        if !*open || self.runners.is_empty() {
            return Err(Cause::Shutdown);
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.runners.len();
        self.runners[index].push(Box::new(task));
        Ok(())
    }

    /// Run `task` once on every runner.
    pub fn spread<F>(&self, task: F) -> IoResult<()>
    where
        F: Fn(&mut Proactor) + Send + Sync + 'static,
    {
        let open = self.gate.read().unwrap_or_else(PoisonError::into_inner);
        if !*open {
            return Err(Cause::Shutdown);
        }
        let task = Arc::new(task);
        for runner in &self.runners {
            let task = Arc::clone(&task);
            runner.push(Box::new(move |proactor: &mut Proactor| task(proactor)));
        }
        Ok(())
    }

    /// New promise handed to `action` on the next runner.
    pub fn promise<T, F>(&self, action: F) -> Promise<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce(Promise<T>, &mut Proactor) + Send + 'static,
    {
        let promise = Promise::new();
        let handed = promise.clone();
        if let Err(cause) = self.submit(move |proactor: &mut Proactor| action(handed, proactor)) {
            promise.failure(cause);
        }
        promise
    }

    /// Carve a buffer from the shared fixed arena. `ENXIO` if the pool
    /// runs without one.
    pub fn allocate_fixed_buffer(&self, size: usize) -> IoResult<IoBuffer> {
        let arena = self.arena.lock().unwrap_or_else(PoisonError::into_inner);
        match arena.as_ref() {
            Some(arena) => arena.allocate(size),
            None => SystemError::ENXIO.result(),
        }
    }

    /// Stop accepting tasks and stop every runner. Each runner runs the
    /// tasks already queued, then shuts its proactor down. The returned
    /// promise resolves once every runner has exited and the fixed arena
    /// has been released.
    pub fn shutdown(&self) -> Promise<()> {
        {
            let mut open = self.gate.write().unwrap_or_else(PoisonError::into_inner);
            if !*open {
                return self.stopped.clone();
            }
            *open = false;
        }
        self.stop_runners();

        let threads = std::mem::take(&mut *self.threads.lock().unwrap_or_else(PoisonError::into_inner));
        let arena = self.arena.lock().unwrap_or_else(PoisonError::into_inner).take();
        let stopped = self.stopped.clone();
        let reaper = move || {
            for handle in threads {
                let _ = handle.join();
            }
            drop(arena);
            info!("proactor pool stopped");
            stopped.success(());
        };

        // joining inline from a runner would wait on itself
        let on_runner = self.runners.iter().any(|r| r.thread.id() == thread::current().id());
        if on_runner {
            if let Err(e) = thread::Builder::new().name("ringio-shutdown".into()).spawn(reaper) {
                warn!(error = %e, "shutdown thread spawn failed");
            }
        } else {
            reaper();
        }
        self.stopped.clone()
    }

    fn stop_runners(&self) {
        for runner in &self.runners {
            runner.stop();
        }
    }

    fn join_runners(&self) {
        let threads = std::mem::take(&mut *self.threads.lock().unwrap_or_else(PoisonError::into_inner));
        let me = thread::current().id();
        for handle in threads {
            // the last handle may be dropped by a task on a runner
            if handle.thread().id() != me {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for ProactorPool {
    fn drop(&mut self) {
        self.stop_runners();
        self.join_runners();
    }
}

/// Runner thread body.
fn runner_main(
    index: usize,
    shared: Arc<RunnerShared>,
    config: ProactorConfig,
    arena: Option<FixedBufferArena>,
    ready: mpsc::Sender<IoResult<()>>,
) {
    let mut proactor = match Proactor::new(&config) {
        Ok(p) => p,
        Err(cause) => {
            let _ = ready.send(Err(cause));
            return;
        }
    };
    if let Some(arena) = &arena {
        if let Err(cause) = proactor.register_fixed(arena) {
            warn!(runner = index, error = %cause, "fixed buffer registration failed");
        }
    }
    let _ = ready.send(Ok(()));
    drop(ready);
    debug!(runner = index, "runner started");

    let park = config.park_timeout.max(Duration::from_micros(1));
    let mut idle: u32 = 0;

    while shared.running.load(Ordering::Acquire) {
        // ── Step 1: run queued tasks ──
        let mut ran = 0;
        while ran < config.task_batch.max(1) {
            match shared.tasks.pop() {
                Some(task) => {
                    run_task(index, task, &mut proactor);
                    ran += 1;
                }
                None => break,
            }
        }

        // ── Step 2: drive the ring ──
        let delivered = drive(index, &mut proactor, None);

        if ran + delivered > 0 || proactor.pending() > 0 {
            idle = 0;
            continue;
        }

        // ── Step 3: idle ──
        idle += 1;
        if idle < config.idle_spins {
            std::hint::spin_loop();
            continue;
        }
        if proactor.in_flight() > 0 {
            drive(index, &mut proactor, Some(park));
        } else {
            shared.is_parked.store(true, Ordering::Release);
            if shared.tasks.is_empty() && shared.running.load(Ordering::Acquire) {
                thread::park_timeout(park);
            }
            shared.is_parked.store(false, Ordering::Release);
        }
        idle = 0;
    }

    // tasks queued before the gate closed still run; their operations
    // fail with `Cause::Shutdown` once the proactor is closed
    while let Some(task) = shared.tasks.pop() {
        run_task(index, task, &mut proactor);
    }
    proactor.shutdown();
    while let Some(task) = shared.tasks.pop() {
        run_task(index, task, &mut proactor);
    }
    debug!(runner = index, "runner stopped");
}

fn run_task(index: usize, task: Task, proactor: &mut Proactor) {
    if catch_unwind(AssertUnwindSafe(|| task(proactor))).is_err() {
        warn!(runner = index, "task panicked");
    }
}

fn drive(index: usize, proactor: &mut Proactor, wait: Option<Duration>) -> usize {
    let outcome = catch_unwind(AssertUnwindSafe(|| match wait {
        Some(timeout) => proactor.wait_io(timeout),
        None => proactor.process_io(),
    }));
    outcome.unwrap_or_else(|_| {
        warn!(runner = index, "completion callback panicked");
        0
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn pool(runners: usize) -> Option<Arc<ProactorPool>> {
        let config = ProactorConfig::new().runners(runners).fixed_arena_size(0);
        match ProactorPool::new(config) {
            Ok(pool) => Some(pool),
            Err(e) => {
                eprintln!("skipping: proactor pool unavailable ({e})");
                None
            }
        }
    }

    #[test]
    fn test_submit_round_robin() {
        let Some(pool) = pool(3) else { return };
        let names = Arc::new(Mutex::new(Vec::new()));
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..6 {
            let names = names.clone();
            let done = done.clone();
            pool.submit(move |_| {
                let name = thread::current().name().unwrap_or_default().to_string();
                names.lock().unwrap().push(name);
                done.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        let deadline = Instant::now() + Duration::from_secs(5);
        while done.load(Ordering::SeqCst) < 6 && Instant::now() < deadline {
            thread::yield_now();
        }
        let mut names = names.lock().unwrap().clone();
        names.sort();
        names.dedup();
        assert_eq!(names, vec!["ringio-runner-0", "ringio-runner-1", "ringio-runner-2"]);
        pool.shutdown().join().unwrap();
    }

    #[test]
    fn test_spread_reaches_every_runner() {
        let Some(pool) = pool(4) else { return };
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        pool.spread(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        pool.shutdown().join().unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_promise_resolved_on_runner() {
        let Some(pool) = pool(1) else { return };
        let p = pool.promise(|promise: Promise<Duration>, proactor| {
            proactor.delay(Duration::from_millis(10), move |r, _| {
                promise.resolve(r);
            });
        });
        let elapsed = p.join().unwrap();
        assert!(elapsed >= Duration::from_millis(10));
        pool.shutdown().join().unwrap();
    }

    #[test]
    fn test_panicking_task_keeps_runner_alive() {
        let Some(pool) = pool(1) else { return };
        pool.submit(|_| panic!("task failure")).unwrap();
        let p = pool.promise(|promise: Promise<u8>, _| {
            promise.success(1);
        });
        assert_eq!(p.join_timeout(Duration::from_secs(5)), Ok(1));
        pool.shutdown().join().unwrap();
    }

    #[test]
    fn test_refuses_work_after_shutdown() {
        let Some(pool) = pool(2) else { return };
        pool.shutdown().join().unwrap();
        assert_eq!(pool.submit(|_| {}), Err(Cause::Shutdown));
        let p = pool.promise(|promise: Promise<u8>, _| {
            promise.success(1);
        });
        assert_eq!(p.join(), Err(Cause::Shutdown));
        // second shutdown is a no-op
        assert_eq!(pool.shutdown().join(), Ok(()));
    }

    #[test]
    fn test_shutdown_fails_in_flight_operations() {
        let config = ProactorConfig::new()
            .runners(1)
            .fixed_arena_size(0)
            .shutdown_grace(Duration::from_millis(5));
        let Ok(pool) = ProactorPool::new(config) else { return };
        let p = pool.promise(|promise: Promise<Duration>, proactor| {
            proactor.delay(Duration::from_secs(30), move |r, _| {
                promise.resolve(r);
            });
        });
        // let the delay reach the ring
        thread::sleep(Duration::from_millis(20));
        pool.shutdown().join().unwrap();
        assert_eq!(p.join_timeout(Duration::from_secs(5)), Err(Cause::Shutdown));
    }

    #[test]
    fn test_fixed_buffers_from_pool_arena() {
        let config = ProactorConfig::new()
            .runners(1)
            .fixed_arena_size(4 * FixedBufferArena::CHUNK_SIZE);
        let Ok(pool) = ProactorPool::new(config) else { return };
        let buf = pool.allocate_fixed_buffer(100).unwrap();
        assert_eq!(buf.fixed_index(), Some(FixedBufferArena::BUFFER_INDEX));
        pool.shutdown().join().unwrap();
        assert_eq!(pool.allocate_fixed_buffer(100).unwrap_err(), SystemError::ENXIO.into());
    }
}
