//! `Promise<T>` - resolve-once completion value with lock-free continuations.
//!
//! # Attach / resolve race
//!
//! Continuations are pushed onto an intrusive singly-linked stack with a
//! CAS loop on `head`. Resolution is first-writer-wins on `value`; the
//! winner then swaps `head` to the `CLOSED` sentinel, reverses the
//! captured stack (attach order) and runs every action with the value.
//! A push that observes `CLOSED` runs its action inline instead.
//!
//! Continuations that produce another promise (`map`, `flat_map`) record
//! it as a *dependent*. After all actions ran, the dependents are
//! published in `settled`; `join` waits for `settled` and then joins
//! each dependent, so it returns only once the whole causal chain hanging
//! off this promise has finished.
//!
//! Actions run on the thread that resolves, or on the attaching thread
//! when the promise is already resolved. A `resolve` issued from inside a
//! continuation does not run the nested promise's actions right away: it
//! queues them on a per-thread list that the outermost `resolve` drains
//! once its own actions returned. Chains of any length therefore resolve
//! in constant stack depth. A `join` from inside a continuation drains
//! that list first, so resolving a promise and then joining it from the
//! same continuation still works.
//!
//! A continuation that panics is logged; if it was producing another
//! promise (`map`, `try_map`, `flat_map`), that promise fails with
//! `Cause::Message("continuation panicked")` so joins on the chain return.
//!
//! `join` never parks: it spins, then yields. Do not join on the thread
//! that drives the proactor the promise is waiting on.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};

use ringio_core::{Backoff, Cause, IoResult};
use tracing::warn;

use crate::executor::ProactorPool;
use crate::proactor::Proactor;

type Action<T> = Box<dyn FnOnce(&IoResult<T>) + Send>;

struct Node<T> {
    action: Action<T>,
    dependent: Option<Arc<dyn Settle>>,
    next: *mut Node<T>,
}

/// Marker stored in `head` once continuations have been drained.
#[inline]
fn closed<T>() -> *mut Node<T> {
    NonNull::dangling().as_ptr()
}

/// Type-erased view of a promise that hangs off another one.
trait Settle: Send + Sync {
    /// Dependents recorded once every continuation ran; `None` before.
    fn dependents(&self) -> Option<&[Arc<dyn Settle>]>;

    /// Take every dependent this promise still references, freeing its
    /// unrun continuations.
    fn detach(&mut self) -> Vec<Arc<dyn Settle>>;

    /// Fail with `cause` unless already resolved.
    fn abandon(self: Arc<Self>, cause: Cause);
}

type Deferred = Box<dyn FnOnce()>;

thread_local! {
    /// Resolutions queued behind the one running on this thread. `None`
    /// while no resolution is running here.
    static DEFERRED: RefCell<Option<VecDeque<Deferred>>> = const { RefCell::new(None) };
}

/// Run `settle` now, or queue it if a resolution is already running on
/// this thread.
fn schedule(settle: Deferred) {
    let mut settle = Some(settle);
    let entered = DEFERRED.try_with(|q| {
        let mut q = q.borrow_mut();
        match q.as_mut() {
            Some(queue) => {
                queue.extend(settle.take());
                false
            }
            None => {
                *q = Some(VecDeque::new());
                true
            }
        }
    });
    let Some(settle) = settle else {
        return;
    };
    if entered.is_err() {
        // thread-local storage already torn down
        settle();
        return;
    }

    let _draining = DrainGuard;
    settle();
    drain_deferred();
}

/// Run queued resolutions until none are left.
fn drain_deferred() {
    while let Some(next) = DEFERRED
        .try_with(|q| q.borrow_mut().as_mut().and_then(VecDeque::pop_front))
        .ok()
        .flatten()
    {
        next();
    }
}

/// Ends the drain on this thread, also when a resolution unwinds.
struct DrainGuard;

impl Drop for DrainGuard {
    fn drop(&mut self) {
        let _ = DEFERRED.try_with(|q| q.borrow_mut().take());
    }
}

/// Wait for `root` and every dependent reachable from it. False if
/// `deadline` passed first.
fn wait_chain(root: &dyn Settle, deadline: Option<Instant>) -> bool {
    drain_deferred();
    let Some(first) = wait_one(root, deadline) else {
        return false;
    };
    let mut pending: Vec<Arc<dyn Settle>> = first.to_vec();
    while let Some(next) = pending.pop() {
        match wait_one(&*next, deadline) {
            Some(dependents) => pending.extend(dependents.iter().cloned()),
            None => return false,
        }
    }
    true
}

fn wait_one(settle: &dyn Settle, deadline: Option<Instant>) -> Option<&[Arc<dyn Settle>]> {
    let mut backoff = Backoff::new();
    loop {
        if let Some(dependents) = settle.dependents() {
            return Some(dependents);
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return None;
        }
        backoff.snooze();
    }
}

struct Inner<T> {
    value: OnceLock<IoResult<T>>,
    head: AtomicPtr<Node<T>>,
    /// Set after every continuation ran; holds their dependents.
    settled: OnceLock<Vec<Arc<dyn Settle>>>,
}

// Safety: nodes reachable from `head` are owned by the list and only
// touched by the thread that wins the CAS (push) or the swap (drain).
unsafe impl<T: Send + Sync> Send for Inner<T> {}
unsafe impl<T: Send + Sync> Sync for Inner<T> {}

impl<T> Inner<T> {
    fn pending() -> Self {
        Self {
            value: OnceLock::new(),
            head: AtomicPtr::new(ptr::null_mut()),
            settled: OnceLock::new(),
        }
    }

    fn resolved(result: IoResult<T>) -> Self {
        Self {
            value: OnceLock::from(result),
            head: AtomicPtr::new(closed()),
            settled: OnceLock::from(Vec::new()),
        }
    }

    /// Push a node; hands it back if the list is already closed.
    fn push(&self, node: Box<Node<T>>) -> Option<Box<Node<T>>> {
        let node = Box::into_raw(node);
        let mut head = self.head.load(Ordering::Acquire);
        loop {
            if head == closed() {
                // Safety: the node was never published
                return Some(unsafe { Box::from_raw(node) });
            }
            // Safety: we still own the unpublished node
            unsafe { (*node).next = head };
            match self
                .head
                .compare_exchange_weak(head, node, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return None,
                Err(actual) => head = actual,
            }
        }
    }

    /// Close the list and run everything on it, in attach order.
    fn run_actions(&self) {
        let Some(value) = self.value.get() else {
            return;
        };

        let mut head = self.head.swap(closed(), Ordering::AcqRel);
        let mut ordered: *mut Node<T> = ptr::null_mut();
        while !head.is_null() && head != closed() {
            // Safety: the swap made us the sole owner of the captured list
            unsafe {
                let next = (*head).next;
                (*head).next = ordered;
                ordered = head;
                head = next;
            }
        }

        let mut dependents = Vec::new();
        while !ordered.is_null() {
            // Safety: each node is visited once and freed here
            let node = unsafe { Box::from_raw(ordered) };
            ordered = node.next;
            let Node { action, dependent, .. } = *node;
            run_action(action, dependent.as_ref(), value);
            if let Some(dependent) = dependent {
                dependents.push(dependent);
            }
        }
        let _ = self.settled.set(dependents);
    }

    /// Free unrun continuations and hand back every dependent this
    /// promise still references.
    fn unlink(&mut self) -> Vec<Arc<dyn Settle>> {
        let mut dependents = self.settled.take().unwrap_or_default();
        let mut head = std::mem::replace(self.head.get_mut(), closed());
        while !head.is_null() && head != closed() {
            // Safety: exclusive access; nodes of an unresolved promise
            let node = unsafe { Box::from_raw(head) };
            head = node.next;
            let Node { action, dependent, .. } = *node;
            // the action may hold the last other handle on `dependent`
            drop(action);
            dependents.extend(dependent);
        }
        dependents
    }
}

impl<T: Send + Sync + 'static> Inner<T> {
    /// First writer wins and runs the continuations.
    fn settle(self: &Arc<Self>, result: IoResult<T>) {
        if self.value.set(result).is_ok() {
            let inner = Arc::clone(self);
            schedule(Box::new(move || inner.run_actions()));
        }
    }
}

fn run_action<T>(action: Action<T>, dependent: Option<&Arc<dyn Settle>>, value: &IoResult<T>) {
    if catch_unwind(AssertUnwindSafe(|| action(value))).is_err() {
        warn!("promise continuation panicked");
        if let Some(dependent) = dependent {
            Arc::clone(dependent).abandon(Cause::message("continuation panicked"));
        }
    }
}

impl<T: Send + Sync + 'static> Settle for Inner<T> {
    fn dependents(&self) -> Option<&[Arc<dyn Settle>]> {
        self.settled.get().map(Vec::as_slice)
    }

    fn detach(&mut self) -> Vec<Arc<dyn Settle>> {
        self.unlink()
    }

    fn abandon(self: Arc<Self>, cause: Cause) {
        self.settle(Err(cause));
    }
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        // Tear the chain down level by level instead of recursing
        let mut chain = self.unlink();
        while let Some(mut next) = chain.pop() {
            if let Some(settle) = Arc::get_mut(&mut next) {
                chain.extend(settle.detach());
            }
        }
    }
}

/// A resolve-once result shared between the resolver and any number of
/// observers. Clones refer to the same promise.
pub struct Promise<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Handle that does not keep the promise alive. Lets a continuation
/// refer back to its own inputs without forming a reference cycle.
pub(crate) struct WeakPromise<T> {
    inner: Weak<Inner<T>>,
}

impl<T> WeakPromise<T> {
    pub(crate) fn upgrade(&self) -> Option<Promise<T>> {
        self.inner.upgrade().map(|inner| Promise { inner })
    }
}

impl<T> Promise<T> {
    pub(crate) fn downgrade(&self) -> WeakPromise<T> {
        WeakPromise {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl<T: Send + Sync + 'static> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + Sync + 'static> Promise<T> {
    /// Unresolved promise.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner::pending()),
        }
    }

    /// Already resolved promise.
    pub fn resolved(result: IoResult<T>) -> Self {
        Self {
            inner: Arc::new(Inner::resolved(result)),
        }
    }

    pub fn ok(value: T) -> Self {
        Self::resolved(Ok(value))
    }

    pub fn err(cause: Cause) -> Self {
        Self::resolved(Err(cause))
    }

    /// Set the result. Only the first call has any effect; it runs every
    /// attached continuation on the calling thread.
    pub fn resolve(&self, result: IoResult<T>) -> &Self {
        self.inner.settle(result);
        self
    }

    pub fn success(&self, value: T) -> &Self {
        self.resolve(Ok(value))
    }

    pub fn failure(&self, cause: Cause) -> &Self {
        self.resolve(Err(cause))
    }

    /// Resolve with `Cause::Cancelled`. An operation already handed to
    /// the kernel keeps running; its completion becomes a no-op.
    pub fn cancel(&self) -> &Self {
        self.failure(Cause::Cancelled)
    }

    #[inline]
    pub fn is_resolved(&self) -> bool {
        self.inner.value.get().is_some()
    }

    /// The result, if resolved.
    #[inline]
    pub fn peek(&self) -> Option<&IoResult<T>> {
        self.inner.value.get()
    }

    fn attach(&self, action: Action<T>, dependent: Option<Arc<dyn Settle>>) {
        let node = Box::new(Node {
            action,
            dependent,
            next: ptr::null_mut(),
        });
        if let Some(node) = self.inner.push(node) {
            if let Some(value) = self.inner.value.get() {
                let Node { action, dependent, .. } = *node;
                run_action(action, dependent.as_ref(), value);
            }
        }
    }

    /// Run `action` with the result: now if resolved, otherwise on the
    /// resolving thread.
    pub fn on_result<F>(&self, action: F) -> &Self
    where
        F: FnOnce(&IoResult<T>) + Send + 'static,
    {
        self.attach(Box::new(action), None);
        self
    }

    pub fn on_result_do<F>(&self, action: F) -> &Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_result(move |_| action())
    }

    pub fn on_success<F>(&self, action: F) -> &Self
    where
        F: FnOnce(&T) + Send + 'static,
    {
        self.on_result(move |r| {
            if let Ok(value) = r {
                action(value)
            }
        })
    }

    pub fn on_success_do<F>(&self, action: F) -> &Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_success(move |_| action())
    }

    pub fn on_failure<F>(&self, action: F) -> &Self
    where
        F: FnOnce(&Cause) + Send + 'static,
    {
        self.on_result(move |r| {
            if let Err(cause) = r {
                action(cause)
            }
        })
    }

    pub fn on_failure_do<F>(&self, action: F) -> &Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_failure(move |_| action())
    }

    /// Promise of `f` applied to the success value. Failures pass through
    /// without calling `f`.
    pub fn map<U, F>(&self, f: F) -> Promise<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(&T) -> U + Send + 'static,
    {
        self.try_map(move |v| Ok(f(v)))
    }

    /// Like `map`, but `f` may fail.
    pub fn try_map<U, F>(&self, f: F) -> Promise<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(&T) -> IoResult<U> + Send + 'static,
    {
        if let Some(result) = self.peek() {
            return Promise::resolved(match result {
                Ok(v) => f(v),
                Err(cause) => Err(cause.clone()),
            });
        }

        let mapped = Promise::new();
        let target = mapped.clone();
        self.attach(
            Box::new(move |r: &IoResult<T>| {
                target.resolve(match r {
                    Ok(v) => f(v),
                    Err(cause) => Err(cause.clone()),
                });
            }),
            Some(mapped.inner.clone() as Arc<dyn Settle>),
        );
        mapped
    }

    /// Promise of the promise returned by `f`. Failures pass through
    /// without calling `f`.
    pub fn flat_map<U, F>(&self, f: F) -> Promise<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(&T) -> Promise<U> + Send + 'static,
    {
        if let Some(result) = self.peek() {
            return match result {
                Ok(v) => f(v),
                Err(cause) => Promise::err(cause.clone()),
            };
        }

        let mapped = Promise::new();
        let target = mapped.clone();
        self.attach(
            Box::new(move |r: &IoResult<T>| match r {
                Ok(v) => {
                    f(v).on_result(move |inner| {
                        target.resolve(inner.clone());
                    });
                }
                Err(cause) => {
                    target.failure(cause.clone());
                }
            }),
            Some(mapped.inner.clone() as Arc<dyn Settle>),
        );
        mapped
    }

    /// Schedule `action` on the global proactor pool with this promise.
    /// If the pool cannot be started or has shut down, the promise is
    /// resolved with that failure instead.
    pub fn async_with<F>(&self, action: F) -> &Self
    where
        F: FnOnce(Promise<T>, &mut Proactor) + Send + 'static,
    {
        let promise = self.clone();
        let scheduled = ProactorPool::global().and_then(|pool| {
            pool.submit(move |proactor: &mut Proactor| action(promise, proactor))
        });
        if let Err(cause) = scheduled {
            self.failure(cause);
        }
        self
    }

    /// Like `async_with`, but `action` runs once `delay` has elapsed.
    /// The wait is a kernel timer on the runner's ring, not a requeue.
    pub fn async_after<F>(&self, delay: Duration, action: F) -> &Self
    where
        F: FnOnce(Promise<T>, &mut Proactor) + Send + 'static,
    {
        self.async_with(move |promise, proactor| {
            proactor.delay(delay, move |_, proactor| action(promise, proactor));
        })
    }

    /// New promise handed to `action` on the global pool.
    pub fn with<F>(action: F) -> Self
    where
        F: FnOnce(Promise<T>, &mut Proactor) + Send + 'static,
    {
        let promise = Self::new();
        promise.async_with(action);
        promise
    }
}

impl<T: Clone + Send + Sync + 'static> Promise<T> {
    /// Wait until this promise and every continuation chained from it
    /// have run, then return the result.
    pub fn join(&self) -> IoResult<T> {
        wait_chain(&*self.inner, None);
        self.current()
    }

    /// `join` with a deadline. On expiry returns `Cause::TimedOut` and
    /// leaves the promise untouched.
    pub fn join_timeout(&self, timeout: Duration) -> IoResult<T> {
        let deadline = Instant::now().checked_add(timeout);
        if wait_chain(&*self.inner, deadline) {
            self.current()
        } else {
            Err(Cause::TimedOut)
        }
    }

    fn current(&self) -> IoResult<T> {
        match self.inner.value.get() {
            Some(result) => result.clone(),
            None => Err(Cause::TimedOut),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.value.get() {
            Some(result) => write!(f, "Promise({:?})", result),
            None => write!(f, "Promise(<>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringio_core::SystemError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::thread;

    #[test]
    fn test_resolve_once() {
        let p = Promise::new();
        p.success(1).success(2).failure(Cause::Cancelled);
        assert_eq!(p.join(), Ok(1));
    }

    #[test]
    fn test_concurrent_resolvers_agree() {
        for _ in 0..50 {
            let p = Promise::<usize>::new();
            let handles: Vec<_> = (0..4)
                .map(|i| {
                    let p = p.clone();
                    thread::spawn(move || {
                        p.success(i);
                    })
                })
                .collect();
            let seen = Arc::new(Mutex::new(Vec::new()));
            for _ in 0..4 {
                let seen = seen.clone();
                p.on_success(move |v| seen.lock().unwrap().push(*v));
            }
            for h in handles {
                h.join().unwrap();
            }
            let winner = p.join().unwrap();
            let seen = seen.lock().unwrap();
            assert_eq!(seen.len(), 4);
            assert!(seen.iter().all(|v| *v == winner));
        }
    }

    #[test]
    fn test_actions_run_in_attach_order() {
        let p = Promise::<u8>::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let order = order.clone();
            p.on_result_do(move || order.lock().unwrap().push(i));
        }
        assert!(order.lock().unwrap().is_empty());
        p.success(0);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_late_attach_runs_inline_once() {
        let early = Arc::new(AtomicUsize::new(0));
        let late = Arc::new(AtomicUsize::new(0));
        let p = Promise::new();
        {
            let early = early.clone();
            p.on_success(move |v: &usize| {
                early.fetch_add(*v, Ordering::SeqCst);
            });
        }
        p.success(7);
        {
            let late = late.clone();
            p.on_success(move |v| {
                late.fetch_add(*v, Ordering::SeqCst);
            });
        }
        assert_eq!(early.load(Ordering::SeqCst), 7);
        assert_eq!(late.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn test_success_and_failure_filters() {
        let hits = Arc::new(AtomicUsize::new(0));
        let p = Promise::<u8>::new();
        let h1 = hits.clone();
        let h2 = hits.clone();
        p.on_success_do(move || {
            h1.fetch_add(1, Ordering::SeqCst);
        })
        .on_failure(move |cause| {
            assert_eq!(*cause, Cause::Cancelled);
            h2.fetch_add(10, Ordering::SeqCst);
        });
        p.cancel();
        assert_eq!(hits.load(Ordering::SeqCst), 10);
        assert!(p.peek().unwrap().as_ref().unwrap_err().is_cancelled());
    }

    #[test]
    fn test_map_short_circuits_failure() {
        let called = Arc::new(AtomicUsize::new(0));
        let p = Promise::<u32>::new();
        let c = called.clone();
        let mapped = p.map(move |v| {
            c.fetch_add(1, Ordering::SeqCst);
            v * 2
        });
        p.failure(SystemError::EIO.into());
        assert_eq!(mapped.join(), Err(Cause::System(SystemError::EIO)));
        assert_eq!(called.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_map_on_resolved_shortcut() {
        let p = Promise::ok(20u32);
        assert_eq!(p.map(|v| v + 1).join(), Ok(21));
        assert_eq!(p.try_map(|_| SystemError::ERANGE.result::<u8>()).join(), SystemError::ERANGE.result());
    }

    #[test]
    fn test_flat_map_chains() {
        let p = Promise::<u32>::new();
        let inner = Promise::<String>::new();
        let handed = inner.clone();
        let chained = p.flat_map(move |v| {
            let v = *v;
            handed.map(move |s| format!("{s}{v}"))
        });
        p.success(5);
        assert!(!chained.is_resolved());
        inner.success("n=".to_string());
        assert_eq!(chained.join(), Ok("n=5".to_string()));
    }

    #[test]
    fn test_join_waits_for_dependents() {
        let p = Promise::<u32>::new();
        let done = Arc::new(AtomicUsize::new(0));
        let d = done.clone();
        let _mapped = p.map(move |v| {
            thread::sleep(Duration::from_millis(20));
            d.store(*v as usize, Ordering::SeqCst);
        });
        let resolver = {
            let p = p.clone();
            thread::spawn(move || {
                p.success(3);
            })
        };
        // wait until resolution started, then join from here
        while !p.is_resolved() {
            thread::yield_now();
        }
        assert_eq!(p.join(), Ok(3));
        assert_eq!(done.load(Ordering::SeqCst), 3);
        resolver.join().unwrap();
    }

    #[test]
    fn test_join_timeout_leaves_promise_untouched() {
        let p = Promise::<u32>::new();
        let start = Instant::now();
        assert_eq!(p.join_timeout(Duration::from_millis(10)), Err(Cause::TimedOut));
        assert!(start.elapsed() >= Duration::from_millis(10));
        assert!(!p.is_resolved());

        let resolver = {
            let p = p.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(5));
                p.success(9);
            })
        };
        assert_eq!(p.join(), Ok(9));
        resolver.join().unwrap();
    }

    #[test]
    fn test_panicking_action_does_not_block_others() {
        let p = Promise::<u8>::new();
        let ran = Arc::new(AtomicUsize::new(0));
        p.on_result_do(|| panic!("boom"));
        let r = ran.clone();
        p.on_result_do(move || {
            r.fetch_add(1, Ordering::SeqCst);
        });
        p.success(1);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(p.join(), Ok(1));
    }

    #[test]
    fn test_panicking_mapper_fails_mapped_promise() {
        let p = Promise::<u8>::new();
        let mapped = p.map(|_| -> u8 { panic!("mapper failure") });
        let chained = p.flat_map(|_| -> Promise<u8> { panic!("flat_map failure") });
        p.success(1);
        assert_eq!(p.join_timeout(Duration::from_secs(5)), Ok(1));
        assert_eq!(mapped.join(), Err(Cause::message("continuation panicked")));
        assert_eq!(chained.join(), Err(Cause::message("continuation panicked")));
    }

    #[test]
    fn test_long_map_chain_small_stack() {
        const LINKS: u32 = 100_000;
        let worker = thread::Builder::new()
            .stack_size(2 << 20)
            .spawn(|| {
                let root = Promise::<u32>::new();
                let mut tail = root.map(|v| v + 1);
                for _ in 1..LINKS {
                    tail = tail.map(|v| v + 1);
                }
                root.success(0);
                assert_eq!(tail.join(), Ok(LINKS));
                assert_eq!(root.join(), Ok(0));
                drop(tail);
                drop(root);
            })
            .unwrap();
        worker.join().unwrap();
    }

    #[test]
    fn test_long_unresolved_chain_drops_on_small_stack() {
        let worker = thread::Builder::new()
            .stack_size(2 << 20)
            .spawn(|| {
                let token = Arc::new(());
                let root = Promise::<u32>::new();
                let held = token.clone();
                let mut tail = root.map(move |v| {
                    let _keep = &held;
                    *v
                });
                for _ in 0..100_000 {
                    tail = tail.map(|v| v + 1);
                }
                drop(tail);
                drop(root);
                assert_eq!(Arc::strong_count(&token), 1);
            })
            .unwrap();
        worker.join().unwrap();
    }

    #[test]
    fn test_resolve_then_join_inside_continuation() {
        let p = Promise::<u8>::new();
        let q = Promise::<u8>::new();
        let seen = Arc::new(AtomicUsize::new(0));
        {
            let q = q.clone();
            let seen = seen.clone();
            p.on_success(move |v| {
                q.success(*v + 1);
                seen.store(q.join().unwrap() as usize, Ordering::SeqCst);
            });
        }
        let doubled = q.map(|v| v * 2);
        p.success(4);
        assert_eq!(seen.load(Ordering::SeqCst), 5);
        assert_eq!(doubled.join(), Ok(10));
    }

    #[test]
    fn test_nested_resolution_runs_after_current_continuation() {
        let p = Promise::<u8>::new();
        let q = Promise::<u8>::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        {
            let order = order.clone();
            q.on_result_do(move || order.lock().unwrap().push("q"));
        }
        {
            let q = q.clone();
            let order = order.clone();
            p.on_result_do(move || {
                q.success(1);
                order.lock().unwrap().push("p");
            });
        }
        p.success(0);
        assert_eq!(*order.lock().unwrap(), vec!["p", "q"]);
    }

    #[test]
    fn test_unresolved_drop_frees_actions() {
        let token = Arc::new(());
        let p = Promise::<u8>::new();
        let held = token.clone();
        p.on_result_do(move || drop(held));
        assert_eq!(Arc::strong_count(&token), 2);
        drop(p);
        assert_eq!(Arc::strong_count(&token), 1);
    }

    #[test]
    fn test_debug_format() {
        let p = Promise::<u8>::new();
        assert_eq!(format!("{p:?}"), "Promise(<>)");
        p.success(4);
        assert_eq!(format!("{p:?}"), "Promise(Ok(4))");
    }
}
