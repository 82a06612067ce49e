//! Promise combinators: first-of, first-success, all-of.
//!
//! Every combinator cancels its remaining inputs once its own result is
//! decided. Cancelling an input that has already resolved does nothing.
//! The result refers to its inputs weakly: inputs keep the result alive
//! through their continuations, never the other way round, so an
//! abandoned combinator whose inputs never resolve is still freed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use ringio_core::{Cause, IoResult};

use crate::promise::{Promise, WeakPromise};

/// Cancel every promise in `promises`.
pub fn cancel_all<T: Send + Sync + 'static>(promises: &[Promise<T>]) {
    for p in promises {
        p.cancel();
    }
}

/// Weak handles on `promises`, for the result's cancel continuation.
fn downgrade_all<T>(promises: &[Promise<T>]) -> Vec<WeakPromise<T>> {
    promises.iter().map(Promise::downgrade).collect()
}

/// Cancel whichever of `inputs` are still alive.
fn cancel_live<T: Send + Sync + 'static>(inputs: &[WeakPromise<T>]) {
    for p in inputs.iter().filter_map(WeakPromise::upgrade) {
        p.cancel();
    }
}

/// Resolves with the first input result, success or failure.
///
/// An empty input fails immediately.
pub fn any<T>(promises: &[Promise<T>]) -> Promise<T>
where
    T: Clone + Send + Sync + 'static,
{
    if promises.is_empty() {
        return Promise::err(Cause::message("any: no promises"));
    }

    let result = Promise::new();
    for p in promises {
        let result = result.clone();
        p.on_result(move |r| {
            result.resolve(r.clone());
        });
    }
    let inputs = downgrade_all(promises);
    result.on_result_do(move || cancel_live(&inputs));
    result
}

/// Resolves with the first input success. If every input fails, resolves
/// with `failure`.
pub fn any_success<T>(failure: Cause, promises: &[Promise<T>]) -> Promise<T>
where
    T: Clone + Send + Sync + 'static,
{
    if promises.is_empty() {
        return Promise::err(failure);
    }

    let result = Promise::new();
    let remaining = Arc::new(AtomicUsize::new(promises.len()));
    let failure = Arc::new(failure);
    for p in promises {
        let result = result.clone();
        let remaining = Arc::clone(&remaining);
        let failure = Arc::clone(&failure);
        p.on_result(move |r| match r {
            Ok(v) => {
                result.success(v.clone());
            }
            Err(_) => {
                if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    result.failure((*failure).clone());
                }
            }
        });
    }
    let inputs = downgrade_all(promises);
    result.on_result_do(move || cancel_live(&inputs));
    result
}

/// Resolves with every value in input order once all inputs succeed.
/// The first failure resolves the result immediately and cancels the
/// other inputs. An empty input succeeds with an empty vector.
pub fn all_of<T>(promises: Vec<Promise<T>>) -> Promise<Vec<T>>
where
    T: Clone + Send + Sync + 'static,
{
    if promises.is_empty() {
        return Promise::ok(Vec::new());
    }

    let result = Promise::new();
    let slots: Arc<Vec<OnceLock<T>>> = Arc::new((0..promises.len()).map(|_| OnceLock::new()).collect());
    let remaining = Arc::new(AtomicUsize::new(promises.len()));

    for (index, p) in promises.iter().enumerate() {
        let result = result.clone();
        let slots = Arc::clone(&slots);
        let remaining = Arc::clone(&remaining);
        p.on_result(move |r| match r {
            Ok(v) => {
                let _ = slots[index].set(v.clone());
                if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    let values = slots.iter().filter_map(|s| s.get().cloned()).collect();
                    result.success(values);
                }
            }
            Err(cause) => {
                result.failure(cause.clone());
            }
        });
    }
    let inputs = downgrade_all(&promises);
    result.on_result_do(move || cancel_live(&inputs));
    result
}

/// Countdown over the inputs of an `allN`.
struct Gather {
    remaining: AtomicUsize,
}

impl Gather {
    fn new(inputs: usize) -> Arc<Self> {
        Arc::new(Self {
            remaining: AtomicUsize::new(inputs),
        })
    }

    /// True for the call that completes the last input.
    fn arrive(&self) -> bool {
        self.remaining.fetch_sub(1, Ordering::AcqRel) == 1
    }
}

fn take<T: Clone>(slot: &OnceLock<T>) -> IoResult<T> {
    slot.get().cloned().ok_or(Cause::Cancelled)
}

macro_rules! all_n {
    ($(#[$doc:meta])* $name:ident: $n:expr; $($p:ident: $t:ident),+) => {
        $(#[$doc])*
        #[allow(clippy::too_many_arguments)]
        pub fn $name<$($t),+>($($p: &Promise<$t>),+) -> Promise<($($t,)+)>
        where
            $($t: Clone + Send + Sync + 'static),+
        {
            let result = Promise::new();
            let gather = Gather::new($n);
            let slots = Arc::new(($(OnceLock::<$t>::new(),)+));

            let finish = {
                let result = result.clone();
                let slots = Arc::clone(&slots);
                Arc::new(move || {
                    let ($($p,)+) = &*slots;
                    let values = (|| Ok::<_, Cause>(($(take($p)?,)+)))();
                    result.resolve(values);
                })
            };

            all_n!(@attach result, gather, slots, finish; 0; $($p),+);

            let cancels: Vec<Box<dyn Fn() + Send + Sync>> = vec![$({
                let p = $p.downgrade();
                Box::new(move || {
                    if let Some(p) = p.upgrade() {
                        p.cancel();
                    }
                })
            }),+];
            result.on_result_do(move || cancels.iter().for_each(|c| c()));
            result
        }
    };

    (@attach $result:ident, $gather:ident, $slots:ident, $finish:ident; $idx:tt; $p:ident $(, $rest:ident)*) => {
        {
            let result = $result.clone();
            let gather = Arc::clone(&$gather);
            let slots = Arc::clone(&$slots);
            let finish = Arc::clone(&$finish);
            $p.on_result(move |r| match r {
                Ok(v) => {
                    let _ = all_n!(@slot slots; $idx).set(v.clone());
                    if gather.arrive() {
                        (*finish)();
                    }
                }
                Err(cause) => {
                    result.failure(cause.clone());
                }
            });
        }
        all_n!(@attach $result, $gather, $slots, $finish; (@next $idx); $($rest),*);
    };

    (@attach $result:ident, $gather:ident, $slots:ident, $finish:ident; $idx:tt;) => {};

    (@slot $slots:ident; 0) => { $slots.0 };
    (@slot $slots:ident; (@next 0)) => { $slots.1 };
    (@slot $slots:ident; (@next (@next 0))) => { $slots.2 };
    (@slot $slots:ident; (@next (@next (@next 0)))) => { $slots.3 };
    (@slot $slots:ident; (@next (@next (@next (@next 0))))) => { $slots.4 };
    (@slot $slots:ident; (@next (@next (@next (@next (@next 0)))))) => { $slots.5 };
    (@slot $slots:ident; (@next (@next (@next (@next (@next (@next 0))))))) => { $slots.6 };
    (@slot $slots:ident; (@next (@next (@next (@next (@next (@next (@next 0)))))))) => { $slots.7 };
    (@slot $slots:ident; (@next (@next (@next (@next (@next (@next (@next (@next 0))))))))) => { $slots.8 };
}

all_n!(
    /// Both values, or the first failure.
    all2: 2; p1: T1, p2: T2
);
all_n!(all3: 3; p1: T1, p2: T2, p3: T3);
all_n!(all4: 4; p1: T1, p2: T2, p3: T3, p4: T4);
all_n!(all5: 5; p1: T1, p2: T2, p3: T3, p4: T4, p5: T5);
all_n!(all6: 6; p1: T1, p2: T2, p3: T3, p4: T4, p5: T5, p6: T6);
all_n!(all7: 7; p1: T1, p2: T2, p3: T3, p4: T4, p5: T5, p6: T6, p7: T7);
all_n!(all8: 8; p1: T1, p2: T2, p3: T3, p4: T4, p5: T5, p6: T6, p7: T7, p8: T8);
all_n!(all9: 9; p1: T1, p2: T2, p3: T3, p4: T4, p5: T5, p6: T6, p7: T7, p8: T8, p9: T9);

#[cfg(test)]
mod tests {
    use super::*;
    use ringio_core::SystemError;

    #[test]
    fn test_any_first_wins_and_cancels_rest() {
        let a = Promise::<u32>::new();
        let b = Promise::<u32>::new();
        let first = any(&[a.clone(), b.clone()]);
        b.success(2);
        assert_eq!(first.join(), Ok(2));
        assert_eq!(a.peek(), Some(&Err(Cause::Cancelled)));
    }

    #[test]
    fn test_any_failure_wins_too() {
        let a = Promise::<u32>::new();
        let first = any(&[a.clone(), Promise::new()]);
        a.failure(SystemError::EIO.into());
        assert_eq!(first.join(), SystemError::EIO.result());
    }

    #[test]
    fn test_any_empty_fails() {
        assert!(any::<u8>(&[]).join().is_err());
    }

    #[test]
    fn test_any_success_skips_failures() {
        let a = Promise::<u32>::new();
        let b = Promise::<u32>::new();
        let c = Promise::<u32>::new();
        let first = any_success(Cause::message("none"), &[a.clone(), b.clone(), c.clone()]);
        a.failure(SystemError::EIO.into());
        assert!(!first.is_resolved());
        c.success(3);
        assert_eq!(first.join(), Ok(3));
        assert!(b.peek().unwrap().as_ref().unwrap_err().is_cancelled());
    }

    #[test]
    fn test_any_success_all_fail() {
        let a = Promise::<u32>::err(SystemError::EIO.into());
        let b = Promise::<u32>::err(SystemError::EPIPE.into());
        let first = any_success(Cause::message("none"), &[a, b]);
        assert_eq!(first.join(), Err(Cause::message("none")));
    }

    #[test]
    fn test_all_of_keeps_input_order() {
        let ps: Vec<Promise<usize>> = (0..4).map(|_| Promise::new()).collect();
        let all = all_of(ps.clone());
        for (i, p) in ps.iter().enumerate().rev() {
            p.success(i * 10);
        }
        assert_eq!(all.join(), Ok(vec![0, 10, 20, 30]));
    }

    #[test]
    fn test_all_of_empty() {
        assert_eq!(all_of::<u8>(Vec::new()).join(), Ok(vec![]));
    }

    #[test]
    fn test_all_of_first_failure_cancels() {
        let a = Promise::<u8>::new();
        let b = Promise::<u8>::new();
        let all = all_of(vec![a.clone(), b.clone()]);
        a.failure(SystemError::ENOENT.into());
        assert_eq!(all.join(), SystemError::ENOENT.result());
        assert!(b.peek().unwrap().as_ref().unwrap_err().is_cancelled());
    }

    #[test]
    fn test_all2_mixed_types() {
        let a = Promise::<u32>::new();
        let b = Promise::<String>::new();
        let both = all2(&a, &b);
        b.success("two".into());
        assert!(!both.is_resolved());
        a.success(1);
        assert_eq!(both.join(), Ok((1, "two".to_string())));
    }

    #[test]
    fn test_all3_failure_short_circuits() {
        let a = Promise::<u8>::new();
        let b = Promise::<u16>::new();
        let c = Promise::<u32>::new();
        let all = all3(&a, &b, &c);
        b.failure(SystemError::EBADF.into());
        assert_eq!(all.join(), SystemError::EBADF.result());
        assert!(a.is_resolved());
        assert!(c.is_resolved());
    }

    #[test]
    fn test_unresolved_any_frees_inputs() {
        let token = Arc::new(());
        let a = Promise::<u32>::new();
        let held = token.clone();
        a.on_result_do(move || drop(held));
        let first = any(&[a.clone(), Promise::new()]);
        drop(first);
        drop(a);
        assert_eq!(Arc::strong_count(&token), 1);
    }

    #[test]
    fn test_unresolved_all2_frees_inputs() {
        let token = Arc::new(());
        let a = Promise::<u8>::new();
        let b = Promise::<u16>::new();
        let held = token.clone();
        b.on_result_do(move || drop(held));
        let both = all2(&a, &b);
        drop(both);
        drop(a);
        drop(b);
        assert_eq!(Arc::strong_count(&token), 1);
    }

    #[test]
    fn test_all9_resolved_inputs() {
        let all = all9(
            &Promise::ok(1u8),
            &Promise::ok(2u16),
            &Promise::ok(3u32),
            &Promise::ok(4u64),
            &Promise::ok(5usize),
            &Promise::ok(6i8),
            &Promise::ok(7i16),
            &Promise::ok(8i32),
            &Promise::ok(9i64),
        );
        assert_eq!(all.join(), Ok((1, 2, 3, 4, 5, 6, 7, 8, 9)));
    }
}
