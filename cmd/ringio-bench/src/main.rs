//! Proactor throughput benchmark
//!
//! Measures completion round trips through a private `ProactorPool`:
//!   nop    - promise per nop, `window` outstanding at a time
//!   delay  - zero-length timers, same windowing
//!   chain  - callbacks issuing the next nop on the same proactor
//!
//! Usage: ringio-bench [ops] [window] [runners]

use std::time::{Duration, Instant};

use ringio::{all_of, IoResult, Proactor, ProactorConfig, ProactorPool, Promise};
use tracing_subscriber::EnvFilter;

fn nop(pool: &ProactorPool) -> Promise<()> {
    pool.promise(|p, proactor| {
        proactor.nop(move |r, _| {
            p.resolve(r);
        })
    })
}

fn zero_delay(pool: &ProactorPool) -> Promise<Duration> {
    pool.promise(|p, proactor| {
        proactor.delay(Duration::ZERO, move |r, _| {
            p.resolve(r);
        })
    })
}

/// Issue `left` nops back to back, each from the previous one's callback.
fn chain(proactor: &mut Proactor, left: usize, done: Promise<()>) {
    proactor.nop(move |r: IoResult<()>, proactor| {
        if left <= 1 || r.is_err() {
            done.resolve(r);
        } else {
            chain(proactor, left - 1, done);
        }
    });
}

/// Run `ops` operations in waves of `window`, returning ops/sec.
fn windowed<T, F>(ops: usize, window: usize, mut issue: F) -> IoResult<f64>
where
    T: Clone + Send + Sync + 'static,
    F: FnMut() -> Promise<T>,
{
    let start = Instant::now();
    let mut done = 0;
    while done < ops {
        let wave = window.min(ops - done);
        let batch: Vec<Promise<T>> = (0..wave).map(|_| issue()).collect();
        all_of(batch).join()?;
        done += wave;
    }
    Ok(ops as f64 / start.elapsed().as_secs_f64())
}

fn report(name: &str, rate: IoResult<f64>) {
    match rate {
        Ok(rate) => println!("  {:<8} {:>12.0} ops/sec  ({:.2} us/op)", name, rate, 1e6 / rate),
        Err(e) => println!("  {:<8} FAILED: {}", name, e),
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1).map(|s| s.parse::<usize>().ok());
    let ops = args.next().flatten().unwrap_or(200_000);
    let window = args.next().flatten().unwrap_or(256).max(1);
    let runners = args.next().flatten().unwrap_or(0);

    println!("=== ringio Proactor Benchmark ===\n");

    let config = ProactorConfig::from_env().runners(runners).fixed_arena_size(0);
    let pool = match ProactorPool::new(config) {
        Ok(pool) => pool,
        Err(e) => {
            println!("FATAL: proactor pool failed to start: {}", e);
            std::process::exit(1);
        }
    };
    println!("Ops:     {}", ops);
    println!("Window:  {}", window);
    println!("Runners: {}\n", pool.runner_count());

    // Warm the rings and exchange pools
    let _ = windowed(window * 4, window, || nop(&pool));

    report("nop", windowed(ops, window, || nop(&pool)));
    report("delay", windowed(ops, window, || zero_delay(&pool)));

    let per_runner = (ops / pool.runner_count()).max(1);
    let start = Instant::now();
    let chains: Vec<Promise<()>> = (0..pool.runner_count())
        .map(|_| pool.promise(move |done, proactor| chain(proactor, per_runner, done)))
        .collect();
    let total = per_runner * chains.len();
    report(
        "chain",
        all_of(chains)
            .join()
            .map(|_| total as f64 / start.elapsed().as_secs_f64()),
    );

    let start = Instant::now();
    match pool.shutdown().join_timeout(Duration::from_secs(10)) {
        Ok(()) => println!("\nShutdown: {:?}", start.elapsed()),
        Err(e) => println!("\nShutdown: {}", e),
    }
}
