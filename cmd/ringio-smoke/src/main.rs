//! ringio End-to-End Smoke Test
//!
//! Exercises the global proactor pool through the promise API:
//!   Part A - Pool startup and timers
//!   Part B - Promise composition (map, flat_map, any, all_of)
//!   Part C - Files: open, writev, fallocate, fsync, statx, readv, close
//!   Part D - Fixed buffers: write_fixed / read_fixed
//!   Part E - Sockets: listen, accept, connect, send, recv, splice
//!   Part F - Shutdown: in-flight operations fail, pool restarts
//!
//! Run: ./target/release/ringio-smoke
//! Logging: RUST_LOG=debug ./target/release/ringio-smoke

use std::path::PathBuf;
use std::time::{Duration, Instant};

use ringio::flags::{fallocate_mode, open_flags};
use ringio::{
    all2, all_of, any, io, socket_flags, stat_mask, AddressFamily, Cause, FileDescriptor,
    IoBuffer, ProactorPool, Promise, SocketOptions, SocketType, SpliceDescriptor, SystemError,
};
use tracing_subscriber::EnvFilter;

// ── Test harness ──

struct TestRunner {
    total: usize,
    passed: usize,
    failed: usize,
}

const LINE: &str = "────────────────────────────────────────────────────────────";

impl TestRunner {
    fn new() -> Self {
        Self { total: 0, passed: 0, failed: 0 }
    }

    fn section(&self, name: &str) {
        println!("\n{}", LINE);
        println!("  {}", name);
        println!("{}", LINE);
    }

    fn pass(&mut self, name: &str) {
        self.total += 1;
        self.passed += 1;
        println!("  [{:2}] {:<52} PASS", self.total, name);
    }

    fn fail(&mut self, name: &str, reason: &str) {
        self.total += 1;
        self.failed += 1;
        println!("  [{:2}] {:<52} FAIL: {}", self.total, name, reason);
    }

    fn check(&mut self, name: &str, ok: bool, reason: &str) {
        if ok { self.pass(name); } else { self.fail(name, reason); }
    }

    /// Record an `Ok` result, returning its value.
    fn record<T>(&mut self, name: &str, r: Result<T, Cause>) -> Option<T> {
        match r {
            Ok(v) => { self.pass(name); Some(v) }
            Err(e) => { self.fail(name, &e.to_string()); None }
        }
    }

    fn summary(&self) {
        println!("\n{}", LINE);
        println!(
            "  Total: {}  Passed: {}  Failed: {}",
            self.total, self.passed, self.failed
        );
        println!("{}", LINE);
    }
}

const OP_TIMEOUT: Option<Duration> = Some(Duration::from_secs(5));

fn scratch(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("ringio-smoke-{}-{}", tag, std::process::id()))
}

// ════════════════════════════════════════════════════════════
// Part A: Pool startup and timers
// ════════════════════════════════════════════════════════════

fn test_startup(t: &mut TestRunner) -> bool {
    t.section("Part A: Pool startup and timers");

    let pool = match ProactorPool::global() {
        Ok(p) => { t.pass("start global pool"); p }
        Err(e) => {
            t.fail("start global pool", &format!("{} (io_uring disabled?)", e));
            return false;
        }
    };
    println!("       runners: {}", pool.runner_count());

    t.record("nop", io::nop().join());

    let start = Instant::now();
    let elapsed = io::delay(Duration::from_millis(20)).join();
    let waited = start.elapsed();
    match elapsed {
        Ok(d) => t.check(
            &format!("delay(20ms) -> {:?}", d),
            d >= Duration::from_millis(20) && waited >= Duration::from_millis(20),
            &format!("returned after {:?}", waited),
        ),
        Err(e) => t.fail("delay(20ms)", &e.to_string()),
    }

    let timers: Vec<Promise<Duration>> = (1..=8u64)
        .map(|ms| io::delay(Duration::from_millis(ms)))
        .collect();
    let all = all_of(timers).join_timeout(Duration::from_secs(2));
    t.check("8 concurrent delays", matches!(all, Ok(ref v) if v.len() == 8), &format!("{:?}", all.err()));
    true
}

// ════════════════════════════════════════════════════════════
// Part B: Promise composition
// ════════════════════════════════════════════════════════════

fn test_promises(t: &mut TestRunner) {
    t.section("Part B: Promise composition");

    let p = io::delay(Duration::from_millis(1)).map(|_| 21).map(|n| n * 2);
    t.check("map chain", p.join() == Ok(42), "wrong value");

    let p = io::nop().flat_map(|_| io::delay(Duration::from_millis(2)));
    t.check("flat_map chain", p.join().is_ok(), "flat_map failed");

    let fast = io::delay(Duration::from_millis(1));
    let slow = io::delay(Duration::from_secs(10));
    let first = any(&[fast, slow.clone()]).join();
    t.check("any: fast timer wins", first.is_ok(), &format!("{:?}", first));
    t.check("any: loser cancelled", slow.peek() == Some(&Err(Cause::Cancelled)), "slow not cancelled");

    let pair = all2(&io::nop().map(|_| "nop"), &io::delay(Duration::from_millis(1)).map(|_| 7u8)).join();
    t.check("all2 mixed types", pair == Ok(("nop", 7)), &format!("{:?}", pair));

    let p = Promise::<u32>::new();
    let seen = Promise::<u32>::new();
    let sink = seen.clone();
    p.on_success(move |v| { sink.success(*v); });
    p.async_after(Duration::from_millis(5), |p, _| { p.success(9); });
    t.check("async_after + on_success", seen.join() == Ok(9), "continuation not run");

    let timed = Promise::<u8>::new().join_timeout(Duration::from_millis(10));
    t.check("join_timeout on pending", timed == Err(Cause::TimedOut), &format!("{:?}", timed));
}

// ════════════════════════════════════════════════════════════
// Part C: Files
// ════════════════════════════════════════════════════════════

fn test_files(t: &mut TestRunner) {
    t.section("Part C: Files");

    let path = scratch("file");
    let flags = open_flags::READ_WRITE | open_flags::CREATE | open_flags::TRUNCATE | open_flags::CLOEXEC;
    let fd = match t.record("open(O_CREAT)", io::open(&path, flags, 0o600, OP_TIMEOUT).join()) {
        Some(fd) => fd,
        None => return,
    };

    let parts = vec![IoBuffer::from_slice(b"hello, "), IoBuffer::from_slice(b"ring")];
    let n = io::write_vector(fd, parts, Some(0), OP_TIMEOUT).join();
    t.check("writev 2 buffers -> 11", n == Ok(11), &format!("{:?}", n));

    let r = io::file_alloc(fd, fallocate_mode::KEEP_SIZE, 0, 64 * 1024, OP_TIMEOUT).join();
    t.check(
        "fallocate(KEEP_SIZE)",
        r.is_ok() || r == SystemError::EOPNOTSUPP.result(),
        &format!("{:?}", r),
    );
    t.record("fdatasync", io::file_sync(fd, false, OP_TIMEOUT).join());
    t.record("fsync", io::file_sync(fd, true, OP_TIMEOUT).join());

    match io::stat(&path, 0, stat_mask::BASIC_STATS, OP_TIMEOUT).join() {
        Ok(st) => t.check(
            &format!("statx size={} mode={:o}", st.size, st.permissions()),
            st.is_file() && st.size == 11,
            "unexpected attributes",
        ),
        Err(e) => t.fail("statx", &e.to_string()),
    }
    let st = io::stat_fd(fd, 0, stat_mask::SIZE, OP_TIMEOUT).join();
    t.check("statx by descriptor", matches!(st, Ok(ref s) if s.size == 11), &format!("{:?}", st.err()));

    let head = IoBuffer::new(5);
    let tail = IoBuffer::new(32);
    let n = io::read_vector(fd, vec![head.clone(), tail.clone()], Some(0), OP_TIMEOUT).join();
    let text = [head.to_vec().unwrap_or_default(), tail.to_vec().unwrap_or_default()].concat();
    t.check("readv -> 11", n == Ok(11) && text == b"hello, ring", &format!("{:?}", n));

    let r = io::read(fd, IoBuffer::new(8), Some(11), OP_TIMEOUT).join();
    t.check("read at EOF -> ENODATA", r == SystemError::ENODATA.result(), &format!("{:?}", r));

    let r = io::write(fd, IoBuffer::new(8), None, OP_TIMEOUT).join();
    t.check("empty write rejected", r == SystemError::ENODATA.result(), &format!("{:?}", r));

    t.record("close", io::close(fd, OP_TIMEOUT).join());

    let r = io::open("/nonexistent/ringio-smoke", open_flags::READ_ONLY, 0, OP_TIMEOUT).join();
    t.check("open missing -> ENOENT", r == SystemError::ENOENT.result(), &format!("{:?}", r));

    let _ = std::fs::remove_file(&path);
}

// ════════════════════════════════════════════════════════════
// Part D: Fixed buffers
// ════════════════════════════════════════════════════════════

fn test_fixed(t: &mut TestRunner) {
    t.section("Part D: Fixed buffers");

    let out = match io::allocate_fixed_buffer(4096) {
        Ok(b) => { t.pass("allocate fixed buffer"); b }
        Err(e) => {
            t.fail("allocate fixed buffer", &format!("{} (RINGIO_FIXED_ARENA=0?)", e));
            return;
        }
    };
    let input = match t.record("allocate second fixed buffer", io::allocate_fixed_buffer(4096)) {
        Some(b) => b,
        None => return,
    };

    let path = scratch("fixed");
    let flags = open_flags::READ_WRITE | open_flags::CREATE | open_flags::TRUNCATE;
    let fd = match t.record("open", io::open(&path, flags, 0o600, OP_TIMEOUT).join()) {
        Some(fd) => fd,
        None => return,
    };

    let _ = out.write_bytes(b"registered");
    let n = io::write_fixed(fd, out, Some(0), OP_TIMEOUT).join();
    t.check("write_fixed -> 10", n == Ok(10), &format!("{:?}", n));

    let n = io::read_fixed(fd, input.clone(), Some(0), OP_TIMEOUT).join();
    let data = input.to_vec().unwrap_or_default();
    t.check("read_fixed -> 10", n == Ok(10) && data == b"registered", &format!("{:?}", n));

    let r = io::read_fixed(fd, IoBuffer::new(16), Some(0), OP_TIMEOUT).join();
    t.check("read_fixed on plain buffer -> EINVAL", r == SystemError::EINVAL.result(), &format!("{:?}", r));

    let _ = io::close(fd, OP_TIMEOUT).join();
    let _ = std::fs::remove_file(&path);
}

// ════════════════════════════════════════════════════════════
// Part E: Sockets
// ════════════════════════════════════════════════════════════

fn test_sockets(t: &mut TestRunner) {
    t.section("Part E: Sockets");

    let address = match "127.0.0.1:0".parse() {
        Ok(a) => a,
        Err(_) => return,
    };
    let listener = match t.record(
        "listen 127.0.0.1:0",
        io::listen(address, SocketType::Stream, socket_flags::CLOEXEC, SocketOptions::listener(), 32).join(),
    ) {
        Some(l) => l,
        None => return,
    };
    println!("       listening on {}", listener.address);

    let accepted = io::accept(listener.socket, socket_flags::CLOEXEC, OP_TIMEOUT);
    let client = match t.record(
        "socket(AF_INET, SOCK_STREAM)",
        io::socket(AddressFamily::Inet, SocketType::Stream, socket_flags::CLOEXEC, SocketOptions::TCP_NO_DELAY)
            .join(),
    ) {
        Some(fd) => fd,
        None => return,
    };
    t.record("connect", io::connect(client, listener.address, OP_TIMEOUT).join());
    let conn = match t.record("accept", accepted.join()) {
        Some(c) => c,
        None => return,
    };
    t.check("peer address reported", conn.peer.is_some(), "no peer");

    let r = io::connect(client, "[::1]:80".parse().unwrap_or(listener.address), OP_TIMEOUT).join();
    t.check("connect family mismatch", r == SystemError::EAFNOSUPPORT.result(), &format!("{:?}", r));

    let n = io::send(client, IoBuffer::from_slice(b"ping"), 0, OP_TIMEOUT).join();
    t.check("send 4 bytes", n == Ok(4), &format!("{:?}", n));
    let buf = IoBuffer::new(64);
    let n = io::recv(conn.socket, buf.clone(), 0, OP_TIMEOUT).join();
    t.check("recv 4 bytes", n == Ok(4) && buf.to_vec().unwrap_or_default() == b"ping", &format!("{:?}", n));

    // socket -> pipe -> socket
    let mut fds = [0; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        t.fail("pipe()", "pipe failed");
        return;
    }
    let (rd, wr) = (FileDescriptor::file(fds[0]), FileDescriptor::file(fds[1]));
    let _ = io::send(conn.socket, IoBuffer::from_slice(b"spliced"), 0, OP_TIMEOUT).join();
    let moved = io::splice(
        SpliceDescriptor { from: client, from_offset: None, to: wr, to_offset: None, length: 7, flags: 0 },
        OP_TIMEOUT,
    )
    .join();
    t.check("splice socket -> pipe", moved == Ok(7), &format!("{:?}", moved));
    let moved = io::splice(
        SpliceDescriptor { from: rd, from_offset: None, to: client, to_offset: None, length: 7, flags: 0 },
        OP_TIMEOUT,
    )
    .join();
    t.check("splice pipe -> socket", moved == Ok(7), &format!("{:?}", moved));
    let echoed = IoBuffer::new(16);
    let n = io::recv(conn.socket, echoed.clone(), 0, OP_TIMEOUT).join();
    t.check("echo through splice", n == Ok(7), &format!("{:?}", n));

    // Linked timeout on a read nobody answers
    let start = Instant::now();
    let r = io::recv(conn.socket, IoBuffer::new(16), 0, Some(Duration::from_millis(30))).join();
    t.check(
        &format!("recv timeout after {:?}", start.elapsed()),
        r == SystemError::ECANCELED.result() || r == SystemError::ETIME.result(),
        &format!("{:?}", r),
    );

    for fd in [client, conn.socket, listener.socket, rd, wr] {
        let _ = io::close(fd, OP_TIMEOUT).join();
    }
}

// ════════════════════════════════════════════════════════════
// Part F: Shutdown
// ════════════════════════════════════════════════════════════

fn test_shutdown(t: &mut TestRunner) {
    t.section("Part F: Shutdown");

    let pending = io::delay(Duration::from_secs(30));
    let _ = io::nop().join();
    let start = Instant::now();
    let done = ProactorPool::shutdown_global().join_timeout(Duration::from_secs(5));
    t.check(&format!("shutdown in {:?}", start.elapsed()), done.is_ok(), &format!("{:?}", done));

    let r = pending.join_timeout(Duration::from_secs(1));
    t.check("in-flight delay -> Shutdown", r == Err(Cause::Shutdown), &format!("{:?}", r));

    let r = io::nop().join_timeout(Duration::from_secs(2));
    t.check("global pool restarts", r == Ok(()), &format!("{:?}", r));
    let _ = ProactorPool::shutdown_global().join_timeout(Duration::from_secs(5));
}

// ════════════════════════════════════════════════════════════

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("=== ringio End-to-End Smoke Test ===");
    let kver = std::fs::read_to_string("/proc/version").unwrap_or_default();
    println!("    kernel: {}", kver.trim().split(' ').nth(2).unwrap_or("?"));

    let mut t = TestRunner::new();

    if test_startup(&mut t) {
        test_promises(&mut t);
        test_files(&mut t);
        test_fixed(&mut t);
        test_sockets(&mut t);
        test_shutdown(&mut t);
    }

    t.summary();
    std::process::exit(if t.failed > 0 { 1 } else { 0 });
}
