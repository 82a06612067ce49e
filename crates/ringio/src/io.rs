//! Promise-returning operations on the global proactor pool.
//!
//! Each call picks the next runner round-robin and hands it the
//! operation; the returned promise resolves on that runner's thread when
//! the completion is dispatched.
//!
//! ```rust,ignore
//! use ringio::flags::open_flags;
//! use ringio::io;
//! use std::time::Duration;
//!
//! let waited = io::delay(Duration::from_millis(10)).join()?;
//! let fd = io::open("/etc/hostname", open_flags::READ_ONLY, 0, None).join()?;
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ringio_core::{FileDescriptor, IoResult};
use ringio_uring::{
    AddressFamily, ConnectionContext, FileStat, IoBuffer, ListenContext, SocketOptions, SocketType,
};

use crate::executor::ProactorPool;
use crate::promise::Promise;
use crate::proactor::SpliceDescriptor;

/// Resolve `promise` with whatever the operation produces.
macro_rules! resolve_into {
    ($promise:ident) => {
        move |r, _| {
            $promise.resolve(r);
        }
    };
}

pub fn nop() -> Promise<()> {
    Promise::with(|p, proactor| proactor.nop(resolve_into!(p)))
}

/// Resolves with the elapsed time, at least `interval`.
pub fn delay(interval: Duration) -> Promise<Duration> {
    Promise::with(move |p, proactor| proactor.delay(interval, resolve_into!(p)))
}

pub fn read(fd: FileDescriptor, buffer: IoBuffer, offset: Option<u64>, timeout: Option<Duration>) -> Promise<usize> {
    Promise::with(move |p, proactor| proactor.read(fd, buffer, offset, timeout, resolve_into!(p)))
}

pub fn write(fd: FileDescriptor, buffer: IoBuffer, offset: Option<u64>, timeout: Option<Duration>) -> Promise<usize> {
    Promise::with(move |p, proactor| proactor.write(fd, buffer, offset, timeout, resolve_into!(p)))
}

pub fn read_vector(
    fd: FileDescriptor,
    buffers: Vec<IoBuffer>,
    offset: Option<u64>,
    timeout: Option<Duration>,
) -> Promise<usize> {
    Promise::with(move |p, proactor| proactor.read_vector(fd, buffers, offset, timeout, resolve_into!(p)))
}

pub fn write_vector(
    fd: FileDescriptor,
    buffers: Vec<IoBuffer>,
    offset: Option<u64>,
    timeout: Option<Duration>,
) -> Promise<usize> {
    Promise::with(move |p, proactor| proactor.write_vector(fd, buffers, offset, timeout, resolve_into!(p)))
}

/// `buffer` must come from `allocate_fixed_buffer`.
pub fn read_fixed(fd: FileDescriptor, buffer: IoBuffer, offset: Option<u64>, timeout: Option<Duration>) -> Promise<usize> {
    Promise::with(move |p, proactor| proactor.read_fixed(fd, buffer, offset, timeout, resolve_into!(p)))
}

/// `buffer` must come from `allocate_fixed_buffer`.
pub fn write_fixed(fd: FileDescriptor, buffer: IoBuffer, offset: Option<u64>, timeout: Option<Duration>) -> Promise<usize> {
    Promise::with(move |p, proactor| proactor.write_fixed(fd, buffer, offset, timeout, resolve_into!(p)))
}

pub fn recv(fd: FileDescriptor, buffer: IoBuffer, flags: i32, timeout: Option<Duration>) -> Promise<usize> {
    Promise::with(move |p, proactor| proactor.recv(fd, buffer, flags, timeout, resolve_into!(p)))
}

pub fn send(fd: FileDescriptor, buffer: IoBuffer, flags: i32, timeout: Option<Duration>) -> Promise<usize> {
    Promise::with(move |p, proactor| proactor.send(fd, buffer, flags, timeout, resolve_into!(p)))
}

pub fn open(path: impl AsRef<Path>, flags: i32, mode: u32, timeout: Option<Duration>) -> Promise<FileDescriptor> {
    let path: PathBuf = path.as_ref().to_path_buf();
    Promise::with(move |p, proactor| proactor.open(&path, flags, mode, timeout, resolve_into!(p)))
}

pub fn close(fd: FileDescriptor, timeout: Option<Duration>) -> Promise<()> {
    Promise::with(move |p, proactor| proactor.close(fd, timeout, resolve_into!(p)))
}

pub fn stat(path: impl AsRef<Path>, flags: i32, mask: u32, timeout: Option<Duration>) -> Promise<FileStat> {
    let path: PathBuf = path.as_ref().to_path_buf();
    Promise::with(move |p, proactor| proactor.stat(&path, flags, mask, timeout, resolve_into!(p)))
}

pub fn stat_fd(fd: FileDescriptor, flags: i32, mask: u32, timeout: Option<Duration>) -> Promise<FileStat> {
    Promise::with(move |p, proactor| proactor.stat_fd(fd, flags, mask, timeout, resolve_into!(p)))
}

pub fn socket(family: AddressFamily, ty: SocketType, flags: i32, options: SocketOptions) -> Promise<FileDescriptor> {
    Promise::with(move |p, proactor| proactor.socket(family, ty, flags, options, resolve_into!(p)))
}

pub fn listen(
    address: SocketAddr,
    ty: SocketType,
    flags: i32,
    options: SocketOptions,
    backlog: i32,
) -> Promise<ListenContext> {
    Promise::with(move |p, proactor| proactor.listen(address, ty, flags, options, backlog, resolve_into!(p)))
}

pub fn accept(fd: FileDescriptor, flags: i32, timeout: Option<Duration>) -> Promise<ConnectionContext> {
    Promise::with(move |p, proactor| proactor.accept(fd, flags, timeout, resolve_into!(p)))
}

pub fn connect(fd: FileDescriptor, address: SocketAddr, timeout: Option<Duration>) -> Promise<FileDescriptor> {
    Promise::with(move |p, proactor| proactor.connect(fd, address, timeout, resolve_into!(p)))
}

pub fn splice(splice: SpliceDescriptor, timeout: Option<Duration>) -> Promise<usize> {
    Promise::with(move |p, proactor| proactor.splice(splice, timeout, resolve_into!(p)))
}

pub fn file_sync(fd: FileDescriptor, sync_metadata: bool, timeout: Option<Duration>) -> Promise<()> {
    Promise::with(move |p, proactor| proactor.file_sync(fd, sync_metadata, timeout, resolve_into!(p)))
}

pub fn file_alloc(fd: FileDescriptor, mode: i32, offset: u64, length: u64, timeout: Option<Duration>) -> Promise<()> {
    Promise::with(move |p, proactor| proactor.file_alloc(fd, mode, offset, length, timeout, resolve_into!(p)))
}

/// Buffer from the global pool's fixed arena, for `read_fixed` and
/// `write_fixed`.
pub fn allocate_fixed_buffer(size: usize) -> IoResult<IoBuffer> {
    ProactorPool::global()?.allocate_fixed_buffer(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::{fallocate_mode, open_flags};
    use ringio_core::{Cause, SystemError};
    use ringio_uring::{socket_flags, stat_mask};
    use std::io::Read;

    fn pool_available() -> bool {
        match ProactorPool::global() {
            Ok(_) => true,
            Err(e) => {
                eprintln!("skipping: global pool unavailable ({e})");
                false
            }
        }
    }

    fn scratch_file(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("ringio-io-{}-{}", tag, std::process::id()))
    }

    #[test]
    fn test_delay_at_least_requested() {
        if !pool_available() {
            return;
        }
        let start = std::time::Instant::now();
        let elapsed = delay(Duration::from_millis(10)).join().unwrap();
        assert!(start.elapsed() >= Duration::from_millis(10));
        assert!(elapsed >= Duration::from_millis(10));
    }

    #[test]
    fn test_nop_round_trip() {
        if !pool_available() {
            return;
        }
        assert_eq!(nop().join(), Ok(()));
    }

    #[test]
    fn test_file_chain() {
        if !pool_available() {
            return;
        }
        let path = scratch_file("chain");
        let fd = open(&path, open_flags::READ_WRITE | open_flags::CREATE | open_flags::TRUNCATE, 0o600, None)
            .join()
            .unwrap();

        let written = write_vector(
            fd,
            vec![IoBuffer::from_slice(b"ring"), IoBuffer::from_slice(b"io")],
            Some(0),
            None,
        )
        .join();
        assert_eq!(written, Ok(6));
        let reserved = file_alloc(fd, fallocate_mode::KEEP_SIZE, 0, 4096, None).join();
        assert!(reserved.is_ok() || reserved == SystemError::EOPNOTSUPP.result());
        assert_eq!(file_sync(fd, false, None).join(), Ok(()));

        let st = stat(&path, 0, stat_mask::BASIC_STATS, None).join().unwrap();
        assert!(st.is_file());
        assert_eq!(st.size, 6);

        let a = IoBuffer::new(3);
        let b = IoBuffer::new(8);
        assert_eq!(read_vector(fd, vec![a.clone(), b.clone()], Some(0), None).join(), Ok(6));
        assert_eq!(a.to_vec().unwrap(), b"rin");
        assert_eq!(b.to_vec().unwrap(), b"gio");

        assert_eq!(close(fd, None).join(), Ok(()));
        let mut content = String::new();
        std::fs::File::open(&path).unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "ringio");
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_open_missing_file() {
        if !pool_available() {
            return;
        }
        let r = open("/nonexistent/ringio", open_flags::READ_ONLY, 0, None).join();
        assert_eq!(r, SystemError::ENOENT.result());
    }

    #[test]
    fn test_map_chain_after_read() {
        if !pool_available() {
            return;
        }
        let path = scratch_file("map");
        std::fs::write(&path, b"12345").unwrap();
        let buf = IoBuffer::new(16);
        let read_buf = buf.clone();
        let text = open(&path, open_flags::READ_ONLY, 0, None)
            .flat_map(move |fd| {
                let fd = *fd;
                read(fd, read_buf.clone(), Some(0), None).flat_map(move |_| close(fd, None))
            })
            .map(move |_| String::from_utf8(buf.to_vec().unwrap()).unwrap());
        assert_eq!(text.join(), Ok("12345".to_string()));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_tcp_accept_connect_send_recv() {
        if !pool_available() {
            return;
        }
        let listener = listen(
            "127.0.0.1:0".parse().unwrap(),
            SocketType::Stream,
            socket_flags::CLOEXEC,
            SocketOptions::listener(),
            16,
        )
        .join()
        .unwrap();

        let accepted = accept(listener.socket, socket_flags::CLOEXEC, Some(Duration::from_secs(5)));
        let client = socket(AddressFamily::Inet, SocketType::Stream, socket_flags::CLOEXEC, SocketOptions::TCP_NO_DELAY)
            .join()
            .unwrap();
        let connected = connect(client, listener.address, Some(Duration::from_secs(5))).join().unwrap();
        assert_eq!(connected, client);

        let conn = accepted.join().unwrap();
        assert!(conn.socket.is_socket());
        assert!(conn.peer.is_some());

        assert_eq!(send(client, IoBuffer::from_slice(b"ping"), 0, None).join(), Ok(4));
        let buf = IoBuffer::new(16);
        assert_eq!(recv(conn.socket, buf.clone(), 0, None).join(), Ok(4));
        assert_eq!(buf.to_vec().unwrap(), b"ping");

        for fd in [client, conn.socket, listener.socket] {
            close(fd, None).join().unwrap();
        }
    }

    #[test]
    fn test_splice_through_pipe() {
        if !pool_available() {
            return;
        }
        let path = scratch_file("splice");
        std::fs::write(&path, b"spliced bytes").unwrap();
        let mut fds = [0; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        let (rd, wr) = (FileDescriptor::file(fds[0]), FileDescriptor::file(fds[1]));

        let src = open(&path, open_flags::READ_ONLY, 0, None).join().unwrap();
        let moved = splice(
            SpliceDescriptor {
                from: src,
                from_offset: Some(0),
                to: wr,
                to_offset: None,
                length: 64,
                flags: 0,
            },
            None,
        )
        .join();
        assert_eq!(moved, Ok(13));

        let buf = IoBuffer::new(64);
        assert_eq!(read(rd, buf.clone(), None, None).join(), Ok(13));
        assert_eq!(buf.to_vec().unwrap(), b"spliced bytes");

        for fd in [src, rd, wr] {
            close(fd, None).join().unwrap();
        }
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_cancel_does_not_retract_kernel_op() {
        if !pool_available() {
            return;
        }
        let p = delay(Duration::from_millis(20));
        p.cancel();
        assert_eq!(p.join(), Err(Cause::Cancelled));
        // the timer still completes; resolving again is a no-op
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(p.join(), Err(Cause::Cancelled));
    }

    #[test]
    fn test_async_after_waits() {
        if !pool_available() {
            return;
        }
        let start = std::time::Instant::now();
        let p = Promise::<u8>::new();
        p.async_after(Duration::from_millis(15), |promise, _| {
            promise.success(7);
        });
        assert_eq!(p.join(), Ok(7));
        assert!(start.elapsed() >= Duration::from_millis(15));
    }
}
