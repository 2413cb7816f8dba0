// src/syscalls.rs
use crate::error::PySpeedResult;
use libc::{c_int, c_void, socklen_t};
use std::io;
use std::mem;
use std::path::Path;
use std::ptr;

// ---- Socket Operations ----

/// Create a non-blocking TCP listener with SO_REUSEADDR and TCP_NODELAY
/// (inherited by accepted sockets on Linux).
pub fn create_listen_socket(host: &str, port: u16) -> PySpeedResult<c_int> {
    let addr_str = format!("{}:{}", host, port);
    let addr: std::net::SocketAddr = addr_str
        .parse()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    let domain = match addr {
        std::net::SocketAddr::V4(_) => libc::AF_INET,
        std::net::SocketAddr::V6(_) => libc::AF_INET6,
    };

    unsafe {
        #[cfg(target_os = "linux")]
        let fd = libc::socket(domain, libc::SOCK_STREAM | libc::SOCK_NONBLOCK, 0);
        #[cfg(not(target_os = "linux"))]
        let fd = libc::socket(domain, libc::SOCK_STREAM, 0);
        if fd < 0 {
            return Err(io::Error::last_os_error().into());
        }

        #[cfg(not(target_os = "linux"))]
        {
            let flags = libc::fcntl(fd, libc::F_GETFL, 0);
            if flags < 0 || libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
                let err = io::Error::last_os_error();
                libc::close(fd);
                return Err(err.into());
            }
        }

        let one: c_int = 1;
        if libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &one as *const _ as *const c_void,
            mem::size_of_val(&one) as socklen_t,
        ) < 0
        {
            let err = io::Error::last_os_error();
            libc::close(fd);
            return Err(err.into());
        }

        // Inherited by accepted sockets on Linux, saving a per-accept setsockopt.
        libc::setsockopt(
            fd,
            libc::IPPROTO_TCP,
            libc::TCP_NODELAY,
            &one as *const _ as *const c_void,
            mem::size_of_val(&one) as socklen_t,
        );

        bind_addr(fd, &addr)?;

        if libc::listen(fd, libc::SOMAXCONN) < 0 {
            let err = io::Error::last_os_error();
            libc::close(fd);
            return Err(err.into());
        }

        Ok(fd)
    }
}

fn bind_addr(fd: c_int, addr: &std::net::SocketAddr) -> PySpeedResult<()> {
    unsafe {
        match addr {
            std::net::SocketAddr::V4(a) => {
                let mut sin: libc::sockaddr_in = mem::zeroed();
                sin.sin_family = libc::AF_INET as libc::sa_family_t;
                sin.sin_port = a.port().to_be();
                sin.sin_addr = libc::in_addr {
                    s_addr: u32::from_ne_bytes(a.ip().octets()),
                };
                if libc::bind(
                    fd,
                    &sin as *const _ as *const libc::sockaddr,
                    mem::size_of_val(&sin) as socklen_t,
                ) < 0
                {
                    let err = io::Error::last_os_error();
                    libc::close(fd);
                    return Err(err.into());
                }
            }
            std::net::SocketAddr::V6(a) => {
                let mut sin6: libc::sockaddr_in6 = mem::zeroed();
                sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
                sin6.sin6_port = a.port().to_be();
                sin6.sin6_flowinfo = a.flowinfo();
                sin6.sin6_addr = libc::in6_addr {
                    s6_addr: a.ip().octets(),
                };
                sin6.sin6_scope_id = a.scope_id();
                if libc::bind(
                    fd,
                    &sin6 as *const _ as *const libc::sockaddr,
                    mem::size_of_val(&sin6) as socklen_t,
                ) < 0
                {
                    let err = io::Error::last_os_error();
                    libc::close(fd);
                    return Err(err.into());
                }
            }
        }
        Ok(())
    }
}

/// Accept one pending connection. `Ok(None)` means the queue is drained.
pub fn accept_connection(listen_fd: c_int) -> PySpeedResult<Option<c_int>> {
    #[cfg(target_os = "linux")]
    unsafe {
        let fd = libc::accept4(
            listen_fd,
            ptr::null_mut(),
            ptr::null_mut(),
            libc::SOCK_NONBLOCK,
        );

        if fd < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                Ok(None)
            } else {
                Err(err.into())
            }
        } else {
            Ok(Some(fd))
        }
    }

    #[cfg(not(target_os = "linux"))]
    unsafe {
        let fd = libc::accept(listen_fd, ptr::null_mut(), ptr::null_mut());

        if fd < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                return Ok(None);
            }
            return Err(err.into());
        }

        let flags = libc::fcntl(fd, libc::F_GETFL, 0);
        if flags < 0 || libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            let err = io::Error::last_os_error();
            libc::close(fd);
            return Err(err.into());
        }

        let one: c_int = 1;
        libc::setsockopt(
            fd,
            libc::IPPROTO_TCP,
            libc::TCP_NODELAY,
            &one as *const _ as *const c_void,
            mem::size_of_val(&one) as socklen_t,
        );

        Ok(Some(fd))
    }
}

pub fn close_fd(fd: c_int) {
    unsafe {
        libc::close(fd);
    }
}

/// Half-close the write side, letting the peer drain what was sent.
pub fn shutdown_write(fd: c_int) {
    unsafe {
        libc::shutdown(fd, libc::SHUT_WR);
    }
}

// ---- Epoll Operations (Linux) ----

#[cfg(target_os = "linux")]
pub use linux_epoll::*;

#[cfg(target_os = "linux")]
mod linux_epoll {
    use super::*;

    pub use libc::epoll_event;
    pub const EPOLLIN: i32 = libc::EPOLLIN;
    pub const EPOLLOUT: i32 = libc::EPOLLOUT;

    pub struct Epoll {
        pub fd: c_int,
    }

    impl Epoll {
        pub fn new() -> PySpeedResult<Self> {
            unsafe {
                let fd = libc::epoll_create1(0);
                if fd < 0 {
                    return Err(io::Error::last_os_error().into());
                }
                Ok(Self { fd })
            }
        }

        pub fn add(&self, fd: c_int, token: u64, interests: i32) -> PySpeedResult<()> {
            self.ctl(libc::EPOLL_CTL_ADD, fd, token, interests)
        }

        pub fn modify(&self, fd: c_int, token: u64, interests: i32) -> PySpeedResult<()> {
            self.ctl(libc::EPOLL_CTL_MOD, fd, token, interests)
        }

        fn ctl(&self, op: c_int, fd: c_int, token: u64, interests: i32) -> PySpeedResult<()> {
            let mut event = epoll_event {
                events: interests as u32,
                u64: token,
            };
            unsafe {
                if libc::epoll_ctl(self.fd, op, fd, &mut event) < 0 {
                    return Err(io::Error::last_os_error().into());
                }
            }
            Ok(())
        }

        pub fn delete(&self, fd: c_int) -> PySpeedResult<()> {
            unsafe {
                if libc::epoll_ctl(self.fd, libc::EPOLL_CTL_DEL, fd, ptr::null_mut()) < 0 {
                    let err = io::Error::last_os_error();
                    if err.raw_os_error() != Some(libc::ENOENT) {
                        return Err(err.into());
                    }
                }
            }
            Ok(())
        }

        pub fn wait(&self, events: &mut [epoll_event], timeout_ms: i32) -> PySpeedResult<usize> {
            unsafe {
                let res = libc::epoll_wait(
                    self.fd,
                    events.as_mut_ptr(),
                    events.len() as c_int,
                    timeout_ms,
                );

                if res < 0 {
                    let err = io::Error::last_os_error();
                    if err.raw_os_error() == Some(libc::EINTR) {
                        return Ok(0);
                    }
                    return Err(err.into());
                }

                Ok(res as usize)
            }
        }
    }

    impl Drop for Epoll {
        fn drop(&mut self) {
            unsafe {
                libc::close(self.fd);
            }
        }
    }
}

// ---- Kqueue fallback for macOS development ----

#[cfg(target_os = "macos")]
pub use macos_epoll::*;

#[cfg(target_os = "macos")]
mod macos_epoll {
    use super::*;
    use libc::{kevent, kqueue, timespec, EVFILT_READ, EVFILT_WRITE, EV_ADD, EV_CLEAR, EV_DELETE, EV_ENABLE};

    #[allow(non_camel_case_types)]
    #[derive(Clone, Copy)]
    pub struct epoll_event {
        pub events: u32,
        pub u64: u64,
    }

    pub const EPOLLIN: i32 = 1;
    pub const EPOLLOUT: i32 = 4;

    pub struct Epoll {
        pub fd: c_int,
    }

    impl Epoll {
        pub fn new() -> PySpeedResult<Self> {
            unsafe {
                let fd = kqueue();
                if fd < 0 {
                    return Err(io::Error::last_os_error().into());
                }
                Ok(Self { fd })
            }
        }

        pub fn add(&self, fd: c_int, token: u64, interests: i32) -> PySpeedResult<()> {
            self.modify_kqueue(fd, token, interests, EV_ADD | EV_ENABLE | EV_CLEAR)
        }

        pub fn modify(&self, fd: c_int, token: u64, interests: i32) -> PySpeedResult<()> {
            self.modify_kqueue(fd, token, interests, EV_ADD | EV_ENABLE | EV_CLEAR)
        }

        pub fn delete(&self, fd: c_int) -> PySpeedResult<()> {
            self.modify_kqueue(fd, 0, EPOLLIN | EPOLLOUT, EV_DELETE)
        }

        fn modify_kqueue(
            &self,
            fd: c_int,
            token: u64,
            interests: i32,
            action: u16,
        ) -> PySpeedResult<()> {
            let mut changes = [unsafe { std::mem::zeroed::<kevent>() }; 2];
            let mut n = 0;

            if (interests & EPOLLIN) != 0 || action == EV_DELETE {
                changes[n] = kevent {
                    ident: fd as usize,
                    filter: EVFILT_READ,
                    flags: action,
                    fflags: 0,
                    data: 0,
                    udata: token as *mut c_void,
                };
                n += 1;
            }

            if (interests & EPOLLOUT) != 0 || action == EV_DELETE {
                changes[n] = kevent {
                    ident: fd as usize,
                    filter: EVFILT_WRITE,
                    flags: action,
                    fflags: 0,
                    data: 0,
                    udata: token as *mut c_void,
                };
                n += 1;
            }

            unsafe {
                let res = libc::kevent(
                    self.fd,
                    changes.as_ptr(),
                    n as c_int,
                    ptr::null_mut(),
                    0,
                    ptr::null(),
                );
                if res < 0 && action != EV_DELETE {
                    return Err(io::Error::last_os_error().into());
                }
            }
            Ok(())
        }

        pub fn wait(&self, events: &mut [epoll_event], timeout_ms: i32) -> PySpeedResult<usize> {
            const MAX_BATCH: usize = 128;
            let mut kevents = [unsafe { std::mem::zeroed::<kevent>() }; MAX_BATCH];
            let batch_size = events.len().min(MAX_BATCH);

            let ts = if timeout_ms >= 0 {
                Some(timespec {
                    tv_sec: (timeout_ms / 1000) as libc::time_t,
                    tv_nsec: ((timeout_ms % 1000) * 1_000_000) as libc::c_long,
                })
            } else {
                None
            };
            let ts_ptr = match &ts {
                Some(t) => t as *const timespec,
                None => ptr::null(),
            };

            unsafe {
                let res = libc::kevent(
                    self.fd,
                    ptr::null(),
                    0,
                    kevents.as_mut_ptr(),
                    batch_size as c_int,
                    ts_ptr,
                );

                if res < 0 {
                    let err = io::Error::last_os_error();
                    if err.raw_os_error() == Some(libc::EINTR) {
                        return Ok(0);
                    }
                    return Err(err.into());
                }

                let n = res as usize;
                for i in 0..n {
                    let mut ep_ev = 0;
                    if kevents[i].filter == EVFILT_READ {
                        ep_ev |= EPOLLIN;
                    }
                    if kevents[i].filter == EVFILT_WRITE {
                        ep_ev |= EPOLLOUT;
                    }
                    events[i] = epoll_event {
                        events: ep_ev as u32,
                        u64: kevents[i].udata as u64,
                    };
                }

                Ok(n)
            }
        }
    }

    impl Drop for Epoll {
        fn drop(&mut self) {
            unsafe {
                libc::close(self.fd);
            }
        }
    }
}

// ---- Non-blocking I/O ----

/// `Ok(None)` = would block, `Ok(Some(0))` = EOF from the peer.
pub fn read_nonblocking(fd: c_int, buf: &mut [u8]) -> PySpeedResult<Option<usize>> {
    unsafe {
        let res = libc::read(fd, buf.as_mut_ptr() as *mut c_void, buf.len());
        if res < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                Ok(None)
            } else {
                Err(err.into())
            }
        } else {
            Ok(Some(res as usize))
        }
    }
}

/// `Ok(None)` = would block; partial writes return the byte count.
pub fn write_nonblocking(fd: c_int, buf: &[u8]) -> PySpeedResult<Option<usize>> {
    unsafe {
        let res = libc::write(fd, buf.as_ptr() as *const c_void, buf.len());
        if res < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                Ok(None)
            } else {
                Err(err.into())
            }
        } else {
            Ok(Some(res as usize))
        }
    }
}

/// Scatter-gather write of up to 8 segments in one syscall.
pub fn writev_nonblocking(fd: c_int, bufs: &[&[u8]]) -> PySpeedResult<Option<usize>> {
    if bufs.is_empty() {
        return Ok(Some(0));
    }

    let mut iovecs: [libc::iovec; 8] = unsafe { std::mem::zeroed() };
    let iov_count = bufs.len().min(8);

    for i in 0..iov_count {
        iovecs[i] = libc::iovec {
            iov_base: bufs[i].as_ptr() as *mut c_void,
            iov_len: bufs[i].len(),
        };
    }

    unsafe {
        let res = libc::writev(fd, iovecs.as_ptr(), iov_count as c_int);
        if res < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                Ok(None)
            } else {
                Err(err.into())
            }
        } else {
            Ok(Some(res as usize))
        }
    }
}

// ---- Accept-Distribute Pipe Operations ----

/// Non-blocking Unix pipe. Returns (read_fd, write_fd).
pub fn create_pipe() -> PySpeedResult<(c_int, c_int)> {
    let mut fds = [0 as c_int; 2];
    unsafe {
        if libc::pipe(fds.as_mut_ptr()) < 0 {
            return Err(io::Error::last_os_error().into());
        }
        let flags = libc::fcntl(fds[0], libc::F_GETFL, 0);
        if flags < 0 || libc::fcntl(fds[0], libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            let err = io::Error::last_os_error();
            libc::close(fds[0]);
            libc::close(fds[1]);
            return Err(err.into());
        }
    }
    Ok((fds[0], fds[1]))
}

pub fn send_fd_over_pipe(pipe_write_fd: c_int, client_fd: c_int) -> PySpeedResult<()> {
    let bytes = client_fd.to_ne_bytes();
    unsafe {
        let n = libc::write(pipe_write_fd, bytes.as_ptr() as *const c_void, 4);
        if n < 0 {
            Err(io::Error::last_os_error().into())
        } else {
            Ok(())
        }
    }
}

pub fn recv_fd_from_pipe(pipe_read_fd: c_int) -> PySpeedResult<Option<c_int>> {
    let mut buf = [0u8; 4];
    unsafe {
        let n = libc::read(pipe_read_fd, buf.as_mut_ptr() as *mut c_void, 4);
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                Ok(None)
            } else {
                Err(err.into())
            }
        } else if n == 4 {
            Ok(Some(c_int::from_ne_bytes(buf)))
        } else {
            Ok(None)
        }
    }
}

// ---- Memory Mapping ----

/// A read-only, privately mapped view of a regular file. The mapping stays
/// valid for the lifetime of this value; the fd is closed right after mmap.
#[derive(Debug)]
pub struct Mapping {
    ptr: *mut c_void,
    len: usize,
}

// Read-only pages shared between sessions.
unsafe impl Send for Mapping {}
unsafe impl Sync for Mapping {}

impl Mapping {
    pub fn open(path: &Path) -> PySpeedResult<Self> {
        use std::os::unix::ffi::OsStrExt;

        let c_path = std::ffi::CString::new(path.as_os_str().as_bytes())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL"))?;

        unsafe {
            let fd = libc::open(c_path.as_ptr(), libc::O_RDONLY);
            if fd < 0 {
                return Err(io::Error::last_os_error().into());
            }

            let mut stat: libc::stat = mem::zeroed();
            if libc::fstat(fd, &mut stat) < 0 {
                let err = io::Error::last_os_error();
                libc::close(fd);
                return Err(err.into());
            }

            let len = stat.st_size as usize;
            if len == 0 {
                // mmap rejects zero-length maps; model the empty file directly.
                libc::close(fd);
                return Ok(Self {
                    ptr: ptr::null_mut(),
                    len: 0,
                });
            }

            let ptr = libc::mmap(ptr::null_mut(), len, libc::PROT_READ, libc::MAP_PRIVATE, fd, 0);
            if ptr == libc::MAP_FAILED {
                let err = io::Error::last_os_error();
                libc::close(fd);
                return Err(err.into());
            }

            libc::madvise(ptr, len, libc::MADV_SEQUENTIAL);
            libc::close(fd);

            Ok(Self { ptr, len })
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        if self.ptr.is_null() {
            return &[];
        }
        unsafe { std::slice::from_raw_parts(self.ptr as *const u8, self.len) }
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe {
                libc::munmap(self.ptr, self.len);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_mapping_reads_file_contents() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"mapped bytes").unwrap();
        tmp.flush().unwrap();

        let map = Mapping::open(tmp.path()).unwrap();
        assert_eq!(map.len(), 12);
        assert_eq!(map.as_slice(), b"mapped bytes");
    }

    #[test]
    fn test_mapping_empty_file() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let map = Mapping::open(tmp.path()).unwrap();
        assert!(map.is_empty());
        assert_eq!(map.as_slice(), b"");
    }

    #[test]
    fn test_mapping_missing_file() {
        assert!(Mapping::open(Path::new("/no/such/file/here")).is_err());
    }

    #[test]
    fn test_pipe_fd_round_trip() {
        let (read_fd, write_fd) = create_pipe().unwrap();
        send_fd_over_pipe(write_fd, 1234).unwrap();
        assert_eq!(recv_fd_from_pipe(read_fd).unwrap(), Some(1234));
        assert_eq!(recv_fd_from_pipe(read_fd).unwrap(), None);
        close_fd(read_fd);
        close_fd(write_fd);
    }
}
