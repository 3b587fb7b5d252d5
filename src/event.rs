//! Readiness-based event multiplexer.
//!
//! Wraps `epoll` on Linux and `kqueue` on BSD/macOS behind one
//! interface: edge-triggered registration of interest in read/write
//! readiness, keyed by an opaque `u64` token chosen by the caller (in
//! this crate, always a connection slot index).

/// Readiness interests and notification flags.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Interest(u32);

impl Interest {
    pub const READABLE: Interest = Interest(0b0001);
    pub const WRITABLE: Interest = Interest(0b0010);
    pub const HANGUP: Interest = Interest(0b0100);
    pub const READ_HANGUP: Interest = Interest(0b1000);

    pub const fn empty() -> Self {
        Interest(0)
    }

    pub const fn contains(self, other: Interest) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: Interest) -> Self {
        Interest(self.0 | other.0)
    }
}

impl std::ops::BitOr for Interest {
    type Output = Interest;
    fn bitor(self, rhs: Interest) -> Interest {
        self.union(rhs)
    }
}

/// One readiness notification: which token, and what became ready.
#[derive(Clone, Copy, Debug)]
pub struct ReadyEvent {
    pub token: u64,
    pub readiness: Interest,
}

#[cfg(target_os = "linux")]
mod backend {
    use super::{Interest, ReadyEvent};
    use libc::{c_int, epoll_event};
    use std::io;
    use std::os::unix::io::RawFd;

    pub struct Multiplexer {
        epfd: RawFd,
    }

    fn to_epoll_bits(interest: Interest) -> u32 {
        let mut bits = libc::EPOLLET as u32;
        if interest.contains(Interest::READABLE) {
            bits |= libc::EPOLLIN as u32;
        }
        if interest.contains(Interest::WRITABLE) {
            bits |= libc::EPOLLOUT as u32;
        }
        bits
    }

    fn from_epoll_bits(bits: u32) -> Interest {
        let mut interest = Interest::empty();
        if bits & (libc::EPOLLIN as u32) != 0 {
            interest = interest.union(Interest::READABLE);
        }
        if bits & (libc::EPOLLOUT as u32) != 0 {
            interest = interest.union(Interest::WRITABLE);
        }
        if bits & (libc::EPOLLHUP as u32) != 0 {
            interest = interest.union(Interest::HANGUP);
        }
        if bits & (libc::EPOLLRDHUP as u32) != 0 {
            interest = interest.union(Interest::READ_HANGUP);
        }
        interest
    }

    impl Multiplexer {
        pub fn new() -> io::Result<Self> {
            // SAFETY: `epoll_create1` has no preconditions; we check
            // the returned fd for the error sentinel below.
            let epfd = unsafe { libc::epoll_create1(0) };
            if epfd < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(Multiplexer { epfd })
        }

        fn ctl(&self, op: c_int, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
            let mut ev = epoll_event {
                events: to_epoll_bits(interest) | (libc::EPOLLRDHUP as u32),
                u64: token,
            };
            // SAFETY: `ev` is a valid, live `epoll_event`; `self.epfd`
            // was created by this struct and is closed only on drop.
            let rc = unsafe { libc::epoll_ctl(self.epfd, op, fd, &mut ev) };
            if rc < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        }

        pub fn add(&self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
            self.ctl(libc::EPOLL_CTL_ADD, fd, token, interest)
        }

        pub fn modify(&self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
            self.ctl(libc::EPOLL_CTL_MOD, fd, token, interest)
        }

        pub fn delete(&self, fd: RawFd) -> io::Result<()> {
            // SAFETY: a null `epoll_event` pointer is valid for
            // `EPOLL_CTL_DEL`, which the kernel ignores entirely.
            let rc = unsafe {
                libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut())
            };
            if rc < 0 {
                let err = io::Error::last_os_error();
                if err.raw_os_error() != Some(libc::ENOENT) && err.raw_os_error() != Some(libc::EBADF) {
                    return Err(err);
                }
            }
            Ok(())
        }

        pub fn wait(&self, out: &mut [ReadyEvent], timeout_ms: i32) -> io::Result<usize> {
            let mut raw = vec![
                epoll_event {
                    events: 0,
                    u64: 0
                };
                out.len()
            ];
            // SAFETY: `raw` has `out.len()` valid slots for the kernel
            // to write into; `epoll_wait` never writes more than that.
            let n = unsafe {
                libc::epoll_wait(self.epfd, raw.as_mut_ptr(), raw.len() as c_int, timeout_ms)
            };
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    return Ok(0);
                }
                return Err(err);
            }
            for i in 0..n as usize {
                out[i] = ReadyEvent {
                    token: raw[i].u64,
                    readiness: from_epoll_bits(raw[i].events),
                };
            }
            Ok(n as usize)
        }
    }

    impl Drop for Multiplexer {
        fn drop(&mut self) {
            // SAFETY: `self.epfd` is owned exclusively by this struct.
            unsafe {
                libc::close(self.epfd);
            }
        }
    }
}

#[cfg(any(target_os = "macos", target_os = "freebsd", target_os = "netbsd", target_os = "openbsd"))]
mod backend {
    use super::{Interest, ReadyEvent};
    use libc::{c_int, kevent, kqueue, timespec};
    use std::io;
    use std::os::unix::io::RawFd;
    use std::ptr;

    pub struct Multiplexer {
        kq: RawFd,
    }

    impl Multiplexer {
        pub fn new() -> io::Result<Self> {
            // SAFETY: `kqueue()` has no preconditions.
            let kq = unsafe { kqueue() };
            if kq < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(Multiplexer { kq })
        }

        fn apply(&self, fd: RawFd, token: u64, interest: Interest, flags: u16) -> io::Result<()> {
            let mut changes = [unsafe { std::mem::zeroed::<kevent>() }; 2];
            let mut n = 0;
            if interest.contains(Interest::READABLE) || flags == libc::EV_DELETE {
                changes[n] = kevent {
                    ident: fd as usize,
                    filter: libc::EVFILT_READ,
                    flags: flags | libc::EV_CLEAR,
                    fflags: 0,
                    data: 0,
                    udata: token as *mut _,
                };
                n += 1;
            }
            if interest.contains(Interest::WRITABLE) || flags == libc::EV_DELETE {
                changes[n] = kevent {
                    ident: fd as usize,
                    filter: libc::EVFILT_WRITE,
                    flags: flags | libc::EV_CLEAR,
                    fflags: 0,
                    data: 0,
                    udata: token as *mut _,
                };
                n += 1;
            }
            // SAFETY: `changes[..n]` is a fully-initialized array of
            // valid `kevent`s; we pass no output buffer.
            let rc = unsafe {
                kevent(self.kq, changes.as_ptr(), n as c_int, ptr::null_mut(), 0, ptr::null())
            };
            if rc < 0 && flags != libc::EV_DELETE {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        }

        pub fn add(&self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
            self.apply(fd, token, interest, libc::EV_ADD | libc::EV_ENABLE)
        }

        pub fn modify(&self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
            self.apply(fd, token, interest, libc::EV_ADD | libc::EV_ENABLE)
        }

        pub fn delete(&self, fd: RawFd) -> io::Result<()> {
            self.apply(fd, 0, Interest::READABLE | Interest::WRITABLE, libc::EV_DELETE)
        }

        pub fn wait(&self, out: &mut [ReadyEvent], timeout_ms: i32) -> io::Result<usize> {
            let mut raw = vec![unsafe { std::mem::zeroed::<kevent>() }; out.len()];
            let ts = timespec {
                tv_sec: (timeout_ms.max(0) / 1000) as libc::time_t,
                tv_nsec: ((timeout_ms.max(0) % 1000) * 1_000_000) as libc::c_long,
            };
            let ts_ptr = if timeout_ms < 0 { ptr::null() } else { &ts as *const timespec };
            // SAFETY: `raw` has `out.len()` valid slots for the kernel
            // to fill; `kevent` never writes more than that.
            let n = unsafe {
                kevent(self.kq, ptr::null(), 0, raw.as_mut_ptr(), raw.len() as c_int, ts_ptr)
            };
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    return Ok(0);
                }
                return Err(err);
            }
            for i in 0..n as usize {
                let mut readiness = Interest::empty();
                if raw[i].filter == libc::EVFILT_READ {
                    readiness = readiness.union(Interest::READABLE);
                }
                if raw[i].filter == libc::EVFILT_WRITE {
                    readiness = readiness.union(Interest::WRITABLE);
                }
                if raw[i].flags & libc::EV_EOF != 0 {
                    readiness = readiness.union(Interest::HANGUP);
                }
                out[i] = ReadyEvent {
                    token: raw[i].udata as u64,
                    readiness,
                };
            }
            Ok(n as usize)
        }
    }

    impl Drop for Multiplexer {
        fn drop(&mut self) {
            // SAFETY: `self.kq` is owned exclusively by this struct.
            unsafe {
                libc::close(self.kq);
            }
        }
    }
}

pub use backend::Multiplexer;

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::os::unix::io::{FromRawFd, RawFd};

    #[test]
    fn pipe_becomes_readable_after_write() {
        let mut fds = [0 as RawFd; 2];
        // SAFETY: `fds` has room for two descriptors, as `pipe` requires.
        let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
        assert_eq!(rc, 0);
        let (read_fd, write_fd) = (fds[0], fds[1]);

        let mux = Multiplexer::new().unwrap();
        mux.add(read_fd, 42, Interest::READABLE).unwrap();

        let mut events = [ReadyEvent { token: 0, readiness: Interest::empty() }; 4];
        let n = mux.wait(&mut events, 0).unwrap();
        assert_eq!(n, 0);

        // SAFETY: `write_fd` is a valid, open pipe write end.
        unsafe {
            libc::write(write_fd, b"x".as_ptr() as *const _, 1);
        }

        let n = mux.wait(&mut events, 1000).unwrap();
        assert_eq!(n, 1);
        assert_eq!(events[0].token, 42);
        assert!(events[0].readiness.contains(Interest::READABLE));

        // SAFETY: both ends are owned file descriptors from `pipe`
        // above, not yet closed.
        unsafe {
            drop(File::from_raw_fd(read_fd));
            drop(File::from_raw_fd(write_fd));
        }
    }
}
