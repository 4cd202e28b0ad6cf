//! A thin `epoll(7)` wrapper, grounded directly on the teacher's
//! `src/sys/unix/selector/epoll.rs`. Unlike the teacher, registrations here
//! are level-triggered (no `EPOLLET`): §4.1's reactor loop re-subscribes
//! descriptors explicitly on every notification-channel wake and expects a
//! still-interested fd to keep reporting readiness, matching
//! `original_source/io-service/io-service.c`'s plain (non-edge) `epoll_ctl`
//! usage.

use std::io;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

macro_rules! syscall {
    ($fn:ident ( $($arg:expr),* $(,)* ) ) => {{
        let res = unsafe { libc::$fn($($arg),*) };
        if res == -1 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(res)
        }
    }};
}

pub(crate) struct Selector {
    ep: OwnedFd,
}

impl Selector {
    pub(crate) fn new() -> io::Result<Selector> {
        let fd = syscall!(epoll_create1(libc::EPOLL_CLOEXEC))?;
        let ep = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Selector { ep })
    }

    pub(crate) fn add(&self, fd: RawFd, interest_mask: u32) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: interest_mask,
            u64: fd as u64,
        };
        syscall!(epoll_ctl(self.ep.as_raw_fd(), libc::EPOLL_CTL_ADD, fd, &mut event)).map(|_| ())
    }

    pub(crate) fn modify(&self, fd: RawFd, interest_mask: u32) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: interest_mask,
            u64: fd as u64,
        };
        syscall!(epoll_ctl(self.ep.as_raw_fd(), libc::EPOLL_CTL_MOD, fd, &mut event)).map(|_| ())
    }

    /// Mirrors §4.1's "subscription-modify returning no-such-subscription is
    /// upgraded transparently to subscription-add" failure recovery.
    pub(crate) fn modify_or_add(&self, fd: RawFd, interest_mask: u32) -> io::Result<()> {
        match self.modify(fd, interest_mask) {
            Err(e) if e.raw_os_error() == Some(libc::ENOENT) => self.add(fd, interest_mask),
            other => other,
        }
    }

    /// Mirrors §4.1/§7's "subscription failures for removal are ignored".
    pub(crate) fn remove(&self, fd: RawFd) {
        let _ = syscall!(epoll_ctl(
            self.ep.as_raw_fd(),
            libc::EPOLL_CTL_DEL,
            fd,
            std::ptr::null_mut()
        ));
    }

    /// Waits for at most one event (§4.1's "batch size of 1"). `None`
    /// timeout blocks indefinitely. A negative return from `epoll_wait`
    /// (interrupted by a signal) is treated as spurious per §4.1/§7: the
    /// caller sees `Ok(None)` and is expected to loop.
    pub(crate) fn wait_one(&self, timeout: Option<Duration>) -> io::Result<Option<RawEvent>> {
        let timeout_ms = timeout
            .map(|d| d.as_millis().min(i32::MAX as u128) as libc::c_int)
            .unwrap_or(-1);

        let mut event: libc::epoll_event = unsafe { std::mem::zeroed() };
        match syscall!(epoll_wait(self.ep.as_raw_fd(), &mut event, 1, timeout_ms)) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(RawEvent {
                fd: event.u64 as RawFd,
                events: event.events,
            })),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl AsRawFd for Selector {
    fn as_raw_fd(&self) -> RawFd {
        self.ep.as_raw_fd()
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct RawEvent {
    pub(crate) fd: RawFd,
    pub(crate) events: u32,
}

impl RawEvent {
    pub(crate) fn is_readable(&self) -> bool {
        self.events & (libc::EPOLLIN | libc::EPOLLERR | libc::EPOLLHUP) as u32 != 0
    }

    pub(crate) fn is_writable(&self) -> bool {
        self.events & (libc::EPOLLOUT | libc::EPOLLERR | libc::EPOLLHUP) as u32 != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;

    #[test]
    fn register_and_wait_for_readable_pipe() {
        let selector = Selector::new().unwrap();
        let (a, b) = UnixStream::pair().unwrap();
        selector.add(a.as_raw_fd(), libc::EPOLLIN as u32).unwrap();

        b.set_nonblocking(true).unwrap();
        let _ = std::io::Write::write(&mut &b, b"x").unwrap();

        let event = selector.wait_one(Some(Duration::from_secs(1))).unwrap();
        let event = event.expect("expected a readiness event");
        assert_eq!(event.fd, a.as_raw_fd());
        assert!(event.is_readable());

        drop(a);
        drop(b);
    }

    #[test]
    fn wait_times_out_with_no_events() {
        let selector = Selector::new().unwrap();
        let got = selector.wait_one(Some(Duration::from_millis(20))).unwrap();
        assert!(got.is_none());
    }
}
