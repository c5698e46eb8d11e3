//! Thin wrappers over the kernel readiness facilities: the epoll instance
//! itself and the eventfd used to interrupt a blocked wait.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

/// Owner of one epoll file descriptor.
pub(crate) struct Epoll {
    fd: OwnedFd,
}

impl Epoll {
    pub fn new() -> io::Result<Self> {
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };

        if fd == -1 {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, events: u32, key: u64) -> io::Result<()> {
        let mut event = libc::epoll_event { events, u64: key };

        let ret = unsafe { libc::epoll_ctl(self.fd.as_raw_fd(), op, fd, &mut event) };

        if ret == -1 {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    }

    pub fn add(&self, fd: RawFd, events: u32, key: u64) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, events, key)
    }

    pub fn modify(&self, fd: RawFd, events: u32, key: u64) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, events, key)
    }

    pub fn delete(&self, fd: RawFd) -> io::Result<()> {
        let ret =
            unsafe { libc::epoll_ctl(self.fd.as_raw_fd(), libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut()) };

        if ret == -1 {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    }

    /// One wait call. `None` blocks indefinitely; `Some(Duration::ZERO)` is a
    /// non-blocking poll. The timeout is rounded up to the next millisecond
    /// so a bounded wait never returns before a timer deadline.
    pub fn wait(&self, events: &mut [libc::epoll_event], timeout: Option<Duration>) -> io::Result<usize> {
        let timeout_ms = match timeout {
            None => -1,
            Some(d) => {
                let mut ms = d.as_millis();
                if d.subsec_nanos() % 1_000_000 != 0 {
                    ms += 1;
                }
                ms.min(i32::MAX as u128) as i32
            }
        };

        let ret = unsafe {
            libc::epoll_wait(
                self.fd.as_raw_fd(),
                events.as_mut_ptr(),
                events.len() as libc::c_int,
                timeout_ms,
            )
        };

        if ret == -1 {
            let err = io::Error::last_os_error();

            // A signal just means nothing became ready.
            if err.raw_os_error() == Some(libc::EINTR) {
                return Ok(0);
            }

            return Err(err);
        }

        Ok(ret as usize)
    }
}

/// An eventfd used to wake a blocked [Epoll::wait] when work is posted from
/// another thread.
pub(crate) struct Notifier {
    fd: OwnedFd,
}

impl Notifier {
    pub fn new() -> io::Result<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };

        if fd == -1 {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    pub fn raw(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    /// Signal the driver thread. Safe from any thread; a full counter means
    /// a wakeup is already pending, so the error is ignored.
    pub fn notify(&self) {
        let one: u64 = 1;

        unsafe {
            libc::write(
                self.fd.as_raw_fd(),
                &one as *const u64 as *const _,
                std::mem::size_of::<u64>(),
            )
        };
    }

    /// Clear the pending wakeup count so a level-triggered wait does not
    /// spin on the notifier.
    pub fn drain(&self) {
        let mut count: u64 = 0;

        unsafe {
            libc::read(
                self.fd.as_raw_fd(),
                &mut count as *mut u64 as *mut _,
                std::mem::size_of::<u64>(),
            )
        };
    }
}
