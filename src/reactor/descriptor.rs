//! Descriptor ownership and per-descriptor reactor state.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use super::ops::OpQueue;

/// Exclusive owner of one socket file descriptor.
///
/// The descriptor is forced non-blocking the moment it is assigned and stays
/// that way until it is closed on drop. Move-only: there is at most one owner
/// at any time.
pub(crate) struct Descriptor {
    fd: OwnedFd,
}

impl Descriptor {
    /// Take ownership of `fd` and force it non-blocking.
    pub fn from_raw(fd: RawFd) -> io::Result<Self> {
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };

        let flags = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GETFL) };
        if flags == -1 {
            return Err(io::Error::last_os_error());
        }

        if flags & libc::O_NONBLOCK == 0 {
            let ret = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFL, flags | libc::O_NONBLOCK) };
            if ret == -1 {
                return Err(io::Error::last_os_error());
            }
        }

        Ok(Self { fd })
    }

    pub fn raw(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

/// Per-descriptor reactor state: the three direction queues and the interest
/// mask currently registered with epoll.
///
/// Holds the raw fd as a back-reference only; ownership stays with the
/// [Descriptor] in the socket, which outlives this state.
pub(crate) struct DescriptorState {
    pub fd: RawFd,
    pub read_q: OpQueue,
    pub write_q: OpQueue,
    pub connect_q: OpQueue,
    pub interest: u32,
}

impl DescriptorState {
    pub fn new(fd: RawFd, interest: u32) -> Self {
        Self {
            fd,
            read_q: OpQueue::new(),
            write_q: OpQueue::new(),
            connect_q: OpQueue::new(),
            interest,
        }
    }

    /// The interest mask this descriptor should be registered with: input
    /// readiness always, output readiness only while a write or connect
    /// operation is outstanding.
    pub fn wanted_interest(&self) -> u32 {
        let mut events = libc::EPOLLIN as u32;

        if !self.write_q.is_empty() || !self.connect_q.is_empty() {
            events |= libc::EPOLLOUT as u32;
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::{Descriptor, DescriptorState};
    use crate::reactor::ops::Operation;

    #[test]
    fn descriptor_is_forced_non_blocking() {
        let mut fds = [0, 0];
        let ret = unsafe { libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr()) };
        assert_eq!(ret, 0);

        let desc = Descriptor::from_raw(fds[0]).unwrap();
        let flags = unsafe { libc::fcntl(desc.raw(), libc::F_GETFL) };
        assert_ne!(flags & libc::O_NONBLOCK, 0);

        // Close the other end ourselves; only fds[0] is owned by desc.
        unsafe { libc::close(fds[1]) };
    }

    #[test]
    fn interest_follows_pending_directions() {
        let mut fds = [0, 0];
        let ret = unsafe { libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr()) };
        assert_eq!(ret, 0);
        let a = Descriptor::from_raw(fds[0]).unwrap();
        let b = Descriptor::from_raw(fds[1]).unwrap();

        let mut state = DescriptorState::new(a.raw(), libc::EPOLLIN as u32);
        assert_eq!(state.wanted_interest(), libc::EPOLLIN as u32);

        state.write_q.push_back(Operation::new(|_| {}));
        assert_eq!(
            state.wanted_interest(),
            libc::EPOLLIN as u32 | libc::EPOLLOUT as u32
        );

        state.write_q.pop_front();
        assert_eq!(state.wanted_interest(), libc::EPOLLIN as u32);

        state.connect_q.push_back(Operation::new(|_| {}));
        assert_eq!(
            state.wanted_interest(),
            libc::EPOLLIN as u32 | libc::EPOLLOUT as u32
        );

        // Keep both halves alive until the end of the test.
        drop((a, b));
    }
}
