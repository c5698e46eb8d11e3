//! Thin wrappers over the non-blocking socket syscalls.
//!
//! Every socket created here is `O_NONBLOCK | FD_CLOEXEC` from birth, so a
//! syscall either finishes immediately or reports a retryable error for the
//! reactor to wait on.

use std::io;
use std::mem;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::os::fd::RawFd;

use crate::buf::BufferView;
use crate::error::SocketError;

/// Outcome of a non-blocking connect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectProgress {
    /// The three-way handshake finished inside the syscall (loopback does
    /// this routinely).
    Done,
    /// The handshake continues in the background; wait for output readiness.
    Pending,
}

fn to_sockaddr_in(addr: &SocketAddrV4) -> libc::sockaddr_in {
    let mut raw: libc::sockaddr_in = unsafe { mem::zeroed() };
    raw.sin_family = libc::AF_INET as libc::sa_family_t;
    raw.sin_port = addr.port().to_be();
    raw.sin_addr = libc::in_addr {
        s_addr: u32::from(*addr.ip()).to_be(),
    };
    raw
}

fn from_sockaddr_in(raw: &libc::sockaddr_in) -> SocketAddrV4 {
    SocketAddrV4::new(
        Ipv4Addr::from(u32::from_be(raw.sin_addr.s_addr)),
        u16::from_be(raw.sin_port),
    )
}

/// Create a non-blocking IPv4 stream socket.
pub(crate) fn tcp_socket() -> io::Result<RawFd> {
    let fd = unsafe {
        libc::socket(
            libc::AF_INET,
            libc::SOCK_STREAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            0,
        )
    };

    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(fd)
}

pub(crate) fn set_reuse_addr(fd: RawFd) -> io::Result<()> {
    let one: libc::c_int = 1;
    let ret = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &one as *const _ as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };

    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

pub(crate) fn bind(fd: RawFd, addr: &SocketAddrV4) -> io::Result<()> {
    let raw = to_sockaddr_in(addr);
    let ret = unsafe {
        libc::bind(
            fd,
            &raw as *const _ as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        )
    };

    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

pub(crate) fn listen(fd: RawFd, backlog: i32) -> io::Result<()> {
    let ret = unsafe { libc::listen(fd, backlog) };

    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// The address the kernel actually bound, port resolution included.
pub(crate) fn local_addr(fd: RawFd) -> io::Result<SocketAddrV4> {
    let mut raw: libc::sockaddr_in = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;

    let ret = unsafe { libc::getsockname(fd, &mut raw as *mut _ as *mut libc::sockaddr, &mut len) };

    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(from_sockaddr_in(&raw))
}

/// Accept one pending connection; the new descriptor is born non-blocking.
pub(crate) fn accept(fd: RawFd) -> Result<RawFd, SocketError> {
    let ret = unsafe {
        libc::accept4(
            fd,
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
        )
    };

    if ret < 0 {
        return Err(SocketError::last_os_error());
    }
    Ok(ret)
}

/// Start a connect. `Pending` means the socket must be waited on for output
/// readiness, after which [take_socket_error] reveals the outcome.
pub(crate) fn connect(fd: RawFd, addr: &SocketAddrV4) -> Result<ConnectProgress, SocketError> {
    let raw = to_sockaddr_in(addr);
    let ret = unsafe {
        libc::connect(
            fd,
            &raw as *const _ as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        )
    };

    if ret == 0 {
        return Ok(ConnectProgress::Done);
    }

    match unsafe { *libc::__errno_location() } {
        libc::EINPROGRESS | libc::EALREADY | libc::EINTR => Ok(ConnectProgress::Pending),
        errno => Err(SocketError::from_errno(errno)),
    }
}

/// Fetch and clear the socket's pending asynchronous error, if any. Used to
/// learn the outcome of a connect once output readiness arrives.
pub(crate) fn take_socket_error(fd: RawFd) -> Result<Option<SocketError>, SocketError> {
    let mut err: libc::c_int = 0;
    let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;

    let ret = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            &mut err as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };

    if ret < 0 {
        return Err(SocketError::last_os_error());
    }

    if err == 0 {
        Ok(None)
    } else {
        Ok(Some(SocketError::from_errno(err)))
    }
}

/// Read into the view's remaining window. `Ok(0)` on a non-empty view means
/// the peer closed the stream.
pub(crate) fn read(fd: RawFd, view: &mut BufferView) -> Result<usize, SocketError> {
    if view.is_empty() {
        return Ok(0);
    }

    let slice = unsafe { view.as_mut_slice() };
    let ret = unsafe { libc::read(fd, slice.as_mut_ptr() as *mut libc::c_void, slice.len()) };

    if ret < 0 {
        return Err(SocketError::last_os_error());
    }
    Ok(ret as usize)
}

/// Write from the view's remaining window; may accept fewer bytes than
/// offered.
pub(crate) fn write(fd: RawFd, view: &BufferView) -> Result<usize, SocketError> {
    if view.is_empty() {
        return Ok(0);
    }

    let slice = unsafe { view.as_slice() };
    let ret = unsafe { libc::write(fd, slice.as_ptr() as *const libc::c_void, slice.len()) };

    if ret < 0 {
        return Err(SocketError::last_os_error());
    }
    Ok(ret as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddrV4, TcpStream};
    use std::os::fd::{FromRawFd, OwnedFd};

    fn owned(fd: RawFd) -> OwnedFd {
        unsafe { OwnedFd::from_raw_fd(fd) }
    }

    #[test]
    fn bind_to_ephemeral_port_resolves_local_addr() {
        let fd = tcp_socket().unwrap();
        let _guard = owned(fd);

        set_reuse_addr(fd).unwrap();
        bind(fd, &SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)).unwrap();

        let addr = local_addr(fd).unwrap();
        assert_eq!(*addr.ip(), Ipv4Addr::LOCALHOST);
        assert_ne!(addr.port(), 0);
    }

    #[test]
    fn accept_without_pending_connection_is_retryable() {
        let fd = tcp_socket().unwrap();
        let _guard = owned(fd);

        bind(fd, &SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)).unwrap();
        listen(fd, 8).unwrap();

        let err = accept(fd).unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn connect_then_accept_over_loopback() {
        let listener = tcp_socket().unwrap();
        let _listener_guard = owned(listener);
        bind(listener, &SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)).unwrap();
        listen(listener, 8).unwrap();
        let addr = local_addr(listener).unwrap();

        let client = tcp_socket().unwrap();
        let _client_guard = owned(client);
        connect(client, &addr).unwrap();

        // Loopback handshakes finish quickly; poll briefly for the arrival.
        let accepted = loop {
            match accept(listener) {
                Ok(fd) => break fd,
                Err(err) if err.is_retryable() => {
                    std::thread::sleep(std::time::Duration::from_millis(5))
                }
                Err(err) => panic!("accept failed: {err}"),
            }
        };
        let _accepted_guard = owned(accepted);

        assert_eq!(take_socket_error(client).unwrap(), None);
    }

    #[test]
    fn read_and_write_move_bytes_through_a_view() {
        let listener = tcp_socket().unwrap();
        let _listener_guard = owned(listener);
        bind(listener, &SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)).unwrap();
        listen(listener, 8).unwrap();
        let addr = local_addr(listener).unwrap();

        let peer = TcpStream::connect(addr).unwrap();

        let accepted = loop {
            match accept(listener) {
                Ok(fd) => break fd,
                Err(err) if err.is_retryable() => {
                    std::thread::sleep(std::time::Duration::from_millis(5))
                }
                Err(err) => panic!("accept failed: {err}"),
            }
        };
        let _accepted_guard = owned(accepted);

        let mut out = *b"ping";
        let view = BufferView::new(&mut out);
        assert_eq!(write(accepted, &view).unwrap(), 4);

        use std::io::Read;
        let mut peer = peer;
        let mut got = [0u8; 4];
        peer.read_exact(&mut got).unwrap();
        assert_eq!(&got, b"ping");

        // Nothing buffered on the accepted side yet.
        let mut buf = [0u8; 4];
        let mut view = BufferView::new(&mut buf);
        assert!(read(accepted, &mut view).unwrap_err().is_retryable());
    }
}
