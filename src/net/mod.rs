//! Asynchronous TCP sockets: stream sockets, acceptors, and the raw
//! syscall wrappers underneath them.

pub(crate) mod sock_ops;

pub mod acceptor;
pub mod socket;

pub use acceptor::TcpAcceptor;
pub use socket::StreamSocket;
