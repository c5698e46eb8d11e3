//! Awaitables bridging the callback layer to `async` code.
//!
//! Every future here follows one protocol: a shared one-shot slot (value
//! plus waker) connects an armed operation's completion closure to
//! [std::future::Future::poll]. The first poll arms exactly one pending
//! operation and then checks the slot, so an inline completion (an instant
//! connect, a zero-length transfer) is picked up on that same poll.

pub(crate) mod slot;

pub mod accept;
pub mod connect;
pub mod read;
pub mod sleep;
pub mod write;

pub use accept::Accept;
pub use connect::Connect;
pub use read::ReadExact;
pub use sleep::Sleep;
pub use write::WriteAll;
