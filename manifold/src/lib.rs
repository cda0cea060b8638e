//! Manifold
//!
//! A message-oriented socket framework in the nanomsg lineage: one logical
//! socket federates many concurrent point-to-point links ("pipes") across
//! heterogeneous transports behind a uniform send/receive interface. Every
//! message carries a reversible breadcrumb trail of pipe identifiers, so a
//! reply can retrace a multi-hop forwarding chain without any routing state
//! outside the message itself.
//!
//! The moving parts:
//! - [`Connector`] owns dials (with backoff redial), listeners (with
//!   admission control) and the live pipe set, and fans out pipe lifecycle
//!   events.
//! - [`Sender`] routes outgoing messages to one pipe, all pipes, or along an
//!   explicit destination path, through bounded per-pipe queues.
//! - [`Receiver`] funnels frames from every pipe into one delivery queue,
//!   stamping the routing path as they pass.
//! - [`Socket`] bundles the three behind dial/listen/send/recv.
//!
//! ```no_run
//! use manifold::Socket;
//!
//! #[compio::main]
//! async fn main() -> manifold::Result<()> {
//!     let server = Socket::new();
//!     server.listen("inproc://greeter").await?;
//!
//!     let client = Socket::new();
//!     client.dial("inproc://greeter").await?;
//!     client.send(&b"hello"[..]).await?;
//!
//!     let request = server.recv_msg().await?;
//!     server.send_to(request.source().clone(), &b"HELLO"[..]).await?;
//!     Ok(())
//! }
//! ```

#![deny(unsafe_code)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::future_not_send)] // single-threaded runtime by design

pub mod connector;
pub mod pipe;
pub mod receiver;
pub mod sender;
pub mod socket;
pub mod transport;

pub use connector::{Connector, Dialer, Listener, PipeEvent, PipeEventHandler};
pub use pipe::Pipe;
pub use receiver::Receiver;
pub use sender::Sender;
pub use socket::Socket;

pub use manifold_core::endpoint::{ConnectAction, SocketAddress};
pub use manifold_core::error::{ManifoldError, Result};
pub use manifold_core::message::{
    Message, MsgHeader, MsgPath, SendType, DEFAULT_MSG_TTL, MSG_FLAG_CONTROL, MSG_FLAG_INTERNAL,
    MSG_FLAG_RAW,
};
pub use manifold_core::options::{
    ConnectorOptions, DialerOptions, PipeOptions, ReceiverOptions, SenderOptions, SocketOptions,
};
