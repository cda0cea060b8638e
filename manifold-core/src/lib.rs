//! Manifold Core
//!
//! Runtime-agnostic building blocks for the manifold messaging substrate:
//! - Framed wire message with source/destination path tracking (`message`, `codec`)
//! - Chunk reassembly buffer for stream transports (`buffer`)
//! - Size-classed byte buffer pool (`bytespool`)
//! - Recyclable pipe identifier generator (`id`)
//! - Endpoint address parsing with dial/listen fragments (`endpoint`)
//! - Strongly-typed configuration records (`options`)
//! - Reconnection backoff state (`reconnect`)
//! - Close signalling primitive (`signal`)
//! - Error types (`error`)
//!
//! Nothing in this crate touches an async runtime; the `manifold` crate
//! supplies the transports and workers on top of these pieces.

#![deny(unsafe_code)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::return_self_not_must_use)] // Builder patterns are self-documenting
#![allow(clippy::missing_errors_doc)]

pub mod buffer;
pub mod bytespool;
pub mod codec;
pub mod endpoint;
pub mod error;
pub mod id;
pub mod message;
pub mod options;
pub mod reconnect;
pub mod signal;

// Small prelude for downstream crates; kept minimal to avoid API lock-in.
pub mod prelude {
    pub use crate::buffer::ChunkBuffer;
    pub use crate::codec::MsgDecoder;
    pub use crate::endpoint::{ConnectAction, SocketAddress};
    pub use crate::error::{ManifoldError, Result};
    pub use crate::id::RecyclableIdGenerator;
    pub use crate::message::{Message, MsgHeader, MsgPath, SendType};
    pub use crate::options::{
        ConnectorOptions, DialerOptions, PipeOptions, ReceiverOptions, SenderOptions,
        SocketOptions,
    };
    pub use crate::reconnect::ReconnectState;
    pub use crate::signal::CloseSignal;
}
