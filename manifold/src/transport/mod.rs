//! Transport abstraction.
//!
//! A transport is identified by its URL scheme and manufactures dialers and
//! listeners for addresses under that scheme. Both produce [`Connection`]s: a
//! pair of chunk channels plus addressing metadata. Stream transports bridge
//! their socket to the channels with pump tasks (see [`stream`]); the inproc
//! transport wires the two endpoints' channels to each other directly.
//!
//! Transports register in a process-wide scheme registry. The built-in
//! schemes (`tcp`, `ipc` on unix, `inproc`) register lazily; third-party
//! transports join via [`register_transport`].

pub mod inproc;
mod stream;
pub mod tcp;

#[cfg(unix)]
pub mod ipc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use manifold_core::error::{ManifoldError, Result};
use manifold_core::options::PipeOptions;
use once_cell::sync::Lazy;
use std::fmt;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};

/// A transport scheme implementation.
pub trait Transport: Send + Sync + 'static {
    /// The URL scheme this transport serves.
    fn scheme(&self) -> &'static str;

    /// Build a dialer for `addr` (scheme already stripped).
    fn new_dialer(&self, addr: &str, opts: PipeOptions) -> Result<Box<dyn TransportDialer>>;

    /// Build a listener for `addr` (scheme already stripped).
    fn new_listener(&self, addr: &str, opts: PipeOptions) -> Result<Box<dyn TransportListener>>;
}

/// Produces one connection per call.
#[async_trait(?Send)]
pub trait TransportDialer: Send + Sync {
    async fn dial(&self) -> Result<Connection>;
}

/// Accepts inbound connections.
#[async_trait(?Send)]
pub trait TransportListener: Send + Sync {
    /// Bind the local address. Idempotence is transport-defined; the
    /// connector calls it once.
    async fn listen(&self) -> Result<()>;

    /// Wait for the next inbound connection.
    ///
    /// Fails with `NotListening` before `listen`, `Closed` after `close`.
    async fn accept(&self) -> Result<Connection>;

    /// Stop listening and wake pending accepts.
    fn close(&self);

    fn local_address(&self) -> String;
}

/// One established bidirectional link.
///
/// Inbound bytes arrive as chunks on `chunks`; outbound bytes go down
/// `sink` verbatim. Framing lives entirely above this type.
pub struct Connection {
    chunks: flume::Receiver<Bytes>,
    sink: Mutex<Option<flume::Sender<Bytes>>>,
    closer: Option<Arc<dyn Fn() + Send + Sync>>,
    local_address: String,
    remote_address: String,
}

impl Connection {
    #[must_use]
    pub fn new(
        chunks: flume::Receiver<Bytes>,
        sink: flume::Sender<Bytes>,
        local_address: String,
        remote_address: String,
    ) -> Self {
        Self {
            chunks,
            sink: Mutex::new(Some(sink)),
            closer: None,
            local_address,
            remote_address,
        }
    }

    /// Attach a hook that tears down the underlying link on shutdown.
    #[must_use]
    pub fn with_closer(mut self, closer: Arc<dyn Fn() + Send + Sync>) -> Self {
        self.closer = Some(closer);
        self
    }

    /// Receive the next inbound chunk. Fails with `Closed` on end-of-stream
    /// or when the link is gone.
    pub async fn recv_chunk(&self) -> Result<Bytes> {
        self.chunks
            .recv_async()
            .await
            .map_err(|_| ManifoldError::Closed)
    }

    /// Write bytes to the peer.
    pub async fn send_chunk(&self, chunk: Bytes) -> Result<()> {
        let sink = self
            .sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(ManifoldError::Closed)?;
        sink.send_async(chunk)
            .await
            .map_err(|_| ManifoldError::Closed)
    }

    /// Tear the link down: the peer sees end-of-stream, pending writes are
    /// abandoned. Idempotent.
    pub fn shutdown(&self) {
        let sink = self
            .sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(sink);
        if let Some(closer) = &self.closer {
            closer();
        }
    }

    #[must_use]
    pub fn local_address(&self) -> &str {
        &self.local_address
    }

    #[must_use]
    pub fn remote_address(&self) -> &str {
        &self.remote_address
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("local_address", &self.local_address)
            .field("remote_address", &self.remote_address)
            .finish_non_exhaustive()
    }
}

static TRANSPORTS: Lazy<DashMap<String, Arc<dyn Transport>>> = Lazy::new(|| {
    let transports = DashMap::new();
    insert(&transports, Arc::new(inproc::InprocTransport));
    insert(&transports, Arc::new(tcp::TcpTransport));
    #[cfg(unix)]
    insert(&transports, Arc::new(ipc::IpcTransport));
    transports
});

fn insert(transports: &DashMap<String, Arc<dyn Transport>>, transport: Arc<dyn Transport>) {
    transports.insert(transport.scheme().to_string(), transport);
}

/// Register a transport, replacing any previous one for the same scheme.
pub fn register_transport(transport: Arc<dyn Transport>) {
    insert(&TRANSPORTS, transport);
}

/// Look up the transport serving `scheme`.
pub fn transport_for_scheme(scheme: &str) -> Result<Arc<dyn Transport>> {
    TRANSPORTS
        .get(scheme)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| ManifoldError::BadTransport(scheme.to_string()))
}

/// Map transport-level IO errors onto the named conditions the core
/// understands; everything else stays opaque.
pub(crate) fn map_io_err(err: io::Error) -> ManifoldError {
    match err.kind() {
        io::ErrorKind::ConnectionRefused => ManifoldError::ConnectionRefused,
        io::ErrorKind::AddrInUse => ManifoldError::AddressInUse,
        _ => ManifoldError::Io(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_schemes_resolve() {
        assert!(transport_for_scheme("tcp").is_ok());
        assert!(transport_for_scheme("inproc").is_ok());
        assert!(matches!(
            transport_for_scheme("carrier-pigeon"),
            Err(ManifoldError::BadTransport(_))
        ));
    }

    #[test]
    fn io_error_mapping() {
        let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "no");
        assert!(matches!(
            map_io_err(refused),
            ManifoldError::ConnectionRefused
        ));
        let in_use = io::Error::new(io::ErrorKind::AddrInUse, "taken");
        assert!(matches!(map_io_err(in_use), ManifoldError::AddressInUse));
        let other = io::Error::new(io::ErrorKind::BrokenPipe, "gone");
        assert!(matches!(map_io_err(other), ManifoldError::Io(_)));
    }

    #[test]
    fn connection_send_after_shutdown_is_closed() {
        let (_in_tx, in_rx) = flume::bounded::<Bytes>(1);
        let (out_tx, _out_rx) = flume::bounded::<Bytes>(1);
        let conn = Connection::new(in_rx, out_tx, "a".into(), "b".into());
        conn.shutdown();
        conn.shutdown(); // idempotent
        let err = futures::executor::block_on(conn.send_chunk(Bytes::from_static(b"x")));
        assert!(matches!(err, Err(ManifoldError::Closed)));
    }
}
