//! Pump tasks bridging a byte stream to connection channels.
//!
//! One connection, two detached tasks: the read pump moves kernel bytes into
//! the inbound chunk channel, the write pump drains the outbound channel into
//! the kernel. Either pump exits on error or end-of-stream; channel
//! disconnection propagates the teardown to the other side and to the pipe
//! workers above.

#![allow(unsafe_code)] // IoBuf impl and fd-level shutdown

use super::Connection;
use bytes::Bytes;
use compio::buf::BufResult;
use compio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use manifold_core::bytespool;
use std::sync::Arc;

/// Chunks buffered between a pump and the pipe workers, per direction.
const CHUNK_QUEUE_DEPTH: usize = 8;

/// Zero-copy `IoBuf` wrapper so `Bytes` can be handed to compio writes
/// without an intermediate `Vec`.
struct IoBytes(Bytes);

// SAFETY: Bytes is immutable, refcounted and contiguous, so exposing its
// pointer/length for the duration of the write upholds the IoBuf contract.
unsafe impl compio::buf::IoBuf for IoBytes {
    #[inline]
    fn as_buf_ptr(&self) -> *const u8 {
        self.0.as_ptr()
    }

    #[inline]
    fn buf_len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    fn buf_capacity(&self) -> usize {
        self.0.len()
    }
}

/// Spawn the pumps for `stream` and wrap the channel ends as a `Connection`.
///
/// `closer` is invoked to abort the underlying link when the connection shuts
/// down (or when a write fails while the read side is still parked).
pub(crate) fn start_stream_connection<S>(
    stream: S,
    read_buf_size: usize,
    local_address: String,
    remote_address: String,
    closer: Option<Arc<dyn Fn() + Send + Sync>>,
) -> Connection
where
    S: AsyncRead + AsyncWrite + Clone + 'static,
{
    let (in_tx, in_rx) = flume::bounded::<Bytes>(CHUNK_QUEUE_DEPTH);
    let (out_tx, out_rx) = flume::bounded::<Bytes>(CHUNK_QUEUE_DEPTH);

    let mut reader = stream.clone();
    compio::runtime::spawn(async move {
        loop {
            let staging = bytespool::alloc(read_buf_size);
            let BufResult(res, staging) = reader.read(staging).await;
            match res {
                Ok(0) => {
                    bytespool::free(staging);
                    break;
                }
                Ok(n) => {
                    let chunk = Bytes::copy_from_slice(&staging[..n]);
                    bytespool::free(staging);
                    if in_tx.send_async(chunk).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    tracing::trace!(error = %err, "stream read ended");
                    bytespool::free(staging);
                    break;
                }
            }
        }
    })
    .detach();

    let mut writer = stream;
    let write_closer = closer.clone();
    compio::runtime::spawn(async move {
        while let Ok(chunk) = out_rx.recv_async().await {
            let BufResult(res, _) = writer.write_all(IoBytes(chunk)).await;
            if let Err(err) = res {
                tracing::trace!(error = %err, "stream write failed");
                // Abort the read side too; the link is unusable.
                if let Some(closer) = &write_closer {
                    closer();
                }
                break;
            }
        }
    })
    .detach();

    let conn = Connection::new(in_rx, out_tx, local_address, remote_address);
    match closer {
        Some(closer) => conn.with_closer(closer),
        None => conn,
    }
}

/// Shutdown hook over a socket handle.
///
/// The closure owns `handle`, keeping the descriptor alive for as long as the
/// hook exists; each call borrows it for one `shutdown` and forgets the
/// wrapper so the handle is not closed out from under its owner.
#[cfg(unix)]
pub(crate) fn socket_closer<T>(handle: T) -> Arc<dyn Fn() + Send + Sync>
where
    T: std::os::unix::io::AsRawFd + Send + Sync + 'static,
{
    Arc::new(move || {
        use std::os::unix::io::FromRawFd;
        let sock = unsafe { socket2::Socket::from_raw_fd(handle.as_raw_fd()) };
        let _ = sock.shutdown(std::net::Shutdown::Both);
        std::mem::forget(sock);
    })
}

#[cfg(windows)]
pub(crate) fn socket_closer<T>(handle: T) -> Arc<dyn Fn() + Send + Sync>
where
    T: std::os::windows::io::AsRawSocket + Send + Sync + 'static,
{
    Arc::new(move || {
        use std::os::windows::io::FromRawSocket;
        let sock = unsafe { socket2::Socket::from_raw_socket(handle.as_raw_socket()) };
        let _ = sock.shutdown(std::net::Shutdown::Both);
        std::mem::forget(sock);
    })
}
