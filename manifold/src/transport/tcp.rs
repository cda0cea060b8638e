//! TCP transport.

use super::stream::{socket_closer, start_stream_connection};
use super::{map_io_err, Connection, Transport, TransportDialer, TransportListener};
use async_trait::async_trait;
use manifold_core::error::{ManifoldError, Result};
use manifold_core::options::PipeOptions;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Read staging size for framed pipes; raw pipes read at their configured
/// raw buffer size instead.
const READ_BUF_SIZE: usize = 8 * 1024;

pub struct TcpTransport;

impl Transport for TcpTransport {
    fn scheme(&self) -> &'static str {
        "tcp"
    }

    fn new_dialer(&self, addr: &str, opts: PipeOptions) -> Result<Box<dyn TransportDialer>> {
        Ok(Box::new(TcpDialer {
            addr: addr.to_string(),
            opts,
        }))
    }

    fn new_listener(&self, addr: &str, opts: PipeOptions) -> Result<Box<dyn TransportListener>> {
        Ok(Box::new(TcpListener {
            addr: addr.to_string(),
            opts,
            inner: Mutex::new(None),
            closed: AtomicBool::new(false),
        }))
    }
}

fn read_buf_size(opts: &PipeOptions) -> usize {
    if opts.raw_mode {
        opts.raw_recv_buf_size
    } else {
        READ_BUF_SIZE
    }
}

/// Disable Nagle's algorithm; request-reply traffic wants the latency.
fn enable_nodelay(stream: &compio::net::TcpStream) -> io::Result<()> {
    #![allow(unsafe_code)]
    #[cfg(unix)]
    {
        use std::os::unix::io::{AsRawFd, FromRawFd};
        let fd = stream.as_raw_fd();
        let sock = unsafe { socket2::Socket::from_raw_fd(fd) };
        let res = sock.set_nodelay(true);
        std::mem::forget(sock);
        res
    }
    #[cfg(windows)]
    {
        use std::os::windows::io::{AsRawSocket, FromRawSocket};
        let raw = stream.as_raw_socket();
        let sock = unsafe { socket2::Socket::from_raw_socket(raw) };
        let res = sock.set_nodelay(true);
        std::mem::forget(sock);
        res
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = stream;
        Ok(())
    }
}

fn wrap_stream(stream: compio::net::TcpStream, opts: &PipeOptions) -> Result<Connection> {
    if let Err(err) = enable_nodelay(&stream) {
        tracing::debug!(error = %err, "could not set TCP_NODELAY");
    }
    let local = stream.local_addr().map_err(map_io_err)?;
    let remote = stream.peer_addr().map_err(map_io_err)?;
    let closer = socket_closer(stream.clone());

    Ok(start_stream_connection(
        stream,
        read_buf_size(opts),
        format!("tcp://{local}"),
        format!("tcp://{remote}"),
        Some(closer),
    ))
}

struct TcpDialer {
    addr: String,
    opts: PipeOptions,
}

#[async_trait(?Send)]
impl TransportDialer for TcpDialer {
    async fn dial(&self) -> Result<Connection> {
        let stream = compio::net::TcpStream::connect(self.addr.as_str())
            .await
            .map_err(map_io_err)?;
        wrap_stream(stream, &self.opts)
    }
}

struct TcpListener {
    addr: String,
    opts: PipeOptions,
    inner: Mutex<Option<Arc<compio::net::TcpListener>>>,
    closed: AtomicBool,
}

impl TcpListener {
    fn listener(&self) -> Option<Arc<compio::net::TcpListener>> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait(?Send)]
impl TransportListener for TcpListener {
    async fn listen(&self) -> Result<()> {
        let listener = compio::net::TcpListener::bind(self.addr.as_str())
            .await
            .map_err(map_io_err)?;
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(listener));
        Ok(())
    }

    async fn accept(&self) -> Result<Connection> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ManifoldError::Closed);
        }
        let listener = self.listener().ok_or(ManifoldError::NotListening)?;
        match listener.accept().await {
            Ok((stream, _peer)) => wrap_stream(stream, &self.opts),
            Err(_) if self.closed.load(Ordering::Acquire) => Err(ManifoldError::Closed),
            Err(err) => Err(map_io_err(err)),
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        // Shutting the socket down wakes a parked accept with an error.
        #[allow(unsafe_code)]
        if let Some(listener) = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            #[cfg(unix)]
            {
                use std::os::unix::io::{AsRawFd, FromRawFd};
                let sock = unsafe { socket2::Socket::from_raw_fd(listener.as_raw_fd()) };
                let _ = sock.shutdown(std::net::Shutdown::Both);
                std::mem::forget(sock);
            }
            #[cfg(windows)]
            {
                use std::os::windows::io::{AsRawSocket, FromRawSocket};
                let sock = unsafe { socket2::Socket::from_raw_socket(listener.as_raw_socket()) };
                let _ = sock.shutdown(std::net::Shutdown::Both);
                std::mem::forget(sock);
            }
        }
    }

    fn local_address(&self) -> String {
        match self.listener().and_then(|l| l.local_addr().ok()) {
            Some(addr) => format!("tcp://{addr}"),
            None => format!("tcp://{}", self.addr),
        }
    }
}
