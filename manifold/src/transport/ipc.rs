//! IPC transport via Unix domain sockets.

use super::stream::{socket_closer, start_stream_connection};
use super::{map_io_err, Connection, Transport, TransportDialer, TransportListener};
use async_trait::async_trait;
use compio::net::{UnixListener, UnixStream};
use manifold_core::error::{ManifoldError, Result};
use manifold_core::options::PipeOptions;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

const READ_BUF_SIZE: usize = 8 * 1024;

pub struct IpcTransport;

impl Transport for IpcTransport {
    fn scheme(&self) -> &'static str {
        "ipc"
    }

    fn new_dialer(&self, addr: &str, opts: PipeOptions) -> Result<Box<dyn TransportDialer>> {
        Ok(Box::new(IpcDialer {
            path: addr.to_string(),
            opts,
        }))
    }

    fn new_listener(&self, addr: &str, opts: PipeOptions) -> Result<Box<dyn TransportListener>> {
        Ok(Box::new(IpcListener {
            path: addr.to_string(),
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

struct IpcDialer {
    path: String,
    opts: PipeOptions,
}

#[async_trait(?Send)]
impl TransportDialer for IpcDialer {
    async fn dial(&self) -> Result<Connection> {
        let stream = UnixStream::connect(&self.path).await.map_err(map_io_err)?;
        let closer = socket_closer(stream.clone());
        Ok(start_stream_connection(
            stream,
            read_buf_size(&self.opts),
            format!("ipc://{}.dialer", self.path),
            format!("ipc://{}", self.path),
            Some(closer),
        ))
    }
}

struct IpcListener {
    path: String,
    opts: PipeOptions,
    inner: Mutex<Option<Arc<UnixListener>>>,
    closed: AtomicBool,
}

impl IpcListener {
    fn listener(&self) -> Option<Arc<UnixListener>> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait(?Send)]
impl TransportListener for IpcListener {
    async fn listen(&self) -> Result<()> {
        // A previous run may have left the socket file behind.
        let path = std::path::Path::new(&self.path);
        if path.exists() {
            std::fs::remove_file(path).map_err(ManifoldError::Io)?;
        }
        let listener = UnixListener::bind(&self.path).await.map_err(map_io_err)?;
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(listener));
        Ok(())
    }

    async fn accept(&self) -> Result<Connection> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ManifoldError::Closed);
        }
        let listener = self.listener().ok_or(ManifoldError::NotListening)?;
        match listener.accept().await {
            Ok((stream, _peer)) => {
                let closer = socket_closer(stream.clone());
                Ok(start_stream_connection(
                    stream,
                    read_buf_size(&self.opts),
                    format!("ipc://{}", self.path),
                    format!("ipc://{}.dialer", self.path),
                    Some(closer),
                ))
            }
            Err(_) if self.closed.load(Ordering::Acquire) => Err(ManifoldError::Closed),
            Err(err) => Err(map_io_err(err)),
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        #[allow(unsafe_code)]
        if let Some(listener) = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            use std::os::unix::io::{AsRawFd, FromRawFd};
            let sock = unsafe { socket2::Socket::from_raw_fd(listener.as_raw_fd()) };
            let _ = sock.shutdown(std::net::Shutdown::Both);
            std::mem::forget(sock);
        }
        let _ = std::fs::remove_file(&self.path);
    }

    fn local_address(&self) -> String {
        format!("ipc://{}", self.path)
    }
}
