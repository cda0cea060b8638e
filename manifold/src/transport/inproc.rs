//! In-process transport.
//!
//! Connections inside one process skip the kernel entirely: the two
//! endpoints' chunk channels are cross-wired, so a send on one side is a
//! receive on the other. Listeners live in a process-wide registry keyed by
//! name; dialing hands the listener its half of the channel pair through an
//! accept queue.

use super::{Connection, Transport, TransportDialer, TransportListener};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use manifold_core::error::{ManifoldError, Result};
use manifold_core::options::PipeOptions;
use once_cell::sync::Lazy;
use std::sync::{Mutex, PoisonError};

/// Chunks in flight per direction before a sender blocks.
const CHUNK_QUEUE_DEPTH: usize = 16;
/// Accepted-but-not-yet-collected connections per listener.
const ACCEPT_QUEUE_DEPTH: usize = 8;

/// Who is listening, on which name.
static LISTENERS: Lazy<DashMap<String, flume::Sender<Connection>>> = Lazy::new(DashMap::new);

pub struct InprocTransport;

impl Transport for InprocTransport {
    fn scheme(&self) -> &'static str {
        "inproc"
    }

    fn new_dialer(&self, addr: &str, _opts: PipeOptions) -> Result<Box<dyn TransportDialer>> {
        if addr.is_empty() {
            return Err(ManifoldError::BadAddress(
                "inproc name cannot be empty".to_string(),
            ));
        }
        Ok(Box::new(InprocDialer {
            name: addr.to_string(),
        }))
    }

    fn new_listener(&self, addr: &str, _opts: PipeOptions) -> Result<Box<dyn TransportListener>> {
        if addr.is_empty() {
            return Err(ManifoldError::BadAddress(
                "inproc name cannot be empty".to_string(),
            ));
        }
        Ok(Box::new(InprocListener {
            name: addr.to_string(),
            accepts: Mutex::new(None),
        }))
    }
}

/// Build the two cross-wired connections for one inproc link.
fn connection_pair(name: &str) -> (Connection, Connection) {
    let (to_listener_tx, to_listener_rx) = flume::bounded::<Bytes>(CHUNK_QUEUE_DEPTH);
    let (to_dialer_tx, to_dialer_rx) = flume::bounded::<Bytes>(CHUNK_QUEUE_DEPTH);

    let listener_addr = format!("inproc://{name}");
    let dialer_addr = format!("inproc://{name}.dialer");

    let dialer_conn = Connection::new(
        to_dialer_rx,
        to_listener_tx,
        dialer_addr.clone(),
        listener_addr.clone(),
    );
    let listener_conn = Connection::new(to_listener_rx, to_dialer_tx, listener_addr, dialer_addr);
    (dialer_conn, listener_conn)
}

struct InprocDialer {
    name: String,
}

#[async_trait(?Send)]
impl TransportDialer for InprocDialer {
    async fn dial(&self) -> Result<Connection> {
        // Nobody bound, nobody home.
        let accepts = match LISTENERS.get(&self.name) {
            Some(entry) => entry.value().clone(),
            None => return Err(ManifoldError::ConnectionRefused),
        };

        let (dialer_conn, listener_conn) = connection_pair(&self.name);
        accepts
            .send_async(listener_conn)
            .await
            .map_err(|_| ManifoldError::ConnectionRefused)?;
        Ok(dialer_conn)
    }
}

struct InprocListener {
    name: String,
    accepts: Mutex<Option<flume::Receiver<Connection>>>,
}

#[async_trait(?Send)]
impl TransportListener for InprocListener {
    async fn listen(&self) -> Result<()> {
        let mut slot = self.accepts.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Ok(());
        }
        let (tx, rx) = flume::bounded(ACCEPT_QUEUE_DEPTH);
        match LISTENERS.entry(self.name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(ManifoldError::AddressInUse)
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(tx);
            }
        }
        *slot = Some(rx);
        Ok(())
    }

    async fn accept(&self) -> Result<Connection> {
        let accepts = self
            .accepts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(ManifoldError::NotListening)?;
        accepts.recv_async().await.map_err(|_| ManifoldError::Closed)
    }

    fn close(&self) {
        // Dropping the registry entry disconnects dialers and pending accepts.
        if self
            .accepts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
        {
            LISTENERS.remove(&self.name);
        }
    }

    fn local_address(&self) -> String {
        format!("inproc://{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_bind_is_rejected() {
        let transport = InprocTransport;
        let first = transport
            .new_listener("bind-twice", PipeOptions::default())
            .expect("listener");
        let second = transport
            .new_listener("bind-twice", PipeOptions::default())
            .expect("listener");

        futures::executor::block_on(async {
            first.listen().await.expect("first bind");
            assert!(matches!(
                second.listen().await,
                Err(ManifoldError::AddressInUse)
            ));
        });
        first.close();
    }

    #[test]
    fn dial_without_listener_is_refused() {
        let transport = InprocTransport;
        let dialer = transport
            .new_dialer("nobody-home", PipeOptions::default())
            .expect("dialer");
        let err = futures::executor::block_on(dialer.dial());
        assert!(matches!(err, Err(ManifoldError::ConnectionRefused)));
    }

    #[test]
    fn chunks_cross_the_link() {
        let transport = InprocTransport;
        let listener = transport
            .new_listener("ping", PipeOptions::default())
            .expect("listener");
        let dialer = transport
            .new_dialer("ping", PipeOptions::default())
            .expect("dialer");

        futures::executor::block_on(async {
            listener.listen().await.expect("bind");
            let client = dialer.dial().await.expect("dial");
            let server = listener.accept().await.expect("accept");

            client
                .send_chunk(Bytes::from_static(b"ping"))
                .await
                .expect("send");
            assert_eq!(server.recv_chunk().await.expect("recv").as_ref(), b"ping");

            server
                .send_chunk(Bytes::from_static(b"pong"))
                .await
                .expect("send");
            assert_eq!(client.recv_chunk().await.expect("recv").as_ref(), b"pong");

            // Shutdown surfaces as end-of-stream on the far side.
            client.shutdown();
            assert!(server.recv_chunk().await.is_err());
        });
        listener.close();
        listener.close(); // idempotent
    }

    #[test]
    fn close_unblocks_accept_and_frees_the_name() {
        let transport = InprocTransport;
        let listener = transport
            .new_listener("reusable", PipeOptions::default())
            .expect("listener");
        futures::executor::block_on(listener.listen()).expect("bind");
        listener.close();

        let again = transport
            .new_listener("reusable", PipeOptions::default())
            .expect("listener");
        futures::executor::block_on(again.listen()).expect("rebind after close");
        again.close();
    }
}
