//! The pipe: one transport connection wrapped with the bookkeeping the
//! socket needs.
//!
//! A pipe owns a stable non-zero ID for its lifetime, knows which dialer or
//! listener it came from, and mediates framed (or raw) byte flow for the
//! sender and receiver workers. Any send or receive error closes the pipe;
//! close removes it from the connector and recycles the ID last, once
//! everything else has let go.

use crate::connector::{ConnectorCore, DialerCore, ListenerCore};
use crate::transport::Connection;
use bytes::Bytes;
use manifold_core::error::{ManifoldError, Result};
use manifold_core::id::RecyclableIdGenerator;
use manifold_core::options::PipeOptions;
use manifold_core::signal::CloseSignal;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};

const STATE_OPEN: u8 = 0;
const STATE_CLOSING: u8 = 1;
const STATE_CLOSED: u8 = 2;

#[derive(Debug)]
pub struct Pipe {
    id: u32,
    conn: Connection,
    parent: Weak<ConnectorCore>,
    dialer: Option<Weak<DialerCore>>,
    listener: Option<Weak<ListenerCore>>,
    raw: bool,
    close_on_eof: bool,
    state: AtomicU8,
    closedq: CloseSignal,
    ids: Arc<RecyclableIdGenerator>,
}

impl Pipe {
    pub(crate) fn new(
        conn: Connection,
        parent: Weak<ConnectorCore>,
        dialer: Option<Weak<DialerCore>>,
        listener: Option<Weak<ListenerCore>>,
        opts: &PipeOptions,
        ids: Arc<RecyclableIdGenerator>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: ids.next_id(),
            conn,
            parent,
            dialer,
            listener,
            raw: opts.raw_mode,
            close_on_eof: opts.close_on_eof,
            state: AtomicU8::new(STATE_OPEN),
            closedq: CloseSignal::new(),
            ids,
        })
    }

    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[must_use]
    pub fn local_address(&self) -> String {
        self.conn.local_address().to_string()
    }

    #[must_use]
    pub fn remote_address(&self) -> String {
        self.conn.remote_address().to_string()
    }

    /// Whether the peer speaks raw byte chunks instead of framed messages.
    #[must_use]
    pub fn is_raw(&self) -> bool {
        self.raw
    }

    #[must_use]
    pub fn is_dialer_origin(&self) -> bool {
        self.dialer.is_some()
    }

    #[must_use]
    pub fn is_listener_origin(&self) -> bool {
        self.listener.is_some()
    }

    pub(crate) fn close_on_eof(&self) -> bool {
        self.close_on_eof
    }

    pub(crate) fn dialer(&self) -> Option<Arc<DialerCore>> {
        self.dialer.as_ref().and_then(Weak::upgrade)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.load(Ordering::Acquire) != STATE_OPEN
    }

    /// Write one already-encoded frame (or raw bytes) to the peer.
    ///
    /// Any error closes the pipe before it is returned.
    pub async fn send(&self, frame: Bytes) -> Result<()> {
        if self.is_closed() {
            return Err(ManifoldError::Closed);
        }
        let res = match self.closedq.guard(self.conn.send_chunk(frame)).await {
            Some(res) => res,
            None => Err(ManifoldError::Closed),
        };
        if res.is_err() {
            self.close();
        }
        res
    }

    /// Read the next chunk from the peer.
    ///
    /// Fails with `Closed` on any error, including end-of-stream. Closing is
    /// left to the receive worker: a raw worker has to tell end-of-stream
    /// apart from a local close before it tears the pipe down.
    pub(crate) async fn recv_chunk(&self) -> Result<Bytes> {
        if self.is_closed() {
            return Err(ManifoldError::Closed);
        }
        match self.closedq.guard(self.conn.recv_chunk()).await {
            Some(res) => res,
            None => Err(ManifoldError::Closed),
        }
    }

    /// Close the pipe: tear down the transport link, remove it from the
    /// connector, then recycle the ID. Idempotent; concurrent callers lose
    /// the race and return immediately.
    pub fn close(&self) {
        if self
            .state
            .compare_exchange(STATE_OPEN, STATE_CLOSING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        tracing::debug!(id = self.id, "closing pipe");

        self.closedq.close();
        self.conn.shutdown();
        if let Some(parent) = self.parent.upgrade() {
            parent.remove_pipe(self);
        }
        self.state.store(STATE_CLOSED, Ordering::Release);

        // The ID stays reserved until everything else is torn down.
        self.ids.recycle(self.id);
    }
}
