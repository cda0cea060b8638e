//! Inbound fan-in.
//!
//! One receive worker per pipe reads frames (or raw chunks), applies the
//! routing bookkeeping through the codec and offers the result to a single
//! shared delivery queue. `recv_msg` drains that queue, honoring the
//! configured timeout and close. Per-pipe order is preserved; across pipes
//! the queue is whatever interleaving arrival produced.

use crate::connector::{Connector, PipeEvent, PipeEventHandler};
use crate::pipe::Pipe;
use bytes::Bytes;
use manifold_core::buffer::ChunkBuffer;
use manifold_core::codec::MsgDecoder;
use manifold_core::error::{ManifoldError, Result};
use manifold_core::message::{Message, INTERNAL_MSG_CLOSE_PEER, MSG_FLAG_INTERNAL};
use manifold_core::options::ReceiverOptions;
use manifold_core::signal::CloseSignal;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Funnels messages from every pipe of the attached connectors into one
/// delivery queue. Cheap to clone.
#[derive(Clone)]
pub struct Receiver {
    core: Arc<ReceiverCore>,
}

impl Default for Receiver {
    fn default() -> Self {
        Self::new()
    }
}

struct ReceiverCore {
    me: Weak<ReceiverCore>,
    opts: ReceiverOptions,
    recvq_tx: flume::Sender<Message>,
    recvq_rx: flume::Receiver<Message>,
    state: Mutex<RecvState>,
    closedq: CloseSignal,
}

#[derive(Default)]
struct RecvState {
    pipes: HashSet<u32>,
    connectors: Vec<Connector>,
    closed: bool,
}

impl Receiver {
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(ReceiverOptions::default())
    }

    #[must_use]
    pub fn with_options(opts: ReceiverOptions) -> Self {
        let (recvq_tx, recvq_rx) = flume::bounded(usize::from(opts.recv_queue_size));
        Self {
            core: Arc::new_cyclic(|me| ReceiverCore {
                me: me.clone(),
                opts,
                recvq_tx,
                recvq_rx,
                state: Mutex::new(RecvState::default()),
                closedq: CloseSignal::new(),
            }),
        }
    }

    /// Subscribe to `connector`'s pipes.
    pub fn attach_connector(&self, connector: &Connector) {
        self.core
            .lock_state()
            .connectors
            .push(connector.clone());
        connector.register_pipe_event_handler(self.core.clone());
    }

    /// Receive the next message.
    ///
    /// Blocks until a message arrives, the configured `recv_timeout` elapses
    /// (`Timeout`), or the receiver closes (`Closed`). A message that shows
    /// up after a timeout stays queued for the next call.
    pub async fn recv_msg(&self) -> Result<Message> {
        let core = &self.core;
        if core.closedq.is_closed() {
            return Err(ManifoldError::Closed);
        }
        match core.opts.recv_timeout {
            Some(timeout) => {
                match compio::time::timeout(timeout, core.pop()).await {
                    Ok(res) => res,
                    Err(_) => Err(ManifoldError::Timeout),
                }
            }
            None => core.pop().await,
        }
    }

    /// Receive the next message's content.
    pub async fn recv(&self) -> Result<Bytes> {
        let msg = self.recv_msg().await?;
        Ok(msg.into_content().unwrap_or_else(Bytes::new))
    }

    /// Detach from connectors and wake every blocked receive. Idempotent.
    pub fn close(&self) {
        let connectors = {
            let mut st = self.core.lock_state();
            if st.closed {
                return;
            }
            st.closed = true;
            st.pipes.clear();
            std::mem::take(&mut st.connectors)
        };
        self.core.closedq.close();
        let handler: Arc<dyn PipeEventHandler> = self.core.clone();
        for connector in connectors {
            connector.unregister_pipe_event_handler(&handler);
        }
    }
}

impl ReceiverCore {
    fn lock_state(&self) -> MutexGuard<'_, RecvState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn pop(&self) -> Result<Message> {
        match self.closedq.guard(self.recvq_rx.recv_async()).await {
            Some(Ok(msg)) => Ok(msg),
            _ => Err(ManifoldError::Closed),
        }
    }

    /// Offer a message to the delivery queue.
    ///
    /// Returns `false` when the receiver is closing and the worker should
    /// wind down.
    async fn deliver(&self, msg: Message) -> bool {
        matches!(
            self.closedq.guard(self.recvq_tx.send_async(msg)).await,
            Some(Ok(()))
        )
    }

    /// Handle one decoded message inside a receive worker.
    ///
    /// Returns `false` to stop the worker.
    async fn process(&self, msg: Message, pipe: &Pipe) -> bool {
        if self.opts.no_recv {
            return true;
        }
        if msg.header.has_flags(MSG_FLAG_INTERNAL) {
            // close-peer is the only internal message defined
            if msg.content().first() == Some(&INTERNAL_MSG_CLOSE_PEER) {
                tracing::debug!(id = pipe.id(), "peer asked to close");
                pipe.close();
                return false;
            }
            return true;
        }
        self.deliver(msg).await
    }

    fn add_pipe(&self, pipe: &Arc<Pipe>) {
        {
            let mut st = self.lock_state();
            if st.closed {
                return;
            }
            st.pipes.insert(pipe.id());
        }
        let Some(core) = self.me.upgrade() else { return };
        let pipe = pipe.clone();
        compio::runtime::spawn(async move {
            if pipe.is_raw() {
                raw_recv_loop(&core, &pipe).await;
            } else {
                framed_recv_loop(&core, &pipe).await;
            }
        })
        .detach();
    }

    fn remove_pipe(&self, id: u32) {
        self.lock_state().pipes.remove(&id);
    }
}

impl PipeEventHandler for ReceiverCore {
    fn handle_pipe_event(&self, event: PipeEvent, pipe: &Arc<Pipe>) {
        match event {
            PipeEvent::Add => self.add_pipe(pipe),
            PipeEvent::Remove => self.remove_pipe(pipe.id()),
        }
    }
}

/// Worker for a framed pipe: run the incremental decoder over its chunks.
async fn framed_recv_loop(core: &ReceiverCore, pipe: &Arc<Pipe>) {
    tracing::debug!(id = pipe.id(), raw = false, "receive loop started");
    let mut buf = ChunkBuffer::new();
    let mut decoder = MsgDecoder::new(pipe.id(), core.opts.max_recv_content_length);
    loop {
        match decoder.decode(&mut buf) {
            Ok(Some(msg)) => {
                if !core.process(msg, pipe).await {
                    break;
                }
            }
            Ok(None) => match pipe.recv_chunk().await {
                Ok(chunk) => buf.push(chunk),
                Err(_) => break,
            },
            Err(err) => {
                tracing::debug!(id = pipe.id(), error = %err, "bad frame; closing pipe");
                break;
            }
        }
    }
    pipe.close();
    core.remove_pipe(pipe.id());
    tracing::debug!(id = pipe.id(), raw = false, "receive loop stopped");
}

/// Worker for a raw pipe: every chunk becomes a to-one message.
async fn raw_recv_loop(core: &ReceiverCore, pipe: &Arc<Pipe>) {
    tracing::debug!(id = pipe.id(), raw = true, "receive loop started");

    // Announce the peer with an empty message so upper layers learn about
    // the connection before any payload shows up.
    if !core
        .process(Message::new_raw_recv(pipe.id(), Some(Bytes::new())), pipe)
        .await
    {
        pipe.close();
        core.remove_pipe(pipe.id());
        return;
    }

    let mut saw_eof = false;
    loop {
        match pipe.recv_chunk().await {
            Ok(chunk) => {
                if !core
                    .process(Message::new_raw_recv(pipe.id(), Some(chunk)), pipe)
                    .await
                {
                    break;
                }
            }
            Err(_) => {
                if pipe.is_closed() {
                    // Local close, not the peer hanging up.
                    break;
                }
                // End of stream: hand up the nil-content sentinel.
                saw_eof = true;
                let _ = core
                    .process(Message::new_raw_recv(pipe.id(), None), pipe)
                    .await;
                break;
            }
        }
    }
    if !saw_eof || pipe.close_on_eof() {
        pipe.close();
    }
    core.remove_pipe(pipe.id());
    tracing::debug!(id = pipe.id(), raw = true, "receive loop stopped");
}
