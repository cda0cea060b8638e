//! Outbound routing.
//!
//! The sender keeps one bounded queue per pipe, served by a per-pipe worker
//! that encodes frames and writes them out. Routing picks the queue(s):
//! to-one rotates over the pipe set, to-all duplicates onto every queue,
//! to-dest follows the tail of the message's destination path. A full queue
//! blocks the caller unless best-effort is set; no pipe at all blocks a
//! to-one send until the connector produces one.

use crate::connector::{Connector, PipeEvent, PipeEventHandler};
use crate::pipe::Pipe;
use bytes::Bytes;
use manifold_core::error::{ManifoldError, Result};
use manifold_core::message::{Message, MsgPath, SendType};
use manifold_core::options::SenderOptions;
use manifold_core::signal::CloseSignal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Routes outgoing messages over the pipes of attached connectors. Cheap to
/// clone.
#[derive(Clone)]
pub struct Sender {
    core: Arc<SenderCore>,
}

impl Default for Sender {
    fn default() -> Self {
        Self::new()
    }
}

struct SenderCore {
    opts: SenderOptions,
    state: Mutex<SenderState>,
    // One-slot wakeup for senders parked on an empty pipe set.
    wake_tx: flume::Sender<()>,
    wake_rx: flume::Receiver<()>,
    closedq: CloseSignal,
}

#[derive(Default)]
struct SenderState {
    queues: HashMap<u32, flume::Sender<Message>>,
    order: Vec<u32>,
    cursor: usize,
    connectors: Vec<Connector>,
    closed: bool,
}

impl Sender {
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(SenderOptions::default())
    }

    #[must_use]
    pub fn with_options(opts: SenderOptions) -> Self {
        let (wake_tx, wake_rx) = flume::bounded(1);
        let core = Arc::new(SenderCore {
            opts,
            state: Mutex::new(SenderState::default()),
            wake_tx,
            wake_rx,
            closedq: CloseSignal::new(),
        });
        Self { core }
    }

    /// Subscribe to `connector`'s pipes.
    pub fn attach_connector(&self, connector: &Connector) {
        self.core
            .lock_state()
            .connectors
            .push(connector.clone());
        connector.register_pipe_event_handler(self.core.clone());
    }

    /// Initiative send: deliver `content` via any one pipe.
    pub async fn send(&self, content: impl Into<Bytes>) -> Result<()> {
        let msg = Message::new_send(
            SendType::ToOne,
            MsgPath::empty(),
            0,
            self.core.opts.ttl,
            content,
        );
        self.core.send_msg(msg).await
    }

    /// Reply send: deliver `content` back along `source`.
    pub async fn send_to(&self, source: MsgPath, content: impl Into<Bytes>) -> Result<()> {
        let msg = Message::new_send(SendType::ToDest, source, 0, self.core.opts.ttl, content);
        self.core.send_msg(msg).await
    }

    /// Forward send: route an already-built message by its own send type.
    pub async fn send_msg(&self, msg: Message) -> Result<()> {
        self.core.send_msg(msg).await
    }

    /// Detach from connectors and wake every parked sender. Idempotent.
    pub fn close(&self) {
        let connectors = {
            let mut st = self.core.lock_state();
            if st.closed {
                return;
            }
            st.closed = true;
            st.queues.clear();
            st.order.clear();
            std::mem::take(&mut st.connectors)
        };
        self.core.closedq.close();
        let handler: Arc<dyn PipeEventHandler> = self.core.clone();
        for connector in connectors {
            connector.unregister_pipe_event_handler(&handler);
        }
    }
}

impl SenderCore {
    fn lock_state(&self) -> MutexGuard<'_, SenderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn send_msg(&self, msg: Message) -> Result<()> {
        if self.closedq.is_closed() {
            return Err(ManifoldError::Closed);
        }
        let Some(send_type) = SendType::from_flags(msg.header.flags) else {
            return Err(ManifoldError::InvalidSendType(msg.header.send_type()));
        };
        match self.opts.send_timeout {
            Some(timeout) => {
                match compio::time::timeout(timeout, self.route(send_type, msg)).await {
                    Ok(res) => res,
                    Err(_) => Err(ManifoldError::Timeout),
                }
            }
            None => self.route(send_type, msg).await,
        }
    }

    async fn route(&self, send_type: SendType, msg: Message) -> Result<()> {
        match send_type {
            SendType::ToOne => self.send_to_one(msg).await,
            SendType::ToAll => self.send_to_all(msg).await,
            SendType::ToDest => self.send_to_dest(msg).await,
        }
    }

    async fn send_to_one(&self, mut msg: Message) -> Result<()> {
        loop {
            let picked = {
                let mut st = self.lock_state();
                if st.order.is_empty() {
                    None
                } else {
                    if st.cursor >= st.order.len() {
                        st.cursor = 0;
                    }
                    let id = st.order[st.cursor];
                    st.cursor += 1;
                    st.queues.get(&id).cloned()
                }
            };
            let Some(queue) = picked else {
                if self.opts.best_effort {
                    // fire-and-forget with nothing to carry it
                    return Ok(());
                }
                match self.closedq.guard(self.wake_rx.recv_async()).await {
                    Some(Ok(())) => {
                        // pass the wakeup on in case more senders are parked
                        let _ = self.wake_tx.try_send(());
                        continue;
                    }
                    _ => return Err(ManifoldError::Closed),
                }
            };
            match self.enqueue(&queue, msg).await? {
                None => return Ok(()),
                // that pipe vanished under us; rotate to another
                Some(back) => msg = back,
            }
        }
    }

    async fn send_to_all(&self, msg: Message) -> Result<()> {
        let queues: Vec<flume::Sender<Message>> = {
            let st = self.lock_state();
            st.order
                .iter()
                .filter_map(|id| st.queues.get(id).cloned())
                .collect()
        };
        for queue in queues {
            // a queue that disconnected mid-broadcast is just a pipe that left
            let _ = self.enqueue(&queue, msg.dup()).await?;
        }
        Ok(())
    }

    async fn send_to_dest(&self, msg: Message) -> Result<()> {
        let Some(id) = msg.destination().cur_id() else {
            return Err(ManifoldError::BadDestination);
        };
        let picked = {
            let st = self.lock_state();
            st.queues.get(&id).cloned()
        };
        let Some(queue) = picked else {
            return Err(ManifoldError::BadDestination);
        };

        if self.opts.best_effort {
            return match queue.try_send(msg) {
                Ok(()) => Ok(()),
                // a dropped reply is actionable, unlike a dropped broadcast
                Err(flume::TrySendError::Full(_)) => Err(ManifoldError::MsgDropped),
                Err(flume::TrySendError::Disconnected(_)) => Err(ManifoldError::BadDestination),
            };
        }
        match self.closedq.guard(queue.send_async(msg)).await {
            None => Err(ManifoldError::Closed),
            Some(Ok(())) => Ok(()),
            Some(Err(_)) => Err(ManifoldError::BadDestination),
        }
    }

    /// Put `msg` on a pipe queue.
    ///
    /// `Ok(None)` means delivered (or dropped under best-effort);
    /// `Ok(Some(msg))` hands the message back because the queue disconnected.
    async fn enqueue(
        &self,
        queue: &flume::Sender<Message>,
        msg: Message,
    ) -> Result<Option<Message>> {
        if self.opts.best_effort {
            return match queue.try_send(msg) {
                Ok(()) | Err(flume::TrySendError::Full(_)) => Ok(None),
                Err(flume::TrySendError::Disconnected(back)) => Ok(Some(back)),
            };
        }
        match self.closedq.guard(queue.send_async(msg)).await {
            None => Err(ManifoldError::Closed),
            Some(Ok(())) => Ok(None),
            Some(Err(flume::SendError(back))) => Ok(Some(back)),
        }
    }

    fn add_pipe(&self, pipe: &Arc<Pipe>) {
        let (tx, rx) = flume::bounded(usize::from(self.opts.send_queue_size));
        {
            let mut st = self.lock_state();
            if st.closed {
                return;
            }
            st.queues.insert(pipe.id(), tx);
            st.order.push(pipe.id());
        }
        let _ = self.wake_tx.try_send(());
        let pipe = pipe.clone();
        compio::runtime::spawn(async move {
            pipe_send_loop(pipe, rx).await;
        })
        .detach();
    }

    fn remove_pipe(&self, id: u32) {
        let mut st = self.lock_state();
        st.queues.remove(&id);
        if let Some(pos) = st.order.iter().position(|other| *other == id) {
            st.order.remove(pos);
            if st.cursor > pos {
                st.cursor -= 1;
            }
        }
    }
}

impl PipeEventHandler for SenderCore {
    fn handle_pipe_event(&self, event: PipeEvent, pipe: &Arc<Pipe>) {
        match event {
            PipeEvent::Add => self.add_pipe(pipe),
            PipeEvent::Remove => self.remove_pipe(pipe.id()),
        }
    }
}

/// Per-pipe worker: drain the queue, encode, write.
async fn pipe_send_loop(pipe: Arc<Pipe>, queue: flume::Receiver<Message>) {
    tracing::debug!(id = pipe.id(), raw = pipe.is_raw(), "send loop started");
    while let Ok(msg) = queue.recv_async().await {
        let frame = if pipe.is_raw() {
            // raw peers get content verbatim; sentinels carry nothing
            match msg.into_content() {
                Some(content) if !content.is_empty() => content,
                _ => continue,
            }
        } else {
            msg.encode()
        };
        if pipe.send(frame).await.is_err() {
            // the pipe closed itself; whatever is still queued goes with it
            break;
        }
    }
    tracing::debug!(id = pipe.id(), "send loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    #[test]
    fn invalid_send_type_is_rejected() {
        let sender = Sender::new();
        let mut msg = Message::new_send(SendType::ToOne, MsgPath::empty(), 0, 16, &b"x"[..]);
        msg.header.flags = 0x03;
        let err = block_on(sender.send_msg(msg));
        assert!(matches!(err, Err(ManifoldError::InvalidSendType(3))));
    }

    #[test]
    fn best_effort_send_without_pipes_drops_silently() {
        let sender = Sender::with_options(SenderOptions::default().with_best_effort(true));
        assert!(block_on(sender.send(&b"nowhere"[..])).is_ok());
    }

    #[test]
    fn reply_without_destination_pipe_fails() {
        let sender = Sender::new();
        let err = block_on(sender.send_to(MsgPath::from_ids(&[12]), &b"late"[..]));
        assert!(matches!(err, Err(ManifoldError::BadDestination)));

        let err = block_on(sender.send_to(MsgPath::empty(), &b"no path"[..]));
        assert!(matches!(err, Err(ManifoldError::BadDestination)));
    }

    #[test]
    fn send_after_close_is_closed() {
        let sender = Sender::new();
        sender.close();
        sender.close(); // idempotent
        let err = block_on(sender.send(&b"x"[..]));
        assert!(matches!(err, Err(ManifoldError::Closed)));
    }
}
