//! Inbound connection management: the accept loop.

use super::ConnectorCore;
use crate::transport::TransportListener;
use manifold_core::error::{ManifoldError, Result};
use manifold_core::options::PipeOptions;
use manifold_core::signal::CloseSignal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Breather after a transient accept failure, so a bad socket cannot pin a
/// core.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Handle to a listener owned by a connector.
pub struct Listener {
    core: Arc<ListenerCore>,
}

impl Listener {
    pub(crate) fn new(core: Arc<ListenerCore>) -> Self {
        Self { core }
    }

    /// Bind the address and start the background accept loop.
    pub async fn listen(&self) -> Result<()> {
        self.core.listen().await
    }

    pub fn local_address(&self) -> String {
        self.core.tl.local_address()
    }

    /// Stop accepting for good. Idempotent.
    pub fn close(&self) {
        self.core.close();
    }
}

pub(crate) struct ListenerCore {
    me: Weak<ListenerCore>,
    parent: Weak<ConnectorCore>,
    tl: Box<dyn TransportListener>,
    pipe_opts: PipeOptions,
    // Admission control: while stopped, accepted connections are turned away.
    stopped: AtomicBool,
    // Set once the accept loop is running.
    serving: AtomicBool,
    closedq: CloseSignal,
}

impl ListenerCore {
    pub(crate) fn new(
        parent: Weak<ConnectorCore>,
        tl: Box<dyn TransportListener>,
        pipe_opts: PipeOptions,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            parent,
            tl,
            pipe_opts,
            stopped: AtomicBool::new(false),
            serving: AtomicBool::new(false),
            closedq: CloseSignal::new(),
        })
    }

    async fn listen(&self) -> Result<()> {
        if self.closedq.is_closed() {
            return Err(ManifoldError::Closed);
        }
        if self.serving.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Err(err) = self.tl.listen().await {
            self.serving.store(false, Ordering::Release);
            return Err(err);
        }
        tracing::debug!(address = %self.tl.local_address(), "listening");

        let Some(core) = self.me.upgrade() else {
            return Err(ManifoldError::Closed);
        };
        compio::runtime::spawn(async move {
            core.serve().await;
        })
        .detach();
        Ok(())
    }

    /// Accept until the listener or its transport closes.
    async fn serve(&self) {
        loop {
            let accepted = match self.closedq.guard(self.tl.accept()).await {
                Some(accepted) => accepted,
                None => break,
            };
            match accepted {
                Ok(conn) => {
                    if self.stopped.load(Ordering::Acquire) {
                        // Over the pipe limit: turn the connection away.
                        conn.shutdown();
                        continue;
                    }
                    match self.parent.upgrade() {
                        Some(parent) => {
                            if let Some(me) = self.me.upgrade() {
                                parent.add_pipe(conn, None, Some(&me), &self.pipe_opts);
                            }
                        }
                        None => break,
                    }
                }
                Err(ManifoldError::Closed | ManifoldError::NotListening) => break,
                Err(err) => {
                    tracing::debug!(error = %err, "accept failed");
                    compio::time::sleep(ACCEPT_RETRY_DELAY).await;
                }
            }
        }
        tracing::debug!(address = %self.tl.local_address(), "accept loop stopped");
    }

    pub(crate) fn start(&self) {
        self.stopped.store(false, Ordering::Release);
    }

    pub(crate) fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub(crate) fn close(&self) {
        if self.closedq.close() {
            self.tl.close();
        }
    }
}
