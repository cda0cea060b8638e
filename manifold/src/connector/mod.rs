//! The connector: owns dialers, listeners and the live pipe set.
//!
//! Pipes enter through a successful dial or accept, subject to the pipe
//! limit; admission control pauses every dialer and listener at the limit and
//! resumes them when a pipe goes away. Senders, receivers and user hooks
//! subscribe to pipe add/remove events, which are dispatched synchronously
//! while the connector lock is held — handlers must not block and must not
//! call back into the connector.

mod dialer;
mod listener;

pub use dialer::Dialer;
pub use listener::Listener;

pub(crate) use dialer::DialerCore;
pub(crate) use listener::ListenerCore;

use crate::pipe::Pipe;
use crate::transport::{transport_for_scheme, Connection};
use manifold_core::endpoint::SocketAddress;
use manifold_core::error::{ManifoldError, Result};
use manifold_core::id::RecyclableIdGenerator;
use manifold_core::options::{ConnectorOptions, DialerOptions, PipeOptions};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Pipe lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeEvent {
    Add,
    Remove,
}

/// Subscriber to pipe lifecycle events.
pub trait PipeEventHandler: Send + Sync {
    /// Called synchronously with the connector lock held. Record the pipe,
    /// hand work to your own tasks, and return.
    fn handle_pipe_event(&self, event: PipeEvent, pipe: &Arc<Pipe>);
}

/// Manages connections for one socket. Cheap to clone.
#[derive(Clone)]
pub struct Connector {
    core: Arc<ConnectorCore>,
}

impl Default for Connector {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) struct ConnectorCore {
    me: Weak<ConnectorCore>,
    opts: ConnectorOptions,
    ids: Arc<RecyclableIdGenerator>,
    state: Mutex<ConnectorState>,
}

#[derive(Default)]
struct ConnectorState {
    dialers: Vec<Arc<DialerCore>>,
    listeners: Vec<Arc<ListenerCore>>,
    pipes: HashMap<u32, Arc<Pipe>>,
    handlers: Vec<Arc<dyn PipeEventHandler>>,
    closed: bool,
}

impl Connector {
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(ConnectorOptions::default())
    }

    #[must_use]
    pub fn with_options(opts: ConnectorOptions) -> Self {
        let core = Arc::new_cyclic(|me| ConnectorCore {
            me: me.clone(),
            opts,
            ids: Arc::new(RecyclableIdGenerator::new()),
            state: Mutex::new(ConnectorState::default()),
        });
        Self { core }
    }

    /// Dial `addr` with the connector's default dialer options.
    pub async fn dial(&self, addr: &str) -> Result<()> {
        self.new_dialer(addr)?.dial().await
    }

    /// Dial `addr` with explicit dialer options.
    pub async fn dial_with(&self, addr: &str, opts: DialerOptions) -> Result<()> {
        self.new_dialer_with(addr, opts)?.dial().await
    }

    pub fn new_dialer(&self, addr: &str) -> Result<Dialer> {
        self.new_dialer_with(addr, self.core.opts.dialer.clone())
    }

    /// Create a dialer without dialing yet. Address query parameters
    /// override the passed options.
    pub fn new_dialer_with(&self, addr: &str, opts: DialerOptions) -> Result<Dialer> {
        let address = SocketAddress::parse(addr)?;
        let mut dialer_opts = opts;
        let mut pipe_opts = self.core.opts.pipe.clone();
        for (key, value) in address.params() {
            let recognized =
                dialer_opts.apply_param(key, value) || pipe_opts.apply_param(key, value);
            if !recognized {
                tracing::debug!(key, value, "ignoring unknown address parameter");
            }
        }

        let transport = transport_for_scheme(address.scheme())?;
        let td = transport.new_dialer(address.bare(), pipe_opts.clone())?;
        let core = DialerCore::new(self.core.me.clone(), td, dialer_opts, pipe_opts);
        {
            let mut st = self.core.lock_state();
            if st.closed {
                return Err(ManifoldError::Closed);
            }
            if self.core.at_limit(&st) {
                core.stop();
            }
            st.dialers.push(core.clone());
        }
        Ok(Dialer::new(core))
    }

    /// Listen on `addr` with the connector's default options.
    pub async fn listen(&self, addr: &str) -> Result<()> {
        self.new_listener(addr)?.listen().await
    }

    /// Create a listener without starting its accept loop yet. Address query
    /// parameters override the connector's pipe options.
    pub fn new_listener(&self, addr: &str) -> Result<Listener> {
        let address = SocketAddress::parse(addr)?;
        let mut pipe_opts = self.core.opts.pipe.clone();
        for (key, value) in address.params() {
            if !pipe_opts.apply_param(key, value) {
                tracing::debug!(key, value, "ignoring unknown address parameter");
            }
        }

        let transport = transport_for_scheme(address.scheme())?;
        let tl = transport.new_listener(address.bare(), pipe_opts.clone())?;
        let core = ListenerCore::new(self.core.me.clone(), tl, pipe_opts);
        {
            let mut st = self.core.lock_state();
            if st.closed {
                return Err(ManifoldError::Closed);
            }
            if self.core.at_limit(&st) {
                core.stop();
            }
            st.listeners.push(core.clone());
        }
        Ok(Listener::new(core))
    }

    pub fn register_pipe_event_handler(&self, handler: Arc<dyn PipeEventHandler>) {
        self.core.lock_state().handlers.push(handler);
    }

    pub fn unregister_pipe_event_handler(&self, handler: &Arc<dyn PipeEventHandler>) {
        let target = Arc::as_ptr(handler).cast::<()>();
        self.core
            .lock_state()
            .handlers
            .retain(|h| !std::ptr::eq(Arc::as_ptr(h).cast::<()>(), target));
    }

    /// Number of currently open pipes.
    #[must_use]
    pub fn pipe_count(&self) -> usize {
        self.core.lock_state().pipes.len()
    }

    /// Tear down listeners, dialers and pipes, in that order.
    ///
    /// Returns `Closed` on every call after the first.
    pub fn close(&self) -> Result<()> {
        self.core.close()
    }
}

impl ConnectorCore {
    fn lock_state(&self) -> MutexGuard<'_, ConnectorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn at_limit(&self, st: &ConnectorState) -> bool {
        self.opts.pipe_limit >= 0 && st.pipes.len() >= self.opts.pipe_limit as usize
    }

    /// Wrap a fresh connection in a pipe and admit it, or close it on the
    /// spot if the connector is full or already closed.
    pub(crate) fn add_pipe(
        &self,
        conn: Connection,
        dialer: Option<&Arc<DialerCore>>,
        listener: Option<&Arc<ListenerCore>>,
        opts: &PipeOptions,
    ) {
        let pipe = Pipe::new(
            conn,
            self.me.clone(),
            dialer.map(Arc::downgrade),
            listener.map(Arc::downgrade),
            opts,
            self.ids.clone(),
        );
        let rejected = {
            let mut st = self.lock_state();
            if st.closed || self.at_limit(&st) {
                true
            } else {
                st.pipes.insert(pipe.id(), pipe.clone());
                tracing::debug!(id = pipe.id(), total = st.pipes.len(), "pipe added");
                for handler in &st.handlers {
                    handler.handle_pipe_event(PipeEvent::Add, &pipe);
                }
                if self.at_limit(&st) {
                    tracing::debug!("pipe limit reached; pausing connects");
                    for listener in &st.listeners {
                        listener.stop();
                    }
                    for dialer in &st.dialers {
                        dialer.stop();
                    }
                }
                false
            }
        };
        if rejected {
            tracing::debug!(id = pipe.id(), "pipe rejected by admission control");
            pipe.close();
        }
    }

    /// Drop a pipe from the set and let subscribers and its dialer know.
    pub(crate) fn remove_pipe(&self, pipe: &Pipe) {
        {
            let mut st = self.lock_state();
            if let Some(arc) = st.pipes.remove(&pipe.id()) {
                tracing::debug!(id = pipe.id(), total = st.pipes.len(), "pipe removed");
                for handler in &st.handlers {
                    handler.handle_pipe_event(PipeEvent::Remove, &arc);
                }
                if self.opts.pipe_limit >= 0
                    && st.pipes.len() < self.opts.pipe_limit as usize
                {
                    tracing::debug!("below pipe limit; resuming connects");
                    for listener in &st.listeners {
                        listener.start();
                    }
                    for dialer in &st.dialers {
                        dialer.start();
                    }
                }
            }
        }
        // A lost dialer-origin pipe wants a redial, whether or not it ever
        // made it into the set.
        if let Some(dialer) = pipe.dialer() {
            dialer.pipe_closed();
        }
    }

    fn close(&self) -> Result<()> {
        let (listeners, dialers, pipes, handlers) = {
            let mut st = self.lock_state();
            if st.closed {
                return Err(ManifoldError::Closed);
            }
            st.closed = true;
            (
                std::mem::take(&mut st.listeners),
                std::mem::take(&mut st.dialers),
                std::mem::take(&mut st.pipes),
                std::mem::take(&mut st.handlers),
            )
        };
        for listener in listeners {
            listener.close();
        }
        for dialer in dialers {
            dialer.close();
        }
        for pipe in pipes.values() {
            // The pipes were taken out of the set, so closing them will not
            // dispatch; tell the subscribers here instead.
            for handler in &handlers {
                handler.handle_pipe_event(PipeEvent::Remove, pipe);
            }
            pipe.close();
        }
        Ok(())
    }
}
