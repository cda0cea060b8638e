//! Outbound connection management with backoff redial.

use super::ConnectorCore;
use crate::transport::TransportDialer;
use manifold_core::error::{ManifoldError, Result};
use manifold_core::options::{DialerOptions, PipeOptions};
use manifold_core::reconnect::ReconnectState;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

/// Handle to a dialer owned by a connector.
pub struct Dialer {
    core: Arc<DialerCore>,
}

impl Dialer {
    pub(crate) fn new(core: Arc<DialerCore>) -> Self {
        Self { core }
    }

    /// Start dialing. With `dial_async` the call returns at once and the
    /// connection is made (and kept) in the background; otherwise one
    /// synchronous attempt is made and its result returned.
    pub async fn dial(&self) -> Result<()> {
        self.core.dial().await
    }

    /// Stop dialing for good. Idempotent.
    pub fn close(&self) {
        self.core.close();
    }
}

pub(crate) struct DialerCore {
    me: Weak<DialerCore>,
    parent: Weak<ConnectorCore>,
    td: Box<dyn TransportDialer>,
    opts: DialerOptions,
    pipe_opts: PipeOptions,
    state: Mutex<DialState>,
}

struct DialState {
    closed: bool,
    stopped: bool,
    active: bool,
    // At most one dial attempt may be outstanding at any time.
    dialing: bool,
    connected: bool,
    backoff: ReconnectState,
}

impl DialerCore {
    pub(crate) fn new(
        parent: Weak<ConnectorCore>,
        td: Box<dyn TransportDialer>,
        opts: DialerOptions,
        pipe_opts: PipeOptions,
    ) -> Arc<Self> {
        let backoff = ReconnectState::new(&opts);
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            parent,
            td,
            opts,
            pipe_opts,
            state: Mutex::new(DialState {
                closed: false,
                stopped: false,
                active: false,
                dialing: false,
                connected: false,
                backoff,
            }),
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, DialState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) async fn dial(&self) -> Result<()> {
        {
            let mut st = self.lock_state();
            if st.closed {
                return Err(ManifoldError::Closed);
            }
            if st.active {
                return Err(ManifoldError::AddressInUse);
            }
            st.active = true;
            st.backoff.reset();
        }
        if self.opts.dial_async {
            self.schedule_redial(Duration::ZERO);
            return Ok(());
        }
        self.attempt(false).await
    }

    async fn attempt(&self, redial: bool) -> Result<()> {
        {
            let mut st = self.lock_state();
            if st.closed {
                return Err(ManifoldError::Closed);
            }
            if st.stopped {
                // Paused by admission control; start() will resume us.
                return Ok(());
            }
            if st.dialing || st.connected {
                return if redial {
                    Ok(())
                } else {
                    Err(ManifoldError::AddressInUse)
                };
            }
            st.dialing = true;
        }

        match self.td.dial().await {
            Ok(conn) => {
                {
                    let mut st = self.lock_state();
                    st.dialing = false;
                    st.connected = true;
                    st.backoff.reset();
                }
                // Admission may reject the pipe, which flows back through
                // pipe_closed; the connected flag is already set by then.
                if let (Some(parent), Some(me)) = (self.parent.upgrade(), self.me.upgrade()) {
                    parent.add_pipe(conn, Some(&me), None, &self.pipe_opts);
                }
                Ok(())
            }
            Err(err) => {
                let delay = {
                    let mut st = self.lock_state();
                    st.dialing = false;
                    if redial && !st.closed && !st.stopped {
                        Some(st.backoff.advance())
                    } else {
                        None
                    }
                };
                if let Some(delay) = delay {
                    tracing::debug!(error = %err, ?delay, "dial failed; backing off");
                    self.schedule_redial(delay);
                }
                Err(err)
            }
        }
    }

    fn schedule_redial(&self, delay: Duration) {
        let Some(core) = self.me.upgrade() else {
            return;
        };
        compio::runtime::spawn(async move {
            if !delay.is_zero() {
                compio::time::sleep(delay).await;
            }
            let _ = core.attempt(true).await;
        })
        .detach();
    }

    /// The connector lost this dialer's pipe; go back to redialing after a
    /// little delay so a peer that immediately drops us cannot make us spin.
    pub(crate) fn pipe_closed(&self) {
        let delay = {
            let mut st = self.lock_state();
            st.connected = false;
            if st.closed || !st.active || !self.opts.reconnect {
                return;
            }
            st.backoff.current()
        };
        self.schedule_redial(delay);
    }

    /// Resume dialing after an admission-control pause.
    pub(crate) fn start(&self) {
        let delay = {
            let mut st = self.lock_state();
            if !st.stopped || st.closed {
                return;
            }
            st.stopped = false;
            if !st.active || st.connected {
                return;
            }
            st.backoff.current()
        };
        self.schedule_redial(delay);
    }

    /// Pause new dial attempts.
    pub(crate) fn stop(&self) {
        self.lock_state().stopped = true;
    }

    pub(crate) fn close(&self) {
        self.lock_state().closed = true;
    }
}
