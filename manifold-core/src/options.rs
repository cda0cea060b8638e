//! Strongly-typed configuration records.
//!
//! Each component takes its options at construction; there is no runtime
//! option registry. Endpoint addresses may override a recognized subset per
//! dial/listen via query parameters (see `apply_param` on the records).

use std::time::Duration;

/// Default hop budget for messages built by the sender.
pub const DEFAULT_TTL: u8 = 16;
/// Default per-pipe outbound queue capacity.
pub const DEFAULT_SEND_QUEUE_SIZE: u16 = 8;
/// Default shared inbound queue capacity.
pub const DEFAULT_RECV_QUEUE_SIZE: u16 = 64;
/// Default staging buffer size for raw pipe reads.
pub const DEFAULT_RAW_RECV_BUF_SIZE: usize = 4 * 1024;
/// Default initial redial delay.
pub const DEFAULT_MIN_RECONNECT_INTERVAL: Duration = Duration::from_millis(100);
/// Default redial delay cap.
pub const DEFAULT_MAX_RECONNECT_INTERVAL: Duration = Duration::from_secs(30);

/// Dialer behavior.
#[derive(Debug, Clone)]
pub struct DialerOptions {
    /// Redial when an established pipe is lost.
    pub reconnect: bool,
    /// Initial redial delay.
    pub min_reconnect_interval: Duration,
    /// Redial delay cap. Zero means no cap.
    pub max_reconnect_interval: Duration,
    /// Return from `dial` immediately and connect in the background.
    pub dial_async: bool,
}

impl Default for DialerOptions {
    fn default() -> Self {
        Self {
            reconnect: true,
            min_reconnect_interval: DEFAULT_MIN_RECONNECT_INTERVAL,
            max_reconnect_interval: DEFAULT_MAX_RECONNECT_INTERVAL,
            dial_async: false,
        }
    }
}

impl DialerOptions {
    pub fn with_reconnect(mut self, reconnect: bool) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_min_reconnect_interval(mut self, interval: Duration) -> Self {
        self.min_reconnect_interval = interval;
        self
    }

    pub fn with_max_reconnect_interval(mut self, interval: Duration) -> Self {
        self.max_reconnect_interval = interval;
        self
    }

    pub fn with_dial_async(mut self, dial_async: bool) -> Self {
        self.dial_async = dial_async;
        self
    }

    /// Apply an endpoint query override. Durations are in milliseconds.
    /// Returns whether the key was recognized.
    pub fn apply_param(&mut self, key: &str, value: &str) -> bool {
        match key {
            "reconnect" => parse_bool(value).map(|v| self.reconnect = v).is_some(),
            "minreconntime" => parse_ms(value)
                .map(|v| self.min_reconnect_interval = v)
                .is_some(),
            "maxreconntime" => parse_ms(value)
                .map(|v| self.max_reconnect_interval = v)
                .is_some(),
            "async" => parse_bool(value).map(|v| self.dial_async = v).is_some(),
            _ => false,
        }
    }
}

/// Per-pipe behavior, fixed at pipe creation.
#[derive(Debug, Clone)]
pub struct PipeOptions {
    /// The peer emits opaque byte chunks instead of framed messages.
    pub raw_mode: bool,
    /// Staging buffer size for raw reads.
    pub raw_recv_buf_size: usize,
    /// Close the pipe when the peer shuts down its writing side.
    pub close_on_eof: bool,
}

impl Default for PipeOptions {
    fn default() -> Self {
        Self {
            raw_mode: false,
            raw_recv_buf_size: DEFAULT_RAW_RECV_BUF_SIZE,
            close_on_eof: true,
        }
    }
}

impl PipeOptions {
    pub fn with_raw_mode(mut self, raw: bool) -> Self {
        self.raw_mode = raw;
        self
    }

    pub fn with_raw_recv_buf_size(mut self, size: usize) -> Self {
        self.raw_recv_buf_size = size;
        self
    }

    pub fn with_close_on_eof(mut self, close: bool) -> Self {
        self.close_on_eof = close;
        self
    }

    /// Apply an endpoint query override. Returns whether the key was
    /// recognized.
    pub fn apply_param(&mut self, key: &str, value: &str) -> bool {
        match key {
            "rawmode" => parse_bool(value).map(|v| self.raw_mode = v).is_some(),
            "rawrecvbufsize" => value
                .parse::<usize>()
                .ok()
                .filter(|v| *v > 0)
                .map(|v| self.raw_recv_buf_size = v)
                .is_some(),
            "closeoneof" => parse_bool(value).map(|v| self.close_on_eof = v).is_some(),
            _ => false,
        }
    }
}

/// Connector-wide behavior.
#[derive(Debug, Clone)]
pub struct ConnectorOptions {
    /// Cap on simultaneously open pipes; negative means unlimited.
    pub pipe_limit: i32,
    /// Defaults for dialers created by this connector.
    pub dialer: DialerOptions,
    /// Defaults for pipes created by this connector.
    pub pipe: PipeOptions,
}

impl Default for ConnectorOptions {
    fn default() -> Self {
        Self {
            pipe_limit: -1,
            dialer: DialerOptions::default(),
            pipe: PipeOptions::default(),
        }
    }
}

impl ConnectorOptions {
    pub fn with_pipe_limit(mut self, limit: i32) -> Self {
        self.pipe_limit = limit;
        self
    }

    pub fn with_dialer(mut self, dialer: DialerOptions) -> Self {
        self.dialer = dialer;
        self
    }

    pub fn with_pipe(mut self, pipe: PipeOptions) -> Self {
        self.pipe = pipe;
        self
    }
}

/// Sender behavior.
#[derive(Debug, Clone)]
pub struct SenderOptions {
    /// Hop budget stamped on messages this sender originates.
    pub ttl: u8,
    /// Per-pipe outbound queue capacity.
    pub send_queue_size: u16,
    /// Drop instead of blocking when a queue is full or no pipe is attached.
    pub best_effort: bool,
    /// Bound on how long a blocking send may wait.
    pub send_timeout: Option<Duration>,
}

impl Default for SenderOptions {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            send_queue_size: DEFAULT_SEND_QUEUE_SIZE,
            best_effort: false,
            send_timeout: None,
        }
    }
}

impl SenderOptions {
    pub fn with_ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_send_queue_size(mut self, size: u16) -> Self {
        self.send_queue_size = size;
        self
    }

    pub fn with_best_effort(mut self, best_effort: bool) -> Self {
        self.best_effort = best_effort;
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = Some(timeout);
        self
    }
}

/// Receiver behavior.
#[derive(Debug, Clone)]
pub struct ReceiverOptions {
    /// Shared inbound queue capacity.
    pub recv_queue_size: u16,
    /// Bound on how long `recv_msg` may wait.
    pub recv_timeout: Option<Duration>,
    /// Discard every inbound message.
    pub no_recv: bool,
    /// Reject frames whose content exceeds this many bytes; zero means
    /// unlimited.
    pub max_recv_content_length: u32,
}

impl Default for ReceiverOptions {
    fn default() -> Self {
        Self {
            recv_queue_size: DEFAULT_RECV_QUEUE_SIZE,
            recv_timeout: None,
            no_recv: false,
            max_recv_content_length: 0,
        }
    }
}

impl ReceiverOptions {
    pub fn with_recv_queue_size(mut self, size: u16) -> Self {
        self.recv_queue_size = size;
        self
    }

    pub fn with_recv_timeout(mut self, timeout: Duration) -> Self {
        self.recv_timeout = Some(timeout);
        self
    }

    pub fn with_no_recv(mut self, no_recv: bool) -> Self {
        self.no_recv = no_recv;
        self
    }

    pub fn with_max_recv_content_length(mut self, max: u32) -> Self {
        self.max_recv_content_length = max;
        self
    }
}

/// Options for a whole socket: one connector, one sender, one receiver.
#[derive(Debug, Clone, Default)]
pub struct SocketOptions {
    pub connector: ConnectorOptions,
    pub sender: SenderOptions,
    pub receiver: ReceiverOptions,
}

impl SocketOptions {
    pub fn with_connector(mut self, connector: ConnectorOptions) -> Self {
        self.connector = connector;
        self
    }

    pub fn with_sender(mut self, sender: SenderOptions) -> Self {
        self.sender = sender;
        self
    }

    pub fn with_receiver(mut self, receiver: ReceiverOptions) -> Self {
        self.receiver = receiver;
        self
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "" | "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

fn parse_ms(value: &str) -> Option<Duration> {
    value.parse::<u64>().ok().map(Duration::from_millis)
}
