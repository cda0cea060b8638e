//! The socket facade: one connector, one sender, one receiver.

use crate::connector::Connector;
use crate::receiver::Receiver;
use crate::sender::Sender;
use bytes::Bytes;
use manifold_core::endpoint::{ConnectAction, SocketAddress};
use manifold_core::error::{ManifoldError, Result};
use manifold_core::message::{Message, MsgPath};
use manifold_core::options::SocketOptions;

/// A logical endpoint federating any number of pipes behind a uniform
/// send/receive interface.
pub struct Socket {
    connector: Connector,
    sender: Sender,
    receiver: Receiver,
}

impl Default for Socket {
    fn default() -> Self {
        Self::new()
    }
}

impl Socket {
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(SocketOptions::default())
    }

    #[must_use]
    pub fn with_options(opts: SocketOptions) -> Self {
        let connector = Connector::with_options(opts.connector);
        let sender = Sender::with_options(opts.sender);
        let receiver = Receiver::with_options(opts.receiver);
        sender.attach_connector(&connector);
        receiver.attach_connector(&connector);
        Self {
            connector,
            sender,
            receiver,
        }
    }

    /// Assemble a socket from parts, for callers that share or customize
    /// them. The sender and receiver are attached to the connector here.
    #[must_use]
    pub fn from_parts(connector: Connector, sender: Sender, receiver: Receiver) -> Self {
        sender.attach_connector(&connector);
        receiver.attach_connector(&connector);
        Self {
            connector,
            sender,
            receiver,
        }
    }

    #[must_use]
    pub fn connector(&self) -> &Connector {
        &self.connector
    }

    #[must_use]
    pub fn sender(&self) -> &Sender {
        &self.sender
    }

    #[must_use]
    pub fn receiver(&self) -> &Receiver {
        &self.receiver
    }

    /// Connect `addr` according to its `#dial`/`#listen` fragment.
    pub async fn connect(&self, addr: &str) -> Result<()> {
        let address = SocketAddress::parse(addr)?;
        match address.action() {
            Some(ConnectAction::Dial) => self.dial(addr).await,
            Some(ConnectAction::Listen) => self.listen(addr).await,
            None => Err(ManifoldError::BadAddress(format!(
                "connect type missing in {addr}"
            ))),
        }
    }

    pub async fn dial(&self, addr: &str) -> Result<()> {
        self.connector.dial(addr).await
    }

    pub async fn listen(&self, addr: &str) -> Result<()> {
        self.connector.listen(addr).await
    }

    /// Initiative send via any one pipe.
    pub async fn send(&self, content: impl Into<Bytes>) -> Result<()> {
        self.sender.send(content).await
    }

    /// Reply send back along a received source path.
    pub async fn send_to(&self, source: MsgPath, content: impl Into<Bytes>) -> Result<()> {
        self.sender.send_to(source, content).await
    }

    /// Forward send of an already-built message.
    pub async fn send_msg(&self, msg: Message) -> Result<()> {
        self.sender.send_msg(msg).await
    }

    pub async fn recv_msg(&self) -> Result<Message> {
        self.receiver.recv_msg().await
    }

    pub async fn recv(&self) -> Result<Bytes> {
        self.receiver.recv().await
    }

    /// Close sender, receiver and connector, in that order.
    ///
    /// Returns `Closed` on every call after the first.
    pub fn close(&self) -> Result<()> {
        self.sender.close();
        self.receiver.close();
        self.connector.close()
    }
}
