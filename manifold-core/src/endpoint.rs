//! Endpoint address parsing.
//!
//! Addresses take the form `scheme://address[?key=value&...][#dial|#listen]`.
//! The fragment selects a connect action for `connect`-style entry points;
//! the query carries per-endpoint option overrides that the connector applies
//! to its typed option records.

use crate::error::{ManifoldError, Result};
use std::fmt;
use std::str::FromStr;

/// How an address wants to be connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectAction {
    Dial,
    Listen,
}

/// A parsed endpoint address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketAddress {
    raw: String,
    scheme: String,
    bare: String,
    action: Option<ConnectAction>,
    params: Vec<(String, String)>,
}

impl SocketAddress {
    /// Parse an address string.
    ///
    /// # Examples
    ///
    /// ```
    /// use manifold_core::endpoint::{ConnectAction, SocketAddress};
    ///
    /// let addr = SocketAddress::parse("tcp://127.0.0.1:5555#dial").unwrap();
    /// assert_eq!(addr.scheme(), "tcp");
    /// assert_eq!(addr.bare(), "127.0.0.1:5555");
    /// assert_eq!(addr.action(), Some(ConnectAction::Dial));
    ///
    /// let addr = SocketAddress::parse("inproc://box?rawmode=true").unwrap();
    /// assert_eq!(addr.params(), [("rawmode".to_string(), "true".to_string())]);
    /// ```
    pub fn parse(s: &str) -> Result<Self> {
        s.parse()
    }

    /// The original string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The transport scheme.
    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// The address with scheme, query and fragment stripped.
    #[must_use]
    pub fn bare(&self) -> &str {
        &self.bare
    }

    /// The connect action from the `#dial`/`#listen` fragment, if present.
    #[must_use]
    pub const fn action(&self) -> Option<ConnectAction> {
        self.action
    }

    /// Option overrides from the query string, in order of appearance.
    #[must_use]
    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }
}

impl FromStr for SocketAddress {
    type Err = ManifoldError;

    fn from_str(s: &str) -> Result<Self> {
        let (head, fragment) = match s.split_once('#') {
            Some((head, fragment)) => (head, Some(fragment)),
            None => (s, None),
        };
        let action = match fragment {
            None | Some("") => None,
            Some("dial") => Some(ConnectAction::Dial),
            Some("listen") => Some(ConnectAction::Listen),
            Some(other) => {
                return Err(ManifoldError::BadAddress(format!(
                    "unknown connect type '{other}' in {s}"
                )))
            }
        };

        let (head, query) = match head.split_once('?') {
            Some((head, query)) => (head, Some(query)),
            None => (head, None),
        };

        let Some((scheme, bare)) = head.split_once("://") else {
            return Err(ManifoldError::BadAddress(format!("missing scheme in {s}")));
        };
        if scheme.is_empty() || bare.is_empty() {
            return Err(ManifoldError::BadAddress(s.to_string()));
        }

        let mut params = Vec::new();
        if let Some(query) = query {
            for pair in query.split('&').filter(|p| !p.is_empty()) {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                params.push((key.to_ascii_lowercase(), value.to_string()));
            }
        }

        Ok(Self {
            raw: s.to_string(),
            scheme: scheme.to_string(),
            bare: bare.to_string(),
            action,
            params,
        })
    }
}

impl fmt::Display for SocketAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.bare)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain() {
        let addr = SocketAddress::parse("tcp://127.0.0.1:5555").unwrap();
        assert_eq!(addr.scheme(), "tcp");
        assert_eq!(addr.bare(), "127.0.0.1:5555");
        assert_eq!(addr.action(), None);
        assert!(addr.params().is_empty());
        assert_eq!(addr.to_string(), "tcp://127.0.0.1:5555");
    }

    #[test]
    fn parse_fragment() {
        let dial = SocketAddress::parse("inproc://a#dial").unwrap();
        assert_eq!(dial.action(), Some(ConnectAction::Dial));
        let listen = SocketAddress::parse("inproc://a#listen").unwrap();
        assert_eq!(listen.action(), Some(ConnectAction::Listen));
        assert!(SocketAddress::parse("inproc://a#accept").is_err());
    }

    #[test]
    fn parse_query() {
        let addr =
            SocketAddress::parse("ipc:///tmp/x.sock?rawmode=true&RawRecvBufSize=1024#listen")
                .unwrap();
        assert_eq!(addr.bare(), "/tmp/x.sock");
        assert_eq!(
            addr.params(),
            [
                ("rawmode".to_string(), "true".to_string()),
                ("rawrecvbufsize".to_string(), "1024".to_string()),
            ]
        );
        assert_eq!(addr.action(), Some(ConnectAction::Listen));
    }

    #[test]
    fn reject_malformed() {
        assert!(SocketAddress::parse("127.0.0.1:5555").is_err());
        assert!(SocketAddress::parse("tcp://").is_err());
        assert!(SocketAddress::parse("://addr").is_err());
    }
}
