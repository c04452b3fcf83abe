//! Client identity and teardown reasons.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identity of a connected client, unique for the lifetime of a display.
///
/// Ids are assigned in accept order starting at 1 and never reused, so
/// they double as a stable arena key for per-client bookkeeping.
///
/// # Examples
///
/// ```
/// use westfield_types::ClientId;
///
/// let id = ClientId::new(7);
/// assert_eq!(id.as_u32(), 7);
/// assert_eq!(id.to_string(), "client#7");
/// assert_eq!("client#7".parse::<ClientId>().unwrap(), id);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(u32);

impl ClientId {
    /// Creates a client id from its raw value.
    pub const fn new(id: u32) -> Self {
        ClientId(id)
    }

    /// Returns the raw id.
    pub const fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client#{}", self.0)
    }
}

impl FromStr for ClientId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("client#").unwrap_or(s);
        digits
            .parse::<u32>()
            .map(ClientId)
            .map_err(|_| ParseError::InvalidClientId(s.to_string()))
    }
}

impl From<ClientId> for u32 {
    fn from(id: ClientId) -> u32 {
        id.0
    }
}

/// Why a client is being destroyed.
///
/// Delivered to destroy listeners so teardown code can tell a peer
/// hang-up from an explicit destroy or a display-wide shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// The peer closed its end of the socket.
    PeerClosed,
    /// The application asked for the client to be destroyed.
    Destroyed,
    /// The owning display is shutting down.
    DisplayTeardown,
    /// Reading or writing the socket failed.
    ConnectionError,
    /// Inbound bytes exceeded the buffer limit without being consumed.
    BufferOverflow,
    /// Consumption accounting went out of sync with the buffered input.
    ProtocolError,
}

impl DisconnectReason {
    /// Returns true if the teardown was requested by this side rather
    /// than caused by the peer or a transport failure.
    pub const fn is_local(&self) -> bool {
        matches!(
            self,
            DisconnectReason::Destroyed | DisconnectReason::DisplayTeardown
        )
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DisconnectReason::PeerClosed => "peer closed",
            DisconnectReason::Destroyed => "destroyed",
            DisconnectReason::DisplayTeardown => "display teardown",
            DisconnectReason::ConnectionError => "connection error",
            DisconnectReason::BufferOverflow => "buffer overflow",
            DisconnectReason::ProtocolError => "protocol error",
        };
        write!(f, "{}", s)
    }
}
