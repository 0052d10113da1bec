//! Application protocols that can be negotiated over ALPN.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Application protocol spoken on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Protocol {
    /// HTTP/1.1 ("http/1.1"). Always supported, the fallback for everything.
    #[default]
    Http1_1,
    /// HTTP/2 ("h2").
    Http2,
    /// SPDY/3.1 ("spdy/3.1").
    Spdy3,
}

impl Protocol {
    /// ALPN protocol identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http1_1 => "http/1.1",
            Self::Http2 => "h2",
            Self::Spdy3 => "spdy/3.1",
        }
    }

    /// ALPN identifier as raw bytes.
    pub fn alpn_id(&self) -> &'static [u8] {
        self.as_str().as_bytes()
    }

    /// Map an ALPN identifier back to a protocol.
    pub fn from_alpn(id: &[u8]) -> Option<Self> {
        match id {
            b"http/1.1" => Some(Self::Http1_1),
            b"h2" => Some(Self::Http2),
            b"spdy/3.1" => Some(Self::Spdy3),
            _ => None,
        }
    }

    pub(crate) fn to_u8(self) -> u8 {
        match self {
            Self::Http1_1 => 1,
            Self::Http2 => 2,
            Self::Spdy3 => 3,
        }
    }

    pub(crate) fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Http1_1),
            2 => Some(Self::Http2),
            3 => Some(Self::Spdy3),
            _ => None,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_alpn(s.trim().to_ascii_lowercase().as_bytes())
            .ok_or_else(|| Error::http_protocol(format!("Unknown protocol: {}", s)))
    }
}

/// Build the protocol offer list for a negotiation policy.
///
/// HTTP/1.1 always comes first and is always present; HTTP/2 and SPDY/3.1
/// follow when enabled.
pub fn offered_protocols(prefer_http2: bool, prefer_spdy: bool) -> Vec<Protocol> {
    let mut protocols = vec![Protocol::Http1_1];
    if prefer_http2 {
        protocols.push(Protocol::Http2);
    }
    if prefer_spdy {
        protocols.push(Protocol::Spdy3);
    }
    protocols
}

/// Encode a protocol list in ALPN wire format (length-prefixed identifiers).
pub fn encode_alpn(protocols: &[Protocol]) -> Vec<u8> {
    let mut wire = Vec::with_capacity(protocols.len() * 9);
    for protocol in protocols {
        let id = protocol.alpn_id();
        wire.push(id.len() as u8);
        wire.extend_from_slice(id);
    }
    wire
}

/// Resolve the protocol for a connection from the server's ALPN choice.
///
/// Anything the server picked that we did not offer, or no choice at all,
/// resolves to HTTP/1.1.
pub fn select(offered: &[Protocol], server_choice: Option<&[u8]>) -> Protocol {
    server_choice
        .and_then(Protocol::from_alpn)
        .filter(|p| offered.contains(p))
        .unwrap_or(Protocol::Http1_1)
}
