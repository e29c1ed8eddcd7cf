//! Wire messages.
//!
//! Everything is UTF-8 JSON. Handshakes go out as binary frames; rendezvous
//! messages as text frames. Both sides accept either.

use serde::{Deserialize, Serialize};

/// Maximum frame size (1MB). Neither protocol carries anything close to it.
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Handshake exchanged right after a dial.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeMessage {
    /// Always "handshake"
    #[serde(rename = "type")]
    pub msg_type: String,

    /// Sender's peer ID (16 hex chars)
    #[serde(rename = "peerId")]
    pub peer_id: String,

    /// "client" for the dialing side, "server" for the answering side
    pub role: String,
}

impl HandshakeMessage {
    pub fn new(peer_id: &str, role: &str) -> Self {
        Self {
            msg_type: "handshake".to_string(),
            peer_id: peer_id.to_string(),
            role: role.to_string(),
        }
    }

    /// Serialize to UTF-8 JSON bytes.
    pub fn to_binary(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Parse a handshake. None if `data` is not a JSON handshake.
    pub fn from_binary(data: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(data).ok()?;
        let msg: Self = serde_json::from_str(text).ok()?;
        if msg.msg_type == "handshake" {
            Some(msg)
        } else {
            None
        }
    }
}

/// Messages spoken with a rendezvous service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RendezvousMessage {
    /// Ask for peers advertising under `tag`.
    Discover { tag: String },
    /// One candidate, as a `<endpoint>/p2p/<peer-id>` string.
    Peer { address: String },
    /// No more candidates for this request.
    End,
}

impl RendezvousMessage {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        serde_json::from_slice(data).ok()
    }
}
