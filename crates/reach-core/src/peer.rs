//! Peer identity and routable peer addresses.
//!
//! A `PeerId` wraps a non-zero u64 and displays as a 16-character hex string.
//! A `PeerAddress` pairs an endpoint (e.g. `ws://10.0.0.5:7000`) with the
//! identity expected at that endpoint, written as `<endpoint>/p2p/<peer-id>`.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

/// Separator between the endpoint and the identity in a peer address string.
pub const P2P_SEPARATOR: &str = "/p2p/";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PeerIdError {
    #[error("Invalid peer ID format: expected 16 hex chars")]
    InvalidFormat,
    #[error("Peer ID cannot be zero")]
    Zero,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PeerAddressError {
    #[error("Missing '/p2p/' segment in address: {0}")]
    MissingIdentity(String),
    #[error("Invalid endpoint '{0}': expected scheme://host[:port]")]
    InvalidEndpoint(String),
    #[error("Invalid peer ID in address: {0}")]
    InvalidId(#[from] PeerIdError),
}

/// A unique identifier for a participant in the swarm.
///
/// # Examples
/// ```
/// use reach_core::PeerId;
///
/// let parsed: PeerId = "a1b2c3d4e5f67890".parse().unwrap();
/// assert_eq!(parsed.as_u64(), 0xa1b2c3d4e5f67890);
/// assert_eq!(parsed.to_string(), "a1b2c3d4e5f67890");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(u64);

impl PeerId {
    /// Generate a new random peer ID. Never returns zero.
    pub fn generate() -> Self {
        use rand::Rng;
        loop {
            let id: u64 = rand::rng().random();
            if id != 0 {
                return Self(id);
            }
        }
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Display for PeerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for PeerId {
    type Err = PeerIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 16 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(PeerIdError::InvalidFormat);
        }
        let id = u64::from_str_radix(s, 16).map_err(|_| PeerIdError::InvalidFormat)?;
        if id == 0 {
            return Err(PeerIdError::Zero);
        }
        Ok(Self(id))
    }
}

impl TryFrom<u64> for PeerId {
    type Error = PeerIdError;

    fn try_from(id: u64) -> Result<Self, Self::Error> {
        if id == 0 {
            Err(PeerIdError::Zero)
        } else {
            Ok(Self(id))
        }
    }
}

// Serialize as hex string for consistency in logs and JSON
impl serde::Serialize for PeerId {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for PeerId {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Routable address plus identity of a remote participant.
///
/// Immutable once parsed; cloned freely between tasks.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerAddress {
    id: PeerId,
    endpoint: String,
}

impl PeerAddress {
    pub fn new(id: PeerId, endpoint: impl Into<String>) -> Result<Self, PeerAddressError> {
        let endpoint = endpoint.into();
        validate_endpoint(&endpoint)?;
        Ok(Self { id, endpoint })
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Where to dial, without the identity suffix.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Display for PeerAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.endpoint, P2P_SEPARATOR, self.id)
    }
}

impl FromStr for PeerAddress {
    type Err = PeerAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (endpoint, id) = s
            .rsplit_once(P2P_SEPARATOR)
            .ok_or_else(|| PeerAddressError::MissingIdentity(s.to_string()))?;
        let id: PeerId = id.parse()?;
        Self::new(id, endpoint)
    }
}

impl serde::Serialize for PeerAddress {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for PeerAddress {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

fn validate_endpoint(endpoint: &str) -> Result<(), PeerAddressError> {
    let invalid = || PeerAddressError::InvalidEndpoint(endpoint.to_string());
    let (scheme, rest) = endpoint.split_once("://").ok_or_else(invalid)?;
    if scheme.is_empty() || !scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '+') {
        return Err(invalid());
    }
    let host = rest.split('/').next().unwrap_or_default();
    if host.is_empty() || host.contains(char::is_whitespace) {
        return Err(invalid());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_zero_padded() {
        let peer_id = PeerId::try_from(0xff).unwrap();
        assert_eq!(peer_id.to_string(), "00000000000000ff");
    }

    #[test]
    fn test_parse_uppercase_hex() {
        let peer_id: PeerId = "A1B2C3D4E5F67890".parse().unwrap();
        assert_eq!(peer_id.as_u64(), 0xa1b2c3d4e5f67890);
    }

    #[test]
    fn test_peer_id_rejects_zero_and_bad_length() {
        assert_eq!("0000000000000000".parse::<PeerId>(), Err(PeerIdError::Zero));
        assert!("a1b2c3d4e5f6789".parse::<PeerId>().is_err());
        assert!("ghijklmnopqrstuv".parse::<PeerId>().is_err());
        assert!("".parse::<PeerId>().is_err());
    }

    #[test]
    fn test_generate_not_zero() {
        for _ in 0..1000 {
            assert_ne!(PeerId::generate().as_u64(), 0);
        }
    }

    #[test]
    fn test_parse_peer_address() {
        let addr: PeerAddress = "ws://10.0.0.5:7000/p2p/a1b2c3d4e5f67890".parse().unwrap();
        assert_eq!(addr.endpoint(), "ws://10.0.0.5:7000");
        assert_eq!(addr.id().as_u64(), 0xa1b2c3d4e5f67890);
        assert_eq!(addr.to_string(), "ws://10.0.0.5:7000/p2p/a1b2c3d4e5f67890");
    }

    #[test]
    fn test_parse_peer_address_with_path() {
        let addr: PeerAddress = "wss://relay.example.com/swarm/p2p/00000000000000aa"
            .parse()
            .unwrap();
        assert_eq!(addr.endpoint(), "wss://relay.example.com/swarm");
    }

    #[test]
    fn test_malformed_peer_addresses() {
        assert!(matches!(
            "ws://10.0.0.5:7000".parse::<PeerAddress>(),
            Err(PeerAddressError::MissingIdentity(_))
        ));
        assert!(matches!(
            "10.0.0.5:7000/p2p/a1b2c3d4e5f67890".parse::<PeerAddress>(),
            Err(PeerAddressError::InvalidEndpoint(_))
        ));
        assert!(matches!(
            "ws:///p2p/a1b2c3d4e5f67890".parse::<PeerAddress>(),
            Err(PeerAddressError::InvalidEndpoint(_))
        ));
        assert!(matches!(
            "ws://host/p2p/not-an-id".parse::<PeerAddress>(),
            Err(PeerAddressError::InvalidId(_))
        ));
    }

    #[test]
    fn test_serde_as_string() {
        let addr: PeerAddress = "ws://h:1/p2p/a1b2c3d4e5f67890".parse().unwrap();
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"ws://h:1/p2p/a1b2c3d4e5f67890\"");
        let back: PeerAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }
}
