//! reach-daemon library: the WebSocket transport behind the daemon binary.
//!
//! Exposed as a library so integration tests can drive a node over real
//! sockets.

pub mod config;
pub mod connection;
pub mod message;
pub mod runner;
pub mod transport;

pub use config::{DaemonConfig, Overrides};
pub use connection::{DialError, PeerLink};
pub use message::{HandshakeMessage, MAX_MESSAGE_SIZE, RendezvousMessage};
pub use runner::run_node;
pub use transport::WsTransport;
