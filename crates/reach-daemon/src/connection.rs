//! Outgoing peer links.
//!
//! A link is established by dialing the peer's WebSocket endpoint, sending
//! our handshake and waiting for the peer's reply. The reply must carry the
//! peer ID the address promised; anything else is rejected.

use crate::message::{HandshakeMessage, MAX_MESSAGE_SIZE};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use reach_core::{PeerAddress, PeerId};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{Error as WsError, Message},
};
use tracing::{debug, error, warn};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Error)]
pub enum DialError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
    #[error("Connection closed before handshake")]
    ClosedBeforeHandshake,
    #[error("Peer identity mismatch: expected {expected}, got {actual}")]
    IdentityMismatch { expected: PeerId, actual: String },
}

/// A live, handshaken connection to one peer.
pub struct PeerLink {
    address: PeerAddress,
    write: Arc<Mutex<SplitSink<WsStream, Message>>>,
    /// Read half, until `watch` hands it to the read task
    read: Option<SplitStream<WsStream>>,
    read_task: Option<JoinHandle<()>>,
}

impl PeerLink {
    /// Dial `address` and complete the handshake.
    pub async fn open(address: &PeerAddress, local_id: PeerId) -> Result<Self, DialError> {
        let (ws_stream, _) = connect_async(address.endpoint()).await?;
        let (mut write, mut read) = ws_stream.split();

        let handshake = HandshakeMessage::new(&local_id.to_string(), "client");
        write.send(Message::Binary(handshake.to_binary().into())).await?;

        let reply = Self::await_handshake(&mut read).await?;
        if reply.peer_id.parse::<PeerId>().ok() != Some(address.id()) {
            let _ = write.send(Message::Close(None)).await;
            return Err(DialError::IdentityMismatch {
                expected: address.id(),
                actual: reply.peer_id,
            });
        }
        debug!("Handshake with {} complete (role: {})", address, reply.role);

        Ok(Self {
            address: address.clone(),
            write: Arc::new(Mutex::new(write)),
            read: Some(read),
            read_task: None,
        })
    }

    /// Start draining the link in the background.
    ///
    /// `on_closed` runs once if the remote ends the connection. It does not
    /// run when the link is closed or dropped locally. Calling this twice
    /// does nothing.
    pub fn watch(&mut self, on_closed: impl FnOnce() + Send + 'static) {
        let Some(read) = self.read.take() else {
            return;
        };
        let address = self.address.clone();
        self.read_task = Some(tokio::spawn(async move {
            Self::read_loop(address, read).await;
            on_closed();
        }));
    }

    async fn await_handshake(
        read: &mut SplitStream<WsStream>,
    ) -> Result<HandshakeMessage, DialError> {
        while let Some(msg) = read.next().await {
            let data = match msg? {
                Message::Binary(data) => data.to_vec(),
                Message::Text(text) => text.as_bytes().to_vec(),
                Message::Close(_) => break,
                _ => continue,
            };
            match HandshakeMessage::from_binary(&data) {
                Some(handshake) => return Ok(handshake),
                None => debug!("Ignoring {} byte frame before handshake", data.len()),
            }
        }
        Err(DialError::ClosedBeforeHandshake)
    }

    /// Drain the link until the remote goes away.
    async fn read_loop(address: PeerAddress, mut read: SplitStream<WsStream>) {
        loop {
            match read.next().await {
                Some(Ok(Message::Close(_))) => {
                    debug!("Received close frame from {}", address);
                    break;
                }
                Some(Ok(Message::Binary(data))) if data.len() > MAX_MESSAGE_SIZE => {
                    warn!(
                        "Message from {} exceeds max size ({} > {}), dropping",
                        address,
                        data.len(),
                        MAX_MESSAGE_SIZE
                    );
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    match e {
                        WsError::ConnectionClosed | WsError::AlreadyClosed => {
                            debug!("Connection {} closed", address);
                        }
                        _ => {
                            error!("WebSocket error on {}: {}", address, e);
                        }
                    }
                    break;
                }
                None => {
                    debug!("Connection {} stream ended", address);
                    break;
                }
            }
        }
    }

    pub fn address(&self) -> &PeerAddress {
        &self.address
    }

    /// Close the link gracefully.
    pub async fn close(&mut self) {
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
        let mut write = self.write.lock().await;
        let _ = write.send(Message::Close(None)).await;
    }
}

impl Drop for PeerLink {
    fn drop(&mut self) {
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
    }
}
