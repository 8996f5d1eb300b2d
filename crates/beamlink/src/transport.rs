pub mod ws;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::session::SessionRef;

/// Dials an endpoint and hands the resulting connection to the session.
///
/// The production implementation speaks websocket; tests inject scripted
/// connectors so session behaviour can be driven without a network.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(
        &self,
        endpoint: &str,
        generation: u64,
        session: SessionRef,
    ) -> Result<TransportRef, TransportError>;
}

/// Commands accepted by a live transport.
#[derive(Debug)]
pub enum TransportCommand {
    /// Write a payload to the remote endpoint.
    Send(String),
    /// Close the connection.
    Disconnect,
}

/// Handle to a live transport connection.
#[derive(Clone, Debug)]
pub struct TransportRef {
    sender: mpsc::Sender<TransportCommand>,
}

impl TransportRef {
    pub fn new(sender: mpsc::Sender<TransportCommand>) -> Self {
        Self { sender }
    }

    pub async fn send_payload(&self, payload: String) -> Result<(), TransportError> {
        self.sender
            .send(TransportCommand::Send(payload))
            .await
            .map_err(|_| TransportError::Closed)
    }

    pub async fn disconnect(&self) {
        // the writer may already be gone if the connection dropped on its own
        let _ = self.sender.send(TransportCommand::Disconnect).await;
    }
}
