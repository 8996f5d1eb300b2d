use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::error::TransportError;
use crate::session::SessionRef;
use crate::transport::{Connector, TransportCommand, TransportRef};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Production connector speaking websocket to the chain endpoint.
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(
        &self,
        endpoint: &str,
        generation: u64,
        session: SessionRef,
    ) -> Result<TransportRef, TransportError> {
        let (stream, _response) = connect_async(endpoint).await?;
        let (sink, source) = stream.split();

        let (sender, mailbox) = mpsc::channel(10);
        tokio::spawn(run_writer(sink, mailbox));
        tokio::spawn(run_reader(source, generation, session));

        Ok(TransportRef::new(sender))
    }
}

async fn run_writer(mut sink: WsSink, mut mailbox: mpsc::Receiver<TransportCommand>) {
    while let Some(command) = mailbox.recv().await {
        match command {
            TransportCommand::Send(payload) => {
                if let Err(err) = sink.send(Message::Text(payload)).await {
                    debug!(%err, "failed to write to websocket");
                    break;
                }
            }
            TransportCommand::Disconnect => {
                let _ = sink.close().await;
                break;
            }
        }
    }

    debug!("writer loop is shutting down");
}

async fn run_reader(mut source: WsSource, generation: u64, session: SessionRef) {
    loop {
        match source.next().await {
            Some(Ok(Message::Text(payload))) => {
                session.payload_received(generation, payload).await;
            }
            Some(Ok(Message::Close(_))) | None => {
                session
                    .transport_closed(generation, "connection closed by remote".to_string())
                    .await;
                break;
            }
            // ping, pong and binary frames are not part of the protocol
            Some(Ok(_)) => {}
            Some(Err(err)) => {
                session.transport_errored(generation, err.to_string()).await;
                break;
            }
        }
    }

    debug!("reader loop is shutting down");
}
