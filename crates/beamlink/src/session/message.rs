use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::SessionError;
use crate::session::SessionStatus;

#[derive(Debug)]
pub(crate) enum SessionMessage {
    /// Ask the session to (re)connect to its endpoint.
    Connect(oneshot::Sender<Result<(), SessionError>>),
    /// The retry timer fired; attempt the next automatic reconnect.
    Retry,
    /// Ask the session to issue a request over the live connection.
    Request {
        method: String,
        params: Vec<Value>,
        responder: oneshot::Sender<Result<Value, SessionError>>,
    },
    /// A payload arrived from the transport reader.
    PayloadReceived { generation: u64, payload: String },
    /// The transport connection dropped.
    TransportClosed { generation: u64, reason: String },
    /// The transport reported an error.
    TransportErrored { generation: u64, reason: String },
    /// Ask the session for a status snapshot.
    GetStatus(oneshot::Sender<SessionStatus>),
}
