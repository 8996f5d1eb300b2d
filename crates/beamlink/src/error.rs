/// The type returned when a session operation fails.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The transport could not complete its initial handshake.
    #[error("handshake with {endpoint} failed: {reason}")]
    HandshakeFailure { endpoint: String, reason: String },
    /// A previously established connection dropped.
    #[error("connection dropped unexpectedly: {0}")]
    UnexpectedDisconnect(String),
    /// The automatic reconnect budget is spent; a manual connect is required.
    #[error("gave up after {attempts} failed connection attempts")]
    RetryExhausted { attempts: u32 },
    /// A request was issued while no connection was established.
    #[error("session is not connected")]
    NotConnected,
    /// The endpoint answered a request with an error object.
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
}

/// Errors raised while dialing or driving the underlying transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The websocket layer rejected or dropped the connection.
    #[error("websocket error: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The remote endpoint refused the handshake.
    #[error("handshake refused: {0}")]
    Refused(String),
    /// The transport is no longer accepting commands.
    #[error("transport closed")]
    Closed,
}

/// Errors raised while loading or resolving configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("unable to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// The configuration file could not be parsed.
    #[error("unable to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    /// The requested network is not in the registry.
    #[error("unknown network `{0}`")]
    UnknownNetwork(String),
}
