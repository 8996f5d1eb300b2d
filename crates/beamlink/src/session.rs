mod message;
mod state;

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::select;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, Duration, Instant, Sleep};
use tracing::{debug, error, info, warn};

use crate::config::NetworkConfig;
use crate::error::SessionError;
use crate::transport::Connector;

use message::SessionMessage;
use state::SessionState;
pub use state::{ConnectionState, SessionStatus};

/// Handle to the session actor owning the connection to one endpoint.
///
/// The session is created idle; nothing is dialed until the first
/// [`connect`](SessionRef::connect) call.
#[derive(Clone)]
pub struct SessionRef {
    sender: mpsc::Sender<SessionMessage>,
}

impl SessionRef {
    pub fn new(config: NetworkConfig, connector: Arc<dyn Connector>) -> Self {
        let (sender, mailbox) = mpsc::channel(10);
        let actor = Session::new(mailbox, sender.downgrade(), config, connector);
        tokio::spawn(run_session(actor));

        Self { sender }
    }

    /// Establish a connection, tearing down any existing one first.
    ///
    /// The outcome of this attempt is returned directly; outcomes of the
    /// automatic reconnects it may schedule surface only through
    /// [`status`](SessionRef::status).
    pub async fn connect(&self) -> Result<(), SessionError> {
        let (responder, receiver) = oneshot::channel();
        self.sender
            .send(SessionMessage::Connect(responder))
            .await
            .expect("be able to request a connection");
        receiver.await.expect("to receive a connect outcome")
    }

    /// Issue a request over the live connection.
    pub async fn request(&self, method: &str, params: Vec<Value>) -> Result<Value, SessionError> {
        let (responder, receiver) = oneshot::channel();
        self.sender
            .send(SessionMessage::Request {
                method: method.to_string(),
                params,
                responder,
            })
            .await
            .expect("be able to send a request");
        receiver.await.expect("to receive a request outcome")
    }

    pub async fn status(&self) -> SessionStatus {
        let (responder, receiver) = oneshot::channel();
        self.sender
            .send(SessionMessage::GetStatus(responder))
            .await
            .expect("be able to request a status");
        receiver.await.expect("to receive a status")
    }

    pub async fn is_connected(&self) -> bool {
        self.status().await.state == ConnectionState::Connected
    }

    pub async fn last_error(&self) -> Option<String> {
        self.status().await.last_error
    }

    pub(crate) async fn payload_received(&self, generation: u64, payload: String) {
        let _ = self
            .sender
            .send(SessionMessage::PayloadReceived {
                generation,
                payload,
            })
            .await;
    }

    pub(crate) async fn transport_closed(&self, generation: u64, reason: String) {
        let _ = self
            .sender
            .send(SessionMessage::TransportClosed { generation, reason })
            .await;
    }

    pub(crate) async fn transport_errored(&self, generation: u64, reason: String) {
        let _ = self
            .sender
            .send(SessionMessage::TransportErrored { generation, reason })
            .await;
    }
}

struct Session {
    mailbox: mpsc::Receiver<SessionMessage>,
    handle: mpsc::WeakSender<SessionMessage>,
    config: NetworkConfig,
    connector: Arc<dyn Connector>,
    state: SessionState,
    generation: u64,
    retry_count: u32,
    last_error: Option<String>,
    pending: HashMap<u64, oneshot::Sender<Result<Value, SessionError>>>,
    next_request_id: u64,
    retry_timer: Pin<Box<Sleep>>,
    retry_armed: bool,
}

impl Session {
    fn new(
        mailbox: mpsc::Receiver<SessionMessage>,
        handle: mpsc::WeakSender<SessionMessage>,
        config: NetworkConfig,
        connector: Arc<dyn Connector>,
    ) -> Session {
        let retry_timer = sleep(Duration::from_millis(config.retry_delay_ms));
        Self {
            mailbox,
            handle,
            config,
            connector,
            state: SessionState::Disconnected,
            generation: 0,
            retry_count: 0,
            last_error: None,
            pending: HashMap::new(),
            next_request_id: 0,
            retry_timer: Box::pin(retry_timer),
            retry_armed: false,
        }
    }

    async fn do_connect(&mut self) -> Result<(), SessionError> {
        let session = match self.handle.upgrade() {
            Some(sender) => SessionRef { sender },
            None => {
                // every handle is gone, nobody is left to observe the session
                debug!("abandoning connect on a released session");
                return Err(SessionError::NotConnected);
            }
        };

        self.retry_armed = false;
        if self.state.close_transport().await {
            debug!(endpoint = %self.config.endpoint, "closed previous connection");
        }
        self.fail_pending("connection is being replaced");

        self.generation += 1;
        self.state = SessionState::Connecting;
        info!(endpoint = %self.config.endpoint, "connecting");

        match self
            .connector
            .connect(&self.config.endpoint, self.generation, session)
            .await
        {
            Ok(transport) => {
                self.state = SessionState::Connected { transport };
                self.retry_count = 0;
                self.last_error = None;
                info!(endpoint = %self.config.endpoint, "connected");
                Ok(())
            }
            Err(err) => {
                let failure = SessionError::HandshakeFailure {
                    endpoint: self.config.endpoint.clone(),
                    reason: err.to_string(),
                };
                self.record_failure(&failure, SessionState::Failed);
                Err(failure)
            }
        }
    }

    /// Record a failed attempt or a dropped connection and arm the retry
    /// timer while the budget lasts. Exactly one timer is armed at a time.
    fn record_failure(&mut self, failure: &SessionError, next_state: SessionState) {
        self.last_error = Some(failure.to_string());
        self.state = next_state;
        self.retry_count += 1;

        if self.retry_count < self.config.retry_limit {
            let deadline = Instant::now() + Duration::from_millis(self.config.retry_delay_ms);
            self.retry_timer.as_mut().reset(deadline);
            self.retry_armed = true;
            debug!(
                retry_count = self.retry_count,
                delay_ms = self.config.retry_delay_ms,
                "reconnect scheduled"
            );
        } else {
            let exhausted = SessionError::RetryExhausted {
                attempts: self.retry_count,
            };
            self.last_error = Some(exhausted.to_string());
            warn!(attempts = self.retry_count, "no automatic reconnects left");
        }
    }

    async fn on_retry(&mut self) {
        if self.state.is_connected() {
            return;
        }
        debug!(retry_count = self.retry_count, "attempting automatic reconnect");
        // the outcome is observable through the session state only
        let _ = self.do_connect().await;
    }

    async fn on_transport_closed(&mut self, generation: u64, reason: String) {
        if generation != self.generation || !self.state.is_connected() {
            debug!(generation, "ignoring event from a stale connection");
            return;
        }
        warn!(reason = %reason, "connection dropped");
        self.fail_pending(&reason);
        let failure = SessionError::UnexpectedDisconnect(reason);
        self.record_failure(&failure, SessionState::Disconnected);
    }

    async fn on_transport_errored(&mut self, generation: u64, reason: String) {
        if generation != self.generation || !self.state.is_connected() {
            debug!(generation, "ignoring event from a stale connection");
            return;
        }
        error!(reason = %reason, "transport error");
        self.fail_pending(&reason);
        let failure = SessionError::UnexpectedDisconnect(reason);
        self.record_failure(&failure, SessionState::Failed);
    }

    async fn on_request(
        &mut self,
        method: String,
        params: Vec<Value>,
        responder: oneshot::Sender<Result<Value, SessionError>>,
    ) {
        let transport = match &self.state {
            SessionState::Connected { transport } => transport.clone(),
            _ => {
                let _ = responder.send(Err(SessionError::NotConnected));
                return;
            }
        };

        self.next_request_id += 1;
        let id = self.next_request_id;
        let payload = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        if let Err(err) = transport.send_payload(payload.to_string()).await {
            let _ = responder.send(Err(SessionError::UnexpectedDisconnect(err.to_string())));
            return;
        }
        self.pending.insert(id, responder);
    }

    fn on_payload(&mut self, generation: u64, payload: String) {
        if generation != self.generation {
            debug!(generation, "ignoring payload from a stale connection");
            return;
        }
        let value: Value = match serde_json::from_str(&payload) {
            Ok(value) => value,
            Err(err) => {
                warn!(%err, "discarding unparseable payload");
                return;
            }
        };
        let id = match value.get("id").and_then(Value::as_u64) {
            Some(id) => id,
            None => {
                debug!("discarding payload without a request id");
                return;
            }
        };
        let responder = match self.pending.remove(&id) {
            Some(responder) => responder,
            None => {
                debug!(id, "no pending request for response");
                return;
            }
        };

        let outcome = match value.get("error") {
            Some(rpc_error) => Err(SessionError::Rpc {
                code: rpc_error.get("code").and_then(Value::as_i64).unwrap_or(0),
                message: rpc_error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            }),
            None => Ok(value.get("result").cloned().unwrap_or(Value::Null)),
        };
        let _ = responder.send(outcome);
    }

    fn fail_pending(&mut self, reason: &str) {
        for (_, responder) in self.pending.drain() {
            let _ = responder.send(Err(SessionError::UnexpectedDisconnect(reason.to_string())));
        }
    }

    fn snapshot(&self) -> SessionStatus {
        SessionStatus {
            endpoint: self.config.endpoint.clone(),
            state: self.state.as_connection_state(),
            retry_count: self.retry_count,
            last_error: self.last_error.clone(),
        }
    }

    async fn handle(&mut self, message: SessionMessage) {
        match message {
            SessionMessage::Connect(responder) => {
                let outcome = self.do_connect().await;
                let _ = responder.send(outcome);
            }
            SessionMessage::Retry => self.on_retry().await,
            SessionMessage::Request {
                method,
                params,
                responder,
            } => self.on_request(method, params, responder).await,
            SessionMessage::PayloadReceived {
                generation,
                payload,
            } => self.on_payload(generation, payload),
            SessionMessage::TransportClosed { generation, reason } => {
                self.on_transport_closed(generation, reason).await
            }
            SessionMessage::TransportErrored { generation, reason } => {
                self.on_transport_errored(generation, reason).await
            }
            SessionMessage::GetStatus(responder) => {
                let _ = responder.send(self.snapshot());
            }
        }
    }
}

async fn run_session(mut actor: Session) {
    loop {
        let next_message = actor.mailbox.recv();

        select! {
            next = next_message => {
                match next {
                    Some(msg) => {
                        actor.handle(msg).await
                    }
                    None => break,
                }
            }
            () = &mut actor.retry_timer.as_mut(), if actor.retry_armed => {
                actor.retry_armed = false;
                actor.handle(SessionMessage::Retry).await
            }
        }
    }

    debug!("session is shutting down")
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use tokio::sync::mpsc;
    use tokio::time::{advance, Duration};

    use super::{ConnectionState, SessionRef};
    use crate::config::NetworkConfig;
    use crate::error::{SessionError, TransportError};
    use crate::transport::{Connector, TransportCommand, TransportRef};

    struct Dial {
        generation: u64,
        commands: mpsc::Receiver<TransportCommand>,
    }

    /// Connector replaying a scripted list of dial outcomes.
    struct ScriptedConnector {
        script: Mutex<VecDeque<Result<(), String>>>,
        attempts: AtomicU32,
        dials: Mutex<VecDeque<Dial>>,
    }

    impl ScriptedConnector {
        fn new(script: Vec<Result<(), String>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                attempts: AtomicU32::new(0),
                dials: Mutex::new(VecDeque::new()),
            })
        }

        fn attempts(&self) -> u32 {
            self.attempts.load(Ordering::SeqCst)
        }

        fn take_dial(&self) -> Dial {
            self.dials.lock().pop_front().expect("a dial to have happened")
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(
            &self,
            _endpoint: &str,
            generation: u64,
            _session: SessionRef,
        ) -> Result<TransportRef, TransportError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let outcome = self
                .script
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err("no scripted outcome left".to_string()));

            match outcome {
                Ok(()) => {
                    let (sender, commands) = mpsc::channel(10);
                    self.dials.lock().push_back(Dial {
                        generation,
                        commands,
                    });
                    Ok(TransportRef::new(sender))
                }
                Err(reason) => Err(TransportError::Refused(reason)),
            }
        }
    }

    fn test_config() -> NetworkConfig {
        NetworkConfig {
            endpoint: "ws://127.0.0.1:9944".to_string(),
            retry_limit: 3,
            retry_delay_ms: 5000,
        }
    }

    async fn wait_for_attempts(connector: &ScriptedConnector, expected: u32) {
        for _ in 0..100 {
            if connector.attempts() >= expected {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(connector.attempts(), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_reaches_connected_state() {
        let connector = ScriptedConnector::new(vec![Ok(())]);
        let session = SessionRef::new(test_config(), connector.clone());

        session.connect().await.expect("connect to succeed");

        let status = session.status().await;
        assert_eq!(status.state, ConnectionState::Connected);
        assert_eq!(status.retry_count, 0);
        assert_eq!(status.last_error, None);
        assert!(session.is_connected().await);
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_failures_exhaust_retry_budget() {
        let connector = ScriptedConnector::new(vec![
            Err("connection refused".to_string()),
            Err("connection refused".to_string()),
            Err("connection refused".to_string()),
        ]);
        let session = SessionRef::new(test_config(), connector.clone());

        let outcome = session.connect().await;
        assert!(matches!(outcome, Err(SessionError::HandshakeFailure { .. })));
        assert_eq!(connector.attempts(), 1);

        advance(Duration::from_millis(5000)).await;
        wait_for_attempts(&connector, 2).await;
        advance(Duration::from_millis(5000)).await;
        wait_for_attempts(&connector, 3).await;

        let status = session.status().await;
        assert_eq!(status.state, ConnectionState::Failed);
        assert_eq!(status.retry_count, 3);
        let last_error = status.last_error.expect("a last error");
        assert!(last_error.contains("gave up after 3"));

        // the budget is spent, no further attempt is made
        advance(Duration::from_secs(60)).await;
        tokio::task::yield_now().await;
        assert_eq!(connector.attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_reconnect_resets_retry_state() {
        let connector =
            ScriptedConnector::new(vec![Err("connection refused".to_string()), Ok(())]);
        let session = SessionRef::new(test_config(), connector.clone());

        session.connect().await.expect_err("first attempt to fail");
        let status = session.status().await;
        assert_eq!(status.state, ConnectionState::Failed);
        assert_eq!(status.retry_count, 1);
        assert!(status.last_error.is_some());

        advance(Duration::from_millis(5000)).await;
        wait_for_attempts(&connector, 2).await;

        let status = session.status().await;
        assert_eq!(status.state, ConnectionState::Connected);
        assert_eq!(status.retry_count, 0);
        assert_eq!(status.last_error, None);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_closes_previous_transport_exactly_once() {
        let connector = ScriptedConnector::new(vec![Ok(()), Ok(())]);
        let session = SessionRef::new(test_config(), connector.clone());

        session.connect().await.expect("first connect to succeed");
        let mut first = connector.take_dial();

        session.connect().await.expect("second connect to succeed");
        assert_eq!(connector.attempts(), 2);

        match first.commands.recv().await {
            Some(TransportCommand::Disconnect) => {}
            other => panic!("expected a disconnect command, got {other:?}"),
        }
        // the handle is dropped after the close, no second command follows
        assert!(first.commands.recv().await.is_none());

        assert!(session.is_connected().await);
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_disconnect_schedules_single_retry() {
        let connector = ScriptedConnector::new(vec![Ok(()), Ok(())]);
        let session = SessionRef::new(test_config(), connector.clone());

        session.connect().await.expect("connect to succeed");
        let dial = connector.take_dial();

        session
            .transport_closed(dial.generation, "socket closed".to_string())
            .await;

        let status = session.status().await;
        assert_eq!(status.state, ConnectionState::Disconnected);
        assert_eq!(status.retry_count, 1);
        let last_error = status.last_error.expect("a last error");
        assert!(last_error.contains("socket closed"));

        // nothing is dialed before the retry delay elapses
        advance(Duration::from_millis(4999)).await;
        tokio::task::yield_now().await;
        assert_eq!(connector.attempts(), 1);

        advance(Duration::from_millis(1)).await;
        wait_for_attempts(&connector, 2).await;

        let status = session.status().await;
        assert_eq!(status.state, ConnectionState::Connected);
        assert_eq!(status.retry_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_error_moves_session_to_failed() {
        let connector = ScriptedConnector::new(vec![Ok(()), Ok(())]);
        let session = SessionRef::new(test_config(), connector.clone());

        session.connect().await.expect("connect to succeed");
        let dial = connector.take_dial();

        session
            .transport_errored(dial.generation, "protocol violation".to_string())
            .await;

        let status = session.status().await;
        assert_eq!(status.state, ConnectionState::Failed);
        assert_eq!(status.retry_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_transport_events_are_ignored() {
        let connector = ScriptedConnector::new(vec![Ok(()), Ok(())]);
        let session = SessionRef::new(test_config(), connector.clone());

        session.connect().await.expect("first connect to succeed");
        let first = connector.take_dial();
        session.connect().await.expect("second connect to succeed");

        session
            .transport_closed(first.generation, "old reader drained".to_string())
            .await;

        let status = session.status().await;
        assert_eq!(status.state, ConnectionState::Connected);
        assert_eq!(status.retry_count, 0);

        advance(Duration::from_secs(60)).await;
        tokio::task::yield_now().await;
        assert_eq!(connector.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn requests_fail_when_not_connected() {
        let connector = ScriptedConnector::new(vec![]);
        let session = SessionRef::new(test_config(), connector.clone());

        let outcome = session.request("system_health", vec![]).await;
        assert!(matches!(outcome, Err(SessionError::NotConnected)));
        assert_eq!(connector.attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn request_resolves_with_correlated_response() {
        let connector = ScriptedConnector::new(vec![Ok(())]);
        let session = SessionRef::new(test_config(), connector.clone());

        session.connect().await.expect("connect to succeed");
        let mut dial = connector.take_dial();

        let request = tokio::spawn({
            let session = session.clone();
            async move { session.request("chain_getBlockHash", vec![json!(0)]).await }
        });

        let sent = match dial.commands.recv().await {
            Some(TransportCommand::Send(payload)) => payload,
            other => panic!("expected a send command, got {other:?}"),
        };
        let sent: serde_json::Value = serde_json::from_str(&sent).unwrap();
        assert_eq!(sent["method"], "chain_getBlockHash");
        assert_eq!(sent["params"], json!([0]));
        let id = sent["id"].as_u64().expect("a request id");

        let response = json!({"jsonrpc": "2.0", "id": id, "result": "0xabc"});
        session
            .payload_received(dial.generation, response.to_string())
            .await;

        let outcome = request.await.unwrap();
        assert_eq!(outcome.unwrap(), json!("0xabc"));
    }

    #[tokio::test(start_paused = true)]
    async fn rpc_error_objects_are_surfaced() {
        let connector = ScriptedConnector::new(vec![Ok(())]);
        let session = SessionRef::new(test_config(), connector.clone());

        session.connect().await.expect("connect to succeed");
        let mut dial = connector.take_dial();

        let request = tokio::spawn({
            let session = session.clone();
            async move { session.request("author_submitExtrinsic", vec![]).await }
        });

        let sent = match dial.commands.recv().await {
            Some(TransportCommand::Send(payload)) => payload,
            other => panic!("expected a send command, got {other:?}"),
        };
        let sent: serde_json::Value = serde_json::from_str(&sent).unwrap();
        let id = sent["id"].as_u64().expect("a request id");

        let response = json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": -32601, "message": "Method not found"},
        });
        session
            .payload_received(dial.generation, response.to_string())
            .await;

        let outcome = request.await.unwrap();
        match outcome {
            Err(SessionError::Rpc { code, message }) => {
                assert_eq!(code, -32601);
                assert_eq!(message, "Method not found");
            }
            other => panic!("expected an rpc error, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pending_requests_fail_on_disconnect() {
        let connector = ScriptedConnector::new(vec![Ok(())]);
        let session = SessionRef::new(test_config(), connector.clone());

        session.connect().await.expect("connect to succeed");
        let mut dial = connector.take_dial();

        let request = tokio::spawn({
            let session = session.clone();
            async move { session.request("system_health", vec![]).await }
        });

        // wait until the request is registered before dropping the transport
        match dial.commands.recv().await {
            Some(TransportCommand::Send(_)) => {}
            other => panic!("expected a send command, got {other:?}"),
        }

        session
            .transport_closed(dial.generation, "socket closed".to_string())
            .await;

        let outcome = request.await.unwrap();
        assert!(matches!(
            outcome,
            Err(SessionError::UnexpectedDisconnect(_))
        ));
    }
}
