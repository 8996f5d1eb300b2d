use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use crate::cache::ResponseCache;
use crate::config::Config;
use crate::error::{ConfigError, SessionError};
use crate::session::{SessionRef, SessionStatus};
use crate::transport::ws::WsConnector;

const CACHE_CAPACITY: usize = 100;
const CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Wires configuration, session and response cache together for one network.
///
/// The session stays idle until [`connect`](ChainClient::connect) is called.
pub struct ChainClient {
    network: String,
    session: SessionRef,
    cache: ResponseCache<Value>,
}

impl ChainClient {
    /// Build a client for the configured default network.
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        let network = config.default_network.clone();
        Self::for_network(config, &network)
    }

    /// Build a client for a specific network from the registry.
    pub fn for_network(config: &Config, network: &str) -> Result<Self, ConfigError> {
        let network_config = config.network(network)?.clone();
        let session = SessionRef::new(network_config, Arc::new(WsConnector));

        Ok(Self {
            network: network.to_string(),
            session,
            cache: ResponseCache::new(CACHE_CAPACITY, CACHE_TTL),
        })
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn session(&self) -> &SessionRef {
        &self.session
    }

    pub async fn connect(&self) -> Result<(), SessionError> {
        self.session.connect().await
    }

    pub async fn status(&self) -> SessionStatus {
        self.session.status().await
    }

    pub async fn request(&self, method: &str, params: Vec<Value>) -> Result<Value, SessionError> {
        self.session.request(method, params).await
    }

    /// Hash of the genesis block; immutable for the lifetime of a chain.
    pub async fn genesis_hash(&self) -> Result<Value, SessionError> {
        self.cached("chain_getBlockHash", vec![json!(0)]).await
    }

    /// Token symbol, decimals and address format reported by the node.
    pub async fn system_properties(&self) -> Result<Value, SessionError> {
        self.cached("system_properties", vec![]).await
    }

    async fn cached(&self, method: &str, params: Vec<Value>) -> Result<Value, SessionError> {
        let key = format!("{}:{}", self.network, method);
        if let Some(value) = self.cache.get(&key) {
            return Ok(value);
        }

        let value = self.session.request(method, params).await?;
        self.cache.insert(key, value.clone());
        Ok(value)
    }
}
