//! Connection management: parameters, authentication, and the client facade.
//!
//! [`Connection`] is the assembled client. Connecting builds the
//! authenticated transport, wraps it in the retrying dispatcher, selects
//! the protocol adapter variant, opens the session (with the option
//! bootstrap), and probes the server once so version and webserver address
//! are known. Statements are then driven through the embedded
//! [`QueryEngine`].
//!
//! # Example
//!
//! ```no_run
//! use std::collections::HashMap;
//!
//! use kestrel_client::connection::{Connection, ConnectionParams};
//!
//! # async fn example() -> Result<(), kestrel_client::error::ClientError> {
//! let params = ConnectionParams::new("coord-1".to_string(), 21052)
//!     .with_session_option("mem_limit".to_string(), "2g".to_string());
//! let mut connection = Connection::connect(params).await?;
//!
//! let mut handle = connection
//!     .engine()
//!     .submit("SELECT 1", &HashMap::new())
//!     .await?;
//! connection.engine().wait(&handle).await?;
//! connection.engine().close(&mut handle).await?;
//!
//! connection.close().await;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod params;

use tracing::{debug, info};

use crate::error::ClientError;
use crate::protocol::{adapter_for, ServerOption};
use crate::query::{query_link, QueryEngine};
use crate::rpc::{CancelSignal, RpcDispatcher, RpcTracer};
use crate::session::{Session, SessionManager};
use crate::transport::{self, render_endpoint, PrincipalResolver, SaslMechanism};
use crate::types::OptionLevel;

pub use auth::{AuthScheme, BearerToken, Credentials};
pub use params::{ConnectionParams, DEFAULT_LEGACY_PORT, DEFAULT_PORT};

/// One open connection to a coordinator, owning one session.
pub struct Connection {
    params: ConnectionParams,
    endpoint: String,
    manager: SessionManager,
    engine: QueryEngine,
    connected: bool,
}

impl Connection {
    /// Connect and open a session with the configured parameters.
    ///
    /// # Errors
    ///
    /// Surfaces parameter validation failures, transport and
    /// authentication errors, and open-session or liveness-probe failures.
    /// On any failure after the transport opened, the transport is torn
    /// down before returning.
    pub async fn connect(params: ConnectionParams) -> Result<Self, ClientError> {
        Self::connect_with(params, None, &transport::IdentityResolver).await
    }

    /// [`connect`](Self::connect) with injectable authentication
    /// collaborators, used for Kerberos deployments.
    pub async fn connect_with(
        params: ConnectionParams,
        mechanism: Option<Box<dyn SaslMechanism>>,
        resolver: &dyn PrincipalResolver,
    ) -> Result<Self, ClientError> {
        params.validate()?;
        let tracer = RpcTracer::from_params(&params)?;
        let endpoint = render_endpoint(&params.host, params.port);

        let wire = transport::connect_with(&params, mechanism, resolver).await?;
        let rpc = RpcDispatcher::new(wire, params.max_tries, params.min_sleep_ms, tracer);
        let cancel = rpc.cancel_signal();
        let adapter = adapter_for(&params, rpc);

        let mut manager = SessionManager::new(adapter.clone(), params.max_tries);
        let user = params.user.clone().unwrap_or_default();
        if let Err(err) = manager.open(&user, &params.session_options).await {
            manager.close().await;
            return Err(err);
        }
        if let Err(err) = manager.ping().await {
            manager.close().await;
            return Err(err);
        }

        let mut engine = QueryEngine::new(adapter, params.fetch_size, cancel);
        engine.set_webserver_address(manager.webserver_address().map(str::to_string));

        info!(
            endpoint = %endpoint,
            version = manager.server_version().unwrap_or("unknown"),
            "connected"
        );
        Ok(Self {
            params,
            endpoint,
            manager,
            engine,
            connected: true,
        })
    }

    /// The query engine driving statements over this connection.
    pub fn engine(&mut self) -> &mut QueryEngine {
        &mut self.engine
    }

    /// The open session, if the connection is still up.
    pub fn session(&self) -> Option<&Session> {
        self.manager.session()
    }

    /// The parameters this connection was built with.
    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }

    /// `host:port` of the coordinator, IPv6 bracketed.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Server build version captured by the last successful ping.
    pub fn server_version(&self) -> Option<&str> {
        self.manager.server_version()
    }

    /// Debug webserver address captured by the last successful ping.
    pub fn webserver_address(&self) -> Option<&str> {
        self.manager.webserver_address()
    }

    /// The connection-scoped cancel flag, for external interrupt handlers.
    pub fn cancel_signal(&self) -> CancelSignal {
        self.engine.cancel_signal()
    }

    /// Local open/closed flag; does not touch the network.
    pub fn is_open(&self) -> bool {
        self.connected
    }

    /// Probe the server for liveness.
    ///
    /// A successful probe refreshes the cached version and webserver
    /// address. A failed probe tears local state down to disconnected, so
    /// later calls answer false without another round-trip.
    pub async fn is_connected(&mut self) -> bool {
        if !self.connected {
            return false;
        }
        match self.manager.ping().await {
            Ok(_) => {
                self.engine
                    .set_webserver_address(self.manager.webserver_address().map(str::to_string));
                true
            }
            Err(err) => {
                debug!(endpoint = %self.endpoint, error = %err, "liveness probe failed");
                self.manager.close().await;
                self.connected = false;
                false
            }
        }
    }

    /// Link to the query's plan page on the server's debug web UI, when
    /// the webserver address is known.
    pub fn query_link(&self, query_id: &str) -> Option<String> {
        self.manager
            .webserver_address()
            .map(|address| query_link(address, query_id))
    }

    /// The server's default query options, sorted by name.
    pub fn default_query_options(&self) -> Vec<&ServerOption> {
        self.manager
            .session()
            .map(Session::options)
            .unwrap_or_default()
    }

    /// Visibility level of one query option; names the server never
    /// reported land at the Development level, keeping them hidden.
    pub fn option_level(&self, name: &str) -> OptionLevel {
        self.manager
            .session()
            .and_then(|session| session.option_level(name))
            .unwrap_or(OptionLevel::Development)
    }

    /// Close the session and tear down the transport.
    ///
    /// Best-effort and idempotent: remote failures are logged, never
    /// raised, and the connection is marked closed regardless.
    pub async fn close(&mut self) {
        if !self.connected {
            return;
        }
        self.manager.close().await;
        self.connected = false;
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.endpoint)
            .field("connected", &self.connected)
            .field("session", &self.manager.session().map(Session::id))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RpcError;
    use crate::protocol::mocks::MockAdapter;
    use crate::protocol::{ProtocolAdapter, ServerStatus};
    use std::sync::Arc;
    use tokio::sync::Mutex;

    async fn connection_over(mock: MockAdapter) -> Connection {
        let adapter: Arc<Mutex<dyn ProtocolAdapter>> = Arc::new(Mutex::new(mock));
        let mut manager = SessionManager::new(Arc::clone(&adapter), 4);
        // Prime the caches the way connect() does, without a network.
        let _ = manager.ping().await;
        let mut engine = QueryEngine::new(Arc::clone(&adapter), 1024, CancelSignal::new());
        engine.set_webserver_address(manager.webserver_address().map(str::to_string));
        Connection {
            params: ConnectionParams::new("coord-1".to_string(), 21052),
            endpoint: "coord-1:21052".to_string(),
            manager,
            engine,
            connected: true,
        }
    }

    fn pingable(webserver: Option<&str>) -> MockAdapter {
        let webserver = webserver.map(str::to_string);
        let mut mock = MockAdapter::new();
        mock.expect_ping().times(1).returning(move || {
            Ok(ServerStatus {
                version: "kestrel-4.5.0".to_string(),
                webserver_address: webserver.clone(),
            })
        });
        mock
    }

    #[tokio::test]
    async fn test_query_link_uses_cached_webserver_address() {
        let connection = connection_over(pingable(Some("http://coord-1:25000"))).await;
        assert_eq!(
            connection.query_link("12ab:34cd").as_deref(),
            Some("http://coord-1:25000/query_plan?query_id=12ab:34cd")
        );
    }

    #[tokio::test]
    async fn test_query_link_absent_without_webserver() {
        let connection = connection_over(pingable(None)).await;
        assert_eq!(connection.query_link("12ab:34cd"), None);
        assert_eq!(connection.server_version(), Some("kestrel-4.5.0"));
    }

    #[tokio::test]
    async fn test_failed_ping_disconnects_once() {
        let mut mock = MockAdapter::new();
        let mut seq = mockall::Sequence::new();
        mock.expect_ping()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| {
                Ok(ServerStatus {
                    version: "kestrel-4.5.0".to_string(),
                    webserver_address: None,
                })
            });
        mock.expect_ping()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Err(RpcError::Disconnected("broken pipe".to_string()).into()));
        mock.expect_close_session()
            .times(1)
            .returning(|| Err(RpcError::Disconnected("broken pipe".to_string()).into()));
        mock.expect_shutdown().times(1).returning(|| Ok(()));

        let mut connection = connection_over(mock).await;
        assert!(connection.is_open());
        assert!(!connection.is_connected().await);
        assert!(!connection.is_open());
        // Disconnected state answers locally; the mock would panic on a
        // further ping.
        assert!(!connection.is_connected().await);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mut mock = pingable(None);
        mock.expect_close_session().times(1).returning(|| Ok(()));
        mock.expect_shutdown().times(1).returning(|| Ok(()));

        let mut connection = connection_over(mock).await;
        connection.close().await;
        assert!(!connection.is_open());
        connection.close().await;
    }

    #[tokio::test]
    async fn test_option_level_defaults_to_development() {
        let connection = connection_over(pingable(None)).await;
        // No session was opened in this fixture, so every name is unknown.
        assert_eq!(
            connection.option_level("debug_action"),
            OptionLevel::Development
        );
        assert!(connection.default_query_options().is_empty());
    }
}
