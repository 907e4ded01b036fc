//! Session lifecycle and server option metadata.
//!
//! [`SessionManager`] drives the session-scoped adapter calls: opening
//! (with protocol version assertion and the option-metadata bootstrap),
//! liveness probing, and best-effort teardown. A [`Session`] is the
//! opened scope itself, holding the server's query options and their
//! visibility levels keyed case-insensitively.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{ClientError, ConnectionError, ErrorKind};
use crate::protocol::{ProtocolAdapter, ServerOption, ServerStatus};
use crate::types::OptionLevel;

/// An open session scope.
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    protocol_version: u16,
    /// Server options keyed by lowercased name
    options: HashMap<String, ServerOption>,
}

impl Session {
    fn new(id: String, protocol_version: u16, options: Vec<ServerOption>) -> Self {
        let options = options
            .into_iter()
            .map(|option| (option.name.to_ascii_lowercase(), option))
            .collect();
        Self {
            id,
            protocol_version,
            options,
        }
    }

    /// Server-issued session identifier; empty on the legacy service.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Protocol version the server negotiated.
    pub fn protocol_version(&self) -> u16 {
        self.protocol_version
    }

    /// Look up one server option, case-insensitively.
    pub fn option(&self, name: &str) -> Option<&ServerOption> {
        self.options.get(&name.to_ascii_lowercase())
    }

    /// Default value of one server option, case-insensitively.
    pub fn default_value(&self, name: &str) -> Option<&str> {
        self.option(name).map(|option| option.value.as_str())
    }

    /// Visibility level of one server option, case-insensitively.
    pub fn option_level(&self, name: &str) -> Option<OptionLevel> {
        self.option(name).map(|option| option.level)
    }

    /// All known server options, sorted by name for stable display.
    pub fn options(&self) -> Vec<&ServerOption> {
        let mut all: Vec<&ServerOption> = self.options.values().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }
}

/// Session-scoped operations over a shared protocol adapter.
pub struct SessionManager {
    adapter: Arc<Mutex<dyn ProtocolAdapter>>,
    /// Attempt bound for the option bootstrap, retried as a whole
    max_tries: u32,
    session: Option<Session>,
    server_version: Option<String>,
    webserver_address: Option<String>,
}

impl SessionManager {
    /// Wrap a shared adapter. `max_tries` mirrors the dispatcher's bound.
    pub fn new(adapter: Arc<Mutex<dyn ProtocolAdapter>>, max_tries: u32) -> Self {
        Self {
            adapter,
            max_tries: max_tries.max(1),
            session: None,
            server_version: None,
            webserver_address: None,
        }
    }

    /// The open session, if any.
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Engine version string cached from the last successful ping.
    pub fn server_version(&self) -> Option<&str> {
        self.server_version.as_deref()
    }

    /// Debug webserver address cached from the last successful ping.
    pub fn webserver_address(&self) -> Option<&str> {
        self.webserver_address.as_deref()
    }

    /// Open the session scope and bootstrap the option metadata.
    ///
    /// The bootstrap is tolerant: a server that cannot enumerate its
    /// options yields an empty option set, never a failed open. Transient
    /// bootstrap failures are retried as a whole up to the attempt bound.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionError::VersionMismatch` when the server
    /// negotiates a different protocol version than the adapter speaks,
    /// and any error from the open-session call itself.
    pub async fn open(
        &mut self,
        user: &str,
        options: &HashMap<String, String>,
    ) -> Result<(), ClientError> {
        let mut adapter = self.adapter.lock().await;
        let info = adapter.open_session(user, options).await?;
        let expected = adapter.protocol_version();
        if info.protocol_version != expected {
            return Err(ConnectionError::VersionMismatch {
                expected: format!("V{}", expected),
                actual: format!("V{}", info.protocol_version),
            }
            .into());
        }

        let mut server_options = Vec::new();
        for attempt in 1..=self.max_tries {
            match adapter.server_options().await {
                Ok(listed) => {
                    server_options = listed;
                    break;
                }
                Err(error)
                    if matches!(
                        error.kind(),
                        ErrorKind::Protocol | ErrorKind::NotSupported
                    ) =>
                {
                    debug!(error = %error, "server cannot enumerate its options");
                    break;
                }
                Err(error) => {
                    warn!(
                        attempt,
                        max_tries = self.max_tries,
                        error = %error,
                        "option bootstrap failed"
                    );
                }
            }
        }

        debug!(
            session_id = %info.session_id,
            options = server_options.len(),
            "session opened"
        );
        self.session = Some(Session::new(
            info.session_id,
            info.protocol_version,
            server_options,
        ));
        Ok(())
    }

    /// Probe the server and cache its version and webserver address.
    pub async fn ping(&mut self) -> Result<ServerStatus, ClientError> {
        let status = self.adapter.lock().await.ping().await?;
        self.server_version = Some(status.version.clone());
        if status.webserver_address.is_some() {
            self.webserver_address = status.webserver_address.clone();
        }
        Ok(status)
    }

    /// Close the session scope and tear down the transport.
    ///
    /// Best-effort: remote close failures are logged, never raised, and
    /// the transport is torn down unconditionally.
    pub async fn close(&mut self) {
        let mut adapter = self.adapter.lock().await;
        if let Err(error) = adapter.close_session().await {
            warn!(error = %error, "remote session close failed");
        }
        if let Err(error) = adapter.shutdown().await {
            debug!(error = %error, "transport teardown failed");
        }
        self.session = None;
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("session", &self.session)
            .field("server_version", &self.server_version)
            .field("webserver_address", &self.webserver_address)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RpcError;
    use crate::protocol::messages::PROTOCOL_V2;
    use crate::protocol::mocks::MockAdapter;
    use crate::protocol::SessionInfo;

    fn manager(mock: MockAdapter) -> SessionManager {
        SessionManager::new(Arc::new(Mutex::new(mock)), 4)
    }

    fn session_info() -> SessionInfo {
        SessionInfo {
            session_id: "s-42".to_string(),
            protocol_version: PROTOCOL_V2,
        }
    }

    fn sample_options() -> Vec<ServerOption> {
        vec![
            ServerOption {
                name: "MEM_LIMIT".to_string(),
                value: "0".to_string(),
                level: OptionLevel::Regular,
            },
            ServerOption {
                name: "DEBUG_ACTION".to_string(),
                value: String::new(),
                level: OptionLevel::Development,
            },
        ]
    }

    #[tokio::test]
    async fn test_open_stores_options_case_insensitively() {
        let mut mock = MockAdapter::new();
        mock.expect_open_session()
            .times(1)
            .returning(|_, _| Ok(session_info()));
        mock.expect_protocol_version().return_const(PROTOCOL_V2);
        mock.expect_server_options()
            .times(1)
            .returning(|| Ok(sample_options()));

        let mut manager = manager(mock);
        manager.open("alice", &HashMap::new()).await.unwrap();

        let session = manager.session().unwrap();
        assert_eq!(session.id(), "s-42");
        assert_eq!(session.protocol_version(), PROTOCOL_V2);
        assert_eq!(session.default_value("mem_limit"), Some("0"));
        assert_eq!(session.default_value("MEM_LIMIT"), Some("0"));
        assert_eq!(
            session.option_level("Debug_Action"),
            Some(OptionLevel::Development)
        );
        assert!(session.option("no_such_option").is_none());

        let names: Vec<&str> = session.options().iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["DEBUG_ACTION", "MEM_LIMIT"]);
    }

    #[tokio::test]
    async fn test_open_asserts_protocol_version() {
        let mut mock = MockAdapter::new();
        mock.expect_open_session().times(1).returning(|_, _| {
            Ok(SessionInfo {
                session_id: "s-1".to_string(),
                protocol_version: 1,
            })
        });
        mock.expect_protocol_version().return_const(PROTOCOL_V2);

        let mut manager = manager(mock);
        let err = manager.open("alice", &HashMap::new()).await.unwrap_err();
        match err {
            ClientError::Connection(ConnectionError::VersionMismatch { expected, actual }) => {
                assert_eq!(expected, "V2");
                assert_eq!(actual, "V1");
            }
            other => panic!("expected VersionMismatch, got {:?}", other),
        }
        assert!(manager.session().is_none());
    }

    #[tokio::test]
    async fn test_bootstrap_stops_on_missing_server_support() {
        let mut mock = MockAdapter::new();
        mock.expect_open_session()
            .times(1)
            .returning(|_, _| Ok(session_info()));
        mock.expect_protocol_version().return_const(PROTOCOL_V2);
        mock.expect_server_options().times(1).returning(|| {
            Err(RpcError::MissingServerMethod {
                method: "Execute".to_string(),
            }
            .into())
        });

        let mut manager = manager(mock);
        manager.open("alice", &HashMap::new()).await.unwrap();
        assert!(manager.session().unwrap().options().is_empty());
    }

    #[tokio::test]
    async fn test_bootstrap_retries_transient_failures() {
        let mut mock = MockAdapter::new();
        mock.expect_open_session()
            .times(1)
            .returning(|_, _| Ok(session_info()));
        mock.expect_protocol_version().return_const(PROTOCOL_V2);

        let mut calls = 0;
        mock.expect_server_options().times(3).returning(move || {
            calls += 1;
            if calls < 3 {
                Err(RpcError::Disconnected("connection reset".to_string()).into())
            } else {
                Ok(sample_options())
            }
        });

        let mut manager = manager(mock);
        manager.open("alice", &HashMap::new()).await.unwrap();
        assert_eq!(manager.session().unwrap().options().len(), 2);
    }

    #[tokio::test]
    async fn test_bootstrap_exhaustion_yields_empty_options() {
        let mut mock = MockAdapter::new();
        mock.expect_open_session()
            .times(1)
            .returning(|_, _| Ok(session_info()));
        mock.expect_protocol_version().return_const(PROTOCOL_V2);
        mock.expect_server_options()
            .times(4)
            .returning(|| Err(RpcError::Disconnected("connection reset".to_string()).into()));

        let mut manager = manager(mock);
        manager.open("alice", &HashMap::new()).await.unwrap();
        assert!(manager.session().unwrap().options().is_empty());
    }

    #[tokio::test]
    async fn test_ping_caches_version_and_webserver() {
        let mut mock = MockAdapter::new();
        let mut pings = 0;
        mock.expect_ping().times(2).returning(move || {
            pings += 1;
            Ok(ServerStatus {
                version: "kestrel 4.2.0".to_string(),
                webserver_address: if pings == 1 {
                    Some("http://coord-1:25000".to_string())
                } else {
                    None
                },
            })
        });

        let mut manager = manager(mock);
        let status = manager.ping().await.unwrap();
        assert_eq!(status.version, "kestrel 4.2.0");
        assert_eq!(manager.webserver_address(), Some("http://coord-1:25000"));

        // A later ping without an address keeps the cached one.
        manager.ping().await.unwrap();
        assert_eq!(manager.webserver_address(), Some("http://coord-1:25000"));
        assert_eq!(manager.server_version(), Some("kestrel 4.2.0"));
    }

    #[tokio::test]
    async fn test_close_is_best_effort() {
        let mut mock = MockAdapter::new();
        mock.expect_open_session()
            .times(1)
            .returning(|_, _| Ok(session_info()));
        mock.expect_protocol_version().return_const(PROTOCOL_V2);
        mock.expect_server_options()
            .times(1)
            .returning(|| Ok(vec![]));
        mock.expect_close_session()
            .times(1)
            .returning(|| Err(RpcError::Disconnected("broken pipe".to_string()).into()));
        mock.expect_shutdown().times(1).returning(|| Ok(()));

        let mut manager = manager(mock);
        manager.open("alice", &HashMap::new()).await.unwrap();
        assert!(manager.session().is_some());

        manager.close().await;
        assert!(manager.session().is_none());
    }
}
