//! Protocol adapters: the RPC vocabulary the query engine speaks.
//!
//! The engine never addresses a wire service directly. It calls
//! [`ProtocolAdapter`] methods on a trait object selected at connection
//! time: [`ExtendedProtocol`] for the v2 service, [`LegacyProtocol`] for
//! the v1 service. Adapters own the request/response shaping, the
//! idempotency classification of each call, and the translation of
//! server status codes into the crate's error taxonomy. Everything above
//! this module is ignorant of which variant is active.

pub mod extended;
pub mod legacy;
pub mod messages;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::connection::ConnectionParams;
use crate::error::{ClientError, TransportError};
use crate::protocol::messages::{ColumnBatch, ExecSummary, LegacyHandle, OperationState, QueryId};
use crate::rpc::{CancelSignal, RpcDispatcher};
use crate::types::{OptionLevel, Schema};

pub use extended::ExtendedProtocol;
pub use legacy::LegacyProtocol;

/// Session facts returned by [`ProtocolAdapter::open_session`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Server-issued session identifier; empty on the legacy service,
    /// where the session is the connection
    pub session_id: String,
    /// Protocol version the server negotiated
    pub protocol_version: u16,
}

/// Liveness facts returned by [`ProtocolAdapter::ping`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStatus {
    /// Engine build version string
    pub version: String,
    /// Debug webserver address, when the server reports one
    pub webserver_address: Option<String>,
}

/// Wire-level query handle, opaque above the adapter.
///
/// The engine threads handles back into adapter calls without inspecting
/// them; only [`display_id`](Self::display_id) is meaningful upstream.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolHandle {
    /// Extended-service 128-bit query id
    Extended(QueryId),
    /// Legacy-service opaque handle
    Legacy(LegacyHandle),
}

impl ProtocolHandle {
    /// The identifier as the engine's logs and web UI render it.
    pub fn display_id(&self) -> String {
        match self {
            ProtocolHandle::Extended(id) => id.to_string(),
            ProtocolHandle::Legacy(handle) => handle.id.clone(),
        }
    }
}

/// Outcome of a successful submit.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    /// Handle for all subsequent calls on this query
    pub handle: ProtocolHandle,
    /// True when the statement produces rows
    pub has_result_set: bool,
    /// Result schema when the service delivers it at submit time (the
    /// legacy service does); `None` means fetch it via
    /// [`ProtocolAdapter::result_metadata`]
    pub schema: Option<Schema>,
}

/// Server-side query status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryStatus {
    /// Current state, in the extended service's vocabulary; legacy states
    /// are mapped onto it
    pub state: OperationState,
    /// Error text accompanying an `Error` state
    pub error_message: Option<String>,
}

/// One fetched batch, before decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBatch {
    /// Row data in the service's native shape
    pub payload: BatchPayload,
    /// True when more rows remain on the server
    pub has_more: bool,
}

/// Row data as carried by the two services.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchPayload {
    /// Columnar values plus null bitmaps (extended service)
    Columnar(Vec<ColumnBatch>),
    /// Pre-rendered tab-separated text rows (legacy service)
    TextRows(Vec<String>),
}

/// DML statistics aggregated across partitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DmlResult {
    /// Total rows written
    pub rows_modified: i64,
    /// Total rows deleted; absent for non-delete statements
    pub rows_deleted: Option<i64>,
    /// Rows rejected by constraint or conversion errors
    pub row_errors: i64,
}

/// Runtime profile of the latest attempt, plus the failed prior attempt
/// when the server retried the query transparently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryProfile {
    /// Profile text of the most recent attempt
    pub latest: String,
    /// Profile text of the failed prior attempt, when present
    pub failed_attempt: Option<String>,
}

/// Execution summary of the latest attempt, plus the failed prior attempt
/// when the server retried the query transparently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySummary {
    /// Summary of the most recent attempt
    pub latest: ExecSummary,
    /// Summary of the failed prior attempt, when present
    pub failed_attempt: Option<ExecSummary>,
}

/// One server query option with its visibility level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerOption {
    /// Option name as the server spells it
    pub name: String,
    /// Current default value
    pub value: String,
    /// Display visibility level
    pub level: OptionLevel,
}

/// The capability set the query engine requires from a wire service.
///
/// Methods take `&mut self`: one call drives the underlying dispatcher at
/// a time, and callers share an adapter behind `Arc<Mutex<_>>`. Each
/// method fixes its own idempotency classification; callers cannot
/// override it.
#[async_trait]
pub trait ProtocolAdapter: Send {
    /// Version this adapter speaks, asserted against the server's answer.
    fn protocol_version(&self) -> u16;

    /// Open the session scope. Idempotent.
    ///
    /// On the legacy service this performs no RPC: the session is the
    /// connection, and `options` are remembered for every later execute.
    async fn open_session(
        &mut self,
        user: &str,
        options: &HashMap<String, String>,
    ) -> Result<SessionInfo, ClientError>;

    /// Liveness probe. Idempotent.
    async fn ping(&mut self) -> Result<ServerStatus, ClientError>;

    /// Submit a statement. Never retried.
    async fn execute(
        &mut self,
        statement: &str,
        options: &HashMap<String, String>,
    ) -> Result<Submission, ClientError>;

    /// Fetch the result schema for a submitted query. Idempotent.
    async fn result_metadata(&mut self, handle: &ProtocolHandle) -> Result<Schema, ClientError>;

    /// Fetch the next batch of rows. Never retried: the server cursor
    /// advances on every attempt.
    async fn fetch(
        &mut self,
        handle: &ProtocolHandle,
        max_rows: i64,
    ) -> Result<RawBatch, ClientError>;

    /// Poll the query state. Idempotent.
    async fn query_state(&mut self, handle: &ProtocolHandle) -> Result<QueryStatus, ClientError>;

    /// Cancel a running query. Idempotent.
    async fn cancel(&mut self, handle: &ProtocolHandle) -> Result<(), ClientError>;

    /// Close a query handle. Idempotent.
    async fn close(&mut self, handle: &ProtocolHandle) -> Result<(), ClientError>;

    /// Close a DML query and collect its write statistics. Never retried.
    ///
    /// # Errors
    ///
    /// Returns `RpcError::Application` when the service was expected to
    /// attach statistics but did not.
    async fn close_dml(&mut self, handle: &ProtocolHandle) -> Result<DmlResult, ClientError>;

    /// Retrieve the raw accumulated query log. Idempotent.
    async fn get_log(&mut self, handle: &ProtocolHandle) -> Result<String, ClientError>;

    /// Retrieve the runtime profile. Idempotent.
    ///
    /// `include_failed` additionally requests the failed prior attempt's
    /// profile on services that retry queries transparently.
    async fn get_profile(
        &mut self,
        handle: &ProtocolHandle,
        include_failed: bool,
    ) -> Result<QueryProfile, ClientError>;

    /// Retrieve the execution summary. Idempotent.
    async fn get_summary(
        &mut self,
        handle: &ProtocolHandle,
        include_failed: bool,
    ) -> Result<QuerySummary, ClientError>;

    /// Enumerate the server's query options and visibility levels.
    ///
    /// The extended service answers via a synthetic administrative query;
    /// the legacy service has a dedicated configuration call. Callers
    /// treat failure as "no options available", so implementations report
    /// errors rather than masking them.
    async fn server_options(&mut self) -> Result<Vec<ServerOption>, ClientError>;

    /// Close the session scope. Idempotent; a no-op on the legacy service.
    async fn close_session(&mut self) -> Result<(), ClientError>;

    /// The cancel flag shared with the underlying dispatcher.
    fn cancel_signal(&self) -> CancelSignal;

    /// Endpoint description of the underlying transport.
    fn endpoint(&self) -> &str;

    /// Tear down the underlying transport.
    async fn shutdown(&mut self) -> Result<(), TransportError>;
}

/// Select the adapter variant for a parameter set.
///
/// Returned behind the shared lock the session manager and query engine
/// both drive; one adapter owns one dispatcher owns one transport.
pub fn adapter_for(params: &ConnectionParams, rpc: RpcDispatcher) -> Arc<Mutex<dyn ProtocolAdapter>> {
    if params.use_legacy {
        Arc::new(Mutex::new(LegacyProtocol::new(rpc)))
    } else {
        Arc::new(Mutex::new(ExtendedProtocol::new(rpc)))
    }
}

#[cfg(test)]
pub(crate) mod mocks {
    //! Shared [`ProtocolAdapter`] mock for engine and session tests.

    use super::*;
    use mockall::mock;

    mock! {
        pub Adapter {}

        #[async_trait]
        impl ProtocolAdapter for Adapter {
            fn protocol_version(&self) -> u16;
            async fn open_session(&mut self, user: &str, options: &HashMap<String, String>) -> Result<SessionInfo, ClientError>;
            async fn ping(&mut self) -> Result<ServerStatus, ClientError>;
            async fn execute(&mut self, statement: &str, options: &HashMap<String, String>) -> Result<Submission, ClientError>;
            async fn result_metadata(&mut self, handle: &ProtocolHandle) -> Result<Schema, ClientError>;
            async fn fetch(&mut self, handle: &ProtocolHandle, max_rows: i64) -> Result<RawBatch, ClientError>;
            async fn query_state(&mut self, handle: &ProtocolHandle) -> Result<QueryStatus, ClientError>;
            async fn cancel(&mut self, handle: &ProtocolHandle) -> Result<(), ClientError>;
            async fn close(&mut self, handle: &ProtocolHandle) -> Result<(), ClientError>;
            async fn close_dml(&mut self, handle: &ProtocolHandle) -> Result<DmlResult, ClientError>;
            async fn get_log(&mut self, handle: &ProtocolHandle) -> Result<String, ClientError>;
            async fn get_profile(&mut self, handle: &ProtocolHandle, include_failed: bool) -> Result<QueryProfile, ClientError>;
            async fn get_summary(&mut self, handle: &ProtocolHandle, include_failed: bool) -> Result<QuerySummary, ClientError>;
            async fn server_options(&mut self) -> Result<Vec<ServerOption>, ClientError>;
            async fn close_session(&mut self) -> Result<(), ClientError>;
            fn cancel_signal(&self) -> CancelSignal;
            fn endpoint(&self) -> &str;
            async fn shutdown(&mut self) -> Result<(), TransportError>;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_display_id() {
        let extended = ProtocolHandle::Extended(QueryId {
            lo: 0x0001020304050607,
            hi: 0x08090a0b0c0d0e0f,
        });
        assert_eq!(extended.display_id(), "0001020304050607:08090a0b0c0d0e0f");

        let legacy = ProtocolHandle::Legacy(LegacyHandle {
            id: "20260823_174233_00042".to_string(),
            log_context: "ctx".to_string(),
        });
        assert_eq!(legacy.display_id(), "20260823_174233_00042");
    }

    #[test]
    fn test_batch_payload_shapes() {
        let columnar = RawBatch {
            payload: BatchPayload::Columnar(vec![]),
            has_more: false,
        };
        assert!(matches!(columnar.payload, BatchPayload::Columnar(ref c) if c.is_empty()));

        let rows = RawBatch {
            payload: BatchPayload::TextRows(vec!["1\ta".to_string()]),
            has_more: true,
        };
        assert!(matches!(rows.payload, BatchPayload::TextRows(ref r) if r.len() == 1));
    }
}
