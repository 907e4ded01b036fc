//! Extended (v2) service adapter.
//!
//! The full-capability contract: session-scoped calls, columnar fetch,
//! DML statistics, runtime profiles and summaries with failed-attempt
//! retrieval, and server option metadata via a synthetic administrative
//! query. Every response carries a [`Status`] that this adapter translates
//! into the crate's error taxonomy before anything reaches the engine.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{ClientError, QueryError, RpcError, TransportError};
use crate::protocol::messages::{
    CancelRequest, CloseDmlRequest, CloseRequest, CloseSessionRequest, ColumnBatch, ColumnValues,
    ExecuteRequest, FetchRequest, GetLogRequest, GetProfileRequest, GetStateRequest,
    GetSummaryRequest, MetadataRequest, OpenSessionRequest, PingRequest, QueryId, Request,
    Response, Status, StatusCode, PROTOCOL_V2,
};
use crate::protocol::{
    BatchPayload, DmlResult, ProtocolAdapter, ProtocolHandle, QueryProfile, QueryStatus,
    QuerySummary, RawBatch, ServerOption, ServerStatus, SessionInfo, Submission,
};
use crate::rpc::{CallContext, CancelSignal, RpcDispatcher};
use crate::types::{OptionLevel, Schema};

/// Synthetic administrative statement enumerating every server option.
const OPTIONS_STATEMENT: &str = "SET ALL";

/// Batch size for the option listing; the listing is a few hundred rows.
const OPTIONS_FETCH_SIZE: i64 = 1024;

/// Adapter for the extended (v2) service.
pub struct ExtendedProtocol {
    rpc: RpcDispatcher,
    session_id: String,
}

impl ExtendedProtocol {
    /// Wrap a dispatcher whose transport speaks the extended service.
    pub fn new(rpc: RpcDispatcher) -> Self {
        Self {
            rpc,
            session_id: String::new(),
        }
    }

    fn ctx(&self, method: &'static str, idempotent: bool) -> CallContext {
        let ctx = CallContext::new(method, idempotent);
        if self.session_id.is_empty() {
            ctx
        } else {
            ctx.with_session_id(self.session_id.clone())
        }
    }

    fn query_ctx(
        &self,
        method: &'static str,
        idempotent: bool,
        id: &QueryId,
        suppress: bool,
    ) -> CallContext {
        let ctx = self.ctx(method, idempotent).with_query_id(id.to_string());
        if suppress {
            ctx.with_cancel_suppression()
        } else {
            ctx
        }
    }

    /// Translate an error status. When `suppress` is set and cancellation
    /// was requested, the server error is reported as the suppressed
    /// cancel signal instead.
    fn check(&self, method: &str, status: &Status, suppress: bool) -> Result<(), ClientError> {
        if !status.is_error() {
            return Ok(());
        }
        if suppress && self.rpc.cancel_signal().is_set() {
            debug!(method, "error status classified as cancellation");
            return Err(RpcError::Cancelled.into());
        }
        match status.code {
            StatusCode::InvalidHandle => {
                let message = if status.message.is_empty() {
                    "invalid or unknown query handle".to_string()
                } else {
                    status.message.clone()
                };
                Err(QueryError::State { message }.into())
            }
            _ => Err(RpcError::Server {
                message: status.message.clone(),
                sql_state: status.sql_state.clone(),
            }
            .into()),
        }
    }

    fn extended_id(method: &'static str, handle: &ProtocolHandle) -> Result<QueryId, ClientError> {
        match handle {
            ProtocolHandle::Extended(id) => Ok(*id),
            ProtocolHandle::Legacy(_) => Err(RpcError::Application {
                method: method.to_string(),
                message: "query handle does not belong to the extended service".to_string(),
            }
            .into()),
        }
    }

    /// Drain and parse the option-listing result set. Rows are
    /// (name, value, level) text triples.
    async fn collect_options(
        &mut self,
        handle: &ProtocolHandle,
    ) -> Result<Vec<ServerOption>, ClientError> {
        let mut options = Vec::new();
        loop {
            let batch = self.fetch(handle, OPTIONS_FETCH_SIZE).await?;
            let columns = match batch.payload {
                BatchPayload::Columnar(columns) => columns,
                BatchPayload::TextRows(_) => unreachable!("extended fetch is columnar"),
            };
            if !columns.is_empty() {
                options.extend(parse_option_rows(&columns)?);
            }
            if !batch.has_more {
                return Ok(options);
            }
        }
    }
}

#[async_trait]
impl ProtocolAdapter for ExtendedProtocol {
    fn protocol_version(&self) -> u16 {
        PROTOCOL_V2
    }

    async fn open_session(
        &mut self,
        user: &str,
        options: &HashMap<String, String>,
    ) -> Result<SessionInfo, ClientError> {
        let ctx = self.ctx("OpenSession", true);
        let request = Request::OpenSession(OpenSessionRequest {
            username: user.to_string(),
            requested_version: PROTOCOL_V2,
            configuration: options.clone(),
        });
        match self.rpc.invoke(ctx, &request).await? {
            Response::OpenSession(reply) => {
                self.check("OpenSession", &reply.status, false)?;
                // Captured before any version assertion upstream, so a
                // mismatched session can still be closed cleanly.
                self.session_id = reply.session_id.clone();
                Ok(SessionInfo {
                    session_id: reply.session_id,
                    protocol_version: reply.protocol_version,
                })
            }
            other => Err(unexpected("OpenSession", other)),
        }
    }

    async fn ping(&mut self) -> Result<ServerStatus, ClientError> {
        let ctx = self.ctx("Ping", true);
        let request = Request::Ping(PingRequest {
            session_id: self.session_id.clone(),
        });
        match self.rpc.invoke(ctx, &request).await? {
            Response::Ping(reply) => {
                self.check("Ping", &reply.status, false)?;
                Ok(ServerStatus {
                    version: reply.version,
                    webserver_address: none_if_empty(reply.webserver_address),
                })
            }
            other => Err(unexpected("Ping", other)),
        }
    }

    async fn execute(
        &mut self,
        statement: &str,
        options: &HashMap<String, String>,
    ) -> Result<Submission, ClientError> {
        let ctx = self.ctx("Execute", false);
        let request = Request::Execute(ExecuteRequest {
            session_id: self.session_id.clone(),
            statement: statement.to_string(),
            options: options.clone(),
        });
        match self.rpc.invoke(ctx, &request).await? {
            Response::Execute(reply) => {
                self.check("Execute", &reply.status, false)?;
                let query_id = reply.query_id.ok_or_else(|| RpcError::Application {
                    method: "Execute".to_string(),
                    message: "successful execute carried no query id".to_string(),
                })?;
                Ok(Submission {
                    handle: ProtocolHandle::Extended(query_id),
                    has_result_set: reply.has_result_set,
                    schema: None,
                })
            }
            other => Err(unexpected("Execute", other)),
        }
    }

    async fn result_metadata(&mut self, handle: &ProtocolHandle) -> Result<Schema, ClientError> {
        let id = Self::extended_id("GetResultMetadata", handle)?;
        let ctx = self.query_ctx("GetResultMetadata", true, &id, true);
        let request = Request::GetResultMetadata(MetadataRequest { query_id: id });
        match self.rpc.invoke(ctx, &request).await? {
            Response::GetResultMetadata(reply) => {
                self.check("GetResultMetadata", &reply.status, true)?;
                Ok(reply.schema)
            }
            other => Err(unexpected("GetResultMetadata", other)),
        }
    }

    async fn fetch(
        &mut self,
        handle: &ProtocolHandle,
        max_rows: i64,
    ) -> Result<RawBatch, ClientError> {
        let id = Self::extended_id("Fetch", handle)?;
        let ctx = self.query_ctx("Fetch", false, &id, true);
        let request = Request::Fetch(FetchRequest {
            query_id: id,
            max_rows,
        });
        match self.rpc.invoke(ctx, &request).await? {
            Response::Fetch(reply) => {
                self.check("Fetch", &reply.status, true)?;
                Ok(RawBatch {
                    payload: BatchPayload::Columnar(reply.columns),
                    has_more: reply.has_more,
                })
            }
            other => Err(unexpected("Fetch", other)),
        }
    }

    async fn query_state(&mut self, handle: &ProtocolHandle) -> Result<QueryStatus, ClientError> {
        let id = Self::extended_id("GetState", handle)?;
        let ctx = self.query_ctx("GetState", true, &id, true);
        let request = Request::GetState(GetStateRequest { query_id: id });
        match self.rpc.invoke(ctx, &request).await? {
            Response::GetState(reply) => {
                self.check("GetState", &reply.status, true)?;
                Ok(QueryStatus {
                    state: reply.state,
                    error_message: reply.error_message,
                })
            }
            other => Err(unexpected("GetState", other)),
        }
    }

    async fn cancel(&mut self, handle: &ProtocolHandle) -> Result<(), ClientError> {
        let id = Self::extended_id("Cancel", handle)?;
        let ctx = self.query_ctx("Cancel", true, &id, false);
        let request = Request::Cancel(CancelRequest { query_id: id });
        match self.rpc.invoke(ctx, &request).await? {
            Response::Cancel(reply) => self.check("Cancel", &reply.status, false),
            other => Err(unexpected("Cancel", other)),
        }
    }

    async fn close(&mut self, handle: &ProtocolHandle) -> Result<(), ClientError> {
        let id = Self::extended_id("Close", handle)?;
        let ctx = self.query_ctx("Close", true, &id, false);
        let request = Request::Close(CloseRequest { query_id: id });
        match self.rpc.invoke(ctx, &request).await? {
            Response::Close(reply) => self.check("Close", &reply.status, false),
            other => Err(unexpected("Close", other)),
        }
    }

    async fn close_dml(&mut self, handle: &ProtocolHandle) -> Result<DmlResult, ClientError> {
        let id = Self::extended_id("CloseDml", handle)?;
        let ctx = self.query_ctx("CloseDml", false, &id, false);
        let request = Request::CloseDml(CloseDmlRequest { query_id: id });
        match self.rpc.invoke(ctx, &request).await? {
            Response::CloseDml(reply) => {
                self.check("CloseDml", &reply.status, false)?;
                let stats = reply.dml_stats.ok_or_else(|| RpcError::Application {
                    method: "CloseDml".to_string(),
                    message: "response carried no DML statistics".to_string(),
                })?;
                Ok(DmlResult {
                    rows_modified: stats.rows_modified.values().sum(),
                    rows_deleted: stats.rows_deleted.map(|per| per.values().sum()),
                    row_errors: stats.num_row_errors.unwrap_or(0),
                })
            }
            other => Err(unexpected("CloseDml", other)),
        }
    }

    async fn get_log(&mut self, handle: &ProtocolHandle) -> Result<String, ClientError> {
        let id = Self::extended_id("GetLog", handle)?;
        let ctx = self.query_ctx("GetLog", true, &id, true);
        let request = Request::GetLog(GetLogRequest { query_id: id });
        match self.rpc.invoke(ctx, &request).await? {
            Response::GetLog(reply) => {
                self.check("GetLog", &reply.status, true)?;
                Ok(reply.log)
            }
            other => Err(unexpected("GetLog", other)),
        }
    }

    async fn get_profile(
        &mut self,
        handle: &ProtocolHandle,
        include_failed: bool,
    ) -> Result<QueryProfile, ClientError> {
        let id = Self::extended_id("GetProfile", handle)?;
        let ctx = self.query_ctx("GetProfile", true, &id, true);
        let request = Request::GetProfile(GetProfileRequest {
            query_id: id,
            include_failed,
        });
        match self.rpc.invoke(ctx, &request).await? {
            Response::GetProfile(reply) => {
                self.check("GetProfile", &reply.status, true)?;
                Ok(QueryProfile {
                    latest: reply.profile,
                    failed_attempt: reply.failed_profile,
                })
            }
            other => Err(unexpected("GetProfile", other)),
        }
    }

    async fn get_summary(
        &mut self,
        handle: &ProtocolHandle,
        include_failed: bool,
    ) -> Result<QuerySummary, ClientError> {
        let id = Self::extended_id("GetSummary", handle)?;
        let ctx = self.query_ctx("GetSummary", true, &id, true);
        let request = Request::GetSummary(GetSummaryRequest {
            query_id: id,
            include_failed,
        });
        match self.rpc.invoke(ctx, &request).await? {
            Response::GetSummary(reply) => {
                self.check("GetSummary", &reply.status, true)?;
                Ok(QuerySummary {
                    latest: reply.summary,
                    failed_attempt: reply.failed_summary,
                })
            }
            other => Err(unexpected("GetSummary", other)),
        }
    }

    async fn server_options(&mut self) -> Result<Vec<ServerOption>, ClientError> {
        let submission = self.execute(OPTIONS_STATEMENT, &HashMap::new()).await?;
        let handle = submission.handle;
        if !submission.has_result_set {
            let _ = self.close(&handle).await;
            return Ok(Vec::new());
        }
        let collected = self.collect_options(&handle).await;
        if let Err(error) = self.close(&handle).await {
            debug!(error = %error, "failed to close the option-listing query");
        }
        collected
    }

    async fn close_session(&mut self) -> Result<(), ClientError> {
        if self.session_id.is_empty() {
            return Ok(());
        }
        let ctx = self.ctx("CloseSession", true);
        let request = Request::CloseSession(CloseSessionRequest {
            session_id: self.session_id.clone(),
        });
        match self.rpc.invoke(ctx, &request).await? {
            Response::CloseSession(reply) => {
                self.check("CloseSession", &reply.status, false)?;
                self.session_id.clear();
                Ok(())
            }
            other => Err(unexpected("CloseSession", other)),
        }
    }

    fn cancel_signal(&self) -> CancelSignal {
        self.rpc.cancel_signal()
    }

    fn endpoint(&self) -> &str {
        self.rpc.endpoint()
    }

    async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.rpc.shutdown().await
    }
}

impl std::fmt::Debug for ExtendedProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtendedProtocol")
            .field("endpoint", &self.rpc.endpoint())
            .field("session_id", &self.session_id)
            .finish()
    }
}

/// Map a mismatched response frame: a declared-unknown method becomes
/// `MissingServerMethod`, anything else is a protocol violation.
fn unexpected(method: &'static str, response: Response) -> ClientError {
    match response {
        Response::UnknownMethod(name) => RpcError::MissingServerMethod { method: name }.into(),
        other => TransportError::InvalidResponse(format!(
            "{} reply was a {} frame",
            method,
            variant_name(&other)
        ))
        .into(),
    }
}

fn variant_name(response: &Response) -> &'static str {
    match response {
        Response::OpenSession(_) => "OpenSession",
        Response::Ping(_) => "Ping",
        Response::Execute(_) => "Execute",
        Response::GetResultMetadata(_) => "GetResultMetadata",
        Response::Fetch(_) => "Fetch",
        Response::GetState(_) => "GetState",
        Response::Cancel(_) => "Cancel",
        Response::Close(_) => "Close",
        Response::CloseDml(_) => "CloseDml",
        Response::GetLog(_) => "GetLog",
        Response::GetProfile(_) => "GetProfile",
        Response::GetSummary(_) => "GetSummary",
        Response::CloseSession(_) => "CloseSession",
        Response::UnknownMethod(_) => "UnknownMethod",
    }
}

fn none_if_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Parse option-listing batch columns into (name, value, level) triples.
fn parse_option_rows(columns: &[ColumnBatch]) -> Result<Vec<ServerOption>, ClientError> {
    if columns.len() < 3 {
        return Err(RpcError::Application {
            method: "Fetch".to_string(),
            message: format!(
                "option listing returned {} columns, expected at least 3",
                columns.len()
            ),
        }
        .into());
    }
    let names = text_column(&columns[0])?;
    let values = text_column(&columns[1])?;
    let levels = text_column(&columns[2])?;

    let mut options = Vec::with_capacity(names.len());
    for (i, name) in names.iter().enumerate() {
        if name.is_empty() {
            continue;
        }
        let value = values.get(i).cloned().unwrap_or_default();
        let level = levels
            .get(i)
            .map(|l| OptionLevel::from_name(l))
            .unwrap_or(OptionLevel::Development);
        options.push(ServerOption {
            name: name.clone(),
            value,
            level,
        });
    }
    Ok(options)
}

fn text_column(column: &ColumnBatch) -> Result<&Vec<String>, ClientError> {
    match &column.values {
        ColumnValues::Text(values) => Ok(values),
        other => Err(RpcError::Application {
            method: "Fetch".to_string(),
            message: format!(
                "option listing returned a non-text column of {} rows",
                other.len()
            ),
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::protocol::messages::{
        wire_config, BasicResponse, CloseDmlResponse, DmlStats, ExecuteResponse, FetchResponse,
        GetStateResponse, OpenSessionResponse, OperationState, PingResponse,
    };
    use crate::transport::RpcTransport;
    use mockall::mock;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    mock! {
        pub Transport {}

        #[async_trait]
        impl RpcTransport for Transport {
            async fn exchange(&mut self, ctx: &CallContext, payload: &[u8]) -> Result<Vec<u8>, TransportError>;
            fn supports_retries(&self) -> bool;
            fn take_retry_after(&mut self) -> Option<Duration>;
            async fn shutdown(&mut self) -> Result<(), TransportError>;
            fn endpoint(&self) -> &str;
        }
    }

    fn encode(response: &Response) -> Vec<u8> {
        bincode::encode_to_vec(response, wire_config()).unwrap()
    }

    fn decode(payload: &[u8]) -> Request {
        bincode::decode_from_slice(payload, wire_config()).unwrap().0
    }

    fn adapter_with<F>(calls: usize, respond: F) -> ExtendedProtocol
    where
        F: Fn(&CallContext, Request) -> Response + Send + 'static,
    {
        let mut mock = MockTransport::new();
        mock.expect_supports_retries().returning(|| false);
        mock.expect_exchange()
            .times(calls)
            .returning(move |ctx, payload| Ok(encode(&respond(ctx, decode(payload)))));
        ExtendedProtocol::new(RpcDispatcher::new(Box::new(mock), 4, 0, None))
    }

    fn query_id() -> QueryId {
        QueryId { lo: 7, hi: 9 }
    }

    fn handle() -> ProtocolHandle {
        ProtocolHandle::Extended(query_id())
    }

    fn open_session_reply() -> Response {
        Response::OpenSession(OpenSessionResponse {
            status: Status::ok(),
            session_id: "s-42".to_string(),
            protocol_version: PROTOCOL_V2,
        })
    }

    #[tokio::test]
    async fn test_open_session_scopes_later_calls() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&seen);
        let mut adapter = adapter_with(2, move |ctx, request| {
            captured
                .lock()
                .unwrap()
                .push((ctx.session_id.clone(), request.clone()));
            match request {
                Request::OpenSession(_) => open_session_reply(),
                Request::Execute(_) => Response::Execute(ExecuteResponse {
                    status: Status::ok(),
                    query_id: Some(query_id()),
                    has_result_set: true,
                }),
                other => panic!("unexpected request: {:?}", other),
            }
        });

        let info = adapter
            .open_session("alice", &HashMap::new())
            .await
            .unwrap();
        assert_eq!(info.session_id, "s-42");
        assert_eq!(info.protocol_version, PROTOCOL_V2);

        let submission = adapter.execute("SELECT 1", &HashMap::new()).await.unwrap();
        assert!(submission.has_result_set);
        assert!(submission.schema.is_none());
        assert_eq!(submission.handle.display_id(), query_id().to_string());

        let calls = seen.lock().unwrap();
        // Trace context carries the captured session id on the second call.
        assert_eq!(calls[0].0, None);
        assert_eq!(calls[1].0.as_deref(), Some("s-42"));
        match &calls[1].1 {
            Request::Execute(execute) => assert_eq!(execute.session_id, "s-42"),
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_execute_without_query_id_is_application_error() {
        let mut adapter = adapter_with(1, |_, _| {
            Response::Execute(ExecuteResponse {
                status: Status::ok(),
                query_id: None,
                has_result_set: false,
            })
        });
        let err = adapter
            .execute("SELECT 1", &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::Rpc(RpcError::Application { ref method, .. }) if method == "Execute"
        ));
    }

    #[tokio::test]
    async fn test_error_status_becomes_server_error() {
        let mut adapter = adapter_with(1, |_, _| {
            Response::GetState(GetStateResponse {
                status: Status {
                    code: StatusCode::Error,
                    message: "AnalysisException: table not found".to_string(),
                    sql_state: Some("HY000".to_string()),
                },
                state: OperationState::Error,
                error_message: None,
            })
        });
        let err = adapter.query_state(&handle()).await.unwrap_err();
        match err {
            ClientError::Rpc(RpcError::Server { message, sql_state }) => {
                assert!(message.contains("AnalysisException"));
                assert_eq!(sql_state.as_deref(), Some("HY000"));
            }
            other => panic!("expected Server error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_handle_status_becomes_query_state_error() {
        let mut adapter = adapter_with(1, |_, _| {
            Response::Close(BasicResponse {
                status: Status {
                    code: StatusCode::InvalidHandle,
                    message: String::new(),
                    sql_state: None,
                },
            })
        });
        let err = adapter.close(&handle()).await.unwrap_err();
        assert!(matches!(err, ClientError::Query(QueryError::State { .. })));
    }

    #[tokio::test]
    async fn test_unknown_method_reply_is_missing_server_method() {
        let mut adapter =
            adapter_with(1, |_, _| Response::UnknownMethod("GetSummary".to_string()));
        let err = adapter.get_summary(&handle(), false).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Rpc(RpcError::MissingServerMethod { ref method }) if method == "GetSummary"
        ));
    }

    #[tokio::test]
    async fn test_mismatched_reply_is_invalid_response() {
        let mut adapter = adapter_with(1, |_, _| open_session_reply());
        let err = adapter.get_log(&handle()).await.unwrap_err();
        match err {
            ClientError::Transport(TransportError::InvalidResponse(message)) => {
                assert!(message.contains("GetLog"));
                assert!(message.contains("OpenSession"));
            }
            other => panic!("expected InvalidResponse, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_close_dml_sums_partition_stats() {
        let mut adapter = adapter_with(1, |_, _| {
            let mut rows_modified = HashMap::new();
            rows_modified.insert("p1".to_string(), 10i64);
            rows_modified.insert("p2".to_string(), 5i64);
            let mut rows_deleted = HashMap::new();
            rows_deleted.insert("p1".to_string(), 2i64);
            Response::CloseDml(CloseDmlResponse {
                status: Status::ok(),
                dml_stats: Some(DmlStats {
                    rows_modified,
                    rows_deleted: Some(rows_deleted),
                    num_row_errors: Some(1),
                }),
            })
        });
        let result = adapter.close_dml(&handle()).await.unwrap();
        assert_eq!(result.rows_modified, 15);
        assert_eq!(result.rows_deleted, Some(2));
        assert_eq!(result.row_errors, 1);
    }

    #[tokio::test]
    async fn test_close_dml_without_stats_is_application_error() {
        let mut adapter = adapter_with(1, |_, _| {
            Response::CloseDml(CloseDmlResponse {
                status: Status::ok(),
                dml_stats: None,
            })
        });
        let err = adapter.close_dml(&handle()).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Rpc(RpcError::Application { ref method, .. }) if method == "CloseDml"
        ));
    }

    #[tokio::test]
    async fn test_close_dml_transient_failure_gets_one_attempt() {
        // Even on a retry-capable transport, a finalizing write is never
        // re-issued: exactly one exchange, then the failure surfaces.
        let mut mock = MockTransport::new();
        mock.expect_supports_retries().returning(|| true);
        mock.expect_exchange().times(1).returning(|ctx, _| {
            assert_eq!(ctx.method, "CloseDml");
            assert!(!ctx.idempotent);
            Err(TransportError::Io("connection reset".to_string()))
        });

        let mut adapter = ExtendedProtocol::new(RpcDispatcher::new(Box::new(mock), 4, 0, None));
        let err = adapter.close_dml(&handle()).await.unwrap_err();
        assert!(matches!(err, ClientError::Rpc(RpcError::Disconnected(_))));
    }

    #[tokio::test]
    async fn test_legacy_handle_is_rejected() {
        let mut adapter = adapter_with(0, |_, _| unreachable!());
        let legacy = ProtocolHandle::Legacy(crate::protocol::messages::LegacyHandle {
            id: "q".to_string(),
            log_context: "q".to_string(),
        });
        let err = adapter.cancel(&legacy).await.unwrap_err();
        assert!(matches!(err, ClientError::Rpc(RpcError::Application { .. })));
    }

    #[tokio::test]
    async fn test_cancel_flag_suppresses_error_status() {
        let mut adapter = adapter_with(1, |_, _| {
            Response::Fetch(FetchResponse {
                status: Status::error("query expired"),
                columns: vec![],
                has_more: false,
            })
        });
        adapter.cancel_signal().set();
        let err = adapter.fetch(&handle(), 1024).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_fetch_suppression_is_flagged_in_context() {
        let mut adapter = adapter_with(1, |ctx, _| {
            assert!(ctx.suppress_on_cancel);
            assert!(!ctx.idempotent);
            assert_eq!(ctx.query_id.as_deref(), Some(query_id().to_string()).as_deref());
            Response::Fetch(FetchResponse {
                status: Status::ok(),
                columns: vec![],
                has_more: false,
            })
        });
        let batch = adapter.fetch(&handle(), 16).await.unwrap();
        assert!(!batch.has_more);
    }

    #[tokio::test]
    async fn test_server_options_bootstrap() {
        let mut adapter = adapter_with(3, |_, request| match request {
            Request::Execute(execute) => {
                assert_eq!(execute.statement, OPTIONS_STATEMENT);
                Response::Execute(ExecuteResponse {
                    status: Status::ok(),
                    query_id: Some(query_id()),
                    has_result_set: true,
                })
            }
            Request::Fetch(_) => Response::Fetch(FetchResponse {
                status: Status::ok(),
                columns: vec![
                    ColumnBatch {
                        values: ColumnValues::Text(vec![
                            "MEM_LIMIT".to_string(),
                            "DEBUG_ACTION".to_string(),
                            String::new(),
                        ]),
                        nulls: vec![],
                    },
                    ColumnBatch {
                        values: ColumnValues::Text(vec![
                            "0".to_string(),
                            String::new(),
                            String::new(),
                        ]),
                        nulls: vec![],
                    },
                    ColumnBatch {
                        values: ColumnValues::Text(vec![
                            "REGULAR".to_string(),
                            "DEVELOPMENT".to_string(),
                            String::new(),
                        ]),
                        nulls: vec![],
                    },
                ],
                has_more: false,
            }),
            Request::Close(_) => Response::Close(BasicResponse {
                status: Status::ok(),
            }),
            other => panic!("unexpected request: {:?}", other),
        });

        let options = adapter.server_options().await.unwrap();
        assert_eq!(options.len(), 2);
        assert_eq!(options[0].name, "MEM_LIMIT");
        assert_eq!(options[0].value, "0");
        assert_eq!(options[0].level, OptionLevel::Regular);
        assert_eq!(options[1].name, "DEBUG_ACTION");
        assert_eq!(options[1].level, OptionLevel::Development);
    }

    #[tokio::test]
    async fn test_server_options_without_result_set_is_empty() {
        let mut adapter = adapter_with(2, |_, request| match request {
            Request::Execute(_) => Response::Execute(ExecuteResponse {
                status: Status::ok(),
                query_id: Some(query_id()),
                has_result_set: false,
            }),
            Request::Close(_) => Response::Close(BasicResponse {
                status: Status::ok(),
            }),
            other => panic!("unexpected request: {:?}", other),
        });
        let options = adapter.server_options().await.unwrap();
        assert!(options.is_empty());
    }

    #[tokio::test]
    async fn test_ping_maps_empty_webserver_to_none() {
        let mut adapter = adapter_with(1, |_, _| {
            Response::Ping(PingResponse {
                status: Status::ok(),
                version: "kestrel 4.2.0".to_string(),
                webserver_address: String::new(),
            })
        });
        let status = adapter.ping().await.unwrap();
        assert_eq!(status.version, "kestrel 4.2.0");
        assert!(status.webserver_address.is_none());
    }

    #[tokio::test]
    async fn test_close_session_without_open_is_a_no_op() {
        let mut adapter = adapter_with(0, |_, _| unreachable!());
        adapter.close_session().await.unwrap();
    }
}
