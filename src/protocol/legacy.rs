//! Legacy (v1) service adapter.
//!
//! The reduced contract spoken on port 21050 by engines predating the
//! extended service. There is no session scope (the session is the
//! connection), no DML statistics, no profiles or summaries, and fetch
//! returns pre-rendered tab-separated text rows. Query options travel
//! with every execute as `key=value` strings; defaults come from a
//! dedicated configuration call instead of a synthetic query.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{ClientError, ConnectionError, RpcError, TransportError};
use crate::protocol::messages::{
    LegacyCancelRequest, LegacyCloseRequest, LegacyExecuteRequest, LegacyFetchRequest,
    LegacyGetDefaultConfigRequest, LegacyGetLogRequest, LegacyGetStateRequest, LegacyHandle,
    LegacyPingRequest, LegacyQueryState, LegacyRequest, LegacyResponse, OperationState,
    PROTOCOL_V1,
};
use crate::protocol::{
    BatchPayload, DmlResult, ProtocolAdapter, ProtocolHandle, QueryProfile, QueryStatus,
    QuerySummary, RawBatch, ServerOption, ServerStatus, SessionInfo, Submission,
};
use crate::rpc::{CallContext, CancelSignal, RpcDispatcher};
use crate::types::{Column, OptionLevel, Schema, TypeTag};

/// Adapter for the legacy (v1) service.
pub struct LegacyProtocol {
    rpc: RpcDispatcher,
    /// `key=value` options applied to every execute, captured at
    /// open-session time
    base_options: Vec<String>,
}

impl LegacyProtocol {
    /// Wrap a dispatcher whose transport speaks the legacy service.
    pub fn new(rpc: RpcDispatcher) -> Self {
        Self {
            rpc,
            base_options: Vec::new(),
        }
    }

    fn query_ctx(
        &self,
        method: &'static str,
        idempotent: bool,
        handle: &LegacyHandle,
        suppress: bool,
    ) -> CallContext {
        let ctx = CallContext::new(method, idempotent).with_query_id(handle.id.clone());
        if suppress {
            ctx.with_cancel_suppression()
        } else {
            ctx
        }
    }

    /// Translate a failed call. When `suppress` is set and cancellation
    /// was requested, the failure is reported as the suppressed cancel
    /// signal instead.
    fn check(
        &self,
        method: &str,
        ok: bool,
        error_message: &str,
        suppress: bool,
    ) -> Result<(), ClientError> {
        if ok {
            return Ok(());
        }
        if suppress && self.rpc.cancel_signal().is_set() {
            debug!(method, "failed call classified as cancellation");
            return Err(RpcError::Cancelled.into());
        }
        let message = if error_message.is_empty() {
            format!("{} failed without a server message", method)
        } else {
            error_message.to_string()
        };
        Err(RpcError::Server {
            message,
            sql_state: None,
        }
        .into())
    }

    fn legacy_handle(
        method: &'static str,
        handle: &ProtocolHandle,
    ) -> Result<LegacyHandle, ClientError> {
        match handle {
            ProtocolHandle::Legacy(h) => Ok(h.clone()),
            ProtocolHandle::Extended(_) => Err(RpcError::Application {
                method: method.to_string(),
                message: "query handle does not belong to the legacy service".to_string(),
            }
            .into()),
        }
    }
}

#[async_trait]
impl ProtocolAdapter for LegacyProtocol {
    fn protocol_version(&self) -> u16 {
        PROTOCOL_V1
    }

    async fn open_session(
        &mut self,
        _user: &str,
        options: &HashMap<String, String>,
    ) -> Result<SessionInfo, ClientError> {
        // No RPC: the legacy session is the connection itself. Options are
        // remembered and travel with every execute.
        self.base_options = options
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect();
        Ok(SessionInfo {
            session_id: String::new(),
            protocol_version: PROTOCOL_V1,
        })
    }

    async fn ping(&mut self) -> Result<ServerStatus, ClientError> {
        let ctx = CallContext::new("ping", true);
        let request = LegacyRequest::Ping(LegacyPingRequest::default());
        match self.rpc.invoke(ctx, &request).await? {
            LegacyResponse::Ping(reply) => {
                self.check("ping", reply.ok, &reply.error_message, false)?;
                Ok(ServerStatus {
                    version: reply.version,
                    webserver_address: none_if_empty(reply.webserver_address),
                })
            }
            other => Err(unexpected("ping", other)),
        }
    }

    async fn execute(
        &mut self,
        statement: &str,
        options: &HashMap<String, String>,
    ) -> Result<Submission, ClientError> {
        let mut configuration = self.base_options.clone();
        configuration.extend(
            options
                .iter()
                .map(|(key, value)| format!("{}={}", key, value)),
        );
        let ctx = CallContext::new("execute", false);
        let request = LegacyRequest::Execute(LegacyExecuteRequest {
            query: statement.to_string(),
            configuration,
        });
        match self.rpc.invoke(ctx, &request).await? {
            LegacyResponse::Execute(reply) => {
                self.check("execute", reply.ok, &reply.error_message, false)?;
                let handle = reply.handle.ok_or_else(|| RpcError::Application {
                    method: "execute".to_string(),
                    message: "successful execute carried no query handle".to_string(),
                })?;
                // Legacy rows are pre-rendered text, so every column is a
                // string as far as decoding is concerned.
                let schema = if reply.has_result_set {
                    Some(Schema {
                        columns: reply
                            .column_names
                            .iter()
                            .map(|name| Column {
                                name: name.clone(),
                                type_tag: TypeTag::String,
                            })
                            .collect(),
                    })
                } else {
                    None
                };
                Ok(Submission {
                    handle: ProtocolHandle::Legacy(handle),
                    has_result_set: reply.has_result_set,
                    schema,
                })
            }
            other => Err(unexpected("execute", other)),
        }
    }

    async fn result_metadata(&mut self, _handle: &ProtocolHandle) -> Result<Schema, ClientError> {
        Err(ConnectionError::NotSupported(
            "the legacy service reports column names at submit time".to_string(),
        )
        .into())
    }

    async fn fetch(
        &mut self,
        handle: &ProtocolHandle,
        max_rows: i64,
    ) -> Result<RawBatch, ClientError> {
        let handle = Self::legacy_handle("fetch", handle)?;
        let ctx = self.query_ctx("fetch", false, &handle, true);
        let request = LegacyRequest::Fetch(LegacyFetchRequest {
            handle,
            start_over: false,
            fetch_size: max_rows,
        });
        match self.rpc.invoke(ctx, &request).await? {
            LegacyResponse::Fetch(reply) => {
                self.check("fetch", reply.ok, &reply.error_message, true)?;
                Ok(RawBatch {
                    payload: BatchPayload::TextRows(reply.rows),
                    has_more: reply.has_more,
                })
            }
            other => Err(unexpected("fetch", other)),
        }
    }

    async fn query_state(&mut self, handle: &ProtocolHandle) -> Result<QueryStatus, ClientError> {
        let handle = Self::legacy_handle("get_state", handle)?;
        let ctx = self.query_ctx("get_state", true, &handle, true);
        let request = LegacyRequest::GetState(LegacyGetStateRequest { handle });
        match self.rpc.invoke(ctx, &request).await? {
            LegacyResponse::GetState(reply) => {
                self.check("get_state", reply.ok, &reply.error_message, true)?;
                Ok(QueryStatus {
                    state: map_state(reply.state),
                    error_message: none_if_empty(reply.error_message),
                })
            }
            other => Err(unexpected("get_state", other)),
        }
    }

    async fn cancel(&mut self, handle: &ProtocolHandle) -> Result<(), ClientError> {
        let handle = Self::legacy_handle("cancel", handle)?;
        let ctx = self.query_ctx("cancel", true, &handle, false);
        let request = LegacyRequest::Cancel(LegacyCancelRequest { handle });
        match self.rpc.invoke(ctx, &request).await? {
            LegacyResponse::Cancel(reply) => {
                self.check("cancel", reply.ok, &reply.error_message, false)
            }
            other => Err(unexpected("cancel", other)),
        }
    }

    async fn close(&mut self, handle: &ProtocolHandle) -> Result<(), ClientError> {
        let handle = Self::legacy_handle("close", handle)?;
        let ctx = self.query_ctx("close", true, &handle, false);
        let request = LegacyRequest::Close(LegacyCloseRequest { handle });
        match self.rpc.invoke(ctx, &request).await? {
            LegacyResponse::Close(reply) => {
                self.check("close", reply.ok, &reply.error_message, false)
            }
            other => Err(unexpected("close", other)),
        }
    }

    async fn close_dml(&mut self, handle: &ProtocolHandle) -> Result<DmlResult, ClientError> {
        // The legacy service collects no write statistics; closing the
        // handle is all there is to do.
        self.close(handle).await?;
        Ok(DmlResult {
            rows_modified: 0,
            rows_deleted: None,
            row_errors: 0,
        })
    }

    async fn get_log(&mut self, handle: &ProtocolHandle) -> Result<String, ClientError> {
        let handle = Self::legacy_handle("get_log", handle)?;
        let ctx = self.query_ctx("get_log", true, &handle, true);
        let request = LegacyRequest::GetLog(LegacyGetLogRequest {
            log_context: handle.log_context,
        });
        match self.rpc.invoke(ctx, &request).await? {
            LegacyResponse::GetLog(reply) => {
                self.check("get_log", reply.ok, &reply.error_message, true)?;
                Ok(reply.log)
            }
            other => Err(unexpected("get_log", other)),
        }
    }

    async fn get_profile(
        &mut self,
        _handle: &ProtocolHandle,
        _include_failed: bool,
    ) -> Result<QueryProfile, ClientError> {
        Err(ConnectionError::NotSupported(
            "runtime profiles require the extended service".to_string(),
        )
        .into())
    }

    async fn get_summary(
        &mut self,
        _handle: &ProtocolHandle,
        _include_failed: bool,
    ) -> Result<QuerySummary, ClientError> {
        Err(ConnectionError::NotSupported(
            "execution summaries require the extended service".to_string(),
        )
        .into())
    }

    async fn server_options(&mut self) -> Result<Vec<ServerOption>, ClientError> {
        let ctx = CallContext::new("get_default_configuration", true);
        let request = LegacyRequest::GetDefaultConfig(LegacyGetDefaultConfigRequest::default());
        match self.rpc.invoke(ctx, &request).await? {
            LegacyResponse::GetDefaultConfig(reply) => {
                self.check("get_default_configuration", reply.ok, &reply.error_message, false)?;
                // The legacy service reports no visibility levels; every
                // option displays as a regular one.
                Ok(reply
                    .options
                    .into_iter()
                    .map(|option| ServerOption {
                        name: option.key,
                        value: option.value,
                        level: OptionLevel::Regular,
                    })
                    .collect())
            }
            other => Err(unexpected("get_default_configuration", other)),
        }
    }

    async fn close_session(&mut self) -> Result<(), ClientError> {
        // Session lifetime is the connection lifetime.
        Ok(())
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

impl std::fmt::Debug for LegacyProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LegacyProtocol")
            .field("endpoint", &self.rpc.endpoint())
            .field("base_options", &self.base_options)
            .finish()
    }
}

/// Map the legacy state vocabulary onto the extended one.
fn map_state(state: LegacyQueryState) -> OperationState {
    match state {
        LegacyQueryState::Created | LegacyQueryState::Initialized | LegacyQueryState::Compiled => {
            OperationState::Pending
        }
        LegacyQueryState::Running => OperationState::Running,
        LegacyQueryState::Finished => OperationState::Finished,
        LegacyQueryState::Exception => OperationState::Error,
    }
}

fn unexpected(method: &'static str, response: LegacyResponse) -> ClientError {
    match response {
        LegacyResponse::UnknownMethod(name) => RpcError::MissingServerMethod { method: name }.into(),
        other => TransportError::InvalidResponse(format!(
            "{} reply was a {} frame",
            method,
            variant_name(&other)
        ))
        .into(),
    }
}

fn variant_name(response: &LegacyResponse) -> &'static str {
    match response {
        LegacyResponse::Execute(_) => "execute",
        LegacyResponse::Fetch(_) => "fetch",
        LegacyResponse::GetState(_) => "get_state",
        LegacyResponse::Cancel(_) => "cancel",
        LegacyResponse::Close(_) => "close",
        LegacyResponse::GetLog(_) => "get_log",
        LegacyResponse::Ping(_) => "ping",
        LegacyResponse::GetDefaultConfig(_) => "get_default_configuration",
        LegacyResponse::UnknownMethod(_) => "unknown",
    }
}

fn none_if_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}
