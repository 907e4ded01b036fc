//! Wire records for the Kestrel RPC protocol.
//!
//! Every frame body is one bincode-encoded request or response record. The
//! extended (v2) service and the legacy (v1) service are separate contracts
//! with disjoint method sets; a server port speaks exactly one of them.
//! Records also derive `Serialize` so the RPC tracer can render them as JSON.

use std::collections::HashMap;
use std::fmt;

use bincode::config::{BigEndian, Configuration, Fixint};
use bincode::{Decode, Encode};
use serde::Serialize;

use crate::types::Schema;

/// Protocol version spoken by the legacy service. Not negotiated: the
/// service predates version exchange.
pub const PROTOCOL_V1: u16 = 1;

/// Protocol version negotiated by the extended service.
pub const PROTOCOL_V2: u16 = 2;

/// Encoding configuration shared by every wire message.
///
/// Big-endian with fixed-width integers keeps frames byte-stable across
/// client versions.
pub fn wire_config() -> Configuration<BigEndian, Fixint> {
    bincode::config::standard()
        .with_big_endian()
        .with_fixed_int_encoding()
}

/// Server-issued 128-bit query identifier.
///
/// The wire carries two little-endian 64-bit halves. The display form
/// renders each half as big-endian hex, joined by a colon, matching the
/// engine's log and web UI formatting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Encode, Decode, Serialize)]
pub struct QueryId {
    /// Low 64 bits
    pub lo: u64,
    /// High 64 bits
    pub hi: u64,
}

impl QueryId {
    /// Reconstruct from the 16 raw wire bytes (two little-endian halves).
    pub fn from_wire_bytes(bytes: [u8; 16]) -> Self {
        let mut lo = [0u8; 8];
        let mut hi = [0u8; 8];
        lo.copy_from_slice(&bytes[..8]);
        hi.copy_from_slice(&bytes[8..]);
        Self {
            lo: u64::from_le_bytes(lo),
            hi: u64::from_le_bytes(hi),
        }
    }

    /// The 16 raw wire bytes (two little-endian halves).
    pub fn to_wire_bytes(&self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&self.lo.to_le_bytes());
        bytes[8..].copy_from_slice(&self.hi.to_le_bytes());
        bytes
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", hex::encode(self.lo.to_be_bytes()), hex::encode(self.hi.to_be_bytes()))
    }
}

/// Status code attached to every extended-service response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode, Serialize)]
pub enum StatusCode {
    /// Call succeeded
    Ok,
    /// Call succeeded with informational messages
    OkWithInfo,
    /// Operation is still running
    StillExecuting,
    /// Call failed
    Error,
    /// The referenced handle is unknown to the server
    InvalidHandle,
}

/// Call status carried by extended-service responses.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize)]
pub struct Status {
    /// Outcome code
    pub code: StatusCode,
    /// Human-readable message, empty on success
    pub message: String,
    /// SQLSTATE code when the server provides one
    pub sql_state: Option<String>,
}

impl Status {
    /// A plain success status.
    pub fn ok() -> Self {
        Self {
            code: StatusCode::Ok,
            message: String::new(),
            sql_state: None,
        }
    }

    /// An error status with a message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            code: StatusCode::Error,
            message: message.into(),
            sql_state: None,
        }
    }

    /// True for `Error` and `InvalidHandle`.
    pub fn is_error(&self) -> bool {
        matches!(self.code, StatusCode::Error | StatusCode::InvalidHandle)
    }
}

/// Server-side operation state reported by `GetState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode, Serialize)]
pub enum OperationState {
    /// Admitted but not yet running
    Pending,
    /// Executing
    Running,
    /// Completed successfully; results may be fetched
    Finished,
    /// Cancelled by request
    Cancelled,
    /// Closed; the handle is gone
    Closed,
    /// Failed
    Error,
}

/// One column of a columnar fetch batch: typed values plus a null bitmap.
#[derive(Debug, Clone, PartialEq, Encode, Decode, Serialize)]
pub struct ColumnBatch {
    /// Typed value array; null positions hold type defaults
    pub values: ColumnValues,
    /// Packed null bitmap, one bit per row, least-significant bit first.
    /// May be shorter than the row count; missing bits mean non-null.
    pub nulls: Vec<u8>,
}

/// Typed value array for one column.
#[derive(Debug, Clone, PartialEq, Encode, Decode, Serialize)]
pub enum ColumnValues {
    /// BOOLEAN values
    Bool(Vec<bool>),
    /// TINYINT values
    TinyInt(Vec<i8>),
    /// SMALLINT values
    SmallInt(Vec<i16>),
    /// INT values
    Int(Vec<i32>),
    /// BIGINT values
    BigInt(Vec<i64>),
    /// FLOAT and DOUBLE values
    Double(Vec<f64>),
    /// Text-carried values (STRING, VARCHAR, CHAR, DECIMAL, DATE, TIMESTAMP)
    Text(Vec<String>),
    /// BINARY values
    Binary(Vec<Vec<u8>>),
}

impl ColumnValues {
    /// Number of rows in this column.
    pub fn len(&self) -> usize {
        match self {
            ColumnValues::Bool(v) => v.len(),
            ColumnValues::TinyInt(v) => v.len(),
            ColumnValues::SmallInt(v) => v.len(),
            ColumnValues::Int(v) => v.len(),
            ColumnValues::BigInt(v) => v.len(),
            ColumnValues::Double(v) => v.len(),
            ColumnValues::Text(v) => v.len(),
            ColumnValues::Binary(v) => v.len(),
        }
    }

    /// True when the column holds no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-partition DML statistics attached to `CloseDml` responses.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize)]
pub struct DmlStats {
    /// Rows written, keyed by partition
    pub rows_modified: HashMap<String, i64>,
    /// Rows deleted, keyed by partition; absent for non-delete statements
    pub rows_deleted: Option<HashMap<String, i64>>,
    /// Rows rejected by constraint or conversion errors
    pub num_row_errors: Option<i64>,
}

/// One node of an execution summary tree.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize)]
pub struct SummaryNode {
    /// Operator label, indented by the server for tree display
    pub label: String,
    /// Number of hosts the operator ran on
    pub num_hosts: i32,
    /// Rows produced
    pub num_rows: i64,
    /// Planner row estimate
    pub est_num_rows: i64,
    /// Peak memory in bytes
    pub peak_mem_bytes: i64,
    /// Planner memory estimate in bytes
    pub est_peak_mem_bytes: i64,
}

/// Raw execution summary structure, rendered by front ends.
#[derive(Debug, Clone, PartialEq, Eq, Default, Encode, Decode, Serialize)]
pub struct ExecSummary {
    /// Operator nodes in display order
    pub nodes: Vec<SummaryNode>,
    /// True while the query is held in an admission queue
    pub is_queued: bool,
    /// Admission-queue reason, when queued
    pub queued_reason: Option<String>,
}

// ---------------------------------------------------------------------------
// Extended (v2) service
// ---------------------------------------------------------------------------

/// Open a session on the extended service.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize)]
pub struct OpenSessionRequest {
    /// Effective user for the session
    pub username: String,
    /// Protocol version the client requires
    pub requested_version: u16,
    /// Initial query options
    pub configuration: HashMap<String, String>,
}

/// Response to [`OpenSessionRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize)]
pub struct OpenSessionResponse {
    /// Call status
    pub status: Status,
    /// Server-issued session identifier
    pub session_id: String,
    /// Version the server actually negotiated
    pub protocol_version: u16,
}

/// Liveness probe.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize)]
pub struct PingRequest {
    /// Session to probe under
    pub session_id: String,
}

/// Response to [`PingRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize)]
pub struct PingResponse {
    /// Call status
    pub status: Status,
    /// Engine build version string
    pub version: String,
    /// Address of the engine's debug webserver
    pub webserver_address: String,
}

/// Submit a statement for execution.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize)]
pub struct ExecuteRequest {
    /// Session scope
    pub session_id: String,
    /// Statement text
    pub statement: String,
    /// Per-query options overriding session defaults
    pub options: HashMap<String, String>,
}

/// Response to [`ExecuteRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize)]
pub struct ExecuteResponse {
    /// Call status
    pub status: Status,
    /// Identifier of the admitted query; absent on failure
    pub query_id: Option<QueryId>,
    /// True when the statement produces rows
    pub has_result_set: bool,
}

/// Fetch the result-set schema for a running or finished query.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize)]
pub struct MetadataRequest {
    /// Query to describe
    pub query_id: QueryId,
}

/// Response to [`MetadataRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize)]
pub struct MetadataResponse {
    /// Call status
    pub status: Status,
    /// Result-set schema
    pub schema: Schema,
}

/// Fetch the next batch of rows.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize)]
pub struct FetchRequest {
    /// Query to fetch from
    pub query_id: QueryId,
    /// Upper bound on rows returned; the server may send fewer
    pub max_rows: i64,
}

/// Response to [`FetchRequest`].
#[derive(Debug, Clone, PartialEq, Encode, Decode, Serialize)]
pub struct FetchResponse {
    /// Call status
    pub status: Status,
    /// One batch per column, in schema order
    pub columns: Vec<ColumnBatch>,
    /// True when more rows remain on the server
    pub has_more: bool,
}

/// Poll the operation state.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize)]
pub struct GetStateRequest {
    /// Query to poll
    pub query_id: QueryId,
}

/// Response to [`GetStateRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize)]
pub struct GetStateResponse {
    /// Call status
    pub status: Status,
    /// Current operation state
    pub state: OperationState,
    /// Error text when the state is `Error`
    pub error_message: Option<String>,
}

/// Cancel a running query.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize)]
pub struct CancelRequest {
    /// Query to cancel
    pub query_id: QueryId,
}

/// Close a query handle without DML statistics.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize)]
pub struct CloseRequest {
    /// Query to close
    pub query_id: QueryId,
}

/// Close a DML query and collect its write statistics.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize)]
pub struct CloseDmlRequest {
    /// Query to close
    pub query_id: QueryId,
}

/// Response to [`CloseDmlRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize)]
pub struct CloseDmlResponse {
    /// Call status
    pub status: Status,
    /// Write statistics; absent when the server collected none
    pub dml_stats: Option<DmlStats>,
}

/// Retrieve the accumulated query log.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize)]
pub struct GetLogRequest {
    /// Query whose log to read
    pub query_id: QueryId,
}

/// Response to [`GetLogRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize)]
pub struct GetLogResponse {
    /// Call status
    pub status: Status,
    /// Raw log text
    pub log: String,
}

/// Retrieve the runtime profile.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize)]
pub struct GetProfileRequest {
    /// Query whose profile to read
    pub query_id: QueryId,
    /// Also return the profile of a failed prior attempt, if the query
    /// was transparently retried by the server
    pub include_failed: bool,
}

/// Response to [`GetProfileRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize)]
pub struct GetProfileResponse {
    /// Call status
    pub status: Status,
    /// Profile text of the most recent attempt
    pub profile: String,
    /// Profile text of the failed prior attempt, when requested and present
    pub failed_profile: Option<String>,
}

/// Retrieve the execution summary.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize)]
pub struct GetSummaryRequest {
    /// Query whose summary to read
    pub query_id: QueryId,
    /// Also return the summary of a failed prior attempt
    pub include_failed: bool,
}

/// Response to [`GetSummaryRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize)]
pub struct GetSummaryResponse {
    /// Call status
    pub status: Status,
    /// Summary of the most recent attempt
    pub summary: ExecSummary,
    /// Summary of the failed prior attempt, when requested and present
    pub failed_summary: Option<ExecSummary>,
}

/// Close the session.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize)]
pub struct CloseSessionRequest {
    /// Session to close
    pub session_id: String,
}

/// Status-only response shared by cancel, close and close-session.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize)]
pub struct BasicResponse {
    /// Call status
    pub status: Status,
}

/// Extended-service request frame.
#[derive(Debug, Clone, PartialEq, Encode, Decode, Serialize)]
pub enum Request {
    OpenSession(OpenSessionRequest),
    Ping(PingRequest),
    Execute(ExecuteRequest),
    GetResultMetadata(MetadataRequest),
    Fetch(FetchRequest),
    GetState(GetStateRequest),
    Cancel(CancelRequest),
    Close(CloseRequest),
    CloseDml(CloseDmlRequest),
    GetLog(GetLogRequest),
    GetProfile(GetProfileRequest),
    GetSummary(GetSummaryRequest),
    CloseSession(CloseSessionRequest),
}

/// Extended-service response frame.
#[derive(Debug, Clone, PartialEq, Encode, Decode, Serialize)]
pub enum Response {
    OpenSession(OpenSessionResponse),
    Ping(PingResponse),
    Execute(ExecuteResponse),
    GetResultMetadata(MetadataResponse),
    Fetch(FetchResponse),
    GetState(GetStateResponse),
    Cancel(BasicResponse),
    Close(BasicResponse),
    CloseDml(CloseDmlResponse),
    GetLog(GetLogResponse),
    GetProfile(GetProfileResponse),
    GetSummary(GetSummaryResponse),
    CloseSession(BasicResponse),
    /// The server does not implement the requested method
    UnknownMethod(String),
}

// ---------------------------------------------------------------------------
// Legacy (v1) service
// ---------------------------------------------------------------------------

/// Legacy query handle: an opaque id plus the log-retrieval context.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize)]
pub struct LegacyHandle {
    /// Opaque query identifier
    pub id: String,
    /// Context token for `get_log`
    pub log_context: String,
}

/// Legacy server-side query state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode, Serialize)]
pub enum LegacyQueryState {
    Created,
    Initialized,
    Compiled,
    Running,
    Finished,
    Exception,
}

/// One default configuration entry from the legacy service.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize)]
pub struct ConfigOption {
    /// Option name
    pub key: String,
    /// Default value
    pub value: String,
}

/// Submit a statement on the legacy service.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize)]
pub struct LegacyExecuteRequest {
    /// Statement text
    pub query: String,
    /// Options as `key=value` strings
    pub configuration: Vec<String>,
}

/// Response to [`LegacyExecuteRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize)]
pub struct LegacyExecuteResponse {
    /// False when the call failed
    pub ok: bool,
    /// Error text, empty on success
    pub error_message: String,
    /// Handle for the admitted query; absent on failure
    pub handle: Option<LegacyHandle>,
    /// True when the statement produces rows
    pub has_result_set: bool,
    /// Column names; legacy rows are pre-rendered text, so no types
    pub column_names: Vec<String>,
}

/// Fetch pre-rendered rows from the legacy service.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize)]
pub struct LegacyFetchRequest {
    /// Query to fetch from
    pub handle: LegacyHandle,
    /// Restart the cursor from the beginning (unsupported, always false)
    pub start_over: bool,
    /// Upper bound on rows returned
    pub fetch_size: i64,
}

/// Response to [`LegacyFetchRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize)]
pub struct LegacyFetchResponse {
    /// False when the call failed
    pub ok: bool,
    /// Error text, empty on success
    pub error_message: String,
    /// Tab-separated row text, one entry per row
    pub rows: Vec<String>,
    /// True when more rows remain on the server
    pub has_more: bool,
}

/// Poll the legacy query state.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize)]
pub struct LegacyGetStateRequest {
    /// Query to poll
    pub handle: LegacyHandle,
}

/// Response to [`LegacyGetStateRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize)]
pub struct LegacyGetStateResponse {
    /// False when the call failed
    pub ok: bool,
    /// Error text, empty on success
    pub error_message: String,
    /// Current state
    pub state: LegacyQueryState,
}

/// Cancel a legacy query.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize)]
pub struct LegacyCancelRequest {
    /// Query to cancel
    pub handle: LegacyHandle,
}

/// Close a legacy query.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize)]
pub struct LegacyCloseRequest {
    /// Query to close
    pub handle: LegacyHandle,
}

/// Retrieve the legacy query log.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize)]
pub struct LegacyGetLogRequest {
    /// Log context from the execute response
    pub log_context: String,
}

/// Response to [`LegacyGetLogRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize)]
pub struct LegacyGetLogResponse {
    /// False when the call failed
    pub ok: bool,
    /// Error text, empty on success
    pub error_message: String,
    /// Raw log text
    pub log: String,
}

/// Legacy liveness probe.
#[derive(Debug, Clone, PartialEq, Eq, Default, Encode, Decode, Serialize)]
pub struct LegacyPingRequest {}

/// Response to [`LegacyPingRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize)]
pub struct LegacyPingResponse {
    /// False when the call failed
    pub ok: bool,
    /// Error text, empty on success
    pub error_message: String,
    /// Engine build version string
    pub version: String,
    /// Address of the engine's debug webserver
    pub webserver_address: String,
}

/// Request the legacy default option set.
#[derive(Debug, Clone, PartialEq, Eq, Default, Encode, Decode, Serialize)]
pub struct LegacyGetDefaultConfigRequest {}

/// Response to [`LegacyGetDefaultConfigRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize)]
pub struct LegacyGetDefaultConfigResponse {
    /// False when the call failed
    pub ok: bool,
    /// Error text, empty on success
    pub error_message: String,
    /// Default options
    pub options: Vec<ConfigOption>,
}

/// Status-only legacy response.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize)]
pub struct LegacyBasicResponse {
    /// False when the call failed
    pub ok: bool,
    /// Error text, empty on success
    pub error_message: String,
}

impl LegacyBasicResponse {
    /// A plain success response.
    pub fn ok() -> Self {
        Self {
            ok: true,
            error_message: String::new(),
        }
    }
}

/// Legacy-service request frame.
#[derive(Debug, Clone, PartialEq, Encode, Decode, Serialize)]
pub enum LegacyRequest {
    Execute(LegacyExecuteRequest),
    Fetch(LegacyFetchRequest),
    GetState(LegacyGetStateRequest),
    Cancel(LegacyCancelRequest),
    Close(LegacyCloseRequest),
    GetLog(LegacyGetLogRequest),
    Ping(LegacyPingRequest),
    GetDefaultConfig(LegacyGetDefaultConfigRequest),
}

/// Legacy-service response frame.
#[derive(Debug, Clone, PartialEq, Encode, Decode, Serialize)]
pub enum LegacyResponse {
    Execute(LegacyExecuteResponse),
    Fetch(LegacyFetchResponse),
    GetState(LegacyGetStateResponse),
    Cancel(LegacyBasicResponse),
    Close(LegacyBasicResponse),
    GetLog(LegacyGetLogResponse),
    Ping(LegacyPingResponse),
    GetDefaultConfig(LegacyGetDefaultConfigResponse),
    /// The server does not implement the requested method
    UnknownMethod(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_id_display() {
        let bytes: [u8; 16] = [
            0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d,
            0x0e, 0x0f,
        ];
        let id = QueryId::from_wire_bytes(bytes);
        assert_eq!(id.to_string(), "0706050403020100:0f0e0d0c0b0a0908");
        assert_eq!(id.to_wire_bytes(), bytes);
    }

    #[test]
    fn test_query_id_zero_padding() {
        let id = QueryId { lo: 0x1, hi: 0 };
        assert_eq!(id.to_string(), "0000000000000001:0000000000000000");
    }

    #[test]
    fn test_request_roundtrip() {
        let request = Request::Execute(ExecuteRequest {
            session_id: "s-1".to_string(),
            statement: "SELECT 1".to_string(),
            options: HashMap::new(),
        });
        let bytes = bincode::encode_to_vec(&request, wire_config()).unwrap();
        let (decoded, consumed): (Request, usize) =
            bincode::decode_from_slice(&bytes, wire_config()).unwrap();
        assert_eq!(decoded, request);
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn test_fetch_response_roundtrip() {
        let response = Response::Fetch(FetchResponse {
            status: Status::ok(),
            columns: vec![ColumnBatch {
                values: ColumnValues::Int(vec![1, 2, 3]),
                nulls: vec![0b0000_0101],
            }],
            has_more: true,
        });
        let bytes = bincode::encode_to_vec(&response, wire_config()).unwrap();
        let (decoded, _): (Response, usize) =
            bincode::decode_from_slice(&bytes, wire_config()).unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn test_legacy_request_roundtrip() {
        let request = LegacyRequest::Fetch(LegacyFetchRequest {
            handle: LegacyHandle {
                id: "q-42".to_string(),
                log_context: "q-42".to_string(),
            },
            start_over: false,
            fetch_size: 1024,
        });
        let bytes = bincode::encode_to_vec(&request, wire_config()).unwrap();
        let (decoded, _): (LegacyRequest, usize) =
            bincode::decode_from_slice(&bytes, wire_config()).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_status_classification() {
        assert!(!Status::ok().is_error());
        assert!(Status::error("boom").is_error());
        let invalid = Status {
            code: StatusCode::InvalidHandle,
            message: "Invalid or unknown query handle".to_string(),
            sql_state: None,
        };
        assert!(invalid.is_error());
        let still = Status {
            code: StatusCode::StillExecuting,
            message: String::new(),
            sql_state: None,
        };
        assert!(!still.is_error());
    }

    #[test]
    fn test_column_values_len() {
        assert_eq!(ColumnValues::Text(vec!["a".to_string()]).len(), 1);
        assert_eq!(ColumnValues::Double(vec![]).len(), 0);
        assert!(ColumnValues::Bool(vec![]).is_empty());
    }

    #[test]
    fn test_trace_rendering_is_json() {
        let request = Request::Cancel(CancelRequest {
            query_id: QueryId { lo: 7, hi: 9 },
        });
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"Cancel\""));
        assert!(json.contains("\"lo\":7"));
    }

    #[test]
    fn test_dml_stats_roundtrip() {
        let mut rows_modified = HashMap::new();
        rows_modified.insert("p1".to_string(), 10i64);
        rows_modified.insert("p2".to_string(), 5i64);
        let response = Response::CloseDml(CloseDmlResponse {
            status: Status::ok(),
            dml_stats: Some(DmlStats {
                rows_modified,
                rows_deleted: None,
                num_row_errors: Some(1),
            }),
        });
        let bytes = bincode::encode_to_vec(&response, wire_config()).unwrap();
        let (decoded, _): (Response, usize) =
            bincode::decode_from_slice(&bytes, wire_config()).unwrap();
        assert_eq!(decoded, response);
    }
}
