//! Shared fixtures for the end-to-end tests: an in-process coordinator.
//!
//! The fixture binds a real TCP listener and speaks the framed wire
//! protocol, so each test exercises the full client stack: socket framing,
//! RPC dispatch, the protocol adapter, session bootstrap, and the query
//! engine. Per-test closures script the responses; [`session_bootstrap`]
//! and [`legacy_bootstrap`] answer the session-scoped portion of the
//! dialogue so a test only has to script its own query traffic.
//!
//! A fixture serves exactly one connection and answers frames until the
//! client hangs up. Handler panics surface through the returned join
//! handle; tests await it at the end so a wire-level assertion failure
//! fails the test.

use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use kestrel_client::connection::ConnectionParams;
use kestrel_client::protocol::messages::{
    wire_config, BasicResponse, ColumnBatch, ColumnValues, ConfigOption, ExecuteResponse,
    FetchResponse, LegacyGetDefaultConfigResponse, LegacyPingResponse, LegacyRequest,
    LegacyResponse, OpenSessionResponse, PingResponse, QueryId, Request, Response, Status,
    PROTOCOL_V2,
};

/// Build version the fixture coordinator reports from ping.
pub const SERVER_VERSION: &str = "kestrel 4.5.0";

/// Debug webserver address the fixture coordinator reports from ping.
pub const WEBSERVER_ADDRESS: &str = "http://coord-1:25000";

/// Session identifier the fixture coordinator issues at open.
pub const SESSION_ID: &str = "s-900";

/// Options the fixture coordinator enumerates during session bootstrap,
/// as (name, value, level) rows of the option-listing statement.
pub const DEFAULT_OPTIONS: &[(&str, &str, &str)] = &[
    ("DEBUG_ACTION", "", "DEVELOPMENT"),
    ("EXPLAIN_LEVEL", "STANDARD", "REGULAR"),
    ("MEM_LIMIT", "0", "REGULAR"),
];

/// Query id the fixture assigns to the option-listing statement, distinct
/// from any id a test hands out itself.
pub fn options_query_id() -> QueryId {
    QueryId { lo: 0xad71, hi: 0 }
}

/// Read one length-prefixed frame, or `None` once the client hung up.
pub async fn read_frame(stream: &mut TcpStream) -> Option<Vec<u8>> {
    let len = stream.read_u32().await.ok()? as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await.ok()?;
    Some(payload)
}

/// Write one length-prefixed frame.
pub async fn write_frame(stream: &mut TcpStream, payload: &[u8]) {
    stream.write_u32(payload.len() as u32).await.unwrap();
    stream.write_all(payload).await.unwrap();
    stream.flush().await.unwrap();
}

/// Serve one extended-service connection, answering every request frame
/// through `handler` until the client hangs up.
pub async fn serve_extended<F>(mut handler: F) -> (SocketAddr, JoinHandle<()>)
where
    F: FnMut(Request) -> Response + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        while let Some(payload) = read_frame(&mut stream).await {
            let (request, _): (Request, usize) =
                bincode::decode_from_slice(&payload, wire_config()).unwrap();
            let reply = bincode::encode_to_vec(handler(request), wire_config()).unwrap();
            write_frame(&mut stream, &reply).await;
        }
    });
    (addr, server)
}

/// Serve one legacy-service connection the same way.
pub async fn serve_legacy<F>(mut handler: F) -> (SocketAddr, JoinHandle<()>)
where
    F: FnMut(LegacyRequest) -> LegacyResponse + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        while let Some(payload) = read_frame(&mut stream).await {
            let (request, _): (LegacyRequest, usize) =
                bincode::decode_from_slice(&payload, wire_config()).unwrap();
            let reply = bincode::encode_to_vec(handler(request), wire_config()).unwrap();
            write_frame(&mut stream, &reply).await;
        }
    });
    (addr, server)
}

/// Parameters pointing at a fixture listener.
pub fn params_for(addr: SocketAddr) -> ConnectionParams {
    ConnectionParams::new(addr.ip().to_string(), addr.port())
}

/// Three text columns (name, value, level) in the shape of the engine's
/// option-listing result set.
pub fn option_columns(entries: &[(&str, &str, &str)]) -> Vec<ColumnBatch> {
    let text = |values: Vec<String>| ColumnBatch {
        values: ColumnValues::Text(values),
        nulls: Vec::new(),
    };
    vec![
        text(entries.iter().map(|e| e.0.to_string()).collect()),
        text(entries.iter().map(|e| e.1.to_string()).collect()),
        text(entries.iter().map(|e| e.2.to_string()).collect()),
    ]
}

/// Answer the session-scoped portion of the extended dialogue: open, the
/// option-listing statement, ping, and session close. Returns `None` for
/// query traffic so the test's handler takes over.
pub fn session_bootstrap(request: &Request) -> Option<Response> {
    match request {
        Request::OpenSession(open) => {
            assert_eq!(open.requested_version, PROTOCOL_V2);
            Some(Response::OpenSession(OpenSessionResponse {
                status: Status::ok(),
                session_id: SESSION_ID.to_string(),
                protocol_version: PROTOCOL_V2,
            }))
        }
        Request::Execute(execute) if execute.statement == "SET ALL" => {
            assert_eq!(execute.session_id, SESSION_ID);
            Some(Response::Execute(ExecuteResponse {
                status: Status::ok(),
                query_id: Some(options_query_id()),
                has_result_set: true,
            }))
        }
        Request::Fetch(fetch) if fetch.query_id == options_query_id() => {
            Some(Response::Fetch(FetchResponse {
                status: Status::ok(),
                columns: option_columns(DEFAULT_OPTIONS),
                has_more: false,
            }))
        }
        Request::Close(close) if close.query_id == options_query_id() => {
            Some(Response::Close(BasicResponse {
                status: Status::ok(),
            }))
        }
        Request::Ping(ping) => {
            assert_eq!(ping.session_id, SESSION_ID);
            Some(Response::Ping(PingResponse {
                status: Status::ok(),
                version: SERVER_VERSION.to_string(),
                webserver_address: WEBSERVER_ADDRESS.to_string(),
            }))
        }
        Request::CloseSession(close) => {
            assert_eq!(close.session_id, SESSION_ID);
            Some(Response::CloseSession(BasicResponse {
                status: Status::ok(),
            }))
        }
        _ => None,
    }
}

/// Answer the session-scoped portion of the legacy dialogue: the default
/// configuration listing and ping.
pub fn legacy_bootstrap(request: &LegacyRequest) -> Option<LegacyResponse> {
    match request {
        LegacyRequest::GetDefaultConfig(_) => Some(LegacyResponse::GetDefaultConfig(
            LegacyGetDefaultConfigResponse {
                ok: true,
                error_message: String::new(),
                options: vec![ConfigOption {
                    key: "MEM_LIMIT".to_string(),
                    value: "0".to_string(),
                }],
            },
        )),
        LegacyRequest::Ping(_) => Some(LegacyResponse::Ping(LegacyPingResponse {
            ok: true,
            error_message: String::new(),
            version: SERVER_VERSION.to_string(),
            webserver_address: WEBSERVER_ADDRESS.to_string(),
        })),
        _ => None,
    }
}
