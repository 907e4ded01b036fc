//! RPC dispatch: correlation ids, retry policy, failure classification.
//!
//! Every remote call goes through [`RpcDispatcher::invoke`] with a
//! [`CallContext`] describing the call. The dispatcher encodes the request,
//! drives the transport, and applies the retry matrix: a call is re-issued
//! only when the transport supports multiple attempts (HTTP) *and* the call
//! is idempotent. Exhausted or unretryable transport failures surface as
//! `RpcError::Disconnected`; when the cooperative cancel flag was set
//! before a failure was observed, the failure surfaces as the suppressed
//! `RpcError::Cancelled` instead.
//!
//! # Example
//!
//! ```no_run
//! use kestrel_client::connection::ConnectionParams;
//! use kestrel_client::rpc::{CallContext, RpcDispatcher};
//! use kestrel_client::protocol::messages::{PingRequest, Request, Response};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let params = ConnectionParams::new("coord-1".to_string(), 21052);
//! let transport = kestrel_client::transport::connect(&params).await?;
//! let mut dispatcher = RpcDispatcher::new(transport, params.max_tries, params.min_sleep_ms, None);
//!
//! let ctx = CallContext::new("Ping", true);
//! let request = Request::Ping(PingRequest {
//!     session_id: "5badb0b0deadbeef:0000000000000001".to_string(),
//! });
//! let response: Response = dispatcher.invoke(ctx, &request).await?;
//! # Ok(())
//! # }
//! ```

pub mod tracer;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{ClientError, RpcError, TransportError};
use crate::protocol::messages::wire_config;
use crate::transport::RpcTransport;

pub use tracer::RpcTracer;

/// Per-call dispatch context.
///
/// Built by the protocol adapter for every operation and threaded through
/// the dispatcher and transport explicitly; nothing about the current call
/// lives in ambient state.
#[derive(Debug, Clone)]
pub struct CallContext {
    /// Remote method name, for diagnostics and tracing
    pub method: &'static str,

    /// Safe to re-issue on failure without changing outcome semantics
    pub idempotent: bool,

    /// Surface `Cancelled` instead of the underlying error when the cancel
    /// flag is set at failure time
    pub suppress_on_cancel: bool,

    /// `{base}-{seq}` identifier; assigned by the dispatcher at invoke time
    pub correlation_id: String,

    /// Session identifier, projected into trace headers by HTTP transports
    pub session_id: Option<String>,

    /// Query identifier, projected into trace headers by HTTP transports
    pub query_id: Option<String>,
}

impl CallContext {
    /// Create a context for a remote method.
    pub fn new(method: &'static str, idempotent: bool) -> Self {
        Self {
            method,
            idempotent,
            suppress_on_cancel: false,
            correlation_id: String::new(),
            session_id: None,
            query_id: None,
        }
    }

    /// Classify failures of this call as `Cancelled` when the cancel flag
    /// is set. Query-lifecycle calls opt in; session calls do not.
    pub fn with_cancel_suppression(mut self) -> Self {
        self.suppress_on_cancel = true;
        self
    }

    /// Attach the session identifier for trace headers.
    pub fn with_session_id(mut self, session_id: String) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Attach the query identifier for trace headers.
    pub fn with_query_id(mut self, query_id: String) -> Self {
        self.query_id = Some(query_id);
        self
    }
}

/// Cooperative cancellation flag shared between the query engine and any
/// task that wants to abort the current query.
///
/// Setting the flag does not interrupt an in-flight call; it only changes
/// how the next observed dispatch failure is classified.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    flag: Arc<AtomicBool>,
}

impl CancelSignal {
    /// Create an unset signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of the current query.
    pub fn set(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Reset after the cancel has been delivered or the query closed.
    pub fn clear(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    /// True when cancellation has been requested.
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Dispatches encoded calls over one transport with retry and tracing.
pub struct RpcDispatcher {
    transport: Box<dyn RpcTransport>,
    base_id: String,
    seq: u64,
    max_tries: u32,
    min_sleep: Duration,
    cancel: CancelSignal,
    tracer: Option<RpcTracer>,
}

impl RpcDispatcher {
    /// Wrap an open transport.
    ///
    /// `max_tries` bounds attempts per idempotent call on retry-capable
    /// transports; `min_sleep_ms` is the backoff unit between attempts.
    pub fn new(
        transport: Box<dyn RpcTransport>,
        max_tries: u32,
        min_sleep_ms: u64,
        tracer: Option<RpcTracer>,
    ) -> Self {
        Self {
            transport,
            base_id: Uuid::new_v4().simple().to_string(),
            seq: 0,
            max_tries,
            min_sleep: Duration::from_millis(min_sleep_ms),
            cancel: CancelSignal::new(),
            tracer,
        }
    }

    /// The shared cancel flag for this connection's dispatches.
    pub fn cancel_signal(&self) -> CancelSignal {
        self.cancel.clone()
    }

    /// Attempt bound applied to idempotent calls.
    pub fn max_tries(&self) -> u32 {
        self.max_tries
    }

    /// Endpoint description of the underlying transport.
    pub fn endpoint(&self) -> &str {
        self.transport.endpoint()
    }

    /// Close the underlying transport.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` when teardown fails.
    pub async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.transport.shutdown().await
    }

    /// Encode, dispatch, and decode one call under the retry policy.
    ///
    /// # Errors
    ///
    /// Returns `RpcError::Cancelled` when the cancel flag was set at
    /// failure time and the context opted into suppression,
    /// `RpcError::Disconnected` when the transport failed and no attempts
    /// remain, and `TransportError::Encode` for unencodable requests.
    pub async fn invoke<Req, Resp>(
        &mut self,
        mut ctx: CallContext,
        request: &Req,
    ) -> Result<Resp, ClientError>
    where
        Req: bincode::Encode + Serialize + Sync,
        Resp: bincode::Decode<()> + Serialize,
    {
        self.seq += 1;
        ctx.correlation_id = format!("{}-{}", self.base_id, self.seq);

        let payload = bincode::encode_to_vec(request, wire_config())
            .map_err(|e| TransportError::Encode(e.to_string()))?;

        let max_attempts = if self.transport.supports_retries() && ctx.idempotent {
            self.max_tries
        } else {
            1
        };

        let mut last_error: Option<TransportError> = None;
        for attempt in 1..=max_attempts {
            if attempt > 1 {
                // A server-provided retry-after hint overrides the linear
                // backoff for this one sleep.
                let delay = self
                    .transport
                    .take_retry_after()
                    .unwrap_or_else(|| backoff(self.min_sleep, attempt));
                if !delay.is_zero() {
                    debug!(
                        method = ctx.method,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "sleeping before retry"
                    );
                    tokio::time::sleep(delay).await;
                }
            }

            if let Some(tracer) = &mut self.tracer {
                tracer.record_start(&ctx, attempt, render_json(request));
            }

            let started = Instant::now();
            let result = self.attempt::<Resp>(&ctx, &payload).await;
            let elapsed = started.elapsed();

            match result {
                Ok(response) => {
                    if let Some(tracer) = &mut self.tracer {
                        tracer.record_end(&ctx, attempt, elapsed, "ok", Some(render_json(&response)));
                    }
                    return Ok(response);
                }
                Err(error) => {
                    if let Some(tracer) = &mut self.tracer {
                        tracer.record_end(&ctx, attempt, elapsed, &error.to_string(), None);
                    }
                    if ctx.suppress_on_cancel && self.cancel.is_set() {
                        debug!(method = ctx.method, "failure classified as cancellation");
                        return Err(RpcError::Cancelled.into());
                    }
                    warn!(
                        method = ctx.method,
                        attempt,
                        max_attempts,
                        error = %error,
                        "RPC attempt failed"
                    );
                    last_error = Some(error);
                }
            }
        }

        // Unreachable only if max_attempts were 0, which new() forbids.
        let error = last_error
            .unwrap_or_else(|| TransportError::Io("no attempt was made".to_string()));
        Err(RpcError::Disconnected(format!(
            "{} failed after {} attempt(s): {}",
            ctx.method, max_attempts, error
        ))
        .into())
    }

    async fn attempt<Resp>(
        &mut self,
        ctx: &CallContext,
        payload: &[u8],
    ) -> Result<Resp, TransportError>
    where
        Resp: bincode::Decode<()>,
    {
        let response = self.transport.exchange(ctx, payload).await?;
        let (decoded, _) = bincode::decode_from_slice(&response, wire_config())
            .map_err(|e| TransportError::Decode(e.to_string()))?;
        Ok(decoded)
    }
}

impl std::fmt::Debug for RpcDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcDispatcher")
            .field("endpoint", &self.transport.endpoint())
            .field("base_id", &self.base_id)
            .field("seq", &self.seq)
            .field("max_tries", &self.max_tries)
            .finish()
    }
}

/// Sleep before attempt `n` (1-indexed): `min_sleep * (n - 1)`.
fn backoff(min_sleep: Duration, attempt: u32) -> Duration {
    min_sleep * attempt.saturating_sub(1)
}

/// Best-effort JSON rendering for trace records.
fn render_json<T: Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}
