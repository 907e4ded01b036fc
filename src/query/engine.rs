//! Query lifecycle driving: submit, poll, wait, cancel, close, retrieval.
//!
//! [`QueryEngine`] owns the client side of a query's life. It stays ignorant
//! of which wire service is active; everything goes through the shared
//! [`ProtocolAdapter`], and the handles it returns are opaque above this
//! layer. One engine drives one connection and must not be shared across
//! callers: the cancel flag and trace attribution are connection-scoped.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{ClientError, ErrorKind, QueryError, RpcError};
use crate::protocol::messages::OperationState;
use crate::protocol::{
    DmlResult, ProtocolAdapter, ProtocolHandle, QueryProfile, QuerySummary,
};
use crate::rpc::CancelSignal;
use crate::types::{ConverterTable, Schema};

use super::results::BatchStream;

/// Poll cadence for queries younger than ten seconds.
const WAIT_FAST: Duration = Duration::from_millis(100);
/// Poll cadence between ten and sixty seconds.
const WAIT_MEDIUM: Duration = Duration::from_millis(500);
/// Poll cadence past the first minute.
const WAIT_SLOW: Duration = Duration::from_secs(1);

const WAIT_MEDIUM_AFTER: Duration = Duration::from_secs(10);
const WAIT_SLOW_AFTER: Duration = Duration::from_secs(60);

/// Client-side view of a query's lifecycle state.
///
/// `Created → Running → {Finished | Error | Cancelled} → Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    /// Submitted, no status observed yet
    Created,
    /// Pending or executing on the server
    Running,
    /// Completed successfully; results may be fetched
    Finished,
    /// Cancelled on the server
    Cancelled,
    /// Released; the handle is no longer valid
    Closed,
    /// Failed on the server
    Error,
}

impl QueryState {
    /// True for states that end the lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueryState::Finished | QueryState::Cancelled | QueryState::Closed | QueryState::Error
        )
    }
}

impl From<OperationState> for QueryState {
    fn from(state: OperationState) -> Self {
        match state {
            OperationState::Pending | OperationState::Running => QueryState::Running,
            OperationState::Finished => QueryState::Finished,
            OperationState::Cancelled => QueryState::Cancelled,
            OperationState::Closed => QueryState::Closed,
            OperationState::Error => QueryState::Error,
        }
    }
}

impl std::fmt::Display for QueryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            QueryState::Created => "CREATED",
            QueryState::Running => "RUNNING",
            QueryState::Finished => "FINISHED",
            QueryState::Cancelled => "CANCELLED",
            QueryState::Closed => "CLOSED",
            QueryState::Error => "ERROR",
        };
        write!(f, "{}", name)
    }
}

/// One submitted query.
///
/// Holds the wire handle, the display id, the schema attached at submit
/// time, and a `closed` flag that becomes true exactly once. The flag is
/// checked before any close or cancel side effect, so releasing a handle
/// twice never reaches the server twice.
#[derive(Debug, Clone)]
pub struct QueryHandle {
    wire: ProtocolHandle,
    id: String,
    has_result_set: bool,
    schema: Option<Schema>,
    closed: bool,
}

impl QueryHandle {
    /// The display form of the server-issued query id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// True when the statement produces fetchable rows.
    pub fn has_result_set(&self) -> bool {
        self.has_result_set
    }

    /// The result-set schema attached at submit time, if any.
    pub fn schema(&self) -> Option<&Schema> {
        self.schema.as_ref()
    }

    /// Column display names in server order; empty without a schema.
    pub fn column_names(&self) -> Vec<String> {
        self.schema
            .as_ref()
            .map(Schema::column_names)
            .unwrap_or_default()
    }

    /// True once the handle has been released.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn wire(&self) -> &ProtocolHandle {
        &self.wire
    }
}

/// Drives submitted queries over the shared protocol adapter.
pub struct QueryEngine {
    adapter: Arc<Mutex<dyn ProtocolAdapter>>,
    fetch_size: i64,
    converters: ConverterTable,
    cancel: CancelSignal,
    webserver_address: Option<String>,
}

impl QueryEngine {
    pub fn new(
        adapter: Arc<Mutex<dyn ProtocolAdapter>>,
        fetch_size: i64,
        cancel: CancelSignal,
    ) -> Self {
        Self {
            adapter,
            fetch_size: fetch_size.max(1),
            converters: ConverterTable::identity(),
            cancel,
            webserver_address: None,
        }
    }

    /// Install per-type value converters used when decoding batches.
    pub fn set_converters(&mut self, converters: ConverterTable) {
        self.converters = converters;
    }

    /// Record the server's debug web UI address for log linkage.
    pub fn set_webserver_address(&mut self, address: Option<String>) {
        self.webserver_address = address;
    }

    /// A clone of the connection-scoped cancel flag.
    pub fn cancel_signal(&self) -> CancelSignal {
        self.cancel.clone()
    }

    /// Submit a statement for execution.
    ///
    /// The execute round-trip is never retried. When the statement produces
    /// a result set and the service did not describe it inline, a secondary
    /// metadata call attaches the schema before the handle is returned. A
    /// server-rejected submit surfaces as [`QueryError::State`] carrying the
    /// server's message.
    pub async fn submit(
        &mut self,
        statement: &str,
        options: &HashMap<String, String>,
    ) -> Result<QueryHandle, ClientError> {
        self.cancel.clear();
        let mut adapter = self.adapter.lock().await;
        let submission = adapter
            .execute(statement, options)
            .await
            .map_err(|err| match err {
                ClientError::Rpc(RpcError::Server { message, .. }) => {
                    QueryError::State { message }.into()
                }
                other => other,
            })?;
        let id = submission.handle.display_id();
        let mut schema = submission.schema;
        if submission.has_result_set && schema.is_none() {
            schema = Some(adapter.result_metadata(&submission.handle).await?);
        }
        debug!(query_id = %id, has_result_set = submission.has_result_set, "query submitted");
        Ok(QueryHandle {
            wire: submission.handle,
            id,
            has_result_set: submission.has_result_set,
            schema,
            closed: false,
        })
    }

    /// One status round-trip, mapped into the client state vocabulary.
    pub async fn poll(&mut self, handle: &QueryHandle) -> Result<QueryState, ClientError> {
        if handle.closed {
            return Ok(QueryState::Closed);
        }
        let status = self.adapter.lock().await.query_state(handle.wire()).await?;
        Ok(QueryState::from(status.state))
    }

    /// Block until the query reaches Finished.
    ///
    /// See [`wait_with`](Self::wait_with) for the polling schedule.
    pub async fn wait(&mut self, handle: &QueryHandle) -> Result<(), ClientError> {
        self.wait_with(handle, || {}).await
    }

    /// Block until the query reaches Finished, invoking `on_tick` after
    /// each non-terminal poll.
    ///
    /// The sleep target steps with elapsed time (0.1s under ten seconds,
    /// 0.5s under a minute, 1s beyond), reduced by however long the status
    /// round-trip itself took. On Error or Cancelled the accumulated error
    /// log is surfaced as [`QueryError::State`]; a dead connection surfaces
    /// as the underlying disconnect instead.
    pub async fn wait_with<F>(
        &mut self,
        handle: &QueryHandle,
        mut on_tick: F,
    ) -> Result<(), ClientError>
    where
        F: FnMut(),
    {
        let started = tokio::time::Instant::now();
        loop {
            let poll_started = tokio::time::Instant::now();
            let status = {
                self.adapter.lock().await.query_state(handle.wire()).await?
            };
            let poll_elapsed = poll_started.elapsed();
            let state = QueryState::from(status.state);
            if state == QueryState::Finished {
                return Ok(());
            }
            if state.is_terminal() {
                return Err(self
                    .terminal_failure(handle, state, status.error_message)
                    .await);
            }
            on_tick();
            let pause = wait_interval(started.elapsed()).saturating_sub(poll_elapsed);
            if !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
        }
    }

    /// Begin fetching results as a lazy batch sequence.
    ///
    /// No RPC happens here; the first round-trip is issued by the first
    /// [`BatchStream::next_batch`] call.
    pub fn fetch(&self, handle: &QueryHandle) -> Result<BatchStream<'_>, ClientError> {
        if handle.closed {
            return Err(QueryError::HandleClosed.into());
        }
        if !handle.has_result_set {
            return Err(QueryError::NoResultSet(handle.id().to_string()).into());
        }
        Ok(BatchStream::new(
            Arc::clone(&self.adapter),
            handle.wire.clone(),
            handle.schema.clone(),
            &self.converters,
            self.fetch_size,
        ))
    }

    /// Request server-side cancellation of a running query.
    ///
    /// Raises the connection's cancel flag first, so an in-flight poll that
    /// fails because of the cancel classifies as Cancelled rather than as a
    /// hard error. Returns false when the server refused the cancel; only a
    /// dead connection raises.
    pub async fn cancel(&mut self, handle: &QueryHandle) -> Result<bool, ClientError> {
        if handle.closed {
            return Ok(true);
        }
        self.cancel.set();
        match self.adapter.lock().await.cancel(handle.wire()).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::Disconnected => Err(err),
            Err(err) => {
                warn!(query_id = %handle.id(), error = %err, "cancel request failed");
                Ok(false)
            }
        }
    }

    /// Release the query's server-side state.
    ///
    /// The handle is marked closed after the attempt whether or not the
    /// server acknowledged it, so a second call is always a local no-op.
    /// Returns false when the server refused the close; only a dead
    /// connection raises.
    pub async fn close(&mut self, handle: &mut QueryHandle) -> Result<bool, ClientError> {
        if handle.closed {
            return Ok(true);
        }
        let outcome = { self.adapter.lock().await.close(handle.wire()).await };
        handle.closed = true;
        self.cancel.clear();
        match outcome {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::Disconnected => Err(err),
            Err(err) => {
                warn!(query_id = %handle.id(), error = %err, "close request failed");
                Ok(false)
            }
        }
    }

    /// Finalize a DML statement and collect its row statistics.
    ///
    /// The closing round-trip mutates server state and therefore runs at
    /// most once; the handle is marked closed only after success.
    pub async fn close_dml(&mut self, handle: &mut QueryHandle) -> Result<DmlResult, ClientError> {
        if handle.closed {
            return Err(QueryError::HandleClosed.into());
        }
        let stats = {
            self.adapter.lock().await.close_dml(handle.wire()).await?
        };
        handle.closed = true;
        self.cancel.clear();
        Ok(stats)
    }

    /// The query's accumulated server log, post-processed for display.
    ///
    /// In-flight progress markers are stripped; when the server reports it
    /// transparently retried the query, a link to the retried attempt's
    /// plan page is appended (requires the webserver address from ping).
    pub async fn log(&mut self, handle: &QueryHandle) -> Result<String, ClientError> {
        let raw = self.adapter.lock().await.get_log(handle.wire()).await?;
        Ok(post_process_log(&raw, self.webserver_address.as_deref()))
    }

    /// The accumulated log wrapped as a warning block, or empty.
    pub async fn warnings(&mut self, handle: &QueryHandle) -> Result<String, ClientError> {
        let log = self.log(handle).await?;
        Ok(wrap_log(&log, "WARNINGS"))
    }

    /// The accumulated log wrapped as an error block, or empty.
    pub async fn errors(&mut self, handle: &QueryHandle) -> Result<String, ClientError> {
        let log = self.log(handle).await?;
        Ok(wrap_log(&log, "ERROR"))
    }

    /// The runtime profile of the most recent attempt.
    pub async fn profile(
        &mut self,
        handle: &QueryHandle,
        include_failed: bool,
    ) -> Result<QueryProfile, ClientError> {
        self.adapter
            .lock()
            .await
            .get_profile(handle.wire(), include_failed)
            .await
    }

    /// The execution summary of the most recent attempt.
    pub async fn summary(
        &mut self,
        handle: &QueryHandle,
        include_failed: bool,
    ) -> Result<QuerySummary, ClientError> {
        self.adapter
            .lock()
            .await
            .get_summary(handle.wire(), include_failed)
            .await
    }

    /// Build the failure for a query that ended in Error or Cancelled.
    ///
    /// Prefers the accumulated error log; falls back to the status message.
    /// A connection that died while retrieving the log surfaces as the
    /// disconnect itself.
    async fn terminal_failure(
        &mut self,
        handle: &QueryHandle,
        state: QueryState,
        status_message: Option<String>,
    ) -> ClientError {
        let fallback = |message: Option<String>| {
            message.unwrap_or_else(|| format!("query {} entered state {}", handle.id(), state))
        };
        let message = match self.errors(handle).await {
            Ok(log) if !log.trim().is_empty() => log,
            Ok(_) => fallback(status_message),
            Err(err) if err.kind() == ErrorKind::Disconnected => return err,
            Err(err) => {
                debug!(query_id = %handle.id(), error = %err, "error log unavailable");
                fallback(status_message)
            }
        };
        QueryError::State { message }.into()
    }
}

impl std::fmt::Debug for QueryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEngine")
            .field("fetch_size", &self.fetch_size)
            .field("converters", &self.converters)
            .field("webserver_address", &self.webserver_address)
            .finish()
    }
}

/// Sleep target for the wait loop as a step function of elapsed time.
fn wait_interval(elapsed: Duration) -> Duration {
    if elapsed >= WAIT_SLOW_AFTER {
        WAIT_SLOW
    } else if elapsed >= WAIT_MEDIUM_AFTER {
        WAIT_MEDIUM
    } else {
        WAIT_FAST
    }
}

/// Build the web UI link for one query id.
pub fn query_link(webserver_address: &str, query_id: &str) -> String {
    format!("{}/query_plan?query_id={}", webserver_address, query_id)
}

fn progress_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"Query.*Complete \([0-9]* out of [0-9]*\)\n").ok())
        .as_ref()
}

fn retried_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"Query has been retried using query id: (.*)\n").ok())
        .as_ref()
}

/// Strip in-flight progress markers and link a transparently retried query.
fn post_process_log(raw: &str, webserver_address: Option<&str>) -> String {
    let mut log = match progress_pattern() {
        Some(pattern) => pattern.replace_all(raw, "").into_owned(),
        None => raw.to_string(),
    };
    if let (Some(pattern), Some(address)) = (retried_pattern(), webserver_address) {
        if let Some(retried_id) = pattern.captures(&log).and_then(|c| c.get(1)) {
            let link = query_link(address, retried_id.as_str());
            log.push_str(&format!("\nRetried query link: {}", link));
        }
    }
    log
}

/// Wrap a non-empty log under a severity heading, or return empty.
fn wrap_log(log: &str, heading: &str) -> String {
    if log.trim().is_empty() {
        String::new()
    } else {
        format!("{}: {}", heading, log)
    }
}
