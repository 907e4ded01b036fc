//! User-facing RPC trace sinks.
//!
//! Distinct from the crate's `tracing` instrumentation: the tracer is an
//! opt-in diagnostic that renders every dispatched call and its reply as a
//! JSON line, to the console, to an append-only file, or both. Sink write
//! failures are logged and never fail the call being traced.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};
use tracing::warn;

use crate::connection::ConnectionParams;
use crate::error::{ClientError, ConnectionError};
use crate::rpc::CallContext;

/// Renders dispatched calls as JSON lines on the configured sinks.
#[derive(Debug)]
pub struct RpcTracer {
    console: bool,
    file: Option<File>,
}

impl RpcTracer {
    /// Build a tracer from connection parameters, or `None` when tracing
    /// is not enabled.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionError::InvalidParameter` when the trace file
    /// cannot be opened for appending.
    pub fn from_params(params: &ConnectionParams) -> Result<Option<Self>, ClientError> {
        let file = match &params.trace_file {
            Some(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|e| ConnectionError::InvalidParameter {
                        parameter: "trace_file".to_string(),
                        message: format!("cannot open {}: {}", path.display(), e),
                    })?;
                Some(file)
            }
            None => None,
        };

        if !params.trace_console && file.is_none() {
            return Ok(None);
        }
        Ok(Some(Self {
            console: params.trace_console,
            file,
        }))
    }

    /// Record the start of one dispatch attempt.
    pub fn record_start(&mut self, ctx: &CallContext, attempt: u32, request: Value) {
        let record = json!({
            "ts_ms": epoch_millis(),
            "event": "call",
            "method": ctx.method,
            "correlation_id": ctx.correlation_id,
            "attempt": attempt,
            "session_id": ctx.session_id,
            "query_id": ctx.query_id,
            "request": request,
        });
        self.emit(&record);
    }

    /// Record the outcome of one dispatch attempt.
    ///
    /// `outcome` is `"ok"` or the failure's display string; `response` is
    /// present only on success.
    pub fn record_end(
        &mut self,
        ctx: &CallContext,
        attempt: u32,
        elapsed: Duration,
        outcome: &str,
        response: Option<Value>,
    ) {
        let record = json!({
            "ts_ms": epoch_millis(),
            "event": "reply",
            "method": ctx.method,
            "correlation_id": ctx.correlation_id,
            "attempt": attempt,
            "elapsed_ms": elapsed.as_millis() as u64,
            "outcome": outcome,
            "response": response,
        });
        self.emit(&record);
    }

    fn emit(&mut self, record: &Value) {
        if self.console {
            let mut stdout = std::io::stdout().lock();
            if let Err(e) = writeln!(stdout, "{record}") {
                warn!(error = %e, "failed to write RPC trace to console");
            }
        }
        if let Some(file) = &mut self.file {
            if let Err(e) = writeln!(file, "{record}") {
                warn!(error = %e, "failed to write RPC trace to file");
            }
        }
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
