//! # kestrel-client
//!
//! Client library for the Kestrel distributed SQL engine's binary RPC
//! services.
//!
//! The crate connects over a framed socket (optionally TLS- or
//! SASL-wrapped) or HTTP, speaks either the extended (v2) or legacy (v1)
//! service contract behind one adapter trait, and drives queries through
//! their full lifecycle: submit, poll or wait, stream result batches,
//! cancel, and close. Idempotent calls on retry-capable transports are
//! retried with linear backoff; result rows decode to display strings
//! with pluggable per-type converters.
//!
//! ## Example
//!
//! ```no_run
//! use std::collections::HashMap;
//!
//! use kestrel_client::{Connection, ConnectionParams};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Connect and open a session
//! let params: ConnectionParams = "kestrel://alice@coord-1:21052".parse()?;
//! let mut connection = Connection::connect(params).await?;
//!
//! // Submit a statement and wait for it to finish
//! let mut handle = connection
//!     .engine()
//!     .submit("SELECT id, name FROM users", &HashMap::new())
//!     .await?;
//! connection.engine().wait(&handle).await?;
//!
//! // Stream result batches
//! let mut batches = connection.engine().fetch(&handle)?;
//! while let Some(batch) = batches.next_batch().await? {
//!     for row in batch.rows {
//!         println!("{}", row.join("\t"));
//!     }
//! }
//!
//! // Release the query and the connection
//! connection.engine().close(&mut handle).await?;
//! connection.close().await;
//! # Ok(())
//! # }
//! ```

// Module declarations
pub mod connection;
pub mod error;
pub mod protocol;
pub mod query;
pub mod rpc;
pub mod session;
pub mod transport;
pub mod types;

// Re-export public API
pub use connection::{Connection, ConnectionParams};
pub use error::{ClientError, ConnectionError, ErrorKind, QueryError, RpcError, TransportError};
pub use query::{BatchStream, QueryEngine, QueryHandle, QueryState, ResultBatch};
pub use session::Session;
pub use types::{Column, ConverterTable, OptionLevel, RawValue, Schema, TypeTag};
