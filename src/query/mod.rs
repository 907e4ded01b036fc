//! Query lifecycle and result streaming.
//!
//! This module drives submitted queries from execute to close and decodes
//! their results:
//! - `engine` - the lifecycle state machine: submit, poll, wait, cancel,
//!   close and close-DML, log/profile/summary retrieval
//! - `results` - result batch decoding and the lazy fetch stream
//!
//! # Example
//!
//! ```no_run
//! use std::collections::HashMap;
//!
//! use kestrel_client::query::QueryEngine;
//!
//! # async fn example(engine: &mut QueryEngine) -> Result<(), kestrel_client::error::ClientError> {
//! let mut handle = engine.submit("SELECT name FROM users", &HashMap::new()).await?;
//! engine.wait(&handle).await?;
//!
//! let mut batches = engine.fetch(&handle)?;
//! while let Some(batch) = batches.next_batch().await? {
//!     for row in batch.rows {
//!         println!("{}", row.join("\t"));
//!     }
//! }
//!
//! engine.close(&mut handle).await?;
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod results;

// Re-export commonly used types
pub use engine::{query_link, QueryEngine, QueryHandle, QueryState};
pub use results::{BatchStream, ResultBatch, NULL_LITERAL};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(QueryState::Finished.is_terminal());
        assert!(QueryState::Closed.is_terminal());
        assert!(!QueryState::Running.is_terminal());
    }

    #[test]
    fn test_null_literal_export() {
        assert_eq!(NULL_LITERAL, "NULL");
    }
}
