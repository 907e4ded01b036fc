//! Transport construction for Kestrel engine communication.
//!
//! This module defines the `RpcTransport` trait that abstracts how one
//! encoded frame is exchanged with the engine, plus the factory that builds
//! an authenticated, open transport from connection parameters.
//!
//! # Architecture
//!
//! The transport layer is organized into:
//! - `socket` - framed TCP transport, optionally TLS- and SASL-wrapped
//! - `http` - HTTP request/response transport with header-based auth
//! - `sasl` - SASL negotiation, the PLAIN mechanism, and provider seams
//!
//! # Example
//!
//! ```no_run
//! use kestrel_client::connection::ConnectionParams;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let params = ConnectionParams::new("localhost".to_string(), 21052);
//! let mut transport = kestrel_client::transport::connect(&params).await?;
//! transport.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod http;
pub mod sasl;
pub mod socket;

use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::connection::auth::AuthScheme;
use crate::connection::params::ConnectionParams;
use crate::error::{ClientError, ConnectionError, TransportError};
use crate::rpc::CallContext;

// Re-export commonly used types
pub use http::HttpTransport;
pub use sasl::{IdentityResolver, PlainMechanism, PrincipalResolver, SaslMechanism};
pub use socket::SocketTransport;

/// Byte-level exchange with the engine: one request frame in, one response
/// frame out.
///
/// Implementations differ in framing and in whether a frame may be re-sent
/// after a failure. Only HTTP transports support multiple attempts; a socket
/// transport's stream position is unknown after an error, so the dispatcher
/// never retries on one.
#[async_trait]
pub trait RpcTransport: Send {
    /// Send one encoded request payload and await the response payload.
    ///
    /// # Arguments
    ///
    /// * `ctx` - Call context; HTTP transports project it into trace headers
    /// * `payload` - Encoded request record
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if the exchange fails at any point.
    async fn exchange(
        &mut self,
        ctx: &CallContext,
        payload: &[u8],
    ) -> Result<Vec<u8>, TransportError>;

    /// True when a failed call may be attempted again on this transport.
    fn supports_retries(&self) -> bool;

    /// Server-provided delay before the next attempt, captured from the most
    /// recent failure. Taking the hint clears it, as does starting another
    /// exchange; a hint applies to one sleep within the call that produced
    /// it and never outlives that call.
    fn take_retry_after(&mut self) -> Option<Duration>;

    /// Close the underlying connection.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if teardown fails; session teardown logs
    /// and ignores this.
    async fn shutdown(&mut self) -> Result<(), TransportError>;

    /// Endpoint description for diagnostics, e.g. `host:port` or a URL.
    fn endpoint(&self) -> &str;
}

/// Build an authenticated, open transport from connection parameters.
///
/// Resolves the auth scheme by priority, verifies TLS availability before
/// any network attempt, and hands off to the socket or HTTP constructor.
///
/// # Errors
///
/// Returns `ConnectionError::NotSupported` when TLS is requested but no
/// crypto provider is available, `ConnectionError::Timeout` when the socket
/// handshake exceeds the connect timeout, and `TransportError` for network
/// failures during the handshake.
pub async fn connect(params: &ConnectionParams) -> Result<Box<dyn RpcTransport>, ClientError> {
    connect_with(params, None, &IdentityResolver).await
}

/// [`connect`] with injectable authentication collaborators: a SASL
/// mechanism for Kerberos token rounds and a principal resolver for
/// load-balanced deployments.
///
/// # Errors
///
/// As for [`connect`], plus `ConnectionError::NotSupported` when Kerberos
/// is configured and `mechanism` is `None`.
pub async fn connect_with(
    params: &ConnectionParams,
    mechanism: Option<Box<dyn SaslMechanism>>,
    resolver: &dyn PrincipalResolver,
) -> Result<Box<dyn RpcTransport>, ClientError> {
    let auth = AuthScheme::resolve(params)?;

    if params.use_tls {
        ensure_tls_provider()?;
    }

    if params.use_http {
        if params.connect_timeout_ms > 0 {
            // The HTTP client may reopen its underlying connection on any
            // request, so a connect timeout cannot be enforced reliably.
            warn!(
                timeout_ms = params.connect_timeout_ms,
                "connect timeout is ignored for HTTP transports"
            );
        }
        let transport = HttpTransport::open(params, auth, mechanism, resolver)?;
        Ok(Box::new(transport))
    } else {
        let transport = SocketTransport::open(params, auth, mechanism, resolver).await?;
        Ok(Box::new(transport))
    }
}

/// Render `host:port` for display and connection, bracketing IPv6 literals.
pub fn render_endpoint(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Verify a TLS crypto provider is usable, installing the default if none
/// has been selected yet.
fn ensure_tls_provider() -> Result<(), ConnectionError> {
    use tokio_rustls::rustls::crypto::{aws_lc_rs, CryptoProvider};

    if CryptoProvider::get_default().is_some() {
        return Ok(());
    }
    if aws_lc_rs::default_provider().install_default().is_ok() {
        return Ok(());
    }
    // install_default fails when another install won the race; re-check
    // before declaring TLS unavailable.
    if CryptoProvider::get_default().is_some() {
        return Ok(());
    }
    Err(ConnectionError::NotSupported(
        "no TLS crypto provider is available in this build".to_string(),
    ))
}
