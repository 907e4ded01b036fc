//! HTTP request/response transport.
//!
//! Each RPC payload travels as the body of one `POST` to the configured
//! path, `application/octet-stream` both ways, authentication as request
//! headers. Cookies persist across requests so load balancers keep routing
//! a session to the same backend. HTTP is the one transport the dispatcher
//! may retry on: every request is a self-contained exchange, so a failed
//! attempt leaves no half-written frame behind.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use reqwest::StatusCode;
use tracing::debug;

use crate::connection::auth::AuthScheme;
use crate::connection::params::ConnectionParams;
use crate::error::{ClientError, ConnectionError, TransportError};
use crate::rpc::CallContext;
use crate::transport::sasl::{PrincipalResolver, SaslMechanism};
use crate::transport::{render_endpoint, RpcTransport};

/// Session identifier trace header.
pub const HEADER_SESSION_ID: &str = "X-Kestrel-Session-Id";
/// Query identifier trace header.
pub const HEADER_QUERY_ID: &str = "X-Kestrel-Query-Id";
/// Correlation identifier trace header.
pub const HEADER_REQUEST_ID: &str = "X-Request-Id";
/// Originating-client header, forwarded to the engine for audit logs.
pub const HEADER_FORWARDED_FOR: &str = "X-Forwarded-For";

/// Request/response transport over HTTP.
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    base_headers: HeaderMap,
    retry_after: Option<Duration>,
    endpoint: String,
}

impl HttpTransport {
    /// Build the transport: construct the client, precompute auth headers.
    ///
    /// No request is sent here; the first exchange surfaces connectivity
    /// problems. `mechanism` supplies the initial Negotiate token for
    /// Kerberos; the resolver maps the configured host to the
    /// service-principal hostname first.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionError::NotSupported` for Kerberos without an
    /// injected mechanism and `TransportError` when the client cannot be
    /// constructed (e.g. an unreadable CA bundle).
    pub fn open(
        params: &ConnectionParams,
        auth: AuthScheme,
        mechanism: Option<Box<dyn SaslMechanism>>,
        resolver: &dyn PrincipalResolver,
    ) -> Result<Self, ClientError> {
        let endpoint = render_endpoint(&params.host, params.port);
        let scheme = if params.use_tls { "https" } else { "http" };
        let url = format!("{}://{}/{}", scheme, endpoint, params.http_path);

        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .cookie_store(true);
        if let Some(path) = &params.ca_cert {
            let pem = std::fs::read(path).map_err(|e| {
                TransportError::Tls(format!("failed to read CA bundle {}: {}", path.display(), e))
            })?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| TransportError::Tls(e.to_string()))?;
            builder = builder.add_root_certificate(cert);
        }
        let client = builder.build().map_err(TransportError::from)?;

        let mut base_headers = HeaderMap::new();
        base_headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
        if let Some(value) = auth_header_value(auth, mechanism, resolver)? {
            let mut value = HeaderValue::from_str(&value).map_err(|e| {
                ConnectionError::AuthenticationFailed(format!(
                    "credentials cannot form an HTTP header: {}",
                    e
                ))
            })?;
            value.set_sensitive(true);
            base_headers.insert(AUTHORIZATION, value);
        }
        if let Some(addr) = &params.forwarded_for {
            let value = HeaderValue::from_str(addr).map_err(|e| {
                ConnectionError::InvalidParameter {
                    parameter: "forwarded_for".to_string(),
                    message: e.to_string(),
                }
            })?;
            base_headers.insert(HEADER_FORWARDED_FOR, value);
        }

        debug!(url = %url, "opening HTTP transport");
        Ok(Self {
            client,
            url,
            base_headers,
            retry_after: None,
            endpoint,
        })
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn exchange(
        &mut self,
        ctx: &CallContext,
        payload: &[u8],
    ) -> Result<Vec<u8>, TransportError> {
        // A hint left by an earlier call must not feed this call's backoff.
        self.retry_after = None;
        let mut request = self
            .client
            .post(&self.url)
            .headers(self.base_headers.clone())
            .body(payload.to_vec());

        if let Some(session_id) = &ctx.session_id {
            request = request.header(HEADER_SESSION_ID, session_id);
        }
        if let Some(query_id) = &ctx.query_id {
            request = request.header(HEADER_QUERY_ID, query_id);
        }
        if !ctx.correlation_id.is_empty() {
            request = request.header(HEADER_REQUEST_ID, &ctx.correlation_id);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            self.retry_after = parse_retry_after(response.headers().get(RETRY_AFTER));
            let message = response.text().await.unwrap_or_default();
            return Err(http_status_error(status, message));
        }

        let body = response.bytes().await?;
        Ok(body.to_vec())
    }

    fn supports_retries(&self) -> bool {
        true
    }

    fn take_retry_after(&mut self) -> Option<Duration> {
        self.retry_after.take()
    }

    async fn shutdown(&mut self) -> Result<(), TransportError> {
        // Connections close when the client drops; nothing to flush.
        Ok(())
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("url", &self.url)
            .field("retry_after", &self.retry_after)
            .finish()
    }
}

/// Render the `Authorization` header for the resolved auth scheme.
fn auth_header_value(
    auth: AuthScheme,
    mechanism: Option<Box<dyn SaslMechanism>>,
    resolver: &dyn PrincipalResolver,
) -> Result<Option<String>, ClientError> {
    match auth {
        AuthScheme::Anonymous => Ok(None),
        AuthScheme::Ldap(credentials) => {
            let pair = format!("{}:{}", credentials.username(), credentials.password());
            Ok(Some(format!("Basic {}", BASE64.encode(pair))))
        }
        AuthScheme::Jwt(token) | AuthScheme::Oauth(token) => {
            Ok(Some(format!("Bearer {}", token.reveal())))
        }
        AuthScheme::Kerberos { service, host } => match mechanism {
            Some(mut mechanism) => {
                mechanism.bind(&service, &resolver.resolve(&host));
                let token = mechanism.initial_response()?;
                Ok(Some(format!("Negotiate {}", BASE64.encode(token))))
            }
            None => Err(ConnectionError::NotSupported(
                "Kerberos over HTTP requires an injected GSSAPI mechanism".to_string(),
            )
            .into()),
        },
    }
}

/// Numeric `Retry-After` (delay seconds form); HTTP-date form is ignored.
fn parse_retry_after(header: Option<&HeaderValue>) -> Option<Duration> {
    header
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn http_status_error(status: StatusCode, message: String) -> TransportError {
    TransportError::HttpStatus {
        status: status.as_u16(),
        message: if message.is_empty() {
            status
                .canonical_reason()
                .unwrap_or("unknown status")
                .to_string()
        } else {
            message
        },
    }
}
