//! Framed TCP socket transport, optionally TLS- and SASL-wrapped.
//!
//! Every RPC frame is a 4-byte big-endian length prefix followed by the
//! payload. When a SASL mechanism negotiated a security layer, the payload
//! portion is the mechanism's sealed form. The whole handshake (TCP dial,
//! TLS, SASL negotiation) runs under the connect timeout; once the
//! transport is open no timeout applies to individual exchanges.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::connection::auth::AuthScheme;
use crate::connection::params::ConnectionParams;
use crate::error::{ClientError, ConnectionError, TransportError};
use crate::rpc::CallContext;
use crate::transport::sasl::{self, PlainMechanism, PrincipalResolver, SaslMechanism};
use crate::transport::{render_endpoint, RpcTransport};

/// Frames larger than this indicate a corrupt stream, not a real response.
const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Object-safe bound for the plain/TLS stream behind the framing.
trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

/// Length-prefixed binary transport over TCP.
///
/// A failed exchange leaves the stream position unknown, so this transport
/// reports `supports_retries() == false` and the dispatcher gives every
/// call exactly one attempt.
pub struct SocketTransport {
    stream: Box<dyn AsyncStream>,
    mechanism: Option<Box<dyn SaslMechanism>>,
    endpoint: String,
}

impl SocketTransport {
    /// Dial, secure, and authenticate a socket transport.
    ///
    /// `mechanism` supplies Kerberos token rounds; LDAP credentials use the
    /// built-in PLAIN mechanism. The resolver maps the configured host to
    /// the service-principal hostname before the mechanism is bound.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionError::Timeout` when the handshake exceeds the
    /// connect timeout, `ConnectionError::NotSupported` for Kerberos
    /// without an injected mechanism, and `TransportError` for network,
    /// TLS, or SASL failures.
    pub async fn open(
        params: &ConnectionParams,
        auth: AuthScheme,
        mechanism: Option<Box<dyn SaslMechanism>>,
        resolver: &dyn PrincipalResolver,
    ) -> Result<Self, ClientError> {
        let endpoint = render_endpoint(&params.host, params.port);
        let mechanism = build_mechanism(auth, mechanism, resolver)?;

        let handshake = Self::handshake(params, mechanism, endpoint);
        if params.connect_timeout_ms > 0 {
            let limit = Duration::from_millis(params.connect_timeout_ms);
            match tokio::time::timeout(limit, handshake).await {
                Ok(result) => result,
                Err(_) => Err(ConnectionError::Timeout {
                    timeout_ms: params.connect_timeout_ms,
                }
                .into()),
            }
        } else {
            handshake.await
        }
    }

    async fn handshake(
        params: &ConnectionParams,
        mut mechanism: Option<Box<dyn SaslMechanism>>,
        endpoint: String,
    ) -> Result<Self, ClientError> {
        debug!(
            endpoint = %endpoint,
            tls = params.use_tls,
            sasl = mechanism.is_some(),
            "opening socket transport"
        );

        let tcp = TcpStream::connect((params.host.as_str(), params.port))
            .await
            .map_err(TransportError::from)?;

        let mut stream: Box<dyn AsyncStream> = if params.use_tls {
            let config = tls_client_config(params.ca_cert.as_deref())?;
            let connector = TlsConnector::from(Arc::new(config));
            let server_name = ServerName::try_from(params.host.clone()).map_err(|e| {
                TransportError::Tls(format!("invalid server name {:?}: {}", params.host, e))
            })?;
            let tls = connector
                .connect(server_name, tcp)
                .await
                .map_err(|e| TransportError::Tls(e.to_string()))?;
            Box::new(tls)
        } else {
            Box::new(tcp)
        };

        if let Some(mechanism) = &mut mechanism {
            sasl::negotiate(&mut stream, mechanism.as_mut()).await?;
            debug!(mechanism = mechanism.name(), "SASL negotiation complete");
        }

        Ok(Self {
            stream,
            mechanism,
            endpoint,
        })
    }
}

#[async_trait]
impl RpcTransport for SocketTransport {
    async fn exchange(
        &mut self,
        _ctx: &CallContext,
        payload: &[u8],
    ) -> Result<Vec<u8>, TransportError> {
        let sealed;
        let outgoing: &[u8] = match &mut self.mechanism {
            Some(mechanism) => {
                sealed = mechanism.seal(payload)?;
                &sealed
            }
            None => payload,
        };

        let mut frame = Vec::with_capacity(4 + outgoing.len());
        frame.extend_from_slice(&(outgoing.len() as u32).to_be_bytes());
        frame.extend_from_slice(outgoing);
        self.stream.write_all(&frame).await?;
        self.stream.flush().await?;

        let len = self.stream.read_u32().await? as usize;
        if len > MAX_FRAME_LEN {
            return Err(TransportError::InvalidFrame(format!(
                "response frame of {} bytes exceeds the {} byte limit",
                len, MAX_FRAME_LEN
            )));
        }
        let mut response = vec![0u8; len];
        self.stream.read_exact(&mut response).await?;

        match &mut self.mechanism {
            Some(mechanism) => mechanism.unseal(&response),
            None => Ok(response),
        }
    }

    fn supports_retries(&self) -> bool {
        false
    }

    fn take_retry_after(&mut self) -> Option<Duration> {
        None
    }

    async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.stream.shutdown().await?;
        Ok(())
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl std::fmt::Debug for SocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketTransport")
            .field("endpoint", &self.endpoint)
            .field("sasl", &self.mechanism.as_ref().map(|m| m.name().to_string()))
            .finish()
    }
}

/// Pick the SASL mechanism for the resolved auth scheme.
fn build_mechanism(
    auth: AuthScheme,
    injected: Option<Box<dyn SaslMechanism>>,
    resolver: &dyn PrincipalResolver,
) -> Result<Option<Box<dyn SaslMechanism>>, ClientError> {
    match auth {
        AuthScheme::Anonymous => Ok(None),
        AuthScheme::Ldap(credentials) => {
            Ok(Some(Box::new(PlainMechanism::from_credentials(credentials))))
        }
        AuthScheme::Kerberos { service, host } => match injected {
            Some(mut mechanism) => {
                let principal_host = resolver.resolve(&host);
                debug!(
                    principal = %sasl::service_principal(&service, &host, resolver),
                    "binding Kerberos mechanism"
                );
                mechanism.bind(&service, &principal_host);
                Ok(Some(mechanism))
            }
            None => Err(ConnectionError::NotSupported(
                "Kerberos on a socket transport requires an injected GSSAPI mechanism".to_string(),
            )
            .into()),
        },
        AuthScheme::Jwt(_) | AuthScheme::Oauth(_) => Err(ConnectionError::InvalidParameter {
            parameter: "jwt".to_string(),
            message: "Bearer tokens require the HTTP transport".to_string(),
        }
        .into()),
    }
}

/// Root store from the bundled trust anchors plus an optional PEM CA file.
fn tls_client_config(ca_cert: Option<&Path>) -> Result<ClientConfig, TransportError> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    if let Some(path) = ca_cert {
        let pem = std::fs::read(path).map_err(|e| {
            TransportError::Tls(format!("failed to read CA bundle {}: {}", path.display(), e))
        })?;
        for cert in rustls_pemfile::certs(&mut pem.as_slice()) {
            let cert = cert.map_err(|e| {
                TransportError::Tls(format!("invalid certificate in {}: {}", path.display(), e))
            })?;
            roots.add(cert).map_err(|e| TransportError::Tls(e.to_string()))?;
        }
    }

    Ok(ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::auth::Credentials;
    use crate::transport::sasl::{IdentityResolver, STATUS_COMPLETE};
    use tokio::net::TcpListener;

    fn params_for(addr: std::net::SocketAddr) -> ConnectionParams {
        ConnectionParams::new(addr.ip().to_string(), addr.port())
    }

    fn ctx() -> CallContext {
        CallContext::new("Ping", true)
    }

    async fn read_frame(stream: &mut TcpStream) -> Vec<u8> {
        let len = stream.read_u32().await.unwrap() as usize;
        let mut payload = vec![0u8; len];
        stream.read_exact(&mut payload).await.unwrap();
        payload
    }

    async fn write_frame(stream: &mut TcpStream, payload: &[u8]) {
        stream.write_u32(payload.len() as u32).await.unwrap();
        stream.write_all(payload).await.unwrap();
    }

    #[tokio::test]
    async fn test_exchange_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let request = read_frame(&mut stream).await;
            assert_eq!(request, b"hello");
            write_frame(&mut stream, b"world").await;
        });

        let mut transport = SocketTransport::open(
            &params_for(addr),
            AuthScheme::Anonymous,
            None,
            &IdentityResolver,
        )
        .await
        .unwrap();

        let response = transport.exchange(&ctx(), b"hello").await.unwrap();
        assert_eq!(response, b"world");
        assert!(!transport.supports_retries());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_exchange_after_plain_negotiation() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();

            // START + initial response, then accept
            for _ in 0..2 {
                let _status = stream.read_u8().await.unwrap();
                let len = stream.read_u32().await.unwrap() as usize;
                let mut payload = vec![0u8; len];
                stream.read_exact(&mut payload).await.unwrap();
            }
            stream.write_u8(STATUS_COMPLETE).await.unwrap();
            stream.write_u32(0).await.unwrap();

            let request = read_frame(&mut stream).await;
            assert_eq!(request, b"after-auth");
            write_frame(&mut stream, b"ok").await;
        });

        let params = params_for(addr);
        let auth = AuthScheme::Ldap(Credentials::new("alice".to_string(), "pw".to_string()));
        let mut transport = SocketTransport::open(&params, auth, None, &IdentityResolver)
            .await
            .unwrap();

        let response = transport.exchange(&ctx(), b"after-auth").await.unwrap();
        assert_eq!(response, b"ok");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_handshake_timeout() {
        // Bound but never accepted: the TCP dial lands in the backlog and
        // the SASL negotiation blocks forever.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let params = params_for(addr)
            .with_credentials("alice".to_string(), "pw".to_string())
            .with_connect_timeout_ms(50);
        let auth = AuthScheme::Ldap(Credentials::new("alice".to_string(), "pw".to_string()));

        let err = SocketTransport::open(&params, auth, None, &IdentityResolver)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::Connection(ConnectionError::Timeout { timeout_ms: 50 })
        ));
        drop(listener);
    }

    #[tokio::test]
    async fn test_kerberos_without_mechanism() {
        let params = ConnectionParams::new("coord-1".to_string(), 21052);
        let auth = AuthScheme::Kerberos {
            service: "kestrel".to_string(),
            host: "coord-1".to_string(),
        };

        let err = SocketTransport::open(&params, auth, None, &IdentityResolver)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::Connection(ConnectionError::NotSupported(_))
        ));
    }

    #[tokio::test]
    async fn test_oversized_response_frame() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let _request = read_frame(&mut stream).await;
            stream.write_u32(u32::MAX).await.unwrap();
        });

        let mut transport = SocketTransport::open(
            &params_for(addr),
            AuthScheme::Anonymous,
            None,
            &IdentityResolver,
        )
        .await
        .unwrap();

        let err = transport.exchange(&ctx(), b"request").await.unwrap_err();
        assert!(matches!(err, TransportError::InvalidFrame(_)));
        server.await.unwrap();
    }
}
