//! SASL negotiation for the framed socket transport.
//!
//! The negotiation exchanges status-tagged messages before any RPC frame:
//! a 1-byte status, a 4-byte big-endian payload length, then the payload.
//! The client opens with `START` carrying the mechanism name, follows with
//! the mechanism's initial response, then answers server challenges until
//! the server signals `COMPLETE` or rejects the exchange.
//!
//! The PLAIN mechanism ships built in. Kerberos (GSSAPI) token rounds are
//! produced by an injected [`SaslMechanism`] implementation; the crate only
//! drives the negotiation and applies the mechanism's security layer to
//! subsequent frames.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::connection::auth::Credentials;
use crate::error::TransportError;

/// Client opening message; payload is the mechanism name.
pub const STATUS_START: u8 = 1;
/// Challenge/response exchange in progress.
pub const STATUS_OK: u8 = 2;
/// Server rejected the credentials.
pub const STATUS_BAD: u8 = 3;
/// Server-side negotiation failure.
pub const STATUS_ERROR: u8 = 4;
/// Negotiation finished successfully.
pub const STATUS_COMPLETE: u8 = 5;

/// Negotiation payloads are short; anything larger is a framing error.
const MAX_NEGOTIATION_FRAME: usize = 1024 * 1024;

/// One SASL mechanism driving the client side of a negotiation.
///
/// Implementations produce the initial response and answer challenges.
/// Mechanisms that negotiate a security layer (e.g. GSSAPI with integrity
/// or confidentiality) also transform RPC frames via [`seal`]/[`unseal`];
/// the defaults pass frames through unchanged.
///
/// [`seal`]: SaslMechanism::seal
/// [`unseal`]: SaslMechanism::unseal
pub trait SaslMechanism: Send {
    /// Mechanism name as sent in the `START` message, e.g. `PLAIN`.
    fn name(&self) -> &str;

    /// Bind the mechanism to its authentication target before negotiation
    /// starts. `host` has already been through the [`PrincipalResolver`].
    fn bind(&mut self, _service: &str, _host: &str) {}

    /// Produce the initial response sent right after `START`.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Sasl` when the mechanism cannot produce a
    /// token (e.g. no ticket available).
    fn initial_response(&mut self) -> Result<Vec<u8>, TransportError>;

    /// Answer one server challenge.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Sasl` when the challenge is invalid for
    /// this mechanism.
    fn step(&mut self, challenge: &[u8]) -> Result<Vec<u8>, TransportError>;

    /// Apply the negotiated security layer to an outgoing frame.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Sasl` when wrapping fails.
    fn seal(&mut self, frame: &[u8]) -> Result<Vec<u8>, TransportError> {
        Ok(frame.to_vec())
    }

    /// Remove the negotiated security layer from an incoming frame.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Sasl` when unwrapping fails.
    fn unseal(&mut self, frame: &[u8]) -> Result<Vec<u8>, TransportError> {
        Ok(frame.to_vec())
    }
}

/// The PLAIN mechanism: a single `authzid NUL authcid NUL password`
/// message, no challenges, no security layer.
#[derive(Debug)]
pub struct PlainMechanism {
    credentials: Credentials,
}

impl PlainMechanism {
    /// Create a PLAIN mechanism for the given username and password.
    pub fn new(username: String, password: String) -> Self {
        Self {
            credentials: Credentials::new(username, password),
        }
    }

    pub(crate) fn from_credentials(credentials: Credentials) -> Self {
        Self { credentials }
    }
}

impl SaslMechanism for PlainMechanism {
    fn name(&self) -> &str {
        "PLAIN"
    }

    fn initial_response(&mut self) -> Result<Vec<u8>, TransportError> {
        let username = self.credentials.username().as_bytes();
        let password = self.credentials.password().as_bytes();
        let mut response = Vec::with_capacity(username.len() + password.len() + 2);
        response.push(0);
        response.extend_from_slice(username);
        response.push(0);
        response.extend_from_slice(password);
        Ok(response)
    }

    fn step(&mut self, challenge: &[u8]) -> Result<Vec<u8>, TransportError> {
        // PLAIN is a single-message mechanism; tolerate an empty
        // acknowledgement challenge, reject anything else.
        if challenge.is_empty() {
            Ok(Vec::new())
        } else {
            Err(TransportError::Sasl(
                "PLAIN received an unexpected challenge".to_string(),
            ))
        }
    }
}

/// Maps the configured connection host to the hostname used in the
/// Kerberos service principal.
///
/// Deployments behind load balancers override this to resolve the balanced
/// name to a backend FQDN the KDC knows about.
pub trait PrincipalResolver: Send + Sync {
    /// Resolve the principal hostname for a configured host.
    fn resolve(&self, host: &str) -> String;
}

/// Resolver that uses the configured host unchanged.
#[derive(Debug, Default)]
pub struct IdentityResolver;

impl PrincipalResolver for IdentityResolver {
    fn resolve(&self, host: &str) -> String {
        host.to_string()
    }
}

/// Render the `service/host` principal a Kerberos mechanism targets.
pub fn service_principal(service: &str, host: &str, resolver: &dyn PrincipalResolver) -> String {
    format!("{}/{}", service, resolver.resolve(host))
}

/// Drive one client-side negotiation to completion.
///
/// # Errors
///
/// Returns `TransportError::Sasl` when the server rejects the exchange or
/// sends an unknown status, and `TransportError::Io`/`InvalidFrame` for
/// stream-level failures.
pub async fn negotiate<S>(
    stream: &mut S,
    mechanism: &mut dyn SaslMechanism,
) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    send_message(stream, STATUS_START, mechanism.name().as_bytes()).await?;
    let initial = mechanism.initial_response()?;
    send_message(stream, STATUS_OK, &initial).await?;

    loop {
        let (status, payload) = recv_message(stream).await?;
        match status {
            STATUS_OK => {
                let response = mechanism.step(&payload)?;
                send_message(stream, STATUS_OK, &response).await?;
            }
            STATUS_COMPLETE => return Ok(()),
            STATUS_BAD | STATUS_ERROR => {
                return Err(TransportError::Sasl(format!(
                    "server rejected {} negotiation: {}",
                    mechanism.name(),
                    String::from_utf8_lossy(&payload)
                )));
            }
            other => {
                return Err(TransportError::Sasl(format!(
                    "unexpected negotiation status byte {}",
                    other
                )));
            }
        }
    }
}

async fn send_message<S>(stream: &mut S, status: u8, payload: &[u8]) -> Result<(), TransportError>
where
    S: AsyncWrite + Unpin,
{
    stream.write_u8(status).await?;
    stream.write_u32(payload.len() as u32).await?;
    stream.write_all(payload).await?;
    stream.flush().await?;
    Ok(())
}

async fn recv_message<S>(stream: &mut S) -> Result<(u8, Vec<u8>), TransportError>
where
    S: AsyncRead + Unpin,
{
    let status = stream.read_u8().await?;
    let len = stream.read_u32().await? as usize;
    if len > MAX_NEGOTIATION_FRAME {
        return Err(TransportError::InvalidFrame(format!(
            "negotiation payload of {} bytes exceeds the {} byte limit",
            len, MAX_NEGOTIATION_FRAME
        )));
    }
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await?;
    Ok((status, payload))
}
