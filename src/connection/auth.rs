//! Authentication scheme selection for Kestrel connections.
//!
//! This module provides secure credential containers and the resolution of
//! an effective authentication scheme from connection parameters. When more
//! than one mode is configured, precedence is: LDAP credentials, then JWT,
//! then OAuth, then Kerberos, then unauthenticated.

use std::fmt;
use std::sync::Arc;

use crate::connection::params::ConnectionParams;
use crate::error::ConnectionError;

/// Secure credentials container.
///
/// This struct ensures credentials are never accidentally logged or displayed.
#[derive(Clone)]
pub struct Credentials {
    username: String,
    password: Arc<SecureString>,
}

impl Credentials {
    /// Create new credentials.
    pub fn new(username: String, password: String) -> Self {
        Self {
            username,
            password: Arc::new(SecureString::new(password)),
        }
    }

    /// Get the username.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Get the password (for internal use only).
    pub(crate) fn password(&self) -> &str {
        self.password.as_str()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl fmt::Display for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credentials(username: {})", self.username)
    }
}

/// Bearer token container with the same redaction guarantees as
/// [`Credentials`].
#[derive(Clone)]
pub struct BearerToken {
    token: Arc<SecureString>,
}

impl BearerToken {
    /// Wrap a raw token string.
    pub fn new(token: String) -> Self {
        Self {
            token: Arc::new(SecureString::new(token)),
        }
    }

    /// Get the raw token (for internal use only).
    pub(crate) fn reveal(&self) -> &str {
        self.token.as_str()
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BearerToken(<redacted>)")
    }
}

/// Secure string that zeros memory on drop and never displays its contents.
pub(crate) struct SecureString {
    data: Vec<u8>,
}

impl SecureString {
    pub(crate) fn new(s: String) -> Self {
        Self {
            data: s.into_bytes(),
        }
    }

    pub(crate) fn as_str(&self) -> &str {
        // Safe because we only construct from valid UTF-8 strings
        unsafe { std::str::from_utf8_unchecked(&self.data) }
    }
}

impl Drop for SecureString {
    fn drop(&mut self) {
        // Zero out the secret bytes before dropping
        for byte in &mut self.data {
            *byte = 0;
        }
    }
}

impl fmt::Debug for SecureString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecureString(<redacted>)")
    }
}

/// Effective authentication scheme for one connection.
#[derive(Debug, Clone)]
pub enum AuthScheme {
    /// No authentication
    Anonymous,
    /// LDAP username/password: SASL PLAIN on sockets, Basic on HTTP
    Ldap(Credentials),
    /// JWT bearer token (HTTP only)
    Jwt(BearerToken),
    /// OAuth bearer token (HTTP only)
    Oauth(BearerToken),
    /// Kerberos: SASL GSSAPI on sockets, Negotiate on HTTP
    Kerberos {
        /// Service name portion of the principal
        service: String,
        /// Configured host alias; resolved to the principal host by a
        /// [`crate::transport::PrincipalResolver`] at transport build
        host: String,
    },
}

impl AuthScheme {
    /// Resolve the effective scheme from connection parameters.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionError::InvalidParameter` when a token-based mode
    /// is configured on a socket transport.
    pub fn resolve(params: &ConnectionParams) -> Result<Self, ConnectionError> {
        if let (Some(user), Some(password)) = (&params.user, &params.password) {
            return Ok(AuthScheme::Ldap(Credentials::new(
                user.clone(),
                password.clone(),
            )));
        }
        if let Some(token) = &params.jwt {
            if !params.use_http {
                return Err(ConnectionError::InvalidParameter {
                    parameter: "jwt".to_string(),
                    message: "JWT authentication requires the HTTP transport".to_string(),
                });
            }
            return Ok(AuthScheme::Jwt(BearerToken::new(token.clone())));
        }
        if let Some(token) = &params.oauth {
            if !params.use_http {
                return Err(ConnectionError::InvalidParameter {
                    parameter: "oauth".to_string(),
                    message: "OAuth authentication requires the HTTP transport".to_string(),
                });
            }
            return Ok(AuthScheme::Oauth(BearerToken::new(token.clone())));
        }
        if params.use_kerberos {
            let host = params
                .kerberos_host_override
                .clone()
                .unwrap_or_else(|| params.host.clone());
            return Ok(AuthScheme::Kerberos {
                service: params.kerberos_service_name.clone(),
                host,
            });
        }
        Ok(AuthScheme::Anonymous)
    }
}
