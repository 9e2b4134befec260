//! Upload credentials
//!
//! Lookaside CGI endpoints authenticate uploads with SPNEGO (`Authorization:
//! Negotiate <token>`). Downloads are anonymous.

use crate::error::{LookasideError, LookasideResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Credential mode selected by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    #[default]
    Anonymous,
    Negotiate,
}

/// Produces GSSAPI initial context tokens for an HTTP service
pub trait NegotiateProvider: Send + Sync {
    /// Raw (not base64) token for `HTTP@host`
    fn token(&self, host: &str) -> LookasideResult<Vec<u8>>;
}

/// Credentials attached to upload requests
#[derive(Clone, Default)]
pub enum Credentials {
    #[default]
    Anonymous,
    Negotiate(Arc<dyn NegotiateProvider>),
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => write!(f, "Anonymous"),
            Self::Negotiate(_) => write!(f, "Negotiate"),
        }
    }
}

impl Credentials {
    /// Resolve the configured mode to usable credentials
    pub fn from_mode(mode: AuthMode) -> LookasideResult<Self> {
        match mode {
            AuthMode::Anonymous => Ok(Self::Anonymous),
            AuthMode::Negotiate => default_negotiate(),
        }
    }
}

#[cfg(feature = "kerberos")]
fn default_negotiate() -> LookasideResult<Credentials> {
    Ok(Credentials::Negotiate(Arc::new(Krb5Negotiate)))
}

#[cfg(not(feature = "kerberos"))]
fn default_negotiate() -> LookasideResult<Credentials> {
    Err(LookasideError::KerberosUnsupported)
}

/// Tokens from the user's Kerberos credential cache
#[cfg(feature = "kerberos")]
pub struct Krb5Negotiate;

#[cfg(feature = "kerberos")]
impl NegotiateProvider for Krb5Negotiate {
    fn token(&self, host: &str) -> LookasideResult<Vec<u8>> {
        use cross_krb5::{ClientCtx, InitiateFlags};

        let target = format!("HTTP/{}", host);
        let (_pending, token) = ClientCtx::new(InitiateFlags::empty(), None, &target, None)
            .map_err(|e| LookasideError::Kerberos(format!("{} for {}", e, target)))?;
        Ok(token.to_vec())
    }
}
