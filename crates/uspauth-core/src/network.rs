//! Remote authority contract.
//!
//! Transport, request signing and timeouts live in the adapter. Errors must
//! already be classified: `InvalidGrant` for rejected credentials or refresh
//! tokens, `TransientFailure` for anything worth retrying.

use std::fmt;

use async_trait::async_trait;

use crate::credential::Credential;
use crate::error::AuthError;

/// What the caller hands to `AuthSession::authenticate`.
#[derive(Clone)]
pub enum AuthInput {
    /// Resource owner password grant.
    Password { username: String, password: String },
    /// Authorization code returned to a redirect after a browser login.
    AuthorizationCode { code: String, redirect_uri: String },
    /// A credential obtained by an external login flow.
    Issued(Credential),
}

impl fmt::Debug for AuthInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthInput::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            AuthInput::AuthorizationCode { redirect_uri, .. } => f
                .debug_struct("AuthorizationCode")
                .field("code", &"<redacted>")
                .field("redirect_uri", redirect_uri)
                .finish(),
            AuthInput::Issued(credential) => f.debug_tuple("Issued").field(credential).finish(),
        }
    }
}

/// Server-side status of an access token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenStatus {
    /// The authority still honors the token.
    Active,
    /// The token was invalidated remotely (logout elsewhere, admin action).
    Inactive,
}

#[async_trait]
pub trait NetworkAdapter: Send + Sync {
    /// Exchange `input` for a credential. Any backend registration of the new
    /// token happens here, before the credential is returned.
    async fn authenticate(&self, input: AuthInput) -> Result<Credential, AuthError>;

    async fn refresh(&self, refresh_token: &str) -> Result<Credential, AuthError>;

    /// Best-effort remote revocation. Failures are logged by the caller and
    /// never block local erasure.
    async fn revoke(&self, token: &str) -> Result<(), AuthError>;

    /// Ask the authority whether `access_token` is still honored.
    async fn check(&self, access_token: &str) -> Result<TokenStatus, AuthError>;
}
