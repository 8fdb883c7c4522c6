//! Authentication collaborator contract.

use async_trait::async_trait;
use mnemo_core::AuthError;
use std::fmt;

/// Opaque bearer credential handed to the remote source.
///
/// `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Source of the signed-in user's credential.
///
/// The repository never stores credentials; it asks for the current one
/// before each remote call and asks for a refresh when the server rejects
/// it.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    fn is_authenticated(&self) -> bool;

    /// Current credential, if one is held.
    fn credential(&self) -> Option<Credential>;

    /// Obtain a new credential after the server rejected the current one.
    async fn refresh(&self) -> Result<Credential, AuthError>;
}
