pub mod firebase;

pub use firebase::*;

#[derive(Debug, Clone, thiserror::Error)]
pub enum IdentityError {
    #[error("identity unavailable: {0}")]
    Unavailable(String),
}

/// Supplies the stable anonymous identity that scopes a user's records.
/// Resolution may require a silent sign-in, so the first call can suspend;
/// afterwards the id is cached for the life of the process.
#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolves (signing in if needed) and returns the owner id.
    async fn owner_id(&self) -> Result<String, IdentityError>;

    /// Non-blocking peek at an already-resolved id.
    fn cached_owner_id(&self) -> Option<String>;
}

/// Fixed identity for tests and the local demo store.
#[derive(Debug, Clone)]
pub struct FixedIdentity(pub String);

#[async_trait::async_trait]
impl IdentityProvider for FixedIdentity {
    async fn owner_id(&self) -> Result<String, IdentityError> {
        Ok(self.0.clone())
    }

    fn cached_owner_id(&self) -> Option<String> {
        Some(self.0.clone())
    }
}
