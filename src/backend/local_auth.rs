use super::AuthProvider;
use crate::core::{Identity, Result, StoreError};
use async_trait::async_trait;
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

/// Auth provider for deployments whose backend has no sign-in endpoint
/// (the REST backend). Identities are minted locally: anonymous sessions get
/// a random id, token sessions a stable id derived from the token.
#[derive(Default)]
pub struct LocalAuthProvider {
    session: Mutex<Option<Identity>>,
}

impl LocalAuthProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stable identity for a token; the token itself never becomes the id.
    pub fn identity_for_token(token: &str) -> Identity {
        let digest = Uuid::new_v5(&Uuid::NAMESPACE_OID, token.as_bytes());
        Identity::new(format!("token-{}", digest.simple()))
    }

    fn remember(&self, identity: &Identity) {
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = Some(identity.clone());
    }
}

#[async_trait]
impl AuthProvider for LocalAuthProvider {
    async fn current_user(&self) -> Option<Identity> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn sign_in_anonymously(&self) -> Result<Identity> {
        let identity = Identity::new(format!("anonymous-{}", Uuid::new_v4().simple()));
        self.remember(&identity);
        Ok(identity)
    }

    async fn sign_in_with_token(&self, token: &str) -> Result<Identity> {
        if token.trim().is_empty() {
            return Err(StoreError::PermissionDenied("auth token is blank".into()));
        }
        let identity = Self::identity_for_token(token.trim());
        self.remember(&identity);
        Ok(identity)
    }

    async fn sign_out(&self) -> Result<()> {
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}
