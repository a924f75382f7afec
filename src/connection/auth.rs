use crate::backend::AuthProvider;
use crate::core::{Identity, Result, StoreError};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::sync::Arc;
use tokio::sync::{Mutex, watch};
use tracing::{info, warn};

/// Observable state of the auth handshake.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthStatus {
    Uninitialized,
    Authenticating,
    Ready(Identity),
    /// Terminal; a new process is required to retry.
    Failed(StoreError),
}

impl AuthStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Self::Ready(identity) => Some(identity),
            _ => None,
        }
    }
}

type Handshake = Shared<BoxFuture<'static, Result<Identity>>>;

/// Establishes the session identity exactly once.
///
/// Every caller of [`ensure_ready`](Self::ensure_ready) shares one handshake.
/// The in-flight attempt is stored here rather than owned by the first
/// caller, so dropping a waiting caller never restarts it.
pub struct AuthBootstrap {
    provider: Arc<dyn AuthProvider>,
    token: Option<String>,
    handshake: Mutex<Option<Handshake>>,
    status: Arc<watch::Sender<AuthStatus>>,
}

impl AuthBootstrap {
    pub fn new(provider: Arc<dyn AuthProvider>, token: Option<String>) -> Self {
        let (status, _) = watch::channel(AuthStatus::Uninitialized);
        Self {
            provider,
            token,
            handshake: Mutex::new(None),
            status: Arc::new(status),
        }
    }

    /// Resolves to the session identity, starting the handshake on first use.
    ///
    /// Fails with `AuthUnavailable` when both token and anonymous sign-in
    /// fail; the failure is permanent for this bootstrap.
    pub async fn ensure_ready(&self) -> Result<Identity> {
        if let Some(identity) = self.identity() {
            return Ok(identity);
        }

        let handshake = {
            let mut slot = self.handshake.lock().await;
            slot.get_or_insert_with(|| {
                Self::handshake(
                    Arc::clone(&self.provider),
                    self.token.clone(),
                    Arc::clone(&self.status),
                )
                .boxed()
                .shared()
            })
            .clone()
        };

        handshake.await
    }

    pub fn status(&self) -> AuthStatus {
        self.status.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.status.borrow().is_ready()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.status.borrow().identity().cloned()
    }

    /// Push notification of status changes for views deferring on readiness.
    pub fn subscribe_status(&self) -> watch::Receiver<AuthStatus> {
        self.status.subscribe()
    }

    /// Ends the provider session. The bootstrap itself stays terminal.
    pub async fn sign_out(&self) -> Result<()> {
        self.provider.sign_out().await
    }

    async fn handshake(
        provider: Arc<dyn AuthProvider>,
        token: Option<String>,
        status: Arc<watch::Sender<AuthStatus>>,
    ) -> Result<Identity> {
        status.send_replace(AuthStatus::Authenticating);

        let outcome = Self::sign_in(provider.as_ref(), token.as_deref()).await;
        match &outcome {
            Ok(identity) => {
                info!(user_id = %identity, "auth ready");
                status.send_replace(AuthStatus::Ready(identity.clone()));
            }
            Err(err) => {
                warn!(error = %err, "auth handshake failed");
                status.send_replace(AuthStatus::Failed(err.clone()));
            }
        }
        outcome
    }

    async fn sign_in(provider: &dyn AuthProvider, token: Option<&str>) -> Result<Identity> {
        if let Some(identity) = provider.current_user().await {
            info!(user_id = %identity, "resuming existing session");
            return Ok(identity);
        }

        let token_error = match token {
            Some(token) => match provider.sign_in_with_token(token).await {
                Ok(identity) => return Ok(identity),
                Err(err) => {
                    warn!(error = %err, "token sign-in failed, falling back to anonymous");
                    Some(err)
                }
            },
            None => None,
        };

        provider.sign_in_anonymously().await.map_err(|anonymous_error| {
            let message = match token_error {
                Some(token_error) => format!(
                    "token sign-in failed ({}); anonymous sign-in failed ({})",
                    token_error, anonymous_error
                ),
                None => format!("anonymous sign-in failed ({})", anonymous_error),
            };
            StoreError::AuthUnavailable(message)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    #[tokio::test]
    async fn test_status_transitions_to_ready() {
        let backend = Arc::new(MemoryBackend::new());
        let auth = AuthBootstrap::new(backend, None);
        assert_eq!(auth.status(), AuthStatus::Uninitialized);
        assert!(!auth.is_ready());

        let identity = auth.ensure_ready().await.unwrap();
        assert!(auth.is_ready());
        assert_eq!(auth.identity(), Some(identity));
    }

    #[tokio::test]
    async fn test_failure_is_terminal() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set_anonymous_enabled(false);
        let auth = AuthBootstrap::new(backend.clone(), None);

        let err = auth.ensure_ready().await.unwrap_err();
        assert!(matches!(err, StoreError::AuthUnavailable(_)));
        assert!(matches!(auth.status(), AuthStatus::Failed(_)));

        backend.set_anonymous_enabled(true);
        assert!(auth.ensure_ready().await.is_err());
        assert_eq!(backend.anonymous_sign_ins(), 1);
    }

    #[tokio::test]
    async fn test_existing_session_is_adopted() {
        let backend = Arc::new(MemoryBackend::new().with_session(Identity::new("u-7")));
        let auth = AuthBootstrap::new(backend.clone(), Some("tok".into()));

        assert_eq!(auth.ensure_ready().await.unwrap(), Identity::new("u-7"));
        assert_eq!(backend.sign_in_attempts(), 0);
    }
}
