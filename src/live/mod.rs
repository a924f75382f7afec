//! Live collection access: standing subscriptions plus the CRUD mutators that
//! act on the same collections.
//!
//! A [`LiveCollections`] can only be built from an [`Identity`], which is
//! what [`AuthBootstrap::ensure_ready`](crate::connection::auth::AuthBootstrap::ensure_ready)
//! hands out. Mutators are single round trips with no retry; their effect
//! reaches subscribers through the backend change stream, so a snapshot may
//! arrive before or after the mutator's own future resolves.

pub mod subscription;

use crate::backend::{DocumentStore, WriteMode};
use crate::core::{
    CollectionPath, DocumentId, Fields, ID_FIELD, Identity, Item, Result, Snapshot, StoreError,
};
use std::sync::Arc;
use tracing::debug;

pub use subscription::{CancelHandle, Subscription};

#[derive(Clone)]
pub struct LiveCollections {
    store: Arc<dyn DocumentStore>,
    identity: Identity,
}

impl LiveCollections {
    pub fn new(store: Arc<dyn DocumentStore>, identity: Identity) -> Self {
        Self { store, identity }
    }

    /// Identity all operations run as.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Opens a subscription on `path` and returns immediately; the backend
    /// listener is opened on a background task. Must be called from within
    /// a tokio runtime.
    pub fn subscribe(&self, path: &CollectionPath) -> Subscription {
        Subscription::open(Arc::clone(&self.store), path.clone())
    }

    /// Callback form of [`subscribe`](Self::subscribe). `on_error` runs at
    /// most once, after which the subscription is closed.
    pub fn subscribe_with<S, E>(
        &self,
        path: &CollectionPath,
        on_snapshot: S,
        on_error: E,
    ) -> CancelHandle
    where
        S: FnMut(Snapshot) + Send + 'static,
        E: FnOnce(StoreError) + Send + 'static,
    {
        CancelHandle::open(Arc::clone(&self.store), path.clone(), on_snapshot, on_error)
    }

    /// Current item set of `path`, read through a short-lived subscription.
    pub async fn fetch(&self, path: &CollectionPath) -> Result<Snapshot> {
        let mut subscription = self.subscribe(path);
        let snapshot = subscription
            .next_snapshot()
            .await
            .unwrap_or_else(|| Err(StoreError::Closed(path.to_string())));
        subscription.cancel();
        snapshot
    }

    /// Inserts a new document; the backend assigns the id.
    pub async fn create(&self, path: &CollectionPath, mut fields: Fields) -> Result<DocumentId> {
        fields.remove(ID_FIELD);
        let id = self
            .store
            .write_document(path, None, fields, WriteMode::Create)
            .await?;
        debug!(path = %path, id = %id, user_id = %self.identity, "document created");
        Ok(id)
    }

    /// Merges `fields` into an existing document.
    pub async fn update(
        &self,
        path: &CollectionPath,
        id: &DocumentId,
        mut fields: Fields,
    ) -> Result<()> {
        fields.remove(ID_FIELD);
        self.store
            .write_document(path, Some(id), fields, WriteMode::Merge)
            .await?;
        debug!(path = %path, id = %id, user_id = %self.identity, "document updated");
        Ok(())
    }

    /// Replaces every field of an existing document.
    pub async fn replace(
        &self,
        path: &CollectionPath,
        id: &DocumentId,
        mut fields: Fields,
    ) -> Result<()> {
        fields.remove(ID_FIELD);
        self.store
            .write_document(path, Some(id), fields, WriteMode::Replace)
            .await?;
        debug!(path = %path, id = %id, user_id = %self.identity, "document replaced");
        Ok(())
    }

    pub async fn delete(&self, path: &CollectionPath, id: &DocumentId) -> Result<()> {
        self.store.delete_document(path, id).await?;
        debug!(path = %path, id = %id, user_id = %self.identity, "document deleted");
        Ok(())
    }

    /// One-shot read that bypasses subscriptions; `None` when absent.
    pub async fn get_by_id(&self, path: &CollectionPath, id: &DocumentId) -> Result<Option<Item>> {
        Ok(self
            .store
            .read_document(path, id)
            .await?
            .map(|fields| Item::new(id.clone(), fields)))
    }
}
