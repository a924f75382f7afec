//! Backend seams: the document store and authentication primitives the live
//! layer is written against, plus the in-process and REST implementations.

pub mod local_auth;
pub mod memory;
pub mod rest;

use crate::core::{CollectionPath, DocumentId, Fields, Identity, Item, Result};
use async_trait::async_trait;
use futures::Stream;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

pub use local_auth::LocalAuthProvider;
pub use memory::MemoryBackend;
pub use rest::RestDocumentStore;

/// How `write_document` treats the target document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Insert a new document; the store assigns the id when none is given.
    Create,
    /// Merge fields into an existing document.
    Merge,
    /// Replace every field of an existing document.
    Replace,
}

/// One event pushed by a change listener: the complete item set or the error
/// that closed the listener.
pub type ListenerEvent = Result<Vec<Item>>;

/// Remote document store primitives.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Opens a listener that pushes the full collection on open and after
    /// every change. Dropping the listener releases it.
    async fn open_change_listener(&self, path: &CollectionPath) -> Result<ChangeListener>;

    /// Writes a document and returns its id. `Merge` and `Replace` fail with
    /// `NotFound` when the document does not exist.
    async fn write_document(
        &self,
        path: &CollectionPath,
        id: Option<&DocumentId>,
        fields: Fields,
        mode: WriteMode,
    ) -> Result<DocumentId>;

    /// One-shot read; `None` when the document does not exist.
    async fn read_document(&self, path: &CollectionPath, id: &DocumentId) -> Result<Option<Fields>>;

    /// Removes a document, failing with `NotFound` when absent.
    async fn delete_document(&self, path: &CollectionPath, id: &DocumentId) -> Result<()>;
}

/// Authentication handshake primitives.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Session already established with the provider, if any.
    async fn current_user(&self) -> Option<Identity> {
        None
    }

    async fn sign_in_anonymously(&self) -> Result<Identity>;

    async fn sign_in_with_token(&self, token: &str) -> Result<Identity>;

    async fn sign_out(&self) -> Result<()> {
        Ok(())
    }
}

/// Receiving end of a backend change stream.
pub struct ChangeListener {
    receiver: mpsc::UnboundedReceiver<ListenerEvent>,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl ChangeListener {
    /// `release` runs exactly once, on `close` or drop.
    pub fn new(
        receiver: mpsc::UnboundedReceiver<ListenerEvent>,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            receiver,
            release: Some(Box::new(release)),
        }
    }

    pub async fn next(&mut self) -> Option<ListenerEvent> {
        self.receiver.recv().await
    }

    pub fn close(&mut self) {
        self.receiver.close();
        if let Some(release) = self.release.take() {
            release();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.release.is_none()
    }
}

impl fmt::Debug for ChangeListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeListener")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Stream for ChangeListener {
    type Item = ListenerEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

impl Drop for ChangeListener {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_listener_release_runs_once() {
        let released = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::unbounded_channel();
        let counter = Arc::clone(&released);
        let mut listener = ChangeListener::new(rx, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tx.send(Ok(Vec::new())).unwrap();
        assert!(listener.next().await.unwrap().unwrap().is_empty());
        assert!(format!("{:?}", listener).contains("closed: false"));

        listener.close();
        listener.close();
        drop(listener);

        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert!(tx.send(Ok(Vec::new())).is_err());
    }
}
