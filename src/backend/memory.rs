//! In-process document store with realtime listeners.
//!
//! `MemoryBackend` implements both [`DocumentStore`] and [`AuthProvider`] so a
//! whole application can run without a remote service. It enforces the same
//! access rules a hosted store would:
//!
//! - data operations require a signed-in session (unless disabled),
//! - paths under `users/{uid}/` are only reachable by `uid`,
//! - explicitly denied path prefixes reject every operation.
//!
//! The fault switches (`set_offline`, `deny_prefix`, `fail_listeners`, ...)
//! exist so callers can exercise error paths deterministically.

use super::{AuthProvider, ChangeListener, DocumentStore, ListenerEvent, WriteMode};
use crate::core::{CollectionPath, DocumentId, Fields, Identity, Item, Result, StoreError};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Shared in-memory store. Clones share the same data, listeners and session.
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<State>,
    require_auth: AtomicBool,
    offline: AtomicBool,
    anonymous_enabled: AtomicBool,
    anonymous_sign_ins: AtomicUsize,
    token_sign_ins: AtomicUsize,
}

#[derive(Default)]
struct State {
    collections: HashMap<String, BTreeMap<DocumentId, Fields>>,
    listeners: HashMap<String, Vec<ListenerSlot>>,
    next_listener: u64,
    session: Option<Identity>,
    tokens: HashMap<String, Identity>,
    denied_prefixes: Vec<String>,
    sign_in_latency: Option<Duration>,
}

struct ListenerSlot {
    id: u64,
    sender: mpsc::UnboundedSender<ListenerEvent>,
}

impl State {
    fn items(&self, path: &str) -> Vec<Item> {
        self.collections
            .get(path)
            .map(|docs| {
                docs.iter()
                    .map(|(id, fields)| Item::new(id.clone(), fields.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Pushes the current collection to every listener on `path`, dropping
    /// listeners whose receiver is gone.
    fn broadcast(&mut self, path: &str) {
        let items = self.items(path);
        if let Some(slots) = self.listeners.get_mut(path) {
            slots.retain(|slot| slot.sender.send(Ok(items.clone())).is_ok());
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Creates an empty store that requires a signed-in session for data access.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                require_auth: AtomicBool::new(true),
                offline: AtomicBool::new(false),
                anonymous_enabled: AtomicBool::new(true),
                anonymous_sign_ins: AtomicUsize::new(0),
                token_sign_ins: AtomicUsize::new(0),
            }),
        }
    }

    /// Delays every sign-in, so concurrent handshakes overlap.
    pub fn with_sign_in_latency(self, latency: Duration) -> Self {
        self.state().sign_in_latency = Some(latency);
        self
    }

    /// Registers a custom token that signs in as `uid`.
    pub fn with_token(self, token: &str, uid: &str) -> Self {
        self.state()
            .tokens
            .insert(token.to_string(), Identity::new(uid));
        self
    }

    /// Starts with an already established session.
    pub fn with_session(self, identity: Identity) -> Self {
        self.state().session = Some(identity);
        self
    }

    pub fn set_require_auth(&self, required: bool) {
        self.inner.require_auth.store(required, Ordering::SeqCst);
    }

    /// While offline every operation fails with `NetworkFailure`.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_anonymous_enabled(&self, enabled: bool) {
        self.inner.anonymous_enabled.store(enabled, Ordering::SeqCst);
    }

    /// Rejects every operation on paths starting with `prefix`.
    pub fn deny_prefix(&self, prefix: &str) {
        self.state().denied_prefixes.push(prefix.to_string());
    }

    pub fn allow_all(&self) {
        self.state().denied_prefixes.clear();
    }

    /// Errors out every listener on `path`; they receive `error` once and close.
    pub fn fail_listeners(&self, path: &CollectionPath, error: StoreError) {
        let mut state = self.state();
        if let Some(slots) = state.listeners.remove(path.as_str()) {
            for slot in slots {
                let _ = slot.sender.send(Err(error.clone()));
            }
        }
    }

    /// Number of live backend listeners on `path`.
    pub fn listener_count(&self, path: &CollectionPath) -> usize {
        self.state()
            .listeners
            .get(path.as_str())
            .map(|slots| slots.iter().filter(|slot| !slot.sender.is_closed()).count())
            .unwrap_or(0)
    }

    pub fn document_count(&self, path: &CollectionPath) -> usize {
        self.state()
            .collections
            .get(path.as_str())
            .map(BTreeMap::len)
            .unwrap_or(0)
    }

    pub fn anonymous_sign_ins(&self) -> usize {
        self.inner.anonymous_sign_ins.load(Ordering::SeqCst)
    }

    pub fn token_sign_ins(&self) -> usize {
        self.inner.token_sign_ins.load(Ordering::SeqCst)
    }

    pub fn sign_in_attempts(&self) -> usize {
        self.anonymous_sign_ins() + self.token_sign_ins()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn check_online(&self) -> Result<()> {
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(StoreError::NetworkFailure("backend unreachable".into()));
        }
        Ok(())
    }

    fn authorize(&self, state: &State, path: &CollectionPath) -> Result<()> {
        self.check_online()?;

        if self.inner.require_auth.load(Ordering::SeqCst) {
            let Some(session) = &state.session else {
                return Err(StoreError::PermissionDenied(format!(
                    "sign-in required to access '{}'",
                    path
                )));
            };
            if let Some(owner) = path.private_owner()
                && owner != session.as_str()
            {
                return Err(StoreError::PermissionDenied(format!(
                    "'{}' belongs to another user",
                    path
                )));
            }
        }

        if state
            .denied_prefixes
            .iter()
            .any(|prefix| path.as_str().starts_with(prefix.as_str()))
        {
            return Err(StoreError::PermissionDenied(format!(
                "access to '{}' is denied",
                path
            )));
        }

        Ok(())
    }

    async fn sign_in_delay(&self) {
        let latency = self.state().sign_in_latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn release_listener(inner: &Weak<Inner>, path: &str, listener_id: u64) {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let mut state = inner.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slots) = state.listeners.get_mut(path) {
            slots.retain(|slot| slot.id != listener_id);
            if slots.is_empty() {
                state.listeners.remove(path);
            }
        }
        debug!(path, listener_id, "change listener released");
    }
}

#[async_trait]
impl DocumentStore for MemoryBackend {
    async fn open_change_listener(&self, path: &CollectionPath) -> Result<ChangeListener> {
        let mut state = self.state();
        self.authorize(&state, path)?;

        let (sender, receiver) = mpsc::unbounded_channel();
        // The opening snapshot is queued before the slot becomes visible to writers.
        let _ = sender.send(Ok(state.items(path.as_str())));

        state.next_listener += 1;
        let listener_id = state.next_listener;
        state
            .listeners
            .entry(path.as_str().to_string())
            .or_default()
            .push(ListenerSlot {
                id: listener_id,
                sender,
            });
        drop(state);

        debug!(path = %path, listener_id, "change listener opened");

        let inner = Arc::downgrade(&self.inner);
        let key = path.as_str().to_string();
        Ok(ChangeListener::new(receiver, move || {
            Self::release_listener(&inner, &key, listener_id)
        }))
    }

    async fn write_document(
        &self,
        path: &CollectionPath,
        id: Option<&DocumentId>,
        fields: Fields,
        mode: WriteMode,
    ) -> Result<DocumentId> {
        let mut state = self.state();
        self.authorize(&state, path)?;

        let collection = state
            .collections
            .entry(path.as_str().to_string())
            .or_default();

        let id = match (mode, id) {
            (WriteMode::Create, None) => {
                let id = DocumentId::new(Uuid::new_v4().simple().to_string());
                collection.insert(id.clone(), fields);
                id
            }
            (WriteMode::Create, Some(id)) => {
                if collection.contains_key(id) {
                    return Err(StoreError::invalid(format!(
                        "document '{}' already exists in '{}'",
                        id, path
                    )));
                }
                collection.insert(id.clone(), fields);
                id.clone()
            }
            (WriteMode::Merge | WriteMode::Replace, None) => {
                return Err(StoreError::invalid("update requires a document id"));
            }
            (WriteMode::Merge, Some(id)) => {
                let existing = collection
                    .get_mut(id)
                    .ok_or_else(|| StoreError::not_found(path.as_str(), id.as_str()))?;
                existing.extend(fields);
                id.clone()
            }
            (WriteMode::Replace, Some(id)) => {
                let existing = collection
                    .get_mut(id)
                    .ok_or_else(|| StoreError::not_found(path.as_str(), id.as_str()))?;
                *existing = fields;
                id.clone()
            }
        };

        debug!(path = %path, id = %id, ?mode, "document written");
        state.broadcast(path.as_str());
        Ok(id)
    }

    async fn read_document(
        &self,
        path: &CollectionPath,
        id: &DocumentId,
    ) -> Result<Option<Fields>> {
        let state = self.state();
        self.authorize(&state, path)?;

        Ok(state
            .collections
            .get(path.as_str())
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    async fn delete_document(&self, path: &CollectionPath, id: &DocumentId) -> Result<()> {
        let mut state = self.state();
        self.authorize(&state, path)?;

        let removed = state
            .collections
            .get_mut(path.as_str())
            .and_then(|docs| docs.remove(id));
        if removed.is_none() {
            return Err(StoreError::not_found(path.as_str(), id.as_str()));
        }

        debug!(path = %path, id = %id, "document deleted");
        state.broadcast(path.as_str());
        Ok(())
    }
}

#[async_trait]
impl AuthProvider for MemoryBackend {
    async fn current_user(&self) -> Option<Identity> {
        self.state().session.clone()
    }

    async fn sign_in_anonymously(&self) -> Result<Identity> {
        self.inner.anonymous_sign_ins.fetch_add(1, Ordering::SeqCst);
        self.sign_in_delay().await;
        self.check_online()?;

        if !self.inner.anonymous_enabled.load(Ordering::SeqCst) {
            return Err(StoreError::PermissionDenied(
                "anonymous sign-in is disabled".into(),
            ));
        }

        let identity = Identity::new(format!("anon-{}", Uuid::new_v4().simple()));
        self.state().session = Some(identity.clone());
        Ok(identity)
    }

    async fn sign_in_with_token(&self, token: &str) -> Result<Identity> {
        self.inner.token_sign_ins.fetch_add(1, Ordering::SeqCst);
        self.sign_in_delay().await;
        self.check_online()?;

        let mut state = self.state();
        let identity = state
            .tokens
            .get(token)
            .cloned()
            .ok_or_else(|| StoreError::PermissionDenied("invalid custom token".into()))?;
        state.session = Some(identity.clone());
        Ok(identity)
    }

    async fn sign_out(&self) -> Result<()> {
        self.state().session = None;
        Ok(())
    }
}
