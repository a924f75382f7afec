//! Live inventory client for a soap and store catalog.
//!
//! The crate is layered bottom-up:
//!
//! - [`core`]: identities, paths, items, snapshots and the error type.
//! - [`backend`]: the document store and auth seams, with an in-process
//!   realtime store and a polling REST adapter.
//! - [`connection`]: configuration, the single-handshake auth bootstrap and
//!   the [`AppContext`] that gates data access behind it.
//! - [`live`]: cancellable per-collection snapshot streams plus mutators.
//! - [`catalog`]: typed `tiendas`/`jabones` collections.
//! - [`web`]: an axum server exposing collections over HTTP.
//!
//! ```no_run
//! use soapstock::{AppConfig, AppContext, Tienda};
//!
//! # async fn demo() -> soapstock::Result<()> {
//! let context = AppContext::from_config(AppConfig::from_env())?;
//! let session = context.ready().await?;
//!
//! let tiendas = session.tiendas()?;
//! let mut watch = tiendas.watch();
//! tiendas.create(&Tienda::new("Tienda Centro", "Calle 1")).await?;
//! while let Some(Ok(records)) = watch.next().await {
//!     println!("{} stores", records.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod catalog;
pub mod connection;
pub mod core;
pub mod live;
pub mod web;

pub use backend::{
    AuthProvider, DocumentStore, LocalAuthProvider, MemoryBackend, RestDocumentStore,
};
pub use catalog::{Catalog, CatalogPaths, CollectionScope, Jabon, Record, Tienda};
pub use connection::auth::{AuthBootstrap, AuthStatus};
pub use connection::config::{AppConfig, BackendConfig, BackendKind};
pub use connection::{AppContext, Session};
pub use core::{
    CollectionPath, DocumentId, Fields, Identity, Item, Result, Snapshot, StoreError, Value,
};
pub use live::{CancelHandle, LiveCollections, Subscription};
