//! Typed catalog on top of the live layer: stores (`tiendas`) and soaps
//! (`jabones`), their collection paths, and name-sorted live views.

pub mod models;
pub mod repository;

use crate::core::{
    CollectionPath, Fields, Identity, Result, StoreError, fields_from_json, fields_to_json,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub use models::{Jabon, Tienda};
pub use repository::{Catalog, CatalogWatch, Record};

/// Where catalog collections live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionScope {
    /// Shared by every user: `artifacts/{app}/public/data/{name}`.
    #[default]
    Public,
    /// Owned by the signed-in user: `artifacts/{app}/users/{uid}/{name}`.
    Private,
    /// Bare collection name, for REST backends: `{name}`.
    Flat,
}

/// Resolves catalog collection names to paths under one scoping policy.
#[derive(Debug, Clone)]
pub struct CatalogPaths {
    app_id: String,
    scope: CollectionScope,
    identity: Identity,
}

impl CatalogPaths {
    pub fn new(app_id: &str, scope: CollectionScope, identity: Identity) -> Self {
        Self {
            app_id: app_id.to_string(),
            scope,
            identity,
        }
    }

    pub fn scope(&self) -> CollectionScope {
        self.scope
    }

    pub fn collection(&self, name: &str) -> Result<CollectionPath> {
        let raw = match self.scope {
            CollectionScope::Public => format!("artifacts/{}/public/data/{}", self.app_id, name),
            CollectionScope::Private => {
                format!("artifacts/{}/users/{}/{}", self.app_id, self.identity, name)
            }
            CollectionScope::Flat => name.to_string(),
        };
        CollectionPath::parse(&raw)
    }

    pub fn tiendas(&self) -> Result<CollectionPath> {
        self.collection(Tienda::COLLECTION)
    }

    pub fn jabones(&self) -> Result<CollectionPath> {
        self.collection(Jabon::COLLECTION)
    }
}

/// A typed document kept in a catalog collection.
pub trait CatalogRecord: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Collection name, e.g. `tiendas`.
    const COLLECTION: &'static str;

    /// Every stored key the record owns, aliases included. Updates clear
    /// these before writing the record back.
    const FIELDS: &'static [&'static str];

    /// Name shown in lists; live views sort by it.
    fn display_name(&self) -> &str;

    fn validate(&self) -> Result<()>;
}

pub fn to_fields<T: Serialize>(record: &T) -> Result<Fields> {
    match serde_json::to_value(record)? {
        JsonValue::Object(object) => fields_from_json(object),
        _ => Err(StoreError::invalid("record must serialize to an object")),
    }
}

pub fn from_fields<T: DeserializeOwned>(fields: &Fields) -> Result<T> {
    Ok(serde_json::from_value(JsonValue::Object(fields_to_json(fields)))?)
}

pub(crate) fn require_text(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(StoreError::invalid(format!("'{}' is required", field)));
    }
    Ok(())
}
