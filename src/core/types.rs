use std::collections::BTreeMap;
use std::fmt;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use super::{Result, StoreError, Value};

/// Field name to scalar value mapping of a document, without its id.
pub type Fields = BTreeMap<String, Value>;

/// Reserved key under which the document id travels in JSON payloads.
pub const ID_FIELD: &str = "id";

/// Authenticated actor for the session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(uid: impl Into<String>) -> Self {
        Self(uid.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Server-assigned document identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Slash-separated key naming a logical set of documents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionPath(String);

impl CollectionPath {
    /// Validates and wraps a path such as `artifacts/app/public/data/tiendas`.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(StoreError::invalid("collection path cannot be empty"));
        }
        if raw.split('/').any(|segment| segment.trim().is_empty()) {
            return Err(StoreError::invalid(format!(
                "collection path '{}' contains an empty segment",
                raw
            )));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// Identity owning this path when it lives under a `users/{uid}` pair.
    pub fn private_owner(&self) -> Option<&str> {
        let mut segments = self.segments();
        while let Some(segment) = segments.next() {
            if segment == "users" {
                return segments.next();
            }
        }
        None
    }

    pub fn child(&self, segment: &str) -> Result<Self> {
        Self::parse(&format!("{}/{}", self.0, segment))
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for CollectionPath {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// A document with its identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub id: DocumentId,
    pub fields: Fields,
}

impl Item {
    pub fn new(id: impl Into<DocumentId>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn text(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    /// Flattens the item into a JSON object carrying `id` next to the fields.
    pub fn to_json(&self) -> JsonValue {
        let mut object = fields_to_json(&self.fields);
        object.insert(ID_FIELD.to_string(), JsonValue::String(self.id.to_string()));
        JsonValue::Object(object)
    }

    /// Reads an item from a JSON object with an `id` key (string or number).
    pub fn from_json(json: JsonValue) -> Result<Self> {
        let JsonValue::Object(mut object) = json else {
            return Err(StoreError::invalid("document must be a JSON object"));
        };
        let id = match object.remove(ID_FIELD) {
            Some(JsonValue::String(id)) => DocumentId::new(id),
            Some(JsonValue::Number(id)) => DocumentId::new(id.to_string()),
            _ => return Err(StoreError::invalid("document is missing its 'id'")),
        };
        Ok(Self::new(id, fields_from_json(object)?))
    }
}

/// Builds fields from a JSON object. A stray `id` key is ignored.
pub fn fields_from_json(object: JsonMap<String, JsonValue>) -> Result<Fields> {
    object
        .into_iter()
        .filter(|(key, _)| key != ID_FIELD)
        .map(|(key, json)| Value::from_json(&key, json).map(|value| (key, value)))
        .collect()
}

pub fn fields_to_json(fields: &Fields) -> JsonMap<String, JsonValue> {
    fields
        .iter()
        .map(|(key, value)| (key.clone(), value.to_json()))
        .collect()
}

/// Complete item set of a collection as observed by one subscription.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub path: CollectionPath,
    pub items: Vec<Item>,
    /// Position of this delivery within its subscription, starting at 1.
    pub sequence: u64,
    pub observed_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn new(path: CollectionPath, items: Vec<Item>, sequence: u64) -> Self {
        Self {
            path,
            items,
            sequence,
            observed_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: &DocumentId) -> Option<&Item> {
        self.items.iter().find(|item| &item.id == id)
    }

    pub fn contains(&self, id: &DocumentId) -> bool {
        self.get(id).is_some()
    }

    /// Sorts items by a field (text compared case-insensitively, missing last),
    /// breaking ties by id.
    pub fn sorted_by(mut self, field: &str) -> Self {
        self.items.sort_by(|a, b| {
            let left = a.get(field).unwrap_or(&Value::Null);
            let right = b.get(field).unwrap_or(&Value::Null);
            left.sort_cmp(right).then_with(|| a.id.cmp(&b.id))
        });
        self
    }
}
