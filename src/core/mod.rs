pub mod error;
pub mod types;
pub mod value;

pub use error::{Result, StoreError};
pub use types::{
    CollectionPath, DocumentId, Fields, ID_FIELD, Identity, Item, Snapshot, fields_from_json,
    fields_to_json,
};
pub use value::Value;
