use super::{CatalogRecord, Jabon, Tienda, from_fields, to_fields};
use crate::core::{CollectionPath, DocumentId, Result, Snapshot, StoreError};
use crate::live::{LiveCollections, Subscription};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, warn};

type RecordFilter<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// A decoded catalog document with its id.
#[derive(Debug, Clone, PartialEq)]
pub struct Record<T> {
    pub id: DocumentId,
    pub data: T,
}

/// Typed access to one catalog collection.
pub struct Catalog<T: CatalogRecord> {
    live: LiveCollections,
    path: CollectionPath,
    _record: PhantomData<fn() -> T>,
}

impl<T: CatalogRecord> Clone for Catalog<T> {
    fn clone(&self) -> Self {
        Self {
            live: self.live.clone(),
            path: self.path.clone(),
            _record: PhantomData,
        }
    }
}

impl<T: CatalogRecord> Catalog<T> {
    pub fn new(live: LiveCollections, path: CollectionPath) -> Self {
        Self {
            live,
            path,
            _record: PhantomData,
        }
    }

    pub fn path(&self) -> &CollectionPath {
        &self.path
    }

    pub fn watch(&self) -> CatalogWatch<T> {
        self.watch_filtered(None)
    }

    fn watch_filtered(&self, filter: Option<RecordFilter<T>>) -> CatalogWatch<T> {
        CatalogWatch {
            subscription: self.live.subscribe(&self.path),
            filter,
        }
    }

    /// Current records, sorted like [`watch`](Self::watch) deliveries.
    pub async fn list(&self) -> Result<Vec<Record<T>>> {
        let snapshot = self.live.fetch(&self.path).await?;
        Ok(decode_snapshot(snapshot, None))
    }

    pub async fn get(&self, id: &DocumentId) -> Result<Option<T>> {
        match self.live.get_by_id(&self.path, id).await? {
            Some(item) => Ok(Some(from_fields(&item.fields)?)),
            None => Ok(None),
        }
    }

    /// Like [`get`](Self::get), but a missing document is `NotFound`.
    pub async fn require(&self, id: &DocumentId) -> Result<T> {
        self.get(id)
            .await?
            .ok_or_else(|| StoreError::not_found(self.path.as_str(), id.as_str()))
    }

    pub async fn create(&self, record: &T) -> Result<DocumentId> {
        record.validate()?;
        self.live.create(&self.path, to_fields(record)?).await
    }

    /// Overwrites every field the record owns, so a cleared optional field
    /// is removed from the document. Stored keys the record type does not
    /// know about are kept.
    pub async fn update(&self, id: &DocumentId, record: &T) -> Result<()> {
        record.validate()?;
        let mut fields = self
            .live
            .get_by_id(&self.path, id)
            .await?
            .ok_or_else(|| StoreError::not_found(self.path.as_str(), id.as_str()))?
            .fields;
        fields.retain(|key, _| !T::FIELDS.contains(&key.as_str()));
        fields.extend(to_fields(record)?);
        self.live.replace(&self.path, id, fields).await
    }

    pub async fn delete(&self, id: &DocumentId) -> Result<()> {
        self.live.delete(&self.path, id).await
    }
}

impl Catalog<Jabon> {
    /// Soaps carried by one store. The store must exist.
    pub async fn list_in_tienda(
        &self,
        tiendas: &Catalog<Tienda>,
        tienda_id: &DocumentId,
    ) -> Result<Vec<Record<Jabon>>> {
        tiendas.require(tienda_id).await?;
        let snapshot = self.live.fetch(&self.path).await?;
        Ok(decode_snapshot(snapshot, Some(&in_tienda(tienda_id))))
    }

    /// Live view restricted to the soaps of one store.
    pub fn watch_tienda(&self, tienda_id: &DocumentId) -> CatalogWatch<Jabon> {
        self.watch_filtered(Some(in_tienda(tienda_id)))
    }

    /// Creates `jabon` attached to an existing store; `NotFound` otherwise.
    pub async fn create_in_tienda(
        &self,
        tiendas: &Catalog<Tienda>,
        tienda_id: &DocumentId,
        mut jabon: Jabon,
    ) -> Result<DocumentId> {
        tiendas.require(tienda_id).await?;
        jabon.tienda_id = Some(tienda_id.to_string());
        let id = self.create(&jabon).await?;
        debug!(tienda_id = %tienda_id, id = %id, "jabon attached to tienda");
        Ok(id)
    }
}

fn in_tienda(tienda_id: &DocumentId) -> RecordFilter<Jabon> {
    let tienda_id = tienda_id.to_string();
    Arc::new(move |jabon: &Jabon| jabon.tienda_id.as_deref() == Some(tienda_id.as_str()))
}

/// Live, name-sorted view of a catalog collection.
pub struct CatalogWatch<T: CatalogRecord> {
    subscription: Subscription,
    filter: Option<RecordFilter<T>>,
}

impl<T: CatalogRecord> CatalogWatch<T> {
    /// Next decoded snapshot; `None` once the watch has ended.
    pub async fn next(&mut self) -> Option<Result<Vec<Record<T>>>> {
        let event = self.subscription.next_snapshot().await?;
        Some(event.map(|snapshot| decode_snapshot(snapshot, self.filter.as_ref())))
    }

    pub fn cancel(&mut self) {
        self.subscription.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.subscription.is_closed()
    }
}

/// Documents that do not decode as `T` are skipped so one bad entry does not
/// blank the whole list.
fn decode_snapshot<T: CatalogRecord>(
    snapshot: Snapshot,
    filter: Option<&RecordFilter<T>>,
) -> Vec<Record<T>> {
    let mut records: Vec<Record<T>> = snapshot
        .items
        .into_iter()
        .filter_map(|item| match from_fields::<T>(&item.fields) {
            Ok(data) => Some(Record { id: item.id, data }),
            Err(err) => {
                warn!(
                    path = %snapshot.path,
                    id = %item.id,
                    error = %err,
                    "skipping undecodable document"
                );
                None
            }
        })
        .filter(|record| filter.is_none_or(|keep| keep(&record.data)))
        .collect();

    records.sort_by(|a, b| {
        a.data
            .display_name()
            .to_lowercase()
            .cmp(&b.data.display_name().to_lowercase())
            .then_with(|| a.id.cmp(&b.id))
    });
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Fields, Item, Value};

    fn tienda_item(id: &str, nombre: &str) -> Item {
        let mut fields = Fields::new();
        fields.insert("nombre".into(), Value::from(nombre));
        fields.insert("direccion".into(), Value::from("Calle 1"));
        Item::new(id, fields)
    }

    #[test]
    fn test_decode_sorts_by_name_and_skips_bad_documents() {
        let mut broken = Fields::new();
        broken.insert("nombre".into(), Value::Integer(3));
        let snapshot = Snapshot::new(
            CollectionPath::parse("tiendas").unwrap(),
            vec![
                tienda_item("1", "zeta"),
                Item::new("2", broken),
                tienda_item("3", "Alfa"),
            ],
            1,
        );

        let records: Vec<Record<Tienda>> = decode_snapshot(snapshot, None);
        let names: Vec<&str> = records.iter().map(|r| r.data.nombre.as_str()).collect();
        assert_eq!(names, vec!["Alfa", "zeta"]);
    }
}
