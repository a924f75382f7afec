//! Document store adapter for a conventional REST backend.
//!
//! Routes follow the usual resource layout under a base URL:
//! `GET/POST {base}/{collection}` and `GET/PUT/DELETE {base}/{collection}/{id}`.
//! The backend has no change stream, so listeners poll the collection and
//! emit only when the item set differs from the previous poll.
//!
//! Reads drop nested values such as embedded relations. A merge write reads
//! the raw document instead, so those values go back untouched with the PUT.

use super::{ChangeListener, DocumentStore, WriteMode};
use crate::core::{
    CollectionPath, DocumentId, Fields, ID_FIELD, Item, Result, StoreError, fields_to_json,
};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct RestDocumentStore {
    http: reqwest::Client,
    base_url: Url,
    poll_interval: Duration,
    bearer_token: Option<String>,
}

impl RestDocumentStore {
    /// Creates an adapter for `base_url`, e.g. `http://localhost:8080/api`.
    pub fn new(base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| StoreError::MalformedConfiguration(e.to_string()))?;
        Self::with_client(http, base_url)
    }

    pub fn with_client(http: reqwest::Client, base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url).map_err(|e| {
            StoreError::MalformedConfiguration(format!("invalid base url '{}': {}", base_url, e))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(StoreError::MalformedConfiguration(format!(
                "base url '{}' cannot carry a path",
                base_url
            )));
        }
        Ok(Self {
            http,
            base_url,
            poll_interval: DEFAULT_POLL_INTERVAL,
            bearer_token: None,
        })
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &CollectionPath, id: Option<&DocumentId>) -> Result<Url> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                StoreError::MalformedConfiguration("base url cannot carry a path".into())
            })?;
            segments.pop_if_empty().extend(path.segments());
            if let Some(id) = id {
                segments.push(id.as_str());
            }
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let request = self.http.request(method, url);
        match &self.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Maps non-2xx responses onto the error taxonomy, keeping status and body.
    async fn check(
        response: Response,
        path: &CollectionPath,
        id: Option<&DocumentId>,
    ) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(match (status, id) {
            (StatusCode::NOT_FOUND, Some(id)) => StoreError::not_found(path.as_str(), id.as_str()),
            (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN, _) => {
                StoreError::PermissionDenied(format!("{}: {}", status.as_u16(), body))
            }
            _ => StoreError::Http {
                status: status.as_u16(),
                body,
            },
        })
    }

    async fn fetch_collection(&self, path: &CollectionPath) -> Result<Vec<Item>> {
        let url = self.url(path, None)?;
        let response = self.request(Method::GET, url).send().await?;
        let response = Self::check(response, path, None).await?;
        let body: JsonValue = response.json().await?;
        let mut items = decode_items(body)?;
        items.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(items)
    }

    /// The document body as served, nested values included.
    async fn fetch_raw(
        &self,
        path: &CollectionPath,
        id: &DocumentId,
    ) -> Result<Option<JsonValue>> {
        let url = self.url(path, Some(id))?;
        let response = self.request(Method::GET, url).send().await?;
        match Self::check(response, path, Some(id)).await {
            Ok(response) => Ok(Some(response.json().await?)),
            Err(StoreError::NotFound { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn put_document(
        &self,
        path: &CollectionPath,
        id: &DocumentId,
        body: JsonMap<String, JsonValue>,
    ) -> Result<DocumentId> {
        let url = self.url(path, Some(id))?;
        let response = self
            .request(Method::PUT, url)
            .json(&JsonValue::Object(body))
            .send()
            .await?;
        Self::check(response, path, Some(id)).await?;
        Ok(id.clone())
    }
}

/// Accepts a bare JSON array or a `{ "data": [...] }` envelope.
fn decode_items(body: JsonValue) -> Result<Vec<Item>> {
    let array = match body {
        JsonValue::Array(array) => array,
        JsonValue::Object(mut object) => match object.remove("data") {
            Some(JsonValue::Array(array)) => array,
            _ => return Err(StoreError::invalid("collection response is not a list")),
        },
        _ => return Err(StoreError::invalid("collection response is not a list")),
    };
    array.into_iter().map(decode_item).collect()
}

/// Reads one document, dropping nested values (e.g. embedded relations) the
/// scalar item model cannot hold.
fn decode_item(body: JsonValue) -> Result<Item> {
    let body = match body {
        JsonValue::Object(mut object) => {
            object.retain(|_, value| {
                !matches!(value, JsonValue::Array(_) | JsonValue::Object(_))
            });
            JsonValue::Object(object)
        }
        other => other,
    };
    Item::from_json(body)
}

#[async_trait]
impl DocumentStore for RestDocumentStore {
    async fn open_change_listener(&self, path: &CollectionPath) -> Result<ChangeListener> {
        // The first poll runs inline so access errors surface from `open`.
        let initial = self.fetch_collection(path).await?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let _ = sender.send(Ok(initial.clone()));

        let store = self.clone();
        let path = path.clone();
        let poller = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(store.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            let mut last = initial;
            loop {
                ticker.tick().await;
                match store.fetch_collection(&path).await {
                    Ok(items) if items == last => {}
                    Ok(items) => {
                        debug!(path = %path, count = items.len(), "collection changed");
                        if sender.send(Ok(items.clone())).is_err() {
                            break;
                        }
                        last = items;
                    }
                    Err(err) => {
                        warn!(path = %path, error = %err, "collection poll failed");
                        let _ = sender.send(Err(err));
                        break;
                    }
                }
            }
        });

        Ok(ChangeListener::new(receiver, move || poller.abort()))
    }

    async fn write_document(
        &self,
        path: &CollectionPath,
        id: Option<&DocumentId>,
        fields: Fields,
        mode: WriteMode,
    ) -> Result<DocumentId> {
        match (mode, id) {
            (WriteMode::Create, None) => {
                let url = self.url(path, None)?;
                let response = self
                    .request(Method::POST, url)
                    .json(&JsonValue::Object(fields_to_json(&fields)))
                    .send()
                    .await?;
                let response = Self::check(response, path, None).await?;
                let created = decode_item(response.json().await?)?;
                Ok(created.id)
            }
            (WriteMode::Create, Some(_)) => Err(StoreError::invalid(
                "the REST backend assigns document identifiers",
            )),
            (WriteMode::Merge | WriteMode::Replace, None) => {
                Err(StoreError::invalid("update requires a document id"))
            }
            (WriteMode::Replace, Some(id)) => {
                self.put_document(path, id, fields_to_json(&fields)).await
            }
            (WriteMode::Merge, Some(id)) => {
                // No PATCH route in the conventional layout: read, merge, put back.
                let current = self
                    .fetch_raw(path, id)
                    .await?
                    .ok_or_else(|| StoreError::not_found(path.as_str(), id.as_str()))?;
                let JsonValue::Object(mut body) = current else {
                    return Err(StoreError::invalid("document response is not an object"));
                };
                body.remove(ID_FIELD);
                body.extend(fields_to_json(&fields));
                self.put_document(path, id, body).await
            }
        }
    }

    async fn read_document(
        &self,
        path: &CollectionPath,
        id: &DocumentId,
    ) -> Result<Option<Fields>> {
        match self.fetch_raw(path, id).await? {
            Some(body) => Ok(Some(decode_item(body)?.fields)),
            None => Ok(None),
        }
    }

    async fn delete_document(&self, path: &CollectionPath, id: &DocumentId) -> Result<()> {
        let url = self.url(path, Some(id))?;
        let response = self.request(Method::DELETE, url).send().await?;
        Self::check(response, path, Some(id)).await?;
        Ok(())
    }
}
