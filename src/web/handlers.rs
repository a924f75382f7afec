use super::{WebError, WebResult, WebState};
use crate::catalog::{Catalog, Jabon, Record, Tienda, to_fields};
use crate::core::{CollectionPath, DocumentId, Fields, Item, StoreError, fields_from_json};
use axum::Json;
use axum::extract::{Path, State};
use http::StatusCode;
use serde_json::{Value as JsonValue, json};

fn collection(state: &WebState, name: &str) -> WebResult<CollectionPath> {
    if name.contains('/') {
        return Err(StoreError::invalid(format!("invalid collection name '{}'", name)).into());
    }
    Ok(state.paths.collection(name)?)
}

fn body_fields(body: JsonValue) -> WebResult<Fields> {
    match body {
        JsonValue::Object(object) => Ok(fields_from_json(object)?),
        _ => Err(StoreError::invalid("request body must be a JSON object").into()),
    }
}

/// Reads back a document just written so the response carries stored state.
async fn stored(state: &WebState, path: &CollectionPath, id: &DocumentId) -> WebResult<Item> {
    state
        .live
        .get_by_id(path, id)
        .await?
        .ok_or_else(|| WebError(StoreError::not_found(path.as_str(), id.as_str())))
}

pub async fn healthcheck() -> Json<JsonValue> {
    Json(json!({ "status": "ok" }))
}

pub async fn list_documents(
    State(state): State<WebState>,
    Path(name): Path<String>,
) -> WebResult<Json<JsonValue>> {
    let path = collection(&state, &name)?;
    let snapshot = state.live.fetch(&path).await?;
    let items = snapshot.items.iter().map(Item::to_json).collect();
    Ok(Json(JsonValue::Array(items)))
}

pub async fn create_document(
    State(state): State<WebState>,
    Path(name): Path<String>,
    Json(body): Json<JsonValue>,
) -> WebResult<(StatusCode, Json<JsonValue>)> {
    let path = collection(&state, &name)?;
    let id = state.live.create(&path, body_fields(body)?).await?;
    let item = stored(&state, &path, &id).await?;
    Ok((StatusCode::CREATED, Json(item.to_json())))
}

pub async fn get_document(
    State(state): State<WebState>,
    Path((name, id)): Path<(String, String)>,
) -> WebResult<Json<JsonValue>> {
    let path = collection(&state, &name)?;
    let item = stored(&state, &path, &DocumentId::new(id)).await?;
    Ok(Json(item.to_json()))
}

pub async fn replace_document(
    State(state): State<WebState>,
    Path((name, id)): Path<(String, String)>,
    Json(body): Json<JsonValue>,
) -> WebResult<Json<JsonValue>> {
    let path = collection(&state, &name)?;
    let id = DocumentId::new(id);
    state.live.replace(&path, &id, body_fields(body)?).await?;
    Ok(Json(stored(&state, &path, &id).await?.to_json()))
}

pub async fn merge_document(
    State(state): State<WebState>,
    Path((name, id)): Path<(String, String)>,
    Json(body): Json<JsonValue>,
) -> WebResult<Json<JsonValue>> {
    let path = collection(&state, &name)?;
    let id = DocumentId::new(id);
    state.live.update(&path, &id, body_fields(body)?).await?;
    Ok(Json(stored(&state, &path, &id).await?.to_json()))
}

pub async fn delete_document(
    State(state): State<WebState>,
    Path((name, id)): Path<(String, String)>,
) -> WebResult<StatusCode> {
    let path = collection(&state, &name)?;
    state.live.delete(&path, &DocumentId::new(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn catalogs(state: &WebState) -> WebResult<(Catalog<Tienda>, Catalog<Jabon>)> {
    Ok((
        Catalog::new(state.live.clone(), state.paths.tiendas()?),
        Catalog::new(state.live.clone(), state.paths.jabones()?),
    ))
}

fn record_json(record: &Record<Jabon>) -> WebResult<JsonValue> {
    Ok(Item::new(record.id.clone(), to_fields(&record.data)?).to_json())
}

pub async fn list_tienda_jabones(
    State(state): State<WebState>,
    Path(tienda_id): Path<String>,
) -> WebResult<Json<JsonValue>> {
    let (tiendas, jabones) = catalogs(&state)?;
    let records = jabones
        .list_in_tienda(&tiendas, &DocumentId::new(tienda_id))
        .await?;
    let items = records.iter().map(record_json).collect::<WebResult<_>>()?;
    Ok(Json(JsonValue::Array(items)))
}

pub async fn create_tienda_jabon(
    State(state): State<WebState>,
    Path(tienda_id): Path<String>,
    Json(body): Json<JsonValue>,
) -> WebResult<(StatusCode, Json<JsonValue>)> {
    let (tiendas, jabones) = catalogs(&state)?;
    let jabon: Jabon = serde_json::from_value(body)
        .map_err(|e| StoreError::invalid(format!("invalid jabon: {}", e)))?;
    let id = jabones
        .create_in_tienda(&tiendas, &DocumentId::new(tienda_id), jabon)
        .await?;
    let item = stored(&state, jabones.path(), &id).await?;
    Ok((StatusCode::CREATED, Json(item.to_json())))
}
