use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode};
use serde_json::{Value, json};
use soapstock::web::{WebState, build_router};
use soapstock::{AppConfig, AppContext, BackendConfig, CollectionScope};
use tower::ServiceExt;

async fn app() -> axum::Router {
    let config =
        AppConfig::new("test-app").backend(BackendConfig::default().scope(CollectionScope::Flat));
    let context = AppContext::from_config(config).unwrap();
    let session = context.ready().await.unwrap();
    build_router(WebState::new(session.live().clone(), session.paths().clone()))
}

async fn send(
    app: &axum::Router,
    method: Method,
    uri: &str,
    payload: Option<Value>,
) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match payload {
        Some(payload) => builder
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string())),
        None => builder.body(Body::empty()),
    }
    .expect("request should build");

    let response = app
        .clone()
        .oneshot(request)
        .await
        .expect("response expected");
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body should be readable");

    if body.is_empty() {
        return (status, Value::Null);
    }

    let json = serde_json::from_slice::<Value>(&body).expect("body should be valid JSON");
    (status, json)
}

#[tokio::test]
async fn health() {
    let app = app().await;
    let (status, body) = send(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn crud_round_trip() {
    let app = app().await;

    let (status, created) = send(
        &app,
        Method::POST,
        "/api/tiendas",
        Some(json!({"nombre": "Tienda A", "direccion": "Calle 1"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["nombre"], "Tienda A");

    let (status, list) = send(&app, Method::GET, "/api/tiendas", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);

    let (status, patched) = send(
        &app,
        Method::PATCH,
        &format!("/api/tiendas/{id}"),
        Some(json!({"direccion": "Calle 2"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(patched["direccion"], "Calle 2");
    assert_eq!(patched["nombre"], "Tienda A");

    let (status, replaced) = send(
        &app,
        Method::PUT,
        &format!("/api/tiendas/{id}"),
        Some(json!({"nombre": "Tienda B"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(replaced, json!({"id": id, "nombre": "Tienda B"}));

    let (status, _) = send(&app, Method::DELETE, &format!("/api/tiendas/{id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(&app, Method::GET, &format!("/api/tiendas/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn missing_documents_are_404() {
    let app = app().await;
    let (status, body) = send(
        &app,
        Method::PATCH,
        "/api/jabones/nope",
        Some(json!({"precio": 3})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");

    let (status, _) = send(&app, Method::DELETE, "/api/jabones/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn nested_values_are_rejected() {
    let app = app().await;
    let (status, body) = send(
        &app,
        Method::POST,
        "/api/jabones",
        Some(json!({"nombre": "Avena", "tags": ["a", "b"]})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "invalid_input");

    let (status, _) = send(&app, Method::POST, "/api/jabones", Some(json!([1, 2]))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn soaps_listed_and_created_per_store() {
    let app = app().await;
    let (_, tienda) = send(
        &app,
        Method::POST,
        "/api/tiendas",
        Some(json!({"nombre": "Centro", "direccion": "Calle 1"})),
    )
    .await;
    let tienda_id = tienda["id"].as_str().unwrap().to_string();
    let uri = format!("/api/jabones/tienda/{tienda_id}");

    let (status, created) = send(
        &app,
        Method::POST,
        &uri,
        Some(json!({"nombre": "Avena", "aroma": "miel", "precio": 8.5})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["tienda_id"], tienda_id.as_str());
    send(
        &app,
        Method::POST,
        "/api/jabones",
        Some(json!({"nombre": "Suelto", "aroma": "limon", "precio": 3})),
    )
    .await;

    let (status, list) = send(&app, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    let list = list.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["id"], created["id"]);
    assert_eq!(list[0]["nombre"], "Avena");
}

#[tokio::test]
async fn store_routes_reject_unknown_store_and_bad_bodies() {
    let app = app().await;
    let (status, body) = send(&app, Method::GET, "/api/jabones/tienda/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/jabones/tienda/nope",
        Some(json!({"nombre": "Avena", "aroma": "miel", "precio": 8.5})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/jabones/tienda/nope",
        Some(json!({"nombre": "Avena"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "invalid_input");
}
