//! HTTP server exposing catalog collections through the conventional
//! resource routes, so a `RestDocumentStore` (or any plain REST client) can
//! talk to a running `soapstock` instance.

pub mod handlers;

use crate::catalog::CatalogPaths;
use crate::core::StoreError;
use crate::live::LiveCollections;
use axum::Json;
use axum::Router;
use http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde::Serialize;
use std::net::SocketAddr;
use std::future::Future;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared handler state: the session's live layer and its path policy.
#[derive(Clone)]
pub struct WebState {
    pub live: LiveCollections,
    pub paths: CatalogPaths,
}

impl WebState {
    pub fn new(live: LiveCollections, paths: CatalogPaths) -> Self {
        Self { live, paths }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug)]
pub struct WebError(pub StoreError);

impl From<StoreError> for WebError {
    fn from(err: StoreError) -> Self {
        WebError(err)
    }
}

impl WebError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            StoreError::NotFound { .. } => StatusCode::NOT_FOUND,
            StoreError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            StoreError::InvalidInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
            StoreError::Http { .. } => StatusCode::BAD_GATEWAY,
            StoreError::AuthUnavailable(_)
            | StoreError::NetworkFailure(_)
            | StoreError::Closed(_) => StatusCode::SERVICE_UNAVAILABLE,
            StoreError::MalformedConfiguration(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorResponse {
            error: self.0.to_string(),
            code: self.0.code().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub type WebResult<T> = std::result::Result<T, WebError>;

pub fn build_router(state: WebState) -> Router {
    Router::new()
        .route("/health", get(handlers::healthcheck))
        .route(
            "/api/:collection",
            get(handlers::list_documents).post(handlers::create_document),
        )
        .route(
            "/api/:collection/:id",
            get(handlers::get_document)
                .put(handlers::replace_document)
                .patch(handlers::merge_document)
                .delete(handlers::delete_document),
        )
        .route(
            "/api/jabones/tienda/:tienda_id",
            get(handlers::list_tienda_jabones).post(handlers::create_tienda_jabon),
        )
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves the router on `addr` until `shutdown` resolves.
pub async fn serve<F>(state: WebState, addr: SocketAddr, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(address = %listener.local_addr()?, "soapstock server started");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
