//! `/db/*` CRUD endpoints backed by a [`Storage`] collaborator.
//!
//! Every endpoint reads a JSON request from the body. Failures answer with
//! `{"result": false, "error": "..."}` (`"result": []` for select).

use std::sync::Arc;

use axum::{Json, Router, body::Bytes, extract::State, routing::any};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::storage::{Storage, StorageError};

pub type StorageState = Arc<dyn Storage>;

pub fn storage_routes(storage: StorageState) -> Router {
    Router::new()
        .route("/db/insert", any(insert))
        .route("/db/select", any(select))
        .route("/db/update", any(update))
        .route("/db/delete", any(delete))
        .route("/db/set_schema", any(set_schema))
        .with_state(storage)
}

/// Paths registered by [`storage_routes`].
pub const STORAGE_PATHS: [&str; 5] = [
    "/db/insert",
    "/db/select",
    "/db/update",
    "/db/delete",
    "/db/set_schema",
];

fn parse<T: DeserializeOwned>(body: &Bytes) -> Result<T, StorageError> {
    serde_json::from_slice(body).map_err(|e| StorageError::InvalidRequest(e.to_string()))
}

fn failure(operation: &str, err: StorageError, empty: Value) -> Json<Value> {
    tracing::error!(operation, "{}", err);
    Json(json!({ "result": empty, "error": err.to_string() }))
}

fn acknowledge(operation: &str, result: Result<(), StorageError>) -> Json<Value> {
    match result {
        Ok(()) => Json(json!({ "result": true })),
        Err(err) => failure(operation, err, json!(false)),
    }
}

async fn insert(State(storage): State<StorageState>, body: Bytes) -> Json<Value> {
    let result = match parse(&body) {
        Ok(request) => storage.insert(request).await,
        Err(err) => Err(err),
    };
    acknowledge("insert", result)
}

async fn select(State(storage): State<StorageState>, body: Bytes) -> Json<Value> {
    let result = match parse(&body) {
        Ok(request) => storage.select(request).await,
        Err(err) => Err(err),
    };
    match result {
        Ok(rows) => Json(json!({ "result": rows })),
        Err(err) => failure("select", err, json!([])),
    }
}

async fn update(State(storage): State<StorageState>, body: Bytes) -> Json<Value> {
    let result = match parse(&body) {
        Ok(request) => storage.update(request).await,
        Err(err) => Err(err),
    };
    acknowledge("update", result)
}

async fn delete(State(storage): State<StorageState>, body: Bytes) -> Json<Value> {
    let result = match parse(&body) {
        Ok(request) => storage.delete(request).await,
        Err(err) => Err(err),
    };
    acknowledge("delete", result)
}

async fn set_schema(State(storage): State<StorageState>, body: Bytes) -> Json<Value> {
    let result = match parse(&body) {
        Ok(request) => storage.set_schema(request).await,
        Err(err) => Err(err),
    };
    acknowledge("set_schema", result)
}
