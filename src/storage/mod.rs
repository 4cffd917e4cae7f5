//! Storage collaborator behind the `/db/*` endpoints.
//!
//! The dispatch layer only knows the [`Storage`] trait; the SurrealDB-backed
//! implementation lives in [`surreal`].

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

pub mod surreal;

pub use surreal::SurrealStorage;

/// `/db/insert` body.
#[derive(Debug, Clone, Deserialize)]
pub struct InsertRequest {
    pub table: String,
    pub data: Map<String, Value>,
}

/// `/db/select` body. `filter` matches top-level fields by equality.
#[derive(Debug, Clone, Deserialize)]
pub struct SelectRequest {
    pub table: String,
    #[serde(default)]
    pub filter: BTreeMap<String, Value>,
}

/// `/db/update` body. `data` is merged into the record named by `key`.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateRequest {
    pub table: String,
    pub key: String,
    pub data: Map<String, Value>,
}

/// `/db/delete` body.
#[derive(Debug, Clone, Deserialize)]
pub struct DeleteRequest {
    pub table: String,
    pub key: String,
}

/// `/db/set_schema` body: field name to type, e.g. `{"age": "int"}`.
#[derive(Debug, Clone, Deserialize)]
pub struct SchemaRequest {
    pub table: String,
    pub fields: BTreeMap<String, String>,
}

/// Errors surfaced by storage operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The request body is not a valid request.
    InvalidRequest(String),
    /// A table or field name is not a plain identifier.
    InvalidIdentifier(String),
    /// A field type contains characters outside the type grammar.
    InvalidType(String),
    /// The storage engine rejected the operation.
    Backend(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            Self::InvalidIdentifier(name) => write!(f, "Invalid identifier: {}", name),
            Self::InvalidType(ty) => write!(f, "Invalid field type: {}", ty),
            Self::Backend(msg) => write!(f, "Storage error: {}", msg),
        }
    }
}

impl std::error::Error for StorageError {}

/// CRUD operations exposed over HTTP when storage is enabled.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn insert(&self, request: InsertRequest) -> Result<(), StorageError>;

    async fn select(&self, request: SelectRequest) -> Result<Vec<Value>, StorageError>;

    async fn update(&self, request: UpdateRequest) -> Result<(), StorageError>;

    async fn delete(&self, request: DeleteRequest) -> Result<(), StorageError>;

    async fn set_schema(&self, request: SchemaRequest) -> Result<(), StorageError>;
}

/// Check that `name` is usable verbatim as a table or field name.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub(crate) fn check_identifier(name: &str) -> Result<&str, StorageError> {
    if is_identifier(name) {
        Ok(name)
    } else {
        Err(StorageError::InvalidIdentifier(name.to_string()))
    }
}
