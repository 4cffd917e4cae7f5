use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use surrealdb::Surreal;
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::Root;

use super::{
    DeleteRequest, InsertRequest, SchemaRequest, SelectRequest, Storage, StorageError, UpdateRequest,
    check_identifier,
};
use crate::config::DatabaseSettings;

pub type Db = Surreal<Any>;

/// [`Storage`] backed by SurrealDB. `memory` selects the embedded
/// in-memory engine.
#[derive(Clone)]
pub struct SurrealStorage {
    db: Db,
}

impl SurrealStorage {
    pub async fn connect(settings: &DatabaseSettings) -> Result<Self> {
        let db = surrealdb::engine::any::connect(settings.url.as_str())
            .await
            .with_context(|| format!("failed to connect to storage at {}", settings.url))?;

        // Sign in if credentials are provided
        if let (Some(username), Some(password)) = (&settings.username, &settings.password) {
            db.signin(Root {
                username: username.as_str(),
                password: password.as_str(),
            })
            .await
            .context("failed to sign in to storage")?;
        }

        db.use_ns(settings.namespace.as_str())
            .use_db(settings.database.as_str())
            .await
            .context("failed to select storage namespace")?;

        tracing::info!(url = %settings.url, "Storage connected");
        Ok(Self { db })
    }
}

fn backend(err: surrealdb::Error) -> StorageError {
    StorageError::Backend(err.to_string())
}

/// Builds the select statement and its bindings. Filter fields are spliced
/// in as identifiers; their values are always bound.
fn select_query(request: &SelectRequest) -> Result<(String, Vec<(String, Value)>), StorageError> {
    check_identifier(&request.table)?;

    let mut query = String::from("SELECT *, record::id(id) AS key OMIT id FROM type::table($table)");
    let mut bindings = Vec::with_capacity(request.filter.len());

    for (index, (field, value)) in request.filter.iter().enumerate() {
        check_identifier(field)?;
        query.push_str(if index == 0 { " WHERE " } else { " AND " });
        query.push_str(&format!("{} = $v{}", field, index));
        bindings.push((format!("v{}", index), value.clone()));
    }

    Ok((query, bindings))
}

fn check_type(ty: &str) -> Result<&str, StorageError> {
    let valid = !ty.is_empty()
        && ty
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '<' | '>' | '|' | ',' | ' '));
    if valid {
        Ok(ty)
    } else {
        Err(StorageError::InvalidType(ty.to_string()))
    }
}

/// `DEFINE` statements for a schemafull table. Redefining replaces the
/// previous definition.
fn schema_statements(request: &SchemaRequest) -> Result<String, StorageError> {
    let table = check_identifier(&request.table)?;

    let mut statements = format!("DEFINE TABLE OVERWRITE {} SCHEMAFULL;", table);
    for (field, ty) in &request.fields {
        let field = check_identifier(field)?;
        let ty = check_type(ty)?;
        statements.push_str(&format!(
            "\nDEFINE FIELD OVERWRITE {} ON TABLE {} TYPE {};",
            field, table, ty
        ));
    }

    Ok(statements)
}

#[async_trait]
impl Storage for SurrealStorage {
    async fn insert(&self, request: InsertRequest) -> Result<(), StorageError> {
        let table = check_identifier(&request.table)?.to_string();

        self.db
            .query("CREATE type::table($table) CONTENT $data RETURN NONE")
            .bind(("table", table))
            .bind(("data", request.data))
            .await
            .map_err(backend)?
            .check()
            .map_err(backend)?;
        Ok(())
    }

    async fn select(&self, request: SelectRequest) -> Result<Vec<Value>, StorageError> {
        let (query, bindings) = select_query(&request)?;

        let mut statement = self.db.query(query).bind(("table", request.table));
        for binding in bindings {
            statement = statement.bind(binding);
        }

        let mut response = statement.await.map_err(backend)?;
        let rows: Vec<Value> = response.take(0).map_err(backend)?;
        Ok(rows)
    }

    async fn update(&self, request: UpdateRequest) -> Result<(), StorageError> {
        let table = check_identifier(&request.table)?.to_string();

        self.db
            .query("UPDATE type::thing($table, $key) MERGE $data RETURN NONE")
            .bind(("table", table))
            .bind(("key", request.key))
            .bind(("data", request.data))
            .await
            .map_err(backend)?
            .check()
            .map_err(backend)?;
        Ok(())
    }

    async fn delete(&self, request: DeleteRequest) -> Result<(), StorageError> {
        let table = check_identifier(&request.table)?.to_string();

        self.db
            .query("DELETE type::thing($table, $key)")
            .bind(("table", table))
            .bind(("key", request.key))
            .await
            .map_err(backend)?
            .check()
            .map_err(backend)?;
        Ok(())
    }

    async fn set_schema(&self, request: SchemaRequest) -> Result<(), StorageError> {
        let statements = schema_statements(&request)?;

        self.db
            .query(statements)
            .await
            .map_err(backend)?
            .check()
            .map_err(backend)?;
        Ok(())
    }
}
