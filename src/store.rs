//! Relational storage of submissions.
//!
//! Every store operation opens its own connection and closes it before
//! returning; there is no pool.
//!
//! The parent row and its detail rows are written in a single transaction, so
//! a failed bulk insert never leaves a parent without children.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{
    mysql::{MySqlConnectOptions, MySqlConnection},
    query_builder::Separated,
    Connection, MySql, QueryBuilder,
};

use lambda_runtime::tracing::{debug, warn};

use crate::{
    config::DbConfig,
    definitions::DefinitionRecord,
    error::PersistenceError,
    orders::{ChildBatch, ParentRecord},
};

pub const PARENT_TABLE: &str = "customer_order_integrations";
pub const DETAIL_TABLE: &str = "customer_order_integration_details";
pub const DEFINITION_TABLE: &str = "customer_order_integration_definitions";

/// Status of freshly received detail rows.
pub const STATUS_PENDING: i32 = 0;

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// The definition row for `client_id`, if any. At most one exists.
    async fn fetch_definition(
        &self,
        client_id: i64,
    ) -> Result<Option<DefinitionRecord>, PersistenceError>;

    /// Atomically write a parent row and its detail rows, returning the new
    /// parent id.
    async fn write_submission(
        &self,
        parent: &ParentRecord,
        children: &ChildBatch,
    ) -> Result<u64, PersistenceError>;
}

#[derive(Clone, Debug)]
pub struct MySqlStore {
    options: MySqlConnectOptions,
}

impl MySqlStore {
    pub fn new(config: &DbConfig) -> Self {
        MySqlStore {
            options: config.connect_options(),
        }
    }

    async fn connect(&self) -> Result<MySqlConnection, PersistenceError> {
        Ok(MySqlConnection::connect_with(&self.options).await?)
    }
}

/// Close a connection, logging rather than failing if that goes wrong: by the
/// time we get here the operation's own result is what matters.
async fn close(conn: MySqlConnection) {
    if let Err(e) = conn.close().await {
        warn!("error closing DB connection: {e}");
    }
}

#[async_trait]
impl OrderStore for MySqlStore {
    async fn fetch_definition(
        &self,
        client_id: i64,
    ) -> Result<Option<DefinitionRecord>, PersistenceError> {
        let mut conn = self.connect().await?;

        let result = sqlx::query_as::<_, DefinitionRecord>(&format!(
            "SELECT id, definition, mapping FROM {DEFINITION_TABLE} WHERE client_id = ? LIMIT 1"
        ))
        .bind(client_id)
        .fetch_optional(&mut conn)
        .await;

        close(conn).await;
        Ok(result?)
    }

    async fn write_submission(
        &self,
        parent: &ParentRecord,
        children: &ChildBatch,
    ) -> Result<u64, PersistenceError> {
        let mut conn = self.connect().await?;
        let result = write_in_transaction(&mut conn, parent, children).await;
        close(conn).await;
        result
    }
}

async fn write_in_transaction(
    conn: &mut MySqlConnection,
    parent: &ParentRecord,
    children: &ChildBatch,
) -> Result<u64, PersistenceError> {
    // Dropping `tx` on an error path rolls it back.
    let mut tx = conn.begin().await?;
    let parent_id = insert_parent(&mut tx, parent).await?;
    insert_children(&mut tx, parent_id, children).await?;
    tx.commit().await?;
    Ok(parent_id)
}

/// Placeholder limit of a single MySQL prepared statement.
pub const MAX_BIND_PARAMS: usize = 65_535;

/// Parent values in bind order.
fn parent_values(parent: &ParentRecord) -> (i64, u64, String) {
    (parent.client_id, parent.definition_id, parent.header_json.clone())
}

/// Build the parent insert.
pub fn parent_insert_query(parent: &ParentRecord) -> QueryBuilder<'static, MySql> {
    let mut qb = QueryBuilder::new(format!(
        "INSERT INTO {PARENT_TABLE} \
         (client_id, customer_order_integration_definition_id, header, created_at, updated_at) "
    ));

    qb.push_values(std::iter::once(parent_values(parent)), |mut row, (client, definition, header)| {
        row.push_bind(client)
            .push_bind(definition)
            .push_bind(header)
            .push("NOW()")
            .push("NOW()");
    });

    qb
}

/// Insert the parent row, returning its generated id.
pub async fn insert_parent(
    conn: &mut MySqlConnection,
    parent: &ParentRecord,
) -> Result<u64, PersistenceError> {
    let mut qb = parent_insert_query(parent);
    let result = qb.build().execute(&mut *conn).await?;

    debug!(parent_id = result.last_insert_id(), "inserted parent row");
    Ok(result.last_insert_id())
}

/// Bulk-insert detail rows with multi-row statements, as few as the
/// placeholder limit allows. No-op for an empty batch.
pub async fn insert_children(
    conn: &mut MySqlConnection,
    parent_id: u64,
    children: &ChildBatch,
) -> Result<(), PersistenceError> {
    if children.is_empty() {
        return Ok(());
    }

    let mut rows = 0;

    for mut qb in child_insert_queries(parent_id, children) {
        let result = qb.build().execute(&mut *conn).await?;
        rows += result.rows_affected();
    }

    debug!(rows, parent_id, "inserted detail rows");
    Ok(())
}

/// How many detail rows fit in one statement: each row binds the parent id
/// plus one value per column.
pub fn rows_per_statement(column_count: usize) -> usize {
    (MAX_BIND_PARAMS / (column_count + 1)).max(1)
}

/// Build the bulk detail inserts, one per chunk of rows. Column names must
/// already have been validated (`ChildBatch::project` does this); every value
/// is a bound parameter.
pub fn child_insert_queries(
    parent_id: u64,
    children: &ChildBatch,
) -> Vec<QueryBuilder<'static, MySql>> {
    let mut columns = String::new();
    for c in &children.columns {
        columns.push_str(c);
        columns.push_str(", ");
    }

    let prefix = format!(
        "INSERT INTO {DETAIL_TABLE} \
         (customer_order_integration_id, {columns}status, created_at, updated_at) "
    );

    children
        .rows
        .chunks(rows_per_statement(children.columns.len()))
        .map(|chunk| {
            let mut qb = QueryBuilder::new(prefix.clone());

            qb.push_values(chunk.iter(), |mut row, values| {
                row.push_bind(parent_id);

                for v in values {
                    bind_json(&mut row, v);
                }

                row.push(STATUS_PENDING).push("NOW()").push("NOW()");
            });

            qb
        })
        .collect()
}

/// Bind a JSON value with the closest MySQL type. Nested values go in as
/// their JSON text.
fn bind_json<Sep: std::fmt::Display>(row: &mut Separated<'_, 'static, MySql, Sep>, value: &Value) {
    match value {
        Value::Null => {
            row.push_bind(None::<String>);
        }
        Value::Bool(b) => {
            row.push_bind(*b);
        }
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                row.push_bind(i);
            } else if let Some(u) = n.as_u64() {
                row.push_bind(u);
            } else {
                row.push_bind(n.as_f64());
            }
        }
        Value::String(s) => {
            row.push_bind(s.clone());
        }
        Value::Array(_) | Value::Object(_) => {
            row.push_bind(value.to_string());
        }
    }
}
