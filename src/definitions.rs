//! Per-client integration definitions.
//!
//! A client may register a definition describing how its generic order
//! attributes map onto our detail-table columns. The stored form is a JSON
//! object keyed by field (detail column) name:
//!
//! ```json
//! {"attribute1": {"header": "SKU", "column": "A", "type": "string"}, ...}
//! ```
//!
//! This is the legacy column-definition format. Declaration order matters:
//! the header list is positional, so we rely on `serde_json`'s
//! `preserve_order` feature and never sort.

use serde_json::{Map, Value};

use crate::{error::PersistenceError, response, store::OrderStore};

/// One field of a definition.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DefinitionCell {
    pub field: String,
    pub column: Option<String>,
    pub header: Option<String>,
    pub kind: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ParsedDefinition {
    /// Display headers, in declaration order. Entries are whatever the
    /// definition held (usually strings, `null` if a field had no header).
    pub headers: Vec<Value>,
    pub cells: Vec<DefinitionCell>,
}

impl ParsedDefinition {
    /// The header list as stored on the parent record.
    pub fn header_json(&self) -> String {
        response::to_json_text(&self.headers)
    }
}

/// A resolved definition for one client.
#[derive(Clone, Debug, PartialEq)]
pub struct IntegrationDefinition {
    pub id: u64,
    pub defs: ParsedDefinition,
}

/// A raw `customer_order_integration_definitions` row.
#[derive(Clone, Debug, sqlx::FromRow)]
pub struct DefinitionRecord {
    pub id: u64,
    pub definition: Option<String>,
    pub mapping: Option<String>,
}

fn opt_string(entry: &Value, key: &str) -> Option<String> {
    entry.get(key).and_then(Value::as_str).map(str::to_owned)
}

pub fn parse_definitions(text: &str) -> Result<ParsedDefinition, PersistenceError> {
    let defs: Map<String, Value> = serde_json::from_str(text)?;

    let mut headers = Vec::with_capacity(defs.len());
    let mut cells = Vec::with_capacity(defs.len());

    for (field, entry) in defs {
        headers.push(entry.get("header").cloned().unwrap_or(Value::Null));

        cells.push(DefinitionCell {
            column: opt_string(&entry, "column"),
            header: opt_string(&entry, "header"),
            kind: opt_string(&entry, "type"),
            field,
        });
    }

    Ok(ParsedDefinition { headers, cells })
}

/// Look up and parse the definition for `client_id`, if it has one.
pub async fn get_integration_definition(
    store: &dyn OrderStore,
    client_id: i64,
) -> Result<Option<IntegrationDefinition>, PersistenceError> {
    let record = match store.fetch_definition(client_id).await? {
        Some(r) => r,
        None => return Ok(None),
    };

    let defs = match record.definition.as_deref() {
        Some(text) if !text.trim().is_empty() => parse_definitions(text)?,
        _ => ParsedDefinition {
            headers: Vec::new(),
            cells: Vec::new(),
        },
    };

    Ok(Some(IntegrationDefinition {
        id: record.id,
        defs,
    }))
}
