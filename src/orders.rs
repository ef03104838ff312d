//! Persisting customer-order submissions.
//!
//! A submission is a JSON object whose `customer-orders` member is an array of
//! flat records. We write one parent row per submission and one detail row
//! per record. The detail table is wide and generic (`attribute1`,
//! `attribute2`, ...), so which columns get filled depends on the submission:
//!
//! - plain integrations store each record key under the column of the same
//!   name;
//! - customizations go through the client's definition, which maps display
//!   headers (the record keys) onto detail columns.
//!
//! In both cases the *first* record decides the column set for the whole
//! batch. Later records with extra keys lose them (we log it); records missing
//! a key get NULL there.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashSet;

use lambda_runtime::tracing::{info, warn};

use crate::{
    definitions::{self, DefinitionCell},
    error::PersistenceError,
    store::OrderStore,
};

pub const ORDERS_KEY: &str = "customer-orders";

/// Detail columns that we fill in ourselves.
pub const RESERVED_COLUMNS: &[&str] = &[
    "customer_order_integration_id",
    "status",
    "created_at",
    "updated_at",
];

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,63}$").unwrap());

pub type OrderRecord = Map<String, Value>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SubmissionKind {
    /// Record keys are stored as-is.
    Integration,

    /// Record keys are projected through the client's definition.
    Customization,
}

/// What goes into the parent `customer_order_integrations` row.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ParentRecord {
    pub client_id: i64,

    /// Zero if the client has no definition.
    pub definition_id: u64,

    pub header_json: String,
}

/// The projected detail rows of one submission.
#[derive(Clone, Debug, PartialEq)]
pub struct ChildBatch {
    /// Target detail-table columns, validated as SQL identifiers.
    pub columns: Vec<String>,

    /// One entry per record, positionally matching `columns`.
    pub rows: Vec<Vec<Value>>,
}

impl ChildBatch {
    /// Project `orders` onto detail columns.
    ///
    /// With no cells (or an empty cell list) the first record's keys are the
    /// columns. With cells, each cell whose header is a key of the first
    /// record contributes its field as the target column, in definition order.
    pub fn project(
        orders: &[OrderRecord],
        cells: Option<&[DefinitionCell]>,
    ) -> Result<Self, PersistenceError> {
        let first = match orders.first() {
            Some(r) => r,
            None => {
                return Ok(ChildBatch {
                    columns: Vec::new(),
                    rows: Vec::new(),
                })
            }
        };

        // (record key, target column)
        let selection: Vec<(&str, &str)> = match cells {
            Some(cells) if !cells.is_empty() => cells
                .iter()
                .filter_map(|cell| {
                    let header = cell.header.as_deref()?;
                    if first.contains_key(header) {
                        Some((header, cell.field.as_str()))
                    } else {
                        None
                    }
                })
                .collect(),
            _ => first.keys().map(|k| (k.as_str(), k.as_str())).collect(),
        };

        for (_, column) in &selection {
            validate_column(column)?;
        }

        let unmatched = unmatched_keys(first, &selection);
        if !unmatched.is_empty() {
            warn!(?unmatched, "dropping keys that no definition header matches");
        }

        for (index, record) in orders.iter().enumerate().skip(1) {
            let extra: Vec<&str> = record
                .keys()
                .filter(|k| !first.contains_key(k.as_str()))
                .map(String::as_str)
                .collect();

            if !extra.is_empty() {
                warn!(index, ?extra, "dropping keys not present in the first order record");
            }
        }

        let rows = orders
            .iter()
            .map(|record| {
                selection
                    .iter()
                    .map(|(key, _)| record.get(*key).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();

        Ok(ChildBatch {
            columns: selection.iter().map(|(_, c)| (*c).to_owned()).collect(),
            rows,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Column names end up in SQL text, so they have to be plain identifiers and
/// must not shadow the columns we manage.
/// Keys of `record` that no selected column reads from.
fn unmatched_keys<'a>(record: &'a OrderRecord, selection: &[(&str, &str)]) -> Vec<&'a str> {
    record
        .keys()
        .map(String::as_str)
        .filter(|k| !selection.iter().any(|(key, _)| key == k))
        .collect()
}

pub fn validate_column(name: &str) -> Result<(), PersistenceError> {
    let lowered = name.to_ascii_lowercase();

    if !IDENTIFIER.is_match(name) || RESERVED_COLUMNS.contains(&lowered.as_str()) {
        return Err(PersistenceError::InvalidColumn(name.to_owned()));
    }

    // Duplicate columns are not caught here; `project` can't produce them.
    Ok(())
}

fn is_falsy(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

/// Extract the order records from a submission payload.
///
/// `Ok(None)` means there is nothing to store: the member is absent or holds
/// an empty (falsy) value.
pub fn extract_orders(payload: &Value) -> Result<Option<Vec<OrderRecord>>, PersistenceError> {
    let orders = match payload.get(ORDERS_KEY) {
        Some(v) if !is_falsy(v) => v,
        _ => return Ok(None),
    };

    let items = orders.as_array().ok_or_else(|| {
        PersistenceError::InvalidPayload(format!("`{ORDERS_KEY}` must be an array"))
    })?;

    let mut records = Vec::with_capacity(items.len());

    for (index, item) in items.iter().enumerate() {
        match item {
            Value::Object(map) => records.push(map.clone()),
            _ => {
                return Err(PersistenceError::InvalidPayload(format!(
                    "`{ORDERS_KEY}` item #{index} is not an object"
                )))
            }
        }
    }

    Ok(Some(records))
}

/// Store a submission; returns the new parent id, or `None` if the payload
/// had no orders (in which case nothing is written).
///
/// A missing definition is fine: the parent gets definition id 0 and an empty
/// header list, and customizations fall back to storing raw keys.
pub async fn save_payload(
    store: &dyn OrderStore,
    payload: &Value,
    client_id: i64,
    kind: SubmissionKind,
) -> Result<Option<u64>, PersistenceError> {
    let orders = match extract_orders(payload)? {
        Some(o) => o,
        None => {
            info!(client_id, ?kind, "no orders received");
            return Ok(None);
        }
    };

    let definition = definitions::get_integration_definition(store, client_id).await?;

    let (definition_id, header_json, cells) = match &definition {
        Some(d) => (d.id, d.defs.header_json(), Some(d.defs.cells.as_slice())),
        None => (0, "[]".to_owned(), None),
    };

    info!(client_id, definition_id, "resolved integration definition");

    let cells = match kind {
        SubmissionKind::Integration => None,
        SubmissionKind::Customization => cells,
    };

    let children = ChildBatch::project(&orders, cells)?;

    let parent = ParentRecord {
        client_id,
        definition_id,
        header_json,
    };

    let parent_id = store.write_submission(&parent, &children).await?;

    info!(
        client_id,
        parent_id,
        rows = children.rows.len(),
        columns = children.columns.len(),
        "saved customer-order submission"
    );

    Ok(Some(parent_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memstore::MemoryStore;
    use serde_json::json;

    fn records(v: Value) -> Vec<OrderRecord> {
        extract_orders(&json!({ ORDERS_KEY: v })).unwrap().unwrap()
    }

    fn cell(field: &str, header: &str) -> DefinitionCell {
        DefinitionCell {
            field: field.to_owned(),
            column: None,
            header: Some(header.to_owned()),
            kind: None,
        }
    }

    #[test]
    fn empty_orders_mean_nothing_to_do() {
        for payload in [
            json!({}),
            json!({ORDERS_KEY: null}),
            json!({ORDERS_KEY: []}),
            json!({ORDERS_KEY: {}}),
            json!({ORDERS_KEY: ""}),
        ] {
            assert!(extract_orders(&payload).unwrap().is_none(), "{payload}");
        }
    }

    #[test]
    fn malformed_orders() {
        assert!(matches!(
            extract_orders(&json!({ORDERS_KEY: {"sku": "X"}})),
            Err(PersistenceError::InvalidPayload(_))
        ));
        assert!(matches!(
            extract_orders(&json!({ORDERS_KEY: [{"sku": "X"}, 3]})),
            Err(PersistenceError::InvalidPayload(_))
        ));
    }

    #[test]
    fn first_record_determines_columns() {
        let orders = records(json!([
            {"sku": "X1", "qty": 2},
            {"sku": "X2", "qty": 5, "gift": true},
            {"qty": 1},
        ]));

        let batch = ChildBatch::project(&orders, None).unwrap();
        assert_eq!(batch.columns, ["sku", "qty"]);
        assert_eq!(
            batch.rows,
            vec![
                vec![json!("X1"), json!(2)],
                vec![json!("X2"), json!(5)],
                vec![Value::Null, json!(1)],
            ]
        );
    }

    #[test]
    fn cells_project_headers_onto_fields() {
        let orders = records(json!([
            {"SKU": "X1", "Quantity": 2, "Note": "n"},
            {"SKU": "X2", "Quantity": 3},
        ]));
        let cells = [
            cell("attribute2", "Quantity"),
            cell("attribute1", "SKU"),
            cell("attribute3", "Colour"),
        ];

        let batch = ChildBatch::project(&orders, Some(&cells)).unwrap();
        assert_eq!(batch.columns, ["attribute2", "attribute1"]);
        assert_eq!(
            batch.rows,
            vec![vec![json!(2), json!("X1")], vec![json!(3), json!("X2")]]
        );
    }

    #[test]
    fn keys_without_a_matching_header_are_reported() {
        let orders = records(json!([{"SKU": "X1", "Quantity": 2, "Note": "n"}]));
        let selection = [("Quantity", "attribute2"), ("SKU", "attribute1")];
        assert_eq!(unmatched_keys(&orders[0], &selection), ["Note"]);

        let all = [("SKU", "SKU"), ("Quantity", "Quantity"), ("Note", "Note")];
        assert!(unmatched_keys(&orders[0], &all).is_empty());
    }

    #[test]
    fn empty_cells_fall_back_to_raw_keys() {
        let orders = records(json!([{"sku": "X1"}]));
        let batch = ChildBatch::project(&orders, Some(&[])).unwrap();
        assert_eq!(batch.columns, ["sku"]);
    }

    #[test]
    fn hostile_columns_are_rejected() {
        let orders = records(json!([{"sku); DROP TABLE x; --": 1}]));
        assert!(matches!(
            ChildBatch::project(&orders, None),
            Err(PersistenceError::InvalidColumn(_))
        ));

        let orders = records(json!([{"status": 3}]));
        assert!(matches!(
            ChildBatch::project(&orders, None),
            Err(PersistenceError::InvalidColumn(_))
        ));

        let orders = records(json!([{"SKU": 1}]));
        assert!(ChildBatch::project(&orders, Some(&[cell("bad name", "SKU")])).is_err());
    }

    #[tokio::test]
    async fn no_orders_writes_nothing() {
        let store = MemoryStore::default();
        let result = save_payload(&store, &json!({}), 42, SubmissionKind::Integration)
            .await
            .unwrap();
        assert_eq!(result, None);

        let result = save_payload(&store, &json!({ORDERS_KEY: []}), 42, SubmissionKind::Customization)
            .await
            .unwrap();
        assert_eq!(result, None);
        assert!(store.submissions().is_empty());
    }

    #[tokio::test]
    async fn integration_without_definition() {
        let store = MemoryStore::default();
        let payload = json!({ORDERS_KEY: [{"sku": "X1", "qty": 2}]});

        let id = save_payload(&store, &payload, 42, SubmissionKind::Integration)
            .await
            .unwrap()
            .unwrap();

        let subs = store.submissions();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].id, id);
        assert_eq!(
            subs[0].parent,
            ParentRecord {
                client_id: 42,
                definition_id: 0,
                header_json: "[]".to_owned(),
            }
        );
        assert_eq!(subs[0].children.columns, ["sku", "qty"]);
        assert_eq!(subs[0].children.rows.len(), 1);
    }

    #[tokio::test]
    async fn integration_ignores_definition_cells() {
        let store = MemoryStore::default();
        store.add_definition(7, 3, r#"{"attribute1":{"header":"SKU"}}"#);
        let payload = json!({ORDERS_KEY: [{"SKU": "X1"}]});

        save_payload(&store, &payload, 7, SubmissionKind::Integration)
            .await
            .unwrap();

        let subs = store.submissions();
        assert_eq!(subs[0].parent.definition_id, 3);
        assert_eq!(subs[0].parent.header_json, r#"["SKU"]"#);
        assert_eq!(subs[0].children.columns, ["SKU"]);
    }

    #[tokio::test]
    async fn customization_uses_definition_cells() {
        let store = MemoryStore::default();
        store.add_definition(
            7,
            3,
            r#"{"attribute1":{"header":"SKU"},"attribute2":{"header":"Qty"}}"#,
        );
        let payload = json!({ORDERS_KEY: [{"Qty": 4, "SKU": "X1"}]});

        save_payload(&store, &payload, 7, SubmissionKind::Customization)
            .await
            .unwrap();

        let subs = store.submissions();
        assert_eq!(subs[0].parent.header_json, r#"["SKU", "Qty"]"#);
        assert_eq!(subs[0].children.columns, ["attribute1", "attribute2"]);
        assert_eq!(subs[0].children.rows, vec![vec![json!("X1"), json!(4)]]);
    }

    #[tokio::test]
    async fn failed_write_leaves_nothing_behind() {
        let store = MemoryStore::default();
        store.fail_writes();
        let payload = json!({ORDERS_KEY: [{"sku": "X1"}]});

        let err = save_payload(&store, &payload, 42, SubmissionKind::Integration)
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::Database(_)));
        assert!(store.submissions().is_empty());
    }
}
