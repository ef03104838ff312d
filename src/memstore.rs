//! An in-memory `OrderStore` for tests.

use async_trait::async_trait;
use std::{collections::HashMap, sync::Mutex};

use crate::{
    definitions::DefinitionRecord,
    error::PersistenceError,
    orders::{ChildBatch, ParentRecord},
    store::OrderStore,
};

#[derive(Clone, Debug)]
pub struct StoredSubmission {
    pub id: u64,
    pub parent: ParentRecord,
    pub children: ChildBatch,
}

#[derive(Debug, Default)]
struct Inner {
    definitions: HashMap<i64, DefinitionRecord>,
    submissions: Vec<StoredSubmission>,
    fail_writes: bool,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn add_definition(&self, client_id: i64, id: u64, definition: &str) {
        self.inner.lock().unwrap().definitions.insert(
            client_id,
            DefinitionRecord {
                id,
                definition: Some(definition.to_owned()),
                mapping: None,
            },
        );
    }

    /// Make subsequent writes fail as if the database went away.
    pub fn fail_writes(&self) {
        self.inner.lock().unwrap().fail_writes = true;
    }

    pub fn submissions(&self) -> Vec<StoredSubmission> {
        self.inner.lock().unwrap().submissions.clone()
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn fetch_definition(
        &self,
        client_id: i64,
    ) -> Result<Option<DefinitionRecord>, PersistenceError> {
        Ok(self.inner.lock().unwrap().definitions.get(&client_id).cloned())
    }

    async fn write_submission(
        &self,
        parent: &ParentRecord,
        children: &ChildBatch,
    ) -> Result<u64, PersistenceError> {
        let mut inner = self.inner.lock().unwrap();

        if inner.fail_writes {
            return Err(sqlx::Error::Protocol("connection reset".to_owned()).into());
        }

        let id = inner.submissions.len() as u64 + 1;
        inner.submissions.push(StoredSubmission {
            id,
            parent: parent.clone(),
            children: children.clone(),
        });
        Ok(id)
    }
}
