/// Backend-independent mutation IR.
///
/// Mutations are a closed sum type compiled per backend. Column maps are
/// `BTreeMap`s so compilation iterates them in sorted order — the compiled
/// SQL for a given mutation is identical on every run.
use std::collections::BTreeMap;

use crate::query::{Node, Value};

/// A write operation against one table.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Insert(Insert),
    Update(Update),
    Delete(Delete),
    Upsert(Upsert),
}

/// Insert with column values.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Insert {
    pub values: BTreeMap<String, Value>,
    pub returning: Option<Vec<String>>,
}

/// Update with SET values and an optional filter.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Update {
    pub set: BTreeMap<String, Value>,
    pub filter: Option<Node>,
    pub returning: Option<Vec<String>>,
}

/// Delete with an optional filter.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Delete {
    pub filter: Option<Node>,
    pub returning: Option<Vec<String>>,
}

/// Insert-or-update keyed on a conflict column set. An empty `update_set`
/// compiles to DO NOTHING.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Upsert {
    pub values: BTreeMap<String, Value>,
    pub conflict_columns: Vec<String>,
    pub update_set: BTreeMap<String, Value>,
    pub returning: Option<Vec<String>>,
}

impl Insert {
    pub fn new(values: BTreeMap<String, Value>) -> Self {
        Self {
            values,
            returning: None,
        }
    }

    pub fn with_returning(mut self, columns: &[&str]) -> Self {
        self.returning = Some(columns.iter().map(|c| c.to_string()).collect());
        self
    }
}

impl Update {
    pub fn new(set: BTreeMap<String, Value>, filter: Option<Node>) -> Self {
        Self {
            set,
            filter,
            returning: None,
        }
    }

    pub fn with_returning(mut self, columns: &[&str]) -> Self {
        self.returning = Some(columns.iter().map(|c| c.to_string()).collect());
        self
    }
}

impl Delete {
    pub fn new(filter: Option<Node>) -> Self {
        Self {
            filter,
            returning: None,
        }
    }

    pub fn with_returning(mut self, columns: &[&str]) -> Self {
        self.returning = Some(columns.iter().map(|c| c.to_string()).collect());
        self
    }
}

impl Upsert {
    pub fn new(
        values: BTreeMap<String, Value>,
        conflict_columns: Vec<String>,
        update_set: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            values,
            conflict_columns,
            update_set,
            returning: None,
        }
    }

    pub fn with_returning(mut self, columns: &[&str]) -> Self {
        self.returning = Some(columns.iter().map(|c| c.to_string()).collect());
        self
    }
}

impl From<Insert> for Mutation {
    fn from(m: Insert) -> Self {
        Mutation::Insert(m)
    }
}

impl From<Update> for Mutation {
    fn from(m: Update) -> Self {
        Mutation::Update(m)
    }
}

impl From<Delete> for Mutation {
    fn from(m: Delete) -> Self {
        Mutation::Delete(m)
    }
}

impl From<Upsert> for Mutation {
    fn from(m: Upsert) -> Self {
        Mutation::Upsert(m)
    }
}

/// Result metadata from executing a mutation.
#[derive(Debug, Clone, Default)]
pub struct MutationResult {
    pub rows_affected: u64,
    /// Driver-assigned row id where the backend reports one (SQLite, MySQL).
    /// `None` when the statement carried a RETURNING clause — the returned
    /// rows hold the authoritative values there.
    pub last_insert_id: Option<i64>,
    /// Rows produced by a RETURNING clause, one column map per row; empty
    /// when the mutation was compiled without one.
    pub returning: Vec<BTreeMap<String, Value>>,
}

/// Convenience constructor mirroring the condition helpers in `query`.
pub fn insert(values: BTreeMap<String, Value>) -> Insert {
    Insert::new(values)
}

pub fn update(set: BTreeMap<String, Value>, filter: Option<Node>) -> Update {
    Update::new(set, filter)
}

pub fn delete(filter: Option<Node>) -> Delete {
    Delete::new(filter)
}

pub fn upsert(
    values: BTreeMap<String, Value>,
    conflict_columns: Vec<String>,
    update_set: BTreeMap<String, Value>,
) -> Upsert {
    Upsert::new(values, conflict_columns, update_set)
}
