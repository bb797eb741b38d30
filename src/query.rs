/// Backend-independent query IR.
///
/// Queries are plain data: a filter tree, an ordering list and paging
/// settings. Backends receive the IR and translate it (the SQL compiler
/// lives in `sql::compiler`); nothing here performs I/O. The IR is closed —
/// backend-specific options travel only through the `hints` map.
use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// A filter or mutation argument value.
///
/// The set is deliberately closed: scalars, a list (for `In`/`NotIn`) and a
/// two-element range (for `Between`). Lists and ranges hold scalars only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Timestamp(DateTime<Utc>),
    List(Vec<Value>),
    Range(Box<Value>, Box<Value>),
}

impl Value {
    /// True for variants that can appear inside a `List` or `Range`.
    pub fn is_scalar(&self) -> bool {
        !matches!(self, Value::List(_) | Value::Range(_, _))
    }

    /// Canonical text encoding for timestamps: RFC 3339 with fixed
    /// microsecond precision, so lexicographic order equals chronological
    /// order. This is what gets bound through the driver layer.
    pub fn timestamp_repr(ts: &DateTime<Utc>) -> String {
        ts.to_rfc3339_opts(SecondsFormat::Micros, true)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

/// Comparison operation in filter conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    In,
    NotIn,
    Between,
    /// String starts with.
    Prefix,
    /// String ends with.
    Suffix,
    /// String contains.
    Contains,
    /// SQL LIKE pattern, passed through.
    Like,
    /// Case-insensitive LIKE.
    ILike,
    /// Regular expression match.
    Regex,
    IsNull,
    NotNull,
}

/// A simple filter condition: field, operator, value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub op: Operator,
    /// `Value::Null` for IsNull/NotNull, a `List` for In/NotIn, a `Range`
    /// for Between, a scalar otherwise.
    pub value: Value,
}

/// A recursive filter tree node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Condition(Condition),
    And(Vec<Node>),
    Or(Vec<Node>),
}

impl From<Condition> for Node {
    fn from(c: Condition) -> Self {
        Node::Condition(c)
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Asc,
    Desc,
}

/// Ordering on a field; orders are evaluated left to right.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub field: String,
    pub direction: Direction,
}

/// Cursor-based page request carried on a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRequest {
    pub size: i32,
    /// Encoded cursor; empty for the first page.
    pub cursor: String,
}

/// A backend-independent query over one table or key space.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    /// Column projection; empty means all columns.
    pub select: Vec<String>,
    pub filter: Option<Node>,
    pub order: Vec<Order>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    /// When set, wins over `limit`/`offset` at execution time.
    pub page: Option<PageRequest>,
    /// Backend-specific escape hatch.
    pub hints: BTreeMap<String, serde_json::Value>,
}

impl Query {
    pub fn builder() -> QueryBuilder {
        QueryBuilder::default()
    }
}

/// Chainable query construction. The last call wins on scalar settings;
/// list settings (`order_by`, `and_where`) accumulate.
#[derive(Debug, Default, Clone)]
pub struct QueryBuilder {
    query: Query,
    where_all: Vec<Node>,
}

impl QueryBuilder {
    pub fn select(mut self, columns: &[&str]) -> Self {
        self.query.select = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Replace the filter tree wholesale.
    pub fn filter(mut self, node: Node) -> Self {
        self.query.filter = Some(node);
        self.where_all.clear();
        self
    }

    /// Accumulate a condition; all accumulated conditions are ANDed.
    pub fn and_where(mut self, cond: Condition) -> Self {
        self.query.filter = None;
        self.where_all.push(Node::Condition(cond));
        self
    }

    pub fn order_by(mut self, order: Order) -> Self {
        self.query.order.push(order);
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.query.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: i64) -> Self {
        self.query.offset = Some(offset);
        self
    }

    pub fn page(mut self, size: i32, cursor: impl Into<String>) -> Self {
        self.query.page = Some(PageRequest {
            size,
            cursor: cursor.into(),
        });
        self
    }

    pub fn hint(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.query.hints.insert(key.into(), value);
        self
    }

    pub fn build(mut self) -> Query {
        if !self.where_all.is_empty() {
            self.query.filter = Some(Node::And(std::mem::take(&mut self.where_all)));
        }
        self.query
    }
}

// Condition constructors.

pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Condition {
    Condition {
        field: field.into(),
        op: Operator::Eq,
        value: value.into(),
    }
}

pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Condition {
    Condition {
        field: field.into(),
        op: Operator::Ne,
        value: value.into(),
    }
}

pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Condition {
    Condition {
        field: field.into(),
        op: Operator::Gt,
        value: value.into(),
    }
}

pub fn ge(field: impl Into<String>, value: impl Into<Value>) -> Condition {
    Condition {
        field: field.into(),
        op: Operator::Ge,
        value: value.into(),
    }
}

pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Condition {
    Condition {
        field: field.into(),
        op: Operator::Lt,
        value: value.into(),
    }
}

pub fn le(field: impl Into<String>, value: impl Into<Value>) -> Condition {
    Condition {
        field: field.into(),
        op: Operator::Le,
        value: value.into(),
    }
}

pub fn in_list<V: Into<Value>>(field: impl Into<String>, values: Vec<V>) -> Condition {
    Condition {
        field: field.into(),
        op: Operator::In,
        value: Value::List(values.into_iter().map(Into::into).collect()),
    }
}

pub fn not_in<V: Into<Value>>(field: impl Into<String>, values: Vec<V>) -> Condition {
    Condition {
        field: field.into(),
        op: Operator::NotIn,
        value: Value::List(values.into_iter().map(Into::into).collect()),
    }
}

pub fn between(
    field: impl Into<String>,
    from: impl Into<Value>,
    to: impl Into<Value>,
) -> Condition {
    Condition {
        field: field.into(),
        op: Operator::Between,
        value: Value::Range(Box::new(from.into()), Box::new(to.into())),
    }
}

pub fn prefix(field: impl Into<String>, value: impl Into<String>) -> Condition {
    Condition {
        field: field.into(),
        op: Operator::Prefix,
        value: Value::Text(value.into()),
    }
}

pub fn suffix(field: impl Into<String>, value: impl Into<String>) -> Condition {
    Condition {
        field: field.into(),
        op: Operator::Suffix,
        value: Value::Text(value.into()),
    }
}

pub fn contains(field: impl Into<String>, value: impl Into<String>) -> Condition {
    Condition {
        field: field.into(),
        op: Operator::Contains,
        value: Value::Text(value.into()),
    }
}

pub fn like(field: impl Into<String>, pattern: impl Into<String>) -> Condition {
    Condition {
        field: field.into(),
        op: Operator::Like,
        value: Value::Text(pattern.into()),
    }
}

pub fn ilike(field: impl Into<String>, pattern: impl Into<String>) -> Condition {
    Condition {
        field: field.into(),
        op: Operator::ILike,
        value: Value::Text(pattern.into()),
    }
}

pub fn regex(field: impl Into<String>, pattern: impl Into<String>) -> Condition {
    Condition {
        field: field.into(),
        op: Operator::Regex,
        value: Value::Text(pattern.into()),
    }
}

pub fn is_null(field: impl Into<String>) -> Condition {
    Condition {
        field: field.into(),
        op: Operator::IsNull,
        value: Value::Null,
    }
}

pub fn not_null(field: impl Into<String>) -> Condition {
    Condition {
        field: field.into(),
        op: Operator::NotNull,
        value: Value::Null,
    }
}

// Tree and order constructors.

pub fn and(children: Vec<Node>) -> Node {
    Node::And(children)
}

pub fn or(children: Vec<Node>) -> Node {
    Node::Or(children)
}

pub fn order_asc(field: impl Into<String>) -> Order {
    Order {
        field: field.into(),
        direction: Direction::Asc,
    }
}

pub fn order_desc(field: impl Into<String>) -> Order {
    Order {
        field: field.into(),
        direction: Direction::Desc,
    }
}
