/// IR → parameterized SQL.
///
/// Placeholders are `$N`, 1-based, strictly increasing, never reused;
/// adapters that want a different dialect rewrite them afterwards.
/// Compilation is deterministic: column maps are sorted (`BTreeMap`), so
/// the same IR always yields the same SQL string and argument order.
use crate::error::{StoreError, StoreResult};
use crate::mutation::{Delete, Insert, Mutation, Update, Upsert};
use crate::query::{Condition, Direction, Node, Operator, Query, Value};
use crate::sql::adapter::{Dialect, SqlAdapter};

/// A compiled SQL statement with its arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledSql {
    pub sql: String,
    pub args: Vec<Value>,
    /// Whether the statement ends in a RETURNING clause. The executor
    /// routes flagged statements through the row-fetching path so the
    /// returned rows are captured, not discarded.
    pub returning: bool,
}

/// Compiles queries and mutations for one table.
#[derive(Debug, Clone)]
pub struct SqlCompiler {
    table: String,
    dialect: Dialect,
}

impl SqlCompiler {
    pub fn new(table: impl Into<String>, dialect: Dialect) -> Self {
        Self {
            table: table.into(),
            dialect,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Compile a SELECT from the query IR. `page` is resolved by the
    /// paginator before compilation; this only honors `limit`/`offset`.
    pub fn compile_query(&self, query: &Query) -> StoreResult<CompiledSql> {
        let mut sql = String::from("SELECT ");
        if query.select.is_empty() {
            sql.push('*');
        } else {
            sql.push_str(&query.select.join(", "));
        }
        sql.push_str(" FROM ");
        sql.push_str(&self.table);

        let mut args = Vec::new();
        let mut index = 1;

        if let Some(filter) = &query.filter {
            if let Some(clause) = self.compile_node(filter, &mut index, &mut args)? {
                sql.push_str(" WHERE ");
                sql.push_str(&clause);
            }
        }

        if !query.order.is_empty() {
            let orders: Vec<String> = query
                .order
                .iter()
                .map(|o| {
                    let dir = match o.direction {
                        Direction::Asc => "ASC",
                        Direction::Desc => "DESC",
                    };
                    format!("{} {}", o.field, dir)
                })
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&orders.join(", "));
        }

        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT ${index}"));
            args.push(Value::Int(limit));
            index += 1;
        }
        if let Some(offset) = query.offset {
            sql.push_str(&format!(" OFFSET ${index}"));
            args.push(Value::Int(offset));
        }

        Ok(CompiledSql {
            sql,
            args,
            returning: false,
        })
    }

    /// Compile the count form of a query: the select list becomes
    /// `COUNT(*)` and order/limit/offset are dropped.
    pub fn compile_count(&self, query: &Query) -> StoreResult<CompiledSql> {
        let mut sql = format!("SELECT COUNT(*) FROM {}", self.table);
        let mut args = Vec::new();
        let mut index = 1;

        if let Some(filter) = &query.filter {
            if let Some(clause) = self.compile_node(filter, &mut index, &mut args)? {
                sql.push_str(" WHERE ");
                sql.push_str(&clause);
            }
        }

        Ok(CompiledSql {
            sql,
            args,
            returning: false,
        })
    }

    /// Compile an existence probe: `SELECT 1 … LIMIT 1`.
    pub fn compile_exists(&self, query: &Query) -> StoreResult<CompiledSql> {
        let mut sql = format!("SELECT 1 FROM {}", self.table);
        let mut args = Vec::new();
        let mut index = 1;

        if let Some(filter) = &query.filter {
            if let Some(clause) = self.compile_node(filter, &mut index, &mut args)? {
                sql.push_str(" WHERE ");
                sql.push_str(&clause);
            }
        }
        sql.push_str(" LIMIT 1");

        Ok(CompiledSql {
            sql,
            args,
            returning: false,
        })
    }

    /// Compile a mutation, checking the adapter's capabilities for
    /// RETURNING and upsert support.
    pub fn compile_mutation(
        &self,
        mutation: &Mutation,
        adapter: &dyn SqlAdapter,
    ) -> StoreResult<CompiledSql> {
        match mutation {
            Mutation::Insert(m) => self.compile_insert(m, adapter),
            Mutation::Update(m) => self.compile_update(m, adapter),
            Mutation::Delete(m) => self.compile_delete(m, adapter),
            Mutation::Upsert(m) => self.compile_upsert(m, adapter),
        }
    }

    fn compile_insert(&self, m: &Insert, adapter: &dyn SqlAdapter) -> StoreResult<CompiledSql> {
        if m.values.is_empty() {
            return Err(StoreError::validation("insert has no values"));
        }

        let columns: Vec<&str> = m.values.keys().map(String::as_str).collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${i}")).collect();
        let args: Vec<Value> = m.values.values().cloned().collect();

        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.table,
            columns.join(", "),
            placeholders.join(", ")
        );
        let returning = self.append_returning(&mut sql, m.returning.as_deref(), adapter)?;

        Ok(CompiledSql {
            sql,
            args,
            returning,
        })
    }

    fn compile_update(&self, m: &Update, adapter: &dyn SqlAdapter) -> StoreResult<CompiledSql> {
        if m.set.is_empty() {
            return Err(StoreError::validation("update has no set values"));
        }

        let mut args = Vec::new();
        let mut index = 1;
        let mut parts = Vec::with_capacity(m.set.len());
        for (column, value) in &m.set {
            parts.push(format!("{column} = ${index}"));
            args.push(value.clone());
            index += 1;
        }

        let mut sql = format!("UPDATE {} SET {}", self.table, parts.join(", "));
        if let Some(filter) = &m.filter {
            if let Some(clause) = self.compile_node(filter, &mut index, &mut args)? {
                sql.push_str(" WHERE ");
                sql.push_str(&clause);
            }
        }
        let returning = self.append_returning(&mut sql, m.returning.as_deref(), adapter)?;

        Ok(CompiledSql {
            sql,
            args,
            returning,
        })
    }

    fn compile_delete(&self, m: &Delete, adapter: &dyn SqlAdapter) -> StoreResult<CompiledSql> {
        let mut sql = format!("DELETE FROM {}", self.table);
        let mut args = Vec::new();
        let mut index = 1;

        if let Some(filter) = &m.filter {
            if let Some(clause) = self.compile_node(filter, &mut index, &mut args)? {
                sql.push_str(" WHERE ");
                sql.push_str(&clause);
            }
        }
        let returning = self.append_returning(&mut sql, m.returning.as_deref(), adapter)?;

        Ok(CompiledSql {
            sql,
            args,
            returning,
        })
    }

    fn compile_upsert(&self, m: &Upsert, adapter: &dyn SqlAdapter) -> StoreResult<CompiledSql> {
        if !adapter.supports_upsert() {
            return Err(StoreError::NotSupported(format!(
                "upsert is not supported by the {} adapter",
                adapter.name()
            )));
        }
        if m.values.is_empty() {
            return Err(StoreError::validation("upsert has no values"));
        }

        let columns: Vec<&str> = m.values.keys().map(String::as_str).collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${i}")).collect();
        let mut args: Vec<Value> = m.values.values().cloned().collect();
        let mut index = args.len() + 1;

        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.table,
            columns.join(", "),
            placeholders.join(", ")
        );

        match self.dialect {
            Dialect::Postgres | Dialect::Sqlite => {
                if !m.conflict_columns.is_empty() {
                    sql.push_str(&format!(" ON CONFLICT ({})", m.conflict_columns.join(", ")));
                    if m.update_set.is_empty() {
                        sql.push_str(" DO NOTHING");
                    } else {
                        let mut parts = Vec::with_capacity(m.update_set.len());
                        for (column, value) in &m.update_set {
                            parts.push(format!("{column} = ${index}"));
                            args.push(value.clone());
                            index += 1;
                        }
                        sql.push_str(" DO UPDATE SET ");
                        sql.push_str(&parts.join(", "));
                    }
                }
            }
            Dialect::MySql => {
                if m.update_set.is_empty() {
                    // No-op update keyed on the first insert column.
                    let keep = columns[0];
                    sql.push_str(&format!(" ON DUPLICATE KEY UPDATE {keep} = {keep}"));
                } else {
                    let mut parts = Vec::with_capacity(m.update_set.len());
                    for (column, value) in &m.update_set {
                        parts.push(format!("{column} = ${index}"));
                        args.push(value.clone());
                        index += 1;
                    }
                    sql.push_str(" ON DUPLICATE KEY UPDATE ");
                    sql.push_str(&parts.join(", "));
                }
            }
        }

        let returning = self.append_returning(&mut sql, m.returning.as_deref(), adapter)?;
        Ok(CompiledSql {
            sql,
            args,
            returning,
        })
    }

    /// Append a RETURNING clause when requested and supported; the
    /// returned flag tells the executor to capture rows.
    fn append_returning(
        &self,
        sql: &mut String,
        returning: Option<&[String]>,
        adapter: &dyn SqlAdapter,
    ) -> StoreResult<bool> {
        let Some(columns) = returning else {
            return Ok(false);
        };
        if columns.is_empty() {
            return Ok(false);
        }
        if !adapter.supports_returning() {
            return Err(StoreError::NotSupported(format!(
                "RETURNING is not supported by the {} adapter",
                adapter.name()
            )));
        }
        sql.push_str(" RETURNING ");
        sql.push_str(&columns.join(", "));
        Ok(true)
    }

    /// Compile a filter node. Returns `None` when the node contributes no
    /// predicate (empty groups).
    pub(crate) fn compile_node(
        &self,
        node: &Node,
        index: &mut usize,
        args: &mut Vec<Value>,
    ) -> StoreResult<Option<String>> {
        match node {
            Node::Condition(cond) => self.compile_condition(cond, index, args).map(Some),
            Node::And(children) => self.compile_group(children, " AND ", index, args),
            Node::Or(children) => self.compile_group(children, " OR ", index, args),
        }
    }

    fn compile_group(
        &self,
        children: &[Node],
        joiner: &str,
        index: &mut usize,
        args: &mut Vec<Value>,
    ) -> StoreResult<Option<String>> {
        let mut parts = Vec::with_capacity(children.len());
        for child in children {
            if let Some(clause) = self.compile_node(child, index, args)? {
                parts.push(clause);
            }
        }
        if parts.is_empty() {
            return Ok(None);
        }
        Ok(Some(format!("({})", parts.join(joiner))))
    }

    fn compile_condition(
        &self,
        cond: &Condition,
        index: &mut usize,
        args: &mut Vec<Value>,
    ) -> StoreResult<String> {
        let field = &cond.field;

        let bind_scalar = |value: &Value, args: &mut Vec<Value>, index: &mut usize| {
            let clause = format!("${index}");
            args.push(value.clone());
            *index += 1;
            clause
        };

        match cond.op {
            Operator::Eq
            | Operator::Ne
            | Operator::Gt
            | Operator::Ge
            | Operator::Lt
            | Operator::Le => {
                if !cond.value.is_scalar() {
                    return Err(StoreError::validation_field(
                        field.clone(),
                        "comparison operators require a scalar value",
                    ));
                }
                let op = match cond.op {
                    Operator::Eq => "=",
                    Operator::Ne => "<>",
                    Operator::Gt => ">",
                    Operator::Ge => ">=",
                    Operator::Lt => "<",
                    _ => "<=",
                };
                let ph = bind_scalar(&cond.value, args, index);
                Ok(format!("{field} {op} {ph}"))
            }

            Operator::In | Operator::NotIn => {
                let Value::List(values) = &cond.value else {
                    return Err(StoreError::validation_field(
                        field.clone(),
                        "IN/NOT IN require a list value",
                    ));
                };
                // Empty lists match nothing; a constant-false predicate,
                // not an error.
                if values.is_empty() {
                    return Ok("1=0".to_string());
                }
                let mut placeholders = Vec::with_capacity(values.len());
                for value in values {
                    if !value.is_scalar() {
                        return Err(StoreError::validation_field(
                            field.clone(),
                            "list values must be scalars",
                        ));
                    }
                    placeholders.push(bind_scalar(value, args, index));
                }
                let keyword = if cond.op == Operator::In { "IN" } else { "NOT IN" };
                Ok(format!("{field} {keyword} ({})", placeholders.join(", ")))
            }

            Operator::Between => {
                let Value::Range(from, to) = &cond.value else {
                    return Err(StoreError::validation_field(
                        field.clone(),
                        "BETWEEN requires exactly two bounds",
                    ));
                };
                let lo = bind_scalar(from, args, index);
                let hi = bind_scalar(to, args, index);
                Ok(format!("{field} BETWEEN {lo} AND {hi}"))
            }

            Operator::Prefix | Operator::Suffix | Operator::Contains => {
                let Value::Text(text) = &cond.value else {
                    return Err(StoreError::validation_field(
                        field.clone(),
                        "string operators require a text value",
                    ));
                };
                let pattern = match cond.op {
                    Operator::Prefix => format!("{text}%"),
                    Operator::Suffix => format!("%{text}"),
                    _ => format!("%{text}%"),
                };
                let ph = bind_scalar(&Value::Text(pattern), args, index);
                Ok(format!("{field} LIKE {ph}"))
            }

            Operator::Like => {
                let ph = bind_scalar(&cond.value, args, index);
                Ok(format!("{field} LIKE {ph}"))
            }

            Operator::ILike => {
                let ph = bind_scalar(&cond.value, args, index);
                match self.dialect {
                    Dialect::Postgres => Ok(format!("{field} ILIKE {ph}")),
                    _ => Ok(format!("LOWER({field}) LIKE LOWER({ph})")),
                }
            }

            Operator::Regex => {
                let ph = bind_scalar(&cond.value, args, index);
                match self.dialect {
                    Dialect::Postgres => Ok(format!("{field} ~ {ph}")),
                    _ => Ok(format!("{field} REGEXP {ph}")),
                }
            }

            Operator::IsNull => Ok(format!("{field} IS NULL")),
            Operator::NotNull => Ok(format!("{field} IS NOT NULL")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutation;
    use crate::query::{self, Query};
    use crate::sql::mysql::MySqlAdapter;
    use crate::sql::postgres::PostgresAdapter;
    use crate::sql::sqlite::SqliteAdapter;
    use std::collections::BTreeMap;

    fn compiler() -> SqlCompiler {
        SqlCompiler::new("t", Dialect::Postgres)
    }

    fn values(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    /// Placeholders must be $1..$N, left to right, no gaps, no reuse.
    fn assert_placeholder_monotonicity(compiled: &CompiledSql) {
        let mut expected = 1;
        let bytes = compiled.sql.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'$' {
                let mut j = i + 1;
                while j < bytes.len() && bytes[j].is_ascii_digit() {
                    j += 1;
                }
                let n: usize = compiled.sql[i + 1..j].parse().unwrap();
                assert_eq!(n, expected, "placeholder out of order in {}", compiled.sql);
                expected += 1;
                i = j;
            } else {
                i += 1;
            }
        }
        assert_eq!(expected - 1, compiled.args.len(), "args/placeholder mismatch");
    }

    #[test]
    fn simple_query_compiles() {
        let q = Query::builder()
            .and_where(query::eq("status", "active"))
            .build();
        let compiled = compiler().compile_query(&q).unwrap();
        assert_eq!(compiled.sql, "SELECT * FROM t WHERE (status = $1)");
        assert_eq!(compiled.args, vec![Value::Text("active".into())]);
    }

    #[test]
    fn in_list_compiles_with_one_placeholder_per_value() {
        let q = Query::builder()
            .filter(query::in_list("k", vec![1i64, 2, 3]).into())
            .build();
        let compiled = compiler().compile_query(&q).unwrap();
        assert_eq!(compiled.sql, "SELECT * FROM t WHERE k IN ($1, $2, $3)");
        assert_eq!(
            compiled.args,
            vec![Value::Int(1), Value::Int(2), Value::Int(3)]
        );
    }

    #[test]
    fn empty_in_list_is_constant_false() {
        let empty: Vec<i64> = Vec::new();
        let q = Query::builder()
            .filter(query::in_list("k", empty).into())
            .build();
        let compiled = compiler().compile_query(&q).unwrap();
        assert_eq!(compiled.sql, "SELECT * FROM t WHERE 1=0");
        assert!(compiled.args.is_empty());
    }

    #[test]
    fn empty_not_in_list_is_constant_false() {
        let empty: Vec<i64> = Vec::new();
        let q = Query::builder()
            .filter(query::not_in("k", empty).into())
            .build();
        let compiled = compiler().compile_query(&q).unwrap();
        assert_eq!(compiled.sql, "SELECT * FROM t WHERE 1=0");
    }

    #[test]
    fn between_emits_two_placeholders_in_order() {
        let q = Query::builder()
            .filter(query::between("age", 18, 30).into())
            .build();
        let compiled = compiler().compile_query(&q).unwrap();
        assert_eq!(compiled.sql, "SELECT * FROM t WHERE age BETWEEN $1 AND $2");
        assert_eq!(compiled.args, vec![Value::Int(18), Value::Int(30)]);
    }

    #[test]
    fn string_operators_wrap_patterns() {
        let cases = [
            (query::prefix("name", "ab"), "name LIKE $1", "ab%"),
            (query::suffix("name", "ab"), "name LIKE $1", "%ab"),
            (query::contains("name", "ab"), "name LIKE $1", "%ab%"),
        ];
        for (cond, want_sql, want_arg) in cases {
            let q = Query::builder().filter(cond.into()).build();
            let compiled = compiler().compile_query(&q).unwrap();
            assert_eq!(compiled.sql, format!("SELECT * FROM t WHERE {want_sql}"));
            assert_eq!(compiled.args, vec![Value::Text(want_arg.into())]);
        }
    }

    #[test]
    fn null_operators_take_no_args() {
        let q = Query::builder()
            .filter(query::and(vec![
                query::is_null("deleted_at").into(),
                query::not_null("id").into(),
            ]))
            .build();
        let compiled = compiler().compile_query(&q).unwrap();
        assert_eq!(
            compiled.sql,
            "SELECT * FROM t WHERE (deleted_at IS NULL AND id IS NOT NULL)"
        );
        assert!(compiled.args.is_empty());
    }

    #[test]
    fn nested_groups_preserve_precedence() {
        let q = Query::builder()
            .filter(query::and(vec![
                query::eq("a", 1i64).into(),
                query::or(vec![
                    query::eq("b", 2i64).into(),
                    query::eq("c", 3i64).into(),
                ]),
            ]))
            .build();
        let compiled = compiler().compile_query(&q).unwrap();
        assert_eq!(
            compiled.sql,
            "SELECT * FROM t WHERE (a = $1 AND (b = $2 OR c = $3))"
        );
        assert_placeholder_monotonicity(&compiled);
    }

    #[test]
    fn empty_groups_are_omitted() {
        let q = Query::builder().filter(query::and(vec![])).build();
        let compiled = compiler().compile_query(&q).unwrap();
        assert_eq!(compiled.sql, "SELECT * FROM t");

        let q = Query::builder()
            .filter(query::and(vec![
                query::or(vec![]),
                query::eq("a", 1i64).into(),
            ]))
            .build();
        let compiled = compiler().compile_query(&q).unwrap();
        assert_eq!(compiled.sql, "SELECT * FROM t WHERE (a = $1)");
    }

    #[test]
    fn limit_and_offset_are_parameterized() {
        let q = Query::builder()
            .and_where(query::gt("age", 21i64))
            .limit(10)
            .offset(5)
            .build();
        let compiled = compiler().compile_query(&q).unwrap();
        assert_eq!(
            compiled.sql,
            "SELECT * FROM t WHERE (age > $1) LIMIT $2 OFFSET $3"
        );
        assert_eq!(
            compiled.args,
            vec![Value::Int(21), Value::Int(10), Value::Int(5)]
        );
        assert_placeholder_monotonicity(&compiled);
    }

    #[test]
    fn ilike_is_dialect_aware() {
        let q = Query::builder()
            .filter(query::ilike("name", "a%").into())
            .build();
        let pg = SqlCompiler::new("t", Dialect::Postgres)
            .compile_query(&q)
            .unwrap();
        assert_eq!(pg.sql, "SELECT * FROM t WHERE name ILIKE $1");
        let lite = SqlCompiler::new("t", Dialect::Sqlite)
            .compile_query(&q)
            .unwrap();
        assert_eq!(lite.sql, "SELECT * FROM t WHERE LOWER(name) LIKE LOWER($1)");
    }

    #[test]
    fn count_drops_order_and_limit() {
        let q = Query::builder()
            .and_where(query::eq("status", "active"))
            .order_by(query::order_asc("created_at"))
            .limit(10)
            .offset(20)
            .build();
        let compiled = compiler().compile_count(&q).unwrap();
        assert_eq!(compiled.sql, "SELECT COUNT(*) FROM t WHERE (status = $1)");
        assert_eq!(compiled.args.len(), 1);
    }

    #[test]
    fn update_compiles_in_sorted_column_order() {
        let m = mutation::update(
            values(&[("b", Value::Int(2)), ("a", Value::Int(1))]),
            Some(query::eq("id", "x").into()),
        );
        let compiled = compiler()
            .compile_mutation(&m.into(), &PostgresAdapter::new())
            .unwrap();
        assert_eq!(compiled.sql, "UPDATE t SET a = $1, b = $2 WHERE id = $3");
        assert_eq!(
            compiled.args,
            vec![Value::Int(1), Value::Int(2), Value::Text("x".into())]
        );
    }

    #[test]
    fn insert_is_deterministic_across_runs() {
        let m = mutation::insert(values(&[
            ("zeta", Value::Int(1)),
            ("alpha", Value::Int(2)),
            ("mid", Value::Int(3)),
        ]));
        let first = compiler()
            .compile_mutation(&m.clone().into(), &PostgresAdapter::new())
            .unwrap();
        let second = compiler()
            .compile_mutation(&m.into(), &PostgresAdapter::new())
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(
            first.sql,
            "INSERT INTO t (alpha, mid, zeta) VALUES ($1, $2, $3)"
        );
        assert_eq!(
            first.args,
            vec![Value::Int(2), Value::Int(3), Value::Int(1)]
        );
    }

    #[test]
    fn update_without_set_is_a_validation_error() {
        let m = mutation::update(BTreeMap::new(), None);
        let err = compiler()
            .compile_mutation(&m.into(), &PostgresAdapter::new())
            .unwrap_err();
        assert!(err.is_validation_error());
        assert!(err.to_string().contains("update has no set values"));
    }

    #[test]
    fn insert_returning_requires_capability() {
        let m = mutation::insert(values(&[("a", Value::Int(1))])).with_returning(&["id"]);

        let pg = compiler()
            .compile_mutation(&m.clone().into(), &PostgresAdapter::new())
            .unwrap();
        assert_eq!(pg.sql, "INSERT INTO t (a) VALUES ($1) RETURNING id");
        assert!(pg.returning);

        let err = SqlCompiler::new("t", Dialect::MySql)
            .compile_mutation(&m.into(), &MySqlAdapter::new())
            .unwrap_err();
        assert!(err.is_not_supported());
    }

    #[test]
    fn mutations_without_returning_are_not_flagged() {
        let m = mutation::insert(values(&[("a", Value::Int(1))]));
        let compiled = compiler()
            .compile_mutation(&m.into(), &PostgresAdapter::new())
            .unwrap();
        assert!(!compiled.returning);
    }

    #[test]
    fn delete_with_and_without_filter() {
        let bare = mutation::delete(None);
        let compiled = compiler()
            .compile_mutation(&bare.into(), &PostgresAdapter::new())
            .unwrap();
        assert_eq!(compiled.sql, "DELETE FROM t");

        let filtered = mutation::delete(Some(query::eq("id", "x").into()));
        let compiled = compiler()
            .compile_mutation(&filtered.into(), &PostgresAdapter::new())
            .unwrap();
        assert_eq!(compiled.sql, "DELETE FROM t WHERE id = $1");
    }

    #[test]
    fn upsert_compiles_do_update_and_do_nothing() {
        let m = mutation::upsert(
            values(&[("id", Value::Text("x".into())), ("n", Value::Int(1))]),
            vec!["id".to_string()],
            values(&[("n", Value::Int(2))]),
        );
        let compiled = compiler()
            .compile_mutation(&m.into(), &PostgresAdapter::new())
            .unwrap();
        assert_eq!(
            compiled.sql,
            "INSERT INTO t (id, n) VALUES ($1, $2) ON CONFLICT (id) DO UPDATE SET n = $3"
        );
        assert_placeholder_monotonicity(&compiled);

        let nothing = mutation::upsert(
            values(&[("id", Value::Text("x".into()))]),
            vec!["id".to_string()],
            BTreeMap::new(),
        );
        let compiled = compiler()
            .compile_mutation(&nothing.into(), &SqliteAdapter::new())
            .unwrap();
        assert_eq!(
            compiled.sql,
            "INSERT INTO t (id) VALUES ($1) ON CONFLICT (id) DO NOTHING"
        );
    }

    #[test]
    fn mysql_upsert_uses_on_duplicate_key() {
        let m = mutation::upsert(
            values(&[("id", Value::Text("x".into())), ("n", Value::Int(1))]),
            vec!["id".to_string()],
            values(&[("n", Value::Int(2))]),
        );
        let compiled = SqlCompiler::new("t", Dialect::MySql)
            .compile_mutation(&m.into(), &MySqlAdapter::new())
            .unwrap();
        assert_eq!(
            compiled.sql,
            "INSERT INTO t (id, n) VALUES ($1, $2) ON DUPLICATE KEY UPDATE n = $3"
        );
    }

    #[test]
    fn complex_tree_keeps_placeholders_monotone() {
        let q = Query::builder()
            .filter(query::and(vec![
                query::in_list("a", vec![1i64, 2]).into(),
                query::between("b", 3i64, 4i64).into(),
                query::or(vec![
                    query::prefix("c", "x").into(),
                    query::is_null("d").into(),
                    query::ne("e", 5i64).into(),
                ]),
            ]))
            .limit(7)
            .build();
        let compiled = compiler().compile_query(&q).unwrap();
        assert_placeholder_monotonicity(&compiled);
        assert_eq!(compiled.args.len(), 6);
    }
}
