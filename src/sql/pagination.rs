/// Keyset pagination over SQL.
///
/// Rows are totally ordered by `(created_at, id)`; a cursor pins a position
/// in that order and pages are fetched with a keyset predicate instead of
/// OFFSET, so rows inserted mid-traversal can never surface twice.
use crate::context::Context;
use crate::entity::Entity;
use crate::error::StoreResult;
use crate::pagination::{Cursor, CursorResult, PaginationConfig, Paginator};
use crate::query::{self, Node, Order, Query, Value};
use crate::sql::compiler::SqlCompiler;
use crate::sql::executor::SqlExecutor;

/// Traversal direction relative to the cursor position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageDirection {
    Forward,
    Backward,
}

/// SQL-specific cursor paginator.
#[derive(Debug, Clone, Default)]
pub struct SqlPaginator {
    paginator: Paginator,
}

impl SqlPaginator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: PaginationConfig) -> Self {
        Self {
            paginator: Paginator::with_config(config),
        }
    }

    pub fn paginator(&self) -> &Paginator {
        &self.paginator
    }

    /// The keyset predicate for resuming after (or before) a cursor:
    /// `(created_at > C.ts) OR (created_at = C.ts AND id > C.id)`,
    /// mirrored for backward traversal.
    pub fn keyset_filter(cursor: &Cursor, direction: PageDirection) -> Node {
        let ts = Value::Timestamp(cursor.last_timestamp);
        let id = cursor.last_id.clone();
        match direction {
            PageDirection::Forward => query::or(vec![
                query::gt("created_at", ts.clone()).into(),
                query::and(vec![
                    query::eq("created_at", ts).into(),
                    query::gt("id", id).into(),
                ]),
            ]),
            PageDirection::Backward => query::or(vec![
                query::lt("created_at", ts.clone()).into(),
                query::and(vec![
                    query::eq("created_at", ts).into(),
                    query::lt("id", id).into(),
                ]),
            ]),
        }
    }

    /// Ordering matching the keyset predicate. Backward pages run with the
    /// inverted order and are reversed in memory afterwards to keep the
    /// ascending presentation.
    pub fn keyset_order(direction: PageDirection) -> Vec<Order> {
        match direction {
            PageDirection::Forward => vec![
                query::order_asc("created_at"),
                query::order_asc("id"),
            ],
            PageDirection::Backward => vec![
                query::order_desc("created_at"),
                query::order_desc("id"),
            ],
        }
    }

    /// Run a paginated query: decode the cursor, inject the keyset
    /// predicate and order, execute, and build navigation cursors. The
    /// total count is computed only on the first page (no incoming
    /// cursor); later pages report -1.
    pub async fn execute<E: Entity>(
        &self,
        ctx: &Context,
        executor: &SqlExecutor,
        compiler: &SqlCompiler,
        base: &Query,
        page_size: i32,
        cursor: &str,
        direction: PageDirection,
    ) -> StoreResult<CursorResult<E>> {
        let params = self.paginator.parse_params(page_size, cursor);
        let decoded = self.paginator.decode(&params.cursor)?;
        let had_cursor = decoded.is_some();

        let mut paged = base.clone();
        paged.page = None;
        paged.offset = None;
        paged.limit = Some(params.page_size as i64);
        paged.order = Self::keyset_order(direction);
        if let Some(cursor) = &decoded {
            let keyset = Self::keyset_filter(cursor, direction);
            paged.filter = match paged.filter.take() {
                Some(existing) => Some(query::and(vec![existing, keyset])),
                None => Some(keyset),
            };
        }

        let stmt = compiler.compile_query(&paged)?;
        let rows = executor
            .fetch_all(ctx, "list", compiler.table(), &stmt)
            .await?;
        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            items.push(E::from_row(row)?);
        }
        if direction == PageDirection::Backward {
            items.reverse();
        }

        let total_count = if had_cursor {
            -1
        } else {
            let count_stmt = compiler.compile_count(base)?;
            executor
                .fetch_count(ctx, "count", compiler.table(), &count_stmt)
                .await?
        };

        self.paginator.build_result(items, &params, had_cursor, total_count, |item| {
            (item.id().to_string(), item.created_at())
        })
    }
}
