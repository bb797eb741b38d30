/// End-to-end repository, transaction and pagination behavior on an
/// in-memory SQLite service.
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use strata::entity::{text_column, timestamp_column};
use strata::sql::{self, SqlCompiler, SqlRepository, SqlService};
use strata::{
    query, Context, Entity, Insert, Mutation, RetryPolicy, StoreConfig, StoreError, StoreResult,
    TxOptions, Value,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Task {
    id: String,
    title: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Task {
    fn new(id: &str, title: &str) -> Self {
        let epoch = DateTime::<Utc>::from_timestamp(0, 0).unwrap();
        Self {
            id: id.to_string(),
            title: title.to_string(),
            status: "open".to_string(),
            created_at: epoch,
            updated_at: epoch,
        }
    }
}

impl Entity for Task {
    fn entity_name() -> &'static str {
        "task"
    }

    fn table_name() -> &'static str {
        "tasks"
    }

    fn field_names() -> &'static [&'static str] {
        &["id", "title", "status", "created_at", "updated_at"]
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn set_created_at(&mut self, at: DateTime<Utc>) {
        self.created_at = at;
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn set_updated_at(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }

    fn to_values(&self) -> BTreeMap<String, Value> {
        let mut values = BTreeMap::new();
        values.insert("id".to_string(), Value::Text(self.id.clone()));
        values.insert("title".to_string(), Value::Text(self.title.clone()));
        values.insert("status".to_string(), Value::Text(self.status.clone()));
        values.insert(
            "created_at".to_string(),
            Value::Timestamp(self.created_at),
        );
        values.insert(
            "updated_at".to_string(),
            Value::Timestamp(self.updated_at),
        );
        values
    }

    fn from_row(row: &sqlx::any::AnyRow) -> StoreResult<Self> {
        Ok(Self {
            id: text_column(row, "id")?,
            title: text_column(row, "title")?,
            status: text_column(row, "status")?,
            created_at: timestamp_column(row, "created_at")?,
            updated_at: timestamp_column(row, "updated_at")?,
        })
    }
}

async fn service() -> SqlService {
    let service = sql::open_with_name("sqlite", StoreConfig::sqlite(":memory:"))
        .await
        .unwrap();
    service
        .execute_sql(
            &Context::background(),
            "CREATE TABLE tasks (\n\
             \tid TEXT PRIMARY KEY,\n\
             \ttitle TEXT NOT NULL,\n\
             \tstatus TEXT NOT NULL,\n\
             \tcreated_at TEXT NOT NULL,\n\
             \tupdated_at TEXT NOT NULL\n\
             )",
        )
        .await
        .unwrap();
    service
}

async fn seeded_repo(count: usize) -> (SqlService, SqlRepository<Task>) {
    let service = service().await;
    let repo = service.repository::<Task>();
    let ctx = Context::background();
    for i in 1..=count {
        let mut task = Task::new(&format!("i{i}"), &format!("task {i}"));
        repo.create(&ctx, &mut task).await.unwrap();
        // Keep created_at strictly increasing across rows.
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    (service, repo)
}

#[tokio::test]
async fn create_and_get_round_trip() {
    let service = service().await;
    let repo = service.repository::<Task>();
    let ctx = Context::background();

    let mut task = Task::new("t1", "write tests");
    repo.create(&ctx, &mut task).await.unwrap();
    assert!(task.created_at.timestamp() > 0);
    assert_eq!(task.created_at, task.updated_at);

    let loaded = repo.get(&ctx, "t1").await.unwrap();
    assert_eq!(loaded.id, "t1");
    assert_eq!(loaded.title, "write tests");
    assert_eq!(loaded.status, "open");
}

#[tokio::test]
async fn duplicate_create_is_a_unique_violation() {
    let service = service().await;
    let repo = service.repository::<Task>();
    let ctx = Context::background();

    repo.create(&ctx, &mut Task::new("t1", "first")).await.unwrap();
    let err = repo
        .create(&ctx, &mut Task::new("t1", "second"))
        .await
        .unwrap_err();
    assert!(err.is_unique_violation(), "got: {err}");
}

#[tokio::test]
async fn empty_id_is_a_validation_error() {
    let service = service().await;
    let repo = service.repository::<Task>();
    let ctx = Context::background();

    let err = repo.create(&ctx, &mut Task::new("", "no id")).await.unwrap_err();
    assert!(err.is_validation_error());
    assert!(err.to_string().contains("entity ID cannot be empty"));
}

#[tokio::test]
async fn update_refreshes_only_updated_at() {
    let service = service().await;
    let repo = service.repository::<Task>();
    let ctx = Context::background();

    let mut task = Task::new("t1", "original");
    repo.create(&ctx, &mut task).await.unwrap();
    let created_at = repo.get(&ctx, "t1").await.unwrap().created_at;

    tokio::time::sleep(Duration::from_millis(5)).await;
    task.title = "renamed".to_string();
    repo.update(&ctx, &mut task).await.unwrap();

    let loaded = repo.get(&ctx, "t1").await.unwrap();
    assert_eq!(loaded.title, "renamed");
    assert_eq!(loaded.created_at, created_at);
    assert!(loaded.updated_at > loaded.created_at);
}

#[tokio::test]
async fn missing_rows_surface_record_not_found() {
    let service = service().await;
    let repo = service.repository::<Task>();
    let ctx = Context::background();

    assert!(repo.get(&ctx, "ghost").await.unwrap_err().is_record_not_found());
    assert!(repo.delete(&ctx, "ghost").await.unwrap_err().is_record_not_found());
    let err = repo.update(&ctx, &mut Task::new("ghost", "x")).await.unwrap_err();
    assert!(err.is_record_not_found());
    assert!(!repo.exists(&ctx, "ghost").await.unwrap());
}

#[tokio::test]
async fn delete_removes_the_row() {
    let service = service().await;
    let repo = service.repository::<Task>();
    let ctx = Context::background();

    repo.create(&ctx, &mut Task::new("t1", "doomed")).await.unwrap();
    repo.delete(&ctx, "t1").await.unwrap();
    assert!(!repo.exists(&ctx, "t1").await.unwrap());
}

#[tokio::test]
async fn get_batch_returns_found_subset() {
    let (_service, repo) = seeded_repo(3).await;
    let ctx = Context::background();

    let ids: Vec<String> = vec!["i1".into(), "i3".into(), "missing".into()];
    let batch = repo.get_batch(&ctx, &ids).await.unwrap();
    assert_eq!(batch.len(), 2);
    assert!(batch.contains_key("i1"));
    assert!(batch.contains_key("i3"));
}

#[tokio::test]
async fn find_and_count_with_conditions() {
    let service = service().await;
    let repo = service.repository::<Task>();
    let ctx = Context::background();

    for (id, status) in [("a", "open"), ("b", "done"), ("c", "open")] {
        let mut task = Task::new(id, id);
        task.status = status.to_string();
        repo.create(&ctx, &mut task).await.unwrap();
    }

    let open = repo
        .find_where(&ctx, vec![query::eq("status", "open")])
        .await
        .unwrap();
    assert_eq!(open.len(), 2);

    assert_eq!(
        repo.count_where(&ctx, vec![query::eq("status", "done")])
            .await
            .unwrap(),
        1
    );
    assert_eq!(repo.count(&ctx).await.unwrap(), 3);

    // An empty IN list matches nothing.
    let empty: Vec<String> = Vec::new();
    assert_eq!(
        repo.count_where(&ctx, vec![query::in_list("id", empty)])
            .await
            .unwrap(),
        0
    );

    let first = repo
        .find_first(&ctx, vec![query::eq("status", "done")])
        .await
        .unwrap();
    assert_eq!(first.unwrap().id, "b");
    let none = repo
        .find_first(&ctx, vec![query::eq("status", "archived")])
        .await
        .unwrap();
    assert!(none.is_none());
}

#[tokio::test]
async fn keyset_pagination_walks_every_row_once() {
    let (_service, repo) = seeded_repo(5).await;
    let ctx = Context::background();

    let page1 = repo.list(&ctx, 2, "", &[]).await.unwrap();
    assert_eq!(ids_of(&page1.items), vec!["i1", "i2"]);
    assert!(page1.has_more);
    assert_eq!(page1.total_count, 5);
    assert!(page1.prev_cursor.is_empty());

    let decoded = strata::Paginator::new()
        .decode(&page1.next_cursor)
        .unwrap()
        .unwrap();
    assert_eq!(decoded.last_id, "i2");

    let page2 = repo.list(&ctx, 2, &page1.next_cursor, &[]).await.unwrap();
    assert_eq!(ids_of(&page2.items), vec!["i3", "i4"]);
    assert!(page2.has_more);
    assert_eq!(page2.total_count, -1);
    assert!(!page2.prev_cursor.is_empty());

    let page3 = repo.list(&ctx, 2, &page2.next_cursor, &[]).await.unwrap();
    assert_eq!(ids_of(&page3.items), vec!["i5"]);
    assert!(!page3.has_more);
    assert!(page3.next_cursor.is_empty());
}

#[tokio::test]
async fn invalid_cursor_is_a_typed_error_not_first_page() {
    let (_service, repo) = seeded_repo(2).await;
    let ctx = Context::background();

    let err = repo.list(&ctx, 2, "!!!not-a-cursor!!!", &[]).await.unwrap_err();
    assert!(err.is_validation_error());
}

fn ids_of(items: &[Task]) -> Vec<String> {
    items.iter().map(|t| t.id.clone()).collect()
}

#[tokio::test]
async fn rollback_on_error_leaves_no_rows() {
    let service = service().await;
    let repo = service.repository::<Task>();
    let tm = service.transaction_manager();
    let ctx = Context::background();

    let result: StoreResult<()> = tm
        .with_tx(&ctx, |tx_ctx| {
            let repo = &repo;
            async move {
                let mut task = Task::new("doomed", "never committed");
                repo.create(&tx_ctx, &mut task).await?;
                Err(StoreError::validation("abort on purpose"))
            }
        })
        .await;

    assert!(result.is_err());
    assert_eq!(repo.count(&ctx).await.unwrap(), 0);
}

#[tokio::test]
async fn nested_with_tx_joins_the_outer_transaction() {
    let service = service().await;
    let repo = service.repository::<Task>();
    let tm = service.transaction_manager();
    let ctx = Context::background();

    // The pool holds a single connection: if the nested calls tried to
    // BEGIN again this would deadlock instead of committing.
    tm.with_tx(&ctx, |tx_ctx| {
        let repo = &repo;
        let tm = &tm;
        async move {
            assert!(tx_ctx.has_tx());
            repo.create(&tx_ctx, &mut Task::new("outer", "outer")).await?;
            tm.with_tx(&tx_ctx, |inner_ctx| {
                let repo = &repo;
                async move {
                    assert!(inner_ctx.has_tx());
                    repo.create(&inner_ctx, &mut Task::new("inner", "inner")).await
                }
            })
            .await
        }
    })
    .await
    .unwrap();

    assert_eq!(repo.count(&ctx).await.unwrap(), 2);
}

#[tokio::test]
async fn nested_rollback_discards_both_writes() {
    let service = service().await;
    let repo = service.repository::<Task>();
    let tm = service.transaction_manager();
    let ctx = Context::background();

    let result: StoreResult<()> = tm
        .with_tx(&ctx, |tx_ctx| {
            let repo = &repo;
            let tm = &tm;
            async move {
                repo.create(&tx_ctx, &mut Task::new("outer", "outer")).await?;
                tm.with_tx(&tx_ctx, |inner_ctx| {
                    let repo = &repo;
                    async move {
                        repo.create(&inner_ctx, &mut Task::new("inner", "inner")).await
                    }
                })
                .await?;
                Err(StoreError::validation("abort after nested work"))
            }
        })
        .await;

    assert!(result.is_err());
    assert_eq!(repo.count(&ctx).await.unwrap(), 0);
}

#[tokio::test]
async fn retry_recovers_from_a_transient_deadlock() {
    let service = service().await;
    let repo = service.repository::<Task>();
    let tm = service.transaction_manager();
    let ctx = Context::background();

    let attempts = Arc::new(AtomicU32::new(0));
    let opts = TxOptions {
        retry: Some(RetryPolicy {
            max_retries: 3,
            initial_delay: Duration::from_millis(10),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(1),
        }),
        ..TxOptions::default()
    };

    let started = tokio::time::Instant::now();
    tm.with_tx_options(&ctx, opts, |tx_ctx| {
        let repo = &repo;
        let attempts = Arc::clone(&attempts);
        async move {
            if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(StoreError::transaction_with(
                    "exec",
                    std::io::Error::other("deadlock detected"),
                ));
            }
            repo.create(&tx_ctx, &mut Task::new("retried", "made it")).await
        }
    })
    .await
    .unwrap();

    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert!(started.elapsed() >= Duration::from_millis(10));
    assert!(repo.exists(&ctx, "retried").await.unwrap());
}

#[tokio::test]
async fn non_retryable_errors_fail_immediately() {
    let service = service().await;
    let tm = service.transaction_manager();
    let ctx = Context::background();

    let attempts = Arc::new(AtomicU32::new(0));
    let opts = TxOptions {
        retry: Some(RetryPolicy::default()),
        ..TxOptions::default()
    };

    let result: StoreResult<()> = tm
        .with_tx_options(&ctx, opts, |_tx_ctx| {
            let attempts = Arc::clone(&attempts);
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(StoreError::validation("bad input, retrying will not help"))
            }
        })
        .await;

    assert!(result.unwrap_err().is_validation_error());
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn savepoint_rolls_back_partial_work() {
    let service = service().await;
    let repo = service.repository::<Task>();
    let tm = service.transaction_manager();
    let ctx = Context::background();

    tm.with_tx(&ctx, |tx_ctx| {
        let repo = &repo;
        let tm = &tm;
        async move {
            repo.create(&tx_ctx, &mut Task::new("kept", "kept")).await?;

            tm.savepoint(&tx_ctx, "before_risky").await?;
            repo.create(&tx_ctx, &mut Task::new("discarded", "discarded")).await?;
            tm.rollback_to_savepoint(&tx_ctx, "before_risky").await?;

            Ok(())
        }
    })
    .await
    .unwrap();

    assert!(repo.exists(&ctx, "kept").await.unwrap());
    assert!(!repo.exists(&ctx, "discarded").await.unwrap());
}

#[tokio::test]
async fn savepoint_without_transaction_fails() {
    let service = service().await;
    let tm = service.transaction_manager();
    let ctx = Context::background();

    let err = tm.savepoint(&ctx, "sp").await.unwrap_err();
    match err {
        StoreError::Transaction { op, .. } => assert_eq!(op, "savepoint_no_tx"),
        other => panic!("expected transaction error, got {other}"),
    }
}

#[tokio::test]
async fn transaction_timeout_rolls_back() {
    let service = service().await;
    let repo = service.repository::<Task>();
    let tm = service.transaction_manager();
    let ctx = Context::background();

    let opts = TxOptions {
        timeout: Some(Duration::from_millis(20)),
        ..TxOptions::default()
    };
    let result: StoreResult<()> = tm
        .with_tx_options(&ctx, opts, |tx_ctx| {
            let repo = &repo;
            async move {
                repo.create(&tx_ctx, &mut Task::new("slow", "slow")).await?;
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(())
            }
        })
        .await;

    assert!(result.unwrap_err().is_transaction_error());
    assert_eq!(repo.count(&ctx).await.unwrap(), 0);
}

#[tokio::test]
async fn update_timestamp_touches_the_row() {
    let service = service().await;
    let repo = service.repository::<Task>();
    let ctx = Context::background();

    let mut task = Task::new("t1", "touched");
    repo.create(&ctx, &mut task).await.unwrap();
    let before = repo.get(&ctx, "t1").await.unwrap();

    tokio::time::sleep(Duration::from_millis(5)).await;
    repo.update_timestamp(&ctx, "t1").await.unwrap();

    let after = repo.get(&ctx, "t1").await.unwrap();
    assert!(after.updated_at > before.updated_at);
    assert_eq!(after.created_at, before.created_at);

    assert!(repo
        .update_timestamp(&ctx, "ghost")
        .await
        .unwrap_err()
        .is_record_not_found());
}

#[tokio::test]
async fn insert_returning_captures_rows() {
    let service = service().await;
    let ctx = Context::background();

    let adapter = service.adapter();
    let compiler = SqlCompiler::new(Task::table_name(), adapter.dialect());

    let mut task = Task::new("r1", "returned");
    task.created_at = Utc::now();
    task.updated_at = task.created_at;

    let m: Mutation = Insert::new(task.to_values())
        .with_returning(&["id", "title"])
        .into();
    let stmt = compiler.compile_mutation(&m, adapter.as_ref()).unwrap();

    let result = service
        .executor()
        .execute(&ctx, "create", Task::table_name(), &stmt)
        .await
        .unwrap();

    assert_eq!(result.rows_affected, 1);
    assert!(result.last_insert_id.is_none());
    assert_eq!(result.returning.len(), 1);
    assert_eq!(result.returning[0]["id"], Value::Text("r1".into()));
    assert_eq!(result.returning[0]["title"], Value::Text("returned".into()));
}

#[tokio::test]
async fn health_check_passes_on_live_service() {
    let (_service, repo) = seeded_repo(1).await;
    repo.health_check(&Context::background()).await.unwrap();
}

#[tokio::test]
async fn get_with_column_projection() {
    let (_service, repo) = seeded_repo(1).await;
    let ctx = Context::background();

    let loaded = repo
        .get_with_columns(&ctx, "i1", &["id", "title", "status", "created_at", "updated_at"])
        .await
        .unwrap();
    assert_eq!(loaded.id, "i1");
}
