/// Transaction orchestration.
///
/// Transactions ride on the context: the first `with_tx` in a call tree
/// begins one and wraps the context with its handle, nested calls see the
/// handle and join (a single BEGIN/COMMIT pair at the outermost boundary).
/// On any error or unwind the transaction is rolled back — either
/// explicitly here, or by sqlx's rollback-on-drop when the slot is
/// abandoned mid-flight.
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use sqlx::AnyPool;
use tracing::warn;

use crate::context::{Context, IsolationLevel, TxInfo, TxOptions, TxSlot};
use crate::error::{StoreError, StoreResult};
use crate::sql::adapter::SqlAdapter;

/// Message classes that justify a retry when the adapter cannot supply a
/// stable code.
const RETRYABLE_PATTERNS: &[&str] = &[
    "serialization failure",
    "deadlock",
    "lock wait timeout",
    "could not serialize",
];

/// Runs closures inside driver transactions with join, retry, timeout and
/// savepoint support.
#[derive(Clone)]
pub struct TransactionManager {
    pool: AnyPool,
    adapter: Arc<dyn SqlAdapter>,
}

impl TransactionManager {
    pub fn new(pool: AnyPool, adapter: Arc<dyn SqlAdapter>) -> Self {
        Self { pool, adapter }
    }

    /// Execute `f` in a read-write transaction.
    pub async fn with_tx<T, F, Fut>(&self, ctx: &Context, f: F) -> StoreResult<T>
    where
        F: Fn(Context) -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        self.with_tx_options(ctx, TxOptions::default(), f).await
    }

    /// Execute `f` in a read-only transaction.
    pub async fn with_read_tx<T, F, Fut>(&self, ctx: &Context, f: F) -> StoreResult<T>
    where
        F: Fn(Context) -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        self.with_tx_options(ctx, TxOptions::read_only(), f).await
    }

    /// Execute `f` in a transaction with explicit options. A context that
    /// already carries a transaction joins it — options are not re-applied
    /// to the enclosing transaction.
    pub async fn with_tx_options<T, F, Fut>(
        &self,
        ctx: &Context,
        opts: TxOptions,
        f: F,
    ) -> StoreResult<T>
    where
        F: Fn(Context) -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        if ctx.has_tx() {
            return f(ctx.clone()).await;
        }

        let merged = self.merge_options(opts);
        if merged.retry.is_some() {
            self.with_retry(ctx, &merged, &f).await
        } else {
            self.execute_tx(ctx, &merged, &f).await
        }
    }

    pub fn has_tx(&self, ctx: &Context) -> bool {
        ctx.has_tx()
    }

    pub fn is_tx_read_only(&self, ctx: &Context) -> bool {
        ctx.is_tx_read_only()
    }

    /// Create a named savepoint inside the active transaction. The name is
    /// emitted verbatim; callers own identifier safety.
    pub async fn savepoint(&self, ctx: &Context, name: &str) -> StoreResult<()> {
        self.exec_on_tx(ctx, &format!("SAVEPOINT {name}"), "savepoint", "savepoint_no_tx")
            .await
    }

    pub async fn rollback_to_savepoint(&self, ctx: &Context, name: &str) -> StoreResult<()> {
        self.exec_on_tx(
            ctx,
            &format!("ROLLBACK TO SAVEPOINT {name}"),
            "rollback_savepoint",
            "rollback_savepoint_no_tx",
        )
        .await
    }

    pub async fn release_savepoint(&self, ctx: &Context, name: &str) -> StoreResult<()> {
        self.exec_on_tx(
            ctx,
            &format!("RELEASE SAVEPOINT {name}"),
            "release_savepoint",
            "release_savepoint_no_tx",
        )
        .await
    }

    /// Adapter defaults overridden by whatever the caller set explicitly.
    fn merge_options(&self, explicit: TxOptions) -> TxOptions {
        let defaults = self.adapter.default_tx_options();
        TxOptions {
            read_only: explicit.read_only || defaults.read_only,
            isolation: if explicit.isolation == IsolationLevel::Default {
                defaults.isolation
            } else {
                explicit.isolation
            },
            timeout: explicit.timeout.or(defaults.timeout),
            retry: explicit.retry.or(defaults.retry),
        }
    }

    async fn execute_tx<T, F, Fut>(
        &self,
        ctx: &Context,
        opts: &TxOptions,
        f: &F,
    ) -> StoreResult<T>
    where
        F: Fn(Context) -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        // Validate characteristics before paying for a BEGIN.
        let setup = self.adapter.tx_setup_sql(opts)?;

        let base = match opts.timeout {
            Some(timeout) => ctx.with_timeout(timeout),
            None => ctx.clone(),
        };

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::transaction_with("begin", e))?;

        for stmt in &setup {
            if let Err(e) = sqlx::query(stmt).execute(&mut *tx).await {
                let _ = tx.rollback().await;
                return Err(StoreError::transaction_with("setup", e));
            }
        }

        let info = TxInfo {
            read_only: opts.read_only,
            start_time: Utc::now(),
            options: opts.clone(),
        };
        let slot = TxSlot::new(tx);
        let child = base.with_tx(slot.clone(), info);

        // The timeout covers fn plus commit/rollback below; a child whose
        // deadline fires mid-flight drops the in-progress future and the
        // transaction is rolled back.
        let result = match child.remaining() {
            Some(remaining) => match tokio::time::timeout(remaining, f(child.clone())).await {
                Ok(result) => result,
                Err(_) => Err(StoreError::transaction("timeout")),
            },
            None => f(child.clone()).await,
        };

        match result {
            Ok(value) => {
                let tx = slot
                    .take()
                    .await
                    .ok_or_else(|| StoreError::transaction("commit_missing_tx"))?;
                tx.commit()
                    .await
                    .map_err(|e| StoreError::transaction_with("commit", e))?;
                Ok(value)
            }
            Err(err) => {
                if let Some(tx) = slot.take().await {
                    if let Err(rollback_err) = tx.rollback().await {
                        warn!(error = %rollback_err, "transaction rollback failed");
                    }
                }
                // Surface the original error, not a rollback wrapper.
                Err(err)
            }
        }
    }

    async fn with_retry<T, F, Fut>(
        &self,
        ctx: &Context,
        opts: &TxOptions,
        f: &F,
    ) -> StoreResult<T>
    where
        F: Fn(Context) -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let policy = opts.retry.clone().expect("retry policy present");
        let mut last_err: Option<StoreError> = None;

        for attempt in 0..=policy.max_retries {
            if attempt > 0 {
                let factor = policy.backoff_multiplier.powi(attempt as i32 - 1);
                let mut delay = policy.initial_delay.mul_f64(factor.max(0.0));
                if delay > policy.max_delay {
                    delay = policy.max_delay;
                }
                if let Some(remaining) = ctx.remaining() {
                    if remaining <= delay {
                        break;
                    }
                }
                tokio::time::sleep(delay).await;
            }

            match self.execute_tx(ctx, opts, f).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if !self.is_retryable(&err) {
                        return Err(err);
                    }
                    warn!(attempt, error = %err, "retrying transaction after retryable failure");
                    last_err = Some(err);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| StoreError::transaction("retries_exhausted")))
    }

    /// Retryable when the adapter classifier says so, or when a
    /// transaction error's cause chain matches the known conflict classes.
    fn is_retryable(&self, err: &StoreError) -> bool {
        self.adapter.is_retryable(err)
            || (err.is_transaction_error() && err.chain_contains(RETRYABLE_PATTERNS))
    }

    async fn exec_on_tx(
        &self,
        ctx: &Context,
        sql: &str,
        op: &str,
        no_tx_op: &str,
    ) -> StoreResult<()> {
        let slot = ctx
            .tx_slot()
            .ok_or_else(|| StoreError::transaction(no_tx_op))?;
        let mut guard = slot.lock().await;
        let tx = guard
            .as_mut()
            .ok_or_else(|| StoreError::transaction("tx_completed"))?;
        sqlx::query(sql)
            .execute(&mut **tx)
            .await
            .map_err(|e| StoreError::transaction_with(op, e))?;
        Ok(())
    }
}
