/// Request-scoped context.
///
/// A `Context` travels with every operation and carries two things: an
/// optional deadline, and the active transaction handle plus its metadata.
/// Cloning is cheap; clones share the same transaction slot, which is how
/// nested `with_tx` calls join the enclosing transaction. There is no
/// implicit thread-local state — propagation is always explicit.
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::{Any, Transaction};
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Transaction isolation levels, mapped per adapter to driver-native levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Use the adapter's default level.
    #[default]
    Default,
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

/// Retry policy for transactions that fail with retryable classes
/// (serialization failure, deadlock, lock wait timeout).
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Additional attempts after the first failure.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(10),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(1),
        }
    }
}

/// Options for a transactional scope.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TxOptions {
    pub read_only: bool,
    pub isolation: IsolationLevel,
    /// Bounds the whole transaction including commit/rollback.
    pub timeout: Option<Duration>,
    pub retry: Option<RetryPolicy>,
}

impl TxOptions {
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Self::default()
        }
    }
}

/// Metadata about the transaction active on a context.
#[derive(Debug, Clone)]
pub struct TxInfo {
    pub read_only: bool,
    pub start_time: DateTime<Utc>,
    pub options: TxOptions,
}

/// Shared slot holding the driver transaction. The orchestrator takes the
/// transaction out of the slot to commit or roll back; if the slot is
/// dropped with the transaction still inside (panic paths), sqlx rolls it
/// back on drop.
#[derive(Clone)]
pub(crate) struct TxSlot {
    inner: Arc<Mutex<Option<Transaction<'static, Any>>>>,
}

impl TxSlot {
    pub(crate) fn new(tx: Transaction<'static, Any>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(tx))),
        }
    }

    pub(crate) async fn lock(
        &self,
    ) -> tokio::sync::MutexGuard<'_, Option<Transaction<'static, Any>>> {
        self.inner.lock().await
    }

    pub(crate) async fn take(&self) -> Option<Transaction<'static, Any>> {
        self.inner.lock().await.take()
    }
}

/// Request-scoped context: deadline plus transaction propagation.
#[derive(Clone, Default)]
pub struct Context {
    deadline: Option<Instant>,
    tx: Option<TxSlot>,
    tx_info: Option<Arc<TxInfo>>,
}

impl Context {
    /// A context with no deadline and no transaction.
    pub fn background() -> Self {
        Self::default()
    }

    /// Derive a context whose deadline is `timeout` from now. If the
    /// current deadline is earlier it is kept.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        };
        Self {
            deadline: Some(deadline),
            ..self.clone()
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Remaining time before the deadline; `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        matches!(self.remaining(), Some(d) if d.is_zero())
    }

    /// Whether a transaction is active on this context.
    pub fn has_tx(&self) -> bool {
        self.tx.is_some()
    }

    /// Metadata for the active transaction, if any.
    pub fn tx_info(&self) -> Option<&TxInfo> {
        self.tx_info.as_deref()
    }

    pub fn is_tx_read_only(&self) -> bool {
        self.tx_info().map(|info| info.read_only).unwrap_or(false)
    }

    pub(crate) fn with_tx(&self, slot: TxSlot, info: TxInfo) -> Self {
        Self {
            deadline: self.deadline,
            tx: Some(slot),
            tx_info: Some(Arc::new(info)),
        }
    }

    pub(crate) fn tx_slot(&self) -> Option<&TxSlot> {
        self.tx.as_ref()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("deadline", &self.deadline)
            .field("has_tx", &self.has_tx())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn timeout_keeps_earlier_deadline() {
        let ctx = Context::background().with_timeout(Duration::from_millis(10));
        let widened = ctx.with_timeout(Duration::from_secs(60));
        assert!(widened.remaining().unwrap() <= Duration::from_millis(10));
    }

    #[tokio::test]
    async fn background_context_is_unbounded() {
        let ctx = Context::background();
        assert!(ctx.remaining().is_none());
        assert!(!ctx.is_expired());
        assert!(!ctx.has_tx());
    }
}
