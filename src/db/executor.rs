//! Transaction executor.
//!
//! Brackets a unit of work with `BEGIN` and `COMMIT`/`ROLLBACK` on a freshly
//! leased connection and releases that connection exactly once on every path.
//!
//! Four calling conventions share one core:
//!
//! | work signals its result by | awaited                | callback                        |
//! |----------------------------|------------------------|---------------------------------|
//! | resolving its future       | [`transact`]           | [`transact_callback`]           |
//! | invoking a [`CommitTrigger`] | [`transact_with_commit`] | [`transact_with_commit_callback`] |
//!
//! [`transact`]: TransactionExecutor::transact
//! [`transact_callback`]: TransactionExecutor::transact_callback
//! [`transact_with_commit`]: TransactionExecutor::transact_with_commit
//! [`transact_with_commit_callback`]: TransactionExecutor::transact_with_commit_callback
//!
//! No step is retried and work is never cancelled by the executor: a future
//! that never settles keeps its connection. Dropping the executor's future
//! instead (a timeout, a disconnected caller) drops the [`Client`], which rolls
//! the open transaction back and returns the connection.

use crate::db::client::Client;
use crate::db::driver::{Connection, Pool};
use crate::error::{DbError, DbResult};
use crate::models::{TransactionInfo, TransactionState};
use futures_util::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One-shot completion handle passed to work in the commit-trigger forms.
///
/// Clones share the same slot: the first `commit` across all clones decides
/// the outcome and every later call is ignored. Dropping every clone without
/// calling `commit` fails the transaction with [`DbError::CommitTriggerDropped`].
pub struct CommitTrigger<T> {
    sender: Arc<Mutex<Option<oneshot::Sender<DbResult<T>>>>>,
}

impl<T> Clone for CommitTrigger<T> {
    fn clone(&self) -> Self {
        Self {
            sender: Arc::clone(&self.sender),
        }
    }
}

impl<T> std::fmt::Debug for CommitTrigger<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitTrigger")
            .field("invoked", &self.is_invoked())
            .finish()
    }
}

impl<T> CommitTrigger<T> {
    fn channel() -> (Self, oneshot::Receiver<DbResult<T>>) {
        let (sender, receiver) = oneshot::channel();
        let trigger = Self {
            sender: Arc::new(Mutex::new(Some(sender))),
        };
        (trigger, receiver)
    }

    /// Signal the outcome of the work. Returns `false` if the outcome was
    /// already decided.
    pub fn commit(&self, result: DbResult<T>) -> bool {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match sender {
            Some(sender) => sender.send(result).is_ok(),
            None => {
                debug!("Commit trigger already invoked; ignoring");
                false
            }
        }
    }

    /// Shorthand for `commit(Ok(value))`.
    pub fn succeed(&self, value: T) -> bool {
        self.commit(Ok(value))
    }

    /// Shorthand for `commit(Err(error))`.
    pub fn fail(&self, error: DbError) -> bool {
        self.commit(Err(error))
    }

    pub fn is_invoked(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

/// Runs units of work inside transactions on connections from `P`.
#[derive(Debug, Clone)]
pub struct TransactionExecutor<P> {
    pool: P,
    database: Option<Arc<str>>,
}

impl<P: Pool> TransactionExecutor<P> {
    /// `database` is the registry name, used for logging only.
    pub fn new(pool: P, database: Option<&str>) -> Self {
        Self {
            pool,
            database: database.map(Arc::from),
        }
    }

    pub fn pool(&self) -> &P {
        &self.pool
    }

    /// Run `work` in a transaction; its future's output decides commit or rollback.
    ///
    /// A work error is returned unchanged after rollback. A panic inside work
    /// is treated as a work failure.
    pub async fn transact<T, F, Fut>(&self, work: F) -> DbResult<T>
    where
        F: FnOnce(Client<P::Connection>) -> Fut + Send,
        Fut: Future<Output = DbResult<T>> + Send,
        T: Send,
    {
        self.execute(work).await
    }

    /// Run `work` in a transaction; the outcome is whatever is first passed to
    /// the [`CommitTrigger`].
    ///
    /// The future returned by `work` still matters: if it fails before the
    /// trigger is invoked, that failure decides. If it succeeds, the executor
    /// waits for the trigger.
    pub async fn transact_with_commit<T, F, Fut>(&self, work: F) -> DbResult<T>
    where
        F: FnOnce(Client<P::Connection>, CommitTrigger<T>) -> Fut + Send,
        Fut: Future<Output = DbResult<()>> + Send,
        T: Send,
    {
        self.execute(move |client| async move {
            let (trigger, mut receiver) = CommitTrigger::channel();
            let returned = work(client, trigger).await;
            match receiver.try_recv() {
                Ok(outcome) => outcome,
                Err(_) => match returned {
                    Err(error) => Err(error),
                    Ok(()) => receiver
                        .await
                        .unwrap_or(Err(DbError::CommitTriggerDropped)),
                },
            }
        })
        .await
    }

    /// Callback form of [`transact`](Self::transact). Runs on a spawned task and
    /// calls `on_done` exactly once.
    pub fn transact_callback<T, F, Fut, D>(&self, work: F, on_done: D) -> JoinHandle<()>
    where
        F: FnOnce(Client<P::Connection>) -> Fut + Send + 'static,
        Fut: Future<Output = DbResult<T>> + Send + 'static,
        T: Send + 'static,
        D: FnOnce(DbResult<T>) + Send + 'static,
    {
        let executor = self.clone();
        tokio::spawn(async move { on_done(executor.transact(work).await) })
    }

    /// Callback form of [`transact_with_commit`](Self::transact_with_commit).
    pub fn transact_with_commit_callback<T, F, Fut, D>(
        &self,
        work: F,
        on_done: D,
    ) -> JoinHandle<()>
    where
        F: FnOnce(Client<P::Connection>, CommitTrigger<T>) -> Fut + Send + 'static,
        Fut: Future<Output = DbResult<()>> + Send + 'static,
        T: Send + 'static,
        D: FnOnce(DbResult<T>) + Send + 'static,
    {
        let executor = self.clone();
        tokio::spawn(async move { on_done(executor.transact_with_commit(work).await) })
    }

    async fn execute<T, F, Fut>(&self, work: F) -> DbResult<T>
    where
        F: FnOnce(Client<P::Connection>) -> Fut + Send,
        Fut: Future<Output = DbResult<T>> + Send,
        T: Send,
    {
        let mut tx = TransactionInfo::new(self.database.as_deref());
        advance(&mut tx, TransactionState::Acquiring);

        let connection = match self.pool.connect().await {
            Ok(connection) => connection,
            Err(error) => {
                advance(&mut tx, TransactionState::Released);
                warn!(
                    transaction_id = %tx.id,
                    database = %tx.database_name(),
                    error = %error,
                    "Could not acquire connection for transaction"
                );
                return Err(DbError::pool_acquisition(error));
            }
        };
        let client = Client::new(connection);

        if let Err(error) = client.begin().await {
            client.release().await;
            advance(&mut tx, TransactionState::Released);
            warn!(
                transaction_id = %tx.id,
                database = %tx.database_name(),
                error = %error,
                "BEGIN failed"
            );
            return Err(DbError::transaction_start(error));
        }
        advance(&mut tx, TransactionState::Began);
        advance(&mut tx, TransactionState::Running);

        let work_client = client.clone();
        let outcome = AssertUnwindSafe(async move { work(work_client).await })
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(DbError::work(panic_message(panic))));

        finish(&mut tx, &client, outcome).await
    }
}

/// Commit or roll back, then release. Shared by the awaited and callback forms.
async fn finish<C: Connection, T>(
    tx: &mut TransactionInfo,
    client: &Client<C>,
    outcome: DbResult<T>,
) -> DbResult<T> {
    match outcome {
        Ok(value) => {
            advance(tx, TransactionState::Committing);
            let committed = client.commit().await;
            client.release().await;
            advance(tx, TransactionState::Released);
            match committed {
                Ok(_) => {
                    info!(
                        transaction_id = %tx.id,
                        database = %tx.database_name(),
                        elapsed_ms = tx.elapsed_ms(),
                        "Transaction committed"
                    );
                    Ok(value)
                }
                Err(error) => {
                    warn!(
                        transaction_id = %tx.id,
                        database = %tx.database_name(),
                        error = %error,
                        "COMMIT failed; work result discarded"
                    );
                    Err(DbError::commit(error))
                }
            }
        }
        Err(error) => {
            advance(tx, TransactionState::RollingBack);
            if let Err(rollback_error) = client.rollback().await {
                // Never masks the original failure.
                warn!(
                    transaction_id = %tx.id,
                    error = %DbError::rollback(rollback_error),
                    "Rollback failed"
                );
            }
            client.release().await;
            advance(tx, TransactionState::Released);
            info!(
                transaction_id = %tx.id,
                database = %tx.database_name(),
                elapsed_ms = tx.elapsed_ms(),
                reason = %error,
                "Transaction rolled back"
            );
            Err(error)
        }
    }
}

fn advance(tx: &mut TransactionInfo, next: TransactionState) {
    debug_assert!(
        tx.state.can_transition_to(next),
        "invalid transaction transition {} -> {}",
        tx.state,
        next
    );
    debug!(
        transaction_id = %tx.id,
        from = %tx.state,
        to = %next,
        "Transaction state"
    );
    tx.state = next;
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("unit of work panicked: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("unit of work panicked: {}", message)
    } else {
        "unit of work panicked".to_string()
    }
}
