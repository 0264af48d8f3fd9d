//! Local transactional scope wrapping one message's side effect.

/// A unit of local work that is either committed or rolled back.
///
/// `rollback` must be infallible: it runs from `Drop` and after a failed `commit`.
pub trait LocalTransaction: Send {
    fn commit(&mut self) -> anyhow::Result<()>;

    fn rollback(&mut self);
}

/// Opens local transactions.
pub trait Transactor: Send + Sync {
    type Transaction: LocalTransaction;

    fn begin(&self) -> anyhow::Result<Self::Transaction>;
}

/// Guard over an open local transaction.
///
/// Rolls back on drop unless [`TransactionScope::complete`] succeeded, so every
/// exit path (handler error, abort, cancellation of the surrounding future)
/// releases the transaction.
pub struct TransactionScope<T: LocalTransaction> {
    transaction: T,
    completed: bool,
}

impl<T: LocalTransaction> TransactionScope<T> {
    pub fn begin<R>(transactor: &R) -> anyhow::Result<Self>
    where
        R: Transactor<Transaction = T>,
    {
        Ok(Self {
            transaction: transactor.begin()?,
            completed: false,
        })
    }

    /// The open transaction, for the handler to do its work in.
    pub fn transaction(&mut self) -> &mut T {
        &mut self.transaction
    }

    /// Commit the local work. On failure the transaction is rolled back when
    /// the scope drops.
    pub fn complete(mut self) -> anyhow::Result<()> {
        self.transaction.commit()?;
        self.completed = true;
        Ok(())
    }

    /// Discard the local work.
    pub fn abort(self) {}
}

impl<T: LocalTransaction> Drop for TransactionScope<T> {
    fn drop(&mut self) {
        if !self.completed {
            self.transaction.rollback();
        }
    }
}
