use tokio::sync::watch;

use crate::errors::RunFailure;

/// Observable status of a `DeferredResult`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeferredStatus {
    Pending,
    Resolved,
    Rejected,
}

#[derive(Clone, Debug)]
enum Slot<T> {
    Pending,
    Resolved(T),
    Rejected(RunFailure),
}

impl<T: Clone> Slot<T> {
    fn settled(&self) -> Option<Result<T, RunFailure>> {
        match self {
            Slot::Pending => None,
            Slot::Resolved(value) => Some(Ok(value.clone())),
            Slot::Rejected(err) => Some(Err(err.clone())),
        }
    }
}

/// Single-assignment result that synchronous code settles and async code awaits.
///
/// The first `resolve` or `reject` wins; later calls return `false` and leave
/// the stored outcome untouched.
pub struct DeferredResult<T> {
    name: &'static str,
    tx: watch::Sender<Slot<T>>,
}

impl<T: Clone + Send + Sync> DeferredResult<T> {
    /// Creates a pending result. `name` identifies it in termination errors.
    pub fn new(name: &'static str) -> Self {
        let (tx, _rx) = watch::channel(Slot::Pending);
        Self { name, tx }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn status(&self) -> DeferredStatus {
        match &*self.tx.borrow() {
            Slot::Pending => DeferredStatus::Pending,
            Slot::Resolved(_) => DeferredStatus::Resolved,
            Slot::Rejected(_) => DeferredStatus::Rejected,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status() == DeferredStatus::Pending
    }

    /// Stores `value` if still pending. Returns whether this call settled it.
    pub fn resolve(&self, value: T) -> bool {
        self.tx.send_if_modified(|slot| {
            if matches!(slot, Slot::Pending) {
                *slot = Slot::Resolved(value);
                true
            } else {
                false
            }
        })
    }

    /// Stores `err` if still pending. Returns whether this call settled it.
    pub fn reject(&self, err: RunFailure) -> bool {
        self.tx.send_if_modified(|slot| {
            if matches!(slot, Slot::Pending) {
                *slot = Slot::Rejected(err);
                true
            } else {
                false
            }
        })
    }

    /// Returns the outcome without waiting.
    pub fn peek(&self) -> Option<Result<T, RunFailure>> {
        self.tx.borrow().settled()
    }

    /// Waits until the result is settled.
    pub async fn wait(&self) -> Result<T, RunFailure> {
        let mut rx = self.tx.subscribe();
        match rx.wait_for(|slot| !matches!(slot, Slot::Pending)).await {
            Ok(slot) => slot
                .settled()
                .unwrap_or_else(|| Err(RunFailure::terminated(self.name))),
            Err(_) => Err(RunFailure::terminated(self.name)),
        }
    }
}

/// Type-erased view used to reject every still-pending result of a run.
pub(crate) trait Settle: Send + Sync {
    fn result_name(&self) -> &'static str;
    fn pending(&self) -> bool;
    fn fail(&self, err: RunFailure) -> bool;
}

impl<T: Clone + Send + Sync> Settle for DeferredResult<T> {
    fn result_name(&self) -> &'static str {
        self.name
    }

    fn pending(&self) -> bool {
        self.is_pending()
    }

    fn fail(&self, err: RunFailure) -> bool {
        self.reject(err)
    }
}
