use std::cell::RefCell;

/// Work to run once the surrounding transaction committed.
pub type AfterCommitAction = Box<dyn FnOnce() + Send + 'static>;

/// Hook of the caller's transaction. Cache swaps are registered here so they
/// only become visible once the caller's own work succeeded.
pub trait AfterCommit {
    fn on_after_commit(&self, action: AfterCommitAction);
}

/// No transaction in progress: actions run immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoCommit;

impl AfterCommit for AutoCommit {
    fn on_after_commit(&self, action: AfterCommitAction) {
        action()
    }
}

/// Collects actions until [`DeferredCommit::commit`]. Rolling back, or
/// dropping it uncommitted, discards them.
#[derive(Default)]
pub struct DeferredCommit {
    pending: RefCell<Vec<AfterCommitAction>>,
}

impl DeferredCommit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Runs the registered actions in registration order.
    pub fn commit(self) {
        let actions = std::mem::take(&mut *self.pending.borrow_mut());
        log::trace!("AFTER COMMIT: running {} actions", actions.len());
        for action in actions {
            action();
        }
    }

    pub fn rollback(self) {
        let discarded = self.pending.borrow().len();
        if discarded > 0 {
            log::debug!("ROLLBACK: discarding {} after-commit actions", discarded);
        }
    }
}

impl AfterCommit for DeferredCommit {
    fn on_after_commit(&self, action: AfterCommitAction) {
        self.pending.borrow_mut().push(action);
    }
}

impl std::fmt::Debug for DeferredCommit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredCommit")
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting(counter: &Arc<AtomicUsize>) -> AfterCommitAction {
        let counter = counter.clone();
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn auto_commit_runs_immediately() {
        let counter = Arc::new(AtomicUsize::new(0));
        AutoCommit.on_after_commit(counting(&counter));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn deferred_commit_waits_for_commit() {
        let counter = Arc::new(AtomicUsize::new(0));
        let trx = DeferredCommit::new();
        trx.on_after_commit(counting(&counter));
        trx.on_after_commit(counting(&counter));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(trx.pending(), 2);

        trx.commit();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn rollback_discards() {
        let counter = Arc::new(AtomicUsize::new(0));
        let trx = DeferredCommit::new();
        trx.on_after_commit(counting(&counter));
        trx.rollback();
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
