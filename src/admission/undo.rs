//! Compensation Tracker
//!
//! Ordered ledger of reversal records for the durable steps of an
//! admission. Reversal logic lives in a `Reverter`, so the ordering rules
//! here do not depend on any node.

use async_trait::async_trait;

use crate::error::Result;

/// Handle returned on registration, used to cancel an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UndoHandle(u64);

/// Executes reversal records
#[async_trait]
pub trait Reverter<A: Sync>: Send + Sync {
    async fn revert(&self, action: &A) -> Result<()>;
}

#[derive(Debug)]
struct Entry<A> {
    handle: UndoHandle,
    name: String,
    action: A,
}

/// Outcome of running the ledger
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnwindReport {
    /// Names of entries reverted successfully, in execution order
    pub reverted: Vec<String>,
    /// Entries whose reversal failed, with the error message
    pub failed: Vec<(String, String)>,
}

impl UnwindReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Ledger of compensations. Normal entries revert in reverse registration
/// order, then deferred entries in reverse registration order.
#[derive(Debug)]
pub struct CompensationTracker<A> {
    normal: Vec<Entry<A>>,
    deferred: Vec<Entry<A>>,
    next_handle: u64,
}

impl<A> Default for CompensationTracker<A> {
    fn default() -> Self {
        Self {
            normal: Vec::new(),
            deferred: Vec::new(),
            next_handle: 0,
        }
    }
}

impl<A: Send + Sync> CompensationTracker<A> {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, name: &str, action: A) -> Entry<A> {
        self.next_handle += 1;
        Entry {
            handle: UndoHandle(self.next_handle),
            name: name.to_string(),
            action,
        }
    }

    /// Register a compensation in the normal group
    pub fn register(&mut self, name: &str, action: A) -> UndoHandle {
        let entry = self.entry(name, action);
        let handle = entry.handle;
        tracing::debug!("Registered compensation '{}'", name);
        self.normal.push(entry);
        handle
    }

    /// Register a compensation that runs after every normal entry
    pub fn register_deferred_last(&mut self, name: &str, action: A) -> UndoHandle {
        let entry = self.entry(name, action);
        let handle = entry.handle;
        tracing::debug!("Registered deferred compensation '{}'", name);
        self.deferred.push(entry);
        handle
    }

    /// Remove an entry without running it. Returns false if the handle is
    /// unknown or already gone.
    pub fn cancel(&mut self, handle: UndoHandle) -> bool {
        for group in [&mut self.normal, &mut self.deferred] {
            if let Some(pos) = group.iter().position(|e| e.handle == handle) {
                let entry = group.remove(pos);
                tracing::debug!("Cancelled compensation '{}'", entry.name);
                return true;
            }
        }
        false
    }

    pub fn len(&self) -> usize {
        self.normal.len() + self.deferred.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Names of pending entries in the order they would run
    pub fn pending_names(&self) -> Vec<String> {
        self.normal
            .iter()
            .rev()
            .chain(self.deferred.iter().rev())
            .map(|e| e.name.clone())
            .collect()
    }

    /// Run and drain every entry. Failures are logged and recorded; later
    /// entries still run.
    pub async fn run_all<R>(&mut self, reverter: &R) -> UnwindReport
    where
        R: Reverter<A> + ?Sized,
    {
        let normal = std::mem::take(&mut self.normal);
        let deferred = std::mem::take(&mut self.deferred);
        let mut report = UnwindReport::default();

        for entry in normal.into_iter().rev().chain(deferred.into_iter().rev()) {
            tracing::info!("Reverting: {}", entry.name);
            match reverter.revert(&entry.action).await {
                Ok(()) => report.reverted.push(entry.name),
                Err(e) => {
                    tracing::error!("Failed to revert '{}': {}", entry.name, e);
                    report.failed.push((entry.name, e.to_string()));
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::Mutex;

    #[derive(Default)]
    struct LogReverter {
        log: Mutex<Vec<&'static str>>,
        fail: Option<&'static str>,
    }

    #[async_trait]
    impl Reverter<&'static str> for LogReverter {
        async fn revert(&self, action: &&'static str) -> Result<()> {
            self.log.lock().unwrap().push(action);
            if self.fail == Some(*action) {
                return Err(Error::Internal(format!("{} failed", action)));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_reverse_order_with_deferred_last() {
        let mut tracker = CompensationTracker::new();
        tracker.register("a", "a");
        tracker.register_deferred_last("d1", "d1");
        tracker.register("b", "b");
        tracker.register_deferred_last("d2", "d2");
        tracker.register("c", "c");

        assert_eq!(tracker.pending_names(), vec!["c", "b", "a", "d2", "d1"]);

        let reverter = LogReverter::default();
        let report = tracker.run_all(&reverter).await;
        assert_eq!(*reverter.log.lock().unwrap(), vec!["c", "b", "a", "d2", "d1"]);
        assert!(report.is_complete());
        assert_eq!(report.reverted.len(), 5);
    }

    #[tokio::test]
    async fn test_run_all_twice_runs_each_once() {
        let mut tracker = CompensationTracker::new();
        tracker.register("a", "a");
        tracker.register_deferred_last("d", "d");

        let reverter = LogReverter::default();
        tracker.run_all(&reverter).await;
        let second = tracker.run_all(&reverter).await;

        assert!(second.reverted.is_empty());
        assert!(tracker.is_empty());
        assert_eq!(*reverter.log.lock().unwrap(), vec!["a", "d"]);
    }

    #[tokio::test]
    async fn test_cancelled_entry_never_runs() {
        let mut tracker = CompensationTracker::new();
        tracker.register("a", "a");
        let handle = tracker.register("b", "b");

        assert!(tracker.cancel(handle));
        assert!(!tracker.cancel(handle));

        let reverter = LogReverter::default();
        tracker.run_all(&reverter).await;
        assert_eq!(*reverter.log.lock().unwrap(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_unwind() {
        let mut tracker = CompensationTracker::new();
        tracker.register("a", "a");
        tracker.register("b", "b");
        tracker.register("c", "c");

        let reverter = LogReverter {
            fail: Some("b"),
            ..Default::default()
        };
        let report = tracker.run_all(&reverter).await;

        assert_eq!(report.reverted, vec!["c".to_string(), "a".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "b");
        assert!(!report.is_complete());
    }
}
