use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Outcome of [`SlotQueue::dequeue_next`].
#[derive(Debug)]
pub struct Dequeued {
    /// The task now holding the processing slot.
    pub task_id: String,
    /// New 1-based positions for every task still waiting, front to back.
    pub renumbered: Vec<(String, u32)>,
}

/// Outcome of [`SlotQueue::remove_if_queued`].
#[derive(Debug)]
pub struct Removal {
    /// `true` when the task was holding the slot rather than waiting.
    pub was_current: bool,
    /// New 1-based positions for the tasks left waiting.
    pub renumbered: Vec<(String, u32)>,
}

/// Read-only copy of the queue state for observability.
#[derive(Debug, Clone)]
pub struct QueueSnapshot {
    pub current: Option<String>,
    pub fifo: Vec<String>,
}

#[derive(Debug, Default)]
struct QueueInner {
    fifo: VecDeque<String>,
    current: Option<String>,
}

impl QueueInner {
    fn positions(&self) -> Vec<(String, u32)> {
        self.fifo
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), (i + 1) as u32))
            .collect()
    }
}

/// Serializes execution to one task at a time while keeping fair FIFO order
/// and accurate 1-based queue positions.
///
/// `fifo` and `current` live under a single mutex and are only ever read or
/// modified together; holding at most one `current` task is the engine's
/// core invariant. The queue performs no I/O: operations that change
/// positions hand the renumbered `(task_id, position)` pairs back to the
/// caller, which mirrors them into the registry and the durable store.
#[derive(Debug, Default)]
pub struct SlotQueue {
    inner: Mutex<QueueInner>,
}

impl SlotQueue {
    pub fn new() -> Self {
        Self::default()
    }

    // Critical sections below never panic, so a poisoned guard still holds
    // consistent state and can be recovered.
    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a task to the tail of the FIFO.
    ///
    /// Returns the task's 1-based position, or `None` if the task is already
    /// waiting or already holds the slot (the call is idempotent). Tasks
    /// already in the queue keep their positions.
    pub fn enqueue(&self, task_id: &str) -> Option<u32> {
        let mut inner = self.lock();
        if inner.current.as_deref() == Some(task_id)
            || inner.fifo.iter().any(|id| id == task_id)
        {
            return None;
        }
        inner.fifo.push_back(task_id.to_string());
        Some(inner.fifo.len() as u32)
    }

    /// Pop the head of the FIFO into the processing slot.
    ///
    /// Returns `None` when the slot is occupied or nothing is waiting.
    /// On success every remaining waiting task is renumbered to its new
    /// 1-based rank so reported positions track the drain.
    pub fn dequeue_next(&self) -> Option<Dequeued> {
        let mut inner = self.lock();
        if inner.current.is_some() {
            return None;
        }
        let task_id = inner.fifo.pop_front()?;
        inner.current = Some(task_id.clone());
        Some(Dequeued {
            task_id,
            renumbered: inner.positions(),
        })
    }

    /// Free the slot if `task_id` holds it; no-op otherwise.
    ///
    /// Called exactly once per task that ever became current, on every
    /// terminal outcome. Safe to call redundantly.
    pub fn release(&self, task_id: &str) {
        let mut inner = self.lock();
        if inner.current.as_deref() == Some(task_id) {
            inner.current = None;
        }
    }

    /// Remove a task wherever it sits: drop it from the FIFO (renumbering
    /// the rest) or clear the slot if it is the running task.
    ///
    /// Returns `None` when the queue does not know the task.
    pub fn remove_if_queued(&self, task_id: &str) -> Option<Removal> {
        let mut inner = self.lock();
        if inner.current.as_deref() == Some(task_id) {
            inner.current = None;
            return Some(Removal {
                was_current: true,
                renumbered: Vec::new(),
            });
        }
        let index = inner.fifo.iter().position(|id| id == task_id)?;
        inner.fifo.remove(index);
        Some(Removal {
            was_current: false,
            renumbered: inner.positions(),
        })
    }

    /// `true` while no task holds the processing slot.
    pub fn is_slot_available(&self) -> bool {
        self.lock().current.is_none()
    }

    /// Number of tasks waiting in the FIFO.
    pub fn depth(&self) -> usize {
        self.lock().fifo.len()
    }

    /// Read-only copy of `current` and the FIFO for status reporting.
    pub fn snapshot(&self) -> QueueSnapshot {
        let inner = self.lock();
        QueueSnapshot {
            current: inner.current.clone(),
            fifo: inner.fifo.iter().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn enqueue_assigns_tail_positions() {
        let queue = SlotQueue::new();
        assert_eq!(queue.enqueue("a"), Some(1));
        assert_eq!(queue.enqueue("b"), Some(2));
        assert_eq!(queue.enqueue("c"), Some(3));
    }

    #[test]
    fn enqueue_is_idempotent() {
        let queue = SlotQueue::new();
        assert_eq!(queue.enqueue("a"), Some(1));
        assert_eq!(queue.enqueue("a"), None);

        let taken = queue.dequeue_next().expect("slot free");
        assert_eq!(taken.task_id, "a");
        // Already current: re-enqueueing must not double-admit.
        assert_eq!(queue.enqueue("a"), None);
    }

    #[test]
    fn single_slot_blocks_second_dequeue() {
        let queue = SlotQueue::new();
        queue.enqueue("a");
        queue.enqueue("b");

        let first = queue.dequeue_next().expect("first dequeue");
        assert_eq!(first.task_id, "a");
        assert!(!queue.is_slot_available());
        assert!(queue.dequeue_next().is_none());

        queue.release("a");
        assert!(queue.is_slot_available());
        let second = queue.dequeue_next().expect("second dequeue");
        assert_eq!(second.task_id, "b");
    }

    #[test]
    fn dequeue_renumbers_waiters() {
        let queue = SlotQueue::new();
        queue.enqueue("a");
        queue.enqueue("b");
        queue.enqueue("c");

        let taken = queue.dequeue_next().expect("dequeue");
        assert_eq!(taken.task_id, "a");
        assert_eq!(
            taken.renumbered,
            vec![("b".to_string(), 1), ("c".to_string(), 2)]
        );
    }

    #[test]
    fn release_is_idempotent_and_targeted() {
        let queue = SlotQueue::new();
        queue.enqueue("a");
        queue.enqueue("b");
        let taken = queue.dequeue_next().expect("dequeue");
        assert_eq!(taken.task_id, "a");

        // Releasing a task that never held the slot changes nothing.
        queue.release("b");
        assert!(!queue.is_slot_available());

        queue.release("a");
        queue.release("a");
        assert!(queue.is_slot_available());
    }

    #[test]
    fn remove_if_queued_renumbers_and_reports_current() {
        let queue = SlotQueue::new();
        queue.enqueue("a");
        queue.enqueue("b");
        queue.enqueue("c");

        let removal = queue.remove_if_queued("b").expect("b is waiting");
        assert!(!removal.was_current);
        assert_eq!(removal.renumbered, vec![("a".to_string(), 1), ("c".to_string(), 2)]);

        let taken = queue.dequeue_next().expect("dequeue");
        assert_eq!(taken.task_id, "a");
        let removal = queue.remove_if_queued("a").expect("a is current");
        assert!(removal.was_current);
        assert!(queue.is_slot_available());

        assert!(queue.remove_if_queued("missing").is_none());
    }

    #[test]
    fn snapshot_copies_state() {
        let queue = SlotQueue::new();
        queue.enqueue("a");
        queue.enqueue("b");
        queue.dequeue_next();

        let snap = queue.snapshot();
        assert_eq!(snap.current.as_deref(), Some("a"));
        assert_eq!(snap.fifo, vec!["b".to_string()]);
        assert_eq!(queue.depth(), 1);
    }
}
