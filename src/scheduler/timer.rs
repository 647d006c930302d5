use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

/// Cancellable reference to a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskHandle(u64);

/// Deferred tasks ordered by due time (wall-clock seconds), FIFO among
/// equal times. Single-threaded: the owner pops due tasks on every tick.
#[derive(Debug)]
pub struct TaskQueue<T> {
    next_seq: u64,
    tasks: BTreeMap<(i64, u64), T>,
    due_by_seq: HashMap<u64, i64>,
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self {
            next_seq: 0,
            tasks: BTreeMap::new(),
            due_by_seq: HashMap::new(),
        }
    }
}

impl<T> TaskQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, at: f64, task: T) -> TaskHandle {
        let seq = self.next_seq;
        self.next_seq += 1;
        let key = to_micros(at);
        self.tasks.insert((key, seq), task);
        self.due_by_seq.insert(seq, key);
        TaskHandle(seq)
    }

    /// Remove a pending task. `None` if it already ran or was cancelled.
    pub fn cancel(&mut self, handle: TaskHandle) -> Option<T> {
        let key = self.due_by_seq.remove(&handle.0)?;
        self.tasks.remove(&(key, handle.0))
    }

    pub fn is_pending(&self, handle: TaskHandle) -> bool {
        self.due_by_seq.contains_key(&handle.0)
    }

    /// Cancel every task matching `pred`; returns how many were dropped.
    pub fn cancel_where(&mut self, mut pred: impl FnMut(&T) -> bool) -> usize {
        let doomed: Vec<(i64, u64)> = self
            .tasks
            .iter()
            .filter(|(_, task)| pred(task))
            .map(|(key, _)| *key)
            .collect();
        for key in &doomed {
            self.tasks.remove(key);
            self.due_by_seq.remove(&key.1);
        }
        doomed.len()
    }

    /// Earliest task due at or before `now`.
    pub fn pop_due(&mut self, now: f64) -> Option<(TaskHandle, T)> {
        let limit = to_micros(now);
        let (&key, _) = self.tasks.iter().next()?;
        if key.0 > limit {
            return None;
        }
        let task = self.tasks.remove(&key)?;
        self.due_by_seq.remove(&key.1);
        Some((TaskHandle(key.1), task))
    }

    /// Due time of the earliest pending task.
    pub fn next_due(&self) -> Option<f64> {
        self.tasks.keys().next().map(|(micros, _)| *micros as f64 / 1e6)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.tasks.values()
    }
}

fn to_micros(secs: f64) -> i64 {
    if secs.is_nan() {
        return i64::MAX;
    }
    (secs * 1e6).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_in_time_order() {
        let mut q = TaskQueue::new();
        q.schedule(2.0, "b");
        q.schedule(1.0, "a");
        q.schedule(3.0, "c");
        assert_eq!(q.next_due(), Some(1.0));
        assert_eq!(q.pop_due(2.5).map(|(_, t)| t), Some("a"));
        assert_eq!(q.pop_due(2.5).map(|(_, t)| t), Some("b"));
        assert_eq!(q.pop_due(2.5), None);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn equal_times_are_fifo() {
        let mut q = TaskQueue::new();
        q.schedule(1.0, 1);
        q.schedule(1.0, 2);
        q.schedule(1.0, 3);
        let order: Vec<i32> = std::iter::from_fn(|| q.pop_due(1.0).map(|(_, t)| t)).collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn cancelled_task_never_runs() {
        let mut q = TaskQueue::new();
        let h = q.schedule(1.0, "x");
        assert!(q.is_pending(h));
        assert_eq!(q.cancel(h), Some("x"));
        assert!(!q.is_pending(h));
        assert_eq!(q.cancel(h), None);
        assert_eq!(q.pop_due(10.0), None);
    }

    #[test]
    fn cancel_where_filters() {
        let mut q = TaskQueue::new();
        for i in 0..10 {
            q.schedule(i as f64, i);
        }
        assert_eq!(q.cancel_where(|t| t % 2 == 0), 5);
        let rest: Vec<i32> = std::iter::from_fn(|| q.pop_due(100.0).map(|(_, t)| t)).collect();
        assert_eq!(rest, vec![1, 3, 5, 7, 9]);
    }
}
