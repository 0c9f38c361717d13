//! Time-ordered holding area for tasks awaiting their next attempt.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::task::RetryTask;

/// A concurrent min-priority queue of [`RetryTask`]s.
///
/// Tasks are ordered by `next_execute_at`, earliest first; ties go to the task
/// inserted first. All operations synchronize internally, so the queue can be
/// shared behind an `Arc` without any caller-side locking.
///
/// The queue itself is unbounded: [`add`](Self::add) never blocks and never
/// drops. Backpressure is applied by the promotion loop, which refuses to
/// promote while the queue is at its configured size.
pub struct RetryQueue {
    state: Mutex<State>,
    available: Notify,
}

#[derive(Default)]
struct State {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
}

struct Entry {
    at: Instant,
    seq: u64,
    task: RetryTask,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // BinaryHeap is a max-heap; reversed so the earliest (then oldest) entry is on top.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl RetryQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            available: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a task in priority order and wake one waiting taker.
    pub fn add(&self, task: RetryTask) {
        {
            let mut state = self.lock();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.heap.push(Entry {
                at: task.next_execute_at(),
                seq,
                task,
            });
        }
        self.available.notify_one();
    }

    /// Remove and return the earliest task, waiting until one is available.
    ///
    /// Concurrent takers each receive a distinct task.
    pub async fn take_lowest(&self) -> RetryTask {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(task) = self.try_take_lowest() {
                return task;
            }
            notified.await;
        }
    }

    /// Remove and return the earliest task, if any.
    pub fn try_take_lowest(&self) -> Option<RetryTask> {
        self.lock().heap.pop().map(|entry| entry.task)
    }

    /// The earliest `next_execute_at` currently queued.
    pub fn peek_next_execute_at(&self) -> Option<Instant> {
        self.lock().heap.peek().map(|entry| entry.at)
    }

    /// Number of queued tasks.
    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    /// Returns true if no task is queued.
    pub fn is_empty(&self) -> bool {
        self.lock().heap.is_empty()
    }

    /// Drop every queued task, abandoning their handles.
    ///
    /// Returns how many tasks were dropped.
    pub fn clear(&self) -> usize {
        let drained = std::mem::take(&mut self.lock().heap);
        drained.len()
    }
}

impl Default for RetryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RetryQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryQueue")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::{BoxError, RetryPolicy};
    use crate::unit::{FnUnit, RetryableUnit};
    use std::sync::Arc;
    use std::time::Duration;

    fn task_at(name: &str, at: Instant) -> RetryTask {
        let mut task = RetryTask::new(
            FnUnit::new(name, || async { Ok::<_, BoxError>(()) }).boxed(),
            Arc::new(RetryPolicy::default()),
        );
        task.set_next_execute_at(at);
        task
    }

    #[tokio::test(start_paused = true)]
    async fn test_earliest_first() {
        let queue = RetryQueue::new();
        let now = Instant::now();
        queue.add(task_at("late", now + Duration::from_secs(3)));
        queue.add(task_at("early", now + Duration::from_secs(1)));
        queue.add(task_at("middle", now + Duration::from_secs(2)));

        assert_eq!(queue.len(), 3);
        assert_eq!(
            queue.peek_next_execute_at(),
            Some(now + Duration::from_secs(1))
        );
        assert_eq!(queue.take_lowest().await.name(), "early");
        assert_eq!(queue.take_lowest().await.name(), "middle");
        assert_eq!(queue.take_lowest().await.name(), "late");
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ties_break_by_insertion_order() {
        let queue = RetryQueue::new();
        let at = Instant::now();
        queue.add(task_at("first", at));
        queue.add(task_at("second", at));

        assert_eq!(queue.try_take_lowest().unwrap().name(), "first");
        assert_eq!(queue.try_take_lowest().unwrap().name(), "second");
        assert!(queue.try_take_lowest().is_none());
    }

    #[tokio::test]
    async fn test_take_waits_for_add() {
        let queue = Arc::new(RetryQueue::new());
        let taker = tokio::spawn({
            let queue = queue.clone();
            async move { queue.take_lowest().await.name().to_owned() }
        });

        tokio::task::yield_now().await;
        queue.add(task_at("late arrival", Instant::now()));

        assert_eq!(taker.await.unwrap(), "late arrival");
    }

    #[tokio::test]
    async fn test_concurrent_takers_get_distinct_tasks() {
        let queue = Arc::new(RetryQueue::new());
        let takers: Vec<_> = (0..8)
            .map(|_| {
                let queue = queue.clone();
                tokio::spawn(async move { queue.take_lowest().await.name().to_owned() })
            })
            .collect();

        let at = Instant::now();
        for i in 0..8 {
            queue.add(task_at(&format!("task-{}", i), at));
        }

        let mut names = Vec::new();
        for taker in takers {
            names.push(taker.await.unwrap());
        }
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 8);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_clear_abandons_tasks() {
        let queue = RetryQueue::new();
        queue.add(task_at("a", Instant::now()));
        queue.add(task_at("b", Instant::now()));
        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;
        use std::collections::HashSet;

        proptest! {
            #[test]
            fn prop_take_returns_minimum(offsets in prop::collection::vec(0u64..10_000, 1..64)) {
                let queue = RetryQueue::new();
                let base = Instant::now();
                for (i, offset) in offsets.iter().enumerate() {
                    queue.add(task_at(&i.to_string(), base + Duration::from_millis(*offset)));
                }

                let mut expected = offsets.clone();
                expected.sort_unstable();
                let mut taken = Vec::new();
                while let Some(task) = queue.try_take_lowest() {
                    taken.push((task.next_execute_at() - base).as_millis() as u64);
                }
                prop_assert_eq!(taken, expected);
            }

            #[test]
            fn prop_equal_times_delivered_once_each(count in 1usize..64) {
                let queue = RetryQueue::new();
                let at = Instant::now();
                for i in 0..count {
                    queue.add(task_at(&i.to_string(), at));
                }

                let mut seen = HashSet::new();
                let mut order = Vec::new();
                while let Some(task) = queue.try_take_lowest() {
                    prop_assert!(seen.insert(task.name().to_owned()));
                    order.push(task.name().parse::<usize>().unwrap());
                }
                prop_assert_eq!(seen.len(), count);
                prop_assert_eq!(order, (0..count).collect::<Vec<_>>());
            }
        }
    }
}
