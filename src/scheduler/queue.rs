//! Two-band FIFO admission queue: interactive drains strictly before batch.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::session::Priority;

struct QueueState {
    interactive: VecDeque<String>,
    batch: VecDeque<String>,
}

/// FIFO queue of admitted session ids with priority bands.
pub struct JobQueue {
    state: Mutex<QueueState>,
    available: Notify,
}

impl JobQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                interactive: VecDeque::new(),
                batch: VecDeque::new(),
            }),
            available: Notify::new(),
        }
    }

    pub fn push(&self, request_id: String, priority: Priority) {
        {
            let mut state = self
                .state
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match priority {
                Priority::Interactive => state.interactive.push_back(request_id),
                Priority::Batch => state.batch.push_back(request_id),
            }
        }
        self.available.notify_one();
    }

    fn try_pop(&self) -> Option<String> {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state
            .interactive
            .pop_front()
            .or_else(|| state.batch.pop_front())
    }

    /// Wait for the next session id, interactive band first.
    pub async fn pop(&self) -> String {
        loop {
            if let Some(id) = self.try_pop() {
                return id;
            }
            self.available.notified().await;
        }
    }

    pub fn depth(&self) -> usize {
        let state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state.interactive.len() + state.batch.len()
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_interactive_drains_before_batch() {
        let queue = JobQueue::new();
        queue.push("b1".to_string(), Priority::Batch);
        queue.push("i1".to_string(), Priority::Interactive);
        queue.push("b2".to_string(), Priority::Batch);
        queue.push("i2".to_string(), Priority::Interactive);

        assert_eq!(queue.pop().await, "i1");
        assert_eq!(queue.pop().await, "i2");
        assert_eq!(queue.pop().await, "b1");
        assert_eq!(queue.pop().await, "b2");
    }

    #[tokio::test]
    async fn test_fifo_within_band() {
        let queue = JobQueue::new();
        for i in 0..5 {
            queue.push(format!("s{i}"), Priority::Interactive);
        }
        for i in 0..5 {
            assert_eq!(queue.pop().await, format!("s{i}"));
        }
    }

    #[tokio::test]
    async fn test_pop_wakes_on_push() {
        let queue = std::sync::Arc::new(JobQueue::new());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::task::yield_now().await;
        queue.push("late".to_string(), Priority::Batch);
        assert_eq!(waiter.await.unwrap(), "late");
    }

    #[test]
    fn test_depth_counts_both_bands() {
        let queue = JobQueue::new();
        queue.push("a".to_string(), Priority::Interactive);
        queue.push("b".to_string(), Priority::Batch);
        assert_eq!(queue.depth(), 2);
    }
}
