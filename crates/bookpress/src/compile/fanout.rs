//! Bounded-concurrency fan-out over indexed tasks.

use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::task::JoinSet;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FanOutError {
    #[error("Task {index} panicked")]
    Panicked { index: usize },
}

/// Runs at most `limit` tasks at once, yielding results in completion order
/// tagged with the index they were pushed under.
pub struct RenderFanOut<T> {
    limit: usize,
    queued: VecDeque<(usize, BoxFuture<'static, T>)>,
    running: JoinSet<(usize, Result<T, FanOutError>)>,
}

impl<T: Send + 'static> RenderFanOut<T> {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            queued: VecDeque::new(),
            running: JoinSet::new(),
        }
    }

    pub fn push<F>(&mut self, index: usize, task: F)
    where
        F: Future<Output = T> + Send + 'static,
    {
        self.queued.push_back((index, task.boxed()));
    }

    pub fn in_flight(&self) -> usize {
        self.running.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queued.is_empty() && self.running.is_empty()
    }

    /// Next finished task, or `None` once everything has completed.
    pub async fn next_completed(&mut self) -> Option<(usize, Result<T, FanOutError>)> {
        self.fill();
        loop {
            match self.running.join_next().await? {
                Ok(done) => {
                    self.fill();
                    return Some(done);
                }
                // Aborted; only happens after cancel().
                Err(_) => continue,
            }
        }
    }

    /// Drops queued tasks and aborts running ones.
    pub fn cancel(&mut self) {
        self.queued.clear();
        self.running.abort_all();
    }

    fn fill(&mut self) {
        while self.running.len() < self.limit {
            let Some((index, task)) = self.queued.pop_front() else {
                break;
            };
            self.running.spawn(async move {
                let result = AssertUnwindSafe(task)
                    .catch_unwind()
                    .await
                    .map_err(|_| FanOutError::Panicked { index });
                (index, result)
            });
        }
    }
}
