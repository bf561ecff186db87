use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use process::ProcessHandle;

/// FIFO of runnable processes shared by every worker.
///
/// Insertion order is scheduling order. A process appears at most once at
/// any instant: the pusher owns the handle and knows it is not queued.
/// After shutdown, queued processes still drain; `pop_blocking` returns
/// `None` only once the stop signal is set *and* the queue is empty.
pub struct ReadyQueue {
    inner: Mutex<QueueState>,
    available: Condvar,
}

struct QueueState {
    queue: VecDeque<ProcessHandle>,
    stopped: bool,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueState {
                queue: VecDeque::new(),
                stopped: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Appends a process and wakes one waiting worker.
    pub fn push(&self, handle: ProcessHandle) {
        let mut state = self.inner.lock().unwrap();
        state.queue.push_back(handle);
        self.available.notify_one();
    }

    /// Blocks until a process is available or shutdown has drained the
    /// queue.
    pub fn pop_blocking(&self) -> Option<ProcessHandle> {
        let mut state = self.inner.lock().unwrap();
        loop {
            if let Some(handle) = state.queue.pop_front() {
                return Some(handle);
            }
            if state.stopped {
                return None;
            }
            state = self.available.wait(state).unwrap();
        }
    }

    /// Signals every blocked worker to finish draining and exit.
    pub fn shutdown(&self) {
        let mut state = self.inner.lock().unwrap();
        state.stopped = true;
        self.available.notify_all();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ReadyQueue {
    fn default() -> Self {
        Self::new()
    }
}
