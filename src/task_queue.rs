// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! Deferred-write scheduling.
//!
//! Write-back must never add latency to the read path, and concurrent
//! requests must not race to drain the same queue twice. [`TaskQueue`]
//! solves both with a FIFO of write tasks and a tri-state flush flag: at
//! most one flush loop runs at a time, and cancellation is cooperative (a
//! running task is never interrupted mid-execution).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::errors::SemiocacheError;

/// A queued unit of deferred write work.
pub type WriteTask = BoxFuture<'static, Result<(), SemiocacheError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlushState {
    /// No flush loop is running.
    Paused,
    /// One flush loop is draining the queue.
    Running,
    /// A running flush was asked to stop after its current task.
    Pausing,
}

/// FIFO scheduler for deferred write-back tasks.
///
/// Tasks are appended by any request and drained by at most one flush loop.
/// Task failures are caught and logged but never retried and never abort
/// the loop: by the time a write runs, the response it belongs to has
/// already been delivered.
pub struct TaskQueue {
    tasks: Mutex<VecDeque<WriteTask>>,
    state: Mutex<FlushState>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueue {
    /// Create an empty, paused queue.
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(VecDeque::new()),
            state: Mutex::new(FlushState::Paused),
            timer: Mutex::new(None),
        }
    }

    /// Append a task to the tail of the queue, regardless of flush state.
    pub fn schedule(&self, task: WriteTask) {
        let mut tasks = self.tasks.lock().expect("task queue poisoned");
        tasks.push_back(task);
        debug!(pending = tasks.len(), "scheduled deferred write");
    }

    /// Number of tasks waiting to be flushed.
    pub fn pending_tasks(&self) -> usize {
        self.tasks.lock().expect("task queue poisoned").len()
    }

    /// Arm a one-shot timer that flushes the queue after `delay`.
    ///
    /// Re-arming replaces (and cancels) any previously armed timer.
    pub fn schedule_flush(self: &Arc<Self>, delay: Duration) {
        let queue = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.flush().await;
        });
        let mut timer = self.timer.lock().expect("flush timer poisoned");
        if let Some(previous) = timer.replace(handle) {
            previous.abort();
        }
    }

    /// Clear any armed flush timer and cooperatively stop a running flush
    /// after its current task completes.
    pub fn cancel_flush(&self) {
        if let Some(handle) = self.timer.lock().expect("flush timer poisoned").take() {
            handle.abort();
        }
        let mut state = self.state.lock().expect("flush state poisoned");
        if *state == FlushState::Running {
            *state = FlushState::Pausing;
        }
    }

    /// Drain the queue, awaiting each task in FIFO order.
    ///
    /// If a flush loop is already running (or pausing), this returns
    /// immediately: the tri-state flag is the sole admission control, which
    /// is sufficient because scheduling is cooperative.
    pub async fn flush(self: &Arc<Self>) {
        {
            let mut state = self.state.lock().expect("flush state poisoned");
            if *state != FlushState::Paused {
                debug!("flush already in progress, skipping");
                return;
            }
            *state = FlushState::Running;
        }

        loop {
            if *self.state.lock().expect("flush state poisoned") != FlushState::Running {
                debug!("flush cancelled cooperatively");
                break;
            }
            let task = self
                .tasks
                .lock()
                .expect("task queue poisoned")
                .pop_front();
            let Some(task) = task else {
                break;
            };
            // Best-effort write-back: failures are not retried and never
            // reach the original requester.
            if let Err(error) = task.await {
                warn!(%error, "deferred write failed, dropping task");
            }
        }

        *self.state.lock().expect("flush state poisoned") = FlushState::Paused;
    }
}
