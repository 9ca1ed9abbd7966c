//! Debounced evolution scheduling
//!
//! One timer slot. Scheduling again aborts the pending timer; a timer that has
//! already fired hands its job to a detached task, so aborting never
//! interrupts a running cycle.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::debug;

use evoforge_common::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulePriority {
    Critical,
    High,
    Normal,
    Low,
}

impl SchedulePriority {
    pub fn delay(self) -> Duration {
        match self {
            SchedulePriority::Critical => Duration::from_secs(1),
            SchedulePriority::High => Duration::from_secs(5),
            SchedulePriority::Normal => Duration::from_secs(30),
            SchedulePriority::Low => Duration::from_secs(300),
        }
    }
}

struct PendingRun {
    handle: JoinHandle<()>,
    priority: SchedulePriority,
    due_at: DateTime<Utc>,
}

pub struct Scheduler {
    clock: Arc<dyn Clock>,
    pending: Mutex<Option<PendingRun>>,
}

impl Scheduler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            pending: Mutex::new(None),
        }
    }

    /// Run `job` after the priority delay, replacing any pending run
    pub fn schedule<F>(&self, priority: SchedulePriority, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let delay = priority.delay();
        let due_at = self.clock.now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            tokio::spawn(job);
        });

        let previous = self.pending.lock().replace(PendingRun {
            handle,
            priority,
            due_at,
        });
        if let Some(previous) = previous {
            previous.handle.abort();
            debug!(replaced = ?previous.priority, ?priority, "Replaced pending evolution");
        } else {
            debug!(?priority, "Scheduled evolution");
        }
    }

    /// Abort the pending timer. Returns true if one was still waiting.
    pub fn cancel(&self) -> bool {
        match self.pending.lock().take() {
            Some(run) => {
                let waiting = !run.handle.is_finished();
                run.handle.abort();
                waiting
            }
            None => false,
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending
            .lock()
            .as_ref()
            .is_some_and(|run| !run.handle.is_finished())
    }

    /// Wall-clock time the pending run is due
    pub fn next_run_at(&self) -> Option<DateTime<Utc>> {
        self.pending
            .lock()
            .as_ref()
            .filter(|run| !run.handle.is_finished())
            .map(|run| run.due_at)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(run) = self.pending.get_mut().take() {
            run.handle.abort();
        }
    }
}
