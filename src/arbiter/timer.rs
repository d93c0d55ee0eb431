//! Deadline timer for the arbiter tasks
//!
//! Each task loop sleeps on one [`TaskTimer`]. Callers arm it with either
//! replace semantics ([`TaskTimer::schedule_now`], [`TaskTimer::schedule_in`])
//! or keep-earliest-pending semantics ([`TaskTimer::schedule_if_idle`]),
//! mirroring how the controller distinguishes urgent re-evaluation from a
//! task's own self-rescheduling.

use std::sync::Mutex;

use tokio::sync::Notify;
use tokio::time::{Duration, Instant};

#[derive(Debug, Default)]
pub(crate) struct TaskTimer {
    /// Pending deadline, `None` when the task is idle
    deadline: Mutex<Option<Instant>>,
    kick: Notify,
}

impl TaskTimer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Arm the timer to fire immediately, replacing any pending deadline.
    pub(crate) fn schedule_now(&self) {
        self.schedule_in(Duration::ZERO);
    }

    /// Arm the timer for `delay` from now, replacing any pending deadline.
    pub(crate) fn schedule_in(&self, delay: Duration) {
        let mut slot = self.lock();
        *slot = Some(Instant::now() + delay);
        drop(slot);
        self.kick.notify_one();
    }

    /// Arm the timer only when no deadline is pending.
    pub(crate) fn schedule_if_idle(&self, delay: Duration) {
        let mut slot = self.lock();
        if slot.is_none() {
            *slot = Some(Instant::now() + delay);
            drop(slot);
            self.kick.notify_one();
        }
    }

    /// Wait until an armed deadline expires, consuming it.
    pub(crate) async fn wait(&self) {
        loop {
            // Register for wakeups before reading the slot so an arm racing
            // with this read is never missed.
            let notified = self.kick.notified();
            let deadline = *self.lock();

            match deadline {
                None => notified.await,
                Some(at) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(at) => {
                            let mut slot = self.lock();
                            // The deadline may have been replaced while
                            // sleeping; only consume one that is due.
                            if slot.is_some_and(|d| d <= Instant::now()) {
                                *slot = None;
                                return;
                            }
                        }
                        _ = notified => {}
                    }
                }
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Instant>> {
        self.deadline.lock().unwrap_or_else(|e| e.into_inner())
    }
}
