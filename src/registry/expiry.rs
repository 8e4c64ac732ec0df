// ============================================================================
// Expiry Scheduler
// ============================================================================

use crate::core::ParticipantId;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Handed to the expiry callback when a timer elapses.
///
/// The callback must check [`ExpiryTicket::is_cancelled`] after it has
/// acquired whatever lock `disarm` is called under; a timer may elapse and
/// be disarmed before its callback gets that lock.
#[derive(Debug, Clone)]
pub struct ExpiryTicket {
    pub host: ParticipantId,
    serial: u64,
    token: CancellationToken,
}

impl ExpiryTicket {
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Live ticket that belongs to no scheduler entry.
    #[cfg(test)]
    pub(crate) fn detached(host: ParticipantId) -> Self {
        Self {
            host,
            serial: 0,
            token: CancellationToken::new(),
        }
    }
}

struct TimerEntry {
    serial: u64,
    token: CancellationToken,
}

/// One cancellable delayed action per host.
///
/// Every timer is a child of one root token, so `shutdown` (or dropping the
/// scheduler) cancels all of them at once. The timer table has its own lock
/// and is never held across an await point.
pub struct ExpiryScheduler {
    idle_timeout: Duration,
    root: CancellationToken,
    timers: Mutex<HashMap<ParticipantId, TimerEntry>>,
    next_serial: AtomicU64,
}

impl ExpiryScheduler {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            idle_timeout,
            root: CancellationToken::new(),
            timers: Mutex::new(HashMap::new()),
            next_serial: AtomicU64::new(1),
        }
    }

    /// Schedule `on_expire` after the idle timeout, replacing any timer
    /// already armed for `host`.
    pub fn arm<F, Fut>(&self, host: ParticipantId, on_expire: F)
    where
        F: FnOnce(ExpiryTicket) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.arm_after(host, self.idle_timeout, on_expire);
    }

    /// Same as [`arm`](Self::arm) with an explicit delay.
    pub fn arm_after<F, Fut>(&self, host: ParticipantId, delay: Duration, on_expire: F)
    where
        F: FnOnce(ExpiryTicket) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.root.is_cancelled() {
            debug!(host = %host, "scheduler shut down, timer not armed");
            return;
        }
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        let token = self.root.child_token();
        let ticket = ExpiryTicket {
            host,
            serial,
            token: token.clone(),
        };

        let previous = self.timers().insert(
            host,
            TimerEntry {
                serial,
                token: token.clone(),
            },
        );
        if let Some(previous) = previous {
            previous.token.cancel();
        }

        // Deadline is fixed now, not when the task is first polled.
        let sleep = tokio::time::sleep(delay);
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {}
                _ = sleep => {
                    if !ticket.is_cancelled() {
                        debug!(host = %ticket.host, "expiry timer elapsed");
                        on_expire(ticket).await;
                    }
                }
            }
        });
    }

    /// Cancel the current timer for `host` and arm a fresh one.
    pub fn reset<F, Fut>(&self, host: ParticipantId, on_expire: F)
    where
        F: FnOnce(ExpiryTicket) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.disarm(host);
        self.arm(host, on_expire);
    }

    /// Cancel and forget the timer for `host`. Returns whether one existed.
    pub fn disarm(&self, host: ParticipantId) -> bool {
        match self.timers().remove(&host) {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Drop the table entry of a timer that has fired, unless it has been
    /// replaced in the meantime.
    pub fn retire(&self, ticket: &ExpiryTicket) {
        let mut timers = self.timers();
        if timers.get(&ticket.host).is_some_and(|e| e.serial == ticket.serial) {
            timers.remove(&ticket.host);
        }
    }

    pub fn is_armed(&self, host: ParticipantId) -> bool {
        self.timers().contains_key(&host)
    }

    pub fn armed_count(&self) -> usize {
        self.timers().len()
    }

    /// Cancel every outstanding timer. Later `arm` calls are ignored.
    pub fn shutdown(&self) {
        self.root.cancel();
        self.timers().clear();
    }

    fn timers(&self) -> MutexGuard<'_, HashMap<ParticipantId, TimerEntry>> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ExpiryScheduler {
    fn drop(&mut self) {
        self.root.cancel();
    }
}
