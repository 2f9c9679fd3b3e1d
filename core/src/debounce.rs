/// Trailing-edge debounce for network side effects
///
/// Every `call` restarts the quiet period; when it elapses without another call the action
/// runs once with the most recent value.
use futures_util::future::BoxFuture;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

type Action<T> = Arc<dyn Fn(T) -> BoxFuture<'static, ()> + Send + Sync>;

/// A scheduled call. Whoever flips `claimed` first owns it: the task once its delay has
/// elapsed, or a later `call`/`cancel` that supersedes it while it still sleeps.
struct Scheduled {
    handle: JoinHandle<()>,
    claimed: Arc<AtomicBool>,
}

impl Scheduled {
    /// Abort the task if its action has not started; a running action is left to finish
    fn supersede(self) {
        if !self.claimed.swap(true, Ordering::AcqRel) {
            self.handle.abort();
        }
    }

    fn is_waiting(&self) -> bool {
        !self.claimed.load(Ordering::Acquire) && !self.handle.is_finished()
    }
}

pub struct Debouncer<T> {
    delay: Duration,
    action: Action<T>,
    pending: Mutex<Option<Scheduled>>,
}

impl<T: Send + 'static> Debouncer<T> {
    pub fn new<F>(delay: Duration, action: F) -> Self
    where
        F: Fn(T) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        Self {
            delay,
            action: Arc::new(action),
            pending: Mutex::new(None),
        }
    }

    /// Schedule the action, replacing any call still waiting out the delay.
    ///
    /// An action that already started is not interrupted.
    pub fn call(&self, value: T) {
        let action = self.action.clone();
        let delay = self.delay;
        let claimed = Arc::new(AtomicBool::new(false));
        let flag = claimed.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if flag.swap(true, Ordering::AcqRel) {
                return;
            }
            action(value).await;
        });
        if let Some(previous) = self.lock().replace(Scheduled { handle, claimed }) {
            previous.supersede();
        }
    }

    /// Drop the pending call, if any
    pub fn cancel(&self) {
        if let Some(previous) = self.lock().take() {
            previous.supersede();
        }
    }

    /// True while a call is still waiting out the delay
    pub fn is_pending(&self) -> bool {
        self.lock().as_ref().is_some_and(Scheduled::is_waiting)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Scheduled>> {
        // A poisoned lock only means a panic elsewhere; the slot is still usable
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<T> Drop for Debouncer<T> {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.pending.lock() {
            if let Some(scheduled) = slot.take() {
                scheduled.supersede();
            }
        }
    }
}
