//! Self-rescheduling timers.
//!
//! Each timer owns its callback and decides its own next deadline: the
//! callback returns [`TimerAction::Rearm`] with the next delay, or
//! [`TimerAction::Stop`] to end the timer. Timers run as local tasks, so a
//! callback runs on the same thread as request processing and never
//! interleaves with it.

use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::trace;

/// What a timer does after its callback ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAction {
    Rearm(Duration),
    Stop,
}

/// A handle to a running timer.
///
/// When this handle is dropped, the timer is cancelled.
#[derive(Debug)]
pub struct Timer {
    name: &'static str,
    task: JoinHandle<()>,
}

impl Timer {
    /// Starts a timer on the current `LocalSet`, first firing after `first`.
    ///
    /// # Arguments
    ///
    /// * `name` - Used in logs
    /// * `first` - Delay before the first run
    /// * `callback` - Runs on every expiry and picks the next delay
    pub fn start<F>(name: &'static str, first: Duration, mut callback: F) -> Self
    where
        F: FnMut() -> TimerAction + 'static,
    {
        let task = tokio::task::spawn_local(async move {
            let mut delay = first;
            loop {
                tokio::time::sleep(delay).await;
                match callback() {
                    TimerAction::Rearm(next) => delay = next,
                    TimerAction::Stop => {
                        trace!(timer = name, "Timer stopped");
                        return;
                    }
                }
            }
        });

        Self { name, task }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// True once the callback returned [`TimerAction::Stop`].
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[tokio::test]
    async fn test_timer_rearms_until_stopped() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let runs = Rc::new(Cell::new(0));
                let counter = Rc::clone(&runs);

                let timer = Timer::start("count", Duration::from_millis(1), move || {
                    counter.set(counter.get() + 1);
                    if counter.get() < 3 {
                        TimerAction::Rearm(Duration::from_millis(1))
                    } else {
                        TimerAction::Stop
                    }
                });

                tokio::time::sleep(Duration::from_millis(200)).await;
                assert_eq!(runs.get(), 3);
                assert!(timer.is_finished());
                assert_eq!(timer.name(), "count");
            })
            .await;
    }

    #[tokio::test]
    async fn test_dropping_timer_cancels_it() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let runs = Rc::new(Cell::new(0));
                let counter = Rc::clone(&runs);

                let timer = Timer::start("never", Duration::from_millis(50), move || {
                    counter.set(counter.get() + 1);
                    TimerAction::Stop
                });
                drop(timer);

                tokio::time::sleep(Duration::from_millis(100)).await;
                assert_eq!(runs.get(), 0);
            })
            .await;
    }
}
