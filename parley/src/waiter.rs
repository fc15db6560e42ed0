use std::{
    fmt,
    future::{Future, IntoFuture},
    marker::PhantomData,
    pin::Pin,
    sync::Arc,
    time::Duration,
};

use tokio::{sync::Notify, time::Instant};

use crate::{Config, Error, Result};

/// Default bound for [`wait_for`] conditions.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default interval between predicate evaluations.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Wait until `predicate` holds.
///
/// Use this when completion is only observable through aggregate state
/// (a window count, a flag set by a handler) rather than a direct reply.
/// The predicate must not have side effects: it may be evaluated any number
/// of times.
///
/// The returned [`Waiter`] resolves to `Ok(())` once the predicate holds, or
/// to [`Error::ConditionTimeout`] carrying the failure message when the
/// timeout elapses first. It always terminates.
///
/// # Example
///
/// ```ignore
/// wait_for(|| windows.chat_count() == 0)
///     .message("chats didn't all close")
///     .within(Duration::from_millis(500))
///     .await?;
///
/// // wake up on change instead of polling
/// wait_for(|| state.borrow().logged_out)
///     .notified_by(changed.clone())
///     .await?;
/// ```
pub fn wait_for<'a, F>(predicate: F) -> Waiter<'a, F>
where
    F: Fn() -> bool + 'a,
{
    Waiter {
        predicate,
        timeout: DEFAULT_WAIT_TIMEOUT,
        interval: DEFAULT_POLL_INTERVAL,
        message: None,
        notify: None,
        _borrow: PhantomData,
    }
}

/// A bounded condition wait. Created by [`wait_for`].
///
/// `'a` is how long the predicate may borrow from its surroundings.
pub struct Waiter<'a, F> {
    predicate: F,
    timeout: Duration,
    interval: Duration,
    message: Option<String>,
    notify: Option<Arc<Notify>>,
    _borrow: PhantomData<&'a ()>,
}

impl<'a, F> Waiter<'a, F>
where
    F: Fn() -> bool + 'a,
{
    /// Override the default 5-second timeout.
    pub fn within(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the default 10ms poll interval.
    pub fn every(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Diagnostic reported when the condition is not met in time.
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Take timeout and interval from a [`Config`].
    pub fn with_config(self, config: &Config) -> Self {
        self.within(config.wait_timeout())
            .every(config.poll_interval())
    }

    /// Re-check whenever `notify` fires.
    ///
    /// The poll interval still applies as a fallback, so a notification
    /// sent before the waiter started listening is never lost for longer
    /// than one interval.
    pub fn notified_by(mut self, notify: Arc<Notify>) -> Self {
        self.notify = Some(notify);
        self
    }

    async fn run(self) -> Result {
        let deadline = Instant::now() + self.timeout;
        loop {
            if (self.predicate)() {
                return Ok(());
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                let message = self
                    .message
                    .unwrap_or_else(|| "condition not met".to_string());
                tracing::warn!(%message, timeout = ?self.timeout, "wait failed");
                return Err(Error::ConditionTimeout {
                    message,
                    timeout: self.timeout,
                });
            }
            let tick = remaining.min(self.interval);
            match &self.notify {
                Some(notify) => {
                    let _ = tokio::time::timeout(tick, notify.notified()).await;
                }
                None => tokio::time::sleep(tick).await,
            }
        }
    }
}

impl<'a, F> IntoFuture for Waiter<'a, F>
where
    F: Fn() -> bool + 'a,
{
    type Output = Result;
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + 'a>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.run())
    }
}

impl<F> fmt::Debug for Waiter<'_, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Waiter")
            .field("timeout", &self.timeout)
            .field("interval", &self.interval)
            .field("message", &self.message)
            .field("notify", &self.notify.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, rc::Rc};

    use super::*;

    #[tokio::test]
    async fn already_true_returns_immediately() {
        wait_for(|| true)
            .within(Duration::ZERO)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_when_state_changes_in_time() {
        let count = Rc::new(Cell::new(3));
        let driver = count.clone();
        let waiter = wait_for(|| count.get() == 0)
            .message("didn't reach zero")
            .within(Duration::from_millis(500));

        let drive = async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            driver.set(0);
        };
        let started = Instant::now();
        let (result, ()) = tokio::join!(waiter.into_future(), drive);

        result.unwrap();
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn reports_message_on_timeout() {
        let started = Instant::now();
        let err = wait_for(|| false)
            .message("didn't reach zero")
            .within(Duration::from_millis(500))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            Error::ConditionTimeout {
                message: "didn't reach zero".into(),
                timeout: Duration::from_millis(500),
            }
        );
        assert!(started.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn notification_wakes_the_waiter_early() {
        let notify = Arc::new(Notify::new());
        let flag = Rc::new(Cell::new(false));
        let setter = flag.clone();
        let signal = notify.clone();

        let waiter = wait_for(|| flag.get())
            .every(Duration::from_secs(60))
            .within(Duration::from_secs(120))
            .notified_by(notify);
        let drive = async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            setter.set(true);
            signal.notify_waiters();
        };
        let started = Instant::now();
        let (result, ()) = tokio::join!(waiter.into_future(), drive);

        result.unwrap();
        assert!(started.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn predicate_borrows_a_local() {
        let ready = Cell::new(false);
        let waiter = wait_for(|| ready.get()).within(Duration::from_millis(200));
        let drive = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            ready.set(true);
        };
        let (result, ()) = tokio::join!(waiter.into_future(), drive);
        result.unwrap();
    }

    #[test]
    fn config_sets_bounds() {
        let config = Config::default()
            .with_wait_timeout(Duration::from_secs(2))
            .with_poll_interval(Duration::from_millis(20));
        let waiter = wait_for(|| true).with_config(&config);
        assert_eq!(waiter.timeout, Duration::from_secs(2));
        assert_eq!(waiter.interval, Duration::from_millis(20));
    }
}
