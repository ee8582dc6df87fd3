//! Periodic background poller.
//!
//! A [`Poller`] invokes a callback, sleeps for the current delay and repeats
//! until stopped. Callback failures (errors or panics) are logged and the loop
//! keeps going; the owner stops it explicitly with [`Poller::stop`].

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::tasks::cancel_task;

type PollFn = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Delay changes smaller than this are ignored.
const DELAY_EPSILON: Duration = Duration::from_micros(1);

/// A named background loop with an adjustable delay.
///
/// Dropping a running poller aborts its task.
pub struct Poller {
    name: String,
    callback: PollFn,
    initial_delay: Duration,
    delay: watch::Sender<Duration>,
    task: Option<JoinHandle<()>>,
}

impl Poller {
    /// Creates a stopped poller around an async callback.
    pub fn new<F, Fut>(name: impl Into<String>, callback: F, delay: Duration) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let callback: PollFn = Arc::new(move || Box::pin(callback()));
        let (delay_tx, _) = watch::channel(delay);
        Self {
            name: name.into(),
            callback,
            initial_delay: delay,
            delay: delay_tx,
            task: None,
        }
    }

    /// Creates a stopped poller around a plain function.
    pub fn from_fn<F>(name: impl Into<String>, callback: F, delay: Duration) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let callback = Arc::new(callback);
        Self::new(
            name,
            move || {
                let callback = callback.clone();
                async move { callback() }
            },
            delay,
        )
    }

    /// Name used in log records.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current sleep between callback runs.
    pub fn delay(&self) -> Duration {
        *self.delay.borrow()
    }

    /// Whether the loop task is alive.
    pub fn running(&self) -> bool {
        self.task.as_ref().map_or(false, |task| !task.is_finished())
    }

    /// Starts the loop, or re-times it if it is already running.
    ///
    /// `None` restores the delay the poller was created with.
    pub fn start(&mut self, delay: Option<Duration>) {
        self.delay.send_replace(delay.unwrap_or(self.initial_delay));
        if self.running() {
            return;
        }

        debug!(poller = %self.name, delay = ?self.delay(), "Starting poller");
        self.task = Some(tokio::spawn(poll_loop(
            self.name.clone(),
            self.callback.clone(),
            self.delay.subscribe(),
        )));
    }

    /// Cancels the loop and waits for it to finish.
    pub async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            debug!(poller = %self.name, "Stopping poller");
            cancel_task(Some(task)).await;
        }
    }

    /// Changes the delay used for subsequent sleeps.
    ///
    /// With `immediate`, a running loop is restarted right away instead of
    /// finishing its current sleep.
    pub async fn set_delay(&mut self, delay: Option<Duration>, immediate: bool) {
        let delay = delay.unwrap_or(self.initial_delay);
        if delay.abs_diff(self.delay()) < DELAY_EPSILON {
            return;
        }

        self.delay.send_replace(delay);
        if immediate && self.running() {
            self.stop().await;
            self.start(Some(delay));
        }
    }

    /// Runs the callback once, out of band, pausing the loop meanwhile.
    pub async fn call_now(&mut self) {
        let was_running = self.running();
        let delay = self.delay();

        self.stop().await;
        invoke(&self.name, &self.callback).await;

        if was_running {
            self.start(Some(delay));
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn invoke(name: &str, callback: &PollFn) {
    let outcome = AssertUnwindSafe(async { callback().await })
        .catch_unwind()
        .await;
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(err)) => error!(poller = %name, "Poller callback failed: {:#}", err),
        Err(_) => error!(poller = %name, "Poller callback panicked"),
    }
}

async fn poll_loop(name: String, callback: PollFn, delay: watch::Receiver<Duration>) {
    loop {
        invoke(&name, &callback).await;
        let wait = *delay.borrow();
        tokio::time::sleep(wait).await;
    }
}
