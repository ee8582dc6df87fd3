//! Background task helpers.

use tokio::task::JoinHandle;
use tracing::error;

/// Aborts a task and waits for it to finish, swallowing the cancellation.
///
/// A task that already completed is simply joined. Panics inside the task are
/// logged rather than resumed so that shutting something down never fails.
pub async fn cancel_task<T>(handle: Option<JoinHandle<T>>) {
    let Some(handle) = handle else {
        return;
    };

    handle.abort();
    match handle.await {
        Ok(_) => {}
        Err(err) if err.is_cancelled() => {}
        Err(err) => error!("Task panicked before it could be cancelled: {}", err),
    }
}
