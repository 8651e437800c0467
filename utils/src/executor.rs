//! Task spawning on the ambient tokio runtime.

use std::future::Future;

use tokio::select;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Spawn a detached task on the current runtime.
pub fn spawn<F>(future: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(future)
}

/// Spawn a task that is dropped as soon as `cancelled` fires.
///
/// The future is not polled again after cancellation, so any value it would
/// have sent through a channel is simply never produced.
pub fn spawn_cancellable<F>(cancelled: CancellationToken, future: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        select! {
            _ = cancelled.cancelled() => {
                trace!("cancellable task dropped");
            }
            _ = future => {}
        }
    })
}
