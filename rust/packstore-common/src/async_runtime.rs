//! The small slice of an async runtime the decoders need: offloading blocking
//! reads and driving a future from synchronous code.

use std::future::Future;

/// Blocking work offloaded with [`spawn_blocking`] panicked or was cancelled.
#[derive(Debug, thiserror::Error)]
#[error("blocking task did not complete: {0}")]
pub struct BlockingTaskError(String);

/// Drives `fut` to completion on the calling thread.
///
/// Panics if called from inside an async task of a tokio runtime.
pub fn block_on<F: Future>(fut: F) -> F::Output {
    futures::executor::block_on(fut)
}

#[cfg(feature = "tokio")]
pub fn has_runtime() -> bool {
    tokio::runtime::Handle::try_current().is_ok()
}

#[cfg(not(feature = "tokio"))]
pub fn has_runtime() -> bool {
    false
}

/// Runs `f` on the runtime's blocking pool. The returned future resolves once
/// `f` has finished.
#[cfg(feature = "tokio")]
pub fn spawn_blocking<F, R>(f: F) -> impl Future<Output = Result<R, BlockingTaskError>>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let handle = tokio::task::spawn_blocking(f);
    async move {
        handle
            .await
            .map_err(|e| BlockingTaskError(e.to_string()))
    }
}

/// Without a runtime `f` runs inline on first poll.
#[cfg(not(feature = "tokio"))]
pub fn spawn_blocking<F, R>(f: F) -> impl Future<Output = Result<R, BlockingTaskError>>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    async move { Ok(f()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_on_without_runtime() {
        assert!(!has_runtime());
        assert_eq!(block_on(async { 40 + 2 }), 42);
    }

    #[cfg(feature = "tokio")]
    #[test]
    fn test_spawn_blocking_inside_runtime() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let value = rt.block_on(async {
            assert!(has_runtime());
            spawn_blocking(|| 6 * 7).await.unwrap()
        });
        assert_eq!(value, 42);
    }
}
