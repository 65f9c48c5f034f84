//! Adapter exposing a blocking [`ReadAt`] as an [`AsyncReadAt`].

use std::{ops::Range, sync::Arc};

use bytes::Bytes;
use futures::{FutureExt, future::BoxFuture};
use packstore_common::async_runtime;

use crate::{AsyncReadAt, ReadAt};

/// Wraps a blocking reader so that it can be consumed by async callers.
///
/// When a tokio runtime is available, each read is offloaded to the blocking
/// thread pool and the calling task suspends until it completes. Without a
/// runtime the read runs inline when the future is first polled.
#[derive(Clone)]
pub struct BlockingReadAdapter {
    inner: Arc<dyn ReadAt>,
}

impl BlockingReadAdapter {
    pub fn new(inner: Arc<dyn ReadAt>) -> BlockingReadAdapter {
        BlockingReadAdapter { inner }
    }

    pub fn inner(&self) -> &Arc<dyn ReadAt> {
        &self.inner
    }
}

impl AsyncReadAt for BlockingReadAdapter {
    fn size(&self) -> BoxFuture<'_, std::io::Result<u64>> {
        let inner = self.inner.clone();
        run_blocking(move || inner.size())
    }

    fn read_at(&self, range: Range<u64>) -> BoxFuture<'_, std::io::Result<Bytes>> {
        let inner = self.inner.clone();
        run_blocking(move || inner.read_at(range))
    }
}

fn run_blocking<F, R>(f: F) -> BoxFuture<'static, std::io::Result<R>>
where
    F: FnOnce() -> std::io::Result<R> + Send + 'static,
    R: Send + 'static,
{
    if async_runtime::has_runtime() {
        async move {
            async_runtime::spawn_blocking(f)
                .await
                .map_err(std::io::Error::other)?
        }
        .boxed()
    } else {
        async move { f() }.boxed()
    }
}
