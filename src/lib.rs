use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::AtomicBool;
use std::task::{Context, Poll};

pub mod archive;
pub mod cli;
pub mod config;
pub mod error;
pub mod installer;
pub mod io;
pub mod lock;
pub mod platform;
pub mod repo;
pub mod resolver;
pub mod state_db;
pub mod version;

pub use config::{Config, HttpClient, Paths};
pub use error::{ErrorKind, GooError};

/// Run a blocking closure on the Tokio blocking pool, the same adapter the
/// teacher crate uses to keep filesystem/archive/db work off the async
/// reactor thread.
pub async fn spawn_blocking<T: Send + 'static>(
    f: impl FnOnce() -> anyhow::Result<T> + Send + 'static,
) -> anyhow::Result<T> {
    match tokio::task::spawn_blocking(f).await {
        Ok(r) => r,
        Err(_) => Err(anyhow::anyhow!("failed to join spawned IO task")),
    }
}

pub enum InstallStatus {
    InProgress {
        name: smol_str::SmolStr,
        progress_ratio: Option<(u64, u64)>,
    },
    Stopped,
}

static CANCELLED: AtomicBool = AtomicBool::new(false);

pub fn set_cancelled() {
    CANCELLED.store(true, std::sync::atomic::Ordering::Relaxed);
}

pub fn is_cancelled() -> bool {
    CANCELLED.load(std::sync::atomic::Ordering::Relaxed)
}

pub struct CancellableFuture<Fut> {
    inner: Fut,
}

impl<Fut> CancellableFuture<Fut> {
    pub fn new(inner: Fut) -> Self {
        CancellableFuture { inner }
    }
}

impl<Fut> Future for CancellableFuture<Fut>
where
    Fut: Future,
{
    type Output = Option<Fut::Output>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if is_cancelled() {
            Poll::Ready(None)
        } else {
            let inner = unsafe { self.map_unchecked_mut(|s| &mut s.inner) };
            match inner.poll(cx) {
                Poll::Ready(output) => Poll::Ready(Some(output)),
                Poll::Pending => Poll::Pending,
            }
        }
    }
}
