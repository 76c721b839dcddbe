use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use crossbeam_queue::ArrayQueue;
use tokio::time::Instant;

use crate::error::{BoxDynError, Result};

/// A transport-level connection that can be held by a [`Pool`](super::Pool).
#[async_trait]
pub trait Connection: Send + Sized + 'static {
    /// Shut the connection down. Called when it expires, when the pool is
    /// over-full at release time, or when the pool closes.
    async fn close(self) -> Result<()>;
}

#[cfg(feature = "tcp")]
#[async_trait]
impl Connection for tokio::net::TcpStream {
    async fn close(mut self) -> Result<()> {
        use tokio::io::AsyncWriteExt;

        self.shutdown()
            .await
            .map_err(|e| crate::error::Error::Close(e.into()))
    }
}

/// Creates new connections on demand. Must be safe to call concurrently.
#[async_trait]
pub trait ConnectionFactory<C: Connection>: Send + Sync + 'static {
    async fn connect(&self) -> Result<C, BoxDynError>;
}

#[async_trait]
impl<C, F, Fut> ConnectionFactory<C> for F
where
    C: Connection,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<C, BoxDynError>> + Send + 'static,
{
    async fn connect(&self) -> Result<C, BoxDynError> {
        (self)().await
    }
}

/// A connection sitting in the idle set, stamped with when it was last active.
pub(crate) struct Idle<C> {
    pub(crate) conn: C,
    pub(crate) last_active: Instant,
}

impl<C> Idle<C> {
    pub(crate) fn new(conn: C) -> Self {
        Self {
            conn,
            last_active: Instant::now(),
        }
    }

    pub(crate) fn is_expired(&self, max_idle_time: Duration) -> bool {
        self.last_active.elapsed() > max_idle_time
    }
}

/// Bounded lock-free buffer of idle connections.
///
/// `ArrayQueue` cannot have a zero capacity, so a pool configured with
/// `max_idle_count == 0` keeps no queue at all and sheds every release.
pub(crate) struct IdleSet<C> {
    queue: Option<ArrayQueue<Idle<C>>>,
}

impl<C> IdleSet<C> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            queue: (capacity > 0).then(|| ArrayQueue::new(capacity)),
        }
    }

    pub(crate) fn pop(&self) -> Option<Idle<C>> {
        self.queue.as_ref()?.pop()
    }

    /// Hands the connection back if the set is full.
    pub(crate) fn push(&self, idle: Idle<C>) -> Result<(), Idle<C>> {
        match &self.queue {
            Some(queue) => queue.push(idle),
            None => Err(idle),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.as_ref().map_or(0, ArrayQueue::len)
    }
}
