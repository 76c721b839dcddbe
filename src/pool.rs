//! Bounded pool of transport connections shared by concurrent callers.
//!
//! Idle connections live in a lock-free bounded queue, so the common path
//! (an idle connection is available) never takes a lock. Only when the pool is
//! at capacity does a caller enroll in a FIFO wait list, guarded by a single
//! mutex, and block until a [`Pool::release`] hands it a connection directly.
//!
//! ```no_run
//! # async fn example() -> micro_tools::Result<()> {
//! use micro_tools::pool::{Pool, PoolOptions};
//! use micro_tools::BoxDynError;
//! use tokio::net::TcpStream;
//! use tokio_util::sync::CancellationToken;
//!
//! let pool: Pool<TcpStream> = PoolOptions::new()
//!     .max_count(8)
//!     .max_idle_count(4)
//!     .connect(|| async {
//!         Ok::<_, BoxDynError>(TcpStream::connect("127.0.0.1:9000").await?)
//!     })
//!     .await?;
//!
//! let conn = pool.acquire(&CancellationToken::new()).await?;
//! // use the connection...
//! pool.release(conn).await?;
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, Result};
use crate::pool::shared::SharedPool;
use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

mod connection;
mod options;
mod shared;
mod wait_list;


pub use connection::{Connection, ConnectionFactory};
pub use options::PoolOptions;

/// A pool of connections of type `C`. Cheap to clone; clones share the pool.
pub struct Pool<C: Connection> {
    pub(crate) shared: Arc<SharedPool<C>>,
}

impl<C: Connection> Clone for Pool<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: Connection> Pool<C> {
    /// Build a pool with the given options; shorthand for
    /// [`PoolOptions::connect`].
    pub async fn connect<F>(options: PoolOptions, factory: F) -> Result<Self>
    where
        F: ConnectionFactory<C>,
    {
        options.connect(factory).await
    }

    /// Take a connection out of the pool.
    ///
    /// Returns an idle connection if one is fresh, opens a new one if the pool
    /// is below `max_count`, and otherwise waits, first-come first-served,
    /// for another caller to [`release`](Self::release) one.
    ///
    /// Fails with [`Error::Cancelled`] if `cancel` fires before a connection is
    /// obtained. A connection that was already on its way to a cancelled
    /// caller goes back to the pool, and so does one on its way to a caller
    /// whose future was dropped.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<C> {
        self.shared.acquire(cancel).await
    }

    /// Like [`acquire`](Self::acquire), but gives up after `timeout` with
    /// [`Error::Timeout`].
    pub async fn acquire_timeout(&self, timeout: Duration) -> Result<C> {
        let cancel = CancellationToken::new();

        tokio::time::timeout(timeout, self.shared.acquire(&cancel))
            .await
            .map_err(|_| Error::Timeout(timeout))?
    }

    /// Give a connection back to the pool.
    ///
    /// The longest-waiting caller receives it directly. With no waiters it
    /// becomes idle, unless the idle set is full, in which case it is closed
    /// and any error from closing it is returned.
    pub async fn release(&self, conn: C) -> Result<()> {
        self.shared.release(conn).await
    }

    /// Shut down the pool.
    ///
    /// Blocked callers fail with [`Error::PoolClosed`] and idle connections
    /// are closed. Connections currently held by callers are closed when they
    /// are released.
    pub async fn close(&self) {
        self.shared.close().await
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Number of live connections, idle or in use.
    pub fn size(&self) -> u32 {
        self.shared.size()
    }

    pub fn num_idle(&self) -> usize {
        self.shared.num_idle()
    }

    /// Number of callers blocked in `acquire`.
    pub fn num_waiters(&self) -> usize {
        self.shared.num_waiters()
    }

    pub fn options(&self) -> &PoolOptions {
        &self.shared.options
    }
}

impl<C: Connection> Debug for Pool<C> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("size", &self.size())
            .field("num_idle", &self.num_idle())
            .field("is_closed", &self.is_closed())
            .field("options", self.options())
            .finish()
    }
}
