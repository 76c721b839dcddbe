//! Error types shared by the pool, the pickers and the collaborator front ends.

use std::error::Error as StdError;
use std::time::Duration;

use thiserror::Error;

/// A boxed error from a connection factory, a transport or an external store.
pub type BoxDynError = Box<dyn StdError + Send + Sync + 'static>;

/// Result type alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Every failure in this crate is per-call; nothing here is fatal to the process.
#[derive(Error, Debug)]
pub enum Error {
    /// The caller's cancellation token fired during [`Pool::acquire`].
    ///
    /// [`Pool::acquire`]: crate::pool::Pool::acquire
    #[error("operation was cancelled")]
    Cancelled,

    /// The caller's deadline elapsed during [`Pool::acquire_timeout`].
    ///
    /// [`Pool::acquire_timeout`]: crate::pool::Pool::acquire_timeout
    #[error("deadline of {0:?} exceeded")]
    Timeout(Duration),

    /// The connection factory failed; the live connection count was not changed.
    #[error("error establishing a connection: {0}")]
    Connect(#[source] BoxDynError),

    /// Closing a connection failed.
    #[error("error closing a connection: {0}")]
    Close(#[source] BoxDynError),

    /// [`Pool::close`] was called.
    ///
    /// [`Pool::close`]: crate::pool::Pool::close
    #[error("attempted to acquire a connection on a closed pool")]
    PoolClosed,

    /// A picker has no ready connection to choose from.
    ///
    /// Retry once the backend topology changes.
    #[error("no connection available")]
    NoConnectionAvailable,

    /// A rate limiter denied the request.
    #[error("rate limited")]
    RateLimited,

    /// The service registry or its backing store failed.
    #[error("registry error: {0}")]
    Registry(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Whether the caller may reasonably retry the same call later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::NoConnectionAvailable | Error::Connect(_) | Error::Timeout(_)
        )
    }
}
