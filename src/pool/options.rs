use crate::error::{Error, Result};
use crate::pool::connection::{Connection, ConnectionFactory};
use crate::pool::shared::SharedPool;
use crate::pool::Pool;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug, Formatter};
use std::time::Duration;

/// Sizing and expiry settings for a [`Pool`].
///
/// Can be built in code or deserialized from a config file:
///
/// ```
/// # use micro_tools::pool::PoolOptions;
/// let options: PoolOptions = serde_json::from_str(
///     r#"{ "max_count": 16, "max_idle_count": 4, "max_idle_time": { "secs": 60, "nanos": 0 } }"#,
/// ).unwrap();
/// assert_eq!(options.get_max_count(), 16);
/// assert_eq!(options.get_init_count(), 0);
/// ```
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolOptions {
    pub(crate) max_count: u32,
    pub(crate) max_idle_count: u32,
    pub(crate) max_idle_time: Duration,
    pub(crate) init_count: u32,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolOptions {
    /// Create a new `PoolOptions` with some arbitrary, but sane, default values.
    ///
    /// See the source of this method for the current values.
    pub fn new() -> Self {
        Self {
            max_count: 10,
            max_idle_count: 10,
            max_idle_time: Duration::from_secs(10 * 60),
            init_count: 0,
        }
    }

    /// Set the maximum number of connections that may be live at once,
    /// whether idle in the pool or held by a caller.
    pub fn max_count(mut self, max: u32) -> Self {
        self.max_count = max;
        self
    }

    /// Set how many unused connections the pool keeps around.
    ///
    /// A connection released while this many are already idle is closed.
    /// Lowered to `max_count` if it exceeds it.
    pub fn max_idle_count(mut self, max: u32) -> Self {
        self.max_idle_count = max;
        self
    }

    /// Set how long a connection may sit idle before it is considered expired.
    ///
    /// Expiry is checked lazily: a stale connection is closed when `acquire`
    /// pops it, and a fresh one is obtained instead.
    pub fn max_idle_time(mut self, timeout: Duration) -> Self {
        self.max_idle_time = timeout;
        self
    }

    /// Set how many connections are opened up front when the pool is built.
    ///
    /// Lowered to `max_idle_count` if it exceeds it.
    pub fn init_count(mut self, count: u32) -> Self {
        self.init_count = count;
        self
    }

    pub fn get_max_count(&self) -> u32 {
        self.max_count
    }

    pub fn get_max_idle_count(&self) -> u32 {
        self.max_idle_count
    }

    pub fn get_max_idle_time(&self) -> Duration {
        self.max_idle_time
    }

    pub fn get_init_count(&self) -> u32 {
        self.init_count
    }

    /// Enforce `init_count <= max_idle_count <= max_count` by lowering the
    /// offending value.
    pub(crate) fn clamped(mut self) -> Result<Self> {
        if self.max_count == 0 {
            return Err(Error::Configuration(
                "max_count must be greater than 0".into(),
            ));
        }

        if self.max_idle_count > self.max_count {
            tracing::warn!(
                max_idle_count = self.max_idle_count,
                max_count = self.max_count,
                "max_idle_count exceeds max_count, lowering it"
            );
            self.max_idle_count = self.max_count;
        }

        if self.init_count > self.max_idle_count {
            tracing::warn!(
                init_count = self.init_count,
                max_idle_count = self.max_idle_count,
                "init_count exceeds max_idle_count, lowering it"
            );
            self.init_count = self.max_idle_count;
        }

        Ok(self)
    }

    /// Creates a new pool from this configuration and immediately establishes
    /// [`init_count`][Self::init_count()] connections.
    ///
    /// Returns an error if `max_count` is zero or if the factory fails while
    /// pre-warming; connections opened before the failure are closed.
    pub async fn connect<C, F>(self, factory: F) -> Result<Pool<C>>
    where
        C: Connection,
        F: ConnectionFactory<C>,
    {
        let shared = SharedPool::new(self.clamped()?, Box::new(factory));

        shared.init_connections().await?;

        Ok(Pool {
            shared: shared.into(),
        })
    }
}

impl Debug for PoolOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolOptions")
            .field("max_count", &self.max_count)
            .field("max_idle_count", &self.max_idle_count)
            .field("max_idle_time", &self.max_idle_time)
            .field("init_count", &self.init_count)
            .finish()
    }
}
