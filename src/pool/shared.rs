use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::pool::connection::{Connection, ConnectionFactory, Idle, IdleSet};
use crate::pool::options::PoolOptions;
use crate::pool::wait_list::{Handoff, WaitList};

pub(crate) struct SharedPool<C: Connection> {
    pub(crate) options: PoolOptions,
    factory: Box<dyn ConnectionFactory<C>>,
    idle: IdleSet<C>,
    /// Guards the wait list and makes "check capacity, else enroll" and
    /// "hand to waiter, else push idle" single critical sections.
    waiters: Mutex<WaitList<C>>,
    /// Number of live connections: idle, held by callers, or in flight to a waiter.
    size: AtomicU32,
    is_closed: AtomicBool,
}

/// How a caller that missed the lock-free idle pop proceeds.
enum Slot<'a, C: Connection> {
    Idle(Idle<C>),
    Reserved,
    Wait(Waiter<'a, C>),
}

impl<C: Connection> SharedPool<C> {
    pub(crate) fn new(options: PoolOptions, factory: Box<dyn ConnectionFactory<C>>) -> Self {
        Self {
            idle: IdleSet::new(options.max_idle_count as usize),
            options,
            factory,
            waiters: Mutex::new(WaitList::new()),
            size: AtomicU32::new(0),
            is_closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn size(&self) -> u32 {
        self.size.load(Ordering::Acquire)
    }

    pub(crate) fn num_idle(&self) -> usize {
        self.idle.len()
    }

    pub(crate) fn num_waiters(&self) -> usize {
        self.waiters.lock().len()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.is_closed.load(Ordering::Acquire)
    }

    pub(crate) async fn init_connections(&self) -> Result<()> {
        for _ in 0..self.options.init_count {
            if !self.try_increment_size() {
                break;
            }

            let conn = match self.connect_reserved().await {
                Ok(conn) => conn,
                Err(e) => {
                    self.close().await;
                    return Err(e);
                }
            };

            if let Err(idle) = self.idle.push(Idle::new(conn)) {
                // init_count is clamped to the idle capacity
                self.close_conn(idle.conn).await?;
            }
        }

        tracing::debug!(
            init_count = self.options.init_count,
            max_count = self.options.max_count,
            "pool pre-warmed"
        );

        Ok(())
    }

    pub(crate) async fn acquire(&self, cancel: &CancellationToken) -> Result<C> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        loop {
            if self.is_closed() {
                return Err(Error::PoolClosed);
            }

            // fast path: no lock
            if let Some(idle) = self.idle.pop() {
                match self.check_idle(idle).await {
                    Some(conn) => return Ok(conn),
                    None => continue,
                }
            }

            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let slot = {
                let mut waiters = self.waiters.lock();

                if self.is_closed() {
                    return Err(Error::PoolClosed);
                }

                // a release may have landed in the idle set since the pop above
                if let Some(idle) = self.idle.pop() {
                    Slot::Idle(idle)
                } else if self.try_increment_size() {
                    Slot::Reserved
                } else {
                    Slot::Wait(Waiter::new(self, waiters.push()))
                }
            };

            match slot {
                Slot::Idle(idle) => {
                    if let Some(conn) = self.check_idle(idle).await {
                        return Ok(conn);
                    }
                }
                Slot::Reserved => return self.connect_reserved().await,
                Slot::Wait(waiter) => {
                    tracing::trace!(size = self.size(), "pool exhausted, waiting for a release");

                    match waiter.wait(cancel).await? {
                        Some(Handoff::Conn(conn)) => return Ok(conn),
                        Some(Handoff::Slot) => return self.connect_reserved().await,
                        // the pool closed under us
                        None => {}
                    }
                }
            }
        }
    }

    pub(crate) async fn release(&self, conn: C) -> Result<()> {
        match self.return_conn(conn) {
            Some(conn) => {
                tracing::debug!(size = self.size(), "idle set full, closing released connection");
                self.close_conn(conn).await
            }
            None => Ok(()),
        }
    }

    /// Hand `conn` to the oldest waiter, else park it in the idle set.
    /// Gives it back if neither took it.
    fn return_conn(&self, conn: C) -> Option<C> {
        let mut waiters = self.waiters.lock();

        if self.is_closed() {
            return Some(conn);
        }

        match waiters.hand_off(conn) {
            Ok(()) => {
                tracing::trace!("connection handed directly to waiter");
                None
            }
            Err(conn) => self.idle.push(Idle::new(conn)).err().map(|idle| idle.conn),
        }
    }

    pub(crate) async fn close(&self) {
        {
            let mut waiters = self.waiters.lock();

            if self.is_closed.swap(true, Ordering::AcqRel) {
                return;
            }

            waiters.clear();
        }

        let mut closed = 0;
        while let Some(idle) = self.idle.pop() {
            if let Err(e) = self.close_conn(idle.conn).await {
                tracing::warn!(error = %e, "error closing idle connection during shutdown");
            }
            closed += 1;
        }

        tracing::debug!(closed, remaining = self.size(), "pool closed");
    }

    /// Reserve a slot for a new connection, unless the pool is at capacity.
    fn try_increment_size(&self) -> bool {
        let max = self.options.max_count;

        self.size
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |size| {
                (size < max).then_some(size + 1)
            })
            .is_ok()
    }

    /// Open a connection for a slot already counted in `size`.
    async fn connect_reserved(&self) -> Result<C> {
        let guard = DecrementSizeGuard::new(self);

        let conn = self.factory.connect().await.map_err(Error::Connect)?;

        guard.cancel();
        tracing::debug!(size = self.size(), "opened new connection");

        Ok(conn)
    }

    /// Returns `None` if the connection had expired and was closed.
    async fn check_idle(&self, idle: Idle<C>) -> Option<C> {
        if !idle.is_expired(self.options.max_idle_time) {
            return Some(idle.conn);
        }

        tracing::debug!(
            max_idle_time = ?self.options.max_idle_time,
            "closing expired idle connection"
        );

        if let Err(e) = self.close_conn(idle.conn).await {
            tracing::warn!(error = %e, "error closing expired connection");
        }

        None
    }

    async fn close_conn(&self, conn: C) -> Result<()> {
        self.release_slot();
        conn.close().await
    }

    /// Free a connection's slot; the oldest waiter, if any, inherits it.
    fn release_slot(&self) {
        let mut waiters = self.waiters.lock();

        if !self.is_closed() && waiters.hand_slot() {
            tracing::trace!("freed slot handed to waiter");
            return;
        }

        self.size.fetch_sub(1, Ordering::AcqRel);
    }

    /// Close `conn` without awaiting, for contexts that cannot.
    fn close_detached(&self, conn: C) {
        self.release_slot();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = conn.close().await {
                        tracing::warn!(
                            error = %e,
                            "error closing connection of an abandoned waiter"
                        );
                    }
                });
            }
            Err(_) => tracing::warn!("no runtime to close connection of an abandoned waiter"),
        }
    }
}

/// A caller enrolled in the wait list.
///
/// If it goes away before receiving its hand-off, whether through its
/// cancellation token or because the acquire future was dropped, whatever
/// was already sent to it goes back to the pool.
struct Waiter<'a, C: Connection> {
    pool: &'a SharedPool<C>,
    rx: oneshot::Receiver<Handoff<C>>,
    settled: bool,
}

impl<'a, C: Connection> Waiter<'a, C> {
    fn new(pool: &'a SharedPool<C>, rx: oneshot::Receiver<Handoff<C>>) -> Self {
        Self {
            pool,
            rx,
            settled: false,
        }
    }

    /// Returns `Ok(None)` if the wait list was cleared by `close`.
    async fn wait(mut self, cancel: &CancellationToken) -> Result<Option<Handoff<C>>> {
        let received = tokio::select! {
            biased;
            res = &mut self.rx => Some(res),
            _ = cancel.cancelled() => None,
        };

        match received {
            Some(res) => {
                self.settled = true;
                Ok(res.ok())
            }
            None => Err(Error::Cancelled),
        }
    }
}

impl<C: Connection> Drop for Waiter<'_, C> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }

        // no hand-off can land after this
        self.rx.close();

        match self.rx.try_recv() {
            Ok(Handoff::Conn(conn)) => {
                tracing::trace!("returning connection sent to an abandoned waiter");

                if let Some(conn) = self.pool.return_conn(conn) {
                    self.pool.close_detached(conn);
                }
            }
            Ok(Handoff::Slot) => {
                tracing::trace!("passing on slot sent to an abandoned waiter");
                self.pool.release_slot();
            }
            Err(_) => {}
        }
    }
}

/// Gives back a reserved slot if connecting fails or the acquiring future is dropped.
struct DecrementSizeGuard<'a, C: Connection> {
    pool: &'a SharedPool<C>,
    cancelled: bool,
}

impl<'a, C: Connection> DecrementSizeGuard<'a, C> {
    fn new(pool: &'a SharedPool<C>) -> Self {
        Self {
            pool,
            cancelled: false,
        }
    }

    fn cancel(mut self) {
        self.cancelled = true;
    }
}

impl<C: Connection> Drop for DecrementSizeGuard<'_, C> {
    fn drop(&mut self) {
        if !self.cancelled {
            self.pool.release_slot();
        }
    }
}
