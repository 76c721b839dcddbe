use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::{Feedback, OnDone, PickResult, ReadyConn};
use crate::error::{Error, Result};

struct ActiveConn<T> {
    conn: T,
    active: Arc<AtomicU64>,
}

/// Routes each request to the connection with the fewest requests in flight.
///
/// Ties go to the earliest connection in the ready set.
pub struct LeastActivePicker<T> {
    conns: Vec<ActiveConn<T>>,
}

impl<T> LeastActivePicker<T> {
    pub fn new(ready: Vec<ReadyConn<T>>) -> Self {
        Self {
            conns: ready
                .into_iter()
                .map(|rc| ActiveConn {
                    conn: rc.conn,
                    active: Arc::new(AtomicU64::new(0)),
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    /// In-flight request count per candidate, in build order.
    pub fn active_counts(&self) -> Vec<u64> {
        self.conns
            .iter()
            .map(|c| c.active.load(Ordering::Acquire))
            .collect()
    }
}

impl<T: Clone> LeastActivePicker<T> {
    pub fn pick(&self) -> Result<PickResult<T>> {
        let winner = self
            .conns
            .iter()
            .min_by_key(|c| c.active.load(Ordering::Acquire))
            .ok_or(Error::NoConnectionAvailable)?;

        let active = winner.active.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::trace!(active, "picked least active connection");

        Ok(PickResult {
            conn: winner.conn.clone(),
            on_done: OnDone::with(Feedback::Active(Arc::clone(&winner.active))),
        })
    }
}

pub(super) fn finish(active: &AtomicU64) {
    active.fetch_sub(1, Ordering::AcqRel);
}
