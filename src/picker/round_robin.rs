use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::{Feedback, OnDone, PickResult, ReadyConn};
use crate::error::{Error, Result};

/// Cycles through the ready set in order.
///
/// The shared index moves forward when a request *completes*, not when it is
/// picked, so the rotation tracks finished requests. Requests issued together
/// before any of them completes land on the same connection.
pub struct RoundRobinPicker<T> {
    conns: Vec<T>,
    index: Arc<AtomicUsize>,
}

impl<T> RoundRobinPicker<T> {
    pub fn new(ready: Vec<ReadyConn<T>>) -> Self {
        Self {
            conns: ready.into_iter().map(|rc| rc.conn).collect(),
            index: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }
}

impl<T: Clone> RoundRobinPicker<T> {
    pub fn pick(&self) -> Result<PickResult<T>> {
        if self.conns.is_empty() {
            return Err(Error::NoConnectionAvailable);
        }

        let index = self.index.load(Ordering::Acquire) % self.conns.len();

        Ok(PickResult {
            conn: self.conns[index].clone(),
            on_done: OnDone::with(Feedback::Rotate(Arc::clone(&self.index))),
        })
    }
}

pub(super) fn advance(index: &AtomicUsize) {
    index.fetch_add(1, Ordering::AcqRel);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::picker::DoneInfo;

    fn picker() -> RoundRobinPicker<usize> {
        RoundRobinPicker::new((0..3).map(ReadyConn::new).collect())
    }

    #[test]
    fn test_round_robin_cycles_on_completion() {
        let picker = picker();

        let picked: Vec<_> = (0..7)
            .map(|_| {
                let result = picker.pick().unwrap();
                result.on_done.done(DoneInfo::success());
                result.conn
            })
            .collect();

        assert_eq!(picked, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn test_round_robin_overlapping_requests_share_index() {
        let picker = picker();

        let first = picker.pick().unwrap();
        let second = picker.pick().unwrap();
        assert_eq!(first.conn, second.conn);

        first.on_done.done(DoneInfo::success());
        second.on_done.done(DoneInfo::failure());

        assert_eq!(picker.pick().unwrap().conn, 2);
    }

    #[test]
    fn test_round_robin_wraps_index() {
        let picker = picker();
        picker.index.store(usize::MAX, Ordering::SeqCst);

        let result = picker.pick().unwrap();
        assert_eq!(result.conn, usize::MAX % 3);
        result.on_done.done(DoneInfo::success());

        assert_eq!(picker.pick().unwrap().conn, 0);
    }
}
