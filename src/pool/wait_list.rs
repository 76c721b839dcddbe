use std::collections::VecDeque;

use tokio::sync::oneshot;

/// What a releasing caller passes to the head waiter.
pub(crate) enum Handoff<C> {
    /// A live connection, still counted in the pool size.
    Conn(C),
    /// A freed slot, still counted in the pool size; the waiter must open a
    /// connection for it or give it back.
    Slot,
}

/// FIFO of callers blocked in `acquire` while the pool is at capacity.
///
/// Each entry is the sending half of a single-use hand-off. Always accessed
/// under the pool's lock so that "check capacity, else enroll" is atomic.
pub(crate) struct WaitList<C> {
    waiters: VecDeque<oneshot::Sender<Handoff<C>>>,
}

impl<C> WaitList<C> {
    pub(crate) fn new() -> Self {
        Self {
            waiters: VecDeque::new(),
        }
    }

    /// Enroll a new waiter at the tail.
    pub(crate) fn push(&mut self) -> oneshot::Receiver<Handoff<C>> {
        // abandoned waiters leave closed senders behind
        self.waiters.retain(|tx| !tx.is_closed());

        let (tx, rx) = oneshot::channel();
        self.waiters.push_back(tx);
        rx
    }

    /// Hand `conn` to the longest-waiting caller that is still listening.
    /// Gives the connection back if nobody took it.
    pub(crate) fn hand_off(&mut self, conn: C) -> Result<(), C> {
        match self.send(Handoff::Conn(conn)) {
            Ok(()) => Ok(()),
            Err(Handoff::Conn(conn)) => Err(conn),
            Err(Handoff::Slot) => unreachable!("hand_off sent a connection"),
        }
    }

    /// Transfer a freed slot to the longest-waiting caller. Returns `false`
    /// if nobody is waiting, in which case the slot is the caller's to free.
    pub(crate) fn hand_slot(&mut self) -> bool {
        self.send(Handoff::Slot).is_ok()
    }

    fn send(&mut self, mut handoff: Handoff<C>) -> Result<(), Handoff<C>> {
        while let Some(tx) = self.waiters.pop_front() {
            match tx.send(handoff) {
                Ok(()) => return Ok(()),
                Err(returned) => {
                    tracing::trace!("skipping abandoned waiter");
                    handoff = returned;
                }
            }
        }

        Err(handoff)
    }

    /// Drop every waiter; each one observes a closed channel.
    pub(crate) fn clear(&mut self) {
        self.waiters.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.waiters.iter().filter(|tx| !tx.is_closed()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hand_off_skips_abandoned_waiters() {
        let mut list = WaitList::new();

        let mut gone = list.push();
        let mut live = list.push();
        gone.close();
        assert_eq!(list.len(), 1);

        assert!(list.hand_off(7).is_ok());
        assert!(matches!(live.try_recv(), Ok(Handoff::Conn(7))));
        assert!(gone.try_recv().is_err());

        assert_eq!(list.hand_off(8).err(), Some(8));
    }

    #[test]
    fn test_hand_slot_goes_to_head() {
        let mut list = WaitList::<u32>::new();
        assert!(!list.hand_slot());

        let mut first = list.push();
        let mut second = list.push();

        assert!(list.hand_slot());
        assert!(matches!(first.try_recv(), Ok(Handoff::Slot)));
        assert!(second.try_recv().is_err());
        assert_eq!(list.len(), 1);
    }
}
