use rand::seq::IndexedRandom;

use super::{OnDone, PickResult, ReadyConn};
use crate::error::{Error, Result};

/// Uniform choice over the ready set. Keeps no state between picks.
pub struct RandomPicker<T> {
    conns: Vec<T>,
}

impl<T> RandomPicker<T> {
    pub fn new(ready: Vec<ReadyConn<T>>) -> Self {
        Self {
            conns: ready.into_iter().map(|rc| rc.conn).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }
}

impl<T: Clone> RandomPicker<T> {
    pub fn pick(&self) -> Result<PickResult<T>> {
        let conn = self
            .conns
            .choose(&mut rand::rng())
            .ok_or(Error::NoConnectionAvailable)?;

        Ok(PickResult {
            conn: conn.clone(),
            on_done: OnDone::noop(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_picks_every_connection() {
        let picker = RandomPicker::new(vec![
            ReadyConn::new(0usize),
            ReadyConn::new(1),
            ReadyConn::new(2),
        ]);

        let mut seen = [0usize; 3];
        for _ in 0..3000 {
            seen[picker.pick().unwrap().conn] += 1;
        }

        // each should land near 1000
        for count in seen {
            assert!(count > 800, "uneven distribution: {seen:?}");
        }
    }

    #[test]
    fn test_random_empty() {
        let picker = RandomPicker::<usize>::new(Vec::new());
        assert!(picker.pick().is_err());
    }
}
