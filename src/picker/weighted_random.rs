use rand::Rng;

use super::{weighted, OnDone, PickResult, ReadyConn};
use crate::error::{Error, Result};

/// Picks a connection with probability proportional to its static weight.
///
/// Connections without a valid `weight` attribute are not candidates.
pub struct WeightedRandomPicker<T> {
    conns: Vec<(T, u32)>,
    total_weight: u64,
}

impl<T> WeightedRandomPicker<T> {
    pub fn new(ready: Vec<ReadyConn<T>>) -> Self {
        let conns = weighted(ready);
        let total_weight = conns.iter().map(|(_, weight)| u64::from(*weight)).sum();

        Self {
            conns,
            total_weight,
        }
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    pub fn total_weight(&self) -> u64 {
        self.total_weight
    }

    /// Walk the candidates, subtracting each weight from `point`, until the
    /// remainder falls inside one. `point` must be below `total_weight`.
    fn locate(&self, mut point: u64) -> Option<&T> {
        for (conn, weight) in &self.conns {
            let weight = u64::from(*weight);
            if point < weight {
                return Some(conn);
            }
            point -= weight;
        }

        None
    }
}

impl<T: Clone> WeightedRandomPicker<T> {
    pub fn pick(&self) -> Result<PickResult<T>> {
        // an all-zero set has nothing to draw from
        if self.total_weight == 0 {
            return Err(Error::NoConnectionAvailable);
        }

        let point = rand::rng().random_range(0..self.total_weight);
        let conn = self.locate(point).ok_or(Error::NoConnectionAvailable)?;

        Ok(PickResult {
            conn: conn.clone(),
            on_done: OnDone::noop(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn picker(weights: &[(&'static str, &str)]) -> WeightedRandomPicker<&'static str> {
        WeightedRandomPicker::new(
            weights
                .iter()
                .map(|(name, weight)| ReadyConn::new(*name).with_attribute("weight", *weight))
                .collect(),
        )
    }

    #[test]
    fn test_locate_boundaries() {
        let picker = picker(&[("a", "1"), ("b", "3")]);
        assert_eq!(picker.total_weight(), 4);

        assert_eq!(picker.locate(0), Some(&"a"));
        assert_eq!(picker.locate(1), Some(&"b"));
        assert_eq!(picker.locate(3), Some(&"b"));
        assert_eq!(picker.locate(4), None);
    }

    #[test]
    fn test_zero_weight_never_selected() {
        let picker = picker(&[("a", "0"), ("b", "2")]);
        for _ in 0..200 {
            assert_eq!(picker.pick().unwrap().conn, "b");
        }
    }

    #[test]
    fn test_distribution_follows_weights() {
        let picker = picker(&[("a", "1"), ("b", "3")]);

        let draws = 40_000;
        let a = (0..draws).filter(|_| picker.pick().unwrap().conn == "a").count();
        let ratio = (draws - a) as f64 / a as f64;

        assert!((2.7..3.3).contains(&ratio), "ratio was {ratio}");
    }

    #[test]
    fn test_unweighted_connections_excluded() {
        let picker = WeightedRandomPicker::new(vec![
            ReadyConn::new("a"),
            ReadyConn::new("b").with_attribute("weight", "5"),
        ]);

        assert_eq!(picker.len(), 1);
        assert_eq!(picker.pick().unwrap().conn, "b");
    }

    #[test]
    fn test_all_zero_weights_unavailable() {
        let picker = picker(&[("a", "0"), ("b", "0")]);
        assert!(matches!(picker.pick(), Err(Error::NoConnectionAvailable)));
    }
}
