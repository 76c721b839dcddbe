//! Connection-selection policies over a snapshot of ready backend connections.
//!
//! A [`Picker`] is built from the runtime's ready set every time the backend
//! topology changes and then shared by all in-flight requests. Each
//! [`Picker::pick`] returns one connection plus an [`OnDone`] handle that must
//! be completed when the request finishes; adaptive strategies record their
//! feedback there.
//!
//! ```
//! use micro_tools::picker::{DoneInfo, PickInfo, ReadyConn, Strategy};
//!
//! let ready = vec![
//!     ReadyConn::new("10.0.0.1:9000").with_attribute("weight", "1"),
//!     ReadyConn::new("10.0.0.2:9000").with_attribute("weight", "3"),
//! ];
//! let picker = Strategy::SmoothWeightedRoundRobin.build(ready);
//!
//! let result = picker.pick(&PickInfo::default()).unwrap();
//! // issue the request on `result.conn`...
//! result.on_done.done(DoneInfo::success());
//! ```

use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};
use std::sync::atomic::{AtomicU64, AtomicUsize};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::Result;

mod least_active;
mod random;
mod round_robin;
mod smooth_weighted;
mod weighted_random;

pub use least_active::LeastActivePicker;
pub use random::RandomPicker;
pub use round_robin::RoundRobinPicker;
pub use smooth_weighted::SmoothWeightedPicker;
pub use weighted_random::WeightedRandomPicker;

/// Attribute carrying a connection's static weight as a base-10 integer.
pub const WEIGHT_ATTRIBUTE: &str = "weight";

/// One entry of the runtime's ready-connection snapshot.
#[derive(Debug, Clone)]
pub struct ReadyConn<T> {
    pub conn: T,
    pub attributes: HashMap<String, String>,
}

impl<T> ReadyConn<T> {
    pub fn new(conn: T) -> Self {
        Self {
            conn,
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// The static weight, if the `weight` attribute is present and parses.
    pub fn weight(&self) -> Option<u32> {
        self.attributes.get(WEIGHT_ATTRIBUTE)?.parse().ok()
    }
}

/// Which picker to build, chosen at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Random,
    WeightedRandom,
    #[default]
    RoundRobin,
    SmoothWeightedRoundRobin,
    LeastActive,
}

impl Strategy {
    /// Build a picker over `ready`. Called once per topology change.
    pub fn build<T>(self, ready: Vec<ReadyConn<T>>) -> Picker<T> {
        let offered = ready.len();

        let picker = match self {
            Strategy::Random => Picker::Random(RandomPicker::new(ready)),
            Strategy::WeightedRandom => Picker::WeightedRandom(WeightedRandomPicker::new(ready)),
            Strategy::RoundRobin => Picker::RoundRobin(RoundRobinPicker::new(ready)),
            Strategy::SmoothWeightedRoundRobin => {
                Picker::SmoothWeightedRoundRobin(SmoothWeightedPicker::new(ready))
            }
            Strategy::LeastActive => Picker::LeastActive(LeastActivePicker::new(ready)),
        };

        tracing::debug!(
            strategy = ?self,
            offered,
            candidates = picker.len(),
            "built picker"
        );

        picker
    }
}

/// Per-request information handed to [`Picker::pick`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PickInfo<'a> {
    /// Fully-qualified RPC method, e.g. `/pkg.Service/Method`.
    pub full_method: &'a str,
}

/// Outcome of a request, reported through [`OnDone::done`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DoneInfo {
    failed: bool,
}

impl DoneInfo {
    pub fn success() -> Self {
        Self { failed: false }
    }

    pub fn failure() -> Self {
        Self { failed: true }
    }

    pub fn from_result<T, E>(result: &std::result::Result<T, E>) -> Self {
        Self {
            failed: result.is_err(),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.failed
    }
}

/// The connection chosen for one request.
pub struct PickResult<T> {
    pub conn: T,
    pub on_done: OnDone,
}

impl<T: Debug> Debug for PickResult<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("PickResult")
            .field("conn", &self.conn)
            .finish_non_exhaustive()
    }
}

/// Completion callback for a picked connection.
///
/// Runs exactly once: either through [`done`](Self::done), or, if the handle
/// is dropped without being completed, as a failure.
#[must_use = "complete the handle with `done` once the request finishes"]
pub struct OnDone {
    feedback: Option<Feedback>,
}

/// What a completed request feeds back into its picker.
enum Feedback {
    /// Advance the shared rotation index.
    Rotate(Arc<AtomicUsize>),
    /// Adjust the winner's efficient weight.
    Weight(Arc<Mutex<smooth_weighted::WeightState>>),
    /// Decrement the winner's in-flight counter.
    Active(Arc<AtomicU64>),
}

impl OnDone {
    pub(crate) fn noop() -> Self {
        Self { feedback: None }
    }

    fn with(feedback: Feedback) -> Self {
        Self {
            feedback: Some(feedback),
        }
    }

    pub fn done(mut self, info: DoneInfo) {
        if let Some(feedback) = self.feedback.take() {
            feedback.apply(info);
        }
    }
}

impl Drop for OnDone {
    fn drop(&mut self) {
        if let Some(feedback) = self.feedback.take() {
            feedback.apply(DoneInfo::failure());
        }
    }
}

impl Feedback {
    fn apply(self, info: DoneInfo) {
        match self {
            Feedback::Rotate(index) => round_robin::advance(&index),
            Feedback::Weight(state) => smooth_weighted::record(&state, info),
            Feedback::Active(active) => least_active::finish(&active),
        }
    }
}

/// A built picker; one variant per [`Strategy`].
pub enum Picker<T> {
    Random(RandomPicker<T>),
    WeightedRandom(WeightedRandomPicker<T>),
    RoundRobin(RoundRobinPicker<T>),
    SmoothWeightedRoundRobin(SmoothWeightedPicker<T>),
    LeastActive(LeastActivePicker<T>),
}

impl<T: Clone> Picker<T> {
    /// Choose a connection for one request.
    ///
    /// Fails with [`Error::NoConnectionAvailable`](crate::Error::NoConnectionAvailable)
    /// if there is no candidate.
    pub fn pick(&self, info: &PickInfo<'_>) -> Result<PickResult<T>> {
        tracing::trace!(
            strategy = ?self.strategy(),
            method = info.full_method,
            "picking connection"
        );

        match self {
            Picker::Random(p) => p.pick(),
            Picker::WeightedRandom(p) => p.pick(),
            Picker::RoundRobin(p) => p.pick(),
            Picker::SmoothWeightedRoundRobin(p) => p.pick(),
            Picker::LeastActive(p) => p.pick(),
        }
    }
}

impl<T> Picker<T> {
    pub fn strategy(&self) -> Strategy {
        match self {
            Picker::Random(_) => Strategy::Random,
            Picker::WeightedRandom(_) => Strategy::WeightedRandom,
            Picker::RoundRobin(_) => Strategy::RoundRobin,
            Picker::SmoothWeightedRoundRobin(_) => Strategy::SmoothWeightedRoundRobin,
            Picker::LeastActive(_) => Strategy::LeastActive,
        }
    }

    /// Number of candidates; connections excluded for a bad weight don't count.
    pub fn len(&self) -> usize {
        match self {
            Picker::Random(p) => p.len(),
            Picker::WeightedRandom(p) => p.len(),
            Picker::RoundRobin(p) => p.len(),
            Picker::SmoothWeightedRoundRobin(p) => p.len(),
            Picker::LeastActive(p) => p.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Split the ready set into `(conn, weight)` pairs, dropping unweighted entries.
fn weighted<T>(ready: Vec<ReadyConn<T>>) -> Vec<(T, u32)> {
    ready
        .into_iter()
        .filter_map(|rc| match rc.weight() {
            Some(weight) => Some((rc.conn, weight)),
            None => {
                tracing::warn!(
                    weight = ?rc.attributes.get(WEIGHT_ATTRIBUTE),
                    "excluding connection with missing or invalid weight"
                );
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_weight_attribute_parsing() {
        assert_eq!(ReadyConn::new(0).with_attribute("weight", "7").weight(), Some(7));
        assert_eq!(ReadyConn::new(0).with_attribute("weight", "").weight(), None);
        assert_eq!(ReadyConn::new(0).with_attribute("weight", "-1").weight(), None);
        assert_eq!(ReadyConn::new(0).with_attribute("weight", "heavy").weight(), None);
        assert_eq!(ReadyConn::new(0).weight(), None);
    }

    #[test]
    fn test_weighted_excludes_bad_weights() {
        let ready = vec![
            ReadyConn::new("a").with_attribute("weight", "2"),
            ReadyConn::new("b"),
            ReadyConn::new("c").with_attribute("weight", "x"),
            ReadyConn::new("d").with_attribute("weight", "0"),
        ];

        assert_eq!(weighted(ready), vec![("a", 2), ("d", 0)]);
    }

    #[test]
    fn test_strategy_deserialize() {
        let strategy: Strategy = serde_json::from_str(r#""smooth_weighted_round_robin""#).unwrap();
        assert_eq!(strategy, Strategy::SmoothWeightedRoundRobin);

        let strategy: Strategy = serde_json::from_str(r#""least_active""#).unwrap();
        assert_eq!(strategy, Strategy::LeastActive);

        assert_eq!(Strategy::default(), Strategy::RoundRobin);
    }

    #[test]
    fn test_every_strategy_rejects_empty_ready_set() {
        for strategy in [
            Strategy::Random,
            Strategy::WeightedRandom,
            Strategy::RoundRobin,
            Strategy::SmoothWeightedRoundRobin,
            Strategy::LeastActive,
        ] {
            let picker = strategy.build(Vec::<ReadyConn<&str>>::new());
            assert_eq!(picker.strategy(), strategy);
            assert!(picker.is_empty());

            let err = picker.pick(&PickInfo::default()).unwrap_err();
            assert!(matches!(err, Error::NoConnectionAvailable));
        }
    }

    #[test]
    fn test_dropped_on_done_reports_once() {
        let picker = Strategy::LeastActive.build(vec![ReadyConn::new("a")]);
        let Picker::LeastActive(inner) = &picker else {
            unreachable!()
        };

        let result = picker.pick(&PickInfo::default()).unwrap();
        assert_eq!(inner.active_counts(), vec![1]);

        drop(result);
        assert_eq!(inner.active_counts(), vec![0]);
    }
}
