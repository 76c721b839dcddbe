//! Smooth weighted round-robin with adaptive weights.
//!
//! Every pick adds each connection's efficient weight to its current weight;
//! the highest current weight wins and pays back the sum of all efficient
//! weights. Over time each connection is chosen in proportion to its efficient
//! weight, and the choices are interleaved rather than bursty.
//!
//! The efficient weight starts at the static weight and moves by one per
//! completed request: down on failure (not below zero), up on success (not
//! above `u32::MAX`). A connection that keeps failing is gradually starved
//! and recovers gradually once it succeeds again.

use std::sync::Arc;

use parking_lot::Mutex;

use super::{weighted, DoneInfo, Feedback, OnDone, PickResult, ReadyConn};
use crate::error::{Error, Result};

#[derive(Debug)]
pub(crate) struct WeightState {
    weight: u32,
    current_weight: i64,
    efficient_weight: u32,
}

struct WeightedConn<T> {
    conn: T,
    state: Arc<Mutex<WeightState>>,
}

pub struct SmoothWeightedPicker<T> {
    conns: Vec<WeightedConn<T>>,
}

impl<T> SmoothWeightedPicker<T> {
    pub fn new(ready: Vec<ReadyConn<T>>) -> Self {
        let conns = weighted(ready)
            .into_iter()
            .map(|(conn, weight)| WeightedConn {
                conn,
                state: Arc::new(Mutex::new(WeightState {
                    weight,
                    current_weight: 0,
                    efficient_weight: weight,
                })),
            })
            .collect();

        Self { conns }
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    /// `(static weight, efficient weight)` per candidate, in build order.
    pub fn weights(&self) -> Vec<(u32, u32)> {
        self.conns
            .iter()
            .map(|c| {
                let state = c.state.lock();
                (state.weight, state.efficient_weight)
            })
            .collect()
    }
}

impl<T: Clone> SmoothWeightedPicker<T> {
    pub fn pick(&self) -> Result<PickResult<T>> {
        let mut total_weight: i64 = 0;
        let mut best: Option<(&WeightedConn<T>, i64)> = None;

        // each entry is locked on its own; unrelated connections never contend
        for candidate in &self.conns {
            let mut state = candidate.state.lock();
            state.current_weight += i64::from(state.efficient_weight);
            total_weight += i64::from(state.efficient_weight);

            if best.map_or(true, |(_, current)| state.current_weight > current) {
                best = Some((candidate, state.current_weight));
            }
        }

        let (winner, _) = best.ok_or(Error::NoConnectionAvailable)?;
        winner.state.lock().current_weight -= total_weight;

        Ok(PickResult {
            conn: winner.conn.clone(),
            on_done: OnDone::with(Feedback::Weight(Arc::clone(&winner.state))),
        })
    }
}

pub(super) fn record(state: &Mutex<WeightState>, info: DoneInfo) {
    let mut state = state.lock();

    state.efficient_weight = if info.is_failure() {
        state.efficient_weight.saturating_sub(1)
    } else {
        state.efficient_weight.saturating_add(1)
    };

    tracing::trace!(
        failed = info.is_failure(),
        efficient_weight = state.efficient_weight,
        "adjusted efficient weight"
    );
}
