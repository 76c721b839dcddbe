//! Client-side building blocks for distributed RPC clients.
//!
//! - [`pool`]: a bounded pool of transport connections with blocking,
//!   cancellable acquisition, lazy idle expiry and FIFO hand-off.
//! - [`picker`]: strategies for choosing one of several ready backend
//!   connections per request (random, weighted random, round-robin, smooth
//!   weighted round-robin, least active).
//! - [`ratelimit`] and [`registry`]: thin front ends over an external
//!   rate-limit store and service registry.

pub mod error;
pub mod picker;
pub mod pool;
pub mod ratelimit;
pub mod registry;

pub use error::{BoxDynError, Error, Result};
pub use picker::{DoneInfo, PickInfo, PickResult, Picker, ReadyConn, Strategy};
pub use pool::{Connection, ConnectionFactory, Pool, PoolOptions};
