//! # Coordination Lab
//!
//! Three classic synchronization problems built on tokio tasks, counting
//! semaphores and cancellation tokens.
//!
//! ## Coordinators
//!
//! 1. **[`ResourceRing`]** - dining philosophers over a ring of forks, with a
//!    naive left-then-right policy that deadlocks and an ordered policy that
//!    cannot
//! 2. **[`HandoffQueue`]** - bounded FIFO between producers and consumers with
//!    backpressure and `complete_adding`
//! 3. **[`WaitingRoom`]** - sleeping barber: one server, `W` waiting chairs,
//!    everyone else is turned away
//!
//! Every blocking call takes a [`CancellationToken`]; a cancelled wait
//! unwinds without leaking a fork, a queue slot or a customer.
//!
//! ## Running the scenarios
//!
//! ```bash
//! cargo run --bin coordination-lab -- all
//! cargo run --bin coordination-lab -- --config lab.toml ring-naive
//! ```
//!
//! ## Key Dependencies
//!
//! - `tokio` / `tokio-util` - tasks, semaphores, barrier, cancellation
//! - `thiserror` - error types
//! - `tracing` - structured logs from inside the coordinators
//! - `serde` / `toml` - scenario configuration

pub mod cancel;
pub mod config;
pub mod error;
pub mod handoff;
pub mod ring;
pub mod scenario;
pub mod waiting_room;

pub use config::{ConfigError, DelayRange, LabConfig, RingPacing, Settings};
pub use error::{CoordinationError, Result};
pub use handoff::HandoffQueue;
pub use ring::ResourceRing;
pub use tokio_util::sync::CancellationToken;
pub use waiting_room::{CustomerId, ShopStats, WaitingRoom};
