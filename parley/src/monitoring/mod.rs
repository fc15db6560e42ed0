//! Hooks for observing a run.
//!
//! The [`Runner`](crate::Runner) calls every registered [`Monitor`] as
//! scenarios start, record checks and finish. Ready-made monitors live in
//! [`monitors`](crate::monitors).
//!
//! # Example
//!
//! ```ignore
//! use parley::{Runner, monitoring::Monitor, monitors::Tracer};
//!
//! struct FailureCounter(std::cell::Cell<usize>);
//!
//! impl Monitor for FailureCounter {
//!     fn on_scenario_finish(&self, record: &ScenarioRecord) {
//!         if !record.outcome.is_pass() {
//!             self.0.set(self.0.get() + 1);
//!         }
//!     }
//! }
//!
//! let report = Runner::new("chat", ctx)
//!     .monitor(Tracer)
//!     .monitor(FailureCounter(Default::default()))
//!     .run()
//!     .await;
//! ```

mod monitor;

pub use monitor::Monitor;
