//! Ready-to-use monitor implementations.
//!
//! # Available Monitors
//!
//! - [`Tracer`] - Logs run progress via `tracing` crate
//! - [`Recorder`] - Records finished scenarios to a JSON Lines file (requires `recorder` feature)
//!
//! # Example
//!
//! ```ignore
//! use parley::monitors::Tracer;
//!
//! let report = Runner::new("suite", ctx).monitor(Tracer).run().await;
//! ```

mod tracer;
pub use tracer::Tracer;

#[cfg(feature = "recorder")]
mod recorder;

#[cfg(feature = "recorder")]
#[cfg_attr(docsrs, doc(cfg(feature = "recorder")))]
pub use recorder::Recorder;
