#![cfg_attr(docsrs, feature(doc_cfg))]
//! # Parley
//!
//! A message-correlation test harness for Tokio.
//!
//! Parley drives asynchronous, topic-tagged conversations with remote peers
//! (workers, providers, devices) and checks that each request gets exactly
//! the response it expects. Scenarios run strictly one after another, each
//! bounded by a timeout, and the run ends in a [`Report`] a CI job can turn
//! into an exit code.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use parley::*;
//!
//! #[derive(Clone, Debug)]
//! enum Chat {
//!     Init,
//!     InitDone,
//! }
//!
//! impl Message for Chat {
//!     fn topic(&self) -> Topic {
//!         match self {
//!             Chat::Init => Topic::new("test-init"),
//!             Chat::InitDone => Topic::new("test-init-done"),
//!         }
//!     }
//! }
//!
//! struct Worker {
//!     ctx: Context<Chat>,
//! }
//!
//! impl Actor for Worker {
//!     type Message = Chat;
//!
//!     async fn handle_message(&mut self, envelope: &Envelope<Chat>) -> Result {
//!         if let Chat::Init = envelope.message() {
//!             self.ctx.reply(envelope, Chat::InitDone).await?;
//!         }
//!         Ok(())
//!     }
//! }
//!
//! async fn init_handshake(case: Case<PeerRegistry<Chat>>) -> Result {
//!     let mut port = case.context().connect("worker")?;
//!     let tracker = case.tracker::<Chat>();
//!     port.set_handler(tracker.handler());
//!
//!     let request = port.send(Chat::Init).await?;
//!     let pending = tracker.expect_reply("init", request, ["test-init-done"])?;
//!     let reply = port.wait(pending).await?;
//!     case.is(reply.topic(), Topic::new("test-init-done"), "worker answered");
//!     case.done()
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result {
//!     let peers = PeerRegistry::<Chat>::default();
//!     peers.add_actor("worker", |ctx| Worker { ctx })?;
//!
//!     let report = Runner::new("worker", peers.clone())
//!         .scenario(Scenario::new("init handshake", init_handshake))
//!         .run()
//!         .await;
//!
//!     println!("{report}");
//!     peers.stop().await
//! }
//! ```
//!
//! ## Core Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Message`] | Typed payloads classified by [`Topic`] |
//! | [`Channel`] | Duplex FIFO endpoint with one replaceable inbound handler |
//! | [`CorrelationTracker`] | Matches each response to exactly one outstanding request |
//! | [`wait_for`] | Bounded waits on a predicate, polled or notified |
//! | [`Runner`] | Runs [`Scenario`]s in order, each with its own timeout |
//! | [`Dispatcher`] | Picks the window an incoming request is routed to |
//! | [`HarnessContext`] | Shared window and dispatcher state for a run |
//! | [`PeerRegistry`] | Spawns simulated peers implementing [`Actor`] |
//! | [`Report`] | Per-scenario outcomes, summary and exit code |
//!
//! ## Correlation
//!
//! Every expectation gets a [`Pending`] future. Exactly one response resolves
//! it; a second response with the same topic goes to the next request
//! waiting for it, or is reported as unmatched:
//!
//! ```rust,ignore
//! let first = tracker.expect("open-1", ["chatbox-opened"])?;
//! let second = tracker.expect("open-2", ["chatbox-opened"])?;
//! // the oldest request is served first
//! ```
//!
//! A request that must see a second delivery (reopening a minimized chat)
//! is re-armed with [`CorrelationTracker::reopen`].
//!
//! ## Features
//!
//! - **`serde`** (default) - JSON support: [`Report::to_json`] and the [`wire`] boundary
//! - **`recorder`** - Built-in `Recorder` monitor writing scenario records to JSON Lines
//! - **`cli`** - Command-line front end for suite binaries (`clap` + `tracing-subscriber`)
//!
//! ## Examples
//!
//! See the `examples/` directory of the `parley` crate:
//!
//! - `chat_window.rs`  - Chat windows, repeated callbacks and window selection
//! - `messaging.rs`  - Incoming SMS and requests that must fail
//! - `emergency_call.rs`  - Device console driving a call that must error

mod actor;
mod channel;
mod checks;
mod config;
mod context;
mod device;
mod dispatcher;
mod endpoint_id;
mod envelope;
mod error;
mod harness;
mod message;
mod message_id;
mod meta;
mod registry;
mod report;
mod runner;
mod step_action;
mod topic;
mod tracker;
mod transcript;
mod waiter;

mod internal;

pub mod monitoring;
pub mod monitors;

#[cfg(feature = "serde")]
#[cfg_attr(docsrs, doc(cfg(feature = "serde")))]
pub mod wire;

#[cfg(feature = "cli")]
#[cfg_attr(docsrs, doc(cfg(feature = "cli")))]
pub mod cli;

pub use actor::Actor;
pub use channel::{Channel, Handler};
pub use checks::{Check, Checks, Verdict};
pub use config::Config;
pub use context::Context;
pub use device::{DeviceConsole, OK, ScriptedConsole, expect_ok};
pub use dispatcher::{Dispatcher, SelectionPolicy, TargetId, TargetWindow};
pub use endpoint_id::EndpointId;
pub use envelope::Envelope;
pub use error::Error;
pub use harness::HarnessContext;
pub use message::Message;
pub use message_id::MessageId;
pub use meta::Meta;
pub use registry::PeerRegistry;
pub use report::{ErrorRecord, Outcome, Report, ScenarioRecord};
pub use runner::{Case, Completion, Runner, Scenario};
pub use step_action::StepAction;
pub use topic::Topic;
pub use tracker::{CorrelationTracker, Delivery, Pending, RequestId, RequestState};
pub use transcript::{Transcript, TranscriptQuery};
pub use waiter::{DEFAULT_POLL_INTERVAL, DEFAULT_WAIT_TIMEOUT, Waiter, wait_for};

/// Convenience alias for `Result<T, parley::Error>`.
pub type Result<T = ()> = std::result::Result<T, Error>;
