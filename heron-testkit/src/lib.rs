//! Test support for the heron engine.
//!
//! Provides a manually driven [`ManualClock`], scripted
//! [`heron::JobHandler`] implementations, and an instrumented transaction
//! executor for asserting the coordinator's two-transaction protocol.

mod clock;
mod handlers;
mod mock;

pub use clock::ManualClock;
pub use handlers::{HandlerBehavior, HandlerCall, MeterMarkingHandler, ScriptedHandler};
pub use mock::CountingTransactionExecutor;
