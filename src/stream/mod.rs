//! Stream module - transfer intake and session plumbing
//!
//! - `transfer`: normalized input records
//! - `backpressure`: bounded intake queue between producer and the core
//! - `clock`: chain-aligned time for idle ticks
//! - `runner`: async producer/consumer session

pub mod backpressure;
pub mod clock;
pub mod runner;
pub mod transfer;

pub use backpressure::{Admission, IntakeQueue};
pub use clock::ChainClock;
pub use runner::{run_session, EventSink, JsonlSink, MemorySink, RunSummary};
pub use transfer::{Direction, RawTransfer, TransferEvent};
