//! Service-side GPU command-buffer scheduling engine.
//!
//! A client process serializes GPU commands into a shared ring of 32-bit
//! entries (see `opal-protocol`) and advances a `put` cursor; this crate
//! pulls commands off that ring and dispatches them to a [`Decoder`] while
//! coordinating a cooperative scheduled/unscheduled state machine:
//!
//! - [`parser::CommandParser`] owns the `get` cursor and decodes one bounded
//!   command slice per call,
//! - [`scheduler::GpuScheduler`] drives the parser from `put_changed`,
//!   yielding on decoder deferral, preemption, or descheduling, and
//!   recovering liveness through an optional legacy reschedule timeout,
//! - [`service::CommandBufferService`] is the seam to the authoritative
//!   shared state the client polls,
//! - [`preempt::PreemptionFlag`] is the one cross-thread signal: a
//!   higher-priority scheduler sets it to make this one yield between
//!   command slices.
//!
//! The scheduler is single-threaded cooperative: all mutating entry points
//! take `&mut self`, so callers serialize them by construction. Commands are
//! always processed in ring order; deferral and preemption pause and later
//! resume from the exact same cursor.
#![forbid(unsafe_code)]

pub mod buffer;
pub mod decoder;
pub mod parser;
pub mod preempt;
pub mod scheduler;
pub mod service;
pub mod time;

pub use buffer::{TransferBuffer, TransferBufferRegistry};
pub use decoder::{Decoder, NoopDecoder};
pub use parser::CommandParser;
pub use preempt::PreemptionFlag;
pub use scheduler::{GpuScheduler, GpuSchedulerConfig, SchedulerStats};
pub use service::{BasicCommandBufferService, CommandBufferService};
pub use time::{ManualClock, MonotonicClock, TimeSource};

pub use opal_protocol::{
    CommandBufferError, CommandBufferState, CommandError, CommandResult, ContextLostReason,
};
