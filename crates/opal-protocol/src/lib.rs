//! Shared client↔service command-stream ABI for the opal GPU service.
//!
//! This crate defines the byte-level contract between a command-buffer client
//! and the scheduling service that consumes its ring buffer:
//! - the command entry header layout ([`cmd`]),
//! - the shared command-buffer state snapshot and error taxonomy ([`state`]),
//! - a safe client-side command stream builder ([`cmd_writer`]).
//!
//! The service-side engine (parser, scheduler, decoder seams) lives in
//! `opal-scheduler`.
#![forbid(unsafe_code)]

pub mod cmd;
pub mod cmd_writer;
pub mod state;

pub use cmd::{CommandHeader, MAX_COMMAND_SIZE_WORDS, MAX_OPCODE, NOOP_OPCODE};
pub use cmd_writer::CommandWriter;
pub use state::{
    CommandBufferError, CommandBufferState, CommandError, CommandResult, ContextLostReason,
};
