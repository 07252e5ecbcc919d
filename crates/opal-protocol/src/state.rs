//! Shared command-buffer state and error taxonomy.
//!
//! The service is the single writer of this state; the client polls it. A
//! fatal error leaves the command buffer permanently broken until the client
//! recreates the context; deferral and preemption are never surfaced here.

use thiserror::Error;

/// Fatal command-buffer errors, recorded on the service state.
///
/// Once one of these is set the buffer is in a lost-context state: no further
/// commands are processed and the client must tear the context down.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum CommandBufferError {
    #[error("command header declares a size of zero")]
    InvalidSize,
    #[error("command overruns the end of the ring buffer")]
    OutOfBounds,
    #[error("unknown command opcode {opcode}")]
    UnknownCommand { opcode: u16 },
    #[error("invalid command arguments")]
    InvalidArguments,
    #[error("gpu context lost")]
    LostContext,
    #[error("command decode failed")]
    Generic,
}

/// Why the decoder considers its context lost.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContextLostReason {
    Unknown,
    OutOfMemory,
    DecoderError,
}

/// Outcome of decoding a single command.
///
/// `Defer` is the one soft result: the decoder is not ready (typically
/// waiting on a fence or an unfinished transfer) and the same command must be
/// retried later from the same cursor. Everything else is fatal.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("decoder not ready; retry the same command later")]
    Defer,
    #[error(transparent)]
    Fatal(#[from] CommandBufferError),
}

impl CommandError {
    pub fn is_fatal(self) -> bool {
        !matches!(self, Self::Defer)
    }
}

pub type CommandResult = Result<(), CommandError>;

/// Snapshot of the state shared with the client process.
///
/// `get_offset` and `put_offset` are entry indices into the bound ring
/// buffer; `token` is a client-managed fence value echoed back by the
/// service.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CommandBufferState {
    pub get_offset: i32,
    pub put_offset: i32,
    pub token: i32,
    pub error: Option<CommandBufferError>,
    pub context_lost_reason: Option<ContextLostReason>,
}
