//! Command-buffer service seam: the authoritative state shared with the
//! client.
//!
//! The scheduler never returns errors to its caller; every outcome of
//! command processing is side-effected onto this interface, which is the
//! single source of truth the client polls.

use opal_protocol::{CommandBufferError, CommandBufferState, ContextLostReason};

use crate::buffer::{TransferBuffer, TransferBufferRegistry};
use crate::scheduler::GpuScheduler;

/// Authoritative `get`/`put`/token/error state for one command stream.
///
/// The scheduler holds no reference to an implementation; callers pass one
/// into each operation that needs it, which keeps the ownership story flat
/// and lets embedders wrap their own transport.
pub trait CommandBufferService {
    fn last_state(&self) -> CommandBufferState;

    /// Publish consumer progress so the client can reuse ring space.
    fn set_get_offset(&mut self, get_offset: i32);

    /// Producer-side cursor commit. The scheduler never calls this; it only
    /// reads the committed value back through [`last_state`].
    ///
    /// [`last_state`]: CommandBufferService::last_state
    fn set_put_offset(&mut self, put_offset: i32);

    /// Echo a client-managed fence value.
    fn set_token(&mut self, token: i32);

    /// Record a fatal parse/decode error. The buffer is broken from here on.
    fn set_parse_error(&mut self, error: CommandBufferError);

    fn set_context_lost_reason(&mut self, reason: ContextLostReason);

    /// Resolve a transfer buffer by id.
    fn transfer_buffer(&self, id: i32) -> Option<TransferBuffer>;
}

/// In-memory reference implementation backed by a [`TransferBufferRegistry`].
///
/// Provides the producer-side operations a client (or a test) drives:
/// buffer creation and `put` advancement.
#[derive(Debug, Default)]
pub struct BasicCommandBufferService {
    state: CommandBufferState,
    buffers: TransferBufferRegistry,
}

impl BasicCommandBufferService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate and register a transfer buffer of `len_entries` entries.
    pub fn create_transfer_buffer(&mut self, id: i32, len_entries: usize) -> TransferBuffer {
        self.buffers.create(id, len_entries)
    }

    pub fn destroy_transfer_buffer(&mut self, id: i32) -> bool {
        self.buffers.destroy(id)
    }

    /// Reset both cursors, as when binding a fresh ring buffer.
    pub fn reset_offsets(&mut self) {
        self.state.get_offset = 0;
        self.state.put_offset = 0;
    }

    /// Client-side flush: commit `put_offset` and ring the scheduler, the
    /// way a client stub does after writing commands.
    pub fn flush(&mut self, put_offset: i32, scheduler: &mut GpuScheduler) {
        self.state.put_offset = put_offset;
        scheduler.put_changed(self);
    }
}

impl CommandBufferService for BasicCommandBufferService {
    fn last_state(&self) -> CommandBufferState {
        self.state
    }

    fn set_get_offset(&mut self, get_offset: i32) {
        self.state.get_offset = get_offset;
    }

    fn set_put_offset(&mut self, put_offset: i32) {
        self.state.put_offset = put_offset;
    }

    fn set_token(&mut self, token: i32) {
        self.state.token = token;
    }

    fn set_parse_error(&mut self, error: CommandBufferError) {
        self.state.error = Some(error);
    }

    fn set_context_lost_reason(&mut self, reason: ContextLostReason) {
        self.state.context_lost_reason = Some(reason);
    }

    fn transfer_buffer(&self, id: i32) -> Option<TransferBuffer> {
        self.buffers.get(id)
    }
}
