//! Command parser: decodes ring entries and dispatches them to a decoder.
//!
//! The parser owns the consumer (`get`) cursor over a bound
//! [`TransferBuffer`] view and is handed the producer (`put`) cursor by the
//! scheduler. It processes bounded command slices so the scheduler can
//! interleave preemption and idle-work checks between calls.

use opal_protocol::{CommandBufferError, CommandHeader, CommandResult};

use crate::buffer::TransferBuffer;
use crate::decoder::Decoder;

/// Cursor state over a bound ring view.
///
/// Offsets are entry indices in `[start, end)`. The ring wraps: a command
/// ending exactly at `end` wraps the cursor back to `start`, and a command
/// that would run past `end` is malformed (clients pad with noops instead of
/// straddling the wrap point).
#[derive(Debug)]
pub struct CommandParser {
    buffer: TransferBuffer,
    start: i32,
    end: i32,
    get: i32,
    put: i32,
    scratch: Vec<u32>,
}

impl CommandParser {
    /// Bind a parser over `buffer[start..end]`. Both cursors begin at
    /// `start`.
    pub fn new(buffer: TransferBuffer, start_offset: i32, end_offset: i32) -> Self {
        debug_assert!(0 <= start_offset);
        debug_assert!(start_offset < end_offset);
        debug_assert!(end_offset as usize <= buffer.len_entries());

        Self {
            buffer,
            start: start_offset,
            end: end_offset,
            get: start_offset,
            put: start_offset,
            scratch: Vec::new(),
        }
    }

    /// Rebind onto a new ring view, resetting both cursors to `start`.
    pub fn set_buffer(&mut self, buffer: TransferBuffer, start_offset: i32, end_offset: i32) {
        *self = Self::new(buffer, start_offset, end_offset);
    }

    pub fn get(&self) -> i32 {
        self.get
    }

    pub fn put(&self) -> i32 {
        self.put
    }

    /// Record the producer cursor. The offset is validated before it is
    /// trusted; `false` means the producer handed us garbage and the caller
    /// must fail the command buffer.
    pub fn set_put(&mut self, offset: i32) -> bool {
        if !self.in_range(offset) {
            return false;
        }
        self.put = offset;
        true
    }

    /// Validate and set the consumer cursor. `false` is a fatal
    /// command-buffer error, never a silent clamp.
    pub fn set_get(&mut self, offset: i32) -> bool {
        if !self.in_range(offset) {
            return false;
        }
        self.get = offset;
        true
    }

    pub fn is_empty(&self) -> bool {
        self.get == self.put
    }

    /// Decode and dispatch up to `max_commands` commands (or until the ring
    /// is empty), invoking `on_command` after each successfully executed
    /// command.
    ///
    /// Returns the first non-`Ok` result immediately, leaving `get` on the
    /// failing/deferred command so a deferral retries the same command on
    /// the next call.
    pub fn process_commands(
        &mut self,
        decoder: &mut dyn Decoder,
        max_commands: u32,
        mut on_command: impl FnMut(),
    ) -> CommandResult {
        for _ in 0..max_commands {
            if self.is_empty() {
                break;
            }
            self.process_one(decoder)?;
            on_command();
        }
        Ok(())
    }

    fn process_one(&mut self, decoder: &mut dyn Decoder) -> CommandResult {
        let get = self.get;
        let header = CommandHeader::unpack(self.buffer.entry(get as usize));
        if header.size_words == 0 {
            return Err(CommandBufferError::InvalidSize.into());
        }

        let size = header.size_words as i32;
        if size > self.end - get {
            return Err(CommandBufferError::OutOfBounds.into());
        }

        // The decoder may reach back into shared memory itself, so hand it a
        // copied argument slice rather than a view into the locked store.
        self.scratch.clear();
        self.scratch.resize(header.arg_words() as usize, 0);
        self.buffer.copy_entries(get as usize + 1, &mut self.scratch);

        decoder.do_command(header.opcode, &self.scratch)?;

        let next = get + size;
        self.get = if next == self.end { self.start } else { next };
        Ok(())
    }

    fn in_range(&self, offset: i32) -> bool {
        self.start <= offset && offset < self.end
    }
}
