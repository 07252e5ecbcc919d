//! Safe command stream builder.
//!
//! Intended for tests/fixtures and client-side code that needs to emit
//! well-formed command entries (correct header packing, noop padding up to
//! the ring wrap point).

use crate::cmd::{CommandHeader, MAX_COMMAND_SIZE_WORDS, MAX_OPCODE, NOOP_OPCODE};

/// Appends commands to a growable vector of 32-bit entries.
#[derive(Debug, Default, Clone)]
pub struct CommandWriter {
    entries: Vec<u32>,
}

impl CommandWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one command (header word plus `args`).
    pub fn command(&mut self, opcode: u16, args: &[u32]) {
        let size_words = args.len() as u32 + 1;
        assert!(opcode <= MAX_OPCODE, "opcode out of range");
        assert!(
            size_words <= MAX_COMMAND_SIZE_WORDS,
            "command too large for the size field"
        );

        self.entries
            .push(CommandHeader::new(opcode, size_words).pack());
        self.entries.extend_from_slice(args);
    }

    /// Append a single-word noop.
    pub fn noop(&mut self) {
        self.command(NOOP_OPCODE, &[]);
    }

    /// Pad with single-word noops until `len_words` entries have been
    /// written. Clients use this to avoid emitting a command that would
    /// straddle the ring wrap point.
    pub fn pad_with_noops_to(&mut self, len_words: usize) {
        while self.entries.len() < len_words {
            self.noop();
        }
    }

    pub fn len_words(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[u32] {
        &self.entries
    }

    pub fn finish(self) -> Vec<u32> {
        self.entries
    }
}
