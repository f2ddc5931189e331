//! Formatting of replies to the host.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use core::fmt::Write;
use heapless::String;

use super::command::CommandType;
use super::config::{Address, Eos};
use crate::constants::MAX_REPLY_LEN;

/// A single reply line.
pub struct Reply {
    line: String<MAX_REPLY_LEN>,
    empty: bool,
}

impl Reply {
    /// Start a reply to `command`.  Verbose replies are prefixed with the
    /// command, `++<name> `.
    pub fn new(command: CommandType, verbose: bool) -> Self {
        let mut line = String::new();
        if verbose {
            let _ = write!(line, "++{} ", command.name());
        }
        Self { line, empty: true }
    }

    /// Append a space separated item.
    pub fn item(mut self, value: impl core::fmt::Display) -> Self {
        if !self.empty {
            let _ = self.line.push(' ');
        }
        let _ = write!(self.line, "{}", value);
        self.empty = false;
        self
    }

    /// Append each address item, with secondaries where present.
    pub fn address(mut self, address: &Address) -> Self {
        for item in address.items() {
            self = self.item(item.primary);
            if item.secondary != 0 {
                self = self.item(item.secondary);
            }
        }
        self
    }

    /// Terminate the line.
    pub fn finish(self, eos: Eos) -> String<MAX_REPLY_LEN> {
        let mut line = self.line;
        for &c in eos.reply_terminator() {
            let _ = line.push(c as char);
        }
        line
    }
}
