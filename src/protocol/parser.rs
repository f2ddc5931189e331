//! This file implements the host command parser.
//!
//! Characters from the host are fed in one at a time.  Ordinary characters
//! are passed straight through, as [`CommandType::Talk`] commands carrying
//! one byte each, for relaying to the bus.  A line starting `++` is instead
//! tokenized into a command name and space separated numeric arguments:
//!
//! ```text
//! ++<name>[ <arg>]*<CR|LF|CRLF>
//! ```
//!
//! ESC (0x1B) makes the following character literal, so `+`, CR, LF and
//! space can be relayed to the bus, or included in a token.  A LF directly
//! following a CR is swallowed, so CR LF is a single terminator.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use heapless::Vec;

use super::command::{Arg, CommandType, ParsedCommand};
use crate::constants::{ESCAPE_CHAR, MAX_TOKEN_LEN};
#[allow(unused_imports)]
use crate::util::log::{debug, error, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum State {
    // Relaying characters to the bus.
    PassThrough,
    // Seen one leading '+'.
    LeadingPlus,
    // Inside a "++" line.
    InToken,
}

// How an incoming character is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CharClass {
    Normal,
    Plus,
    Terminator,
    Separator,
}

/// Streaming `++` command parser.
pub struct Parser {
    state: State,
    escape: bool,
    last_cr: bool,
    token: Vec<u8, MAX_TOKEN_LEN>,

    // The command line being built.  None until its name has been read.
    line: Option<ParsedCommand>,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    pub const fn new() -> Self {
        Self {
            state: State::PassThrough,
            escape: false,
            last_cr: false,
            token: Vec::new(),
            line: None,
        }
    }

    /// Feed a character.  Returns a command when one is complete.
    pub fn parse(&mut self, c: u8) -> Option<ParsedCommand> {
        let class = if self.escape {
            self.escape = false;
            CharClass::Normal
        } else {
            match c {
                ESCAPE_CHAR => {
                    self.escape = true;
                    return None;
                }
                b'+' => CharClass::Plus,
                b'\r' => CharClass::Terminator,
                b'\n' if self.last_cr => {
                    // Second half of CR LF.
                    self.last_cr = false;
                    return None;
                }
                b'\n' => CharClass::Terminator,
                b' ' => CharClass::Separator,
                _ => CharClass::Normal,
            }
        };
        self.last_cr = class == CharClass::Terminator && c == b'\r';

        match self.state {
            State::PassThrough => self.pass_through(c, class),
            State::LeadingPlus => {
                if class == CharClass::Plus {
                    self.state = State::InToken;
                    self.token.clear();
                    self.line = None;
                    None
                } else {
                    // The lone '+' is dropped.
                    self.state = State::PassThrough;
                    self.pass_through(c, class)
                }
            }
            State::InToken => self.in_token(c, class),
        }
    }

    fn pass_through(&mut self, c: u8, class: CharClass) -> Option<ParsedCommand> {
        match class {
            CharClass::Plus => {
                self.state = State::LeadingPlus;
                None
            }
            CharClass::Terminator => Some(ParsedCommand::talk_end()),
            _ => Some(ParsedCommand::talk(c)),
        }
    }

    fn in_token(&mut self, c: u8, class: CharClass) -> Option<ParsedCommand> {
        match class {
            // Stray repeated '+'
            CharClass::Plus => None,
            CharClass::Normal => {
                // Silently truncate over-long tokens.
                let _ = self.token.push(c);
                None
            }
            CharClass::Separator => {
                self.close_token();
                None
            }
            CharClass::Terminator => {
                self.close_token();
                self.state = State::PassThrough;
                let line = self
                    .line
                    .take()
                    .unwrap_or_else(|| ParsedCommand::new(CommandType::Unknown));
                trace!("Parsed {} with {} args", line.command, line.args.len());
                Some(line)
            }
        }
    }

    // Resolve the token just finished, as the command name if we don't have
    // one yet, otherwise as an argument.
    fn close_token(&mut self) {
        if self.token.is_empty() {
            return;
        }

        match self.line.as_mut() {
            None => {
                let command = CommandType::lookup(&self.token);
                if command == CommandType::Unknown {
                    debug!("Unrecognized command");
                }
                self.line = Some(ParsedCommand::new(command));
            }
            Some(line) => {
                let arg = if line.command == CommandType::Read
                    && line.args.is_empty()
                    && self.token.as_slice() == b"eoi"
                {
                    Arg::Eoi
                } else {
                    Arg::parse(&self.token)
                };
                if line.args.push(arg).is_err() {
                    trace!("Dropping excess argument");
                }
            }
        }

        self.token.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(parser: &mut Parser, input: &[u8]) -> std::vec::Vec<ParsedCommand> {
        input.iter().filter_map(|&c| parser.parse(c)).collect()
    }

    #[test]
    fn plain_text_passes_through() {
        let mut parser = Parser::new();
        let out = feed(&mut parser, b"A B\r\n");
        assert_eq!(
            out,
            [
                ParsedCommand::talk(b'A'),
                ParsedCommand::talk(b' '),
                ParsedCommand::talk(b'B'),
                ParsedCommand::talk_end(),
            ]
        );
    }

    #[test]
    fn lone_lf_terminates() {
        let mut parser = Parser::new();
        let out = feed(&mut parser, b"\n\n");
        assert_eq!(out, [ParsedCommand::talk_end(), ParsedCommand::talk_end()]);
    }

    #[test]
    fn command_with_args() {
        let mut parser = Parser::new();
        let out = feed(&mut parser, b"++addr 5 96\r\n");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].command, CommandType::Addr);
        assert_eq!(out[0].args.as_slice(), [Arg::Value(5), Arg::Value(96)]);
    }

    #[test]
    fn extra_spaces_and_pluses_ignored() {
        let mut parser = Parser::new();
        let out = feed(&mut parser, b"+++eos   2 \n");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].command, CommandType::Eos);
        assert_eq!(out[0].args.as_slice(), [Arg::Value(2)]);
    }

    #[test]
    fn read_eoi_only_first_arg() {
        let mut parser = Parser::new();
        let out = feed(&mut parser, b"++read eoi\r++read 1 eoi\r++eoi eoi\r");
        assert_eq!(out[0].args.as_slice(), [Arg::Eoi]);
        assert_eq!(out[1].args.as_slice(), [Arg::Value(1), Arg::Invalid]);
        assert_eq!(out[2].args.as_slice(), [Arg::Invalid]);
    }

    #[test]
    fn single_plus_dropped() {
        let mut parser = Parser::new();
        let out = feed(&mut parser, b"+A\r");
        assert_eq!(out, [ParsedCommand::talk(b'A'), ParsedCommand::talk_end()]);
    }

    #[test]
    fn escape_makes_literal() {
        let mut parser = Parser::new();
        let out = feed(&mut parser, b"\x1b+\x1b+\x1b\r\x1b\x1b\n");
        assert_eq!(
            out,
            [
                ParsedCommand::talk(b'+'),
                ParsedCommand::talk(b'+'),
                ParsedCommand::talk(b'\r'),
                ParsedCommand::talk(ESCAPE_CHAR),
                ParsedCommand::talk_end(),
            ]
        );
    }

    #[test]
    fn escaped_cr_does_not_swallow_lf() {
        let mut parser = Parser::new();
        let out = feed(&mut parser, b"\x1b\r\n");
        assert_eq!(out, [ParsedCommand::talk(b'\r'), ParsedCommand::talk_end()]);
    }

    #[test]
    fn unknown_and_empty_commands() {
        let mut parser = Parser::new();
        let out = feed(&mut parser, b"++Addr 1\r++\r++ \r");
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|c| c.command == CommandType::Unknown));
    }

    #[test]
    fn long_token_truncated() {
        let mut parser = Parser::new();
        let out = feed(&mut parser, b"++read_tmo_msxxxxxxxx 5\r");
        assert_eq!(out[0].command, CommandType::Unknown);

        let out = feed(&mut parser, b"++status 00000000000000000064\r");
        // Truncated to 15 zeros - still a number.
        assert_eq!(out[0].args.as_slice(), [Arg::Value(0)]);
    }

    #[test]
    fn excess_args_dropped() {
        let mut parser = Parser::new();
        let mut line = std::vec::Vec::from(&b"++addr"[..]);
        for _ in 0..40 {
            line.extend_from_slice(b" 1");
        }
        line.push(b'\r');
        let out = feed(&mut parser, &line);
        assert_eq!(out[0].args.len(), crate::constants::MAX_ARGS);
    }
}
