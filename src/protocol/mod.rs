//! This module implements the GPIB protocol engine.
//!
//! - [`bus`] - the IEEE-488 bus transport, including the 3-wire handshake.
//! - [`parser`] - the streaming tokenizer turning host characters into
//!   [`command::ParsedCommand`]s.
//! - [`session`] - the session controller, which executes commands in the
//!   controller role, and (with `device`) ingests bus traffic in the device
//!   role.
//! - [`config`] - the persisted configuration and its serialized form.
//!
//! None of this is hardware specific.  On the Pico the handler task drives
//! it from core 1.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

pub mod bus;
pub mod command;
pub mod config;
mod device;
pub mod host;
pub mod parser;
pub mod reply;
pub mod session;

#[cfg(feature = "firmware")]
mod handler;

#[cfg(feature = "firmware")]
pub use handler::protocol_handler_task;
