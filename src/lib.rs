//! pico488
//!
//! This implements a USB device that allows IEEE-488 (GPIB) instruments to be
//! connected to a PC.
//!
//! The device appears to the host as a virtual serial port, and speaks the
//! Prologix "++" command protocol, so existing GPIB-USB host software can
//! drive it.  It can act either as the controller-in-charge of the bus, or
//! as a single addressable device on it.
//!
//! The GPIB protocol engine (bus transport, command parser and session
//! controller) lives in [`protocol`] and is hardware independent - it talks
//! to the world through the [`BusPort`], [`Clock`], [`HostChannel`] and
//! [`ConfigStore`] traits.  The firmware itself, which implements those
//! traits on the Raspberry Pi Pico, is only built with the `pico` or `pico2`
//! features.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

#![cfg_attr(not(test), no_std)]

// Provide some feature guidance when compiling the firmware.
#[cfg(all(feature = "firmware", not(any(feature = "pico", feature = "pico2"))))]
compile_error!("Either 'pico' or 'pico2' feature must be enabled");
#[cfg(all(feature = "pico", feature = "pico2"))]
compile_error!("Features 'pico' and 'pico2' cannot be enabled simultaneously");

// Declare all of this library's modules.
pub(crate) mod util;
pub mod constants;
pub mod protocol;

#[cfg(feature = "firmware")]
mod entry;
#[cfg(feature = "firmware")]
mod infra;
#[cfg(feature = "firmware")]
mod task;
#[cfg(feature = "firmware")]
mod usb;

#[cfg(feature = "firmware")]
pub use entry::{common_main, defmt_panic_handler, panic_handler};

pub use protocol::bus::{
    BusByte, BusError, BusPort, GpibBus, HandshakeStep, Lines, ReadOptions, ReadPolicy,
    TerminatorMatcher, Transceiver, Uniline, WriteFlags,
};
pub use protocol::command::{Arg, CommandType, ParsedCommand};
pub use protocol::config::{Address, AddressItem, CONFIG_LEN, DebugFlags, Eos, GpibConfig};
pub use protocol::host::{ConfigStore, HostChannel};
pub use protocol::parser::Parser;
pub use protocol::session::{Activity, Session, SessionAction};
pub use util::time::Clock;

// Extra binary information that picotool can read.
#[cfg(feature = "firmware")]
#[unsafe(link_section = ".bi_entries")]
#[used]
pub static PICOTOOL_ENTRIES: [embassy_rp::binary_info::EntryAddr; 4] = [
    embassy_rp::binary_info::rp_program_name!(c"pico488 by piers.rocks"),
    embassy_rp::binary_info::rp_program_description!(c"A USB to IEEE-488 (GPIB) adapter, compatible with the Prologix GPIB-USB command set, acting as either bus controller or device."),
    embassy_rp::binary_info::rp_cargo_version!(),
    embassy_rp::binary_info::rp_program_build_attribute!(),
];

// A note about Statics
//
// We set up statics primarily to avoid lifetime issues, and to allow us to
// spawn tasks (accessing these statics), and to split our code into
// separate modules.
//
// - Use StaticCell for statics that cannot be initialized at compile time.
//
// - Use ConstStaticCell for statics that can be initialized at compile time.
//   It cannot be take()n and then modified and then take()n again.
//
// - If you need mutable access, you need to use a Mutex.  With a
//   blocking_mutex::Mutex you need a RefCell for interior mutability.
//   - Generally use CriticalSectionRawMutex, as these work on multi-core
//     systems, and the GPIB engine runs on core 1 while USB and flash run on
//     core 0.
//
// The statics tend to be stored in the module that creates them.  So, for
// example, the host pipes are in usb::cdc.
