//! This module contains constants for pico488.
//!
//! Those in the first half are used by the GPIB protocol engine and are
//! available on every build.  Those in the second half configure the
//! firmware - timers, USB descriptors, pins and flash layout.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use static_assertions::const_assert;

//
// GPIB protocol engine constants
//

/// Identification string returned by `++ver`.
pub const VERSION_STRING: &str = concat!(
    "pico488 GPIB-USB ",
    env!("CARGO_PKG_VERSION"),
    " (Prologix version 6.0 compatible)"
);

/// The escape character, which makes the following host character literal.
pub const ESCAPE_CHAR: u8 = 0x1B;

/// Maximum length of a single command token.  Longer tokens are truncated.
pub const MAX_TOKEN_LEN: usize = 15;

/// Maximum number of arguments to a single command.  Further arguments are
/// dropped.
pub const MAX_ARGS: usize = 30;

/// Maximum number of (primary, secondary) pairs in an address.
pub const MAX_ADDRESS_ITEMS: usize = 15;

/// Highest valid primary address.
pub const MAX_PRIMARY_ADDRESS: u8 = 30;

/// Valid range for secondary addresses.  0 means "no secondary address".
pub const MIN_SECONDARY_ADDRESS: u8 = 96;
pub const MAX_SECONDARY_ADDRESS: u8 = 126;

/// The controller's own bus address.
pub const CONTROLLER_ADDRESS: u8 = 0;

/// Largest read timeout accepted by `++read_tmo_ms`.
pub const MAX_READ_TIMEOUT_MS: u16 = 3000;

/// Default read timeout.
pub const DEFAULT_READ_TIMEOUT_MS: u16 = 10;

/// Largest handshake wait budget, in 10ms ticks.  Longer timeouts are
/// clamped to this (2540ms).
pub const MAX_TIMEOUT_TICKS: u8 = 0xFE;

/// How long IFC is held asserted by `++ifc`.
pub const IFC_HOLD_MS: u32 = 1;

/// Status byte bit which requests service (drives SRQ in device mode).
pub const STATUS_RQS: u8 = 0x40;

/// Maximum number of host characters consumed per polling pass.
pub const HOST_CHUNK_SIZE: usize = 16;

/// Maximum length of a single formatted reply line.
pub const MAX_REPLY_LEN: usize = 192;

const_assert!(MAX_TOKEN_LEN >= "read_tmo_ms".len());
const_assert!(MAX_ARGS >= 2 * MAX_ADDRESS_ITEMS);
const_assert!(MAX_PRIMARY_ADDRESS < 31);
const_assert!((MAX_READ_TIMEOUT_MS as u32).div_ceil(10) > MAX_TIMEOUT_TICKS as u32);

//
// Task main runner and related timers.
//

/// Timer for the StatusDisplay spend on and off when blinking, in ms.
pub const STATUS_DISPLAY_BLINK_TIMER_MS: u64 = 100;

/// Timer for the StatusDisplay to pause between doing work, in ms.  Must be
/// less than the minimum time the status LED can be on or off.
pub const STATUS_DISPLAY_TIMER_MS: u64 = 50;
const_assert!(STATUS_DISPLAY_TIMER_MS < STATUS_DISPLAY_BLINK_TIMER_MS);

/// How often we aim to log from our primary loops to prove they are still
/// alive, in ms.
pub const LOOP_LOG_INTERVAL_MS: u64 = 5000;

/// How long the protocol task pauses between polling passes, in us, so that
/// other tasks on core 1 get to run.
pub const PROTOCOL_LOOP_TIMER_US: u64 = 100;

/// How long a write to a full host pipe spins before the data is dropped,
/// in ms.
pub const HOST_WRITE_TIMEOUT_MS: u64 = 100;

//
// USB device configuration constants.
//

/// USB Descriptor information - what current in mA this device draws.
pub const USB_POWER_MA: u16 = 500;

/// USB Descriptor information - maximum endpoint 0 (control endpoint)
/// packet size.
pub const MAX_PACKET_SIZE_0: u8 = 64;

/// USB Descriptor information - maximum CDC-ACM endpoint packet size.
pub const MAX_EP_PACKET_SIZE: u16 = 64;
pub const MAX_EP_PACKET_SIZE_USIZE: usize = MAX_EP_PACKET_SIZE as usize;

/// USB Descriptor information - Vendor ID and Product ID
pub const VENDOR_ID: u16 = 0x1209;
pub const PRODUCT_ID: u16 = 0xf488;

/// USB Descriptor information - manufacturer string
pub const MANUFACTURER: &str = "piers.rocks";

/// USB Descriptor info - product string
pub const PRODUCT: &str = "pico488 GPIB-USB adapter";

/// Length of the serial number string - 8 bytes of flash unique ID as hex.
pub const MAX_SERIAL_STRING_LEN: usize = 16;

/// Size of each of the pipes between the USB tasks and the GPIB engine.
pub const HOST_PIPE_SIZE: usize = 256;
const_assert!(HOST_PIPE_SIZE >= MAX_EP_PACKET_SIZE_USIZE);

//
// Flash constants
//

/// Total flash size of the Pico and Pico 2 we support.
#[cfg(feature = "pico")]
pub const FLASH_SIZE: usize = 2 * 1024 * 1024;
#[cfg(not(feature = "pico"))]
pub const FLASH_SIZE: usize = 4 * 1024 * 1024;

/// Flash erase sector size.
pub const FLASH_SECTOR_SIZE: usize = 4096;

/// Offset (from the start of flash) of the sector holding the persisted GPIB
/// configuration - the last sector.
pub const CONFIG_FLASH_OFFSET: u32 = (FLASH_SIZE - FLASH_SECTOR_SIZE) as u32;
const_assert!(CONFIG_FLASH_OFFSET as usize % FLASH_SECTOR_SIZE == 0);

//
// Pin constants
//
// Not all pins have constants - see infra/gpio.rs for the GPIB pin
// assignments.
//

/// Status LED pin
pub const STATUS_LED_PIN: u8 = 25;

//
// Other constants
//

/// The size (in bytes) of the stack for core 1.
pub const CORE1_STACK_SIZE: usize = 8192;
