//! The persistent GPIB configuration, and its storage format.
//!
//! The configuration is serialized as a fixed 48 byte record:
//!
//! | Offset | Len | Field |
//! |--------|-----|-------|
//! | 0      | 4   | Magic, `G488` |
//! | 4      | 1   | Layout version |
//! | 5      | 1   | Number of address items |
//! | 6      | 30  | 15 (primary, secondary) pairs, unused pairs zero |
//! | 36     | 1   | Read after write |
//! | 37     | 1   | EOI on write |
//! | 38     | 1   | End of string mode |
//! | 39     | 1   | EOT enable |
//! | 40     | 1   | EOT character |
//! | 41     | 1   | Listen only |
//! | 42     | 1   | Controller |
//! | 43     | 2   | Read timeout, ms, little endian |
//! | 45     | 1   | Status byte |
//! | 46     | 1   | Debug flags |
//! | 47     | 1   | XOR of bytes 0-46 |

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use bitflags::bitflags;
use static_assertions::const_assert_eq;

use super::bus::ReadPolicy;
use super::command::Arg;
use crate::constants::{
    DEFAULT_READ_TIMEOUT_MS, MAX_ADDRESS_ITEMS, MAX_PRIMARY_ADDRESS, MAX_READ_TIMEOUT_MS,
    MAX_SECONDARY_ADDRESS, MIN_SECONDARY_ADDRESS,
};

/// Length of a serialized [`GpibConfig`].
pub const CONFIG_LEN: usize = 48;

const CONFIG_MAGIC: [u8; 4] = *b"G488";
const CONFIG_VERSION: u8 = 1;

const ADDRESS_OFFSET: usize = 6;
const FIELDS_OFFSET: usize = ADDRESS_OFFSET + 2 * MAX_ADDRESS_ITEMS;
const CHECKSUM_OFFSET: usize = CONFIG_LEN - 1;
const_assert_eq!(FIELDS_OFFSET + 11, CHECKSUM_OFFSET);

bitflags! {
    /// `++debug` bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DebugFlags: u8 {
        /// Echo characters received from the host.
        const ECHO = 0x01;
        /// Echo bytes relayed to the bus while talking.
        const GPIB_ECHO = 0x02;
        /// Prefix replies with `++<name> `, and reply to set commands too.
        const VERBOSE = 0x04;
    }
}

/// End of string mode.  Selects the terminator appended to transmissions,
/// and the one which ends receptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Eos {
    #[default]
    CrLf = 0,
    Cr = 1,
    Lf = 2,
    None = 3,
}

impl Eos {
    pub const MAX: u8 = Eos::None as u8;

    /// The terminator to send.
    pub fn terminator(self) -> &'static [u8] {
        match self {
            Eos::CrLf => b"\r\n",
            Eos::Cr => b"\r",
            Eos::Lf => b"\n",
            Eos::None => b"",
        }
    }

    /// The terminator used in host replies.  Replies always end with a
    /// line terminator, so "none" uses LF.
    pub fn reply_terminator(self) -> &'static [u8] {
        match self {
            Eos::None => b"\n",
            eos => eos.terminator(),
        }
    }

    /// The policy to use when receiving.
    pub fn read_policy(self) -> ReadPolicy {
        match self {
            Eos::CrLf => ReadPolicy::CrLf,
            Eos::Cr => ReadPolicy::Cr,
            Eos::Lf => ReadPolicy::Lf,
            Eos::None => ReadPolicy::EoiOnly,
        }
    }
}

impl TryFrom<u8> for Eos {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Eos::CrLf),
            1 => Ok(Eos::Cr),
            2 => Ok(Eos::Lf),
            3 => Ok(Eos::None),
            _ => Err(()),
        }
    }
}

/// One bus address: a primary address (0-30) and an optional secondary
/// address (96-126, or 0 for none).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AddressItem {
    pub primary: u8,
    pub secondary: u8,
}

impl AddressItem {
    pub fn new(primary: u8, secondary: u8) -> Option<Self> {
        let item = Self { primary, secondary };
        item.is_valid().then_some(item)
    }

    pub fn is_valid(&self) -> bool {
        self.primary <= MAX_PRIMARY_ADDRESS
            && (self.secondary == 0 || is_secondary(u32::from(self.secondary)))
    }

    /// Parse from the start of an argument list.  Returns the item and the
    /// number of arguments it used, or None if the first argument isn't a
    /// primary address.
    pub fn from_args(args: &[Arg]) -> Option<(Self, usize)> {
        let primary = args.first()?.value()?;
        if primary > u32::from(MAX_PRIMARY_ADDRESS) {
            return None;
        }

        match args.get(1).and_then(|arg| arg.value()) {
            Some(secondary) if is_secondary(secondary) => {
                Some((Self::from_parts(primary, secondary), 2))
            }
            _ => Some((Self::from_parts(primary, 0), 1)),
        }
    }

    fn from_parts(primary: u32, secondary: u32) -> Self {
        Self {
            primary: primary as u8,
            secondary: secondary as u8,
        }
    }
}

fn is_secondary(value: u32) -> bool {
    (u32::from(MIN_SECONDARY_ADDRESS)..=u32::from(MAX_SECONDARY_ADDRESS)).contains(&value)
}

/// An ordered list of up to 15 bus addresses.
#[derive(Debug, Clone, Copy)]
pub struct Address {
    items: [AddressItem; MAX_ADDRESS_ITEMS],
    valid_items: usize,
}

impl Default for Address {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.items() == other.items()
    }
}

impl Eq for Address {}

impl Address {
    pub const fn new() -> Self {
        Self {
            items: [AddressItem {
                primary: 0,
                secondary: 0,
            }; MAX_ADDRESS_ITEMS],
            valid_items: 0,
        }
    }

    /// The populated items.
    pub fn items(&self) -> &[AddressItem] {
        &self.items[..self.valid_items]
    }

    pub fn is_empty(&self) -> bool {
        self.valid_items == 0
    }

    /// Append an item.  Returns false if the address is full.
    pub fn push(&mut self, item: AddressItem) -> bool {
        if self.valid_items >= MAX_ADDRESS_ITEMS {
            return false;
        }
        self.items[self.valid_items] = item;
        self.valid_items += 1;
        true
    }

    /// The first item, or address 0 with no secondary if empty.
    pub fn first(&self) -> AddressItem {
        self.items().first().copied().unwrap_or_default()
    }

    /// The first primary address, or 0 if empty.
    pub fn primary(&self) -> u8 {
        self.first().primary
    }

    /// Build an address from command arguments.  Each primary address may
    /// be followed by a secondary address.  Anything else is skipped.
    /// Returns None if no valid address was found.
    pub fn from_args(args: &[Arg]) -> Option<Self> {
        let mut address = Self::new();
        let mut ii = 0;
        while ii < args.len() {
            match AddressItem::from_args(&args[ii..]) {
                Some((item, used)) => {
                    if !address.push(item) {
                        break;
                    }
                    ii += used;
                }
                None => ii += 1,
            }
        }
        (!address.is_empty()).then_some(address)
    }
}

/// The engine's configuration.  Changed by `++` commands and persisted by
/// `++savecfg`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpibConfig {
    /// Target device(s) in controller mode, our own address in device mode.
    pub address: Address,
    pub read_after_write: bool,
    pub eoi: bool,
    pub eos: Eos,
    pub eot: bool,
    pub eot_char: u8,
    pub listen_only: bool,
    pub controller: bool,
    /// Handshake timeout, 0 is infinite.
    pub timeout_ms: u16,
    /// Device mode serial poll response.  Bit 6 drives SRQ.
    pub status: u8,
    pub debug: DebugFlags,
}

impl Default for GpibConfig {
    fn default() -> Self {
        Self {
            address: Address::new(),
            read_after_write: false,
            eoi: false,
            eos: Eos::CrLf,
            eot: false,
            eot_char: 0,
            listen_only: false,
            controller: true,
            timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            status: 0,
            debug: DebugFlags::empty(),
        }
    }
}

impl GpibConfig {
    /// Serialize.  Deterministic: equal configurations produce identical
    /// bytes.
    pub fn to_bytes(&self) -> [u8; CONFIG_LEN] {
        let mut buf = [0u8; CONFIG_LEN];
        buf[..4].copy_from_slice(&CONFIG_MAGIC);
        buf[4] = CONFIG_VERSION;
        buf[5] = self.address.items().len() as u8;
        for (ii, item) in self.address.items().iter().enumerate() {
            buf[ADDRESS_OFFSET + 2 * ii] = item.primary;
            buf[ADDRESS_OFFSET + 2 * ii + 1] = item.secondary;
        }

        let fields = &mut buf[FIELDS_OFFSET..CHECKSUM_OFFSET];
        fields[0] = u8::from(self.read_after_write);
        fields[1] = u8::from(self.eoi);
        fields[2] = self.eos as u8;
        fields[3] = u8::from(self.eot);
        fields[4] = self.eot_char;
        fields[5] = u8::from(self.listen_only);
        fields[6] = u8::from(self.controller);
        fields[7..9].copy_from_slice(&self.timeout_ms.to_le_bytes());
        fields[9] = self.status;
        fields[10] = self.debug.bits();

        buf[CHECKSUM_OFFSET] = checksum(&buf[..CHECKSUM_OFFSET]);
        buf
    }

    /// Deserialize.  Returns None if the record is corrupt, from a different
    /// layout version, or holds out of range values.
    pub fn from_bytes(buf: &[u8; CONFIG_LEN]) -> Option<Self> {
        if buf[..4] != CONFIG_MAGIC
            || buf[4] != CONFIG_VERSION
            || buf[CHECKSUM_OFFSET] != checksum(&buf[..CHECKSUM_OFFSET])
        {
            return None;
        }

        let count = usize::from(buf[5]);
        if count > MAX_ADDRESS_ITEMS {
            return None;
        }
        let mut address = Address::new();
        for ii in 0..count {
            let item = AddressItem::new(
                buf[ADDRESS_OFFSET + 2 * ii],
                buf[ADDRESS_OFFSET + 2 * ii + 1],
            )?;
            address.push(item);
        }

        let fields = &buf[FIELDS_OFFSET..CHECKSUM_OFFSET];
        let timeout_ms = u16::from_le_bytes([fields[7], fields[8]]);
        if timeout_ms > MAX_READ_TIMEOUT_MS {
            return None;
        }

        Some(Self {
            address,
            read_after_write: flag(fields[0])?,
            eoi: flag(fields[1])?,
            eos: Eos::try_from(fields[2]).ok()?,
            eot: flag(fields[3])?,
            eot_char: fields[4],
            listen_only: flag(fields[5])?,
            controller: flag(fields[6])?,
            timeout_ms,
            status: fields[9],
            debug: DebugFlags::from_bits_retain(fields[10]),
        })
    }

    pub fn verbose(&self) -> bool {
        self.debug.contains(DebugFlags::VERBOSE)
    }
}

fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ b)
}

fn flag(byte: u8) -> Option<bool> {
    match byte {
        0 => Some(false),
        1 => Some(true),
        _ => None,
    }
}
