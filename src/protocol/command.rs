//! Host command types.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use heapless::Vec;

use crate::constants::MAX_ARGS;

/// The `++` commands, plus the two pseudo commands the parser produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandType {
    Addr,
    Auto,
    Clr,
    Eoi,
    Eos,
    EotEnable,
    EotChar,
    Ifc,
    Llo,
    Loc,
    Lon,
    Mode,
    Read,
    ReadTmoMs,
    Rst,
    SaveCfg,
    Spoll,
    Srq,
    Status,
    Trg,
    Ver,
    Help,
    Debug,
    /// A `++` line whose name isn't in the table.  Dropped by the session.
    Unknown,
    /// Pass-through: one byte to relay to the bus, or (with no argument) the
    /// end of a pass-through line.
    Talk,
}

impl CommandType {
    /// Every named command, in table order.  This is also the `++help`
    /// listing.
    pub const ALL: [CommandType; 23] = [
        CommandType::Addr,
        CommandType::Auto,
        CommandType::Clr,
        CommandType::Eoi,
        CommandType::Eos,
        CommandType::EotEnable,
        CommandType::EotChar,
        CommandType::Ifc,
        CommandType::Llo,
        CommandType::Loc,
        CommandType::Lon,
        CommandType::Mode,
        CommandType::Read,
        CommandType::ReadTmoMs,
        CommandType::Rst,
        CommandType::SaveCfg,
        CommandType::Spoll,
        CommandType::Srq,
        CommandType::Status,
        CommandType::Trg,
        CommandType::Ver,
        CommandType::Help,
        CommandType::Debug,
    ];

    /// The command's name, as typed after `++`.
    pub fn name(self) -> &'static str {
        match self {
            CommandType::Addr => "addr",
            CommandType::Auto => "auto",
            CommandType::Clr => "clr",
            CommandType::Eoi => "eoi",
            CommandType::Eos => "eos",
            CommandType::EotEnable => "eot_enable",
            CommandType::EotChar => "eot_char",
            CommandType::Ifc => "ifc",
            CommandType::Llo => "llo",
            CommandType::Loc => "loc",
            CommandType::Lon => "lon",
            CommandType::Mode => "mode",
            CommandType::Read => "read",
            CommandType::ReadTmoMs => "read_tmo_ms",
            CommandType::Rst => "rst",
            CommandType::SaveCfg => "savecfg",
            CommandType::Spoll => "spoll",
            CommandType::Srq => "srq",
            CommandType::Status => "status",
            CommandType::Trg => "trg",
            CommandType::Ver => "ver",
            CommandType::Help => "help",
            CommandType::Debug => "debug",
            CommandType::Unknown => "unknown",
            CommandType::Talk => "talk",
        }
    }

    /// Resolve a command name.  Exact, case-sensitive match.
    pub fn lookup(name: &[u8]) -> CommandType {
        Self::ALL
            .iter()
            .copied()
            .find(|command| command.name().as_bytes() == name)
            .unwrap_or(CommandType::Unknown)
    }
}

/// A single command argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Arg {
    Value(u32),
    /// The literal `eoi`, as the first argument of `++read`.
    Eoi,
    /// A token which isn't a valid number.
    Invalid,
}

impl Arg {
    /// Parse a numeric token - decimal, or hex with a `0x` prefix.
    pub fn parse(token: &[u8]) -> Arg {
        let (digits, radix) = match token {
            [b'0', b'x' | b'X', rest @ ..] => (rest, 16),
            _ => (token, 10),
        };
        if digits.is_empty() {
            return Arg::Invalid;
        }

        let mut value: u32 = 0;
        for &c in digits {
            let Some(digit) = (c as char).to_digit(radix) else {
                return Arg::Invalid;
            };
            value = match value
                .checked_mul(radix)
                .and_then(|v| v.checked_add(digit))
            {
                Some(v) => v,
                None => return Arg::Invalid,
            };
        }
        Arg::Value(value)
    }

    /// The numeric value, if valid.
    pub fn value(self) -> Option<u32> {
        match self {
            Arg::Value(v) => Some(v),
            _ => None,
        }
    }
}

/// A command produced by the parser, consumed immediately by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub command: CommandType,
    pub args: Vec<Arg, MAX_ARGS>,
}

impl ParsedCommand {
    pub fn new(command: CommandType) -> Self {
        Self {
            command,
            args: Vec::new(),
        }
    }

    /// A pass-through byte.
    pub fn talk(byte: u8) -> Self {
        let mut args = Vec::new();
        let _ = args.push(Arg::Value(u32::from(byte)));
        Self {
            command: CommandType::Talk,
            args,
        }
    }

    /// The end of a pass-through line.
    pub fn talk_end() -> Self {
        Self::new(CommandType::Talk)
    }

    /// The first argument, if there is one.
    pub fn first(&self) -> Option<Arg> {
        self.args.first().copied()
    }
}

/// IEEE-488 bus commands, sent with ATN asserted.
pub mod gpib {
    /// Go To Local
    pub const GTL: u8 = 0x01;
    /// Selected Device Clear
    pub const SDC: u8 = 0x04;
    /// Group Execute Trigger
    pub const GET: u8 = 0x08;
    /// Local Lockout
    pub const LLO: u8 = 0x11;
    /// Serial Poll Enable
    pub const SPE: u8 = 0x18;
    /// Serial Poll Disable
    pub const SPD: u8 = 0x19;
    /// Unlisten
    pub const UNL: u8 = 0x3F;
    /// Untalk
    pub const UNT: u8 = 0x5F;

    const ADDRESS_MASK: u8 = 0x1F;
    const GROUP_MASK: u8 = 0x60;
    const LISTEN_GROUP: u8 = 0x20;
    const TALK_GROUP: u8 = 0x40;

    /// My Listen Address
    pub const fn lad(address: u8) -> u8 {
        address | LISTEN_GROUP
    }

    /// My Talk Address
    pub const fn tad(address: u8) -> u8 {
        address | TALK_GROUP
    }

    /// A listen address, or UNL.
    pub const fn is_lad_or_unl(cmd: u8) -> bool {
        cmd & GROUP_MASK == LISTEN_GROUP
    }

    /// A talk address, or UNT.
    pub const fn is_tad_or_unt(cmd: u8) -> bool {
        cmd & GROUP_MASK == TALK_GROUP
    }

    /// The address carried by a LAD or TAD.  31 for UNL and UNT.
    pub const fn address_of(cmd: u8) -> u8 {
        cmd & ADDRESS_MASK
    }

    pub const UNADDRESS: u8 = ADDRESS_MASK;
}
