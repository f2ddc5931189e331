//! This file implements the bus session controller.
//!
//! The session owns the configuration, the parser and the bus transport.
//! Each call to [`Session::poll`] is one pass of the engine's single polling
//! loop:
//! - consume whatever the host has sent, executing each parsed command
//! - in device mode, when not talking, ingest bytes from the bus until it
//!   goes quiet (see `device.rs`)
//! - flush output to the host.
//!
//! Host text which isn't a `++` command is relayed to the bus one byte
//! behind: the byte received on one call is only written when the next one
//! arrives, so that when the end of the line arrives the final byte can be
//! sent with EOI, or followed by the terminator.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use super::bus::{
    BusPort, GpibBus, ReadOptions, ReadPolicy, TerminatorMatcher, Uniline, WriteFlags,
};
use super::command::{Arg, CommandType, ParsedCommand, gpib};
use super::config::{Address, AddressItem, DebugFlags, Eos, GpibConfig};
use super::host::{ConfigStore, HostChannel};
use super::parser::Parser;
use super::reply::Reply;
use crate::constants::{
    CONTROLLER_ADDRESS, HOST_CHUNK_SIZE, IFC_HOLD_MS, MAX_READ_TIMEOUT_MS, STATUS_RQS,
    VERSION_STRING,
};
#[allow(unused_imports)]
use crate::util::log::{debug, error, info, trace, warn};
use crate::util::time::Clock;

/// What the caller of [`Session::poll`] needs to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionAction {
    None,
    /// The host asked for a reset (`++rst`).
    Reset,
}

/// What the session did in the last polling pass.  Drives the status LED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Activity {
    pub controller: bool,
    /// Relaying host data to the bus.
    pub talking: bool,
    /// Relayed bus data to the host.
    pub listening: bool,
}

// Device role sub-state.  Reset whenever we become a device.
#[derive(Debug)]
pub(crate) struct DeviceState {
    pub(crate) talkable: bool,
    pub(crate) listening: bool,
    pub(crate) serial_polling: bool,
    pub(crate) matcher: TerminatorMatcher,
}

impl DeviceState {
    const fn new() -> Self {
        Self {
            talkable: false,
            listening: false,
            serial_polling: false,
            matcher: TerminatorMatcher::new(ReadPolicy::CrLf),
        }
    }
}

/// The GPIB session: configuration, role state, parser and transport.
pub struct Session<P: BusPort, C: Clock, H: HostChannel, S: ConfigStore> {
    pub(crate) bus: GpibBus<P, C>,
    pub(crate) host: H,
    store: S,
    parser: Parser,
    pub(crate) config: GpibConfig,

    // The talk byte waiting to be written.  Some while talking.
    pending: Option<u8>,

    pub(crate) device: DeviceState,

    // Bus data was relayed to the host during this pass.
    pub(crate) listening: bool,

    reset_requested: bool,
}

impl<P: BusPort, C: Clock, H: HostChannel, S: ConfigStore> Session<P, C, H, S> {
    /// Create the session, loading the persisted configuration (or the
    /// defaults) and initializing the bus.
    pub fn new(port: P, clock: C, host: H, mut store: S) -> Self {
        let config = match store.load().map(|record| GpibConfig::from_bytes(&record)) {
            Some(Some(config)) => {
                info!("Loaded stored configuration");
                config
            }
            Some(None) => {
                warn!("Stored configuration invalid, using defaults");
                GpibConfig::default()
            }
            None => {
                info!("No stored configuration, using defaults");
                GpibConfig::default()
            }
        };

        let mut bus = GpibBus::new(port, clock, config.controller);
        bus.set_timeout(config.timeout_ms);

        let mut session = Self {
            bus,
            host,
            store,
            parser: Parser::new(),
            config,
            pending: None,
            device: DeviceState::new(),
            listening: false,
            reset_requested: false,
        };
        session.device_init();
        info!(
            "GPIB session started as {}",
            if config.controller { "controller" } else { "device" }
        );
        session
    }

    /// The current configuration.
    pub fn config(&self) -> &GpibConfig {
        &self.config
    }

    /// The bus transport.
    pub fn bus(&self) -> &GpibBus<P, C> {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut GpibBus<P, C> {
        &mut self.bus
    }

    /// The host channel.
    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// The configuration store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Whether a talk byte is waiting to be written to the bus.
    pub fn is_talking(&self) -> bool {
        self.pending.is_some()
    }

    /// What happened in the last pass.
    pub fn activity(&self) -> Activity {
        Activity {
            controller: self.config.controller,
            talking: self.is_talking(),
            listening: self.listening,
        }
    }

    /// Run one pass of the polling loop.
    pub fn poll(&mut self) -> SessionAction {
        self.listening = false;

        let mut buf = [0u8; HOST_CHUNK_SIZE];
        let count = self.host.read(&mut buf);
        for &c in &buf[..count] {
            if self.config.debug.contains(DebugFlags::ECHO) {
                self.host.write(&[c]);
            }
            if let Some(command) = self.parser.parse(c) {
                self.execute(command);
            }
            if self.reset_requested {
                break;
            }
        }

        if !self.reset_requested && !self.config.controller && !self.is_talking() {
            self.device_poll();
        }

        self.host.flush();

        if core::mem::take(&mut self.reset_requested) {
            SessionAction::Reset
        } else {
            SessionAction::None
        }
    }

    /// Execute a parsed command.
    pub fn execute(&mut self, command: ParsedCommand) {
        let verbose = self.config.verbose();

        // With arguments, a command sets rather than queries, and doesn't
        // reply - unless verbose.
        let query = verbose || command.args.is_empty();
        let args = command.args.as_slice();
        let first = command.first();

        trace!("Execute {}", command.command);
        match command.command {
            CommandType::Addr => {
                if let Some(address) = Address::from_args(args) {
                    self.config.address = address;
                }
                if query {
                    self.reply_address(CommandType::Addr, self.config.address);
                }
            }
            CommandType::Auto => {
                renew_flag(first, &mut self.config.read_after_write);
                if query {
                    self.reply_value(CommandType::Auto, self.config.read_after_write);
                }
            }
            CommandType::Clr => {
                if self.config.controller {
                    self.force_end_talking();
                    self.send_command(gpib::SDC, Some(self.config.address));
                }
            }
            CommandType::Eoi => {
                renew_flag(first, &mut self.config.eoi);
                if query {
                    self.reply_value(CommandType::Eoi, self.config.eoi);
                }
            }
            CommandType::Eos => {
                let mut eos = self.config.eos as u8;
                if renew(first, &mut eos, Eos::MAX) {
                    if let Ok(eos) = Eos::try_from(eos) {
                        self.config.eos = eos;
                    }
                }
                if query {
                    self.reply_value(CommandType::Eos, self.config.eos as u8);
                }
            }
            CommandType::EotEnable => {
                renew_flag(first, &mut self.config.eot);
                if query {
                    self.reply_value(CommandType::EotEnable, self.config.eot);
                }
            }
            CommandType::EotChar => {
                renew(first, &mut self.config.eot_char, u8::MAX);
                if query {
                    self.reply_value(CommandType::EotChar, self.config.eot_char);
                }
            }
            CommandType::Ifc => {
                if self.config.controller {
                    self.force_end_talking();
                    self.bus.control_signal(Uniline::BusClearStart);
                    self.bus.hold_ms(IFC_HOLD_MS);
                    self.bus.control_signal(Uniline::BusClearEnd);
                }
            }
            CommandType::Llo => {
                if self.config.controller {
                    self.force_end_talking();
                    self.send_command(gpib::LLO, None);
                }
            }
            CommandType::Loc => {
                if self.config.controller {
                    self.force_end_talking();
                    self.send_command(gpib::GTL, Some(self.config.address));
                }
            }
            CommandType::Lon => {
                renew_flag(first, &mut self.config.listen_only);
                if self.config.listen_only {
                    self.device.listening = true;
                }
                if query {
                    self.reply_value(CommandType::Lon, self.config.listen_only);
                }
            }
            CommandType::Mode => {
                if renew_flag(first, &mut self.config.controller) {
                    info!("Mode change, controller {}", self.config.controller);
                    self.force_end_talking();
                    self.bus.initialize(self.config.controller);
                    if !self.config.controller {
                        self.device_init();
                    }
                }
                if query {
                    self.reply_value(CommandType::Mode, self.config.controller);
                }
            }
            CommandType::Read => self.read(first == Some(Arg::Eoi)),
            CommandType::ReadTmoMs => {
                if renew(first, &mut self.config.timeout_ms, MAX_READ_TIMEOUT_MS) {
                    self.bus.set_timeout(self.config.timeout_ms);
                }
                if query {
                    self.reply_value(CommandType::ReadTmoMs, self.config.timeout_ms);
                }
            }
            CommandType::Rst => {
                info!("Reset requested");
                self.reset_requested = true;
            }
            CommandType::SaveCfg => {
                self.store.persist(&self.config.to_bytes());
                if verbose {
                    self.dump_config();
                }
            }
            CommandType::Spoll => {
                if self.config.controller {
                    self.serial_poll(args);
                }
            }
            CommandType::Srq => {
                if self.config.controller {
                    let srq = self.bus.control_signal(Uniline::CheckSrq);
                    self.reply_value(CommandType::Srq, srq);
                }
            }
            CommandType::Status => {
                if renew(first, &mut self.config.status, u8::MAX) && !self.config.controller {
                    self.update_srq();
                }
                if query {
                    self.reply_value(CommandType::Status, self.config.status);
                }
            }
            CommandType::Trg => {
                if self.config.controller {
                    self.force_end_talking();
                    if args.is_empty() {
                        self.send_command(gpib::GET, Some(self.config.address));
                    } else if let Some(address) = Address::from_args(args) {
                        self.send_command(gpib::GET, Some(address));
                    }
                }
            }
            CommandType::Ver => {
                let line = Reply::new(CommandType::Ver, verbose)
                    .item(VERSION_STRING)
                    .finish(self.config.eos);
                self.host.write(line.as_bytes());
            }
            CommandType::Help => {
                let mut reply = Reply::new(CommandType::Help, verbose);
                for command in CommandType::ALL {
                    reply = reply.item(command.name());
                }
                let line = reply.finish(self.config.eos);
                self.host.write(line.as_bytes());
            }
            CommandType::Debug => {
                let mut bits = self.config.debug.bits();
                if renew(first, &mut bits, u8::MAX) {
                    self.config.debug = DebugFlags::from_bits_retain(bits);
                }
                if query {
                    self.reply_value(CommandType::Debug, self.config.debug.bits());
                }
            }
            CommandType::Unknown => debug!("Dropping unrecognized command"),
            CommandType::Talk => self.talk(first),
        }
    }

    // Relay one pass-through byte, or end the pass-through line.
    fn talk(&mut self, arg: Option<Arg>) {
        let byte = arg.and_then(Arg::value).map(|v| v as u8);

        match (self.pending, byte) {
            (Some(previous), None) => {
                // End of line - write the final byte with the terminator.
                self.echo_talk(previous);
                self.pending = None;
                self.finish_talk(previous);
                if self.config.read_after_write {
                    self.read(false);
                }
            }
            (Some(previous), Some(byte)) => {
                self.echo_talk(previous);
                self.pending = match self.bus.put_byte(previous, WriteFlags::empty()) {
                    Ok(()) => Some(byte),
                    Err(e) => {
                        debug!("Talk write failed: {}", e);
                        None
                    }
                };
            }
            (None, Some(byte)) => {
                if self.config.controller {
                    // We talk, the target device(s) listen.
                    self.send_command(gpib::tad(CONTROLLER_ADDRESS), Some(self.config.address));
                    self.pending = Some(byte);
                } else if self.device.talkable {
                    self.pending = Some(byte);
                }
            }
            // A terminator when not talking is ignored.
            (None, None) => {}
        }
    }

    fn echo_talk(&mut self, byte: u8) {
        if self.config.debug.contains(DebugFlags::GPIB_ECHO) {
            self.host.write(&[byte]);
        }
    }

    // Write the last byte of a talk line, followed by the terminator, with
    // EOI on whichever goes last.
    fn finish_talk(&mut self, last: u8) {
        let eoi = self.eoi_flags();
        let terminator = self.config.eos.terminator();
        if terminator.is_empty() {
            let _ = self.bus.put_byte(last, eoi);
        } else if self.bus.put_byte(last, WriteFlags::empty()).is_ok() {
            self.bus.write_block(terminator, eoi);
        }
    }

    // Flush any talk in progress before a bus command.
    fn force_end_talking(&mut self) {
        if let Some(last) = self.pending.take() {
            debug!("Ending talk");
            self.finish_talk(last);
        }
    }

    fn eoi_flags(&self) -> WriteFlags {
        if self.config.eoi {
            WriteFlags::USE_EOI
        } else {
            WriteFlags::empty()
        }
    }

    // Send a bus command under ATN.  If `listeners` is given, they are
    // addressed first, following an unlisten.
    fn send_command(&mut self, cmd: u8, listeners: Option<Address>) {
        self.bus.control_signal(Uniline::CommandStart);
        if let Some(listeners) = listeners {
            let _ = self.bus.put_byte(gpib::UNL, WriteFlags::empty());
            for item in listeners.items() {
                let _ = self.bus.put_byte(gpib::lad(item.primary), WriteFlags::empty());
                if item.secondary != 0 {
                    let _ = self.bus.put_byte(item.secondary, WriteFlags::empty());
                }
            }
        }
        let _ = self.bus.put_byte(cmd, WriteFlags::empty());
        self.bus.control_signal(Uniline::CommandEnd);
    }

    // Address a talker, with its secondary address if it has one.
    fn address_talker(&mut self, talker: AddressItem) {
        let buf = [gpib::tad(talker.primary), talker.secondary];
        let len = if talker.secondary == 0 { 1 } else { 2 };
        self.bus.write_block(&buf[..len], WriteFlags::empty());
    }

    // Address the configured device to talk and ourselves to listen, then
    // relay what it sends to the host.
    fn read(&mut self, until_eoi: bool) {
        if !self.config.controller {
            return;
        }
        self.force_end_talking();

        self.bus.control_signal(Uniline::CommandStart);
        let _ = self.bus.put_byte(gpib::UNL, WriteFlags::empty());
        let _ = self.bus.put_byte(gpib::lad(CONTROLLER_ADDRESS), WriteFlags::empty());
        self.address_talker(self.config.address.first());
        self.bus.control_signal(Uniline::CommandEnd);

        let options = ReadOptions {
            policy: if until_eoi {
                ReadPolicy::EoiOnly
            } else {
                self.config.eos.read_policy()
            },
            eot_char: self.config.eot.then_some(self.config.eot_char),
        };
        let host = &mut self.host;
        let count = self.bus.read_until(
            |byte| {
                host.write(&[byte]);
            },
            options,
        );
        trace!("Read {} bytes", count);
        if count > 0 {
            self.listening = true;
        }
    }

    // Serial poll the configured device, or the one given in `args`.
    fn serial_poll(&mut self, args: &[Arg]) {
        self.force_end_talking();

        let target = AddressItem::from_args(args)
            .map(|(item, _)| item)
            .unwrap_or_else(|| self.config.address.first());

        self.bus.control_signal(Uniline::CommandStart);
        let _ = self.bus.put_byte(gpib::SPE, WriteFlags::empty());
        self.address_talker(target);
        self.bus.control_signal(Uniline::CommandEnd);

        match self.bus.get_byte() {
            Ok(status) => self.reply_value(CommandType::Spoll, status.value),
            Err(e) => debug!("Serial poll failed: {}", e),
        }

        self.bus.control_signal(Uniline::CommandStart);
        self.bus
            .write_block(&[gpib::UNT, gpib::SPD], WriteFlags::empty());
        self.bus.control_signal(Uniline::CommandEnd);
    }

    // Drive SRQ from the status byte's request service bit.
    pub(crate) fn update_srq(&mut self) {
        let signal = if self.config.status & STATUS_RQS != 0 {
            Uniline::SrqAssert
        } else {
            Uniline::SrqDeassert
        };
        self.bus.control_signal(signal);
    }

    fn dump_config(&mut self) {
        self.reply_address(CommandType::Addr, self.config.address);
        self.reply_value(CommandType::Auto, self.config.read_after_write);
        self.reply_value(CommandType::Eoi, self.config.eoi);
        self.reply_value(CommandType::Eos, self.config.eos as u8);
        self.reply_value(CommandType::EotEnable, self.config.eot);
        self.reply_value(CommandType::EotChar, self.config.eot_char);
        self.reply_value(CommandType::Lon, self.config.listen_only);
        self.reply_value(CommandType::Mode, self.config.controller);
        self.reply_value(CommandType::ReadTmoMs, self.config.timeout_ms);
        self.reply_value(CommandType::Status, self.config.status);
    }

    fn reply_value(&mut self, command: CommandType, value: impl Into<ReplyValue>) {
        let line = Reply::new(command, self.config.verbose())
            .item(value.into().0)
            .finish(self.config.eos);
        self.host.write(line.as_bytes());
    }

    fn reply_address(&mut self, command: CommandType, address: Address) {
        let line = Reply::new(command, self.config.verbose())
            .address(&address)
            .finish(self.config.eos);
        self.host.write(line.as_bytes());
    }
}

// A numeric reply value.  Flags reply as 0 or 1.
struct ReplyValue(u16);

impl From<bool> for ReplyValue {
    fn from(value: bool) -> Self {
        Self(u16::from(value))
    }
}

impl From<u8> for ReplyValue {
    fn from(value: u8) -> Self {
        Self(u16::from(value))
    }
}

impl From<u16> for ReplyValue {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

// Apply the first argument to `value` if it is a number no larger than `max`.
// Returns whether the value changed.
fn renew<T>(arg: Option<Arg>, value: &mut T, max: T) -> bool
where
    T: Copy + PartialEq + Into<u32> + TryFrom<u32>,
{
    let Some(new) = arg.and_then(Arg::value) else {
        return false;
    };
    if new > max.into() {
        return false;
    }
    match T::try_from(new) {
        Ok(new) if new != *value => {
            *value = new;
            true
        }
        _ => false,
    }
}

fn renew_flag(arg: Option<Arg>, flag: &mut bool) -> bool {
    let mut value = u8::from(*flag);
    let changed = renew(arg, &mut value, 1);
    *flag = value != 0;
    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renew_checks_range() {
        let mut eos = 0u8;
        assert!(renew(Some(Arg::Value(3)), &mut eos, 3));
        assert_eq!(eos, 3);
        assert!(!renew(Some(Arg::Value(3)), &mut eos, 3));
        assert!(!renew(Some(Arg::Value(4)), &mut eos, 3));
        assert!(!renew(Some(Arg::Invalid), &mut eos, 3));
        assert!(!renew(None, &mut eos, 3));
        assert_eq!(eos, 3);

        let mut timeout = 10u16;
        assert!(renew(Some(Arg::Value(3000)), &mut timeout, 3000));
        assert!(!renew(Some(Arg::Value(3001)), &mut timeout, 3000));
        assert_eq!(timeout, 3000);
    }

    #[test]
    fn renew_flags() {
        let mut flag = false;
        assert!(renew_flag(Some(Arg::Value(1)), &mut flag));
        assert!(flag);
        assert!(!renew_flag(Some(Arg::Value(2)), &mut flag));
        assert!(flag);
        assert!(renew_flag(Some(Arg::Value(0)), &mut flag));
        assert!(!flag);
    }
}
