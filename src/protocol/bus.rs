//! This file implements the IEEE-488 (GPIB) bus transport.
//!
//! It is the only part of the engine which touches the bus lines, which it
//! does via the [`BusPort`] trait.  It implements the 3-wire interlocked
//! handshake (DAV, NRFD, NDAC) in both directions, line-level control of
//! ATN, IFC and SRQ, and the talker/listener direction switching of the
//! 75160/75162 style bus transceivers.
//!
//! All bus lines are active low, including the data lines.  Every wait is
//! bounded by the configured timeout.  If a wait times out, the bus is
//! treated as wedged: all lines are put back into their initial state and
//! the operation fails with [`BusError::Timeout`].

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use bitflags::bitflags;

use crate::constants::MAX_TIMEOUT_TICKS;
#[allow(unused_imports)]
use crate::util::log::{debug, error, info, trace, warn};
use crate::util::time::Clock;

bitflags! {
    /// The GPIB management and handshake lines.  Bit values match the
    /// physical port layout of the classic Prologix-compatible adapters.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Lines: u8 {
        const SRQ = 0x01;
        const ATN = 0x02;
        const EOI = 0x04;
        const DAV = 0x08;
        const NRFD = 0x10;
        const NDAC = 0x20;
        const IFC = 0x40;
        const REN = 0x80;
    }
}

bitflags! {
    /// Direction controls of the bus transceivers.
    ///
    /// - TE - talk enable: drive data and DAV, receive NRFD and NDAC.
    /// - PE - push-pull enable for the data lines while talking.
    /// - SC - system controller: drive REN and IFC.
    /// - DC - direction control: drive SRQ and receive ATN when set (device),
    ///   drive ATN and receive SRQ when clear (controller).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Transceiver: u8 {
        const TE = 0x10;
        const SC = 0x20;
        const DC = 0x40;
        const PE = 0x80;
    }
}

bitflags! {
    /// Flags modifying a bus write.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct WriteFlags: u8 {
        /// Assert EOI with the (final) byte.
        const USE_EOI = 0x01;
    }
}

/// Hardware access to the GPIB connector.
///
/// Line arguments and results are logical: a set bit means the line is
/// asserted (electrically low).  Data is raw electrical levels, so `0xFF`
/// means every data line is released.
pub trait BusPort {
    /// Pull the given lines low.
    fn assert_lines(&mut self, lines: Lines);

    /// Release the given lines, letting them float high.
    fn release_lines(&mut self, lines: Lines);

    /// Return the set of lines currently asserted on the bus, by anyone.
    fn sense(&mut self) -> Lines;

    /// Drive the data lines with the given raw levels.
    fn write_data(&mut self, levels: u8);

    /// Read the raw levels of the data lines.
    fn read_data(&mut self) -> u8;

    /// Set the given transceiver controls.
    fn enable(&mut self, controls: Transceiver);

    /// Clear the given transceiver controls.
    fn disable(&mut self, controls: Transceiver);
}

impl<P: BusPort + ?Sized> BusPort for &mut P {
    fn assert_lines(&mut self, lines: Lines) {
        (**self).assert_lines(lines)
    }

    fn release_lines(&mut self, lines: Lines) {
        (**self).release_lines(lines)
    }

    fn sense(&mut self) -> Lines {
        (**self).sense()
    }

    fn write_data(&mut self, levels: u8) {
        (**self).write_data(levels)
    }

    fn read_data(&mut self) -> u8 {
        (**self).read_data()
    }

    fn enable(&mut self, controls: Transceiver) {
        (**self).enable(controls)
    }

    fn disable(&mut self, controls: Transceiver) {
        (**self).disable(controls)
    }
}

/// Which handshake step timed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HandshakeStep {
    /// Talker waiting for all listeners to release NRFD.
    ReadyForData,
    /// Talker waiting for all listeners to release NDAC.
    DataAccepted,
    /// Listener waiting for the talker to assert DAV.
    DataValid,
    /// Listener waiting for the talker to release DAV.
    DataReleased,
}

/// Errors returned by the bus transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusError {
    /// A handshake wait expired.  The bus has been reinitialized.
    Timeout(HandshakeStep),
}

/// A byte received from the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusByte {
    /// The (un-inverted) data value.
    pub value: u8,
    /// EOI was asserted with this byte.
    pub end: bool,
    /// ATN was asserted with this byte, so it is a bus command.
    pub command: bool,
}

impl BusByte {
    /// Tag marking an end-of-transmission byte in the integer form.
    pub const END: u16 = 0x100;

    /// Tag marking a bus command byte in the integer form.
    pub const COMMAND: u16 = 0x200;
}

impl From<BusByte> for u16 {
    /// The tagged integer form: low byte is the value, 0x100 is END and
    /// 0x200 is COMMAND.
    fn from(byte: BusByte) -> u16 {
        let mut tagged = u16::from(byte.value);
        if byte.end {
            tagged |= BusByte::END;
        }
        if byte.command {
            tagged |= BusByte::COMMAND;
        }
        tagged
    }
}

/// Single-wire (uniline) bus messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Uniline {
    /// Assert ATN - following bytes are bus commands.
    CommandStart,
    /// Release ATN.
    CommandEnd,
    /// Assert IFC.
    BusClearStart,
    /// Release IFC.
    BusClearEnd,
    /// Query whether SRQ is asserted.
    CheckSrq,
    /// Assert SRQ.
    SrqAssert,
    /// Release SRQ.
    SrqDeassert,
}

/// End-of-string terminator policy for bus reads.  Values match the `++eos`
/// setting, with `EoiOnly` used for reads which only stop at EOI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReadPolicy {
    /// Stop at LF following CR.
    CrLf,
    /// Stop at CR.
    Cr,
    /// Stop at LF.
    Lf,
    /// Only stop at EOI.
    EoiOnly,
}

/// Options for [`GpibBus::read_until`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOptions {
    pub policy: ReadPolicy,
    /// Character pushed after a byte marked with EOI, if any.
    pub eot_char: Option<u8>,
}

/// Tracks received bytes against a [`ReadPolicy`].
///
/// State (whether the previous byte was a CR) survives across calls, so a
/// device can match a CR LF pair which spans two polling passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminatorMatcher {
    policy: ReadPolicy,
    last_cr: bool,
}

impl TerminatorMatcher {
    pub const fn new(policy: ReadPolicy) -> Self {
        Self {
            policy,
            last_cr: false,
        }
    }

    pub fn set_policy(&mut self, policy: ReadPolicy) {
        self.policy = policy;
    }

    /// Forget any partially matched terminator.
    pub fn reset(&mut self) {
        self.last_cr = false;
    }

    /// Feed a data byte.  Returns true if it completes a terminator.
    pub fn feed(&mut self, byte: u8) -> bool {
        match byte {
            b'\r' => {
                self.last_cr = true;
                self.policy == ReadPolicy::Cr
            }
            b'\n' => {
                let matched = self.policy == ReadPolicy::Lf
                    || (self.policy == ReadPolicy::CrLf && self.last_cr);
                self.last_cr = false;
                matched
            }
            _ => {
                self.last_cr = false;
                false
            }
        }
    }
}

/// The GPIB bus transport.
pub struct GpibBus<P: BusPort, C: Clock> {
    port: P,
    clock: C,

    // Our role, which decides the ownership of ATN, IFC, REN and SRQ.
    controller: bool,

    // Whether the transceivers are currently set up for talking.
    talker: bool,

    // Handshake wait budget in 10ms ticks.  None waits forever.
    timeout_ticks: Option<u8>,
}

impl<P: BusPort, C: Clock> GpibBus<P, C> {
    /// Create the transport and initialize the bus lines for the given role.
    pub fn new(port: P, clock: C, controller: bool) -> Self {
        let mut bus = Self {
            port,
            clock,
            controller,
            talker: true,
            timeout_ticks: None,
        };
        bus.initialize(controller);
        bus
    }

    /// Put every line into its idle listener state, then set up ownership of
    /// the control lines for the given role.
    pub fn initialize(&mut self, controller: bool) {
        debug!("Initialize bus, controller {}", controller);
        self.controller = controller;

        // Force a transition, so the handshake lines get set up.
        self.talker = true;
        self.set_listener();

        self.port
            .release_lines(Lines::ATN | Lines::IFC | Lines::SRQ | Lines::REN);
        if controller {
            self.port.assert_lines(Lines::REN);
            self.port.disable(Transceiver::DC);
            self.port.enable(Transceiver::SC);
        } else {
            self.port.enable(Transceiver::DC);
            self.port.disable(Transceiver::SC);
        }
    }

    /// Set the handshake timeout.  0 waits forever.  Otherwise rounded up to
    /// 10ms and clamped to 2540ms.
    pub fn set_timeout(&mut self, ms: u16) {
        self.timeout_ticks = if ms == 0 {
            None
        } else {
            let ticks = ms.div_ceil(10).min(u16::from(MAX_TIMEOUT_TICKS));
            Some(ticks as u8)
        };
        trace!("Bus timeout {} ms, {} ticks", ms, self.timeout_ticks);
    }

    /// The current handshake budget in 10ms ticks, or None if infinite.
    pub fn timeout_ticks(&self) -> Option<u8> {
        self.timeout_ticks
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Whether the bus was last initialized for the controller role.
    pub fn is_controller(&self) -> bool {
        self.controller
    }

    /// Whether the transceivers are set up for talking.
    pub fn is_talker(&self) -> bool {
        self.talker
    }

    /// Send a uniline message.  Only [`Uniline::CheckSrq`] returns anything
    /// other than false - whether SRQ is asserted.
    pub fn control_signal(&mut self, message: Uniline) -> bool {
        match message {
            Uniline::CommandStart => self.port.assert_lines(Lines::ATN),
            Uniline::CommandEnd => self.port.release_lines(Lines::ATN),
            Uniline::BusClearStart => self.port.assert_lines(Lines::IFC),
            Uniline::BusClearEnd => self.port.release_lines(Lines::IFC),
            Uniline::CheckSrq => return self.port.sense().contains(Lines::SRQ),
            Uniline::SrqAssert => self.port.assert_lines(Lines::SRQ),
            Uniline::SrqDeassert => self.port.release_lines(Lines::SRQ),
        }
        false
    }

    /// Busy wait, using the transport's clock.
    pub fn hold_ms(&self, ms: u32) {
        self.clock.block_ms(ms);
    }

    /// Write a single byte to the bus as talker.
    pub fn put_byte(&mut self, byte: u8, flags: WriteFlags) -> Result<(), BusError> {
        self.set_talker();
        self.put_internal(byte, flags)
    }

    /// Write a run of bytes.  EOI, if requested, is only asserted with the
    /// last byte.  Returns how many bytes were written before any failure.
    pub fn write_block(&mut self, bytes: &[u8], flags: WriteFlags) -> usize {
        if bytes.is_empty() {
            return 0;
        }
        self.set_talker();

        let last = bytes.len() - 1;
        for (ii, &byte) in bytes.iter().enumerate() {
            let byte_flags = if ii == last {
                flags
            } else {
                flags.difference(WriteFlags::USE_EOI)
            };
            if let Err(e) = self.put_internal(byte, byte_flags) {
                debug!("Write block failed after {} bytes: {}", ii, e);
                return ii;
            }
        }
        bytes.len()
    }

    /// Read a single byte from the bus as listener.
    pub fn get_byte(&mut self) -> Result<BusByte, BusError> {
        self.set_listener();
        self.get_internal()
    }

    /// Read data bytes, passing each to `push`, until EOI, a terminator
    /// matching `options.policy`, or an error.  Bus command bytes received
    /// along the way are discarded.  Returns the number of data bytes read.
    pub fn read_until<F: FnMut(u8)>(&mut self, mut push: F, options: ReadOptions) -> usize {
        let mut matcher = TerminatorMatcher::new(options.policy);
        let mut count = 0;

        self.set_listener();
        loop {
            let byte = match self.get_internal() {
                Ok(byte) => byte,
                Err(_) => break,
            };
            if byte.command {
                trace!("Ignoring bus command 0x{:02x} during read", byte.value);
                continue;
            }

            count += 1;
            push(byte.value);
            if byte.end {
                if let Some(eot_char) = options.eot_char {
                    push(eot_char);
                }
                break;
            }
            if matcher.feed(byte.value) {
                break;
            }
        }

        count
    }

    // Switch the transceivers to talk, if not already talking.
    fn set_talker(&mut self) {
        if !self.talker {
            self.talker = true;
            self.port
                .release_lines(Lines::EOI | Lines::DAV | Lines::NRFD | Lines::NDAC);
            self.port.enable(Transceiver::TE | Transceiver::PE);
        }
    }

    // Switch the transceivers to listen, if not already listening.  Leaves
    // NRFD and NDAC asserted, ready for the first byte.
    fn set_listener(&mut self) {
        if self.talker {
            self.talker = false;
            self.port.write_data(0xFF);
            self.port
                .release_lines(Lines::EOI | Lines::DAV | Lines::NRFD | Lines::NDAC);
            self.port.disable(Transceiver::TE | Transceiver::PE);
            self.port.assert_lines(Lines::NRFD | Lines::NDAC);
        }
    }

    fn put_internal(&mut self, byte: u8, flags: WriteFlags) -> Result<(), BusError> {
        // Negative logic.
        self.port.write_data(!byte);
        if flags.contains(WriteFlags::USE_EOI) {
            self.port.assert_lines(Lines::EOI);
        }

        // All listeners ready for data
        self.wait_lines(Lines::NRFD, false, HandshakeStep::ReadyForData)?;
        self.port.assert_lines(Lines::DAV);

        // All listeners have accepted the byte
        self.wait_lines(Lines::NDAC, false, HandshakeStep::DataAccepted)?;
        self.port.release_lines(Lines::DAV | Lines::EOI);

        Ok(())
    }

    fn get_internal(&mut self) -> Result<BusByte, BusError> {
        // NRFD and NDAC are both asserted at this point.
        self.port.release_lines(Lines::NRFD);
        self.wait_lines(Lines::DAV, true, HandshakeStep::DataValid)?;
        self.port.assert_lines(Lines::NRFD);

        let value = !self.port.read_data();
        let lines = self.port.sense();
        let byte = BusByte {
            value,
            end: lines.contains(Lines::EOI),
            command: lines.contains(Lines::ATN),
        };

        self.port.release_lines(Lines::NDAC);
        self.wait_lines(Lines::DAV, false, HandshakeStep::DataReleased)?;
        self.port.assert_lines(Lines::NDAC);

        Ok(byte)
    }

    // Busy-wait for `line` to reach the given state.  On timeout the bus is
    // reinitialized.
    fn wait_lines(
        &mut self,
        line: Lines,
        asserted: bool,
        step: HandshakeStep,
    ) -> Result<(), BusError> {
        let start = self.clock.ticks_10ms();
        loop {
            if self.port.sense().contains(line) == asserted {
                return Ok(());
            }
            if let Some(budget) = self.timeout_ticks {
                let elapsed = self.clock.ticks_10ms().wrapping_sub(start);
                if elapsed > u32::from(budget) {
                    break;
                }
            }
        }

        debug!("Bus handshake timeout waiting for {}", step);
        let controller = self.controller;
        self.initialize(controller);
        Err(BusError::Timeout(step))
    }
}
