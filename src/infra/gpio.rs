//! This file handles GPIO pin allocation, and implements the GPIB bus port
//! on top of the Pico's GPIOs.
//!
//! The source code serves as the master list of pin assignments for the
//! hardware.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

#[allow(unused_imports)]
use defmt::{debug, error, info, trace, warn};
use embassy_rp::gpio::{AnyPin, Flex, Level, Output, Pull};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use heapless::Vec;

use crate::protocol::bus::{BusPort, Lines, Transceiver};
use crate::util::time::gpib_settle;

/// Number of GPIOs on the RP2040 and RP2350A.
pub const TOTAL_GPIOS: usize = 30;

//
// Statics
//

// Static Gpio object
pub static GPIO: Mutex<CriticalSectionRawMutex, Option<Gpio>> = Mutex::new(None);

/// GPIO configurations for different boards
pub mod config {
    use super::{GpibPinConfig, PinConfig};
    use crate::constants::STATUS_LED_PIN;

    /// Configuration for the v0.1 board
    pub fn standard_v0_1() -> PinConfig {
        PinConfig {
            status_display_pin: STATUS_LED_PIN,
            gpib_pins: gpib_pico488_v0_1(),
        }
    }

    // Data lines on GP0-7, management and handshake lines on GP8-15 in the
    // same order as the bits of `Lines`, transceiver controls on GP16-19.
    fn gpib_pico488_v0_1() -> GpibPinConfig {
        GpibPinConfig {
            d_io: [0, 1, 2, 3, 4, 5, 6, 7],
            srq: 8,
            atn: 9,
            eoi: 10,
            dav: 11,
            nrfd: 12,
            ndac: 13,
            ifc: 14,
            ren: 15,
            te: 16,
            pe: 17,
            sc: 18,
            dc: 19,
        }
    }
}

/// Pin configuration for different boards
pub struct PinConfig {
    pub status_display_pin: u8,
    pub gpib_pins: GpibPinConfig,
}

/// GPIB connector and transceiver pin configuration
#[derive(Clone)]
pub struct GpibPinConfig {
    /// DIO1-8
    pub d_io: [u8; 8],
    pub srq: u8,
    pub atn: u8,
    pub eoi: u8,
    pub dav: u8,
    pub nrfd: u8,
    pub ndac: u8,
    pub ifc: u8,
    pub ren: u8,
    pub te: u8,
    pub pe: u8,
    pub sc: u8,
    pub dc: u8,
}

impl GpibPinConfig {
    // The management and handshake lines, indexed by bit position in
    // `Lines`.
    fn control_lines(&self) -> [u8; 8] {
        [
            self.srq, self.atn, self.eoi, self.dav, self.nrfd, self.ndac, self.ifc, self.ren,
        ]
    }
}

/// Default pin configuration
impl Default for PinConfig {
    fn default() -> Self {
        config::standard_v0_1()
    }
}

/// Object which provides methods to create objects that require GPIO pins.
pub struct Gpio {
    pins: [Option<AnyPin>; TOTAL_GPIOS],
    config: PinConfig,
}

impl Gpio {
    /// Create the Gpio object and store it in the GPIO static.
    pub async fn create_static(pins: [AnyPin; TOTAL_GPIOS], config: Option<PinConfig>) {
        let gpio = Self {
            pins: pins.map(Some),
            config: config.unwrap_or_default(),
        };

        // Locking section
        {
            let mut g = GPIO.lock().await;
            if g.is_some() {
                defmt::panic!("GPIO static already set");
            }
            let _ = g.insert(gpio);
        }
    }

    /// Get the pin used for the status display.
    pub fn get_status_display_pin(&mut self) -> AnyPin {
        let pin_num = self.config.status_display_pin;
        match self.take_pin_as_any(pin_num) {
            Some(pin) => pin,
            None => defmt::panic!("Status display pin {} already taken", pin_num),
        }
    }

    /// Take every pin the GPIB bus needs and build the bus port.  Returns
    /// None if any of them has already been taken.
    pub fn take_gpib_port(&mut self) -> Option<GpioPort> {
        let pins = self.config.gpib_pins.clone();

        let mut data: Vec<OpenDrain, 8> = Vec::new();
        for &pin in pins.d_io.iter() {
            let _ = data.push(OpenDrain::new(self.take_flex_pin(pin)?));
        }
        let mut control: Vec<OpenDrain, 8> = Vec::new();
        for pin in pins.control_lines() {
            let _ = control.push(OpenDrain::new(self.take_flex_pin(pin)?));
        }

        Some(GpioPort {
            data: data.into_array().ok()?,
            control: control.into_array().ok()?,
            te: self.take_output(pins.te, Level::Low)?,
            pe: self.take_output(pins.pe, Level::Low)?,
            sc: self.take_output(pins.sc, Level::Low)?,
            dc: self.take_output(pins.dc, Level::Low)?,
        })
    }

    pub fn take_flex_pin(&mut self, index: u8) -> Option<Flex<'static>> {
        self.take_pin_as_any(index).map(Flex::new)
    }

    pub fn take_output(&mut self, index: u8, level: Level) -> Option<Output<'static>> {
        self.take_pin_as_any(index)
            .map(|pin| Output::new(pin, level))
    }

    /// Helper to take a pin by index
    fn take_pin_as_any(&mut self, index: u8) -> Option<AnyPin> {
        match self.pins.get_mut(index as usize) {
            Some(pin) => pin.take(),
            None => {
                warn!("Attempt to take non-existant pin {}", index);
                None
            }
        }
    }
}

// A single open-collector bus line.  The output latch is held low, so
// asserting is enabling the output and releasing is switching back to an
// input with the pull-up.
struct OpenDrain {
    pin: Flex<'static>,
}

impl OpenDrain {
    fn new(mut pin: Flex<'static>) -> Self {
        pin.set_pull(Pull::Up);
        pin.set_low();
        pin.set_as_input();
        Self { pin }
    }

    fn assert(&mut self) {
        self.pin.set_as_output();
    }

    fn release(&mut self) {
        self.pin.set_as_input();
    }

    fn is_low(&self) -> bool {
        self.pin.is_low()
    }
}

/// The GPIB connector, wired to the Pico's GPIOs.
pub struct GpioPort {
    data: [OpenDrain; 8],
    // Indexed by bit position in `Lines`
    control: [OpenDrain; 8],
    te: Output<'static>,
    pe: Output<'static>,
    sc: Output<'static>,
    dc: Output<'static>,
}

impl GpioPort {
    fn set_controls(&mut self, controls: Transceiver, level: Level) {
        if controls.contains(Transceiver::TE) {
            self.te.set_level(level);
        }
        if controls.contains(Transceiver::PE) {
            self.pe.set_level(level);
        }
        if controls.contains(Transceiver::SC) {
            self.sc.set_level(level);
        }
        if controls.contains(Transceiver::DC) {
            self.dc.set_level(level);
        }
    }
}

impl BusPort for GpioPort {
    fn assert_lines(&mut self, lines: Lines) {
        for (bit, line) in self.control.iter_mut().enumerate() {
            if lines.bits() & (1 << bit) != 0 {
                line.assert();
            }
        }
    }

    fn release_lines(&mut self, lines: Lines) {
        for (bit, line) in self.control.iter_mut().enumerate() {
            if lines.bits() & (1 << bit) != 0 {
                line.release();
            }
        }
    }

    fn sense(&mut self) -> Lines {
        let bits = self
            .control
            .iter()
            .enumerate()
            .filter(|(_, line)| line.is_low())
            .fold(0u8, |bits, (bit, _)| bits | (1 << bit));
        Lines::from_bits_retain(bits)
    }

    fn write_data(&mut self, levels: u8) {
        for (bit, line) in self.data.iter_mut().enumerate() {
            if levels & (1 << bit) != 0 {
                line.release();
            } else {
                line.assert();
            }
        }
    }

    fn read_data(&mut self) -> u8 {
        self.data
            .iter()
            .enumerate()
            .filter(|(_, line)| !line.is_low())
            .fold(0u8, |levels, (bit, _)| levels | (1 << bit))
    }

    fn enable(&mut self, controls: Transceiver) {
        self.set_controls(controls, Level::High);
        gpib_settle!();
    }

    fn disable(&mut self, controls: Transceiver) {
        self.set_controls(controls, Level::Low);
        gpib_settle!();
    }
}
