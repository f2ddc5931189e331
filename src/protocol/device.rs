//! Device role.
//!
//! When the adapter isn't the controller-in-charge it is a single device on
//! the bus, at the first primary address of its configuration.  Each polling
//! pass it listens to the bus until the bus goes quiet (a handshake
//! timeout), a message ends, or the controller addresses it to talk - at
//! which point the host gets to supply the data.
//!
//! Bus commands move it between addressed-to-listen, addressed-to-talk and
//! serial poll.  Data bytes are relayed to the host only while addressed to
//! listen (or in listen-only mode).

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use super::bus::{BusPort, Uniline, WriteFlags};
use super::command::gpib;
use super::host::{ConfigStore, HostChannel};
use super::session::Session;
use crate::constants::STATUS_RQS;
#[allow(unused_imports)]
use crate::util::log::{debug, error, info, trace, warn};
use crate::util::time::Clock;

// Whether to keep ingesting after a bus command.
enum Ingest {
    Continue,
    Stop,
}

impl<P: BusPort, C: Clock, H: HostChannel, S: ConfigStore> Session<P, C, H, S> {
    /// Reset the device role sub-state.  Asserts SRQ if the status byte is
    /// requesting service.
    pub(crate) fn device_init(&mut self) {
        self.device.talkable = false;
        self.device.listening = self.config.listen_only;
        self.device.serial_polling = false;
        if self.config.status & STATUS_RQS != 0 {
            self.bus.control_signal(Uniline::SrqAssert);
        }
    }

    /// Ingest bytes from the bus until an error, EOI, a terminator, or being
    /// addressed to talk.
    pub(crate) fn device_poll(&mut self) {
        self.device
            .matcher
            .set_policy(self.config.eos.read_policy());

        loop {
            let byte = match self.bus.get_byte() {
                Ok(byte) => byte,
                // Bus quiet, back to the host.  The timeout reinitialized
                // the bus, which released SRQ.
                Err(_) => {
                    self.update_srq();
                    break;
                }
            };

            if byte.command {
                self.device.matcher.reset();
                match self.device_command(byte.value) {
                    Ingest::Continue => continue,
                    Ingest::Stop => break,
                }
            }

            if self.device.listening {
                self.listening = true;
                self.host.write(&[byte.value]);
            }
            if byte.end {
                if self.device.listening && self.config.eot {
                    self.host.write(&[self.config.eot_char]);
                }
                break;
            }
            if self.device.matcher.feed(byte.value) {
                break;
            }
        }
    }

    fn device_command(&mut self, cmd: u8) -> Ingest {
        let my_address = self.config.address.primary();

        if gpib::is_tad_or_unt(cmd) {
            let address = gpib::address_of(cmd);
            if address == gpib::UNADDRESS {
                trace!("Untalk");
                self.device.talkable = false;
            } else if !self.config.listen_only && address == my_address {
                debug!("Addressed to talk");
                self.device.talkable = true;

                // Let the host supply the data.
                if !self.device.serial_polling {
                    return Ingest::Stop;
                }

                // Serial poll response
                if self
                    .bus
                    .put_byte(self.config.status, WriteFlags::empty())
                    .is_ok()
                {
                    debug!("Serial poll answered 0x{:02x}", self.config.status);
                    self.config.status &= !STATUS_RQS;
                    self.bus.control_signal(Uniline::SrqDeassert);
                }
            }
        } else if gpib::is_lad_or_unl(cmd) {
            let address = gpib::address_of(cmd);
            if address == gpib::UNADDRESS {
                trace!("Unlisten");
                if !self.config.listen_only {
                    self.device.listening = false;
                }
            } else if address == my_address {
                debug!("Addressed to listen");
                self.device.listening = true;
            }
        } else {
            match cmd {
                gpib::SPE => self.device.serial_polling = true,
                gpib::SPD => self.device.serial_polling = false,
                _ => trace!("Ignoring bus command 0x{:02x}", cmd),
            }
        }

        Ingest::Continue
    }
}
