//! Persists the GPIB configuration in the last sector of flash.
//!
//! The record is read once at boot, before core 1 starts.  Saves are handed
//! to [`flash_task`] on core 0 via a Signal, so `++savecfg` never blocks the
//! GPIB engine for the duration of an erase.  Only the latest request is
//! kept if several arrive while a write is in progress.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use core::cell::RefCell;
#[allow(unused_imports)]
use defmt::{debug, error, info, trace, warn};
use embassy_rp::flash::{Blocking, Error as FlashError, Flash};
use embassy_rp::peripherals::FLASH;
use embassy_sync::blocking_mutex::{Mutex, raw::CriticalSectionRawMutex};
use embassy_sync::signal::Signal;
use static_assertions::const_assert;

use crate::constants::{CONFIG_FLASH_OFFSET, FLASH_SECTOR_SIZE, FLASH_SIZE};
use crate::protocol::config::CONFIG_LEN;
use crate::protocol::host::ConfigStore;

/// The flash driver type used throughout the firmware.
pub type ConfigFlash = Flash<'static, FLASH, Blocking, FLASH_SIZE>;

// Flash writes are done in whole pages.
const FLASH_PAGE_SIZE: usize = 256;
const_assert!(CONFIG_LEN <= FLASH_PAGE_SIZE);

// The record read at boot, taken by the FlashStore when the session loads
// its configuration.
static BOOT_RECORD: Mutex<CriticalSectionRawMutex, RefCell<Option<[u8; CONFIG_LEN]>>> =
    Mutex::new(RefCell::new(None));

// Save requests, from the protocol handler on core 1 to the flash task on
// core 0.
static SAVE_REQUEST: Signal<CriticalSectionRawMutex, [u8; CONFIG_LEN]> = Signal::new();

/// Read the configuration sector and stash the record for the session.
/// Erased flash reads as 0xFF, which fails validation when the session
/// parses it, so no checks are done here.
pub fn load_boot_record(flash: &mut ConfigFlash) {
    let mut record = [0u8; CONFIG_LEN];
    match flash.blocking_read(CONFIG_FLASH_OFFSET, &mut record) {
        Ok(()) => {
            debug!("Read configuration record from flash");
            BOOT_RECORD.lock(|r| *r.borrow_mut() = Some(record));
        }
        Err(e) => warn!("Failed to read configuration from flash: {}", e),
    }
}

/// The session's view of the configuration sector.
pub struct FlashStore;

impl ConfigStore for FlashStore {
    fn load(&mut self) -> Option<[u8; CONFIG_LEN]> {
        BOOT_RECORD.lock(|r| r.borrow_mut().take())
    }

    fn persist(&mut self, record: &[u8; CONFIG_LEN]) {
        SAVE_REQUEST.signal(*record);
    }
}

// Erase the sector, then program the record at its start.
fn write_record(flash: &mut ConfigFlash, record: &[u8; CONFIG_LEN]) -> Result<(), FlashError> {
    let mut page = [0xFFu8; FLASH_PAGE_SIZE];
    page[..CONFIG_LEN].copy_from_slice(record);

    flash.blocking_erase(
        CONFIG_FLASH_OFFSET,
        CONFIG_FLASH_OFFSET + FLASH_SECTOR_SIZE as u32,
    )?;
    flash.blocking_write(CONFIG_FLASH_OFFSET, &page)
}

/// Services save requests.  Runs on core 0.
#[embassy_executor::task]
pub async fn flash_task(mut flash: ConfigFlash) -> ! {
    let core = embassy_rp::pac::SIO.cpuid().read();
    info!("Core{}: Flash task started", core);

    loop {
        let record = SAVE_REQUEST.wait().await;
        match write_record(&mut flash, &record) {
            Ok(()) => info!("Configuration saved"),
            Err(e) => warn!("Failed to save configuration: {}", e),
        }
    }
}
