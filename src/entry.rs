//! Firmware entry point and panic handlers, shared by the binaries.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use core::fmt::Write;
use cortex_m::peripheral::SCB;
#[allow(unused_imports)]
use defmt::{debug, error, info, trace, warn};
use embassy_executor::Spawner;
use embassy_rp::flash::Flash;
use embassy_time::{Duration, Instant, Timer};
use heapless::String;
use static_cell::StaticCell;

use crate::constants::{LOOP_LOG_INTERVAL_MS, MAX_SERIAL_STRING_LEN};
use crate::infra::display::{StatusDisplay, status_task};
use crate::infra::flash::{ConfigFlash, flash_task, load_boot_record};
use crate::infra::gpio::{GPIO, Gpio};
use crate::task::{core1_spawn, spawn_or_reboot};
use crate::usb::{UsbStack, cdc_rx_task, cdc_tx_task, usb_task};
use crate::util::built::log_fw_info;

// The USB serial number, which must outlive the USB stack.
static SERIAL: StaticCell<String<MAX_SERIAL_STRING_LEN>> = StaticCell::new();

/// Bring up the hardware, spawn every task, then sit in a loop proving
/// core 0 is alive.
pub async fn common_main(spawner: Spawner, bin_name: &str) -> ! {
    let p = embassy_rp::init(Default::default());

    // Flash is needed first, for the serial number and the stored
    // configuration.  The latter must be read before core 1 starts.
    let mut flash: ConfigFlash = Flash::new_blocking(p.FLASH);
    let serial = SERIAL.init(format_serial(&read_unique_id(&mut flash)));
    load_boot_record(&mut flash);

    log_fw_info(bin_name, serial);

    // Hand the pins to the GPIO object, then take the status LED.
    Gpio::create_static(
        [
            p.PIN_0.into(),
            p.PIN_1.into(),
            p.PIN_2.into(),
            p.PIN_3.into(),
            p.PIN_4.into(),
            p.PIN_5.into(),
            p.PIN_6.into(),
            p.PIN_7.into(),
            p.PIN_8.into(),
            p.PIN_9.into(),
            p.PIN_10.into(),
            p.PIN_11.into(),
            p.PIN_12.into(),
            p.PIN_13.into(),
            p.PIN_14.into(),
            p.PIN_15.into(),
            p.PIN_16.into(),
            p.PIN_17.into(),
            p.PIN_18.into(),
            p.PIN_19.into(),
            p.PIN_20.into(),
            p.PIN_21.into(),
            p.PIN_22.into(),
            p.PIN_23.into(),
            p.PIN_24.into(),
            p.PIN_25.into(),
            p.PIN_26.into(),
            p.PIN_27.into(),
            p.PIN_28.into(),
            p.PIN_29.into(),
        ],
        None,
    )
    .await;
    {
        let mut guard = GPIO.lock().await;
        let Some(gpio) = guard.as_mut() else {
            defmt::panic!("GPIO not created");
        };
        StatusDisplay::create_static(gpio.get_status_display_pin());
    }

    // Core 0 tasks
    let (usb, sender, receiver) = UsbStack::create_static(p.USB, serial);
    spawn_or_reboot(spawner.spawn(usb_task(usb)), "USB");
    spawn_or_reboot(spawner.spawn(cdc_rx_task(receiver)), "CDC receive");
    spawn_or_reboot(spawner.spawn(cdc_tx_task(sender)), "CDC transmit");
    spawn_or_reboot(spawner.spawn(status_task()), "Status Display");
    spawn_or_reboot(spawner.spawn(flash_task(flash)), "Flash");

    // The GPIB engine
    core1_spawn(p.CORE1);

    let log_interval = Duration::from_millis(LOOP_LOG_INTERVAL_MS);
    let mut next_log_instant = Instant::now();
    loop {
        if Instant::now() >= next_log_instant {
            trace!("Core0: Main loop");
            next_log_instant += log_interval;
        }
        Timer::after(log_interval).await;
    }
}

#[cfg(feature = "pico")]
fn read_unique_id(flash: &mut ConfigFlash) -> [u8; 8] {
    let mut id = [0u8; 8];
    if let Err(e) = flash.blocking_unique_id(&mut id) {
        warn!("Failed to read flash unique ID: {}", e);
    }
    id
}

#[cfg(not(feature = "pico"))]
fn read_unique_id(_flash: &mut ConfigFlash) -> [u8; 8] {
    match embassy_rp::otp::get_chipid() {
        Ok(id) => id.to_be_bytes(),
        Err(_) => {
            warn!("Failed to read chip ID");
            [0u8; 8]
        }
    }
}

// Hex encode the ID.  If it couldn't be read the serial is all zeroes.
fn format_serial(id: &[u8; 8]) -> String<MAX_SERIAL_STRING_LEN> {
    let mut serial = String::new();
    for b in id {
        let _ = write!(serial, "{:02x}", b);
    }
    serial
}

/// Called by the binary's defmt panic handler.
pub fn defmt_panic_handler() -> ! {
    error!("Panic - rebooting");
    SCB::sys_reset()
}

/// Called by the binary's core panic handler.
pub fn panic_handler(info: &core::panic::PanicInfo) -> ! {
    error!("Panic: {} - rebooting", defmt::Display2Format(info));
    SCB::sys_reset()
}
