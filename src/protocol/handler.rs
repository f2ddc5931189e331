//! The protocol handler task, which runs the GPIB session on core 1.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use cortex_m::peripheral::SCB;
#[allow(unused_imports)]
use defmt::{debug, error, info, trace, warn};
use embassy_time::{Duration, Instant, Timer};

use super::session::{Session, SessionAction};
use crate::constants::{LOOP_LOG_INTERVAL_MS, PROTOCOL_LOOP_TIMER_US};
use crate::infra::display::update_status;
use crate::infra::flash::FlashStore;
use crate::infra::gpio::GPIO;
use crate::usb::PipeChannel;
use crate::util::time::{EmbassyClock, yield_for};

#[embassy_executor::task]
pub async fn protocol_handler_task() -> ! {
    // Tasks are allocated to cores at compile time with embassy, so we only
    // need to read the core ID once.
    let core = embassy_rp::pac::SIO.cpuid().read();
    info!("Core{}: Protocol Handler task started", core);

    // Take the bus pins.
    let port = {
        let mut guard = GPIO.lock().await;
        let Some(gpio) = guard.as_mut() else {
            defmt::panic!("GPIO not created");
        };
        match gpio.take_gpib_port() {
            Some(port) => port,
            None => defmt::panic!("GPIB pins not available"),
        }
    };

    let mut session = Session::new(port, EmbassyClock, PipeChannel, FlashStore);

    // Start the protocol handling loop
    let log_interval = Duration::from_millis(LOOP_LOG_INTERVAL_MS);
    let mut next_log_instant = Instant::now();
    loop {
        let now = Instant::now();
        if now >= next_log_instant {
            trace!("Core{}: Protocol loop", core);
            next_log_instant += log_interval;
        }

        if session.poll() == SessionAction::Reset {
            info!("Rebooting");
            // Give the USB task a chance to flush the host output.
            Timer::after_millis(10).await;
            SCB::sys_reset();
        }

        update_status(session.activity());

        // Pause to allow other tasks to run
        yield_for!(Duration::from_micros(PROTOCOL_LOOP_TIMER_US));
    }
}
