//! Handles displaying status of the device on the LED.
//!
//! - Fully on - idle, controller-in-charge.
//! - Fully off - idle, device.
//! - Blinking - data moving between the host and the bus.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use core::cell::RefCell;
#[allow(unused_imports)]
use defmt::{debug, error, info, trace, warn};
use embassy_rp::gpio::{AnyPin, Level, Output};
use embassy_sync::blocking_mutex::{Mutex, raw::CriticalSectionRawMutex};
use embassy_time::{Duration, Instant, Timer};

use crate::constants::{STATUS_DISPLAY_BLINK_TIMER_MS, STATUS_DISPLAY_TIMER_MS};
use crate::protocol::session::Activity;

const BLINK_TIMER: Duration = Duration::from_millis(STATUS_DISPLAY_BLINK_TIMER_MS);
const DISPLAY_TIMER: Duration = Duration::from_millis(STATUS_DISPLAY_TIMER_MS);

// The STATUS_DISPLAY static is used to store the StatusDisplay object.  It
// is updated from the protocol handler on core 1 and driven by the status
// task on core 0, so we need a CriticalSectionRawMutex and a RefCell (the
// latter for mutability).
pub static STATUS_DISPLAY: Mutex<CriticalSectionRawMutex, RefCell<Option<StatusDisplay>>> =
    Mutex::new(RefCell::new(None));

/// Status display types
#[derive(Debug, Clone, Copy, PartialEq, defmt::Format)]
pub enum DisplayType {
    /// Idle controller, LED is fully on
    Controller,
    /// Idle device, LED is fully off
    Device,
    /// Talking or listening, LED toggles at regular intervals
    Active,
}

impl From<Activity> for DisplayType {
    fn from(activity: Activity) -> Self {
        if activity.talking || activity.listening {
            DisplayType::Active
        } else if activity.controller {
            DisplayType::Controller
        } else {
            DisplayType::Device
        }
    }
}

/// Status display management
pub struct StatusDisplay {
    led: Output<'static>,
    current_status: DisplayType,

    // Last time the LED was toggled, used for blinking
    last_toggle: Instant,

    led_state: bool,
}

impl StatusDisplay {
    /// Creates a new StatusDisplay with the specified LED pin and stores it
    /// in the STATUS_DISPLAY static.
    ///
    /// The LED is initially on, which is also the default controller state.
    pub fn create_static(led_pin: AnyPin) {
        let status_display = Self {
            led: Output::new(led_pin, Level::High),
            current_status: DisplayType::Controller,
            last_toggle: Instant::now(),
            led_state: true,
        };

        STATUS_DISPLAY.lock(|d| {
            *d.borrow_mut() = Some(status_display);
        });
    }

    /// Update the current status.
    pub fn update(&mut self, status: DisplayType) {
        if self.current_status != status {
            trace!("Status display {}", status);
            self.current_status = status;

            match status {
                DisplayType::Controller => self.set_led(true),
                DisplayType::Device => self.set_led(false),
                // Toggling is handled in do_work()
                DisplayType::Active => {}
            }
        }
    }

    /// Perform an action on the status display if one is required.  Returns
    /// the maximum Duration until the next time this function should be
    /// called.
    pub fn do_work(&mut self) -> Duration {
        match self.current_status {
            DisplayType::Controller => {
                self.set_led(true);
                BLINK_TIMER
            }
            DisplayType::Device => {
                self.set_led(false);
                BLINK_TIMER
            }
            DisplayType::Active => self.do_blink(),
        }
    }

    // Toggles the LED every BLINK_TIMER regardless of how often we're called.
    fn do_blink(&mut self) -> Duration {
        let elapsed = Instant::now().duration_since(self.last_toggle);

        if elapsed >= BLINK_TIMER {
            let state = !self.led_state;
            self.set_led(state);
            self.last_toggle = Instant::now();
            BLINK_TIMER
        } else {
            BLINK_TIMER - elapsed
        }
    }

    fn set_led(&mut self, on: bool) {
        if self.led_state != on {
            self.led_state = on;
            if on {
                self.led.set_high();
            } else {
                self.led.set_low();
            }
        }
    }
}

/// Runs the status display task.
#[embassy_executor::task]
pub async fn status_task() -> ! {
    loop {
        // Let the status display do some work and get the time until next
        // update.  If it hasn't been created there's nothing to do.
        let next_update = STATUS_DISPLAY.lock(|d| {
            d.borrow_mut()
                .as_mut()
                .map_or(DISPLAY_TIMER, StatusDisplay::do_work)
        });

        // Wake up in time for the next LED update, but also often enough to
        // pick up status changes.
        Timer::after(Duration::min(next_update, DISPLAY_TIMER)).await;
    }
}

/// Helper function to update the status from the session's activity.
pub fn update_status(activity: Activity) {
    let display = DisplayType::from(activity);
    STATUS_DISPLAY.lock(|d| {
        if let Some(status_display) = d.borrow_mut().as_mut() {
            status_display.update(display);
        }
    });
}
