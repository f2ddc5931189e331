//! This file implements the time sources used by pico488.
//!
//! The GPIB engine only sees the [`Clock`] trait: a monotonic millisecond
//! count, the coarse 10ms tick used to budget handshake waits, and a busy
//! wait.  Handshake waits are busy-polled - the engine never sleeps.
//!
//! On the Pico this is backed by embassy-time's `Instant`.  As in the rest of
//! the firmware, we reimplement the blocking helpers here, primarily to make
//! it clear what they are doing under the covers.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

/// Source of time for the bus transport and session.
pub trait Clock {
    /// Milliseconds since boot.  Monotonic.
    fn now_ms(&self) -> u64;

    /// Coarse 10ms counter used to budget bus handshake waits.  Wraps.
    fn ticks_10ms(&self) -> u32 {
        (self.now_ms() / 10) as u32
    }

    /// Busy wait for the given number of milliseconds.
    fn block_ms(&self, ms: u32) {
        let expires = self.now_ms() + u64::from(ms);
        while self.now_ms() < expires {}
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }

    fn ticks_10ms(&self) -> u32 {
        (**self).ticks_10ms()
    }

    fn block_ms(&self, ms: u32) {
        (**self).block_ms(ms)
    }
}

#[cfg(feature = "firmware")]
pub use firmware::*;

#[cfg(feature = "firmware")]
mod firmware {
    use embassy_time::{Duration, Instant};

    use super::Clock;

    /// [`Clock`] backed by the embassy time driver.
    #[derive(Clone, Copy, Default)]
    pub struct EmbassyClock;

    impl Clock for EmbassyClock {
        fn now_ms(&self) -> u64 {
            Instant::now().as_millis()
        }

        fn block_ms(&self, ms: u32) {
            block_for(Duration::from_millis(u64::from(ms)));
        }
    }

    /// Function to block until a specific instant.  This is similar to the
    /// embassy-time::Delay::block_for function.
    ///
    /// We always inline it to reduce function call/return overhead, as this
    /// is typically used in timing critical functions
    #[inline(always)]
    pub fn block_until(expires: Instant) {
        while Instant::now() < expires {}
    }

    /// Function to block for a specific Duration.
    #[inline(always)]
    pub fn block_for(duration: Duration) {
        block_until(Instant::now() + duration);
    }

    /// Block for a specific number of microseconds.
    macro_rules! block_us {
        ($us:expr) => {
            crate::util::time::block_for(embassy_time::Duration::from_micros($us))
        };
    }
    pub(crate) use block_us;

    /// Macro to briefly delay in order to let the bus lines settle after the
    /// transceivers change direction.
    macro_rules! gpib_settle {
        () => {
            crate::util::time::block_us!(1)
        };
    }
    pub(crate) use gpib_settle;

    /// Macro which yields to the scheduler for at least the specified time.
    /// As embassy will only come back to us after whatever has been scheduled
    /// has paused, it could be longer than specified.
    macro_rules! yield_for {
        ($dur:expr) => {
            embassy_time::Timer::after($dur).await
        };
    }
    pub(crate) use yield_for;
}
