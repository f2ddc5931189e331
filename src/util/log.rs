//! Logging macros.
//!
//! The firmware logs over RTT using defmt.  The protocol engine is also built
//! for the host (where its tests run) without defmt, so every module logs
//! through these macros rather than `defmt::info!()` and friends directly.
//! Without the `defmt` feature they compile to nothing, but still reference
//! their arguments so that variables which are only logged don't trigger
//! unused warnings.
//!
//! Use the same import pattern as with defmt:
//! ```ignore
//! #[allow(unused_imports)]
//! use crate::util::log::{debug, error, info, trace, warn};
//! ```

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

#![allow(unused_macros, unused_imports)]

#[cfg(feature = "defmt")]
macro_rules! trace {
    ($($t:tt)*) => { defmt::trace!($($t)*) };
}
#[cfg(not(feature = "defmt"))]
macro_rules! trace {
    ($fmt:literal $(, $arg:expr)* $(,)?) => {{ $( let _ = &$arg; )* }};
}
pub(crate) use trace;

#[cfg(feature = "defmt")]
macro_rules! debug {
    ($($t:tt)*) => { defmt::debug!($($t)*) };
}
#[cfg(not(feature = "defmt"))]
macro_rules! debug {
    ($fmt:literal $(, $arg:expr)* $(,)?) => {{ $( let _ = &$arg; )* }};
}
pub(crate) use debug;

#[cfg(feature = "defmt")]
macro_rules! info {
    ($($t:tt)*) => { defmt::info!($($t)*) };
}
#[cfg(not(feature = "defmt"))]
macro_rules! info {
    ($fmt:literal $(, $arg:expr)* $(,)?) => {{ $( let _ = &$arg; )* }};
}
pub(crate) use info;

// `warn` clashes with the builtin attribute, so it is defined as `warn_`
// and re-exported under its usual name.
#[cfg(feature = "defmt")]
macro_rules! warn_ {
    ($($t:tt)*) => { defmt::warn!($($t)*) };
}
#[cfg(not(feature = "defmt"))]
macro_rules! warn_ {
    ($fmt:literal $(, $arg:expr)* $(,)?) => {{ $( let _ = &$arg; )* }};
}
pub(crate) use warn_ as warn;

#[cfg(feature = "defmt")]
macro_rules! error {
    ($($t:tt)*) => { defmt::error!($($t)*) };
}
#[cfg(not(feature = "defmt"))]
macro_rules! error {
    ($fmt:literal $(, $arg:expr)* $(,)?) => {{ $( let _ = &$arg; )* }};
}
pub(crate) use error;
