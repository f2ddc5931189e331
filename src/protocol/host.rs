//! The session's collaborators: the host byte channel and configuration
//! storage.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use super::config::CONFIG_LEN;

/// The byte stream to and from the host.
pub trait HostChannel {
    /// Queue bytes for the host.  Returns how many were accepted.
    fn write(&mut self, bytes: &[u8]) -> usize;

    /// Read whatever the host has sent, without blocking.  Returns 0 if
    /// nothing is pending.
    fn read(&mut self, buf: &mut [u8]) -> usize;

    /// Push any buffered output towards the host.
    fn flush(&mut self) {}
}

impl<H: HostChannel + ?Sized> HostChannel for &mut H {
    fn write(&mut self, bytes: &[u8]) -> usize {
        (**self).write(bytes)
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        (**self).read(buf)
    }

    fn flush(&mut self) {
        (**self).flush()
    }
}

/// Non-volatile storage for the serialized configuration.
pub trait ConfigStore {
    /// The last persisted record, if there is one.  It may not be valid.
    fn load(&mut self) -> Option<[u8; CONFIG_LEN]>;

    /// Best-effort, fire-and-forget save.
    fn persist(&mut self, record: &[u8; CONFIG_LEN]);
}

impl<S: ConfigStore + ?Sized> ConfigStore for &mut S {
    fn load(&mut self) -> Option<[u8; CONFIG_LEN]> {
        (**self).load()
    }

    fn persist(&mut self, record: &[u8; CONFIG_LEN]) {
        (**self).persist(record)
    }
}
