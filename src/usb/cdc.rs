//! Moves host bytes between the CDC-ACM endpoints and the GPIB engine.
//!
//! The USB tasks run on core 0 and the engine runs on core 1, so the two are
//! joined by a pair of pipes.  The engine side is synchronous - it polls
//! the receive pipe, and spins briefly if the transmit pipe is full.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

#[allow(unused_imports)]
use defmt::{debug, error, info, trace, warn};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::pipe::Pipe;
use embassy_time::{Duration, Instant};
use embassy_usb::class::cdc_acm::{Receiver, Sender};
use portable_atomic::{AtomicBool, Ordering};

use super::UsbDriver;
use crate::constants::{HOST_PIPE_SIZE, HOST_WRITE_TIMEOUT_MS, MAX_EP_PACKET_SIZE_USIZE};
use crate::protocol::host::HostChannel;

// Host to engine
static HOST_RX: Pipe<CriticalSectionRawMutex, HOST_PIPE_SIZE> = Pipe::new();

// Engine to host
static HOST_TX: Pipe<CriticalSectionRawMutex, HOST_PIPE_SIZE> = Pipe::new();

// Whether a host has the serial port open.  Output is discarded when not.
static HOST_CONNECTED: AtomicBool = AtomicBool::new(false);

/// The engine's end of the pipes.
pub struct PipeChannel;

impl HostChannel for PipeChannel {
    fn write(&mut self, bytes: &[u8]) -> usize {
        if !HOST_CONNECTED.load(Ordering::Relaxed) {
            return 0;
        }

        let deadline = Instant::now() + Duration::from_millis(HOST_WRITE_TIMEOUT_MS);
        let mut written = 0;
        while written < bytes.len() {
            match HOST_TX.try_write(&bytes[written..]) {
                Ok(count) => written += count,
                Err(_) => {
                    if Instant::now() >= deadline || !HOST_CONNECTED.load(Ordering::Relaxed) {
                        debug!("Dropped {} bytes for host", bytes.len() - written);
                        break;
                    }
                }
            }
        }
        written
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        HOST_RX.try_read(buf).unwrap_or(0)
    }
}

/// Receives packets from the host and queues them for the engine.
#[embassy_executor::task]
pub async fn cdc_rx_task(mut receiver: Receiver<'static, UsbDriver>) -> ! {
    let mut buf = [0u8; MAX_EP_PACKET_SIZE_USIZE];
    loop {
        receiver.wait_connection().await;
        debug!("CDC receiver connected");

        loop {
            match receiver.read_packet(&mut buf).await {
                Ok(len) => HOST_RX.write_all(&buf[..len]).await,
                Err(e) => {
                    debug!("CDC read ended: {}", e);
                    break;
                }
            }
        }
    }
}

/// Sends the engine's output to the host.
#[embassy_executor::task]
pub async fn cdc_tx_task(mut sender: Sender<'static, UsbDriver>) -> ! {
    let mut buf = [0u8; MAX_EP_PACKET_SIZE_USIZE];
    loop {
        sender.wait_connection().await;
        info!("Host connected");
        HOST_CONNECTED.store(true, Ordering::Relaxed);

        loop {
            let len = HOST_TX.read(&mut buf).await;
            if let Err(e) = sender.write_packet(&buf[..len]).await {
                info!("Host disconnected: {}", e);
                break;
            }

            // A full packet with nothing behind it needs a zero length
            // packet to end the transfer.
            if len == MAX_EP_PACKET_SIZE_USIZE
                && HOST_TX.is_empty()
                && sender.write_packet(&[]).await.is_err()
            {
                break;
            }
        }

        HOST_CONNECTED.store(false, Ordering::Relaxed);
        HOST_TX.clear();
    }
}
