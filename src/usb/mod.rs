//! Handles creation of the embassy USB stack.
//!
//! The device presents a single CDC-ACM (virtual serial port) function,
//! which carries the Prologix command stream.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

pub(crate) mod cdc;

pub use cdc::{PipeChannel, cdc_rx_task, cdc_tx_task};

#[allow(unused_imports)]
use defmt::{debug, error, info, trace, warn};
use embassy_rp::bind_interrupts;
use embassy_rp::peripherals::USB;
use embassy_rp::usb::{Driver as RpUsbDriver, InterruptHandler};
use embassy_usb::class::cdc_acm::{CdcAcmClass, Receiver, Sender, State};
use embassy_usb::{Builder, Config, UsbDevice};
use static_cell::{ConstStaticCell, StaticCell};

use crate::constants::{
    MANUFACTURER, MAX_EP_PACKET_SIZE, MAX_PACKET_SIZE_0, PRODUCT, PRODUCT_ID, USB_POWER_MA,
    VENDOR_ID,
};

/// The USB driver type used throughout the firmware.
pub type UsbDriver = RpUsbDriver<'static, USB>;

// Bind the hardware USB interrupt to the USB stack.  Interrupts are the
// primary mechanism the USB stack uses to receive data from hardware.
bind_interrupts!(struct Irqs {
    USBCTRL_IRQ => InterruptHandler<USB>;
});

// The USB_DEVICE is stored as a static to allow us to spawn a task using the
// USB runner.  StaticCell::init() gives us the 'static mutable reference
// that usb_task() needs.
static USB_DEVICE: StaticCell<UsbDevice<'static, UsbDriver>> = StaticCell::new();

// The CDC-ACM class state must outlive the class.
static CDC_STATE: StaticCell<State<'static>> = StaticCell::new();

// The following statics are used to store the USB descriptor buffers and
// control buffer.  The ownership of these is passed to the USB builder.
static CONFIG_DESC: ConstStaticCell<[u8; 256]> = ConstStaticCell::new([0; 256]);
static BOS_DESC: ConstStaticCell<[u8; 256]> = ConstStaticCell::new([0; 256]);
static MSOS_DESC: ConstStaticCell<[u8; 256]> = ConstStaticCell::new([0; 256]);
static CONTROL_BUF: ConstStaticCell<[u8; 64]> = ConstStaticCell::new([0; 64]);

/// Used to create the embassy USB stack.
pub struct UsbStack {}

impl UsbStack {
    /// Creates the USB stack.
    ///
    /// # Arguments
    /// - `usb` - The USB peripheral
    /// - `serial` - This device's USB serial number
    ///
    /// Returns the USB device, to be run by [`usb_task`], and the two halves
    /// of the CDC-ACM class, to be run by [`cdc_tx_task`] and
    /// [`cdc_rx_task`].
    pub fn create_static(
        p_usb: USB,
        serial: &'static str,
    ) -> (
        &'static mut UsbDevice<'static, UsbDriver>,
        Sender<'static, UsbDriver>,
        Receiver<'static, UsbDriver>,
    ) {
        let driver = RpUsbDriver::new(p_usb, Irqs);

        let mut config = Config::new(VENDOR_ID, PRODUCT_ID);
        config.manufacturer = Some(MANUFACTURER);
        config.product = Some(PRODUCT);
        config.serial_number = Some(serial);
        config.max_power = USB_POWER_MA;
        config.max_packet_size_0 = MAX_PACKET_SIZE_0;

        // CDC-ACM uses an interface association, so the device advertises
        // itself as a composite device with IADs.
        config.device_class = 0xEF;
        config.device_sub_class = 0x02;
        config.device_protocol = 0x01;
        config.composite_with_iads = true;

        let mut builder = Builder::new(
            driver,
            config,
            CONFIG_DESC.take(),
            BOS_DESC.take(),
            MSOS_DESC.take(),
            CONTROL_BUF.take(),
        );

        let state = CDC_STATE.init(State::new());
        let class = CdcAcmClass::new(&mut builder, state, MAX_EP_PACKET_SIZE);
        let (sender, receiver) = class.split();

        let usb = USB_DEVICE.init(builder.build());

        (usb, sender, receiver)
    }
}

// Method to run the USB stack.
#[embassy_executor::task]
pub async fn usb_task(usb: &'static mut UsbDevice<'static, UsbDriver>) -> ! {
    let core = embassy_rp::pac::SIO.cpuid().read();
    info!("Core{}: USB task started", core);

    // Run the USB Device runner.  This loop is the internal implemenation of
    // usb.run().
    loop {
        // Run the USB stack until it suspends.  This is not safely
        // cancellable.
        usb.run_until_suspend().await;

        // Cancel-safe
        usb.wait_resume().await;
    }
}
