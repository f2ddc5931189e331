//! Tests for the GPIB bus transport, against a simulated peer.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

mod common;

use rstest::*;

use common::{FakeClock, Seen, SimBus};
use pico488_rs::{
    BusByte, BusError, GpibBus, HandshakeStep, Lines, ReadOptions, ReadPolicy, Transceiver,
    Uniline, WriteFlags,
};

type SimGpib = GpibBus<SimBus, FakeClock>;

/// Create a bus with the default 10ms timeout.
fn crt_bus(controller: bool) -> SimGpib {
    let mut bus = GpibBus::new(SimBus::new(), FakeClock::new(), controller);
    bus.set_timeout(10);
    bus
}

/// A controller bus.
#[fixture]
fn ctl_bus() -> SimGpib {
    crt_bus(true)
}

/// A device bus.
#[fixture]
fn dev_bus() -> SimGpib {
    crt_bus(false)
}

/// After initialization the bus is an idle listener.  The controller drives
/// REN, a device doesn't.
#[rstest]
#[case(true)]
#[case(false)]
fn test_initial_state(#[case] controller: bool) {
    let bus = crt_bus(controller);
    let port = bus.port();

    assert!(!bus.is_talker());
    assert_eq!(bus.is_controller(), controller);
    assert!(port.ours().contains(Lines::NRFD | Lines::NDAC));
    assert!(!port.ours().intersects(Lines::ATN | Lines::DAV | Lines::EOI | Lines::IFC));
    assert_eq!(port.ours().contains(Lines::REN), controller);
    assert!(!port.controls().contains(Transceiver::TE));
    assert_eq!(port.controls().contains(Transceiver::SC), controller);
    assert_eq!(port.controls().contains(Transceiver::DC), !controller);
}

/// Timeouts are rounded up to 10ms ticks and clamped.
#[rstest]
#[case(0, None)]
#[case(1, Some(1))]
#[case(10, Some(1))]
#[case(11, Some(2))]
#[case(500, Some(50))]
#[case(2540, Some(254))]
#[case(3000, Some(254))]
fn test_timeout_ticks(mut ctl_bus: SimGpib, #[case] ms: u16, #[case] ticks: Option<u8>) {
    ctl_bus.set_timeout(ms);
    assert_eq!(ctl_bus.timeout_ticks(), ticks);
}

/// A written byte is seen by the listener, with EOI if requested.
#[rstest]
fn test_put_byte(mut ctl_bus: SimGpib) {
    assert_eq!(ctl_bus.put_byte(0x41, WriteFlags::empty()), Ok(()));
    assert_eq!(ctl_bus.put_byte(0x42, WriteFlags::USE_EOI), Ok(()));

    assert!(ctl_bus.is_talker());
    assert_eq!(ctl_bus.port().seen, [Seen::data(0x41), Seen::end(0x42)]);

    // The handshake is complete - DAV and EOI released.
    assert!(!ctl_bus.port().ours().intersects(Lines::DAV | Lines::EOI));
}

/// Bytes sent with ATN asserted are seen as commands.
#[rstest]
fn test_put_under_atn(mut ctl_bus: SimGpib) {
    ctl_bus.control_signal(Uniline::CommandStart);
    ctl_bus.put_byte(0x3F, WriteFlags::empty()).unwrap();
    ctl_bus.control_signal(Uniline::CommandEnd);
    ctl_bus.put_byte(0x0D, WriteFlags::empty()).unwrap();

    assert_eq!(ctl_bus.port().seen, [Seen::command(0x3F), Seen::data(0x0D)]);
    assert!(!ctl_bus.port().ours().contains(Lines::ATN));
}

/// EOI only goes with the final byte of a block.
#[rstest]
fn test_write_block_eoi_on_last(mut ctl_bus: SimGpib) {
    assert_eq!(ctl_bus.write_block(b"abc", WriteFlags::USE_EOI), 3);
    assert_eq!(
        ctl_bus.port().seen,
        [Seen::data(b'a'), Seen::data(b'b'), Seen::end(b'c')]
    );
    assert_eq!(ctl_bus.write_block(b"", WriteFlags::USE_EOI), 0);
}

/// A listener which never becomes ready makes the write fail, and the bus
/// reverts to an idle listener.
#[rstest]
fn test_put_byte_timeout(mut ctl_bus: SimGpib) {
    ctl_bus.port_mut().stuck = true;

    let result = ctl_bus.put_byte(0x41, WriteFlags::empty());
    assert_eq!(result, Err(BusError::Timeout(HandshakeStep::ReadyForData)));
    assert!(!ctl_bus.is_talker());
    assert!(ctl_bus.port().seen.is_empty());

    assert_eq!(ctl_bus.write_block(b"xyz", WriteFlags::empty()), 0);
}

/// A read that never sees DAV times out, and afterwards the transport works
/// as if freshly booted.
#[rstest]
fn test_get_byte_timeout_recovers(mut ctl_bus: SimGpib) {
    ctl_bus.control_signal(Uniline::CommandStart);

    let result = ctl_bus.get_byte();
    assert_eq!(result, Err(BusError::Timeout(HandshakeStep::DataValid)));

    // Reinitialized: ATN released, idle listener, controller lines intact.
    let ours = ctl_bus.port().ours();
    assert!(!ours.contains(Lines::ATN));
    assert!(ours.contains(Lines::NRFD | Lines::NDAC | Lines::REN));

    assert_eq!(ctl_bus.put_byte(0x55, WriteFlags::empty()), Ok(()));
    assert_eq!(ctl_bus.port().seen, [Seen::data(0x55)]);
}

/// Received bytes carry the EOI and ATN tags.
#[rstest]
fn test_get_byte_tags(mut dev_bus: SimGpib) {
    dev_bus.port_mut().queue_commands(&[0x25]);
    dev_bus.port_mut().queue_data(b"AB", true);

    let cmd = dev_bus.get_byte().unwrap();
    assert_eq!(
        cmd,
        BusByte {
            value: 0x25,
            end: false,
            command: true
        }
    );
    assert_eq!(u16::from(cmd), 0x225);

    let a = dev_bus.get_byte().unwrap();
    assert_eq!(u16::from(a), 0x41);
    let b = dev_bus.get_byte().unwrap();
    assert_eq!(u16::from(b), 0x142);

    assert_eq!(dev_bus.port().queued(), 0);
    assert!(dev_bus.get_byte().is_err());
}

/// `read_until` stops at the terminator for the policy.
#[rstest]
#[case(ReadPolicy::CrLf, b"ab\rc\r\nzz", b"ab\rc\r\n")]
#[case(ReadPolicy::Cr, b"ab\ncd\rzz", b"ab\ncd\r")]
#[case(ReadPolicy::Lf, b"ab\rcd\nzz", b"ab\rcd\n")]
fn test_read_until_terminator(
    mut ctl_bus: SimGpib,
    #[case] policy: ReadPolicy,
    #[case] sent: &[u8],
    #[case] expected: &[u8],
) {
    ctl_bus.port_mut().queue_data(sent, false);

    let mut received = Vec::new();
    let options = ReadOptions {
        policy,
        eot_char: None,
    };
    let count = ctl_bus.read_until(|b| received.push(b), options);

    assert_eq!(received, expected);
    assert_eq!(count, expected.len());
    assert_eq!(ctl_bus.port().queued(), sent.len() - expected.len());
}

/// EOI ends any read, and the EOT character follows it if given.  Bus
/// commands in the stream are discarded.
#[rstest]
fn test_read_until_eoi(mut ctl_bus: SimGpib) {
    ctl_bus.port_mut().queue_data(b"1\r\n", false);
    ctl_bus.port_mut().queue_commands(&[0x3F]);
    ctl_bus.port_mut().queue_data(b"2", true);
    ctl_bus.port_mut().queue_data(b"3", false);

    let mut received = Vec::new();
    let options = ReadOptions {
        policy: ReadPolicy::EoiOnly,
        eot_char: Some(b'*'),
    };
    let count = ctl_bus.read_until(|b| received.push(b), options);

    assert_eq!(received, b"1\r\n2*");
    assert_eq!(count, 4);
    assert_eq!(ctl_bus.port().queued(), 1);
}

/// A read with nothing to receive times out with nothing pushed.
#[rstest]
fn test_read_until_nothing(mut ctl_bus: SimGpib) {
    let mut received = Vec::new();
    let options = ReadOptions {
        policy: ReadPolicy::CrLf,
        eot_char: Some(b'*'),
    };
    assert_eq!(ctl_bus.read_until(|b| received.push(b), options), 0);
    assert!(received.is_empty());
}

/// Uniline messages drive the single lines, and SRQ can be sensed.
#[rstest]
fn test_uniline(mut ctl_bus: SimGpib) {
    assert!(!ctl_bus.control_signal(Uniline::CheckSrq));
    ctl_bus.port_mut().set_peer_srq(true);
    assert!(ctl_bus.control_signal(Uniline::CheckSrq));

    ctl_bus.control_signal(Uniline::BusClearStart);
    assert!(ctl_bus.port().ours().contains(Lines::IFC));
    ctl_bus.control_signal(Uniline::BusClearEnd);
    assert!(!ctl_bus.port().ours().contains(Lines::IFC));
    assert_eq!(ctl_bus.port().ifc_pulses, 1);

    ctl_bus.control_signal(Uniline::SrqAssert);
    assert!(ctl_bus.port().ours().contains(Lines::SRQ));
    ctl_bus.control_signal(Uniline::SrqDeassert);
    assert!(!ctl_bus.port().ours().contains(Lines::SRQ));
}

/// Switching role reinitializes the lines for that role.
#[rstest]
fn test_reinitialize_role(mut ctl_bus: SimGpib) {
    ctl_bus.initialize(false);
    assert!(!ctl_bus.is_controller());
    assert!(!ctl_bus.port().ours().contains(Lines::REN));
    assert!(ctl_bus.port().controls().contains(Transceiver::DC));

    ctl_bus.initialize(true);
    assert!(ctl_bus.port().ours().contains(Lines::REN));
    assert!(!ctl_bus.port().controls().contains(Transceiver::DC));
}
