//! Tests for the session controller in the device role.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

mod common;

use rstest::*;

use common::{FakeClock, LoopbackChannel, MemStore, Seen, SimBus};
use pico488_rs::protocol::command::gpib::{SPD, SPE, UNL, UNT, lad, tad};
use pico488_rs::{Address, Arg, Eos, GpibConfig, Lines, Session};

type SimSession = Session<SimBus, FakeClock, LoopbackChannel, MemStore>;

const MY_ADDRESS: u8 = 5;

fn device_config() -> GpibConfig {
    let mut config = GpibConfig::default();
    config.controller = false;
    config.address = Address::from_args(&[Arg::Value(u32::from(MY_ADDRESS))]).unwrap();
    config
}

fn crt_session(config: GpibConfig) -> SimSession {
    Session::new(
        SimBus::new(),
        FakeClock::new(),
        LoopbackChannel::new(),
        MemStore::with_record(config.to_bytes()),
    )
}

/// Run one polling pass, returning the host output.
fn pass(session: &mut SimSession) -> String {
    session.poll();
    session.host_mut().take_output()
}

/// Send input from the host and poll until it has all been consumed.
/// Returns the host output.
fn exchange(session: &mut SimSession, input: &str) -> String {
    session.host_mut().send(input);
    let mut output = String::new();
    while !session.host().input.is_empty() {
        output.push_str(&pass(session));
    }
    output
}

/// A device at address 5.
#[fixture]
fn dev_session() -> SimSession {
    crt_session(device_config())
}

/// Data is relayed to the host once addressed to listen, up to the
/// terminator, which is included.
#[rstest]
fn test_addressed_listen(mut dev_session: SimSession) {
    exchange(&mut dev_session, "++eos 1\n");

    let port = dev_session.bus_mut().port_mut();
    port.queue_commands(&[UNL, lad(MY_ADDRESS)]);
    port.queue_data(&[0x41, 0x0D, 0x42], false);

    assert_eq!(pass(&mut dev_session), "A\r");
    assert!(dev_session.activity().listening);
    assert_eq!(dev_session.bus().port().queued(), 1);

    assert_eq!(pass(&mut dev_session), "B");
}

/// Data addressed to other devices is not relayed.
#[rstest]
fn test_not_addressed(mut dev_session: SimSession) {
    let port = dev_session.bus_mut().port_mut();
    port.queue_commands(&[UNL, lad(7)]);
    port.queue_data(b"hello\r\n", true);

    assert_eq!(pass(&mut dev_session), "");
    assert!(!dev_session.activity().listening);
}

/// Unlisten stops relaying.
#[rstest]
fn test_unlisten(mut dev_session: SimSession) {
    let port = dev_session.bus_mut().port_mut();
    port.queue_commands(&[lad(MY_ADDRESS)]);
    port.queue_data(b"1", false);
    port.queue_commands(&[UNL]);
    port.queue_data(b"2", true);

    assert_eq!(pass(&mut dev_session), "1");
}

/// EOI ends a message, with the EOT character appended if enabled.
#[rstest]
fn test_eoi_with_eot(mut dev_session: SimSession) {
    // Longer than one host chunk, so takes several passes.
    exchange(&mut dev_session, "++eos 3\n++eot_enable 1\n++eot_char 33\n");
    assert_eq!(dev_session.config().eot_char, b'!');
    assert!(dev_session.config().eot);

    let port = dev_session.bus_mut().port_mut();
    port.queue_commands(&[lad(MY_ADDRESS)]);
    port.queue_data(b"ab\r\n", true);
    port.queue_data(b"cd", false);

    assert_eq!(pass(&mut dev_session), "ab\r\n!");
    assert_eq!(dev_session.bus().port().queued(), 2);
}

/// Listen-only relays everything, without being addressed, and ignores
/// unlisten.
#[rstest]
fn test_listen_only() {
    let mut config = device_config();
    config.listen_only = true;
    config.eos = Eos::Lf;
    let mut session = crt_session(config);

    let port = session.bus_mut().port_mut();
    port.queue_commands(&[UNL, lad(9)]);
    port.queue_data(b"hi\n", false);

    assert_eq!(pass(&mut session), "hi\n");
}

/// Turning listen-only on takes effect immediately.
#[rstest]
fn test_lon_command(mut dev_session: SimSession) {
    exchange(&mut dev_session, "++lon 1\n");
    assert_eq!(exchange(&mut dev_session, "++lon\n"), "1\r\n");

    dev_session.bus_mut().port_mut().queue_data(b"x", true);
    assert_eq!(pass(&mut dev_session), "x");
}

/// Host text is only relayed to the bus once addressed to talk.
#[rstest]
fn test_addressed_talk(mut dev_session: SimSession) {
    exchange(&mut dev_session, "Y\n");
    assert!(dev_session.bus().port().seen.is_empty());

    dev_session
        .bus_mut()
        .port_mut()
        .queue_commands(&[UNL, tad(MY_ADDRESS)]);
    assert_eq!(pass(&mut dev_session), "");

    exchange(&mut dev_session, "X\n");
    assert_eq!(
        dev_session.bus().port().seen,
        [Seen::data(b'X'), Seen::data(b'\r'), Seen::data(b'\n')]
    );
}

/// Untalk stops host text reaching the bus.
#[rstest]
fn test_untalk(mut dev_session: SimSession) {
    let port = dev_session.bus_mut().port_mut();
    port.queue_commands(&[tad(MY_ADDRESS)]);
    pass(&mut dev_session);

    dev_session.bus_mut().port_mut().queue_commands(&[UNT]);
    pass(&mut dev_session);

    exchange(&mut dev_session, "X\n");
    assert!(dev_session.bus().port().seen.is_empty());
}

/// The status byte's request service bit drives SRQ.
#[rstest]
fn test_status_srq(mut dev_session: SimSession) {
    exchange(&mut dev_session, "++status 64\n");
    assert!(dev_session.bus().port().ours().contains(Lines::SRQ));
    assert_eq!(exchange(&mut dev_session, "++status\n"), "64\r\n");

    // Still asserted after a quiet bus pass.
    pass(&mut dev_session);
    assert!(dev_session.bus().port().ours().contains(Lines::SRQ));

    exchange(&mut dev_session, "++status 1\n");
    assert!(!dev_session.bus().port().ours().contains(Lines::SRQ));
}

/// A serial poll returns the status byte, and clears the service request.
#[rstest]
fn test_serial_poll() {
    let mut config = device_config();
    config.status = 0x42;
    let mut session = crt_session(config);
    assert!(session.bus().port().ours().contains(Lines::SRQ));

    session
        .bus_mut()
        .port_mut()
        .queue_commands(&[SPE, tad(MY_ADDRESS)]);
    assert_eq!(pass(&mut session), "");

    assert_eq!(session.bus().port().seen, [Seen::data(0x42)]);
    assert_eq!(session.config().status, 0x02);
    assert!(!session.bus().port().ours().contains(Lines::SRQ));

    // Serial poll disabled, addressing to talk hands over to the host.
    session.bus_mut().port_mut().clear_seen();
    session
        .bus_mut()
        .port_mut()
        .queue_commands(&[UNT, SPD, tad(MY_ADDRESS)]);
    pass(&mut session);
    assert!(session.bus().port().seen.is_empty());

    exchange(&mut session, "++eos 3\nZ\n");
    assert_eq!(session.bus().port().seen_data(), b"Z");
}

/// Switching to controller mode stops bus ingestion.
#[rstest]
fn test_switch_to_controller(mut dev_session: SimSession) {
    exchange(&mut dev_session, "++mode 1\n");
    assert!(dev_session.bus().is_controller());

    dev_session.bus_mut().port_mut().queue_data(b"abc", true);
    assert_eq!(pass(&mut dev_session), "");
    assert_eq!(dev_session.bus().port().queued(), 3);
}
