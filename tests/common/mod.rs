//! Test doubles for the GPIB engine: a simulated bus with one peer on it, a
//! fake clock, a loopback host channel and an in-memory config store.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

#![allow(dead_code)]

use std::cell::Cell;
use std::collections::VecDeque;

use pico488_rs::{BusPort, CONFIG_LEN, Clock, ConfigStore, HostChannel, Lines, Transceiver};

/// A byte the peer accepted from us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Seen {
    pub value: u8,
    pub eoi: bool,
    pub atn: bool,
}

impl Seen {
    pub fn data(value: u8) -> Self {
        Self {
            value,
            eoi: false,
            atn: false,
        }
    }

    pub fn end(value: u8) -> Self {
        Self {
            value,
            eoi: true,
            atn: false,
        }
    }

    pub fn command(value: u8) -> Self {
        Self {
            value,
            eoi: false,
            atn: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListenerState {
    Ready,
    Accepted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TalkerState {
    Idle,
    Valid,
}

/// A GPIB bus with a single peer on it.  The peer listens whenever our
/// transceivers are set to talk, and talks from its queue whenever they are
/// set to listen.  It reacts each time the bus is sensed, which is what the
/// transport busy-polls while handshaking.
pub struct SimBus {
    ours: Lines,
    data: u8,
    controls: Transceiver,

    peer: Lines,
    peer_data: u8,

    listener: ListenerState,
    talker: TalkerState,

    /// Bytes the peer accepted, in order.
    pub seen: Vec<Seen>,

    // Bytes the peer will send: value, EOI, ATN.
    queue: VecDeque<(u8, bool, bool)>,

    /// Peer holds NRFD, so any write stalls.
    pub stuck: bool,

    /// Times IFC was asserted.
    pub ifc_pulses: usize,
}

impl SimBus {
    pub fn new() -> Self {
        Self {
            ours: Lines::empty(),
            data: 0xFF,
            controls: Transceiver::empty(),
            peer: Lines::empty(),
            peer_data: 0xFF,
            listener: ListenerState::Ready,
            talker: TalkerState::Idle,
            seen: Vec::new(),
            queue: VecDeque::new(),
            stuck: false,
            ifc_pulses: 0,
        }
    }

    /// Queue data bytes for the peer to send.  EOI goes with the last one
    /// if `eoi`.
    pub fn queue_data(&mut self, bytes: &[u8], eoi: bool) {
        for (ii, &byte) in bytes.iter().enumerate() {
            self.queue
                .push_back((byte, eoi && ii == bytes.len() - 1, false));
        }
    }

    /// Queue bus commands for the peer to send under ATN.
    pub fn queue_commands(&mut self, cmds: &[u8]) {
        for &cmd in cmds {
            self.queue.push_back((cmd, false, true));
        }
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Lines we are asserting.
    pub fn ours(&self) -> Lines {
        self.ours
    }

    pub fn controls(&self) -> Transceiver {
        self.controls
    }

    /// The peer asserts or releases SRQ.
    pub fn set_peer_srq(&mut self, asserted: bool) {
        self.peer.set(Lines::SRQ, asserted);
    }

    /// Just the data bytes seen, without flags.
    pub fn seen_values(&self) -> Vec<u8> {
        self.seen.iter().map(|s| s.value).collect()
    }

    pub fn seen_data(&self) -> Vec<u8> {
        self.seen
            .iter()
            .filter(|s| !s.atn)
            .map(|s| s.value)
            .collect()
    }

    pub fn seen_commands(&self) -> Vec<u8> {
        self.seen
            .iter()
            .filter(|s| s.atn)
            .map(|s| s.value)
            .collect()
    }

    pub fn clear_seen(&mut self) {
        self.seen.clear();
    }

    fn step(&mut self) {
        if self.controls.contains(Transceiver::TE) {
            self.release_talker();
            self.step_listener();
        } else {
            self.release_listener();
            self.step_talker();
        }
    }

    fn release_talker(&mut self) {
        if self.talker == TalkerState::Valid {
            self.talker = TalkerState::Idle;
        }
        self.peer.remove(Lines::DAV | Lines::EOI | Lines::ATN);
        self.peer_data = 0xFF;
    }

    fn release_listener(&mut self) {
        self.listener = ListenerState::Ready;
        self.peer.remove(Lines::NRFD | Lines::NDAC);
    }

    fn step_listener(&mut self) {
        if self.stuck {
            self.peer.insert(Lines::NRFD | Lines::NDAC);
            return;
        }
        match self.listener {
            ListenerState::Ready => {
                self.peer.insert(Lines::NDAC);
                self.peer.remove(Lines::NRFD);
                if self.ours.contains(Lines::DAV) {
                    self.seen.push(Seen {
                        value: !self.data,
                        eoi: self.ours.contains(Lines::EOI),
                        atn: self.ours.contains(Lines::ATN),
                    });
                    self.peer.insert(Lines::NRFD);
                    self.peer.remove(Lines::NDAC);
                    self.listener = ListenerState::Accepted;
                }
            }
            ListenerState::Accepted => {
                if !self.ours.contains(Lines::DAV) {
                    self.peer.insert(Lines::NDAC);
                    self.peer.remove(Lines::NRFD);
                    self.listener = ListenerState::Ready;
                }
            }
        }
    }

    fn step_talker(&mut self) {
        match self.talker {
            TalkerState::Idle => {
                if self.ours.contains(Lines::NRFD) {
                    return;
                }
                if let Some(&(value, eoi, atn)) = self.queue.front() {
                    self.peer_data = !value;
                    self.peer.set(Lines::EOI, eoi);
                    self.peer.set(Lines::ATN, atn);
                    self.peer.insert(Lines::DAV);
                    self.talker = TalkerState::Valid;
                }
            }
            TalkerState::Valid => {
                if !self.ours.contains(Lines::NDAC) {
                    self.queue.pop_front();
                    self.peer.remove(Lines::DAV | Lines::EOI | Lines::ATN);
                    self.peer_data = 0xFF;
                    self.talker = TalkerState::Idle;
                }
            }
        }
    }
}

impl Default for SimBus {
    fn default() -> Self {
        Self::new()
    }
}

impl BusPort for SimBus {
    fn assert_lines(&mut self, lines: Lines) {
        if lines.contains(Lines::IFC) && !self.ours.contains(Lines::IFC) {
            self.ifc_pulses += 1;
        }
        self.ours.insert(lines);
    }

    fn release_lines(&mut self, lines: Lines) {
        self.ours.remove(lines);
    }

    fn sense(&mut self) -> Lines {
        self.step();
        self.ours | self.peer
    }

    fn write_data(&mut self, levels: u8) {
        self.data = levels;
    }

    fn read_data(&mut self) -> u8 {
        self.data & self.peer_data
    }

    fn enable(&mut self, controls: Transceiver) {
        self.controls.insert(controls);
    }

    fn disable(&mut self, controls: Transceiver) {
        self.controls.remove(controls);
    }
}

/// A clock which advances 1ms every time it is read.
#[derive(Default)]
pub struct FakeClock {
    now: Cell<u64>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for FakeClock {
    fn now_ms(&self) -> u64 {
        let now = self.now.get() + 1;
        self.now.set(now);
        now
    }
}

/// Host channel backed by in-memory buffers.
#[derive(Default)]
pub struct LoopbackChannel {
    pub input: VecDeque<u8>,
    pub output: Vec<u8>,
}

impl LoopbackChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send(&mut self, text: &str) {
        self.input.extend(text.as_bytes());
    }

    pub fn send_bytes(&mut self, bytes: &[u8]) {
        self.input.extend(bytes);
    }

    /// Everything written since the last call.
    pub fn take_output(&mut self) -> String {
        String::from_utf8_lossy(&std::mem::take(&mut self.output)).into_owned()
    }
}

impl HostChannel for LoopbackChannel {
    fn write(&mut self, bytes: &[u8]) -> usize {
        self.output.extend_from_slice(bytes);
        bytes.len()
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        let count = buf.len().min(self.input.len());
        for (slot, byte) in buf.iter_mut().zip(self.input.drain(..count)) {
            *slot = byte;
        }
        count
    }
}

/// In-memory config store, remembering every save.
#[derive(Default)]
pub struct MemStore {
    pub record: Option<[u8; CONFIG_LEN]>,
    pub saves: Vec<[u8; CONFIG_LEN]>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: [u8; CONFIG_LEN]) -> Self {
        Self {
            record: Some(record),
            saves: Vec::new(),
        }
    }
}

impl ConfigStore for MemStore {
    fn load(&mut self) -> Option<[u8; CONFIG_LEN]> {
        self.record
    }

    fn persist(&mut self, record: &[u8; CONFIG_LEN]) {
        self.record = Some(*record);
        self.saves.push(*record);
    }
}
