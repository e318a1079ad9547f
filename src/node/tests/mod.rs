//! Test fixtures: in-memory fakes for every collaborator seam plus a
//! wired-up node test bed.
//!
//! The fakes share state through `Rc<RefCell<..>>` handles so tests keep
//! a view into collaborators after the node takes ownership of the boxed
//! halves. The test clock advances one millisecond per reading, so
//! cooperative wait windows run to completion instantly.

mod routing;

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use crate::config::Config;
use crate::firmware::FlashStore;
use crate::gateway::GatewayTransport;
use crate::link::{Clock, Indicator, WireLink};
use crate::message::{Command, Message, BROADCAST_ADDRESS};
use crate::node::{Node, NodeState};
use crate::storage::{
    MemStorage, Storage, ADDR_DISTANCE, ADDR_NODE_ID, ADDR_PARENT_NODE_ID, ADDR_ROUTES,
};

// ============================================================================
// Fakes
// ============================================================================

#[derive(Default)]
pub struct LinkState {
    pub address: u8,
    pub inbound: VecDeque<(u8, Vec<u8>)>,
    pub sent: Vec<(u8, Vec<u8>)>,
    pub fail_unicast: bool,
}

/// In-memory radio link; frames are (physical-address, bytes) pairs.
#[derive(Clone, Default)]
pub struct TestLink(pub Rc<RefCell<LinkState>>);

impl TestLink {
    /// Queue an inbound frame as if received on the air.
    pub fn inject(&self, to: u8, msg: &Message) {
        self.0.borrow_mut().inbound.push_back((to, msg.to_frame()));
    }

    /// Everything transmitted so far, decoded.
    pub fn sent(&self) -> Vec<(u8, Message)> {
        self.0
            .borrow()
            .sent
            .iter()
            .filter_map(|(to, frame)| Message::from_frame(frame).map(|msg| (*to, msg)))
            .collect()
    }

    pub fn clear_sent(&self) {
        self.0.borrow_mut().sent.clear();
    }

    /// Make unicast transmissions report failure (broadcasts never fail).
    pub fn set_fail_unicast(&self, fail: bool) {
        self.0.borrow_mut().fail_unicast = fail;
    }
}

impl WireLink for TestLink {
    fn set_address(&mut self, address: u8) {
        self.0.borrow_mut().address = address;
    }

    fn available(&mut self) -> Option<u8> {
        self.0.borrow().inbound.front().map(|(to, _)| *to)
    }

    fn receive(&mut self, buf: &mut [u8]) -> usize {
        match self.0.borrow_mut().inbound.pop_front() {
            Some((_, frame)) => {
                buf[..frame.len()].copy_from_slice(&frame);
                frame.len()
            }
            None => 0,
        }
    }

    fn send(&mut self, to: u8, frame: &[u8]) -> bool {
        let mut state = self.0.borrow_mut();
        state.sent.push((to, frame.to_vec()));
        to == BROADCAST_ADDRESS || !state.fail_unicast
    }
}

/// Deterministic clock: every reading advances time by one millisecond.
#[derive(Clone)]
pub struct TestClock {
    pub now: Rc<Cell<u64>>,
    pub rebooted: Rc<Cell<bool>>,
}

impl TestClock {
    pub fn new() -> Self {
        Self {
            now: Rc::new(Cell::new(0)),
            rebooted: Rc::new(Cell::new(false)),
        }
    }
}

impl Clock for TestClock {
    fn now_ms(&self) -> u64 {
        let t = self.now.get() + 1;
        self.now.set(t);
        t
    }

    fn reboot(&mut self) {
        self.rebooted.set(true);
    }
}

/// A [`MemStorage`] behind a shared handle, so tests can inspect what the
/// node persisted.
#[derive(Clone)]
pub struct SharedStorage(pub Rc<RefCell<MemStorage>>);

impl SharedStorage {
    pub fn new() -> Self {
        Self(Rc::new(RefCell::new(MemStorage::new())))
    }

    /// Pre-write the node identity records.
    pub fn seed_identity(&self, node_id: u8, parent: u8, distance: u8) {
        let mut storage = self.0.borrow_mut();
        storage.write_byte(ADDR_NODE_ID, node_id);
        storage.write_byte(ADDR_PARENT_NODE_ID, parent);
        storage.write_byte(ADDR_DISTANCE, distance);
    }

    /// Pre-write one routing table entry.
    pub fn seed_route(&self, destination: u8, next_hop: u8) {
        self.0
            .borrow_mut()
            .write_byte(ADDR_ROUTES + destination as usize, next_hop);
    }

    pub fn read(&self, offset: usize) -> u8 {
        self.0.borrow().read_byte(offset)
    }
}

impl Storage for SharedStorage {
    fn read_byte(&self, offset: usize) -> u8 {
        self.0.borrow().read_byte(offset)
    }

    fn write_byte(&mut self, offset: usize, value: u8) {
        self.0.borrow_mut().write_byte(offset, value);
    }
}

pub struct FlashData {
    pub init_ok: bool,
    pub erased: bool,
    pub data: Vec<u8>,
}

/// In-memory firmware flash.
#[derive(Clone)]
pub struct TestFlash(pub Rc<RefCell<FlashData>>);

impl TestFlash {
    pub fn new() -> Self {
        Self(Rc::new(RefCell::new(FlashData {
            init_ok: true,
            erased: false,
            data: vec![0xFF; 4096],
        })))
    }

    /// A flash device whose initialization fails.
    pub fn failing() -> Self {
        let flash = Self::new();
        flash.0.borrow_mut().init_ok = false;
        flash
    }

    pub fn byte(&self, offset: u32) -> u8 {
        self.0.borrow().data[offset as usize]
    }

    pub fn erased(&self) -> bool {
        self.0.borrow().erased
    }
}

impl FlashStore for TestFlash {
    fn init(&mut self) -> bool {
        self.0.borrow().init_ok
    }

    fn erase(&mut self) {
        let mut state = self.0.borrow_mut();
        state.erased = true;
        state.data.fill(0xFF);
    }

    fn write(&mut self, offset: u32, data: &[u8]) {
        let offset = offset as usize;
        self.0.borrow_mut().data[offset..offset + data.len()].copy_from_slice(data);
    }

    fn read_byte(&self, offset: u32) -> u8 {
        self.0.borrow().data[offset as usize]
    }
}

#[derive(Default)]
pub struct GatewayState {
    pub inbound: VecDeque<Message>,
    pub sent: Vec<Message>,
}

/// In-memory controller channel.
#[derive(Clone, Default)]
pub struct TestGateway(pub Rc<RefCell<GatewayState>>);

impl TestGateway {
    /// Queue a controller message for injection into the mesh.
    pub fn inject(&self, msg: Message) {
        self.0.borrow_mut().inbound.push_back(msg);
    }

    /// Messages handed off to the controller so far.
    pub fn sent(&self) -> Vec<Message> {
        self.0.borrow().sent.clone()
    }

    pub fn clear_sent(&self) {
        self.0.borrow_mut().sent.clear();
    }
}

impl GatewayTransport for TestGateway {
    fn send(&mut self, msg: &Message) -> bool {
        self.0.borrow_mut().sent.push(*msg);
        true
    }

    fn receive(&mut self) -> Option<Message> {
        self.0.borrow_mut().inbound.pop_front()
    }
}

// ============================================================================
// Test bed
// ============================================================================

/// A node wired to fakes, with handles into all of them.
pub struct TestBed {
    pub node: Node,
    pub link: TestLink,
    pub clock: TestClock,
    pub storage: SharedStorage,
    pub received: Rc<RefCell<Vec<Message>>>,
    pub indicators: Rc<RefCell<Vec<Indicator>>>,
}

impl TestBed {
    pub fn build(config: Config, storage: SharedStorage) -> Self {
        Self::build_custom(config, storage, |node| node)
    }

    /// Build a node, letting the caller attach extra collaborators
    /// (signer, gateway transport, flash) before the bed takes over.
    pub fn build_custom(
        config: Config,
        storage: SharedStorage,
        wire: impl FnOnce(Node) -> Node,
    ) -> Self {
        let link = TestLink::default();
        let clock = TestClock::new();
        let received: Rc<RefCell<Vec<Message>>> = Rc::default();
        let indicators: Rc<RefCell<Vec<Indicator>>> = Rc::default();

        let rx = received.clone();
        let ind = indicators.clone();
        let node = wire(Node::new(
            config,
            Box::new(link.clone()),
            Box::new(storage.clone()),
            Box::new(clock.clone()),
        ))
        .on_receive(Box::new(move |msg| rx.borrow_mut().push(*msg)))
        .on_indicator(Box::new(move |i| ind.borrow_mut().push(i)));

        Self {
            node,
            link,
            clock,
            storage,
            received,
            indicators,
        }
    }

    pub fn error_pulsed(&self) -> bool {
        self.indicators.borrow().contains(&Indicator::Error)
    }
}

/// Protocol timings shrunk so waits complete within a handful of clock
/// readings.
pub fn test_config() -> Config {
    let mut config = Config::new();
    config.timing.parent_search_wait_ms = 4;
    config.timing.id_request_wait_ms = 4;
    config.timing.config_wait_ms = 4;
    config.timing.verification_timeout_ms = 50;
    config.timing.reply_jitter_ms = 1;
    config.timing.search_failures = 3;
    config.ota.retries = 2;
    config.ota.retry_delay_ms = 2;
    config
}

/// [`test_config`] with the gateway role enabled.
pub fn gateway_test_config() -> Config {
    let mut config = test_config();
    config.node.gateway = true;
    config.node.repeater = true;
    config.node.auto_find_parent = false;
    config
}

/// A node already joined to the mesh: id 5, parent 0 (gateway), distance
/// 1, running. Skips the boot sequence so tests start from a clean link.
pub fn joined_bed(config: Config) -> TestBed {
    let storage = SharedStorage::new();
    storage.seed_identity(5, 0, 1);
    let mut bed = TestBed::build(config, storage);
    bed.node.state = NodeState::Running;
    bed
}

/// Like [`joined_bed`] with extra collaborators.
pub fn joined_bed_custom(config: Config, wire: impl FnOnce(Node) -> Node) -> TestBed {
    let storage = SharedStorage::new();
    storage.seed_identity(5, 0, 1);
    let mut bed = TestBed::build_custom(config, storage, wire);
    bed.node.state = NodeState::Running;
    bed
}

/// A started gateway node bridged to a [`TestGateway`].
pub fn gateway_bed(config: Config) -> (TestBed, TestGateway) {
    let gw = TestGateway::default();
    let gw_clone = gw.clone();
    let mut bed = TestBed::build_custom(config, SharedStorage::new(), move |node| {
        node.with_gateway_transport(Box::new(gw_clone))
    });
    bed.node.start();
    bed.link.clear_sent();
    gw.clear_sent();
    (bed, gw)
}

/// An application-level value message.
pub fn set_msg(sender: u8, destination: u8) -> Message {
    let mut msg = Message::new(sender, destination, 1, Command::Set, 2);
    msg.set_u8(1);
    msg
}
