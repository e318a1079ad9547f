//! Mesh Node Entity
//!
//! Top-level structure representing a running mesh node. The Node holds
//! all routing state (context, routing table, signing requirements,
//! firmware transfer state) and the boxed collaborator seams (wire link,
//! persistent store, clock, signing provider, gateway transport, flash).
//!
//! Everything runs on one logical thread: the owner repeatedly calls
//! [`Node::process`]; "blocking" protocol waits are cooperative loops
//! that re-enter the dispatcher so unrelated traffic keeps flowing.

mod discovery;
mod dispatch;
mod firmware;
mod handshake;
mod router;
#[cfg(test)]
mod tests;

use crate::config::Config;
use crate::context::NodeContext;
use crate::firmware::{FirmwareConfig, FlashStore};
use crate::gateway::GatewayTransport;
use crate::link::{Clock, Indicator, WireLink};
use crate::message::{Message, InternalType, AUTO};
use crate::routing::RoutingTable;
use crate::signing::{Signer, SigningTable};
use crate::storage::Storage;
use rand::Rng;
use std::fmt;
use tracing::info;

pub use firmware::FirmwareState;
pub use handshake::NonceStatus;

/// Node operational state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeState {
    /// Created but not started.
    Created,
    /// Fully operational.
    Running,
    /// Permanently stopped: the gateway reported address-space
    /// exhaustion and the node cannot operate without an address.
    Halted,
    /// A firmware update completed and a reboot was requested.
    Rebooting,
}

impl NodeState {
    /// Check if the node is processing traffic.
    pub fn is_operational(&self) -> bool {
        matches!(self, NodeState::Running)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeState::Created => "created",
            NodeState::Running => "running",
            NodeState::Halted => "halted",
            NodeState::Rebooting => "rebooting",
        };
        write!(f, "{}", s)
    }
}

/// Callback receiving fully processed inbound application messages.
pub type ReceiveCallback = Box<dyn FnMut(&Message)>;

/// Callback receiving indicator pulses (activity/error signal).
pub type IndicatorCallback = Box<dyn FnMut(Indicator)>;

/// A running mesh node.
///
/// Construction wires in the mandatory collaborators; optional
/// capabilities (signing provider, gateway transport, flash store,
/// application callback) are attached with the `with_*` builders before
/// [`Node::start`].
pub struct Node {
    // === Configuration ===
    config: Config,

    // === State ===
    state: NodeState,
    /// This node's routing identity.
    context: NodeContext,
    /// Persisted dest -> next-hop table.
    routes: RoutingTable,
    /// Persisted per-peer signing requirements.
    sign_table: SigningTable,
    /// In-flight signing handshake state.
    nonce_status: NonceStatus,
    /// Snapshot of the message awaiting a signature. The live buffer may
    /// be overwritten by traffic serviced while we wait for the nonce.
    pending_sign: Option<Message>,
    /// Reentrancy guard for parent discovery.
    finding_parent: bool,
    /// OTA transfer state.
    firmware: FirmwareState,

    // === Collaborators ===
    link: Box<dyn WireLink>,
    storage: Box<dyn Storage>,
    clock: Box<dyn Clock>,
    signer: Option<Box<dyn Signer>>,
    gateway: Option<Box<dyn GatewayTransport>>,
    flash: Option<Box<dyn FlashStore>>,
    receive_cb: Option<ReceiveCallback>,
    indicator_cb: Option<IndicatorCallback>,
}

impl Node {
    /// Create a node from configuration and the mandatory collaborators.
    ///
    /// Loads all persisted state (context, routing table, signing
    /// requirements, firmware descriptor) from the store. A gateway
    /// configuration pins the context to address 0 at distance 0.
    pub fn new(
        config: Config,
        link: Box<dyn WireLink>,
        storage: Box<dyn Storage>,
        clock: Box<dyn Clock>,
    ) -> Self {
        let context = if config.node.gateway {
            NodeContext::gateway()
        } else {
            NodeContext::load(&*storage)
        };
        let routes = RoutingTable::load(&*storage);
        let sign_table = SigningTable::load(&*storage);
        let firmware = FirmwareState::load(&*storage);

        Self {
            config,
            state: NodeState::Created,
            context,
            routes,
            sign_table,
            nonce_status: NonceStatus::Idle,
            pending_sign: None,
            finding_parent: false,
            firmware,
            link,
            storage,
            clock,
            signer: None,
            gateway: None,
            flash: None,
            receive_cb: None,
            indicator_cb: None,
        }
    }

    /// Attach a signing provider.
    pub fn with_signer(mut self, signer: Box<dyn Signer>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Attach a controller-facing gateway transport.
    pub fn with_gateway_transport(mut self, gateway: Box<dyn GatewayTransport>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Attach a flash store for OTA firmware images.
    pub fn with_flash(mut self, flash: Box<dyn FlashStore>) -> Self {
        self.flash = Some(flash);
        self
    }

    /// Attach the application receive callback.
    pub fn on_receive(mut self, callback: ReceiveCallback) -> Self {
        self.receive_cb = Some(callback);
        self
    }

    /// Attach an indicator (activity/error pulse) callback.
    pub fn on_indicator(mut self, callback: IndicatorCallback) -> Self {
        self.indicator_cb = Some(callback);
        self
    }

    /// Bring the node online.
    ///
    /// Configures the link address, announces gateway readiness, and for
    /// sensor nodes runs parent discovery, node id acquisition and
    /// presentation as needed.
    pub fn start(&mut self) {
        self.state = NodeState::Running;
        self.link.set_address(self.context.node_id);

        if self.config.node.gateway {
            info!(node_id = self.context.node_id, "gateway started");
            if let Some(gw) = self.gateway.as_mut() {
                let mut ready = Message::internal(
                    self.context.node_id,
                    self.context.node_id,
                    InternalType::GatewayReady,
                );
                ready.set_str("Gateway startup complete.");
                gw.send(&ready);
            }
            return;
        }

        info!(
            node_id = self.context.node_id,
            parent = self.context.parent_node_id,
            distance = self.context.distance,
            "node starting"
        );

        if self.config.node.auto_find_parent {
            self.find_parent();
        }
        if self.context.node_id == AUTO {
            self.request_node_id();
        } else {
            self.present_node();
        }
    }

    // === Accessors ===

    /// The node state.
    pub fn state(&self) -> NodeState {
        self.state
    }

    /// This node's routing identity.
    pub fn context(&self) -> &NodeContext {
        &self.context
    }

    /// The routing table.
    pub fn routes(&self) -> &RoutingTable {
        &self.routes
    }

    /// The per-peer signing requirement table.
    pub fn signing_table(&self) -> &SigningTable {
        &self.sign_table
    }

    /// The OTA transfer state.
    pub fn firmware_state(&self) -> &FirmwareState {
        &self.firmware
    }

    /// The persisted firmware descriptor.
    pub fn firmware_config(&self) -> FirmwareConfig {
        self.firmware.config
    }

    // === Shared plumbing ===

    /// Busy-wait for a wall-clock window while servicing traffic.
    ///
    /// This is the system's only suspension primitive: inbound messages
    /// keep being dispatched, but no second routing operation ever runs
    /// concurrently.
    pub fn wait_ms(&mut self, ms: u64) {
        let enter = self.clock.now_ms();
        while self.clock.now_ms().saturating_sub(enter) < ms {
            self.process();
        }
    }

    /// Randomized delay before answering a broadcast, to spread replies
    /// from multiple responders.
    pub(in crate::node) fn reply_jitter(&mut self) {
        let bound = self.config.timing.reply_jitter_ms.max(1);
        let jitter = rand::thread_rng().gen_range(0..bound);
        self.wait_ms(jitter);
    }

    /// Raise an indicator pulse. Observational only.
    pub(in crate::node) fn pulse(&mut self, indicator: Indicator) {
        if let Some(cb) = self.indicator_cb.as_mut() {
            cb(indicator);
        }
    }

    /// Hand a fully processed message to the application callback.
    pub(in crate::node) fn deliver(&mut self, msg: &Message) {
        if let Some(cb) = self.receive_cb.as_mut() {
            cb(msg);
        }
    }

    /// Current time from the platform clock.
    pub(in crate::node) fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("node_id", &self.context.node_id)
            .field("parent", &self.context.parent_node_id)
            .field("distance", &self.context.distance)
            .field("state", &self.state)
            .field("repeater", &self.config.node.repeater)
            .field("gateway", &self.config.node.gateway)
            .finish()
    }
}
