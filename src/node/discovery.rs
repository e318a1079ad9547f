//! Parent discovery, node id acquisition and node presentation.
//!
//! Parent discovery is an online shortest-path relaxation over an
//! unknown topology: broadcast a FIND_PARENT probe, then keep servicing
//! traffic for a fixed window while every FIND_PARENT_RESPONSE that
//! offers a strictly shorter path is adopted and persisted immediately.

use crate::link::Indicator;
use crate::message::{
    is_valid_distance, InternalType, Message, AUTO, BROADCAST_ADDRESS, DISTANCE_INVALID,
    GATEWAY_ADDRESS, NODE_SENSOR_ID,
};
use crate::message::Command;
use crate::node::{Node, NodeState};
use tracing::{debug, error, info};

/// Presentation sensor-type for a plain sensor node.
const S_NODE: u8 = 17;
/// Presentation sensor-type for a repeater node.
const S_REPEATER: u8 = 18;

impl Node {
    /// Broadcast-search for the best (lowest-distance) next hop toward
    /// the gateway.
    ///
    /// Idempotent under reentrant invocation: discovery triggered from
    /// inside discovery (e.g. a relayed message failing mid-window) is a
    /// no-op. Resets the distance to the invalid sentinel, so replies
    /// collected during the window can only improve it.
    pub fn find_parent(&mut self) {
        if self.finding_parent || self.config.node.gateway {
            return;
        }
        self.finding_parent = true;
        self.context.failed_transmissions = 0;
        self.context.distance = DISTANCE_INVALID;

        debug!("searching for parent");
        let mut probe = Message::internal(
            self.context.node_id,
            BROADCAST_ADDRESS,
            InternalType::FindParent,
        );
        // Direct broadcast write; routing would recurse into discovery.
        self.send_write(BROADCAST_ADDRESS, &mut probe);

        self.wait_ms(self.config.timing.parent_search_wait_ms);
        self.finding_parent = false;

        if self.context.has_parent() {
            info!(
                parent = self.context.parent_node_id,
                distance = self.context.distance,
                "parent search finished"
            );
        } else {
            debug!("parent search finished without a parent");
        }
    }

    /// Evaluate one FIND_PARENT_RESPONSE against the current parent.
    ///
    /// Adopting a responder increments its advertised distance by one
    /// (our hop to it); an improvement is persisted immediately.
    pub(in crate::node) fn apply_parent_candidate(&mut self, responder: u8, distance: u8) {
        if !is_valid_distance(distance) {
            return;
        }
        let candidate = distance.saturating_add(1);
        if is_valid_distance(candidate) && candidate < self.context.distance {
            self.context.distance = candidate;
            self.context.parent_node_id = responder;
            self.context.persist_parent(&mut *self.storage);
            debug!(
                parent = responder,
                distance = candidate,
                "closer neighbor adopted as parent"
            );
        }
    }

    /// Request a node id from the gateway and wait for the response.
    ///
    /// The ID_RESPONSE is applied by the dispatcher while the window is
    /// open; this call itself only fires the request.
    pub fn request_node_id(&mut self) {
        debug!("requesting node id");
        self.link.set_address(self.context.node_id);
        let mut request =
            Message::internal(self.context.node_id, GATEWAY_ADDRESS, InternalType::IdRequest);
        self.send_write(self.context.parent_node_id, &mut request);
        self.wait_ms(self.config.timing.id_request_wait_ms);
    }

    /// Apply the gateway's ID_RESPONSE.
    ///
    /// An AUTO value back from the gateway means the address space is
    /// exhausted: the node halts permanently, since it cannot take part
    /// in the mesh without an address.
    pub(in crate::node) fn apply_id_response(&mut self, node_id: u8) {
        if node_id == AUTO {
            error!("gateway address space exhausted, halting");
            self.pulse(Indicator::Error);
            self.state = NodeState::Halted;
            return;
        }
        self.context.node_id = node_id;
        self.context.persist_node_id(&mut *self.storage);
        info!(node_id, "node id assigned");
        self.present_node();
    }

    /// Present this node to the gateway.
    ///
    /// Announces our signing preference, presents the node type,
    /// requests configuration, and (with OTA enabled) asks the
    /// controller for the current firmware descriptor.
    pub fn present_node(&mut self) {
        self.link.set_address(self.context.node_id);

        if self.config.node.gateway || self.context.node_id == AUTO {
            return;
        }

        // Tell the gateway whether we expect signed traffic.
        let requests_signatures =
            self.signer.is_some() && self.config.signing.request_signatures;
        let mut signing_pref = Message::internal(
            self.context.node_id,
            GATEWAY_ADDRESS,
            InternalType::RequestSigning,
        );
        signing_pref.set_bool(requests_signatures);
        self.send_routed(&mut signing_pref);
        if requests_signatures {
            // The gateway answers with its own preference; give it a
            // window to arrive.
            self.wait_ms(self.config.timing.config_wait_ms);
        }

        let node_type = if self.config.node.repeater {
            S_REPEATER
        } else {
            S_NODE
        };
        let mut presentation = Message::new(
            self.context.node_id,
            GATEWAY_ADDRESS,
            NODE_SENSOR_ID,
            Command::Presentation,
            node_type,
        );
        self.send_routed(&mut presentation);

        // Configuration exchange: we report our parent, the controller
        // answers with the node configuration (picked up in process()).
        let mut config_req =
            Message::internal(self.context.node_id, GATEWAY_ADDRESS, InternalType::Config);
        config_req.set_u8(self.context.parent_node_id);
        self.send_routed(&mut config_req);
        self.wait_ms(self.config.timing.config_wait_ms);

        if self.config.ota.enabled {
            self.request_firmware_config();
        }
    }
}
