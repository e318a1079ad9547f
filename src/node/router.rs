//! Send Router
//!
//! The single outbound path for all application and protocol traffic:
//! decides the next hop for a message and performs the transmission.
//! Transmission failures feed the failed-transmission counter, which
//! escalates to parent rediscovery past the configured threshold.

use crate::link::Indicator;
use crate::message::{
    Message, AUTO, BROADCAST_ADDRESS, GATEWAY_ADDRESS, PROTOCOL_VERSION,
};
use crate::node::Node;
use tracing::{debug, trace, warn};

impl Node {
    /// Route and transmit an outgoing message.
    ///
    /// Fails (dropping the message) when no parent or node id is known
    /// yet; the corresponding discovery/acquisition is triggered and the
    /// caller must retry. When signing applies to the destination and
    /// this node is the original sender, the nonce handshake runs
    /// synchronously before transmission.
    pub fn send_routed(&mut self, msg: &mut Message) -> bool {
        let relayed_from = msg.last;

        // Without a parent or an address nothing can be routed.
        if self.context.parent_node_id == AUTO {
            self.find_parent();
            self.pulse(Indicator::Error);
            return false;
        }
        if self.context.node_id == AUTO {
            self.request_node_id();
            self.pulse(Indicator::Error);
            return false;
        }

        msg.version = PROTOCOL_VERSION;

        if !self.sign_outbound(msg) {
            return false;
        }

        let sender = msg.sender;
        let destination = msg.destination;

        let ok = if !self.config.node.repeater {
            // Non-repeating node: the parent is the only way out.
            self.send_write(self.context.parent_node_id, msg)
        } else if destination == GATEWAY_ADDRESS {
            // Upstream: record where the message entered our subtree,
            // then let the parent carry it on.
            self.routes.set(sender, relayed_from, &mut *self.storage);
            self.send_write(self.context.parent_node_id, msg)
        } else {
            // Corrupted table entries must never interfere with
            // broadcasts, so broadcasts bypass the lookup entirely.
            let route = if destination != BROADCAST_ADDRESS {
                self.routes.next_hop(destination)
            } else {
                BROADCAST_ADDRESS
            };

            if route > GATEWAY_ADDRESS && route < BROADCAST_ADDRESS {
                // Known downstream hop: hand it straight down the
                // subtree, skipping the parent.
                return self.send_write(route, msg);
            } else if sender == GATEWAY_ADDRESS && destination == BROADCAST_ADDRESS {
                // A not-yet-addressed node can only be reached by
                // broadcasting.
                return self.send_write(BROADCAST_ADDRESS, msg);
            } else if self.config.node.gateway {
                // Nowhere to send it: the gateway has no parent to fall
                // back on.
                debug!(destination, "destination unknown, dropping");
                return false;
            } else {
                // No route for a message coming up from a child: pass it
                // toward the gateway and learn the reverse path.
                let ok = self.send_write(self.context.parent_node_id, msg);
                self.routes.set(sender, relayed_from, &mut *self.storage);
                ok
            }
        };

        if !ok {
            // The parent may be down; count failures toward rediscovery.
            self.pulse(Indicator::Error);
            self.context.failed_transmissions =
                self.context.failed_transmissions.saturating_add(1);
            if self.config.node.auto_find_parent
                && self.context.failed_transmissions > self.config.timing.search_failures
            {
                warn!(
                    failures = self.context.failed_transmissions,
                    "transmission failures exceeded threshold, searching for new parent"
                );
                self.find_parent();
            }
        } else {
            self.context.failed_transmissions = 0;
        }

        ok
    }

    /// Transmit a message to a specific physical neighbor.
    ///
    /// Stamps the protocol version and our address as the last hop; a
    /// signed message occupies the full frame regardless of payload
    /// length.
    pub(in crate::node) fn send_write(&mut self, to: u8, msg: &mut Message) -> bool {
        msg.version = PROTOCOL_VERSION;
        msg.last = self.context.node_id;
        self.pulse(Indicator::Tx);

        let frame = msg.to_frame();
        let ok = self.link.send(to, &frame);

        trace!(
            sender = msg.sender,
            last = msg.last,
            to,
            destination = msg.destination,
            command = ?msg.command,
            msg_type = msg.msg_type,
            signed = msg.signed,
            status = if to == BROADCAST_ADDRESS {
                "bc"
            } else if ok {
                "ok"
            } else {
                "fail"
            },
            "send"
        );

        ok
    }
}
