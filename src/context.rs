//! Node Context
//!
//! The single mutable record describing this node's place in the mesh:
//! its own address, its parent, its distance to the gateway and the
//! running failed-transmission counter. Owned by the core and mutated
//! only by the dispatcher/router.

use crate::message::{AUTO, DISTANCE_INVALID, GATEWAY_ADDRESS};
use crate::storage::{Storage, ADDR_DISTANCE, ADDR_NODE_ID, ADDR_PARENT_NODE_ID};

/// This node's routing identity and health counters.
#[derive(Clone, Copy, Debug)]
pub struct NodeContext {
    /// Our address; [`AUTO`] until acquired from the gateway.
    pub node_id: u8,
    /// Next hop toward the gateway; [`AUTO`] until discovered.
    pub parent_node_id: u8,
    /// Hop count to the gateway via the current parent;
    /// [`DISTANCE_INVALID`] until known.
    pub distance: u8,
    /// Consecutive failed transmissions to the parent. Reset to zero on
    /// any successful send, escalates to parent rediscovery past the
    /// configured threshold. Not persisted.
    pub failed_transmissions: u8,
}

impl NodeContext {
    /// A context with nothing known yet.
    pub fn unassigned() -> Self {
        Self {
            node_id: AUTO,
            parent_node_id: AUTO,
            distance: DISTANCE_INVALID,
            failed_transmissions: 0,
        }
    }

    /// The gateway's fixed context: it is its own parent at distance zero.
    pub fn gateway() -> Self {
        Self {
            node_id: GATEWAY_ADDRESS,
            parent_node_id: GATEWAY_ADDRESS,
            distance: 0,
            failed_transmissions: 0,
        }
    }

    /// Load the persisted context from the store.
    pub fn load(storage: &dyn Storage) -> Self {
        Self {
            node_id: storage.read_byte(ADDR_NODE_ID),
            parent_node_id: storage.read_byte(ADDR_PARENT_NODE_ID),
            distance: storage.read_byte(ADDR_DISTANCE),
            failed_transmissions: 0,
        }
    }

    /// Persist the node id.
    pub fn persist_node_id(&self, storage: &mut dyn Storage) {
        storage.write_byte(ADDR_NODE_ID, self.node_id);
    }

    /// Persist the parent id and distance together (they change as a pair
    /// during parent relaxation).
    pub fn persist_parent(&self, storage: &mut dyn Storage) {
        storage.write_byte(ADDR_PARENT_NODE_ID, self.parent_node_id);
        storage.write_byte(ADDR_DISTANCE, self.distance);
    }

    /// Whether this node has an assigned address.
    pub fn has_node_id(&self) -> bool {
        self.node_id != AUTO
    }

    /// Whether a parent toward the gateway is known.
    pub fn has_parent(&self) -> bool {
        self.parent_node_id != AUTO
    }
}
