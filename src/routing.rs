//! Routing Table
//!
//! Persisted mapping from destination node id to next-hop node id, one
//! entry per possible address. Entries are learned whenever a message is
//! observed arriving from a child subtree and are never explicitly
//! deleted: stale entries self-correct through repeated inbound
//! observation. There is deliberately no TTL or eviction.

use crate::message::{BROADCAST_ADDRESS, GATEWAY_ADDRESS};
use crate::storage::{Storage, ADDR_ROUTES};
use tracing::trace;

/// Dest → next-hop table, write-through to the persistent store.
pub struct RoutingTable {
    hops: [u8; 256],
}

impl RoutingTable {
    /// Load the persisted table.
    pub fn load(storage: &dyn Storage) -> Self {
        let mut hops = [BROADCAST_ADDRESS; 256];
        storage.read_block(ADDR_ROUTES, &mut hops);
        Self { hops }
    }

    /// The recorded next hop for a destination.
    pub fn next_hop(&self, destination: u8) -> u8 {
        self.hops[destination as usize]
    }

    /// Whether the entry for a destination is a usable downstream hop.
    ///
    /// Only values strictly between the gateway and broadcast addresses
    /// denote a real intermediate node; the sentinels (0, 255) mean
    /// "unknown" or "corrupt".
    pub fn has_route(&self, destination: u8) -> bool {
        let hop = self.hops[destination as usize];
        hop > GATEWAY_ADDRESS && hop < BROADCAST_ADDRESS
    }

    /// Record the next hop for a destination and persist the entry.
    pub fn set(&mut self, destination: u8, next_hop: u8, storage: &mut dyn Storage) {
        if self.hops[destination as usize] != next_hop {
            trace!(destination, next_hop, "route learned");
        }
        self.hops[destination as usize] = next_hop;
        storage.write_byte(ADDR_ROUTES + destination as usize, next_hop);
    }
}
