//! Persistent configuration store.
//!
//! The core persists its context, routing table, signing requirements and
//! firmware descriptor in a small byte-addressed store (EEPROM-class on
//! real hardware). Each record lives at a fixed, non-overlapping offset.
//! Writes are synchronous and atomic per cell; no transaction spans
//! multiple cells.

/// Offset of this node's id.
pub const ADDR_NODE_ID: usize = 0;
/// Offset of the parent node id.
pub const ADDR_PARENT_NODE_ID: usize = 1;
/// Offset of the distance-to-gateway hop count.
pub const ADDR_DISTANCE: usize = 2;
/// Offset of the routing table (one next-hop byte per destination address).
pub const ADDR_ROUTES: usize = 3;
/// Offset of the per-peer signing requirement bitset (32 bytes, 256 bits).
pub const ADDR_SIGNING_TABLE: usize = ADDR_ROUTES + 256;
/// Offset of the persisted firmware descriptor (8 bytes).
pub const ADDR_FIRMWARE_CONFIG: usize = ADDR_SIGNING_TABLE + 32;

/// Total store size the core requires.
pub const STORE_SIZE: usize = ADDR_FIRMWARE_CONFIG + 8;

/// Byte-addressed persistent store.
///
/// Implementations are expected to return the erased value (0xFF) for
/// cells that have never been written, matching EEPROM behavior; the
/// sentinel encodings (AUTO, DISTANCE_INVALID) rely on this.
pub trait Storage {
    /// Read one byte.
    fn read_byte(&self, offset: usize) -> u8;

    /// Write one byte.
    fn write_byte(&mut self, offset: usize, value: u8);

    /// Read a block of bytes.
    fn read_block(&self, offset: usize, buf: &mut [u8]) {
        for (i, b) in buf.iter_mut().enumerate() {
            *b = self.read_byte(offset + i);
        }
    }

    /// Write a block of bytes.
    fn write_block(&mut self, offset: usize, data: &[u8]) {
        for (i, b) in data.iter().enumerate() {
            self.write_byte(offset + i, *b);
        }
    }
}

/// In-memory store, erased to 0xFF like fresh EEPROM.
pub struct MemStorage {
    cells: Vec<u8>,
}

impl MemStorage {
    /// Create a store of the size the core requires.
    pub fn new() -> Self {
        Self {
            cells: vec![0xFF; STORE_SIZE],
        }
    }
}

impl Default for MemStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for MemStorage {
    fn read_byte(&self, offset: usize) -> u8 {
        self.cells.get(offset).copied().unwrap_or(0xFF)
    }

    fn write_byte(&mut self, offset: usize, value: u8) {
        if let Some(cell) = self.cells.get_mut(offset) {
            *cell = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_store_reads_erased() {
        let store = MemStorage::new();
        assert_eq!(store.read_byte(ADDR_NODE_ID), 0xFF);
        assert_eq!(store.read_byte(ADDR_DISTANCE), 0xFF);
    }

    #[test]
    fn test_block_roundtrip() {
        let mut store = MemStorage::new();
        store.write_block(ADDR_FIRMWARE_CONFIG, &[1, 2, 3, 4]);
        let mut buf = [0u8; 4];
        store.read_block(ADDR_FIRMWARE_CONFIG, &mut buf);
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[test]
    fn test_layout_offsets_disjoint() {
        assert!(ADDR_PARENT_NODE_ID > ADDR_NODE_ID);
        assert!(ADDR_ROUTES > ADDR_DISTANCE);
        assert_eq!(ADDR_SIGNING_TABLE, ADDR_ROUTES + 256);
        assert_eq!(ADDR_FIRMWARE_CONFIG, ADDR_SIGNING_TABLE + 32);
    }
}
