//! # Tree-File Header
//!
//! The first 16 bytes of the tree file hold the only mutable metadata the
//! index keeps outside its slots: how many slots exist and which one is the
//! root. Both fields are host-endian `u64`, read and written through a
//! zerocopy struct so the in-memory layout is the on-disk layout.
//!
//! An empty tree is marked by a sentinel `root_slot` of `u64::MAX`. The
//! sentinel never leaves this module: the accessors expose the root as an
//! `Option<u64>`, so arithmetic elsewhere cannot accidentally treat the
//! marker as a real slot number.

use eyre::{ensure, Result};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use super::{EMPTY_ROOT_SENTINEL, TREE_HEADER_SIZE};

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct TreeHeader {
    node_count: u64,
    root_slot: u64,
}

const _: () = assert!(std::mem::size_of::<TreeHeader>() == TREE_HEADER_SIZE);

impl TreeHeader {
    /// Header of a freshly initialized tree: one allocated slot, slot 0 as
    /// the root.
    pub fn fresh() -> Self {
        Self {
            node_count: 1,
            root_slot: 0,
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ensure!(
            bytes.len() >= TREE_HEADER_SIZE,
            "buffer too small for TreeHeader: {} < {}",
            bytes.len(),
            TREE_HEADER_SIZE
        );
        Self::read_from_bytes(&bytes[..TREE_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse TreeHeader: {:?}", e))
    }

    pub fn node_count(&self) -> u64 {
        self.node_count
    }

    pub fn set_node_count(&mut self, count: u64) {
        self.node_count = count;
    }

    /// Root slot, or `None` when the tree is empty.
    pub fn root(&self) -> Option<u64> {
        if self.root_slot == EMPTY_ROOT_SENTINEL {
            None
        } else {
            Some(self.root_slot)
        }
    }

    pub fn set_root(&mut self, root: Option<u64>) {
        self.root_slot = root.unwrap_or(EMPTY_ROOT_SENTINEL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zerocopy::IntoBytes;

    #[test]
    fn header_size_is_16() {
        assert_eq!(std::mem::size_of::<TreeHeader>(), 16);
    }

    #[test]
    fn fresh_header_points_at_slot_zero() {
        let header = TreeHeader::fresh();
        assert_eq!(header.node_count(), 1);
        assert_eq!(header.root(), Some(0));
    }

    #[test]
    fn header_roundtrip() {
        let mut header = TreeHeader::fresh();
        header.set_node_count(42);
        header.set_root(Some(17));

        let parsed = TreeHeader::from_bytes(header.as_bytes()).unwrap();
        assert_eq!(parsed.node_count(), 42);
        assert_eq!(parsed.root(), Some(17));
    }

    #[test]
    fn empty_root_maps_to_sentinel_and_back() {
        let mut header = TreeHeader::fresh();
        header.set_root(None);
        assert_eq!(header.root(), None);

        let parsed = TreeHeader::from_bytes(header.as_bytes()).unwrap();
        assert_eq!(parsed.root(), None);
    }

    #[test]
    fn short_buffer_is_rejected() {
        let err = TreeHeader::from_bytes(&[0u8; 8]).unwrap_err();
        assert!(err.to_string().contains("too small"));
    }
}
