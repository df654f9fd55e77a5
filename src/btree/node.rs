//! In-memory form of one tree node.
//!
//! A `Node` is a plain value the tree core mutates freely between a
//! `load_node` and a `store_node`; the pager owns its on-disk shape. A
//! leaf keeps no children. An internal node keeps exactly one more child
//! than it has entries, except transiently inside a mutation.

use eyre::{ensure, eyre, Result};

use crate::codec::KeyOrder;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry<K, V> {
    pub key: K,
    pub value: V,
}

#[derive(Debug, Clone)]
pub struct Node<K, V> {
    pub slot: u64,
    pub is_leaf: bool,
    pub entries: Vec<Entry<K, V>>,
    pub children: Vec<u64>,
}

impl<K, V> Node<K, V> {
    pub fn new_leaf(slot: u64) -> Self {
        Self {
            slot,
            is_leaf: true,
            entries: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn new_internal(slot: u64) -> Self {
        Self {
            slot,
            is_leaf: false,
            entries: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Smallest index whose key does not sort before `key`, plus whether
    /// that position is an exact match under the derived equality.
    pub fn find_index<C: KeyOrder<K>>(&self, key: &K, order: &C) -> (usize, bool) {
        let mut index = 0;
        while index < self.len() && order.lt(&self.entries[index].key, key) {
            index += 1;
        }
        let found = index < self.len() && !order.lt(key, &self.entries[index].key);
        (index, found)
    }

    pub fn child(&self, index: usize) -> Result<u64> {
        self.children.get(index).copied().ok_or_else(|| {
            eyre!(
                "child index {} out of bounds in slot {} ({} children)",
                index,
                self.slot,
                self.children.len()
            )
        })
    }

    pub(crate) fn pop_entry(&mut self) -> Result<Entry<K, V>> {
        self.entries
            .pop()
            .ok_or_else(|| eyre!("slot {} has no entries to take", self.slot))
    }

    pub(crate) fn take_first_entry(&mut self) -> Result<Entry<K, V>> {
        ensure!(!self.entries.is_empty(), "slot {} has no entries to take", self.slot);
        Ok(self.entries.remove(0))
    }

    pub(crate) fn pop_child(&mut self) -> Result<u64> {
        self.children
            .pop()
            .ok_or_else(|| eyre!("slot {} has no children to take", self.slot))
    }

    pub(crate) fn take_first_child(&mut self) -> Result<u64> {
        ensure!(!self.children.is_empty(), "slot {} has no children to take", self.slot);
        Ok(self.children.remove(0))
    }
}
