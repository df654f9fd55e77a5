//! Root-to-node descent stacks.

use smallvec::SmallVec;

/// One step of a descent. `index` is the key index the search stopped at
/// in that node; while descending it is also the child position taken, so
/// rebalancing can locate a node among its parent's children without
/// rescanning the child array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Frame {
    pub slot: u64,
    pub index: usize,
}

/// Descent stack. The inline capacity covers any realistic height; a tree
/// this tall would hold at least 2^12 keys even at the minimum order.
pub(crate) type Path = SmallVec<[Frame; 12]>;
