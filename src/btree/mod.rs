//! # B-Tree Index
//!
//! The persistent B-tree: node value type, descent stacks, the tree core
//! with its split and rebalance cascades, and the forward cursor.
//!
//! ## Shape
//!
//! The branching factor `ORDER` fixes the occupancy bounds: every node
//! except the root holds between `ORDER - 1` and `2 * ORDER - 1` entries,
//! internal nodes hold one more child than entries, and all leaves sit at
//! the same depth. Entries live in every node, not only the leaves, and
//! the forward cursor yields internal separators between the subtrees
//! they divide.
//!
//! ```text
//!                  internal slot=2: (3) (6)
//!                 /           |           \
//!     leaf: (1) (2)     leaf: (4) (5)     leaf: (7)
//! ```

mod cursor;
mod node;
mod path;
mod tree;

pub use cursor::{Cursor, Entries};
pub use node::{Entry, Node};
pub use tree::BTreeIndex;

/// Branching factor used when none is named in the type.
pub const DEFAULT_ORDER: usize = 2;
