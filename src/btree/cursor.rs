//! # Cursors and Forward Iteration
//!
//! A [`Cursor`] is a stack of `(slot, index)` frames naming one entry of
//! the tree. The index of a frame has a dual meaning: on a leaf it is the
//! entry the cursor points at; on an internal node it is either the
//! separator about to be yielded or the child currently being descended.
//! The past-the-end cursor is the empty stack.
//!
//! Advancing visits leaf entries and internal separators interleaved in
//! key order: within an internal node the iteration is child 0, separator
//! 0, child 1, separator 1, and so on. Because every entry has a unique
//! ancestor chain, a position has exactly one frame-stack representation,
//! and cursor equality is structural comparison of the stacks. Comparing
//! cursors from different handles is a contract violation and panics.
//!
//! Cursors formed from a search are normalized first: a search that
//! stopped past the last entry of a leaf ascends to the nearest pending
//! separator, or to `end` when none remains. A normalized cursor is
//! always dereferenceable or `end`.
//!
//! Reverse iteration is not supported and fails explicitly.
//!
//! Cursors borrow the handle immutably. Every mutating operation takes
//! `&mut self` on the handle, so the borrow checker rules out iterating
//! across a mutation at compile time.

use std::ptr;

use eyre::{bail, ensure, Result};

use super::node::Entry;
use super::path::{Frame, Path};
use super::tree::BTreeIndex;
use crate::codec::{Codec, KeyOrder};

/// A position inside a [`BTreeIndex`], or past-the-end.
pub struct Cursor<'a, KC, VC, C, const ORDER: usize>
where
    KC: Codec,
    VC: Codec,
    C: KeyOrder<KC::Item>,
{
    index: &'a BTreeIndex<KC, VC, C, ORDER>,
    frames: Path,
}

impl<'a, KC, VC, C, const ORDER: usize> Cursor<'a, KC, VC, C, ORDER>
where
    KC: Codec,
    VC: Codec,
    C: KeyOrder<KC::Item>,
{
    fn new(index: &'a BTreeIndex<KC, VC, C, ORDER>, frames: Path) -> Self {
        Self { index, frames }
    }

    /// True when the cursor is past the last entry.
    pub fn is_end(&self) -> bool {
        self.frames.is_empty()
    }

    /// Drops frames that point past their node until the top frame is a
    /// real position. A cursor formed from an unsuccessful search may
    /// start one past a leaf's last entry; the entry after that position
    /// is the nearest pending separator up the stack.
    fn normalize(&mut self) -> Result<()> {
        while let Some(frame) = self.frames.last().copied() {
            let node = self.index.load_node(frame.slot)?;
            if frame.index < node.len() {
                return Ok(());
            }
            self.frames.pop();
        }
        Ok(())
    }

    /// Reads the entry under the cursor. Dereferencing `end` is a
    /// contract violation.
    pub fn entry(&self) -> Result<(KC::Item, VC::Item)> {
        let Some(frame) = self.frames.last() else {
            bail!("cursor dereferenced past the end");
        };
        let mut node = self.index.load_node(frame.slot)?;
        ensure!(
            frame.index < node.len(),
            "cursor index {} out of bounds in slot {}",
            frame.index,
            frame.slot
        );
        let Entry { key, value } = node.entries.swap_remove(frame.index);
        Ok((key, value))
    }

    /// Reads the key under the cursor.
    pub fn key(&self) -> Result<KC::Item> {
        Ok(self.entry()?.0)
    }

    /// Steps to the next entry in key order. Advancing `end` leaves the
    /// cursor at `end`.
    pub fn advance(&mut self) -> Result<()> {
        let Some(frame) = self.frames.last().copied() else {
            return Ok(());
        };
        let node = self.index.load_node(frame.slot)?;

        if !node.is_leaf {
            // The separator was just yielded; the subtree right of it
            // comes next. The bumped index marks the following separator
            // as pending once that subtree is exhausted.
            if let Some(top) = self.frames.last_mut() {
                top.index = frame.index + 1;
            }
            let mut slot = node.child(frame.index + 1)?;
            loop {
                let child = self.index.load_node(slot)?;
                let is_leaf = child.is_leaf;
                self.frames.push(Frame { slot, index: 0 });
                if is_leaf {
                    return Ok(());
                }
                slot = child.child(0)?;
            }
        }

        if frame.index + 1 < node.len() {
            if let Some(top) = self.frames.last_mut() {
                top.index += 1;
            }
            return Ok(());
        }

        // Leaf exhausted: ascend to the nearest pending separator.
        self.frames.pop();
        while let Some(top) = self.frames.last().copied() {
            let parent = self.index.load_node(top.slot)?;
            if top.index < parent.len() {
                return Ok(());
            }
            self.frames.pop();
        }
        Ok(())
    }

    /// Reverse iteration is not part of the contract.
    pub fn retreat(&mut self) -> Result<()> {
        bail!("reverse iteration is not supported");
    }
}

impl<KC, VC, C, const ORDER: usize> Clone for Cursor<'_, KC, VC, C, ORDER>
where
    KC: Codec,
    VC: Codec,
    C: KeyOrder<KC::Item>,
{
    fn clone(&self) -> Self {
        Self {
            index: self.index,
            frames: self.frames.clone(),
        }
    }
}

impl<KC, VC, C, const ORDER: usize> PartialEq for Cursor<'_, KC, VC, C, ORDER>
where
    KC: Codec,
    VC: Codec,
    C: KeyOrder<KC::Item>,
{
    fn eq(&self, other: &Self) -> bool {
        assert!(
            ptr::eq(self.index, other.index),
            "cannot compare cursors from different indexes"
        );
        self.frames == other.frames
    }
}

impl<KC, VC, C, const ORDER: usize> std::fmt::Debug for Cursor<'_, KC, VC, C, ORDER>
where
    KC: Codec,
    VC: Codec,
    C: KeyOrder<KC::Item>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor").field("frames", &self.frames).finish()
    }
}

impl<KC, VC, C, const ORDER: usize> BTreeIndex<KC, VC, C, ORDER>
where
    KC: Codec,
    VC: Codec,
    C: KeyOrder<KC::Item>,
{
    /// Cursor at the smallest entry, or `end` for an empty tree.
    pub fn begin(&self) -> Result<Cursor<'_, KC, VC, C, ORDER>> {
        let mut frames = Path::new();
        let Some(root) = self.pager.root() else {
            return Ok(self.end());
        };

        let mut slot = root;
        loop {
            let node = self.load_node(slot)?;
            let is_leaf = node.is_leaf;
            frames.push(Frame { slot, index: 0 });
            if is_leaf {
                break;
            }
            slot = node.child(0)?;
        }

        let mut cursor = Cursor::new(self, frames);
        // A fresh tree has an empty root leaf; normalize it to end.
        cursor.normalize()?;
        Ok(cursor)
    }

    /// The past-the-end cursor.
    pub fn end(&self) -> Cursor<'_, KC, VC, C, ORDER> {
        Cursor::new(self, Path::new())
    }

    /// Cursor pair `[start, stop)` covering the keys between `lower` and
    /// `upper`. Each bound is included when its flag is set; the four
    /// combinations yield the four interval shapes. Bounds past the data
    /// resolve to `end`.
    pub fn range(
        &self,
        lower: &KC::Item,
        upper: &KC::Item,
        include_lower: bool,
        include_upper: bool,
    ) -> Result<(Cursor<'_, KC, VC, C, ORDER>, Cursor<'_, KC, VC, C, ORDER>)> {
        if self.cmp.lt(upper, lower) {
            return Ok((self.end(), self.end()));
        }

        let (lower_path, _, lower_found) = self.find_path(lower)?;
        let mut start = Cursor::new(self, lower_path);
        start.normalize()?;
        if lower_found && !include_lower {
            start.advance()?;
        }

        let (upper_path, _, upper_found) = self.find_path(upper)?;
        let mut stop = Cursor::new(self, upper_path);
        stop.normalize()?;
        if upper_found && include_upper {
            stop.advance()?;
        }

        // Exclusions can leave `start` after `stop` (for instance equal
        // bounds with both ends excluded); such an interval is empty.
        if !start.is_end() && !stop.is_end() {
            let first = start.key()?;
            let last = stop.key()?;
            if self.cmp.lt(&last, &first) {
                return Ok((self.end(), self.end()));
            }
        }

        Ok((start, stop))
    }

    /// Iterator over every entry in key order.
    pub fn iter(&self) -> Result<Entries<'_, KC, VC, C, ORDER>> {
        Ok(Entries {
            cursor: self.begin()?,
            stop: self.end(),
        })
    }

    /// Iterator over the entries selected by [`BTreeIndex::range`].
    pub fn range_entries(
        &self,
        lower: &KC::Item,
        upper: &KC::Item,
        include_lower: bool,
        include_upper: bool,
    ) -> Result<Entries<'_, KC, VC, C, ORDER>> {
        let (cursor, stop) = self.range(lower, upper, include_lower, include_upper)?;
        Ok(Entries { cursor, stop })
    }
}

/// Forward iterator driving a cursor toward a stop position.
pub struct Entries<'a, KC, VC, C, const ORDER: usize>
where
    KC: Codec,
    VC: Codec,
    C: KeyOrder<KC::Item>,
{
    cursor: Cursor<'a, KC, VC, C, ORDER>,
    stop: Cursor<'a, KC, VC, C, ORDER>,
}

impl<KC, VC, C, const ORDER: usize> Iterator for Entries<'_, KC, VC, C, ORDER>
where
    KC: Codec,
    VC: Codec,
    C: KeyOrder<KC::Item>,
{
    type Item = Result<(KC::Item, VC::Item)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor.is_end() || self.cursor == self.stop {
            return None;
        }
        match self.cursor.entry() {
            Ok(pair) => {
                if let Err(err) = self.cursor.advance() {
                    self.cursor.frames.clear();
                    return Some(Err(err));
                }
                Some(Ok(pair))
            }
            Err(err) => {
                self.cursor.frames.clear();
                Some(Err(err))
            }
        }
    }
}
