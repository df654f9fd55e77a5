//! # Pager
//!
//! The pager owns the two files of an index and is the only code that
//! touches them. It reads and writes whole node slots in the tree file,
//! appends payload records to the data file, and maintains the 16-byte
//! tree header. It knows nothing about keys or values; entries pass
//! through it as opaque byte records, and nodes as [`RawNode`] skeletons
//! of slot numbers and record offsets.
//!
//! ## Slot Layout
//!
//! Every slot has the same fixed size, computed once from the branching
//! factor and used identically by the reader and the writer:
//!
//! ```text
//! u64 len                      entry count
//! u8  is_leaf
//! u64 own_slot                 self check against the slot position
//! u64 × (MAX_KEYS + 2)         child slots, zero-padded
//! u64 × (MAX_KEYS + 1)         data-file record offsets, zero-padded
//! ```
//!
//! The arrays carry one spare element beyond `MAX_KEYS` so an overfull
//! node can be written to disk before the tree core splits it, exactly as
//! the insert path requires.
//!
//! ## Write Ordering
//!
//! `append_record` completes before the slot referencing the new offsets
//! is written, and header rewrites come last in every mutating operation.
//! Files are unbuffered, so each write has reached the operating system
//! when the call returns. There is no journal; crash atomicity across the
//! two files is explicitly out of scope.
//!
//! Reads go through positioned I/O (`read_at`) and take `&self`, which is
//! what lets cursors share the handle immutably while mutations keep
//! requiring `&mut`.

use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use eyre::{ensure, Result, WrapErr};
use tracing::debug;
use zerocopy::IntoBytes;

use super::{
    TreeHeader, DATA_FILE_EXTENSION, DATA_MAGIC, NODE_HEADER_SIZE, TREE_FILE_EXTENSION,
    TREE_HEADER_SIZE,
};

#[cfg(unix)]
fn read_at(file: &File, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(windows)]
fn read_at(file: &File, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}

#[cfg(unix)]
fn write_at(file: &File, offset: u64, buf: &[u8]) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.write_at(buf, offset)
}

#[cfg(windows)]
fn write_at(file: &File, offset: u64, buf: &[u8]) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_write(buf, offset)
}

fn read_exact_at(file: &File, mut offset: u64, mut dst: &mut [u8]) -> io::Result<()> {
    while !dst.is_empty() {
        let read = read_at(file, offset, dst)?;
        if read == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "read_at reached EOF",
            ));
        }
        let (_, tail) = dst.split_at_mut(read);
        dst = tail;
        offset += read as u64;
    }
    Ok(())
}

fn write_all_at(file: &File, mut offset: u64, mut src: &[u8]) -> io::Result<()> {
    while !src.is_empty() {
        let written = write_at(file, offset, src)?;
        if written == 0 {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "write_at wrote zero bytes",
            ));
        }
        src = &src[written..];
        offset += written as u64;
    }
    Ok(())
}

fn sibling_file(base: &Path, extension: &str) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}

fn u64_at(buf: &[u8], pos: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[pos..pos + 8]);
    u64::from_ne_bytes(bytes)
}

/// A node as the pager sees it: structure without payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawNode {
    pub slot: u64,
    pub is_leaf: bool,
    /// Child slots; `len + 1` entries for internal nodes, empty for leaves.
    pub children: Vec<u64>,
    /// Data-file offset of each entry's record, in entry order.
    pub offsets: Vec<u64>,
}

impl RawNode {
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

/// Reads a payload record from a fixed data-file offset.
///
/// Implements [`Read`] over positioned I/O so codecs can decode a key and
/// then its value sequentially without the pager exposing a seekable file.
pub struct RecordReader<'a> {
    file: &'a File,
    position: u64,
}

impl Read for RecordReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = read_at(self.file, self.position, buf)?;
        self.position += read as u64;
        Ok(read)
    }
}

#[derive(Debug)]
pub struct Pager<const ORDER: usize> {
    tree_file: File,
    data_file: File,
    header: TreeHeader,
    data_len: u64,
}

impl<const ORDER: usize> Pager<ORDER> {
    pub const MAX_KEYS: usize = 2 * ORDER - 1;

    /// Bytes per node slot, including the spare entry and child that let an
    /// overfull node hit the disk before it is split.
    pub const SLOT_SIZE: usize =
        NODE_HEADER_SIZE + (Self::MAX_KEYS + 2) * 8 + (Self::MAX_KEYS + 1) * 8;

    /// Opens the index at `base`, creating a fresh one when either file is
    /// missing. A fresh index holds a single empty leaf at slot 0.
    pub fn open_or_create<P: AsRef<Path>>(base: P) -> Result<Self> {
        ensure!(ORDER >= 2, "branching factor must be at least 2, got {}", ORDER);

        let tree_path = sibling_file(base.as_ref(), TREE_FILE_EXTENSION);
        let data_path = sibling_file(base.as_ref(), DATA_FILE_EXTENSION);

        if tree_path.exists() && data_path.exists() {
            Self::open(&tree_path, &data_path)
        } else {
            Self::create(&tree_path, &data_path)
        }
    }

    fn create(tree_path: &Path, data_path: &Path) -> Result<Self> {
        let tree_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(tree_path)
            .wrap_err_with(|| format!("failed to create tree file '{}'", tree_path.display()))?;
        let data_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(data_path)
            .wrap_err_with(|| format!("failed to create data file '{}'", data_path.display()))?;

        write_all_at(&data_file, 0, DATA_MAGIC).wrap_err("failed to write data-file preamble")?;

        let mut pager = Self {
            tree_file,
            data_file,
            header: TreeHeader::fresh(),
            data_len: DATA_MAGIC.len() as u64,
        };
        pager.write_slot(&RawNode {
            slot: 0,
            is_leaf: true,
            children: Vec::new(),
            offsets: Vec::new(),
        })?;
        pager.write_header()?;

        debug!(tree = %tree_path.display(), data = %data_path.display(), "created index files");
        Ok(pager)
    }

    fn open(tree_path: &Path, data_path: &Path) -> Result<Self> {
        let tree_file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(tree_path)
            .wrap_err_with(|| format!("failed to open tree file '{}'", tree_path.display()))?;
        let data_file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(data_path)
            .wrap_err_with(|| format!("failed to open data file '{}'", data_path.display()))?;

        let mut buf = [0u8; TREE_HEADER_SIZE];
        read_exact_at(&tree_file, 0, &mut buf).wrap_err_with(|| {
            format!("failed to read tree header from '{}'", tree_path.display())
        })?;
        let header = TreeHeader::from_bytes(&buf)?;

        let mut magic = [0u8; DATA_MAGIC.len()];
        read_exact_at(&data_file, 0, &mut magic).wrap_err_with(|| {
            format!("failed to read data-file preamble from '{}'", data_path.display())
        })?;
        ensure!(
            &magic == DATA_MAGIC,
            "invalid magic bytes in data file '{}'",
            data_path.display()
        );

        let tree_len = tree_file
            .metadata()
            .wrap_err("failed to stat tree file")?
            .len();
        let expected = TREE_HEADER_SIZE as u64 + header.node_count() * Self::SLOT_SIZE as u64;
        ensure!(
            tree_len >= expected,
            "tree file '{}' truncated: {} bytes, header implies at least {}",
            tree_path.display(),
            tree_len,
            expected
        );
        if let Some(root) = header.root() {
            ensure!(
                root < header.node_count(),
                "root slot {} out of bounds (node_count={})",
                root,
                header.node_count()
            );
        }

        let data_len = data_file
            .metadata()
            .wrap_err("failed to stat data file")?
            .len();

        debug!(
            node_count = header.node_count(),
            root = ?header.root(),
            "opened existing index"
        );
        Ok(Self {
            tree_file,
            data_file,
            header,
            data_len,
        })
    }

    pub fn node_count(&self) -> u64 {
        self.header.node_count()
    }

    /// Root slot, or `None` when the tree is empty.
    pub fn root(&self) -> Option<u64> {
        self.header.root()
    }

    /// Changes the in-memory root pointer; `write_header` persists it.
    pub fn set_root(&mut self, root: Option<u64>) {
        debug!(from = ?self.header.root(), to = ?root, "root changed");
        self.header.set_root(root);
    }

    /// Hands out the next slot number. The caller must write the slot
    /// before referencing it; the grown count reaches disk at the next
    /// `write_header`.
    pub fn allocate_slot(&mut self) -> u64 {
        let slot = self.header.node_count();
        self.header.set_node_count(slot + 1);
        slot
    }

    fn slot_offset(slot: u64) -> u64 {
        TREE_HEADER_SIZE as u64 + slot * Self::SLOT_SIZE as u64
    }

    pub fn read_slot(&self, slot: u64) -> Result<RawNode> {
        ensure!(
            slot < self.header.node_count(),
            "slot {} out of bounds (node_count={})",
            slot,
            self.header.node_count()
        );

        let mut buf = vec![0u8; Self::SLOT_SIZE];
        read_exact_at(&self.tree_file, Self::slot_offset(slot), &mut buf)
            .wrap_err_with(|| format!("failed to read slot {}", slot))?;

        let len = u64_at(&buf, 0) as usize;
        let leaf_byte = buf[8];
        let own_slot = u64_at(&buf, 9);

        ensure!(leaf_byte <= 1, "slot {}: invalid leaf flag {}", slot, leaf_byte);
        ensure!(
            own_slot == slot,
            "slot {}: stored slot number {} does not match its position",
            slot,
            own_slot
        );
        ensure!(
            len <= Self::MAX_KEYS + 1,
            "slot {}: entry count {} exceeds slot capacity {}",
            slot,
            len,
            Self::MAX_KEYS + 1
        );

        let is_leaf = leaf_byte == 1;
        let children_base = NODE_HEADER_SIZE;
        let offsets_base = children_base + (Self::MAX_KEYS + 2) * 8;

        let children = if is_leaf {
            Vec::new()
        } else {
            (0..=len).map(|i| u64_at(&buf, children_base + i * 8)).collect()
        };
        let offsets = (0..len).map(|i| u64_at(&buf, offsets_base + i * 8)).collect();

        Ok(RawNode {
            slot,
            is_leaf,
            children,
            offsets,
        })
    }

    pub fn write_slot(&mut self, node: &RawNode) -> Result<()> {
        ensure!(
            node.slot < self.header.node_count(),
            "slot {} out of bounds (node_count={})",
            node.slot,
            self.header.node_count()
        );
        let len = node.len();
        ensure!(
            len <= Self::MAX_KEYS + 1,
            "slot {}: entry count {} exceeds slot capacity {}",
            node.slot,
            len,
            Self::MAX_KEYS + 1
        );
        if node.is_leaf {
            ensure!(
                node.children.is_empty(),
                "slot {}: leaf node carries {} children",
                node.slot,
                node.children.len()
            );
        } else {
            ensure!(
                node.children.len() == len + 1,
                "slot {}: {} children for {} entries",
                node.slot,
                node.children.len(),
                len
            );
        }

        let mut buf = vec![0u8; Self::SLOT_SIZE];
        buf[0..8].copy_from_slice(&(len as u64).to_ne_bytes());
        buf[8] = node.is_leaf as u8;
        buf[9..17].copy_from_slice(&node.slot.to_ne_bytes());

        let children_base = NODE_HEADER_SIZE;
        for (i, child) in node.children.iter().enumerate() {
            buf[children_base + i * 8..children_base + (i + 1) * 8]
                .copy_from_slice(&child.to_ne_bytes());
        }
        let offsets_base = children_base + (Self::MAX_KEYS + 2) * 8;
        for (i, offset) in node.offsets.iter().enumerate() {
            buf[offsets_base + i * 8..offsets_base + (i + 1) * 8]
                .copy_from_slice(&offset.to_ne_bytes());
        }

        write_all_at(&self.tree_file, Self::slot_offset(node.slot), &buf)
            .wrap_err_with(|| format!("failed to write slot {}", node.slot))?;
        Ok(())
    }

    /// Appends one record to the data file and returns its offset.
    ///
    /// The returned offset is never 0: the data file starts with its magic
    /// preamble, so every record lands past it.
    pub fn append_record(&mut self, bytes: &[u8]) -> Result<u64> {
        let offset = self.data_len;
        write_all_at(&self.data_file, offset, bytes).wrap_err("failed to append data record")?;
        self.data_len += bytes.len() as u64;
        Ok(offset)
    }

    /// Positions a reader at `offset` in the data file.
    pub fn record_at(&self, offset: u64) -> RecordReader<'_> {
        RecordReader {
            file: &self.data_file,
            position: offset,
        }
    }

    pub fn write_header(&mut self) -> Result<()> {
        write_all_at(&self.tree_file, 0, self.header.as_bytes())
            .wrap_err("failed to write tree header")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_pager(dir: &tempfile::TempDir) -> Pager<2> {
        Pager::open_or_create(dir.path().join("idx")).unwrap()
    }

    #[test]
    fn create_writes_both_files() {
        let dir = tempdir().unwrap();
        let _pager = create_pager(&dir);

        assert!(dir.path().join("idx.tree").exists());
        assert!(dir.path().join("idx.data").exists());
    }

    #[test]
    fn fresh_pager_has_empty_leaf_root() {
        let dir = tempdir().unwrap();
        let pager = create_pager(&dir);

        assert_eq!(pager.node_count(), 1);
        assert_eq!(pager.root(), Some(0));

        let root = pager.read_slot(0).unwrap();
        assert!(root.is_leaf);
        assert!(root.is_empty());
        assert!(root.children.is_empty());
    }

    #[test]
    fn slot_size_accounts_for_spare_entry() {
        // ORDER = 2: MAX_KEYS = 3, header 17 + 5 children + 4 offsets.
        assert_eq!(Pager::<2>::SLOT_SIZE, 17 + 5 * 8 + 4 * 8);
        assert_eq!(Pager::<8>::SLOT_SIZE, 17 + 17 * 8 + 16 * 8);
    }

    #[test]
    fn internal_slot_roundtrip() {
        let dir = tempdir().unwrap();
        let mut pager = create_pager(&dir);

        let slot = pager.allocate_slot();
        let node = RawNode {
            slot,
            is_leaf: false,
            children: vec![0, 7, 9],
            offsets: vec![100, 250],
        };
        pager.write_slot(&node).unwrap();

        assert_eq!(pager.read_slot(slot).unwrap(), node);
    }

    #[test]
    fn overfull_slot_roundtrip() {
        let dir = tempdir().unwrap();
        let mut pager = create_pager(&dir);

        // MAX_KEYS + 1 entries, the transient state before a split.
        let slot = pager.allocate_slot();
        let node = RawNode {
            slot,
            is_leaf: true,
            children: Vec::new(),
            offsets: vec![8, 40, 90, 140],
        };
        pager.write_slot(&node).unwrap();

        assert_eq!(pager.read_slot(slot).unwrap(), node);
    }

    #[test]
    fn slot_capacity_is_enforced() {
        let dir = tempdir().unwrap();
        let mut pager = create_pager(&dir);

        let slot = pager.allocate_slot();
        let node = RawNode {
            slot,
            is_leaf: true,
            children: Vec::new(),
            offsets: vec![8; 5],
        };
        let err = pager.write_slot(&node).unwrap_err();
        assert!(err.to_string().contains("exceeds slot capacity"));
    }

    #[test]
    fn read_slot_out_of_bounds_fails() {
        let dir = tempdir().unwrap();
        let pager = create_pager(&dir);

        let err = pager.read_slot(3).unwrap_err();
        assert!(err.to_string().contains("out of bounds"));
    }

    #[test]
    fn mismatched_child_count_is_rejected() {
        let dir = tempdir().unwrap();
        let mut pager = create_pager(&dir);

        let slot = pager.allocate_slot();
        let node = RawNode {
            slot,
            is_leaf: false,
            children: vec![0],
            offsets: vec![50, 70],
        };
        let err = pager.write_slot(&node).unwrap_err();
        assert!(err.to_string().contains("children"));
    }

    #[test]
    fn append_record_offsets_skip_the_preamble() {
        let dir = tempdir().unwrap();
        let mut pager = create_pager(&dir);

        let first = pager.append_record(b"abc").unwrap();
        let second = pager.append_record(b"defgh").unwrap();

        assert_eq!(first, DATA_MAGIC.len() as u64);
        assert_eq!(second, first + 3);
    }

    #[test]
    fn record_reader_reads_back_appended_bytes() {
        let dir = tempdir().unwrap();
        let mut pager = create_pager(&dir);

        let offset = pager.append_record(b"hello world").unwrap();
        pager.append_record(b"trailing").unwrap();

        let mut buf = [0u8; 11];
        pager.record_at(offset).read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello world");
    }

    #[test]
    fn header_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let mut pager = create_pager(&dir);
            let slot = pager.allocate_slot();
            pager
                .write_slot(&RawNode {
                    slot,
                    is_leaf: true,
                    children: Vec::new(),
                    offsets: Vec::new(),
                })
                .unwrap();
            pager.set_root(Some(slot));
            pager.write_header().unwrap();
        }

        let pager: Pager<2> = Pager::open_or_create(dir.path().join("idx")).unwrap();
        assert_eq!(pager.node_count(), 2);
        assert_eq!(pager.root(), Some(1));
    }

    #[test]
    fn corrupt_data_magic_is_rejected() {
        let dir = tempdir().unwrap();
        create_pager(&dir);

        std::fs::write(dir.path().join("idx.data"), b"notmagic").unwrap();

        let err = Pager::<2>::open_or_create(dir.path().join("idx")).unwrap_err();
        assert!(err.to_string().contains("magic"));
    }

    #[test]
    fn truncated_tree_file_is_rejected() {
        let dir = tempdir().unwrap();
        {
            let mut pager = create_pager(&dir);
            let slot = pager.allocate_slot();
            pager
                .write_slot(&RawNode {
                    slot,
                    is_leaf: true,
                    children: Vec::new(),
                    offsets: Vec::new(),
                })
                .unwrap();
            pager.write_header().unwrap();
        }

        let tree_path = dir.path().join("idx.tree");
        let bytes = std::fs::read(&tree_path).unwrap();
        std::fs::write(&tree_path, &bytes[..bytes.len() - 10]).unwrap();

        let err = Pager::<2>::open_or_create(dir.path().join("idx")).unwrap_err();
        assert!(err.to_string().contains("truncated"));
    }

    #[test]
    fn mismatched_own_slot_is_detected() {
        let dir = tempdir().unwrap();
        let mut pager = create_pager(&dir);

        // Forge a slot whose stored number disagrees with its position.
        let slot = pager.allocate_slot();
        let mut buf = vec![0u8; Pager::<2>::SLOT_SIZE];
        buf[8] = 1;
        buf[9..17].copy_from_slice(&99u64.to_ne_bytes());
        write_all_at(&pager.tree_file, Pager::<2>::slot_offset(slot), &buf).unwrap();

        let err = pager.read_slot(slot).unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }
}
