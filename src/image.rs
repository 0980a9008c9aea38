// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The top-level `Image` facade: superblock validation, the bounded view
//! over the image bytes, and the standalone superblock scanner.

use std::cell::{OnceCell, RefCell};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::rc::{Rc, Weak};

use crate::crc32::Crc32;
use crate::file::{build_tree, Node, ReadSeekStream, SharedStream};
use crate::result::{CramfsError, Result};
use crate::stream::BoundedStream;
use crate::structure::{Flags, Superblock, CRC_OFFSET, CRC_SIZE, MAGIC, PAGE_SIZE, SIGNATURE};

pub(crate) struct ImageInner {
    pub(crate) stream: SharedStream,
    root: OnceCell<Node>,
}

impl ImageInner {
    pub(crate) fn root(&self) -> &Node {
        self.root.get().expect("root is set before Image::from_reader returns")
    }
}

/// A validated, navigable Cramfs image.
pub struct Image {
    inner: Rc<ImageInner>,
    superblock: Superblock,
}

impl Image {
    pub fn open<P: AsRef<Path>>(path: P, offset: u64) -> Result<Image> {
        let file = File::open(path)?;
        Image::from_reader(file, offset)
    }

    pub fn from_bytes(data: Vec<u8>, offset: u64) -> Result<Image> {
        Image::from_reader(io::Cursor::new(data), offset)
    }

    /// Validates the superblock at `offset` in `reader` and eagerly builds
    /// the directory tree, per §4.5.
    pub fn from_reader<R: Read + Seek + 'static>(mut reader: R, offset: u64) -> Result<Image> {
        reader.seek(SeekFrom::Start(offset))?;
        let superblock = Superblock::from_reader(&mut reader)?;
        validate(&superblock)?;

        let boxed: Box<dyn ReadSeekStream> = Box::new(reader);
        let bounded = BoundedStream::new(boxed, offset, offset + superblock.size as u64);
        let stream: SharedStream = Rc::new(RefCell::new(bounded));

        let root_inode = superblock.root;
        let inner = Rc::new(ImageInner { stream: stream.clone(), root: OnceCell::new() });
        let weak = Rc::downgrade(&inner);
        let root = build_tree(&stream, root_inode, Vec::new(), Weak::new(), weak)?;
        inner.root.set(root).unwrap_or_else(|_| unreachable!("root is set exactly once"));

        Ok(Image { inner, superblock })
    }

    pub fn size(&self) -> u64 {
        self.superblock.size as u64
    }

    pub fn files(&self) -> u32 {
        self.superblock.fsid.files
    }

    pub fn name(&self) -> String {
        self.superblock.name_str()
    }

    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    pub fn root(&self) -> Node {
        self.inner.root().clone()
    }

    pub fn iter(&self) -> Vec<Node> {
        self.inner.root().riter()
    }

    pub fn find(&self, name: &str) -> Option<Node> {
        self.inner.root().find(name)
    }

    pub fn select(&self, path: &str) -> Option<Node> {
        self.inner.root().select(path)
    }

    pub fn itermatch(&self, pattern: &str) -> Vec<Node> {
        self.inner.root().itermatch(pattern)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.select(path).is_some()
    }

    /// Image-wide CRC-32, per §4.5: the on-disk CRC field itself is
    /// replaced with NUL bytes rather than skipped.
    pub fn calculate_crc(&self) -> Result<u32> {
        let mut s = self.inner.stream.borrow_mut();
        s.seek(SeekFrom::Start(0))?;

        let mut crc = Crc32::new();
        let mut head = vec![0u8; CRC_OFFSET as usize];
        s.read_exact(&mut head)?;
        crc.update(&head);

        let mut discard = vec![0u8; CRC_SIZE as usize];
        s.read_exact(&mut discard)?;
        crc.update(&[0u8; CRC_SIZE as usize]);

        let mut remaining = s.len() - CRC_OFFSET - CRC_SIZE;
        let mut buf = vec![0u8; 64 * 1024];
        while remaining > 0 {
            let n = (buf.len() as u64).min(remaining) as usize;
            s.read_exact(&mut buf[..n])?;
            crc.update(&buf[..n]);
            remaining -= n as u64;
        }
        Ok(crc.finalize())
    }
}

fn validate(sb: &Superblock) -> Result<()> {
    if sb.magic != MAGIC {
        return Err(CramfsError::WrongMagic);
    }
    if &sb.signature != SIGNATURE {
        return Err(CramfsError::WrongSignature);
    }
    // `!Flags::supported()` would truncate to known flag bits; any bit
    // outside the supported mask, named or not, is fatal, so complement
    // the raw integer instead.
    let unsupported = sb.flags.bits() & !Flags::supported().bits();
    if unsupported != 0 {
        return Err(CramfsError::UnsupportedFlags(unsupported));
    }
    if (sb.size as u64) < PAGE_SIZE {
        return Err(CramfsError::ImageTooSmall(sb.size));
    }
    if sb.flags.contains(Flags::FSID_VERSION_2) {
        if sb.fsid.files == 0 {
            return Err(CramfsError::ZeroFileCount);
        }
    } else {
        log::warn!("old cramfs format");
    }
    Ok(())
}

/// One superblock found by [`find_superblocks`], at the offset it was read
/// from.
#[derive(Clone, Debug)]
pub struct SuperblockHit {
    pub offset: u64,
    pub superblock: Superblock,
}

/// Scans `reader` for every offset that looks like the start of a Cramfs
/// superblock, per §4.5: stream in chunks, carry the last `magic_len - 1`
/// bytes across chunk boundaries so a magic straddling two chunks is still
/// found, then re-parse and strictly verify each candidate offset.
pub fn find_superblocks<R: Read + Seek>(mut reader: R, chunk_size: usize) -> Result<Vec<SuperblockHit>> {
    const MAGIC_LEN: usize = 4;
    let magic_bytes = MAGIC.to_le_bytes();

    reader.seek(SeekFrom::Start(0))?;
    let mut offsets = Vec::new();
    let mut base: u64 = 0;
    let mut carry: Vec<u8> = Vec::new();
    let mut buf = vec![0u8; chunk_size];

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        let mut window = carry.clone();
        window.extend_from_slice(&buf[..n]);
        let window_base = base - carry.len() as u64;

        let mut i = 0;
        while i + MAGIC_LEN <= window.len() {
            if window[i..i + MAGIC_LEN] == magic_bytes {
                offsets.push(window_base + i as u64);
            }
            i += 1;
        }

        let keep = MAGIC_LEN.saturating_sub(1).min(window.len());
        carry = window[window.len() - keep..].to_vec();
        base += n as u64;
    }

    let mut hits = Vec::new();
    for offset in offsets {
        reader.seek(SeekFrom::Start(offset))?;
        let Ok(sb) = Superblock::from_reader(&mut reader) else { continue };
        if sb.magic == MAGIC && sb.signature == *SIGNATURE {
            hits.push(SuperblockHit { offset, superblock: sb });
        }
    }
    hits.sort_by_key(|h| h.offset);
    Ok(hits)
}
