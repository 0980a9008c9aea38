// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fixed-layout decoders for the three on-disk records: `Inode`, `Info`,
//! and `Superblock`. All multi-byte integers are little-endian; bit fields
//! are packed LSB-first within each storage word and are decoded by
//! explicit shift and mask rather than relying on native struct packing.

use std::io::{self, Read};

use bitflags::bitflags;

pub const PAGE_SIZE: u64 = 4096;
pub const MAGIC: u32 = 0x28CD3D45;
pub const SIGNATURE: &[u8; 16] = b"Compressed ROMFS";
pub const CRC_OFFSET: u64 = 32;
pub const CRC_SIZE: u64 = 4;

bitflags! {
    /// Superblock feature flags.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Flags: u32 {
        const FSID_VERSION_2 = 0x0000_0001;
        const SORTED_DIRS = 0x0000_0002;
        const HOLES = 0x0000_0100;
        const WRONG_SIGNATURE = 0x0000_0200;
        const SHIFTED_ROOT_OFFSET = 0x0000_0400;
        const EXT_BLOCK_POINTERS = 0x0000_0800;
    }
}

impl Flags {
    /// The bit mask of flags this decoder knows how to tolerate.
    pub fn supported() -> Flags {
        Flags::from_bits_truncate(0xFF)
            | Flags::HOLES
            | Flags::WRONG_SIGNATURE
            | Flags::SHIFTED_ROOT_OFFSET
            | Flags::EXT_BLOCK_POINTERS
    }
}

/// A block pointer: the end-offset (low 30 bits) of one block's on-disk
/// payload, plus two high flag bits.
#[derive(Clone, Copy, Debug)]
pub struct BlockPointer(u32);

impl BlockPointer {
    const UNCOMPRESSED: u32 = 1 << 31;
    const DIRECT_PTR: u32 = 1 << 30;
    const END_MASK: u32 = 0x3FFF_FFFF;

    pub fn from_u32(raw: u32) -> BlockPointer {
        BlockPointer(raw)
    }

    pub fn is_uncompressed(self) -> bool {
        self.0 & Self::UNCOMPRESSED != 0
    }

    pub fn is_direct(self) -> bool {
        self.0 & Self::DIRECT_PTR != 0
    }

    pub fn end(self) -> u32 {
        self.0 & Self::END_MASK
    }
}

/// A 12-byte packed inode record: `mode`(16) `uid`(16) `size`(24) `gid`(8)
/// `namelen`(6) `offset`(26), read as three little-endian `u32` words.
#[derive(Clone, Copy, Debug)]
pub struct Inode {
    mode: u16,
    uid: u16,
    size: u32,
    gid: u8,
    namelen_units: u32,
    offset_units: u32,
}

pub const INODE_SIZE: usize = 12;

impl Inode {
    pub fn from_bytes(buf: &[u8]) -> Inode {
        let w0 = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let w1 = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        let w2 = u32::from_le_bytes(buf[8..12].try_into().unwrap());

        let mode = (w0 & 0xFFFF) as u16;
        let uid = (w0 >> 16) as u16;
        let size = w1 & 0x00FF_FFFF;
        let gid = (w1 >> 24) as u8;
        let namelen_units = w2 & 0x3F;
        let offset_units = w2 >> 6;

        Inode { mode, uid, size, gid, namelen_units, offset_units }
    }

    pub fn from_reader<R: Read>(r: &mut R) -> io::Result<Inode> {
        let mut buf = [0u8; INODE_SIZE];
        r.read_exact(&mut buf)?;
        Ok(Inode::from_bytes(&buf))
    }

    pub fn mode(&self) -> u32 {
        self.mode as u32
    }

    pub fn uid(&self) -> u16 {
        self.uid
    }

    pub fn size(&self) -> u64 {
        self.size as u64
    }

    pub fn gid(&self) -> u8 {
        self.gid
    }

    /// The name length, in bytes (the on-disk field is stored in 4-byte
    /// units).
    pub fn namelen(&self) -> u64 {
        self.namelen_units as u64 * 4
    }

    /// The byte offset of the file's data into the image (the on-disk
    /// field is stored in 4-byte units).
    pub fn offset(&self) -> u64 {
        self.offset_units as u64 * 4
    }

    pub fn is_dir(&self) -> bool {
        self.mode() & libc::S_IFMT == libc::S_IFDIR
    }

    pub fn is_file(&self) -> bool {
        self.mode() & libc::S_IFMT == libc::S_IFREG
    }

    pub fn is_symlink(&self) -> bool {
        self.mode() & libc::S_IFMT == libc::S_IFLNK
    }

    pub fn is_block_device(&self) -> bool {
        self.mode() & libc::S_IFMT == libc::S_IFBLK
    }

    pub fn is_char_device(&self) -> bool {
        self.mode() & libc::S_IFMT == libc::S_IFCHR
    }

    pub fn is_fifo(&self) -> bool {
        self.mode() & libc::S_IFMT == libc::S_IFIFO
    }

    pub fn is_socket(&self) -> bool {
        self.mode() & libc::S_IFMT == libc::S_IFSOCK
    }

    /// Returns the ten-character POSIX permission string, e.g.
    /// `"drwxr-xr-x"`.
    pub fn filemode(&self) -> String {
        let mode = self.mode();
        let mut s = String::with_capacity(10);
        s.push(match mode & libc::S_IFMT {
            libc::S_IFDIR => 'd',
            libc::S_IFLNK => 'l',
            libc::S_IFIFO => 'p',
            libc::S_IFSOCK => 's',
            libc::S_IFBLK => 'b',
            libc::S_IFCHR => 'c',
            _ => '-',
        });
        let bit = |b: u32| mode & b != 0;
        let alt = |b: bool, t: char, f: char| if b { t } else { f };

        s.push(alt(bit(libc::S_IRUSR), 'r', '-'));
        s.push(alt(bit(libc::S_IWUSR), 'w', '-'));
        s.push(if bit(libc::S_ISUID) {
            alt(bit(libc::S_IXUSR), 's', 'S')
        } else {
            alt(bit(libc::S_IXUSR), 'x', '-')
        });

        s.push(alt(bit(libc::S_IRGRP), 'r', '-'));
        s.push(alt(bit(libc::S_IWGRP), 'w', '-'));
        s.push(if bit(libc::S_ISGID) {
            alt(bit(libc::S_IXGRP), 's', 'S')
        } else {
            alt(bit(libc::S_IXGRP), 'x', '-')
        });

        s.push(alt(bit(libc::S_IROTH), 'r', '-'));
        s.push(alt(bit(libc::S_IWOTH), 'w', '-'));
        s.push(if bit(libc::S_ISVTX) {
            alt(bit(libc::S_IXOTH), 't', 'T')
        } else {
            alt(bit(libc::S_IXOTH), 'x', '-')
        });

        s
    }
}

/// The 16-byte `fsid` record embedded in the superblock.
#[derive(Clone, Copy, Debug)]
pub struct Info {
    pub crc: u32,
    pub edition: u32,
    pub blocks: u32,
    pub files: u32,
}

pub const INFO_SIZE: usize = 16;

impl Info {
    pub fn from_bytes(buf: &[u8]) -> Info {
        Info {
            crc: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            edition: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            blocks: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
            files: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
        }
    }

    pub fn from_reader<R: Read>(r: &mut R) -> io::Result<Info> {
        let mut buf = [0u8; INFO_SIZE];
        r.read_exact(&mut buf)?;
        Ok(Info::from_bytes(&buf))
    }
}

/// The 64-byte image header.
#[derive(Clone, Debug)]
pub struct Superblock {
    pub magic: u32,
    pub size: u32,
    pub flags: Flags,
    pub future: u32,
    pub signature: [u8; 16],
    pub fsid: Info,
    pub name: [u8; 16],
    pub root: Inode,
}

// The spec's component listing ("64 bytes") counts the fields preceding
// `root`; the on-disk record including the trailing 12-byte root inode is
// 76 bytes, matching the real cramfs `cramfs_super` layout.
pub const SUPERBLOCK_SIZE: usize = 76;

fn trim_ascii(bytes: &[u8; 16]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(16);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

impl Superblock {
    pub fn from_bytes(buf: &[u8]) -> Superblock {
        assert!(buf.len() >= SUPERBLOCK_SIZE);
        let magic = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let size = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        let flags = Flags::from_bits_retain(u32::from_le_bytes(buf[8..12].try_into().unwrap()));
        let future = u32::from_le_bytes(buf[12..16].try_into().unwrap());
        let mut signature = [0u8; 16];
        signature.copy_from_slice(&buf[16..32]);
        let fsid = Info::from_bytes(&buf[32..48]);
        let mut name = [0u8; 16];
        name.copy_from_slice(&buf[48..64]);
        let root = Inode::from_bytes(&buf[64..76]);
        Superblock { magic, size, flags, future, signature, fsid, name, root }
    }

    pub fn from_reader<R: Read>(r: &mut R) -> io::Result<Superblock> {
        let mut buf = [0u8; SUPERBLOCK_SIZE];
        r.read_exact(&mut buf)?;
        Ok(Superblock::from_bytes(&buf))
    }

    pub fn signature_str(&self) -> String {
        trim_ascii(&self.signature)
    }

    pub fn name_str(&self) -> String {
        trim_ascii(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pack_inode(mode: u16, uid: u16, size: u32, gid: u8, namelen_units: u32, offset_units: u32) -> [u8; 12] {
        let w0 = (mode as u32) | ((uid as u32) << 16);
        let w1 = (size & 0x00FF_FFFF) | ((gid as u32) << 24);
        let w2 = (namelen_units & 0x3F) | (offset_units << 6);
        let mut buf = [0u8; 12];
        buf[0..4].copy_from_slice(&w0.to_le_bytes());
        buf[4..8].copy_from_slice(&w1.to_le_bytes());
        buf[8..12].copy_from_slice(&w2.to_le_bytes());
        buf
    }

    #[test]
    fn inode_bitfield_roundtrip() {
        let raw = pack_inode(0o100644, 1000, 0xABCDEF, 42, 3, 0x03FF_FFFF);
        let inode = Inode::from_bytes(&raw);
        assert_eq!(inode.mode(), 0o100644);
        assert_eq!(inode.uid(), 1000);
        assert_eq!(inode.size(), 0xABCDEF);
        assert_eq!(inode.gid(), 42);
        assert_eq!(inode.namelen(), 12);
        assert_eq!(inode.offset(), 0x03FF_FFFF * 4);
    }

    #[test]
    fn inode_type_predicates() {
        let reg = Inode::from_bytes(&pack_inode(libc::S_IFREG as u16 | 0o644, 0, 0, 0, 0, 0));
        assert!(reg.is_file());
        assert_eq!(reg.filemode(), "-rw-r--r--");

        let dir = Inode::from_bytes(&pack_inode(libc::S_IFDIR as u16 | 0o755, 0, 0, 0, 0, 0));
        assert!(dir.is_dir());
        assert_eq!(dir.filemode(), "drwxr-xr-x");
    }

    #[test]
    fn block_pointer_flags() {
        let p = BlockPointer::from_u32((1 << 31) | 4096);
        assert!(p.is_uncompressed());
        assert!(!p.is_direct());
        assert_eq!(p.end(), 4096);

        let p = BlockPointer::from_u32(1 << 30);
        assert!(p.is_direct());
    }

    #[test]
    fn flags_supported_mask_rejects_unknown_bits() {
        let known = Flags::from_bits_retain(0x1000);
        assert!(!Flags::supported().contains(known));
    }
}
