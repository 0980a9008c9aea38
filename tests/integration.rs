//! End-to-end tests that synthesize small Cramfs images byte-by-byte and
//! drive the public API against them, the way a CLI-facing crate in this
//! corpus exercises its on-disk formats.

use std::io::Cursor;

use cramfs::result::CramfsError;
use cramfs::structure::{Flags, Inode, Superblock, INODE_SIZE, MAGIC, SIGNATURE, SUPERBLOCK_SIZE};
use cramfs::{find_superblocks, Image};

const S_IFDIR: u32 = 0o040000;
const S_IFREG: u32 = 0o100000;
const S_IFLNK: u32 = 0o120000;

fn pack_inode(mode: u32, uid: u16, size: u32, gid: u8, namelen_units: u32, offset_units: u32) -> [u8; INODE_SIZE] {
    let w0 = (mode & 0xFFFF) | ((uid as u32) << 16);
    let w1 = (size & 0x00FF_FFFF) | ((gid as u32) << 24);
    let w2 = (namelen_units & 0x3F) | (offset_units << 6);
    let mut buf = [0u8; INODE_SIZE];
    buf[0..4].copy_from_slice(&w0.to_le_bytes());
    buf[4..8].copy_from_slice(&w1.to_le_bytes());
    buf[8..12].copy_from_slice(&w2.to_le_bytes());
    buf
}

fn align4(len: usize) -> usize {
    (len + 3) & !3
}

fn push_name(buf: &mut Vec<u8>, name: &str) {
    buf.extend_from_slice(name.as_bytes());
    buf.resize(buf.len() + (align4(name.len()) - name.len()), 0);
}

struct Entry {
    name: &'static str,
    mode: u32,
    content: Vec<u8>,
    /// When true, each block is zlib-compressed on disk and the
    /// UNCOMPRESSED block-pointer bit is left clear.
    compressed: bool,
}

/// Builds a minimal well-formed image with one regular file, one symlink,
/// and one empty subdirectory under root. Every block is stored
/// uncompressed, which the block-pointer format explicitly supports.
fn build_image(entries: &[Entry], declared_size: usize) -> Vec<u8> {
    let header_start = SUPERBLOCK_SIZE;
    let header_bytes: usize = entries.iter().map(|e| INODE_SIZE + align4(e.name.len())).sum();
    let data_start = header_start + header_bytes;

    // Each entry's blocks, compressed first if requested, so pass 1 can
    // lay out the data region from the actual on-disk payload lengths.
    let blocks: Vec<Vec<Vec<u8>>> = entries
        .iter()
        .map(|e| {
            e.content
                .chunks(4096)
                .map(|block| {
                    if e.compressed {
                        miniz_oxide::deflate::compress_to_vec_zlib(block, 6)
                    } else {
                        block.to_vec()
                    }
                })
                .collect()
        })
        .collect();

    // Pass 1: lay out each entry's data region and remember its offset.
    let mut cursor = data_start;
    let mut offsets = Vec::with_capacity(entries.len());
    for (e, blks) in entries.iter().zip(&blocks) {
        if e.mode & S_IFDIR == S_IFDIR {
            offsets.push(0u64);
            continue;
        }
        let n_blocks = e.content.len().div_ceil(4096).max(1);
        let offset = cursor as u64;
        offsets.push(offset);
        cursor += 4 * n_blocks + blks.iter().map(|b| b.len()).sum::<usize>();
        cursor = align4(cursor);
        // Pointer array followed by payloads, per the on-disk layout the
        // data reader expects: `n_blocks` pointers, then every payload
        // back-to-back.
    }
    let data_end = cursor;

    // Pass 2: emit superblock placeholder, header, then data.
    let mut buf = vec![0u8; header_start];
    for (e, &offset) in entries.iter().zip(&offsets) {
        let size = e.content.len() as u32;
        let offset_units = (offset / 4) as u32;
        let namelen_units = (align4(e.name.len()) / 4) as u32;
        buf.extend_from_slice(&pack_inode(e.mode | 0o755, 0, size, 0, namelen_units, offset_units));
        push_name(&mut buf, e.name);
    }
    assert_eq!(buf.len(), data_start);

    for ((e, &offset), blks) in entries.iter().zip(&offsets).zip(&blocks) {
        if e.mode & S_IFDIR == S_IFDIR {
            continue;
        }
        assert_eq!(buf.len(), offset as usize);
        let n_blocks = e.content.len().div_ceil(4096).max(1);
        let pointers_start = buf.len();
        buf.resize(buf.len() + 4 * n_blocks, 0); // pointer placeholders, patched below
        for (i, block) in blks.iter().enumerate() {
            buf.extend_from_slice(block);
            let end = buf.len() as u32;
            let pointer = if e.compressed { end } else { 0x8000_0000u32 | end };
            buf[pointers_start + 4 * i..pointers_start + 4 * i + 4].copy_from_slice(&pointer.to_le_bytes());
        }
        while buf.len() % 4 != 0 {
            buf.push(0);
        }
    }
    assert_eq!(buf.len(), data_end);

    let total = declared_size.max(data_end);
    buf.resize(total, 0);

    let root_size = header_bytes as u32;
    let root_offset_units = (header_start / 4) as u32;
    let root_inode = pack_inode(S_IFDIR | 0o755, 0, root_size, 0, 0, root_offset_units);

    buf[0..4].copy_from_slice(&MAGIC.to_le_bytes());
    buf[4..8].copy_from_slice(&(total as u32).to_le_bytes());
    buf[8..12].copy_from_slice(&Flags::FSID_VERSION_2.bits().to_le_bytes());
    buf[12..16].copy_from_slice(&0u32.to_le_bytes());
    buf[16..32].copy_from_slice(SIGNATURE);
    buf[32..36].copy_from_slice(&0u32.to_le_bytes()); // crc
    buf[36..40].copy_from_slice(&1u32.to_le_bytes()); // edition
    buf[40..44].copy_from_slice(&0u32.to_le_bytes()); // blocks
    buf[44..48].copy_from_slice(&(entries.len() as u32).to_le_bytes()); // files
    let mut name = [0u8; 16];
    name[..4].copy_from_slice(b"test");
    buf[48..64].copy_from_slice(&name);
    buf[64..76].copy_from_slice(&root_inode);

    buf
}

fn basic_entries() -> Vec<Entry> {
    vec![
        Entry { name: "hello.txt", mode: S_IFREG, content: b"hello, cramfs!\n".to_vec(), compressed: false },
        Entry { name: "link", mode: S_IFLNK, content: b"hello.txt".to_vec(), compressed: false },
        Entry { name: "sub", mode: S_IFDIR, content: Vec::new(), compressed: false },
    ]
}

#[test]
fn valid_minimal_image_lists_and_reads() {
    let bytes = build_image(&basic_entries(), 4096);
    let image = Image::from_bytes(bytes, 0).expect("valid image should open");

    assert_eq!(image.size(), 4096);
    let names: Vec<String> = image.root().iterdir().iter().map(|n| n.name()).collect();
    assert_eq!(names, vec!["hello.txt", "link", "sub"]);

    let hello = image.select("/hello.txt").expect("hello.txt should resolve");
    assert!(hello.is_file());
    assert_eq!(hello.read_text().unwrap(), "hello, cramfs!\n");

    let link = image.select("/link").expect("link should resolve");
    assert!(link.is_symlink());
    assert_eq!(link.readlink().unwrap(), "hello.txt");

    let sub = image.select("/sub").expect("sub should resolve");
    assert!(sub.is_dir());
    assert!(sub.iterdir().is_empty());
    assert_eq!(sub.select("..").unwrap().path(), "/");

    assert_eq!(image.find("hello.txt").unwrap().path(), "/hello.txt");
    let matches: Vec<String> = image.itermatch("*.txt").iter().map(|n| n.path()).collect();
    assert_eq!(matches, vec!["/hello.txt"]);
}

#[test]
fn filemode_reflects_type_and_permissions() {
    let bytes = build_image(&basic_entries(), 4096);
    let image = Image::from_bytes(bytes, 0).unwrap();
    assert_eq!(image.root().filemode(), "drwxr-xr-x");
    assert_eq!(image.select("/hello.txt").unwrap().filemode(), "-rwxr-xr-x");
    assert_eq!(image.select("/link").unwrap().filemode(), "lrwxr-xr-x");
}

#[test]
fn multi_block_file_reads_across_blocks() {
    let mut content = vec![0u8; 5000];
    for (i, b) in content.iter_mut().enumerate() {
        *b = (i % 251) as u8;
    }
    let entries = vec![Entry { name: "big.bin", mode: S_IFREG, content: content.clone(), compressed: false }];
    let bytes = build_image(&entries, 4096);
    let image = Image::from_bytes(bytes, 0).unwrap();

    let big = image.select("/big.bin").unwrap();
    assert_eq!(big.size(), 5000);
    assert_eq!(big.read_bytes().unwrap(), content);
}

#[test]
fn compressed_file_inflates_on_read() {
    let content = b"the quick brown fox jumps over the lazy dog, repeatedly, for compression\n".repeat(20);
    let entries = vec![Entry { name: "zlib.txt", mode: S_IFREG, content: content.clone(), compressed: true }];
    let bytes = build_image(&entries, 4096);
    let image = Image::from_bytes(bytes, 0).unwrap();

    let node = image.select("/zlib.txt").unwrap();
    assert_eq!(node.size() as usize, content.len());
    assert_eq!(node.read_bytes().unwrap(), content);
}

#[test]
fn multi_block_compressed_file_inflates_each_block() {
    let mut content = vec![0u8; 9000];
    for (i, b) in content.iter_mut().enumerate() {
        *b = (i % 17) as u8;
    }
    let entries = vec![Entry { name: "zlib.bin", mode: S_IFREG, content: content.clone(), compressed: true }];
    let bytes = build_image(&entries, 4096);
    let image = Image::from_bytes(bytes, 0).unwrap();

    let node = image.select("/zlib.bin").unwrap();
    assert_eq!(node.read_bytes().unwrap(), content);
}

#[test]
fn total_counts_descendants_including_nested_dirs() {
    let bytes = build_image(&basic_entries(), 4096);
    let image = Image::from_bytes(bytes, 0).unwrap();
    // hello.txt, link, sub themselves: 3 entries under root.
    assert_eq!(image.root().total(), 3);
}

#[test]
fn calculate_crc_is_stable_and_nulls_the_crc_field() {
    let bytes = build_image(&basic_entries(), 4096);
    let image = Image::from_bytes(bytes.clone(), 0).unwrap();
    let a = image.calculate_crc().unwrap();
    let b = image.calculate_crc().unwrap();
    assert_eq!(a, b);

    let mut expected_input = bytes;
    expected_input[32..36].copy_from_slice(&[0, 0, 0, 0]);
    assert_eq!(a, cramfs::crc32::crc32(&expected_input));
}

#[test]
fn rejects_wrong_magic() {
    let mut buf = vec![0u8; SUPERBLOCK_SIZE];
    buf[0..4].copy_from_slice(&0xDEAD_BEEFu32.to_le_bytes());
    match Image::from_bytes(buf, 0) {
        Err(CramfsError::WrongMagic) => {}
        other => panic!("expected WrongMagic, got {}", other.err().map(|e| e.to_string()).unwrap_or_default()),
    }
}

#[test]
fn rejects_wrong_signature() {
    let mut buf = vec![0u8; SUPERBLOCK_SIZE];
    buf[0..4].copy_from_slice(&MAGIC.to_le_bytes());
    buf[16..32].copy_from_slice(b"not the sig!!!!!"[..16].as_ref());
    match Image::from_bytes(buf, 0) {
        Err(CramfsError::WrongSignature) => {}
        other => panic!("expected WrongSignature, got {}", other.err().map(|e| e.to_string()).unwrap_or_default()),
    }
}

#[test]
fn rejects_unsupported_flags() {
    let mut buf = vec![0u8; SUPERBLOCK_SIZE];
    buf[0..4].copy_from_slice(&MAGIC.to_le_bytes());
    buf[8..12].copy_from_slice(&(1u32 << 16).to_le_bytes());
    buf[16..32].copy_from_slice(SIGNATURE);
    match Image::from_bytes(buf, 0) {
        Err(CramfsError::UnsupportedFlags(_)) => {}
        other => panic!("expected UnsupportedFlags, got {}", other.err().map(|e| e.to_string()).unwrap_or_default()),
    }
}

#[test]
fn rejects_image_smaller_than_a_page() {
    let mut buf = vec![0u8; SUPERBLOCK_SIZE];
    buf[0..4].copy_from_slice(&MAGIC.to_le_bytes());
    buf[4..8].copy_from_slice(&100u32.to_le_bytes());
    buf[16..32].copy_from_slice(SIGNATURE);
    match Image::from_bytes(buf, 0) {
        Err(CramfsError::ImageTooSmall(100)) => {}
        other => panic!("expected ImageTooSmall(100), got {}", other.err().map(|e| e.to_string()).unwrap_or_default()),
    }
}

#[test]
fn select_returns_none_past_a_non_directory() {
    let bytes = build_image(&basic_entries(), 4096);
    let image = Image::from_bytes(bytes, 0).unwrap();
    assert!(image.select("/hello.txt/nope").is_none());
    assert!(image.select("/nope").is_none());
}

#[test]
fn scanner_finds_two_superblocks_and_ignores_spurious_magic() {
    let first = build_image(&basic_entries(), 4096);
    let second = build_image(&[Entry { name: "only.txt", mode: S_IFREG, content: b"x".to_vec(), compressed: false }], 4096);

    let mut combined = Vec::new();
    combined.extend_from_slice(b"junk before");
    // A spurious 4-byte magic with no valid superblock behind it.
    combined.extend_from_slice(&MAGIC.to_le_bytes());
    combined.extend_from_slice(b"not a superblock at all, just noise padding");
    let offset_first = combined.len() as u64;
    combined.extend_from_slice(&first);
    let offset_second = combined.len() as u64;
    combined.extend_from_slice(&second);

    let hits = find_superblocks(Cursor::new(combined), 64).unwrap();
    let offsets: Vec<u64> = hits.iter().map(|h| h.offset).collect();
    assert_eq!(offsets, vec![offset_first, offset_second]);
}

#[test]
fn opens_from_a_real_file_path_at_a_nonzero_offset() {
    let bytes = build_image(&basic_entries(), 4096);
    let mut padded = vec![0xAAu8; 512];
    padded.extend_from_slice(&bytes);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("image.cramfs");
    std::fs::write(&path, &padded).unwrap();

    let image = Image::open(&path, 512).unwrap();
    assert_eq!(image.select("/hello.txt").unwrap().read_text().unwrap(), "hello, cramfs!\n");
}

#[test]
fn structure_decodes_superblock_fields() {
    let bytes = build_image(&basic_entries(), 4096);
    let sb = Superblock::from_bytes(&bytes);
    assert_eq!(sb.magic, MAGIC);
    assert_eq!(sb.signature_str(), "Compressed ROMFS");
    assert_eq!(sb.name_str(), "test");
    let root: Inode = sb.root;
    assert!(root.is_dir());
}
