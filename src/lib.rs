// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A read-only decoder for the Cramfs (Compressed ROM File System)
//! on-disk format: superblock validation, directory tree navigation,
//! file data decoding, and a standalone superblock scanner.

pub mod crc32;
pub mod file;
pub mod glob;
pub mod image;
pub mod result;
pub mod stream;
pub mod structure;

pub use file::Node;
pub use image::{find_superblocks, Image, SuperblockHit};
pub use result::{CramfsError, Result};
