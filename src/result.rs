// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt;
use std::io;

/// Various errors.
#[derive(Debug)]
pub enum CramfsError {
    WrongMagic,
    WrongSignature,
    UnsupportedFlags(u32),
    ImageTooSmall(u32),
    ZeroFileCount,
    UnsupportedLayout,
    NotFound(String),
    Io(io::Error),
}

impl CramfsError {
    pub fn as_str(&self) -> String {
        match self {
            Self::WrongMagic => "wrong magic".into(),
            Self::WrongSignature => "wrong signature".into(),
            Self::UnsupportedFlags(bits) => {
                format!("unsupported filesystem features (0x{bits:x})")
            }
            Self::ImageTooSmall(size) => format!("superblock size {size} too small"),
            Self::ZeroFileCount => "zero file count".into(),
            Self::UnsupportedLayout => "only contiguous data layout supported".into(),
            Self::NotFound(path) => format!("{path} not found"),
            Self::Io(e) => e.to_string(),
        }
    }
}

impl fmt::Display for CramfsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::error::Error for CramfsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for CramfsError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, CramfsError>;
