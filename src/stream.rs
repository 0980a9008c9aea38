// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A positionable view over `[start, end)` of an underlying stream.
//!
//! Positions passed to, and returned from, `BoundedStream` are always in
//! local coordinates: 0 is `start`. Reads and seeks are clamped so that the
//! view can never escape its window, even if the caller asks it to.

use std::io::{self, Read, Seek, SeekFrom};

pub struct BoundedStream<S> {
    inner: S,
    start: u64,
    end: u64,
}

impl<S: Read + Seek> BoundedStream<S> {
    /// Wraps `inner`, bounding it to `[start, end)` in the underlying
    /// stream's own coordinates. `inner`'s current position is left
    /// wherever it is; callers typically `seek` immediately after.
    pub fn new(inner: S, start: u64, end: u64) -> BoundedStream<S> {
        assert!(start <= end);
        BoundedStream { inner, start, end }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: Read + Seek> Read for BoundedStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let pos = self.inner.stream_position()?;
        let max_read = self.end.saturating_sub(pos);
        let n = (buf.len() as u64).min(max_read) as usize;
        self.inner.read(&mut buf[..n])
    }
}

impl<S: Read + Seek> Seek for BoundedStream<S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => {
                self.start.saturating_add(offset).clamp(self.start, self.end)
            }
            SeekFrom::Current(offset) => {
                let cur = self.inner.stream_position()? as i64;
                (cur + offset).clamp(self.start as i64, self.end as i64) as u64
            }
            SeekFrom::End(offset) => {
                (self.end as i64 + offset.min(0)).clamp(self.start as i64, self.end as i64) as u64
            }
        };
        let abs = self.inner.seek(SeekFrom::Start(target))?;
        Ok(abs - self.start)
    }

    fn stream_position(&mut self) -> io::Result<u64> {
        Ok(self.inner.stream_position()? - self.start)
    }
}
