//! Positional byte sources.
//!
//! A [`RangeSource`] is anything that can fill a buffer from an absolute offset: a local
//! image file, an in-memory buffer, or a
//! [`RangeCachingReader`](crate::http::RangeCachingReader) talking to an HTTP server.

use std::fs::File;

use rustix::io::{pread, Errno};

use crate::error::TransportError;

/// How a [`RangeSource::read_at`] call ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The whole buffer was filled.
    Full,
    /// The source ended before the buffer was filled.
    EndOfData,
}

/// A source of bytes addressed by absolute offset.
///
/// Implementations never return more bytes than requested, and return fewer only when the
/// end of the data is reached (in which case the outcome is [`ReadOutcome::EndOfData`]).
/// Failures of the underlying medium are reported as [`TransportError`].
pub trait RangeSource {
    fn read_at(
        &mut self,
        buf: &mut [u8],
        offset: u64,
    ) -> Result<(usize, ReadOutcome), TransportError>;
}

/// Fills `buf` from `offset`, treating an early end of data as a short read.
pub fn read_exact_at<S: RangeSource + ?Sized>(
    source: &mut S,
    buf: &mut [u8],
    offset: u64,
) -> Result<(), TransportError> {
    match source.read_at(buf, offset)? {
        (n, ReadOutcome::Full) if n == buf.len() => Ok(()),
        (actual, _) => Err(TransportError::ShortRead {
            offset,
            expected: buf.len(),
            actual,
        }),
    }
}

fn read_from_slice(data: &[u8], buf: &mut [u8], offset: u64) -> (usize, ReadOutcome) {
    let start = usize::try_from(offset).unwrap_or(usize::MAX).min(data.len());
    let available = &data[start..];
    let n = available.len().min(buf.len());
    buf[..n].copy_from_slice(&available[..n]);
    match n == buf.len() {
        true => (n, ReadOutcome::Full),
        false => (n, ReadOutcome::EndOfData),
    }
}

impl RangeSource for &[u8] {
    fn read_at(
        &mut self,
        buf: &mut [u8],
        offset: u64,
    ) -> Result<(usize, ReadOutcome), TransportError> {
        Ok(read_from_slice(self, buf, offset))
    }
}

impl RangeSource for Vec<u8> {
    fn read_at(
        &mut self,
        buf: &mut [u8],
        offset: u64,
    ) -> Result<(usize, ReadOutcome), TransportError> {
        Ok(read_from_slice(self, buf, offset))
    }
}

impl RangeSource for File {
    fn read_at(
        &mut self,
        buf: &mut [u8],
        offset: u64,
    ) -> Result<(usize, ReadOutcome), TransportError> {
        let mut filled = 0;

        while filled < buf.len() {
            match pread(&*self, &mut buf[filled..], offset + filled as u64) {
                Ok(0) => return Ok((filled, ReadOutcome::EndOfData)),
                Ok(n) => filled += n,
                Err(Errno::INTR) => continue,
                Err(e) => return Err(std::io::Error::from(e).into()),
            }
        }

        Ok((filled, ReadOutcome::Full))
    }
}

impl<S: RangeSource + ?Sized> RangeSource for Box<S> {
    fn read_at(
        &mut self,
        buf: &mut [u8],
        offset: u64,
    ) -> Result<(usize, ReadOutcome), TransportError> {
        (**self).read_at(buf, offset)
    }
}

impl<S: RangeSource + ?Sized> RangeSource for &mut S {
    fn read_at(
        &mut self,
        buf: &mut [u8],
        offset: u64,
    ) -> Result<(usize, ReadOutcome), TransportError> {
        (**self).read_at(buf, offset)
    }
}

/// A window onto part of another source: offset 0 is `start` in the inner source, and the data
/// ends after `len` bytes (or earlier, if the inner source does).
///
/// Useful when the image is embedded in a larger file or resource.
#[derive(Debug)]
pub struct Section<S> {
    inner: S,
    start: u64,
    len: u64,
}

impl<S> Section<S> {
    pub fn new(inner: S, start: u64, len: u64) -> Self {
        Section { inner, start, len }
    }

    /// A section running from `start` to the end of the inner source.
    pub fn from_offset(inner: S, start: u64) -> Self {
        Self::new(inner, start, u64::MAX - start)
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: RangeSource> RangeSource for Section<S> {
    fn read_at(
        &mut self,
        buf: &mut [u8],
        offset: u64,
    ) -> Result<(usize, ReadOutcome), TransportError> {
        if buf.is_empty() {
            return Ok((0, ReadOutcome::Full));
        }
        if offset >= self.len {
            return Ok((0, ReadOutcome::EndOfData));
        }

        let remaining = self.len - offset;
        let n = usize::try_from(remaining).map_or(buf.len(), |r| r.min(buf.len()));
        let (read, outcome) = self
            .inner
            .read_at(&mut buf[..n], self.start.saturating_add(offset))?;

        match outcome == ReadOutcome::Full && read == buf.len() {
            true => Ok((read, ReadOutcome::Full)),
            false => Ok((read, ReadOutcome::EndOfData)),
        }
    }
}
