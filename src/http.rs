//! A [`RangeSource`] backed by HTTP byte-range requests.
//!
//! [`RangeCachingReader`] keeps a single look-ahead window of the remote resource in memory.
//! Filesystem metadata reads are small and clustered, so most of them are served from the window;
//! reads larger than the window (bulk file content) bypass it and are fetched directly into the
//! caller's buffer with one exactly-sized request.

use std::fmt;

use log::{debug, trace};
use reqwest::{
    blocking::Client,
    header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, RANGE},
    StatusCode, Url,
};

use crate::{
    error::{CapabilityError, Result, TransportError},
    source::{RangeSource, ReadOutcome, Section},
    util::read_full,
};

/// Default size of the look-ahead window.
pub const CACHE_WINDOW: usize = 4 << 20;

/// Parses a `Content-Range: bytes <first>-<last>/<total>` value into `(first, last)`.  The
/// total may be `*`.
fn parse_content_range(value: &str) -> Option<(u64, u64)> {
    let (span, total) = value.trim().strip_prefix("bytes ")?.split_once('/')?;
    if total != "*" {
        total.parse::<u64>().ok()?;
    }
    let (first, last) = span.split_once('-')?;
    Some((first.parse().ok()?, last.parse().ok()?))
}

/// What a HEAD request told us about the resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResourceInfo {
    pub content_length: u64,
    pub accepts_ranges: bool,
}

/// The requests [`RangeCachingReader`] needs to make.
pub trait RangeTransport {
    /// Finds out the length of the resource and whether it can be fetched in pieces.
    fn head(&mut self) -> std::result::Result<ResourceInfo, TransportError>;

    /// Fills `buf` with the bytes starting at `start`.  Anything but exactly `buf.len()` bytes
    /// is an error.
    fn fetch(&mut self, start: u64, buf: &mut [u8]) -> std::result::Result<(), TransportError>;
}

/// [`RangeTransport`] over a blocking reqwest client.
#[derive(Debug)]
pub struct HttpTransport {
    client: Client,
    url: Url,
}

impl HttpTransport {
    pub fn new(client: Client, url: Url) -> Self {
        HttpTransport { client, url }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl RangeTransport for HttpTransport {
    fn head(&mut self) -> std::result::Result<ResourceInfo, TransportError> {
        let response = self.client.head(self.url.clone()).send()?;
        if !response.status().is_success() {
            return Err(TransportError::Status {
                status: response.status().as_u16(),
            });
        }

        let headers = response.headers();

        // the body of a HEAD response is empty, so read the header rather than content_length()
        let content_length: u64 = headers
            .get(CONTENT_LENGTH)
            .ok_or_else(|| TransportError::Protocol("missing Content-Length".to_string()))?
            .to_str()
            .ok()
            .and_then(|value| value.trim().parse().ok())
            .ok_or_else(|| TransportError::Protocol("invalid Content-Length".to_string()))?;

        let accepts_ranges = headers
            .get_all(ACCEPT_RANGES)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .any(|unit| unit.trim().eq_ignore_ascii_case("bytes"));

        Ok(ResourceInfo {
            content_length,
            accepts_ranges,
        })
    }

    fn fetch(&mut self, start: u64, buf: &mut [u8]) -> std::result::Result<(), TransportError> {
        if buf.is_empty() {
            return Ok(());
        }

        let end = start + buf.len() as u64 - 1;
        trace!("GET {} bytes={start}-{end}", self.url);

        let mut response = self
            .client
            .get(self.url.clone())
            .header(RANGE, format!("bytes={start}-{end}"))
            .send()?;
        if response.status() != StatusCode::PARTIAL_CONTENT {
            return Err(TransportError::Status {
                status: response.status().as_u16(),
            });
        }

        let content_range = response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_content_range);
        if content_range != Some((start, end)) {
            return Err(TransportError::Protocol(format!(
                "partial content does not cover bytes {start}-{end} (Content-Range {:?})",
                response.headers().get(CONTENT_RANGE)
            )));
        }

        let actual = read_full(&mut response, buf)?;
        if actual != buf.len() {
            return Err(TransportError::ShortRead {
                offset: start,
                expected: buf.len(),
                actual,
            });
        }
        if read_full(&mut response, &mut [0u8; 1])? != 0 {
            return Err(TransportError::Protocol(format!(
                "partial content for bytes {start}-{end} is longer than requested"
            )));
        }

        Ok(())
    }
}

/// Serves positional reads of a remote resource through a single cached window.
pub struct RangeCachingReader<T = HttpTransport> {
    transport: T,
    total_len: u64,
    cache: Box<[u8]>,
    cache_offset: u64,
    cache_len: usize,
}

impl<T> fmt::Debug for RangeCachingReader<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RangeCachingReader")
            .field("total_len", &self.total_len)
            .field("window", &self.cache.len())
            .field("cache_offset", &self.cache_offset)
            .field("cache_len", &self.cache_len)
            .finish_non_exhaustive()
    }
}

impl RangeCachingReader<HttpTransport> {
    /// Opens `url` with a default client.
    pub fn open(url: &str) -> Result<Self> {
        Self::with_client(Client::new(), url)
    }

    /// Opens `url` with a caller-configured client (for timeouts, proxies, and the like).
    pub fn with_client(client: Client, url: &str) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|err| TransportError::Protocol(format!("invalid URL {url:?}: {err}")))?;
        Self::new(HttpTransport::new(client, url))
    }
}

impl<T: RangeTransport> RangeCachingReader<T> {
    pub fn new(transport: T) -> Result<Self> {
        Self::with_window(transport, CACHE_WINDOW)
    }

    /// Asks for the resource's length, failing with [`CapabilityError::RangesUnsupported`] if
    /// the server doesn't advertise byte ranges.
    pub fn with_window(mut transport: T, window: usize) -> Result<Self> {
        let info = transport.head()?;
        debug!(
            "resource is {} bytes, ranges {}",
            info.content_length,
            match info.accepts_ranges {
                true => "supported",
                false => "unsupported",
            }
        );
        if !info.accepts_ranges {
            return Err(CapabilityError::RangesUnsupported.into());
        }

        Ok(RangeCachingReader {
            transport,
            total_len: info.content_length,
            cache: vec![0u8; window.max(1)].into_boxed_slice(),
            cache_offset: 0,
            cache_len: 0,
        })
    }

    /// The length of the resource, as reported by the HEAD request.
    pub fn total_len(&self) -> u64 {
        self.total_len
    }

    /// Restricts the reader to `len` bytes (or the rest of the resource) from `start`.
    pub fn section(self, start: u64, len: Option<u64>) -> Section<Self> {
        let available = self.total_len.saturating_sub(start);
        let len = len.map_or(available, |len| len.min(available));
        Section::new(self, start, len)
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn cached(&self, offset: u64, len: usize) -> Option<&[u8]> {
        let start = offset.checked_sub(self.cache_offset)?;
        let start = usize::try_from(start).ok()?;
        self.cache[..self.cache_len].get(start..start.checked_add(len)?)
    }
}

impl<T: RangeTransport> RangeSource for RangeCachingReader<T> {
    fn read_at(
        &mut self,
        buf: &mut [u8],
        offset: u64,
    ) -> std::result::Result<(usize, ReadOutcome), TransportError> {
        if buf.is_empty() {
            return Ok((0, ReadOutcome::Full));
        }
        if offset >= self.total_len {
            return Ok((0, ReadOutcome::EndOfData));
        }

        let remaining = self.total_len - offset;
        let n = usize::try_from(remaining).map_or(buf.len(), |r| r.min(buf.len()));
        let outcome = match n == buf.len() {
            true => ReadOutcome::Full,
            false => ReadOutcome::EndOfData,
        };
        let buf = &mut buf[..n];

        if let Some(cached) = self.cached(offset, n) {
            trace!("cache hit: {n} bytes at {offset}");
            buf.copy_from_slice(cached);
        } else if n > self.cache.len() {
            trace!("direct fetch: {n} bytes at {offset}");
            self.transport.fetch(offset, buf)?;
        } else {
            let fill = usize::try_from(remaining)
                .map_or(self.cache.len(), |r| r.min(self.cache.len()));
            trace!("cache miss: refilling {fill} bytes at {offset}");

            // a failed refill leaves the cache empty rather than half-overwritten
            self.cache_len = 0;
            self.transport.fetch(offset, &mut self.cache[..fill])?;
            self.cache_offset = offset;
            self.cache_len = fill;

            buf.copy_from_slice(&self.cache[..n]);
        }

        Ok((n, outcome))
    }
}
