//! Read-only UDF filesystem decoding over positional byte sources.
//!
//! A [`Volume`] is opened from any [`RangeSource`]: a local image file, an in-memory buffer, or
//! a [`RangeCachingReader`] that fetches the image from an HTTP server one byte range at a time.
//! Paths are then resolved to [`DirectoryEntry`] nodes, which list their children or stream
//! their content without the rest of the image ever being downloaded.

pub mod error;
pub mod http;
pub mod source;
pub mod udf;
pub mod util;

pub use error::{Error, Result};
pub use http::RangeCachingReader;
pub use source::{RangeSource, ReadOutcome, Section};
pub use udf::{DirectoryEntry, NodeKind, Volume};
