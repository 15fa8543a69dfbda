//! Read-only decoding of UDF (ECMA-167) filesystems, as found on DVD and Blu-ray images.

pub mod entry;
pub mod format;
pub mod path;
pub mod reader;
pub mod volume;

pub use entry::{DirectoryEntry, NodeKind};
pub use volume::Volume;
