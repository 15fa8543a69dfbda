//! Files and directories of an opened [`Volume`].

use std::{
    cell::OnceCell,
    fmt,
    io::{self, SeekFrom, Write},
    rc::Rc,
};

use log::trace;
use time::OffsetDateTime;

use super::{
    format::SECTOR_SIZE,
    reader::{FileEntry, FileIdentifiers},
    volume::Volume,
};
use crate::{
    error::{CapabilityError, Result},
    source::{RangeSource, ReadOutcome},
    util::round_up,
};

/// Chunk size used by [`DirectoryEntry::copy_to`].
///
/// Larger than the HTTP cache window, so streaming copies turn into direct range requests.
pub const COPY_CHUNK_SIZE: usize = 16 << 20;

/// The role of a node: only files can be read, only directories can be listed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Directory,
}

#[derive(Clone, Copy, Debug, Default)]
struct ExtentReader {
    position: u64,
}

/// The lazily resolved state of one node, shared by every handle to it.
pub(crate) struct Node {
    name: String,
    icb_block: u32,
    file_entry: OnceCell<FileEntry>,
    children: OnceCell<Vec<Rc<Node>>>,
}

impl Node {
    fn new(name: String, icb_block: u32) -> Rc<Self> {
        Rc::new(Node {
            name,
            icb_block,
            file_entry: OnceCell::new(),
            children: OnceCell::new(),
        })
    }

    pub(crate) fn root(file_entry: FileEntry) -> Rc<Self> {
        Rc::new(Node {
            name: String::new(),
            icb_block: 0,
            file_entry: OnceCell::from(file_entry),
            children: OnceCell::new(),
        })
    }
}

/// A file or directory on a UDF volume.
///
/// Entries are cheap to create: the file entry is only read from the volume the first time
/// something needs it, and a directory's children only when they are first listed.  Both are
/// memoized in state that every handle to the same node shares, so resolving a path a second
/// time doesn't touch the source.
pub struct DirectoryEntry<S> {
    volume: Volume<S>,
    node: Rc<Node>,
    reader: Option<ExtentReader>,
}

impl<S> Clone for DirectoryEntry<S> {
    /// Clones share the memoized state, but start with the reader closed.
    fn clone(&self) -> Self {
        DirectoryEntry::new(self.volume.clone(), Rc::clone(&self.node))
    }
}

impl<S> fmt::Debug for DirectoryEntry<S> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("DirectoryEntry")
            .field("name", &self.node.name)
            .field("icb_block", &self.node.icb_block)
            .field("file_entry", &self.node.file_entry.get())
            .finish_non_exhaustive()
    }
}

impl<S> DirectoryEntry<S> {
    pub(crate) fn new(volume: Volume<S>, node: Rc<Node>) -> Self {
        DirectoryEntry {
            volume,
            node,
            reader: None,
        }
    }

    /// The name recorded in the parent directory; empty for the root.
    pub fn name(&self) -> &str {
        &self.node.name
    }

    pub fn volume(&self) -> &Volume<S> {
        &self.volume
    }

    /// Releases the sequential reader.  The next [`read()`](Self::read) starts from offset 0.
    pub fn close(&mut self) {
        self.reader = None;
    }
}

impl<S: RangeSource> DirectoryEntry<S> {
    fn file_entry(&self) -> Result<&FileEntry> {
        if let Some(file_entry) = self.node.file_entry.get() {
            return Ok(file_entry);
        }
        let file_entry = self.volume.file_entry(self.node.icb_block)?;
        trace!("resolved {:?}: {file_entry:?}", self.node.name);
        Ok(self.node.file_entry.get_or_init(|| file_entry))
    }

    fn require_file(&self) -> Result<&FileEntry> {
        let file_entry = self.file_entry()?;
        if file_entry.is_directory() {
            return Err(CapabilityError::IsADirectory {
                name: self.node.name.clone(),
            }
            .into());
        }
        Ok(file_entry)
    }

    fn require_directory(&self) -> Result<&FileEntry> {
        let file_entry = self.file_entry()?;
        if !file_entry.is_directory() {
            return Err(CapabilityError::NotADirectory {
                name: self.node.name.clone(),
            }
            .into());
        }
        Ok(file_entry)
    }

    /// Anything that isn't a directory is treated as a file.
    pub fn kind(&self) -> Result<NodeKind> {
        Ok(match self.file_entry()?.is_directory() {
            true => NodeKind::Directory,
            false => NodeKind::File,
        })
    }

    pub fn is_directory(&self) -> Result<bool> {
        Ok(self.kind()? == NodeKind::Directory)
    }

    /// The information length: the number of bytes of content.
    pub fn size(&self) -> Result<u64> {
        Ok(self.file_entry()?.information_length)
    }

    /// The recorded modification time, if it is set and valid.
    pub fn modified_time(&self) -> Result<Option<OffsetDateTime>> {
        Ok(self.file_entry()?.modification_time.to_datetime())
    }

    /// The absolute byte offset of the content within the image.
    ///
    /// Sorting by this before reading a batch of files turns the reads into a mostly-sequential
    /// scan of the source.
    pub fn extent_offset(&self) -> Result<u64> {
        Ok(self.file_entry()?.extent.offset)
    }

    fn children(&self) -> Result<&[Rc<Node>]> {
        if let Some(children) = self.node.children.get() {
            return Ok(children);
        }

        let extent = self.require_directory()?.extent;
        let length = extent.length as usize;
        let first_sector = extent.offset / SECTOR_SIZE as u64;

        let data = if length == 0 {
            vec![]
        } else if extent.embedded {
            let mut data = vec![0u8; length];
            self.volume.read_exact_at(&mut data, extent.offset)?;
            data
        } else {
            let sectors = round_up(extent.length, SECTOR_SIZE as u64) as usize / SECTOR_SIZE;
            let mut data = self.volume.read_sectors(first_sector, sectors)?;
            data.truncate(length);
            data
        };

        let mut children = vec![];
        for fid in FileIdentifiers::new(&data, first_sector) {
            let fid = fid?;
            if fid.is_parent() || fid.is_deleted() {
                continue;
            }
            children.push(Node::new(fid.name, fid.icb.location.block.get()));
        }
        trace!("listed {:?}: {} entries", self.node.name, children.len());

        Ok(self.node.children.get_or_init(|| children))
    }

    /// The children of a directory, in on-disk order, without the parent entry.
    pub fn list(&self) -> Result<Vec<DirectoryEntry<S>>> {
        Ok(self
            .children()?
            .iter()
            .map(|node| DirectoryEntry::new(self.volume.clone(), Rc::clone(node)))
            .collect())
    }

    /// The first child called `name`, if there is one.
    pub fn child(&self, name: &str) -> Result<Option<DirectoryEntry<S>>> {
        Ok(self
            .children()?
            .iter()
            .find(|node| node.name == name)
            .map(|node| DirectoryEntry::new(self.volume.clone(), Rc::clone(node))))
    }

    /// Reads file content at `offset`, without touching the sequential reader.
    ///
    /// Reads are clamped to the file size: a read reaching past the end returns the available
    /// prefix along with [`ReadOutcome::EndOfData`].
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<(usize, ReadOutcome)> {
        let file_entry = self.require_file()?;

        let available = file_entry.information_length.saturating_sub(offset);
        let n = usize::try_from(available).map_or(buf.len(), |a| a.min(buf.len()));
        if n > 0 {
            self.volume
                .read_exact_at(&mut buf[..n], file_entry.extent.offset + offset)?;
        }

        match n == buf.len() {
            true => Ok((n, ReadOutcome::Full)),
            false => Ok((n, ReadOutcome::EndOfData)),
        }
    }

    /// Sequential read, opening the reader at offset 0 if it isn't open.  Returns 0 at the end.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.require_file()?;
        let position = self.reader.get_or_insert_with(Default::default).position;
        let (n, _) = self.read_at(buf, position)?;
        if let Some(reader) = &mut self.reader {
            reader.position += n as u64;
        }
        Ok(n)
    }

    /// Streams the whole file into `writer`, returning the number of bytes written.
    pub fn copy_to(&self, writer: &mut impl Write) -> io::Result<u64> {
        let size = self.require_file()?.information_length;
        let chunk = usize::try_from(size).map_or(COPY_CHUNK_SIZE, |s| s.min(COPY_CHUNK_SIZE));
        let mut buf = vec![0u8; chunk];
        let mut copied = 0;

        while copied < size {
            let (n, _) = self.read_at(&mut buf, copied)?;
            if n == 0 {
                break;
            }
            writer.write_all(&buf[..n])?;
            copied += n as u64;
        }

        Ok(copied)
    }
}

impl<S: RangeSource> io::Read for DirectoryEntry<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(DirectoryEntry::read(self, buf)?)
    }
}

impl<S: RangeSource> io::Seek for DirectoryEntry<S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let size = self.require_file()?.information_length;
        let current = self.reader.map_or(0, |reader| reader.position);

        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => size.checked_add_signed(delta),
            SeekFrom::Current(delta) => current.checked_add_signed(delta),
        };
        let Some(position) = target else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative or overflowing position",
            ));
        };

        self.reader = Some(ExtentReader { position });
        Ok(position)
    }
}
