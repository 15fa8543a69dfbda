//! Bootstrapping a UDF volume from a [`RangeSource`].
//!
//! The chain is anchor pointer → main volume descriptor sequence (primary volume, partition,
//! logical volume) → file set descriptor → root directory file entry.  Everything after that is
//! resolved lazily by [`DirectoryEntry`].

use std::{cell::RefCell, fmt, rc::Rc};

use log::{debug, trace, warn};
use zerocopy::FromBytes;

use super::{
    entry::{DirectoryEntry, Node},
    format::{
        decode_dstring, AnchorVolumeDescriptorPointer, FileSetDescriptor, ANCHOR_SECTOR,
        SECTOR_SIZE, TAG_ANCHOR_POINTER, TAG_FILE_SET,
    },
    path,
    reader::{read_descriptor, FileEntry, VolumeDescriptor},
};
use crate::{
    error::{FormatError, Result},
    source::{read_exact_at, RangeSource},
};

/// Upper bound on the number of sectors scanned for a terminating descriptor.
pub const MAX_SEQUENCE_SECTORS: u64 = 1024;

fn sequence_ceiling(extent_length: u32) -> u64 {
    match u64::from(extent_length).div_ceil(SECTOR_SIZE as u64) {
        0 => MAX_SEQUENCE_SECTORS,
        sectors => sectors.min(MAX_SEQUENCE_SECTORS),
    }
}

fn read_sectors_from<S: RangeSource + ?Sized>(
    source: &mut S,
    sector: u64,
    count: usize,
) -> Result<Vec<u8>> {
    trace!("reading {count} sector(s) at {sector}");
    let mut buf = vec![0u8; count * SECTOR_SIZE];
    read_exact_at(source, &mut buf, sector * SECTOR_SIZE as u64)?;
    Ok(buf)
}

fn label(field: &[u8], what: &str) -> String {
    decode_dstring(field).unwrap_or_else(|err| {
        warn!("ignoring undecodable {what}: {err}");
        String::new()
    })
}

struct VolumeInner<S> {
    source: RefCell<S>,
    partition_start: u64,
    volume_identifier: String,
    logical_volume_identifier: String,
    file_set_identifier: String,
    root: Rc<Node>,
}

/// An opened UDF volume.
///
/// This is a cheap handle: clones share the same source and descriptors, and every
/// [`DirectoryEntry`] holds one.  It is `!Send`: open a separate volume per thread.
pub struct Volume<S> {
    inner: Rc<VolumeInner<S>>,
}

impl<S> Clone for Volume<S> {
    fn clone(&self) -> Self {
        Volume {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<S> fmt::Debug for Volume<S> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Volume")
            .field("volume_identifier", &self.inner.volume_identifier)
            .field("partition_start", &self.inner.partition_start)
            .finish_non_exhaustive()
    }
}

impl<S: RangeSource> Volume<S> {
    /// Reads the volume structures from `source`.
    ///
    /// Fails with a [`FormatError`] if the anchor, the partition or the logical volume can't be
    /// found, and with a transport error if any of the sectors can't be read in full.
    pub fn open(mut source: S) -> Result<Self> {
        let data = read_sectors_from(&mut source, ANCHOR_SECTOR, 1)?;
        let (anchor, _) = AnchorVolumeDescriptorPointer::ref_from_prefix(&data)
            .map_err(|_| FormatError::Truncated("anchor volume descriptor pointer"))?;
        let found = anchor.tag.identifier.get();
        if found != TAG_ANCHOR_POINTER {
            return Err(FormatError::MissingAnchor {
                sector: ANCHOR_SECTOR,
                found,
            }
            .into());
        }
        if !anchor.tag.is_valid() {
            return Err(FormatError::TagChecksum {
                sector: ANCHOR_SECTOR,
            }
            .into());
        }

        let first = u64::from(anchor.main_sequence.location.get());
        let ceiling = sequence_ceiling(anchor.main_sequence.length.get());
        debug!("anchor found, main volume descriptor sequence at sector {first} ({ceiling} sectors max)");

        let mut primary = None;
        let mut partition = None;
        let mut logical = None;
        let mut terminated = false;

        for sector in first..first + ceiling {
            let data = read_sectors_from(&mut source, sector, 1)?;
            match VolumeDescriptor::parse(&data, sector)? {
                VolumeDescriptor::PrimaryVolume(pvd) => primary = Some(pvd),
                VolumeDescriptor::Partition(pd) => partition = Some(pd),
                VolumeDescriptor::LogicalVolume(lvd) => logical = Some(lvd),
                VolumeDescriptor::Terminating => {
                    terminated = true;
                    break;
                }
                VolumeDescriptor::Other(identifier) => {
                    trace!("ignoring descriptor {identifier} at sector {sector}")
                }
            }
        }

        if !terminated {
            return Err(FormatError::UnterminatedSequence { sectors: ceiling }.into());
        }

        let partition = partition.ok_or(FormatError::MissingDescriptor("partition"))?;
        let logical = logical.ok_or(FormatError::MissingDescriptor("logical volume"))?;

        let block_size = logical.logical_block_size.get();
        if block_size as usize != SECTOR_SIZE {
            return Err(FormatError::Unsupported(format!("logical block size {block_size}")).into());
        }

        let partition_start = u64::from(partition.starting_location.get());
        debug!(
            "partition {} starts at sector {partition_start}",
            partition.partition_number.get()
        );

        let fsd_sector =
            partition_start + u64::from(logical.file_set_location.location.block.get());
        let data = read_sectors_from(&mut source, fsd_sector, 1)?;
        let fsd: FileSetDescriptor = read_descriptor(&data, fsd_sector, TAG_FILE_SET)?;

        let root_sector =
            partition_start + u64::from(fsd.root_directory_icb.location.block.get());
        let data = read_sectors_from(&mut source, root_sector, 1)?;
        let root = FileEntry::parse(&data, root_sector, partition_start)?;
        if !root.is_directory() {
            return Err(FormatError::Unsupported(format!(
                "root entry has file type {}",
                root.file_type
            ))
            .into());
        }
        debug!(
            "root directory at sector {root_sector}, {} bytes",
            root.information_length
        );

        let volume_identifier = primary
            .map(|pvd| label(&pvd.volume_identifier, "volume identifier"))
            .unwrap_or_default();

        Ok(Volume {
            inner: Rc::new(VolumeInner {
                source: RefCell::new(source),
                partition_start,
                volume_identifier,
                logical_volume_identifier: label(
                    &logical.logical_volume_identifier,
                    "logical volume identifier",
                ),
                file_set_identifier: label(&fsd.file_set_identifier, "file set identifier"),
                root: Node::root(root),
            }),
        })
    }

    /// The root directory.  Every handle returned shares one memoized tree.
    pub fn root(&self) -> DirectoryEntry<S> {
        DirectoryEntry::new(self.clone(), Rc::clone(&self.inner.root))
    }

    /// Looks up a `/`-separated path, starting at the root.
    pub fn open_path(&self, path: &str) -> Result<DirectoryEntry<S>> {
        path::resolve(self, path)
    }

    /// Reads `count` whole sectors, starting at absolute `sector`.
    pub fn read_sectors(&self, sector: u64, count: usize) -> Result<Vec<u8>> {
        read_sectors_from(&mut *self.inner.source.borrow_mut(), sector, count)
    }

    pub(crate) fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        Ok(read_exact_at(&mut *self.inner.source.borrow_mut(), buf, offset)?)
    }

    /// Decodes the file entry at partition-relative `block`.
    pub(crate) fn file_entry(&self, block: u32) -> Result<FileEntry> {
        let sector = self.inner.partition_start + u64::from(block);
        let data = self.read_sectors(sector, 1)?;
        Ok(FileEntry::parse(&data, sector, self.inner.partition_start)?)
    }
}

impl<S> Volume<S> {
    /// The absolute sector at which the partition (logical block 0) starts.
    pub fn partition_start(&self) -> u64 {
        self.inner.partition_start
    }

    pub fn volume_identifier(&self) -> &str {
        &self.inner.volume_identifier
    }

    pub fn logical_volume_identifier(&self) -> &str {
        &self.inner.logical_volume_identifier
    }

    pub fn file_set_identifier(&self) -> &str {
        &self.inner.file_set_identifier
    }
}
