//! Decoding of UDF descriptors and file structures out of sector buffers.
//!
//! Everything here works on byte slices that were already fetched from a
//! [`RangeSource`](crate::source::RangeSource); deciding what to read is left to
//! [`volume`](super::volume) and [`entry`](super::entry).

use zerocopy::{FromBytes, Immutable, KnownLayout};

use super::format::{
    decode_cs0, extent_length, extent_type, DescriptorTag, ExtendedFileEntryHeader,
    FileEntryHeader, FileIdentifierHeader, LogicalVolumeDescriptor, LongAd,
    PartitionDescriptor, PrimaryVolumeDescriptor, ShortAd, Timestamp, EXTENT_RECORDED,
    FID_CHARACTERISTIC_DELETED, FID_CHARACTERISTIC_DIRECTORY, FID_CHARACTERISTIC_PARENT,
    FILE_TYPE_DIRECTORY, ICB_AD_EMBEDDED, ICB_AD_EXTENDED, ICB_AD_LONG, ICB_AD_SHORT,
    SECTOR_SIZE, TAG_EXTENDED_FILE_ENTRY, TAG_FILE_ENTRY, TAG_FILE_IDENTIFIER,
    TAG_LOGICAL_VOLUME, TAG_PARTITION, TAG_PRIMARY_VOLUME, TAG_TERMINATING,
};
use crate::error::FormatError;

type ParseResult<T> = Result<T, FormatError>;

/// Reads and validates the descriptor tag at the start of `data`.
pub fn read_tag(data: &[u8], sector: u64) -> ParseResult<DescriptorTag> {
    let (tag, _) = DescriptorTag::read_from_prefix(data)
        .map_err(|_| FormatError::Truncated("descriptor tag"))?;
    if !tag.is_valid() {
        return Err(FormatError::TagChecksum { sector });
    }
    Ok(tag)
}

/// Reads a descriptor of type `T`, which must carry the `expected` tag identifier.
pub fn read_descriptor<T>(data: &[u8], sector: u64, expected: u16) -> ParseResult<T>
where
    T: FromBytes + KnownLayout + Immutable,
{
    let tag = read_tag(data, sector)?;
    if tag.identifier.get() != expected {
        return Err(FormatError::UnexpectedTag {
            sector,
            expected,
            found: tag.identifier.get(),
        });
    }
    let (descriptor, _) =
        T::read_from_prefix(data).map_err(|_| FormatError::Truncated("descriptor"))?;
    Ok(descriptor)
}

/// One entry of the volume descriptor sequence, classified by its tag.
#[derive(Debug)]
pub enum VolumeDescriptor {
    PrimaryVolume(PrimaryVolumeDescriptor),
    Partition(PartitionDescriptor),
    LogicalVolume(LogicalVolumeDescriptor),
    Terminating,
    Other(u16),
}

impl VolumeDescriptor {
    pub fn parse(data: &[u8], sector: u64) -> ParseResult<Self> {
        let tag = read_tag(data, sector)?;
        let identifier = tag.identifier.get();
        Ok(match identifier {
            TAG_PRIMARY_VOLUME => Self::PrimaryVolume(read_descriptor(data, sector, identifier)?),
            TAG_PARTITION => Self::Partition(read_descriptor(data, sector, identifier)?),
            TAG_LOGICAL_VOLUME => Self::LogicalVolume(read_descriptor(data, sector, identifier)?),
            TAG_TERMINATING => Self::Terminating,
            other => Self::Other(other),
        })
    }
}

/// The byte range holding a node's content.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Extent {
    /// Absolute byte offset in the image.
    pub offset: u64,
    pub length: u64,
    /// Data recorded inside the file entry itself rather than in separate sectors.
    pub embedded: bool,
}

/// The parts of a (possibly extended) file entry that we care about.
#[derive(Clone, Debug)]
pub struct FileEntry {
    pub file_type: u8,
    pub information_length: u64,
    pub modification_time: Timestamp,
    pub extent: Extent,
}

impl FileEntry {
    /// Decodes the file entry recorded at absolute `sector`.
    ///
    /// Allocation descriptors are relative to the partition starting at `partition_start`.
    /// Only content recorded in a single extent is supported: anything else is rejected rather
    /// than silently truncated.
    pub fn parse(data: &[u8], sector: u64, partition_start: u64) -> ParseResult<Self> {
        let tag = read_tag(data, sector)?;

        let (icb_tag, information_length, modification_time, ad_start, ad_length) =
            match tag.identifier.get() {
                TAG_FILE_ENTRY => {
                    let (fe, _) = FileEntryHeader::ref_from_prefix(data)
                        .map_err(|_| FormatError::Truncated("file entry"))?;
                    (
                        fe.icb_tag,
                        fe.information_length.get(),
                        fe.modification_time,
                        size_of::<FileEntryHeader>() + fe.extended_attributes_length.get() as usize,
                        fe.allocation_descriptors_length.get() as usize,
                    )
                }
                TAG_EXTENDED_FILE_ENTRY => {
                    let (efe, _) = ExtendedFileEntryHeader::ref_from_prefix(data)
                        .map_err(|_| FormatError::Truncated("extended file entry"))?;
                    (
                        efe.icb_tag,
                        efe.information_length.get(),
                        efe.modification_time,
                        size_of::<ExtendedFileEntryHeader>()
                            + efe.extended_attributes_length.get() as usize,
                        efe.allocation_descriptors_length.get() as usize,
                    )
                }
                found => {
                    return Err(FormatError::UnexpectedTag {
                        sector,
                        expected: TAG_FILE_ENTRY,
                        found,
                    })
                }
            };

        let ad_data = data
            .get(ad_start..ad_start + ad_length)
            .ok_or(FormatError::Truncated("allocation descriptors"))?;

        let extent = match icb_tag.allocation_type() {
            ICB_AD_EMBEDDED => {
                if information_length > ad_length as u64 {
                    return Err(FormatError::Truncated("embedded file data"));
                }
                Extent {
                    offset: sector * SECTOR_SIZE as u64 + ad_start as u64,
                    length: information_length,
                    embedded: true,
                }
            }
            ICB_AD_SHORT => {
                let ads = ad_data
                    .chunks_exact(size_of::<ShortAd>())
                    .filter_map(|chunk| ShortAd::read_from_bytes(chunk).ok())
                    .map(|ad| (ad.length, ad.position.get()));
                single_extent(ads, information_length, partition_start)?
            }
            ICB_AD_LONG => {
                let ads = ad_data
                    .chunks_exact(size_of::<LongAd>())
                    .filter_map(|chunk| LongAd::read_from_bytes(chunk).ok())
                    .map(|ad| (ad.length, ad.location.block.get()));
                single_extent(ads, information_length, partition_start)?
            }
            ICB_AD_EXTENDED => {
                return Err(FormatError::Unsupported(
                    "extended allocation descriptors".to_string(),
                ))
            }
            other => {
                return Err(FormatError::Unsupported(format!(
                    "allocation descriptor type {other}"
                )))
            }
        };

        Ok(FileEntry {
            file_type: icb_tag.file_type,
            information_length,
            modification_time,
            extent,
        })
    }

    pub fn is_directory(&self) -> bool {
        self.file_type == FILE_TYPE_DIRECTORY
    }
}

fn single_extent(
    ads: impl Iterator<Item = (zerocopy::little_endian::U32, u32)>,
    information_length: u64,
    partition_start: u64,
) -> ParseResult<Extent> {
    // a zero-length descriptor terminates the list
    let ads: Vec<_> = ads.take_while(|(length, _)| extent_length(*length) != 0).collect();

    match ads.as_slice() {
        [] if information_length == 0 => Ok(Extent {
            offset: 0,
            length: 0,
            embedded: false,
        }),
        [] => Err(FormatError::Truncated("allocation descriptors")),
        [(length, block)] => {
            if extent_type(*length) != EXTENT_RECORDED {
                return Err(FormatError::Unsupported(format!(
                    "extent of type {}",
                    extent_type(*length)
                )));
            }
            let recorded = u64::from(extent_length(*length));
            if information_length > recorded {
                return Err(FormatError::Unsupported(format!(
                    "information length {information_length} exceeds its single extent ({recorded} bytes)"
                )));
            }
            Ok(Extent {
                offset: (partition_start + u64::from(*block)) * SECTOR_SIZE as u64,
                length: information_length,
                embedded: false,
            })
        }
        many => Err(FormatError::Unsupported(format!(
            "multi-extent file ({} allocation descriptors)",
            many.len()
        ))),
    }
}

/// One decoded file identifier descriptor: a directory entry.
#[derive(Clone, Debug)]
pub struct FileIdentifier {
    pub name: String,
    pub characteristics: u8,
    pub icb: LongAd,
}

impl FileIdentifier {
    pub fn is_directory(&self) -> bool {
        self.characteristics & FID_CHARACTERISTIC_DIRECTORY != 0
    }

    pub fn is_deleted(&self) -> bool {
        self.characteristics & FID_CHARACTERISTIC_DELETED != 0
    }

    /// The parent placeholder, recorded with an empty identifier.
    pub fn is_parent(&self) -> bool {
        self.characteristics & FID_CHARACTERISTIC_PARENT != 0 || self.name.is_empty()
    }
}

/// Iterates the packed file identifier descriptors of a directory's content.
#[derive(Debug)]
pub struct FileIdentifiers<'d> {
    data: &'d [u8],
    position: usize,
    first_sector: u64,
}

impl<'d> FileIdentifiers<'d> {
    /// `data` is the directory content, trimmed to its declared length, which was read from
    /// absolute `first_sector` onwards.
    pub fn new(data: &'d [u8], first_sector: u64) -> Self {
        FileIdentifiers {
            data,
            position: 0,
            first_sector,
        }
    }

    fn parse_next(&mut self) -> ParseResult<FileIdentifier> {
        let record = &self.data[self.position..];
        let sector = self.first_sector + (self.position / SECTOR_SIZE) as u64;

        let tag = read_tag(record, sector)?;
        if tag.identifier.get() != TAG_FILE_IDENTIFIER {
            return Err(FormatError::UnexpectedTag {
                sector,
                expected: TAG_FILE_IDENTIFIER,
                found: tag.identifier.get(),
            });
        }

        let (header, rest) = FileIdentifierHeader::ref_from_prefix(record)
            .map_err(|_| FormatError::Truncated("file identifier descriptor"))?;
        let name_start = header.implementation_use_length.get() as usize;
        let name_end = name_start + header.identifier_length as usize;
        let name_bytes = rest
            .get(name_start..name_end)
            .ok_or(FormatError::Truncated("file identifier"))?;
        let name = decode_cs0(name_bytes)
            .map_err(|err| FormatError::InvalidIdentifier(format!("{err} at sector {sector}")))?;

        // the padding of the final record may fall outside of the declared length
        self.position = (self.position + header.record_length()).min(self.data.len());

        Ok(FileIdentifier {
            name,
            characteristics: header.characteristics,
            icb: header.icb,
        })
    }
}

impl Iterator for FileIdentifiers<'_> {
    type Item = ParseResult<FileIdentifier>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.data.len() {
            return None;
        }
        let result = self.parse_next();
        if result.is_err() {
            // no way to resynchronise after a bad record
            self.position = self.data.len();
        }
        Some(result)
    }
}
