//! UDF / ECMA-167 on-disk format definitions.
//!
//! All structures are little-endian and unaligned, defined with zerocopy so that they can be
//! borrowed straight out of a sector buffer.  Only the leading part of the larger volume
//! descriptors is modelled: the fields after the ones this crate uses are never read, and
//! `ref_from_prefix()` happily ignores them.

use zerocopy::{
    little_endian::{I16, U16, U32, U64},
    FromBytes, Immutable, IntoBytes, KnownLayout,
};

pub const SECTOR_BITS: u8 = 11;
pub const SECTOR_SIZE: usize = 1 << SECTOR_BITS;

/// The anchor volume descriptor pointer is always recorded at this sector.
pub const ANCHOR_SECTOR: u64 = 256;

/* Tag identifiers (ECMA-167 3/7.2.1 and 4/7.2.1) */

pub const TAG_PRIMARY_VOLUME: u16 = 1;
pub const TAG_ANCHOR_POINTER: u16 = 2;
pub const TAG_VOLUME_POINTER: u16 = 3;
pub const TAG_IMPLEMENTATION_USE: u16 = 4;
pub const TAG_PARTITION: u16 = 5;
pub const TAG_LOGICAL_VOLUME: u16 = 6;
pub const TAG_UNALLOCATED_SPACE: u16 = 7;
pub const TAG_TERMINATING: u16 = 8;
pub const TAG_LOGICAL_VOLUME_INTEGRITY: u16 = 9;
pub const TAG_FILE_SET: u16 = 256;
pub const TAG_FILE_IDENTIFIER: u16 = 257;
pub const TAG_FILE_ENTRY: u16 = 261;
pub const TAG_EXTENDED_FILE_ENTRY: u16 = 266;

/* Descriptor tag */

#[derive(Clone, Copy, Debug, FromBytes, Immutable, IntoBytes, KnownLayout, PartialEq)]
#[repr(C)]
pub struct DescriptorTag {
    pub identifier: U16,
    pub version: U16,
    pub checksum: u8,
    pub reserved: u8,
    pub serial_number: U16,
    pub crc: U16,
    pub crc_length: U16,
    pub location: U32,
}

impl DescriptorTag {
    /// The tag checksum is the byte-wise sum of the other 15 bytes of the tag.
    pub fn compute_checksum(&self) -> u8 {
        self.as_bytes()
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != 4)
            .fold(0u8, |sum, (_, b)| sum.wrapping_add(*b))
    }

    pub fn is_valid(&self) -> bool {
        self.checksum == self.compute_checksum()
    }
}

/* Addresses and allocation descriptors */

#[derive(Clone, Copy, Debug, FromBytes, Immutable, IntoBytes, KnownLayout, PartialEq)]
#[repr(C)]
pub struct ExtentAd {
    pub length: U32,
    pub location: U32,
}

#[derive(Clone, Copy, Debug, FromBytes, Immutable, IntoBytes, KnownLayout, PartialEq)]
#[repr(C)]
pub struct LbAddr {
    pub block: U32,
    pub partition: U16,
}

#[derive(Clone, Copy, Debug, FromBytes, Immutable, IntoBytes, KnownLayout, PartialEq)]
#[repr(C)]
pub struct ShortAd {
    pub length: U32,
    pub position: U32,
}

#[derive(Clone, Copy, Debug, FromBytes, Immutable, IntoBytes, KnownLayout, PartialEq)]
#[repr(C)]
pub struct LongAd {
    pub length: U32,
    pub location: LbAddr,
    pub implementation_use: [u8; 6],
}

// The two high bits of an allocation descriptor's length field give the extent type.
pub const EXTENT_LENGTH_MASK: u32 = 0x3fff_ffff;
pub const EXTENT_TYPE_SHIFT: u32 = 30;
pub const EXTENT_RECORDED: u32 = 0;
pub const EXTENT_NOT_RECORDED: u32 = 1;
pub const EXTENT_NOT_ALLOCATED: u32 = 2;
pub const EXTENT_CONTINUATION: u32 = 3;

pub fn extent_type(length: U32) -> u32 {
    length.get() >> EXTENT_TYPE_SHIFT
}

pub fn extent_length(length: U32) -> u32 {
    length.get() & EXTENT_LENGTH_MASK
}

/* Timestamp (1/7.3) */

#[derive(Clone, Copy, Debug, FromBytes, Immutable, IntoBytes, KnownLayout, PartialEq)]
#[repr(C)]
pub struct Timestamp {
    pub type_and_timezone: U16,
    pub year: I16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub centiseconds: u8,
    pub hundreds_of_microseconds: u8,
    pub microseconds: u8,
}

const TIMEZONE_UNSPECIFIED: i16 = -2047;

impl Timestamp {
    /// Converts to a calendar time, or None if the timestamp is unset or invalid.
    ///
    /// Timestamps without a recorded timezone are taken to be UTC.
    pub fn to_datetime(&self) -> Option<time::OffsetDateTime> {
        let type_and_timezone = self.type_and_timezone.get();

        // 0 = UTC, 1 = local time; anything else is implementation-specific
        if type_and_timezone >> 12 > 1 || (self.year.get() == 0 && self.month == 0) {
            return None;
        }

        // 12-bit two's complement offset in minutes
        let raw = (type_and_timezone & 0x0fff) as i16;
        let minutes = if raw & 0x0800 != 0 { raw - 0x1000 } else { raw };
        let offset = match minutes {
            TIMEZONE_UNSPECIFIED => time::UtcOffset::UTC,
            -1440..=1440 => time::UtcOffset::from_whole_seconds(i32::from(minutes) * 60).ok()?,
            _ => return None,
        };

        if self.centiseconds > 99 || self.hundreds_of_microseconds > 99 || self.microseconds > 99
        {
            return None;
        }
        let micros = u32::from(self.centiseconds) * 10_000
            + u32::from(self.hundreds_of_microseconds) * 100
            + u32::from(self.microseconds);

        let date = time::Date::from_calendar_date(
            i32::from(self.year.get()),
            time::Month::try_from(self.month).ok()?,
            self.day,
        )
        .ok()?;
        let clock =
            time::Time::from_hms_micro(self.hour, self.minute, self.second, micros).ok()?;

        Some(time::PrimitiveDateTime::new(date, clock).assume_offset(offset))
    }
}

/* Volume structures (part 3) */

#[derive(Debug, FromBytes, Immutable, IntoBytes, KnownLayout)]
#[repr(C)]
pub struct AnchorVolumeDescriptorPointer {
    pub tag: DescriptorTag,
    pub main_sequence: ExtentAd,
    pub reserve_sequence: ExtentAd,
}

#[derive(Debug, FromBytes, Immutable, IntoBytes, KnownLayout)]
#[repr(C)]
pub struct PrimaryVolumeDescriptor {
    pub tag: DescriptorTag,
    pub sequence_number: U32,
    pub primary_volume_number: U32,
    pub volume_identifier: [u8; 32],
}

#[derive(Debug, FromBytes, Immutable, IntoBytes, KnownLayout)]
#[repr(C)]
pub struct PartitionDescriptor {
    pub tag: DescriptorTag,
    pub sequence_number: U32,
    pub flags: U16,
    pub partition_number: U16,
    pub contents: [u8; 32],
    pub contents_use: [u8; 128],
    pub access_type: U32,
    pub starting_location: U32,
    pub length: U32,
}

#[derive(Debug, FromBytes, Immutable, IntoBytes, KnownLayout)]
#[repr(C)]
pub struct LogicalVolumeDescriptor {
    pub tag: DescriptorTag,
    pub sequence_number: U32,
    pub descriptor_charset: [u8; 64],
    pub logical_volume_identifier: [u8; 128],
    pub logical_block_size: U32,
    pub domain_identifier: [u8; 32],
    /// The "logical volume contents use" field, which UDF defines as the location of the
    /// file set descriptor.
    pub file_set_location: LongAd,
}

/* File structures (part 4) */

#[derive(Debug, FromBytes, Immutable, IntoBytes, KnownLayout)]
#[repr(C)]
pub struct FileSetDescriptor {
    pub tag: DescriptorTag,
    pub recording_time: Timestamp,
    pub interchange_level: U16,
    pub max_interchange_level: U16,
    pub charset_list: U32,
    pub max_charset_list: U32,
    pub file_set_number: U32,
    pub file_set_descriptor_number: U32,
    pub logical_volume_identifier_charset: [u8; 64],
    pub logical_volume_identifier: [u8; 128],
    pub file_set_charset: [u8; 64],
    pub file_set_identifier: [u8; 32],
    pub copyright_file_identifier: [u8; 32],
    pub abstract_file_identifier: [u8; 32],
    pub root_directory_icb: LongAd,
}

pub const FILE_TYPE_DIRECTORY: u8 = 4;
pub const FILE_TYPE_REGULAR: u8 = 5;
pub const FILE_TYPE_SYMLINK: u8 = 12;

const ICB_FLAGS_AD_MASK: u16 = 0b111;
pub const ICB_AD_SHORT: u16 = 0;
pub const ICB_AD_LONG: u16 = 1;
pub const ICB_AD_EXTENDED: u16 = 2;
pub const ICB_AD_EMBEDDED: u16 = 3;

#[derive(Clone, Copy, Debug, FromBytes, Immutable, IntoBytes, KnownLayout, PartialEq)]
#[repr(C)]
pub struct IcbTag {
    pub prior_direct_entries: U32,
    pub strategy_type: U16,
    pub strategy_parameter: [u8; 2],
    pub max_entries: U16,
    pub reserved: u8,
    pub file_type: u8,
    pub parent_icb: LbAddr,
    pub flags: U16,
}

impl IcbTag {
    pub fn allocation_type(&self) -> u16 {
        self.flags.get() & ICB_FLAGS_AD_MASK
    }
}

#[derive(Debug, FromBytes, Immutable, IntoBytes, KnownLayout)]
#[repr(C)]
pub struct FileEntryHeader {
    pub tag: DescriptorTag,
    pub icb_tag: IcbTag,
    pub uid: U32,
    pub gid: U32,
    pub permissions: U32,
    pub link_count: U16,
    pub record_format: u8,
    pub record_display_attributes: u8,
    pub record_length: U32,
    pub information_length: U64,
    pub logical_blocks_recorded: U64,
    pub access_time: Timestamp,
    pub modification_time: Timestamp,
    pub attribute_time: Timestamp,
    pub checkpoint: U32,
    pub extended_attribute_icb: LongAd,
    pub implementation_identifier: [u8; 32],
    pub unique_id: U64,
    pub extended_attributes_length: U32,
    pub allocation_descriptors_length: U32,
}

#[derive(Debug, FromBytes, Immutable, IntoBytes, KnownLayout)]
#[repr(C)]
pub struct ExtendedFileEntryHeader {
    pub tag: DescriptorTag,
    pub icb_tag: IcbTag,
    pub uid: U32,
    pub gid: U32,
    pub permissions: U32,
    pub link_count: U16,
    pub record_format: u8,
    pub record_display_attributes: u8,
    pub record_length: U32,
    pub information_length: U64,
    pub object_size: U64,
    pub logical_blocks_recorded: U64,
    pub access_time: Timestamp,
    pub modification_time: Timestamp,
    pub creation_time: Timestamp,
    pub attribute_time: Timestamp,
    pub checkpoint: U32,
    pub reserved: U32,
    pub extended_attribute_icb: LongAd,
    pub stream_directory_icb: LongAd,
    pub implementation_identifier: [u8; 32],
    pub unique_id: U64,
    pub extended_attributes_length: U32,
    pub allocation_descriptors_length: U32,
}

pub const FID_CHARACTERISTIC_HIDDEN: u8 = 1 << 0;
pub const FID_CHARACTERISTIC_DIRECTORY: u8 = 1 << 1;
pub const FID_CHARACTERISTIC_DELETED: u8 = 1 << 2;
pub const FID_CHARACTERISTIC_PARENT: u8 = 1 << 3;

#[derive(Debug, FromBytes, Immutable, IntoBytes, KnownLayout)]
#[repr(C)]
pub struct FileIdentifierHeader {
    pub tag: DescriptorTag,
    pub file_version_number: U16,
    pub characteristics: u8,
    pub identifier_length: u8,
    pub icb: LongAd,
    pub implementation_use_length: U16,
}

impl FileIdentifierHeader {
    /// Size of the whole record: header, implementation use, identifier, padded to 4 bytes.
    pub fn record_length(&self) -> usize {
        let unpadded = size_of::<Self>()
            + self.implementation_use_length.get() as usize
            + self.identifier_length as usize;
        unpadded.next_multiple_of(4)
    }
}

/* OSTA compressed unicode (UDF 2.1.1) */

pub const CS0_COMPRESSION_8BIT: u8 = 8;
pub const CS0_COMPRESSION_16BIT: u8 = 16;

/// Why an OSTA CS0 string could not be decoded.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum Cs0Error {
    #[error("unknown compression id {0}")]
    UnknownCompression(u8),
}

/// Decodes a compressed-unicode identifier: a compression id byte followed by either 8-bit
/// characters or big-endian UTF-16 code units.  An empty slice is the empty string.
pub fn decode_cs0(data: &[u8]) -> Result<String, Cs0Error> {
    let Some((&compression, chars)) = data.split_first() else {
        return Ok(String::new());
    };

    match compression {
        CS0_COMPRESSION_8BIT => Ok(chars.iter().map(|&c| char::from(c)).collect()),
        CS0_COMPRESSION_16BIT => Ok(char::decode_utf16(
            chars
                .chunks_exact(2)
                .map(|unit| u16::from_be_bytes([unit[0], unit[1]])),
        )
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()),
        other => Err(Cs0Error::UnknownCompression(other)),
    }
}

/// Decodes a fixed-size dstring field, whose last byte holds the recorded length.
pub fn decode_dstring(field: &[u8]) -> Result<String, Cs0Error> {
    match field.split_last() {
        Some((&len, data)) if len != 0 => decode_cs0(&data[..(len as usize).min(data.len())]),
        _ => Ok(String::new()),
    }
}
