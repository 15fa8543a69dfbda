//! Builds small UDF images in memory, written through the crate's own format structures.
//!
//! Layout of a built image:
//!
//! - sectors 32..: main volume descriptor sequence (primary volume, partition, logical volume,
//!   terminating descriptor)
//! - sector 256: anchor volume descriptor pointer
//! - sector 260: partition start; block 0 holds the file set descriptor, block 1 the root
//!   directory's file entry, and everything else is allocated in tree order after that.  A
//!   directory's records directly follow its file entry, ahead of its children.

use zerocopy::{FromZeros, IntoBytes};

use udfstream::udf::format::{
    AnchorVolumeDescriptorPointer, DescriptorTag, ExtendedFileEntryHeader, ExtentAd,
    FileEntryHeader, FileIdentifierHeader, FileSetDescriptor, LogicalVolumeDescriptor, LongAd,
    PartitionDescriptor, PrimaryVolumeDescriptor, ShortAd, Timestamp, ANCHOR_SECTOR,
    FID_CHARACTERISTIC_DELETED, FID_CHARACTERISTIC_DIRECTORY, FID_CHARACTERISTIC_PARENT,
    FILE_TYPE_DIRECTORY, FILE_TYPE_REGULAR, ICB_AD_EMBEDDED, ICB_AD_LONG, ICB_AD_SHORT,
    SECTOR_SIZE, TAG_ANCHOR_POINTER, TAG_EXTENDED_FILE_ENTRY, TAG_FILE_ENTRY,
    TAG_FILE_IDENTIFIER, TAG_FILE_SET, TAG_LOGICAL_VOLUME, TAG_PARTITION, TAG_PRIMARY_VOLUME,
    TAG_TERMINATING,
};

pub const VDS_SECTOR: u64 = 32;
pub const PARTITION_START: u64 = 260;

/// The modification time recorded on every entry: 2021-05-10 12:34:56 UTC.
pub const MTIME_UNIX: i64 = 1620650096;

pub const VOLUME_IDENTIFIER: &str = "TEST_VOLUME";
pub const LOGICAL_VOLUME_IDENTIFIER: &str = "TEST_LOGICAL_VOLUME";
pub const FILE_SET_IDENTIFIER: &str = "TEST_FILE_SET";

/// How a file's content is recorded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Allocation {
    /// File entry with one short_ad.
    Short,
    /// File entry with one long_ad.
    Long,
    /// Content stored inside the file entry.
    Embedded,
    /// Extended file entry with one short_ad.
    Extended,
    /// Content split over two extents.
    MultiExtent,
}

enum Node {
    File {
        name: String,
        data: Vec<u8>,
        allocation: Allocation,
    },
    Directory {
        name: String,
        children: Vec<Node>,
    },
    Deleted {
        name: String,
    },
}

impl Node {
    fn name(&self) -> &str {
        match self {
            Node::File { name, .. } | Node::Directory { name, .. } | Node::Deleted { name } => name,
        }
    }
}

pub struct UdfBuilder {
    root: Vec<Node>,
    anchor_tag: u16,
    corrupt_anchor: bool,
    partition: bool,
    logical_volume: bool,
    terminated: bool,
    block_size: u32,
}

impl Default for UdfBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn split_path(path: &str) -> (Vec<&str>, &str) {
    let mut components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
    let name = components.pop().expect("empty path");
    (components, name)
}

fn children_mut<'a>(mut children: &'a mut Vec<Node>, components: &[&str]) -> &'a mut Vec<Node> {
    for component in components {
        let found = children
            .iter()
            .position(|node| matches!(node, Node::Directory { name, .. } if name == component));
        let index = match found {
            Some(index) => index,
            None => {
                children.push(Node::Directory {
                    name: component.to_string(),
                    children: vec![],
                });
                children.len() - 1
            }
        };
        children = match &mut children[index] {
            Node::Directory { children, .. } => children,
            _ => unreachable!(),
        };
    }
    children
}

impl UdfBuilder {
    pub fn new() -> Self {
        UdfBuilder {
            root: vec![],
            anchor_tag: TAG_ANCHOR_POINTER,
            corrupt_anchor: false,
            partition: true,
            logical_volume: true,
            terminated: true,
            block_size: SECTOR_SIZE as u32,
        }
    }

    /// Adds an (empty) directory, creating any missing parents.
    pub fn dir(mut self, path: &str) -> Self {
        let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
        children_mut(&mut self.root, &components);
        self
    }

    pub fn file(self, path: &str, data: &[u8]) -> Self {
        self.file_with(path, data, Allocation::Short)
    }

    /// Adds a file, creating any missing parents.  Adding the same path twice records two
    /// entries with the same name.
    pub fn file_with(mut self, path: &str, data: &[u8], allocation: Allocation) -> Self {
        let (parents, name) = split_path(path);
        children_mut(&mut self.root, &parents).push(Node::File {
            name: name.to_string(),
            data: data.to_vec(),
            allocation,
        });
        self
    }

    /// Records a deleted file identifier.
    pub fn deleted(mut self, path: &str) -> Self {
        let (parents, name) = split_path(path);
        children_mut(&mut self.root, &parents).push(Node::Deleted {
            name: name.to_string(),
        });
        self
    }

    pub fn anchor_tag(mut self, identifier: u16) -> Self {
        self.anchor_tag = identifier;
        self
    }

    pub fn corrupt_anchor_checksum(mut self) -> Self {
        self.corrupt_anchor = true;
        self
    }

    pub fn without_partition(mut self) -> Self {
        self.partition = false;
        self
    }

    pub fn without_logical_volume(mut self) -> Self {
        self.logical_volume = false;
        self
    }

    /// Leaves out the terminating descriptor; the sequence extent then covers exactly the
    /// descriptors that were written.
    pub fn without_terminator(mut self) -> Self {
        self.terminated = false;
        self
    }

    pub fn block_size(mut self, block_size: u32) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut image = Image::default();

        let fsd_block = image.allocate(SECTOR_SIZE);
        let root_block = layout_directory(&mut image, &self.root, None);
        assert_eq!(root_block, 1);

        let mut fsd = FileSetDescriptor::new_zeroed();
        fsd.tag = tag(TAG_FILE_SET, fsd_block);
        fsd.recording_time = timestamp();
        fsd.interchange_level = 3.into();
        fsd.max_interchange_level = 3.into();
        fsd.charset_list = 1.into();
        fsd.max_charset_list = 1.into();
        fsd.logical_volume_identifier = dstring(LOGICAL_VOLUME_IDENTIFIER);
        fsd.file_set_identifier = dstring(FILE_SET_IDENTIFIER);
        fsd.root_directory_icb.length = (SECTOR_SIZE as u32).into();
        fsd.root_directory_icb.location.block = root_block.into();
        image.write_block(fsd_block, fsd.as_bytes());

        let mut sector = VDS_SECTOR;

        let mut pvd = PrimaryVolumeDescriptor::new_zeroed();
        pvd.tag = tag(TAG_PRIMARY_VOLUME, sector as u32);
        pvd.volume_identifier = dstring(VOLUME_IDENTIFIER);
        image.write(sector, pvd.as_bytes());
        sector += 1;

        if self.partition {
            let mut pd = PartitionDescriptor::new_zeroed();
            pd.tag = tag(TAG_PARTITION, sector as u32);
            pd.sequence_number = 1.into();
            pd.flags = 1.into();
            pd.access_type = 1.into();
            pd.starting_location = (PARTITION_START as u32).into();
            pd.length = image.next_block.into();
            image.write(sector, pd.as_bytes());
            sector += 1;
        }

        if self.logical_volume {
            let mut lvd = LogicalVolumeDescriptor::new_zeroed();
            lvd.tag = tag(TAG_LOGICAL_VOLUME, sector as u32);
            lvd.sequence_number = 2.into();
            lvd.logical_volume_identifier = dstring(LOGICAL_VOLUME_IDENTIFIER);
            lvd.logical_block_size = self.block_size.into();
            lvd.file_set_location.length = (SECTOR_SIZE as u32).into();
            lvd.file_set_location.location.block = fsd_block.into();
            image.write(sector, lvd.as_bytes());
            sector += 1;
        }

        let sequence_sectors = if self.terminated {
            image.write(sector, tag(TAG_TERMINATING, sector as u32).as_bytes());
            16
        } else {
            sector - VDS_SECTOR
        };

        let mut avdp = AnchorVolumeDescriptorPointer::new_zeroed();
        avdp.tag = tag(self.anchor_tag, ANCHOR_SECTOR as u32);
        if self.corrupt_anchor {
            avdp.tag.checksum = avdp.tag.checksum.wrapping_add(1);
        }
        avdp.main_sequence = ExtentAd {
            length: ((sequence_sectors as usize * SECTOR_SIZE) as u32).into(),
            location: (VDS_SECTOR as u32).into(),
        };
        avdp.reserve_sequence = avdp.main_sequence;
        image.write(ANCHOR_SECTOR, avdp.as_bytes());

        let len = image.data.len().next_multiple_of(SECTOR_SIZE);
        image.data.resize(len, 0);
        image.data
    }
}

/// A typical installation-disc layout, with every allocation form represented.
pub fn sample() -> UdfBuilder {
    UdfBuilder::new()
        .file("setup.exe", &pattern(3000, 1))
        .file_with("autorun.inf", b"[autorun]\r\nopen=setup.exe\r\n", Allocation::Embedded)
        .file("sources/install.wim", &pattern(INSTALL_WIM_SIZE, 2))
        .file_with("sources/boot.wim", &pattern(10000, 3), Allocation::Long)
        .file_with("efi/boot/bootx64.efi", &pattern(4096, 4), Allocation::Extended)
        .file("empty.txt", b"")
        .dir("support")
}

/// Larger than the HTTP cache window, not a multiple of the sector size.
pub const INSTALL_WIM_SIZE: usize = (5 << 20) + 123;

/// Deterministic, non-repeating-per-sector test content.
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| ((i % 251) as u8).wrapping_add((i / 2048) as u8).wrapping_mul(seed | 1))
        .collect()
}

pub fn tag(identifier: u16, location: u32) -> DescriptorTag {
    let mut tag = DescriptorTag::new_zeroed();
    tag.identifier = identifier.into();
    tag.version = 2.into();
    tag.location = location.into();
    tag.checksum = tag.compute_checksum();
    tag
}

pub fn timestamp() -> Timestamp {
    Timestamp {
        type_and_timezone: 0x1000.into(),
        year: 2021.into(),
        month: 5,
        day: 10,
        hour: 12,
        minute: 34,
        second: 56,
        centiseconds: 0,
        hundreds_of_microseconds: 0,
        microseconds: 0,
    }
}

fn dstring<const N: usize>(text: &str) -> [u8; N] {
    let mut field = [0u8; N];
    field[0] = 8;
    field[1..=text.len()].copy_from_slice(text.as_bytes());
    field[N - 1] = (text.len() + 1) as u8;
    field
}

/// OSTA CS0: 8-bit when every character fits, UTF-16BE otherwise.
fn cs0(name: &str) -> Vec<u8> {
    if name.chars().all(|c| (c as u32) < 0x100) {
        std::iter::once(8)
            .chain(name.chars().map(|c| c as u8))
            .collect()
    } else {
        std::iter::once(16)
            .chain(name.encode_utf16().flat_map(u16::to_be_bytes))
            .collect()
    }
}

fn fid(characteristics: u8, name: &str, block: u32) -> Vec<u8> {
    let identifier = if name.is_empty() { vec![] } else { cs0(name) };

    let mut header = FileIdentifierHeader::new_zeroed();
    header.tag = tag(TAG_FILE_IDENTIFIER, 0);
    header.file_version_number = 1.into();
    header.characteristics = characteristics;
    header.identifier_length = identifier.len() as u8;
    header.icb.length = (SECTOR_SIZE as u32).into();
    header.icb.location.block = block.into();

    let mut record = header.as_bytes().to_vec();
    record.extend(identifier);
    record.resize(header.record_length(), 0);
    record
}

#[derive(Default)]
struct Image {
    data: Vec<u8>,
    next_block: u32,
}

impl Image {
    fn write(&mut self, sector: u64, bytes: &[u8]) {
        let start = sector as usize * SECTOR_SIZE;
        let end = start + bytes.len();
        if self.data.len() < end {
            self.data.resize(end, 0);
        }
        self.data[start..end].copy_from_slice(bytes);
    }

    fn write_block(&mut self, block: u32, bytes: &[u8]) {
        self.write(PARTITION_START + u64::from(block), bytes);
    }

    /// Reserves enough whole blocks for `len` bytes (at least one).
    fn allocate(&mut self, len: usize) -> u32 {
        let block = self.next_block;
        self.next_block += len.div_ceil(SECTOR_SIZE).max(1) as u32;
        block
    }

    /// Records `content` in freshly allocated blocks, returning the allocation descriptor.
    fn record(&mut self, content: &[u8]) -> (u32, u32) {
        let block = self.allocate(content.len());
        self.write_block(block, content);
        (content.len() as u32, block)
    }
}

fn layout_directory(image: &mut Image, children: &[Node], parent: Option<u32>) -> u32 {
    let block = image.allocate(SECTOR_SIZE);

    // the records only depend on the names, so the data can be placed before the children
    let length: usize = fid(0, "", 0).len()
        + children
            .iter()
            .map(|child| fid(0, child.name(), 0).len())
            .sum::<usize>();
    let data_block = image.allocate(length);

    let mut records = fid(
        FID_CHARACTERISTIC_DIRECTORY | FID_CHARACTERISTIC_PARENT,
        "",
        parent.unwrap_or(block),
    );
    for child in children {
        match child {
            Node::File {
                name,
                data,
                allocation,
            } => {
                let child_block = image.allocate(SECTOR_SIZE);
                write_file(image, child_block, data, *allocation);
                records.extend(fid(0, name, child_block));
            }
            Node::Directory { name, children } => {
                let child_block = layout_directory(image, children, Some(block));
                records.extend(fid(FID_CHARACTERISTIC_DIRECTORY, name, child_block));
            }
            Node::Deleted { name } => {
                records.extend(fid(FID_CHARACTERISTIC_DELETED, name, 0));
            }
        }
    }
    assert_eq!(records.len(), length);

    image.write_block(data_block, &records);
    let ad = ShortAd {
        length: (length as u32).into(),
        position: data_block.into(),
    };
    write_entry(
        image,
        block,
        FILE_TYPE_DIRECTORY,
        length as u64,
        false,
        ICB_AD_SHORT,
        ad.as_bytes(),
    );
    block
}

fn write_file(image: &mut Image, block: u32, content: &[u8], allocation: Allocation) {
    let short_ads = |image: &mut Image, pieces: &[&[u8]]| -> Vec<u8> {
        let mut ads = vec![];
        for piece in pieces.iter().filter(|piece| !piece.is_empty()) {
            let (length, position) = image.record(piece);
            let ad = ShortAd {
                length: length.into(),
                position: position.into(),
            };
            ads.extend_from_slice(ad.as_bytes());
        }
        ads
    };

    let (ad_type, ads) = match allocation {
        Allocation::Short | Allocation::Extended => (ICB_AD_SHORT, short_ads(image, &[content])),
        Allocation::MultiExtent => {
            let (first, second) = content.split_at(content.len().min(SECTOR_SIZE));
            (ICB_AD_SHORT, short_ads(image, &[first, second]))
        }
        Allocation::Long => {
            let mut ads = vec![];
            if !content.is_empty() {
                let (length, block) = image.record(content);
                let mut ad = LongAd::new_zeroed();
                ad.length = length.into();
                ad.location.block = block.into();
                ads.extend_from_slice(ad.as_bytes());
            }
            (ICB_AD_LONG, ads)
        }
        Allocation::Embedded => (ICB_AD_EMBEDDED, content.to_vec()),
    };

    write_entry(
        image,
        block,
        FILE_TYPE_REGULAR,
        content.len() as u64,
        allocation == Allocation::Extended,
        ad_type,
        &ads,
    );
}

fn write_entry(
    image: &mut Image,
    block: u32,
    file_type: u8,
    information_length: u64,
    extended: bool,
    ad_type: u16,
    ads: &[u8],
) {
    let mut sector = if extended {
        let mut efe = ExtendedFileEntryHeader::new_zeroed();
        efe.tag = tag(TAG_EXTENDED_FILE_ENTRY, block);
        efe.icb_tag.strategy_type = 4.into();
        efe.icb_tag.file_type = file_type;
        efe.icb_tag.flags = ad_type.into();
        efe.link_count = 1.into();
        efe.information_length = information_length.into();
        efe.object_size = information_length.into();
        efe.modification_time = timestamp();
        efe.allocation_descriptors_length = (ads.len() as u32).into();
        efe.as_bytes().to_vec()
    } else {
        let mut fe = FileEntryHeader::new_zeroed();
        fe.tag = tag(TAG_FILE_ENTRY, block);
        fe.icb_tag.strategy_type = 4.into();
        fe.icb_tag.file_type = file_type;
        fe.icb_tag.flags = ad_type.into();
        fe.link_count = 1.into();
        fe.information_length = information_length.into();
        fe.modification_time = timestamp();
        fe.allocation_descriptors_length = (ads.len() as u32).into();
        fe.as_bytes().to_vec()
    };
    sector.extend_from_slice(ads);
    assert!(sector.len() <= SECTOR_SIZE, "file entry overflows its block");

    image.write_block(block, &sector);
}
