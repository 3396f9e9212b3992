//! # Disk Image Module
//!
//! This provides the raw byte-level view of a ProDOS disk image file.
//! The image is held as a private in-memory copy, so nothing here ever
//! touches the file on disk after loading; callers that want to make a
//! change permanent must explicitly save the bytes back out.
//!
//! Two addressing schemes are supported.  Block addressing is the native
//! ProDOS scheme, 512 bytes per block.  Track-and-sector addressing is
//! the older DOS 3.3 (RWTS) scheme, 256 bytes per sector, 16 sectors per
//! track.  An image laid out in RWTS order can be rebuilt into block
//! order with `convert_rwts_to_block`, after which all block reads come
//! from the rebuilt buffer.

use log::{debug, error, trace};
use crate::{DYNERR, STDRESULT};

pub const BLOCK_SIZE: usize = 512;
pub const SECTOR_SIZE: usize = 256;
pub const TRACKS_PER_DISK: usize = 35;
pub const SECTORS_PER_TRACK: usize = 16;
pub const BLOCKS_PER_TRACK: usize = SECTORS_PER_TRACK / 2;

/// Enumerates image-level errors.  The `Display` trait will print the long message.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("image is not a regular file")]
    NotRegularFile,
    #[error("image size is not a positive multiple of block size")]
    SizeMismatch,
    #[error("invalid block number")]
    BlockOutOfRange,
    #[error("invalid track or sector number")]
    SectorOutOfRange,
    #[error("invalid image address")]
    AddressOutOfRange,
    #[error("image cannot be converted")]
    ConversionMismatch,
}

/// First sector of each block within a track, indexed by block % 8
const RWTS_SECTOR1: [usize; 8] = [0, 13, 11, 9, 7, 5, 3, 1];
/// Second sector of each block within a track, indexed by block % 8
const RWTS_SECTOR2: [usize; 8] = [14, 12, 10, 8, 6, 4, 2, 15];

/// In-memory image of one ProDOS volume.  Writes affect only the buffer;
/// use `to_bytes` to get the current state for saving.
pub struct Image {
    data: Vec<u8>,
    converted: bool,
}

impl Image {
    /// Load an image from a file.  The file must be a regular file whose
    /// size is a positive multiple of the block size.
    pub fn open(img_path: &str) -> Result<Self, DYNERR> {
        let meta = std::fs::metadata(img_path)?;
        if !meta.is_file() {
            return Err(Box::new(Error::NotRegularFile));
        }
        let data = std::fs::read(img_path)?;
        Self::from_bytes(data)
    }
    /// Wrap a byte buffer that is already in memory.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, DYNERR> {
        if data.len() == 0 || data.len() % BLOCK_SIZE != 0 {
            debug!("image size was {}", data.len());
            return Err(Box::new(Error::SizeMismatch));
        }
        Ok(Self {
            data,
            converted: false,
        })
    }
    pub fn num_blocks(&self) -> usize {
        self.data.len() / BLOCK_SIZE
    }
    pub fn len(&self) -> usize {
        self.data.len()
    }
    /// True once `convert_rwts_to_block` has run.
    pub fn is_converted(&self) -> bool {
        self.converted
    }
    /// Borrow the 512 bytes of block `iblock`.
    pub fn read_block(&self, iblock: usize) -> Result<&[u8], DYNERR> {
        if iblock >= self.num_blocks() {
            return Err(Box::new(Error::BlockOutOfRange));
        }
        Ok(&self.data[iblock * BLOCK_SIZE..(iblock + 1) * BLOCK_SIZE])
    }
    /// Overwrite block `iblock` in the in-memory buffer.  If `dat` is shorter
    /// than a block the trailing bytes are zeroed.
    pub fn write_block(&mut self, iblock: usize, dat: &[u8]) -> STDRESULT {
        if iblock >= self.num_blocks() {
            return Err(Box::new(Error::BlockOutOfRange));
        }
        let padded = quantize_block(dat, BLOCK_SIZE);
        self.data[iblock * BLOCK_SIZE..(iblock + 1) * BLOCK_SIZE].copy_from_slice(&padded);
        Ok(())
    }
    /// Borrow the 256 bytes at track `track`, logical sector `sector`,
    /// interpreting the raw image bytes in RWTS order.
    pub fn read_track_sector(&self, track: usize, sector: usize) -> Result<&[u8], DYNERR> {
        if track >= TRACKS_PER_DISK || sector >= SECTORS_PER_TRACK {
            return Err(Box::new(Error::SectorOutOfRange));
        }
        let offset = (track * SECTORS_PER_TRACK + sector) * SECTOR_SIZE;
        if offset + SECTOR_SIZE > self.data.len() {
            return Err(Box::new(Error::SectorOutOfRange));
        }
        Ok(&self.data[offset..offset + SECTOR_SIZE])
    }
    /// Rebuild the image from RWTS (DOS 3.3) sector order into ProDOS block
    /// order.  Block `i` is assembled from two sectors of track `i/8` using
    /// the interleave tables.  Runs at most once per image.
    pub fn convert_rwts_to_block(&mut self) -> STDRESULT {
        if self.converted {
            error!("image was already converted");
            return Err(Box::new(Error::ConversionMismatch));
        }
        if self.num_blocks() % BLOCKS_PER_TRACK != 0 {
            error!("image does not contain whole tracks");
            return Err(Box::new(Error::ConversionMismatch));
        }
        let mut base: Vec<u8> = Vec::with_capacity(self.data.len());
        for i in 0..self.num_blocks() {
            let track = i / BLOCKS_PER_TRACK;
            let sector1 = RWTS_SECTOR1[i % BLOCKS_PER_TRACK];
            let sector2 = RWTS_SECTOR2[i % BLOCKS_PER_TRACK];
            let src1 = (track * SECTORS_PER_TRACK + sector1) * SECTOR_SIZE;
            let src2 = (track * SECTORS_PER_TRACK + sector2) * SECTOR_SIZE;
            trace!(
                "assembling block {:03} from track {:02}, sectors {:02} and {:02}",
                i, track, sector1, sector2
            );
            base.extend_from_slice(&self.data[src1..src1 + SECTOR_SIZE]);
            base.extend_from_slice(&self.data[src2..src2 + SECTOR_SIZE]);
        }
        self.data = base;
        self.converted = true;
        Ok(())
    }
    /// Byte offset into the image of the given position, for diagnostics.
    pub fn to_offset(&self, iblock: usize, offset: usize) -> Result<usize, DYNERR> {
        if iblock >= self.num_blocks() || offset >= BLOCK_SIZE {
            return Err(Box::new(Error::AddressOutOfRange));
        }
        Ok(iblock * BLOCK_SIZE + offset)
    }
    /// Current state of the image bytes, suitable for saving.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.data.clone()
    }
}

/// If a data source is smaller than `quantum` bytes, pad it with zeros.
/// If it is larger, do not include the extra bytes.
pub fn quantize_block(src: &[u8], quantum: usize) -> Vec<u8> {
    let mut padded: Vec<u8> = Vec::new();
    for i in 0..quantum {
        if i < src.len() {
            padded.push(src[i])
        } else {
            padded.push(0);
        }
    }
    return padded;
}

#[test]
fn test_rwts_interleave() {
    // track 0 filled so that every sector holds its own number
    let mut data = vec![0; 280 * BLOCK_SIZE];
    for sec in 0..SECTORS_PER_TRACK {
        for j in 0..SECTOR_SIZE {
            data[sec * SECTOR_SIZE + j] = sec as u8;
        }
    }
    let mut img = Image::from_bytes(data).expect("bad image");
    img.convert_rwts_to_block().expect("conversion failed");
    for i in 0..BLOCKS_PER_TRACK {
        let buf = img.read_block(i).expect("bad block access");
        assert_eq!(buf[0], RWTS_SECTOR1[i] as u8);
        assert_eq!(buf[SECTOR_SIZE], RWTS_SECTOR2[i] as u8);
    }
}

#[test]
fn test_offsets() {
    let img = Image::from_bytes(vec![0; 280 * BLOCK_SIZE]).expect("bad image");
    assert_eq!(img.to_offset(2, 4).unwrap(), 1028);
    assert!(img.to_offset(280, 0).is_err());
    assert!(img.read_block(280).is_err());
    assert!(img.read_track_sector(35, 0).is_err());
    assert!(img.read_track_sector(0, 16).is_err());
}
