
//! ### ProDOS file access
//!
//! A `FileHandle` reads the blocks of one seedling, sapling, or tree
//! file through the index block indirection, presenting the file as a
//! seekable stream of bytes.  A zero pointer anywhere in an index is a
//! sparse hole and reads as zeros.

use super::directory::{Entry, HasName};
use super::types::*;
use super::{set_error, Volume};

const BYTES_PER_INDEX_BLOCK: usize = BLOCK_SIZE * 256;

/// Assemble the 16-bit pointer at `idx` from the parallel lo/hi arrays
/// of an index block.  Out of range slots read as sparse, which keeps a
/// seek to the exact end of file in bounds.
fn index_ptr_at(block: &[u8], idx: usize) -> u16 {
    match idx < 256 {
        true => (block[idx + 256] as u16) << 8 | block[idx] as u16,
        false => 0,
    }
}

/// Byte-granular reader over one file entry.  Holds the currently
/// resolved master/index/data blocks and the read position.  Not
/// shareable between threads.
pub struct FileHandle<'v> {
    vol: &'v Volume,
    entry: Entry,
    master: Option<&'v [u8]>,
    index: Option<&'v [u8]>,
    data: &'v [u8],
    position: usize,
}

impl<'v> FileHandle<'v> {
    pub(crate) fn open(vol: &'v Volume, entry: Entry) -> Result<Self, Error> {
        let key_ptr = entry.key_ptr();
        let (master, index, data) = match entry.storage_type() {
            t if t == StorageType::Seedling as u8 => (None, None, vol.get_block(key_ptr)?),
            t if t == StorageType::Sapling as u8 => {
                let index = vol.get_block(key_ptr)?;
                (None, Some(index), vol.get_block(index_ptr_at(index, 0))?)
            }
            t if t == StorageType::Tree as u8 => {
                let master = vol.get_block(key_ptr)?;
                let index = vol.get_block(index_ptr_at(master, 0))?;
                (Some(master), Some(index), vol.get_block(index_ptr_at(index, 0))?)
            }
            _ => return super::fail(Error::UnsupportedStorageType),
        };
        Ok(Self {
            vol,
            entry,
            master,
            index,
            data,
            position: 0,
        })
    }
    /// the file type byte, e.g. to decide end-of-line translation for text files
    pub fn file_type(&self) -> u8 {
        self.entry.ftype()
    }
    pub fn eof(&self) -> bool {
        self.position == self.entry.eof()
    }
    pub fn position(&self) -> usize {
        self.position
    }
    pub fn entry(&self) -> &Entry {
        &self.entry
    }
    /// Move the read position to `offset` from the start of the file and
    /// re-resolve the master/index/data blocks.  Anything beyond the end
    /// of file is out of range.
    pub fn seek(&mut self, offset: usize) -> Result<usize, Error> {
        if offset > self.entry.eof() {
            return super::fail(Error::PositionOutOfRange);
        }
        self.position = offset;
        let mut rel = offset;
        if let Some(master) = self.master {
            let i = rel / BYTES_PER_INDEX_BLOCK;
            rel -= i * BYTES_PER_INDEX_BLOCK;
            self.index = Some(self.vol.get_block(index_ptr_at(master, i))?);
        }
        if let Some(index) = self.index {
            let i = rel / BLOCK_SIZE;
            self.data = self.vol.get_block(index_ptr_at(index, i))?;
        }
        Ok(offset)
    }
    /// Copy bytes from the current position into `buf`, advancing the
    /// position.  The count returned may be less than requested at end
    /// of file, but is never zero before it.  Reading at end of file
    /// returns zero and sets the `EndOfFile` sentinel.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        let eof = self.entry.eof();
        let want = match buf.len() < eof - self.position {
            true => buf.len(),
            false => eof - self.position,
        };
        if want == 0 && buf.len() > 0 {
            set_error(Error::EndOfFile);
            return Ok(0);
        }
        let mut count: usize = 0;
        while count < want {
            let block_offset = self.position % BLOCK_SIZE;
            let mut n = BLOCK_SIZE - block_offset;
            if n > want - count {
                n = want - count;
            }
            buf[count..count + n].copy_from_slice(&self.data[block_offset..block_offset + n]);
            count += n;
            self.seek(self.position + n)?;
        }
        Ok(count)
    }
    /// Read the whole file from the beginning.
    pub fn read_to_end(&mut self) -> Result<Vec<u8>, Error> {
        self.seek(0)?;
        let mut buf = vec![0; self.entry.eof()];
        let n = match buf.len() {
            0 => 0,
            _ => self.read(&mut buf)?,
        };
        buf.truncate(n);
        Ok(buf)
    }
}

#[test]
fn test_index_ptr() {
    let mut block = [0u8; 512];
    block[0] = 0x34;
    block[256] = 0x12;
    block[255] = 0x01;
    block[511] = 0xff;
    assert_eq!(index_ptr_at(&block, 0), 0x1234);
    assert_eq!(index_ptr_at(&block, 255), 0xff01);
    assert_eq!(index_ptr_at(&block, 1), 0);
    assert_eq!(index_ptr_at(&block, 256), 0);
}
