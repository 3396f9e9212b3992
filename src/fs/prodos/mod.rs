//! ## ProDOS file system module
//!
//! This reads disk images containing one ProDOS 8 volume.
//!
//! * Single volume images only
//! * Reading only; the in-memory image is touched just three ways:
//!   deobfuscation of a password protected volume directory, conversion
//!   of a DOS 3.3 ordered image into block order, and volume rename
//!
//! The volume directory is located by a cascade: block 2 as-is, block 2
//! deobfuscated, the (track 0, sector 11) candidate followed by sector
//! order conversion, and finally conversion combined with deobfuscation.
//! Errors during normal operations are reported through a thread local
//! sentinel holding the ProDOS error code, mirroring the way ProDOS 8
//! itself reports MLI errors.

mod directory;
mod file;
pub mod types;

use log::{debug, error, info, warn};
use std::cell::Cell;
use std::collections::BTreeMap;
use std::io::Read;
use a2kit_macro::DiskStruct;

use crate::img::Image;
use crate::{DYNERR, STDRESULT};
use types::*;

pub use directory::{
    appleworks_file_name, is_name_valid, le16, le24, DirectoryHandle, Entry, HasName,
    SubDirHeader, Timestamp, VolDirHeader, VolumeEntry,
};
use directory::{Directory, EntryBlock, HasEntries, Header, KeyBlock};
pub use file::FileHandle;

pub const FS_NAME: &str = "prodos";
/// Environment variable naming the password file for protected volumes.
pub const PASSWORD_FILE_VAR: &str = "PRODOSFS_PASSWORD_FILE";
/// Reserved name of the synthesized catalog pseudo file.
pub const CATALOG_FILE_NAME: &str = ".CATALOG";

/// Read-only constant handed out for sparse blocks; callers must not
/// mutate the returned slice.
static SPARSE_BLOCK: [u8; BLOCK_SIZE] = [0; BLOCK_SIZE];

thread_local! {
    static LAST_ERROR: Cell<Error> = Cell::new(Error::None);
}

/// The error code left behind by the most recent failing operation on
/// this thread.  Successful operations do not clear it.
pub fn last_error() -> Error {
    LAST_ERROR.with(|err| err.get())
}

pub fn clear_error() {
    LAST_ERROR.with(|err| err.set(Error::None));
}

pub(crate) fn set_error(code: Error) {
    LAST_ERROR.with(|err| err.set(code));
}

pub(crate) fn fail<T>(code: Error) -> Result<T, Error> {
    set_error(code);
    Err(code)
}

/// Split a pathname on `/`.  The leading separator is optional and
/// empty components are dropped, so `//DIR//F` equals `/DIR/F`.
fn split_path(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|component| component.len() > 0)
        .map(|component| component.to_string())
        .collect()
}

/// Test whether a buffer starts like the volume directory key block:
/// no previous block, and a volume header storage type.
fn is_volume_key_block(buf: &[u8]) -> bool {
    buf.len() >= 5 && le16(&buf[0..2]) == 0 && buf[4] >> 4 == StorageType::VolDirHeader as u8
}

/// XOR a buffer against the password, off-by-one quirk included: the
/// effective key is the password minus its last byte.
fn apply_password(cipher: &[u8], key: &[u8]) -> Vec<u8> {
    let len = key.len() - 1;
    cipher
        .iter()
        .enumerate()
        .map(|(i, c)| c ^ (key[i % len] ^ 0x7f))
        .collect()
}

/// Fetch the password named by the environment, with the same checks
/// the original mount tool applied.  Returns None, with logging, when
/// anything is off; the volume cascade just moves on in that case.
fn read_password_file() -> Option<Vec<u8>> {
    let pw_file = match std::env::var(PASSWORD_FILE_VAR) {
        Ok(path) => path,
        Err(_) => {
            debug!("{} env var not set", PASSWORD_FILE_VAR);
            return None;
        }
    };
    let meta = match std::fs::metadata(&pw_file) {
        Ok(meta) => meta,
        Err(_) => {
            error!("unable to stat password file");
            return None;
        }
    };
    if !meta.is_file() {
        error!("password file is not a regular file");
        return None;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if meta.permissions().mode() & 0o077 != 0 {
            warn!("password file should only be readable/writable and only by owner");
        }
    }
    let mut buf = [0u8; 31];
    let mut n = match std::fs::File::open(&pw_file) {
        Ok(mut file) => match file.read(&mut buf) {
            Ok(count) => count,
            Err(_) => {
                error!("unable to read from password file");
                return None;
            }
        },
        Err(_) => {
            error!("unable to open password file");
            return None;
        }
    };
    if n == 0 {
        error!("password file is empty");
        return None;
    }
    if buf[n - 1] == b'\n' {
        n -= 1;
    }
    if n < 2 {
        error!("password is too short");
        return None;
    }
    Some(buf[0..n].to_vec())
}

fn deobfuscate(cipher: &[u8]) -> Option<Vec<u8>> {
    let key = read_password_file()?;
    Some(apply_password(cipher, &key))
}

/// The primary interface to one mounted volume.  The volume owns the
/// image; directory and file handles borrow the volume.
pub struct Volume {
    img: Image,
    root: KeyBlock<VolDirHeader>,
    dirty: bool,
    img_path: Option<String>,
}

impl Volume {
    /// Open the image file at `img_path` and mount it.
    pub fn open(img_path: &str) -> Result<Self, DYNERR> {
        let img = Image::open(img_path)?;
        let mut vol = Self::from_img(img)?;
        vol.img_path = Some(img_path.to_string());
        Ok(vol)
    }
    /// Mount an image that is already in memory.  Runs the volume
    /// directory cascade and validates the volume header; any failure
    /// aborts construction.
    pub fn from_img(mut img: Image) -> Result<Self, DYNERR> {
        let dirty = Self::locate_volume_directory(&mut img)?;
        let root = KeyBlock::<VolDirHeader>::from_bytes(img.read_block(VOL_KEY_BLOCK as usize)?)?;
        if root.header.min_version() != 0 {
            return Err(Box::new(MountError::MinVersion));
        }
        if root.header.entries_per_block() != ENTRIES_PER_BLOCK {
            return Err(Box::new(MountError::EntriesPerBlock));
        }
        if root.header.entry_length() != ENTRY_LENGTH {
            return Err(Box::new(MountError::EntryLength));
        }
        if root.header.total_blocks() as usize != img.num_blocks() {
            return Err(Box::new(MountError::TotalBlocks));
        }
        Ok(Self {
            img,
            root,
            dirty,
            img_path: None,
        })
    }
    /// Find the volume directory, converting sector order and undoing
    /// the password cipher as needed.  Returns whether the in-memory
    /// image was rewritten along the way.
    fn locate_volume_directory(img: &mut Image) -> Result<bool, DYNERR> {
        let block = img.read_block(VOL_KEY_BLOCK as usize)?.to_vec();
        if is_volume_key_block(&block) {
            return Ok(false);
        }
        if let Some(plain) = deobfuscate(&block) {
            if is_volume_key_block(&plain) {
                info!("deobfuscated protected disk");
                img.write_block(VOL_KEY_BLOCK as usize, &plain)?;
                return Ok(true);
            }
        }
        let candidate = match img.read_track_sector(0, 11) {
            Ok(sector) => sector.to_vec(),
            Err(_) => return Err(Box::new(MountError::VolumeNotFound)),
        };
        if is_volume_key_block(&candidate) {
            info!("converting track-and-sector disk to block disk");
            img.convert_rwts_to_block()?;
            return Ok(true);
        }
        if let Some(plain) = deobfuscate(&candidate) {
            if is_volume_key_block(&plain) {
                info!("converting track-and-sector disk to block disk");
                img.convert_rwts_to_block()?;
                let block = img.read_block(VOL_KEY_BLOCK as usize)?.to_vec();
                if let Some(plain) = deobfuscate(&block) {
                    info!("deobfuscated protected disk");
                    img.write_block(VOL_KEY_BLOCK as usize, &plain)?;
                    return Ok(true);
                }
            }
        }
        Err(Box::new(MountError::VolumeNotFound))
    }
    pub fn name(&self) -> String {
        self.root.header.name()
    }
    pub fn file_count(&self) -> u16 {
        self.root.header.file_count()
    }
    pub fn total_blocks(&self) -> u16 {
        self.root.header.total_blocks()
    }
    pub fn num_blocks(&self) -> usize {
        self.img.num_blocks()
    }
    /// True if deobfuscation, conversion, or rename has rewritten the
    /// in-memory image; `save` makes the change permanent.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
    pub fn to_bytes(&self) -> Vec<u8> {
        self.img.to_bytes()
    }
    pub fn save(&self, img_path: &str) -> STDRESULT {
        std::fs::write(img_path, self.img.to_bytes())?;
        Ok(())
    }
    /// Borrow block `iblock`; block 0 designates a sparse hole and
    /// reads as the shared zero block.
    pub fn get_block(&self, iblock: u16) -> Result<&[u8], Error> {
        if iblock == 0 {
            return Ok(&SPARSE_BLOCK);
        }
        match self.img.read_block(iblock as usize) {
            Ok(buf) => Ok(buf),
            Err(e) => {
                error!("error reading block {}: {}", iblock, e);
                fail(Error::InputOutput)
            }
        }
    }
    /// Return the correct trait object assuming this block is a directory block.
    /// May return a key block or an entry block.
    pub(crate) fn get_directory(&self, iblock: u16) -> Result<Box<dyn Directory>, Error> {
        let buf = match self.img.read_block(iblock as usize) {
            Ok(buf) => buf,
            Err(e) => {
                error!("error reading block {}: {}", iblock, e);
                return fail(Error::InputOutput);
            }
        };
        let decoded: Result<Box<dyn Directory>, a2kit_macro::DiskStructError> =
            match (iblock == VOL_KEY_BLOCK, buf[0] == 0 && buf[1] == 0) {
                (true, _) => {
                    KeyBlock::<VolDirHeader>::from_bytes(buf).map(|b| Box::new(b) as Box<dyn Directory>)
                }
                (false, true) => {
                    KeyBlock::<SubDirHeader>::from_bytes(buf).map(|b| Box::new(b) as Box<dyn Directory>)
                }
                (false, false) => EntryBlock::from_bytes(buf).map(|b| Box::new(b) as Box<dyn Directory>),
            };
        match decoded {
            Ok(dir) => Ok(dir),
            Err(_) => fail(Error::DirectoryStructureDamaged),
        }
    }
    /// Resolve a pathname to its directory entry.  The root path `/`
    /// resolves to the volume header.  Matching is case insensitive,
    /// and interior components must be subdirectories.
    pub fn get_entry(&self, path: &str) -> Result<VolumeEntry, Error> {
        let components = split_path(path);
        if components.is_empty() {
            return Ok(VolumeEntry::Root(self.root.header));
        }
        let mut dh = DirectoryHandle::open(self, VOL_KEY_BLOCK)?;
        let last = components.len() - 1;
        for (depth, component) in components.iter().enumerate() {
            loop {
                match dh.next_entry() {
                    Some(entry) if entry.name_matches(component) => {
                        if depth == last {
                            return Ok(VolumeEntry::File(entry));
                        }
                        if !entry.is_directory() {
                            return fail(Error::DirectoryNotFound);
                        }
                        dh = DirectoryHandle::open(self, entry.key_ptr())?;
                        break;
                    }
                    Some(_) => continue,
                    None => {
                        return match last_error() {
                            Error::EndOfFile => fail(Error::FileNotFound),
                            other => Err(other),
                        };
                    }
                }
            }
        }
        fail(Error::FileNotFound)
    }
    /// Open an iterator over the directory at `path`; `/` opens the
    /// volume directory itself.
    pub fn open_directory(&self, path: &str) -> Result<DirectoryHandle, Error> {
        if split_path(path).is_empty() {
            return DirectoryHandle::open(self, VOL_KEY_BLOCK);
        }
        match self.get_entry(path)? {
            VolumeEntry::File(entry) if entry.is_directory() => {
                DirectoryHandle::open(self, entry.key_ptr())
            }
            _ => fail(Error::DirectoryNotFound),
        }
    }
    /// Open a reader over the file at `path`.
    pub fn open_file(&self, path: &str) -> Result<FileHandle, Error> {
        match self.get_entry(path)? {
            VolumeEntry::File(entry) if entry.is_file() => FileHandle::open(self, entry),
            _ => fail(Error::UnsupportedStorageType),
        }
    }
    /// Count allocated blocks by scanning the volume bitmap; a zero bit
    /// means the block is in use.
    pub fn count_blocks_used(&self) -> Result<usize, Error> {
        let bitmap_ptr = self.root.header.bitmap_ptr();
        let bits_per_block = BLOCK_SIZE * 8;
        let mut used = 0;
        let mut bitmap: &[u8] = &SPARSE_BLOCK;
        for i in 0..self.total_blocks() as usize {
            if i % bits_per_block == 0 {
                bitmap = self.get_block(bitmap_ptr + (i / bits_per_block) as u16)?;
            }
            if bitmap[i % bits_per_block / 8] & 1 << (7 - i % 8) == 0 {
                used += 1;
            }
        }
        Ok(used)
    }
    /// Length of the volume directory's block chain.
    pub fn count_root_directory_blocks(&self) -> Result<usize, Error> {
        let mut count = 1;
        let mut next = self.root.next();
        for _try in 0..100 {
            if next == 0 {
                return Ok(count);
            }
            let dir = self.get_directory(next)?;
            count += 1;
            next = dir.next();
        }
        error!("directory block count not plausible, aborting");
        fail(Error::DirectoryStructureDamaged)
    }
    /// Produce the traditional catalog listing of the directory at
    /// `path`, with the blocks free/used/total summary at the bottom.
    pub fn catalog(&self, path: &str) -> Result<String, Error> {
        let components = split_path(path);
        let mut dh = self.open_directory(path)?;
        let mut text = String::new();
        match components.len() {
            0 => text += &format!("\n/{}\n\n", self.name()),
            _ => text += &format!("\n/{}/{}\n\n", self.name(), components.join("/").to_uppercase()),
        }
        text += &format!(
            " {:<15} {:>4}  {:>6}  {:<15}  {:<15}  {:>7}  {:>7}\n\n",
            "NAME", "TYPE", "BLOCKS", "MODIFIED", "CREATED", "ENDFILE", "SUBTYPE"
        );
        while let Some(entry) = dh.next_entry() {
            let subtype = match entry.ftype() == FileType::Binary as u8 && entry.aux() != 0 {
                true => format!("A=${:04X}", entry.aux()),
                false => String::new(),
            };
            text += &format!(
                " {:<15}  {:>3}  {:>6}  {:<15}  {:<15}  {:>7}  {:>7}\n",
                entry.name(),
                file_type_info(entry.ftype()).name,
                entry.blocks_used(),
                entry.mod_time().to_string(),
                entry.create_time().to_string(),
                entry.eof(),
                subtype
            );
        }
        if last_error() != Error::EndOfFile {
            return Err(last_error());
        }
        let total_blocks = self.total_blocks() as usize;
        let blocks_used = self.count_blocks_used()?;
        text += &format!(
            "\nBLOCKS FREE: {:>4}          BLOCKS USED: {:>4}          TOTAL BLOCKS: {:>4}\n\n",
            total_blocks - blocks_used,
            blocks_used,
            total_blocks
        );
        Ok(text)
    }
    /// Change the volume name.  The new name is validated and upper
    /// cased, and block 2 of the in-memory image is rewritten.
    pub fn rename(&mut self, new_name: &str) -> Result<(), Error> {
        if !is_name_valid(new_name) {
            error!("invalid ProDOS name {}", new_name);
            return fail(Error::InvalidPathname);
        }
        self.root.header.rename(new_name);
        let buf = self.root.to_bytes();
        match self.img.write_block(VOL_KEY_BLOCK as usize, &buf) {
            Ok(()) => {
                self.dirty = true;
                Ok(())
            }
            Err(e) => {
                error!("error writing volume key block: {}", e);
                fail(Error::InputOutput)
            }
        }
    }
    /// Project an entry's metadata as extended attributes, keyed with a
    /// `prodos.` prefix, the way the mount tool surfaces them.
    pub fn xattrs(&self, entry: &VolumeEntry) -> Result<BTreeMap<String, String>, Error> {
        let mut attributes = BTreeMap::new();
        attributes.insert(xattr("creation_timestamp"), entry.create_time().to_string());
        attributes.insert(xattr("access"), access_to_string(entry.access()));
        attributes.insert(xattr("version"), entry.version().to_string());
        attributes.insert(xattr("min_version"), entry.min_version().to_string());
        if let Some(dirent) = entry.file_entry() {
            let info = file_type_info(dirent.ftype());
            attributes.insert(xattr("file_type"), info.type_str);
            attributes.insert(xattr("file_type_name"), info.name);
            attributes.insert(xattr("file_type_description"), info.description);
            attributes.insert(xattr("aux_type"), format!("${:04X}", dirent.aux()));
            if is_appleworks(dirent.ftype()) {
                attributes.insert(
                    xattr("appleworks_filename"),
                    appleworks_file_name(&dirent.name(), dirent.aux()),
                );
            }
        }
        if entry.is_root() {
            attributes.insert(xattr("volume_name"), self.name());
            attributes.insert(xattr("file_count"), self.file_count().to_string());
            attributes.insert(xattr("total_blocks"), self.total_blocks().to_string());
            attributes.insert(xattr("used_blocks"), self.count_blocks_used()?.to_string());
            if let Some(path) = &self.img_path {
                attributes.insert(xattr("image_file"), path.clone());
            }
        }
        Ok(attributes)
    }
    /// Test whether the last component of `path` names the catalog
    /// pseudo file.
    pub fn is_pseudo_file(path: &str) -> bool {
        match split_path(path).last() {
            Some(name) => name.eq_ignore_ascii_case(CATALOG_FILE_NAME),
            None => false,
        }
    }
    /// Synthesize the content of a pseudo file: `.CATALOG` in any
    /// directory yields that directory's catalog text.
    pub fn read_pseudo_file(&self, path: &str) -> Result<String, Error> {
        let components = split_path(path);
        match components.last() {
            Some(name) if name.eq_ignore_ascii_case(CATALOG_FILE_NAME) => {
                let parent = ["/", &components[0..components.len() - 1].join("/")].concat();
                self.catalog(&parent)
            }
            _ => fail(Error::FileNotFound),
        }
    }
}

fn xattr(name: &str) -> String {
    ["prodos.", name].concat()
}

#[test]
fn test_path_split() {
    assert_eq!(split_path("/"), Vec::<String>::new());
    assert_eq!(split_path(""), Vec::<String>::new());
    assert_eq!(split_path("/DIR/FILE.TXT"), ["DIR", "FILE.TXT"]);
    assert_eq!(split_path("DIR/FILE.TXT"), ["DIR", "FILE.TXT"]);
    assert_eq!(split_path("//dir//file/"), ["dir", "file"]);
}

#[test]
fn test_password_cipher() {
    let key = b"APPLE";
    let plain: Vec<u8> = (0..16).collect();
    let cipher = apply_password(&plain, key);
    // key wraps with period 4, the final byte never used
    assert_eq!(cipher[0], 0 ^ (b'A' ^ 0x7f));
    assert_eq!(cipher[3], 3 ^ (b'L' ^ 0x7f));
    assert_eq!(cipher[4], 4 ^ (b'A' ^ 0x7f));
    assert_eq!(apply_password(&cipher, key), plain);
}

#[test]
fn test_volume_key_block_test() {
    let mut buf = [0u8; 512];
    buf[4] = 0xf7;
    assert!(is_volume_key_block(&buf));
    buf[0] = 1;
    assert!(!is_volume_key_block(&buf));
    buf[0] = 0;
    buf[4] = 0xe7;
    assert!(!is_volume_key_block(&buf));
}
