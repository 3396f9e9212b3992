
//! ### ProDOS directory structures
//!
//! The on-disk layouts are fixed length structs with private fields,
//! decoded from the image bytes.  A directory block is viewed through
//! the `Directory` trait object, which hides whether the block is a key
//! block (volume or subdirectory flavor) or a continuation block.  The
//! `DirectoryHandle` walks the block chain of one directory, yielding
//! its active entries in order.

use chrono;
use log::{error, warn};
use regex::Regex;
use std::fmt;
use super::types::*;
use super::{set_error, Volume};

// a2kit_macro automatically derives `new`, `to_bytes`, `from_bytes`, and `length` from a DiskStruct.
// This spares us having to manually write code to copy bytes in and out for every new structure.
use a2kit_macro::{DiskStruct, DiskStructError};
use a2kit_macro_derive::DiskStruct;

pub const MONTHS: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];

pub fn le16(p: &[u8]) -> u16 {
    (p[1] as u16) << 8 | p[0] as u16
}

pub fn le24(p: &[u8]) -> u32 {
    (p[2] as u32) << 16 | (p[1] as u32) << 8 | p[0] as u32
}

/// ProDOS date-time fields in unpacked form.  The year is the raw 7 bit
/// field; values below 70 are 2000-relative, the rest 1900-relative.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct Timestamp {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
}

impl Timestamp {
    pub fn unpack(dat: [u8; 4]) -> Self {
        let date = le16(&dat[0..2]);
        Self {
            year: date >> 9,
            month: ((date >> 5) & 15) as u8,
            day: (date & 31) as u8,
            minute: dat[2] & 0b0011_1111,
            hour: dat[3] & 0b0001_1111,
        }
    }
    pub fn pack(&self) -> [u8; 4] {
        let date = (self.day as u16 & 31) + ((self.month as u16 & 15) << 5) + ((self.year & 127) << 9);
        let bytes = u16::to_le_bytes(date);
        [bytes[0], bytes[1], self.minute & 0b0011_1111, self.hour & 0b0001_1111]
    }
    pub fn as_datetime(&self) -> Option<chrono::NaiveDateTime> {
        let year = match self.year < 70 {
            true => 2000 + self.year as i32,
            false => 1900 + self.year as i32,
        };
        match chrono::NaiveDate::from_ymd_opt(year, self.month as u32, self.day as u32) {
            Some(date) => date.and_hms_opt(self.hour as u32, self.minute as u32, 0),
            None => None,
        }
    }
}

/// Display in the traditional catalog form, e.g. `26-JUN-84 09:05 AM`.
impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.month < 1 || self.month > 12 {
            return write!(f, "<NO DATE>");
        }
        write!(
            f,
            "{:02}-{}-{:02} {:02}:{:02} {}",
            self.day,
            MONTHS[self.month as usize - 1],
            self.year % 100,
            self.hour,
            self.minute,
            match self.hour < 12 {
                true => "AM",
                false => "PM",
            }
        )
    }
}

/// Test the string for validity as a ProDOS name: 1 to 15 characters,
/// alphabetic first character, alphanumerics or `.` after.
pub fn is_name_valid(s: &str) -> bool {
    let fname_patt = Regex::new(r"^[A-Z][A-Z0-9.]{0,14}$").expect("unreachable");
    fname_patt.is_match(&s.to_uppercase())
}

/// Convert filename bytes to a string.  Will not panic, will escape the string if necessary.
/// Must pass the stor_len_nibs field into nibs.
fn file_name_to_string(nibs: u8, fname: [u8; 15]) -> String {
    let name_len = nibs & 0x0f;
    if let Ok(result) = String::from_utf8(fname[0..name_len as usize].to_vec()) {
        return result;
    }
    warn!("continuing with invalid filename");
    crate::escaped_ascii_from_bytes(&fname[0..name_len as usize].to_vec())
}

/// Convert storage type nibble and string to (stor_len_nibs,fname).
/// Panics if the string is not a valid ProDOS name.
fn string_to_file_name(stype: u8, s: &str) -> (u8, [u8; 15]) {
    if !is_name_valid(s) {
        panic!("attempt to create a bad file name {}", s);
    }
    let new_nibs = (stype << 4) + s.len() as u8;
    let mut ans: [u8; 15] = [0; 15];
    let mut i = 0;
    for char in s.to_uppercase().chars() {
        char.encode_utf8(&mut ans[i..]);
        i += 1;
    }
    (new_nibs, ans)
}

/// Recover the mixed-case filename of an AppleWorks file.  The aux type,
/// after a byte swap, is a bit mask over the name: where bit `i` is set,
/// character `i` is rendered lowercase and `.` becomes a space.
pub fn appleworks_file_name(name: &str, aux_type: u16) -> String {
    let mask = aux_type.swap_bytes();
    name.chars()
        .enumerate()
        .map(|(i, c)| match mask & (1 << i) {
            0 => c,
            _ if c == '.' => ' ',
            _ => c.to_ascii_lowercase(),
        })
        .collect()
}

/// Convenience for locating an entry in a directory.
/// `idx` mirrors the internal indexing, which starts at 2 in a key block, and 1 in an entry block
pub struct EntryLocation {
    pub block: u16,
    pub idx: usize,
}

pub trait Header {
    fn file_count(&self) -> u16;
    fn entry_length(&self) -> u8;
    fn entries_per_block(&self) -> u8;
    fn min_version(&self) -> u8;
}

pub trait HasName {
    fn fname(&self) -> (u8, [u8; 15]);
    /// storage type nibble, uninterpreted
    fn storage_type(&self) -> u8;
    fn name(&self) -> String {
        let (nibs, fname) = self.fname();
        file_name_to_string(nibs, fname)
    }
    /// ProDOS name comparisons are case insensitive
    fn name_matches(&self, other: &str) -> bool {
        self.name().eq_ignore_ascii_case(other)
    }
}

pub trait HasEntries {
    fn name(&self) -> String;
    fn file_count(&self) -> u16;
    fn prev(&self) -> u16;
    fn next(&self) -> u16;
    fn entry_locations(&self, iblock: u16) -> Vec<EntryLocation>;
    fn get_entry(&self, loc: &EntryLocation) -> Entry;
}

pub trait Directory: HasEntries {
    /// storage type nibble of the header, None for a continuation block
    fn header_nib(&self) -> Option<u8>;
}

// Block   | Contents
// -----------------------------
// 0       | Loader
// 1       | Loader
// 2       | Volume Directory Key
// 3 - n   | Volume Directory
// n+1 - p | Volume Bitmap

/// KeyBlock has a generic header type, which can be either
/// VolDirHeader or SubDirHeader
#[derive(Clone, Copy)]
pub struct KeyBlock<T> {
    prev_block: [u8; 2],
    next_block: [u8; 2],
    pub header: T,
    entries: [Entry; 12],
}

#[derive(Clone, Copy)]
pub struct EntryBlock {
    prev_block: [u8; 2],
    next_block: [u8; 2],
    entries: [Entry; 13],
}

#[derive(DiskStruct, Clone, Copy)]
pub struct VolDirHeader {
    stor_len_nibs: u8,
    name: [u8; 15],
    pad1: [u8; 8],
    create_time: [u8; 4],
    vers: u8,
    min_vers: u8,
    access: u8,
    entry_len: u8,
    entries_per_block: u8,
    file_count: [u8; 2],
    bitmap_ptr: [u8; 2],
    total_blocks: [u8; 2],
}

#[derive(DiskStruct, Clone, Copy)]
pub struct SubDirHeader {
    stor_len_nibs: u8,
    name: [u8; 15],
    pad1: [u8; 8],
    create_time: [u8; 4],
    vers: u8,
    min_vers: u8,
    access: u8,
    entry_len: u8,
    entries_per_block: u8,
    file_count: [u8; 2],
    parent_ptr: [u8; 2],
    parent_entry_num: u8,
    parent_entry_len: u8,
}

#[derive(DiskStruct, Clone, Copy)]
pub struct Entry {
    stor_len_nibs: u8,
    name: [u8; 15],
    file_type: u8,
    key_ptr: [u8; 2],
    blocks_used: [u8; 2],
    eof: [u8; 3],
    create_time: [u8; 4],
    vers: u8,
    min_vers: u8,
    access: u8,
    aux_type: [u8; 2],
    last_mod: [u8; 4],
    header_ptr: [u8; 2],
}

impl VolDirHeader {
    pub fn create_time(&self) -> Timestamp {
        Timestamp::unpack(self.create_time)
    }
    pub fn version(&self) -> u8 {
        self.vers
    }
    pub fn access(&self) -> u8 {
        self.access
    }
    pub fn bitmap_ptr(&self) -> u16 {
        le16(&self.bitmap_ptr)
    }
    pub fn total_blocks(&self) -> u16 {
        le16(&self.total_blocks)
    }
    /// Overwrite the volume name.  Panics if `name` is invalid; the
    /// volume checks validity before calling.
    pub fn rename(&mut self, name: &str) {
        let (nibs, fname) = string_to_file_name(StorageType::VolDirHeader as u8, name);
        self.stor_len_nibs = nibs;
        self.name = fname;
    }
}

impl SubDirHeader {
    pub fn parent_ptr(&self) -> u16 {
        le16(&self.parent_ptr)
    }
    pub fn parent_entry_num(&self) -> u8 {
        self.parent_entry_num
    }
}

impl Entry {
    pub fn is_active(&self) -> bool {
        self.stor_len_nibs > 0
    }
    pub fn is_file(&self) -> bool {
        matches!(self.storage_type(), 0x01..=0x03)
    }
    pub fn is_directory(&self) -> bool {
        self.storage_type() == StorageType::SubDirEntry as u8
    }
    pub fn is_inactive(&self) -> bool {
        self.storage_type() == StorageType::Inactive as u8
    }
    pub fn key_ptr(&self) -> u16 {
        le16(&self.key_ptr)
    }
    pub fn blocks_used(&self) -> u16 {
        le16(&self.blocks_used)
    }
    pub fn eof(&self) -> usize {
        le24(&self.eof) as usize
    }
    pub fn aux(&self) -> u16 {
        le16(&self.aux_type)
    }
    pub fn ftype(&self) -> u8 {
        self.file_type
    }
    pub fn access(&self) -> u8 {
        self.access
    }
    pub fn get_access(&self, what: Access) -> bool {
        self.access & what as u8 > 0
    }
    pub fn version(&self) -> u8 {
        self.vers
    }
    pub fn min_version(&self) -> u8 {
        self.min_vers
    }
    pub fn create_time(&self) -> Timestamp {
        Timestamp::unpack(self.create_time)
    }
    pub fn mod_time(&self) -> Timestamp {
        Timestamp::unpack(self.last_mod)
    }
}

impl HasName for Entry {
    fn fname(&self) -> (u8, [u8; 15]) {
        (self.stor_len_nibs, self.name)
    }
    fn storage_type(&self) -> u8 {
        self.stor_len_nibs >> 4
    }
}

impl HasName for VolDirHeader {
    fn fname(&self) -> (u8, [u8; 15]) {
        (self.stor_len_nibs, self.name)
    }
    fn storage_type(&self) -> u8 {
        self.stor_len_nibs >> 4
    }
}

impl HasName for SubDirHeader {
    fn fname(&self) -> (u8, [u8; 15]) {
        (self.stor_len_nibs, self.name)
    }
    fn storage_type(&self) -> u8 {
        self.stor_len_nibs >> 4
    }
}

impl Header for VolDirHeader {
    fn file_count(&self) -> u16 {
        le16(&self.file_count)
    }
    fn entry_length(&self) -> u8 {
        self.entry_len
    }
    fn entries_per_block(&self) -> u8 {
        self.entries_per_block
    }
    fn min_version(&self) -> u8 {
        self.min_vers
    }
}

impl Header for SubDirHeader {
    fn file_count(&self) -> u16 {
        le16(&self.file_count)
    }
    fn entry_length(&self) -> u8 {
        self.entry_len
    }
    fn entries_per_block(&self) -> u8 {
        self.entries_per_block
    }
    fn min_version(&self) -> u8 {
        self.min_vers
    }
}

impl<T: Header + HasName + DiskStruct> HasEntries for KeyBlock<T> {
    fn name(&self) -> String {
        self.header.name()
    }
    fn file_count(&self) -> u16 {
        self.header.file_count()
    }
    fn prev(&self) -> u16 {
        le16(&self.prev_block)
    }
    fn next(&self) -> u16 {
        le16(&self.next_block)
    }
    fn entry_locations(&self, iblock: u16) -> Vec<EntryLocation> {
        let mut ans = Vec::<EntryLocation>::new();
        for i in 0..self.entries.len() {
            ans.push(EntryLocation {
                block: iblock,
                idx: i + 2,
            });
        }
        ans
    }
    fn get_entry(&self, loc: &EntryLocation) -> Entry {
        self.entries[loc.idx - 2]
    }
}

impl HasEntries for EntryBlock {
    fn name(&self) -> String {
        panic!("only the key block has a name");
    }
    fn file_count(&self) -> u16 {
        panic!("only the key block has a file count");
    }
    fn prev(&self) -> u16 {
        le16(&self.prev_block)
    }
    fn next(&self) -> u16 {
        le16(&self.next_block)
    }
    fn entry_locations(&self, iblock: u16) -> Vec<EntryLocation> {
        let mut ans = Vec::<EntryLocation>::new();
        for i in 0..self.entries.len() {
            ans.push(EntryLocation {
                block: iblock,
                idx: i + 1,
            });
        }
        ans
    }
    fn get_entry(&self, loc: &EntryLocation) -> Entry {
        self.entries[loc.idx - 1]
    }
}

impl<T: Header + HasName + DiskStruct> Directory for KeyBlock<T> {
    fn header_nib(&self) -> Option<u8> {
        Some(self.header.storage_type())
    }
}

impl Directory for EntryBlock {
    fn header_nib(&self) -> Option<u8> {
        None
    }
}

impl<T: Header + HasName + DiskStruct> DiskStruct for KeyBlock<T> {
    fn new() -> Self
    where
        Self: Sized,
    {
        Self {
            prev_block: [0; 2],
            next_block: [0; 2],
            header: T::new(),
            entries: [Entry::new(); 12],
        }
    }
    fn to_bytes(&self) -> Vec<u8> {
        let mut ans: Vec<u8> = Vec::new();
        ans.append(&mut self.prev_block.to_vec());
        ans.append(&mut self.next_block.to_vec());
        ans.append(&mut self.header.to_bytes());
        for i in 0..self.entries.len() {
            ans.append(&mut self.entries[i].to_bytes());
        }
        ans
    }
    fn update_from_bytes(&mut self, bytes: &[u8]) -> Result<(), DiskStructError> {
        if bytes.len() < self.len() {
            return Err(DiskStructError::OutOfData);
        }
        self.prev_block = [bytes[0], bytes[1]];
        self.next_block = [bytes[2], bytes[3]];
        let mut offset = 4;
        self.header.update_from_bytes(&bytes[offset..self.header.len() + offset])?;
        offset += self.header.len();
        for i in 0..self.entries.len() {
            self.entries[i].update_from_bytes(&bytes[offset..offset + self.entries[i].len()])?;
            offset += self.entries[i].len();
        }
        Ok(())
    }
    fn from_bytes(bytes: &[u8]) -> Result<Self, DiskStructError>
    where
        Self: Sized,
    {
        let mut ans = Self::new();
        ans.update_from_bytes(bytes)?;
        Ok(ans)
    }
    fn len(&self) -> usize {
        511
    }
}

impl DiskStruct for EntryBlock {
    fn new() -> Self
    where
        Self: Sized,
    {
        Self {
            prev_block: [0; 2],
            next_block: [0; 2],
            entries: [Entry::new(); 13],
        }
    }
    fn to_bytes(&self) -> Vec<u8> {
        let mut ans: Vec<u8> = Vec::new();
        ans.append(&mut self.prev_block.to_vec());
        ans.append(&mut self.next_block.to_vec());
        for i in 0..self.entries.len() {
            ans.append(&mut self.entries[i].to_bytes());
        }
        ans
    }
    fn update_from_bytes(&mut self, bytes: &[u8]) -> Result<(), DiskStructError> {
        if bytes.len() < self.len() {
            return Err(DiskStructError::OutOfData);
        }
        self.prev_block = [bytes[0], bytes[1]];
        self.next_block = [bytes[2], bytes[3]];
        let mut offset = 4;
        for i in 0..self.entries.len() {
            self.entries[i].update_from_bytes(&bytes[offset..offset + self.entries[i].len()])?;
            offset += self.entries[i].len();
        }
        Ok(())
    }
    fn from_bytes(bytes: &[u8]) -> Result<Self, DiskStructError>
    where
        Self: Sized,
    {
        let mut ans = Self::new();
        ans.update_from_bytes(bytes)?;
        Ok(ans)
    }
    fn len(&self) -> usize {
        511
    }
}

/// A resolved directory entry.  Path resolution usually lands on a file
/// or subdirectory entry, but the root path resolves to the volume
/// header, which carries a different set of fields.
#[derive(Clone, Copy)]
pub enum VolumeEntry {
    Root(VolDirHeader),
    File(Entry),
}

impl VolumeEntry {
    pub fn name(&self) -> String {
        match self {
            Self::Root(hdr) => hdr.name(),
            Self::File(entry) => entry.name(),
        }
    }
    pub fn storage_type(&self) -> u8 {
        match self {
            Self::Root(hdr) => hdr.storage_type(),
            Self::File(entry) => entry.storage_type(),
        }
    }
    pub fn is_root(&self) -> bool {
        self.storage_type() == StorageType::VolDirHeader as u8
    }
    pub fn is_header(&self) -> bool {
        matches!(self.storage_type(), 0x0e | 0x0f)
    }
    pub fn is_file(&self) -> bool {
        matches!(self, Self::File(entry) if entry.is_file())
    }
    pub fn is_directory(&self) -> bool {
        matches!(self, Self::File(entry) if entry.is_directory())
    }
    pub fn access(&self) -> u8 {
        match self {
            Self::Root(hdr) => hdr.access(),
            Self::File(entry) => entry.access(),
        }
    }
    pub fn version(&self) -> u8 {
        match self {
            Self::Root(hdr) => hdr.version(),
            Self::File(entry) => entry.version(),
        }
    }
    pub fn min_version(&self) -> u8 {
        match self {
            Self::Root(hdr) => hdr.min_version(),
            Self::File(entry) => entry.min_version(),
        }
    }
    pub fn create_time(&self) -> Timestamp {
        match self {
            Self::Root(hdr) => hdr.create_time(),
            Self::File(entry) => entry.create_time(),
        }
    }
    pub fn file_entry(&self) -> Option<&Entry> {
        match self {
            Self::Root(_) => None,
            Self::File(entry) => Some(entry),
        }
    }
}

/// Iterator over the active entries of one directory.  Not shareable
/// between threads; open one handle per caller.
pub struct DirectoryHandle<'v> {
    vol: &'v Volume,
    dir: Box<dyn Directory>,
    locs: Vec<EntryLocation>,
    name: String,
    slot: usize,
    yielded: u16,
    file_count: u16,
}

impl<'v> DirectoryHandle<'v> {
    /// Open the directory whose key block is `key_block`.  The header
    /// storage type is checked; anything other than a directory header
    /// means the structure is damaged.
    pub(crate) fn open(vol: &'v Volume, key_block: u16) -> Result<Self, Error> {
        let dir = vol.get_directory(key_block)?;
        match dir.header_nib() {
            Some(nib)
                if nib == StorageType::SubDirHeader as u8
                    || nib == StorageType::VolDirHeader as u8 => {}
            _ => {
                error!("block {} is not a directory key block", key_block);
                return super::fail(Error::DirectoryStructureDamaged);
            }
        }
        let locs = dir.entry_locations(key_block);
        Ok(Self {
            name: dir.name(),
            file_count: dir.file_count(),
            vol,
            dir,
            locs,
            slot: 0,
            yielded: 0,
        })
    }
    /// name of the directory, from the key block header
    pub fn name(&self) -> String {
        self.name.clone()
    }
    pub fn file_count(&self) -> u16 {
        self.file_count
    }
    /// Produce the next active entry, or None.  After exactly
    /// `file_count` entries the thread error is set to `EndOfFile`,
    /// which callers draining the directory treat as success.  Running
    /// off the block chain first means the structure is damaged.
    pub fn next_entry(&mut self) -> Option<Entry> {
        if self.yielded == self.file_count {
            set_error(Error::EndOfFile);
            return None;
        }
        loop {
            if self.slot < self.locs.len() {
                let entry = self.dir.get_entry(&self.locs[self.slot]);
                self.slot += 1;
                if entry.is_active() {
                    self.yielded += 1;
                    return Some(entry);
                }
            } else {
                let next = self.dir.next();
                if next == 0 {
                    error!(
                        "directory chain ended after {} of {} entries",
                        self.yielded, self.file_count
                    );
                    set_error(Error::DirectoryStructureDamaged);
                    return None;
                }
                self.dir = match self.vol.get_directory(next) {
                    Ok(dir) => dir,
                    Err(e) => {
                        set_error(e);
                        return None;
                    }
                };
                self.locs = self.dir.entry_locations(next);
                self.slot = 0;
            }
        }
    }
}

#[test]
fn test_le_decoding() {
    assert_eq!(le16(&[0x34, 0x12]), 0x1234);
    assert_eq!(le16(&[0xff, 0x00]), 0x00ff);
    assert_eq!(le24(&[0x56, 0x34, 0x12]), 0x123456);
    assert_eq!(le24(&[0x00, 0x00, 0x80]), 0x800000);
}

#[test]
fn test_timestamp_round_trip() {
    // 26-JUN-84 9:05 AM
    let dat = [0xda, 0xa8, 0x05, 0x09];
    let ts = Timestamp::unpack(dat);
    assert_eq!(ts.year, 84);
    assert_eq!(ts.month, 6);
    assert_eq!(ts.day, 26);
    assert_eq!(ts.hour, 9);
    assert_eq!(ts.minute, 5);
    assert_eq!(ts.pack(), dat);
    assert_eq!(ts.to_string(), "26-JUN-84 09:05 AM");
    let pm = Timestamp {
        year: 22,
        month: 12,
        day: 1,
        hour: 13,
        minute: 30,
    };
    assert_eq!(Timestamp::unpack(pm.pack()), pm);
    assert_eq!(pm.to_string(), "01-DEC-22 13:30 PM");
    assert_eq!(pm.as_datetime().unwrap().format("%Y/%m/%d %H:%M").to_string(), "2022/12/01 13:30");
}

#[test]
fn test_name_validity() {
    assert!(is_name_valid("NEW.DISK"));
    assert!(is_name_valid("a"));
    assert!(is_name_valid("F15.CHARS.LONG1"));
    assert!(!is_name_valid(""));
    assert!(!is_name_valid("4CORNERS"));
    assert!(!is_name_valid("BAD NAME"));
    assert!(!is_name_valid("WAY.TOO.LONG.TO.FIT"));
}

#[test]
fn test_decoded_names_are_valid() {
    let (nibs, fname) = string_to_file_name(StorageType::Seedling as u8, "Hello.Txt");
    assert_eq!(nibs, 0x19);
    assert!(is_name_valid(&file_name_to_string(nibs, fname)));
    assert_eq!(file_name_to_string(nibs, fname), "HELLO.TXT");
}

#[test]
fn test_name_matching() {
    let (nibs, fname) = string_to_file_name(StorageType::Seedling as u8, "FOO");
    let mut entry = Entry::new();
    entry.stor_len_nibs = nibs;
    entry.name = fname;
    assert!(entry.name_matches("FOO"));
    assert!(entry.name_matches("foo"));
    assert!(entry.name_matches("Foo"));
    assert!(!entry.name_matches("FOO2"));
}

#[test]
fn test_appleworks_names() {
    // mask bits 1,2,3,4,6 after the byte swap
    assert_eq!(appleworks_file_name("MY.FILE", 0x5e00), "My fiLe");
    assert_eq!(appleworks_file_name("REPORT", 0), "REPORT");
}
