
use num_derive::FromPrimitive;
use thiserror::Error;

pub const BLOCK_SIZE: usize = 512;
pub const VOL_KEY_BLOCK: u16 = 2;
pub const FILENAME_LENGTH: usize = 15;
pub const ENTRY_LENGTH: u8 = 0x27;
pub const ENTRIES_PER_BLOCK: u8 = 13;
pub const FILE_SIZE_MAX: usize = 0xFFFFFF;

/// Enumerates ProDOS errors using the MLI error codes as discriminants.
/// The `Display` trait will print the equivalent long message.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("NO ERROR")]
    None = 0x00,
    #[error("I/O ERROR")]
    InputOutput = 0x27,
    #[error("NO DEVICE CONNECTED")]
    NoDeviceConnected = 0x28,
    #[error("DISK SWITCHED")]
    DiskSwitched = 0x2e,
    #[error("INVALID PATHNAME")]
    InvalidPathname = 0x40,
    #[error("INVALID REFERENCE NUMBER")]
    InvalidReferenceNumber = 0x43,
    #[error("DIRECTORY NOT FOUND")]
    DirectoryNotFound = 0x44,
    #[error("VOLUME NOT FOUND")]
    VolumeNotFound = 0x45,
    #[error("FILE NOT FOUND")]
    FileNotFound = 0x46,
    #[error("UNSUPPORTED STORAGE TYPE")]
    UnsupportedStorageType = 0x4b,
    #[error("END OF FILE")]
    EndOfFile = 0x4c,
    #[error("POSITION OUT OF RANGE")]
    PositionOutOfRange = 0x4d,
    #[error("FILE ACCESS ERROR")]
    FileAccessError = 0x4e,
    #[error("DIRECTORY STRUCTURE DAMAGED")]
    DirectoryStructureDamaged = 0x51,
    #[error("FILE STRUCTURE DAMAGED")]
    FileStructureDamaged = 0x54,
}

/// Enumerates the reasons a volume can fail to mount.  These abort
/// construction, unlike the `Error` codes which are reported per call.
#[derive(Error, Debug)]
pub enum MountError {
    #[error("unable to find volume directory block")]
    VolumeNotFound,
    #[error("unexpected minimum prodos version")]
    MinVersion,
    #[error("unexpected number of entries per block")]
    EntriesPerBlock,
    #[error("unexpected entry length")]
    EntryLength,
    #[error("unexpected total blocks")]
    TotalBlocks,
}

#[derive(Clone, Copy, FromPrimitive, PartialEq)]
pub enum StorageType {
    Inactive = 0x00,
    Seedling = 0x01,
    Sapling = 0x02,
    Tree = 0x03,
    Pascal = 0x04,
    SubDirEntry = 0x0d,
    SubDirHeader = 0x0e,
    VolDirHeader = 0x0f,
}

#[derive(Clone, Copy, FromPrimitive)]
pub enum Access {
    Read = 0x01,
    Write = 0x02,
    Backup = 0x20,
    Rename = 0x40,
    Destroy = 0x80,
}

#[derive(Clone, Copy, FromPrimitive, PartialEq)]
pub enum FileType {
    None = 0x00,
    Text = 0x04,
    Binary = 0x06,
    Directory = 0x0f,
    AppleWorksDataBase = 0x19,
    AppleWorksWordProcessor = 0x1a,
    AppleWorksSpreadsheet = 0x1b,
    IntegerCode = 0xfa,
    ApplesoftCode = 0xfc,
    System = 0xff,
}

/// Display strings for a file type byte.
pub struct FileTypeInfo {
    /// always the hex form `$HH`
    pub type_str: String,
    /// three character mnemonic, or `$HH` when there is none
    pub name: String,
    pub description: String,
}

/// Map file type codes to mnemonics and descriptions for display
const TYPE_MAP_DISP: [(u8, &str, &str); 27] = [
    (0x00, "---", "Typeless file"),
    (0x01, "BAD", "Bad block file"),
    (0x04, "TXT", "Text file"),
    (0x06, "BIN", "Binary file"),
    (0x0f, "DIR", "Directory file"),
    (0x19, "ADB", "AppleWorks database file"),
    (0x1a, "AWP", "AppleWorks word processor file"),
    (0x1b, "ASP", "AppleWorks spreadsheet file"),
    (0xef, "PAS", "Pascal file"),
    (0xf0, "CMD", "Command file"),
    (0xf1, "UD1", "User defined type 1 file"),
    (0xf2, "UD2", "User defined type 2 file"),
    (0xf3, "UD3", "User defined type 3 file"),
    (0xf4, "UD4", "User defined type 4 file"),
    (0xf5, "UD5", "User defined type 5 file"),
    (0xf6, "UD6", "User defined type 6 file"),
    (0xf7, "UD7", "User defined type 7 file"),
    (0xf8, "UD8", "User defined type 8 file"),
    (0xfa, "INT", "Integer BASIC file"),
    (0xfb, "IVR", "Integer BASIC variables file"),
    (0xfc, "BAS", "Applesoft BASIC file"),
    (0xfd, "VAR", "Applesoft BASIC variables file"),
    (0xfe, "REL", "Relocatable code file"),
    (0xff, "SYS", "System file"),
    (0x02, "PCD", "Pascal code file"),
    (0x03, "PTX", "Pascal text file"),
    (0x05, "PDA", "Pascal data file"),
];

/// Look up the display strings for a file type.  Unknown types get the
/// hex form as their name and a generic description.
pub fn file_type_info(ftype: u8) -> FileTypeInfo {
    let type_str = ["$", &hex::encode_upper(vec![ftype])].concat();
    for (code, name, description) in TYPE_MAP_DISP {
        if code == ftype {
            return FileTypeInfo {
                type_str,
                name: name.to_string(),
                description: description.to_string(),
            };
        }
    }
    FileTypeInfo {
        name: type_str.clone(),
        description: ["File type ", &type_str, " file"].concat(),
        type_str,
    }
}

/// AppleWorks files carry lower-case information in the aux type field.
pub fn is_appleworks(ftype: u8) -> bool {
    ftype == FileType::AppleWorksDataBase as u8
        || ftype == FileType::AppleWorksWordProcessor as u8
        || ftype == FileType::AppleWorksSpreadsheet as u8
}

/// Render the access bits in the order READ, WRITE, BACKUP, RENAME,
/// DESTROY, joined by ` | `.
pub fn access_to_string(access: u8) -> String {
    let mut allowed: Vec<&str> = Vec::new();
    if access & Access::Read as u8 > 0 {
        allowed.push("READ");
    }
    if access & Access::Write as u8 > 0 {
        allowed.push("WRITE");
    }
    if access & Access::Backup as u8 > 0 {
        allowed.push("BACKUP");
    }
    if access & Access::Rename as u8 > 0 {
        allowed.push("RENAME");
    }
    if access & Access::Destroy as u8 > 0 {
        allowed.push("DESTROY");
    }
    allowed.join(" | ")
}

#[test]
fn test_file_type_info() {
    let info = file_type_info(0x04);
    assert_eq!(info.type_str, "$04");
    assert_eq!(info.name, "TXT");
    assert_eq!(info.description, "Text file");
    let info = file_type_info(0xb3);
    assert_eq!(info.type_str, "$B3");
    assert_eq!(info.name, "$B3");
    assert_eq!(info.description, "File type $B3 file");
}

#[test]
fn test_access_strings() {
    assert_eq!(access_to_string(0xe3), "READ | WRITE | BACKUP | RENAME | DESTROY");
    assert_eq!(access_to_string(0x01), "READ");
    assert_eq!(access_to_string(0x00), "");
}
