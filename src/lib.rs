//! # `prodosfs` main library
//!
//! This library reads Apple II ProDOS 8 disk images: a user points it at a
//! byte-exact dump of a 5.25 or 3.5 inch ProDOS volume and gets back the
//! volume's directory tree, file contents, and metadata.  It is the core
//! behind a mountable read-only filesystem; the mounting bridge itself is a
//! separate concern and talks to this library through `fs::prodos::Volume`.
//!
//! ## Architecture
//!
//! Access is built around two layers:
//! * `img::Image` holds the raw image bytes and understands block and
//!   track/sector addressing, including conversion of DOS 3.3 ordered
//!   images into ProDOS block order
//! * `fs::prodos::Volume` interprets those bytes as a ProDOS volume and
//!   hands out directory iterators and file handles
//!
//! The image lives entirely in memory; the three narrow mutations that
//! exist (deobfuscation of password protected volumes, sector order
//! conversion, volume rename) touch only the in-memory copy until the
//! caller elects to save it.
//!
//! ## Example
//!
//! ```no_run
//! let vol = prodosfs::create_volume_from_file("games.po").expect("mount failed");
//! println!("{}", vol.catalog("/").expect("damaged directory"));
//! ```

pub mod fs;
pub mod img;

use std::fmt::Write;

pub type DYNERR = Box<dyn std::error::Error>;
pub type STDRESULT = Result<(), Box<dyn std::error::Error>>;

/// Mount the ProDOS volume contained in the image file at `img_path`.
/// Fails with a descriptive error if the image cannot be interpreted.
pub fn create_volume_from_file(img_path: &str) -> Result<fs::prodos::Volume, DYNERR> {
    fs::prodos::Volume::open(img_path)
}

/// Save the image bytes back to a file (make in-memory changes permanent)
pub fn save_img(vol: &fs::prodos::Volume, img_path: &str) -> STDRESULT {
    vol.save(img_path)
}

/// This takes any bytes and makes an ascii friendly string
/// by using hex escapes, e.g., `\xFF`.  Intended for directory strings
/// that turn out not to be the clean ASCII they are supposed to be.
pub fn escaped_ascii_from_bytes(bytes: &Vec<u8>) -> String {
    let mut result = String::new();
    for i in 0..bytes.len() {
        if bytes[i] >= 0x20 && bytes[i] <= 0x7e {
            result += std::str::from_utf8(&[bytes[i]]).expect("unreachable");
        } else {
            let mut temp = String::new();
            write!(&mut temp, "\\x{:02X}", bytes[i]).expect("unreachable");
            result += &temp;
        }
    }
    return result;
}

#[test]
fn test_escaped_ascii() {
    assert_eq!(escaped_ascii_from_bytes(&vec![0x48, 0x49, 0x8d]), "HI\\x8D");
}
