//! # File System Module
//!
//! This is a container for file system modules.  A file system module
//! interprets the decoded image bytes as directories and files.  Only
//! ProDOS is supported at present, and only for reading; the narrow
//! write paths that exist (deobfuscation, sector-order conversion, and
//! volume rename) touch the in-memory image only.

pub mod prodos;
