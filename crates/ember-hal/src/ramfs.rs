//! In-memory filesystem for hosted platforms
//!
//! A flat directory: entry 0 is the directory itself (`.`), then devices
//! and regular files in insertion order. Regular files are addressed by
//! inode index.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use crate::{DirEntry, FileKind, HalError, MAX_NAME_LEN};

/// Magic bytes every executable starts with
pub const EXEC_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

/// Offset of the little-endian entry-point field
pub const EXEC_ENTRY_OFFSET: usize = 24;

/// Size of the header produced by [`build_image`]
pub const EXEC_HEADER_LEN: usize = 40;

/// Build an executable image: header with magic and entry point, then payload.
pub fn build_image(entry: u32, payload: &[u8]) -> Vec<u8> {
    let mut image = vec![0u8; EXEC_HEADER_LEN];
    image[..4].copy_from_slice(&EXEC_MAGIC);
    image[EXEC_ENTRY_OFFSET..EXEC_ENTRY_OFFSET + 4].copy_from_slice(&entry.to_le_bytes());
    image.extend_from_slice(payload);
    image
}

/// In-memory directory of named files.
pub struct RamFs {
    entries: Vec<DirEntry>,
    inodes: Vec<Vec<u8>>,
}

impl RamFs {
    /// Create a filesystem holding only the `.` directory entry.
    pub fn new() -> Self {
        Self {
            entries: vec![DirEntry {
                name: String::from("."),
                kind: FileKind::Directory,
                inode: 0,
            }],
            inodes: Vec::new(),
        }
    }

    /// Add a regular file, returning its inode.
    pub fn add_file(&mut self, name: &str, data: &[u8]) -> Result<u32, HalError> {
        self.check_name(name)?;
        let inode = self.inodes.len() as u32;
        self.inodes.push(data.to_vec());
        self.entries.push(DirEntry {
            name: String::from(name),
            kind: FileKind::Regular,
            inode,
        });
        Ok(inode)
    }

    /// Add a periodic-timer device node.
    pub fn add_rtc(&mut self, name: &str) -> Result<(), HalError> {
        self.check_name(name)?;
        self.entries.push(DirEntry {
            name: String::from(name),
            kind: FileKind::Rtc,
            inode: 0,
        });
        Ok(())
    }

    fn check_name(&self, name: &str) -> Result<(), HalError> {
        if name.is_empty() || name.len() > MAX_NAME_LEN || self.lookup(name).is_some() {
            return Err(HalError::InvalidArgument);
        }
        Ok(())
    }

    /// Look up an entry by exact name.
    pub fn lookup(&self, name: &str) -> Option<DirEntry> {
        if name.len() > MAX_NAME_LEN {
            return None;
        }
        self.entries.iter().find(|e| e.name == name).cloned()
    }

    /// Entry at a directory position.
    pub fn entry(&self, index: usize) -> Option<DirEntry> {
        self.entries.get(index).cloned()
    }

    /// Number of directory entries (including `.`).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always false: `.` is present from creation.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Read file data at `offset`; returns 0 at end of file.
    pub fn read(&self, inode: u32, offset: u32, buf: &mut [u8]) -> Result<usize, HalError> {
        let data = self.inodes.get(inode as usize).ok_or(HalError::NotFound)?;
        let start = (offset as usize).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    /// Size of a regular file in bytes.
    pub fn file_size(&self, inode: u32) -> Option<usize> {
        self.inodes.get(inode as usize).map(|d| d.len())
    }
}

impl Default for RamFs {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dot_entry_first() {
        let fs = RamFs::new();
        let dot = fs.entry(0).unwrap();
        assert_eq!(dot.name, ".");
        assert_eq!(dot.kind, FileKind::Directory);
    }

    #[test]
    fn test_add_and_read_file() {
        let mut fs = RamFs::new();
        let inode = fs.add_file("frame0.txt", b"hello world").unwrap();
        let entry = fs.lookup("frame0.txt").unwrap();
        assert_eq!(entry.inode, inode);
        assert_eq!(entry.kind, FileKind::Regular);

        let mut buf = [0u8; 5];
        assert_eq!(fs.read(inode, 6, &mut buf), Ok(5));
        assert_eq!(&buf, b"world");
        assert_eq!(fs.read(inode, 11, &mut buf), Ok(0));
        assert_eq!(fs.read(inode, 100, &mut buf), Ok(0));
        assert_eq!(fs.read(9, 0, &mut buf), Err(HalError::NotFound));
    }

    #[test]
    fn test_rejects_long_and_duplicate_names() {
        let mut fs = RamFs::new();
        let long = "a".repeat(MAX_NAME_LEN + 1);
        assert_eq!(fs.add_file(&long, b""), Err(HalError::InvalidArgument));
        fs.add_rtc("rtc").unwrap();
        assert_eq!(fs.add_rtc("rtc"), Err(HalError::InvalidArgument));
        assert_eq!(fs.len(), 2);
    }

    #[test]
    fn test_build_image_header() {
        let image = build_image(0x0804_8094, b"body");
        assert_eq!(&image[..4], &EXEC_MAGIC);
        assert_eq!(&image[24..28], &0x0804_8094u32.to_le_bytes());
        assert_eq!(&image[EXEC_HEADER_LEN..], b"body");
    }
}
