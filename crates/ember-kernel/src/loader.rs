//! Executable image loader
//!
//! Validates an executable and copies it, header included, to
//! [`IMAGE_BASE`] in whatever frame the user window currently shows.
//! Nothing is written until the header has been validated.

use ember_hal::layout::{IMAGE_BASE, USER_WINDOW_END};
use ember_hal::ramfs::{EXEC_ENTRY_OFFSET, EXEC_MAGIC};
use ember_hal::{FileKind, HAL};

use crate::error::LoadError;

/// Bytes copied per filesystem read
pub const LOAD_CHUNK: usize = 256;

/// Result of a successful load.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoadedImage {
    /// Entry point read from the header
    pub entry: u32,
    /// Bytes copied into the window
    pub size: u32,
}

/// Sequential reader over one regular file.
struct ImageFile<'a, H: HAL> {
    hal: &'a H,
    inode: u32,
    offset: u32,
}

impl<'a, H: HAL> ImageFile<'a, H> {
    fn open(hal: &'a H, name: &str) -> Result<Self, LoadError> {
        match hal.fs_lookup(name) {
            Some(entry) if entry.kind == FileKind::Regular => Ok(Self {
                hal,
                inode: entry.inode,
                offset: 0,
            }),
            _ => Err(LoadError::FileNotFound),
        }
    }

    /// Fill as much of `buf` as the file allows; 0 at end of file.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, LoadError> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.hal.fs_read(self.inode, self.offset, &mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
            self.offset += n as u32;
        }
        Ok(filled)
    }
}

/// Validate a header chunk and return the entry point.
pub fn parse_header(header: &[u8]) -> Result<u32, LoadError> {
    if header.len() < EXEC_ENTRY_OFFSET + 4 || header[..4] != EXEC_MAGIC {
        return Err(LoadError::BadFormat);
    }
    let field = &header[EXEC_ENTRY_OFFSET..EXEC_ENTRY_OFFSET + 4];
    let entry = u32::from_le_bytes([field[0], field[1], field[2], field[3]]);
    if !(IMAGE_BASE..USER_WINDOW_END).contains(&entry) {
        return Err(LoadError::BadFormat);
    }
    Ok(entry)
}

/// Load `name` into the current user window.
pub fn load<H: HAL>(hal: &H, name: &str) -> Result<LoadedImage, LoadError> {
    let mut file = ImageFile::open(hal, name)?;
    let mut chunk = [0u8; LOAD_CHUNK];

    let n = file.read(&mut chunk)?;
    let entry = parse_header(&chunk[..n])?;

    let mut dest = IMAGE_BASE;
    let mut len = n;
    while len > 0 {
        if dest as u64 + len as u64 > USER_WINDOW_END as u64 {
            return Err(LoadError::BadFormat);
        }
        hal.write_user(dest, &chunk[..len])?;
        dest += len as u32;
        len = file.read(&mut chunk)?;
    }

    Ok(LoadedImage {
        entry,
        size: dest - IMAGE_BASE,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_hal::build_image;
    use ember_hal::layout::frame_for_slot;
    use ember_hal_mock::MockHal;

    fn window_hal() -> MockHal {
        let hal = MockHal::new();
        hal.map_user_window(frame_for_slot(0));
        hal
    }

    #[test]
    fn test_load_copies_whole_file() {
        let hal = window_hal();
        let payload: alloc::vec::Vec<u8> = (0..600u32).map(|i| i as u8).collect();
        hal.install_program("prog", IMAGE_BASE + 0x40, &payload);

        let image = load(&hal, "prog").unwrap();
        assert_eq!(image.entry, IMAGE_BASE + 0x40);
        assert_eq!(image.size as usize, 40 + 600);

        let mut magic = [0u8; 4];
        hal.read_user(IMAGE_BASE, &mut magic).unwrap();
        assert_eq!(magic, EXEC_MAGIC);

        let mut tail = [0u8; 2];
        hal.read_user(IMAGE_BASE + 40 + 598, &mut tail).unwrap();
        assert_eq!(tail, [(598u32 as u8), (599u32 as u8)]);
    }

    #[test]
    fn test_missing_file_and_wrong_kind() {
        let hal = window_hal();
        hal.add_rtc("rtc");
        assert_eq!(load(&hal, "nope"), Err(LoadError::FileNotFound));
        assert_eq!(load(&hal, "rtc"), Err(LoadError::FileNotFound));
        assert_eq!(load(&hal, "."), Err(LoadError::FileNotFound));
    }

    #[test]
    fn test_bad_magic_writes_nothing() {
        let hal = window_hal();
        hal.add_file("frame0.txt", b"just some text, not a program at all");
        assert_eq!(load(&hal, "frame0.txt"), Err(LoadError::BadFormat));
        let mut buf = [0u8; 4];
        hal.read_user(IMAGE_BASE, &mut buf).unwrap();
        assert_eq!(buf, [0; 4]);
    }

    #[test]
    fn test_entry_outside_window_rejected() {
        let hal = window_hal();
        hal.add_file("zero", &build_image(0, b"x"));
        hal.add_file("high", &build_image(USER_WINDOW_END, b"x"));
        assert_eq!(load(&hal, "zero"), Err(LoadError::BadFormat));
        assert_eq!(load(&hal, "high"), Err(LoadError::BadFormat));
    }

    #[test]
    fn test_short_header_rejected() {
        let hal = window_hal();
        hal.add_file("stub", &EXEC_MAGIC);
        assert_eq!(load(&hal, "stub"), Err(LoadError::BadFormat));
    }

    #[test]
    fn test_parse_header_accepts_lowest_entry() {
        let image = build_image(IMAGE_BASE, b"");
        assert_eq!(parse_header(&image), Ok(IMAGE_BASE));
    }
}
