//! Per-task file descriptor table
//!
//! Eight slots. Slot 0 is the terminal opened read-only, slot 1 the
//! terminal opened write-only; neither can be closed. Every read and write
//! passes [`fd_check`] before touching the underlying object.

use ember_process::MAX_FILES;

use crate::error::KernelError;
use crate::rtc::RtcHandleId;

/// First slot `open` hands out
pub const FIRST_USER_FD: usize = 2;

/// Descriptor permissions
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Permissions {
    /// Can read
    pub read: bool,
    /// Can write
    pub write: bool,
}

impl Permissions {
    pub fn read_only() -> Self {
        Self {
            read: true,
            write: false,
        }
    }

    pub fn write_only() -> Self {
        Self {
            read: false,
            write: true,
        }
    }

    pub fn read_write() -> Self {
        Self {
            read: true,
            write: true,
        }
    }
}

/// What a descriptor refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileObject {
    /// The task's terminal
    Terminal,
    /// A virtual periodic timer
    Rtc(RtcHandleId),
    /// The directory itself
    Directory,
    /// A regular file
    Regular {
        /// Filesystem inode
        inode: u32,
    },
}

impl FileObject {
    pub fn kind_name(&self) -> &'static str {
        match self {
            FileObject::Terminal => "terminal",
            FileObject::Rtc(_) => "rtc",
            FileObject::Directory => "directory",
            FileObject::Regular { .. } => "file",
        }
    }
}

/// An open descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OpenFile {
    /// Target object
    pub object: FileObject,
    /// Allowed directions
    pub permissions: Permissions,
    /// Byte offset (files) or entry index (directory)
    pub position: u32,
}

impl OpenFile {
    pub fn new(object: FileObject, permissions: Permissions) -> Self {
        Self {
            object,
            permissions,
            position: 0,
        }
    }
}

/// Fixed-size descriptor table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileTable {
    slots: [Option<OpenFile>; MAX_FILES],
}

impl FileTable {
    /// Table with the two terminal streams installed.
    pub fn with_std_streams() -> Self {
        let mut slots = [None; MAX_FILES];
        slots[0] = Some(OpenFile::new(FileObject::Terminal, Permissions::read_only()));
        slots[1] = Some(OpenFile::new(
            FileObject::Terminal,
            Permissions::write_only(),
        ));
        Self { slots }
    }

    /// Lowest unused slot at or above [`FIRST_USER_FD`].
    pub fn first_free(&self) -> Option<usize> {
        (FIRST_USER_FD..MAX_FILES).find(|&i| self.slots[i].is_none())
    }

    /// Install `file` in the lowest unused slot.
    pub fn allocate(&mut self, file: OpenFile) -> Result<usize, KernelError> {
        let fd = self.first_free().ok_or(KernelError::TableFull)?;
        self.slots[fd] = Some(file);
        Ok(fd)
    }

    fn index(fd: i32) -> Result<usize, KernelError> {
        usize::try_from(fd)
            .ok()
            .filter(|&i| i < MAX_FILES)
            .ok_or(KernelError::InvalidFd)
    }

    pub fn get(&self, fd: i32) -> Result<&OpenFile, KernelError> {
        self.slots[Self::index(fd)?]
            .as_ref()
            .ok_or(KernelError::UnusedFd)
    }

    pub fn get_mut(&mut self, fd: i32) -> Result<&mut OpenFile, KernelError> {
        self.slots[Self::index(fd)?]
            .as_mut()
            .ok_or(KernelError::UnusedFd)
    }

    /// Remove a descriptor opened with `open`.
    pub fn release(&mut self, fd: i32) -> Result<OpenFile, KernelError> {
        let index = Self::index(fd)?;
        if index < FIRST_USER_FD {
            return Err(KernelError::InvalidFd);
        }
        self.slots[index].take().ok_or(KernelError::UnusedFd)
    }

    /// Empty every slot, standard streams included.
    pub fn drain(&mut self) -> impl Iterator<Item = OpenFile> + '_ {
        self.slots.iter_mut().filter_map(Option::take)
    }

    pub fn open_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

impl Default for FileTable {
    fn default() -> Self {
        Self::with_std_streams()
    }
}

/// Check that a descriptor exists and allows the requested direction.
///
/// Every read and write goes through here before the object is touched.
/// Never modifies the table.
pub fn fd_check<'a>(
    table: &'a FileTable,
    fd: i32,
    required: &Permissions,
) -> Result<&'a OpenFile, KernelError> {
    let file = table.get(fd)?;
    if (required.read && !file.permissions.read) || (required.write && !file.permissions.write) {
        return Err(KernelError::PermissionDenied);
    }
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regular(inode: u32) -> OpenFile {
        OpenFile::new(FileObject::Regular { inode }, Permissions::read_write())
    }

    #[test]
    fn test_std_streams() {
        let table = FileTable::with_std_streams();
        assert_eq!(table.open_count(), 2);
        assert!(fd_check(&table, 0, &Permissions::read_only()).is_ok());
        assert_eq!(
            fd_check(&table, 0, &Permissions::write_only()),
            Err(KernelError::PermissionDenied)
        );
        assert!(fd_check(&table, 1, &Permissions::write_only()).is_ok());
        assert_eq!(
            fd_check(&table, 1, &Permissions::read_only()),
            Err(KernelError::PermissionDenied)
        );
    }

    #[test]
    fn test_first_fit_reuse() {
        let mut table = FileTable::with_std_streams();
        assert_eq!(table.allocate(regular(1)), Ok(2));
        assert_eq!(table.allocate(regular(2)), Ok(3));
        table.release(2).unwrap();
        assert_eq!(table.allocate(regular(3)), Ok(2));
    }

    #[test]
    fn test_table_full() {
        let mut table = FileTable::with_std_streams();
        for expected in 2..MAX_FILES {
            assert_eq!(table.allocate(regular(0)), Ok(expected));
        }
        assert_eq!(table.allocate(regular(0)), Err(KernelError::TableFull));
    }

    #[test]
    fn test_release_rules() {
        let mut table = FileTable::with_std_streams();
        assert_eq!(table.release(0), Err(KernelError::InvalidFd));
        assert_eq!(table.release(1), Err(KernelError::InvalidFd));
        assert_eq!(table.release(5), Err(KernelError::UnusedFd));
        assert_eq!(table.release(8), Err(KernelError::InvalidFd));
        assert_eq!(table.release(-1), Err(KernelError::InvalidFd));
    }

    #[test]
    fn test_drain_empties_everything() {
        let mut table = FileTable::with_std_streams();
        table.allocate(regular(4)).unwrap();
        assert_eq!(table.drain().count(), 3);
        assert_eq!(table.open_count(), 0);
    }
}
