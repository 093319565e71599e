//! Descriptor operations for the running task
//!
//! `open` resolves a name to an object and installs it in the first free
//! descriptor. `read` and `write` pass the descriptor through [`fd_check`]
//! and then dispatch on the object kind.

use alloc::vec::Vec;
use ember_hal::layout::{in_user_window, DISPLAY_VADDR};
use ember_hal::{FileKind, HAL, MAX_NAME_LEN};
use ember_process::TERMINAL_NAME;

use crate::error::KernelError;
use crate::fd::{fd_check, FileObject, OpenFile, Permissions};
use crate::process::{ProcessState, WaitChannel};
use crate::Kernel;

/// Outcome of a read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReadProgress {
    /// Bytes read (empty at end of file, or for an RTC tick)
    Done(Vec<u8>),
    /// Nothing available yet; retry after the next interrupt
    Block(WaitChannel),
}

impl<H: HAL> Kernel<H> {
    /// Open `name` for the running task, returning the new descriptor.
    pub fn open(&mut self, name: &str) -> Result<i32, KernelError> {
        let pid = self.current.ok_or(KernelError::NoCurrentTask)?;
        self.current_process()?
            .files
            .first_free()
            .ok_or(KernelError::TableFull)?;

        let object = if name == TERMINAL_NAME {
            FileObject::Terminal
        } else {
            let entry = self.hal.fs_lookup(name).ok_or(KernelError::FileNotFound)?;
            match entry.kind {
                FileKind::Rtc => match self.rtc.open(pid) {
                    Ok(id) => FileObject::Rtc(id),
                    Err(e) => {
                        self.halt_system("rtc handle registry exhausted");
                        return Err(e);
                    }
                },
                FileKind::Directory => FileObject::Directory,
                FileKind::Regular => FileObject::Regular { inode: entry.inode },
            }
        };

        let fd = self
            .current_process_mut()?
            .files
            .allocate(OpenFile::new(object, Permissions::read_write()))?;
        Ok(fd as i32)
    }

    /// Close a descriptor opened with `open`.
    pub fn close(&mut self, fd: i32) -> Result<(), KernelError> {
        let file = self.current_process_mut()?.files.release(fd)?;
        if let FileObject::Rtc(id) = file.object {
            self.rtc.close(&self.hal, id)?;
        }
        Ok(())
    }

    /// Read up to `max` bytes.
    pub fn read(&mut self, fd: i32, max: usize) -> Result<ReadProgress, KernelError> {
        let process = self.current_process()?;
        let terminal = process.terminal;
        let file = *fd_check(&process.files, fd, &Permissions::read_only())?;

        let progress = match file.object {
            FileObject::Terminal => self.critical(|k| {
                match k.terminals[terminal].take_input(max) {
                    Some(bytes) => ReadProgress::Done(bytes),
                    None => ReadProgress::Block(WaitChannel::Terminal(terminal)),
                }
            }),
            FileObject::Rtc(id) => match self.critical(|k| k.rtc.consume(id))? {
                true => ReadProgress::Done(Vec::new()),
                false => ReadProgress::Block(WaitChannel::Rtc(id)),
            },
            FileObject::Regular { inode } => {
                let mut buf = alloc::vec![0u8; max];
                let n = self.hal.fs_read(inode, file.position, &mut buf)?;
                buf.truncate(n);
                self.current_process_mut()?.files.get_mut(fd)?.position += n as u32;
                ReadProgress::Done(buf)
            }
            FileObject::Directory => {
                let name = match self.hal.fs_entry(file.position as usize) {
                    Some(entry) => {
                        self.current_process_mut()?.files.get_mut(fd)?.position += 1;
                        let bytes = entry.name.into_bytes();
                        bytes[..bytes.len().min(MAX_NAME_LEN).min(max)].to_vec()
                    }
                    None => Vec::new(),
                };
                ReadProgress::Done(name)
            }
        };

        self.current_process_mut()?.state = match progress {
            ReadProgress::Block(channel) => ProcessState::Blocked(channel),
            ReadProgress::Done(_) => ProcessState::Running,
        };
        Ok(progress)
    }

    /// Write `data`, returning the number of bytes accepted.
    pub fn write(&mut self, fd: i32, data: &[u8]) -> Result<usize, KernelError> {
        let process = self.current_process()?;
        let terminal = process.terminal;
        let file = *fd_check(&process.files, fd, &Permissions::write_only())?;

        match file.object {
            FileObject::Terminal => {
                let mirror = self.terminals[terminal].write(data);
                self.hal.console_write(terminal, &mirror);
                Ok(data.len())
            }
            FileObject::Rtc(id) => {
                let bytes: [u8; 4] = data.try_into().map_err(|_| KernelError::InvalidFrequency)?;
                self.rtc.write(&self.hal, id, u32::from_le_bytes(bytes))?;
                Ok(4)
            }
            FileObject::Regular { .. } | FileObject::Directory => Err(KernelError::ReadOnly),
        }
    }

    /// Argument string of the running task, NUL-terminated, if it fits in
    /// `capacity` bytes.
    pub fn get_args(&self, capacity: usize) -> Result<Vec<u8>, KernelError> {
        let args = self
            .current_process()?
            .args
            .as_deref()
            .ok_or(KernelError::NoArguments)?;
        if args.len() + 1 > capacity {
            return Err(KernelError::BufferTooSmall);
        }
        let mut out = Vec::with_capacity(args.len() + 1);
        out.extend_from_slice(args.as_bytes());
        out.push(0);
        Ok(out)
    }

    /// Map the task's terminal display page and store its address at `out`.
    pub fn vidmap(&mut self, out: u32) -> Result<u32, KernelError> {
        if !in_user_window(out, 4) {
            return Err(KernelError::BadAddress);
        }
        let process = self.current_process_mut()?;
        process.vidmap = true;
        let terminal = process.terminal;

        self.hal.map_display_page(DISPLAY_VADDR, terminal);
        self.hal.flush_tlb();
        self.hal.write_user(out, &DISPLAY_VADDR.to_le_bytes())?;
        Ok(DISPLAY_VADDR)
    }

    /// Run `f` with interrupts disabled.
    fn critical<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let was = self.hal.interrupts_disable();
        let result = f(self);
        self.hal.interrupts_restore(was);
        result
    }
}
