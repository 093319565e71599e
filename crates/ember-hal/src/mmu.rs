//! Software MMU for hosted platforms
//!
//! Physical memory is a sparse set of 4 KB pages allocated on first write.
//! Two translations exist: the 4 MB user window (pointed at one task frame
//! at a time) and one optional 4 KB display page backed by a per-terminal
//! video buffer.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;

use crate::layout::{FRAME_SIZE, PAGE_SIZE, USER_WINDOW_BASE, USER_WINDOW_END};
use crate::HalError;

const PAGE: usize = PAGE_SIZE as usize;

type Page = Box<[u8; PAGE]>;

/// Where a virtual address lands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Target {
    Physical(u32),
    Display { terminal: usize, offset: usize },
}

/// Frame-backed physical memory plus the shared user window.
#[derive(Default)]
pub struct SoftMmu {
    pages: BTreeMap<u32, Page>,
    window: Option<u32>,
    display: Option<(u32, usize)>,
    video: BTreeMap<usize, Page>,
}

impl SoftMmu {
    /// Create an empty memory with nothing mapped.
    pub fn new() -> Self {
        Self::default()
    }

    /// Point the user window at a physical frame.
    pub fn map_window(&mut self, frame_base: u32) {
        self.window = Some(frame_base);
    }

    /// Physical frame currently behind the user window.
    pub fn window(&self) -> Option<u32> {
        self.window
    }

    /// Map a terminal's video buffer at `vaddr` (page aligned).
    pub fn map_display(&mut self, vaddr: u32, terminal: usize) {
        self.display = Some((vaddr & !(PAGE_SIZE - 1), terminal));
    }

    /// Current display mapping as `(vaddr, terminal)`.
    pub fn display(&self) -> Option<(u32, usize)> {
        self.display
    }

    fn translate(&self, vaddr: u32) -> Result<Target, HalError> {
        if (USER_WINDOW_BASE..USER_WINDOW_END).contains(&vaddr) {
            let frame = self.window.ok_or(HalError::PageFault)?;
            return Ok(Target::Physical(frame + (vaddr - USER_WINDOW_BASE)));
        }
        if let Some((base, terminal)) = self.display {
            if vaddr >= base && vaddr - base < PAGE_SIZE {
                return Ok(Target::Display {
                    terminal,
                    offset: (vaddr - base) as usize,
                });
            }
        }
        Err(HalError::PageFault)
    }

    /// Copy bytes out of the current address space.
    pub fn read(&self, vaddr: u32, buf: &mut [u8]) -> Result<(), HalError> {
        for (i, byte) in buf.iter_mut().enumerate() {
            let addr = vaddr.checked_add(i as u32).ok_or(HalError::PageFault)?;
            *byte = match self.translate(addr)? {
                Target::Physical(phys) => self.read_phys_byte(phys),
                Target::Display { terminal, offset } => {
                    self.video.get(&terminal).map(|p| p[offset]).unwrap_or(0)
                }
            };
        }
        Ok(())
    }

    /// Copy bytes into the current address space.
    ///
    /// The whole range is translated before anything is written, so a
    /// faulting write leaves memory untouched.
    pub fn write(&mut self, vaddr: u32, data: &[u8]) -> Result<(), HalError> {
        if data.is_empty() {
            return Ok(());
        }
        let last = vaddr
            .checked_add(data.len() as u32 - 1)
            .ok_or(HalError::PageFault)?;
        self.translate(vaddr)?;
        self.translate(last)?;
        for (i, byte) in data.iter().enumerate() {
            match self.translate(vaddr + i as u32)? {
                Target::Physical(phys) => self.write_phys_byte(phys, *byte),
                Target::Display { terminal, offset } => {
                    self.video
                        .entry(terminal)
                        .or_insert_with(|| Box::new([0; PAGE]))[offset] = *byte;
                }
            }
        }
        Ok(())
    }

    /// Read physical memory directly (bypasses the window).
    pub fn read_phys(&self, phys: u32, buf: &mut [u8]) {
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = self.read_phys_byte(phys.wrapping_add(i as u32));
        }
    }

    /// Number of 4 KB pages touched inside a frame.
    pub fn resident_pages(&self, frame_base: u32) -> usize {
        let first = frame_base / PAGE_SIZE;
        let last = (frame_base + FRAME_SIZE) / PAGE_SIZE;
        self.pages.range(first..last).count()
    }

    /// A terminal's video page contents.
    pub fn video_page(&self, terminal: usize) -> Option<&[u8]> {
        self.video.get(&terminal).map(|p| &p[..])
    }

    fn read_phys_byte(&self, phys: u32) -> u8 {
        self.pages
            .get(&(phys / PAGE_SIZE))
            .map(|p| p[(phys % PAGE_SIZE) as usize])
            .unwrap_or(0)
    }

    fn write_phys_byte(&mut self, phys: u32, byte: u8) {
        let page = self
            .pages
            .entry(phys / PAGE_SIZE)
            .or_insert_with(|| Box::new([0; PAGE]));
        page[(phys % PAGE_SIZE) as usize] = byte;
    }
}
