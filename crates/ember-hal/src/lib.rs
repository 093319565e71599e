//! Hardware Abstraction Layer trait for the Ember kernel
//!
//! This crate defines the HAL trait that lets the kernel run against
//! different machines by abstracting the few hardware services it needs:
//! the interrupt controller, the two timers, the CPU's saved context,
//! the shared user window mapping, the filesystem reader and the console.
//!
//! # Platform Implementations
//!
//! - **Mock**: `ember-hal-mock`, a recording HAL for unit tests
//! - **Hosted**: `ember-supervisor`, native worker threads on a desktop OS
//!
//! Hosted platforms can build on [`SoftMmu`] (frame-backed physical memory
//! with a single shared user window) and [`RamFs`] (an in-memory directory).

#![no_std]

extern crate alloc;

pub mod layout;
pub mod mmu;
pub mod ramfs;

use alloc::string::String;

pub use mmu::SoftMmu;
pub use ramfs::{build_image, RamFs};

/// Hardware interrupt lines the kernel listens on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Irq {
    /// Programmable interval timer (scheduler quantum)
    Timer,
    /// Keyboard controller
    Keyboard,
    /// Real-time clock periodic interrupt
    Rtc,
}

impl Irq {
    /// Line number on the cascaded interrupt controller pair.
    pub fn line(&self) -> u8 {
        match self {
            Irq::Timer => 0,
            Irq::Keyboard => 1,
            Irq::Rtc => 8,
        }
    }
}

/// Saved kernel execution context (stack pointer + frame pointer).
///
/// Captured at every voluntary suspension point and restored when the
/// scheduler or a terminating child hands the CPU back.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExecutionContext {
    /// Kernel stack pointer
    pub esp: u32,
    /// Kernel frame pointer
    pub ebp: u32,
}

/// A one-way transfer into user mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UserEntry {
    /// Process the new user context belongs to
    pub pid: u32,
    /// First user instruction
    pub entry: u32,
    /// Initial user stack pointer
    pub user_stack: u32,
    /// Top of the task's kernel stack (loaded into the task-state segment)
    pub kernel_stack: u32,
}

/// Directory entry kinds as stored by the filesystem.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum FileKind {
    /// Periodic timer device node
    Rtc = 0,
    /// The directory itself
    Directory = 1,
    /// Regular file
    Regular = 2,
}

impl FileKind {
    /// Decode the on-disk type tag.
    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(FileKind::Rtc),
            1 => Some(FileKind::Directory),
            2 => Some(FileKind::Regular),
            _ => None,
        }
    }
}

/// Longest file name the filesystem stores.
pub const MAX_NAME_LEN: usize = 32;

/// A directory entry returned by the filesystem collaborator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    /// File name (at most [`MAX_NAME_LEN`] bytes)
    pub name: String,
    /// Entry kind
    pub kind: FileKind,
    /// Inode index (meaningful for regular files only)
    pub inode: u32,
}

/// Hardware Abstraction Layer trait
///
/// Implementations provide platform-specific functionality for:
/// - Interrupt controller (enable, mask, acknowledge)
/// - Timer programming (PIT divisor, RTC rate register)
/// - CPU context capture/restore and the user-mode transfer
/// - User window mapping and user memory access
/// - Filesystem reads
/// - Console output and debug logging
///
/// All methods take `&self`; implementations use interior mutability.
pub trait HAL: Send + Sync + 'static {
    // === Interrupt Controller ===

    /// Unmask an interrupt line
    fn enable_irq(&self, irq: Irq);

    /// Mask an interrupt line
    fn disable_irq(&self, irq: Irq);

    /// Send end-of-interrupt for a line
    ///
    /// Must be called once per delivered interrupt or the line stalls.
    fn acknowledge_irq(&self, irq: Irq);

    /// Disable interrupts on the CPU, returning whether they were enabled
    fn interrupts_disable(&self) -> bool;

    /// Restore the interrupt flag saved by `interrupts_disable`
    fn interrupts_restore(&self, enabled: bool);

    // === Timers ===

    /// Program channel 0 of the interval timer with a divisor of its input clock
    fn program_pit(&self, divisor: u16);

    /// Write the RTC rate-select code (frequency = 32768 >> (rate - 1))
    fn write_rtc_rate(&self, rate: u8);

    // === CPU ===

    /// Snapshot the live kernel stack and frame pointers
    fn capture_context(&self) -> ExecutionContext;

    /// Load a previously captured context into the CPU
    fn restore_context(&self, ctx: &ExecutionContext);

    /// Place a value in the return-value register of the context being resumed
    fn set_return_value(&self, value: i32);

    /// Update the privileged kernel-stack-top pointer in the task-state segment
    fn set_kernel_stack(&self, esp0: u32);

    /// Drop to user mode at `entry.entry` on `entry.user_stack`
    ///
    /// On hardware this never returns. Hosted platforms start the user
    /// program and return to the driver loop.
    fn enter_user(&self, entry: &UserEntry);

    // === Memory ===

    /// Point the shared user window at a physical frame
    fn map_user_window(&self, frame_base: u32);

    /// Map a terminal's display page at a user virtual address
    fn map_display_page(&self, vaddr: u32, terminal: usize);

    /// Flush the translation cache
    fn flush_tlb(&self);

    /// Copy bytes out of the current user address space
    ///
    /// # Returns
    /// * `Err(HalError::PageFault)` - An address in the range is not mapped
    fn read_user(&self, vaddr: u32, buf: &mut [u8]) -> Result<(), HalError>;

    /// Copy bytes into the current user address space
    ///
    /// # Returns
    /// * `Err(HalError::PageFault)` - An address in the range is not mapped
    fn write_user(&self, vaddr: u32, data: &[u8]) -> Result<(), HalError>;

    // === Filesystem ===

    /// Look up a directory entry by name
    fn fs_lookup(&self, name: &str) -> Option<DirEntry>;

    /// Directory entry at a position in the directory listing
    fn fs_entry(&self, index: usize) -> Option<DirEntry>;

    /// Read file data starting at `offset`
    ///
    /// # Returns
    /// * `Ok(n)` - Bytes copied (0 at end of file)
    /// * `Err(HalError::NotFound)` - Inode does not exist
    fn fs_read(&self, inode: u32, offset: u32, buf: &mut [u8]) -> Result<usize, HalError>;

    // === Console ===

    /// Mirror bytes rendered on a terminal
    fn console_write(&self, terminal: usize, data: &[u8]);

    /// Present a terminal's saved screen (character | attribute << 8 cells)
    fn console_refresh(&self, _terminal: usize, _cells: &[u16]) {
        // Default: no display
    }

    // === Time & Debug ===

    /// Get current time in nanoseconds (monotonic)
    fn now_nanos(&self) -> u64;

    /// Write a debug message to the platform's console/log
    fn debug_write(&self, msg: &str);

    /// Stop the machine after an unrecoverable condition
    fn halt(&self, reason: &str);
}

/// HAL errors
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HalError {
    /// Out of memory
    OutOfMemory,
    /// Address not mapped in the current address space
    PageFault,
    /// Inode or device not found
    NotFound,
    /// Invalid argument
    InvalidArgument,
    /// I/O error
    IoError,
    /// Operation not supported on this platform
    NotSupported,
}
