//! Machine memory map
//!
//! Flat layout: the kernel lives in the 4-8 MB region, every task owns one
//! 4 MB physical frame above 8 MB, and whichever task is running sees its
//! frame through a single shared user window at 128 MB.

/// Size of one large page (and of one task frame)
pub const FRAME_SIZE: u32 = 0x0040_0000;

/// Size of a small page
pub const PAGE_SIZE: u32 = 0x1000;

/// Physical address of the first task frame
pub const FRAME_BASE: u32 = 0x0080_0000;

/// Virtual base of the shared user window
pub const USER_WINDOW_BASE: u32 = 0x0800_0000;

/// One past the last byte of the user window
pub const USER_WINDOW_END: u32 = USER_WINDOW_BASE + FRAME_SIZE;

/// Where executable images are copied (and the lowest legal entry point)
pub const IMAGE_BASE: u32 = 0x0804_8000;

/// Initial user stack pointer
pub const USER_STACK_TOP: u32 = USER_WINDOW_END - 4;

/// Fixed address of the return-from-signal trampoline
pub const SIGNAL_TRAMPOLINE: u32 = IMAGE_BASE - 0x10;

/// User virtual address the display page is mapped at
pub const DISPLAY_VADDR: u32 = USER_WINDOW_END;

/// Top of the kernel region; kernel stacks grow down from here
pub const KERNEL_STACK_BASE: u32 = 0x0080_0000;

/// Size of one task's kernel stack
pub const KERNEL_STACK_SIZE: u32 = 0x2000;

/// Width of a text screen in cells
pub const SCREEN_COLS: usize = 80;

/// Height of a text screen in cells
pub const SCREEN_ROWS: usize = 25;

/// Physical frame base for a task slot (slot = pid - 1).
pub const fn frame_for_slot(slot: u32) -> u32 {
    FRAME_BASE + slot * FRAME_SIZE
}

/// Kernel stack top for a task slot (slot = pid - 1).
pub const fn kernel_stack_for_slot(slot: u32) -> u32 {
    KERNEL_STACK_BASE - slot * KERNEL_STACK_SIZE - 4
}

/// Whether `[addr, addr + len)` lies inside the user window.
pub fn in_user_window(addr: u32, len: u32) -> bool {
    match addr.checked_add(len) {
        Some(end) => addr >= USER_WINDOW_BASE && end <= USER_WINDOW_END,
        None => false,
    }
}
