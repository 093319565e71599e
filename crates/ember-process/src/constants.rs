//! Syscall numbers, error codes and signal numbers

// ============================================================================
// Syscall Numbers (int 0x80, number in eax, arguments in ebx/ecx/edx)
// ============================================================================

pub mod syscall {
    /// Terminate the calling task (status byte)
    pub const SYS_HALT: u32 = 1;
    /// Spawn a program from a command line and wait for it
    pub const SYS_EXECUTE: u32 = 2;
    /// Read from a file descriptor
    pub const SYS_READ: u32 = 3;
    /// Write to a file descriptor
    pub const SYS_WRITE: u32 = 4;
    /// Open a named file or device
    pub const SYS_OPEN: u32 = 5;
    /// Close a file descriptor
    pub const SYS_CLOSE: u32 = 6;
    /// Copy the argument string into a user buffer
    pub const SYS_GETARGS: u32 = 7;
    /// Map the terminal's display page into user space
    pub const SYS_VIDMAP: u32 = 8;
    /// Install or reset a signal handler
    pub const SYS_SET_HANDLER: u32 = 9;
    /// Return from a signal handler (issued by the trampoline)
    pub const SYS_SIGRETURN: u32 = 10;

    /// Highest valid syscall number
    pub const SYS_MAX: u32 = SYS_SIGRETURN;
}

// ============================================================================
// Error Codes
// ============================================================================

pub mod error {
    /// Every failing syscall returns this value
    pub const E_FAIL: i32 = -1;
    /// Exit status of a task killed by an unhandled signal
    pub const STATUS_SIGNALED: u32 = 256;
}

// ============================================================================
// Signal Numbers
// ============================================================================

pub mod signal {
    /// Division by zero in user code
    pub const DIV_ZERO: u8 = 0;
    /// Invalid memory access or any other CPU exception
    pub const SEGFAULT: u8 = 1;
    /// Terminal break key (Ctrl-C)
    pub const INTERRUPT: u8 = 2;
    /// Timer alarm
    pub const ALARM: u8 = 3;
    /// User-defined
    pub const USER1: u8 = 4;
    /// Number of signal numbers
    pub const SIGNAL_COUNT: u8 = 5;
}

// ============================================================================
// Standard Descriptors and Limits
// ============================================================================

/// Standard input (terminal, read-only)
pub const STDIN: i32 = 0;
/// Standard output (terminal, write-only)
pub const STDOUT: i32 = 1;
/// Open-file slots per task
pub const MAX_FILES: usize = 8;
/// Longest command line accepted by execute
pub const MAX_COMMAND_LEN: usize = 128;
/// Name that opens the caller's terminal
pub const TERMINAL_NAME: &str = "terminal";
