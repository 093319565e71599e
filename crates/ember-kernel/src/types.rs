//! Core identifiers and the trap frame layout

use core::fmt;

/// Process identifier (1-based; slot = pid - 1)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub u32);

impl ProcessId {
    /// Frame / kernel-stack slot this pid owns.
    pub fn slot(&self) -> u32 {
        self.0 - 1
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kernel code segment selector
pub const KERNEL_CS: u32 = 0x10;
/// Kernel data segment selector
pub const KERNEL_DS: u32 = 0x18;
/// User code segment selector (ring 3)
pub const USER_CS: u32 = 0x23;
/// User data segment selector (ring 3)
pub const USER_DS: u32 = 0x2B;
/// Interrupt-enable bit in EFLAGS
pub const EFLAGS_IF: u32 = 0x200;

/// Register snapshot pushed on kernel entry.
///
/// Field order is the in-memory order, lowest address first. The same
/// 17 words are copied onto the user stack when a signal handler runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TrapFrame {
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
    pub esi: u32,
    pub edi: u32,
    pub ebp: u32,
    pub eax: u32,
    pub ds: u32,
    pub es: u32,
    pub fs: u32,
    /// Interrupt vector (or syscall gate)
    pub vector: u32,
    /// Error code pushed by the CPU (0 when none)
    pub error_code: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    pub esp: u32,
    pub ss: u32,
}

impl TrapFrame {
    /// Number of 32-bit words in a frame
    pub const WORDS: usize = 17;
    /// Size of a frame in bytes
    pub const SIZE: usize = Self::WORDS * 4;

    /// Frame for a fresh user context at `eip` with stack `esp`.
    pub fn user(eip: u32, esp: u32) -> Self {
        Self {
            ds: USER_DS,
            es: USER_DS,
            fs: USER_DS,
            eip,
            cs: USER_CS,
            eflags: EFLAGS_IF,
            esp,
            ss: USER_DS,
            ..Self::default()
        }
    }

    /// Frame as it looks on a syscall trap: number in eax, args in ebx/ecx/edx.
    pub fn syscall(number: u32, args: [u32; 3], eip: u32, esp: u32) -> Self {
        Self {
            eax: number,
            ebx: args[0],
            ecx: args[1],
            edx: args[2],
            vector: 0x80,
            ..Self::user(eip, esp)
        }
    }

    /// Whether the trapped code was running in user mode.
    pub fn from_user(&self) -> bool {
        self.cs & 3 == 3
    }

    /// Syscall arguments (ebx, ecx, edx).
    pub fn args(&self) -> [u32; 3] {
        [self.ebx, self.ecx, self.edx]
    }

    pub fn to_words(&self) -> [u32; Self::WORDS] {
        [
            self.ebx,
            self.ecx,
            self.edx,
            self.esi,
            self.edi,
            self.ebp,
            self.eax,
            self.ds,
            self.es,
            self.fs,
            self.vector,
            self.error_code,
            self.eip,
            self.cs,
            self.eflags,
            self.esp,
            self.ss,
        ]
    }

    pub fn from_words(w: &[u32; Self::WORDS]) -> Self {
        Self {
            ebx: w[0],
            ecx: w[1],
            edx: w[2],
            esi: w[3],
            edi: w[4],
            ebp: w[5],
            eax: w[6],
            ds: w[7],
            es: w[8],
            fs: w[9],
            vector: w[10],
            error_code: w[11],
            eip: w[12],
            cs: w[13],
            eflags: w[14],
            esp: w[15],
            ss: w[16],
        }
    }

    /// Little-endian image of the frame as it sits in memory.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        for (chunk, word) in out.chunks_exact_mut(4).zip(self.to_words()) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        out
    }

    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        let mut words = [0u32; Self::WORDS];
        for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(4)) {
            *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Self::from_words(&words)
    }
}
