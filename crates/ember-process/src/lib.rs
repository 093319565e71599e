//! Process-side syscall library for the Ember kernel
//!
//! User programs never touch kernel state. Every request is a [`Trap`]
//! handed to a [`SyscallPort`]: the syscall number, its three register
//! arguments, byte strings to place in user memory first, and a user
//! memory region to copy back once the kernel has answered. Pointers in
//! the arguments refer to the fixed staging areas in [`scratch`].
//!
//! [`Process`] wraps a port with the typed calls (`execute`, `read`,
//! `write`, ...) and runs native signal handlers when the kernel redirects
//! the task into one.

#![no_std]
extern crate alloc;

mod constants;

pub use constants::*;

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use constants::syscall::*;

/// Staging areas inside the user window used to pass buffers.
pub mod scratch {
    /// NUL-terminated string argument (command line, file name)
    pub const ARG_AREA: u32 = 0x0830_0000;
    /// Out-pointer target for `vidmap`
    pub const OUT_WORD: u32 = 0x0830_0F00;
    /// Read/write data buffer
    pub const DATA_AREA: u32 = 0x0830_1000;
    /// Capacity of the data buffer
    pub const DATA_AREA_SIZE: usize = 0x8000;
    /// Handler addresses handed to the kernel (one slot per signal)
    pub const HANDLER_BASE: u32 = 0x0830_F000;
}

/// The calling task no longer exists (it halted or was killed).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Exited;

/// One syscall as seen from user space.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    /// Syscall number (eax)
    pub number: u32,
    /// Arguments (ebx, ecx, edx)
    pub args: [u32; 3],
    /// Bytes to write into user memory before the call
    pub stage: Vec<(u32, Vec<u8>)>,
    /// User memory `(address, length)` to read back after the call
    pub collect: Option<(u32, u32)>,
}

impl Invocation {
    /// A call with register arguments only.
    pub fn new(number: u32, args: [u32; 3]) -> Self {
        Self {
            number,
            args,
            stage: Vec::new(),
            collect: None,
        }
    }

    /// Stage bytes at a user address before the call.
    pub fn with_stage(mut self, addr: u32, bytes: Vec<u8>) -> Self {
        self.stage.push((addr, bytes));
        self
    }

    /// Read a user region back after the call.
    pub fn with_collect(mut self, addr: u32, len: u32) -> Self {
        self.collect = Some((addr, len));
        self
    }
}

/// Something that traps into the kernel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Trap {
    /// `int 0x80`
    Syscall(Invocation),
    /// A CPU exception raised by user code (exception vector)
    Fault(u8),
}

/// Redirect into a signal handler, reported with a completion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Upcall {
    /// Handler address registered with `set_handler`
    pub handler: u32,
    /// Signal number
    pub signal: u8,
}

/// The kernel's answer to a trap.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Completion {
    /// Value left in eax
    pub value: i32,
    /// Bytes read back from the `collect` region
    pub data: Vec<u8>,
    /// Signal handler to run before resuming
    pub upcall: Option<Upcall>,
}

/// Transport between a user program and the kernel.
pub trait SyscallPort {
    /// Trap into the kernel and wait for the answer.
    ///
    /// # Returns
    /// * `Err(Exited)` - The task terminated while trapped
    fn trap(&mut self, trap: Trap) -> Result<Completion, Exited>;
}

/// Native signal handler.
pub type SignalHandler<P> = fn(&mut Process<P>, u8) -> Result<(), Exited>;

/// Address the kernel records for a signal's native handler.
pub const fn handler_address(signal: u8) -> u32 {
    scratch::HANDLER_BASE + signal as u32 * 0x10
}

/// A user program's view of the kernel.
pub struct Process<P: SyscallPort> {
    port: P,
    handlers: BTreeMap<u32, SignalHandler<P>>,
}

impl<P: SyscallPort> Process<P> {
    /// Wrap a port.
    pub fn new(port: P) -> Self {
        Self {
            port,
            handlers: BTreeMap::new(),
        }
    }

    /// Access the underlying port.
    pub fn port(&mut self) -> &mut P {
        &mut self.port
    }

    fn call(&mut self, invocation: Invocation) -> Result<Completion, Exited> {
        let completion = self.port.trap(Trap::Syscall(invocation))?;
        self.run_upcalls(completion.upcall)?;
        Ok(completion)
    }

    /// Run handlers the kernel redirected into, then return from each.
    fn run_upcalls(&mut self, mut upcall: Option<Upcall>) -> Result<(), Exited> {
        while let Some(Upcall { handler, signal }) = upcall {
            if let Some(f) = self.handlers.get(&handler).copied() {
                f(self, signal)?;
            }
            let done = self
                .port
                .trap(Trap::Syscall(Invocation::new(SYS_SIGRETURN, [0; 3])))?;
            upcall = done.upcall;
        }
        Ok(())
    }

    /// Terminate with a status byte. The kernel never answers.
    pub fn halt(&mut self, status: u8) -> Exited {
        match self
            .port
            .trap(Trap::Syscall(Invocation::new(SYS_HALT, [status as u32, 0, 0])))
        {
            Ok(_) | Err(Exited) => Exited,
        }
    }

    /// Spawn a command line and wait for it; returns its exit status or -1.
    pub fn execute(&mut self, command: &str) -> Result<i32, Exited> {
        let inv = Invocation::new(SYS_EXECUTE, [scratch::ARG_AREA, 0, 0])
            .with_stage(scratch::ARG_AREA, c_string(command));
        Ok(self.call(inv)?.value)
    }

    /// Read up to `buf.len()` bytes.
    pub fn read(&mut self, fd: i32, buf: &mut [u8]) -> Result<i32, Exited> {
        let len = buf.len().min(scratch::DATA_AREA_SIZE) as u32;
        let inv = Invocation::new(SYS_READ, [fd as u32, scratch::DATA_AREA, len])
            .with_collect(scratch::DATA_AREA, len);
        let done = self.call(inv)?;
        if done.value > 0 {
            let n = (done.value as usize).min(done.data.len());
            buf[..n].copy_from_slice(&done.data[..n]);
        }
        Ok(done.value)
    }

    /// Write bytes (truncated to the staging area).
    pub fn write(&mut self, fd: i32, data: &[u8]) -> Result<i32, Exited> {
        let data = &data[..data.len().min(scratch::DATA_AREA_SIZE)];
        let inv = Invocation::new(SYS_WRITE, [fd as u32, scratch::DATA_AREA, data.len() as u32])
            .with_stage(scratch::DATA_AREA, data.to_vec());
        Ok(self.call(inv)?.value)
    }

    /// Open a file or device by name.
    pub fn open(&mut self, name: &str) -> Result<i32, Exited> {
        let inv = Invocation::new(SYS_OPEN, [scratch::ARG_AREA, 0, 0])
            .with_stage(scratch::ARG_AREA, c_string(name));
        Ok(self.call(inv)?.value)
    }

    /// Close a descriptor.
    pub fn close(&mut self, fd: i32) -> Result<i32, Exited> {
        Ok(self.call(Invocation::new(SYS_CLOSE, [fd as u32, 0, 0]))?.value)
    }

    /// Fetch the argument string, if any.
    pub fn args(&mut self) -> Result<Option<String>, Exited> {
        let len = MAX_COMMAND_LEN as u32;
        let inv = Invocation::new(SYS_GETARGS, [scratch::DATA_AREA, len, 0])
            .with_collect(scratch::DATA_AREA, len);
        let done = self.call(inv)?;
        if done.value != 0 {
            return Ok(None);
        }
        let end = done.data.iter().position(|&b| b == 0).unwrap_or(done.data.len());
        Ok(Some(String::from_utf8_lossy(&done.data[..end]).into_owned()))
    }

    /// Map the display page; returns its user address.
    pub fn vidmap(&mut self) -> Result<Option<u32>, Exited> {
        let inv = Invocation::new(SYS_VIDMAP, [scratch::OUT_WORD, 0, 0])
            .with_collect(scratch::OUT_WORD, 4);
        let done = self.call(inv)?;
        if done.value == error::E_FAIL || done.data.len() < 4 {
            return Ok(None);
        }
        let mut word = [0u8; 4];
        word.copy_from_slice(&done.data[..4]);
        Ok(Some(u32::from_le_bytes(word)))
    }

    /// Install (or with `None`, reset) a signal handler.
    pub fn set_handler(
        &mut self,
        signal: u8,
        handler: Option<SignalHandler<P>>,
    ) -> Result<i32, Exited> {
        let addr = handler_address(signal);
        let arg = if handler.is_some() { addr } else { 0 };
        let done = self.call(Invocation::new(SYS_SET_HANDLER, [signal as u32, arg, 0]))?;
        if done.value == 0 {
            match handler {
                Some(f) => {
                    self.handlers.insert(addr, f);
                }
                None => {
                    self.handlers.remove(&addr);
                }
            }
        }
        Ok(done.value)
    }

    /// Raise a CPU exception from user code.
    pub fn fault(&mut self, vector: u8) -> Result<i32, Exited> {
        let done = self.port.trap(Trap::Fault(vector))?;
        self.run_upcalls(done.upcall)?;
        Ok(done.value)
    }

    /// Write a string to standard output.
    pub fn print(&mut self, text: &str) -> Result<(), Exited> {
        self.write(STDOUT, text.as_bytes()).map(|_| ())
    }

    /// Read one line from standard input, without the trailing newline.
    pub fn read_line(&mut self) -> Result<String, Exited> {
        let mut buf = vec![0u8; MAX_COMMAND_LEN];
        let n = self.read(STDIN, &mut buf)?;
        let n = if n > 0 { n as usize } else { 0 };
        let line = buf[..n].strip_suffix(b"\n").unwrap_or(&buf[..n]);
        Ok(String::from_utf8_lossy(line).into_owned())
    }
}

fn c_string(s: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(s.len() + 1);
    bytes.extend_from_slice(s.as_bytes());
    bytes.push(0);
    bytes
}
