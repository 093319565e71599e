//! Syscall decode and dispatch
//!
//! Ten calls enter through one trap: the number in eax, up to three
//! arguments in ebx, ecx, edx. User pointers are checked against the user
//! window before anything is copied. Every failure returns -1.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use ember_hal::layout::in_user_window;
use ember_hal::{HAL, MAX_NAME_LEN};
use ember_process::syscall::{
    SYS_CLOSE, SYS_EXECUTE, SYS_GETARGS, SYS_HALT, SYS_OPEN, SYS_READ, SYS_SET_HANDLER,
    SYS_SIGRETURN, SYS_VIDMAP, SYS_WRITE,
};
use ember_process::MAX_COMMAND_LEN;

use crate::error::KernelError;
use crate::io::ReadProgress;
use crate::types::TrapFrame;
use crate::{Dispatch, Kernel};

/// A decoded syscall.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Syscall {
    /// Terminate with a status byte
    Halt { status: u8 },
    /// Run a command line (pointer to a NUL-terminated string)
    Execute { command: u32 },
    Read { fd: i32, buf: u32, len: u32 },
    Write { fd: i32, buf: u32, len: u32 },
    /// Open by name (pointer to a NUL-terminated string)
    Open { name: u32 },
    Close { fd: i32 },
    GetArgs { buf: u32, len: u32 },
    /// Map the display page; the address is also stored at `out`
    Vidmap { out: u32 },
    /// Install (or, with 0, remove) a signal handler
    SetHandler { signal: u32, handler: u32 },
    SigReturn,
}

impl Syscall {
    pub fn decode(number: u32, args: [u32; 3]) -> Option<Self> {
        let [a, b, c] = args;
        Some(match number {
            SYS_HALT => Syscall::Halt { status: a as u8 },
            SYS_EXECUTE => Syscall::Execute { command: a },
            SYS_READ => Syscall::Read {
                fd: a as i32,
                buf: b,
                len: c,
            },
            SYS_WRITE => Syscall::Write {
                fd: a as i32,
                buf: b,
                len: c,
            },
            SYS_OPEN => Syscall::Open { name: a },
            SYS_CLOSE => Syscall::Close { fd: a as i32 },
            SYS_GETARGS => Syscall::GetArgs { buf: a, len: b },
            SYS_VIDMAP => Syscall::Vidmap { out: a },
            SYS_SET_HANDLER => Syscall::SetHandler {
                signal: a,
                handler: b,
            },
            SYS_SIGRETURN => Syscall::SigReturn,
            _ => return None,
        })
    }

    pub fn number(&self) -> u32 {
        match self {
            Syscall::Halt { .. } => SYS_HALT,
            Syscall::Execute { .. } => SYS_EXECUTE,
            Syscall::Read { .. } => SYS_READ,
            Syscall::Write { .. } => SYS_WRITE,
            Syscall::Open { .. } => SYS_OPEN,
            Syscall::Close { .. } => SYS_CLOSE,
            Syscall::GetArgs { .. } => SYS_GETARGS,
            Syscall::Vidmap { .. } => SYS_VIDMAP,
            Syscall::SetHandler { .. } => SYS_SET_HANDLER,
            Syscall::SigReturn => SYS_SIGRETURN,
        }
    }
}

impl<H: HAL> Kernel<H> {
    /// Syscall trap from the running task.
    ///
    /// On `Return` the result is already in `frame.eax`. `Enter`, `Resume`
    /// and `Halt` leave the frame alone; the caller's `execute` result
    /// arrives through a later `Resume`.
    pub fn syscall(&mut self, frame: &mut TrapFrame) -> Dispatch {
        if self.halted {
            return Dispatch::Halt;
        }
        let Some(pid) = self.current else {
            frame.eax = KernelError::NoCurrentTask.as_errno() as u32;
            return Dispatch::Return(KernelError::NoCurrentTask.as_errno());
        };

        let number = frame.eax;
        let now = self.hal.now_nanos();
        let request_id = self.syslog.record_call(pid.0, number, frame.args(), now);
        if let Ok(process) = self.current_process_mut() {
            process.metrics.syscall_count += 1;
        }

        let dispatch = match Syscall::decode(number, frame.args()) {
            Some(call) => self.dispatch_syscall(call, frame),
            None => {
                self.hal.debug_write(&alloc::format!(
                    "[kernel] pid {}: unknown syscall {}",
                    pid,
                    number
                ));
                Dispatch::Return(KernelError::InvalidSyscall.as_errno())
            }
        };

        if let Dispatch::Return(value) = dispatch {
            frame.eax = value as u32;
            let now = self.hal.now_nanos();
            self.syslog
                .record_result(pid.0, request_id, value as i64, now);
        }
        dispatch
    }

    fn dispatch_syscall(&mut self, call: Syscall, frame: &mut TrapFrame) -> Dispatch {
        let result = match call {
            Syscall::Halt { status } => return self.exit_or_halt(status as u32),
            Syscall::Execute { command } => {
                return match self
                    .read_user_str(command, MAX_COMMAND_LEN)
                    .and_then(|cmd| self.spawn(&cmd))
                {
                    Ok(entry) => Dispatch::Enter(entry),
                    Err(_) if self.halted => Dispatch::Halt,
                    Err(e) => Dispatch::Return(e.as_errno()),
                };
            }
            Syscall::Read { fd, buf, len } => {
                return match self.sys_read(fd, buf, len) {
                    Ok(ReadProgress::Done(bytes)) => Dispatch::Return(bytes.len() as i32),
                    Ok(ReadProgress::Block(channel)) => Dispatch::Block(channel),
                    Err(e) => Dispatch::Return(e.as_errno()),
                };
            }
            Syscall::Write { fd, buf, len } => self.sys_write(fd, buf, len).map(|n| n as i32),
            Syscall::Open { name } => self
                .read_user_str(name, MAX_NAME_LEN)
                .and_then(|name| self.open(&name)),
            Syscall::Close { fd } => self.close(fd).map(|()| 0),
            Syscall::GetArgs { buf, len } => self.sys_getargs(buf, len).map(|()| 0),
            Syscall::Vidmap { out } => self.vidmap(out).map(|addr| addr as i32),
            Syscall::SetHandler { signal, handler } => {
                self.set_signal_handler(signal, handler).map(|()| 0)
            }
            Syscall::SigReturn => self.signal_return(frame).map(|()| frame.eax as i32),
        };
        match result {
            Ok(value) => Dispatch::Return(value),
            Err(_) if self.halted => Dispatch::Halt,
            Err(e) => Dispatch::Return(e.as_errno()),
        }
    }

    /// Copy a NUL-terminated string of at most `max` bytes out of user space.
    fn read_user_str(&self, addr: u32, max: usize) -> Result<String, KernelError> {
        let mut bytes = Vec::new();
        let mut byte = [0u8; 1];
        for i in 0..=max as u32 {
            let at = addr.checked_add(i).ok_or(KernelError::BadAddress)?;
            if !in_user_window(at, 1) {
                return Err(KernelError::BadAddress);
            }
            self.hal.read_user(at, &mut byte)?;
            if byte[0] == 0 {
                return String::from_utf8(bytes).map_err(|_| KernelError::InvalidName);
            }
            bytes.push(byte[0]);
        }
        Err(KernelError::InvalidName)
    }

    /// Read into user memory; the returned bytes have already been copied.
    fn sys_read(&mut self, fd: i32, buf: u32, len: u32) -> Result<ReadProgress, KernelError> {
        if !in_user_window(buf, len) {
            return Err(KernelError::BadAddress);
        }
        let progress = self.read(fd, len as usize)?;
        if let ReadProgress::Done(bytes) = &progress {
            self.hal.write_user(buf, bytes)?;
        }
        Ok(progress)
    }

    fn sys_write(&mut self, fd: i32, buf: u32, len: u32) -> Result<usize, KernelError> {
        if !in_user_window(buf, len) {
            return Err(KernelError::BadAddress);
        }
        let mut data = vec![0u8; len as usize];
        self.hal.read_user(buf, &mut data)?;
        self.write(fd, &data)
    }

    fn sys_getargs(&mut self, buf: u32, len: u32) -> Result<(), KernelError> {
        if !in_user_window(buf, len) {
            return Err(KernelError::BadAddress);
        }
        let args = self.get_args(len as usize)?;
        self.hal.write_user(buf, &args)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::{Delivery, Signal};
    use crate::types::ProcessId;
    use crate::{ProcessState, WaitChannel};
    use ember_hal::layout::{IMAGE_BASE, SIGNAL_TRAMPOLINE, USER_STACK_TOP};
    use ember_hal_mock::MockHal;

    const SCRATCH: u32 = 0x0830_0000;

    fn running() -> Kernel<MockHal> {
        let hal = MockHal::new();
        hal.install_program("shell", IMAGE_BASE + 0x40, b"shell");
        hal.install_program("prog", IMAGE_BASE + 0x80, b"prog");
        hal.add_file("frame0.txt", b"fish");
        let mut kernel = Kernel::new(hal);
        kernel.boot().unwrap();
        kernel.on_timer_irq();
        kernel
    }

    fn call(kernel: &mut Kernel<MockHal>, number: u32, args: [u32; 3]) -> (Dispatch, TrapFrame) {
        let mut frame = TrapFrame::syscall(number, args, IMAGE_BASE + 0x50, USER_STACK_TOP - 64);
        let d = kernel.syscall(&mut frame);
        (d, frame)
    }

    fn stage(kernel: &Kernel<MockHal>, addr: u32, bytes: &[u8]) {
        kernel.hal().write_user(addr, bytes).unwrap();
    }

    #[test]
    fn test_decode() {
        assert_eq!(
            Syscall::decode(SYS_READ, [0, 5, 6]),
            Some(Syscall::Read {
                fd: 0,
                buf: 5,
                len: 6
            })
        );
        assert_eq!(Syscall::decode(0, [0; 3]), None);
        assert_eq!(Syscall::decode(11, [0; 3]), None);
        for n in 1..=10 {
            assert_eq!(Syscall::decode(n, [0; 3]).unwrap().number(), n);
        }
    }

    #[test]
    fn test_unknown_syscall_returns_minus_one() {
        let mut kernel = running();
        let (d, frame) = call(&mut kernel, 42, [0; 3]);
        assert_eq!(d, Dispatch::Return(-1));
        assert_eq!(frame.eax, u32::MAX);
    }

    #[test]
    fn test_write_then_read_file() {
        let mut kernel = running();
        stage(&kernel, SCRATCH, b"frame0.txt\0");
        let (d, _) = call(&mut kernel, SYS_OPEN, [SCRATCH, 0, 0]);
        assert_eq!(d, Dispatch::Return(2));

        let (d, _) = call(&mut kernel, SYS_READ, [2, SCRATCH + 0x100, 16]);
        assert_eq!(d, Dispatch::Return(4));
        let mut buf = [0u8; 4];
        kernel.hal().read_user(SCRATCH + 0x100, &mut buf).unwrap();
        assert_eq!(&buf, b"fish");

        stage(&kernel, SCRATCH, b"hello\n");
        let (d, _) = call(&mut kernel, SYS_WRITE, [1, SCRATCH, 6]);
        assert_eq!(d, Dispatch::Return(6));
        assert_eq!(kernel.hal().console_output(0), "hello\n");
    }

    #[test]
    fn test_bad_pointers_rejected() {
        let mut kernel = running();
        let (d, _) = call(&mut kernel, SYS_READ, [0, 0x1000, 16]);
        assert_eq!(d, Dispatch::Return(-1));
        let (d, _) = call(&mut kernel, SYS_WRITE, [1, 0x083F_FFFE, 16]);
        assert_eq!(d, Dispatch::Return(-1));
        let (d, _) = call(&mut kernel, SYS_OPEN, [0, 0, 0]);
        assert_eq!(d, Dispatch::Return(-1));
    }

    #[test]
    fn test_terminal_read_blocks() {
        let mut kernel = running();
        let (d, _) = call(&mut kernel, SYS_READ, [0, SCRATCH, 128]);
        assert_eq!(d, Dispatch::Block(WaitChannel::Terminal(0)));
    }

    #[test]
    fn test_execute_and_halt() {
        let mut kernel = running();
        stage(&kernel, SCRATCH, b"prog a b\0");
        let (d, _) = call(&mut kernel, SYS_EXECUTE, [SCRATCH, 0, 0]);
        let Dispatch::Enter(entry) = d else {
            panic!("expected Enter, got {:?}", d);
        };
        assert_eq!(entry.pid, 2);
        assert_eq!(
            kernel.process(ProcessId(1)).unwrap().state,
            ProcessState::WaitingChild(ProcessId(2))
        );

        let (d, _) = call(&mut kernel, SYS_GETARGS, [SCRATCH, 3, 0]);
        assert_eq!(d, Dispatch::Return(-1));
        let (d, _) = call(&mut kernel, SYS_GETARGS, [SCRATCH, 4, 0]);
        assert_eq!(d, Dispatch::Return(0));
        let mut buf = [0u8; 4];
        kernel.hal().read_user(SCRATCH, &mut buf).unwrap();
        assert_eq!(&buf, b"a b\0");

        let (d, _) = call(&mut kernel, SYS_HALT, [3, 0, 0]);
        assert_eq!(
            d,
            Dispatch::Resume {
                pid: Some(ProcessId(1)),
                value: 3
            }
        );
    }

    #[test]
    fn test_execute_missing_program() {
        let mut kernel = running();
        stage(&kernel, SCRATCH, b"nothere\0");
        let (d, _) = call(&mut kernel, SYS_EXECUTE, [SCRATCH, 0, 0]);
        assert_eq!(d, Dispatch::Return(-1));
        assert_eq!(kernel.current(), Some(ProcessId(1)));
    }

    #[test]
    fn test_handler_round_trip() {
        let mut kernel = running();
        let handler = IMAGE_BASE + 0x200;
        let (d, _) = call(&mut kernel, SYS_SET_HANDLER, [Signal::User1.number() as u32, handler, 0]);
        assert_eq!(d, Dispatch::Return(0));
        let (d, _) = call(&mut kernel, SYS_SET_HANDLER, [9, handler, 0]);
        assert_eq!(d, Dispatch::Return(-1));

        kernel.raise(Signal::User1).unwrap();
        let original = TrapFrame::syscall(4, [1, 2, 3], IMAGE_BASE + 0x50, USER_STACK_TOP - 64);
        let mut frame = original;
        frame.eax = 17;
        let before = frame;
        assert_eq!(
            kernel.return_to_user(&mut frame),
            Delivery::Delivered {
                signal: Signal::User1,
                handler
            }
        );
        assert_eq!(frame.eip, handler);
        let mut top = [0u8; 8];
        kernel.hal().read_user(frame.esp, &mut top).unwrap();
        assert_eq!(&top[..4], &SIGNAL_TRAMPOLINE.to_le_bytes());
        assert_eq!(&top[4..], &4u32.to_le_bytes());

        let mut sigreturn = TrapFrame::syscall(SYS_SIGRETURN, [0; 3], SIGNAL_TRAMPOLINE + 7, frame.esp + 8);
        assert_eq!(kernel.syscall(&mut sigreturn), Dispatch::Return(17));
        assert_eq!(sigreturn, before);

        let (d, _) = call(&mut kernel, SYS_SIGRETURN, [0; 3]);
        assert_eq!(d, Dispatch::Return(-1));
    }

    #[test]
    fn test_syscalls_audited() {
        let mut kernel = running();
        call(&mut kernel, SYS_CLOSE, [5, 0, 0]);
        let events: alloc::vec::Vec<_> = kernel.syslog().by_sender(1).collect();
        let n = events.len();
        assert_eq!(
            events[n - 2].event_type,
            crate::SysEventType::Request {
                syscall_num: SYS_CLOSE,
                args: [5, 0, 0]
            }
        );
        assert_eq!(
            kernel.process(ProcessId(1)).unwrap().metrics.syscall_count,
            1
        );
    }
}
