//! Built-in user programs
//!
//! Each program is native code that only talks to the kernel through its
//! [`Process`] handle. On disk a program is an ordinary executable image
//! whose entry point holds the program's NUL-terminated name; the hosted
//! HAL reads that name back in `enter_user` and the supervisor looks it up
//! in [`Programs`].

use std::collections::BTreeMap;

use ember_hal::layout::IMAGE_BASE;
use ember_hal::ramfs::EXEC_HEADER_LEN;
use ember_hal::{build_image, HalError, RamFs};
use ember_process::error::{E_FAIL, STATUS_SIGNALED};
use ember_process::{signal, Exited, Process, SyscallPort, STDOUT};

use crate::worker::{Program, WorkerPort};

/// Shell prompt
pub const PROMPT: &str = "ember> ";

/// Name of the periodic-timer device node
pub const RTC_DEVICE: &str = "rtc";

const README: &str = "Ember: three terminals, one kernel.\n\
Alt+F1..F3 (ESC 1..3 on a host terminal) switches terminals.\n\
Try: ls, cat readme.txt, counter 5 16, sigtest, fault div\n";

const FRAME0: &str = "\
        o\n\
   ><(((('>\n\
  ~~~~~~~~~~~~\n";

/// Registry of native programs by name.
#[derive(Clone)]
pub struct Programs {
    by_name: BTreeMap<&'static str, Program>,
}

impl Programs {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            by_name: BTreeMap::new(),
        }
    }

    /// Every built-in program.
    pub fn builtin() -> Self {
        let mut programs = Self::new();
        programs.register("shell", shell::<WorkerPort>);
        programs.register("hello", hello::<WorkerPort>);
        programs.register("cat", cat::<WorkerPort>);
        programs.register("ls", ls::<WorkerPort>);
        programs.register("counter", counter::<WorkerPort>);
        programs.register("sigtest", sigtest::<WorkerPort>);
        programs.register("fault", fault::<WorkerPort>);
        programs
    }

    pub fn register(&mut self, name: &'static str, program: Program) {
        self.by_name.insert(name, program);
    }

    pub fn get(&self, name: &str) -> Option<Program> {
        self.by_name.get(name).copied()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.by_name.keys().copied()
    }

    /// Write one executable image per program into `fs`.
    pub fn install(&self, fs: &mut RamFs) -> Result<(), HalError> {
        let entry = IMAGE_BASE + EXEC_HEADER_LEN as u32;
        for name in self.names() {
            let mut payload = name.as_bytes().to_vec();
            payload.push(0);
            fs.add_file(name, &build_image(entry, &payload))?;
        }
        Ok(())
    }
}

impl Default for Programs {
    fn default() -> Self {
        Self::new()
    }
}

/// The filesystem the supervisor boots with: programs, the RTC node and
/// two text files.
pub fn default_fs(programs: &Programs) -> Result<RamFs, HalError> {
    let mut fs = RamFs::new();
    fs.add_rtc(RTC_DEVICE)?;
    programs.install(&mut fs)?;
    fs.add_file("readme.txt", README.as_bytes())?;
    fs.add_file("frame0.txt", FRAME0.as_bytes())?;
    Ok(fs)
}

// ============================================================================
// Programs
// ============================================================================

fn ignore_signal<P: SyscallPort>(_p: &mut Process<P>, _signal: u8) -> Result<(), Exited> {
    Ok(())
}

/// Read commands and run them one at a time. Ctrl-C is ignored here and
/// only reaches the program in the foreground.
pub fn shell<P: SyscallPort>(p: &mut Process<P>) -> Result<u8, Exited> {
    p.set_handler(signal::INTERRUPT, Some(ignore_signal::<P>))?;
    loop {
        p.print(PROMPT)?;
        let line = p.read_line()?;
        let command = line.trim();
        if command.is_empty() {
            continue;
        }
        if command == "exit" {
            return Ok(0);
        }
        let status = p.execute(command)?;
        if status == E_FAIL {
            p.print(&format!("{}: command not found\n", command))?;
        } else if status == STATUS_SIGNALED as i32 {
            p.print("program terminated by a signal\n")?;
        }
    }
}

pub fn hello<P: SyscallPort>(p: &mut Process<P>) -> Result<u8, Exited> {
    let name = p.args()?.unwrap_or_else(|| String::from("world"));
    p.print(&format!("Hello, {}!\n", name))?;
    Ok(0)
}

/// Print a file.
pub fn cat<P: SyscallPort>(p: &mut Process<P>) -> Result<u8, Exited> {
    let Some(name) = p.args()? else {
        p.print("usage: cat <file>\n")?;
        return Ok(1);
    };
    let fd = p.open(&name)?;
    if fd < 0 {
        p.print(&format!("cat: {}: no such file\n", name))?;
        return Ok(1);
    }
    let mut buf = [0u8; 1024];
    loop {
        let n = p.read(fd, &mut buf)?;
        if n <= 0 {
            break;
        }
        p.write(STDOUT, &buf[..n as usize])?;
    }
    p.close(fd)?;
    Ok(0)
}

/// List the directory.
pub fn ls<P: SyscallPort>(p: &mut Process<P>) -> Result<u8, Exited> {
    let fd = p.open(".")?;
    if fd < 0 {
        return Ok(1);
    }
    let mut name = [0u8; 32];
    loop {
        let n = p.read(fd, &mut name)?;
        if n <= 0 {
            break;
        }
        let mut line = name[..n as usize].to_vec();
        line.push(b'\n');
        p.write(STDOUT, &line)?;
    }
    p.close(fd)?;
    Ok(0)
}

/// `counter [count] [hz]`: print a line on each virtual RTC tick.
pub fn counter<P: SyscallPort>(p: &mut Process<P>) -> Result<u8, Exited> {
    let args = p.args()?.unwrap_or_default();
    let mut words = args.split_whitespace();
    let count: u32 = words.next().and_then(|w| w.parse().ok()).unwrap_or(10);
    let hz: u32 = words.next().and_then(|w| w.parse().ok()).unwrap_or(8);

    let fd = p.open(RTC_DEVICE)?;
    if fd < 0 {
        p.print("counter: no rtc\n")?;
        return Ok(1);
    }
    if p.write(fd, &hz.to_le_bytes())? < 0 {
        p.print(&format!("counter: bad frequency {}\n", hz))?;
        p.close(fd)?;
        return Ok(1);
    }
    let mut tick = [0u8; 4];
    for i in 1..=count {
        p.read(fd, &mut tick)?;
        p.print(&format!("tick {}\n", i))?;
    }
    p.close(fd)?;
    Ok(0)
}

fn report_signal<P: SyscallPort>(p: &mut Process<P>, signal: u8) -> Result<(), Exited> {
    p.print(&format!("sigtest: caught signal {}\n", signal))
}

/// Install handlers, take two exceptions, then die on a third.
pub fn sigtest<P: SyscallPort>(p: &mut Process<P>) -> Result<u8, Exited> {
    p.set_handler(signal::DIV_ZERO, Some(report_signal::<P>))?;
    p.set_handler(signal::SEGFAULT, Some(report_signal::<P>))?;

    p.fault(0)?;
    p.fault(13)?;
    p.print("sigtest: handlers returned\n")?;

    p.set_handler(signal::DIV_ZERO, None)?;
    p.print("sigtest: default action restored\n")?;
    p.fault(0)?;
    p.print("sigtest: still alive?\n")?;
    Ok(1)
}

/// `fault [div|segv|ud]`: raise an exception with no handler installed.
pub fn fault<P: SyscallPort>(p: &mut Process<P>) -> Result<u8, Exited> {
    let vector = match p.args()?.as_deref() {
        Some("div") => 0,
        Some("ud") => 6,
        _ => 14,
    };
    p.fault(vector)?;
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_hal::FileKind;
    use ember_process::syscall::*;
    use ember_process::{Completion, Invocation, Trap};
    use std::collections::VecDeque;

    /// Port that plays a tiny kernel: terminal lines in, bytes out.
    #[derive(Default)]
    struct FakePort {
        input: VecDeque<&'static str>,
        args: Option<&'static str>,
        output: String,
        executed: Vec<String>,
        faults: Vec<u8>,
    }

    fn staged(inv: &Invocation) -> String {
        let bytes = &inv.stage[0].1;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        String::from_utf8_lossy(&bytes[..end]).into_owned()
    }

    impl SyscallPort for FakePort {
        fn trap(&mut self, trap: Trap) -> Result<Completion, Exited> {
            let inv = match trap {
                Trap::Syscall(inv) => inv,
                Trap::Fault(vector) => {
                    self.faults.push(vector);
                    return Err(Exited);
                }
            };
            let mut done = Completion::default();
            match inv.number {
                SYS_WRITE => {
                    self.output.push_str(&staged(&inv));
                    done.value = inv.args[2] as i32;
                }
                SYS_READ => {
                    let line = self.input.pop_front().ok_or(Exited)?;
                    done.value = line.len() as i32;
                    done.data = line.as_bytes().to_vec();
                }
                SYS_EXECUTE => {
                    let command = staged(&inv);
                    done.value = if command.starts_with("nope") { -1 } else { 0 };
                    self.executed.push(command);
                }
                SYS_GETARGS => match self.args {
                    Some(a) => {
                        done.data = format!("{}\0", a).into_bytes();
                    }
                    None => done.value = -1,
                },
                SYS_OPEN => done.value = -1,
                SYS_HALT => return Err(Exited),
                _ => {}
            }
            Ok(done)
        }
    }

    #[test]
    fn test_shell_runs_commands_until_exit() {
        let mut p = Process::new(FakePort {
            input: VecDeque::from(["hello bob\n", "\n", "nope\n", "exit\n"]),
            ..FakePort::default()
        });
        assert_eq!(shell(&mut p), Ok(0));

        let port = p.port();
        assert_eq!(port.executed, vec!["hello bob", "nope"]);
        assert_eq!(port.output.matches(PROMPT).count(), 4);
        assert!(port.output.contains("nope: command not found\n"));
    }

    #[test]
    fn test_hello_uses_args() {
        let mut p = Process::new(FakePort {
            args: Some("ember"),
            ..FakePort::default()
        });
        assert_eq!(hello(&mut p), Ok(0));
        assert_eq!(p.port().output, "Hello, ember!\n");

        let mut p = Process::new(FakePort::default());
        hello(&mut p).unwrap();
        assert_eq!(p.port().output, "Hello, world!\n");
    }

    #[test]
    fn test_cat_reports_missing_file() {
        let mut p = Process::new(FakePort {
            args: Some("missing.txt"),
            ..FakePort::default()
        });
        assert_eq!(cat(&mut p), Ok(1));
        assert_eq!(p.port().output, "cat: missing.txt: no such file\n");
    }

    #[test]
    fn test_fault_picks_vector_from_args() {
        let mut p = Process::new(FakePort {
            args: Some("div"),
            ..FakePort::default()
        });
        assert_eq!(fault(&mut p), Err(Exited));
        assert_eq!(p.port().faults, vec![0]);
    }

    #[test]
    fn test_default_fs_layout() {
        let programs = Programs::builtin();
        let fs = default_fs(&programs).unwrap();

        assert_eq!(fs.entry(0).unwrap().name, ".");
        assert_eq!(fs.lookup(RTC_DEVICE).unwrap().kind, FileKind::Rtc);
        for name in programs.names() {
            let entry = fs.lookup(name).unwrap();
            assert_eq!(entry.kind, FileKind::Regular);
            let mut image = vec![0u8; 64];
            let n = fs.read(entry.inode, 0, &mut image).unwrap();
            assert_eq!(&image[EXEC_HEADER_LEN..n - 1], name.as_bytes());
        }
        assert!(fs.lookup("readme.txt").is_some());
    }
}
