//! Worker threads
//!
//! Every live task runs its native program on its own thread. The thread
//! holds a [`WorkerPort`]: a sender into the supervisor's event queue and
//! the task's [`WakeSlot`]. A trap is one send followed by one wait.

use std::io;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use ember_process::{Completion, Exited, Process, SyscallPort, Trap};

use crate::wake::WakeSlot;

/// A native user program: runs to completion and returns its status byte.
pub type Program = fn(&mut Process<WorkerPort>) -> Result<u8, Exited>;

/// Answer posted to a parked worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Wake {
    /// The trap completed
    Done(Completion),
    /// The task is gone; unwind the program
    Exited,
}

/// Something for the supervisor loop to handle.
#[derive(Debug)]
pub enum Event {
    /// A worker trapped into the kernel
    Trap {
        pid: u32,
        /// Distinguishes workers that reused a pid
        serial: u64,
        trap: Trap,
    },
    /// Bytes read from host stdin
    Input(Vec<u8>),
    /// Host stdin reached end of file
    InputClosed,
}

/// A task's connection to the supervisor.
pub struct WorkerPort {
    pid: u32,
    serial: u64,
    events: Sender<Event>,
    wake: Arc<WakeSlot<Wake>>,
}

impl WorkerPort {
    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl SyscallPort for WorkerPort {
    fn trap(&mut self, trap: Trap) -> Result<Completion, Exited> {
        self.events
            .send(Event::Trap {
                pid: self.pid,
                serial: self.serial,
                trap,
            })
            .map_err(|_| Exited)?;
        match self.wake.wait() {
            Wake::Done(completion) => Ok(completion),
            Wake::Exited => Err(Exited),
        }
    }
}

/// Supervisor-side handle to a running worker.
pub struct WorkerHandle {
    pub serial: u64,
    pub wake: Arc<WakeSlot<Wake>>,
    thread: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }
}

/// Start `program` for task `pid` on a new thread.
///
/// A program that returns normally halts with its status; one that sees
/// `Exited` was already terminated by the kernel.
pub fn spawn(
    pid: u32,
    serial: u64,
    name: &str,
    program: Program,
    events: Sender<Event>,
) -> io::Result<WorkerHandle> {
    let wake = Arc::new(WakeSlot::new());
    let port = WorkerPort {
        pid,
        serial,
        events,
        wake: wake.clone(),
    };
    let thread = thread::Builder::new()
        .name(format!("{}-{}", name, pid))
        .spawn(move || {
            let mut process = Process::new(port);
            if let Ok(status) = program(&mut process) {
                process.halt(status);
            }
        })?;
    Ok(WorkerHandle {
        serial,
        wake,
        thread,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_process::syscall::{SYS_HALT, SYS_WRITE};
    use ember_process::Invocation;
    use std::sync::mpsc;

    fn greet(p: &mut Process<WorkerPort>) -> Result<u8, Exited> {
        p.print("hi")?;
        Ok(3)
    }

    fn next_trap(rx: &mpsc::Receiver<Event>) -> (u32, u64, Trap) {
        match rx.recv().unwrap() {
            Event::Trap { pid, serial, trap } => (pid, serial, trap),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_worker_traps_then_halts_with_status() {
        let (tx, rx) = mpsc::channel();
        let handle = spawn(4, 9, "greet", greet, tx).unwrap();

        let (pid, serial, trap) = next_trap(&rx);
        assert_eq!((pid, serial), (4, 9));
        let Trap::Syscall(Invocation { number, stage, .. }) = trap else {
            panic!("expected syscall");
        };
        assert_eq!(number, SYS_WRITE);
        assert_eq!(stage[0].1, b"hi".to_vec());
        handle.wake.post(Wake::Done(Completion {
            value: 2,
            ..Completion::default()
        }));

        let (_, _, trap) = next_trap(&rx);
        let Trap::Syscall(Invocation { number, args, .. }) = trap else {
            panic!("expected syscall");
        };
        assert_eq!(number, SYS_HALT);
        assert_eq!(args[0], 3);
        handle.wake.post(Wake::Exited);
        handle.thread.join().unwrap();
    }

    #[test]
    fn test_exited_unwinds_program() {
        let (tx, rx) = mpsc::channel();
        let handle = spawn(1, 0, "greet", greet, tx).unwrap();
        next_trap(&rx);
        handle.wake.post(Wake::Exited);
        handle.thread.join().unwrap();
        assert!(rx.try_recv().is_err());
    }
}
