//! Round-robin terminal scheduler
//!
//! Each timer tick moves to the next terminal and runs its foreground
//! task, starting a shell there if the terminal has none. Blocked tasks
//! are not skipped: they spin on their read until input arrives.

use ember_hal::layout::DISPLAY_VADDR;
use ember_hal::{Irq, HAL};

use crate::types::ProcessId;
use crate::{Dispatch, Kernel, SysEventType};

/// Round-robin position over the terminals.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Scheduler {
    current: usize,
    count: usize,
    ticks: u64,
}

impl Scheduler {
    /// Start just before terminal 0 so the first tick lands on it.
    pub fn new(count: usize) -> Self {
        let count = count.max(1);
        Self {
            current: count - 1,
            count,
            ticks: 0,
        }
    }

    /// Terminal whose task the CPU belongs to.
    pub fn current_terminal(&self) -> usize {
        self.current
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Move to the next terminal.
    pub fn advance(&mut self) -> usize {
        self.ticks += 1;
        self.current = (self.current + 1) % self.count;
        self.current
    }
}

impl<H: HAL> Kernel<H> {
    /// Timer interrupt: one scheduling decision.
    pub fn on_timer_irq(&mut self) -> Dispatch {
        self.hal.acknowledge_irq(Irq::Timer);
        if self.halted {
            return Dispatch::Halt;
        }

        let terminal = self.scheduler.advance();
        match self.terminals[terminal].owner {
            None => self.start_shell(terminal),
            Some(owner) if Some(owner) == self.current => Dispatch::Continue,
            Some(owner) => self.switch_to(owner),
        }
    }

    fn start_shell(&mut self, terminal: usize) -> Dispatch {
        self.save_current_context();
        let shell = self.config.shell.clone();
        match self.spawn_on(terminal, &shell, None) {
            Ok(entry) => Dispatch::Enter(entry),
            Err(e) => {
                if self.halted {
                    return Dispatch::Halt;
                }
                self.hal.debug_write(&alloc::format!(
                    "[kernel] terminal {}: cannot start {}: {:?}",
                    terminal,
                    shell,
                    e
                ));
                Dispatch::Continue
            }
        }
    }

    fn save_current_context(&mut self) {
        let ctx = self.hal.capture_context();
        if let Ok(process) = self.current_process_mut() {
            process.context = ctx;
        }
    }

    /// Hand the CPU to `target`: window, kernel stack, TLB, then contexts.
    fn switch_to(&mut self, target: ProcessId) -> Dispatch {
        let Some(next) = self.processes.get(target) else {
            return Dispatch::Continue;
        };
        let (frame, kernel_stack, context) = (next.frame_base(), next.kernel_stack(), next.context);
        let display = next.vidmap.then_some(next.terminal);

        self.hal.map_user_window(frame);
        if let Some(terminal) = display {
            self.hal.map_display_page(DISPLAY_VADDR, terminal);
        }
        self.hal.set_kernel_stack(kernel_stack);
        self.hal.flush_tlb();

        let from = self.current;
        let saved = self.hal.capture_context();
        if let Ok(process) = self.current_process_mut() {
            process.context = saved;
            process.metrics.context_switches += 1;
        }
        self.hal.restore_context(&context);
        self.current = Some(target);

        let now = self.hal.now_nanos();
        self.syslog
            .record(target.0, SysEventType::Switched { to: target.0 }, now);
        Dispatch::Switch { from, to: target }
    }
}
