//! Hosted HAL implementation
//!
//! Runs the kernel inside an ordinary desktop process:
//! - Memory is a [`SoftMmu`] behind a mutex
//! - The filesystem is a read-only [`RamFs`] built before boot
//! - The visible terminal is mirrored to stdout, debug lines go to stderr
//! - Interrupt lines are bits; the supervisor raises them from wall-clock
//!   deadlines and the kernel clears them with `acknowledge_irq`
//!
//! `enter_user` cannot jump anywhere. It reads the program name the image
//! carries at its entry point and queues a [`Launch`] for the supervisor,
//! which starts the matching native program on a worker thread.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use ember_hal::layout::{SCREEN_COLS, USER_WINDOW_END};
use ember_hal::{
    DirEntry, ExecutionContext, HalError, Irq, RamFs, SoftMmu, UserEntry, HAL, MAX_NAME_LEN,
};

/// Kernel stack pointer the hosted CPU starts on
const BOOT_STACK: u32 = 0x0040_0000;

/// A task start requested through `enter_user`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Launch {
    /// Where the kernel asked to enter user mode
    pub entry: UserEntry,
    /// Program name read from the image at the entry point
    pub program: String,
}

/// Console behavior of the hosted machine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConsoleOptions {
    /// Do not print terminal output to stdout
    pub headless: bool,
    /// Print kernel and supervisor debug lines to stderr
    pub debug: bool,
}

/// Lock a mutex, recovering the data if a worker panicked while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn irq_bit(irq: Irq) -> u8 {
    match irq {
        Irq::Timer => 1 << 0,
        Irq::Keyboard => 1 << 1,
        Irq::Rtc => 1 << 2,
    }
}

/// Hosted HAL implementation
pub struct HostedHal {
    mmu: Mutex<SoftMmu>,
    fs: RamFs,
    console: ConsoleOptions,
    boot: Instant,
    /// Unmasked interrupt lines
    irq_enabled: AtomicU8,
    /// Lines raised and not yet acknowledged
    irq_in_service: AtomicU8,
    interrupts: AtomicBool,
    pit_divisor: AtomicU32,
    rtc_rate: AtomicU8,
    live: Mutex<ExecutionContext>,
    return_value: Mutex<Option<i32>>,
    kernel_stack: AtomicU32,
    launches: Mutex<VecDeque<Launch>>,
    visible: AtomicUsize,
    /// Everything rendered on the visible terminal
    transcript: Mutex<Vec<u8>>,
    halt_reason: Mutex<Option<String>>,
}

impl HostedHal {
    /// Create a hosted machine over a prepared filesystem.
    pub fn new(fs: RamFs, console: ConsoleOptions) -> Self {
        Self {
            mmu: Mutex::new(SoftMmu::new()),
            fs,
            console,
            boot: Instant::now(),
            irq_enabled: AtomicU8::new(0),
            irq_in_service: AtomicU8::new(0),
            interrupts: AtomicBool::new(true),
            pit_divisor: AtomicU32::new(0),
            rtc_rate: AtomicU8::new(0),
            live: Mutex::new(ExecutionContext {
                esp: BOOT_STACK,
                ebp: BOOT_STACK,
            }),
            return_value: Mutex::new(None),
            kernel_stack: AtomicU32::new(0),
            launches: Mutex::new(VecDeque::new()),
            visible: AtomicUsize::new(0),
            transcript: Mutex::new(Vec::new()),
            halt_reason: Mutex::new(None),
        }
    }

    /// Raise an interrupt line.
    ///
    /// Returns false when the line is masked or its previous interrupt has
    /// not been acknowledged; the caller then drops this one.
    pub fn raise(&self, irq: Irq) -> bool {
        let bit = irq_bit(irq);
        if self.irq_enabled.load(Ordering::SeqCst) & bit == 0 {
            return false;
        }
        self.irq_in_service.fetch_or(bit, Ordering::SeqCst) & bit == 0
    }

    pub fn irq_enabled(&self, irq: Irq) -> bool {
        self.irq_enabled.load(Ordering::SeqCst) & irq_bit(irq) != 0
    }

    /// Divisor last written to the interval timer (0 before boot).
    pub fn pit_divisor(&self) -> u16 {
        self.pit_divisor.load(Ordering::SeqCst) as u16
    }

    /// Frequency selected by the last RTC rate write (0 before boot).
    pub fn rtc_frequency(&self) -> u32 {
        match self.rtc_rate.load(Ordering::SeqCst) {
            0 => 0,
            rate => 32768 >> (rate - 1),
        }
    }

    /// Next task start queued by `enter_user`.
    pub fn take_launch(&self) -> Option<Launch> {
        lock(&self.launches).pop_front()
    }

    /// Terminal mirrored to stdout.
    pub fn visible_terminal(&self) -> usize {
        self.visible.load(Ordering::SeqCst)
    }

    /// Everything rendered on the visible terminal so far, lossily decoded.
    pub fn transcript(&self) -> String {
        String::from_utf8_lossy(&lock(&self.transcript)).into_owned()
    }

    /// Why the machine stopped, if it did.
    pub fn halt_reason(&self) -> Option<String> {
        lock(&self.halt_reason).clone()
    }

    pub fn return_value(&self) -> Option<i32> {
        *lock(&self.return_value)
    }

    /// Read the NUL-terminated program name an image carries at `entry`.
    fn program_name(&self, entry: u32) -> String {
        let mmu = lock(&self.mmu);
        let mut name = Vec::new();
        let mut byte = [0u8; 1];
        for i in 0..MAX_NAME_LEN as u32 {
            let addr = entry + i;
            if addr >= USER_WINDOW_END || mmu.read(addr, &mut byte).is_err() || byte[0] == 0 {
                break;
            }
            name.push(byte[0]);
        }
        String::from_utf8_lossy(&name).into_owned()
    }

    fn emit(&self, data: &[u8]) {
        lock(&self.transcript).extend_from_slice(data);
        if !self.console.headless {
            let mut out = std::io::stdout().lock();
            // A closed stdout only loses the mirror; the screen state lives in the kernel.
            let _ = out.write_all(data).and_then(|()| out.flush());
        }
    }
}

impl HAL for HostedHal {
    // === Interrupt Controller ===

    fn enable_irq(&self, irq: Irq) {
        self.irq_enabled.fetch_or(irq_bit(irq), Ordering::SeqCst);
    }

    fn disable_irq(&self, irq: Irq) {
        self.irq_enabled.fetch_and(!irq_bit(irq), Ordering::SeqCst);
    }

    fn acknowledge_irq(&self, irq: Irq) {
        self.irq_in_service
            .fetch_and(!irq_bit(irq), Ordering::SeqCst);
    }

    fn interrupts_disable(&self) -> bool {
        self.interrupts.swap(false, Ordering::SeqCst)
    }

    fn interrupts_restore(&self, enabled: bool) {
        self.interrupts.store(enabled, Ordering::SeqCst);
    }

    // === Timers ===

    fn program_pit(&self, divisor: u16) {
        self.pit_divisor.store(divisor as u32, Ordering::SeqCst);
    }

    fn write_rtc_rate(&self, rate: u8) {
        self.rtc_rate.store(rate, Ordering::SeqCst);
    }

    // === CPU ===

    fn capture_context(&self) -> ExecutionContext {
        *lock(&self.live)
    }

    fn restore_context(&self, ctx: &ExecutionContext) {
        *lock(&self.live) = *ctx;
        *lock(&self.return_value) = None;
    }

    fn set_return_value(&self, value: i32) {
        *lock(&self.return_value) = Some(value);
    }

    fn set_kernel_stack(&self, esp0: u32) {
        self.kernel_stack.store(esp0, Ordering::SeqCst);
    }

    fn enter_user(&self, entry: &UserEntry) {
        *lock(&self.live) = ExecutionContext {
            esp: entry.kernel_stack,
            ebp: entry.kernel_stack,
        };
        let program = self.program_name(entry.entry);
        lock(&self.launches).push_back(Launch {
            entry: *entry,
            program,
        });
    }

    // === Memory ===

    fn map_user_window(&self, frame_base: u32) {
        lock(&self.mmu).map_window(frame_base);
    }

    fn map_display_page(&self, vaddr: u32, terminal: usize) {
        lock(&self.mmu).map_display(vaddr, terminal);
    }

    fn flush_tlb(&self) {
        // SoftMmu translates on every access
    }

    fn read_user(&self, vaddr: u32, buf: &mut [u8]) -> Result<(), HalError> {
        lock(&self.mmu).read(vaddr, buf)
    }

    fn write_user(&self, vaddr: u32, data: &[u8]) -> Result<(), HalError> {
        lock(&self.mmu).write(vaddr, data)
    }

    // === Filesystem ===

    fn fs_lookup(&self, name: &str) -> Option<DirEntry> {
        self.fs.lookup(name)
    }

    fn fs_entry(&self, index: usize) -> Option<DirEntry> {
        self.fs.entry(index)
    }

    fn fs_read(&self, inode: u32, offset: u32, buf: &mut [u8]) -> Result<usize, HalError> {
        self.fs.read(inode, offset, buf)
    }

    // === Console ===

    fn console_write(&self, terminal: usize, data: &[u8]) {
        if terminal == self.visible_terminal() {
            self.emit(data);
        }
    }

    fn console_refresh(&self, terminal: usize, cells: &[u16]) {
        self.visible.store(terminal, Ordering::SeqCst);
        let mut screen = format!("\n[terminal {}]\n", terminal + 1).into_bytes();
        let rows: Vec<String> = cells
            .chunks(SCREEN_COLS)
            .map(|row| {
                let text: String = row.iter().map(|&cell| (cell & 0xFF) as u8 as char).collect();
                String::from(text.trim_end_matches([' ', '\0']))
            })
            .collect();
        let used = rows.iter().rposition(|r| !r.is_empty()).map_or(0, |i| i + 1);
        for row in &rows[..used] {
            screen.extend_from_slice(row.as_bytes());
            screen.push(b'\n');
        }
        self.emit(&screen);
    }

    // === Time & Debug ===

    fn now_nanos(&self) -> u64 {
        self.boot.elapsed().as_nanos() as u64
    }

    fn debug_write(&self, msg: &str) {
        if self.console.debug {
            eprintln!("{}", msg);
        }
    }

    fn halt(&self, reason: &str) {
        eprintln!("[hal] machine halted: {}", reason);
        *lock(&self.halt_reason) = Some(String::from(reason));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_hal::layout::{frame_for_slot, IMAGE_BASE};

    fn headless() -> HostedHal {
        HostedHal::new(
            RamFs::new(),
            ConsoleOptions {
                headless: true,
                debug: false,
            },
        )
    }

    #[test]
    fn test_raise_needs_unmask_and_ack() {
        let hal = headless();
        assert!(!hal.raise(Irq::Timer));

        hal.enable_irq(Irq::Timer);
        assert!(hal.raise(Irq::Timer));
        assert!(!hal.raise(Irq::Timer));

        hal.acknowledge_irq(Irq::Timer);
        assert!(hal.raise(Irq::Timer));
        assert!(!hal.raise(Irq::Rtc));
    }

    #[test]
    fn test_enter_user_queues_named_program() {
        let hal = headless();
        hal.map_user_window(frame_for_slot(0));
        hal.write_user(IMAGE_BASE + 40, b"hello\0").unwrap();

        let entry = UserEntry {
            pid: 1,
            entry: IMAGE_BASE + 40,
            user_stack: 0x083F_FFFC,
            kernel_stack: 0x007F_FFFC,
        };
        hal.enter_user(&entry);

        let launch = hal.take_launch().unwrap();
        assert_eq!(launch.entry, entry);
        assert_eq!(launch.program, "hello");
        assert_eq!(hal.capture_context().esp, 0x007F_FFFC);
        assert!(hal.take_launch().is_none());
    }

    #[test]
    fn test_console_mirrors_visible_terminal_only() {
        let hal = headless();
        hal.console_write(0, b"zero ");
        hal.console_write(1, b"one ");

        let mut cells = vec![0x0720u16; 80 * 25];
        cells[0] = 0x0700 | b'$' as u16;
        hal.console_refresh(1, &cells);
        hal.console_write(1, b"again");

        let text = hal.transcript();
        assert!(text.starts_with("zero "));
        assert!(!text.contains("one"));
        assert!(text.contains("[terminal 2]\n$\n"));
        assert!(text.ends_with("again"));
    }

    #[test]
    fn test_rtc_rate_decoding() {
        let hal = headless();
        assert_eq!(hal.rtc_frequency(), 0);
        hal.write_rtc_rate(15);
        assert_eq!(hal.rtc_frequency(), 2);
        hal.write_rtc_rate(6);
        assert_eq!(hal.rtc_frequency(), 1024);
    }

    #[test]
    fn test_restore_clears_return_value() {
        let hal = headless();
        hal.set_return_value(5);
        assert_eq!(hal.return_value(), Some(5));
        hal.restore_context(&ExecutionContext { esp: 1, ebp: 2 });
        assert_eq!(hal.return_value(), None);
        assert_eq!(hal.capture_context(), ExecutionContext { esp: 1, ebp: 2 });
    }
}
