//! End-to-end tests: real worker threads driving the kernel through the
//! supervisor loop.

use std::time::Duration;

use ember_kernel::{FaultPolicy, KernelConfig, ProcessId, SysEventType};
use ember_supervisor::programs::PROMPT;
use ember_supervisor::{
    default_fs, ConsoleOptions, Event, HostedHal, Outcome, Programs, Supervisor,
};

fn supervisor_with(config: KernelConfig) -> Supervisor {
    let programs = Programs::builtin();
    let fs = default_fs(&programs).unwrap();
    let hal = HostedHal::new(
        fs,
        ConsoleOptions {
            headless: true,
            debug: false,
        },
    );
    let mut supervisor = Supervisor::new(hal, config, programs);
    supervisor.boot().unwrap();
    supervisor
}

/// One terminal, shell started and waiting at its prompt.
fn booted_shell() -> Supervisor {
    let mut supervisor = supervisor_with(KernelConfig::default().with_terminals(1));
    supervisor.timer_tick();
    settle(&mut supervisor);
    supervisor
}

/// Handle events until the workers go quiet.
fn settle(supervisor: &mut Supervisor) {
    while supervisor.pump(Duration::from_millis(300)) {}
}

fn type_line(supervisor: &mut Supervisor, line: &str) {
    supervisor.handle(Event::Input(line.as_bytes().to_vec()));
    settle(supervisor);
}

fn transcript(supervisor: &Supervisor) -> String {
    supervisor.kernel().hal().transcript()
}

#[test]
fn test_first_tick_starts_shell_at_prompt() {
    let supervisor = booted_shell();
    assert_eq!(supervisor.kernel().current(), Some(ProcessId(1)));
    assert_eq!(supervisor.task_count(), 1);
    assert!(transcript(&supervisor).ends_with(PROMPT));
    assert!(supervisor.is_quiescent());
}

#[test]
fn test_shell_runs_program_and_resumes() {
    let mut supervisor = booted_shell();
    type_line(&mut supervisor, "hello ember\n");

    let text = transcript(&supervisor);
    assert!(text.contains("hello ember\nHello, ember!\n"));
    assert_eq!(text.matches(PROMPT).count(), 2);
    assert_eq!(supervisor.task_count(), 1);
    assert_eq!(supervisor.kernel().current(), Some(ProcessId(1)));

    let exits: Vec<_> = supervisor
        .kernel()
        .syslog()
        .events()
        .iter()
        .filter(|e| matches!(e.event_type, SysEventType::Exited { .. }))
        .map(|e| (e.sender, e.event_type.clone()))
        .collect();
    assert_eq!(exits, vec![(2, SysEventType::Exited { status: 0 })]);
}

#[test]
fn test_unknown_command_reported() {
    let mut supervisor = booted_shell();
    type_line(&mut supervisor, "frobnicate\n");
    assert!(transcript(&supervisor).contains("frobnicate: command not found\n"));
}

#[test]
fn test_cat_and_ls_read_the_filesystem() {
    let mut supervisor = booted_shell();
    type_line(&mut supervisor, "cat readme.txt\n");
    type_line(&mut supervisor, "ls\n");

    let text = transcript(&supervisor);
    assert!(text.contains("Ember: three terminals, one kernel.\n"));
    for name in [".", "rtc", "shell", "counter", "readme.txt", "frame0.txt"] {
        assert!(text.contains(&format!("\n{}\n", name)), "missing {}", name);
    }
}

#[test]
fn test_piped_lines_are_not_lost() {
    let mut supervisor = booted_shell();
    type_line(&mut supervisor, "hello one\nhello two\n");

    let text = transcript(&supervisor);
    assert!(text.contains("Hello, one!\n"));
    assert!(text.contains("Hello, two!\n"));
}

#[test]
fn test_unhandled_fault_kills_only_the_program() {
    let mut supervisor = booted_shell();
    type_line(&mut supervisor, "fault div\n");

    assert!(transcript(&supervisor).contains("program terminated by a signal\n"));
    assert!(!supervisor.kernel().is_halted());
    assert_eq!(supervisor.task_count(), 1);
}

#[test]
fn test_sigtest_handlers_then_default_action() {
    let mut supervisor = booted_shell();
    type_line(&mut supervisor, "sigtest\n");

    let text = transcript(&supervisor);
    assert!(text.contains("sigtest: caught signal 0\n"));
    assert!(text.contains("sigtest: caught signal 1\n"));
    assert!(text.contains("sigtest: handlers returned\n"));
    assert!(text.contains("sigtest: default action restored\n"));
    assert!(!text.contains("still alive"));
    assert!(text.contains("program terminated by a signal\n"));

    let delivered = supervisor
        .kernel()
        .syslog()
        .events()
        .iter()
        .filter(|e| matches!(e.event_type, SysEventType::SignalDelivered { .. }))
        .count();
    assert_eq!(delivered, 2);
}

#[test]
fn test_fault_halt_policy_stops_machine() {
    let mut supervisor = supervisor_with(
        KernelConfig::default()
            .with_terminals(1)
            .with_fault_policy(FaultPolicy::Halt),
    );
    supervisor.timer_tick();
    settle(&mut supervisor);
    type_line(&mut supervisor, "fault\n");

    assert!(supervisor.kernel().is_halted());
    let reason = supervisor.kernel().hal().halt_reason().unwrap();
    assert!(reason.contains("page fault"), "{}", reason);
}

#[test]
fn test_counter_follows_rtc_ticks() {
    let mut supervisor = booted_shell();
    type_line(&mut supervisor, "counter 3 16\n");
    assert_eq!(supervisor.kernel().hal().rtc_frequency(), 16);

    for _ in 0..10 {
        supervisor.rtc_tick();
        settle(&mut supervisor);
    }

    let text = transcript(&supervisor);
    assert!(text.contains("tick 1\ntick 2\ntick 3\n"));
    assert!(!text.contains("tick 4"));
    assert_eq!(supervisor.kernel().hal().rtc_frequency(), 2);
}

#[test]
fn test_ctrl_c_interrupts_foreground_program() {
    let mut supervisor = booted_shell();
    type_line(&mut supervisor, "counter 1000 2\n");
    type_line(&mut supervisor, "\x03");

    // The signal lands when the blocked read next completes.
    for _ in 0..4 {
        supervisor.rtc_tick();
        settle(&mut supervisor);
    }

    let text = transcript(&supervisor);
    assert!(text.contains("^C\n"));
    assert!(text.contains("program terminated by a signal\n"));
    assert_eq!(supervisor.task_count(), 1);
    assert_eq!(supervisor.kernel().current(), Some(ProcessId(1)));
}

#[test]
fn test_exit_leaves_terminal_for_a_new_shell() {
    let mut supervisor = booted_shell();
    type_line(&mut supervisor, "exit\n");
    assert_eq!(supervisor.kernel().current(), None);
    assert_eq!(supervisor.task_count(), 0);

    supervisor.timer_tick();
    settle(&mut supervisor);
    assert_eq!(supervisor.kernel().current(), Some(ProcessId(1)));
    assert_eq!(transcript(&supervisor).matches(PROMPT).count(), 2);
}

#[test]
fn test_run_until_input_closes() {
    let mut supervisor = supervisor_with(KernelConfig::default().with_terminals(2));
    let events = supervisor.event_sender();
    events
        .send(Event::Input(b"hello run\n".to_vec()))
        .unwrap();
    events.send(Event::InputClosed).unwrap();

    assert_eq!(supervisor.run(), Outcome::InputClosed);
    assert!(transcript(&supervisor).contains("Hello, run!\n"));
    assert_eq!(supervisor.task_count(), 0);

    let json = supervisor.syslog_json().unwrap();
    assert!(json.contains("\"Spawned\""));
}
