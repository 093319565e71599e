//! `ember-supervisor`: boot the kernel on the host and attach stdin.

use std::io::{ErrorKind, Read};
use std::path::Path;
use std::process::ExitCode;
use std::sync::mpsc::Sender;
use std::thread;

use ember_supervisor::cli::{self, CliError};
use ember_supervisor::{default_fs, ConsoleOptions, Event, HostedHal, Outcome, Programs, Supervisor};

fn main() -> ExitCode {
    let options = match cli::parse(std::env::args().skip(1), std::env::var("EMBER_DEBUG").ok()) {
        Ok(options) => options,
        Err(CliError::Help) => {
            print!("{}", cli::USAGE);
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            eprintln!("ember-supervisor: {}\n\n{}", e, cli::USAGE);
            return ExitCode::from(2);
        }
    };

    let programs = Programs::builtin();
    let fs = match default_fs(&programs) {
        Ok(fs) => fs,
        Err(e) => {
            eprintln!("ember-supervisor: cannot build filesystem: {:?}", e);
            return ExitCode::FAILURE;
        }
    };
    let hal = HostedHal::new(
        fs,
        ConsoleOptions {
            headless: options.headless,
            debug: options.debug,
        },
    );

    let mut supervisor = Supervisor::new(hal, options.kernel_config(), programs);
    if let Err(e) = supervisor.boot() {
        eprintln!("ember-supervisor: boot failed: {:?}", e);
        return ExitCode::FAILURE;
    }
    spawn_stdin_reader(supervisor.event_sender());

    let outcome = supervisor.run();

    if let Some(path) = &options.syslog {
        if let Err(e) = write_syslog(&supervisor, path) {
            eprintln!("ember-supervisor: cannot write {}: {}", path.display(), e);
        }
    }

    match outcome {
        Outcome::InputClosed => ExitCode::SUCCESS,
        Outcome::Halted { reason } => {
            eprintln!(
                "ember-supervisor: halted: {}",
                reason.as_deref().unwrap_or("unknown")
            );
            ExitCode::FAILURE
        }
    }
}

/// Forward host stdin to the supervisor until end of file.
fn spawn_stdin_reader(events: Sender<Event>) {
    let spawned = thread::Builder::new()
        .name(String::from("stdin"))
        .spawn(move || {
            let mut stdin = std::io::stdin().lock();
            let mut buf = [0u8; 256];
            loop {
                match stdin.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if events.send(Event::Input(buf[..n].to_vec())).is_err() {
                            return;
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
            let _ = events.send(Event::InputClosed);
        });
    if let Err(e) = spawned {
        eprintln!("ember-supervisor: no keyboard: {}", e);
    }
}

fn write_syslog(supervisor: &Supervisor, path: &Path) -> std::io::Result<()> {
    let json = supervisor.syslog_json().map_err(std::io::Error::other)?;
    std::fs::write(path, json)
}
