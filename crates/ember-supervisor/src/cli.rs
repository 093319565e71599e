//! Command-line options

use std::fmt;
use std::path::PathBuf;

use ember_kernel::config::MAX_TERMINALS;
use ember_kernel::{FaultPolicy, KernelConfig};

pub const USAGE: &str = "\
usage: ember-supervisor [options]

  --terminals <n>            virtual terminals (1-12, default 3)
  --fault-policy <halt|kill> what a CPU exception in a task does (default kill)
  --syslog <path>            write the audit trail as JSON on exit
  --headless                 do not mirror terminal output to stdout
  -h, --help                 show this text

environment:
  EMBER_DEBUG                print kernel debug lines to stderr (unset or 0 = off)
";

/// Parsed options.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Options {
    pub terminals: usize,
    pub fault_policy: FaultPolicy,
    pub syslog: Option<PathBuf>,
    pub headless: bool,
    pub debug: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            terminals: KernelConfig::default().terminal_count,
            fault_policy: FaultPolicy::default(),
            syslog: None,
            headless: false,
            debug: false,
        }
    }
}

impl Options {
    pub fn kernel_config(&self) -> KernelConfig {
        KernelConfig::default()
            .with_terminals(self.terminals)
            .with_fault_policy(self.fault_policy)
    }
}

/// Command-line errors
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CliError {
    /// `--help` was given
    Help,
    /// A flag that needs a value was last
    MissingValue(&'static str),
    /// A flag value did not parse
    BadValue { flag: &'static str, value: String },
    /// Unrecognized argument
    Unknown(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Help => write!(f, "help requested"),
            CliError::MissingValue(flag) => write!(f, "{} needs a value", flag),
            CliError::BadValue { flag, value } => write!(f, "bad value for {}: {}", flag, value),
            CliError::Unknown(arg) => write!(f, "unknown argument: {}", arg),
        }
    }
}

impl std::error::Error for CliError {}

/// Parse arguments (without the program name) and the `EMBER_DEBUG` value.
pub fn parse<I>(args: I, debug_env: Option<String>) -> Result<Options, CliError>
where
    I: IntoIterator<Item = String>,
{
    let mut options = Options {
        debug: debug_env.is_some_and(|v| !v.is_empty() && v != "0"),
        ..Options::default()
    };
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => return Err(CliError::Help),
            "--headless" => options.headless = true,
            "--terminals" => {
                let value = args.next().ok_or(CliError::MissingValue("--terminals"))?;
                options.terminals = match value.parse::<usize>() {
                    Ok(n) if (1..=MAX_TERMINALS).contains(&n) => n,
                    _ => {
                        return Err(CliError::BadValue {
                            flag: "--terminals",
                            value,
                        })
                    }
                };
            }
            "--fault-policy" => {
                let value = args.next().ok_or(CliError::MissingValue("--fault-policy"))?;
                options.fault_policy = match value.as_str() {
                    "halt" => FaultPolicy::Halt,
                    "kill" => FaultPolicy::KillTask,
                    _ => {
                        return Err(CliError::BadValue {
                            flag: "--fault-policy",
                            value: value.clone(),
                        })
                    }
                };
            }
            "--syslog" => {
                let value = args.next().ok_or(CliError::MissingValue("--syslog"))?;
                options.syslog = Some(PathBuf::from(value));
            }
            _ => return Err(CliError::Unknown(arg.clone())),
        }
    }
    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_defaults() {
        let options = parse(args(&[]), None).unwrap();
        assert_eq!(options, Options::default());
        assert_eq!(options.kernel_config(), KernelConfig::default());
    }

    #[test]
    fn test_all_flags() {
        let options = parse(
            args(&[
                "--terminals",
                "2",
                "--fault-policy",
                "halt",
                "--syslog",
                "out.json",
                "--headless",
            ]),
            Some(String::from("1")),
        )
        .unwrap();
        assert_eq!(options.terminals, 2);
        assert_eq!(options.fault_policy, FaultPolicy::Halt);
        assert_eq!(options.syslog, Some(PathBuf::from("out.json")));
        assert!(options.headless);
        assert!(options.debug);

        let config = options.kernel_config();
        assert_eq!(config.terminal_count, 2);
        assert_eq!(config.fault_policy, FaultPolicy::Halt);
    }

    #[test]
    fn test_debug_env_zero_is_off() {
        assert!(!parse(args(&[]), Some(String::from("0"))).unwrap().debug);
        assert!(!parse(args(&[]), Some(String::new())).unwrap().debug);
    }

    #[test]
    fn test_errors() {
        assert_eq!(
            parse(args(&["--terminals"]), None),
            Err(CliError::MissingValue("--terminals"))
        );
        assert_eq!(
            parse(args(&["--terminals", "13"]), None),
            Err(CliError::BadValue {
                flag: "--terminals",
                value: String::from("13")
            })
        );
        assert_eq!(
            parse(args(&["--fault-policy", "ignore"]), None),
            Err(CliError::BadValue {
                flag: "--fault-policy",
                value: String::from("ignore")
            })
        );
        assert_eq!(
            parse(args(&["--verbose"]), None),
            Err(CliError::Unknown(String::from("--verbose")))
        );
        assert_eq!(parse(args(&["-h"]), None), Err(CliError::Help));
    }
}
