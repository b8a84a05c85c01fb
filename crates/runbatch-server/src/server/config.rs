use anyhow::bail;
use clap::Parser;
use core::time::Duration;
use runbatch::SchedulerConfig;

/// Runtime configuration for the `runbatch-server` binary.
///
/// These settings control how requests are buffered, how long callers may ask
/// to wait, and what a run actually does. All values are parsed from CLI
/// arguments or environment variables (a `.env` file is loaded first).
#[derive(Parser, Debug, Clone)]
#[command(
    name = "runbatch-server",
    version,
    about = "An HTTP service that coalesces run requests into single-flight executions"
)]
pub struct CliArgs {
    /// Address to listen on (TCP or Unix socket path; use --uds for Unix socket).
    ///
    /// Example: "0.0.0.0:8080" or "/tmp/runbatch.sock"
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:8080"))]
    pub server_addr: String,

    /// Listen on a Unix socket instead of TCP. If set, `SERVER_ADDR` must be a file path.
    #[arg(short, long, default_value_t = false)]
    pub uds: bool,

    /// Number of submissions buffered between HTTP handlers and the scheduler.
    ///
    /// Handlers only wait for the scheduler when this many submissions are
    /// already queued, so this should exceed the largest expected burst.
    ///
    /// Environment variable: `INTAKE_CAPACITY`
    #[arg(long, env = "INTAKE_CAPACITY", default_value_t = 100)]
    pub intake_capacity: usize,

    /// Capacity of the generation lifecycle event buffer.
    ///
    /// Environment variable: `EVENT_CAPACITY`
    #[arg(long, env = "EVENT_CAPACITY", default_value_t = 64)]
    pub event_capacity: usize,

    /// Largest `delay` (in seconds) a caller may ask for.
    ///
    /// Environment variable: `MAX_DELAY_SECS`
    #[arg(long, env = "MAX_DELAY_SECS", default_value_t = 86_400)]
    pub max_delay_secs: u64,

    /// Seconds to wait for an in-flight run to finish during shutdown.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 30)]
    pub shutdown_timeout: u64,

    /// Program executed once per run. When unset, runs are simulated by
    /// sleeping for `--simulate-secs`.
    ///
    /// Environment variable: `RUN_COMMAND`
    #[arg(long, env = "RUN_COMMAND")]
    pub command: Option<String>,

    /// Argument passed to `--command`. Repeat for multiple arguments.
    ///
    /// Environment variable: `RUN_ARGS` (space separated)
    #[arg(long = "arg", env = "RUN_ARGS", value_delimiter = ' ', allow_hyphen_values = true)]
    pub args: Vec<String>,

    /// Duration of a simulated run, in seconds.
    ///
    /// Environment variable: `SIMULATE_SECS`
    #[arg(long, env = "SIMULATE_SECS", default_value_t = 8)]
    pub simulate_secs: u64,
}

/// What a single run does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    Command { program: String, args: Vec<String> },
    Simulate { duration: Duration },
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub uds: bool,
    pub max_delay: Duration,
    pub run_mode: RunMode,
    pub scheduler: SchedulerConfig,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.intake_capacity == 0 {
            bail!("INTAKE_CAPACITY must be greater than 0");
        }

        if args.event_capacity == 0 {
            bail!("EVENT_CAPACITY must be greater than 0");
        }

        let run_mode = match args.command {
            Some(program) if program.trim().is_empty() => {
                bail!("RUN_COMMAND must not be empty")
            }
            Some(program) => RunMode::Command {
                program,
                args: args.args,
            },
            None if !args.args.is_empty() => {
                bail!("RUN_ARGS given without RUN_COMMAND")
            }
            None => RunMode::Simulate {
                duration: Duration::from_secs(args.simulate_secs),
            },
        };

        Ok(Self {
            server_addr: args.server_addr,
            uds: args.uds,
            max_delay: Duration::from_secs(args.max_delay_secs),
            run_mode,
            scheduler: SchedulerConfig {
                intake_capacity: args.intake_capacity,
                event_capacity: args.event_capacity,
                shutdown_timeout: Duration::from_secs(args.shutdown_timeout),
            },
        })
    }
}
