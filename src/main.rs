//! Purpose: `condwait` CLI entry point.
//! Role: Binary crate root; parses args, runs one path wait, reports how it ended.
//! Invariants: Exit 0 when the condition holds, 130 when a signal cancelled the wait.
//! Invariants: Other failures exit with `api::to_exit_code` of the error kind.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
use std::error::Error as StdError;
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Args, Parser, Subcommand, ValueHint, error::ErrorKind as ClapErrorKind};
use serde_json::{Map, Value, json};
use tracing_subscriber::EnvFilter;

use condwait::api::{
    DEFAULT_MAX_RELATIVE_LATENCY, DEFAULT_MAX_SLEEP, DEFAULT_MIN_SLEEP, Error, ErrorKind,
    PathCondition, PathWait, TimePlan, WaitOutcome, to_exit_code,
};

const CANCELLED_EXIT_CODE: i32 = 130;

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "condwait",
    version,
    about = "Block until a path exists or disappears, with bounded latency and CPU cost"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Wait until PATH exists
    Exists(WaitArgs),
    /// Wait until PATH no longer exists
    Missing(WaitArgs),
    /// Print the condwait version
    Version,
}

#[derive(Args, Debug)]
struct WaitArgs {
    #[arg(help = "Path to watch", value_hint = ValueHint::AnyPath)]
    path: PathBuf,
    #[arg(
        long,
        default_value_t = DEFAULT_MIN_SLEEP.as_millis() as i64,
        allow_negative_numbers = true,
        help = "Minimum sleep between checks in milliseconds (-1 = unbounded)"
    )]
    min_sleep_ms: i64,
    #[arg(
        long,
        default_value_t = DEFAULT_MAX_SLEEP.as_millis() as i64,
        allow_negative_numbers = true,
        help = "Maximum sleep between checks in milliseconds (-1 = unbounded)"
    )]
    max_sleep_ms: i64,
    #[arg(
        long,
        default_value_t = DEFAULT_MAX_RELATIVE_LATENCY,
        allow_negative_numbers = true,
        help = "Sleep grows by this fraction of the time already waited (0 disables)"
    )]
    max_relative_latency: f64,
    #[arg(long, help = "Sleep min-sleep once before the first check")]
    sleep_first: bool,
    #[arg(long, help = "Poll only; do not watch the parent directory")]
    poll: bool,
    #[arg(long, help = "Emit the outcome as JSON on stdout")]
    json: bool,
}

fn main() {
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, Error> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(clap_error_summary(&err))
                    .with_hint("Run `condwait --help` for usage."));
            }
        },
    };

    init_tracing();

    match cli.command {
        Command::Exists(args) => run_wait(args, PathCondition::Exists),
        Command::Missing(args) => run_wait(args, PathCondition::Missing),
        Command::Version => {
            println!("condwait {}", env!("CARGO_PKG_VERSION"));
            Ok(RunOutcome::ok())
        }
    }
}

fn run_wait(args: WaitArgs, condition: PathCondition) -> Result<RunOutcome, Error> {
    let plan = TimePlan::from_millis(
        args.min_sleep_ms,
        args.max_sleep_ms,
        args.max_relative_latency,
        args.sleep_first,
    )?;
    let wait = if args.poll {
        PathWait::polling(&args.path, condition)
    } else {
        PathWait::new(&args.path, condition)
    };
    let wait = Arc::new(wait.with_plan(plan));
    install_cancel_handler(wait.clone())?;

    let start = Instant::now();
    let outcome = wait.wait_outcome()?;
    let elapsed = start.elapsed();

    if args.json {
        emit_json(outcome_json(&args.path, condition, outcome, elapsed));
    } else if outcome == WaitOutcome::Cancelled {
        eprintln!(
            "cancelled while waiting for {} to be {}",
            args.path.display(),
            condition.as_str()
        );
    }

    Ok(match outcome {
        WaitOutcome::Satisfied => RunOutcome::ok(),
        WaitOutcome::Cancelled => RunOutcome::with_code(CANCELLED_EXIT_CODE),
    })
}

#[cfg(unix)]
fn install_cancel_handler(wait: Arc<PathWait>) -> Result<(), Error> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM]).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to install signal handler")
            .with_source(err)
    })?;
    std::thread::Builder::new()
        .name("condwait-signals".to_string())
        .spawn(move || {
            for signal in signals.forever() {
                tracing::debug!(signal, "cancelling wait");
                // The flag persists until the next check, so a signal that lands
                // before the wait starts still cancels it.
                if let Err(err) = wait.cancel_one() {
                    tracing::warn!(error = %err, "failed to cancel wait");
                }
            }
        })
        .map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to spawn signal thread")
                .with_source(err)
        })?;
    Ok(())
}

#[cfg(not(unix))]
fn install_cancel_handler(_wait: Arc<PathWait>) -> Result<(), Error> {
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

fn clap_error_summary(err: &clap::Error) -> String {
    let rendered = err.to_string();
    let first = rendered.lines().next().unwrap_or("invalid arguments");
    first.trim_start_matches("error: ").trim().to_string()
}

fn outcome_json(
    path: &Path,
    condition: PathCondition,
    outcome: WaitOutcome,
    elapsed: Duration,
) -> Value {
    let outcome = match outcome {
        WaitOutcome::Satisfied => "satisfied",
        WaitOutcome::Cancelled => "cancelled",
    };
    json!({
        "path": path.display().to_string(),
        "condition": condition.as_str(),
        "outcome": outcome,
        "elapsed_ms": elapsed.as_millis() as u64,
    })
}

fn emit_json(value: Value) {
    let json = serde_json::to_string(&value)
        .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}

fn emit_error(err: &Error) {
    if io::stderr().is_terminal() {
        eprintln!("{}", error_text(err));
        return;
    }

    let value = error_json(err);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    err.message()
        .map(str::to_string)
        .unwrap_or_else(|| format!("{:?}", err.kind()))
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut current = err.source();
    while let Some(source) = current {
        causes.push(source.to_string());
        current = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error) -> String {
    let mut lines = vec![format!("error: {}", error_message(err))];
    if let Some(hint) = err.hint() {
        lines.push(format!("hint: {hint}"));
    }
    if let Some(path) = err.path() {
        lines.push(format!("path: {}", path.display()));
    }
    for cause in error_causes(err) {
        lines.push(format!("caused by: {cause}"));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wait_flags() {
        let cli = Cli::try_parse_from([
            "condwait",
            "exists",
            "/tmp/flag",
            "--min-sleep-ms",
            "-1",
            "--max-sleep-ms",
            "50",
            "--max-relative-latency",
            "0.1",
            "--sleep-first",
            "--poll",
            "--json",
        ])
        .expect("parse");
        let Command::Exists(args) = cli.command else {
            panic!("expected exists");
        };
        assert_eq!(args.path, PathBuf::from("/tmp/flag"));
        assert_eq!(args.min_sleep_ms, -1);
        assert_eq!(args.max_sleep_ms, 50);
        assert_eq!(args.max_relative_latency, 0.1);
        assert!(args.sleep_first && args.poll && args.json);
    }

    #[test]
    fn wait_flags_default_to_library_plan() {
        let cli = Cli::try_parse_from(["condwait", "missing", "lockfile"]).expect("parse");
        let Command::Missing(args) = cli.command else {
            panic!("expected missing");
        };
        let plan = TimePlan::from_millis(
            args.min_sleep_ms,
            args.max_sleep_ms,
            args.max_relative_latency,
            args.sleep_first,
        )
        .expect("plan");
        assert_eq!(plan, TimePlan::default());
    }

    #[test]
    fn outcome_json_shape_is_stable() {
        let value = outcome_json(
            Path::new("/tmp/flag"),
            PathCondition::Missing,
            WaitOutcome::Cancelled,
            Duration::from_millis(42),
        );
        assert_eq!(
            value,
            json!({
                "path": "/tmp/flag",
                "condition": "missing",
                "outcome": "cancelled",
                "elapsed_ms": 42,
            })
        );
    }

    #[test]
    fn error_json_includes_hint_path_and_causes() {
        let err = Error::new(ErrorKind::Io)
            .with_message("failed to check path existence")
            .with_hint("Check permissions.")
            .with_path("/root/secret")
            .with_source(io::Error::new(io::ErrorKind::PermissionDenied, "denied"));
        let value = error_json(&err);
        assert_eq!(value["error"]["kind"], "Io");
        assert_eq!(value["error"]["hint"], "Check permissions.");
        assert_eq!(value["error"]["path"], "/root/secret");
        assert_eq!(value["error"]["causes"], json!(["denied"]));

        let text = error_text(&err);
        assert!(text.starts_with("error: failed to check path existence"));
        assert!(text.contains("caused by: denied"));
    }
}
