mod scenario;

use clap::Parser;
use rcgc::runtime::{JSRuntime, RuntimeConfig};
use std::fs;
use tracing_subscriber::EnvFilter;

const DEFAULT_GC_THRESHOLD: usize = 256;

#[derive(Debug, Parser)]
#[command(name = "rcgc-run", about = "Run a host ownership scenario against an rcgc runtime")]
struct Args {
    /// Scenario text; `;` separates commands.
    #[arg(short = 'e', long = "eval")]
    eval: Option<String>,

    /// Heap limit in bytes, with an optional k/M/G suffix.
    #[arg(long = "memory-limit")]
    memory_limit: Option<String>,

    #[arg(long = "gc-threshold", default_value_t = DEFAULT_GC_THRESHOLD)]
    gc_threshold: usize,

    #[arg(short = 'v', long = "verbose", default_value_t = false)]
    verbose: bool,

    /// Scenario file, one command per line.
    #[arg()]
    file: Option<String>,
}

#[derive(Debug, Default, Eq, PartialEq)]
struct CliConfig {
    memory_limit: Option<usize>,
    gc_threshold: usize,
    verbose: bool,
    eval: Option<String>,
    file: Option<String>,
}

#[derive(Debug, Eq, PartialEq)]
enum ParseError {
    MissingMemoryLimit,
    InvalidMemoryLimit,
    MissingScenario,
    ConflictingScenario,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::MissingMemoryLimit => write!(f, "expecting memory limit"),
            ParseError::InvalidMemoryLimit => write!(f, "invalid memory limit"),
            ParseError::MissingScenario => write!(f, "expecting -e or a scenario file"),
            ParseError::ConflictingScenario => write!(f, "-e and a scenario file are exclusive"),
        }
    }
}

#[derive(Debug)]
enum CliError {
    Io(String),
    Scenario(scenario::ScenarioError),
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Io(msg) => write!(f, "{msg}"),
            CliError::Scenario(err) => write!(f, "{err}"),
        }
    }
}

impl From<scenario::ScenarioError> for CliError {
    fn from(err: scenario::ScenarioError) -> Self {
        CliError::Scenario(err)
    }
}

fn main() {
    let args = Args::parse();
    let config = match build_config(args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(2);
        }
    };
    init_logging(config.verbose);
    if let Err(err) = run_cli(config) {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();
}

fn build_config(args: Args) -> Result<CliConfig, ParseError> {
    let memory_limit = args
        .memory_limit
        .as_deref()
        .map(parse_memory_limit)
        .transpose()?;
    match (&args.eval, &args.file) {
        (None, None) => return Err(ParseError::MissingScenario),
        (Some(_), Some(_)) => return Err(ParseError::ConflictingScenario),
        _ => {}
    }
    Ok(CliConfig {
        memory_limit,
        gc_threshold: args.gc_threshold,
        verbose: args.verbose,
        eval: args.eval,
        file: args.file,
    })
}

fn parse_memory_limit(input: &str) -> Result<usize, ParseError> {
    let trimmed = input.trim();
    let (number, multiplier) = match trimmed.as_bytes().last() {
        None => return Err(ParseError::MissingMemoryLimit),
        Some(b'g' | b'G') => (&trimmed[..trimmed.len() - 1], 1024.0 * 1024.0 * 1024.0),
        Some(b'm' | b'M') => (&trimmed[..trimmed.len() - 1], 1024.0 * 1024.0),
        Some(b'k' | b'K') => (&trimmed[..trimmed.len() - 1], 1024.0),
        Some(_) => (trimmed, 1.0),
    };
    if number.is_empty() {
        return Err(ParseError::MissingMemoryLimit);
    }
    let value: f64 = number.parse().map_err(|_| ParseError::InvalidMemoryLimit)?;
    let value = value * multiplier;
    if value.is_sign_negative() || !value.is_finite() {
        return Err(ParseError::InvalidMemoryLimit);
    }
    Ok(value as usize)
}

fn run_cli(config: CliConfig) -> Result<(), CliError> {
    let source = match (config.eval, config.file.as_deref()) {
        (Some(expr), _) => expr.replace(';', "\n"),
        (None, Some(file)) => {
            fs::read_to_string(file).map_err(|err| CliError::Io(format!("{file}: {err}")))?
        }
        (None, None) => return Ok(()),
    };
    let mut rt = JSRuntime::new(RuntimeConfig {
        memory_limit: config.memory_limit,
        gc_threshold: config.gc_threshold,
    });
    let stdout = std::io::stdout();
    scenario::run(&mut rt, &source, &mut stdout.lock())?;
    Ok(())
}
