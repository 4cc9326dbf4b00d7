use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use brj_codegen::{EvalError, OptLevel, Outcome, Session, SessionConfig};
use clap::{ArgAction, Parser, Subcommand};
use log::LevelFilter;

mod check;
mod manifest;

use crate::check::Checker;
use crate::manifest::{load_manifest, ManifestError};

#[derive(Parser)]
#[command(name = "brj", about = "The Bridje programming language")]
struct Cli {
    /// More log output on stderr (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Read a .brj file and print its forms
    Read {
        /// Path to the .brj source file
        file: PathBuf,
    },
    /// Resolve and type-check without running
    Check {
        /// Path to the .brj source file (omit to use brj.pkg)
        file: Option<PathBuf>,
    },
    /// Compile and run via the Cranelift JIT
    Run {
        /// Path to the .brj source file (omit to use brj.pkg)
        file: Option<PathBuf>,
        /// Cranelift optimisation level: none, speed or speed_and_size
        #[arg(long)]
        opt_level: Option<OptLevel>,
        /// Skip the Cranelift IR verifier
        #[arg(long)]
        no_verify: bool,
        /// Print the outcome of every form, not only expression values
        #[arg(long)]
        echo: bool,
    },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("{path}: {source}")]
    Eval { path: PathBuf, source: EvalError },
}

/// Writes `level: target: message` lines to stderr.
struct StderrLogger;

impl log::Log for StderrLogger {
    fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record<'_>) {
        if self.enabled(record.metadata()) {
            let _ = writeln!(
                std::io::stderr(),
                "{}: {}: {}",
                record.level().as_str().to_lowercase(),
                record.target(),
                record.args()
            );
        }
    }

    fn flush(&self) {}
}

static LOGGER: StderrLogger = StderrLogger;

fn init_logging(verbose: u8) {
    let from_env = std::env::var("BRJ_LOG").ok().and_then(|level| level.parse::<LevelFilter>().ok());
    let level = from_env.unwrap_or(match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    });
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}

fn read_file(path: &Path) -> Result<String, CliError> {
    std::fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// The given file, or every source listed in `brj.pkg` in the current
/// directory, together with the manifest's opt level.
fn sources(file: Option<PathBuf>) -> Result<(Vec<PathBuf>, Option<OptLevel>), CliError> {
    match file {
        Some(file) => Ok((vec![file], None)),
        None => {
            let manifest = load_manifest(Path::new("."))?;
            log::debug!("package {} with {} sources", manifest.name, manifest.sources.len());
            Ok((manifest.sources, manifest.opt_level))
        }
    }
}

fn read_command(file: &Path) -> Result<(), CliError> {
    let source = read_file(file)?;
    let forms = brj_reader::read_all(&source).map_err(|e| CliError::Eval {
        path: file.to_path_buf(),
        source: e.into(),
    })?;
    for form in forms {
        println!("{}", form);
    }
    Ok(())
}

fn check_command(file: Option<PathBuf>) -> Result<(), CliError> {
    let (paths, _) = sources(file)?;
    let mut checker = Checker::new().map_err(|source| CliError::Eval {
        path: PathBuf::from("brj.core"),
        source,
    })?;
    for path in paths {
        let source = read_file(&path)?;
        let lines = checker
            .check_str(&source)
            .map_err(|source| CliError::Eval { path: path.clone(), source })?;
        for line in lines {
            println!("{}", line);
        }
    }
    println!("OK");
    Ok(())
}

fn run_command(file: Option<PathBuf>, opt_level: Option<OptLevel>, no_verify: bool, echo: bool) -> Result<(), CliError> {
    let (paths, manifest_opt_level) = sources(file)?;

    let mut config = SessionConfig::default();
    if let Some(level) = opt_level.or(manifest_opt_level) {
        config.codegen.opt_level = level;
    }
    if no_verify {
        config.codegen.verify = false;
    }
    log::debug!("opt level {}, verifier {}", config.codegen.opt_level, config.codegen.verify);

    let session = Session::new(config).map_err(|source| CliError::Eval {
        path: PathBuf::from("brj.core"),
        source,
    })?;

    for path in paths {
        let source = read_file(&path)?;
        let outcomes = session
            .eval_str(&source)
            .map_err(|source| CliError::Eval { path: path.clone(), source })?;
        for outcome in outcomes {
            if echo || matches!(outcome, Outcome::Value { .. }) {
                println!("{}", outcome);
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Command::Read { file } => read_command(&file),
        Command::Check { file } => check_command(file),
        Command::Run {
            file,
            opt_level,
            no_verify,
            echo,
        } => run_command(file, opt_level, no_verify, echo),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
