//! ghostvc CLI

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use ghostvc::error::{Result, VerifyError, report_error};
use ghostvc::loader::{Loader, SourceMap};
use ghostvc::oracle::OracleKind;
use ghostvc::symbols::SymbolTable;
use ghostvc::{Verifier, VerifierConfig};

#[derive(Parser)]
#[command(name = "ghostvc", version, about = "ghostvc - verify ghost-annotated programs")]
struct Cli {
    /// Increase logging (-v info, -vv debug, -vvv trace); GHOSTVC_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Verify the entry package and every package it imports
    Verify {
        /// Source files of the entry package
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Directory searched for imported packages
        #[arg(short = 'I', long = "include")]
        include: Vec<PathBuf>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
        /// Oracle deadline per obligation
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Declarations verified in parallel
        #[arg(long)]
        jobs: Option<usize>,
        #[arg(long, value_enum)]
        oracle: Option<OracleKind>,
        /// Solver executable for `--oracle smt`
        #[arg(long)]
        solver: Option<PathBuf>,
        /// Configuration file (default: ./ghostvc.toml when present)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Dump the symbol table (debug)
    Symbols {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[arg(short = 'I', long = "include")]
        include: Vec<PathBuf>,
    },
    /// Parse and dump AST (debug)
    Parse {
        /// Source file to parse
        file: PathBuf,
    },
    /// Tokenize and dump tokens (debug)
    Tokens {
        /// Source file to tokenize
        file: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut sources = SourceMap::default();
    let result = match cli.command {
        Command::Verify {
            files,
            include,
            json,
            timeout_ms,
            jobs,
            oracle,
            solver,
            config,
        } => {
            let options = VerifyOptions {
                include,
                json,
                timeout_ms,
                jobs,
                oracle,
                solver,
                config,
            };
            verify_files(&files, options, &mut sources)
        }
        Command::Symbols { files, include } => dump_symbols(&files, include, &mut sources),
        Command::Parse { file } => parse_file(&file, &mut sources),
        Command::Tokens { file } => tokenize_file(&file, &mut sources),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(err) => {
            render(&err, &sources);
            ExitCode::from(2)
        }
    }
}

fn init_tracing(verbose: u8) {
    let filter = EnvFilter::try_from_env("GHOSTVC_LOG").unwrap_or_else(|_| {
        EnvFilter::new(match verbose {
            0 => "warn",
            1 => "ghostvc=info",
            2 => "ghostvc=debug",
            _ => "ghostvc=trace",
        })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Render with source context when the offending file is known
fn render(err: &VerifyError, sources: &SourceMap) {
    let file = match err.location() {
        Some(location) => Some(location.file.as_str()),
        None => sources.last(),
    };
    match file.and_then(|name| sources.get(name).map(|source| (name, source))) {
        Some((name, source)) if report_error(name, source, err).is_ok() => {}
        _ => eprintln!("Error: {err}"),
    }
}

struct VerifyOptions {
    include: Vec<PathBuf>,
    json: bool,
    timeout_ms: Option<u64>,
    jobs: Option<usize>,
    oracle: Option<OracleKind>,
    solver: Option<PathBuf>,
    config: Option<PathBuf>,
}

fn verify_files(files: &[PathBuf], options: VerifyOptions, sources: &mut SourceMap) -> Result<bool> {
    let mut config = VerifierConfig::discover(options.config.as_deref())?;
    if let Some(timeout_ms) = options.timeout_ms {
        config = config.timeout_ms(timeout_ms);
    }
    if let Some(jobs) = options.jobs {
        config = config.jobs(jobs);
    }
    if let Some(oracle) = options.oracle {
        config = config.oracle(oracle);
    }
    if let Some(solver) = options.solver {
        config = config.solver_path(solver);
    }
    for dir in options.include {
        config = config.include_dir(dir);
    }

    let program = load(files, config.include_dirs.clone(), sources)?;
    let report = Verifier::new(config).verify_program(program)?;

    if options.json {
        let json = report.to_json().map_err(|e| VerifyError::config(format!("cannot serialize report: {e}")))?;
        println!("{json}");
    } else {
        print!("{report}");
    }
    Ok(report.all_verified())
}

fn load(files: &[PathBuf], include_dirs: Vec<PathBuf>, sources: &mut SourceMap) -> Result<ghostvc::ast::Program> {
    let mut loader = Loader::new(include_dirs);
    let loaded = loader.load_entry(files);
    let (program, map) = loader.finish();
    *sources = map;
    loaded.map(|()| program)
}

fn dump_symbols(files: &[PathBuf], include: Vec<PathBuf>, sources: &mut SourceMap) -> Result<bool> {
    let program = load(files, include, sources)?;
    let table = SymbolTable::from_program(program)?;
    print!("{}", table.dump());
    Ok(true)
}

fn read(path: &Path, sources: &mut SourceMap) -> Result<(String, String)> {
    let filename = path.display().to_string();
    let source = std::fs::read_to_string(path).map_err(|e| VerifyError::io(filename.clone(), &e))?;
    sources.insert(filename.clone(), source.clone());
    Ok((filename, source))
}

fn parse_file(path: &Path, sources: &mut SourceMap) -> Result<bool> {
    let (filename, source) = read(path, sources)?;
    let ast = ghostvc::parser::parse_source(&filename, &source)?;
    let json = serde_json::to_string_pretty(&ast).map_err(|e| VerifyError::config(format!("cannot serialize AST: {e}")))?;
    println!("{json}");
    Ok(true)
}

fn tokenize_file(path: &Path, sources: &mut SourceMap) -> Result<bool> {
    let (_, source) = read(path, sources)?;
    let tokens = ghostvc::lexer::tokenize(&source)?;
    for (tok, span) in &tokens {
        println!("{:?} @ {}..{}", tok, span.start, span.end);
    }
    Ok(true)
}
