//! pipekern entry point.
//!
//! Usage:
//!   pipekern                          # Serve the inherited standard streams
//!   pipekern <stdin> <stdout> <stderr>  # Serve files, seeding the context from stdin

use std::env;
use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use pipekern_kernel::{
    install_interrupt_handler, redirect_stdio, serve_stdio, Context, Kernel, KernelConfig,
    StdChannels,
};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log filter, in `EnvFilter` syntax. Logging is off unless set.
const LOG_ENV: &str = "PIPEKERN_LOG";
/// Send logs to this file instead of stderr.
const LOG_FILE_ENV: &str = "PIPEKERN_LOG_FILE";

fn main() -> ExitCode {
    if let Err(e) = init_tracing() {
        eprintln!("Error: {e:?}");
        return ExitCode::FAILURE;
    }

    match run() {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = ?e, "kernel stopped");
            eprintln!("Error: {e:?}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("off"));

    let (writer, ansi) = match env::var_os(LOG_FILE_ENV) {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("Failed to open log file: {}", Path::new(&path).display()))?;
            (BoxMakeWriter::new(Arc::new(file)), false)
        }
        None => (BoxMakeWriter::new(io::stderr), true),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(writer).with_ansi(ansi))
        .with(filter)
        .init();
    Ok(())
}

fn run() -> Result<ExitCode> {
    let args: Vec<String> = env::args().skip(1).collect();

    match args.as_slice() {
        [] => {
            serve(None)?;
            Ok(ExitCode::SUCCESS)
        }

        [flag] if flag == "--help" || flag == "-h" => {
            print_help();
            Ok(ExitCode::SUCCESS)
        }

        [flag] if flag == "--version" || flag == "-V" => {
            println!(
                "pipekern {} ({} {})",
                env!("CARGO_PKG_VERSION"),
                env!("PIPEKERN_GIT_HASH"),
                env!("PIPEKERN_BUILD_DATE")
            );
            Ok(ExitCode::SUCCESS)
        }

        [stdin, stdout, stderr] => {
            serve(Some([stdin, stdout, stderr]))?;
            Ok(ExitCode::SUCCESS)
        }

        _ => {
            eprintln!("Expected either no arguments or <stdin> <stdout> <stderr>");
            eprintln!("Run 'pipekern --help' for usage.");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn print_help() {
    println!(
        r#"pipekern v{}

Usage:
  pipekern                          Serve tasks on the inherited standard streams
  pipekern <stdin> <stdout> <stderr>
                                    Serve tasks on the given files. The input must
                                    start with a JSON object: the initial context.
                                    Only that object is decoded as context. Any
                                    lines after it are served as tasks.

Options:
  -h, --help                        Show this help
  -V, --version                     Show version

Environment:
  DEV=true                          Use the human-readable sentinel vocabulary
  {LOG_ENV}=<filter>              Log filter, e.g. "debug" (default: off)
  {LOG_FILE_ENV}=<path>         Write logs to a file instead of stderr
"#,
        env!("CARGO_PKG_VERSION")
    );
}

/// Serve until input ends, optionally on redirected files.
fn serve(files: Option<[&String; 3]>) -> Result<()> {
    install_interrupt_handler().context("Failed to install SIGINT handler")?;

    let config = KernelConfig::from_env();
    let mut kernel = Kernel::new(config);

    if let Some([stdin, stdout, stderr]) = files {
        redirect_stdio(Path::new(stdin), Path::new(stdout), Path::new(stderr), true)
            .with_context(|| format!("Failed to redirect streams to {stdin}, {stdout}, {stderr}"))?;
    }

    let mut channels = StdChannels::stdio().context("Failed to open standard streams")?;

    if files.is_some() {
        let context = Context::read_from(&mut channels.input)
            .context("Failed to decode initial context")?;
        *kernel.context_mut() = context;
    }

    tracing::info!(
        kernel = %kernel.config().name,
        vars = kernel.context().len(),
        "kernel ready"
    );

    serve_stdio(&mut kernel, channels).context("Kernel channel failure")
}
