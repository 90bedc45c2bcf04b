//! Command-line driver: load a top-level source file, analyze the module
//! graph, render diagnostics, and optionally emit the annotated graph as
//! JSON for downstream consumers.

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use silica_core::{Diagnostic, Library, Severity};

#[derive(Debug, Parser)]
#[command(name = "silica", version, about = "HDL dialect to RTL module-graph analyzer")]
struct Cli {
    /// Top-level source file to load.
    input: PathBuf,

    /// Additional include search directories, in priority order.
    #[arg(short = 'I', long = "include")]
    include: Vec<PathBuf>,

    /// Write the annotated module graph as JSON.
    #[arg(long, value_name = "FILE")]
    emit_graph: Option<PathBuf>,

    /// Increase log verbosity (-v: debug, -vv: trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match run(&cli) {
        Ok(success) => {
            if success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(error) => {
            eprintln!("{} {error:#}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<bool> {
    let mut library = Library::new();
    for path in &cli.include {
        library
            .add_search_path(path.clone())
            .context("configuring search paths")?;
    }
    if let Some(parent) = cli.input.parent() {
        library
            .add_search_path(parent.to_path_buf())
            .context("configuring search paths")?;
    }

    let filename = cli
        .input
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("`{}` is not a usable filename", cli.input.display()))?;
    // A missing top-level file is already reported through the diagnostic
    // aggregate; other load failures are fatal here.
    if let Err(error) = library.load(filename) {
        tracing::debug!(%error, "load failed");
    }

    let (success, diagnostics) = match silica_analyzer::process_sources(&mut library) {
        Ok(report) => (true, report.diagnostics),
        Err(failure) => (false, failure.diagnostics),
    };
    for diagnostic in diagnostics.iter() {
        render(&library, diagnostic);
    }
    eprintln!(
        "{} module(s), {} warning(s), {} error(s)",
        library.modules().len(),
        diagnostics.warning_count(),
        diagnostics.error_count()
    );

    if success {
        if let Some(path) = &cli.emit_graph {
            let file = File::create(path)
                .with_context(|| format!("creating `{}`", path.display()))?;
            serde_json::to_writer_pretty(BufWriter::new(file), library.modules())
                .context("serializing the module graph")?;
        }
    }
    Ok(success)
}

fn render(library: &Library, diagnostic: &Diagnostic) {
    let severity = match diagnostic.severity {
        Severity::Error => "error".red().bold(),
        Severity::Warning => "warning".yellow().bold(),
    };
    let location = diagnostic.span.map(|span| {
        let source = library.source(span.source);
        let (line, col) = source.line_col(span.start);
        format!("{}:{line}:{col}", source.name)
    });
    let subject = match (&diagnostic.module, &diagnostic.item) {
        (Some(module), Some(item)) => format!(" [{module}::{item}]"),
        (Some(module), None) => format!(" [{module}]"),
        _ => String::new(),
    };
    match location {
        Some(location) => eprintln!("{severity}: {location}: {}{subject}", diagnostic.message),
        None => eprintln!("{severity}: {}{subject}", diagnostic.message),
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
