use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::Parser;
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use taxid2wgs::domain::{Order, RunMode, TaxId};
use taxid2wgs::error::WgsError;
use taxid2wgs::interrupt::Interrupt;
use taxid2wgs::lookup::EntrezProjectLookup;
use taxid2wgs::mirror::HttpWgsMirror;
use taxid2wgs::output::{ConsoleOutput, JsonOutput, OutputMode};
use taxid2wgs::pipeline::{Pipeline, RunOptions};

#[derive(Parser)]
#[command(name = "taxid2wgs")]
#[command(about = "Collect NCBI WGS project fasta files from a taxid")]
#[command(version, author)]
struct Cli {
    /// NCBI taxid code to include a taxon and all underneath
    #[arg(short, long, default_value = "548681")]
    taxid: String,

    /// NCBI taxid code to exclude a taxon and all underneath
    #[arg(short = 'x', long)]
    exclude: Option<String>,

    /// Just download (not parse) the WGS project files
    #[arg(short, long)]
    download: bool,

    /// Reversed (alphabetical) order for processing projects
    #[arg(short = 'e', long)]
    reverse: bool,

    /// Force downloading and recreating the final FASTA file in spite of
    /// any previous run; clears the ledger and output but not downloads
    #[arg(short, long, conflicts_with = "resume")]
    force: bool,

    /// Resume downloading without checking the server for every project
    #[arg(short, long)]
    resume: bool,

    /// Produce verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Print one JSON run summary on stdout instead of live progress
    #[arg(long)]
    non_interactive: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(wgs) = report.downcast_ref::<WgsError>() {
            return ExitCode::from(map_exit_code(wgs));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &WgsError) -> u8 {
    match error {
        WgsError::LedgerWithoutOutput { .. } => 1,
        WgsError::StaleLedger { .. } => 2,
        WgsError::OutputWithoutLedger { .. } => 3,
        WgsError::CorruptBatch { .. } => 4,
        WgsError::RetriesExhausted { .. } => 5,
        WgsError::LedgerCleanup { .. } => 6,
        WgsError::Interrupted => 9,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    let taxid: TaxId = cli.taxid.parse()?;
    let exclude = cli
        .exclude
        .map(|value| value.parse::<TaxId>())
        .transpose()?;
    let mode = if cli.force {
        RunMode::Force
    } else if cli.resume {
        RunMode::Resume
    } else {
        RunMode::Normal
    };
    let order = if cli.reverse {
        Order::Descending
    } else {
        Order::Ascending
    };

    let interrupt = Interrupt::new();
    interrupt.install();

    let lookup = EntrezProjectLookup::new()?;
    let mirror = HttpWgsMirror::new(interrupt.clone()).into_diagnostic()?;
    let pipeline = Pipeline::new(lookup, mirror, interrupt);

    let options = RunOptions {
        taxid,
        exclude,
        mode,
        download_only: cli.download,
        order,
        work_dir: Utf8PathBuf::from("."),
    };

    match output_mode {
        OutputMode::NonInteractive => {
            let summary = pipeline.run(&options, &JsonOutput)?;
            JsonOutput::print_summary(&summary).into_diagnostic()?;
        }
        OutputMode::Interactive => {
            let console = ConsoleOutput::new(cli.verbose);
            let summary = pipeline.run(&options, &console)?;
            console.finish(&summary);
        }
    }
    Ok(())
}
