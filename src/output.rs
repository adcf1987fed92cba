use std::io::{self, Write};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use crate::pipeline::{ProgressEvent, ProgressSink, RunSummary};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

/// Non-interactive runs print one JSON summary on stdout and stay quiet
/// otherwise; progress belongs to the tracing subscriber on stderr.
pub struct JsonOutput;

impl JsonOutput {
    pub fn print_summary(summary: &RunSummary) -> io::Result<()> {
        let json = serde_json::to_string_pretty(summary).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Interactive runs drive a spinner; verbose mode additionally prints
/// each event above it.
pub struct ConsoleOutput {
    bar: ProgressBar,
    verbose: bool,
}

impl ConsoleOutput {
    pub fn new(verbose: bool) -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.magenta} {msg}")
                .unwrap()
                .tick_strings(&["-", "\\", "|", "/", "-"]),
        );
        bar.enable_steady_tick(Duration::from_millis(200));
        Self { bar, verbose }
    }

    pub fn finish(&self, summary: &RunSummary) {
        self.bar.finish_and_clear();
        println!(
            "{} WGS projects processed, {} already done",
            summary.projects_processed, summary.projects_skipped
        );
        println!(
            "{} batch files downloaded, {} reused from disk",
            summary.files_downloaded, summary.files_reused
        );
        if summary.download_only {
            println!("All downloaded!");
        } else {
            println!(
                "{} records written to {}",
                summary.records_written, summary.output
            );
            println!("All OK!");
        }
    }
}

impl ProgressSink for ConsoleOutput {
    fn event(&self, event: ProgressEvent) {
        if self.verbose {
            self.bar.println(&event.message);
        }
        let message = match event.progress {
            Some((done, total)) if total > 0 => {
                format!("[{:.2}%] {}", done as f64 / total as f64 * 100.0, event.message)
            }
            _ => event.message,
        };
        self.bar.set_message(message);
    }
}
