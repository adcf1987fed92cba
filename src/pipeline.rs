use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{debug, info};

use crate::domain::{FSA_BATCH_SUFFIX, Order, ProjectId, RunMode, TaxId};
use crate::error::WgsError;
use crate::interrupt::Interrupt;
use crate::ledger::{self, Ledger};
use crate::lookup::ProjectLookup;
use crate::mirror::WgsMirror;
use crate::normalize;
use crate::retry::{self, RETRY_SCHEDULE};

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub taxid: TaxId,
    pub exclude: Option<TaxId>,
    pub mode: RunMode,
    /// Fetch batch files without normalizing or merging; leaves the
    /// output file and ledger untouched.
    pub download_only: bool,
    pub order: Order,
    pub work_dir: Utf8PathBuf,
}

impl RunOptions {
    fn artifact_stem(&self) -> String {
        match &self.exclude {
            Some(exclude) => format!("WGS4taxid{}-{}", self.taxid, exclude),
            None => format!("WGS4taxid{}", self.taxid),
        }
    }

    pub fn output_path(&self) -> Utf8PathBuf {
        self.work_dir.join(format!("{}.fa", self.artifact_stem()))
    }

    pub fn ledger_path(&self) -> Utf8PathBuf {
        self.work_dir.join(format!("{}.tmp", self.artifact_stem()))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub taxid: String,
    pub exclude: Option<String>,
    pub mode: String,
    pub download_only: bool,
    pub projects_total: usize,
    pub projects_skipped: usize,
    pub projects_processed: usize,
    pub files_downloaded: usize,
    pub files_reused: usize,
    pub records_written: u64,
    pub output: String,
    pub ledger_removed: bool,
    pub started_at: String,
    pub finished_at: String,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    /// Completed and total project counts, when the event moves the run
    /// forward.
    pub progress: Option<(usize, usize)>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct Pipeline<L: ProjectLookup, M: WgsMirror> {
    lookup: L,
    mirror: M,
    interrupt: Interrupt,
    schedule: Vec<u64>,
}

impl<L: ProjectLookup, M: WgsMirror> Pipeline<L, M> {
    pub fn new(lookup: L, mirror: M, interrupt: Interrupt) -> Self {
        Self {
            lookup,
            mirror,
            interrupt,
            schedule: RETRY_SCHEDULE.to_vec(),
        }
    }

    /// Replace the backoff schedule; tests use an all-zero one.
    pub fn with_retry_schedule(mut self, schedule: impl Into<Vec<u64>>) -> Self {
        self.schedule = schedule.into();
        self
    }

    /// Collect every WGS project under the taxon into one FASTA file,
    /// resuming safely across interruptions.
    pub fn run(
        &self,
        options: &RunOptions,
        sink: &dyn ProgressSink,
    ) -> Result<RunSummary, WgsError> {
        let started_at = iso_timestamp();
        let output_path = options.output_path();
        let ledger_path = options.ledger_path();

        let previous = scan_local_batches(&options.work_dir)?;
        let parsed = check_startup_state(options, &output_path, &ledger_path)?;
        if options.mode.is_resume() || options.download_only {
            info!(
                local_batches = previous.len(),
                ledger_entries = parsed.len(),
                "previous run state found"
            );
        }

        sink.event(ProgressEvent {
            message: format!("resolving WGS projects for taxid {}", options.taxid),
            progress: None,
        });
        let projects = self
            .lookup
            .projects(&options.taxid, options.exclude.as_ref())?;
        let projects_total = projects.len();

        let mut work: Vec<ProjectId> = projects
            .into_iter()
            .filter(|project| !parsed.iter().any(|done| done == project.as_str()))
            .collect();
        let projects_skipped = projects_total - work.len();

        if work.is_empty() {
            sink.event(ProgressEvent {
                message: "no projects to process, all done".to_string(),
                progress: Some((projects_total, projects_total)),
            });
            return Ok(self.summary(
                options,
                &output_path,
                projects_total,
                projects_skipped,
                Counters::default(),
                false,
                started_at,
            ));
        }

        match options.order {
            Order::Ascending => work.sort(),
            Order::Descending => {
                work.sort();
                work.reverse();
            }
        }
        info!(
            projects = work.len(),
            taxid = %options.taxid,
            order = ?options.order,
            "collecting WGS projects"
        );

        // The accumulator and ledger are opened once and owned here for
        // the life of the run.
        let mut accumulator = if options.download_only {
            None
        } else {
            let output = OpenOptions::new()
                .create(true)
                .append(true)
                .open(output_path.as_std_path())
                .map_err(|err| {
                    WgsError::Filesystem(format!("open output {output_path}: {err}"))
                })?;
            let ledger = Ledger::open_append(ledger_path.clone())?;
            Some((BufWriter::new(output), ledger))
        };

        let mut counters = Counters::default();
        for (index, project) in work.iter().enumerate() {
            if self.interrupt.is_raised() {
                return Err(WgsError::Interrupted);
            }
            sink.event(ProgressEvent {
                message: format!(
                    "{} of {}: processing WGS project {project}",
                    index + 1,
                    work.len()
                ),
                progress: Some((projects_skipped + index, projects_total)),
            });

            let batches = self.project_batches(options, project, &previous)?;
            for name in &batches {
                let dest = options.work_dir.join(name);
                if !options.mode.is_force() && dest.as_std_path().exists() {
                    debug!(%name, "batch already downloaded");
                    counters.files_reused += 1;
                } else {
                    sink.event(ProgressEvent {
                        message: format!("downloading {name}"),
                        progress: None,
                    });
                    let operation = format!("retrieval of {name}");
                    retry::with_backoff(&self.schedule, &operation, &self.interrupt, || {
                        self.mirror.fetch_batch(project, name, &dest)
                    })?;
                    counters.files_downloaded += 1;
                }

                if let Some((output, _)) = accumulator.as_mut() {
                    let lines = normalize::read_batch_lines(&dest)?;
                    let outcome = normalize::normalize_batch(project, name, &lines, output)?;
                    counters.records_written += outcome.records;
                    debug!(
                        %project,
                        %name,
                        format = ?outcome.format,
                        records = outcome.records,
                        "merged batch"
                    );
                }
            }

            if let Some((output, ledger)) = accumulator.as_mut() {
                // Records must be durable before the ledger admits the
                // project.
                output
                    .flush()
                    .map_err(|err| WgsError::Filesystem(err.to_string()))?;
                ledger.record(project)?;
            }
            counters.projects_processed += 1;
        }

        let ledger_removed = match accumulator {
            Some((mut output, ledger)) => {
                output
                    .flush()
                    .map_err(|err| WgsError::Filesystem(err.to_string()))?;
                drop(output);
                ledger.remove()?;
                true
            }
            None => false,
        };

        sink.event(ProgressEvent {
            message: "all done".to_string(),
            progress: Some((projects_total, projects_total)),
        });
        Ok(self.summary(
            options,
            &output_path,
            projects_total,
            projects_skipped,
            counters,
            ledger_removed,
            started_at,
        ))
    }

    /// The batch files belonging to one project. Resume mode trusts
    /// local file presence as a proxy for the remote listing.
    fn project_batches(
        &self,
        options: &RunOptions,
        project: &ProjectId,
        previous: &[String],
    ) -> Result<Vec<String>, WgsError> {
        if options.mode.is_resume() {
            let local: Vec<String> = previous
                .iter()
                .filter(|name| name.starts_with(project.as_str()))
                .cloned()
                .collect();
            if !local.is_empty() {
                debug!(%project, batches = local.len(), "project already on disk, skipping listing");
                return Ok(local);
            }
        }
        let operation = format!("listing of project {project}");
        retry::with_backoff(&self.schedule, &operation, &self.interrupt, || {
            self.mirror.list_batches(project)
        })
    }

    fn summary(
        &self,
        options: &RunOptions,
        output_path: &Utf8Path,
        projects_total: usize,
        projects_skipped: usize,
        counters: Counters,
        ledger_removed: bool,
        started_at: String,
    ) -> RunSummary {
        RunSummary {
            taxid: options.taxid.to_string(),
            exclude: options.exclude.as_ref().map(TaxId::to_string),
            mode: options.mode.to_string(),
            download_only: options.download_only,
            projects_total,
            projects_skipped,
            projects_processed: counters.projects_processed,
            files_downloaded: counters.files_downloaded,
            files_reused: counters.files_reused,
            records_written: counters.records_written,
            output: output_path.to_string(),
            ledger_removed,
            started_at,
            finished_at: iso_timestamp(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    projects_processed: usize,
    files_downloaded: usize,
    files_reused: usize,
    records_written: u64,
}

/// Enforce the ledger/output coupling rules before any network access.
/// Returns the identifiers a resumed run may skip.
fn check_startup_state(
    options: &RunOptions,
    output_path: &Utf8Path,
    ledger_path: &Utf8Path,
) -> Result<Vec<String>, WgsError> {
    if ledger_path.as_std_path().exists() {
        if options.mode.is_force() {
            fs::remove_file(ledger_path.as_std_path())
                .map_err(|err| WgsError::Filesystem(format!("remove {ledger_path}: {err}")))?;
            if output_path.as_std_path().exists() {
                fs::remove_file(output_path.as_std_path()).map_err(|err| {
                    WgsError::Filesystem(format!("remove {output_path}: {err}"))
                })?;
            }
            info!("previous run state cleared");
            return Ok(Vec::new());
        }
        if options.mode.is_resume() || options.download_only {
            let parsed = ledger::load_entries(ledger_path)?;
            if !parsed.is_empty() && !output_path.as_std_path().exists() {
                return Err(WgsError::LedgerWithoutOutput {
                    ledger: ledger_path.to_path_buf(),
                    output: output_path.to_path_buf(),
                });
            }
            return Ok(parsed);
        }
        return Err(WgsError::StaleLedger {
            ledger: ledger_path.to_path_buf(),
        });
    }
    if output_path.as_std_path().exists() {
        if options.mode.is_force() {
            fs::remove_file(output_path.as_std_path())
                .map_err(|err| WgsError::Filesystem(format!("remove {output_path}: {err}")))?;
            info!("previous output cleared");
            return Ok(Vec::new());
        }
        return Err(WgsError::OutputWithoutLedger {
            output: output_path.to_path_buf(),
        });
    }
    Ok(Vec::new())
}

/// Batch files already present in the run directory from earlier runs.
fn scan_local_batches(dir: &Utf8Path) -> Result<Vec<String>, WgsError> {
    let entries = fs::read_dir(dir.as_std_path())
        .map_err(|err| WgsError::Filesystem(format!("scan {dir}: {err}")))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| WgsError::Filesystem(err.to_string()))?;
        let file_type = entry
            .file_type()
            .map_err(|err| WgsError::Filesystem(err.to_string()))?;
        if !file_type.is_file() {
            continue;
        }
        if let Ok(name) = entry.file_name().into_string() {
            if name.ends_with(FSA_BATCH_SUFFIX) {
                names.push(name);
            }
        }
    }
    names.sort();
    Ok(names)
}

fn iso_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}
