use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;
use camino::{Utf8Path, Utf8PathBuf};
use flate2::Compression;
use flate2::write::GzEncoder;

use taxid2wgs::domain::{Order, ProjectId, RunMode, TaxId};
use taxid2wgs::error::WgsError;
use taxid2wgs::interrupt::Interrupt;
use taxid2wgs::lookup::ProjectLookup;
use taxid2wgs::mirror::WgsMirror;
use taxid2wgs::pipeline::{Pipeline, ProgressEvent, ProgressSink, RunOptions, RunSummary};
use taxid2wgs::retry::TransportError;

const INSTANT: [u64; 6] = [0; 6];

struct SilentSink;

impl ProgressSink for SilentSink {
    fn event(&self, _event: ProgressEvent) {}
}

/// Shared record of every remote operation the mocks perform.
#[derive(Clone, Default)]
struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    fn push(&self, entry: String) {
        self.0.lock().unwrap().push(entry);
    }

    fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    fn count_with_prefix(&self, prefix: &str) -> usize {
        self.entries()
            .iter()
            .filter(|entry| entry.starts_with(prefix))
            .count()
    }
}

struct MockLookup {
    projects: Vec<String>,
    log: CallLog,
}

impl MockLookup {
    fn new(projects: &[&str], log: CallLog) -> Self {
        Self {
            projects: projects.iter().map(|p| p.to_string()).collect(),
            log,
        }
    }
}

impl ProjectLookup for MockLookup {
    fn projects(
        &self,
        _taxid: &TaxId,
        _exclude: Option<&TaxId>,
    ) -> Result<Vec<ProjectId>, WgsError> {
        self.log.push("lookup".to_string());
        self.projects.iter().map(|p| p.parse()).collect()
    }
}

#[derive(Clone, Copy, PartialEq)]
enum MirrorBehavior {
    Normal,
    AlwaysResetting,
    ServesGarbage,
}

struct MockMirror {
    batches: HashMap<String, Vec<(String, Vec<String>)>>,
    log: CallLog,
    behavior: MirrorBehavior,
}

impl MockMirror {
    fn new(log: CallLog) -> Self {
        Self {
            batches: HashMap::new(),
            log,
            behavior: MirrorBehavior::Normal,
        }
    }

    fn with_behavior(mut self, behavior: MirrorBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    /// Register a canonical-format batch of one record for `project`.
    fn with_canonical_batch(mut self, project: &str, index: u32) -> Self {
        let name = format!("{project}.{index}.fsa_nt.gz");
        let lines = canonical_batch_lines(project, index);
        self.batches
            .entry(project.to_string())
            .or_default()
            .push((name, lines));
        self
    }
}

impl WgsMirror for MockMirror {
    fn list_batches(&self, project: &ProjectId) -> Result<Vec<String>, TransportError> {
        self.log.push(format!("list {project}"));
        if self.behavior == MirrorBehavior::AlwaysResetting {
            return Err(TransportError::Retryable("connection reset".to_string()));
        }
        Ok(self
            .batches
            .get(project.as_str())
            .map(|files| files.iter().map(|(name, _)| name.clone()).collect())
            .unwrap_or_default())
    }

    fn fetch_batch(
        &self,
        project: &ProjectId,
        name: &str,
        dest: &Utf8Path,
    ) -> Result<u64, TransportError> {
        self.log.push(format!("fetch {name}"));
        if self.behavior == MirrorBehavior::ServesGarbage {
            std::fs::write(dest.as_std_path(), b"this is not gzip data")
                .map_err(|err| TransportError::Fatal(err.to_string()))?;
            return Ok(21);
        }
        let files = self
            .batches
            .get(project.as_str())
            .ok_or_else(|| TransportError::Fatal(format!("unknown project {project}")))?;
        let (_, lines) = files
            .iter()
            .find(|(candidate, _)| candidate == name)
            .ok_or_else(|| TransportError::Fatal(format!("unknown file {name}")))?;
        let bytes = gzip_lines(lines);
        std::fs::write(dest.as_std_path(), &bytes)
            .map_err(|err| TransportError::Fatal(err.to_string()))?;
        Ok(bytes.len() as u64)
    }
}

fn canonical_batch_lines(project: &str, index: u32) -> Vec<String> {
    vec![
        format!(">{project}{index:06}.1 Organism sp. {project} contig{index}"),
        "ACGTACGTACGT".to_string(),
    ]
}

fn gzip_lines(lines: &[String]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    for line in lines {
        writeln!(encoder, "{line}").unwrap();
    }
    encoder.finish().unwrap()
}

struct Sandbox {
    _dir: tempfile::TempDir,
    root: Utf8PathBuf,
}

impl Sandbox {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        Self { _dir: dir, root }
    }

    fn options(&self, mode: RunMode) -> RunOptions {
        RunOptions {
            taxid: "548681".parse().unwrap(),
            exclude: None,
            mode,
            download_only: false,
            order: Order::Ascending,
            work_dir: self.root.clone(),
        }
    }

    fn output_path(&self) -> Utf8PathBuf {
        self.root.join("WGS4taxid548681.fa")
    }

    fn ledger_path(&self) -> Utf8PathBuf {
        self.root.join("WGS4taxid548681.tmp")
    }

    fn write_output(&self, content: &str) {
        std::fs::write(self.output_path().as_std_path(), content).unwrap();
    }

    fn write_ledger(&self, entries: &[&str]) {
        let mut content = entries.join("\n");
        content.push('\n');
        std::fs::write(self.ledger_path().as_std_path(), content).unwrap();
    }

    fn read_output(&self) -> String {
        std::fs::read_to_string(self.output_path().as_std_path()).unwrap()
    }
}

fn run(
    lookup: MockLookup,
    mirror: MockMirror,
    options: &RunOptions,
) -> Result<RunSummary, WgsError> {
    Pipeline::new(lookup, mirror, Interrupt::new())
        .with_retry_schedule(INSTANT)
        .run(options, &SilentSink)
}

#[test]
fn ascending_order_processes_projects_in_order() {
    let sandbox = Sandbox::new();
    let log = CallLog::default();
    let lookup = MockLookup::new(&["CCCC01", "AAAA01", "BBBB01"], log.clone());
    let mirror = MockMirror::new(log.clone())
        .with_canonical_batch("AAAA01", 1)
        .with_canonical_batch("BBBB01", 1)
        .with_canonical_batch("CCCC01", 1);

    let summary = run(lookup, mirror, &sandbox.options(RunMode::Normal)).unwrap();

    assert_eq!(summary.projects_processed, 3);
    assert_eq!(summary.files_downloaded, 3);
    assert_eq!(summary.records_written, 3);
    assert!(summary.ledger_removed);
    assert_eq!(
        log.entries(),
        vec![
            "lookup",
            "list AAAA01",
            "fetch AAAA01.1.fsa_nt.gz",
            "list BBBB01",
            "fetch BBBB01.1.fsa_nt.gz",
            "list CCCC01",
            "fetch CCCC01.1.fsa_nt.gz",
        ]
    );

    let output = sandbox.read_output();
    let aaaa = output.find(">AAAA01000001.1").unwrap();
    let bbbb = output.find(">BBBB01000001.1").unwrap();
    let cccc = output.find(">CCCC01000001.1").unwrap();
    assert!(aaaa < bbbb && bbbb < cccc);
    assert!(!sandbox.ledger_path().as_std_path().exists());
}

#[test]
fn descending_order_reverses_processing() {
    let sandbox = Sandbox::new();
    let log = CallLog::default();
    let lookup = MockLookup::new(&["AAAA01", "BBBB01", "CCCC01"], log.clone());
    let mirror = MockMirror::new(log.clone())
        .with_canonical_batch("AAAA01", 1)
        .with_canonical_batch("BBBB01", 1)
        .with_canonical_batch("CCCC01", 1);

    let mut options = sandbox.options(RunMode::Normal);
    options.order = Order::Descending;
    run(lookup, mirror, &options).unwrap();

    let listings: Vec<String> = log
        .entries()
        .into_iter()
        .filter(|entry| entry.starts_with("list "))
        .collect();
    assert_eq!(listings, vec!["list CCCC01", "list BBBB01", "list AAAA01"]);
}

#[test]
fn resume_with_complete_ledger_is_a_no_op() {
    let sandbox = Sandbox::new();
    sandbox.write_output(">AAAA01000001.1 Organism sp. AAAA01 contig1\nACGTACGTACGT\n");
    sandbox.write_ledger(&["AAAA01", "BBBB01", "CCCC01"]);
    let before = sandbox.read_output();

    let log = CallLog::default();
    let lookup = MockLookup::new(&["AAAA01", "BBBB01", "CCCC01"], log.clone());
    let mirror = MockMirror::new(log.clone());

    let summary = run(lookup, mirror, &sandbox.options(RunMode::Resume)).unwrap();

    assert_eq!(summary.projects_processed, 0);
    assert_eq!(summary.projects_skipped, 3);
    assert_eq!(summary.files_downloaded, 0);
    assert_eq!(log.count_with_prefix("list"), 0);
    assert_eq!(log.count_with_prefix("fetch"), 0);
    assert_eq!(sandbox.read_output(), before);
    assert!(sandbox.ledger_path().as_std_path().exists());
}

#[test]
fn resume_trusts_local_batches_and_skips_the_listing() {
    let sandbox = Sandbox::new();
    sandbox.write_output(">AAAA01000001.1 Organism sp. AAAA01 contig1\nACGTACGTACGT\n");
    sandbox.write_ledger(&["AAAA01"]);
    let local = sandbox.root.join("BBBB01.1.fsa_nt.gz");
    std::fs::write(
        local.as_std_path(),
        gzip_lines(&canonical_batch_lines("BBBB01", 1)),
    )
    .unwrap();

    let log = CallLog::default();
    let lookup = MockLookup::new(&["AAAA01", "BBBB01"], log.clone());
    let mirror = MockMirror::new(log.clone());

    let summary = run(lookup, mirror, &sandbox.options(RunMode::Resume)).unwrap();

    assert_eq!(summary.projects_processed, 1);
    assert_eq!(summary.files_reused, 1);
    assert_eq!(summary.files_downloaded, 0);
    assert_eq!(log.count_with_prefix("list"), 0);
    assert_eq!(log.count_with_prefix("fetch"), 0);
    assert!(sandbox.read_output().contains(">BBBB01000001.1"));
    assert!(summary.ledger_removed);
}

#[test]
fn stale_ledger_is_rejected_before_any_network_access() {
    let sandbox = Sandbox::new();
    sandbox.write_output("previous output\n");
    sandbox.write_ledger(&["AAAA01"]);

    let log = CallLog::default();
    let lookup = MockLookup::new(&["AAAA01"], log.clone());
    let mirror = MockMirror::new(log.clone());

    let err = run(lookup, mirror, &sandbox.options(RunMode::Normal)).unwrap_err();

    assert_matches!(err, WgsError::StaleLedger { .. });
    assert!(log.entries().is_empty());
}

#[test]
fn nonempty_ledger_without_output_is_rejected() {
    let sandbox = Sandbox::new();
    sandbox.write_ledger(&["AAAA01"]);

    let log = CallLog::default();
    let lookup = MockLookup::new(&["AAAA01"], log.clone());
    let mirror = MockMirror::new(log.clone());

    let err = run(lookup, mirror, &sandbox.options(RunMode::Resume)).unwrap_err();

    assert_matches!(err, WgsError::LedgerWithoutOutput { .. });
    assert!(log.entries().is_empty());
}

#[test]
fn output_without_ledger_is_rejected() {
    let sandbox = Sandbox::new();
    sandbox.write_output("previous output\n");

    let log = CallLog::default();
    let lookup = MockLookup::new(&["AAAA01"], log.clone());
    let mirror = MockMirror::new(log.clone());

    let err = run(lookup, mirror, &sandbox.options(RunMode::Normal)).unwrap_err();

    assert_matches!(err, WgsError::OutputWithoutLedger { .. });
    assert!(log.entries().is_empty());
}

#[test]
fn force_wipes_previous_state_and_redownloads() {
    let sandbox = Sandbox::new();
    sandbox.write_output("stale output that must disappear\n");
    sandbox.write_ledger(&["AAAA01"]);
    let stale = sandbox.root.join("AAAA01.1.fsa_nt.gz");
    std::fs::write(stale.as_std_path(), b"stale local batch").unwrap();

    let log = CallLog::default();
    let lookup = MockLookup::new(&["AAAA01"], log.clone());
    let mirror = MockMirror::new(log.clone()).with_canonical_batch("AAAA01", 1);

    let summary = run(lookup, mirror, &sandbox.options(RunMode::Force)).unwrap();

    assert_eq!(summary.files_downloaded, 1);
    assert_eq!(summary.files_reused, 0);
    let output = sandbox.read_output();
    assert!(!output.contains("stale output"));
    assert!(output.contains(">AAAA01000001.1"));
    assert!(!sandbox.ledger_path().as_std_path().exists());
}

#[test]
fn exhausted_retries_and_corruption_are_distinct_failures() {
    let sandbox = Sandbox::new();
    let log = CallLog::default();
    let lookup = MockLookup::new(&["AAAA01"], log.clone());
    let mirror =
        MockMirror::new(log.clone()).with_behavior(MirrorBehavior::AlwaysResetting);

    let err = run(lookup, mirror, &sandbox.options(RunMode::Normal)).unwrap_err();
    assert_matches!(err, WgsError::RetriesExhausted { cause, .. } if cause == "connection reset");
    assert_eq!(log.count_with_prefix("list"), INSTANT.len());

    let sandbox = Sandbox::new();
    let log = CallLog::default();
    let lookup = MockLookup::new(&["AAAA01"], log.clone());
    let mirror = MockMirror::new(log.clone())
        .with_canonical_batch("AAAA01", 1)
        .with_behavior(MirrorBehavior::ServesGarbage);

    let err = run(lookup, mirror, &sandbox.options(RunMode::Normal)).unwrap_err();
    assert_matches!(err, WgsError::CorruptBatch { .. });
}

#[test]
fn download_only_fetches_without_touching_output_or_ledger() {
    let sandbox = Sandbox::new();
    let log = CallLog::default();
    let lookup = MockLookup::new(&["AAAA01"], log.clone());
    let mirror = MockMirror::new(log.clone()).with_canonical_batch("AAAA01", 1);

    let mut options = sandbox.options(RunMode::Normal);
    options.download_only = true;
    let summary = run(lookup, mirror, &options).unwrap();

    assert_eq!(summary.files_downloaded, 1);
    assert_eq!(summary.records_written, 0);
    assert!(!summary.ledger_removed);
    assert!(sandbox.root.join("AAAA01.1.fsa_nt.gz").as_std_path().exists());
    assert!(!sandbox.output_path().as_std_path().exists());
    assert!(!sandbox.ledger_path().as_std_path().exists());
}

#[test]
fn interrupt_stops_the_run_before_the_next_project() {
    let sandbox = Sandbox::new();
    let log = CallLog::default();
    let lookup = MockLookup::new(&["AAAA01"], log.clone());
    let mirror = MockMirror::new(log.clone()).with_canonical_batch("AAAA01", 1);

    let interrupt = Interrupt::new();
    interrupt.raise();
    let err = Pipeline::new(lookup, mirror, interrupt)
        .with_retry_schedule(INSTANT)
        .run(&sandbox.options(RunMode::Normal), &SilentSink)
        .unwrap_err();

    assert_matches!(err, WgsError::Interrupted);
    assert_eq!(log.count_with_prefix("fetch"), 0);
}
