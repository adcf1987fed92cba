use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum WgsError {
    #[error("invalid taxid: {0}")]
    InvalidTaxId(String),

    #[error("invalid WGS project identifier: {0}")]
    InvalidProjectId(String),

    #[error("ledger {ledger} exists but the output file {output} is missing")]
    #[diagnostic(help("restore the output file or rerun with --force"))]
    LedgerWithoutOutput {
        ledger: Utf8PathBuf,
        output: Utf8PathBuf,
    },

    #[error("ledger {ledger} exists from a previous run but resume is not enabled")]
    #[diagnostic(help("rerun with --resume, --download or --force"))]
    StaleLedger { ledger: Utf8PathBuf },

    #[error("output file {output} exists but its ledger is missing")]
    #[diagnostic(help("move the output file away or rerun with --force"))]
    OutputWithoutLedger { output: Utf8PathBuf },

    #[error("corrupt batch file {file}: {reason}")]
    CorruptBatch { file: String, reason: String },

    #[error("{operation} failed after exhausting all retry attempts: {cause}")]
    #[diagnostic(help("transient network trouble; rerun with --resume once it clears"))]
    RetriesExhausted { operation: String, cause: String },

    #[error("{operation} failed: {message}")]
    Transport { operation: String, message: String },

    #[error("interrupted by user")]
    #[diagnostic(help("rerun with --resume to pick up where the run stopped"))]
    Interrupted,

    #[error("failed to remove ledger {ledger} after completion: {message}")]
    LedgerCleanup { ledger: Utf8PathBuf, message: String },

    #[error("project lookup request failed: {0}")]
    LookupHttp(String),

    #[error("project lookup returned status {status}: {message}")]
    LookupStatus { status: u16, message: String },

    #[error("cannot extract an accession from: {0}")]
    UnknownAccession(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
