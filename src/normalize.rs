use std::fs::File;
use std::io::{BufRead, BufReader, Write};

use camino::Utf8Path;
use flate2::read::GzDecoder;
use regex::Regex;

use crate::domain::ProjectId;
use crate::error::WgsError;

/// Header convention detected for one decompressed batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchFormat {
    /// Headers already carry the canonical `>accession.version description`
    /// shape; the batch is copied through unchanged.
    Canonical,
    /// Old-style headers, rewritten record by record.
    Rewritten,
}

#[derive(Debug, Clone, Copy)]
pub struct BatchOutcome {
    pub format: BatchFormat,
    pub records: u64,
}

/// Decompress a downloaded batch into memory. Decoder failures are
/// content corruption, not transport trouble: the file is already local
/// and rereading it cannot succeed differently.
pub fn read_batch_lines(path: &Utf8Path) -> Result<Vec<String>, WgsError> {
    let file = File::open(path.as_std_path())
        .map_err(|err| WgsError::Filesystem(format!("open {path}: {err}")))?;
    let reader = BufReader::new(GzDecoder::new(file));
    reader
        .lines()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| WgsError::CorruptBatch {
            file: path.to_string(),
            reason: format!("unexpected end of data: {err}"),
        })
}

/// Merge one decompressed batch into the output, rewriting old-style
/// headers to the canonical form.
///
/// The batch is canonical when the owning project identifier appears
/// within the first seven characters of the first line. Otherwise the
/// first line and every `>` line must contain
/// `<stem><digits>.<version>|<description>` and is rewritten to
/// `>accession.version description`; sequence lines pass through.
pub fn normalize_batch<W: Write>(
    project: &ProjectId,
    file_name: &str,
    lines: &[String],
    out: &mut W,
) -> Result<BatchOutcome, WgsError> {
    let first = lines.first().ok_or_else(|| WgsError::CorruptBatch {
        file: file_name.to_string(),
        reason: "batch is empty".to_string(),
    })?;

    let head: String = first.chars().take(7).collect();
    if head.contains(project.as_str()) {
        let mut records = 0u64;
        for line in lines {
            if line.starts_with('>') {
                records += 1;
            }
            writeln!(out, "{line}").map_err(|err| WgsError::Filesystem(err.to_string()))?;
        }
        return Ok(BatchOutcome {
            format: BatchFormat::Canonical,
            records,
        });
    }

    // The project list carries a numeric assembly-version suffix that
    // old-style accessions do not repeat, so the pattern anchors on the
    // alphabetic stem of the identifier.
    let pattern = Regex::new(&format!(r"({}\d{{5,9}}\.\d+)\|(.*)$", project.stem())).unwrap();
    let mut records = 0u64;
    for (index, line) in lines.iter().enumerate() {
        let is_header = index == 0 || line.starts_with('>');
        if !is_header {
            writeln!(out, "{line}").map_err(|err| WgsError::Filesystem(err.to_string()))?;
            continue;
        }
        let caps = pattern
            .captures(line)
            .ok_or_else(|| WgsError::CorruptBatch {
                file: file_name.to_string(),
                reason: format!("header does not match the accession pattern: {line}"),
            })?;
        let accession = &caps[1];
        let description = caps[2].trim();
        writeln!(out, ">{accession} {description}")
            .map_err(|err| WgsError::Filesystem(err.to_string()))?;
        records += 1;
    }
    Ok(BatchOutcome {
        format: BatchFormat::Rewritten,
        records,
    })
}
