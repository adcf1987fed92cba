use std::fs::File;
use std::io::{BufRead, BufReader};

use camino::Utf8Path;
use regex::Regex;

use crate::error::WgsError;

/// Extract the accession number buried in a free-form FASTA header token.
///
/// The token conventions seen in the wild, in matching order:
///
/// ```text
/// X64695.1.gene9                 ->  X64695.1
/// VanY-D_4_AY489045              ->  AY489045
/// 2:1314_M29695.1                ->  M29695.1
/// (Tmt)DfrB4:FM87748469-305:237  ->  FM87748469
/// ```
pub fn parse_accession(raw: &str) -> Result<String, WgsError> {
    let nc = Regex::new(r"NC_\d+").unwrap();
    if let Some(found) = nc.find(raw) {
        return Ok(found.as_str().to_string());
    }
    let nz = Regex::new(r"NZ_[A-Z0-9]+").unwrap();
    if let Some(found) = nz.find(raw) {
        return Ok(found.as_str().to_string());
    }
    if raw.contains('_') {
        return Ok(raw.rsplit('_').next().unwrap_or(raw).to_string());
    }
    let orf_gene = Regex::new(r"\.orf\d*\.gene$").unwrap();
    if orf_gene.is_match(raw) {
        return Ok(raw.split(".orf").next().unwrap_or(raw).to_string());
    }
    let gene = Regex::new(r"\.gene\d*$").unwrap();
    if gene.is_match(raw) {
        return Ok(raw.split(".gene").next().unwrap_or(raw).to_string());
    }
    if raw.contains(':') {
        let segment = raw.split(':').nth(1).unwrap_or("");
        return Ok(segment.split('-').next().unwrap_or(segment).to_string());
    }
    Err(WgsError::UnknownAccession(raw.to_string()))
}

/// Accession numbers extracted from the header lines of a FASTA file,
/// in file order.
pub fn accessions_from_fasta(path: &Utf8Path) -> Result<Vec<String>, WgsError> {
    let file = File::open(path.as_std_path())
        .map_err(|err| WgsError::Filesystem(format!("open {path}: {err}")))?;
    let mut accessions = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|err| WgsError::Filesystem(format!("read {path}: {err}")))?;
        let Some(header) = line.strip_prefix('>') else {
            continue;
        };
        if let Some(token) = header.split_whitespace().next() {
            accessions.push(parse_accession(token)?);
        }
    }
    Ok(accessions)
}
