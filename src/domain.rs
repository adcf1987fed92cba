use std::fmt;
use std::str::FromStr;

use crate::error::WgsError;

/// Suffix carried by every nucleotide batch file in a WGS project directory.
pub const FSA_BATCH_SUFFIX: &str = ".fsa_nt.gz";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaxId(String);

impl TaxId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaxId {
    type Err = WgsError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_string();
        let is_valid =
            !normalized.is_empty() && normalized.chars().all(|ch| ch.is_ascii_digit());
        if !is_valid {
            return Err(WgsError::InvalidTaxId(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

/// A WGS project identifier as returned by the BLAST lookup service,
/// e.g. `AAAA01`. The first four characters are the alphabetic project
/// prefix; a numeric assembly-version suffix may follow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProjectId(String);

impl ProjectId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Leading alphabetic prefix, shared by every accession of the project.
    pub fn stem(&self) -> &str {
        let end = self
            .0
            .find(|ch: char| !ch.is_ascii_alphabetic())
            .unwrap_or(self.0.len());
        &self.0[..end]
    }

    /// Remote directory of the project below the WGS base path:
    /// first two characters, next two characters, full identifier.
    pub fn remote_subdir(&self) -> String {
        format!("{}/{}/{}", &self.0[0..2], &self.0[2..4], self.0)
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProjectId {
    type Err = WgsError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_string();
        let is_valid = normalized.len() >= 4
            && normalized.chars().all(|ch| ch.is_ascii_alphanumeric())
            && normalized.chars().take(4).all(|ch| ch.is_ascii_alphabetic());
        if !is_valid {
            return Err(WgsError::InvalidProjectId(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Normal,
    Force,
    Resume,
}

impl RunMode {
    pub fn is_force(self) -> bool {
        matches!(self, RunMode::Force)
    }

    pub fn is_resume(self) -> bool {
        matches!(self, RunMode::Resume)
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Normal => write!(f, "normal"),
            RunMode::Force => write!(f, "force"),
            RunMode::Resume => write!(f, "resume"),
        }
    }
}
