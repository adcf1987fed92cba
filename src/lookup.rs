use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::domain::{ProjectId, TaxId};
use crate::error::WgsError;

/// URI scheme marker the lookup service prefixes to each project entry.
const URI_MARKER: &str = "WGS_VDB://";

/// Resolves the authoritative WGS project list for a taxid pair.
pub trait ProjectLookup: Send + Sync {
    fn projects(
        &self,
        taxid: &TaxId,
        exclude: Option<&TaxId>,
    ) -> Result<Vec<ProjectId>, WgsError>;
}

/// The BLAST `taxid2wgs.cgi` endpoint. A single status-checked request;
/// the backoff schedule only covers mirror operations.
#[derive(Clone)]
pub struct EntrezProjectLookup {
    client: Client,
    base_url: String,
}

impl EntrezProjectLookup {
    pub fn new() -> Result<Self, WgsError> {
        Self::with_base_url("https://www.ncbi.nlm.nih.gov")
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, WgsError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("taxid2wgs/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| WgsError::LookupHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| WgsError::LookupHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

impl ProjectLookup for EntrezProjectLookup {
    fn projects(
        &self,
        taxid: &TaxId,
        exclude: Option<&TaxId>,
    ) -> Result<Vec<ProjectId>, WgsError> {
        let url = format!("{}/blast/BDB2EZ/taxid2wgs.cgi", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("INCLUDE_TAXIDS", taxid.as_str()),
                ("EXCLUDE_TAXIDS", exclude.map(TaxId::as_str).unwrap_or("")),
            ])
            .send()
            .map_err(|err| WgsError::LookupHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "project lookup failed".to_string());
            return Err(WgsError::LookupStatus { status, message });
        }
        let body = response
            .text()
            .map_err(|err| WgsError::LookupHttp(err.to_string()))?;
        parse_project_list(&body)
    }
}

/// Parse the newline-delimited lookup response, stripping the URI marker.
pub fn parse_project_list(body: &str) -> Result<Vec<ProjectId>, WgsError> {
    body.lines()
        .map(|line| line.trim().trim_start_matches(URI_MARKER))
        .filter(|line| !line.is_empty())
        .map(str::parse)
        .collect()
}
