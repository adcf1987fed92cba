use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use camino::Utf8Path;
use regex::Regex;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::debug;

use crate::domain::{FSA_BATCH_SUFFIX, ProjectId};
use crate::interrupt::Interrupt;
use crate::retry::{self, TransportError};

/// Fixed base path of the WGS project tree on the NCBI mirror.
const WGS_BASE_PATH: &str = "/sra/wgs_aux";

/// Heartbeat period while a transfer runs on the background thread.
const KEEPALIVE_SECS: u64 = 30;

const CHUNK_SIZE: usize = 1 << 20;

/// Remote storage for WGS project batches. Operations report transport
/// faults pre-classified for the backoff loop.
pub trait WgsMirror: Send + Sync {
    /// Names of the project's nucleotide batch files, in listing order.
    fn list_batches(&self, project: &ProjectId) -> Result<Vec<String>, TransportError>;

    /// Download one batch file to `dest`, returning the byte count.
    /// A partial transfer never reaches `dest`.
    fn fetch_batch(
        &self,
        project: &ProjectId,
        name: &str,
        dest: &Utf8Path,
    ) -> Result<u64, TransportError>;
}

pub struct HttpWgsMirror {
    client: Client,
    base_url: String,
    interrupt: Interrupt,
    in_flight: AtomicBool,
}

impl HttpWgsMirror {
    pub fn new(interrupt: Interrupt) -> Result<Self, TransportError> {
        Self::with_base_url("https://ftp.ncbi.nlm.nih.gov", interrupt)
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        interrupt: Interrupt,
    ) -> Result<Self, TransportError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("taxid2wgs/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| TransportError::Fatal(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(None)
            .connect_timeout(Duration::from_secs(30))
            .read_timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| TransportError::Fatal(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            interrupt,
            in_flight: AtomicBool::new(false),
        })
    }

    fn project_url(&self, project: &ProjectId) -> String {
        format!("{}{}/{}", self.base_url, WGS_BASE_PATH, project.remote_subdir())
    }

    fn get(&self, url: &str) -> Result<reqwest::blocking::Response, TransportError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| retry::classify(&err))?;
        let status = response.status();
        if !status.is_success() {
            let message = format!("GET {url} returned {status}");
            return Err(if retry::is_retryable_status(status.as_u16()) {
                TransportError::Retryable(message)
            } else {
                TransportError::Fatal(message)
            });
        }
        Ok(response)
    }
}

impl WgsMirror for HttpWgsMirror {
    fn list_batches(&self, project: &ProjectId) -> Result<Vec<String>, TransportError> {
        let url = format!("{}/", self.project_url(project));
        let response = self.get(&url)?;
        let body = response
            .text()
            .map_err(|err| retry::classify(&err))?;
        Ok(parse_listing(&body))
    }

    fn fetch_batch(
        &self,
        project: &ProjectId,
        name: &str,
        dest: &Utf8Path,
    ) -> Result<u64, TransportError> {
        let _guard = TransferGuard::acquire(&self.in_flight)?;

        let url = format!("{}/{}", self.project_url(project), name);
        let response = self.get(&url)?;

        let dir = dest.parent().ok_or_else(|| {
            TransportError::Fatal(format!("destination {dest} has no parent directory"))
        })?;
        let temp = tempfile::Builder::new()
            .prefix(".taxid2wgs-")
            .tempfile_in(dir.as_std_path())
            .map_err(|err| TransportError::Fatal(err.to_string()))?;
        let file = temp
            .reopen()
            .map_err(|err| TransportError::Fatal(err.to_string()))?;

        // The blocking read loop runs on its own thread; this thread is the
        // periodic liveness task and the only interrupt observer.
        let (tx, rx) = mpsc::channel();
        let worker_interrupt = self.interrupt.clone();
        thread::spawn(move || {
            let _ = tx.send(stream_to_file(response, file, &worker_interrupt));
        });

        let written = loop {
            match rx.recv_timeout(Duration::from_secs(KEEPALIVE_SECS)) {
                Ok(result) => break result?,
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    if self.interrupt.is_raised() {
                        return Err(TransportError::Interrupted);
                    }
                    debug!(%url, "transfer in progress");
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    return Err(TransportError::Fatal(
                        "download thread terminated unexpectedly".to_string(),
                    ));
                }
            }
        };

        temp.persist(dest.as_std_path())
            .map_err(|err| TransportError::Fatal(err.to_string()))?;
        Ok(written)
    }
}

fn stream_to_file(
    mut response: reqwest::blocking::Response,
    mut file: std::fs::File,
    interrupt: &Interrupt,
) -> Result<u64, TransportError> {
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut written = 0u64;
    loop {
        if interrupt.is_raised() {
            return Err(TransportError::Interrupted);
        }
        match response.read(&mut buf) {
            Ok(0) => break,
            Ok(count) => {
                file.write_all(&buf[..count])
                    .map_err(|err| TransportError::Fatal(err.to_string()))?;
                written += count as u64;
            }
            Err(err) => return Err(TransportError::Retryable(err.to_string())),
        }
    }
    file.flush()
        .map_err(|err| TransportError::Fatal(err.to_string()))?;
    Ok(written)
}

/// Extract batch file names from the mirror's HTML directory index.
pub fn parse_listing(html: &str) -> Vec<String> {
    let link = Regex::new(r#"<a href="([^"]+)""#).unwrap();
    link.captures_iter(html)
        .map(|cap| cap[1].to_string())
        .filter(|name| name.ends_with(FSA_BATCH_SUFFIX))
        .collect()
}

/// Marks the single permitted in-flight transfer for one mirror connection.
struct TransferGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> TransferGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, TransportError> {
        if flag
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(TransportError::Fatal(
                "another transfer is already in flight on this connection".to_string(),
            ));
        }
        Ok(Self { flag })
    }
}

impl Drop for TransferGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}
