use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::error::WgsError;
use crate::interrupt::Interrupt;

/// Wait, in seconds, before each attempt of a remote operation. One attempt
/// is made per entry; exhausting the schedule is fatal for the run.
pub const RETRY_SCHEDULE: [u64; 6] = [0, 5, 15, 30, 60, 120];

/// Transport faults split at the type level: only `Retryable` is ever seen
/// by the backoff loop, everything else propagates immediately.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("{0}")]
    Retryable(String),

    #[error("{0}")]
    Fatal(String),

    #[error("interrupted")]
    Interrupted,
}

pub fn classify(err: &reqwest::Error) -> TransportError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        TransportError::Retryable(err.to_string())
    } else {
        TransportError::Fatal(err.to_string())
    }
}

pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

/// Run `attempt` once per schedule entry, sleeping the entry's duration
/// before every attempt after the first.
pub fn with_backoff<T, F>(
    schedule: &[u64],
    operation: &str,
    interrupt: &Interrupt,
    mut attempt: F,
) -> Result<T, WgsError>
where
    F: FnMut() -> Result<T, TransportError>,
{
    let mut last_cause = String::from("no attempt made");
    for &wait in schedule {
        if wait > 0 {
            debug!(operation, wait, "retrying after backoff");
            interruptible_sleep(wait, interrupt)?;
        }
        if interrupt.is_raised() {
            return Err(WgsError::Interrupted);
        }
        match attempt() {
            Ok(value) => return Ok(value),
            Err(TransportError::Retryable(cause)) => {
                warn!(operation, %cause, "transient transport failure");
                last_cause = cause;
            }
            Err(TransportError::Fatal(message)) => {
                return Err(WgsError::Transport {
                    operation: operation.to_string(),
                    message,
                });
            }
            Err(TransportError::Interrupted) => return Err(WgsError::Interrupted),
        }
    }
    Err(WgsError::RetriesExhausted {
        operation: operation.to_string(),
        cause: last_cause,
    })
}

fn interruptible_sleep(seconds: u64, interrupt: &Interrupt) -> Result<(), WgsError> {
    for _ in 0..seconds {
        if interrupt.is_raised() {
            return Err(WgsError::Interrupted);
        }
        thread::sleep(Duration::from_secs(1));
    }
    Ok(())
}
