use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared flag raised by the Ctrl-C handler and polled at every suspension
/// point (retry sleeps, heartbeat ticks, download chunks).
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    flag: Arc<AtomicBool>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the process-wide Ctrl-C handler. Call once, from the binary.
    pub fn install(&self) {
        let flag = Arc::clone(&self.flag);
        let _ = ctrlc::set_handler(move || {
            flag.store(true, Ordering::SeqCst);
        });
    }

    pub fn raise(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
