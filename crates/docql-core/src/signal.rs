//! Cancellation signal shared between a request and the evaluation it drives.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};

/// Cloneable one-shot signal. Once pulsed it stays pulsed.
#[derive(Debug, Clone, Default)]
pub struct Interruptor {
    flag: Arc<AtomicBool>,
}

impl Interruptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pulse(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_pulsed(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Fail with `Interrupted` if the signal has fired.
    pub fn check(&self) -> Result<()> {
        if self.is_pulsed() {
            Err(Error::Interrupted)
        } else {
            Ok(())
        }
    }
}
