//! Cooperative interrupt handling.
//!
//! A Ctrl-C sets a flag; long-running loops poll it through
//! [`Interrupt::check`] and unwind with [`Error::Interrupted`], so restore
//! guards run on the way out.

use crate::error::{Error, Result};
use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

static PROCESS_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

/// Shared interrupt flag.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    flag: Arc<AtomicBool>,
}

impl Interrupt {
    /// A flag that only trips when [`Interrupt::trigger`] is called.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the process-wide Ctrl-C handler and returns its flag.
    ///
    /// Calling this more than once returns the same flag.
    ///
    /// # Errors
    ///
    /// Returns an error if the signal handler cannot be installed.
    pub fn install() -> Result<Self> {
        if let Some(flag) = PROCESS_FLAG.get() {
            return Ok(Self { flag: flag.clone() });
        }

        let flag = Arc::new(AtomicBool::new(false));
        let handler_flag = flag.clone();
        ctrlc::set_handler(move || {
            warn!("Interrupt received, cleaning up");
            handler_flag.store(true, Ordering::SeqCst);
        })
        .map_err(|e| Error::config(format!("Failed to install interrupt handler: {e}"), "Only one handler may be installed per process"))?;

        let flag = PROCESS_FLAG.get_or_init(|| flag).clone();
        Ok(Self { flag })
    }

    /// Marks the flag as interrupted.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether an interrupt was received.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Returns [`Error::Interrupted`] once an interrupt was received.
    ///
    /// # Errors
    ///
    /// Returns an error if the flag is set.
    pub fn check(&self) -> Result<()> {
        if self.is_set() {
            Err(Error::Interrupted)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_clear() {
        let interrupt = Interrupt::new();
        assert!(!interrupt.is_set());
        assert!(interrupt.check().is_ok());
    }

    #[test]
    fn test_trigger_is_shared_by_clones() {
        let interrupt = Interrupt::new();
        let clone = interrupt.clone();
        clone.trigger();
        assert!(interrupt.is_set());
        assert!(matches!(interrupt.check(), Err(Error::Interrupted)));
    }
}
