//! Cancellation of long-running batches.

use crate::errors::{DetectionPowerError, DetectionPowerResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Token that has not been cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Returns true when cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Returns a cancelled error when an optional token has been cancelled.
pub fn check_cancelled(cancel: Option<&CancelToken>) -> DetectionPowerResult<()> {
    if cancel.is_some_and(CancelToken::is_cancelled) {
        return Err(DetectionPowerError::Cancelled);
    }
    Ok(())
}

/// Checks cancellation every `every` iterations (zero polls every time).
pub fn check_cancelled_every(
    cancel: Option<&CancelToken>,
    iteration: usize,
    every: usize,
) -> DetectionPowerResult<()> {
    if iteration % every.max(1) != 0 {
        return Ok(());
    }
    check_cancelled(cancel)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_flag() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_check_cancelled_every_polls_on_multiples() {
        let token = CancelToken::new();
        token.cancel();
        assert!(check_cancelled(None).is_ok());
        assert!(check_cancelled_every(Some(&token), 3, 4).is_ok());
        assert!(matches!(
            check_cancelled_every(Some(&token), 8, 4),
            Err(DetectionPowerError::Cancelled)
        ));
        assert!(check_cancelled_every(Some(&token), 5, 0).is_err());
    }
}
