//! Duplicate-submission guard.
//!
//! A form is disabled while its submission is pending. [`SubmitGate`] is the
//! non-UI form of that rule: a second submission started before the first
//! finishes fails immediately and never reaches the store.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::MarketError;

/// One in-flight submission at a time.
#[derive(Debug, Default)]
pub struct SubmitGate {
    busy: AtomicBool,
}

/// Releases the gate when dropped.
#[derive(Debug)]
pub struct SubmitPermit<'a> {
    gate: &'a SubmitGate,
}

impl SubmitGate {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            busy: AtomicBool::new(false),
        }
    }

    /// Claim the gate for one submission.
    ///
    /// # Errors
    ///
    /// Returns `MarketError::SubmissionInFlight` if a submission is pending.
    pub fn begin(&self) -> Result<SubmitPermit<'_>, MarketError> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| MarketError::SubmissionInFlight)?;
        Ok(SubmitPermit { gate: self })
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

impl Drop for SubmitPermit<'_> {
    fn drop(&mut self) {
        self.gate.busy.store(false, Ordering::Release);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_second_submission_fails_until_first_finishes() {
        let gate = SubmitGate::new();
        let permit = gate.begin().unwrap();
        assert!(gate.is_busy());
        assert!(matches!(gate.begin(), Err(MarketError::SubmissionInFlight)));

        drop(permit);
        assert!(!gate.is_busy());
        assert!(gate.begin().is_ok());
    }
}
