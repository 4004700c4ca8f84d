//! Aggregated results of an apply phase

use serde::{Deserialize, Serialize};

/// One delta that could not be applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyFailure {
    /// Snapshot key of the entity or media asset
    pub key: String,
    /// Where the asset was fetched from, when relevant
    pub reference: Option<String>,
    pub error: String,
}

/// Counts of applied, skipped and failed deltas.
///
/// `skipped` covers deltas that needed no write, such as a document whose
/// payload was already identical on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyOutcome {
    pub applied: usize,
    pub skipped: usize,
    pub errors: Vec<ApplyFailure>,
}

impl ApplyOutcome {
    pub fn record_applied(&mut self) {
        self.applied += 1;
    }

    pub fn record_skipped(&mut self) {
        self.skipped += 1;
    }

    pub fn record_failure(
        &mut self,
        key: impl Into<String>,
        reference: Option<String>,
        error: impl ToString,
    ) {
        self.errors.push(ApplyFailure {
            key: key.into(),
            reference,
            error: error.to_string(),
        });
    }

    pub fn failed(&self) -> usize {
        self.errors.len()
    }

    pub fn attempted(&self) -> usize {
        self.applied + self.skipped + self.failed()
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}
