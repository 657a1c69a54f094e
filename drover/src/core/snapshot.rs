//! Pass/total accounting over checklist records.

use crate::core::types::FeatureRecord;

/// Passing and total record counts at one point in time.
///
/// Always computed from the records on disk; never cached across sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChecklistSnapshot {
    pub passing_count: usize,
    pub total_count: usize,
}

impl ChecklistSnapshot {
    pub fn from_records(records: &[FeatureRecord]) -> Self {
        Self {
            passing_count: records.iter().filter(|record| record.passes).count(),
            total_count: records.len(),
        }
    }

    /// Share of passing records in percent, `None` before the checklist exists.
    pub fn percentage(&self) -> Option<f64> {
        if self.total_count == 0 {
            return None;
        }
        Some(self.passing_count as f64 / self.total_count as f64 * 100.0)
    }

    pub fn is_initialized(&self) -> bool {
        self.total_count > 0
    }

    /// True once every record passes. An empty checklist is never complete.
    pub fn is_complete(&self) -> bool {
        self.is_initialized() && self.passing_count == self.total_count
    }

    /// Human-readable progress line shared by the console and the progress log.
    pub fn progress_line(&self) -> String {
        match self.percentage() {
            Some(pct) => format!(
                "{}/{} tests passing ({pct:.1}%)",
                self.passing_count, self.total_count
            ),
            None => "feature checklist not yet created".to_string(),
        }
    }
}
