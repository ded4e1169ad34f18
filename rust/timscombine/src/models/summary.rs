use std::fmt::Display;
use std::time::Duration;

use serde::Serialize;

/// Summary of the merging for a single spectrum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MergeSummary {
    pub input_peaks: usize,
    pub output_peaks: usize,
    pub merged: usize,
    pub appended: usize,
    pub multimerged: usize,
    pub cascaded: usize,
    pub elapsed: Duration,
}

/// Summary of the merging over many spectra (scan groups).
#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregatedMergeSummary {
    pub total_input_peaks: usize,
    pub total_output_peaks: usize,
    pub total_merged: usize,
    pub total_appended: usize,
    pub total_multimerged: usize,
    pub total_cascaded: usize,
    pub groups_processed: usize,
    pub groups_failed: usize,
    /// Summed per-group time, not wall time.
    pub elapsed: Duration,
}

impl AggregatedMergeSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn combine(mut self, right: &Self) -> Self {
        self.total_input_peaks += right.total_input_peaks;
        self.total_output_peaks += right.total_output_peaks;
        self.total_merged += right.total_merged;
        self.total_appended += right.total_appended;
        self.total_multimerged += right.total_multimerged;
        self.total_cascaded += right.total_cascaded;
        self.groups_processed += right.groups_processed;
        self.groups_failed += right.groups_failed;
        self.elapsed += right.elapsed;
        self
    }

    pub fn fold_summary(mut left: Self, other: &MergeSummary) -> Self {
        left.total_input_peaks += other.input_peaks;
        left.total_output_peaks += other.output_peaks;
        left.total_merged += other.merged;
        left.total_appended += other.appended;
        left.total_multimerged += other.multimerged;
        left.total_cascaded += other.cascaded;
        left.groups_processed += 1;
        left.elapsed += other.elapsed;
        left
    }

    pub fn fold_failure(mut left: Self) -> Self {
        left.groups_failed += 1;
        left
    }

    pub fn reduction(&self) -> f64 {
        if self.total_output_peaks == 0 {
            return 0.0;
        }
        self.total_input_peaks as f64 / self.total_output_peaks as f64
    }
}

impl From<MergeSummary> for AggregatedMergeSummary {
    fn from(value: MergeSummary) -> Self {
        Self::fold_summary(Self::new(), &value)
    }
}

impl Display for AggregatedMergeSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Groups processed: {}", self.groups_processed)?;
        writeln!(f, "Groups failed: {}", self.groups_failed)?;
        writeln!(f, "Total elapsed time merging (cpu): {:#.2?}", self.elapsed)?;
        if self.groups_processed > 0 {
            let avg_time = self.elapsed / self.groups_processed as u32;
            writeln!(f, "Average time per group: {:#.2?}", avg_time)?;
        }
        writeln!(f, "Total input peaks: {}", self.total_input_peaks)?;
        writeln!(f, "Total output peaks: {}", self.total_output_peaks)?;
        writeln!(f, "Average reduction: {:.2}x", self.reduction())?;
        write!(
            f,
            "Merges: merged: {}, appended: {}, multimerged: {}, cascaded: {}",
            self.total_merged, self.total_appended, self.total_multimerged, self.total_cascaded,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(input: usize, output: usize) -> MergeSummary {
        MergeSummary {
            input_peaks: input,
            output_peaks: output,
            merged: input - output,
            appended: output,
            multimerged: 0,
            cascaded: 0,
            elapsed: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_fold_and_combine() {
        let left = AggregatedMergeSummary::from(summary(10, 5));
        let right = AggregatedMergeSummary::fold_summary(
            AggregatedMergeSummary::fold_failure(AggregatedMergeSummary::new()),
            &summary(30, 5),
        );
        let total = left.combine(&right);
        assert_eq!(total.groups_processed, 2);
        assert_eq!(total.groups_failed, 1);
        assert_eq!(total.total_input_peaks, 40);
        assert_eq!(total.total_output_peaks, 10);
        assert_eq!(total.total_merged, 30);
        assert_eq!(total.reduction(), 4.0);
        assert_eq!(total.elapsed, Duration::from_millis(20));
    }

    #[test]
    fn test_display_empty_summary() {
        let text = AggregatedMergeSummary::new().to_string();
        assert!(text.contains("Groups processed: 0"));
        assert!(text.contains("Average reduction: 0.00x"));
    }
}
