//! Dataset validation and quality checks.

use crate::source::summarize_root;
use crate::types::{
    DatasetResult, DatasetSummary, ValidationOutcome, ValidationReport, ValidationThresholds,
};
use std::path::Path;

pub fn validate_summary(
    summary: DatasetSummary,
    thresholds: &ValidationThresholds,
) -> ValidationReport {
    let mut outcome = ValidationOutcome::Pass;
    let mut reasons = Vec::new();

    for class in &summary.classes {
        if !class.present {
            outcome = ValidationOutcome::Fail;
            reasons.push(format!(
                "{}: directory missing ({})",
                class.class,
                class.dir.display()
            ));
            continue;
        }
        if let Some(min) = thresholds.min_per_class {
            if class.images < min {
                outcome = ValidationOutcome::Fail;
                reasons.push(format!(
                    "{}: {} images below minimum {min}",
                    class.class, class.images
                ));
            }
        }
        if class.images == 0 {
            if outcome == ValidationOutcome::Pass {
                outcome = ValidationOutcome::Warn;
            }
            reasons.push(format!("{}: no .jpg images", class.class));
        }
        if class.skipped > 0 {
            if outcome == ValidationOutcome::Pass {
                outcome = ValidationOutcome::Warn;
            }
            reasons.push(format!(
                "{}: {} non-.jpg entries skipped",
                class.class, class.skipped
            ));
        }
    }

    if let Some(max_ratio) = thresholds.max_imbalance_ratio {
        let counts: Vec<usize> = summary
            .classes
            .iter()
            .filter(|c| c.present)
            .map(|c| c.images)
            .collect();
        let largest = counts.iter().copied().max().unwrap_or(0);
        let smallest = counts.iter().copied().min().unwrap_or(0);
        if smallest > 0 {
            let ratio = largest as f32 / smallest as f32;
            if ratio > max_ratio {
                outcome = ValidationOutcome::Fail;
                reasons.push(format!(
                    "class imbalance: ratio {:.3} exceeds max {:.3}",
                    ratio, max_ratio
                ));
            }
        }
    }

    ValidationReport {
        outcome,
        reasons,
        summary,
    }
}

pub fn summarize_root_with_thresholds(
    root: &Path,
    thresholds: &ValidationThresholds,
) -> DatasetResult<ValidationReport> {
    let summary = summarize_root(root)?;
    Ok(validate_summary(summary, thresholds))
}
