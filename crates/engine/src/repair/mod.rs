//! The repair roles: pure context → candidate transforms selected through
//! the cause → operation routing table. None of them mutate the original
//! template record; each emits new versioned records for re-verification.

pub mod refine;
pub mod retry;
pub mod split;
pub mod template;

pub use refine::DescriptionRefiner;
pub use retry::GeneratorRetry;
pub use split::{SplitOutcome, TemplateSplit};
pub use template::TemplateRepair;

use templar_core::LogSample;

/// Mixed corpus sampling for repair context: front, middle, and back of the
/// line set, deduplicated by line id. Small sets are passed through whole.
pub(crate) fn sample_corpus(samples: &[LogSample], limit: usize) -> Vec<&LogSample> {
    if samples.len() <= limit || limit == 0 {
        return samples.iter().collect();
    }

    let back = (limit * 3) / 10;
    let mid = (limit * 3) / 10;
    let front = limit - back - mid;
    let mid_start = (samples.len() - mid) / 2;

    let mut seen = std::collections::BTreeSet::new();
    let mut picked = Vec::with_capacity(limit);
    let sections = [
        &samples[..front],
        &samples[mid_start..mid_start + mid],
        &samples[samples.len() - back..],
    ];
    for section in sections {
        for sample in section {
            if seen.insert(sample.line_id.as_str()) {
                picked.push(sample);
            }
        }
    }
    picked
}
