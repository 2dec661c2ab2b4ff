//! Generator retry: not a content repair but a resilience wrapper. The
//! candidate is the same template re-versioned; what changes is that its
//! re-verification round runs with the enriched demonstration set appended
//! to every oracle call. Bounded per case.

use tracing::{info, warn};

use templar_core::diagnosis::RepairOp;
use templar_core::{Template, TemplateCase};

pub struct GeneratorRetry {
    max_demo_retries: u32,
}

impl GeneratorRetry {
    pub fn new(max_demo_retries: u32) -> Self {
        Self { max_demo_retries }
    }

    /// Emit a retry candidate, or nothing once the per-case bound is spent.
    pub fn propose(&self, case: &TemplateCase, active: &Template, seq: usize) -> Vec<Template> {
        let prior = case
            .attempts
            .iter()
            .filter(|a| a.operation == RepairOp::RetryWithDemonstrations)
            .count() as u32;
        if prior >= self.max_demo_retries {
            warn!(
                case = %case.id,
                prior,
                bound = self.max_demo_retries,
                "demonstration retries exhausted"
            );
            return Vec::new();
        }

        info!(case = %case.id, attempt = prior + 1, "retrying with demonstrations appended");
        vec![active.derive(
            active.pattern.clone(),
            &active.description,
            RepairOp::RetryWithDemonstrations,
            seq,
        )]
    }
}
