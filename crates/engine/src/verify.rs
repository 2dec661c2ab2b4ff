//! Reconstruction verification: regenerate the original line from a semantic
//! description under the template's structural constraints, then compare.
//!
//! The asymmetry is the whole point: a sound template reduces reconstruction
//! to trivial slot-filling, while a noisy one forces free generation that
//! drifts. Comparison is therefore never lenient — exact match first,
//! whitespace-normalized second, and parameter values always byte-exact.

use std::sync::Arc;

use tracing::debug;

use templar_core::verdict::{compare, Verdict};
use templar_core::{SemanticDescription, Template};
use templar_oracle::{FewShotSet, GenerationParams, Generator};

use crate::error::EngineError;
use crate::prompt;

pub struct ReconstructionVerifier {
    oracle: Arc<dyn Generator>,
    params: GenerationParams,
    fewshot: Arc<FewShotSet>,
    borrow_limit: usize,
    min_similarity: f64,
}

impl ReconstructionVerifier {
    pub fn new(
        oracle: Arc<dyn Generator>,
        params: GenerationParams,
        fewshot: Arc<FewShotSet>,
        borrow_limit: usize,
        min_similarity: f64,
    ) -> Self {
        Self { oracle, params, fewshot, borrow_limit, min_similarity }
    }

    /// One reconstruction round: generate under the template's constraints,
    /// compare against the original line.
    pub async fn verify(
        &self,
        system: &str,
        description: &SemanticDescription,
        template: &Template,
        original: &str,
        enriched: bool,
    ) -> Result<Verdict, EngineError> {
        let demos = if enriched {
            self.fewshot.enriched_for_system(system, self.borrow_limit)
        } else {
            self.fewshot.for_system(system, self.borrow_limit)
        };

        let messages = prompt::reconstruction(template.pattern.as_str(), &description.text, &demos);
        let reply = self.oracle.generate(&messages, &self.params).await?;
        let reconstruction = prompt::strip_reply(&reply);

        let verdict = compare(
            original.trim(),
            &reconstruction,
            &description.params,
            self.min_similarity,
        );
        debug!(
            template = %template.id,
            pass = verdict.pass,
            score = verdict.score,
            "reconstruction compared"
        );
        Ok(verdict)
    }
}
