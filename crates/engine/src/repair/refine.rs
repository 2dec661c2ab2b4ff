//! Description refinement: regenerate a vague template description from
//! matched-sample context. The pattern itself is never touched.

use std::sync::Arc;

use tracing::{info, warn};

use templar_core::diagnosis::RepairOp;
use templar_core::{LogSample, Template};
use templar_oracle::{GenerationParams, Generator};

use crate::error::EngineError;
use crate::prompt;

pub struct DescriptionRefiner {
    oracle: Arc<dyn Generator>,
    params: GenerationParams,
}

impl DescriptionRefiner {
    pub fn new(oracle: Arc<dyn Generator>, params: GenerationParams) -> Self {
        Self { oracle, params }
    }

    /// Produce a candidate with the same pattern and a rewritten description.
    /// Empty or unchanged rewrites are rejected.
    pub async fn propose(
        &self,
        active: &Template,
        samples: &[LogSample],
        history: &str,
        seq: usize,
    ) -> Result<Vec<Template>, EngineError> {
        let messages = prompt::refine(active, samples, history);
        let reply = self.oracle.generate(&messages, &self.params).await?;
        let description = prompt::strip_reply(&reply);

        if description.is_empty() || description == active.description {
            warn!(template = %active.id, "refined description is empty or unchanged");
            return Ok(Vec::new());
        }

        info!(template = %active.id, "description refined for re-verification");
        Ok(vec![active.derive(
            active.pattern.clone(),
            &description,
            RepairOp::RefineDescription,
            seq,
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use templar_core::{Provenance, TemplatePattern};
    use templar_oracle::mock::MockGenerator;

    fn active() -> Template {
        Template::new(
            "E4",
            "Proxifier",
            TemplatePattern::new("open through proxy <*>").unwrap(),
            "something about a proxy",
        )
    }

    #[tokio::test]
    async fn rewrites_only_the_description() {
        let mock = MockGenerator::new();
        mock.push_text("A connection was opened through the proxy server at the given address.");
        let refiner = DescriptionRefiner::new(Arc::new(mock), GenerationParams::default());
        let samples = vec![LogSample::new("1", "open through proxy 10.0.0.7:1080", Some("E4"))];

        let candidates = refiner.propose(&active(), &samples, "", 0).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].pattern, active().pattern);
        assert_ne!(candidates[0].description, active().description);
        assert_eq!(
            candidates[0].provenance,
            Provenance::Repaired { op: RepairOp::RefineDescription, parent: "E4".into() }
        );
    }

    #[tokio::test]
    async fn unchanged_description_is_rejected() {
        let mock = MockGenerator::new();
        mock.push_text("something about a proxy");
        let refiner = DescriptionRefiner::new(Arc::new(mock), GenerationParams::default());
        let candidates = refiner.propose(&active(), &[], "", 0).await.unwrap();
        assert!(candidates.is_empty());
    }
}
