//! Template repair: add the missing literal or slot the diagnosis pointed
//! at, gated so that currently-passing samples keep matching.

use std::sync::Arc;

use tracing::{info, warn};

use templar_core::diagnosis::{Diagnosis, RepairOp};
use templar_core::{LogSample, Template, TemplatePattern, Verdict};
use templar_oracle::{GenerationParams, Generator};

use crate::error::EngineError;
use crate::prompt;

pub struct TemplateRepair {
    oracle: Arc<dyn Generator>,
    params: GenerationParams,
}

impl TemplateRepair {
    pub fn new(oracle: Arc<dyn Generator>, params: GenerationParams) -> Self {
        Self { oracle, params }
    }

    /// Propose a corrected pattern. Returns an empty vec when the oracle
    /// declines, the proposal does not parse, or the held-out gate rejects
    /// it — the orchestrator treats that as a rejected repair.
    pub async fn propose(
        &self,
        active: &Template,
        diagnosis: Option<&Diagnosis>,
        failures: &[(LogSample, Verdict)],
        held_out: &[LogSample],
        corpus: &[&LogSample],
        history: &str,
        seq: usize,
    ) -> Result<Vec<Template>, EngineError> {
        let (cause, rationale) = diagnosis
            .map(|d| (d.cause.as_str(), d.rationale.as_str()))
            .unwrap_or(("unresolved", ""));

        let messages =
            prompt::template_repair(active, cause, rationale, failures, corpus, history);
        let reply = self.oracle.generate(&messages, &self.params).await?;

        let Some(json) = prompt::parse_json_reply(&reply) else {
            warn!(template = %active.id, "unparseable repair reply");
            return Ok(Vec::new());
        };
        if json["needs_repair"].as_bool() == Some(false) {
            info!(template = %active.id, "oracle declined to repair the template");
            return Ok(Vec::new());
        }
        let Some(proposed) = json["new_template"].as_str() else {
            warn!(template = %active.id, "repair reply without a new template");
            return Ok(Vec::new());
        };
        if proposed == active.pattern.as_str() {
            info!(template = %active.id, "repair proposal is unchanged");
            return Ok(Vec::new());
        }

        let pattern = match TemplatePattern::new(proposed) {
            Ok(p) => p,
            Err(e) => {
                warn!(template = %active.id, error = %e, "proposed pattern does not parse");
                return Ok(Vec::new());
            }
        };

        // Held-out gate: a repair must not break lines that already pass.
        for sample in held_out {
            if pattern.matches(&sample.raw).is_none() {
                warn!(
                    template = %active.id,
                    line = %sample.line_id,
                    proposed,
                    "proposed pattern breaks a passing sample"
                );
                return Ok(Vec::new());
            }
        }
        // And it has to structurally cover the lines it is meant to fix.
        for (sample, _) in failures {
            if pattern.matches(&sample.raw).is_none() {
                warn!(
                    template = %active.id,
                    line = %sample.line_id,
                    proposed,
                    "proposed pattern still misses a failing sample"
                );
                return Ok(Vec::new());
            }
        }

        info!(template = %active.id, proposed, "template repair candidate accepted for re-verification");
        Ok(vec![active.derive(
            pattern,
            &active.description,
            RepairOp::RepairTemplate,
            seq,
        )])
    }
}
