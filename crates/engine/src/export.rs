//! Case outcome export: the sole externally consumed artifact. Lossless with
//! respect to the case history — every verdict, diagnosis, attempt, and FSM
//! transition survives serialization.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use templar_core::{
    CaseState, Diagnosis, RepairAttempt, Template, TemplateCase, TransitionRecord, Verdict,
};

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("failed to write export file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize outcomes: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseOutcome {
    pub case_id: Uuid,
    pub template_id: String,
    pub system: String,
    pub final_state: CaseState,
    /// Final accepted template(s): the original for `Verified`, the passing
    /// candidate set for `Resolved`, empty for `Exhausted`.
    pub accepted: Vec<Template>,
    pub iterations: u32,
    pub cancelled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_diagnosis: Option<Diagnosis>,
    pub history: Vec<TransitionRecord>,
    pub verdicts: Vec<Verdict>,
    pub diagnoses: Vec<Diagnosis>,
    pub attempts: Vec<RepairAttempt>,
}

impl From<&TemplateCase> for CaseOutcome {
    fn from(case: &TemplateCase) -> Self {
        Self {
            case_id: case.id,
            template_id: case.template.id.clone(),
            system: case.template.system.clone(),
            final_state: case.state,
            accepted: case.accepted.clone(),
            iterations: case.iterations,
            cancelled: case.cancelled,
            last_diagnosis: case.diagnoses.last().cloned(),
            history: case.history.clone(),
            verdicts: case.verdicts.clone(),
            diagnoses: case.diagnoses.clone(),
            attempts: case.attempts.clone(),
        }
    }
}

/// Terminal-state counts for a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub verified: usize,
    pub resolved: usize,
    pub exhausted: usize,
}

pub fn summarize(outcomes: &[CaseOutcome]) -> RunSummary {
    let mut summary = RunSummary { total: outcomes.len(), ..RunSummary::default() };
    for outcome in outcomes {
        match outcome.final_state {
            CaseState::Verified => summary.verified += 1,
            CaseState::Resolved => summary.resolved += 1,
            CaseState::Exhausted => summary.exhausted += 1,
            _ => {}
        }
    }
    summary
}

/// Write all outcomes plus the summary as one JSON document.
pub fn write_outcomes(path: &Path, outcomes: &[CaseOutcome]) -> Result<(), ExportError> {
    #[derive(Serialize)]
    struct Document<'a> {
        summary: RunSummary,
        cases: &'a [CaseOutcome],
    }
    let doc = Document { summary: summarize(outcomes), cases: outcomes };
    let file = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(file, &doc)?;
    Ok(())
}
