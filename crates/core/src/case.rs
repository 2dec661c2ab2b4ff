use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::diagnosis::{Diagnosis, RepairOp};
use crate::sample::LogSample;
use crate::template::Template;
use crate::verdict::Verdict;

/// Lifecycle state of one template under audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseState {
    Unverified,
    Verifying,
    /// Terminal: passed verification untouched.
    Verified,
    Flagged,
    Diagnosing,
    Repairing,
    ReVerifying,
    /// Terminal: a repair candidate set passed re-verification.
    Resolved,
    /// Terminal: budget spent, diagnosis stuck, or cancelled. Surfaced for
    /// manual review, never dropped.
    Exhausted,
}

impl CaseState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CaseState::Verified | CaseState::Resolved | CaseState::Exhausted)
    }
}

/// Events that drive the case FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseEvent {
    Intake,
    VerifyPassed,
    VerifyFailed,
    /// Extraction loss or an exhausted oracle: failure without a verdict.
    VerifyInconclusive,
    BeginDiagnosis,
    OperationSelected,
    /// Diagnosis repeatedly returned `unresolved`.
    DiagnosisExhausted,
    CandidatesReady,
    /// The operation produced no usable candidate.
    RepairRejected,
    ReVerifyPassed,
    ReVerifyFailed,
    BudgetExhausted,
    Cancelled,
}

impl CaseEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseEvent::Intake => "intake",
            CaseEvent::VerifyPassed => "verify_passed",
            CaseEvent::VerifyFailed => "verify_failed",
            CaseEvent::VerifyInconclusive => "verify_inconclusive",
            CaseEvent::BeginDiagnosis => "begin_diagnosis",
            CaseEvent::OperationSelected => "operation_selected",
            CaseEvent::DiagnosisExhausted => "diagnosis_exhausted",
            CaseEvent::CandidatesReady => "candidates_ready",
            CaseEvent::RepairRejected => "repair_rejected",
            CaseEvent::ReVerifyPassed => "reverify_passed",
            CaseEvent::ReVerifyFailed => "reverify_failed",
            CaseEvent::BudgetExhausted => "budget_exhausted",
            CaseEvent::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("case is terminal in state {0:?}")]
    Terminal(CaseState),

    #[error("invalid transition: {state:?} on {event:?}")]
    Invalid { state: CaseState, event: CaseEvent },
}

/// The pure transition table. No hidden control flow: replaying the recorded
/// event sequence reproduces the state sequence exactly.
pub fn transition(state: CaseState, event: CaseEvent) -> Result<CaseState, TransitionError> {
    use CaseEvent as E;
    use CaseState as S;

    if state.is_terminal() {
        return Err(TransitionError::Terminal(state));
    }
    if event == E::Cancelled {
        return Ok(S::Exhausted);
    }

    let next = match (state, event) {
        (S::Unverified, E::Intake) => S::Verifying,
        (S::Verifying, E::VerifyPassed) => S::Verified,
        (S::Verifying, E::VerifyFailed | E::VerifyInconclusive) => S::Flagged,
        (S::Flagged, E::BeginDiagnosis) => S::Diagnosing,
        (S::Diagnosing, E::OperationSelected) => S::Repairing,
        (S::Diagnosing, E::DiagnosisExhausted | E::BudgetExhausted) => S::Exhausted,
        (S::Repairing, E::CandidatesReady) => S::ReVerifying,
        (S::Repairing, E::RepairRejected) => S::Diagnosing,
        (S::Repairing, E::BudgetExhausted) => S::Exhausted,
        (S::ReVerifying, E::ReVerifyPassed) => S::Resolved,
        (S::ReVerifying, E::ReVerifyFailed) => S::Diagnosing,
        (S::ReVerifying, E::BudgetExhausted) => S::Exhausted,
        (state, event) => return Err(TransitionError::Invalid { state, event }),
    };
    Ok(next)
}

/// One recorded FSM step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: CaseState,
    pub to: CaseState,
    pub event: CaseEvent,
    pub at: DateTime<Utc>,
}

/// Per-candidate, per-sample re-verification result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateVerdict {
    pub template_id: String,
    pub line_id: String,
    pub verdict: Verdict,
}

/// One invocation of a repair operation and everything it produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairAttempt {
    pub operation: RepairOp,
    pub candidates: Vec<Template>,
    /// Candidate template id → line ids it is scoped to.
    #[serde(default)]
    pub assignments: IndexMap<String, Vec<String>>,
    pub verdicts: Vec<CandidateVerdict>,
    pub accepted: bool,
    pub at: DateTime<Utc>,
}

/// The unit of audit/repair work: one template, its samples, and the full
/// history of everything that happened to it. Owned and mutated exclusively
/// by the orchestrator; every other component works on copies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateCase {
    pub id: Uuid,
    pub template: Template,
    pub samples: Vec<LogSample>,
    pub state: CaseState,
    /// Completed Diagnosing → Repairing → ReVerifying loops.
    pub iterations: u32,
    pub history: Vec<TransitionRecord>,
    pub verdicts: Vec<Verdict>,
    pub diagnoses: Vec<Diagnosis>,
    pub attempts: Vec<RepairAttempt>,
    /// Final accepted template(s) once the case resolves.
    pub accepted: Vec<Template>,
    pub cancelled: bool,
}

impl TemplateCase {
    pub fn new(template: Template, samples: Vec<LogSample>) -> Self {
        Self {
            id: Uuid::new_v4(),
            template,
            samples,
            state: CaseState::Unverified,
            iterations: 0,
            history: Vec::new(),
            verdicts: Vec::new(),
            diagnoses: Vec::new(),
            attempts: Vec::new(),
            accepted: Vec::new(),
            cancelled: false,
        }
    }

    /// Apply an event, recording the transition in the audit history.
    pub fn apply(&mut self, event: CaseEvent) -> Result<CaseState, TransitionError> {
        let next = transition(self.state, event)?;
        self.history.push(TransitionRecord {
            from: self.state,
            to: next,
            event,
            at: Utc::now(),
        });
        if event == CaseEvent::Cancelled {
            self.cancelled = true;
        }
        self.state = next;
        Ok(next)
    }

    /// Whether the previous diagnosis already came back `unresolved`.
    pub fn prior_unresolved(&self) -> bool {
        self.diagnoses
            .last()
            .is_some_and(|d| d.cause == crate::diagnosis::Cause::Unresolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::TemplatePattern;

    fn case() -> TemplateCase {
        let template = Template::new(
            "E1",
            "Proxifier",
            TemplatePattern::new("User <*> logged in").unwrap(),
            "a user login event",
        );
        TemplateCase::new(template, vec![LogSample::new("1", "User alice logged in", Some("E1"))])
    }

    #[test]
    fn happy_path_verifies() {
        let mut c = case();
        c.apply(CaseEvent::Intake).unwrap();
        assert_eq!(c.state, CaseState::Verifying);
        c.apply(CaseEvent::VerifyPassed).unwrap();
        assert_eq!(c.state, CaseState::Verified);
        assert!(c.state.is_terminal());
    }

    #[test]
    fn repair_loop_reaches_resolved() {
        let mut c = case();
        for event in [
            CaseEvent::Intake,
            CaseEvent::VerifyFailed,
            CaseEvent::BeginDiagnosis,
            CaseEvent::OperationSelected,
            CaseEvent::CandidatesReady,
            CaseEvent::ReVerifyFailed,
            CaseEvent::OperationSelected,
            CaseEvent::CandidatesReady,
            CaseEvent::ReVerifyPassed,
        ] {
            c.apply(event).unwrap();
        }
        assert_eq!(c.state, CaseState::Resolved);
        assert_eq!(c.history.len(), 9);
        // Replay the recorded events over the pure table.
        let mut s = CaseState::Unverified;
        for record in &c.history {
            s = transition(s, record.event).unwrap();
            assert_eq!(s, record.to);
        }
    }

    #[test]
    fn invalid_transitions_are_rejected() {
        let mut c = case();
        assert_eq!(
            c.apply(CaseEvent::VerifyPassed).unwrap_err(),
            TransitionError::Invalid { state: CaseState::Unverified, event: CaseEvent::VerifyPassed }
        );
        c.apply(CaseEvent::Intake).unwrap();
        c.apply(CaseEvent::VerifyPassed).unwrap();
        assert_eq!(
            c.apply(CaseEvent::Intake).unwrap_err(),
            TransitionError::Terminal(CaseState::Verified)
        );
    }

    #[test]
    fn cancellation_exhausts_from_any_live_state() {
        for prefix in [
            vec![],
            vec![CaseEvent::Intake],
            vec![CaseEvent::Intake, CaseEvent::VerifyFailed],
            vec![CaseEvent::Intake, CaseEvent::VerifyFailed, CaseEvent::BeginDiagnosis],
        ] {
            let mut c = case();
            for e in prefix {
                c.apply(e).unwrap();
            }
            c.apply(CaseEvent::Cancelled).unwrap();
            assert_eq!(c.state, CaseState::Exhausted);
            assert!(c.cancelled);
        }
    }

    #[test]
    fn inconclusive_verification_flags_the_case() {
        let mut c = case();
        c.apply(CaseEvent::Intake).unwrap();
        c.apply(CaseEvent::VerifyInconclusive).unwrap();
        assert_eq!(c.state, CaseState::Flagged);
    }

    #[test]
    fn budget_exhaustion_is_terminal_from_each_loop_state() {
        for prefix in [
            vec![CaseEvent::Intake, CaseEvent::VerifyFailed, CaseEvent::BeginDiagnosis],
            vec![
                CaseEvent::Intake,
                CaseEvent::VerifyFailed,
                CaseEvent::BeginDiagnosis,
                CaseEvent::OperationSelected,
            ],
            vec![
                CaseEvent::Intake,
                CaseEvent::VerifyFailed,
                CaseEvent::BeginDiagnosis,
                CaseEvent::OperationSelected,
                CaseEvent::CandidatesReady,
            ],
        ] {
            let mut c = case();
            for e in prefix {
                c.apply(e).unwrap();
            }
            c.apply(CaseEvent::BudgetExhausted).unwrap();
            assert_eq!(c.state, CaseState::Exhausted);
        }
    }
}
