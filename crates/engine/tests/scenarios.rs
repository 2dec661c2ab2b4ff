//! End-to-end orchestration runs against a scripted oracle. Each test drives
//! one case from intake to a terminal state and checks the recorded history.

use std::sync::Arc;

use tokio::sync::watch;

use templar_core::config::EngineConfig;
use templar_core::diagnosis::{Cause, RepairOp};
use templar_core::verdict::MatchTier;
use templar_core::{CaseEvent, CaseState, LogSample, Provenance, Template, TemplateCase, TemplatePattern};
use templar_engine::Orchestrator;
use templar_oracle::mock::{MockGenerator, MockReply};
use templar_oracle::{FewShotSet, GenerationParams, Generator, Retrying};

fn engine_config(max_iterations: u32) -> EngineConfig {
    EngineConfig {
        max_repair_iterations: max_iterations,
        diagnosis_votes: 2,
        diagnosis_max_attempts: 2,
        worker_concurrency: 2,
        min_similarity: 1.0,
        corpus_sample_limit: 50,
        max_demo_retries: 2,
    }
}

fn orchestrator(oracle: Arc<dyn Generator>, config: EngineConfig) -> (Arc<Orchestrator>, watch::Sender<bool>) {
    let (tx, rx) = watch::channel(false);
    let orchestrator = Orchestrator::new(
        oracle,
        Arc::new(FewShotSet::default()),
        config,
        GenerationParams::default(),
        3,
        rx,
    );
    (Arc::new(orchestrator), tx)
}

fn template(id: &str, system: &str, pattern: &str) -> Template {
    Template::new(id, system, TemplatePattern::new(pattern).unwrap(), "a benchmark event")
}

fn events(outcome: &templar_engine::CaseOutcome) -> Vec<CaseEvent> {
    outcome.history.iter().map(|r| r.event).collect()
}

// ── Scenario A: sound template verifies untouched ───────────────────

#[tokio::test]
async fn sound_template_verifies_with_exact_reconstruction() {
    let mock = MockGenerator::new();
    mock.push_text("User alice logged in to the system.");
    mock.push_text("User alice logged in");

    let case = TemplateCase::new(
        template("E1", "Proxifier", "User <*> logged in"),
        vec![LogSample::new("1", "User alice logged in", Some("E1"))],
    );
    let (orchestrator, _tx) = orchestrator(Arc::new(mock), engine_config(3));
    let outcome = orchestrator.run_case(case).await;

    assert_eq!(outcome.final_state, CaseState::Verified);
    assert_eq!(outcome.accepted.len(), 1);
    assert_eq!(outcome.accepted[0].provenance, Provenance::Original);
    assert_eq!(outcome.verdicts[0].tier, Some(MatchTier::Exact));
    assert_eq!(outcome.verdicts[0].reconstruction, "User alice logged in");
    assert_eq!(events(&outcome), vec![CaseEvent::Intake, CaseEvent::VerifyPassed]);
}

/// Re-running verification on an already-sound template yields the same
/// byte-identical reconstruction under a deterministic oracle.
#[tokio::test]
async fn passing_verification_is_idempotent() {
    let mut reconstructions = Vec::new();
    for _ in 0..2 {
        let mock = MockGenerator::new();
        mock.push_text("User alice logged in to the system.");
        mock.push_text("User alice logged in");
        let case = TemplateCase::new(
            template("E1", "Proxifier", "User <*> logged in"),
            vec![LogSample::new("1", "User alice logged in", Some("E1"))],
        );
        let (orchestrator, _tx) = orchestrator(Arc::new(mock), engine_config(3));
        let outcome = orchestrator.run_case(case).await;
        assert_eq!(outcome.final_state, CaseState::Verified);
        reconstructions.push(outcome.verdicts[0].reconstruction.clone());
    }
    assert_eq!(reconstructions[0], reconstructions[1]);
}

// ── Scenario B: missing slot, repaired and resolved ─────────────────

#[tokio::test]
async fn missing_parameter_is_diagnosed_and_repaired() {
    let mock = MockGenerator::new();
    // Initial round-trip: the slotless template cannot reproduce "alice".
    mock.push_text("User alice logged in to the portal.");
    mock.push_text("User logged in");
    // Template repair proposal.
    mock.push_text(
        r#"```json
{"needs_repair": true, "new_template": "User <*> logged in", "explanation": "the user name needs a slot", "confidence": "high"}
```"#,
    );
    // Re-verification round-trip under the repaired template.
    mock.push_text("User alice logged in to the portal.");
    mock.push_text("User alice logged in");
    let calls = mock.calls();

    let case = TemplateCase::new(
        template("E1", "Proxifier", "User logged in"),
        vec![LogSample::new("1", "User alice logged in", Some("E1"))],
    );
    let (orchestrator, _tx) = orchestrator(Arc::new(mock), engine_config(3));
    let outcome = orchestrator.run_case(case).await;

    assert_eq!(outcome.final_state, CaseState::Resolved);
    assert_eq!(outcome.diagnoses[0].cause, Cause::MissingParameter);
    assert_eq!(outcome.diagnoses[0].operation, Some(RepairOp::RepairTemplate));
    assert_eq!(outcome.accepted.len(), 1);
    assert_eq!(outcome.accepted[0].pattern.as_str(), "User <*> logged in");
    assert_eq!(
        outcome.accepted[0].provenance,
        Provenance::Repaired { op: RepairOp::RepairTemplate, parent: "E1".into() }
    );
    assert!(outcome.attempts[0].accepted);
    assert_eq!(outcome.iterations, 0);
    assert_eq!(calls.count(), 5);
    assert_eq!(
        events(&outcome),
        vec![
            CaseEvent::Intake,
            CaseEvent::VerifyFailed,
            CaseEvent::BeginDiagnosis,
            CaseEvent::OperationSelected,
            CaseEvent::CandidatesReady,
            CaseEvent::ReVerifyPassed,
        ]
    );
}

// ── Scenario C: over-merged template split and resolved ─────────────

#[tokio::test]
async fn over_merged_template_is_split_per_latent_format() {
    let mock = MockGenerator::new();
    // Initial round-trips: all four samples fail against the merged pattern.
    mock.push_text("node1 started the apache service.");
    mock.push_text("node1 started|stopped service apache");
    mock.push_text("node2 stopped the mysqld service.");
    mock.push_text("node2 started|stopped service mysqld");
    mock.push_text("node3 started the sshd service.");
    mock.push_text("node3 started|stopped service sshd");
    mock.push_text("node4 stopped the crond service.");
    mock.push_text("node4 started|stopped service crond");
    // Split proposal, one template per latent format.
    mock.push_text(
        r#"```json
{"templates": [
  {"pattern": "<*> started service <*>", "lines": ["1", "3"]},
  {"pattern": "<*> stopped service <*>", "lines": ["2", "4"]}
]}
```"#,
    );
    // Re-verification, each candidate against its own subset.
    mock.push_text("node1 started the service apache.");
    mock.push_text("node1 started service apache");
    mock.push_text("node3 started the service sshd.");
    mock.push_text("node3 started service sshd");
    mock.push_text("node2 stopped the service mysqld.");
    mock.push_text("node2 stopped service mysqld");
    mock.push_text("node4 stopped the service crond.");
    mock.push_text("node4 stopped service crond");

    let samples = vec![
        LogSample::new("1", "node1 started service apache", Some("E9")),
        LogSample::new("2", "node2 stopped service mysqld", Some("E9")),
        LogSample::new("3", "node3 started service sshd", Some("E9")),
        LogSample::new("4", "node4 stopped service crond", Some("E9")),
    ];
    let case = TemplateCase::new(
        template("E9", "HPC", "<*> started|stopped service <*>"),
        samples,
    );
    let (orchestrator, _tx) = orchestrator(Arc::new(mock), engine_config(3));
    let outcome = orchestrator.run_case(case).await;

    assert_eq!(outcome.final_state, CaseState::Resolved);
    assert_eq!(outcome.diagnoses[0].cause, Cause::OverMerged);
    assert_eq!(outcome.diagnoses[0].operation, Some(RepairOp::SplitTemplate));
    assert_eq!(outcome.accepted.len(), 2);
    assert_eq!(outcome.accepted[0].pattern.as_str(), "<*> started service <*>");
    assert_eq!(outcome.accepted[1].pattern.as_str(), "<*> stopped service <*>");

    // Split completeness: every original line assigned to exactly one
    // candidate, and each candidate passed on its own subset.
    let attempt = &outcome.attempts[0];
    let mut assigned: Vec<&str> = attempt.assignments.values().flatten().map(String::as_str).collect();
    assigned.sort_unstable();
    assert_eq!(assigned, vec!["1", "2", "3", "4"]);
    assert!(attempt.accepted);
    assert!(attempt.verdicts.iter().all(|cv| cv.verdict.pass));
    assert_eq!(attempt.verdicts.len(), 4);
}

// ── Scenario D: persistent oracle failure surfaces, never passes ────

#[tokio::test(start_paused = true)]
async fn oracle_exhaustion_surfaces_as_inconclusive() {
    let mock = MockGenerator::new();
    // Extraction succeeds, then the reconstruction endpoint stays down.
    mock.push_text("User alice logged in to the portal.");
    mock.push(MockReply::Status(503));
    mock.push(MockReply::Status(503));
    mock.push(MockReply::Status(503));
    let calls = mock.calls();

    // Bounded retry inside the oracle stack: 1 + 2 retries.
    let oracle: Arc<dyn Generator> = Arc::new(Retrying::new(mock, 2));
    let case = TemplateCase::new(
        template("E1", "Proxifier", "User <*> logged in"),
        vec![LogSample::new("1", "User alice logged in", Some("E1"))],
    );
    let (orchestrator, _tx) = orchestrator(oracle, engine_config(0));
    let outcome = orchestrator.run_case(case).await;

    assert_eq!(outcome.final_state, CaseState::Exhausted);
    assert!(outcome.verdicts[0].inconclusive);
    assert!(!outcome.verdicts[0].pass);
    assert!(outcome.accepted.is_empty());
    assert_eq!(calls.count(), 4);
    assert!(events(&outcome).contains(&CaseEvent::VerifyInconclusive));
    assert_eq!(events(&outcome).last(), Some(&CaseEvent::BudgetExhausted));
}

// ── Iteration budget is a hard monotonic bound ──────────────────────

#[tokio::test]
async fn budget_overrun_always_exhausts() {
    let mock = MockGenerator::new();
    mock.push_text("User alice logged in to the portal.");
    mock.push_text("User logged in");
    mock.push_text(r#"{"needs_repair": true, "new_template": "User <*> logged in"}"#);
    // The repaired template still fails its round-trip: wrong value.
    mock.push_text("User alice logged in to the portal.");
    mock.push_text("User bob logged in");
    let calls = mock.calls();

    let case = TemplateCase::new(
        template("E1", "Proxifier", "User logged in"),
        vec![LogSample::new("1", "User alice logged in", Some("E1"))],
    );
    let (orchestrator, _tx) = orchestrator(Arc::new(mock), engine_config(1));
    let outcome = orchestrator.run_case(case).await;

    assert_eq!(outcome.final_state, CaseState::Exhausted);
    assert_eq!(outcome.iterations, 1);
    assert!(outcome.iterations <= 1);
    assert_eq!(calls.count(), 5);
    assert_eq!(events(&outcome).last(), Some(&CaseEvent::BudgetExhausted));
    // The failed attempt is retained for the manual reviewer.
    assert_eq!(outcome.attempts.len(), 1);
    assert!(!outcome.attempts[0].accepted);
    assert!(outcome.last_diagnosis.is_some());
}

// ── Unresolved routes to refinement once, hallucination to retry ────

#[tokio::test]
async fn unresolved_then_hallucination_walks_refine_and_retry() {
    let mock = MockGenerator::new();
    // Initial round-trip: literal drift the structural checks cannot pin.
    mock.push_text("Job A completed.");
    mock.push_text("job A failed");
    // Two agreeing diagnostic votes: unresolved.
    mock.push_text(r#"{"cause": "unresolved", "analysis": "no structural signal"}"#);
    mock.push_text(r#"{"cause": "unresolved", "analysis": "no structural signal"}"#);
    // Description refinement.
    mock.push_text("The job identified by A finished.");
    // Refined candidate still drifts...
    mock.push_text("Job A completed.");
    mock.push_text("job A failed");
    // ...which now reads as recurring invention: retry with demonstrations.
    mock.push_text("Job A completed.");
    mock.push_text("job A done");

    let case = TemplateCase::new(
        template("E5", "Spark", "job <*> done"),
        vec![LogSample::new("1", "job A done", Some("E5"))],
    );
    let (orchestrator, _tx) = orchestrator(Arc::new(mock), engine_config(3));
    let outcome = orchestrator.run_case(case).await;

    assert_eq!(outcome.final_state, CaseState::Resolved);
    let causes: Vec<Cause> = outcome.diagnoses.iter().map(|d| d.cause).collect();
    assert_eq!(causes, vec![Cause::Unresolved, Cause::HallucinationInduced]);
    let ops: Vec<RepairOp> = outcome.attempts.iter().map(|a| a.operation).collect();
    assert_eq!(ops, vec![RepairOp::RefineDescription, RepairOp::RetryWithDemonstrations]);
    assert_eq!(outcome.iterations, 1);
    // The retry candidate carries the same pattern; only provenance moved.
    assert_eq!(outcome.accepted[0].pattern.as_str(), "job <*> done");
}

// ── Repeated unresolved diagnosis exhausts the case ─────────────────

#[tokio::test]
async fn repeated_unresolved_diagnosis_exhausts() {
    let mock = MockGenerator::new();
    // Initial round-trip: a token swap no structural check can classify.
    mock.push_text("Sequence alpha beta ended with gamma.");
    mock.push_text("alpha gamma beta");
    // First diagnosis: unresolved, twice in agreement.
    mock.push_text(r#"{"cause": "unresolved", "analysis": "evidence is ambiguous"}"#);
    mock.push_text(r#"{"cause": "unresolved", "analysis": "evidence is ambiguous"}"#);
    // The refiner parrots the old description back: rejected candidate.
    mock.push_text("a benchmark event");
    // Second diagnosis: unresolved again.
    mock.push_text(r#"{"cause": "unresolved", "analysis": "still ambiguous"}"#);
    mock.push_text(r#"{"cause": "unresolved", "analysis": "still ambiguous"}"#);
    let calls = mock.calls();

    let case = TemplateCase::new(
        template("E7", "Thunderbird", "alpha beta <*>"),
        vec![LogSample::new("1", "alpha beta gamma", Some("E7"))],
    );
    let (orchestrator, _tx) = orchestrator(Arc::new(mock), engine_config(3));
    let outcome = orchestrator.run_case(case).await;

    assert_eq!(outcome.final_state, CaseState::Exhausted);
    let causes: Vec<Cause> = outcome.diagnoses.iter().map(|d| d.cause).collect();
    assert_eq!(causes, vec![Cause::Unresolved, Cause::Unresolved]);
    assert_eq!(outcome.diagnoses[1].operation, None);
    assert_eq!(events(&outcome).last(), Some(&CaseEvent::DiagnosisExhausted));
    // Exhausted cases carry the last diagnosis and full history for review.
    assert!(outcome.last_diagnosis.is_some());
    assert_eq!(calls.count(), 7);
}

// ── Cancellation: exhaust with a marker, corrupt nothing ────────────

#[tokio::test]
async fn cancellation_exhausts_with_marker() {
    let mock = MockGenerator::new();
    let calls = mock.calls();
    let case = TemplateCase::new(
        template("E1", "Proxifier", "User <*> logged in"),
        vec![LogSample::new("1", "User alice logged in", Some("E1"))],
    );
    let (orchestrator, tx) = orchestrator(Arc::new(mock), engine_config(3));
    tx.send(true).unwrap();

    let outcome = orchestrator.run_case(case).await;
    assert_eq!(outcome.final_state, CaseState::Exhausted);
    assert!(outcome.cancelled);
    assert_eq!(calls.count(), 0);
}

// ── Worker pool: independent cases, all archived ────────────────────

#[tokio::test]
async fn run_all_archives_every_case() {
    let mock = MockGenerator::new().with_default("User alice logged in");
    // Both cases share the scripted default: extraction echoes the line,
    // reconstruction matches it exactly.
    let oracle: Arc<dyn Generator> = Arc::new(mock);

    let cases: Vec<TemplateCase> = (0..3)
        .map(|i| {
            TemplateCase::new(
                template(&format!("E{i}"), "Proxifier", "User <*> logged in"),
                vec![LogSample::new("1", "User alice logged in", None)],
            )
        })
        .collect();
    let (orchestrator, _tx) = orchestrator(oracle, engine_config(3));
    let outcomes = orchestrator.run_all(cases).await;

    assert_eq!(outcomes.len(), 3);
    assert!(outcomes.iter().all(|o| o.final_state == CaseState::Verified));
    assert_eq!(orchestrator.archived().len(), 3);
}
