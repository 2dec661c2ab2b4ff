//! The FSM orchestrator: owns every `TemplateCase`, sequences extraction,
//! verification, diagnosis, and repair, enforces the iteration budget, and
//! archives terminal cases. All other components are pure transforms over
//! the oracle; this is the only place case state is mutated.

use std::sync::{Arc, Mutex};

use futures::stream::{self, StreamExt};
use indexmap::IndexMap;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use templar_core::config::{Config, EngineConfig};
use templar_core::diagnosis::RepairOp;
use templar_core::{
    CaseEvent, CandidateVerdict, LogSample, RepairAttempt, Template, TemplateCase, Verdict,
};
use templar_oracle::{FewShotSet, GenerationParams, Generator};

use crate::diagnose::DiagnosticAgent;
use crate::error::EngineError;
use crate::export::CaseOutcome;
use crate::extract::SemanticExtractor;
use crate::prompt;
use crate::repair::{
    self, DescriptionRefiner, GeneratorRetry, SplitOutcome, TemplateRepair, TemplateSplit,
};
use crate::verify::ReconstructionVerifier;

pub struct Orchestrator {
    extractor: SemanticExtractor,
    verifier: ReconstructionVerifier,
    diagnostics: DiagnosticAgent,
    template_repair: TemplateRepair,
    template_split: TemplateSplit,
    refiner: DescriptionRefiner,
    generator_retry: GeneratorRetry,
    config: EngineConfig,
    /// Archived cases, terminal states only. Never deleted.
    store: Mutex<IndexMap<Uuid, TemplateCase>>,
    shutdown: watch::Receiver<bool>,
}

impl Orchestrator {
    pub fn new(
        oracle: Arc<dyn Generator>,
        fewshot: Arc<FewShotSet>,
        config: EngineConfig,
        params: GenerationParams,
        borrow_limit: usize,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            extractor: SemanticExtractor::new(
                Arc::clone(&oracle),
                params,
                Arc::clone(&fewshot),
                borrow_limit,
            ),
            verifier: ReconstructionVerifier::new(
                Arc::clone(&oracle),
                params,
                Arc::clone(&fewshot),
                borrow_limit,
                config.min_similarity,
            ),
            diagnostics: DiagnosticAgent::new(
                Arc::clone(&oracle),
                params,
                config.diagnosis_votes,
                config.diagnosis_max_attempts,
            ),
            template_repair: TemplateRepair::new(Arc::clone(&oracle), params),
            template_split: TemplateSplit::new(Arc::clone(&oracle), params),
            refiner: DescriptionRefiner::new(Arc::clone(&oracle), params),
            generator_retry: GeneratorRetry::new(config.max_demo_retries),
            config,
            store: Mutex::new(IndexMap::new()),
            shutdown,
        }
    }

    /// Wire up from the process-wide config (driver entry point).
    pub fn from_config(
        oracle: Arc<dyn Generator>,
        fewshot: Arc<FewShotSet>,
        config: &Config,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let params = GenerationParams {
            temperature: config.oracle.temperature,
            max_tokens: config.oracle.max_tokens,
        };
        Self::new(
            oracle,
            fewshot,
            config.engine.clone(),
            params,
            config.fewshot.borrow_limit,
            shutdown,
        )
    }

    fn is_cancelled(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Run independent cases under bounded parallelism. Within one case the
    /// steps stay strictly sequential; across cases no ordering is promised.
    pub async fn run_all(self: &Arc<Self>, cases: Vec<TemplateCase>) -> Vec<CaseOutcome> {
        let concurrency = self.config.worker_concurrency.max(1);
        stream::iter(cases.into_iter().map(|case| {
            let this = Arc::clone(self);
            async move { this.run_case(case).await }
        }))
        .buffer_unordered(concurrency)
        .collect()
        .await
    }

    /// Drive one case from intake to a terminal state.
    pub async fn run_case(&self, mut case: TemplateCase) -> CaseOutcome {
        info!(case = %case.id, template = %case.template.id, "case intake");
        step(&mut case, CaseEvent::Intake);

        if self.is_cancelled() {
            step(&mut case, CaseEvent::Cancelled);
            return self.archive(case);
        }

        // Initial verification: every sample makes the round-trip against
        // the original template.
        let mut active = case.template.clone();
        let mut failures: Vec<(LogSample, Verdict)> = Vec::new();
        let mut passing: Vec<LogSample> = Vec::new();
        for sample in case.samples.clone() {
            let verdict = self.roundtrip(&active, &sample, false).await;
            case.verdicts.push(verdict.clone());
            if verdict.pass {
                passing.push(sample);
            } else {
                failures.push((sample, verdict));
            }
        }

        if failures.is_empty() {
            case.accepted = vec![case.template.clone()];
            step(&mut case, CaseEvent::VerifyPassed);
            info!(case = %case.id, "template verified structurally sound");
            return self.archive(case);
        }

        let inconclusive_only = failures.iter().all(|(_, v)| v.inconclusive);
        step(
            &mut case,
            if inconclusive_only { CaseEvent::VerifyInconclusive } else { CaseEvent::VerifyFailed },
        );
        info!(
            case = %case.id,
            failing = failures.len(),
            passing = passing.len(),
            inconclusive_only,
            "template flagged"
        );
        step(&mut case, CaseEvent::BeginDiagnosis);

        // Diagnosing → Repairing → ReVerifying, looped under the budget.
        loop {
            if self.is_cancelled() {
                step(&mut case, CaseEvent::Cancelled);
                break;
            }
            if case.iterations >= self.config.max_repair_iterations {
                warn!(case = %case.id, iterations = case.iterations, "iteration budget spent");
                step(&mut case, CaseEvent::BudgetExhausted);
                break;
            }

            let diagnosis = self.diagnostics.diagnose(&case, &active, &failures).await;
            info!(
                case = %case.id,
                cause = %diagnosis.cause,
                operation = ?diagnosis.operation,
                "diagnosis committed"
            );
            let operation = diagnosis.operation;
            case.diagnoses.push(diagnosis);
            let Some(op) = operation else {
                step(&mut case, CaseEvent::DiagnosisExhausted);
                break;
            };
            step(&mut case, CaseEvent::OperationSelected);

            if self.is_cancelled() {
                step(&mut case, CaseEvent::Cancelled);
                break;
            }
            let seq: usize = case.attempts.iter().map(|a| a.candidates.len()).sum();
            let (candidates, assignments) =
                self.run_operation(op, &case, &active, &failures, &passing, seq).await;

            if candidates.is_empty() {
                warn!(case = %case.id, op = %op, "repair produced no usable candidate");
                case.iterations += 1;
                if case.iterations >= self.config.max_repair_iterations {
                    step(&mut case, CaseEvent::BudgetExhausted);
                    break;
                }
                step(&mut case, CaseEvent::RepairRejected);
                continue;
            }
            step(&mut case, CaseEvent::CandidatesReady);

            // Re-verification: each candidate independently, against exactly
            // the samples it is scoped to.
            let enriched = op == RepairOp::RetryWithDemonstrations;
            let mut attempt = RepairAttempt {
                operation: op,
                candidates: candidates.clone(),
                assignments: assignments.clone(),
                verdicts: Vec::new(),
                accepted: false,
                at: chrono::Utc::now(),
            };
            let mut next_failures: Vec<(LogSample, Verdict)> = Vec::new();
            for candidate in &candidates {
                let assigned = assignments.get(&candidate.id);
                for sample in case
                    .samples
                    .clone()
                    .into_iter()
                    .filter(|s| assigned.map_or(true, |ids| ids.contains(&s.line_id)))
                {
                    let verdict = self.roundtrip(candidate, &sample, enriched).await;
                    attempt.verdicts.push(CandidateVerdict {
                        template_id: candidate.id.clone(),
                        line_id: sample.line_id.clone(),
                        verdict: verdict.clone(),
                    });
                    if !verdict.pass {
                        next_failures.push((sample, verdict));
                    }
                }
            }

            attempt.accepted = next_failures.is_empty();
            let accepted = attempt.accepted;
            case.attempts.push(attempt);

            if accepted {
                case.accepted = candidates;
                step(&mut case, CaseEvent::ReVerifyPassed);
                info!(case = %case.id, "repair accepted; case resolved");
                break;
            }

            case.iterations += 1;
            if case.iterations >= self.config.max_repair_iterations {
                warn!(case = %case.id, iterations = case.iterations, "iteration budget spent");
                step(&mut case, CaseEvent::BudgetExhausted);
                break;
            }
            step(&mut case, CaseEvent::ReVerifyFailed);

            // Loop with updated history: a lone candidate becomes the active
            // template for the next diagnosis round.
            if candidates.len() == 1 {
                if let Some(single) = candidates.into_iter().next() {
                    active = single;
                }
            }
            failures = next_failures;
        }

        self.archive(case)
    }

    /// Dispatch the selected repair operation.
    async fn run_operation(
        &self,
        op: RepairOp,
        case: &TemplateCase,
        active: &Template,
        failures: &[(LogSample, Verdict)],
        passing: &[LogSample],
        seq: usize,
    ) -> (Vec<Template>, IndexMap<String, Vec<String>>) {
        let history = prompt::history_digest(case);
        let all_lines = |candidates: &[Template]| -> IndexMap<String, Vec<String>> {
            let ids: Vec<String> = case.samples.iter().map(|s| s.line_id.clone()).collect();
            candidates.iter().map(|c| (c.id.clone(), ids.clone())).collect()
        };

        match op {
            RepairOp::RepairTemplate => {
                let corpus = repair::sample_corpus(&case.samples, self.config.corpus_sample_limit);
                match self
                    .template_repair
                    .propose(active, case.diagnoses.last(), failures, passing, &corpus, &history, seq)
                    .await
                {
                    Ok(candidates) => {
                        let assignments = all_lines(&candidates);
                        (candidates, assignments)
                    }
                    Err(e) => {
                        warn!(case = %case.id, error = %e, "template repair failed");
                        (Vec::new(), IndexMap::new())
                    }
                }
            }
            RepairOp::SplitTemplate => {
                match self.template_split.propose(active, &case.samples, &history, seq).await {
                    Ok(Some(SplitOutcome { candidates, assignments })) => (candidates, assignments),
                    Ok(None) => (Vec::new(), IndexMap::new()),
                    Err(e) => {
                        warn!(case = %case.id, error = %e, "template split failed");
                        (Vec::new(), IndexMap::new())
                    }
                }
            }
            RepairOp::RefineDescription => {
                match self.refiner.propose(active, &case.samples, &history, seq).await {
                    Ok(candidates) => {
                        let assignments = all_lines(&candidates);
                        (candidates, assignments)
                    }
                    Err(e) => {
                        warn!(case = %case.id, error = %e, "description refinement failed");
                        (Vec::new(), IndexMap::new())
                    }
                }
            }
            RepairOp::RetryWithDemonstrations => {
                let candidates = self.generator_retry.propose(case, active, seq);
                let assignments = all_lines(&candidates);
                (candidates, assignments)
            }
        }
    }

    /// One extraction + reconstruction round. Content-level failures become
    /// data (an inconclusive verdict), never bubbled errors: they drive FSM
    /// transitions, not caller-visible exceptions.
    async fn roundtrip(&self, template: &Template, sample: &LogSample, enriched: bool) -> Verdict {
        let system = template.system.clone();
        let description = match self
            .extractor
            .extract(&system, sample, Some(template), enriched)
            .await
        {
            Ok(d) => d,
            Err(e @ EngineError::Extraction { .. }) => {
                warn!(line = %sample.line_id, error = %e, "extraction inconclusive");
                return Verdict::inconclusive(&e.to_string());
            }
            Err(e) => {
                warn!(line = %sample.line_id, error = %e, "extraction oracle unavailable");
                return Verdict::inconclusive(&e.to_string());
            }
        };

        match self
            .verifier
            .verify(&system, &description, template, &sample.raw, enriched)
            .await
        {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(line = %sample.line_id, error = %e, "reconstruction oracle unavailable");
                Verdict::inconclusive(&e.to_string())
            }
        }
    }

    /// Archive a terminal case. The store keeps full history; outcomes are
    /// the exported view of it.
    fn archive(&self, case: TemplateCase) -> CaseOutcome {
        let outcome = CaseOutcome::from(&case);
        info!(case = %case.id, state = ?case.state, "case archived");
        let mut store = self.store.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        store.insert(case.id, case);
        outcome
    }

    /// Outcomes of every archived case, in intake order.
    pub fn archived(&self) -> Vec<CaseOutcome> {
        let store = self.store.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        store.values().map(CaseOutcome::from).collect()
    }
}

/// Apply an FSM event. A rejected transition here is an orchestrator bug;
/// it is logged and the case is left as-is rather than panicking mid-run.
fn step(case: &mut TemplateCase, event: CaseEvent) {
    if let Err(e) = case.apply(event) {
        error!(case = %case.id, error = %e, "illegal FSM transition");
    }
}
