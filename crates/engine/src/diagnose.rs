//! Diagnosis of failing verdicts: ordered structural checks first, oracle
//! classification with cross-call consistency only when structure alone
//! cannot decide.

use std::collections::BTreeSet;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{debug, info, warn};

use templar_core::diagnosis::{route, Cause, Confidence, Diagnosis};
use templar_core::verdict::DivergenceKind;
use templar_core::{LogSample, Template, TemplateCase, Verdict};
use templar_oracle::{GenerationParams, Generator};

use crate::prompt;

/// Distinct literal values at one position before a split stops looking like
/// an over-merge and starts looking like an ordinary parameter.
const MAX_MERGED_VARIANTS: usize = 5;

pub struct DiagnosticAgent {
    oracle: Arc<dyn Generator>,
    params: GenerationParams,
    /// Independent calls that must agree before committing a cause.
    votes: u32,
    /// Total samples before giving up as `unresolved`.
    max_attempts: u32,
}

impl DiagnosticAgent {
    pub fn new(oracle: Arc<dyn Generator>, params: GenerationParams, votes: u32, max_attempts: u32) -> Self {
        Self {
            oracle,
            params,
            votes: votes.max(1),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Classify the anomaly behind a set of failing round-trips and select
    /// the next operation. Never errors: an unusable oracle degrades to
    /// `unresolved`, which is itself a routable outcome.
    pub async fn diagnose(
        &self,
        case: &TemplateCase,
        active: &Template,
        failures: &[(LogSample, Verdict)],
    ) -> Diagnosis {
        let prior_unresolved = case.prior_unresolved();

        if let Some((cause, rationale)) = structural_cause(active, case, failures) {
            debug!(case = %case.id, cause = %cause, "structural diagnosis");
            return Diagnosis {
                cause,
                confidence: Confidence::High,
                rationale,
                operation: route(cause, prior_unresolved),
            };
        }

        let (cause, confidence, rationale) = self.vote(case, active, failures).await;
        Diagnosis {
            cause,
            confidence,
            rationale,
            operation: route(cause, prior_unresolved),
        }
    }

    /// Majority-of-N sampling over independent oracle calls. Commits once a
    /// cause collects `votes` agreeing answers; runs out of attempts as
    /// `unresolved`.
    async fn vote(
        &self,
        case: &TemplateCase,
        active: &Template,
        failures: &[(LogSample, Verdict)],
    ) -> (Cause, Confidence, String) {
        let history = prompt::history_digest(case);
        let messages = prompt::diagnosis(active, failures, &history);

        let mut tally: IndexMap<Cause, u32> = IndexMap::new();
        let mut rationale = String::new();

        for attempt in 0..self.max_attempts {
            let reply = match self.oracle.generate(&messages, &self.params).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(case = %case.id, attempt, error = %e, "diagnostic call failed");
                    continue;
                }
            };

            let Some(json) = prompt::parse_json_reply(&reply) else {
                warn!(case = %case.id, attempt, "unparseable diagnostic reply");
                continue;
            };
            let Some(cause) = json["cause"].as_str().and_then(Cause::parse_loose) else {
                warn!(case = %case.id, attempt, "diagnostic reply without a valid cause");
                continue;
            };

            if rationale.is_empty() {
                if let Some(analysis) = json["analysis"].as_str() {
                    rationale = analysis.to_string();
                }
            }

            let count = tally.entry(cause).or_insert(0);
            *count += 1;
            let votes = *count;
            debug!(case = %case.id, cause = %cause, votes, "diagnostic vote");

            if votes >= self.votes {
                let total: u32 = tally.values().sum();
                let confidence = if total == votes {
                    json["confidence"]
                        .as_str()
                        .and_then(Confidence::parse_loose)
                        .unwrap_or(Confidence::Medium)
                } else {
                    // Agreement only after disagreement.
                    Confidence::Low
                };
                info!(case = %case.id, cause = %cause, total, "diagnosis committed by vote");
                return (cause, confidence, rationale);
            }
        }

        info!(case = %case.id, "diagnostic sampling did not converge");
        (
            Cause::Unresolved,
            Confidence::Low,
            if rationale.is_empty() {
                "diagnostic sampling did not converge on a cause".to_string()
            } else {
                rationale
            },
        )
    }
}

/// Ordered first-match classification from trace evidence alone. Returns
/// `None` when the structure is ambiguous and the oracle must weigh in.
pub fn structural_cause(
    active: &Template,
    case: &TemplateCase,
    failures: &[(LogSample, Verdict)],
) -> Option<(Cause, String)> {
    let traced: Vec<_> = failures
        .iter()
        .filter_map(|(s, v)| v.trace.as_ref().map(|t| (s, t)))
        .collect();

    // 1. A value in the original with no slot to carry it: fixed literal
    //    (identical across several samples) vs. variable value.
    let dropped: Vec<&str> = traced
        .iter()
        .filter(|(_, t)| t.kind == DivergenceKind::MissingSlot)
        .filter_map(|(_, t)| t.expected.as_deref())
        .collect();
    if !dropped.is_empty() {
        let distinct: BTreeSet<&str> = dropped.iter().copied().collect();
        if distinct.len() == 1 && dropped.len() >= 2 {
            let token = dropped[0];
            return Some((
                Cause::MissingStructure,
                format!("every failing line carries the fixed text `{token}` that the template omits"),
            ));
        }
        return Some((
            Cause::MissingParameter,
            format!("the original lines carry values {distinct:?} with no slot in the template"),
        ));
    }

    // 2. Over-merge: several samples diverge at the same position, the
    //    reconstruction is stuck on one rendering while the originals show a
    //    small closed set of distinct literals.
    if traced.len() >= 2 {
        let mut by_index: IndexMap<usize, Vec<(&str, &str)>> = IndexMap::new();
        for (_, t) in &traced {
            if t.kind == DivergenceKind::LiteralMismatch {
                if let (Some(e), Some(f)) = (t.expected.as_deref(), t.found.as_deref()) {
                    by_index.entry(t.token_index).or_default().push((e, f));
                }
            }
        }
        for (index, pairs) in &by_index {
            if pairs.len() < 2 {
                continue;
            }
            let expected: BTreeSet<&str> = pairs.iter().map(|(e, _)| *e).collect();
            let found: BTreeSet<&str> = pairs.iter().map(|(_, f)| *f).collect();
            let literal_looking = expected
                .iter()
                .all(|e| !e.chars().all(|c| c.is_ascii_digit()));
            if found.len() == 1
                && (2..=MAX_MERGED_VARIANTS).contains(&expected.len())
                && literal_looking
            {
                return Some((
                    Cause::OverMerged,
                    format!(
                        "token {index} takes the distinct literals {expected:?} across samples \
                         while one template position must render them all"
                    ),
                ));
            }
        }
    }

    // 3. A pattern with no literal anchor resolves against nothing.
    if active.pattern.is_degenerate() {
        return Some((
            Cause::SyntaxError,
            format!("pattern `{}` has no fixed text to anchor a match", active.pattern),
        ));
    }

    // 4. Pure invention, recurring across repair rounds.
    if case.iterations >= 1 && !traced.is_empty() {
        let literals = active.pattern.literal_text();
        let all_invented = traced.iter().all(|(sample, t)| {
            t.kind == DivergenceKind::ExtraSlot
                || t.found
                    .as_deref()
                    .is_some_and(|f| !sample.raw.contains(f) && !literals.contains(f))
        });
        if all_invented {
            return Some((
                Cause::HallucinationInduced,
                "reconstructions keep inventing content not explainable by the template, \
                 across repeated rounds"
                    .to_string(),
            ));
        }
    }

    None
}
