//! Template split: partition a template's lines into latent sub-formats and
//! emit one re-scoped candidate per cluster.

use std::collections::BTreeSet;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{info, warn};

use templar_core::diagnosis::RepairOp;
use templar_core::{LogSample, Template, TemplatePattern};
use templar_oracle::{GenerationParams, Generator};

use crate::error::EngineError;
use crate::prompt;

/// Clusters beyond this count stop looking like latent sub-types.
const MAX_GROUPS: usize = 4;

#[derive(Debug, Clone)]
pub struct SplitOutcome {
    pub candidates: Vec<Template>,
    /// Candidate template id → line ids it is scoped to. Every source line
    /// lands in exactly one candidate.
    pub assignments: IndexMap<String, Vec<String>>,
}

pub struct TemplateSplit {
    oracle: Arc<dyn Generator>,
    params: GenerationParams,
}

impl TemplateSplit {
    pub fn new(oracle: Arc<dyn Generator>, params: GenerationParams) -> Self {
        Self { oracle, params }
    }

    /// Partition the template's samples and propose one candidate per
    /// cluster. Returns `None` when no credible partition exists.
    pub async fn propose(
        &self,
        active: &Template,
        samples: &[LogSample],
        history: &str,
        seq: usize,
    ) -> Result<Option<SplitOutcome>, EngineError> {
        let clusters = discriminating_clusters(samples)
            .or_else(|| length_gap_clusters(samples, active.pattern.fixed_len()));
        let Some(clusters) = clusters else {
            info!(template = %active.id, "no latent sub-format found; split rejected");
            return Ok(None);
        };

        let groups: Vec<Vec<&LogSample>> = clusters
            .iter()
            .map(|idxs| idxs.iter().map(|&i| &samples[i]).collect())
            .collect();

        // Ask the oracle for per-group patterns; fall back to induced ones.
        let messages = prompt::split(active, &groups, history);
        match self.oracle.generate(&messages, &self.params).await {
            Ok(reply) => {
                if let Some(outcome) = self.from_reply(&reply, active, samples, seq) {
                    return Ok(Some(outcome));
                }
                warn!(template = %active.id, "unusable split reply; falling back to induced patterns");
            }
            Err(e) => {
                warn!(template = %active.id, error = %e, "split oracle call failed; falling back");
            }
        }

        Ok(self.from_clusters(active, &groups, seq))
    }

    /// Validate an oracle proposal: ≥2 parseable patterns, each matching all
    /// of its lines, and every sample assigned exactly once.
    fn from_reply(
        &self,
        reply: &str,
        active: &Template,
        samples: &[LogSample],
        seq: usize,
    ) -> Option<SplitOutcome> {
        let json = prompt::parse_json_reply(reply)?;
        let proposals = json["templates"].as_array()?;
        if proposals.len() < 2 {
            return None;
        }

        let mut candidates = Vec::new();
        let mut assignments = IndexMap::new();
        let mut assigned: BTreeSet<&str> = BTreeSet::new();

        for (i, proposal) in proposals.iter().enumerate() {
            let pattern = TemplatePattern::new(proposal["pattern"].as_str()?).ok()?;
            let line_ids: Vec<String> = proposal["lines"]
                .as_array()?
                .iter()
                .map(|v| match v.as_str() {
                    Some(s) => s.to_string(),
                    None => v.to_string(),
                })
                .collect();
            if line_ids.is_empty() {
                return None;
            }
            for id in &line_ids {
                let sample = samples.iter().find(|s| &s.line_id == id)?;
                if pattern.matches(&sample.raw).is_none() || !assigned.insert(sample.line_id.as_str()) {
                    return None;
                }
            }
            let candidate = active.derive(
                pattern,
                &active.description,
                RepairOp::SplitTemplate,
                seq + i,
            );
            assignments.insert(candidate.id.clone(), line_ids);
            candidates.push(candidate);
        }

        if assigned.len() != samples.len() {
            return None;
        }
        info!(template = %active.id, candidates = candidates.len(), "split proposal validated");
        Some(SplitOutcome { candidates, assignments })
    }

    /// Deterministic fallback: induce one pattern per cluster from its lines.
    fn from_clusters(
        &self,
        active: &Template,
        groups: &[Vec<&LogSample>],
        seq: usize,
    ) -> Option<SplitOutcome> {
        let mut candidates = Vec::new();
        let mut assignments = IndexMap::new();

        for (i, group) in groups.iter().enumerate() {
            let raws: Vec<&str> = group.iter().map(|s| s.raw.as_str()).collect();
            let pattern = TemplatePattern::new(&induce_pattern(&raws)).ok()?;
            if group.iter().any(|s| pattern.matches(&s.raw).is_none()) {
                warn!(template = %active.id, group = i, "induced pattern misses its own group");
                return None;
            }
            let candidate = active.derive(
                pattern,
                &active.description,
                RepairOp::SplitTemplate,
                seq + i,
            );
            assignments.insert(
                candidate.id.clone(),
                group.iter().map(|s| s.line_id.clone()).collect(),
            );
            candidates.push(candidate);
        }

        info!(template = %active.id, candidates = candidates.len(), "split induced from clusters");
        Some(SplitOutcome { candidates, assignments })
    }
}

/// Look for one token position where the lines take a small closed set of
/// distinct literal values — hidden sub-types surfacing as slot values.
pub(crate) fn discriminating_clusters(samples: &[LogSample]) -> Option<Vec<Vec<usize>>> {
    if samples.len() < 2 {
        return None;
    }
    let tokenized: Vec<Vec<&str>> = samples
        .iter()
        .map(|s| s.raw.split_whitespace().collect())
        .collect();
    let min_len = tokenized.iter().map(Vec::len).min()?;

    let mut best: Option<(usize, usize)> = None; // (distinct count, position)
    for p in 0..min_len {
        let values: BTreeSet<&str> = tokenized.iter().map(|t| t[p]).collect();
        let literal_looking = values.iter().all(|v| !v.chars().all(|c| c.is_ascii_digit()));
        if (2..=MAX_GROUPS).contains(&values.len())
            && values.len() < samples.len()
            && literal_looking
            && best.map_or(true, |(n, _)| values.len() < n)
        {
            best = Some((values.len(), p));
        }
    }
    let (_, p) = best?;

    let mut groups: IndexMap<&str, Vec<usize>> = IndexMap::new();
    for (i, tokens) in tokenized.iter().enumerate() {
        groups.entry(tokens[p]).or_default().push(i);
    }
    Some(groups.into_values().collect())
}

/// Fallback grouping by parameter length: raw length minus the pattern's
/// fixed text, split at the widest gap between observed lengths.
pub(crate) fn length_gap_clusters(samples: &[LogSample], fixed_len: usize) -> Option<Vec<Vec<usize>>> {
    if samples.len() < 2 {
        return None;
    }
    let lengths: Vec<usize> = samples
        .iter()
        .map(|s| s.raw.len().saturating_sub(fixed_len))
        .collect();

    let distinct: BTreeSet<usize> = lengths.iter().copied().collect();
    if distinct.len() < 2 {
        return None;
    }
    let sorted: Vec<usize> = distinct.into_iter().collect();
    let (mut gap, mut threshold) = (0usize, 0usize);
    for pair in sorted.windows(2) {
        if pair[1] - pair[0] > gap {
            gap = pair[1] - pair[0];
            threshold = (pair[0] + pair[1]) / 2;
        }
    }
    if gap < 2 {
        // Adjacent lengths are ordinary parameter jitter, not sub-types.
        return None;
    }

    let short: Vec<usize> = (0..samples.len()).filter(|&i| lengths[i] <= threshold).collect();
    let long: Vec<usize> = (0..samples.len()).filter(|&i| lengths[i] > threshold).collect();
    if short.is_empty() || long.is_empty() {
        return None;
    }
    Some(vec![short, long])
}

/// Tokenwise generalization over a group: positions identical everywhere stay
/// literal, varying positions become slots. Uneven lengths collapse the
/// middle into a single slot between the common prefix and suffix.
pub(crate) fn induce_pattern(raws: &[&str]) -> String {
    let tokenized: Vec<Vec<&str>> = raws.iter().map(|r| r.split_whitespace().collect()).collect();
    if tokenized.is_empty() {
        return String::new();
    }
    let first = &tokenized[0];
    if tokenized.iter().all(|t| t.len() == first.len()) {
        let out: Vec<&str> = (0..first.len())
            .map(|p| {
                if tokenized.iter().all(|t| t[p] == first[p]) {
                    first[p]
                } else {
                    "<*>"
                }
            })
            .collect();
        return out.join(" ");
    }

    let min_len = tokenized.iter().map(Vec::len).min().unwrap_or(0);
    let mut prefix = 0;
    while prefix < min_len && tokenized.iter().all(|t| t[prefix] == first[prefix]) {
        prefix += 1;
    }
    let mut suffix = 0;
    while suffix < min_len - prefix
        && tokenized
            .iter()
            .all(|t| t[t.len() - 1 - suffix] == first[first.len() - 1 - suffix])
    {
        suffix += 1;
    }

    let mut out: Vec<&str> = first[..prefix].to_vec();
    out.push("<*>");
    out.extend_from_slice(&first[first.len() - suffix..]);
    out.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use templar_oracle::mock::MockGenerator;

    fn samples() -> Vec<LogSample> {
        vec![
            LogSample::new("1", "node1 started service apache", Some("E9")),
            LogSample::new("2", "node2 stopped service mysqld", Some("E9")),
            LogSample::new("3", "node3 started service sshd", Some("E9")),
        ]
    }

    fn active() -> Template {
        Template::new(
            "E9",
            "HPC",
            TemplatePattern::new("<*> started|stopped service <*>").unwrap(),
            "a service state change",
        )
    }

    #[test]
    fn finds_the_discriminating_token() {
        let clusters = discriminating_clusters(&samples()).unwrap();
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0], vec![0, 2]); // started
        assert_eq!(clusters[1], vec![1]); // stopped
    }

    #[test]
    fn all_distinct_positions_do_not_discriminate() {
        let samples = vec![
            LogSample::new("1", "alpha done", None),
            LogSample::new("2", "beta done", None),
        ];
        // Position 0 has as many values as samples; nothing latent there.
        assert!(discriminating_clusters(&samples).is_none());
    }

    #[test]
    fn length_gap_splits_two_populations() {
        let samples = vec![
            LogSample::new("1", "rx 1", None),
            LogSample::new("2", "rx 12", None),
            LogSample::new("3", "rx 0123456789abcdef0123456789abcdef", None),
        ];
        let clusters = length_gap_clusters(&samples, "rx ".len()).unwrap();
        assert_eq!(clusters, vec![vec![0, 1], vec![2]]);
    }

    #[test]
    fn induces_patterns_per_group() {
        assert_eq!(
            induce_pattern(&["node1 started service apache", "node3 started service sshd"]),
            "<*> started service <*>"
        );
        assert_eq!(
            induce_pattern(&["rx timeout", "rx error code 7 timeout"]),
            "rx <*> timeout"
        );
    }

    #[tokio::test]
    async fn oracle_proposal_is_validated_and_scoped() {
        let mock = MockGenerator::new();
        mock.push_text(
            r#"```json
{"templates": [
  {"pattern": "<*> started service <*>", "lines": ["1", "3"]},
  {"pattern": "<*> stopped service <*>", "lines": ["2"]}
]}
```"#,
        );
        let split = TemplateSplit::new(Arc::new(mock), GenerationParams::default());
        let outcome = split.propose(&active(), &samples(), "", 0).await.unwrap().unwrap();
        assert_eq!(outcome.candidates.len(), 2);
        assert_eq!(outcome.candidates[0].pattern.as_str(), "<*> started service <*>");
        assert_eq!(outcome.assignments[&outcome.candidates[0].id], vec!["1", "3"]);
        assert_eq!(outcome.assignments[&outcome.candidates[1].id], vec!["2"]);
    }

    #[tokio::test]
    async fn bad_reply_falls_back_to_induced_patterns() {
        let mock = MockGenerator::new();
        mock.push_text("no structure at all");
        let split = TemplateSplit::new(Arc::new(mock), GenerationParams::default());
        let outcome = split.propose(&active(), &samples(), "", 0).await.unwrap().unwrap();
        assert_eq!(outcome.candidates.len(), 2);
        assert_eq!(outcome.candidates[0].pattern.as_str(), "<*> started service <*>");
        assert_eq!(outcome.candidates[1].pattern.as_str(), "node2 stopped service mysqld");

        // Split completeness: every line lands in exactly one candidate.
        let mut all: Vec<&str> = outcome
            .assignments
            .values()
            .flatten()
            .map(String::as_str)
            .collect();
        all.sort_unstable();
        assert_eq!(all, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn uniform_samples_reject_the_split() {
        let uniform = vec![
            LogSample::new("1", "rx ok", None),
            LogSample::new("2", "rx ok", None),
        ];
        let mock = MockGenerator::new();
        let split = TemplateSplit::new(Arc::new(mock), GenerationParams::default());
        assert!(split.propose(&active(), &uniform, "", 0).await.unwrap().is_none());
    }
}
