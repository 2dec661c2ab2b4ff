//! Semantic extraction: strip template structure from a raw line, keeping
//! every parameter value byte-for-byte.

use std::sync::Arc;

use tracing::{debug, warn};

use templar_core::{LogSample, SemanticDescription, Template};
use templar_oracle::{FewShotSet, GenerationParams, Generator};

use crate::error::EngineError;
use crate::prompt;

pub struct SemanticExtractor {
    oracle: Arc<dyn Generator>,
    params: GenerationParams,
    fewshot: Arc<FewShotSet>,
    borrow_limit: usize,
}

impl SemanticExtractor {
    pub fn new(
        oracle: Arc<dyn Generator>,
        params: GenerationParams,
        fewshot: Arc<FewShotSet>,
        borrow_limit: usize,
    ) -> Self {
        Self { oracle, params, fewshot, borrow_limit }
    }

    /// Produce a structure-free description of `sample`.
    ///
    /// Fails with `ExtractionFailure` when the oracle loses a required
    /// parameter value or invents one absent from the line. Callers treat
    /// that as an inconclusive verification, not a retryable fault.
    pub async fn extract(
        &self,
        system: &str,
        sample: &LogSample,
        template: Option<&Template>,
        enriched: bool,
    ) -> Result<SemanticDescription, EngineError> {
        let demos = if enriched {
            self.fewshot.enriched_for_system(system, self.borrow_limit)
        } else {
            self.fewshot.for_system(system, self.borrow_limit)
        };

        let messages = prompt::extraction(system, &sample.raw, template, &demos);
        let reply = self.oracle.generate(&messages, &self.params).await?;
        let text = prompt::strip_reply(&reply);

        let values = if sample.params.is_empty() {
            template
                .and_then(|t| t.pattern.matches(&sample.raw))
                .unwrap_or_default()
        } else {
            sample.params.clone()
        };

        let description = SemanticDescription::new(&text, values.clone());
        let missing = description.missing_values(&values);
        let fabricated = fabricated_values(&text, &sample.raw, template);

        if !missing.is_empty() || !fabricated.is_empty() {
            warn!(
                line = %sample.line_id,
                ?missing,
                ?fabricated,
                "extraction lost or invented parameter values"
            );
            return Err(EngineError::Extraction {
                line_id: sample.line_id.clone(),
                missing,
                fabricated,
            });
        }

        debug!(line = %sample.line_id, params = values.len(), "extraction complete");
        Ok(description)
    }
}

/// Value-like tokens in the description that appear neither in the raw line
/// nor in the template's fixed text. Conservative: only digit-bearing tokens
/// of three or more characters count, so ordinary prose never trips it.
fn fabricated_values(description: &str, raw: &str, template: Option<&Template>) -> Vec<String> {
    let literals = template.map(|t| t.pattern.literal_text()).unwrap_or_default();
    description
        .split_whitespace()
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|t| {
            t.len() >= 3
                && t.chars().any(|c| c.is_ascii_digit())
                && !raw.contains(t)
                && !literals.contains(t)
        })
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use templar_core::TemplatePattern;
    use templar_oracle::mock::MockGenerator;

    fn template(pattern: &str) -> Template {
        Template::new("E1", "Proxifier", TemplatePattern::new(pattern).unwrap(), "a login event")
    }

    fn extractor(mock: MockGenerator) -> SemanticExtractor {
        SemanticExtractor::new(
            Arc::new(mock),
            GenerationParams::default(),
            Arc::new(FewShotSet::default()),
            3,
        )
    }

    #[tokio::test]
    async fn preserves_parameter_values_verbatim() {
        let mock = MockGenerator::new();
        mock.push_text("User alice logged in to the system.");
        let t = template("User <*> logged in");
        let sample = LogSample::new("1", "User alice logged in", Some("E1"));

        let desc = extractor(mock)
            .extract("Proxifier", &sample, Some(&t), false)
            .await
            .unwrap();
        assert_eq!(desc.params, vec!["alice".to_string()]);
        assert!(desc.preserves(&desc.params));
    }

    #[tokio::test]
    async fn lost_value_is_an_extraction_failure() {
        let mock = MockGenerator::new();
        mock.push_text("A user logged in to the system.");
        let t = template("User <*> logged in");
        let sample = LogSample::new("1", "User alice logged in", Some("E1"));

        let err = extractor(mock)
            .extract("Proxifier", &sample, Some(&t), false)
            .await
            .unwrap_err();
        match err {
            EngineError::Extraction { missing, fabricated, .. } => {
                assert_eq!(missing, vec!["alice".to_string()]);
                assert!(fabricated.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn invented_value_is_an_extraction_failure() {
        let mock = MockGenerator::new();
        mock.push_text("Error count 471 recorded for error........1.");
        let t = template("d-cache flush parity error........<*>");
        let sample = LogSample::new("31861", "d-cache flush parity error........1", Some("E1"));

        let err = extractor(mock)
            .extract("BGL", &sample, Some(&t), false)
            .await
            .unwrap_err();
        match err {
            EngineError::Extraction { fabricated, .. } => {
                assert_eq!(fabricated, vec!["471".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
