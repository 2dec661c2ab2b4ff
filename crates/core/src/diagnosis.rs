use std::fmt;

use serde::{Deserialize, Serialize};

/// Closed set of anomaly causes a failing verdict can be attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Cause {
    /// A fixed literal present in the raw lines is absent from the pattern.
    MissingStructure,
    /// A variable value in the raw lines has no slot in the pattern.
    MissingParameter,
    /// One pattern covers two or more latent event formats.
    OverMerged,
    /// The pattern itself is degenerate and resolves against nothing.
    SyntaxError,
    /// The reconstruction diverges only via invented content, recurring
    /// across retries.
    HallucinationInduced,
    Unresolved,
}

impl Cause {
    pub fn as_str(&self) -> &'static str {
        match self {
            Cause::MissingStructure => "missing-structure",
            Cause::MissingParameter => "missing-parameter",
            Cause::OverMerged => "over-merged",
            Cause::SyntaxError => "syntax-error",
            Cause::HallucinationInduced => "hallucination-induced",
            Cause::Unresolved => "unresolved",
        }
    }

    /// Tolerant parse for oracle replies: kebab, snake, or shouting variants.
    pub fn parse_loose(text: &str) -> Option<Cause> {
        let t = text.trim().to_ascii_lowercase().replace('_', "-");
        match t.as_str() {
            "missing-structure" => Some(Cause::MissingStructure),
            "missing-parameter" => Some(Cause::MissingParameter),
            "over-merged" | "overmerged" => Some(Cause::OverMerged),
            "syntax-error" => Some(Cause::SyntaxError),
            "hallucination-induced" | "hallucination" => Some(Cause::HallucinationInduced),
            "unresolved" | "none" => Some(Cause::Unresolved),
            _ => None,
        }
    }
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn parse_loose(text: &str) -> Option<Confidence> {
        match text.trim().to_ascii_lowercase().as_str() {
            "high" => Some(Confidence::High),
            "medium" => Some(Confidence::Medium),
            "low" => Some(Confidence::Low),
            _ => None,
        }
    }
}

/// The four repair roles, modeled as dispatch targets rather than objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairOp {
    RepairTemplate,
    SplitTemplate,
    RefineDescription,
    RetryWithDemonstrations,
}

impl RepairOp {
    /// Short tag used in derived-template ids.
    pub fn tag(&self) -> &'static str {
        match self {
            RepairOp::RepairTemplate => "repair",
            RepairOp::SplitTemplate => "split",
            RepairOp::RefineDescription => "refine",
            RepairOp::RetryWithDemonstrations => "retry",
        }
    }
}

impl fmt::Display for RepairOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Outcome of the diagnostic step for one failing verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnosis {
    pub cause: Cause,
    pub confidence: Confidence,
    pub rationale: String,
    /// Operation selected by the routing table; `None` means the case has
    /// nowhere left to go and exhausts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<RepairOp>,
}

/// The cause → operation routing table.
///
/// A first `unresolved` routes to the description refiner — a vague
/// description is the dominant reason diagnosis cannot converge — while a
/// repeated `unresolved` returns `None` and the case exhausts.
pub fn route(cause: Cause, prior_unresolved: bool) -> Option<RepairOp> {
    match cause {
        Cause::MissingStructure | Cause::MissingParameter | Cause::SyntaxError => {
            Some(RepairOp::RepairTemplate)
        }
        Cause::OverMerged => Some(RepairOp::SplitTemplate),
        Cause::HallucinationInduced => Some(RepairOp::RetryWithDemonstrations),
        Cause::Unresolved => {
            if prior_unresolved {
                None
            } else {
                Some(RepairOp::RefineDescription)
            }
        }
    }
}
