use serde::{Deserialize, Serialize};

/// One raw log line under audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSample {
    /// Line number within the source log file.
    pub line_id: String,
    /// Raw log text.
    pub raw: String,
    /// Template this line was originally assigned to, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    /// Literal parameter values extracted once the line matched a pattern.
    #[serde(default)]
    pub params: Vec<String>,
}

impl LogSample {
    pub fn new(line_id: &str, raw: &str, template_id: Option<&str>) -> Self {
        Self {
            line_id: line_id.to_string(),
            raw: raw.to_string(),
            template_id: template_id.map(str::to_string),
            params: Vec::new(),
        }
    }
}

/// A structure-free restatement of a log line's meaning.
///
/// Surrounding prose may be reworded freely, but every parameter value must
/// survive byte-for-byte — a description that paraphrases a value is unusable
/// for reconstruction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticDescription {
    pub text: String,
    /// Values that must reappear verbatim in any faithful reconstruction.
    pub params: Vec<String>,
}

impl SemanticDescription {
    pub fn new(text: &str, params: Vec<String>) -> Self {
        Self {
            text: text.to_string(),
            params,
        }
    }

    /// Parameter values that do not appear verbatim in the text.
    pub fn missing_values(&self, values: &[String]) -> Vec<String> {
        values
            .iter()
            .filter(|v| !v.is_empty() && !self.text.contains(v.as_str()))
            .cloned()
            .collect()
    }

    pub fn preserves(&self, values: &[String]) -> bool {
        self.missing_values(values).is_empty()
    }
}
