use std::fmt;

use serde::{Deserialize, Serialize};

use crate::diagnosis::RepairOp;
use crate::error::PatternError;

/// The canonical parameter placeholder in a template pattern.
pub const SLOT: &str = "<*>";

/// One piece of a parsed pattern: fixed text or a parameter slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Slot,
}

/// A structural log pattern: literal text interleaved with `<*>` slots.
///
/// Any angle-bracket placeholder (`<NUM>`, `<IP>`, ...) is normalized to a
/// plain slot at parse time, matching how benchmark templates are written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TemplatePattern {
    raw: String,
    segments: Vec<Segment>,
}

impl TemplatePattern {
    pub fn new(raw: &str) -> Result<Self, PatternError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(PatternError::Empty);
        }
        Ok(Self {
            raw: raw.to_string(),
            segments: parse_segments(raw),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn slot_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, Segment::Slot))
            .count()
    }

    /// Total length of the fixed text, i.e. the pattern with all slots removed.
    pub fn fixed_len(&self) -> usize {
        self.segments
            .iter()
            .map(|s| match s {
                Segment::Literal(l) => l.len(),
                Segment::Slot => 0,
            })
            .sum()
    }

    /// All fixed text concatenated, used to check whether a token is scaffolding.
    pub fn literal_text(&self) -> String {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Literal(l) => Some(l.as_str()),
                Segment::Slot => None,
            })
            .collect()
    }

    /// A pattern with no literal anchors cannot be resolved against any line.
    pub fn is_degenerate(&self) -> bool {
        !self.segments.iter().any(
            |s| matches!(s, Segment::Literal(l) if !l.trim().is_empty()),
        )
    }

    /// Match the full line against this pattern, capturing slot values.
    ///
    /// Slots are non-greedy: each captures the shortest prefix that lets the
    /// next literal match. Returns `None` unless the whole line is covered.
    pub fn matches(&self, line: &str) -> Option<Vec<String>> {
        let mut pos = 0usize;
        let mut captures = Vec::new();
        let mut pending_slot = false;

        for seg in &self.segments {
            match seg {
                Segment::Slot => {
                    if pending_slot {
                        // Two slots with nothing between them: the first one
                        // can only capture the empty string.
                        captures.push(String::new());
                    }
                    pending_slot = true;
                }
                Segment::Literal(lit) => {
                    if pending_slot {
                        let rel = line[pos..].find(lit.as_str())?;
                        captures.push(line[pos..pos + rel].to_string());
                        pos += rel + lit.len();
                        pending_slot = false;
                    } else {
                        if !line[pos..].starts_with(lit.as_str()) {
                            return None;
                        }
                        pos += lit.len();
                    }
                }
            }
        }

        if pending_slot {
            captures.push(line[pos..].to_string());
            pos = line.len();
        }

        if pos == line.len() {
            Some(captures)
        } else {
            None
        }
    }

    /// Fill the slots in order with the given values.
    pub fn render(&self, values: &[String]) -> Result<String, PatternError> {
        let expected = self.slot_count();
        if values.len() != expected {
            return Err(PatternError::ParamCount {
                expected,
                got: values.len(),
            });
        }
        let mut out = String::new();
        let mut next = 0usize;
        for seg in &self.segments {
            match seg {
                Segment::Literal(l) => out.push_str(l),
                Segment::Slot => {
                    out.push_str(&values[next]);
                    next += 1;
                }
            }
        }
        Ok(out)
    }
}

impl fmt::Display for TemplatePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl TryFrom<String> for TemplatePattern {
    type Error = PatternError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<TemplatePattern> for String {
    fn from(p: TemplatePattern) -> Self {
        p.raw
    }
}

/// Split a raw pattern into literal and slot segments.
///
/// Any `<...>` run without nested brackets counts as a placeholder.
fn parse_segments(raw: &str) -> Vec<Segment> {
    let chars: Vec<char> = raw.chars().collect();
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut i = 0usize;

    while i < chars.len() {
        if chars[i] == '<' {
            if let Some(close) = placeholder_end(&chars, i) {
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Slot);
                i = close + 1;
                continue;
            }
        }
        literal.push(chars[i]);
        i += 1;
    }

    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    segments
}

fn placeholder_end(chars: &[char], open: usize) -> Option<usize> {
    let mut j = open + 1;
    while j < chars.len() {
        match chars[j] {
            '>' if j > open + 1 => return Some(j),
            '>' | '<' => return None,
            c if c.is_whitespace() => return None,
            _ => j += 1,
        }
    }
    None
}

/// Where a template record came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Provenance {
    Original,
    Repaired { op: RepairOp, parent: String },
}

/// A structural label for a family of log lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    /// Event id within the owning system, e.g. `E255`.
    pub id: String,
    /// Owning log source, e.g. `BGL`.
    pub system: String,
    pub pattern: TemplatePattern,
    /// Free-text description of the event family.
    pub description: String,
    pub provenance: Provenance,
}

impl Template {
    pub fn new(id: &str, system: &str, pattern: TemplatePattern, description: &str) -> Self {
        Self {
            id: id.to_string(),
            system: system.to_string(),
            pattern,
            description: description.to_string(),
            provenance: Provenance::Original,
        }
    }

    /// A new versioned record produced by a repair operation. The original is
    /// never mutated; candidates carry their lineage in `provenance`.
    pub fn derive(
        &self,
        pattern: TemplatePattern,
        description: &str,
        op: RepairOp,
        index: usize,
    ) -> Self {
        Self {
            id: format!("{}.{}-{}", self.id, op.tag(), index + 1),
            system: self.system.clone(),
            pattern,
            description: description.to_string(),
            provenance: Provenance::Repaired {
                op,
                parent: self.id.clone(),
            },
        }
    }
}
